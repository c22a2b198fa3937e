//! docnrt - near-real-time document search.
//!
//! A single writer stamps every mutation with a strictly increasing
//! [`Generation`]. Searches run against leased, immutable snapshots that a
//! background coordinator keeps fresh, and callers that need their own
//! writes to be visible wait for the generation they were handed.
//! Storage, analysis and scoring are provided by
//! [Tantivy](https://github.com/quickwit-oss/tantivy).
//!
//! # Quick start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use docnrt::{Document, IndexConfig, NrtIndex, QueryRequest};
//! use docnrt::schema::fields;
//!
//! let index = NrtIndex::open_in_ram(IndexConfig::default()).unwrap();
//!
//! let doc = Document::new()
//!     .keyword(fields::ID, "index.html")
//!     .keyword(fields::PATH, "/site/index.html")
//!     .keyword(fields::NAME, "index")
//!     .keyword(fields::SUFFIX, "html")
//!     .text(fields::CONTENT, "Welcome home");
//! let generation = index.add(&doc).unwrap();
//! index
//!     .wait_for_generation(generation, Duration::from_secs(5))
//!     .unwrap();
//!
//! let request = QueryRequest::new()
//!     .should(fields::NAME, "ind")
//!     .must_not(fields::SUFFIX, "css");
//! let page = index.search_page(&request, 1, 20).unwrap();
//! for hit in &page.hits {
//!     println!("{} (score: {:.3})", hit.document.path, hit.score);
//! }
//! ```

pub mod cli;
pub mod config;
pub mod config_db;
pub mod data_dir;
pub mod document;
pub mod error;
pub mod generation;
pub mod index;
pub mod ingestion;
pub mod mcp;
pub mod paginate;
pub mod query;
pub mod reopen;
pub mod schema;
pub mod search;
pub mod snapshot;
pub mod walker;
pub mod writer;

pub use config::IndexConfig;
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use document::{Document, StoredDocument};
pub use error::{Error, Result};
pub use generation::Generation;
pub use index::{IndexStats, NrtIndex};
pub use paginate::Page;
pub use query::{Occurrence, QueryRequest};
pub use search::{Cursor, SearchHit};
pub use snapshot::Lease;
