//! Page-numbered access on top of cursor search.
//!
//! Page `n` (1-based) is found by ranking the first `size * (n - 1)` hits,
//! taking the last of them as a cursor, and searching after it. Every step
//! runs against the same leased snapshot so pages stay consistent.

use serde::Serialize;
use tantivy::query::Query;

use crate::{
    error::{Error, Result},
    generation::Generation,
    search::{self, Cursor, SearchHit},
    snapshot::Snapshot,
};

/// One page of results.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub page_index: usize,
    pub page_size: usize,
    /// Generation of the snapshot the page was read from.
    pub generation: Generation,
    pub hits: Vec<SearchHit>,
}

fn check_page(page_index: usize, page_size: usize) -> Result<()> {
    if page_index == 0 {
        return Err(Error::Validation("page index starts at 1".into()));
    }
    if page_size == 0 {
        return Err(Error::Validation("page size must be positive".into()));
    }
    Ok(())
}

/// Cursor positioned just before `page_index`.
///
/// `None` means "start from the top": either the first page was asked for
/// or nothing precedes it. When fewer hits exist than the pages before it
/// would hold, the last available hit is used, so the page comes back
/// empty.
pub fn resolve_page(
    query: &dyn Query,
    page_index: usize,
    page_size: usize,
    snapshot: &Snapshot,
) -> Result<Option<Cursor>> {
    check_page(page_index, page_size)?;
    if page_index == 1 {
        return Ok(None);
    }

    let skip = page_size.checked_mul(page_index - 1).ok_or_else(|| {
        Error::Validation(format!(
            "page {page_index} of size {page_size} is out of range"
        ))
    })?;

    let ranked = search::rank(query, snapshot, None, skip)?;
    Ok(ranked.last().map(|&(score, address)| Cursor { score, address }))
}

/// Fetch page `page_index` of `page_size` hits.
pub fn search_page(
    query: &dyn Query,
    page_index: usize,
    page_size: usize,
    snapshot: &Snapshot,
) -> Result<Page> {
    let cursor = resolve_page(query, page_index, page_size, snapshot)?;
    // A cursor on an exhausted result set yields nothing after it.
    let hits = search::search_after(query, snapshot, cursor, page_size)?;

    Ok(Page {
        page_index,
        page_size,
        generation: snapshot.generation(),
        hits,
    })
}
