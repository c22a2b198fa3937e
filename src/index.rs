use std::{path::Path, sync::Arc, time::Duration};

use serde::Serialize;
use tantivy::{
    Index,
    IndexReader,
    ReloadPolicy,
    directory::MmapDirectory,
    query::{Query, QueryParser},
};
use tracing::{info, warn};

use crate::{
    config::IndexConfig,
    document::Document,
    error::{Error, Result},
    generation::Generation,
    paginate::{self, Page},
    query::{self, QueryNode, QueryRequest},
    reopen::ReopenCoordinator,
    schema::IndexSchema,
    search::{self, SearchHit},
    snapshot::{Lease, SnapshotManager, SnapshotStats},
    writer::DocumentWriter,
};

/// Hit count returned by an unpaged structured search.
pub const DEFAULT_UNPAGED_LIMIT: usize = 1000;

/// Document counts of the current snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    /// Generation the current snapshot covers.
    pub generation: Generation,
    /// Latest generation handed out to a mutation.
    pub last_generation: Generation,
    pub num_docs: u64,
    pub max_doc: u64,
    /// Deleted documents not yet merged away.
    pub deleted_docs: u64,
    pub snapshots: SnapshotStats,
}

/// A near-real-time index: one writer, leased snapshots kept fresh by a
/// background coordinator, structured and text search with pagination.
pub struct NrtIndex {
    index: Index,
    schema: IndexSchema,
    writer: Arc<DocumentWriter>,
    manager: Arc<SnapshotManager>,
    coordinator: ReopenCoordinator,
}

impl NrtIndex {
    /// Open the index at `config.index_dir`, creating it when missing. An
    /// unset directory keeps the index in memory.
    pub fn open(config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let schema = IndexSchema::build();

        let index = match &config.index_dir {
            Some(dir) => open_dir(dir, &schema)?,
            None => Index::create_in_ram(schema.schema().clone()),
        };
        Self::start(index, schema, &config)
    }

    /// Open a fresh in-memory index, ignoring `config.index_dir`.
    pub fn open_in_ram(config: IndexConfig) -> Result<Self> {
        Self::open(IndexConfig {
            index_dir: None,
            ..config
        })
    }

    fn start(
        index: Index,
        schema: IndexSchema,
        config: &IndexConfig,
    ) -> Result<Self> {
        schema.register_tokenizers(&index);

        let writer = Arc::new(DocumentWriter::open(
            &index,
            schema.clone(),
            config.writer_memory,
        )?);
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let manager = Arc::new(SnapshotManager::new(
            Arc::clone(&writer),
            reader,
            schema.clone(),
        )?);
        let coordinator = ReopenCoordinator::start(
            Arc::clone(&manager),
            config.min_stale,
            config.max_stale,
        )?;

        info!(
            generation = %writer.committed_generation(),
            in_memory = config.index_dir.is_none(),
            "index opened"
        );
        Ok(Self {
            index,
            schema,
            writer,
            manager,
            coordinator,
        })
    }

    pub fn schema(&self) -> &IndexSchema {
        &self.schema
    }

    pub fn add(&self, document: &Document) -> Result<Generation> {
        self.writer.add(document)
    }

    /// Replace the document identified by `id`.
    pub fn update(&self, id: &str, document: &Document) -> Result<Generation> {
        self.writer.update(id, document)
    }

    pub fn delete_by_id(&self, id: &str) -> Result<Generation> {
        self.writer.delete_by_id(id)
    }

    pub fn delete_all(&self) -> Result<Generation> {
        self.writer.delete_all()
    }

    /// Persist all mutations so far; returns the committed generation.
    pub fn commit(&self) -> Result<Generation> {
        self.writer.commit()
    }

    /// Latest generation stamped on a mutation.
    pub fn last_generation(&self) -> Generation {
        self.writer.last_generation()
    }

    /// Generation covered by the current snapshot.
    pub fn current_generation(&self) -> Generation {
        self.manager.current_generation()
    }

    /// Refresh now instead of waiting for the coordinator.
    pub fn maybe_refresh(&self) -> Result<bool> {
        self.manager.maybe_refresh()
    }

    /// Block until every mutation up to `target` is searchable.
    pub fn wait_for_generation(
        &self,
        target: Generation,
        timeout: Duration,
    ) -> Result<()> {
        let last = self.writer.last_generation();
        if target > last {
            return Err(Error::Validation(format!(
                "generation {target} has not been issued (latest is {last})"
            )));
        }
        self.coordinator.wait_for_generation(target, timeout)
    }

    /// Wait for everything written so far to become searchable.
    pub fn wait_for_latest(&self, timeout: Duration) -> Result<Generation> {
        let target = self.writer.last_generation();
        self.wait_for_generation(target, timeout)?;
        Ok(target)
    }

    /// Lease the current snapshot.
    pub fn acquire(&self) -> Result<Lease> {
        self.manager.acquire_current()
    }

    fn compile(&self, request: &QueryRequest) -> Result<Box<dyn Query>> {
        query::compose(request)?.to_query(&self.schema)
    }

    /// Top `limit` hits of a structured request.
    pub fn search(
        &self,
        request: &QueryRequest,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let query = self.compile(request)?;
        let lease = self.acquire()?;
        search::search(query.as_ref(), &lease, limit)
    }

    /// Page `page_index` (1-based) of a structured request.
    pub fn search_page(
        &self,
        request: &QueryRequest,
        page_index: usize,
        page_size: usize,
    ) -> Result<Page> {
        let query = self.compile(request)?;
        let lease = self.acquire()?;
        paginate::search_page(query.as_ref(), page_index, page_size, &lease)
    }

    /// A page of a structured request, or the first
    /// [`DEFAULT_UNPAGED_LIMIT`] hits when no page is given.
    pub fn search_request(
        &self,
        request: &QueryRequest,
        page: Option<(usize, usize)>,
    ) -> Result<Page> {
        let (page_index, page_size) =
            page.unwrap_or((1, DEFAULT_UNPAGED_LIMIT));
        self.search_page(request, page_index, page_size)
    }

    /// Exact-term lookup over `(field, value)` pairs; suffix terms are
    /// required, the rest are alternatives. Unpaged like
    /// [`NrtIndex::search_request`] when `page` is `None`.
    pub fn search_terms(
        &self,
        terms: &[(String, String)],
        page: Option<(usize, usize)>,
    ) -> Result<Page> {
        let node = query::compose_terms(terms)?;
        self.search_node(&node, page)
    }

    /// Documents whose `field` lies between `lower` and `upper`, both
    /// included.
    pub fn search_range(
        &self,
        field: &str,
        lower: &str,
        upper: &str,
        page: Option<(usize, usize)>,
    ) -> Result<Page> {
        let node = query::compose_range(field, lower, upper)?;
        self.search_node(&node, page)
    }

    fn search_node(
        &self,
        node: &QueryNode,
        page: Option<(usize, usize)>,
    ) -> Result<Page> {
        let query = node.to_query(&self.schema)?;
        let (page_index, page_size) =
            page.unwrap_or((1, DEFAULT_UNPAGED_LIMIT));
        let lease = self.acquire()?;
        paginate::search_page(query.as_ref(), page_index, page_size, &lease)
    }

    /// Page through hits of a free-form query over the full-text field.
    pub fn search_text(
        &self,
        query_string: &str,
        page_index: usize,
        page_size: usize,
    ) -> Result<Page> {
        if query_string.trim().is_empty() {
            return Err(Error::EmptyQuery);
        }
        let content = self.schema.fields().content;
        let parser = QueryParser::for_index(&self.index, vec![content]);
        let query = parser.parse_query(query_string)?;

        let lease = self.acquire()?;
        paginate::search_page(query.as_ref(), page_index, page_size, &lease)
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let lease = self.acquire()?;
        let searcher = lease.searcher();
        let num_docs = searcher.num_docs();
        let max_doc: u64 = searcher
            .segment_readers()
            .iter()
            .map(|segment| u64::from(segment.max_doc()))
            .sum();

        Ok(IndexStats {
            generation: lease.generation(),
            last_generation: self.writer.last_generation(),
            num_docs,
            max_doc,
            deleted_docs: max_doc.saturating_sub(num_docs),
            snapshots: self.manager.stats(),
        })
    }

    pub fn snapshot_stats(&self) -> SnapshotStats {
        self.manager.stats()
    }

    pub fn is_closed(&self) -> bool {
        self.manager.is_closed()
    }

    /// Stop the coordinator, fail pending waits with [`Error::Closed`] and
    /// commit what is left.
    pub fn close(&self) -> Result<()> {
        if self.writer.is_closed() {
            return Ok(());
        }
        self.coordinator.shutdown();
        self.writer.close()?;
        info!(
            generation = %self.writer.committed_generation(),
            "index closed"
        );
        Ok(())
    }
}

impl Drop for NrtIndex {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "closing index failed");
        }
    }
}

impl std::fmt::Debug for NrtIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NrtIndex")
            .field("writer", &self.writer)
            .field("snapshots", &self.manager.stats())
            .finish_non_exhaustive()
    }
}

fn open_dir(dir: &Path, schema: &IndexSchema) -> Result<Index> {
    std::fs::create_dir_all(dir)?;
    let mmap_dir = MmapDirectory::open(dir)
        .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?;

    if !Index::exists(&mmap_dir)
        .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?
    {
        return Ok(Index::create(
            mmap_dir,
            schema.schema().clone(),
            tantivy::IndexSettings::default(),
        )?);
    }

    let index = Index::open(mmap_dir)?;
    if index.schema() != *schema.schema() {
        return Err(Error::Config(format!(
            "index at {} was built with a different schema",
            dir.display()
        )));
    }
    Ok(index)
}
