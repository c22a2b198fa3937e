use parking_lot::RwLock;
use tantivy::{
    Index,
    IndexWriter,
    indexer::UserOperation,
    query::AllQuery,
};
use tracing::debug;

use crate::{
    document::Document,
    error::{Error, Result},
    generation::{Generation, GenerationClock},
    schema::IndexSchema,
};

/// The single mutation entry point of an index.
///
/// Mutations share the engine writer and may run from any number of
/// threads; each one is stamped with a unique generation by the engine.
/// Commits take the writer exclusively while the engine persists.
pub struct DocumentWriter {
    schema: IndexSchema,
    writer: RwLock<Option<IndexWriter>>,
    clock: GenerationClock,
}

impl DocumentWriter {
    /// Create a writer with the given memory budget (in bytes).
    pub fn open(
        index: &Index,
        schema: IndexSchema,
        memory_budget: usize,
    ) -> Result<Self> {
        let writer: IndexWriter = index.writer(memory_budget)?;
        let start = Generation::of_commit(writer.commit_opstamp());
        debug!(generation = %start, "writer opened");

        Ok(Self {
            schema,
            writer: RwLock::new(Some(writer)),
            clock: GenerationClock::new(start),
        })
    }

    /// Append a new document.
    pub fn add(&self, document: &Document) -> Result<Generation> {
        document.validate()?;
        let doc = self.schema.to_engine(document)?;

        self.mutate(|writer| Ok(writer.add_document(doc)?))
    }

    /// Replace every document whose identity equals `id` with `document`,
    /// as one batch under one generation.
    pub fn update(&self, id: &str, document: &Document) -> Result<Generation> {
        require_id(id)?;
        document.validate()?;
        let doc = self.schema.to_engine(document)?;
        let operations = vec![
            UserOperation::Delete(self.schema.id_term(id)),
            UserOperation::Add(doc),
        ];

        self.mutate(|writer| Ok(writer.run(operations)?))
    }

    pub fn delete_by_id(&self, id: &str) -> Result<Generation> {
        require_id(id)?;
        let term = self.schema.id_term(id);

        self.mutate(|writer| Ok(writer.delete_term(term)))
    }

    pub fn delete_all(&self) -> Result<Generation> {
        self.mutate(|writer| Ok(writer.delete_query(Box::new(AllQuery))?))
    }

    fn mutate(
        &self,
        op: impl FnOnce(&IndexWriter) -> Result<u64>,
    ) -> Result<Generation> {
        let guard = self.writer.read();
        let writer = guard.as_ref().ok_or(Error::Closed)?;
        // Recorded before the guard drops so a commit never misses it.
        let stamp = op(writer)?;
        Ok(self.clock.observe(stamp))
    }

    /// Persist every mutation stamped so far.
    ///
    /// Returns the highest committed generation. Calling it again with no
    /// mutation in between does not touch the engine.
    pub fn commit(&self) -> Result<Generation> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        if !self.clock.has_pending() {
            return Ok(self.clock.committed());
        }

        let mut guard = self.writer.write();
        let writer = guard.as_mut().ok_or(Error::Closed)?;

        // No mutation can be stamped while the exclusive guard is held.
        if !self.clock.has_pending() {
            return Ok(self.clock.committed());
        }

        let committed = Generation::of_commit(writer.commit()?);
        self.clock.mark_committed(committed);
        debug!(generation = %committed, "committed");
        Ok(committed)
    }

    /// Latest generation handed out to a mutation.
    pub fn last_generation(&self) -> Generation {
        self.clock.last_stamped()
    }

    pub fn committed_generation(&self) -> Generation {
        self.clock.committed()
    }

    pub fn is_closed(&self) -> bool {
        self.writer.read().is_none()
    }

    /// Commit what is pending and release the engine writer.
    ///
    /// Further mutations fail with [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let committed = self.commit();

        let writer = self.writer.write().take();
        if let Some(writer) = writer {
            writer.wait_merging_threads()?;
        }
        committed.map(|_| ())
    }
}

impl std::fmt::Debug for DocumentWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentWriter")
            .field("last_stamped", &self.clock.last_stamped())
            .field("committed", &self.clock.committed())
            .finish_non_exhaustive()
    }
}

fn require_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(Error::Validation("identity value is blank".into()));
    }
    Ok(())
}
