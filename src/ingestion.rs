use std::path::Path;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    document::Document,
    error::Result,
    generation::Generation,
    index::NrtIndex,
    schema::fields,
    walker::{self, DiscoveredFile},
};

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub indexed: usize,
    /// Files that could not be read.
    pub skipped: usize,
    /// Highest generation among the run's mutations.
    pub last_generation: Option<Generation>,
}

/// Identity value of a discovered file: its root-relative path with `/`
/// separators.
pub fn document_id(file: &DiscoveredFile) -> String {
    file.relative_path
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Build the indexable document for a file.
pub fn build_document(file: &DiscoveredFile, content: &str) -> Document {
    let path = &file.relative_path;
    let lower = |s: Option<&std::ffi::OsStr>| {
        s.map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    };

    Document::new()
        .keyword(fields::ID, document_id(file))
        .keyword(fields::PATH, file.absolute_path.to_string_lossy())
        .keyword(fields::NAME, lower(path.file_stem()))
        .keyword(fields::SUFFIX, lower(path.extension()))
        .text(fields::CONTENT, content)
}

fn load(file: &DiscoveredFile) -> Option<Document> {
    match std::fs::read(&file.absolute_path) {
        Ok(bytes) => {
            let content = String::from_utf8_lossy(&bytes);
            Some(build_document(file, &content))
        }
        Err(e) => {
            warn!(
                path = %file.absolute_path.display(),
                error = %e,
                "skipping unreadable file"
            );
            None
        }
    }
}

/// Index `files`, replacing earlier versions by identity.
///
/// Files are read and submitted in parallel against the shared writer.
/// Unreadable files are counted and skipped; the first mutation error
/// aborts the run.
pub fn ingest_files(
    index: &NrtIndex,
    files: &[DiscoveredFile],
) -> Result<IngestReport> {
    let outcomes: Vec<Option<Generation>> = files
        .par_iter()
        .map(|file| match load(file) {
            Some(document) => {
                let id = document_id(file);
                index.update(&id, &document).map(Some)
            }
            None => Ok(None),
        })
        .collect::<Result<_>>()?;

    let mut report = IngestReport::default();
    for outcome in outcomes {
        match outcome {
            Some(generation) => {
                report.indexed += 1;
                report.last_generation =
                    report.last_generation.max(Some(generation));
            }
            None => report.skipped += 1,
        }
    }
    Ok(report)
}

/// Discover and index every matching file under `root`.
pub fn ingest_dir(
    index: &NrtIndex,
    root: &Path,
    extensions: &[String],
) -> Result<IngestReport> {
    let files = walker::discover_files(root, extensions)?;
    let report = ingest_files(index, &files)?;
    info!(
        root = %root.display(),
        indexed = report.indexed,
        skipped = report.skipped,
        "ingested directory"
    );
    Ok(report)
}
