use std::path::PathBuf;

use crate::generation::Generation;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index error: {0}")]
    Index(#[from] tantivy::TantivyError),

    #[error("query parse error: {0}")]
    QueryParse(#[from] tantivy::query::QueryParserError),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("query has no clauses")]
    EmptyQuery,

    #[error(
        "generation {target} not visible in time (current {current}{})",
        refresh_suffix(.last_refresh_error)
    )]
    Timeout {
        target: Generation,
        current: Generation,
        last_refresh_error: Option<String>,
    },

    #[error("refresh failed: {0}")]
    RefreshFailed(String),

    #[error("index is closed")]
    Closed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

fn refresh_suffix(last_refresh_error: &Option<String>) -> String {
    last_refresh_error
        .as_ref()
        .map(|e| format!(", last refresh failed: {e}"))
        .unwrap_or_default()
}

impl Error {
    /// Whether retrying the same call may succeed.
    ///
    /// Storage and visibility failures are transient; malformed input and
    /// calls against a closed index never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Index(_)
                | Error::Timeout { .. }
                | Error::RefreshFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_mentions_refresh_failure() {
        let slow = Error::Timeout {
            target: Generation::new(7),
            current: Generation::new(3),
            last_refresh_error: None,
        };
        assert_eq!(
            slow.to_string(),
            "generation 7 not visible in time (current 3)"
        );

        let broken = Error::Timeout {
            target: Generation::new(7),
            current: Generation::new(3),
            last_refresh_error: Some("disk full".to_string()),
        };
        assert!(
            broken
                .to_string()
                .ends_with("last refresh failed: disk full)")
        );
    }

    #[test]
    fn retry_classification() {
        assert!(Error::RefreshFailed("x".into()).is_retryable());
        assert!(!Error::Closed.is_retryable());
        assert!(!Error::EmptyQuery.is_retryable());
        assert!(!Error::Validation("bad".into()).is_retryable());
    }
}
