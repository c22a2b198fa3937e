use std::{path::PathBuf, time::Duration};

use crate::{
    config_db::ConfigDb,
    error::{Error, Result},
};

/// Setting keys stored in the config database.
pub mod keys {
    pub const REOPEN_MAX_STALE_MS: &str = "reopen_max_stale_ms";
    pub const REOPEN_MIN_STALE_MS: &str = "reopen_min_stale_ms";
    pub const WRITER_MEMORY_BYTES: &str = "writer_memory_bytes";
    pub const EXTENSIONS: &str = "extensions";
    /// Index storage location, relative to the data directory unless
    /// absolute.
    pub const INDEX_DIR: &str = "index_dir";
    /// Directory `ingest` reads when no path is given.
    pub const DOC_DIR: &str = "doc_dir";

    pub const ALL: &[&str] = &[
        REOPEN_MAX_STALE_MS,
        REOPEN_MIN_STALE_MS,
        WRITER_MEMORY_BYTES,
        EXTENSIONS,
        INDEX_DIR,
        DOC_DIR,
    ];
}

pub const DEFAULT_MAX_STALE: Duration = Duration::from_millis(5000);
pub const DEFAULT_MIN_STALE: Duration = Duration::from_millis(25);
pub const DEFAULT_WRITER_MEMORY: usize = 50_000_000;
/// Smallest writer budget the engine accepts.
pub const MIN_WRITER_MEMORY: usize = 15_000_000;
pub const DEFAULT_EXTENSIONS: &[&str] = &["html", "js", "css", "md", "txt"];

/// Startup parameters of an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    /// Index storage location. `None` keeps the index in memory.
    pub index_dir: Option<PathBuf>,
    /// Longest time the coordinator lets the current snapshot go stale.
    pub max_stale: Duration,
    /// Shortest interval between refreshes while callers are waiting.
    pub min_stale: Duration,
    pub writer_memory: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_dir: None,
            max_stale: DEFAULT_MAX_STALE,
            min_stale: DEFAULT_MIN_STALE,
            writer_memory: DEFAULT_WRITER_MEMORY,
        }
    }
}

impl IndexConfig {
    pub fn in_dir(index_dir: impl Into<PathBuf>) -> Self {
        Self {
            index_dir: Some(index_dir.into()),
            ..Self::default()
        }
    }

    pub fn with_staleness(
        mut self,
        min_stale: Duration,
        max_stale: Duration,
    ) -> Self {
        self.min_stale = min_stale;
        self.max_stale = max_stale;
        self
    }

    /// Read the reopen cadence and writer budget from the settings
    /// database, falling back to defaults for unset keys.
    pub fn from_config_db(
        db: &ConfigDb,
        index_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let max_stale = read_millis(db, keys::REOPEN_MAX_STALE_MS)?
            .unwrap_or(DEFAULT_MAX_STALE);
        let min_stale = read_millis(db, keys::REOPEN_MIN_STALE_MS)?
            .unwrap_or(DEFAULT_MIN_STALE);
        let writer_memory = match db.get_setting(keys::WRITER_MEMORY_BYTES)? {
            Some(raw) => parse_number(keys::WRITER_MEMORY_BYTES, &raw)?,
            None => DEFAULT_WRITER_MEMORY,
        };

        let config = Self {
            index_dir,
            max_stale,
            min_stale,
            writer_memory,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_stale.is_zero() || self.max_stale.is_zero() {
            return Err(Error::Config(
                "reopen intervals must be positive".into(),
            ));
        }
        if self.min_stale > self.max_stale {
            return Err(Error::Config(format!(
                "{} ({} ms) exceeds {} ({} ms)",
                keys::REOPEN_MIN_STALE_MS,
                self.min_stale.as_millis(),
                keys::REOPEN_MAX_STALE_MS,
                self.max_stale.as_millis(),
            )));
        }
        if self.writer_memory < MIN_WRITER_MEMORY {
            return Err(Error::Config(format!(
                "{} must be at least {MIN_WRITER_MEMORY}",
                keys::WRITER_MEMORY_BYTES
            )));
        }
        Ok(())
    }
}

/// Extensions the directory ingester keeps, lower-cased.
pub fn extensions(db: &ConfigDb) -> Result<Vec<String>> {
    let list: Vec<String> = match db.get_setting(keys::EXTENSIONS)? {
        Some(raw) => parse_extensions(&raw),
        None => DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
    };
    if list.is_empty() {
        return Err(Error::Config(format!("{} is empty", keys::EXTENSIONS)));
    }
    Ok(list)
}

pub fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

/// Check a value before it is persisted with `config set`.
pub fn check_setting(key: &str, value: &str) -> Result<()> {
    match key {
        keys::REOPEN_MAX_STALE_MS
        | keys::REOPEN_MIN_STALE_MS
        | keys::WRITER_MEMORY_BYTES => {
            parse_number::<u64>(key, value)?;
            Ok(())
        }
        keys::INDEX_DIR | keys::DOC_DIR if value.trim().is_empty() => {
            Err(Error::Config(format!("{key} is empty")))
        }
        keys::INDEX_DIR | keys::DOC_DIR => Ok(()),
        keys::EXTENSIONS if parse_extensions(value).is_empty() => {
            Err(Error::Config(format!("{key} is empty")))
        }
        keys::EXTENSIONS => Ok(()),
        other => Err(Error::NotFound {
            kind: "setting",
            name: other.to_string(),
        }),
    }
}

fn read_millis(db: &ConfigDb, key: &str) -> Result<Option<Duration>> {
    db.get_setting(key)?
        .map(|raw| parse_number::<u64>(key, &raw).map(Duration::from_millis))
        .transpose()
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        Error::Config(format!("{key}: '{raw}' is not a valid number"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, ConfigDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = ConfigDb::open(&tmp.path().join("config.redb")).unwrap();
        (tmp, db)
    }

    #[test]
    fn defaults_when_unset() {
        let (_tmp, db) = test_db();
        let config = IndexConfig::from_config_db(&db, None).unwrap();

        assert_eq!(config, IndexConfig::default());
        assert_eq!(extensions(&db).unwrap(), DEFAULT_EXTENSIONS);
    }

    #[test]
    fn reads_stored_settings() {
        let (_tmp, db) = test_db();
        db.set_setting(keys::REOPEN_MAX_STALE_MS, "1000").unwrap();
        db.set_setting(keys::REOPEN_MIN_STALE_MS, "10").unwrap();
        db.set_setting(keys::EXTENSIONS, " .HTML, md ,,").unwrap();

        let config = IndexConfig::from_config_db(&db, None).unwrap();
        assert_eq!(config.max_stale, Duration::from_millis(1000));
        assert_eq!(config.min_stale, Duration::from_millis(10));
        assert_eq!(extensions(&db).unwrap(), vec!["html", "md"]);
    }

    #[test]
    fn min_stale_above_max_stale_is_rejected() {
        let (_tmp, db) = test_db();
        db.set_setting(keys::REOPEN_MAX_STALE_MS, "10").unwrap();
        db.set_setting(keys::REOPEN_MIN_STALE_MS, "20").unwrap();

        assert!(matches!(
            IndexConfig::from_config_db(&db, None),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn malformed_values_are_config_errors() {
        let (_tmp, db) = test_db();
        db.set_setting(keys::WRITER_MEMORY_BYTES, "lots").unwrap();
        assert!(matches!(
            IndexConfig::from_config_db(&db, None),
            Err(Error::Config(_))
        ));

        let small = IndexConfig {
            writer_memory: 1_000,
            ..IndexConfig::default()
        };
        assert!(small.validate().is_err());
    }

    #[test]
    fn check_setting_rejects_unknown_keys() {
        assert!(check_setting(keys::REOPEN_MIN_STALE_MS, "5").is_ok());
        assert!(check_setting(keys::WRITER_MEMORY_BYTES, "-1").is_err());
        assert!(check_setting(keys::EXTENSIONS, " , ").is_err());
        assert!(check_setting(keys::DOC_DIR, "site").is_ok());
        assert!(check_setting(keys::INDEX_DIR, "  ").is_err());
        assert!(matches!(
            check_setting("model", "x"),
            Err(Error::NotFound { .. })
        ));
    }
}
