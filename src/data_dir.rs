use std::path::{Path, PathBuf};

use crate::{
    config::keys,
    config_db::ConfigDb,
    error::{Error, Result},
};

/// Environment variable overriding the data root.
pub const DATA_DIR_ENV: &str = "DOCNRT_DATA_DIR";

const INDEX_SUBDIR: &str = "index";
const DOC_SUBDIR: &str = "ingest";

/// Where docnrt keeps its files.
///
/// The root holds the settings database. The index and the document
/// directory default to subdirectories of the root and can be moved with
/// the `index_dir` and `doc_dir` settings; relative settings are taken
/// against the root.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the root from `--data-dir`, then `DOCNRT_DATA_DIR`, then
    /// the XDG data home.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = match explicit {
            Some(path) => path.to_path_buf(),
            None => match std::env::var_os(DATA_DIR_ENV) {
                Some(val) => PathBuf::from(val),
                None => xdg_data_home()?,
            },
        };
        Ok(Self {
            root: ensure_dir(root)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_db(&self) -> PathBuf {
        self.root.join("config.redb")
    }

    /// Index storage location, created on first use.
    pub fn index_dir(&self, db: &ConfigDb) -> Result<PathBuf> {
        self.located(db, keys::INDEX_DIR, INDEX_SUBDIR)
    }

    /// Directory ingested when no path is given, created on first use.
    pub fn doc_dir(&self, db: &ConfigDb) -> Result<PathBuf> {
        self.located(db, keys::DOC_DIR, DOC_SUBDIR)
    }

    fn located(
        &self,
        db: &ConfigDb,
        key: &str,
        default: &str,
    ) -> Result<PathBuf> {
        let path = match db.get_setting(key)? {
            Some(configured) => self.root.join(configured.trim()),
            None => self.root.join(default),
        };
        ensure_dir(path)
    }
}

fn xdg_data_home() -> Result<PathBuf> {
    xdg::BaseDirectories::with_prefix("docnrt")
        .get_data_home()
        .ok_or_else(|| {
            Error::Config("could not determine XDG data home directory".into())
        })
}

fn ensure_dir(path: PathBuf) -> Result<PathBuf> {
    match std::fs::create_dir_all(&path) {
        Ok(()) => Ok(path),
        Err(_) => Err(Error::DataDir(path)),
    }
}
