//! Storage layer for taskdesk
//!
//! All persistent state lives under the data directory (`.taskdesk/` by
//! default) of a workspace root.
//!
//! # Directory Structure
//!
//! ```text
//! .taskdesk/
//!   session.json              # Signed-in identity for this workspace
//!   store/
//!     .lock                   # Held while a commit rewrites a collection
//!     tasks.json              # id -> task document fields
//!     users.json              # uid -> user profile fields
//!     credentials.json        # uid -> password hash
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::config::Config;
use crate::error::Result;
use crate::lock;

/// Name of the store directory inside the data dir
pub const STORE_DIR: &str = "store";

const LOCK_FILE: &str = ".lock";
const SESSION_FILE: &str = "session.json";

/// Storage manager for taskdesk state
#[derive(Debug, Clone)]
pub struct Storage {
    /// Workspace root (where `.taskdesk.toml` lives)
    root: PathBuf,
    /// Absolute data directory
    data_dir: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf, data_dir: PathBuf) -> Self {
        Self { root, data_dir }
    }

    /// Storage for a workspace root using its configured data dir
    pub fn for_root(root: PathBuf, config: &Config) -> Self {
        let data_dir = config.data_dir_for(&root);
        Self::new(root, data_dir)
    }

    // =========================================================================
    // Path accessors
    // =========================================================================

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory holding one JSON file per collection
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join(STORE_DIR)
    }

    /// File backing a collection
    pub fn collection_file(&self, collection: &str) -> PathBuf {
        self.store_dir().join(format!("{collection}.json"))
    }

    /// Advisory lock file guarding store commits
    pub fn lock_file(&self) -> PathBuf {
        self.store_dir().join(LOCK_FILE)
    }

    pub fn session_file(&self) -> PathBuf {
        self.data_dir.join(SESSION_FILE)
    }

    // =========================================================================
    // Directory initialization
    // =========================================================================

    /// Create the data and store directories
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(self.store_dir())?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.store_dir().exists()
    }

    // =========================================================================
    // File I/O helpers
    // =========================================================================

    /// Write JSON data atomically (write to temp, then rename)
    pub fn write_json<T: Serialize>(&self, path: &Path, data: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(data)?;
        lock::write_atomic(path, json.as_bytes())
    }

    /// Read JSON data from a file
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let content = fs::read_to_string(path)?;
        let data: T = serde_json::from_str(&content)?;
        Ok(data)
    }

    /// Read JSON data, or `None` if the file does not exist
    pub fn read_json_opt<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        self.read_json(path).map(Some)
    }

    /// Remove a file, returning whether it existed
    pub fn remove_file(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}
