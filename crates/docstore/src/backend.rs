//! Persistence backends for collections.

use std::fs;
use std::path::PathBuf;

use crate::{Result, StoredRecord};

/// Where a collection's records live between runs.
pub trait Backend: Send + Sync {
    fn load(&self, name: &str) -> Result<Vec<StoredRecord>>;
    fn persist(&self, name: &str, records: &[StoredRecord]) -> Result<()>;
}

/// Keeps nothing between runs. For tests and demos.
pub struct InMemoryBackend;

impl InMemoryBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for InMemoryBackend {
    fn load(&self, _name: &str) -> Result<Vec<StoredRecord>> {
        Ok(Vec::new())
    }

    fn persist(&self, _name: &str, _records: &[StoredRecord]) -> Result<()> {
        Ok(())
    }
}

/// One JSON file per collection under `dir`. Writes go through a temp file
/// followed by a rename, so readers never observe a half-written file.
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

impl Backend for FileBackend {
    fn load(&self, name: &str) -> Result<Vec<StoredRecord>> {
        let path = self.path(name);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn persist(&self, name: &str, records: &[StoredRecord]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!(".{name}.json.tmp"));
        fs::write(&tmp, serde_json::to_vec(records)?)?;
        fs::rename(&tmp, self.path(name))?;
        Ok(())
    }
}
