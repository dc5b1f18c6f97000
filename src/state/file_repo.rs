//! JSON-file cursor repository with atomic replace.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::core::errors::{Result, ShrError};
use crate::state::store::CursorRepository;

/// Stores the cursor entries as one JSON object of strings.
#[derive(Debug, Clone)]
pub struct FileCursorRepository {
    path: PathBuf,
}

impl FileCursorRepository {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CursorRepository for FileCursorRepository {
    fn load(&self) -> Result<BTreeMap<String, String>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(error) => return Err(ShrError::io(&self.path, error)),
        };
        serde_json::from_str(&raw).map_err(|error| ShrError::Serialization {
            context: "state file",
            details: format!("{}: {error}", self.path.display()),
        })
    }

    /// Write to a sibling temp file, then rename over the target.
    fn save(&mut self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| ShrError::io(parent, source))?;
        }
        let tmp_path = self.path.with_extension("tmp");
        let data = serde_json::to_vec_pretty(entries)?;
        fs::write(&tmp_path, data).map_err(|source| ShrError::io(&tmp_path, source))?;
        fs::rename(&tmp_path, &self.path).map_err(|source| ShrError::io(&self.path, source))?;
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(ShrError::io(&self.path, error)),
        }
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}
