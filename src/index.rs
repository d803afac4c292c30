//! Ordered, de-duplicated index of the image files in the watched directory
//! plus the navigation cursor used for sequential traversal.

use std::path::Path;

use anyhow::{bail, Result};
use walkdir::WalkDir;

use crate::debug::dbg_log;
use crate::paths;

#[derive(Default)]
pub struct DirIndex {
    files: Vec<String>,
    /// Unset until the first advance after a load; past-the-end stays
    /// representable so exhaustion is detectable.
    cursor: Option<usize>,
}

impl DirIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list with the directory's allow-listed entries in
    /// directory-read order and reset the cursor. Returns non-empty.
    pub fn load(&mut self, dir: &Path) -> bool {
        let mut files: Vec<String> = Vec::new();
        for entry in WalkDir::new(dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if !paths::is_allowed(entry.path()) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !files.iter().any(|f| f == name) {
                    files.push(name.to_string());
                }
            }
        }
        dbg_log!("index: {} files in {}", files.len(), dir.display());
        self.files = files;
        self.cursor = None;
        !self.files.is_empty()
    }

    pub fn advance(&mut self) {
        self.cursor = Some(match self.cursor {
            None => 0,
            Some(i) => i + 1,
        });
    }

    /// True once the cursor has moved past the last entry.
    pub fn exhausted(&self) -> bool {
        matches!(self.cursor, Some(i) if i >= self.files.len())
    }

    pub fn current(&self) -> Option<&str> {
        self.cursor
            .and_then(|i| self.files.get(i))
            .map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.iter().any(|f| f == name)
    }

    /// Append a filename from a watcher addition; duplicates are ignored.
    pub fn insert(&mut self, name: &str) {
        if !self.contains(name) {
            self.files.push(name.to_string());
        }
    }

    /// Remove a tracked filename. An unknown name violates the index
    /// invariant (everything removed must have been indexed first) and is
    /// an internal error.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let Some(pos) = self.files.iter().position(|f| f == name) else {
            bail!("untracked file removed from index: {}", name);
        };
        self.files.remove(pos);
        Ok(())
    }
}
