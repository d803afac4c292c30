//! In-memory filename → preview-path mapping backed by a single JSON
//! document. Hydrated lazily (at most once per cache-dir lifetime) and
//! flushed as a wholesale overwrite, never a partial write.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::debug::dbg_log;
use crate::paths;

/// Filename → absolute preview-file path.
pub type ThumbMap = HashMap<String, String>;

/// The fixed vocabulary of store mutations, consumed in FIFO order by the
/// write-back queue.
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Merge entries into the mapping, overwriting on conflict.
    Add(ThumbMap),
    /// Delete one entry if present; no-op otherwise.
    Remove(String),
    /// Discard the mapping and substitute this one.
    ReplaceAll(ThumbMap),
}

pub struct ThumbStore {
    cache_dir: PathBuf,
    map: Option<ThumbMap>,
    flushes: u64,
}

impl ThumbStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        ThumbStore {
            cache_dir,
            map: None,
            flushes: 0,
        }
    }

    pub fn document_path(&self) -> PathBuf {
        paths::store_path(&self.cache_dir)
    }

    /// Hydrate from the on-disk document at most once; afterwards this is a
    /// pure in-memory read. A missing or unparsable document is not an
    /// error — the store hydrates empty.
    pub fn load(&mut self) -> &ThumbMap {
        if self.map.is_none() {
            let doc = self.document_path();
            let map = fs::read_to_string(&doc)
                .ok()
                .and_then(|raw| serde_json::from_str::<ThumbMap>(&raw).ok())
                .unwrap_or_default();
            dbg_log!("store: hydrated {} entries from {}", map.len(), doc.display());
            self.map = Some(map);
        }
        self.map.as_ref().expect("hydrated above")
    }

    /// Apply a mutation to the hydrated mapping. Hydrates first so a
    /// mutation can never be lost against a stale view of the document.
    pub fn apply(&mut self, mutation: Mutation) {
        self.load();
        let map = self.map.as_mut().expect("hydrated above");
        match mutation {
            Mutation::Add(entries) => map.extend(entries),
            Mutation::Remove(name) => {
                map.remove(&name);
            }
            Mutation::ReplaceAll(entries) => *map = entries,
        }
    }

    pub fn get(&mut self, name: &str) -> Option<String> {
        self.load().get(name).cloned()
    }

    pub fn snapshot(&mut self) -> ThumbMap {
        self.load().clone()
    }

    pub fn len(&mut self) -> usize {
        self.load().len()
    }

    /// Back to unhydrated against a new cache directory. Used when the
    /// watched root changes.
    pub fn reset(&mut self, cache_dir: PathBuf) {
        dbg_log!("store: reset to {}", cache_dir.display());
        self.cache_dir = cache_dir;
        self.map = None;
    }

    /// Serialize the current mapping over the on-disk document. A failed
    /// write leaves the in-memory mapping authoritative; the next flush
    /// rewrites the whole document and converges.
    pub fn flush(&mut self) -> Result<()> {
        self.load();
        let doc = self.document_path();
        let json = serde_json::to_string_pretty(self.map.as_ref().expect("hydrated above"))
            .context("serialize thumbnail document")?;
        fs::write(&doc, json).with_context(|| format!("write {}", doc.display()))?;
        self.flushes += 1;
        dbg_log!(
            "store: flushed {} entries to {}",
            self.map.as_ref().map(|m| m.len()).unwrap_or(0),
            doc.display()
        );
        Ok(())
    }

    /// Number of successful flushes since construction.
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &std::path::Path) -> ThumbStore {
        ThumbStore::new(dir.to_path_buf())
    }

    fn map_of(pairs: &[(&str, &str)]) -> ThumbMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn missing_document_hydrates_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        assert!(store.load().is_empty());
    }

    #[test]
    fn corrupt_document_hydrates_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(paths::STORE_FILE_NAME), b"{not json").unwrap();
        let mut store = store_in(dir.path());
        assert!(store.load().is_empty());
    }

    #[test]
    fn hydration_happens_at_most_once() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join(paths::STORE_FILE_NAME);
        std::fs::write(&doc, r#"{"a.png": "/previews/a.png"}"#).unwrap();

        let mut store = store_in(dir.path());
        assert_eq!(store.load().len(), 1);

        // Rewriting the document after hydration must not change the view.
        std::fs::write(&doc, r#"{"a.png": "/x", "b.png": "/y"}"#).unwrap();
        assert_eq!(store.load().len(), 1);
        assert_eq!(store.get("a.png").as_deref(), Some("/previews/a.png"));
    }

    #[test]
    fn apply_add_merges_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        store.apply(Mutation::Add(map_of(&[("a.png", "/p/a"), ("b.png", "/p/b")])));
        store.apply(Mutation::Add(map_of(&[("b.png", "/p/b2")])));
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("b.png").as_deref(), Some("/p/b2"));
    }

    #[test]
    fn apply_remove_is_noop_for_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        store.apply(Mutation::Add(map_of(&[("a.png", "/p/a")])));
        store.apply(Mutation::Remove("ghost.png".into()));
        assert_eq!(store.len(), 1);
        store.apply(Mutation::Remove("a.png".into()));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn apply_replace_all_substitutes() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        store.apply(Mutation::Add(map_of(&[("a.png", "/p/a"), ("b.png", "/p/b")])));
        store.apply(Mutation::ReplaceAll(map_of(&[("c.png", "/p/c")])));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("c.png").as_deref(), Some("/p/c"));
    }

    #[test]
    fn flush_round_trips_through_document() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        store.apply(Mutation::Add(map_of(&[("a.png", "/p/a")])));
        store.flush().unwrap();
        assert_eq!(store.flush_count(), 1);

        let mut rehydrated = store_in(dir.path());
        assert_eq!(rehydrated.get("a.png").as_deref(), Some("/p/a"));
    }

    #[test]
    fn flush_overwrites_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        store.apply(Mutation::Add(map_of(&[("a.png", "/p/a"), ("b.png", "/p/b")])));
        store.flush().unwrap();
        store.apply(Mutation::Remove("a.png".into()));
        store.flush().unwrap();

        let mut rehydrated = store_in(dir.path());
        assert_eq!(rehydrated.len(), 1);
        assert!(rehydrated.get("a.png").is_none());
    }

    #[test]
    fn flush_failure_keeps_memory_authoritative() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not-created");
        let mut store = store_in(&missing);
        store.apply(Mutation::Add(map_of(&[("a.png", "/p/a")])));
        assert!(store.flush().is_err());
        assert_eq!(store.flush_count(), 0);
        // Store still serves the entry; a later flush can retry.
        assert_eq!(store.get("a.png").as_deref(), Some("/p/a"));
        std::fs::create_dir_all(&missing).unwrap();
        assert!(store.flush().is_ok());
        assert_eq!(store.flush_count(), 1);
    }

    #[test]
    fn reset_forces_rehydration() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        std::fs::write(
            dir_b.path().join(paths::STORE_FILE_NAME),
            r#"{"b.png": "/p/b"}"#,
        )
        .unwrap();

        let mut store = store_in(dir_a.path());
        store.apply(Mutation::Add(map_of(&[("a.png", "/p/a")])));
        store.reset(dir_b.path().to_path_buf());
        assert!(store.get("a.png").is_none());
        assert_eq!(store.get("b.png").as_deref(), Some("/p/b"));
    }
}
