//! Cache service: wires the store, write-back queue, directory index,
//! watcher bridge and initial-load gate behind the request/response surface
//! the viewer consumes.
//!
//! Flow:
//!   set_root(dir) → resolve cache dir → hydrate store → index directory →
//!   prime missing previews on a bounded pool → enqueue one ReplaceAll →
//!   settle the gate → subscribe the watcher
//!   watcher add/remove → fold into index + store through the same queue →
//!   outbound CacheEvent notifications

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::annotations::{self, Annotation};
use crate::debug::dbg_log;
use crate::gate::{GateError, LoadGate};
use crate::index::DirIndex;
use crate::paths;
use crate::queue::{FlushTicket, QueueHandle, WriteQueue, DEFAULT_DEBOUNCE};
use crate::store::{Mutation, ThumbMap, ThumbStore};
use crate::thumbs;
use crate::watcher::{BridgeEvent, WatcherBridge};

/// Caller-visible failures of the cache surface.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no directory configured")]
    NoDirectory,
    #[error("directory contains no images")]
    NoImages,
    #[error("no more files")]
    NoMoreFiles,
    #[error("cache directory unavailable: {0}")]
    CacheDir(String),
    #[error("annotation lookup failed: {0}")]
    Annotations(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Outbound notifications to the viewer layer. Payloads are owned copies,
/// never live references into cache state.
#[derive(Debug)]
pub enum CacheEvent {
    ThumbnailAdded { filename: String, preview: Vec<u8> },
    ThumbnailRemoved { filename: String },
    GenerationStatus(bool),
    FileListChanged { current: Option<String>, total: usize },
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub preview_width: u32,
    pub debounce: Duration,
    /// Annotation document consulted by next/current file reads.
    pub annotation_doc: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            preview_width: thumbs::PREVIEW_WIDTH,
            debounce: DEFAULT_DEBOUNCE,
            annotation_doc: None,
        }
    }
}

/// One navigable file: raw source bytes plus its annotation context.
#[derive(Debug)]
pub struct FilePayload {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Serialize)]
pub struct StatusInfo {
    pub root: Option<String>,
    pub files: usize,
    pub cached: usize,
    pub flushes: u64,
}

struct State {
    root: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    index: DirIndex,
}

pub struct CacheService {
    config: CacheConfig,
    store: Arc<Mutex<ThumbStore>>,
    state: Arc<Mutex<State>>,
    queue: WriteQueue,
    gate: LoadGate,
    bridge: WatcherBridge,
    events: Sender<CacheEvent>,
    fold_thread: Option<JoinHandle<()>>,
}

impl CacheService {
    /// Start the service. Returns the handle and the outbound notification
    /// receiver.
    pub fn start(config: CacheConfig) -> (Self, Receiver<CacheEvent>) {
        let (events, events_rx) = mpsc::channel();
        let store = Arc::new(Mutex::new(ThumbStore::new(PathBuf::new())));
        let state = Arc::new(Mutex::new(State {
            root: None,
            cache_dir: None,
            index: DirIndex::new(),
        }));
        let queue = WriteQueue::start(store.clone(), config.debounce);
        let (bridge, bridge_rx) = WatcherBridge::start();

        let fold_thread = {
            let store = store.clone();
            let state = state.clone();
            let events = events.clone();
            let queue = queue.handle();
            let width = config.preview_width;
            thread::Builder::new()
                .name("cache-fold".into())
                .spawn(move || {
                    for event in bridge_rx {
                        fold_event(&store, &state, &queue, &events, width, event);
                    }
                })
                .expect("failed to spawn cache-fold thread")
        };

        (
            CacheService {
                config,
                store,
                state,
                queue,
                gate: LoadGate::new(),
                bridge,
                events,
                fold_thread: Some(fold_thread),
            },
            events_rx,
        )
    }

    /// Point the cache at a directory: reset, hydrate, prime every missing
    /// preview, settle the initial-load gate and start watching. The first
    /// call settles the gate for the whole session.
    pub fn set_root(&self, root: &Path) -> Result<(), CacheError> {
        dbg_log!("cache: set root {}", root.display());
        self.bridge.unwatch();

        if !root.is_dir() {
            self.gate.reject(GateError::NoDirectory);
            return Err(CacheError::NoDirectory);
        }
        // Canonical form so watcher events (which arrive canonicalized on
        // some platforms) compare equal to the stored root.
        let root = &root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let cache_dir =
            paths::cache_dir_for(root).map_err(|e| CacheError::CacheDir(format!("{:#}", e)))?;

        let non_empty = {
            let mut st = self.state.lock().unwrap();
            st.root = Some(root.clone());
            st.cache_dir = Some(cache_dir.clone());
            let non_empty = st.index.load(root);
            self.events
                .send(CacheEvent::FileListChanged {
                    current: st.index.current().map(String::from),
                    total: st.index.len(),
                })
                .ok();
            non_empty
        };
        self.store.lock().unwrap().reset(cache_dir.clone());

        if !non_empty {
            self.gate.reject(GateError::NoImages);
            self.bridge.watch(root);
            return Err(CacheError::NoImages);
        }

        let files: Vec<String> = self.state.lock().unwrap().index.files().to_vec();
        let cached = self.store.lock().unwrap().snapshot();
        let missing: Vec<String> = files
            .iter()
            .filter(|f| !cached.contains_key(*f))
            .cloned()
            .collect();
        dbg_log!(
            "cache: {} files, {} cached, {} to generate",
            files.len(),
            files.len() - missing.len(),
            missing.len()
        );

        let generated = if missing.is_empty() {
            ThumbMap::new()
        } else {
            self.events.send(CacheEvent::GenerationStatus(true)).ok();
            let out = prime(root, &cache_dir, &missing, self.config.preview_width);
            self.events.send(CacheEvent::GenerationStatus(false)).ok();
            out
        };

        // A concurrent set_root supersedes this one: its results own the
        // gate and the watch, ours are discarded.
        {
            let st = self.state.lock().unwrap();
            if st.root.as_ref() != Some(root) {
                dbg_log!(
                    "cache: root changed during priming, discarding {} previews",
                    generated.len()
                );
                return Ok(());
            }
        }

        // The full mapping: surviving cached entries plus fresh previews.
        // Persisting it as ReplaceAll also prunes entries whose sources
        // disappeared while the cache was offline.
        let mut full = ThumbMap::new();
        for name in &files {
            if let Some(preview) = cached.get(name) {
                full.insert(name.clone(), preview.clone());
            }
        }
        full.extend(generated);
        self.queue.enqueue(Mutation::ReplaceAll(full.clone()));

        self.gate.resolve(full);
        self.bridge.watch(root);
        Ok(())
    }

    /// One-shot initial mapping: blocks until the first `set_root` settles
    /// the gate; later calls observe nothing.
    pub fn initial_thumbnails(&self) -> Option<Result<ThumbMap, CacheError>> {
        self.gate.wait().map(|outcome| {
            outcome.map_err(|g| match g {
                GateError::NoDirectory => CacheError::NoDirectory,
                GateError::NoImages => CacheError::NoImages,
            })
        })
    }

    /// Preview bytes for one cached filename.
    pub fn thumbnail(&self, filename: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let preview = self.store.lock().unwrap().get(filename);
        match preview {
            Some(path) => Ok(Some(std::fs::read(path)?)),
            None => Ok(None),
        }
    }

    /// Advance the cursor and return the newly-current file.
    pub fn next_file(&self) -> Result<FilePayload, CacheError> {
        let (root, name) = {
            let mut st = self.state.lock().unwrap();
            let root = st.root.clone().ok_or(CacheError::NoDirectory)?;
            if st.index.is_empty() {
                return Err(CacheError::NoImages);
            }
            st.index.advance();
            match st.index.current() {
                Some(name) => (root, name.to_string()),
                None => return Err(CacheError::NoMoreFiles),
            }
        };
        self.read_payload(&root, &name)
    }

    /// Return the current file without advancing.
    pub fn current_file(&self) -> Result<FilePayload, CacheError> {
        let (root, name) = {
            let st = self.state.lock().unwrap();
            let root = st.root.clone().ok_or(CacheError::NoDirectory)?;
            if st.index.is_empty() {
                return Err(CacheError::NoImages);
            }
            match st.index.current() {
                Some(name) => (root, name.to_string()),
                // Nothing selected yet, or the cursor ran off the end.
                None => return Err(CacheError::NoMoreFiles),
            }
        };
        self.read_payload(&root, &name)
    }

    /// Ticket that resolves once everything enqueued so far is flushed.
    pub fn flush_barrier(&self) -> FlushTicket {
        self.queue.enqueue(Mutation::Add(ThumbMap::new()))
    }

    pub fn status(&self) -> StatusInfo {
        let st = self.state.lock().unwrap();
        let mut store = self.store.lock().unwrap();
        StatusInfo {
            root: st
                .root
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            files: st.index.len(),
            cached: store.len(),
            flushes: store.flush_count(),
        }
    }

    fn read_payload(&self, root: &Path, name: &str) -> Result<FilePayload, CacheError> {
        let bytes = std::fs::read(root.join(name))?;
        let annotations = match &self.config.annotation_doc {
            Some(doc) => annotations::for_file(doc, name)
                .map_err(|e| CacheError::Annotations(format!("{:#}", e)))?,
            None => Vec::new(),
        };
        Ok(FilePayload {
            filename: name.to_string(),
            bytes,
            annotations,
        })
    }
}

impl Drop for CacheService {
    fn drop(&mut self) {
        // Bridge first: its exit ends the fold thread, which releases the
        // fold thread's queue handle so the queue can drain and stop.
        self.bridge.stop();
        if let Some(t) = self.fold_thread.take() {
            t.join().ok();
        }
        self.queue.stop();
    }
}

/// Generate previews for `names` on a bounded pool: workers stride the
/// list, each file failing on its own without touching the rest.
fn prime(root: &Path, cache_dir: &Path, names: &[String], width: u32) -> ThumbMap {
    let workers = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .clamp(1, 8)
        .min(names.len().max(1));

    let results: Arc<Mutex<ThumbMap>> = Arc::new(Mutex::new(ThumbMap::new()));
    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let chunk: Vec<String> = names
            .iter()
            .skip(worker_id)
            .step_by(workers)
            .cloned()
            .collect();
        let root = root.to_path_buf();
        let cache_dir = cache_dir.to_path_buf();
        let results = results.clone();
        handles.push(thread::spawn(move || {
            for name in chunk {
                match thumbs::generate(&root.join(&name), &cache_dir, width) {
                    Ok(preview) => {
                        results
                            .lock()
                            .unwrap()
                            .insert(name, preview.to_string_lossy().into_owned());
                    }
                    Err(e) => dbg_log!("cache: skipping {}: {:#}", name, e),
                }
            }
        }));
    }
    for handle in handles {
        handle.join().ok();
    }

    Arc::try_unwrap(results)
        .map(|m| m.into_inner().unwrap_or_default())
        .unwrap_or_default()
}

/// Fold one watcher event into the index and store, through the same
/// write-back queue every other mutation uses.
fn fold_event(
    store: &Arc<Mutex<ThumbStore>>,
    state: &Arc<Mutex<State>>,
    queue: &QueueHandle,
    events: &Sender<CacheEvent>,
    width: u32,
    event: BridgeEvent,
) {
    match event {
        BridgeEvent::Added(path) => {
            let Some(name) = file_name_in_live_root(state, &path) else {
                return;
            };
            let Some(cache_dir) = state.lock().unwrap().cache_dir.clone() else {
                return;
            };

            // Indexed first: the file is a valid source even if its
            // preview fails to generate.
            {
                let mut st = state.lock().unwrap();
                st.index.insert(&name);
                events
                    .send(CacheEvent::FileListChanged {
                        current: st.index.current().map(String::from),
                        total: st.index.len(),
                    })
                    .ok();
            }

            events.send(CacheEvent::GenerationStatus(true)).ok();
            let generated = thumbs::generate(&path, &cache_dir, width);
            events.send(CacheEvent::GenerationStatus(false)).ok();
            let preview = match generated {
                Ok(p) => p,
                Err(e) => {
                    dbg_log!("cache: generate {} failed: {:#}", name, e);
                    return;
                }
            };

            let mut entries = ThumbMap::new();
            entries.insert(name.clone(), preview.to_string_lossy().into_owned());
            queue.enqueue(Mutation::Add(entries));

            let payload = std::fs::read(&preview).unwrap_or_default();
            events
                .send(CacheEvent::ThumbnailAdded {
                    filename: name,
                    preview: payload,
                })
                .ok();
        }
        BridgeEvent::Removed(path) => {
            let Some(name) = file_name_in_live_root(state, &path) else {
                return;
            };

            {
                let mut st = state.lock().unwrap();
                if !st.index.contains(&name) {
                    // The bridge can report files that never made it into
                    // the index (e.g. gone before the write settled).
                    dbg_log!("cache: ignoring removal of untracked {}", name);
                    return;
                }
                if let Err(e) = st.index.remove(&name) {
                    dbg_log!("cache: {}", e);
                    return;
                }
                events
                    .send(CacheEvent::FileListChanged {
                        current: st.index.current().map(String::from),
                        total: st.index.len(),
                    })
                    .ok();
            }

            if let Some(preview) = store.lock().unwrap().get(&name) {
                std::fs::remove_file(&preview).ok();
            }
            queue.enqueue(Mutation::Remove(name.clone()));
            events
                .send(CacheEvent::ThumbnailRemoved { filename: name })
                .ok();
        }
    }
}

/// The event's filename, provided the event belongs to the live root.
/// Events generated for a superseded root are dropped here.
fn file_name_in_live_root(state: &Arc<Mutex<State>>, path: &Path) -> Option<String> {
    let st = state.lock().unwrap();
    let root = st.root.as_deref()?;
    if path.parent() != Some(root) {
        dbg_log!("cache: dropping event outside live root: {}", path.display());
        return None;
    }
    path.file_name()?.to_str().map(String::from)
}
