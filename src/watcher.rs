//! Watcher bridge: a background thread turns raw filesystem notifications
//! for the watched root into allow-listed add/remove events.
//!
//! Non-recursive; nothing under the cache directory ever surfaces. An
//! "added" event only fires once the file has finished being written
//! (its size holds steady across two polls). Re-targeting the bridge
//! fully unsubscribes the previous root first.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::debug::dbg_log;
use crate::paths;

/// Events the bridge hands to the cache: allow-listed files in the watched
/// root only, paths case-preserved.
#[derive(Debug)]
pub enum BridgeEvent {
    Added(PathBuf),
    Removed(PathBuf),
}

enum BridgeCmd {
    Watch(PathBuf),
    Unwatch,
}

pub struct WatcherBridge {
    cmd_tx: Option<Sender<BridgeCmd>>,
    thread: Option<JoinHandle<()>>,
}

/// Poll cadence and bound for the write-finish check.
const WRITE_POLL: Duration = Duration::from_millis(100);
const WRITE_POLL_ATTEMPTS: u32 = 50;

impl WatcherBridge {
    /// Start the bridge thread. Returns the handle and the event receiver.
    pub fn start() -> (Self, Receiver<BridgeEvent>) {
        let (tx, rx) = mpsc::channel();
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("watcher-bridge".into())
            .spawn(move || run_bridge(tx, cmd_rx))
            .expect("failed to spawn watcher-bridge thread");
        (
            WatcherBridge {
                cmd_tx: Some(cmd_tx),
                thread: Some(thread),
            },
            rx,
        )
    }

    /// Watch a new root (non-recursive). Any previous watch is fully
    /// unsubscribed first.
    pub fn watch(&self, root: &Path) {
        if let Some(tx) = &self.cmd_tx {
            tx.send(BridgeCmd::Watch(root.to_path_buf())).ok();
        }
    }

    pub fn unwatch(&self) {
        if let Some(tx) = &self.cmd_tx {
            tx.send(BridgeCmd::Unwatch).ok();
        }
    }

    pub fn stop(&mut self) {
        self.cmd_tx.take();
        if let Some(t) = self.thread.take() {
            t.join().ok();
        }
    }
}

impl Drop for WatcherBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_bridge(tx: Sender<BridgeEvent>, cmd_rx: Receiver<BridgeCmd>) {
    let (ntx, nrx) = mpsc::channel();
    let mut watcher: RecommendedWatcher = match notify::recommended_watcher(move |res| {
        if let Ok(event) = res {
            ntx.send(event).ok();
        }
    }) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("watcher: failed to create: {}", e);
            return;
        }
    };

    let mut watched: Option<PathBuf> = None;

    loop {
        // Commands first: re-targeting must drop the old subscription
        // before events for the new root are interpreted.
        loop {
            match cmd_rx.try_recv() {
                Ok(BridgeCmd::Watch(root)) => {
                    if let Some(old) = watched.take() {
                        watcher.unwatch(&old).ok();
                        dbg_log!("watcher: -watch {}", old.display());
                    }
                    match watcher.watch(&root, RecursiveMode::NonRecursive) {
                        Ok(()) => {
                            dbg_log!("watcher: +watch {}", root.display());
                            watched = Some(root);
                        }
                        Err(e) => eprintln!("watcher: failed to watch {}: {}", root.display(), e),
                    }
                }
                Ok(BridgeCmd::Unwatch) => {
                    if let Some(old) = watched.take() {
                        watcher.unwatch(&old).ok();
                        dbg_log!("watcher: -watch {}", old.display());
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        match nrx.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => {
                if watched.is_some() {
                    handle_event(&tx, event);
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn handle_event(tx: &Sender<BridgeEvent>, event: notify::Event) {
    for path in &event.paths {
        if in_cache_dir(path) {
            continue;
        }
        if !paths::is_allowed(path) {
            continue;
        }

        match event.kind {
            EventKind::Create(_) => {
                if path.is_file() && wait_write_finished(path) {
                    dbg_log!("watcher: added {}", path.display());
                    tx.send(BridgeEvent::Added(path.clone())).ok();
                }
            }
            // Renames surface as Modify(Name): into the root = added,
            // out of it = removed.
            EventKind::Modify(ModifyKind::Name(_)) => {
                if path.is_file() {
                    if wait_write_finished(path) {
                        dbg_log!("watcher: added (rename) {}", path.display());
                        tx.send(BridgeEvent::Added(path.clone())).ok();
                    }
                } else {
                    dbg_log!("watcher: removed (rename) {}", path.display());
                    tx.send(BridgeEvent::Removed(path.clone())).ok();
                }
            }
            EventKind::Remove(_) => {
                dbg_log!("watcher: removed {}", path.display());
                tx.send(BridgeEvent::Removed(path.clone())).ok();
            }
            _ => {}
        }
    }
}

fn in_cache_dir(path: &Path) -> bool {
    path.components()
        .any(|c| c.as_os_str() == paths::CACHE_DIR_NAME)
}

/// Poll until the file size stops changing (two consecutive equal reads).
/// Returns false if the file vanished or never settled.
fn wait_write_finished(path: &Path) -> bool {
    let mut last: Option<u64> = None;
    for _ in 0..WRITE_POLL_ATTEMPTS {
        let Ok(meta) = std::fs::metadata(path) else {
            return false;
        };
        let size = meta.len();
        if last == Some(size) {
            return true;
        }
        last = Some(size);
        thread::sleep(WRITE_POLL);
    }
    false
}
