//! Write-back queue: a single consumer thread applies store mutations in
//! enqueue order and flushes the document once per idle transition.
//!
//! Flow:
//!   enqueue(m) → channel → worker applies m under the store lock →
//!   worker drains further arrivals, each one restarting the quiet window →
//!   window elapses with the queue empty → exactly one flush →
//!   every ticket accumulated since the last flush settles with its outcome
//!
//! Mutations and flushes are strictly sequenced through the one worker, so
//! a flush always reflects the cumulative effect of everything enqueued
//! before it and bursts collapse into a single disk write.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::debug::dbg_log;
use crate::store::{Mutation, ThumbStore};

/// Quiet window after the last mutation before the store is flushed.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Completion handle for one enqueued mutation: resolves when the flush
/// covering the mutation has settled.
pub struct FlushTicket {
    rx: Receiver<Result<(), String>>,
}

impl FlushTicket {
    /// Block until the covering flush completes. `Err` carries the write
    /// failure; the in-memory store is updated either way and a later
    /// flush rewrites the full document.
    pub fn wait(self) -> Result<(), String> {
        self.rx
            .recv()
            .unwrap_or_else(|_| Err("write-back worker gone".into()))
    }
}

struct Unit {
    mutation: Mutation,
    done: Sender<Result<(), String>>,
}

/// Cloneable producer side of the queue.
#[derive(Clone)]
pub struct QueueHandle {
    tx: Sender<Unit>,
}

impl QueueHandle {
    pub fn enqueue(&self, mutation: Mutation) -> FlushTicket {
        let (done, rx) = mpsc::channel();
        if self.tx.send(Unit { mutation, done: done.clone() }).is_err() {
            done.send(Err("write-back worker gone".into())).ok();
        }
        FlushTicket { rx }
    }
}

pub struct WriteQueue {
    handle: Option<QueueHandle>,
    thread: Option<JoinHandle<()>>,
}

impl WriteQueue {
    /// Spawn the consumer thread over a shared store.
    pub fn start(store: Arc<Mutex<ThumbStore>>, debounce: Duration) -> Self {
        let (tx, rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("write-back".into())
            .spawn(move || run_worker(store, rx, debounce))
            .expect("failed to spawn write-back thread");
        WriteQueue {
            handle: Some(QueueHandle { tx }),
            thread: Some(thread),
        }
    }

    pub fn handle(&self) -> QueueHandle {
        self.handle.clone().expect("write-back queue stopped")
    }

    pub fn enqueue(&self, mutation: Mutation) -> FlushTicket {
        self.handle
            .as_ref()
            .expect("write-back queue stopped")
            .enqueue(mutation)
    }

    /// Disconnect and join. The worker flushes anything still pending
    /// before it exits. Blocks until every cloned handle is dropped.
    pub fn stop(&mut self) {
        self.handle.take();
        if let Some(t) = self.thread.take() {
            t.join().ok();
        }
    }
}

impl Drop for WriteQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(store: Arc<Mutex<ThumbStore>>, rx: Receiver<Unit>, debounce: Duration) {
    loop {
        // Block for the first unit of a burst.
        let unit = match rx.recv() {
            Ok(u) => u,
            Err(_) => return, // all producers gone, nothing pending
        };
        let mut pending = Vec::new();
        apply(&store, unit, &mut pending);

        // Drain the burst. Every arrival restarts the quiet window; the
        // window elapsing with an empty queue triggers exactly one flush.
        loop {
            match rx.recv_timeout(debounce) {
                Ok(unit) => apply(&store, unit, &mut pending),
                Err(RecvTimeoutError::Timeout) => {
                    settle(&store, &mut pending);
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    settle(&store, &mut pending);
                    return;
                }
            }
        }
    }
}

fn apply(
    store: &Arc<Mutex<ThumbStore>>,
    unit: Unit,
    pending: &mut Vec<Sender<Result<(), String>>>,
) {
    store.lock().unwrap().apply(unit.mutation);
    pending.push(unit.done);
}

fn settle(store: &Arc<Mutex<ThumbStore>>, pending: &mut Vec<Sender<Result<(), String>>>) {
    let result = store.lock().unwrap().flush().map_err(|e| format!("{:#}", e));
    if let Err(e) = &result {
        dbg_log!("write-back: flush failed: {}", e);
    }
    for done in pending.drain(..) {
        done.send(result.clone()).ok();
    }
}
