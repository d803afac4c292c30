//! One-shot initial-load signal. The first resolve or reject wins; the
//! outcome is observable exactly once and the channel ends are consumed on
//! use, so the gate tears itself down after first delivery.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Mutex;

use crate::store::ThumbMap;

/// Why the initial load could not produce a thumbnail set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    NoDirectory,
    NoImages,
}

type Outcome = Result<ThumbMap, GateError>;

pub struct LoadGate {
    tx: Mutex<Option<SyncSender<Outcome>>>,
    rx: Mutex<Option<Receiver<Outcome>>>,
}

impl LoadGate {
    pub fn new() -> Self {
        let (tx, rx) = sync_channel(1);
        LoadGate {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Settle with the initial mapping. No-op if already settled.
    pub fn resolve(&self, map: ThumbMap) {
        self.settle(Ok(map));
    }

    /// Settle with a failure. No-op if already settled.
    pub fn reject(&self, why: GateError) {
        self.settle(Err(why));
    }

    fn settle(&self, outcome: Outcome) {
        if let Some(tx) = self.tx.lock().unwrap().take() {
            tx.send(outcome).ok();
        }
    }

    pub fn is_settled(&self) -> bool {
        self.tx.lock().unwrap().is_none()
    }

    /// Take the one-shot outcome, blocking until the gate settles. The
    /// second and later calls observe nothing.
    pub fn wait(&self) -> Option<Outcome> {
        let rx = self.rx.lock().unwrap().take()?;
        rx.recv().ok()
    }
}

impl Default for LoadGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_resolve_wins() {
        let gate = LoadGate::new();
        let mut map = ThumbMap::new();
        map.insert("a.png".into(), "/p/a".into());
        gate.resolve(map);
        gate.reject(GateError::NoImages);

        match gate.wait() {
            Some(Ok(m)) => assert_eq!(m.len(), 1),
            other => panic!("expected resolved mapping, got {:?}", other.is_some()),
        }
    }

    #[test]
    fn first_reject_wins() {
        let gate = LoadGate::new();
        gate.reject(GateError::NoDirectory);
        gate.resolve(ThumbMap::new());

        assert_eq!(gate.wait(), Some(Err(GateError::NoDirectory)));
    }

    #[test]
    fn second_wait_observes_nothing() {
        let gate = LoadGate::new();
        gate.resolve(ThumbMap::new());
        assert!(gate.wait().is_some());
        assert!(gate.wait().is_none());
    }

    #[test]
    fn settled_flag_flips_on_first_settle() {
        let gate = LoadGate::new();
        assert!(!gate.is_settled());
        gate.reject(GateError::NoImages);
        assert!(gate.is_settled());
    }

    #[test]
    fn wait_blocks_until_settled() {
        use std::sync::Arc;
        use std::time::Duration;

        let gate = Arc::new(LoadGate::new());
        let waiter = {
            let gate = gate.clone();
            std::thread::spawn(move || gate.wait())
        };
        std::thread::sleep(Duration::from_millis(50));
        gate.resolve(ThumbMap::new());
        assert!(matches!(waiter.join().unwrap(), Some(Ok(_))));
    }
}
