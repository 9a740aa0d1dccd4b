//! Mutable record of one in-progress transfer, read concurrently by the
//! throttle and by monitoring (`STAT` mid-transfer, online listings).

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Local};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Upload,
    Download,
    List,
    None,
}

#[derive(Debug)]
struct Inner {
    kind: TransferKind,
    bytes: u64,
    start: DateTime<Local>,
    end: DateTime<Local>,
}

/// Lock-protected transfer record. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct TransferState {
    inner: Arc<Mutex<Inner>>,
}

impl Default for TransferState {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferState {
    pub fn new() -> Self {
        let now = Local::now();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                kind: TransferKind::None,
                bytes: 0,
                start: now,
                end: now,
            })),
        }
    }

    /// Resets the byte counter and stamps the start time.
    pub fn start(&self, kind: TransferKind) {
        let mut inner = self.inner.lock().unwrap();
        inner.kind = kind;
        inner.bytes = 0;
        inner.start = Local::now();
    }

    /// Stamps the end time. Safe to call with no transfer active.
    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.kind = TransferKind::None;
        inner.end = Local::now();
    }

    /// Adds to the byte counter; called from the read/write hot path.
    pub fn update(&self, bytes: u64) {
        self.inner.lock().unwrap().bytes += bytes;
    }

    pub fn kind(&self) -> TransferKind {
        self.inner.lock().unwrap().kind
    }

    pub fn bytes(&self) -> u64 {
        self.inner.lock().unwrap().bytes
    }

    /// "now − start" while a transfer is active, else "end − start".
    pub fn duration(&self) -> Duration {
        let inner = self.inner.lock().unwrap();
        if inner.kind == TransferKind::None {
            inner.end - inner.start
        } else {
            Local::now() - inner.start
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_resets_counters() {
        let state = TransferState::new();
        state.start(TransferKind::Upload);
        state.update(100);
        assert_eq!(state.bytes(), 100);
        state.start(TransferKind::Download);
        assert_eq!(state.bytes(), 0);
        assert_eq!(state.kind(), TransferKind::Download);
    }

    #[test]
    fn stop_clears_kind() {
        let state = TransferState::new();
        state.start(TransferKind::List);
        state.stop();
        assert_eq!(state.kind(), TransferKind::None);
    }

    #[test]
    fn clones_share_state() {
        let state = TransferState::new();
        let observer = state.clone();
        state.start(TransferKind::Upload);
        state.update(42);
        assert_eq!(observer.bytes(), 42);
        assert_eq!(observer.kind(), TransferKind::Upload);
    }

    #[test]
    fn duration_frozen_after_stop() {
        let state = TransferState::new();
        state.start(TransferKind::Download);
        state.stop();
        let d1 = state.duration();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(state.duration(), d1);
    }
}
