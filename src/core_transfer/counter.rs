//! Global login and transfer admission counters. Every acquire is paired
//! with exactly one release through a scope guard, so early aborts and
//! error returns cannot skew the counts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub type UserId = u32;

/// Why an admission was refused; success hands back a guard instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterResult {
    PersonalFail,
    GlobalFail,
}

#[derive(Debug, Default)]
struct Counts {
    logged_in: HashMap<UserId, u32>,
    uploads: HashMap<UserId, u32>,
    downloads: HashMap<UserId, u32>,
}

impl Counts {
    fn total_logins(&self) -> u32 {
        self.logged_in.values().sum()
    }
}

/// Shared admission counters for logins and concurrent transfers.
#[derive(Debug, Default)]
pub struct Counter {
    counts: Mutex<Counts>,
}

impl Counter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Enrolls a login. A kicked login replaces an existing one, so the
    /// per-user limit is waived for it.
    pub fn log_in(
        self: &Arc<Self>,
        uid: UserId,
        user_limit: u32,
        global_limit: u32,
        kicked: bool,
    ) -> Result<LoginGuard, CounterResult> {
        let mut counts = self.counts.lock().unwrap();
        if global_limit > 0 && counts.total_logins() >= global_limit {
            return Err(CounterResult::GlobalFail);
        }
        let count = counts.logged_in.entry(uid).or_insert(0);
        if !kicked && user_limit > 0 && *count >= user_limit {
            return Err(CounterResult::PersonalFail);
        }
        *count += 1;
        Ok(LoginGuard {
            counter: Arc::clone(self),
            uid,
        })
    }

    pub fn start_upload(
        self: &Arc<Self>,
        uid: UserId,
        limit: u32,
    ) -> Result<TransferGuard, CounterResult> {
        self.start_transfer(uid, limit, true)
    }

    pub fn start_download(
        self: &Arc<Self>,
        uid: UserId,
        limit: u32,
    ) -> Result<TransferGuard, CounterResult> {
        self.start_transfer(uid, limit, false)
    }

    fn start_transfer(
        self: &Arc<Self>,
        uid: UserId,
        limit: u32,
        upload: bool,
    ) -> Result<TransferGuard, CounterResult> {
        let mut counts = self.counts.lock().unwrap();
        let map = if upload {
            &mut counts.uploads
        } else {
            &mut counts.downloads
        };
        let count = map.entry(uid).or_insert(0);
        if limit > 0 && *count >= limit {
            return Err(CounterResult::PersonalFail);
        }
        *count += 1;
        Ok(TransferGuard {
            counter: Arc::clone(self),
            uid,
            upload,
        })
    }

    pub fn logins(&self, uid: UserId) -> u32 {
        self.counts
            .lock()
            .unwrap()
            .logged_in
            .get(&uid)
            .copied()
            .unwrap_or(0)
    }

    pub fn uploads(&self, uid: UserId) -> u32 {
        self.counts
            .lock()
            .unwrap()
            .uploads
            .get(&uid)
            .copied()
            .unwrap_or(0)
    }

    pub fn downloads(&self, uid: UserId) -> u32 {
        self.counts
            .lock()
            .unwrap()
            .downloads
            .get(&uid)
            .copied()
            .unwrap_or(0)
    }

    fn release_login(&self, uid: UserId) {
        let mut counts = self.counts.lock().unwrap();
        if let Some(count) = counts.logged_in.get_mut(&uid) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.logged_in.remove(&uid);
            }
        }
    }

    fn release_transfer(&self, uid: UserId, upload: bool) {
        let mut counts = self.counts.lock().unwrap();
        let map = if upload {
            &mut counts.uploads
        } else {
            &mut counts.downloads
        };
        if let Some(count) = map.get_mut(&uid) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                map.remove(&uid);
            }
        }
    }
}

/// Holds one login slot; dropping it releases the slot exactly once.
#[derive(Debug)]
pub struct LoginGuard {
    counter: Arc<Counter>,
    uid: UserId,
}

impl Drop for LoginGuard {
    fn drop(&mut self) {
        self.counter.release_login(self.uid);
    }
}

/// Holds one concurrent-transfer slot for its user.
#[derive(Debug)]
pub struct TransferGuard {
    counter: Arc<Counter>,
    uid: UserId,
    upload: bool,
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        self.counter.release_transfer(self.uid, self.upload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_respects_personal_limit() {
        let counter = Counter::new();
        let _g1 = counter.log_in(1, 2, 0, false).unwrap();
        let _g2 = counter.log_in(1, 2, 0, false).unwrap();
        assert_eq!(
            counter.log_in(1, 2, 0, false).unwrap_err(),
            CounterResult::PersonalFail
        );
    }

    #[test]
    fn kicked_login_bypasses_personal_limit() {
        let counter = Counter::new();
        let _g1 = counter.log_in(1, 1, 0, false).unwrap();
        assert!(counter.log_in(1, 1, 0, true).is_ok());
    }

    #[test]
    fn login_respects_global_limit() {
        let counter = Counter::new();
        let _g1 = counter.log_in(1, 0, 2, false).unwrap();
        let _g2 = counter.log_in(2, 0, 2, false).unwrap();
        assert_eq!(
            counter.log_in(3, 0, 2, false).unwrap_err(),
            CounterResult::GlobalFail
        );
    }

    #[test]
    fn guard_drop_releases_slot() {
        let counter = Counter::new();
        {
            let _g = counter.log_in(1, 1, 0, false).unwrap();
            assert_eq!(counter.logins(1), 1);
        }
        assert_eq!(counter.logins(1), 0);
        assert!(counter.log_in(1, 1, 0, false).is_ok());
    }

    #[test]
    fn aborted_concurrent_uploads_leave_counter_empty() {
        let counter = Counter::new();
        let mut handles = Vec::new();
        for i in 0..100u32 {
            let counter = Arc::clone(&counter);
            handles.push(std::thread::spawn(move || {
                let guard = counter.start_upload(i % 4, 0).unwrap();
                // simulate an early abort
                drop(guard);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        for uid in 0..4 {
            assert_eq!(counter.uploads(uid), 0);
        }
    }

    #[test]
    fn upload_and_download_counted_separately() {
        let counter = Counter::new();
        let _u = counter.start_upload(1, 1).unwrap();
        assert!(counter.start_download(1, 1).is_ok());
        assert!(counter.start_upload(1, 1).is_err());
    }
}
