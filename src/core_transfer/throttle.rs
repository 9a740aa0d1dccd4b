//! Bandwidth enforcement: per-transfer minimum/maximum speeds plus global
//! limits shared across all sessions. A session folds its own transfer
//! progress into the shared per-path aggregates on every `apply()` and
//! withdraws its participation unconditionally on drop, even when the
//! transfer aborts early.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Local};
use log::debug;
use serde::Deserialize;

use crate::core_network::error::{FtpError, Result};
use crate::core_transfer::state::TransferState;

/// Grace period for which a transfer may stay below the minimum speed
/// before it is kicked.
const MIN_SPEED_KICK_SECS: i64 = 5;

/// One configured global speed limit, in KiB/s per direction. `path` keys
/// the shared aggregate; a limit of 0 means unlimited.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SpeedLimit {
    pub path: String,
    #[serde(default)]
    pub dl_limit: u64,
    #[serde(default)]
    pub ul_limit: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

impl SpeedLimit {
    fn limit_for(&self, direction: Direction) -> u64 {
        match direction {
            Direction::Upload => self.ul_limit,
            Direction::Download => self.dl_limit,
        }
    }
}

/// Cumulative transfer time and bytes, the unit the counters aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedInfo {
    pub xfertime: Duration,
    pub bytes: u64,
}

impl SpeedInfo {
    pub fn new(xfertime: Duration, bytes: u64) -> Self {
        Self { xfertime, bytes }
    }

    /// Instantaneous speed in bytes per second.
    pub fn speed(&self) -> f64 {
        let micros = self.xfertime.num_microseconds().unwrap_or(0);
        if micros <= 0 {
            self.bytes as f64
        } else {
            self.bytes as f64 / (micros as f64 / 1_000_000.0)
        }
    }

    fn add(&mut self, other: &SpeedInfo) {
        self.xfertime = self.xfertime + other.xfertime;
        self.bytes += other.bytes;
    }

    fn sub(&mut self, other: &SpeedInfo) {
        self.xfertime = self.xfertime - other.xfertime;
        self.bytes = self.bytes.saturating_sub(other.bytes);
    }
}

/// How long to sleep so that `bytes` over `xfertime + sleep` averages at
/// most `limit` bytes per second.
fn speed_limit_sleep(xfertime: Duration, bytes: u64, limit: u64) -> Duration {
    if limit == 0 {
        return Duration::zero();
    }
    let required = bytes as f64 / limit as f64;
    let elapsed = xfertime.num_microseconds().unwrap_or(0) as f64 / 1_000_000.0;
    let sleep = required - elapsed;
    if sleep <= 0.0 {
        Duration::zero()
    } else {
        Duration::microseconds((sleep * 1_000_000.0) as i64)
    }
}

/// Global per-path speed aggregates, one instance per direction held by the
/// server context. Maps limit path to (participants, aggregate info).
#[derive(Debug)]
pub struct SpeedCounter {
    direction: Direction,
    speeds: Mutex<HashMap<String, (u32, SpeedInfo)>>,
}

impl SpeedCounter {
    pub fn new(direction: Direction) -> Arc<Self> {
        Arc::new(Self {
            direction,
            speeds: Mutex::new(HashMap::new()),
        })
    }

    /// Replaces this session's previous contribution with `current` and
    /// returns the longest sleep any limit demands.
    pub fn update(
        &self,
        last: &Option<SpeedInfo>,
        current: &SpeedInfo,
        limits: &[SpeedLimit],
    ) -> Duration {
        let mut sleep = Duration::zero();
        let mut speeds = self.speeds.lock().unwrap();
        for limit in limits {
            let entry = speeds
                .entry(limit.path.clone())
                .and_modify(|(participants, aggregate)| {
                    match last {
                        Some(last) => aggregate.sub(last),
                        None => *participants += 1,
                    }
                    aggregate.add(current);
                })
                .or_insert((1, *current));
            let (participants, aggregate) = entry;
            sleep = sleep.max(speed_limit_sleep(
                aggregate.xfertime / (*participants as i32),
                aggregate.bytes,
                limit.limit_for(self.direction) * 1024,
            ));
        }
        sleep
    }

    /// Withdraws this session's participation from every limit it touched.
    pub fn clear(&self, last: &Option<SpeedInfo>, limits: &[SpeedLimit]) {
        let last = match last {
            Some(last) => last,
            None => return,
        };
        let mut speeds = self.speeds.lock().unwrap();
        for limit in limits {
            if let Some((participants, aggregate)) = speeds.get_mut(&limit.path) {
                *participants -= 1;
                if *participants == 0 {
                    speeds.remove(&limit.path);
                } else {
                    aggregate.sub(last);
                }
            }
        }
    }

    pub fn participants(&self, path: &str) -> u32 {
        self.speeds
            .lock()
            .unwrap()
            .get(path)
            .map(|(n, _)| *n)
            .unwrap_or(0)
    }
}

/// Per-transfer throttle. Construction starts participation in the global
/// counters; drop clears it exactly once.
pub struct SpeedThrottle {
    min_speed: u64,
    max_speed: u64,
    state: TransferState,
    limits: Vec<SpeedLimit>,
    counter: Arc<SpeedCounter>,
    last_minimum_ok: DateTime<Local>,
    last_info: Option<SpeedInfo>,
}

impl SpeedThrottle {
    /// `min_speed`/`max_speed` are KiB/s, zero meaning unenforced.
    pub fn new(
        min_speed: u64,
        max_speed: u64,
        state: TransferState,
        limits: Vec<SpeedLimit>,
        counter: Arc<SpeedCounter>,
    ) -> Self {
        Self {
            min_speed,
            max_speed,
            state,
            limits,
            counter,
            last_minimum_ok: Local::now(),
            last_info: None,
        }
    }

    fn check_minimum(&mut self, speed_kib: f64, now: DateTime<Local>) -> Result<()> {
        if speed_kib > self.min_speed as f64 {
            self.last_minimum_ok = now;
        } else if (now - self.last_minimum_ok).num_seconds() > MIN_SPEED_KICK_SECS {
            return Err(FtpError::MinimumSpeed {
                limit: self.min_speed,
                observed: speed_kib,
            });
        }
        Ok(())
    }

    /// Called from the transfer hot path after each chunk.
    pub async fn apply(&mut self) -> Result<()> {
        if self.min_speed == 0 && self.max_speed == 0 && self.limits.is_empty() {
            return Ok(());
        }

        let info = SpeedInfo::new(self.state.duration(), self.state.bytes());

        if self.min_speed > 0 {
            self.check_minimum(info.speed() / 1024.0, Local::now())?;
        }

        let mut sleep = Duration::zero();
        if self.max_speed > 0 {
            sleep = speed_limit_sleep(info.xfertime, info.bytes, self.max_speed * 1024);
        }
        if !self.limits.is_empty() {
            sleep = sleep.max(self.counter.update(&self.last_info, &info, &self.limits));
        }

        if sleep > Duration::zero() {
            debug!("Throttling transfer for {}ms", sleep.num_milliseconds());
            tokio::time::sleep(sleep.to_std().unwrap_or_default()).await;
        }

        self.last_info = Some(info);
        Ok(())
    }
}

impl Drop for SpeedThrottle {
    fn drop(&mut self) {
        self.counter.clear(&self.last_info, &self.limits);
    }
}
