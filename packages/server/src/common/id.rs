//! Server time and identifier helpers.
//!
//! All ordering-relevant timestamps in the system are Unix-epoch
//! milliseconds (`i64`). The `Clock` trait exists so the ingest engine and
//! export worker can be driven by a fixed clock in tests.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use uuid::Uuid;

/// Source of server time in Unix-epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall-clock time with a monotonic guard.
///
/// The guard is a process-local high-water mark: if the OS clock steps
/// backwards, `now_ms` keeps returning the last observed value until real
/// time catches up. `ts_server` must never regress within a process.
#[derive(Debug, Default)]
pub struct SystemClock {
    high_water: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let prev = self.high_water.fetch_max(now, Ordering::AcqRel);
        now.max(prev)
    }
}

/// Generate a new server-side row identifier.
pub fn new_id() -> Uuid {
    Uuid::new_v4()
}

/// Clamp a client-reported timestamp into the skew window around `now`.
///
/// Returns `ts_client` unchanged when it already lies within
/// `[now - window_ms, now + window_ms]`.
pub fn clamp_skew(ts_client: i64, now: i64, window_ms: i64) -> i64 {
    ts_client.clamp(now - window_ms, now + window_ms)
}
