//! Per-endpoint failure budget.
//!
//! Counts consecutive network failures per endpoint and denies further
//! attempts once `max_retries` is reached, until the record goes stale.
//! State is in-memory only and starts empty on every process start.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Time source, injectable so tests can move time by hand.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
  pub retry_count: u32,
  pub last_failure_at: DateTime<Utc>,
}

pub struct RetryBudget {
  clock: Arc<dyn Clock>,
  max_retries: u32,
  window: Duration,
  records: Mutex<HashMap<String, FailureRecord>>,
}

impl RetryBudget {
  pub fn new(max_retries: u32, window: std::time::Duration) -> Self {
    Self::with_clock(max_retries, window, Arc::new(SystemClock))
  }

  pub fn with_clock(max_retries: u32, window: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
    Self {
      clock,
      max_retries,
      // Out-of-range windows are clamped to a year.
      window: Duration::from_std(window)
        .unwrap_or_else(|_| Duration::weeks(52))
        .min(Duration::weeks(52)),
      records: Mutex::new(HashMap::new()),
    }
  }

  fn records(&self) -> MutexGuard<'_, HashMap<String, FailureRecord>> {
    // A panic while holding the lock cannot leave a record half-written.
    self.records.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Whether a network attempt for `key` is allowed right now.
  ///
  /// Past twice the window the record is dropped and the attempt allowed.
  /// Otherwise, inside the window or between one and two windows, the
  /// attempt is allowed only while the retry count is under the maximum.
  pub fn should_attempt(&self, key: &str) -> bool {
    let mut records = self.records();
    let Some(record) = records.get(key) else {
      return true;
    };

    let elapsed = self.clock.now() - record.last_failure_at;
    if elapsed < self.window {
      return record.retry_count < self.max_retries;
    }

    if elapsed > self.window * 2 {
      debug!(endpoint = %key, "failure record expired");
      records.remove(key);
      return true;
    }

    record.retry_count < self.max_retries
  }

  /// Count a failure for `key`, creating its record if needed.
  pub fn record_failure(&self, key: &str) -> u32 {
    let now = self.clock.now();
    let mut records = self.records();
    let record = records.entry(key.to_string()).or_insert(FailureRecord {
      retry_count: 0,
      last_failure_at: now,
    });
    record.retry_count += 1;
    record.last_failure_at = now;
    record.retry_count
  }

  pub fn record_success(&self, key: &str) {
    self.records().remove(key);
  }

  #[cfg(test)]
  pub fn record(&self, key: &str) -> Option<FailureRecord> {
    self.records().get(key).cloned()
  }
}

/// Clock that only moves when told to.
#[cfg(test)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      now: Mutex::new(Utc::now()),
    })
  }

  pub fn advance(&self, by: std::time::Duration) {
    let mut now = self.now.lock().unwrap();
    *now += Duration::from_std(by).unwrap();
  }
}

#[cfg(test)]
impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap()
  }
}
