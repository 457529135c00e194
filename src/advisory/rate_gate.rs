use crate::persistence::JsonFile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Minimum seconds between two advisory calls
pub const DEFAULT_MIN_INTERVAL_SECS: u64 = 300;

/// Persisted rate-gate record: `{"last_call": <epoch seconds>}`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RateGateState {
    last_call: f64,
}

/// Persistent gate on how often the advisory endpoint may be called
///
/// The last-call timestamp lives on disk so the limit holds across process
/// restarts. Callers serialize through the cache's refresh lock; `&mut self`
/// keeps the check-and-record step exclusive within one process.
pub struct RateGate {
    store: JsonFile<RateGateState>,
    min_interval: Duration,
}

impl RateGate {
    pub fn new(path: impl Into<PathBuf>, min_interval: Duration) -> Self {
        Self {
            store: JsonFile::new(path),
            min_interval,
        }
    }

    pub fn allow_call(&mut self) -> bool {
        self.allow_call_at(Utc::now())
    }

    /// Permit a call at `now` and record it, or refuse and leave state untouched
    ///
    /// Unreadable state counts as "no prior call". A recorded call in the
    /// future (clock moved backwards) is treated the same way.
    pub fn allow_call_at(&mut self, now: DateTime<Utc>) -> bool {
        let now_secs = epoch_secs(now);

        if let Some(elapsed) = self.elapsed_since_last_call(now_secs) {
            if elapsed < self.min_interval.as_secs_f64() {
                tracing::info!(
                    "Advisory rate limit active, next call allowed in {:.1}s",
                    self.min_interval.as_secs_f64() - elapsed
                );
                return false;
            }
        }

        if let Err(e) = self.store.write(&RateGateState { last_call: now_secs }) {
            tracing::error!("Failed to persist rate-gate timestamp: {}", e);
        }
        true
    }

    /// Time of the last recorded call, if any
    pub fn last_call(&self) -> Option<DateTime<Utc>> {
        let state = self.store.read_or_none()?;
        DateTime::from_timestamp_millis((state.last_call * 1000.0) as i64)
    }

    fn elapsed_since_last_call(&self, now_secs: f64) -> Option<f64> {
        let state = self.store.read_or_none()?;
        let elapsed = now_secs - state.last_call;
        if !elapsed.is_finite() || elapsed < 0.0 {
            tracing::warn!("Rate-gate timestamp is in the future, ignoring it");
            return None;
        }
        Some(elapsed)
    }
}

fn epoch_secs(time: DateTime<Utc>) -> f64 {
    time.timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn gate_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("tradeadvisor-gate-{}", uuid::Uuid::new_v4()))
            .join("api_rate_limit.json")
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn gate(path: &PathBuf) -> RateGate {
        RateGate::new(path.clone(), Duration::from_secs(DEFAULT_MIN_INTERVAL_SECS))
    }

    #[test]
    fn test_calls_within_interval_are_refused() {
        let path = gate_path();
        let mut gate = gate(&path);

        assert!(gate.allow_call_at(t0()));
        assert!(!gate.allow_call_at(t0() + chrono::Duration::seconds(299)));
    }

    #[test]
    fn test_calls_after_interval_are_permitted() {
        let path = gate_path();
        let mut gate = gate(&path);

        assert!(gate.allow_call_at(t0()));
        assert!(gate.allow_call_at(t0() + chrono::Duration::seconds(300)));
    }

    #[test]
    fn test_refusal_does_not_move_the_timestamp() {
        let path = gate_path();
        let mut gate = gate(&path);

        assert!(gate.allow_call_at(t0()));
        assert!(!gate.allow_call_at(t0() + chrono::Duration::seconds(200)));
        // Still measured from t0, not from the refused attempt
        assert!(gate.allow_call_at(t0() + chrono::Duration::seconds(301)));
        assert_eq!(
            gate.last_call(),
            Some(t0() + chrono::Duration::seconds(301))
        );
    }

    #[test]
    fn test_limit_survives_restart() {
        let path = gate_path();
        assert!(gate(&path).allow_call_at(t0()));

        // New instance, same file
        let mut restarted = gate(&path);
        assert!(!restarted.allow_call_at(t0() + chrono::Duration::seconds(10)));
    }

    #[test]
    fn test_corrupt_state_permits_call() {
        let path = gate_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "garbage").unwrap();

        let mut gate = gate(&path);
        assert!(gate.allow_call_at(t0()));
        assert!(!gate.allow_call_at(t0() + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_reads_fractional_epoch_seconds() {
        let path = gate_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let last = epoch_secs(t0()) + 0.75;
        std::fs::write(&path, format!("{{\"last_call\": {}}}", last)).unwrap();

        let mut gate = gate(&path);
        assert!(!gate.allow_call_at(t0() + chrono::Duration::seconds(300)));
        assert!(gate.allow_call_at(t0() + chrono::Duration::seconds(301)));
    }
}
