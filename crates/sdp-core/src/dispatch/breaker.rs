//! Three-state circuit breaker with exponential backoff.
//!
//! CLOSED counts failures; at the threshold it opens. OPEN rejects calls
//! until `timeout · 2^(consecutive_opens - 1)` (capped at `max_backoff`) has
//! elapsed, then lets one probe through as HALF_OPEN. A successful probe
//! closes the breaker and resets the open streak; a failed probe reopens it
//! without growing the streak.

use std::future::Future;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Breaker tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub threshold: u32,
    /// Rolling-window size kept for snapshot compatibility; the transition
    /// function resets `failure_count` on success, which subsumes it.
    pub window: u32,
    /// Base cool-down before a probe is allowed.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Upper bound on the exponential cool-down.
    #[serde(with = "duration_secs")]
    pub max_backoff: Duration,
}

mod duration_secs {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            window: 5,
            timeout: Duration::from_secs(60),
            max_backoff: Duration::from_secs(300),
        }
    }
}

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Serializable breaker state, used both live and in checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    pub consecutive_opens: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_state_change: Option<DateTime<Utc>>,
}

impl Default for BreakerSnapshot {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            consecutive_opens: 0,
            last_failure_time: None,
            last_state_change: None,
        }
    }
}

/// Error produced by [`CircuitBreaker::execute`].
#[derive(Debug, thiserror::Error)]
pub enum BreakerError {
    /// Back-pressure sentinel; the call was rejected without running.
    #[error("circuit breaker open")]
    Open,

    /// The wrapped task itself failed.
    #[error(transparent)]
    Task(#[from] anyhow::Error),
}

impl BreakerError {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Shared failure governor for dispatcher workstreams.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: RwLock<BreakerSnapshot>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(BreakerSnapshot::default()),
        }
    }

    /// Run `task` under the breaker.
    ///
    /// Rejects with [`BreakerError::Open`] while the cool-down is running.
    /// The state lock is never held across the await.
    pub async fn execute<F, Fut, T>(&self, task: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.admit()?;
        match task().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(BreakerError::Task(e))
            }
        }
    }

    /// Gate a call: pass in CLOSED/HALF_OPEN, reject or transition in OPEN.
    fn admit(&self) -> Result<(), BreakerError> {
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let backoff = self.current_backoff(inner.consecutive_opens);
                let elapsed = inner
                    .last_state_change
                    .map(|t| Utc::now().signed_duration_since(t))
                    .and_then(|d| d.to_std().ok())
                    .unwrap_or(Duration::ZERO);
                if elapsed < backoff {
                    return Err(BreakerError::Open);
                }
                info!("circuit breaker half-open after {:?} cool-down", backoff);
                inner.state = BreakerState::HalfOpen;
                inner.last_state_change = Some(Utc::now());
                Ok(())
            }
        }
    }

    /// `timeout · 2^(consecutive_opens - 1)`, capped at `max_backoff`.
    fn current_backoff(&self, consecutive_opens: u32) -> Duration {
        let exponent = consecutive_opens.saturating_sub(1).min(16);
        let scaled = self
            .config
            .timeout
            .saturating_mul(2u32.saturating_pow(exponent));
        scaled.min(self.config.max_backoff)
    }

    fn on_success(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        inner.success_count += 1;
        inner.failure_count = 0;
        if inner.state == BreakerState::HalfOpen {
            info!("circuit breaker closed after successful probe");
            inner.state = BreakerState::Closed;
            inner.consecutive_opens = 0;
            inner.last_state_change = Some(Utc::now());
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        inner.last_failure_time = Some(Utc::now());
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.threshold {
                    inner.state = BreakerState::Open;
                    inner.consecutive_opens += 1;
                    inner.last_state_change = Some(Utc::now());
                    warn!(
                        consecutive_opens = inner.consecutive_opens,
                        "circuit breaker opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                // The open streak was already earned; the probe failing
                // reopens without growing it.
                inner.state = BreakerState::Open;
                inner.last_state_change = Some(Utc::now());
                warn!("circuit breaker reopened after failed probe");
            }
            BreakerState::Open => {}
        }
    }

    /// Current state (read-locked).
    pub fn state(&self) -> BreakerState {
        self.inner.read().unwrap_or_else(|p| p.into_inner()).state
    }

    /// Full metrics snapshot (read-locked).
    pub fn metrics(&self) -> BreakerSnapshot {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Atomically replace breaker state, e.g. from a checkpoint.
    pub fn restore(&self, snapshot: BreakerSnapshot) {
        *self.inner.write().unwrap_or_else(|p| p.into_inner()) = snapshot;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerError> {
        breaker
            .execute(|| async { Err::<(), _>(anyhow::anyhow!("boom")) })
            .await
            .map(|_| ())
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), BreakerError> {
        breaker.execute(|| async { Ok(()) }).await
    }

    #[tokio::test]
    async fn test_closed_counts_failures_then_opens() {
        let breaker = CircuitBreaker::default();
        for _ in 0..3 {
            assert!(!fail(&breaker).await.unwrap_err().is_open());
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.metrics().consecutive_opens, 1);
    }

    #[tokio::test]
    async fn test_open_rejects_without_invoking_task() {
        let breaker = CircuitBreaker::default();
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        let invoked = std::sync::atomic::AtomicBool::new(false);
        let result = breaker
            .execute(|| {
                invoked.store(true, std::sync::atomic::Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Open)));
        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::default();
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        succeed(&breaker).await.unwrap();
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    fn backdate(breaker: &CircuitBreaker, secs: i64) {
        let mut snapshot = breaker.metrics();
        snapshot.last_state_change =
            snapshot.last_state_change.map(|t| t - ChronoDuration::seconds(secs));
        breaker.restore(snapshot);
    }

    #[tokio::test]
    async fn test_half_open_probe_closes_on_success() {
        let breaker = CircuitBreaker::default();
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        backdate(&breaker, 61);
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.metrics().consecutive_opens, 0);
    }

    #[tokio::test]
    async fn test_half_open_probe_reopens_on_failure_without_growing_streak() {
        let breaker = CircuitBreaker::default();
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        backdate(&breaker, 61);
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.metrics().consecutive_opens, 1);
    }

    #[tokio::test]
    async fn test_backoff_doubles_per_open_and_caps() {
        let breaker = CircuitBreaker::default();
        assert_eq!(breaker.current_backoff(1), Duration::from_secs(60));
        assert_eq!(breaker.current_backoff(2), Duration::from_secs(120));
        assert_eq!(breaker.current_backoff(3), Duration::from_secs(240));
        // 60 * 2^3 = 480 caps at 300.
        assert_eq!(breaker.current_backoff(4), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_restore_replaces_state() {
        let breaker = CircuitBreaker::default();
        breaker.restore(BreakerSnapshot {
            state: BreakerState::Open,
            failure_count: 3,
            success_count: 7,
            consecutive_opens: 2,
            last_failure_time: Some(Utc::now()),
            last_state_change: Some(Utc::now()),
        });
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(matches!(succeed(&breaker).await, Err(BreakerError::Open)));
    }

    #[test]
    fn test_snapshot_serde_roundtrip() {
        let snapshot = BreakerSnapshot {
            state: BreakerState::HalfOpen,
            failure_count: 2,
            success_count: 5,
            consecutive_opens: 1,
            last_failure_time: Some(Utc::now()),
            last_state_change: None,
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: BreakerSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, back);
    }

    #[test]
    fn test_config_serde_uses_seconds() {
        let config = BreakerConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["timeout"], 60);
        assert_eq!(json["max_backoff"], 300);
        let back: BreakerConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config, back);
    }
}
