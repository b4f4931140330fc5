//! Health Check Module
//!
//! Answers liveness queries from a cached probe result. A live probe reads a
//! designated object from the backend, which only needs read permission on
//! that key (listing may be restricted). Probes run at most once per
//! configured interval.

use crate::backend::ObjectBackend;
use crate::{GatewayError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Source of wall-clock time in whole seconds since the Unix epoch
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> u64;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs()
    }
}

/// Time-gated health probe
pub struct HealthGate {
    backend: Arc<dyn ObjectBackend>,
    health_key: String,
    interval_secs: u64,
    clock: Arc<dyn Clock>,
    /// Epoch seconds of the last successful probe, 0 if none yet
    last_success: AtomicU64,
    probe_lock: Mutex<()>,
}

impl HealthGate {
    pub fn new(backend: Arc<dyn ObjectBackend>, health_key: String, interval: Duration) -> Self {
        Self::with_clock(backend, health_key, interval, Arc::new(SystemClock))
    }

    pub fn with_clock(
        backend: Arc<dyn ObjectBackend>,
        health_key: String,
        interval: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            health_key,
            interval_secs: interval.as_secs(),
            clock,
            last_success: AtomicU64::new(0),
            probe_lock: Mutex::new(()),
        }
    }

    /// Epoch seconds of the last successful probe, if any
    pub fn last_success(&self) -> Option<u64> {
        match self.last_success.load(Ordering::Acquire) {
            0 => None,
            secs => Some(secs),
        }
    }

    /// Whether a request at `now` can be answered without probing
    pub fn is_fresh(&self, now: u64) -> bool {
        match self.last_success() {
            Some(last) => now.saturating_sub(last) <= self.interval_secs,
            None => false,
        }
    }

    /// Succeed immediately while fresh, otherwise probe the backend.
    ///
    /// Concurrent stale callers are serialized on the probe lock; whoever
    /// acquires it after a peer's successful probe sees a fresh state and
    /// returns without contacting the backend.
    pub async fn check(&self) -> Result<()> {
        if self.is_fresh(self.clock.now_secs()) {
            return Ok(());
        }

        let _guard = self.probe_lock.lock().await;

        let now = self.clock.now_secs();
        if self.is_fresh(now) {
            debug!("Health check already refreshed by a concurrent request");
            return Ok(());
        }

        info!("Making health check for path '{}'", self.health_key);
        match self.backend.get_object(&self.health_key).await {
            Ok(_) => {
                self.last_success.fetch_max(now, Ordering::AcqRel);
                info!("Health check passed");
                Ok(())
            }
            Err(e) => {
                error!("Health check failed: {}", e);
                Err(GatewayError::from_backend(&self.health_key, e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_backend::MemoryBackend;
    use bytes::Bytes;

    /// Manually advanced clock
    #[derive(Default)]
    struct ManualClock(AtomicU64);

    impl ManualClock {
        fn at(secs: u64) -> Arc<Self> {
            Arc::new(Self(AtomicU64::new(secs)))
        }

        fn advance(&self, secs: u64) {
            self.0.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_secs(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    async fn backend_with_health_file() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .put_object(".rest-s3-proxy", Bytes::from_static(b"ok"), None)
            .await
            .unwrap();
        backend
    }

    fn gate(backend: Arc<MemoryBackend>, clock: Arc<ManualClock>) -> HealthGate {
        HealthGate::with_clock(
            backend,
            ".rest-s3-proxy".to_string(),
            Duration::from_secs(120),
            clock,
        )
    }

    #[tokio::test]
    async fn test_first_check_probes_backend() {
        let backend = backend_with_health_file().await;
        let clock = ManualClock::at(1_000);
        let gate = gate(backend.clone(), clock);

        assert!(gate.last_success().is_none());
        gate.check().await.unwrap();
        assert_eq!(backend.call_counts().get, 1);
        assert_eq!(gate.last_success(), Some(1_000));
    }

    #[tokio::test]
    async fn test_second_check_within_interval_is_cached() {
        let backend = backend_with_health_file().await;
        let clock = ManualClock::at(1_000);
        let gate = gate(backend.clone(), clock.clone());

        gate.check().await.unwrap();
        clock.advance(120);
        gate.check().await.unwrap();
        assert_eq!(backend.call_counts().get, 1);
    }

    #[tokio::test]
    async fn test_check_after_interval_probes_once_more() {
        let backend = backend_with_health_file().await;
        let clock = ManualClock::at(1_000);
        let gate = gate(backend.clone(), clock.clone());

        gate.check().await.unwrap();
        clock.advance(121);
        gate.check().await.unwrap();
        gate.check().await.unwrap();
        assert_eq!(backend.call_counts().get, 2);
        assert_eq!(gate.last_success(), Some(1_121));
    }

    #[tokio::test]
    async fn test_failed_probe_leaves_state_stale() {
        let backend = backend_with_health_file().await;
        let clock = ManualClock::at(1_000);
        let gate = gate(backend.clone(), clock.clone());

        backend.set_unavailable(true);
        let err = gate.check().await.unwrap_err();
        assert_eq!(err.status_code(), hyper::StatusCode::INTERNAL_SERVER_ERROR);
        assert!(gate.last_success().is_none());

        backend.set_unavailable(false);
        gate.check().await.unwrap();
        assert_eq!(backend.call_counts().get, 2);
    }

    #[tokio::test]
    async fn test_missing_health_file_is_not_found() {
        let backend = Arc::new(MemoryBackend::new());
        let gate = gate(backend, ManualClock::at(1_000));

        let err = gate.check().await.unwrap_err();
        assert_eq!(err.status_code(), hyper::StatusCode::NOT_FOUND);
        assert!(err.to_string().contains(".rest-s3-proxy"));
    }

    #[tokio::test]
    async fn test_failure_after_success_keeps_timestamp() {
        let backend = backend_with_health_file().await;
        let clock = ManualClock::at(1_000);
        let gate = gate(backend.clone(), clock.clone());

        gate.check().await.unwrap();
        clock.advance(500);
        backend.set_unavailable(true);
        assert!(gate.check().await.is_err());
        assert_eq!(gate.last_success(), Some(1_000));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_stale_checks_probe_once() {
        let backend = backend_with_health_file().await;
        let gate = Arc::new(gate(backend.clone(), ManualClock::at(1_000)));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move { gate.check().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(backend.call_counts().get, 1);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.now_secs() > 1_577_836_800);
    }
}
