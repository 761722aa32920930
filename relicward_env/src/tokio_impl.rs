//! Production implementation of RelicContext using Tokio.

use crate::RelicContext;
use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Production context backed by Tokio and OS entropy.
///
/// Time comes from the system clock, randomness from OsRng.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,
}

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelicContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn uniform_u64(&self, low: u64, high: u64) -> u64 {
        if high <= low {
            return low;
        }
        OsRng.gen_range(low..=high)
    }

    fn fill_secret(&self, buf: &mut [u8]) {
        OsRng.fill_bytes(buf);
    }

    fn seed(&self) -> u64 {
        // Production is not seeded
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokio_context_time() {
        let ctx = TokioContext::new();
        let t1 = ctx.now();
        ctx.sleep(Duration::from_millis(10)).await;
        let t2 = ctx.now();

        assert!(t2 > t1);
        assert!(t2 - t1 >= Duration::from_millis(10));
    }

    #[test]
    fn test_tokio_context_secrets_differ() {
        let ctx = TokioContext::new();
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        ctx.fill_secret(&mut a);
        ctx.fill_secret(&mut b);

        // In production, secrets should be different (random)
        assert_ne!(a, b);
    }

    #[test]
    fn test_tokio_context_uniform_bounds() {
        let ctx = TokioContext::new();
        for _ in 0..100 {
            let v = ctx.uniform_u64(10, 20);
            assert!((10..=20).contains(&v));
        }
        assert_eq!(ctx.uniform_u64(7, 7), 7);
        assert_eq!(ctx.uniform_u64(9, 3), 9);
    }

    #[test]
    fn test_tokio_context_epoch_secs() {
        let ctx = TokioContext::new();
        // 2020-01-01; any live clock is past this
        assert!(ctx.epoch_secs() > 1_577_836_800);
        assert_eq!(ctx.seed(), 0);
    }
}
