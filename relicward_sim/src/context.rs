//! Simulation context implementing RelicContext for deterministic testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use relicward_env::RelicContext;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Simulation context backed by deterministic time and RNG.
///
/// This implements `RelicContext` using:
/// - A virtual clock that can be advanced manually
/// - A seeded ChaCha8 RNG for scan intervals and integrity secrets
/// - Simulated sleep that advances virtual time
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Deterministic RNG
    rng: Arc<Mutex<ChaCha8Rng>>,

    /// Epoch offset (virtual time 0 maps to this wall-clock time)
    epoch: SystemTime,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(Mutex::new(0)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            epoch: UNIX_EPOCH + Duration::from_secs(1704067200), // 2024-01-01 00:00:00 UTC
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        *self.virtual_time_ns.lock() += duration.as_nanos() as u64;
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *self.virtual_time_ns.lock()
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            rng: Arc::clone(&self.rng),
            epoch: self.epoch,
        }
    }
}

#[async_trait]
impl RelicContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        // Sleeping is just the clock moving forward
        self.advance_time(duration);
    }

    fn uniform_u64(&self, low: u64, high: u64) -> u64 {
        if high <= low {
            return low;
        }
        self.rng.lock().gen_range(low..=high)
    }

    fn fill_secret(&self, buf: &mut [u8]) {
        self.rng.lock().fill_bytes(buf);
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_context_time() {
        let ctx = SimContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);
        assert_eq!(ctx.epoch_secs(), 1704067200);

        ctx.advance_time(Duration::from_secs(1));
        assert_eq!(ctx.now(), Duration::from_secs(1));

        ctx.advance_time(Duration::from_millis(500));
        assert_eq!(ctx.now(), Duration::from_millis(1500));
        assert_eq!(ctx.epoch_secs(), 1704067201);
    }

    #[test]
    fn test_sim_context_deterministic_secrets() {
        let ctx1 = SimContext::new(42);
        let ctx2 = SimContext::new(42);
        let ctx3 = SimContext::new(43);

        let (mut a, mut b, mut c) = ([0u8; 32], [0u8; 32], [0u8; 32]);
        ctx1.fill_secret(&mut a);
        ctx2.fill_secret(&mut b);
        ctx3.fill_secret(&mut c);

        // Same seed = same secret
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_uniform_bounds() {
        let ctx = SimContext::new(7);
        for _ in 0..100 {
            let v = ctx.uniform_u64(60, 120);
            assert!((60..=120).contains(&v));
        }
        assert_eq!(ctx.uniform_u64(9, 3), 9);
    }

    #[test]
    fn test_sim_context_clone_shares_time() {
        let ctx1 = SimContext::new(42);
        let ctx2 = ctx1.clone();

        ctx1.advance_time(Duration::from_secs(5));

        // Both should see the same time
        assert_eq!(ctx1.now(), ctx2.now());
        assert_eq!(ctx2.seed(), 42);
    }

    #[tokio::test]
    async fn test_sleep_advances_virtual_clock() {
        let ctx = SimContext::new(1);
        ctx.sleep(Duration::from_secs(60)).await;
        assert_eq!(ctx.now(), Duration::from_secs(60));
    }
}
