//! Core environment context trait for Relicward services.

use async_trait::async_trait;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The central interface for environment interaction.
///
/// This trait abstracts the "real world" so that the registry, scanner and
/// issuance engines can run both on a live server and inside the
/// deterministic simulation harness.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, `OsRng`
/// - **Simulation**: `SimContext` - virtual clock, `ChaCha8Rng(seed)`
///
/// # Determinism
///
/// Every method that would normally introduce non-determinism (time,
/// randomness) is controlled by the implementation.
#[async_trait]
pub trait RelicContext: Send + Sync + 'static {
    /// Returns the monotonic time since context creation.
    ///
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time.
    ///
    /// In simulation, this is derived from virtual clock + epoch offset.
    fn system_time(&self) -> SystemTime;

    /// Wall-clock time as whole seconds since the Unix epoch.
    ///
    /// All registry and audit timestamps use this resolution.
    fn epoch_secs(&self) -> i64 {
        self.system_time()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);

    /// Draws a value uniformly from `low..=high`.
    ///
    /// Used for the randomized reconciliation interval. Returns `low` when
    /// the range is empty or inverted.
    fn uniform_u64(&self, low: u64, high: u64) -> u64;

    /// Fills `buf` with secret-quality random bytes.
    ///
    /// Production draws from the OS; simulation derives the bytes from the
    /// master seed so integrity secrets are reproducible.
    fn fill_secret(&self, buf: &mut [u8]);

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    /// In simulation, returns the master seed.
    fn seed(&self) -> u64;
}
