//! Relicward Environment Abstraction Layer
//!
//! This crate provides the abstraction allowing the Relicward engines to run
//! against both a **Production** clock (tokio, OS entropy) and a
//! **Simulation** clock (virtual time, seeded RNG).
//!
//! Everything that would otherwise make a run non-reproducible is routed
//! through [`RelicContext`]:
//! - Time (`now()`, `epoch_secs()`, `sleep()`)
//! - Randomness (`uniform_u64()`, `fill_secret()`)
//!
//! # Example
//!
//! ```ignore
//! use relicward_env::RelicContext;
//!
//! async fn heartbeat<Ctx: RelicContext>(ctx: &Ctx) {
//!     loop {
//!         tick(ctx.epoch_secs());
//!         ctx.sleep(Duration::from_millis(50)).await;
//!     }
//! }
//! ```

mod context;
mod types;
mod tokio_impl;

pub use context::RelicContext;
pub use types::{HolderId, HolderRef};
pub use tokio_impl::TokioContext;
