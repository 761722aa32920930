//! Relicward Deterministic Simulation Testing (DST) Harness
//!
//! This crate provides a controlled world where the whole registry, tracker
//! and scanner pipeline runs deterministically against adversarial players.
//!
//! # Core Principle
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: a virtual clock that moves only when the harness ticks or sleeps
//! - **Randomness**: scan intervals, integrity secrets and world layout all
//!   derive from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    ScenarioRunner                    │
//! │  ┌────────────────────┐     ┌─────────────────────┐  │
//! │  │ RelicwardRuntime   │◄───►│    MemoryWorld      │  │
//! │  │  (SimContext)      │     │ holders, containers │  │
//! │  └─────────┬──────────┘     └─────────────────────┘  │
//! │            │                                         │
//! │  ┌─────────▼──────────┐                              │
//! │  │ MemoryRelicStore   │                              │
//! │  └────────────────────┘                              │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use relicward_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::DupeExploit);
//! assert!(result.passed);
//! ```

mod context;
mod runner;
pub mod scenarios;

pub use context::SimContext;
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
