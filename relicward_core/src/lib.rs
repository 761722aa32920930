//! Relicward Core - Scarce-Asset Registry and World Reconciliation
//!
//! This library keeps a small population of unique items ("relics") honest:
//! 1. **Forgery Problem**: every relic carries an HMAC-SHA256 integrity stamp
//! 2. **Duplication Problem**: every encounter is checked against the one authoritative record
//! 3. **Drift Problem**: a periodic scan reconciles recorded locations against the world
//!
//! The world itself is reached only through the [`WorldAccess`] port, so the
//! same engines run against a live server bridge or [`MemoryWorld`].

pub mod config;
pub mod notify;
pub mod world;
pub mod world_memory;

pub mod relic_identity;
pub mod relic_store;
pub mod relic_registry;
pub mod relic_audit;
pub mod relic_detector;
pub mod relic_tracker;
pub mod relic_scanner;
pub mod relic_issuance;
pub mod relic_admin;
pub mod relic_runtime;

// Re-export key types for convenience
pub use config::{CapacityConfig, ConfigError, NoticeConfig, RelicConfig, ScanConfig};
pub use notify::{Census, Notifier, RecordingNotifier, TracingNotifier};
pub use relic_admin::{AdminError, ReclassOutcome, RevokeOutcome};
pub use relic_audit::{AuditEvent, AuditKind, AuditLog};
pub use relic_detector::{Detector, Verdict};
pub use relic_identity::{IdentityError, IntegritySecret, RelicClass, RelicIdentity};
pub use relic_issuance::{IssueError, IssueOrigin, IssueRequest, Issuer};
pub use relic_registry::{LocationKind, Placement, Registry, RelicLocation, RelicRecord, RelicStatus};
pub use relic_runtime::{RelicwardRuntime, RuntimeError};
pub use relic_scanner::{ScanError, ScanPhase, ScanReport, Scanner};
pub use relic_store::{MemoryRelicStore, RelicStore, SledRelicStore, StoreError};
pub use relic_tracker::{Disposition, MoveTarget, Picker, Tracker, WorldEvent};
pub use world::{BlockPos, EntityId, InventoryHandle, InventoryRef, ItemStack, WorldAccess};
pub use world_memory::MemoryWorld;
