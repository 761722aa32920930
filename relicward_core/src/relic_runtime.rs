//! The "RUNTIME" - wires the registry, tracker, scanner and operators together
//!
//! Owns the single control thread's state. A host bridge feeds world events
//! through [`RelicwardRuntime::handle`] and calls [`RelicwardRuntime::tick`]
//! from its scheduler; everything durable flows through one writer queue.

use crate::config::{ConfigError, RelicConfig};
use crate::notify::{Census, Notifier};
use crate::relic_admin::{Admin, AdminError, ReclassOutcome, RevokeOutcome};
use crate::relic_audit::{AuditEvent, AuditLog};
use crate::relic_detector::Detector;
use crate::relic_identity::{IdentityError, IntegritySecret, RelicClass, RelicIdentity};
use crate::relic_issuance::{IssueError, IssueRequest, Issuer};
use crate::relic_registry::Registry;
use crate::relic_scanner::{ScanContext, ScanError, ScanReport, Scanner};
use crate::relic_store::{RelicStore, SledRelicStore, StoreError, WriteQueue};
use crate::relic_tracker::{Disposition, Tracker, WorldEvent};
use crate::world::{BlockPos, ItemStack, WorldAccess};
use relicward_env::{HolderRef, RelicContext};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

pub struct RelicwardRuntime<Ctx: RelicContext> {
    ctx: Arc<Ctx>,
    config: RelicConfig,
    registry: Registry,
    identity: Arc<RelicIdentity>,
    tracker: Tracker,
    scanner: Scanner,
    issuer: Issuer,
    admin: Admin,
    store: Arc<dyn RelicStore>,
    writer: WriteQueue,
}

impl<Ctx: RelicContext> RelicwardRuntime<Ctx> {
    /// Starts the writer, hydrates the registry from `store` and schedules the first scan.
    pub fn open(
        ctx: Arc<Ctx>,
        config: RelicConfig,
        store: Arc<dyn RelicStore>,
        secret: &IntegritySecret,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        let identity = Arc::new(RelicIdentity::new(secret)?);
        let writer = WriteQueue::spawn(store.clone())?;
        let registry = Registry::load(store.as_ref(), config.id_prefix.clone(), writer.handle())?;
        let audit = AuditLog::new(writer.handle(), &config.audit);

        let detector = Detector::new(
            identity.clone(),
            audit.clone(),
            notifier.clone(),
            &config.notices,
        );
        let now = ctx.epoch_secs();
        let scanner = Scanner::new(
            config.scan.clone(),
            config.notices.clone(),
            detector.clone(),
            audit.clone(),
            notifier.clone(),
            ctx.uniform_u64(0, u64::MAX),
            now,
        );
        let tracker = Tracker::new(detector, audit.clone());
        let issuer = Issuer::new(
            identity.clone(),
            audit.clone(),
            notifier.clone(),
            config.notices.clone(),
        );
        let admin = Admin::new(identity.clone(), audit, notifier, config.notices.clone());

        info!(
            "Relicward started: {} records, next scan at {}",
            registry.len(),
            scanner.next_scheduled_at()
        );
        Ok(Self {
            ctx,
            config,
            registry,
            identity,
            tracker,
            scanner,
            issuer,
            admin,
            store,
            writer,
        })
    }

    /// Opens the sled store and integrity secret named by `config.storage`.
    pub fn open_on_disk(
        ctx: Arc<Ctx>,
        config: RelicConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, RuntimeError> {
        let store = Arc::new(SledRelicStore::open(&config.storage.db_path)?);
        let secret =
            IntegritySecret::load_or_create(&config.storage.secret_path, |buf| ctx.fill_secret(buf))?;
        Self::open(ctx, config, store, &secret, notifier)
    }

    pub fn now(&self) -> i64 {
        self.ctx.epoch_secs()
    }

    pub fn context(&self) -> &Arc<Ctx> {
        &self.ctx
    }

    pub fn config(&self) -> &RelicConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn identity(&self) -> &RelicIdentity {
        &self.identity
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    pub fn census(&self) -> Census {
        Census::take(&self.registry, &self.config.capacity)
    }

    // === World events ===

    pub fn handle(&mut self, world: &mut dyn WorldAccess, event: WorldEvent) -> Disposition {
        let now = self.now();
        self.tracker.handle(&mut self.registry, world, event, now)
    }

    /// One scheduler tick. Returns the report of a scan that completed on this tick.
    pub fn tick(&mut self, world: &mut dyn WorldAccess) -> Option<ScanReport> {
        let mut cx = ScanContext {
            registry: &mut self.registry,
            world,
            capacity: &self.config.capacity,
            now: self.ctx.epoch_secs(),
        };
        self.scanner.tick(&mut cx)
    }

    /// Runs `ticks` scheduler ticks, sleeping `interval` between them.
    pub async fn drive<W: WorldAccess>(
        &mut self,
        world: &mut W,
        ticks: usize,
        interval: Duration,
    ) -> Vec<ScanReport> {
        let mut reports = Vec::new();
        for _ in 0..ticks {
            if let Some(report) = self.tick(world) {
                reports.push(report);
            }
            self.ctx.sleep(interval).await;
        }
        reports
    }

    pub fn request_scan(
        &mut self,
        world: &mut dyn WorldAccess,
        requester: Option<&str>,
    ) -> Result<(), ScanError> {
        let mut cx = ScanContext {
            registry: &mut self.registry,
            world,
            capacity: &self.config.capacity,
            now: self.ctx.epoch_secs(),
        };
        self.scanner.run_immediate(requester, &mut cx)
    }

    // === Operators ===

    pub fn issue(&mut self, request: &IssueRequest) -> Result<ItemStack, IssueError> {
        let now = self.now();
        self.issuer
            .issue(&mut self.registry, &self.config.capacity, request, now)
    }

    pub fn revoke(
        &mut self,
        world: &mut dyn WorldAccess,
        id: &str,
        operator: Option<&HolderRef>,
        reason: &str,
    ) -> Result<RevokeOutcome, AdminError> {
        let now = self.now();
        self.admin
            .revoke(&mut self.registry, world, id, operator, reason, now)
    }

    pub fn set_class(
        &mut self,
        world: &mut dyn WorldAccess,
        id: &str,
        class: RelicClass,
        operator: Option<&HolderRef>,
    ) -> Result<ReclassOutcome, AdminError> {
        let now = self.now();
        self.admin.set_class(
            &mut self.registry,
            world,
            &self.config.capacity,
            id,
            class,
            operator,
            now,
        )
    }

    /// Changes a cap. Lowering it below the active count only blocks new issuance.
    pub fn set_capacity(&mut self, class: RelicClass, capacity: usize) {
        let active = self.registry.active_count(class);
        if capacity < active {
            warn!(
                "{} cap set to {} with {} already active; no relics are removed",
                class, capacity, active
            );
        }
        self.config.capacity.set(class, capacity);
        info!("{} cap is now {}", class, capacity);
    }

    pub fn mark_destroyed(
        &mut self,
        id: &str,
        cause: &str,
        position: Option<&BlockPos>,
    ) -> Result<(), AdminError> {
        let now = self.now();
        self.admin.mark_destroyed(
            &mut self.registry,
            &self.config.capacity,
            id,
            cause,
            position,
            now,
        )
    }

    /// Newest-first audit history of one relic, after pending writes land.
    pub fn audit_history(&self, id: &str, limit: usize) -> Result<Vec<AuditEvent>, StoreError> {
        if !self.writer.flush(self.drain_timeout()) {
            warn!("Audit history for {} read before the writer drained", id);
        }
        self.store.audit_history(id, limit)
    }

    // === Lifecycle ===

    fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.config.storage.shutdown_timeout_ms)
    }

    /// Waits for every queued write to be applied.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.writer.flush(timeout)
    }

    /// Abandons any running scan and drains the writer queue.
    ///
    /// Returns false if the drain timed out.
    pub fn shutdown(mut self) -> bool {
        self.scanner.abandon();
        let timeout = self.drain_timeout();
        let drained = self.writer.shutdown(timeout);
        info!("Relicward stopped ({} records)", self.registry.len());
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::notify::RecordingNotifier;
    use crate::relic_audit::AuditKind;
    use crate::relic_identity::SECRET_LEN;
    use crate::relic_registry::{LocationKind, RelicStatus};
    use crate::relic_store::MemoryRelicStore;
    use crate::world_memory::MemoryWorld;
    use relicward_env::{HolderId, TokioContext};

    const WAIT: Duration = Duration::from_secs(5);

    fn config() -> RelicConfig {
        RelicConfig {
            audit: AuditConfig {
                log_to_file: false,
                ..AuditConfig::default()
            },
            ..RelicConfig::default()
        }
    }

    fn secret() -> IntegritySecret {
        IntegritySecret::from_bytes([3; SECRET_LEN])
    }

    fn open(store: Arc<MemoryRelicStore>) -> (RelicwardRuntime<TokioContext>, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::new());
        let runtime = RelicwardRuntime::open(
            TokioContext::shared(),
            config(),
            store,
            &secret(),
            notifier.clone(),
        )
        .unwrap();
        (runtime, notifier)
    }

    fn alice() -> HolderRef {
        HolderRef::new(HolderId::from_seed(1), "alice")
    }

    fn here() -> BlockPos {
        BlockPos::new("overworld", 8, 64, 8)
    }

    #[test]
    fn test_issue_persists_through_writer() {
        let store = MemoryRelicStore::shared();
        let (mut runtime, notifier) = open(store.clone());

        let item = runtime
            .issue(&IssueRequest::crafted(RelicClass::Restricted, alice(), here()))
            .unwrap();
        let id = item.relic_id().unwrap().to_string();
        assert!(runtime.identity().verify(&item));
        assert_eq!(runtime.census().restricted_count, 1);
        assert_eq!(notifier.broadcasts().len(), 1);

        let history = runtime.audit_history(&id, 10).unwrap();
        assert_eq!(history[0].kind, AuditKind::Crafted);
        assert!(store.record(&id).is_some());
        assert!(runtime.shutdown());
    }

    #[test]
    fn test_reopen_continues_counter() {
        let store = MemoryRelicStore::shared();
        let (mut runtime, _) = open(store.clone());
        runtime
            .issue(&IssueRequest::crafted(RelicClass::Restricted, alice(), here()))
            .unwrap();
        assert!(runtime.shutdown());

        let (mut reopened, _) = open(store);
        assert_eq!(reopened.registry().len(), 1);
        let item = reopened
            .issue(&IssueRequest::crafted(RelicClass::Restricted, alice(), here()))
            .unwrap();
        assert_eq!(item.relic_id(), Some("MC-0002"));
    }

    #[test]
    fn test_requested_scan_verifies_held_relic() {
        let (mut runtime, notifier) = open(MemoryRelicStore::shared());
        let mut world = MemoryWorld::new();
        world.connect(alice(), here());
        let item = runtime
            .issue(&IssueRequest::crafted(RelicClass::Restricted, alice(), here()))
            .unwrap();
        world.give(alice().id, item);

        runtime.request_scan(&mut world, Some("op")).unwrap();
        assert_eq!(
            runtime.request_scan(&mut world, None),
            Err(ScanError::AlreadyInProgress)
        );
        let report = (0..20).find_map(|_| runtime.tick(&mut world)).unwrap();
        assert_eq!(report.verified, 1);
        assert_eq!(report.requested_by.as_deref(), Some("op"));
        assert!(!runtime.scanner().is_running());
        assert!(notifier
            .ops_alerts()
            .iter()
            .any(|alert| alert.contains("Scan complete")));
    }

    #[test]
    fn test_events_and_operators() {
        let (mut runtime, _) = open(MemoryRelicStore::shared());
        let mut world = MemoryWorld::new();
        world.connect(alice(), here());
        let item = runtime
            .issue(&IssueRequest::crafted(RelicClass::Restricted, alice(), here()))
            .unwrap();
        let id = item.relic_id().unwrap().to_string();
        let entity = world.spawn_dropped(item.clone(), here());

        let disposition = runtime.handle(
            &mut world,
            WorldEvent::Drop {
                actor: alice(),
                entity,
                item,
                position: here(),
            },
        );
        assert_eq!(disposition, Disposition::Proceed);
        assert_eq!(
            runtime.registry().get(&id).unwrap().location.kind,
            LocationKind::GroundEntity
        );

        assert_eq!(
            runtime.revoke(&mut world, &id, None, "test").unwrap(),
            RevokeOutcome::Removed
        );
        assert_eq!(world.count_relic(&id), 0);
        assert_eq!(
            runtime.registry().get(&id).unwrap().status,
            RelicStatus::Revoked
        );
        assert!(runtime.mark_destroyed(&id, "lava", None).is_err());
    }

    #[test]
    fn test_set_capacity_gates_issuance() {
        let (mut runtime, _) = open(MemoryRelicStore::shared());
        runtime.set_capacity(RelicClass::Unrestricted, 0);
        assert!(runtime
            .issue(&IssueRequest::crafted(RelicClass::Unrestricted, alice(), here()))
            .is_err());
        runtime.set_capacity(RelicClass::Unrestricted, 2);
        assert!(runtime
            .issue(&IssueRequest::crafted(RelicClass::Unrestricted, alice(), here()))
            .is_ok());
        assert!(runtime.flush(WAIT));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bad = RelicConfig {
            id_prefix: String::new(),
            ..config()
        };
        let result = RelicwardRuntime::open(
            TokioContext::shared(),
            bad,
            MemoryRelicStore::shared(),
            &secret(),
            Arc::new(RecordingNotifier::new()),
        );
        assert!(matches!(result, Err(RuntimeError::Config(_))));
    }

    #[tokio::test]
    async fn test_drive_runs_requested_scan() {
        let (mut runtime, _) = open(MemoryRelicStore::shared());
        let mut world = MemoryWorld::new();
        world.connect(alice(), here());
        runtime.request_scan(&mut world, None).unwrap();

        let reports = runtime.drive(&mut world, 10, Duration::from_millis(1)).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].active, 0);
    }
}
