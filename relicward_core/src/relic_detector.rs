//! The "DETECTOR" - per-encounter duplicate and tamper screening
//!
//! Every time a relic is met in the world it is judged against its own stamp
//! and against the registry:
//!
//! ```text
//! no id embedded                       → UNREGISTERED
//! id present, stamp fails              → TAMPERED
//! stamp valid, record dead             → DUPLICATE
//! stamp valid, holder-bound record,
//!   known holder differs / world differs → DUPLICATE
//! anything else                        → LEGITIMATE
//! ```
//!
//! Illegitimate items are confiscated on the spot. Confiscation is best
//! effort: if the item already moved, the next encounter catches it.

use crate::relic_audit::{AuditEvent, AuditKind, AuditLog, UNREGISTERED_ID};
use crate::config::NoticeConfig;
use crate::notify::Notifier;
use crate::relic_identity::RelicIdentity;
use crate::relic_registry::{RelicRecord, Registry};
use crate::world::{BlockPos, ItemStack, Site, WorldAccess};
use relicward_env::HolderRef;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Legitimate,
    Unregistered,
    Tampered,
    Duplicate,
}

impl Verdict {
    pub fn is_legitimate(&self) -> bool {
        *self == Verdict::Legitimate
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Legitimate => "LEGITIMATE",
            Verdict::Unregistered => "UNREGISTERED",
            Verdict::Tampered => "TAMPERED",
            Verdict::Duplicate => "DUPLICATE",
        }
    }

    fn audit_kind(&self) -> Option<AuditKind> {
        match self {
            Verdict::Legitimate => None,
            Verdict::Unregistered => Some(AuditKind::UnregisteredConfiscated),
            Verdict::Tampered => Some(AuditKind::TamperedConfiscated),
            Verdict::Duplicate => Some(AuditKind::DupeConfiscated),
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One sighting of an item.
#[derive(Debug, Clone)]
pub struct Encounter<'a> {
    pub item: &'a ItemStack,
    /// Holder context: who has the item right now, if anyone.
    pub holder: Option<&'a HolderRef>,
    pub found_at: &'a BlockPos,
    /// Where to remove it from if it must go.
    pub site: Site,
}

#[derive(Clone)]
pub struct Detector {
    identity: Arc<RelicIdentity>,
    audit: AuditLog,
    notifier: Arc<dyn Notifier>,
    alert_ops: bool,
}

impl Detector {
    pub fn new(
        identity: Arc<RelicIdentity>,
        audit: AuditLog,
        notifier: Arc<dyn Notifier>,
        notices: &NoticeConfig,
    ) -> Self {
        Self {
            identity,
            audit,
            notifier,
            alert_ops: notices.ops_on_duplicate,
        }
    }

    pub fn identity(&self) -> &RelicIdentity {
        &self.identity
    }

    /// Judges an item without touching the world. Non-relic items are
    /// always legitimate.
    pub fn evaluate(
        &self,
        registry: &Registry,
        item: &ItemStack,
        holder: Option<&HolderRef>,
        found_at: &BlockPos,
    ) -> Verdict {
        if !item.is_relic() {
            return Verdict::Legitimate;
        }
        let Some(id) = item.relic_id() else {
            return Verdict::Unregistered;
        };
        if !self.identity.verify(item) {
            return Verdict::Tampered;
        }
        match registry.get(id) {
            Some(record) => duplicate_check(record, holder, found_at),
            None => {
                // Genuine stamp, no record: store loss or a foreign server.
                debug!("Valid stamp for unrecorded relic {} at {}", id, found_at);
                Verdict::Legitimate
            }
        }
    }

    /// Evaluates the encounter and confiscates anything illegitimate.
    pub fn screen(
        &self,
        registry: &Registry,
        world: &mut dyn WorldAccess,
        encounter: &Encounter<'_>,
        now: i64,
    ) -> Verdict {
        let verdict = self.evaluate(registry, encounter.item, encounter.holder, encounter.found_at);
        if !verdict.is_legitimate() {
            self.confiscate(registry, world, encounter, verdict, now);
        }
        verdict
    }

    fn confiscate(
        &self,
        registry: &Registry,
        world: &mut dyn WorldAccess,
        encounter: &Encounter<'_>,
        verdict: Verdict,
        now: i64,
    ) {
        let target = encounter.item;
        let removed = encounter.site.remove(world, |item| item == target);
        let relic_id = target.relic_id().unwrap_or(UNREGISTERED_ID);
        let who = encounter
            .holder
            .map(|h| h.name.as_str())
            .unwrap_or("(no holder)");

        let detail = match verdict {
            Verdict::Duplicate => match registry.get(relic_id) {
                Some(record) if record.status.is_dead() => {
                    format!("Copy of {} relic {}", record.status, relic_id)
                }
                Some(record) => format!("Copy of {} recorded at {}", relic_id, record.location),
                None => format!("Copy of {}", relic_id),
            },
            Verdict::Tampered => "Stamp verification failed".to_string(),
            _ => "Relic without an id".to_string(),
        };
        let detail = if removed {
            detail
        } else {
            format!("{} (removal failed, item moved)", detail)
        };

        warn!(
            "{} relic {} held by {} at {}: {}",
            verdict, relic_id, who, encounter.found_at, detail
        );
        if let Some(kind) = verdict.audit_kind() {
            self.audit.record(
                AuditEvent::new(relic_id, kind, now)
                    .detail(detail)
                    .actor(encounter.holder)
                    .position(Some(encounter.found_at)),
            );
        }
        if self.alert_ops {
            self.notifier.ops_alert(&format!(
                "[Relicward] {} relic {} confiscated from {} at {}",
                verdict, relic_id, who, encounter.found_at
            ));
        }
    }
}

fn duplicate_check(record: &RelicRecord, holder: Option<&HolderRef>, found_at: &BlockPos) -> Verdict {
    if record.status.is_dead() {
        return Verdict::Duplicate;
    }
    let location = &record.location;
    if !location.kind.is_holder_bound() {
        return Verdict::Legitimate;
    }
    match (location.holder_id(), holder.map(|h| h.id)) {
        (Some(known), Some(current)) if known != current => Verdict::Duplicate,
        (Some(_), Some(_)) => Verdict::Legitimate,
        // Holder unknown on either side; only a different world is conclusive.
        _ => match &location.world {
            Some(world) if *world != found_at.world => Verdict::Duplicate,
            _ => Verdict::Legitimate,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::notify::RecordingNotifier;
    use crate::relic_identity::{IntegritySecret, RelicClass, SECRET_LEN};
    use crate::relic_registry::{LocationKind, Placement, RelicStatus};
    use crate::relic_store::{MemoryRelicStore, WriteQueue};
    use crate::world::InventoryRef;
    use crate::world_memory::MemoryWorld;
    use relicward_env::HolderId;
    use std::time::Duration;

    struct Fixture {
        detector: Detector,
        registry: Registry,
        notifier: Arc<RecordingNotifier>,
        store: Arc<MemoryRelicStore>,
        queue: WriteQueue,
        alice: HolderRef,
        bob: HolderRef,
    }

    fn fixture() -> Fixture {
        let store = MemoryRelicStore::shared();
        let queue = WriteQueue::spawn(store.clone()).unwrap();
        let audit_config = AuditConfig {
            log_to_file: false,
            ..AuditConfig::default()
        };
        let audit = AuditLog::new(queue.handle(), &audit_config);
        let identity =
            Arc::new(RelicIdentity::new(&IntegritySecret::from_bytes([3; SECRET_LEN])).unwrap());
        let notifier = Arc::new(RecordingNotifier::new());
        let detector = Detector::new(identity, audit, notifier.clone(), &NoticeConfig::default());
        Fixture {
            detector,
            registry: Registry::new("MC", queue.handle()),
            notifier,
            store,
            queue,
            alice: HolderRef::new(HolderId::from_seed(1), "alice"),
            bob: HolderRef::new(HolderId::from_seed(2), "bob"),
        }
    }

    fn spawn_pos() -> BlockPos {
        BlockPos::new("overworld", 0, 64, 0)
    }

    impl Fixture {
        /// Issues a relic held by `holder` and returns its stamped item.
        fn issue_to(&mut self, holder: &HolderRef) -> ItemStack {
            let id = self.registry.allocate_id();
            let mut item = ItemStack::blank_relic();
            self.detector
                .identity()
                .stamp(&mut item, &id, RelicClass::Restricted, 100);
            let placement = Placement::new(LocationKind::HeldInventory, spawn_pos())
                .with_holder(Some(holder.clone()));
            self.registry
                .register(RelicRecord::issued(&id, RelicClass::Restricted, 100, None, &placement))
                .unwrap();
            item
        }
    }

    #[test]
    fn test_evaluate_rules() {
        let mut fx = fixture();
        let item = fx.issue_to(&fx.alice.clone());
        let here = spawn_pos();

        assert_eq!(
            fx.detector.evaluate(&fx.registry, &ItemStack::plain("stick"), Some(&fx.bob), &here),
            Verdict::Legitimate
        );
        assert_eq!(
            fx.detector.evaluate(&fx.registry, &ItemStack::blank_relic(), Some(&fx.alice), &here),
            Verdict::Unregistered
        );
        assert_eq!(
            fx.detector.evaluate(&fx.registry, &item, Some(&fx.alice), &here),
            Verdict::Legitimate
        );
        assert_eq!(
            fx.detector.evaluate(&fx.registry, &item, Some(&fx.bob), &here),
            Verdict::Duplicate
        );

        let mut forged = item.clone();
        forged.tags.class = Some("UNRESTRICTED".to_string());
        assert_eq!(
            fx.detector.evaluate(&fx.registry, &forged, Some(&fx.alice), &here),
            Verdict::Tampered
        );
    }

    #[test]
    fn test_unknown_holder_falls_back_to_world() {
        let mut fx = fixture();
        let item = fx.issue_to(&fx.alice.clone());

        let same_world = BlockPos::new("overworld", 500, 70, 500);
        assert_eq!(
            fx.detector.evaluate(&fx.registry, &item, None, &same_world),
            Verdict::Legitimate
        );
        let other_world = BlockPos::new("nether", 0, 64, 0);
        assert_eq!(
            fx.detector.evaluate(&fx.registry, &item, None, &other_world),
            Verdict::Duplicate
        );
    }

    #[test]
    fn test_dead_relic_copies_are_duplicates() {
        let mut fx = fixture();
        let item = fx.issue_to(&fx.alice.clone());
        let id = item.relic_id().unwrap().to_string();
        fx.registry.set_status(&id, RelicStatus::Destroyed);

        assert_eq!(
            fx.detector.evaluate(&fx.registry, &item, Some(&fx.alice), &spawn_pos()),
            Verdict::Duplicate
        );
    }

    #[test]
    fn test_orphan_stamp_is_legitimate() {
        let fx = fixture();
        let mut item = ItemStack::blank_relic();
        fx.detector
            .identity()
            .stamp(&mut item, "MC-0042", RelicClass::Restricted, 5);
        assert_eq!(
            fx.detector.evaluate(&fx.registry, &item, Some(&fx.bob), &spawn_pos()),
            Verdict::Legitimate
        );
    }

    #[test]
    fn test_container_record_accepts_any_holder() {
        let mut fx = fixture();
        let item = fx.issue_to(&fx.alice.clone());
        let id = item.relic_id().unwrap().to_string();
        let chest = BlockPos::new("overworld", 10, 64, 10);
        fx.registry
            .update_location(&id, &Placement::new(LocationKind::Container, chest.clone()), 200);

        assert_eq!(
            fx.detector.evaluate(&fx.registry, &item, Some(&fx.bob), &chest),
            Verdict::Legitimate
        );
    }

    #[test]
    fn test_screen_confiscates_and_audits_duplicate() {
        let mut fx = fixture();
        let item = fx.issue_to(&fx.alice.clone());
        let mut world = MemoryWorld::new();
        world.connect(fx.bob.clone(), spawn_pos());
        let slot = world.give(fx.bob.id, item.clone()).unwrap();

        let encounter = Encounter {
            item: &item,
            holder: Some(&fx.bob),
            found_at: &spawn_pos(),
            site: Site::slot(InventoryRef::Primary(fx.bob.id), slot),
        };
        let verdict = fx.detector.screen(&fx.registry, &mut world, &encounter, 300);

        assert_eq!(verdict, Verdict::Duplicate);
        assert_eq!(world.count_relic(item.relic_id().unwrap()), 0);
        assert_eq!(fx.notifier.ops_alerts().len(), 1);
        assert!(fx.notifier.ops_alerts()[0].contains("DUPLICATE"));

        assert!(fx.queue.flush(Duration::from_secs(5)));
        let events = fx.store.audit_events();
        assert!(events.iter().any(|e| e.kind == AuditKind::DupeConfiscated && e.at == 300));
        fx.queue.shutdown(Duration::from_secs(5));
    }

    #[test]
    fn test_screen_unregistered_uses_placeholder_id() {
        let mut fx = fixture();
        let mut world = MemoryWorld::new();
        let here = spawn_pos();
        let entity = world.spawn_dropped(ItemStack::blank_relic(), here.clone());

        let item = ItemStack::blank_relic();
        let encounter = Encounter {
            item: &item,
            holder: None,
            found_at: &here,
            site: Site::Entity(entity),
        };
        assert_eq!(
            fx.detector.screen(&fx.registry, &mut world, &encounter, 1),
            Verdict::Unregistered
        );
        assert!(world.entity(entity).is_none());

        assert!(fx.queue.flush(Duration::from_secs(5)));
        assert!(fx
            .store
            .audit_events()
            .iter()
            .any(|e| e.relic_id == UNREGISTERED_ID && e.kind == AuditKind::UnregisteredConfiscated));
        fx.queue.shutdown(Duration::from_secs(5));
    }

    #[test]
    fn test_screen_legitimate_leaves_item() {
        let mut fx = fixture();
        let item = fx.issue_to(&fx.alice.clone());
        let mut world = MemoryWorld::new();
        world.connect(fx.alice.clone(), spawn_pos());
        let slot = world.give(fx.alice.id, item.clone()).unwrap();

        let encounter = Encounter {
            item: &item,
            holder: Some(&fx.alice),
            found_at: &spawn_pos(),
            site: Site::slot(InventoryRef::Primary(fx.alice.id), slot),
        };
        assert!(fx.detector.screen(&fx.registry, &mut world, &encounter, 2).is_legitimate());
        assert_eq!(world.count_relic(item.relic_id().unwrap()), 1);
        assert!(fx.notifier.ops_alerts().is_empty());
    }
}
