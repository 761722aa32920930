//! The "SCANNER" - periodic reconciliation of the registry against the world
//!
//! A scan is a resumable state machine advanced by scheduler ticks, so the
//! expensive spatial sweep is spread across many ticks:
//!
//! ```text
//!  Idle ──(due / requested)──► ConnectedHolders ──► Regions ──► ... ──► Regions
//!                                                               │ (queue empty)
//!                                                               ▼
//!  Idle ◄── complete ◄── DuplicateSweep ◄── Reconcile ◄── DisconnectedHolders ◄── FreeEntities
//! ```
//!
//! Every relic met is screened by the detector. Active relics not seen in an
//! accessible location accrue a missed scan; enough consecutive misses mark
//! them destroyed. Relics whose last location was not accessible this scan
//! (holder offline, region unloaded) are never penalised.
//!
//! Extra copies found in the duplicate sweep are removed one tick after the
//! scan completes, and only if the recorded site still holds that relic.

use crate::config::{CapacityConfig, NoticeConfig, ScanConfig};
use crate::notify::{announce_slot_open, Notifier};
use crate::relic_audit::{AuditEvent, AuditKind, AuditLog};
use crate::relic_detector::{Detector, Encounter};
use crate::relic_registry::{LocationKind, Placement, Registry, RelicLocation, RelicStatus};
use crate::relic_tracker::{classify, placement_of};
use crate::world::{
    collect_relics, BlockPos, EntityKind, InventoryHandle, InventoryRef, ItemStack, RegionKey,
    Site, Slots, WorldAccess,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use relicward_env::HolderRef;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("A scan is already in progress")]
    AlreadyInProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    ConnectedHolders,
    Regions,
    FreeEntities,
    DisconnectedHolders,
    Reconcile,
    DuplicateSweep,
}

/// Outcome of one completed scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub requested_by: Option<String>,
    pub started_at: i64,
    pub completed_at: i64,
    /// Active relics at scan start.
    pub active: usize,
    pub verified: usize,
    /// Accessible but not found this scan.
    pub missing: Vec<String>,
    /// Not accessible this scan; no penalty.
    pub skipped: usize,
    pub destroyed: Vec<String>,
    /// Items confiscated by the detector during the sweep.
    pub confiscated: usize,
    /// Extra copies queued for removal.
    pub duplicates_scheduled: usize,
    pub regions_swept: usize,
    /// Active relics held by disconnected holders.
    pub offline_exempt: usize,
}

impl ScanReport {
    pub fn issues(&self) -> usize {
        self.missing.len() + self.destroyed.len() + self.confiscated + self.duplicates_scheduled
    }

    pub fn summary(&self) -> String {
        format!(
            "[Relicward] Scan complete: {}/{} verified, {} missing, {} destroyed, {} confiscated, {} duplicate(s) scheduled, {} skipped",
            self.verified,
            self.active,
            self.missing.len(),
            self.destroyed.len(),
            self.confiscated,
            self.duplicates_scheduled,
            self.skipped
        )
    }
}

/// Everything a scan step reads or mutates.
pub struct ScanContext<'a> {
    pub registry: &'a mut Registry,
    pub world: &'a mut dyn WorldAccess,
    pub capacity: &'a CapacityConfig,
    pub now: i64,
}

#[derive(Debug, Clone)]
struct KnownState {
    location: RelicLocation,
    missing_scan_count: u32,
}

#[derive(Debug, Clone)]
struct Sighting {
    placement: Placement,
    site: Site,
}

struct ScanRun {
    phase: ScanPhase,
    known_before: HashMap<String, KnownState>,
    seen: HashSet<String>,
    sightings: BTreeMap<String, Vec<Sighting>>,
    processed_doubles: HashSet<BlockPos>,
    region_queue: VecDeque<RegionKey>,
    swept_regions: HashSet<RegionKey>,
    report: ScanReport,
}

#[derive(Debug, Clone)]
struct PendingRemoval {
    relic_id: String,
    site: Site,
    position: BlockPos,
}

pub struct Scanner {
    config: ScanConfig,
    notices: NoticeConfig,
    detector: Detector,
    audit: AuditLog,
    notifier: Arc<dyn Notifier>,
    rng: ChaCha8Rng,
    run: Option<ScanRun>,
    pending_removals: Vec<PendingRemoval>,
    last_completed_at: Option<i64>,
    next_scheduled_at: i64,
}

impl Scanner {
    /// Creates an idle scanner with its first scan scheduled from `now`.
    pub fn new(
        config: ScanConfig,
        notices: NoticeConfig,
        detector: Detector,
        audit: AuditLog,
        notifier: Arc<dyn Notifier>,
        seed: u64,
        now: i64,
    ) -> Self {
        let mut scanner = Self {
            config,
            notices,
            detector,
            audit,
            notifier,
            rng: ChaCha8Rng::seed_from_u64(seed),
            run: None,
            pending_removals: Vec::new(),
            last_completed_at: None,
            next_scheduled_at: now,
        };
        scanner.schedule_next(now);
        scanner
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    pub fn phase(&self) -> Option<ScanPhase> {
        self.run.as_ref().map(|r| r.phase)
    }

    pub fn last_completed_at(&self) -> Option<i64> {
        self.last_completed_at
    }

    pub fn next_scheduled_at(&self) -> i64 {
        self.next_scheduled_at
    }

    pub fn pending_removals(&self) -> usize {
        self.pending_removals.len()
    }

    /// Picks the next scan time uniformly within the configured interval.
    pub fn schedule_next(&mut self, now: i64) -> i64 {
        let (low, high) = self.config.interval_bounds_secs();
        let delay = if high > low {
            self.rng.gen_range(low..=high)
        } else {
            low
        };
        self.next_scheduled_at = now + delay as i64;
        debug!("Next relic scan at {}", self.next_scheduled_at);
        self.next_scheduled_at
    }

    /// Starts a scan right away and runs its first phase.
    pub fn run_immediate(
        &mut self,
        requester: Option<&str>,
        cx: &mut ScanContext<'_>,
    ) -> Result<(), ScanError> {
        if self.run.is_some() {
            return Err(ScanError::AlreadyInProgress);
        }
        info!("Relic scan requested by {}", requester.unwrap_or("(scheduler)"));
        let mut run = self.begin(requester, cx);
        self.sweep_connected_holders(&mut run, cx);
        run.phase = ScanPhase::Regions;
        self.run = Some(run);
        Ok(())
    }

    /// One scheduler tick: executes removals queued by the previous scan,
    /// starts a scan if one is due and advances the running scan.
    pub fn tick(&mut self, cx: &mut ScanContext<'_>) -> Option<ScanReport> {
        self.execute_pending_removals(cx);
        let run = match self.run.take() {
            Some(run) => run,
            None if cx.now >= self.next_scheduled_at => self.begin(None, cx),
            None => return None,
        };
        self.step(run, cx)
    }

    /// Drops the running scan without completing it. Returns true if one was running.
    pub fn abandon(&mut self) -> bool {
        match self.run.take() {
            Some(run) => {
                warn!("Abandoning relic scan in phase {:?}", run.phase);
                true
            }
            None => false,
        }
    }

    fn begin(&mut self, requester: Option<&str>, cx: &mut ScanContext<'_>) -> ScanRun {
        let known_before: HashMap<String, KnownState> = cx
            .registry
            .active_records()
            .into_iter()
            .map(|r| {
                (
                    r.id.clone(),
                    KnownState {
                        location: r.location.clone(),
                        missing_scan_count: r.missing_scan_count,
                    },
                )
            })
            .collect();
        let region_queue: VecDeque<RegionKey> = cx.world.loaded_regions().into_iter().collect();
        info!(
            "Relic scan started: {} active relics, {} loaded regions",
            known_before.len(),
            region_queue.len()
        );

        ScanRun {
            phase: ScanPhase::ConnectedHolders,
            report: ScanReport {
                requested_by: requester.map(str::to_string),
                started_at: cx.now,
                active: known_before.len(),
                ..ScanReport::default()
            },
            known_before,
            seen: HashSet::new(),
            sightings: BTreeMap::new(),
            processed_doubles: HashSet::new(),
            region_queue,
            swept_regions: HashSet::new(),
        }
    }

    /// Advances `run`; stores it back unless it completed.
    fn step(&mut self, mut run: ScanRun, cx: &mut ScanContext<'_>) -> Option<ScanReport> {
        if self.advance(&mut run, cx) {
            Some(self.complete(run, cx))
        } else {
            self.run = Some(run);
            None
        }
    }

    /// Returns true when the run has finished every phase.
    fn advance(&mut self, run: &mut ScanRun, cx: &mut ScanContext<'_>) -> bool {
        loop {
            match run.phase {
                ScanPhase::ConnectedHolders => {
                    self.sweep_connected_holders(run, cx);
                    run.phase = ScanPhase::Regions;
                    return false;
                }
                ScanPhase::Regions => {
                    self.sweep_region_batch(run, cx);
                    if !run.region_queue.is_empty() {
                        return false;
                    }
                    run.phase = ScanPhase::FreeEntities;
                }
                ScanPhase::FreeEntities => {
                    self.sweep_free_entities(run, cx);
                    run.phase = ScanPhase::DisconnectedHolders;
                }
                ScanPhase::DisconnectedHolders => {
                    self.count_offline(run, cx);
                    run.phase = ScanPhase::Reconcile;
                }
                ScanPhase::Reconcile => {
                    self.reconcile(run, cx);
                    run.phase = ScanPhase::DuplicateSweep;
                }
                ScanPhase::DuplicateSweep => {
                    self.sweep_duplicates(run, cx);
                    return true;
                }
            }
        }
    }

    /// Screens one relic; records a sighting if it survives and is registered.
    fn observe(
        &self,
        run: &mut ScanRun,
        cx: &mut ScanContext<'_>,
        item: &ItemStack,
        holder: Option<&HolderRef>,
        placement: &Placement,
        site: Site,
    ) {
        let encounter = Encounter {
            item,
            holder,
            found_at: &placement.position,
            site: site.clone(),
        };
        let verdict = self.detector.screen(&*cx.registry, &mut *cx.world, &encounter, cx.now);
        if !verdict.is_legitimate() {
            run.report.confiscated += 1;
            return;
        }
        let Some(id) = item.relic_id() else { return };
        if !cx.registry.contains(id) {
            return;
        }
        run.seen.insert(id.to_string());
        run.sightings
            .entry(id.to_string())
            .or_default()
            .push(Sighting {
                placement: placement.clone(),
                site,
            });
        cx.registry.update_location(id, placement, cx.now);
    }

    fn sweep_inventory(
        &self,
        run: &mut ScanRun,
        cx: &mut ScanContext<'_>,
        handle: &InventoryHandle,
        contents: &Slots,
        holder: Option<&HolderRef>,
    ) {
        let outer = classify(handle, None);
        let outer = match handle.reference {
            InventoryRef::Cursor(_) => outer.with_container("CURSOR"),
            _ => outer,
        };
        for found in collect_relics(contents, &handle.reference) {
            let placement = placement_of(&found, &outer);
            self.observe(run, cx, &found.item, holder, &placement, found.site);
        }
    }

    fn sweep_connected_holders(&self, run: &mut ScanRun, cx: &mut ScanContext<'_>) {
        let holders = cx.world.connected_holders();
        for snapshot in &holders {
            for (handle, slots) in snapshot.inventories() {
                self.sweep_inventory(run, cx, &handle, &slots, Some(&snapshot.holder));
            }
        }
        debug!("Scan phase 1: {} connected holders swept", holders.len());
    }

    fn sweep_region_batch(&self, run: &mut ScanRun, cx: &mut ScanContext<'_>) {
        for _ in 0..self.config.regions_per_tick {
            let Some(region) = run.region_queue.pop_front() else { break };
            if !cx.world.is_region_loaded(&region) {
                continue;
            }
            for container in cx.world.containers_in(&region) {
                if let Some(canonical) = &container.handle.canonical {
                    if !run.processed_doubles.insert(canonical.clone()) {
                        continue;
                    }
                }
                self.sweep_inventory(run, cx, &container.handle, &container.contents, None);
            }
            run.swept_regions.insert(region);
            run.report.regions_swept += 1;
        }
    }

    fn sweep_free_entities(&self, run: &mut ScanRun, cx: &mut ScanContext<'_>) {
        let entities = cx.world.free_entities();
        for entity in &entities {
            let reference = InventoryRef::Entity(entity.id);
            match &entity.kind {
                EntityKind::DroppedItem | EntityKind::DisplayMount => {
                    let kind = match entity.kind {
                        EntityKind::DroppedItem => LocationKind::GroundEntity,
                        _ => LocationKind::DisplayMount,
                    };
                    let outer = Placement::new(kind, entity.position.clone())
                        .with_container(kind.as_str());
                    for found in collect_relics(&entity.contents, &reference) {
                        let site = match (kind, &found.nested_in) {
                            (LocationKind::GroundEntity, None) => Site::Entity(entity.id),
                            _ => found.site.clone(),
                        };
                        let placement = placement_of(&found, &outer);
                        self.observe(run, cx, &found.item, None, &placement, site);
                    }
                }
                EntityKind::Vehicle(kind) => {
                    let handle = InventoryHandle {
                        reference,
                        kind: kind.clone(),
                        position: entity.position.clone(),
                        holder: None,
                        canonical: None,
                    };
                    self.sweep_inventory(run, cx, &handle, &entity.contents, None);
                }
                EntityKind::Other(_) => {}
            }
        }
        debug!("Scan phase 3: {} entities swept", entities.len());
    }

    fn count_offline(&self, run: &mut ScanRun, cx: &mut ScanContext<'_>) {
        run.report.offline_exempt = run
            .known_before
            .iter()
            .filter(|(id, _)| !run.seen.contains(*id))
            .filter(|(_, known)| {
                known.location.kind == LocationKind::OfflineHolder
                    || (known.location.kind.is_holder_bound()
                        && !known
                            .location
                            .holder_id()
                            .map_or(false, |h| cx.world.is_connected(h)))
            })
            .count();
        debug!("Scan phase 4: {} relics with offline holders", run.report.offline_exempt);
    }

    /// Could this scan have seen a relic last recorded at `location`?
    fn is_accessible(run: &ScanRun, cx: &ScanContext<'_>, location: &RelicLocation) -> bool {
        if location.kind == LocationKind::OfflineHolder {
            return false;
        }
        if location.kind.is_holder_bound() {
            return location.holder_id().map_or(false, |h| cx.world.is_connected(h));
        }
        location
            .position()
            .map_or(false, |position| run.swept_regions.contains(&position.region()))
    }

    fn reconcile(&mut self, run: &mut ScanRun, cx: &mut ScanContext<'_>) {
        let threshold = self.config.missed_scans_to_destroy;
        let active: Vec<_> = cx
            .registry
            .active_records()
            .into_iter()
            .map(|r| (r.id.clone(), r.class, r.location.clone(), r.missing_scan_count))
            .collect();

        for (id, class, location, missing) in active {
            if run.seen.contains(&id) {
                cx.registry.set_last_verified_at(&id, cx.now);
                run.report.verified += 1;
                let before = run.known_before.get(&id).map_or(0, |k| k.missing_scan_count);
                if before > 0 {
                    self.audit.record(
                        AuditEvent::new(&id, AuditKind::ScanVerified, cx.now)
                            .detail(format!("Found again after {} missed scan(s)", before))
                            .position(location.position().as_ref()),
                    );
                }
                continue;
            }

            if !Self::is_accessible(run, cx, &location) {
                run.report.skipped += 1;
                self.audit.record(
                    AuditEvent::new(&id, AuditKind::ScanMissing, cx.now)
                        .detail(format!("Skipped: {} not accessible", location))
                        .position(location.position().as_ref()),
                );
                continue;
            }

            let count = missing + 1;
            cx.registry.set_missing_scan_count(&id, count);
            run.report.missing.push(id.clone());
            self.audit.record(
                AuditEvent::new(&id, AuditKind::ScanMissing, cx.now)
                    .detail(format!("Not found at {} ({}/{})", location, count, threshold))
                    .position(location.position().as_ref()),
            );
            if count >= threshold {
                cx.registry.set_status(&id, RelicStatus::Destroyed);
                run.report.destroyed.push(id.clone());
                warn!("Relic {} declared destroyed after {} missed scans", id, count);
                self.audit.record(
                    AuditEvent::new(&id, AuditKind::Destroyed, cx.now)
                        .detail(format!("Missing for {} consecutive scans", count))
                        .position(location.position().as_ref()),
                );
                if self.notices.ops_on_destroy {
                    self.notifier.ops_alert(&format!(
                        "[Relicward] {} relic {} destroyed: missing for {} scans",
                        class, id, count
                    ));
                }
                announce_slot_open(
                    self.notifier.as_ref(),
                    &self.notices,
                    &*cx.registry,
                    cx.capacity,
                    class,
                );
            }
        }
    }

    /// Keeps one copy of every relic sighted more than once and queues the rest.
    fn sweep_duplicates(&mut self, run: &mut ScanRun, cx: &mut ScanContext<'_>) {
        for (id, sightings) in &run.sightings {
            if sightings.len() < 2 {
                continue;
            }
            let keep = run
                .known_before
                .get(id)
                .and_then(|known| {
                    sightings
                        .iter()
                        .position(|s| s.placement.matches(&known.location))
                })
                .unwrap_or(0);
            let kept = &sightings[keep];

            for (index, sighting) in sightings.iter().enumerate() {
                if index == keep {
                    continue;
                }
                self.pending_removals.push(PendingRemoval {
                    relic_id: id.clone(),
                    site: sighting.site.clone(),
                    position: sighting.placement.position.clone(),
                });
            }
            let extra = sightings.len() - 1;
            run.report.duplicates_scheduled += extra;
            cx.registry.update_location(id, &kept.placement, cx.now);

            warn!(
                "Relic {} seen {} times; keeping copy at {}",
                id,
                sightings.len(),
                kept.placement.position
            );
            self.audit.record(
                AuditEvent::new(id, AuditKind::DupeConfiscated, cx.now)
                    .detail(format!(
                        "{} extra cop{} scheduled for removal; kept copy at {}",
                        extra,
                        if extra == 1 { "y" } else { "ies" },
                        kept.placement.position
                    ))
                    .position(Some(&kept.placement.position)),
            );
            if self.notices.ops_on_duplicate {
                self.notifier.ops_alert(&format!(
                    "[Relicward] Relic {} found in {} places; {} extra cop{} will be removed",
                    id,
                    sightings.len(),
                    extra,
                    if extra == 1 { "y" } else { "ies" }
                ));
            }
        }
    }

    fn complete(&mut self, run: ScanRun, cx: &mut ScanContext<'_>) -> ScanReport {
        let mut report = run.report;
        report.completed_at = cx.now;
        self.last_completed_at = Some(cx.now);
        self.schedule_next(cx.now);

        let summary = report.summary();
        info!("{}", summary);
        if self.notices.ops_on_scan_complete || report.requested_by.is_some() {
            self.notifier.ops_alert(&summary);
        }
        report
    }

    fn execute_pending_removals(&mut self, cx: &mut ScanContext<'_>) {
        for removal in std::mem::take(&mut self.pending_removals) {
            let relic_id = removal.relic_id.as_str();
            let removed = removal
                .site
                .remove_in_place(&mut *cx.world, |item| item.relic_id() == Some(relic_id));
            if removed {
                info!("Removed duplicate of {} at {}", relic_id, removal.position);
            } else {
                debug!(
                    "Duplicate of {} at {} already gone; skipping",
                    relic_id, removal.position
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::notify::RecordingNotifier;
    use crate::relic_identity::{IntegritySecret, RelicClass, RelicIdentity, SECRET_LEN};
    use crate::relic_registry::RelicRecord;
    use crate::relic_store::WriteHandle;
    use crate::world::ContainerKind;
    use crate::world_memory::MemoryWorld;
    use relicward_env::HolderId;

    struct Fixture {
        scanner: Scanner,
        identity: Arc<RelicIdentity>,
        notifier: Arc<RecordingNotifier>,
        registry: Registry,
        world: MemoryWorld,
        capacity: CapacityConfig,
        alice: HolderRef,
        now: i64,
    }

    fn pos(x: i32, z: i32) -> BlockPos {
        BlockPos::new("overworld", x, 64, z)
    }

    fn fixture_with(config: ScanConfig) -> Fixture {
        let writer = WriteHandle::disconnected();
        let audit = AuditLog::new(
            writer.clone(),
            &AuditConfig {
                log_to_file: false,
                ..AuditConfig::default()
            },
        );
        let identity =
            Arc::new(RelicIdentity::new(&IntegritySecret::from_bytes([4; SECRET_LEN])).unwrap());
        let notifier = Arc::new(RecordingNotifier::new());
        let notices = NoticeConfig {
            public_on_slot_open: true,
            ..NoticeConfig::default()
        };
        let detector = Detector::new(identity.clone(), audit.clone(), notifier.clone(), &notices);
        let scanner = Scanner::new(config, notices, detector, audit, notifier.clone(), 7, 0);
        let alice = HolderRef::new(HolderId::from_seed(1), "alice");
        let mut world = MemoryWorld::new();
        world.connect(alice.clone(), pos(0, 0));
        Fixture {
            scanner,
            identity,
            notifier,
            registry: Registry::new("MC", writer),
            world,
            capacity: CapacityConfig::default(),
            alice,
            now: 1_000,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(ScanConfig {
            regions_per_tick: 1,
            missed_scans_to_destroy: 2,
            ..ScanConfig::default()
        })
    }

    impl Fixture {
        fn issue(&mut self, placement: Placement) -> ItemStack {
            let id = self.registry.allocate_id();
            let mut item = ItemStack::blank_relic();
            self.identity.stamp(&mut item, &id, RelicClass::Restricted, 1);
            self.registry
                .register(RelicRecord::issued(&id, RelicClass::Restricted, 1, None, &placement))
                .unwrap();
            item
        }

        fn held(&self) -> Placement {
            Placement::new(LocationKind::HeldInventory, pos(0, 0)).with_holder(Some(self.alice.clone()))
        }

        fn tick(&mut self) -> Option<ScanReport> {
            self.now += 1;
            let mut cx = ScanContext {
                registry: &mut self.registry,
                world: &mut self.world,
                capacity: &self.capacity,
                now: self.now,
            };
            self.scanner.tick(&mut cx)
        }

        /// Runs a full scan to completion.
        fn scan(&mut self) -> ScanReport {
            self.now += 1;
            let mut cx = ScanContext {
                registry: &mut self.registry,
                world: &mut self.world,
                capacity: &self.capacity,
                now: self.now,
            };
            self.scanner.run_immediate(Some("test"), &mut cx).unwrap();
            loop {
                if let Some(report) = self.tick() {
                    return report;
                }
            }
        }

        fn record(&self, item: &ItemStack) -> &RelicRecord {
            self.registry.get(item.relic_id().unwrap()).unwrap()
        }
    }

    #[test]
    fn test_schedule_within_bounds() {
        let mut fx = fixture();
        for _ in 0..50 {
            let next = fx.scanner.schedule_next(100);
            assert!((100 + 7200..=100 + 21600).contains(&next));
        }
    }

    #[test]
    fn test_scan_spreads_regions_across_ticks() {
        let mut fx = fixture();
        fx.world.place_container(pos(0, 0), ContainerKind::Chest);
        fx.world.place_container(pos(40, 40), ContainerKind::Chest);
        fx.world.place_container(pos(80, 80), ContainerKind::Chest);

        let mut cx = ScanContext {
            registry: &mut fx.registry,
            world: &mut fx.world,
            capacity: &fx.capacity,
            now: 5,
        };
        assert_eq!(fx.scanner.run_immediate(None, &mut cx), Ok(()));
        assert_eq!(fx.scanner.phase(), Some(ScanPhase::Regions));
        assert_eq!(
            fx.scanner.run_immediate(None, &mut cx),
            Err(ScanError::AlreadyInProgress)
        );

        // Three loaded regions, one per tick; the last tick also finishes
        assert!(fx.tick().is_none());
        assert!(fx.tick().is_none());
        let report = fx.tick().unwrap();
        assert_eq!(report.regions_swept, 3);
        assert!(!fx.scanner.is_running());
        assert!(fx.scanner.last_completed_at().is_some());
    }

    #[test]
    fn test_scheduled_scan_starts_when_due() {
        let mut fx = fixture();
        assert!(fx.tick().is_none());
        assert!(!fx.scanner.is_running());

        fx.now = fx.scanner.next_scheduled_at();
        fx.tick();
        assert!(fx.scanner.is_running());
    }

    #[test]
    fn test_verified_relics_reset_and_stamp() {
        let mut fx = fixture();
        let placement = fx.held();
        let item = fx.issue(placement);
        fx.world.give(fx.alice.id, item.clone());
        fx.registry.set_missing_scan_count(item.relic_id().unwrap(), 1);

        let report = fx.scan();
        assert_eq!(report.verified, 1);
        assert!(report.missing.is_empty());
        let record = fx.record(&item);
        assert_eq!(record.missing_scan_count, 0);
        assert_eq!(record.last_verified_at, fx.now);
    }

    #[test]
    fn test_missing_relic_converges_to_destroyed() {
        let mut fx = fixture();
        fx.world.place_container(pos(16, 16), ContainerKind::Chest);
        let item = fx.issue(Placement::new(LocationKind::Container, pos(16, 16)));

        let first = fx.scan();
        assert_eq!(first.missing, vec![item.relic_id().unwrap().to_string()]);
        assert_eq!(fx.record(&item).missing_scan_count, 1);
        assert_eq!(fx.record(&item).status, RelicStatus::Active);

        let second = fx.scan();
        assert_eq!(second.destroyed, vec![item.relic_id().unwrap().to_string()]);
        assert_eq!(fx.record(&item).status, RelicStatus::Destroyed);
        assert!(fx.notifier.broadcasts().iter().any(|b| b.contains("slot has opened")));
    }

    #[test]
    fn test_inaccessible_relics_are_exempt() {
        let mut fx = fixture();
        let bob = HolderRef::new(HolderId::from_seed(2), "bob");
        let offline = fx.issue(
            Placement::new(LocationKind::OfflineHolder, pos(0, 0)).with_holder(Some(bob)),
        );
        let unloaded = fx.issue(Placement::new(LocationKind::Container, pos(500, 500)));

        for _ in 0..3 {
            let report = fx.scan();
            assert_eq!(report.skipped, 2);
            assert!(report.missing.is_empty());
        }
        assert_eq!(fx.record(&offline).status, RelicStatus::Active);
        assert_eq!(fx.record(&unloaded).missing_scan_count, 0);
    }

    #[test]
    fn test_double_container_swept_once() {
        let mut fx = fixture();
        let canonical = fx
            .world
            .place_double_container(pos(2, 0), pos(3, 0), ContainerKind::Chest);
        let item = fx.issue(Placement::new(LocationKind::Container, canonical.clone()));
        fx.world.put(&canonical, item.clone());

        let report = fx.scan();
        assert_eq!(report.duplicates_scheduled, 0);
        assert_eq!(report.verified, 1);
        assert_eq!(fx.scanner.pending_removals(), 0);
    }

    #[test]
    fn test_duplicates_keep_recorded_copy() {
        let mut fx = fixture();
        fx.world.place_container(pos(1, 1), ContainerKind::Chest);
        fx.world.place_container(pos(20, 20), ContainerKind::Barrel);
        let item = fx.issue(Placement::new(LocationKind::Container, pos(20, 20)));
        let id = item.relic_id().unwrap().to_string();
        fx.world.put(&pos(1, 1), item.clone());
        fx.world.put(&pos(20, 20), item.clone());

        let report = fx.scan();
        assert_eq!(report.duplicates_scheduled, 1);
        assert_eq!(fx.record(&item).location.position(), Some(pos(20, 20)));
        // Removal happens on the following tick
        assert_eq!(fx.world.count_relic(&id), 2);
        fx.tick();
        assert_eq!(fx.world.count_relic(&id), 1);
        assert!(fx
            .world
            .contents(&InventoryRef::Block(pos(20, 20)))
            .unwrap()
            .iter()
            .flatten()
            .any(|i| i.relic_id() == Some(id.as_str())));
    }

    #[test]
    fn test_pending_removal_skips_moved_item() {
        let mut fx = fixture();
        fx.world.place_container(pos(1, 1), ContainerKind::Chest);
        fx.world.place_container(pos(20, 20), ContainerKind::Chest);
        let item = fx.issue(Placement::new(LocationKind::Container, pos(20, 20)));
        let id = item.relic_id().unwrap().to_string();
        let slot = fx.world.put(&pos(1, 1), item.clone()).unwrap();
        fx.world.put(&pos(20, 20), item.clone());

        fx.scan();
        // Someone takes the extra copy before the removal tick
        fx.world.take_slot(&InventoryRef::Block(pos(1, 1)), slot);
        fx.tick();
        assert_eq!(fx.world.count_relic(&id), 1);
    }

    #[test]
    fn test_scan_confiscates_forgeries() {
        let mut fx = fixture();
        let placement = fx.held();
        let item = fx.issue(placement);
        let mut forged = item.clone();
        forged.tags.signature = Some("00".repeat(32));
        fx.world.give(fx.alice.id, item.clone());
        fx.world.spawn_dropped(forged, pos(4, 4));
        fx.world.spawn_dropped(ItemStack::blank_relic(), pos(5, 5));

        let report = fx.scan();
        assert_eq!(report.confiscated, 2);
        assert_eq!(report.verified, 1);
        assert!(fx.world.free_entities().is_empty());
    }

    #[test]
    fn test_dropped_and_vehicle_items_are_seen() {
        let mut fx = fixture();
        let dropped = fx.issue(Placement::new(LocationKind::GroundEntity, pos(8, 8)));
        let carted = fx.issue(Placement::new(LocationKind::VehicleChest, pos(9, 9)));
        fx.world.spawn_dropped(dropped.clone(), pos(8, 8));
        let cart = fx.world.spawn_vehicle(ContainerKind::VehicleChest, pos(30, 30));
        fx.world.insert(&InventoryRef::Entity(cart), carted.clone());

        let report = fx.scan();
        assert_eq!(report.verified, 2);
        let location = &fx.record(&carted).location;
        assert_eq!(location.kind, LocationKind::VehicleChest);
        assert_eq!(location.position(), Some(pos(30, 30)));
    }

    #[test]
    fn test_abandon_running_scan() {
        let mut fx = fixture();
        fx.world.place_container(pos(40, 40), ContainerKind::Chest);
        let mut cx = ScanContext {
            registry: &mut fx.registry,
            world: &mut fx.world,
            capacity: &fx.capacity,
            now: 5,
        };
        fx.scanner.run_immediate(None, &mut cx).unwrap();
        assert!(fx.scanner.abandon());
        assert!(!fx.scanner.is_running());
        assert!(!fx.scanner.abandon());
    }
}
