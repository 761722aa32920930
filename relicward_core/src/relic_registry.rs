//! The "REGISTRY" - authoritative in-memory relic records
//!
//! One record per allocated id, owned exclusively here. Every mutation is a
//! synchronous cache update followed by an asynchronous durable upsert through
//! the writer queue; the store is never consulted to answer a runtime question.

use crate::relic_identity::RelicClass;
use crate::relic_store::{RelicStore, StoreError, WriteHandle, WriteOp};
use crate::world::BlockPos;
use parking_lot::Mutex;
use relicward_env::{HolderId, HolderRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Duplicate relic id: {0}")]
    DuplicateId(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelicStatus {
    Active,
    Missing,
    /// Terminal.
    Destroyed,
    /// Terminal.
    Revoked,
}

impl RelicStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelicStatus::Active => "ACTIVE",
            RelicStatus::Missing => "MISSING",
            RelicStatus::Destroyed => "DESTROYED",
            RelicStatus::Revoked => "REVOKED",
        }
    }

    /// A physically present copy of a dead relic is always a duplicate.
    pub fn is_dead(&self) -> bool {
        matches!(self, RelicStatus::Destroyed | RelicStatus::Revoked)
    }
}

impl std::fmt::Display for RelicStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a relic currently resides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationKind {
    HeldInventory,
    PersonalStore,
    Container,
    GroundEntity,
    DisplayMount,
    Hopper,
    Dropper,
    Dispenser,
    VehicleChest,
    VehicleHopper,
    NestedBox,
    Pouch,
    /// Held by a holder who is not connected.
    OfflineHolder,
    Unknown,
}

impl LocationKind {
    /// Kinds compared by holder identity rather than by coordinates.
    pub fn is_holder_bound(&self) -> bool {
        matches!(
            self,
            LocationKind::HeldInventory | LocationKind::PersonalStore | LocationKind::OfflineHolder
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LocationKind::HeldInventory => "HELD_INVENTORY",
            LocationKind::PersonalStore => "PERSONAL_STORE",
            LocationKind::Container => "CONTAINER",
            LocationKind::GroundEntity => "GROUND_ENTITY",
            LocationKind::DisplayMount => "DISPLAY_MOUNT",
            LocationKind::Hopper => "HOPPER",
            LocationKind::Dropper => "DROPPER",
            LocationKind::Dispenser => "DISPENSER",
            LocationKind::VehicleChest => "VEHICLE_CHEST",
            LocationKind::VehicleHopper => "VEHICLE_HOPPER",
            LocationKind::NestedBox => "NESTED_BOX",
            LocationKind::Pouch => "POUCH",
            LocationKind::OfflineHolder => "OFFLINE_HOLDER",
            LocationKind::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for LocationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recorded location of a relic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelicLocation {
    pub kind: LocationKind,
    pub world: Option<String>,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub holder: Option<HolderRef>,
    pub container: Option<String>,
    pub updated_at: i64,
}

impl RelicLocation {
    pub fn unknown(at: i64) -> Self {
        Self {
            kind: LocationKind::Unknown,
            world: None,
            x: 0,
            y: 0,
            z: 0,
            holder: None,
            container: None,
            updated_at: at,
        }
    }

    pub fn from_placement(placement: &Placement, at: i64) -> Self {
        Self {
            kind: placement.kind,
            world: Some(placement.position.world.clone()),
            x: placement.position.x,
            y: placement.position.y,
            z: placement.position.z,
            holder: placement.holder.clone(),
            container: placement.container.clone(),
            updated_at: at,
        }
    }

    pub fn position(&self) -> Option<BlockPos> {
        self.world
            .as_ref()
            .map(|world| BlockPos::new(world.clone(), self.x, self.y, self.z))
    }

    pub fn holder_id(&self) -> Option<HolderId> {
        self.holder.as_ref().map(|h| h.id)
    }
}

impl std::fmt::Display for RelicLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.world, &self.holder) {
            (Some(world), Some(holder)) => write!(
                f,
                "{} {}@{}({},{},{})",
                self.kind, holder.name, world, self.x, self.y, self.z
            ),
            (Some(world), None) => write!(f, "{} {}({},{},{})", self.kind, world, self.x, self.y, self.z),
            (None, _) => write!(f, "{}", self.kind),
        }
    }
}

/// A freshly observed location, before it is timestamped into a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub kind: LocationKind,
    pub position: BlockPos,
    pub holder: Option<HolderRef>,
    pub container: Option<String>,
}

impl Placement {
    pub fn new(kind: LocationKind, position: BlockPos) -> Self {
        Self {
            kind,
            position,
            holder: None,
            container: None,
        }
    }

    pub fn with_holder(mut self, holder: Option<HolderRef>) -> Self {
        self.holder = holder;
        self
    }

    pub fn with_container(mut self, label: impl Into<String>) -> Self {
        self.container = Some(label.into());
        self
    }

    /// Same physical spot as `location`.
    ///
    /// Holder-bound locations match on holder identity; everything else on
    /// exact position.
    pub fn matches(&self, location: &RelicLocation) -> bool {
        if location.kind.is_holder_bound() {
            if let (Some(known), Some(seen)) = (&location.holder, &self.holder) {
                return known.id == seen.id;
            }
        }
        location.position().as_ref() == Some(&self.position)
    }
}

/// One tracked relic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelicRecord {
    pub id: String,
    pub class: RelicClass,
    pub status: RelicStatus,
    pub created_at: i64,
    pub created_by: Option<HolderRef>,
    pub location: RelicLocation,
    pub missing_scan_count: u32,
    pub last_verified_at: i64,
}

impl RelicRecord {
    /// A newly issued, active relic at `placement`.
    pub fn issued(
        id: impl Into<String>,
        class: RelicClass,
        created_at: i64,
        created_by: Option<HolderRef>,
        placement: &Placement,
    ) -> Self {
        Self {
            id: id.into(),
            class,
            status: RelicStatus::Active,
            created_at,
            created_by,
            location: RelicLocation::from_placement(placement, created_at),
            missing_scan_count: 0,
            last_verified_at: created_at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RelicStatus::Active
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Authoritative relic cache.
pub struct Registry {
    records: HashMap<String, RelicRecord>,

    /// Next numeric suffix to hand out. Guarded for concurrent issuance.
    next_counter: Mutex<u64>,

    /// Id prefix, e.g. "MC" for "MC-0001".
    prefix: String,

    writer: WriteHandle,

    /// Revocations waiting for their holder to reconnect.
    deferred: HashMap<HolderId, Vec<String>>,
}

impl Registry {
    /// An empty registry. The first id has suffix 1.
    pub fn new(prefix: impl Into<String>, writer: WriteHandle) -> Self {
        Self::hydrate(prefix, Vec::new(), None, writer)
    }

    /// Loads every record from the store. Startup only.
    pub fn load(
        store: &dyn RelicStore,
        prefix: impl Into<String>,
        writer: WriteHandle,
    ) -> Result<Self, StoreError> {
        let records = store.load_all()?;
        let counter = store.read_counter()?;
        Ok(Self::hydrate(prefix, records, counter, writer))
    }

    /// Builds the cache from persisted records.
    ///
    /// The counter is re-derived as `max(persisted, 1 + highest suffix)` so a
    /// crash between allocation and counter persistence never reissues an id.
    /// Revoked relics last seen with a disconnected holder are queued again.
    pub fn hydrate(
        prefix: impl Into<String>,
        records: Vec<RelicRecord>,
        persisted_counter: Option<u64>,
        writer: WriteHandle,
    ) -> Self {
        let prefix = prefix.into();
        let highest = records
            .iter()
            .filter_map(|r| Self::parse_suffix(&prefix, &r.id))
            .max()
            .unwrap_or(0);
        let next = persisted_counter.unwrap_or(1).max(highest + 1);
        if persisted_counter.map_or(false, |c| c < highest + 1) {
            warn!(
                "Persisted id counter {:?} behind highest suffix {}; advancing to {}",
                persisted_counter, highest, next
            );
        }

        let mut deferred: HashMap<HolderId, Vec<String>> = HashMap::new();
        for record in &records {
            if record.status == RelicStatus::Revoked
                && record.location.kind == LocationKind::OfflineHolder
            {
                if let Some(holder) = record.location.holder_id() {
                    deferred.entry(holder).or_default().push(record.id.clone());
                }
            }
        }

        let records: HashMap<String, RelicRecord> =
            records.into_iter().map(|r| (r.id.clone(), r)).collect();
        info!(
            "Registry loaded {} relics ({} active), next id suffix {}",
            records.len(),
            records.values().filter(|r| r.is_active()).count(),
            next
        );

        Self {
            records,
            next_counter: Mutex::new(next),
            prefix,
            writer,
            deferred,
        }
    }

    fn parse_suffix(prefix: &str, id: &str) -> Option<u64> {
        id.strip_prefix(prefix)?.strip_prefix('-')?.parse().ok()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    // === Queries ===

    pub fn get(&self, id: &str) -> Option<&RelicRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// O(active set); populations are bounded by the class caps.
    pub fn active_count(&self, class: RelicClass) -> usize {
        self.records
            .values()
            .filter(|r| r.is_active() && r.class == class)
            .count()
    }

    /// Active records, sorted by id.
    pub fn active_records(&self) -> Vec<&RelicRecord> {
        let mut active: Vec<_> = self.records.values().filter(|r| r.is_active()).collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active
    }

    /// Ids of active relics recorded exactly at `position` in a non holder-bound kind.
    pub fn records_at(&self, position: &BlockPos) -> Vec<String> {
        let mut ids: Vec<_> = self
            .records
            .values()
            .filter(|r| r.is_active() && !r.location.kind.is_holder_bound())
            .filter(|r| r.location.position().as_ref() == Some(position))
            .map(|r| r.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Ids of active relics recorded with `holder` in a holder-bound kind.
    pub fn records_held_by(&self, holder: HolderId) -> Vec<String> {
        let mut ids: Vec<_> = self
            .records
            .values()
            .filter(|r| r.is_active() && r.location.kind.is_holder_bound())
            .filter(|r| r.location.holder_id() == Some(holder))
            .map(|r| r.id.clone())
            .collect();
        ids.sort();
        ids
    }

    // === Mutations ===

    /// Inserts a new record. Fails if the id already exists.
    pub fn register(&mut self, record: RelicRecord) -> Result<(), RegistryError> {
        if self.records.contains_key(&record.id) {
            warn!("Refusing to register duplicate relic id {}", record.id);
            return Err(RegistryError::DuplicateId(record.id));
        }
        self.writer.submit(WriteOp::Upsert(record.clone()));
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    /// Applies `f` and queues the durable write. Unknown ids are a no-op.
    fn mutate(&mut self, id: &str, f: impl FnOnce(&mut RelicRecord)) -> bool {
        let Some(record) = self.records.get_mut(id) else {
            debug!("Ignoring update for unknown relic {}", id);
            return false;
        };
        f(record);
        self.writer.submit(WriteOp::Upsert(record.clone()));
        true
    }

    /// Records an observation: new location, `updated_at = now`, missing count reset.
    pub fn update_location(&mut self, id: &str, placement: &Placement, now: i64) -> bool {
        self.mutate(id, |record| {
            record.location = RelicLocation::from_placement(placement, now);
            record.missing_scan_count = 0;
        })
    }

    pub fn set_status(&mut self, id: &str, status: RelicStatus) -> bool {
        self.mutate(id, |record| record.status = status)
    }

    pub fn set_missing_scan_count(&mut self, id: &str, count: u32) -> bool {
        self.mutate(id, |record| record.missing_scan_count = count)
    }

    pub fn set_last_verified_at(&mut self, id: &str, at: i64) -> bool {
        self.mutate(id, |record| record.last_verified_at = at)
    }

    pub fn set_class(&mut self, id: &str, class: RelicClass) -> bool {
        self.mutate(id, |record| record.class = class)
    }

    // === Id allocation ===

    /// Hands out the next id and queues the advanced counter.
    ///
    /// Serialized; an id is never returned twice.
    pub fn allocate_id(&self) -> String {
        let mut next = self.next_counter.lock();
        let suffix = *next;
        *next += 1;
        self.writer.submit(WriteOp::Counter(*next));
        format!("{}-{:04}", self.prefix, suffix)
    }

    /// Suffix the next `allocate_id` will use.
    pub fn next_counter(&self) -> u64 {
        *self.next_counter.lock()
    }

    // === Deferred revocations ===

    pub fn queue_deferred_revocation(&mut self, holder: HolderId, id: impl Into<String>) {
        let id = id.into();
        let queue = self.deferred.entry(holder).or_default();
        if !queue.contains(&id) {
            queue.push(id);
        }
    }

    pub fn pop_deferred_revocations(&mut self, holder: HolderId) -> Vec<String> {
        self.deferred.remove(&holder).unwrap_or_default()
    }

    pub fn has_deferred_revocations(&self, holder: HolderId) -> bool {
        self.deferred.get(&holder).map_or(false, |q| !q.is_empty())
    }
}
