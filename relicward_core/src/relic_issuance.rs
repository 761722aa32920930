//! Capacity-checked issuance of new relics.
//!
//! Check, allocate, stamp and register run under one exclusive borrow of the
//! registry, so two requests in the same tick can never both take the last
//! slot of a class. A rejected request consumes no id.

use crate::config::{CapacityConfig, NoticeConfig};
use crate::notify::{Census, Notifier};
use crate::relic_audit::{AuditEvent, AuditKind, AuditLog};
use crate::relic_identity::{RelicClass, RelicIdentity};
use crate::relic_registry::{LocationKind, Placement, Registry, RegistryError, RelicRecord};
use crate::world::{BlockPos, ContainerKind, ItemStack};
use relicward_env::HolderRef;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("{class} capacity reached ({active}/{capacity})")]
    CapacityReached {
        class: RelicClass,
        active: usize,
        capacity: usize,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueOrigin {
    /// Produced through normal play; announced publicly.
    Crafted,
    /// Handed out by an operator.
    Granted,
}

#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub class: RelicClass,
    pub recipient: HolderRef,
    pub position: BlockPos,
    pub origin: IssueOrigin,
    /// Operator behind a grant; the recipient otherwise.
    pub issued_by: Option<HolderRef>,
}

impl IssueRequest {
    pub fn crafted(class: RelicClass, recipient: HolderRef, position: BlockPos) -> Self {
        Self {
            class,
            recipient,
            position,
            origin: IssueOrigin::Crafted,
            issued_by: None,
        }
    }

    pub fn granted(
        class: RelicClass,
        recipient: HolderRef,
        position: BlockPos,
        operator: Option<HolderRef>,
    ) -> Self {
        Self {
            class,
            recipient,
            position,
            origin: IssueOrigin::Granted,
            issued_by: operator,
        }
    }
}

pub struct Issuer {
    identity: Arc<RelicIdentity>,
    audit: AuditLog,
    notifier: Arc<dyn Notifier>,
    notices: NoticeConfig,
}

impl Issuer {
    pub fn new(
        identity: Arc<RelicIdentity>,
        audit: AuditLog,
        notifier: Arc<dyn Notifier>,
        notices: NoticeConfig,
    ) -> Self {
        Self {
            identity,
            audit,
            notifier,
            notices,
        }
    }

    /// True if one more relic of `class` fits under its cap.
    pub fn can_issue(registry: &Registry, capacity: &CapacityConfig, class: RelicClass) -> bool {
        registry.active_count(class) < capacity.of(class)
    }

    /// Creates, stamps and registers a relic held by the recipient.
    ///
    /// Takes the registry mutably for the whole check-then-register sequence.
    pub fn issue(
        &self,
        registry: &mut Registry,
        capacity: &CapacityConfig,
        request: &IssueRequest,
        now: i64,
    ) -> Result<ItemStack, IssueError> {
        let class = request.class;
        let active = registry.active_count(class);
        let cap = capacity.of(class);
        if active >= cap {
            info!(
                "Refused {} relic for {}: {}/{} active",
                class, request.recipient.name, active, cap
            );
            return Err(IssueError::CapacityReached {
                class,
                active,
                capacity: cap,
            });
        }

        let id = registry.allocate_id();
        let mut item = ItemStack::blank_relic();
        self.identity.stamp(&mut item, &id, class, now);

        let placement = Placement::new(LocationKind::HeldInventory, request.position.clone())
            .with_holder(Some(request.recipient.clone()))
            .with_container(ContainerKind::PlayerInventory.label());
        let created_by = request
            .issued_by
            .clone()
            .unwrap_or_else(|| request.recipient.clone());
        registry.register(RelicRecord::issued(&id, class, now, Some(created_by.clone()), &placement))?;

        let (kind, verb) = match request.origin {
            IssueOrigin::Crafted => (AuditKind::Crafted, "Crafted"),
            IssueOrigin::Granted => (AuditKind::Issued, "Granted"),
        };
        self.audit.record(
            AuditEvent::new(&id, kind, now)
                .detail(format!("{} {} relic for {}", verb, class, request.recipient.name))
                .actor(Some(&created_by))
                .position(Some(&request.position)),
        );
        info!("{} relic {} ({}) for {}", verb, id, class, request.recipient.name);

        if self.notices.ops_on_issue {
            self.notifier.ops_alert(&format!(
                "[Relicward] {} {} relic {} for {} ({}/{})",
                verb,
                class,
                id,
                request.recipient.name,
                active + 1,
                cap
            ));
        }
        if request.origin == IssueOrigin::Crafted && self.notices.public_on_issue {
            let census = Census::take(registry, capacity);
            self.notifier.public_broadcast(&census.render(
                &self.notices.public_issue_template,
                Some(&request.recipient.name),
                Some(class),
            ));
        }
        Ok(item)
    }
}
