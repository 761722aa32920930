//! Operator and population notifications.
//!
//! The core only emits text; delivery belongs to whoever implements [`Notifier`].

use crate::config::{CapacityConfig, NoticeConfig};
use crate::relic_identity::RelicClass;
use crate::relic_registry::Registry;
use parking_lot::Mutex;
use tracing::{info, warn};

/// Outbound notification callbacks.
pub trait Notifier: Send + Sync {
    /// Message for server operators.
    fn ops_alert(&self, text: &str);

    /// Message for every connected holder.
    fn public_broadcast(&self, text: &str);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn ops_alert(&self, text: &str) {
        warn!(target: "relicward::ops", "{}", text);
    }

    fn public_broadcast(&self, text: &str) {
        info!(target: "relicward::broadcast", "{}", text);
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    ops: Mutex<Vec<String>>,
    public: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops_alerts(&self) -> Vec<String> {
        self.ops.lock().clone()
    }

    pub fn broadcasts(&self) -> Vec<String> {
        self.public.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn ops_alert(&self, text: &str) {
        self.ops.lock().push(text.to_string());
    }

    fn public_broadcast(&self, text: &str) {
        self.public.lock().push(text.to_string());
    }
}

/// Active counts against caps, for message templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Census {
    pub restricted_count: usize,
    pub restricted_max: usize,
    pub unrestricted_count: usize,
    pub unrestricted_max: usize,
}

impl Census {
    pub fn take(registry: &Registry, capacity: &CapacityConfig) -> Self {
        Self {
            restricted_count: registry.active_count(RelicClass::Restricted),
            restricted_max: capacity.restricted,
            unrestricted_count: registry.active_count(RelicClass::Unrestricted),
            unrestricted_max: capacity.unrestricted,
        }
    }

    /// Substitutes every known placeholder in `template`.
    pub fn render(&self, template: &str, player: Option<&str>, class: Option<RelicClass>) -> String {
        template
            .replace("{player}", player.unwrap_or("Unknown"))
            .replace("{class}", class.map(|c| c.display_name()).unwrap_or("Unknown"))
            .replace("{restricted_count}", &self.restricted_count.to_string())
            .replace("{restricted_max}", &self.restricted_max.to_string())
            .replace("{unrestricted_count}", &self.unrestricted_count.to_string())
            .replace("{unrestricted_max}", &self.unrestricted_max.to_string())
            .replace(
                "{total_count}",
                &(self.restricted_count + self.unrestricted_count).to_string(),
            )
            .replace("{total_max}", &(self.restricted_max + self.unrestricted_max).to_string())
    }
}

/// Public notice that a class has room again, if enabled.
pub fn announce_slot_open(
    notifier: &dyn Notifier,
    notices: &NoticeConfig,
    registry: &Registry,
    capacity: &CapacityConfig,
    class: RelicClass,
) {
    if !notices.public_on_slot_open {
        return;
    }
    let census = Census::take(registry, capacity);
    notifier.public_broadcast(&census.render(&notices.public_slot_open_template, None, Some(class)));
}
