//! Status bridge.
//!
//! # Responsibilities
//! - Apply status transitions to the registry entry, forward-only
//! - Forward each applied transition to the registered sink, if any
//! - Swap the sink atomically while reports are in flight
//!
//! # Design Decisions
//! - The sink runs outside every lock, so it may call back into the manager
//! - A report for a removed (or replaced) slot is dropped silently

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::instance::Status;
use crate::manager::registry::{InstanceSlot, Registry};
use crate::observability::metrics;

/// Receives `(instance, status, detail)` for every applied transition.
pub trait StatusSink: Send + Sync {
    fn on_status(&self, instance: &str, status: Status, detail: &str);
}

impl<F> StatusSink for F
where
    F: Fn(&str, Status, &str) + Send + Sync,
{
    fn on_status(&self, instance: &str, status: Status, detail: &str) {
        self(instance, status, detail)
    }
}

struct SinkHandle(Arc<dyn StatusSink>);

/// Registry-backed status reporting with an optional external sink.
pub struct StatusBridge {
    registry: Arc<Registry>,
    sink: ArcSwapOption<SinkHandle>,
}

impl StatusBridge {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            sink: ArcSwapOption::empty(),
        }
    }

    pub fn set_sink(&self, sink: Arc<dyn StatusSink>) {
        self.sink.store(Some(Arc::new(SinkHandle(sink))));
    }

    pub fn remove_sink(&self) {
        self.sink.store(None);
    }

    pub fn has_sink(&self) -> bool {
        self.sink.load().is_some()
    }

    /// Report by name. Returns whether the transition was applied.
    pub fn report(&self, instance: &str, status: Status, detail: &str) -> bool {
        match self.registry.get(instance) {
            Some(slot) => self.report_slot(&slot, status, detail),
            None => false,
        }
    }

    /// Report for a specific run of an instance.
    pub(crate) fn report_slot(&self, slot: &Arc<InstanceSlot>, status: Status, detail: &str) -> bool {
        if !self.registry.contains(slot) {
            tracing::trace!(instance = %slot.name(), status = %status, "Dropping report for removed instance");
            return false;
        }

        {
            let mut state = slot.state();
            if let Some(current) = state.status {
                if !current.can_transition_to(status) {
                    tracing::trace!(
                        instance = %slot.name(),
                        current = %current,
                        requested = %status,
                        "Ignoring backward status transition"
                    );
                    return false;
                }
            }
            state.status = Some(status);
            if status == Status::Error {
                state.last_error = Some(detail.to_string());
            }
        }

        metrics::record_status(status);
        tracing::debug!(instance = %slot.name(), status = %status, detail, "Status changed");

        if let Some(sink) = self.sink.load_full() {
            sink.0.on_status(slot.name(), status, detail);
        }
        true
    }
}
