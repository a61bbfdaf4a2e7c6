//! Monitor registration table and dispatch.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use collectd_types::MonitorId;

use crate::decode::RoutedBatch;
use crate::output::Output;

/// What the supervisor knows about one active monitor.
#[derive(Clone)]
pub struct MonitorRegistration {
    output: Weak<dyn Output>,
    uses_shared_subsystem: bool,
}

impl MonitorRegistration {
    /// The monitor's output, if it is still alive.
    pub fn output(&self) -> Option<Arc<dyn Output>> {
        self.output.upgrade()
    }

    /// Whether the monitor needs the embedded JVM plugin.
    pub fn uses_shared_subsystem(&self) -> bool {
        self.uses_shared_subsystem
    }
}

impl std::fmt::Debug for MonitorRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorRegistration")
            .field("alive", &(self.output.strong_count() > 0))
            .field("uses_shared_subsystem", &self.uses_shared_subsystem)
            .finish()
    }
}

/// Outcome of dispatching one [`RoutedBatch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Elements handed to a live output.
    pub delivered: usize,
    /// Elements for unknown monitors or dead outputs.
    pub dropped: usize,
}

/// Monitor id to registration.
#[derive(Debug, Default)]
pub struct RegistrationTable {
    entries: BTreeMap<MonitorId, MonitorRegistration>,
}

impl RegistrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a monitor. Returns `true` if the id was new.
    pub fn insert(
        &mut self,
        id: MonitorId,
        output: &Arc<dyn Output>,
        uses_shared_subsystem: bool,
    ) -> bool {
        self.entries
            .insert(
                id,
                MonitorRegistration {
                    output: Arc::downgrade(output),
                    uses_shared_subsystem,
                },
            )
            .is_none()
    }

    pub fn get(&self, id: &MonitorId) -> Option<&MonitorRegistration> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &MonitorId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn remove(&mut self, id: &MonitorId) -> Option<MonitorRegistration> {
        self.entries.remove(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear a monitor's shared-subsystem flag ahead of its removal.
    pub fn release_shared_subsystem(&mut self, id: &MonitorId) {
        if let Some(reg) = self.entries.get_mut(id) {
            reg.uses_shared_subsystem = false;
        }
    }

    /// Whether any registered monitor needs the embedded JVM plugin.
    pub fn has_shared_subsystem_user(&self) -> bool {
        self.entries.values().any(|r| r.uses_shared_subsystem)
    }

    /// Hand each monitor its slice of `batch`.
    ///
    /// Each live monitor gets at most one `send_datapoints` and one
    /// `send_events` call.
    pub fn dispatch(&self, batch: RoutedBatch) -> DispatchReport {
        let mut report = DispatchReport::default();

        for (id, monitor_batch) in batch.monitors {
            let count = monitor_batch.len();

            let Some(registration) = self.entries.get(&id) else {
                tracing::error!(monitor_id = %id, count, "collectd data for unknown monitor, dropping");
                report.dropped += count;
                continue;
            };
            let Some(output) = registration.output() else {
                tracing::error!(monitor_id = %id, count, "monitor output is gone, dropping collectd data");
                report.dropped += count;
                continue;
            };

            if !monitor_batch.datapoints.is_empty() {
                output.send_datapoints(monitor_batch.datapoints);
            }
            if !monitor_batch.events.is_empty() {
                output.send_events(monitor_batch.events);
            }
            report.delivered += count;
        }

        report
    }
}
