use std::collections::HashSet;
use std::sync::PoisonError;
use std::sync::RwLock;

/// Identifiers of devices believed faulty.
///
/// Shared between the health monitor (the only writer) and the inventory
/// builder. Identifiers are never removed: a device marked unhealthy stays
/// quarantined for the lifetime of this state.
#[derive(Debug, Default)]
pub struct HealthState {
    unhealthy: RwLock<HashSet<String>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the device was not already marked.
    pub(crate) fn mark_unhealthy(&self, uuid: &str) -> bool {
        let mut unhealthy = self
            .unhealthy
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        unhealthy.insert(uuid.to_string())
    }

    pub fn is_healthy(&self, uuid: &str) -> bool {
        !self
            .unhealthy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(uuid)
    }

    /// Sorted snapshot of the quarantined identifiers.
    pub fn unhealthy_devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self
            .unhealthy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        devices.sort();
        devices
    }
}
