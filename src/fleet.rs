// src/fleet.rs

//! Fleet-management client boundary
//!
//! The external orchestrator owns the durable node and port records; this
//! crate only talks to it through the [`FleetClient`] trait. All calls are
//! synchronous and may fail with `NotFound` or `Conflict`; how each failure
//! is treated (fatal, logged-and-skipped) is decided by the node updater,
//! not here.

use crate::patch::PatchOp;
use serde_json::Value;
use thiserror::Error;

/// Failures reported by the fleet-management API.
#[derive(Debug, Clone, Error)]
pub enum FleetError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

/// The externally-stored node record, as much of it as the updater and the
/// rules engine consume.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct FleetNode {
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_state: Option<String>,
    #[serde(default)]
    pub properties: serde_json::Map<String, Value>,
    #[serde(default)]
    pub extra: serde_json::Map<String, Value>,
}

impl FleetNode {
    /// Stable "off" power states. Everything else counts as still on.
    pub fn is_powered_off(&self) -> bool {
        matches!(self.power_state.as_deref(), Some("off") | Some("power off"))
    }

    /// JSON view of the node, used by rule `node://` field paths.
    pub fn as_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// One registered network port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetPort {
    pub uuid: String,
    pub address: String,
}

/// Synchronous client for the external fleet-management API.
///
/// Implementations must be shareable across introspection runs; each run is
/// single-threaded, but many nodes are processed in parallel.
pub trait FleetClient: Send + Sync {
    fn get_node(&self, uuid: &str) -> std::result::Result<FleetNode, FleetError>;

    fn update_node(
        &self,
        uuid: &str,
        patch: &[PatchOp],
    ) -> std::result::Result<FleetNode, FleetError>;

    fn create_port(
        &self,
        node_uuid: &str,
        address: &str,
    ) -> std::result::Result<FleetPort, FleetError>;

    fn update_port(
        &self,
        port_uuid: &str,
        patch: &[PatchOp],
    ) -> std::result::Result<(), FleetError>;

    fn set_power_state(&self, uuid: &str, state: &str) -> std::result::Result<(), FleetError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording fake of the fleet API for unit tests.

    use super::*;
    use crate::patch::PatchOp;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    #[derive(Debug, Default)]
    struct FakeState {
        get_count: usize,
        node_updates: Vec<(String, Vec<PatchOp>)>,
        created_ports: Vec<FleetPort>,
        port_updates: Vec<(String, Vec<PatchOp>)>,
        power_calls: Vec<(String, String)>,
    }

    /// In-memory fleet API. Behavior knobs mirror the failure modes the
    /// updater has to tolerate.
    pub struct FakeFleet {
        node: FleetNode,
        /// Number of `get_node` calls that still report power on before the
        /// node reads "power off".
        power_off_after: usize,
        /// MACs whose port creation fails with `Conflict`.
        conflicting_macs: HashSet<String>,
        /// Make `set_power_state` fail with `Conflict`.
        reject_power_off: bool,
        /// Make `get_node` fail with `NotFound`.
        node_missing: bool,
        state: Mutex<FakeState>,
    }

    impl FakeFleet {
        pub fn new(uuid: &str) -> Self {
            Self {
                node: FleetNode {
                    uuid: uuid.to_string(),
                    power_state: Some("power on".to_string()),
                    ..Default::default()
                },
                power_off_after: 0,
                conflicting_macs: HashSet::new(),
                reject_power_off: false,
                node_missing: false,
                state: Mutex::new(FakeState::default()),
            }
        }

        pub fn with_node(mut self, node: FleetNode) -> Self {
            self.node = node;
            self
        }

        /// Simulate a long power-off: the first `count` fetches report the
        /// node still on.
        pub fn power_off_after(mut self, count: usize) -> Self {
            self.power_off_after = count;
            self
        }

        pub fn conflict_on_port(mut self, mac: &str) -> Self {
            self.conflicting_macs.insert(mac.to_string());
            self
        }

        pub fn reject_power_off(mut self) -> Self {
            self.reject_power_off = true;
            self
        }

        pub fn node_missing(mut self) -> Self {
            self.node_missing = true;
            self
        }

        fn current_node(&self, fetches_done: usize) -> FleetNode {
            let mut node = self.node.clone();
            if fetches_done > self.power_off_after {
                node.power_state = Some("power off".to_string());
            }
            node
        }

        pub fn get_count(&self) -> usize {
            self.state.lock().get_count
        }

        pub fn node_updates(&self) -> Vec<(String, Vec<PatchOp>)> {
            self.state.lock().node_updates.clone()
        }

        pub fn created_ports(&self) -> Vec<FleetPort> {
            self.state.lock().created_ports.clone()
        }

        pub fn port_updates(&self) -> Vec<(String, Vec<PatchOp>)> {
            self.state.lock().port_updates.clone()
        }

        pub fn power_calls(&self) -> Vec<(String, String)> {
            self.state.lock().power_calls.clone()
        }
    }

    impl FleetClient for FakeFleet {
        fn get_node(&self, uuid: &str) -> std::result::Result<FleetNode, FleetError> {
            if self.node_missing || uuid != self.node.uuid {
                return Err(FleetError::NotFound(uuid.to_string()));
            }
            let mut state = self.state.lock();
            state.get_count += 1;
            let fetches = state.get_count;
            drop(state);
            Ok(self.current_node(fetches))
        }

        fn update_node(
            &self,
            uuid: &str,
            patch: &[PatchOp],
        ) -> std::result::Result<FleetNode, FleetError> {
            if uuid != self.node.uuid {
                return Err(FleetError::NotFound(uuid.to_string()));
            }
            let mut state = self.state.lock();
            state.node_updates.push((uuid.to_string(), patch.to_vec()));
            let fetches = state.get_count;
            drop(state);
            Ok(self.current_node(fetches))
        }

        fn create_port(
            &self,
            node_uuid: &str,
            address: &str,
        ) -> std::result::Result<FleetPort, FleetError> {
            let _ = node_uuid;
            if self.conflicting_macs.contains(address) {
                return Err(FleetError::Conflict(format!(
                    "port with address {} already exists",
                    address
                )));
            }
            let mut state = self.state.lock();
            let port = FleetPort {
                uuid: format!("port-{}", state.created_ports.len()),
                address: address.to_string(),
            };
            state.created_ports.push(port.clone());
            Ok(port)
        }

        fn update_port(
            &self,
            port_uuid: &str,
            patch: &[PatchOp],
        ) -> std::result::Result<(), FleetError> {
            self.state
                .lock()
                .port_updates
                .push((port_uuid.to_string(), patch.to_vec()));
            Ok(())
        }

        fn set_power_state(
            &self,
            uuid: &str,
            state: &str,
        ) -> std::result::Result<(), FleetError> {
            self.state
                .lock()
                .power_calls
                .push((uuid.to_string(), state.to_string()));
            if self.reject_power_off {
                return Err(FleetError::Conflict("node is busy".to_string()));
            }
            Ok(())
        }
    }
}
