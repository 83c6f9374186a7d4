// src/process.rs

//! Introspection run orchestration
//!
//! [`Introspector`] ties the pieces together: payloads run through the hook
//! pipeline, correlate against the node cache, take the per-node lease and
//! then walk the updater state machine against the fleet API. All payload
//! validation happens before anything external is mutated, so a rejected
//! payload leaves no trace outside the log.

use crate::config::Config;
use crate::db::{NodeInfo, Store};
use crate::error::{Error, Result};
use crate::fleet::{FleetClient, FleetError, FleetNode, FleetPort};
use crate::hooks::{HookPipeline, HookRegistry};
use crate::inventory::InventoryPayload;
use crate::lock::LockManager;
use crate::patch::PatchOp;
use crate::rules::RulesEngine;
use serde_json::Value;
use std::sync::Arc;
use strum_macros::Display;
use tracing::{debug, info, warn};

/// Steps of the node updater. Logged on entry so a stuck run can be placed
/// from the log alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
enum UpdaterState {
    Fetching,
    ApplyingBaseProperties,
    AwaitingPowerOff,
    CreatingPorts,
    ApplyingPatches,
    PoweringOff,
}

/// The introspection service core. One instance serves all nodes; runs for
/// different nodes proceed in parallel, runs for the same node are
/// serialized by the lease manager.
pub struct Introspector {
    config: Config,
    store: Arc<Store>,
    locks: LockManager,
    pipeline: HookPipeline,
    engine: RulesEngine,
    client: Arc<dyn FleetClient>,
}

impl Introspector {
    /// Build a service with the standard hook set.
    pub fn new(config: Config, store: Arc<Store>, client: Arc<dyn FleetClient>) -> Result<Self> {
        Self::with_registry(config, store, client, &HookRegistry::standard())
    }

    /// Build a service resolving hooks against a caller-provided registry.
    pub fn with_registry(
        config: Config,
        store: Arc<Store>,
        client: Arc<dyn FleetClient>,
        registry: &HookRegistry,
    ) -> Result<Self> {
        let pipeline = registry.pipeline(&config)?;
        Ok(Self {
            locks: LockManager::new(config.timeout),
            engine: RulesEngine::new(config.strict_rules),
            config,
            store,
            pipeline,
            client,
        })
    }

    /// Register a node for introspection. Replaces any previous session and
    /// invalidates its lease.
    pub fn register_node(
        &self,
        uuid: &str,
        bmc_address: Option<&str>,
        macs: &[String],
    ) -> Result<NodeInfo> {
        self.locks.clear(uuid);
        self.store.register_node(uuid, bmc_address, macs)
    }

    /// Close sessions that exceeded the introspection timeout.
    pub fn clean_up(&self) -> Result<Vec<String>> {
        self.store.clean_up(self.config.timeout)
    }

    /// The backing node cache and rule storage.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Process one inventory payload end to end, returning the fleet node
    /// as last written.
    pub fn process(&self, data: Value) -> Result<FleetNode> {
        let mut payload = InventoryPayload::from_value(data)?;
        let base_patch = self.pipeline.run_before(&mut payload)?;

        let info = self
            .store
            .find_node(payload.bmc_address.as_deref(), &payload.macs)?;
        // The guard frees the node on every exit from this scope, including
        // unwinding out of a hook and a failing finish_node.
        let Some(_lease) = self.locks.acquire_guard(&info.uuid) else {
            return Err(Error::NotRegistered(format!(
                "node {} is locked by a concurrent introspection run",
                info.uuid
            )));
        };
        info!("Processing introspection data for node {}", info.uuid);

        let result = self.process_node(&info, &payload, base_patch);
        match &result {
            Ok(_) => {
                self.store.finish_node(&info.uuid, None)?;
                info!("Introspection finished for node {}", info.uuid);
            }
            Err(e) => {
                self.store.finish_node(&info.uuid, Some(&e.to_string()))?;
                warn!("Introspection failed for node {}: {}", info.uuid, e);
            }
        }
        result
    }

    /// The leased part of a run: everything that talks to the fleet API.
    fn process_node(
        &self,
        info: &NodeInfo,
        payload: &InventoryPayload,
        base_patch: Vec<PatchOp>,
    ) -> Result<FleetNode> {
        let uuid = &info.uuid;

        self.enter(uuid, UpdaterState::Fetching);
        let mut node = self.fetch(uuid)?;

        self.enter(uuid, UpdaterState::ApplyingBaseProperties);
        if !base_patch.is_empty() {
            node = self.update_node(uuid, &base_patch)?;
        }

        self.enter(uuid, UpdaterState::AwaitingPowerOff);
        let timeout = chrono::Duration::from_std(self.config.timeout)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        while !node.is_powered_off() {
            if info.elapsed() > timeout {
                // The node may still power off on its own later; the base
                // properties are committed, so the run still counts.
                warn!(
                    "Node {} still powered on after the introspection timeout, \
                     deferring port creation and post-processing",
                    uuid
                );
                return Ok(node);
            }
            std::thread::sleep(self.config.power_poll_interval);
            node = self.fetch(uuid)?;
        }

        self.enter(uuid, UpdaterState::CreatingPorts);
        let ports = self.create_ports(uuid, &payload.macs)?;

        self.enter(uuid, UpdaterState::ApplyingPatches);
        let (mut node_patch, port_patches) = self.pipeline.run_after(&node, &ports, payload)?;
        let rules = self.store.list_rules()?;
        node_patch.extend(self.engine.evaluate(&rules, &node, payload)?);
        if !node_patch.is_empty() {
            node = self.update_node(uuid, &node_patch)?;
        }
        // Separate update flipping the discovery status markers, so
        // operators can tell freshly-discovered nodes apart.
        node = self.update_node(uuid, &discovery_status_patch())?;
        for (mac, ops) in &port_patches {
            match ports.iter().find(|port| &port.address == mac) {
                Some(port) if !ops.is_empty() => {
                    self.client
                        .update_port(&port.uuid, ops)
                        .map_err(|e| Error::FleetError(e.to_string()))?;
                }
                Some(_) => {}
                None => warn!("Discarding patch for unknown port {} of node {}", mac, uuid),
            }
        }

        if self.config.power_off_after_discovery {
            self.enter(uuid, UpdaterState::PoweringOff);
            self.client.set_power_state(uuid, "off").map_err(|e| {
                Error::PowerOffFailed(format!("{} ({})", uuid, e))
            })?;
        }

        Ok(node)
    }

    fn enter(&self, uuid: &str, state: UpdaterState) {
        debug!("Node {} entering {} state", uuid, state);
    }

    fn fetch(&self, uuid: &str) -> Result<FleetNode> {
        self.client.get_node(uuid).map_err(|e| match e {
            FleetError::NotFound(_) => Error::ExternalNotFound(uuid.to_string()),
            other => Error::FleetError(other.to_string()),
        })
    }

    fn update_node(&self, uuid: &str, patch: &[PatchOp]) -> Result<FleetNode> {
        self.client
            .update_node(uuid, patch)
            .map_err(|e| Error::FleetError(e.to_string()))
    }

    /// Create one port per discovered MAC. A MAC that already has a port is
    /// somebody else's record; it is logged and skipped, never overwritten.
    fn create_ports(&self, uuid: &str, macs: &[String]) -> Result<Vec<FleetPort>> {
        let mut ports = Vec::with_capacity(macs.len());
        for mac in macs {
            match self.client.create_port(uuid, mac) {
                Ok(port) => ports.push(port),
                Err(FleetError::Conflict(_)) => {
                    warn!("Port for MAC {} already exists, skipping", mac);
                }
                Err(e) => return Err(Error::FleetError(e.to_string())),
            }
        }
        Ok(ports)
    }
}

/// Status markers written once discovery succeeds: the node is flagged as
/// newly discovered and the pre-discovery marker is cleared.
fn discovery_status_patch() -> Vec<PatchOp> {
    vec![
        PatchOp::add("/extra/newly_discovered", "true"),
        PatchOp::remove("/extra/on_discovery"),
    ]
}
