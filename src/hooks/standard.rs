// src/hooks/standard.rs

//! Built-in processing hooks
//!
//! The default pipeline runs `ramdisk_error`, then `scheduler`, then
//! `validate_interfaces`. The ramdisk error check always comes first so a
//! failed discovery never produces any patches at all.

use crate::error::{Error, Result};
use crate::inventory::{Interface, InventoryPayload, is_valid_mac, normalize_mac};
use crate::patch::PatchOp;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Fails the run when the ramdisk itself reported a discovery error.
pub struct RamdiskErrorHook;

impl super::ProcessingHook for RamdiskErrorHook {
    fn name(&self) -> &'static str {
        "ramdisk_error"
    }

    fn before_processing(&self, payload: &mut InventoryPayload) -> Result<Vec<PatchOp>> {
        if let Some(error) = &payload.error {
            return Err(Error::ValidationError(format!(
                "ramdisk reported error: {}",
                error
            )));
        }
        Ok(Vec::new())
    }
}

/// Emits the base scheduling properties (cpu count, architecture, memory,
/// disk) as an early node patch. Property values are strings on the wire.
pub struct SchedulerHook;

impl super::ProcessingHook for SchedulerHook {
    fn name(&self) -> &'static str {
        "scheduler"
    }

    fn before_processing(&self, payload: &mut InventoryPayload) -> Result<Vec<PatchOp>> {
        let properties: [(&str, Option<String>); 4] = [
            ("cpus", payload.cpus.map(|v| v.to_string())),
            ("cpu_arch", payload.cpu_arch.clone()),
            ("memory_mb", payload.memory_mb.map(|v| v.to_string())),
            ("local_gb", payload.local_gb.map(|v| v.to_string())),
        ];

        let mut patch = Vec::new();
        for (name, value) in properties {
            match value {
                Some(value) => {
                    patch.push(PatchOp::add(format!("/properties/{}", name), value));
                }
                // Validation of required properties belongs to the
                // validate_interfaces hook, which may be configured out.
                None => warn!("No value for scheduling property '{}'", name),
            }
        }
        Ok(patch)
    }
}

/// Validates required hardware properties and normalizes the interface
/// list: invalid or inactive interfaces are dropped, MACs are lowercased
/// and the flat MAC set is recomputed from the survivors.
pub struct ValidateInterfacesHook {
    keep_inactive: bool,
}

impl ValidateInterfacesHook {
    pub fn new(keep_inactive: bool) -> Self {
        Self { keep_inactive }
    }
}

impl super::ProcessingHook for ValidateInterfacesHook {
    fn name(&self) -> &'static str {
        "validate_interfaces"
    }

    fn before_processing(&self, payload: &mut InventoryPayload) -> Result<Vec<PatchOp>> {
        let missing: Vec<&str> = [
            ("cpus", payload.cpus.is_none()),
            ("cpu_arch", payload.cpu_arch.is_none()),
            ("memory_mb", payload.memory_mb.is_none()),
            ("local_gb", payload.local_gb.is_none()),
        ]
        .iter()
        .filter(|(_, absent)| *absent)
        .map(|(name, _)| *name)
        .collect();
        if !missing.is_empty() {
            return Err(Error::ValidationError(format!(
                "missing required parameter(s): {}",
                missing.join(", ")
            )));
        }

        // Deprecated flat-MAC form: synthesize interfaces so the rest of
        // the pipeline sees one shape. There is no IP information in this
        // form, so inactive filtering cannot apply.
        let mut keep_inactive = self.keep_inactive;
        if payload.interfaces.is_empty() && !payload.macs.is_empty() {
            warn!("Payload uses the deprecated flat MAC list");
            payload.interfaces = payload
                .macs
                .iter()
                .enumerate()
                .map(|(i, mac)| {
                    (
                        format!("dummy{}", i),
                        Interface {
                            mac: Some(mac.clone()),
                            ip: None,
                        },
                    )
                })
                .collect();
            keep_inactive = true;
        }

        let mut valid = BTreeMap::new();
        for (name, iface) in std::mem::take(&mut payload.interfaces) {
            let Some(mac) = iface.mac.as_deref() else {
                debug!("Dropping interface {} without a MAC", name);
                continue;
            };
            if !is_valid_mac(mac) {
                warn!("Dropping interface {} with malformed MAC '{}'", name, mac);
                continue;
            }
            if iface.ip.is_none() && !keep_inactive {
                debug!("Dropping inactive interface {}", name);
                continue;
            }
            valid.insert(
                name,
                Interface {
                    mac: Some(normalize_mac(mac)),
                    ip: iface.ip,
                },
            );
        }

        if valid.is_empty() {
            warn!("No valid interfaces in the payload, no ports will be created");
        }

        payload.interfaces = valid;
        payload.recompute_macs();
        Ok(Vec::new())
    }
}
