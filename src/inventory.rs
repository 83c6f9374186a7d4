// src/inventory.rs

//! Inventory payload
//!
//! The working document a discovery agent POSTs from the ramdisk. It is
//! threaded mutably through the hook pipeline: hooks normalize interfaces,
//! recompute the MAC set and validate required hardware properties before
//! any external mutation happens.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

static MAC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i)([0-9a-f]{2}:){5}[0-9a-f]{2}$").unwrap());

/// One network interface as reported by the agent. Entries may be partial
/// (no IP, or even an empty object) until `validate_interfaces` has run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// The mutable working data for one introspection run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventoryPayload {
    /// Set by the ramdisk when discovery itself failed; presence
    /// short-circuits processing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// BMC address, used for node correlation.
    #[serde(
        default,
        rename = "ipmi_address",
        skip_serializing_if = "Option::is_none"
    )]
    pub bmc_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_arch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_gb: Option<i64>,

    /// Interface name to interface mapping (preferred form).
    #[serde(default)]
    pub interfaces: BTreeMap<String, Interface>,

    /// Flat MAC list. Deprecated inbound form; after validation this is
    /// always the sorted set of MACs of the surviving interfaces.
    #[serde(default)]
    pub macs: Vec<String>,

    /// Anything else the agent reported, kept for hooks and rules.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl InventoryPayload {
    /// Parse the raw document from the agent.
    pub fn from_value(data: Value) -> Result<Self> {
        serde_json::from_value(data)
            .map_err(|e| Error::ValidationError(format!("cannot parse introspection data: {}", e)))
    }

    /// Recompute `macs` as the sorted set of MACs of the current
    /// interfaces. Must be called after any interface filtering.
    pub fn recompute_macs(&mut self) {
        let macs: BTreeSet<String> = self
            .interfaces
            .values()
            .filter_map(|iface| iface.mac.clone())
            .collect();
        self.macs = macs.into_iter().collect();
    }

    /// JSON view of the payload, used by rule `data://` field paths.
    pub fn as_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Check MAC syntax (six colon-separated hex octets).
pub fn is_valid_mac(mac: &str) -> bool {
    MAC_RE.is_match(mac)
}

/// Lowercase a MAC for stable comparison and storage.
pub fn normalize_mac(mac: &str) -> String {
    mac.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_payload() {
        let payload = InventoryPayload::from_value(json!({
            "ipmi_address": "1.2.3.4",
            "cpus": 2,
            "cpu_arch": "x86_64",
            "memory_mb": 1024,
            "local_gb": 20,
            "interfaces": {
                "em1": {"mac": "11:22:33:44:55:66", "ip": "1.2.0.1"},
                "em2": {"mac": "66:55:44:33:22:11"},
            },
            "boot_mode": "uefi",
        }))
        .unwrap();

        assert_eq!(payload.bmc_address.as_deref(), Some("1.2.3.4"));
        assert_eq!(payload.cpus, Some(2));
        assert_eq!(payload.interfaces.len(), 2);
        assert_eq!(payload.interfaces["em2"].ip, None);
        assert_eq!(payload.extra["boot_mode"], json!("uefi"));
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(InventoryPayload::from_value(json!("bogus")).is_err());
    }

    #[test]
    fn test_recompute_macs_sorted_and_deduplicated() {
        let mut payload = InventoryPayload::default();
        for (name, mac) in [
            ("em2", "66:55:44:33:22:11"),
            ("em1", "11:22:33:44:55:66"),
            ("em1.100", "11:22:33:44:55:66"),
        ] {
            payload.interfaces.insert(
                name.to_string(),
                Interface {
                    mac: Some(mac.to_string()),
                    ip: None,
                },
            );
        }

        payload.recompute_macs();
        assert_eq!(payload.macs, vec!["11:22:33:44:55:66", "66:55:44:33:22:11"]);
    }

    #[test]
    fn test_mac_validation() {
        assert!(is_valid_mac("11:22:33:aa:bb:cc"));
        assert!(is_valid_mac("DE:AD:BE:EF:DE:AD"));
        assert!(!is_valid_mac("broken"));
        assert!(!is_valid_mac(""));
        assert!(!is_valid_mac("11:22:33:aa:bb"));
        assert!(!is_valid_mac("11-22-33-aa-bb-cc"));
    }

    #[test]
    fn test_round_trip_keeps_wire_names() {
        let payload = InventoryPayload::from_value(json!({
            "ipmi_address": "1.2.3.4",
            "cpus": 2,
        }))
        .unwrap();
        let json = payload.as_json();
        assert_eq!(json["ipmi_address"], json!("1.2.3.4"));
        assert!(json.get("bmc_address").is_none());
    }
}
