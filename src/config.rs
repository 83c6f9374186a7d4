// src/config.rs

//! Processing configuration
//!
//! The configuration loader lives outside this crate and hands us a flat
//! key-value view. Everything here is an explicit struct passed into the
//! constructors that need it; there is no process-wide mutable state.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Default ordered hook list, matching the built-in hooks.
pub const DEFAULT_HOOKS: &str = "ramdisk_error,scheduler,validate_interfaces";

/// Settings consumed by the hook pipeline, the node updater and the rules
/// engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ordered hook names to run on every payload.
    pub processing_hooks: Vec<String>,
    /// Keep interfaces that did not report an IP address (by default they
    /// are dropped and no port is created for them).
    pub ports_for_inactive_interfaces: bool,
    /// Overall introspection timeout, measured from session start. Bounds
    /// the power-state poll and the lease lifetime.
    pub timeout: Duration,
    /// Issue a power-off command once discovery has finished.
    pub power_off_after_discovery: bool,
    /// Sleep between power-state polls.
    pub power_poll_interval: Duration,
    /// Abort the whole run when a single rule fails to evaluate, instead
    /// of logging and skipping it.
    pub strict_rules: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            processing_hooks: split_hooks(DEFAULT_HOOKS),
            ports_for_inactive_interfaces: false,
            timeout: Duration::from_secs(3600),
            power_off_after_discovery: false,
            power_poll_interval: Duration::from_secs(3),
            strict_rules: false,
        }
    }
}

impl Config {
    /// Build a config from the loader's key-value view.
    ///
    /// Unknown keys are warned about and ignored so that options owned by
    /// the excluded boundaries (HTTP listener, database path, ...) can
    /// share the same section.
    pub fn from_map(options: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();

        for (key, value) in options {
            match key.as_str() {
                "processing_hooks" => config.processing_hooks = split_hooks(value),
                "ports_for_inactive_interfaces" => {
                    config.ports_for_inactive_interfaces = parse_bool(key, value)?
                }
                "timeout" => config.timeout = Duration::from_secs(parse_seconds(key, value)?),
                "power_off_after_discovery" => {
                    config.power_off_after_discovery = parse_bool(key, value)?
                }
                "power_poll_interval" => {
                    config.power_poll_interval = Duration::from_secs(parse_seconds(key, value)?)
                }
                "strict_rules" => config.strict_rules = parse_bool(key, value)?,
                _ => warn!("Ignoring unrecognized processing option '{}'", key),
            }
        }

        if config.processing_hooks.is_empty() {
            return Err(Error::ConfigError(
                "processing_hooks must name at least one hook".to_string(),
            ));
        }

        Ok(config)
    }
}

fn split_hooks(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(Error::ConfigError(format!(
            "option '{}' expects a boolean, got '{}'",
            key, value
        ))),
    }
}

fn parse_seconds(key: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| {
        Error::ConfigError(format!(
            "option '{}' expects a number of seconds, got '{}'",
            key, value
        ))
    })
}
