// src/lib.rs

//! Fleetprobe Hardware Introspection
//!
//! Service core for bare-metal hardware introspection: a discovery ramdisk
//! boots on a node, collects an inventory payload and POSTs it back; this
//! crate validates the payload, correlates it with a registered node,
//! patches the fleet-management record and brings the node back to a known
//! power state.
//!
//! # Architecture
//!
//! - Node cache: registered introspection sessions in SQLite, correlated
//!   by BMC address and MAC attributes
//! - Hook pipeline: ordered, configurable processing steps over the
//!   payload, before and after the fleet node is known
//! - Rules engine: stored condition/action rules translated into patch
//!   operations once per run
//! - Node updater: a small state machine driving all fleet API mutations,
//!   guarded by a per-node lease

pub mod config;
pub mod db;
mod error;
pub mod fleet;
pub mod hooks;
pub mod inventory;
pub mod lock;
pub mod patch;
pub mod process;
pub mod rules;

pub use config::Config;
pub use db::{NodeInfo, Store};
pub use error::{Error, Result};
pub use fleet::{FleetClient, FleetError, FleetNode, FleetPort};
pub use hooks::{AfterPatches, HookPipeline, HookRegistry, ProcessingHook};
pub use inventory::{Interface, InventoryPayload};
pub use lock::{Lease, LeaseGuard, LockManager};
pub use patch::{PatchKind, PatchOp};
pub use process::Introspector;
pub use rules::{Condition, ConditionOp, JoinType, Rule, RuleAction, RulesEngine};
