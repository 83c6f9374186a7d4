// src/hooks/mod.rs

//! Processing hook pipeline
//!
//! Hooks run in the configured order at two points of an introspection run:
//! `before_processing` on the raw payload, before the node cache or the
//! fleet API are touched, and `after_processing` once the fleet node and
//! its ports are known. A hook failure aborts the run immediately; later
//! hooks do not observe a payload an earlier hook rejected.

pub mod standard;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fleet::{FleetNode, FleetPort};
use crate::inventory::InventoryPayload;
use crate::patch::PatchOp;
use std::collections::HashMap;
use tracing::debug;

/// Node patch plus per-MAC port patches emitted by the post-processing
/// phase.
pub type AfterPatches = (Vec<PatchOp>, HashMap<String, Vec<PatchOp>>);

/// One processing step. Hooks see the payload after every earlier hook has
/// normalized it.
pub trait ProcessingHook: Send + Sync {
    fn name(&self) -> &'static str;

    /// Validate or normalize the payload before node correlation. The
    /// returned patch is applied to the fleet node early, before the
    /// power-state wait.
    fn before_processing(&self, payload: &mut InventoryPayload) -> Result<Vec<PatchOp>> {
        let _ = payload;
        Ok(Vec::new())
    }

    /// Derive node and port patches once the fleet node and its ports are
    /// known. Keyed by port MAC; patches for a MAC without a port are
    /// dropped by the updater.
    fn after_processing(
        &self,
        node: &FleetNode,
        ports: &[FleetPort],
        payload: &InventoryPayload,
    ) -> Result<AfterPatches> {
        let _ = (node, ports, payload);
        Ok((Vec::new(), HashMap::new()))
    }
}

type HookFactory = Box<dyn Fn(&Config) -> Box<dyn ProcessingHook> + Send + Sync>;

/// Named hook constructors, resolved against the configured hook list.
pub struct HookRegistry {
    factories: HashMap<String, HookFactory>,
}

impl HookRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in hooks.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register("ramdisk_error", |_| Box::new(standard::RamdiskErrorHook));
        registry.register("scheduler", |_| Box::new(standard::SchedulerHook));
        registry.register("validate_interfaces", |config| {
            Box::new(standard::ValidateInterfacesHook::new(
                config.ports_for_inactive_interfaces,
            ))
        });
        registry
    }

    pub fn register(
        &mut self,
        name: &str,
        factory: impl Fn(&Config) -> Box<dyn ProcessingHook> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Instantiate the configured hooks, in configuration order. Naming a
    /// hook this registry does not know is a configuration error.
    pub fn pipeline(&self, config: &Config) -> Result<HookPipeline> {
        let mut hooks = Vec::with_capacity(config.processing_hooks.len());
        for name in &config.processing_hooks {
            let factory = self.factories.get(name).ok_or_else(|| {
                Error::ConfigError(format!("unknown processing hook '{}'", name))
            })?;
            hooks.push(factory(config));
        }
        Ok(HookPipeline { hooks })
    }
}

/// The instantiated, ordered hook chain for one service.
pub struct HookPipeline {
    hooks: Vec<Box<dyn ProcessingHook>>,
}

impl std::fmt::Debug for HookPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookPipeline")
            .field(
                "hooks",
                &self.hooks.iter().map(|h| h.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl HookPipeline {
    /// Run every `before_processing` step, concatenating the returned
    /// patches in hook order.
    pub fn run_before(&self, payload: &mut InventoryPayload) -> Result<Vec<PatchOp>> {
        let mut patch = Vec::new();
        for hook in &self.hooks {
            debug!("Running pre-processing hook {}", hook.name());
            patch.extend(hook.before_processing(payload)?);
        }
        Ok(patch)
    }

    /// Run every `after_processing` step. Node patches concatenate in hook
    /// order; port patches concatenate per MAC.
    pub fn run_after(
        &self,
        node: &FleetNode,
        ports: &[FleetPort],
        payload: &InventoryPayload,
    ) -> Result<AfterPatches> {
        let mut node_patch = Vec::new();
        let mut port_patches: HashMap<String, Vec<PatchOp>> = HashMap::new();
        for hook in &self.hooks {
            debug!("Running post-processing hook {}", hook.name());
            let (node_ops, port_ops) = hook.after_processing(node, ports, payload)?;
            node_patch.extend(node_ops);
            for (mac, ops) in port_ops {
                port_patches.entry(mac).or_default().extend(ops);
            }
        }
        Ok((node_patch, port_patches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct TagHook {
        name: &'static str,
    }

    impl ProcessingHook for TagHook {
        fn name(&self) -> &'static str {
            self.name
        }

        fn before_processing(&self, _payload: &mut InventoryPayload) -> Result<Vec<PatchOp>> {
            Ok(vec![PatchOp::add(format!("/extra/{}", self.name), true)])
        }

        fn after_processing(
            &self,
            _node: &FleetNode,
            _ports: &[FleetPort],
            _payload: &InventoryPayload,
        ) -> Result<AfterPatches> {
            let mut ports = HashMap::new();
            ports.insert(
                "11:22:33:44:55:66".to_string(),
                vec![PatchOp::add(format!("/extra/{}", self.name), true)],
            );
            Ok((Vec::new(), ports))
        }
    }

    fn tagged_pipeline() -> HookPipeline {
        let mut registry = HookRegistry::empty();
        registry.register("first", |_| Box::new(TagHook { name: "first" }));
        registry.register("second", |_| Box::new(TagHook { name: "second" }));
        let config = Config {
            processing_hooks: vec!["first".to_string(), "second".to_string()],
            ..Config::default()
        };
        registry.pipeline(&config).unwrap()
    }

    #[test]
    fn test_unknown_hook_is_config_error() {
        let config = Config {
            processing_hooks: vec!["no_such_hook".to_string()],
            ..Config::default()
        };
        let err = HookRegistry::standard().pipeline(&config).unwrap_err();
        assert!(err.to_string().contains("no_such_hook"));
    }

    #[test]
    fn test_standard_pipeline_resolves_defaults() {
        assert!(HookRegistry::standard().pipeline(&Config::default()).is_ok());
    }

    #[test]
    fn test_before_patches_keep_hook_order() {
        let pipeline = tagged_pipeline();
        let mut payload = InventoryPayload::default();

        let patch = pipeline.run_before(&mut payload).unwrap();
        let paths: Vec<_> = patch.iter().map(|op| op.path.as_str()).collect();
        assert_eq!(paths, vec!["/extra/first", "/extra/second"]);
    }

    #[test]
    fn test_after_port_patches_merge_per_mac() {
        let pipeline = tagged_pipeline();
        let node = FleetNode::default();
        let payload = InventoryPayload::from_value(json!({})).unwrap();

        let (node_patch, port_patches) = pipeline.run_after(&node, &[], &payload).unwrap();
        assert!(node_patch.is_empty());
        assert_eq!(port_patches.len(), 1);
        assert_eq!(port_patches["11:22:33:44:55:66"].len(), 2);
    }
}
