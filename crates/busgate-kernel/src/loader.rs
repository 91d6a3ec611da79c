//! [`Loader`] – module import, validation and wiring.
//!
//! For every configured [`ModuleSpec`] the loader:
//!
//! 1. imports the module from the [`ModuleCatalog`];
//! 2. checks the declared kind (if any) and that the instance id is unused;
//! 3. runs the module's `load` hook with its injected context;
//! 4. for interface modules, validates the node tree against the module's
//!    callbacks and registers every node in the [`DataTree`];
//! 5. hands out the module's private queue(s).
//!
//! A module that fails any step is logged and skipped; the remaining modules
//! still load. Nothing here runs module code after `load`: that happens in
//! the supervised loops.

use std::collections::HashSet;

use busgate_middleware::{
    BusReceiver, BusSender, CommunicationContext, CommunicationModule, DataTree,
    InterfaceContext, InterfaceModule, ModuleCatalog, ModuleInstance, PublishQueue, ReceiveQueue,
    ShutdownHandle, ShutdownSignal, bus_queue,
};
use busgate_types::{GatewayError, ModuleKind, Node, PATH_SEPARATOR};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::ModuleSpec;
use crate::hooks::guarded;

/// A validated communication module with its transmit queue.
pub struct LoadedCommunication {
    pub id: String,
    pub module: Box<dyn CommunicationModule>,
    pub transmit_tx: BusSender,
    pub transmit_rx: BusReceiver,
}

/// A validated interface module with its subscribe queue.
pub struct LoadedInterface {
    pub id: String,
    pub module: Box<dyn InterfaceModule>,
    pub subscribe_tx: BusSender,
    pub subscribe_rx: BusReceiver,
    /// Ids of the nodes this module actually got registered.
    pub nodes: Vec<String>,
}

/// Loader output: everything the supervisor needs to start the gateway.
pub struct LoadedSystem {
    /// Communication modules, in config order.
    pub communication: Vec<LoadedCommunication>,
    /// Interface modules, in config order.
    pub interface: Vec<LoadedInterface>,
    pub tree: DataTree,
    /// Consumer end of the shared receive queue.
    pub receive_rx: BusReceiver,
    /// Consumer end of the shared publish queue.
    pub publish_rx: BusReceiver,
    pub shutdown: ShutdownHandle,
    pub shutdown_signal: ShutdownSignal,
    /// Modules that were skipped, with the reason.
    pub skipped: Vec<(String, GatewayError)>,
}

impl LoadedSystem {
    /// Registered node ids, sorted.
    pub fn node_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.tree.nodes().map(|n| n.id.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn module_count(&self) -> usize {
        self.communication.len() + self.interface.len()
    }
}

/// Imports and validates modules from a [`ModuleCatalog`].
pub struct Loader<'a> {
    catalog: &'a ModuleCatalog,
}

struct Wiring {
    receive: ReceiveQueue,
    publish: PublishQueue,
    shutdown: ShutdownHandle,
}

impl<'a> Loader<'a> {
    pub fn new(catalog: &'a ModuleCatalog) -> Self {
        Self { catalog }
    }

    /// Load every module in `specs`, in order.
    pub async fn load(&self, specs: &[ModuleSpec]) -> LoadedSystem {
        let (shutdown, shutdown_signal) = ShutdownHandle::channel();
        let (receive_tx, receive_rx) = bus_queue();
        let (publish_tx, publish_rx) = bus_queue();
        let wiring = Wiring {
            receive: ReceiveQueue::new(receive_tx),
            publish: PublishQueue::new(publish_tx),
            shutdown: shutdown.clone(),
        };

        let mut system = LoadedSystem {
            communication: Vec::new(),
            interface: Vec::new(),
            tree: DataTree::new(),
            receive_rx,
            publish_rx,
            shutdown,
            shutdown_signal,
            skipped: Vec::new(),
        };
        let mut ids = HashSet::new();

        for spec in specs {
            let id = spec.id().to_string();
            let span = info_span!("module", id = %id, module = %spec.module);
            let result = async {
                if !ids.insert(id.clone()) {
                    return Err(GatewayError::DuplicateModule(id.clone()));
                }
                self.load_one(spec, &wiring, &mut system).await
            }
            .instrument(span)
            .await;

            if let Err(e) = result {
                error!(module = %id, error = %e, "module skipped");
                system.skipped.push((id, e));
            }
        }

        info!(
            communication = system.communication.len(),
            interface = system.interface.len(),
            nodes = system.tree.len(),
            skipped = system.skipped.len(),
            "modules loaded"
        );
        debug!(nodes = ?system.node_ids(), "data tree");
        system
    }

    async fn load_one(
        &self,
        spec: &ModuleSpec,
        wiring: &Wiring,
        system: &mut LoadedSystem,
    ) -> Result<(), GatewayError> {
        let id = spec.id();
        let instance = self
            .catalog
            .import(&spec.module)
            .ok_or_else(|| GatewayError::UnknownModule(spec.module.clone()))?;

        if let Some(declared) = spec.kind
            && declared != instance.kind()
        {
            return Err(validation(
                id,
                format!("declared {declared} but module is {}", instance.kind()),
            ));
        }

        match instance {
            ModuleInstance::Communication(mut module) => {
                let ctx = CommunicationContext {
                    id: id.to_string(),
                    receive: wiring.receive.clone(),
                    shutdown: wiring.shutdown.clone(),
                };
                guarded(id, "load", module.load(&spec.config, ctx))
                    .await
                    .map_err(|e| validation(id, format!("load failed: {e}")))?;

                let (transmit_tx, transmit_rx) = bus_queue();
                system.communication.push(LoadedCommunication {
                    id: id.to_string(),
                    module,
                    transmit_tx,
                    transmit_rx,
                });
                info!(kind = %ModuleKind::Communication, "module loaded");
            }
            ModuleInstance::Interface(mut module) => {
                let ctx = InterfaceContext {
                    id: id.to_string(),
                    publish: wiring.publish.clone(),
                    shutdown: wiring.shutdown.clone(),
                };
                guarded(id, "load", module.load(&spec.config, ctx))
                    .await
                    .map_err(|e| validation(id, format!("load failed: {e}")))?;

                let nodes = module.nodes();
                validate_nodes(id, &nodes, &module.callbacks())?;

                let (subscribe_tx, subscribe_rx) = bus_queue();
                let registered = register_nodes(id, nodes, &subscribe_tx, &mut system.tree);
                if registered.is_empty() {
                    warn!("none of the module's nodes could be registered; it will receive no traffic");
                }
                system.interface.push(LoadedInterface {
                    id: id.to_string(),
                    module,
                    subscribe_tx,
                    subscribe_rx,
                    nodes: registered,
                });
                info!(kind = %ModuleKind::Interface, "module loaded");
            }
        }
        Ok(())
    }
}

/// Check an interface module's node tree: non-empty, path-safe ids, and a
/// known callback behind every property that declares one.
fn validate_nodes(module: &str, nodes: &[Node], callbacks: &[&str]) -> Result<(), GatewayError> {
    if nodes.is_empty() {
        return Err(validation(module, "interface module exposes no nodes"));
    }
    for node in nodes {
        if !is_segment(&node.id) {
            return Err(validation(module, format!("invalid node id '{}'", node.id)));
        }
        for (property_id, property) in &node.properties {
            if !is_segment(property_id) {
                return Err(validation(
                    module,
                    format!("invalid property id '{}/{property_id}'", node.id),
                ));
            }
            if let Some(callback) = &property.callback
                && !callbacks.contains(&callback.as_str())
            {
                return Err(validation(
                    module,
                    format!(
                        "property '{}/{property_id}' names unknown callback '{callback}'",
                        node.id
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// Register `nodes` under `module`. Duplicates are logged and skipped; the
/// ids that made it into the tree are returned.
fn register_nodes(
    module: &str,
    nodes: Vec<Node>,
    subscribe_tx: &BusSender,
    tree: &mut DataTree,
) -> Vec<String> {
    let mut registered = Vec::with_capacity(nodes.len());
    for mut node in nodes {
        node.module = module.to_string();
        let node_id = node.id.clone();
        match tree.register(&node_id, node, subscribe_tx.clone()) {
            Ok(()) => registered.push(node_id),
            Err(e) => warn!(node = %node_id, error = %e, "node ignored"),
        }
    }
    registered
}

fn is_segment(id: &str) -> bool {
    !id.is_empty() && !id.contains(PATH_SEPARATOR)
}

fn validation(module: &str, reason: impl Into<String>) -> GatewayError {
    GatewayError::Validation {
        module: module.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use busgate_middleware::{Module, ModuleConfig};
    use busgate_types::{DataType, ModuleError, Property, PublishMessage, SubscribeMessage};

    struct Radio {
        fail_load: bool,
    }

    impl Module for Radio {}

    #[async_trait]
    impl CommunicationModule for Radio {
        async fn load(
            &mut self,
            _config: &ModuleConfig,
            _ctx: CommunicationContext,
        ) -> Result<(), ModuleError> {
            if self.fail_load {
                Err(ModuleError::failed("no broker configured"))
            } else {
                Ok(())
            }
        }

        async fn transmit(&mut self, _message: &PublishMessage) -> Result<(), ModuleError> {
            Ok(())
        }
    }

    /// Interface double whose nodes come from its config: `nodes = ["a", "b"]`.
    struct Lamp {
        nodes: Vec<Node>,
        callback: &'static str,
    }

    impl Module for Lamp {}

    #[async_trait]
    impl InterfaceModule for Lamp {
        async fn load(
            &mut self,
            config: &ModuleConfig,
            _ctx: InterfaceContext,
        ) -> Result<(), ModuleError> {
            let ids = config
                .get("nodes")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            for id in ids.iter().filter_map(|v| v.as_str()) {
                self.nodes.push(Node::new(id, id).with_property(
                    "state",
                    Property::new("State", DataType::Boolean).settable(self.callback),
                ));
            }
            Ok(())
        }

        fn nodes(&self) -> Vec<Node> {
            self.nodes.clone()
        }

        fn callbacks(&self) -> Vec<&'static str> {
            vec!["on_state"]
        }

        async fn dispatch(
            &mut self,
            _callback: &str,
            _message: SubscribeMessage,
        ) -> Result<(), ModuleError> {
            Ok(())
        }
    }

    fn catalog() -> ModuleCatalog {
        ModuleCatalog::new()
            .communication("radio", || Radio { fail_load: false })
            .communication("broken_radio", || Radio { fail_load: true })
            .interface("lamp", || Lamp {
                nodes: Vec::new(),
                callback: "on_state",
            })
            .interface("miswired_lamp", || Lamp {
                nodes: Vec::new(),
                callback: "on_colour",
            })
    }

    fn lamp_spec(id: &str, nodes: &[&str]) -> ModuleSpec {
        let mut config = ModuleConfig::new();
        config.insert(
            "nodes".to_string(),
            toml::Value::Array(nodes.iter().map(|n| toml::Value::from(*n)).collect()),
        );
        ModuleSpec::new("lamp").with_id(id).with_config(config)
    }

    #[tokio::test]
    async fn loads_valid_modules_split_by_kind() {
        let catalog = catalog();
        let system = Loader::new(&catalog)
            .load(&[ModuleSpec::new("radio"), lamp_spec("lamps", &["light", "fan"])])
            .await;

        assert_eq!(system.communication.len(), 1);
        assert_eq!(system.interface.len(), 1);
        assert!(system.skipped.is_empty());
        assert_eq!(system.node_ids(), vec!["fan", "light"]);

        let (node, property) = system.tree.resolve("fan/state/set");
        assert_eq!(node.map(|n| n.module.as_str()), Some("lamps"));
        assert!(property.is_some());
    }

    #[tokio::test]
    async fn skips_unknown_and_failing_modules() {
        let catalog = catalog();
        let system = Loader::new(&catalog)
            .load(&[
                ModuleSpec::new("gpio"),
                ModuleSpec::new("broken_radio"),
                ModuleSpec::new("radio"),
            ])
            .await;

        assert_eq!(system.communication.len(), 1);
        assert_eq!(system.skipped.len(), 2);
        assert!(matches!(system.skipped[0].1, GatewayError::UnknownModule(_)));
        assert!(matches!(system.skipped[1].1, GatewayError::Validation { .. }));
    }

    #[tokio::test]
    async fn rejects_kind_mismatch_and_duplicate_ids() {
        let catalog = catalog();
        let system = Loader::new(&catalog)
            .load(&[
                ModuleSpec::new("radio").with_kind(ModuleKind::Interface),
                ModuleSpec::new("radio").with_id("uplink"),
                ModuleSpec::new("radio").with_id("uplink"),
            ])
            .await;

        assert_eq!(system.communication.len(), 1);
        assert_eq!(system.communication[0].id, "uplink");
        assert!(matches!(system.skipped[0].1, GatewayError::Validation { .. }));
        assert!(matches!(system.skipped[1].1, GatewayError::DuplicateModule(_)));
    }

    #[tokio::test]
    async fn rejects_interface_without_nodes_or_with_unknown_callback() {
        let catalog = catalog();
        let mut miswired = lamp_spec("miswired", &["light"]);
        miswired.module = "miswired_lamp".to_string();

        let system = Loader::new(&catalog)
            .load(&[lamp_spec("empty", &[]), miswired])
            .await;

        assert!(system.interface.is_empty());
        assert_eq!(system.skipped.len(), 2);
        assert!(system.tree.is_empty());
    }

    #[tokio::test]
    async fn duplicate_node_keeps_first_registrant() {
        let catalog = catalog();
        let system = Loader::new(&catalog)
            .load(&[lamp_spec("first", &["light"]), lamp_spec("second", &["light", "fan"])])
            .await;

        assert_eq!(system.interface.len(), 2);
        assert_eq!(system.interface[1].nodes, vec!["fan".to_string()]);
        let (node, _) = system.tree.resolve("light/state");
        assert_eq!(node.map(|n| n.module.as_str()), Some("first"));
    }

    #[test]
    fn node_ids_must_be_single_segments() {
        let nodes = vec![Node::new("living/light", "Light")];
        assert!(validate_nodes("m", &nodes, &[]).is_err());
        let nodes = vec![Node::new("light", "Light").with_property("", Property::new("x", DataType::String))];
        assert!(validate_nodes("m", &nodes, &[]).is_err());
    }
}
