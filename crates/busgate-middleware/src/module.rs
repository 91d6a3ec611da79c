//! The pluggable module contract.
//!
//! Interface modules never learn which communication backend is active, and
//! communication modules never learn which hardware sits behind a path. Both
//! talk only to the bus, through the queue handle injected at load time.
//!
//! # Overview
//!
//! - [`Module`] – lifecycle hooks shared by every module.
//! - [`CommunicationModule`] – transmits bus traffic to the outside world.
//! - [`InterfaceModule`] – exposes [`Node`]s and handles subscribe traffic
//!   through named callbacks.
//! - [`ModuleInstance`] – the kind-tagged box the loader works with.
//! - [`ModuleCatalog`] – the set of importable modules, keyed by name.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use busgate_types::{ModuleError, ModuleKind, Node, PublishMessage, SubscribeMessage};

use crate::queue::{PublishQueue, ReceiveQueue};
use crate::shutdown::ShutdownHandle;

// ─────────────────────────────────────────────────────────────────────────────
// Module traits
// ─────────────────────────────────────────────────────────────────────────────

/// A module's own `[modules.config]` table from the gateway config file.
pub type ModuleConfig = toml::Table;

/// Lifecycle hooks called inside the module's own supervised task.
#[async_trait]
pub trait Module: Send + Sync {
    /// Called once when the supervised loop enters `RUNNING`.
    async fn start(&mut self) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Called once when the supervised loop reaches `STOPPING`.
    async fn stop(&mut self) -> Result<(), ModuleError> {
        Ok(())
    }
}

/// Everything a communication module receives at load time.
#[derive(Clone, Debug)]
pub struct CommunicationContext {
    /// Instance id from the gateway config.
    pub id: String,
    /// Shared receive queue, for modules that also ingest external input.
    pub receive: ReceiveQueue,
    pub shutdown: ShutdownHandle,
}

/// Everything an interface module receives at load time.
#[derive(Clone, Debug)]
pub struct InterfaceContext {
    pub id: String,
    /// Shared publish queue.
    pub publish: PublishQueue,
    pub shutdown: ShutdownHandle,
}

/// Bridges bus traffic to an external system.
///
/// # Contract
///
/// * `transmit_ready` – cheap readiness check. While it reports `false` the
///   supervisor parks incoming traffic on the module's resend queue. After a
///   poison pill a module that is not ready gets no further transmit calls.
/// * `transmit` – send one message. An `Err` means "not sent": the message is
///   requeued ahead of newer traffic and retried after a backoff.
#[async_trait]
pub trait CommunicationModule: Module {
    /// One-time setup, called before the module's task is spawned.
    async fn load(
        &mut self,
        config: &ModuleConfig,
        ctx: CommunicationContext,
    ) -> Result<(), ModuleError>;

    /// Asked before every transmit. A panic counts as `false`.
    async fn transmit_ready(&self) -> bool {
        true
    }

    /// Send one message to the external system. Called only from the
    /// module's own loop, so no two calls overlap.
    async fn transmit(&mut self, message: &PublishMessage) -> Result<(), ModuleError>;
}

/// Exposes hardware or logical state as nodes and properties.
///
/// # Contract
///
/// * `nodes` – read once after `load`; must be non-empty.
/// * `callbacks` – every [`Property::callback`][busgate_types::Property]
///   declared by `nodes` must appear here, or the module is rejected.
/// * `dispatch` – invoke the callback named by the router on a subscribe
///   message addressed to one of this module's nodes.
#[async_trait]
pub trait InterfaceModule: Module {
    async fn load(&mut self, config: &ModuleConfig, ctx: InterfaceContext)
    -> Result<(), ModuleError>;

    /// Nodes to register in the data tree. Node ids must be single path
    /// segments; the loader stamps the owning module id on each.
    fn nodes(&self) -> Vec<Node>;

    fn callbacks(&self) -> Vec<&'static str>;

    async fn dispatch(
        &mut self,
        callback: &str,
        message: SubscribeMessage,
    ) -> Result<(), ModuleError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Catalog
// ─────────────────────────────────────────────────────────────────────────────

/// A freshly imported module, tagged by kind.
pub enum ModuleInstance {
    Communication(Box<dyn CommunicationModule>),
    Interface(Box<dyn InterfaceModule>),
}

impl ModuleInstance {
    pub fn kind(&self) -> ModuleKind {
        match self {
            ModuleInstance::Communication(_) => ModuleKind::Communication,
            ModuleInstance::Interface(_) => ModuleKind::Interface,
        }
    }
}

impl fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleInstance({})", self.kind())
    }
}

type Factory = Box<dyn Fn() -> ModuleInstance + Send + Sync>;

/// Importable modules keyed by name.
///
/// Each import calls the factory again, so one module type may be
/// configured several times under different ids.
#[derive(Default)]
pub struct ModuleCatalog {
    factories: BTreeMap<String, (ModuleKind, Factory)>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a communication module factory under `name`.
    pub fn communication<M, F>(mut self, name: &str, factory: F) -> Self
    where
        M: CommunicationModule + 'static,
        F: Fn() -> M + Send + Sync + 'static,
    {
        self.factories.insert(
            name.to_string(),
            (
                ModuleKind::Communication,
                Box::new(move || ModuleInstance::Communication(Box::new(factory()))),
            ),
        );
        self
    }

    /// Register an interface module factory under `name`.
    pub fn interface<M, F>(mut self, name: &str, factory: F) -> Self
    where
        M: InterfaceModule + 'static,
        F: Fn() -> M + Send + Sync + 'static,
    {
        self.factories.insert(
            name.to_string(),
            (
                ModuleKind::Interface,
                Box::new(move || ModuleInstance::Interface(Box::new(factory()))),
            ),
        );
        self
    }

    /// Build a new instance of the module registered as `name`.
    pub fn import(&self, name: &str) -> Option<ModuleInstance> {
        self.factories.get(name).map(|(_, factory)| factory())
    }

    /// `(name, kind)` of every registered module, sorted by name.
    pub fn entries(&self) -> impl Iterator<Item = (&str, ModuleKind)> {
        self.factories
            .iter()
            .map(|(name, (kind, _))| (name.as_str(), *kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Null;

    impl Module for Null {}

    #[async_trait]
    impl CommunicationModule for Null {
        async fn load(
            &mut self,
            _config: &ModuleConfig,
            _ctx: CommunicationContext,
        ) -> Result<(), ModuleError> {
            Ok(())
        }

        async fn transmit(&mut self, _message: &PublishMessage) -> Result<(), ModuleError> {
            Ok(())
        }
    }

    #[test]
    fn catalog_imports_fresh_instances_by_name() {
        let catalog = ModuleCatalog::new().communication("null", || Null);

        let instance = catalog.import("null").unwrap();
        assert_eq!(instance.kind(), ModuleKind::Communication);
        assert!(catalog.import("missing").is_none());

        let entries: Vec<_> = catalog.entries().collect();
        assert_eq!(entries, vec![("null", ModuleKind::Communication)]);
    }

    #[tokio::test]
    async fn default_hooks_succeed() {
        let mut module = Null;
        assert!(module.start().await.is_ok());
        assert!(module.stop().await.is_ok());
        assert!(module.transmit_ready().await);
    }
}
