//! `busgate-middleware` – the bus itself.
//!
//! Routes messages between modules without caring about their meaning.
//!
//! # Modules
//!
//! - [`queue`] – typed wrappers over the unbounded Tokio channels that carry
//!   every [`BusMessage`][busgate_types::BusMessage].
//! - [`registry`] – [`DataTree`]: the read-only `node/property` registry built
//!   at load time.
//! - [`router`] – the Receive→Subscribe and Publish→Transmit router loops.
//! - [`module`] – the contract every pluggable module implements, plus the
//!   [`ModuleCatalog`] the loader imports modules from.
//! - [`shutdown`] – [`ShutdownHandle`]: how signals and modules ask the
//!   supervisor to stop the gateway.

pub mod module;
pub mod queue;
pub mod registry;
pub mod router;
pub mod shutdown;

pub use module::{
    CommunicationContext, CommunicationModule, InterfaceContext, InterfaceModule, Module,
    ModuleCatalog, ModuleConfig, ModuleInstance,
};
pub use queue::{BusReceiver, BusSender, PublishQueue, ReceiveQueue, bus_queue};
pub use registry::DataTree;
pub use router::{BusRouter, DEFAULT_POLL_TIMEOUT, RouterHandle, Routing};
pub use shutdown::{ShutdownHandle, ShutdownReason, ShutdownSignal};
