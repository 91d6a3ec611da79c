//! `busgate-kernel` – Loading & Supervision
//!
//! Turns configured module names into running, supervised module loops and
//! tears them down again.
//!
//! # Modules
//!
//! - [`config`] – [`SupervisorConfig`] timings and the per-module
//!   [`ModuleSpec`] read from the gateway config file.
//! - [`loader`] – [`Loader`]: imports each configured module from a
//!   [`ModuleCatalog`][busgate_middleware::ModuleCatalog], validates its
//!   contract, runs its `load` hook and wires its queues and nodes.
//! - [`communication`] – the communication-module loop: readiness polling,
//!   ahead-of-line retries and backoff.
//! - [`interface`] – the interface-module loop: named callback dispatch.
//! - [`supervisor`] – [`Supervisor`]: spawns the router and every module
//!   loop, waits for a shutdown request and escalates stop requests.

pub mod communication;
pub mod config;
mod hooks;
pub mod interface;
pub mod loader;
pub mod supervisor;

pub use communication::LoopState;
pub use config::{ModuleSpec, SupervisorConfig};
pub use loader::{LoadedCommunication, LoadedInterface, LoadedSystem, Loader};
pub use supervisor::{StopOutcome, StopReport, Supervisor};
