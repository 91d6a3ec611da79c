//! [`Gateway`] – load, launch and run until shutdown.

use busgate_kernel::{Loader, ModuleSpec, StopReport, Supervisor, SupervisorConfig};
use busgate_middleware::{ModuleCatalog, ShutdownHandle, ShutdownReason};
use busgate_types::{GatewayError, ModuleKind};
use tracing::{info, warn};

/// Entry point that turns a catalog and module list into a running gateway.
pub struct Gateway;

impl Gateway {
    /// Load every module in `specs` and launch the supervisor.
    ///
    /// Modules that fail to load are skipped with an error log; the gateway
    /// still starts as long as at least one module loaded.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Config`] when no module could be loaded.
    pub async fn start(
        catalog: &ModuleCatalog,
        specs: &[ModuleSpec],
        config: SupervisorConfig,
    ) -> Result<RunningGateway, GatewayError> {
        let system = Loader::new(catalog).load(specs).await;
        if system.module_count() == 0 {
            return Err(GatewayError::Config(format!(
                "none of the {} configured modules could be loaded",
                specs.len()
            )));
        }
        let skipped = system
            .skipped
            .iter()
            .map(|(id, e)| (id.clone(), e.to_string()))
            .collect();
        if system.interface.is_empty() {
            warn!("no interface modules loaded; nothing will publish");
        }
        if system.communication.is_empty() {
            warn!("no communication modules loaded; publishes will not leave the gateway");
        }

        Ok(RunningGateway {
            supervisor: Supervisor::launch(system, config),
            skipped,
        })
    }
}

/// A launched gateway. Dropping it without [`RunningGateway::shutdown`]
/// aborts every module task.
pub struct RunningGateway {
    supervisor: Supervisor,
    skipped: Vec<(String, String)>,
}

impl RunningGateway {
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.supervisor.shutdown_handle()
    }

    pub fn modules(&self) -> Vec<(String, ModuleKind)> {
        self.supervisor
            .modules()
            .map(|(id, kind)| (id.to_string(), kind))
            .collect()
    }

    /// `(module id, reason)` for every configured module that was not loaded.
    pub fn skipped(&self) -> &[(String, String)] {
        &self.skipped
    }

    /// Block until a shutdown is requested, then stop everything.
    pub async fn run_until_shutdown(mut self) -> (ShutdownReason, StopReport) {
        let reason = self.supervisor.wait_for_shutdown().await;
        let report = self.shutdown().await;
        (reason, report)
    }

    /// Stop every module and the router.
    pub async fn shutdown(&mut self) -> StopReport {
        let report = self.supervisor.stop().await;
        info!(
            stopped = report.outcomes.len(),
            forced = report.forced(),
            "gateway stopped"
        );
        report
    }
}
