//! [`Supervisor`] – owns every running loop of the gateway.
//!
//! `launch` spawns the two router loops and one Tokio task per loaded
//! module, each inside a `module` tracing span. `wait_for_shutdown` parks
//! until a signal or a module asks to stop. `stop` then escalates:
//!
//! 1. every module gets a poison pill on its own queue (transmit queue for
//!    communication modules, subscribe queue for interface modules);
//! 2. all modules are joined concurrently, each under the stop grace period;
//! 3. a module still running after the grace period is logged at `warn` and
//!    aborted, then joined again for at most one more grace period. A task
//!    that never yields (a hook blocking its worker thread) cannot observe
//!    the abort; it is logged at `error` and detached;
//! 4. the router's stop flag is raised and both router loops are joined.
//!
//! Dropping a supervisor without calling `stop` aborts every module task and
//! both router loops.

use std::sync::Arc;
use std::time::Duration;

use busgate_middleware::{BusRouter, BusSender, RouterHandle, ShutdownHandle, ShutdownReason, ShutdownSignal};
use busgate_types::{BusMessage, ModuleKind};
use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::communication::CommunicationLoop;
use crate::config::SupervisorConfig;
use crate::interface::InterfaceLoop;
use crate::loader::LoadedSystem;

// ─────────────────────────────────────────────────────────────────────────────
// Stop report
// ─────────────────────────────────────────────────────────────────────────────

/// How a module's task ended during [`Supervisor::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited on its poison pill within the grace period.
    Graceful,
    /// Ignored the grace period and was aborted (or detached, if even the
    /// abort could not be observed).
    Forced,
    /// Had already finished before the stop sequence began.
    AlreadyStopped,
    /// The task itself panicked.
    Panicked,
}

/// Per-module result of [`Supervisor::stop`].
#[derive(Debug, Default)]
pub struct StopReport {
    pub outcomes: Vec<(String, StopOutcome)>,
}

impl StopReport {
    pub fn outcome(&self, module: &str) -> Option<StopOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == module)
            .map(|(_, outcome)| *outcome)
    }

    /// Number of modules that had to be aborted.
    pub fn forced(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == StopOutcome::Forced)
            .count()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Supervisor
// ─────────────────────────────────────────────────────────────────────────────

struct Supervised {
    id: String,
    kind: ModuleKind,
    /// Queue the poison pill goes to.
    inbox: BusSender,
    task: JoinHandle<()>,
}

/// Runs and stops the router and every loaded module.
pub struct Supervisor {
    config: SupervisorConfig,
    shutdown: ShutdownHandle,
    signal: ShutdownSignal,
    router: Option<RouterHandle>,
    modules: Vec<Supervised>,
}

impl Supervisor {
    /// Spawn the router and every module of `system` on the current runtime.
    pub fn launch(system: LoadedSystem, config: SupervisorConfig) -> Self {
        let LoadedSystem {
            communication,
            interface,
            tree,
            receive_rx,
            publish_rx,
            shutdown,
            shutdown_signal,
            ..
        } = system;
        let interrupt = shutdown.interrupt_flag();

        let transmit_queues = communication
            .iter()
            .map(|c| (c.id.clone(), c.transmit_tx.clone()))
            .collect();
        let router = BusRouter::new(Arc::new(tree), transmit_queues, config.poll_timeout())
            .spawn(receive_rx, publish_rx);

        let mut modules = Vec::with_capacity(communication.len() + interface.len());
        for loaded in communication {
            let span = info_span!("module", id = %loaded.id, kind = %ModuleKind::Communication);
            let lp = CommunicationLoop::new(
                loaded.id.clone(),
                loaded.module,
                loaded.transmit_rx,
                Arc::clone(&interrupt),
                &config,
            );
            modules.push(Supervised {
                id: loaded.id,
                kind: ModuleKind::Communication,
                inbox: loaded.transmit_tx,
                task: tokio::spawn(lp.run().instrument(span)),
            });
        }
        for loaded in interface {
            let span = info_span!("module", id = %loaded.id, kind = %ModuleKind::Interface);
            let lp = InterfaceLoop::new(
                loaded.id.clone(),
                loaded.module,
                loaded.subscribe_rx,
                Arc::clone(&interrupt),
                &config,
            );
            modules.push(Supervised {
                id: loaded.id,
                kind: ModuleKind::Interface,
                inbox: loaded.subscribe_tx,
                task: tokio::spawn(lp.run().instrument(span)),
            });
        }

        info!(modules = modules.len(), "supervisor launched");
        Self {
            config,
            shutdown,
            signal: shutdown_signal,
            router: Some(router),
            modules,
        }
    }

    /// Handle for signal handlers and operators to request a shutdown.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// `(id, kind)` of every supervised module, communication modules first.
    pub fn modules(&self) -> impl Iterator<Item = (&str, ModuleKind)> {
        self.modules.iter().map(|m| (m.id.as_str(), m.kind))
    }

    /// Wait for the first shutdown request.
    pub async fn wait_for_shutdown(&mut self) -> ShutdownReason {
        let reason = self
            .signal
            .recv()
            .await
            .unwrap_or_else(|| ShutdownReason::Requested {
                source: "supervisor".to_string(),
            });
        info!(?reason, "shutdown requested");
        reason
    }

    /// Stop every module, then the router. Calling it again is a no-op.
    pub async fn stop(&mut self) -> StopReport {
        let grace = self.config.stop_grace();
        let modules = std::mem::take(&mut self.modules);
        let outcomes = join_all(modules.into_iter().map(|m| stop_module(m, grace))).await;

        if let Some(router) = self.router.take() {
            router.stop(grace).await;
        }
        StopReport { outcomes }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        for module in &self.modules {
            module.task.abort();
        }
        // Dropping the router handle aborts both router loops.
        if self.router.take().is_some() {
            debug!("supervisor dropped without stop, router aborted");
        }
    }
}

async fn stop_module(module: Supervised, grace: Duration) -> (String, StopOutcome) {
    let Supervised {
        id, inbox, mut task, ..
    } = module;
    let was_running = !task.is_finished();

    if inbox.send(BusMessage::PoisonPill).is_err() {
        debug!(module = %id, "loop already gone, poison pill not delivered");
    }

    let outcome = match tokio::time::timeout(grace, &mut task).await {
        Ok(Ok(())) if was_running => StopOutcome::Graceful,
        Ok(Ok(())) => StopOutcome::AlreadyStopped,
        Ok(Err(e)) if e.is_panic() => {
            error!(module = %id, "module task panicked");
            StopOutcome::Panicked
        }
        Ok(Err(_)) => StopOutcome::AlreadyStopped,
        Err(_) => {
            warn!(
                module = %id,
                grace_ms = grace.as_millis() as u64,
                "module did not stop within grace period, terminating"
            );
            task.abort();
            match tokio::time::timeout(grace, &mut task).await {
                Ok(Err(e)) if e.is_panic() => {
                    error!(module = %id, "module task panicked while terminating");
                }
                Ok(_) => {}
                Err(_) => {
                    error!(
                        module = %id,
                        "module task did not yield after abort, detaching"
                    );
                }
            }
            StopOutcome::Forced
        }
    };
    info!(module = %id, ?outcome, "module stopped");
    (id, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModuleSpec;
    use crate::loader::Loader;
    use async_trait::async_trait;
    use busgate_middleware::{
        CommunicationContext, CommunicationModule, InterfaceContext, InterfaceModule, Module,
        ModuleCatalog, ModuleConfig, PublishQueue, ReceiveQueue,
    };
    use busgate_types::{
        DataType, ModuleError, Node, Property, PublishMessage, SubscribeMessage,
    };
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Communication double: records transmits, fails the first `failures`,
    /// and keeps its receive queue so tests can inject inbound traffic.
    #[derive(Clone, Default)]
    struct Uplink {
        sent: Log,
        attempts: Arc<Mutex<usize>>,
        failures: usize,
        receive: Arc<Mutex<Option<ReceiveQueue>>>,
        hang_on_stop: bool,
        /// Blocks the worker thread inside `stop` for this long.
        block_on_stop: Option<Duration>,
        offline: bool,
        stops: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl Module for Uplink {
        async fn stop(&mut self) -> Result<(), ModuleError> {
            *self.stops.lock().unwrap() += 1;
            if self.hang_on_stop {
                std::future::pending::<()>().await;
            }
            if let Some(duration) = self.block_on_stop {
                std::thread::sleep(duration);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CommunicationModule for Uplink {
        async fn load(
            &mut self,
            _config: &ModuleConfig,
            ctx: CommunicationContext,
        ) -> Result<(), ModuleError> {
            *self.receive.lock().unwrap() = Some(ctx.receive);
            Ok(())
        }

        async fn transmit_ready(&self) -> bool {
            !self.offline
        }

        async fn transmit(&mut self, message: &PublishMessage) -> Result<(), ModuleError> {
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                *attempts += 1;
                *attempts
            };
            if attempt <= self.failures {
                return Err(ModuleError::failed("broker busy"));
            }
            self.sent
                .lock()
                .unwrap()
                .push(format!("{}={}", message.path, message.content));
            Ok(())
        }
    }

    /// Interface double owning one node with a settable `state` property.
    #[derive(Clone, Default)]
    struct Light {
        node: String,
        calls: Log,
        publish: Arc<Mutex<Option<PublishQueue>>>,
    }

    impl Module for Light {}

    #[async_trait]
    impl InterfaceModule for Light {
        async fn load(
            &mut self,
            _config: &ModuleConfig,
            ctx: InterfaceContext,
        ) -> Result<(), ModuleError> {
            *self.publish.lock().unwrap() = Some(ctx.publish);
            Ok(())
        }

        fn nodes(&self) -> Vec<Node> {
            vec![Node::new(&self.node, "Light").with_property(
                "state",
                Property::new("State", DataType::Boolean).settable("on_state"),
            )]
        }

        fn callbacks(&self) -> Vec<&'static str> {
            vec!["on_state"]
        }

        async fn dispatch(
            &mut self,
            callback: &str,
            message: SubscribeMessage,
        ) -> Result<(), ModuleError> {
            self.calls.lock().unwrap().push(format!(
                "{}:{callback}:{}:{}",
                self.node,
                message.callback.as_deref().unwrap_or("-"),
                message.content
            ));
            Ok(())
        }
    }

    fn fast() -> SupervisorConfig {
        SupervisorConfig {
            poll_timeout_ms: 10,
            idle_backoff_ms: 5,
            retry_backoff_ms: 20,
            stop_grace_ms: 300,
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn subscribe_reaches_only_the_owning_module() {
        let uplink = Uplink::default();
        let light = Light {
            node: "light".to_string(),
            ..Light::default()
        };
        let fan = Light {
            node: "fan".to_string(),
            ..Light::default()
        };
        let catalog = {
            let (u, l, f) = (uplink.clone(), light.clone(), fan.clone());
            ModuleCatalog::new()
                .communication("uplink", move || u.clone())
                .interface("light", move || l.clone())
                .interface("fan", move || f.clone())
        };
        let system = Loader::new(&catalog)
            .load(&[ModuleSpec::new("uplink"), ModuleSpec::new("light"), ModuleSpec::new("fan")])
            .await;
        let mut supervisor = Supervisor::launch(system, fast());

        let receive = uplink.receive.lock().unwrap().clone().unwrap();
        receive
            .submit(SubscribeMessage::new("light/state/set", "ON"))
            .unwrap();
        receive
            .submit(SubscribeMessage::new("garage/state/set", "ON"))
            .unwrap();

        eventually(|| !light.calls.lock().unwrap().is_empty()).await;
        assert_eq!(
            *light.calls.lock().unwrap(),
            vec!["light:on_state:on_state:ON".to_string()]
        );
        assert!(fan.calls.lock().unwrap().is_empty());

        let report = supervisor.stop().await;
        assert_eq!(report.forced(), 0);
        assert_eq!(report.outcome("light"), Some(StopOutcome::Graceful));
    }

    #[tokio::test]
    async fn publish_fans_out_and_retries_independently() {
        let flaky = Uplink {
            failures: 1,
            ..Uplink::default()
        };
        let steady = Uplink::default();
        let light = Light {
            node: "light".to_string(),
            ..Light::default()
        };
        let catalog = {
            let (a, b, l) = (flaky.clone(), steady.clone(), light.clone());
            ModuleCatalog::new()
                .communication("flaky", move || a.clone())
                .communication("steady", move || b.clone())
                .interface("light", move || l.clone())
        };
        let system = Loader::new(&catalog)
            .load(&[ModuleSpec::new("flaky"), ModuleSpec::new("steady"), ModuleSpec::new("light")])
            .await;
        let mut supervisor = Supervisor::launch(system, fast());

        let publish = light.publish.lock().unwrap().clone().unwrap();
        publish
            .publish(PublishMessage::new("light/state", "ON"))
            .unwrap();

        eventually(|| !flaky.sent.lock().unwrap().is_empty()).await;
        assert_eq!(*flaky.sent.lock().unwrap(), vec!["light/state=ON".to_string()]);
        assert_eq!(*flaky.attempts.lock().unwrap(), 2);
        assert_eq!(*steady.sent.lock().unwrap(), vec!["light/state=ON".to_string()]);
        assert_eq!(*steady.attempts.lock().unwrap(), 1);

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn hung_module_is_forced_exactly_once() {
        let hung = Uplink {
            hang_on_stop: true,
            ..Uplink::default()
        };
        let catalog = {
            let h = hung.clone();
            ModuleCatalog::new().communication("hung", move || h.clone())
        };
        let system = Loader::new(&catalog).load(&[ModuleSpec::new("hung")]).await;
        let mut supervisor = Supervisor::launch(system, fast());

        let report = supervisor.stop().await;
        assert_eq!(report.outcome("hung"), Some(StopOutcome::Forced));
        assert_eq!(report.forced(), 1);
        assert_eq!(*hung.stops.lock().unwrap(), 1);

        // Stopping again does nothing.
        let again = supervisor.stop().await;
        assert!(again.outcomes.is_empty());
    }

    #[tokio::test]
    async fn offline_module_with_parked_traffic_stops_gracefully() {
        let offline = Uplink {
            offline: true,
            ..Uplink::default()
        };
        let light = Light {
            node: "light".to_string(),
            ..Light::default()
        };
        let catalog = {
            let (o, l) = (offline.clone(), light.clone());
            ModuleCatalog::new()
                .communication("offline", move || o.clone())
                .interface("light", move || l.clone())
        };
        let system = Loader::new(&catalog)
            .load(&[ModuleSpec::new("offline"), ModuleSpec::new("light")])
            .await;
        let mut supervisor = Supervisor::launch(system, fast());

        let publish = light.publish.lock().unwrap().clone().unwrap();
        publish
            .publish(PublishMessage::new("light/state", "ON"))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let report = supervisor.stop().await;
        assert_eq!(report.outcome("offline"), Some(StopOutcome::Graceful));
        assert_eq!(report.forced(), 0);
        assert_eq!(*offline.attempts.lock().unwrap(), 0);
        assert_eq!(*offline.stops.lock().unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn blocking_stop_hook_does_not_stall_the_stop_sequence() {
        let blocking = Uplink {
            block_on_stop: Some(Duration::from_millis(1_500)),
            ..Uplink::default()
        };
        let catalog = {
            let b = blocking.clone();
            ModuleCatalog::new().communication("blocking", move || b.clone())
        };
        let system = Loader::new(&catalog).load(&[ModuleSpec::new("blocking")]).await;
        let mut supervisor = Supervisor::launch(system, fast());

        let started = std::time::Instant::now();
        let report = supervisor.stop().await;
        let elapsed = started.elapsed();

        assert_eq!(report.outcome("blocking"), Some(StopOutcome::Forced));
        assert!(elapsed < Duration::from_millis(1_200), "stop took {elapsed:?}");
    }

    #[tokio::test]
    async fn dropping_the_supervisor_ends_router_loops() {
        let uplink = Uplink::default();
        let catalog = {
            let u = uplink.clone();
            ModuleCatalog::new().communication("uplink", move || u.clone())
        };
        let system = Loader::new(&catalog).load(&[ModuleSpec::new("uplink")]).await;
        let supervisor = Supervisor::launch(system, fast());
        let receive = uplink.receive.lock().unwrap().clone().unwrap();

        drop(supervisor);
        eventually(|| receive.submit(SubscribeMessage::new("light/state/set", "ON")).is_err()).await;
    }

    #[tokio::test]
    async fn signal_interrupts_loops_and_wakes_waiter() {
        let uplink = Uplink::default();
        let catalog = {
            let u = uplink.clone();
            ModuleCatalog::new().communication("uplink", move || u.clone())
        };
        let system = Loader::new(&catalog).load(&[ModuleSpec::new("uplink")]).await;
        let mut supervisor = Supervisor::launch(system, fast());

        supervisor.shutdown_handle().signal();
        assert_eq!(supervisor.wait_for_shutdown().await, ShutdownReason::Signal);

        eventually(|| *uplink.stops.lock().unwrap() == 1).await;
        // Let the loop return after its stop hook.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let report = supervisor.stop().await;
        assert_eq!(report.outcome("uplink"), Some(StopOutcome::AlreadyStopped));
        assert_eq!(*uplink.stops.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn fatal_request_reaches_the_supervisor() {
        let catalog = ModuleCatalog::new().communication("uplink", Uplink::default);
        let system = Loader::new(&catalog).load(&[ModuleSpec::new("uplink")]).await;
        let mut supervisor = Supervisor::launch(system, fast());

        supervisor.shutdown_handle().fatal("uplink", "broker unreachable");
        let reason = supervisor.wait_for_shutdown().await;
        assert_eq!(reason.exit_code(), 1);
        assert_eq!(supervisor.modules().count(), 1);
        supervisor.stop().await;
    }
}
