//! Supervised loop for an interface module.
//!
//! Waits (bounded by the poll timeout) on the module's subscribe queue and
//! dispatches each [`SubscribeMessage`] to the callback the router stamped
//! on it. A poison pill, a closed queue or a termination signal ends the
//! loop; `stop` runs once on the way out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use busgate_middleware::{BusReceiver, InterfaceModule, Module};
use busgate_types::{BusMessage, SubscribeMessage};
use tracing::{debug, info, warn};

use crate::communication::LoopState;
use crate::config::SupervisorConfig;
use crate::hooks::guarded;

pub(crate) struct InterfaceLoop {
    id: String,
    module: Box<dyn InterfaceModule>,
    subscribe: BusReceiver,
    state: LoopState,
    interrupt: Arc<AtomicBool>,
    poll_timeout: Duration,
}

impl InterfaceLoop {
    pub(crate) fn new(
        id: String,
        module: Box<dyn InterfaceModule>,
        subscribe: BusReceiver,
        interrupt: Arc<AtomicBool>,
        config: &SupervisorConfig,
    ) -> Self {
        Self {
            id,
            module,
            subscribe,
            state: LoopState::Starting,
            interrupt,
            poll_timeout: config.poll_timeout(),
        }
    }

    pub(crate) async fn run(mut self) {
        let _ = guarded(&self.id, "start", self.module.start()).await;
        self.state = LoopState::Running;
        info!(module = %self.id, "interface loop running");

        while self.state == LoopState::Running {
            if self.interrupt.load(Ordering::SeqCst) {
                info!(module = %self.id, "termination signal, stopping");
                self.state = LoopState::Stopping;
                break;
            }
            match tokio::time::timeout(self.poll_timeout, self.subscribe.recv()).await {
                Err(_) => continue,
                Ok(Some(BusMessage::Subscribe(message))) => self.dispatch(message).await,
                Ok(Some(BusMessage::PoisonPill)) => {
                    info!(module = %self.id, "poison pill received");
                    self.state = LoopState::Stopping;
                }
                Ok(Some(other)) => {
                    warn!(module = %self.id, kind = other.label(), "unrecognized message on subscribe queue, dropping");
                }
                Ok(None) => {
                    debug!(module = %self.id, "subscribe queue closed");
                    self.state = LoopState::Stopping;
                }
            }
        }

        let _ = guarded(&self.id, "stop", self.module.stop()).await;
        self.state = LoopState::Stopped;
        info!(module = %self.id, "interface loop stopped");
    }

    async fn dispatch(&mut self, message: SubscribeMessage) {
        let Some(callback) = message.callback.clone() else {
            warn!(module = %self.id, path = %message.path, "subscribe message carries no callback, dropping");
            return;
        };
        debug!(module = %self.id, path = %message.path, callback = %callback, "dispatching");
        // Failures are logged by `guarded`; the loop carries on.
        let _ = guarded(&self.id, "dispatch", self.module.dispatch(&callback, message)).await;
    }
}
