//! Supervised loop for a communication module.
//!
//! # State machine
//!
//! `STARTING → RUNNING → STOPPING → STOPPED`
//!
//! `start` runs once on entry to `RUNNING`; `stop` runs once on `STOPPING`.
//! Each `RUNNING` iteration:
//!
//! 1. **Interrupt** – a termination signal goes straight to `STOPPING`,
//!    abandoning anything still waiting for a retry.
//! 2. **Not ready** – one message is still taken off the transmit queue so a
//!    poison pill is never missed; a payload is parked on the resend queue.
//! 3. **Ready** – the oldest parked message goes first, then new traffic. A
//!    failed transmit puts the message back at the head of the resend queue
//!    and backs off for `retry_backoff`. While a retry is pending, one
//!    message per iteration is still moved off the transmit queue.
//! 4. **Idle** – with nothing to send the loop waits at most `idle_backoff`
//!    for new traffic.
//!
//! # Draining
//!
//! A poison pill (or a closed transmit queue) ends reads from the transmit
//! queue. On the next iteration a ready module gets one final attempt for
//! the message at the head of the resend queue; the loop then leaves
//! `RUNNING` whether or not that attempt succeeded. A module that is not
//! ready gets no attempt at all. Whatever is still parked is dropped and
//! counted in a warning.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use busgate_middleware::{BusReceiver, CommunicationModule, Module};
use busgate_types::{BusMessage, ModuleError, PublishMessage};
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::hooks::guarded;

/// Lifecycle of a supervised module loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

pub(crate) struct CommunicationLoop {
    id: String,
    module: Box<dyn CommunicationModule>,
    transmit: BusReceiver,
    /// Messages that could not be sent yet, oldest first.
    resend: VecDeque<PublishMessage>,
    state: LoopState,
    /// A poison pill (or a closed transmit queue) has been seen.
    draining: bool,
    interrupt: Arc<AtomicBool>,
    idle_backoff: Duration,
    retry_backoff: Duration,
}

impl CommunicationLoop {
    pub(crate) fn new(
        id: String,
        module: Box<dyn CommunicationModule>,
        transmit: BusReceiver,
        interrupt: Arc<AtomicBool>,
        config: &SupervisorConfig,
    ) -> Self {
        Self {
            id,
            module,
            transmit,
            resend: VecDeque::new(),
            state: LoopState::Starting,
            draining: false,
            interrupt,
            idle_backoff: config.idle_backoff(),
            retry_backoff: config.retry_backoff(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Drive the module from `STARTING` to `STOPPED`.
    pub(crate) async fn run(mut self) {
        self.enter_running().await;
        while self.state == LoopState::Running {
            self.step().await;
        }
        self.finish().await;
    }

    async fn enter_running(&mut self) {
        // A failing start hook is logged and the loop runs anyway.
        let _ = guarded(&self.id, "start", self.module.start()).await;
        self.state = LoopState::Running;
        info!(module = %self.id, "communication loop running");
    }

    async fn step(&mut self) {
        if self.interrupt.load(Ordering::SeqCst) {
            info!(module = %self.id, "termination signal, stopping");
            self.state = LoopState::Stopping;
            return;
        }

        let ready = self.ready().await;
        if self.draining {
            self.final_attempt(ready).await;
            return;
        }
        if !ready {
            self.park_one().await;
            return;
        }

        if !self.resend.is_empty() {
            self.take_one();
            if self.draining {
                self.final_attempt(true).await;
                return;
            }
        }

        let message = match self.resend.pop_front() {
            Some(message) => message,
            None => match self.next_message().await {
                Some(message) => message,
                None => return,
            },
        };
        if !self.attempt(message).await {
            tokio::time::sleep(self.retry_backoff).await;
        }
    }

    async fn finish(&mut self) {
        self.state = LoopState::Stopping;
        if !self.resend.is_empty() {
            warn!(module = %self.id, dropped = self.resend.len(), "stopping with unsent messages");
        }
        let _ = guarded(&self.id, "stop", self.module.stop()).await;
        self.state = LoopState::Stopped;
        info!(module = %self.id, "communication loop stopped");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transmit
    // ─────────────────────────────────────────────────────────────────────────

    /// A panicking or failing readiness check counts as not ready.
    async fn ready(&self) -> bool {
        let module = &self.module;
        guarded(&self.id, "transmit_ready", async {
            Ok::<_, ModuleError>(module.transmit_ready().await)
        })
        .await
        .unwrap_or(false)
    }

    /// Hand `message` to the module. On failure it goes back to the head of
    /// the resend queue and `false` is returned.
    async fn attempt(&mut self, message: PublishMessage) -> bool {
        match guarded(&self.id, "transmit", self.module.transmit(&message)).await {
            Ok(()) => {
                debug!(module = %self.id, path = %message.path, "transmitted");
                true
            }
            Err(_) => {
                debug!(
                    module = %self.id,
                    path = %message.path,
                    pending = self.resend.len() + 1,
                    "transmit failed, requeued for retry"
                );
                self.resend.push_front(message);
                false
            }
        }
    }

    /// Last iteration after a poison pill: at most one attempt, and only
    /// when the module is ready.
    async fn final_attempt(&mut self, ready: bool) {
        if ready && let Some(message) = self.resend.pop_front() {
            debug!(module = %self.id, path = %message.path, "final attempt before stopping");
            self.attempt(message).await;
        } else if !self.resend.is_empty() {
            debug!(module = %self.id, pending = self.resend.len(), "not ready, no final attempt");
        }
        self.state = LoopState::Stopping;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transmit queue
    // ─────────────────────────────────────────────────────────────────────────

    /// Module not ready: park at most one payload, or wait `idle_backoff`
    /// when the transmit queue is empty.
    async fn park_one(&mut self) {
        if !self.take_one() {
            tokio::time::sleep(self.idle_backoff).await;
        }
    }

    /// Move at most one message from the transmit queue to the back of the
    /// resend queue without waiting. Returns `false` when nothing was queued.
    fn take_one(&mut self) -> bool {
        match self.transmit.try_recv() {
            Ok(message) => {
                if let Some(message) = self.accept(Some(message)) {
                    debug!(module = %self.id, path = %message.path, "parked for resend");
                    self.resend.push_back(message);
                }
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                self.accept(None);
                true
            }
        }
    }

    /// Wait up to `idle_backoff` for new traffic.
    async fn next_message(&mut self) -> Option<PublishMessage> {
        match tokio::time::timeout(self.idle_backoff, self.transmit.recv()).await {
            Ok(message) => self.accept(message),
            Err(_) => None,
        }
    }

    fn accept(&mut self, message: Option<BusMessage>) -> Option<PublishMessage> {
        match message {
            Some(BusMessage::Publish(message)) => Some(message),
            Some(BusMessage::PoisonPill) => {
                info!(module = %self.id, pending = self.resend.len(), "poison pill received");
                self.draining = true;
                None
            }
            Some(other) => {
                warn!(module = %self.id, kind = other.label(), "unrecognized message on transmit queue, dropping");
                None
            }
            None => {
                debug!(module = %self.id, "transmit queue closed");
                self.draining = true;
                None
            }
        }
    }
}
