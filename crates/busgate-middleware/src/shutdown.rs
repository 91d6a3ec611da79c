//! System-wide shutdown requests.
//!
//! A [`ShutdownHandle`] is cloned into the CLI's signal handler and into every
//! module's load context. Whoever calls it first wakes the supervisor, which
//! then runs the stop sequence. [`ShutdownHandle::signal`] additionally raises
//! the shared interrupt flag so module loops skip their retry drain.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, error};

/// Why the gateway is shutting down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// An OS termination signal (SIGINT / SIGTERM).
    Signal,
    /// A module decided it cannot continue.
    Fatal { module: String, reason: String },
    /// A module or operator asked for an orderly stop.
    Requested { source: String },
}

impl ShutdownReason {
    /// Process exit status for this reason.
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownReason::Fatal { .. } => 1,
            _ => 0,
        }
    }
}

/// Cloneable handle used to request a gateway shutdown.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    sender: mpsc::UnboundedSender<ShutdownReason>,
    interrupted: Arc<AtomicBool>,
}

/// Receiving end owned by the supervisor.
#[derive(Debug)]
pub struct ShutdownSignal {
    receiver: mpsc::UnboundedReceiver<ShutdownReason>,
}

impl ShutdownHandle {
    /// Create a connected handle / signal pair.
    pub fn channel() -> (ShutdownHandle, ShutdownSignal) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            ShutdownHandle {
                sender,
                interrupted: Arc::new(AtomicBool::new(false)),
            },
            ShutdownSignal { receiver },
        )
    }

    /// An OS termination signal arrived: raise the interrupt flag and
    /// request shutdown. Safe to call from a non-async signal thread.
    pub fn signal(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.send(ShutdownReason::Signal);
    }

    /// A module hit a condition it cannot recover from. The gateway exits
    /// with a non-zero status.
    pub fn fatal(&self, module: impl Into<String>, reason: impl Into<String>) {
        let module = module.into();
        let reason = reason.into();
        error!(module = %module, reason = %reason, "fatal module condition, requesting shutdown");
        self.send(ShutdownReason::Fatal { module, reason });
    }

    /// Ask for an orderly shutdown.
    pub fn request(&self, source: impl Into<String>) {
        self.send(ShutdownReason::Requested {
            source: source.into(),
        });
    }

    /// `true` once [`ShutdownHandle::signal`] has been called.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// The shared interrupt flag observed by supervised loops.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    fn send(&self, reason: ShutdownReason) {
        if self.sender.send(reason).is_err() {
            debug!("shutdown already in progress; request ignored");
        }
    }
}

impl ShutdownSignal {
    /// Wait for the first shutdown request.
    ///
    /// Returns `None` only if every handle has been dropped.
    pub async fn recv(&mut self) -> Option<ShutdownReason> {
        self.receiver.recv().await
    }
}
