//! The Bus Router.
//!
//! Two long-lived loops run inside the main process:
//!
//! | Loop | Consumes | Delivers to |
//! |---|---|---|
//! | Receive→Subscribe | shared receive queue | the single interface module owning the path |
//! | Publish→Transmit | shared publish queue | every communication module's transmit queue |
//!
//! Both loops poll their inbound queue with a bounded wait and check a
//! shared stop flag once per cycle, so shutdown latency is bounded by the
//! poll timeout. Neither loop ever returns an error: anything it cannot
//! deliver is logged and dropped.
//!
//! Paths that resolve to nothing (unknown node, unknown property, no
//! callback) are routine on a shared bus and logged at `debug`; only a
//! closed owner queue or a foreign message kind reaches `warn`.
//!
//! Dropping the [`RouterHandle`] raises the stop flag and aborts both loops,
//! so the router never outlives its owner.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use busgate_types::{BusMessage, SubscribeMessage};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::queue::{BusReceiver, BusSender};
use crate::registry::DataTree;

// ─────────────────────────────────────────────────────────────────────────────
// Routing
// ─────────────────────────────────────────────────────────────────────────────

/// Default bounded wait on the router's inbound queues.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of routing one message from the receive queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routing {
    /// Enqueued on the owning module's subscribe queue.
    Delivered { module: String },
    /// The path did not name a registered node.
    UnknownNode,
    /// The node exists but has no such property.
    UnknownProperty { node: String },
    /// The property exists but declares no callback.
    NoCallback,
    /// The message was not a subscribe message.
    Unrecognized,
    /// The owning module's queue is closed (its loop has already stopped).
    Undeliverable { module: String },
}

/// Routes bus traffic between the shared queues and per-module queues.
pub struct BusRouter {
    tree: Arc<DataTree>,
    /// `(module id, transmit queue)` for every communication module.
    transmit_queues: Vec<(String, BusSender)>,
    stop: Arc<AtomicBool>,
    poll_timeout: Duration,
}

/// Running router loops. Dropping the handle aborts them.
pub struct RouterHandle {
    stop: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl BusRouter {
    pub fn new(
        tree: Arc<DataTree>,
        transmit_queues: Vec<(String, BusSender)>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            tree,
            transmit_queues,
            stop: Arc::new(AtomicBool::new(false)),
            poll_timeout,
        }
    }

    /// Resolve a message taken from the receive queue and hand it to the
    /// owning interface module, stamped with the property's callback name.
    pub fn route(&self, message: BusMessage) -> Routing {
        let message = match message {
            BusMessage::Subscribe(message) => message,
            other => {
                warn!(kind = other.label(), "unrecognized message on receive queue, dropping");
                return Routing::Unrecognized;
            }
        };

        let (node, property) = self.tree.resolve(&message.path);
        let Some(node) = node else {
            debug!(path = %message.path, "no node registered for path, dropping");
            return Routing::UnknownNode;
        };
        let Some(property) = property else {
            debug!(path = %message.path, node = %node.id, "node has no such property, dropping");
            return Routing::UnknownProperty {
                node: node.id.clone(),
            };
        };
        let Some(callback) = property.callback.clone() else {
            debug!(path = %message.path, "property declares no callback, dropping");
            return Routing::NoCallback;
        };
        let Some(queue) = self.tree.subscribe_queue(&node.id) else {
            return Routing::UnknownNode;
        };

        let stamped = SubscribeMessage {
            callback: Some(callback),
            ..message
        };
        let path = stamped.path.clone();
        match queue.send(BusMessage::Subscribe(stamped)) {
            Ok(()) => {
                debug!(path = %path, module = %node.module, "routed subscribe message");
                Routing::Delivered {
                    module: node.module.clone(),
                }
            }
            Err(_) => {
                warn!(path = %path, module = %node.module, "subscribe queue closed, dropping");
                Routing::Undeliverable {
                    module: node.module.clone(),
                }
            }
        }
    }

    /// Copy a message taken from the publish queue onto every communication
    /// module's transmit queue. Returns the number of queues that took it.
    pub fn broadcast(&self, message: BusMessage) -> usize {
        let message = match message {
            BusMessage::Publish(message) => message,
            other => {
                warn!(kind = other.label(), "unrecognized message on publish queue, dropping");
                return 0;
            }
        };

        let mut delivered = 0;
        for (module, queue) in &self.transmit_queues {
            match queue.send(BusMessage::Publish(message.clone())) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    debug!(module = %module, path = %message.path, "transmit queue closed, skipping");
                }
            }
        }
        delivered
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Loops
    // ─────────────────────────────────────────────────────────────────────────

    /// Spawn both router loops onto the current Tokio runtime.
    pub fn spawn(self, receive_rx: BusReceiver, publish_rx: BusReceiver) -> RouterHandle {
        let stop = Arc::clone(&self.stop);
        let router = Arc::new(self);

        let receive = {
            let router = Arc::clone(&router);
            tokio::spawn(async move {
                router
                    .poll_loop("receive", receive_rx, |r, m| {
                        r.route(m);
                    })
                    .await;
            })
        };
        let publish = tokio::spawn(async move {
            router
                .poll_loop("publish", publish_rx, |r, m| {
                    r.broadcast(m);
                })
                .await;
        });

        RouterHandle {
            stop,
            tasks: vec![receive, publish],
        }
    }

    async fn poll_loop<F>(&self, name: &'static str, mut inbound: BusReceiver, mut handle: F)
    where
        F: FnMut(&Self, BusMessage),
    {
        info!(router = name, "router loop started");
        while !self.stop.load(Ordering::SeqCst) {
            match tokio::time::timeout(self.poll_timeout, inbound.recv()).await {
                Err(_) => continue,
                Ok(Some(message)) => handle(self, message),
                Ok(None) => {
                    debug!(router = name, "inbound queue closed");
                    break;
                }
            }
        }
        info!(router = name, "router loop stopped");
    }
}

impl RouterHandle {
    /// Raise the shared stop flag and wait for both loops to return.
    ///
    /// Each loop notices the flag within one poll timeout; a loop still
    /// running after `grace` is aborted.
    pub async fn stop(mut self, grace: Duration) {
        self.stop.store(true, Ordering::SeqCst);
        for mut task in std::mem::take(&mut self.tasks) {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                warn!("router loop did not stop in time, aborting");
                task.abort();
                let _ = task.await;
            }
        }
    }
}

impl Drop for RouterHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for task in &self.tasks {
            task.abort();
        }
    }
}
