/*
Owns the spawned reactor task of a publisher or subscriber.

Stopping flips the shared watch flag every suspension point of the reactor
listens to, then waits for the task to finish. Dropping the last handle has
the same effect minus the wait.
*/

use crate::core::connection::{ConnectionManager, LinkStatus};
use crate::core::endpoint::Endpoint;
use crate::core::ledger::DeliveryLedger;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Requests a stop without waiting for it. Used with `run()`.
#[derive(Debug, Clone)]
pub struct Stopper {
    shutdown: Arc<watch::Sender<bool>>,
}

impl Stopper {
    pub(crate) fn new(shutdown: Arc<watch::Sender<bool>>) -> Self {
        Stopper { shutdown }
    }

    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }
}

#[derive(Debug)]
pub struct LinkHandle {
    stopper: Stopper,
    task: Mutex<Option<JoinHandle<()>>>,
    status: watch::Receiver<LinkStatus>,
    ledger: Arc<DeliveryLedger>,
}

impl LinkHandle {
    pub(crate) fn spawn<E: Endpoint + 'static>(
        manager: ConnectionManager<E>,
        stopper: Stopper,
        status: watch::Receiver<LinkStatus>,
        ledger: Arc<DeliveryLedger>,
    ) -> Self {
        let task = tokio::spawn(manager.run());
        LinkHandle {
            stopper,
            task: Mutex::new(Some(task)),
            status,
            ledger,
        }
    }

    /// Idempotent. When it returns the reactor has finished and does no more I/O.
    pub async fn stop(&self) {
        self.stopper.stop();
        let mut task = self.task.lock().await;
        match task.take() {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!(error = %e, "link task failed");
                }
                debug!("link task joined");
            }
            None => debug!("link already stopped"),
        }
    }

    pub fn status(&self) -> LinkStatus {
        *self.status.borrow()
    }

    /// Resolves once the status satisfies `pred`, or the link has finished.
    pub async fn wait_for(&self, pred: impl FnMut(&LinkStatus) -> bool) -> LinkStatus {
        let mut rx = self.status.clone();
        let reached = match rx.wait_for(pred).await {
            Ok(status) => Some(*status),
            Err(_) => None,
        };
        reached.unwrap_or_else(|| *rx.borrow())
    }

    pub async fn wait_ready(&self) -> LinkStatus {
        self.wait_for(|s| s.state.is_ready() || s.state.is_terminal()).await
    }

    pub fn ledger(&self) -> &Arc<DeliveryLedger> {
        &self.ledger
    }

    pub fn stopper(&self) -> Stopper {
        self.stopper.clone()
    }
}
