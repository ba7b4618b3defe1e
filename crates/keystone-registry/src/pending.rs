//! The caller's side of a registered request.

use std::sync::Arc;

use keystone_platform::{Platform, TicketHandle, TicketOutcome};
use tokio::sync::oneshot;

use crate::{CancelStatus, Registration, Registry};

/// How a pending request ended, as seen by its waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The platform reported an outcome for this handle.
    Completed(TicketOutcome),
    /// The entry was removed by `cancel_pending` (or a registry close)
    /// before any outcome arrived.
    Canceled,
}

/// A registered request that has not been waited on yet.
///
/// Dropping one before [`wait`](Self::wait) finishes cancels the request,
/// so a timed-out or abandoned future never leaves an entry or a platform
/// handle behind. The guard only ever touches this request's own
/// registration, never a later request that was issued the same handle.
pub struct PendingRequest<P: Platform> {
    registration: Registration,
    rx: oneshot::Receiver<TicketOutcome>,
    registry: Arc<Registry<P>>,
    settled: bool,
}

impl<P: Platform> PendingRequest<P> {
    pub(crate) fn new(
        registration: Registration,
        rx: oneshot::Receiver<TicketOutcome>,
        registry: Arc<Registry<P>>,
    ) -> Self {
        Self {
            registration,
            rx,
            registry,
            settled: false,
        }
    }

    /// The platform handle this request is waiting on.
    pub fn handle(&self) -> TicketHandle {
        self.registration.handle()
    }

    /// The registry entry this request owns.
    pub fn registration(&self) -> Registration {
        self.registration
    }

    /// The registry this request belongs to.
    pub fn registry(&self) -> &Arc<Registry<P>> {
        &self.registry
    }

    /// Suspends until the handle is resolved or canceled.
    ///
    /// This is the only suspension point in the ticket pipeline.
    pub async fn wait(mut self) -> Resolution {
        let received = (&mut self.rx).await;
        self.settled = true;
        match received {
            Ok(outcome) => Resolution::Completed(outcome),
            // The sender was dropped without sending: the entry was
            // removed by a cancel.
            Err(_) => Resolution::Canceled,
        }
    }

    /// Cancels the request without waiting. The drop guard has nothing
    /// left to do afterwards.
    pub fn cancel(mut self) -> CancelStatus {
        self.abandon()
    }

    fn abandon(&mut self) -> CancelStatus {
        self.settled = true;
        let status = self.registry.cancel_registration(self.registration);
        if status == CancelStatus::NotPending {
            // Resolve won the race and may already have delivered an
            // outcome that nobody will read. The handle is still ours
            // until that outcome is released.
            if let Ok(outcome) = self.rx.try_recv() {
                tracing::debug!(handle = %self.handle(), "releasing unread outcome");
                self.registry.release_orphan(self.handle(), &outcome);
            }
        }
        status
    }
}

impl<P: Platform> Drop for PendingRequest<P> {
    fn drop(&mut self) {
        if !self.settled {
            self.abandon();
        }
    }
}

impl<P: Platform> std::fmt::Debug for PendingRequest<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("handle", &self.handle())
            .field("settled", &self.settled)
            .finish()
    }
}
