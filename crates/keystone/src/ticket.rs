//! Tickets and in-flight ticket requests.
//!
//! A request goes through this state machine:
//!
//! ```text
//!   Issued ──→ Pending ──(success)──→ Active ──(cancel)──→ Canceled
//!                 │  └────(failure)──→ Failed
//!                 └──(cancel / timeout)──────────────────→ Canceled
//! ```
//!
//! [`PendingTicket`] is the `Pending` stage. [`Ticket`] covers `Active`
//! and `Canceled`. `Failed` never produces an object, only a
//! [`TicketError::IssuanceFailed`].

use std::sync::Arc;
use std::time::Duration;

use keystone_platform::{Platform, TicketHandle, TicketOutcome};
use keystone_registry::{
    CancelStatus, PendingRequest, Registration, Registry, Resolution,
};

use crate::TicketError;

// ---------------------------------------------------------------------------
// TicketState
// ---------------------------------------------------------------------------

/// Validity of an issued ticket. Only ever moves from `Active` to
/// `Canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState {
    Active,
    Canceled,
}

// ---------------------------------------------------------------------------
// Ticket
// ---------------------------------------------------------------------------

/// An issued authentication ticket.
///
/// Owned by the caller. The payload never changes; canceling only hides it
/// and tells the platform the ticket is no longer valid.
///
/// Dropping an `Active` ticket invalidates it at the platform, the same as
/// calling [`cancel`](Self::cancel). Keep the ticket alive for as long as
/// the peer or service needs it to stay valid.
pub struct Ticket<P: Platform> {
    handle: TicketHandle,
    bytes: Vec<u8>,
    state: TicketState,
    registry: Arc<Registry<P>>,
}

impl<P: Platform> Ticket<P> {
    pub(crate) fn new(
        handle: TicketHandle,
        bytes: Vec<u8>,
        registry: Arc<Registry<P>>,
    ) -> Self {
        Self {
            handle,
            bytes,
            state: TicketState::Active,
            registry,
        }
    }

    /// The platform handle the ticket was issued under.
    pub fn handle(&self) -> TicketHandle {
        self.handle
    }

    /// Current validity state.
    pub fn state(&self) -> TicketState {
        self.state
    }

    /// Returns `true` until the ticket is canceled.
    pub fn is_active(&self) -> bool {
        self.state == TicketState::Active
    }

    /// The ticket payload, exactly as the authority issued it.
    ///
    /// # Errors
    /// [`TicketError::TicketCanceled`] once [`cancel`](Self::cancel) has
    /// been called.
    pub fn get_bytes(&self) -> Result<&[u8], TicketError> {
        match self.state {
            TicketState::Active => Ok(&self.bytes),
            TicketState::Canceled => Err(TicketError::TicketCanceled),
        }
    }

    /// Cancels the ticket.
    ///
    /// If the handle somehow still has a pending entry it is canceled
    /// there; otherwise the issued ticket is invalidated at the platform.
    /// The local state becomes `Canceled` either way, whether or not the
    /// authority ever acknowledges it. Calling this again does nothing.
    pub fn cancel(&mut self) {
        if self.state == TicketState::Canceled {
            return;
        }
        if self.registry.cancel_pending(self.handle) == CancelStatus::NotPending {
            self.registry.platform().invalidate_ticket(self.handle);
        }
        self.state = TicketState::Canceled;
        tracing::info!(handle = %self.handle, "ticket canceled");
    }
}

impl<P: Platform> Drop for Ticket<P> {
    fn drop(&mut self) {
        if self.state == TicketState::Active {
            self.registry.platform().invalidate_ticket(self.handle);
            tracing::debug!(handle = %self.handle, "active ticket dropped; invalidated");
        }
    }
}

impl<P: Platform> std::fmt::Debug for Ticket<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The payload is a credential; keep it out of logs.
        f.debug_struct("Ticket")
            .field("handle", &self.handle)
            .field("len", &self.bytes.len())
            .field("state", &self.state)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PendingTicket
// ---------------------------------------------------------------------------

/// A ticket request that has been issued and registered but not yet
/// answered.
///
/// Dropping it cancels the request.
pub struct PendingTicket<P: Platform> {
    request: PendingRequest<P>,
    timeout: Option<Duration>,
}

impl<P: Platform> PendingTicket<P> {
    pub(crate) fn new(request: PendingRequest<P>, timeout: Option<Duration>) -> Self {
        Self { request, timeout }
    }

    /// The platform handle for this request.
    pub fn handle(&self) -> TicketHandle {
        self.request.handle()
    }

    /// The timeout [`wait`](Self::wait) will apply.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Overrides the broker's default timeout for this request.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// A handle that can cancel this request from another task while
    /// [`wait`](Self::wait) is in flight.
    pub fn canceller(&self) -> TicketCanceller<P> {
        TicketCanceller {
            registration: self.request.registration(),
            registry: Arc::clone(self.request.registry()),
        }
    }

    /// Cancels the request. A completion event that arrives later is
    /// discarded.
    pub fn cancel(self) {
        self.request.cancel();
    }

    /// Suspends until the authority answers, the request is canceled, or
    /// the timeout expires.
    ///
    /// # Errors
    /// - [`TicketError::IssuanceFailed`] — the authority reported failure.
    /// - [`TicketError::RequestCanceled`] — canceled before completion.
    /// - [`TicketError::TimedOut`] — no answer in time; the request has
    ///   been canceled.
    pub async fn wait(self) -> Result<Ticket<P>, TicketError> {
        let handle = self.request.handle();
        let registry = Arc::clone(self.request.registry());

        let resolution = match self.timeout {
            Some(limit) => {
                // On expiry the inner wait is dropped, which cancels the
                // registry entry and releases the handle.
                match tokio::time::timeout(limit, self.request.wait()).await {
                    Ok(resolution) => resolution,
                    Err(_) => {
                        tracing::warn!(%handle, ?limit, "ticket request timed out");
                        return Err(TicketError::TimedOut(limit));
                    }
                }
            }
            None => self.request.wait().await,
        };

        match resolution {
            Resolution::Completed(TicketOutcome::Success(bytes)) => {
                tracing::info!(%handle, len = bytes.len(), "ticket issued");
                Ok(Ticket::new(handle, bytes, registry))
            }
            Resolution::Completed(TicketOutcome::Failure(reason)) => {
                registry.platform().cancel_issuance(handle);
                tracing::error!(%handle, %reason, "ticket issuance failed");
                Err(TicketError::IssuanceFailed(reason))
            }
            Resolution::Canceled => {
                tracing::debug!(%handle, "ticket request canceled while waiting");
                Err(TicketError::RequestCanceled)
            }
        }
    }
}

impl<P: Platform> std::fmt::Debug for PendingTicket<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTicket")
            .field("handle", &self.request.handle())
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// TicketCanceller
// ---------------------------------------------------------------------------

/// Cancels one pending request. Cheap to clone and `Send`, so it can be
/// handed to a timer or UI task.
///
/// A canceller kept past the end of its request is inert: if the platform
/// has since issued the same handle to another request, that request is
/// left alone.
pub struct TicketCanceller<P: Platform> {
    registration: Registration,
    registry: Arc<Registry<P>>,
}

impl<P: Platform> TicketCanceller<P> {
    /// The handle this canceller targets.
    pub fn handle(&self) -> TicketHandle {
        self.registration.handle()
    }

    /// Cancels the request if it is still pending.
    ///
    /// Returns `true` if this call removed it, `false` if it had already
    /// been answered or canceled.
    pub fn cancel(&self) -> bool {
        self.registry.cancel_registration(self.registration) == CancelStatus::WasPending
    }
}

impl<P: Platform> Clone for TicketCanceller<P> {
    fn clone(&self) -> Self {
        Self {
            registration: self.registration,
            registry: Arc::clone(&self.registry),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use keystone_platform::LoopbackPlatform;

    use super::*;

    fn active_ticket() -> (Arc<LoopbackPlatform>, Ticket<Arc<LoopbackPlatform>>) {
        let platform = Arc::new(LoopbackPlatform::new());
        let registry = Arc::new(Registry::new(Arc::clone(&platform)));
        let handle = platform.issue_generic("test").unwrap();
        let ticket = Ticket::new(handle, vec![0xAA, 0xBB], registry);
        (platform, ticket)
    }

    #[test]
    fn test_get_bytes_active_returns_payload() {
        let (_, ticket) = active_ticket();

        assert!(ticket.is_active());
        assert_eq!(ticket.get_bytes().unwrap(), &[0xAA, 0xBB]);
    }

    #[test]
    fn test_cancel_active_invalidates_at_platform() {
        let (platform, mut ticket) = active_ticket();

        ticket.cancel();

        assert_eq!(ticket.state(), TicketState::Canceled);
        assert!(platform.was_invalidated(ticket.handle()));
        assert_eq!(ticket.get_bytes(), Err(TicketError::TicketCanceled));
    }

    #[test]
    fn test_cancel_twice_is_noop() {
        let (_, mut ticket) = active_ticket();

        ticket.cancel();
        ticket.cancel();

        assert_eq!(ticket.state(), TicketState::Canceled);
        assert_eq!(ticket.get_bytes(), Err(TicketError::TicketCanceled));
    }

    #[test]
    fn test_cancel_with_pending_entry_cancels_issuance_instead() {
        // A ticket whose handle still has a registry entry: cancel takes
        // the pending path rather than invalidating.
        let platform = Arc::new(LoopbackPlatform::new());
        let registry = Arc::new(Registry::new(Arc::clone(&platform)));
        let pending = registry.issue(|p| p.issue_generic("test")).unwrap();
        let handle = pending.handle();
        let mut ticket = Ticket::new(handle, vec![1], Arc::clone(&registry));

        ticket.cancel();

        assert!(platform.was_canceled(handle));
        assert!(!platform.was_invalidated(handle));
        assert!(!registry.contains(handle));
        drop(pending);
    }

    #[test]
    fn test_drop_active_ticket_invalidates() {
        let (platform, ticket) = active_ticket();
        let handle = ticket.handle();

        drop(ticket);

        assert!(platform.was_invalidated(handle));
    }

    #[test]
    fn test_drop_canceled_ticket_does_not_invalidate_again() {
        let (platform, mut ticket) = active_ticket();
        let handle = ticket.handle();
        ticket.cancel();

        drop(ticket);

        assert_eq!(platform.invalidate_count(handle), 1);
    }

    #[test]
    fn test_stale_canceller_leaves_recycled_handle_alone() {
        let platform = Arc::new(LoopbackPlatform::recycling());
        let registry = Arc::new(Registry::new(Arc::clone(&platform)));
        let first = PendingTicket::new(registry.issue(|p| p.issue_generic("a")).unwrap(), None);
        let stale = first.canceller();
        first.cancel();

        let second = PendingTicket::new(registry.issue(|p| p.issue_generic("b")).unwrap(), None);
        assert_eq!(second.handle(), stale.handle(), "platform reissued the handle");

        assert!(!stale.cancel());
        assert!(registry.contains(second.handle()));
        assert_eq!(platform.cancel_count(second.handle()), 1);
    }

    #[test]
    fn test_debug_hides_payload() {
        let (_, ticket) = active_ticket();

        let rendered = format!("{ticket:?}");

        assert!(rendered.contains("len: 2"));
        assert!(!rendered.contains("170"), "payload bytes must not be printed");
    }
}
