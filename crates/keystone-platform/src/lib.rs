//! Platform boundary for Keystone.
//!
//! Keystone does not talk to the identity authority itself. The game
//! platform's SDK does that, and this crate describes the small slice of
//! that SDK the ticket subsystem needs:
//!
//! - three synchronous issuance calls that hand back a [`TicketHandle`]
//!   immediately,
//! - two fire-and-forget release calls,
//! - a queue of completion events, drained by [`Platform::poll_events`].
//!
//! # Feature Flags
//!
//! - `loopback` (default) — [`LoopbackPlatform`], an in-memory authority
//!   for tests, demos and offline development.

mod error;
#[cfg(feature = "loopback")]
mod loopback;

pub use error::PlatformError;
#[cfg(feature = "loopback")]
pub use loopback::{IssueRequest, LoopbackPlatform};

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Opaque platform-assigned identifier for one issuance request.
///
/// Keystone never invents these: they only come back from the issuance
/// calls on [`Platform`]. Implementations build them with
/// [`TicketHandle::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketHandle(u32);

impl TicketHandle {
    /// The "no ticket" sentinel. Never returned by a well-behaved platform.
    pub const INVALID: TicketHandle = TicketHandle(0);

    /// Creates a handle from the platform's raw value.
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw platform value.
    pub fn into_inner(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TicketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H-{}", self.0)
    }
}

/// A persistent account identifier (for example a 64-bit platform user id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u64);

impl From<u64> for AccountId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Completion events
// ---------------------------------------------------------------------------

/// How an issuance request finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketOutcome {
    /// The authority issued the ticket. Carries the opaque payload.
    Success(Vec<u8>),
    /// The authority refused or could not be reached.
    Failure(String),
}

/// A completion event raised by the platform for one handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketEvent {
    /// The request this event completes.
    pub handle: TicketHandle,
    /// Success payload or failure reason.
    pub outcome: TicketOutcome,
}

impl TicketEvent {
    /// Shorthand for a successful completion.
    pub fn success(handle: TicketHandle, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            handle,
            outcome: TicketOutcome::Success(bytes.into()),
        }
    }

    /// Shorthand for a failed completion.
    pub fn failure(handle: TicketHandle, reason: impl Into<String>) -> Self {
        Self {
            handle,
            outcome: TicketOutcome::Failure(reason.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Platform trait
// ---------------------------------------------------------------------------

/// The SDK calls the ticket subsystem depends on.
///
/// Every call is synchronous. Issuance returns a handle right away and
/// completes later through an event that shows up in
/// [`poll_events`](Platform::poll_events).
///
/// # Trait bounds
///
/// `Send + Sync + 'static` because one platform instance is shared by the
/// event pump task and every caller task.
pub trait Platform: Send + Sync + 'static {
    /// Starts issuance scoped to a persistent account.
    fn issue_for_identity(
        &self,
        account: AccountId,
    ) -> Result<TicketHandle, PlatformError>;

    /// Starts issuance scoped to a peer addressed directly by endpoint.
    fn issue_for_endpoint(
        &self,
        endpoint: SocketAddr,
    ) -> Result<TicketHandle, PlatformError>;

    /// Starts issuance for an application-supplied context label, with no
    /// peer binding.
    fn issue_generic(&self, context: &str) -> Result<TicketHandle, PlatformError>;

    /// Abandons an issuance that has not completed yet.
    fn cancel_issuance(&self, handle: TicketHandle);

    /// Invalidates a ticket that was already issued.
    fn invalidate_ticket(&self, handle: TicketHandle);

    /// Drains every completion event queued since the last call.
    fn poll_events(&self) -> Vec<TicketEvent>;
}

impl<P: Platform> Platform for std::sync::Arc<P> {
    fn issue_for_identity(
        &self,
        account: AccountId,
    ) -> Result<TicketHandle, PlatformError> {
        (**self).issue_for_identity(account)
    }

    fn issue_for_endpoint(
        &self,
        endpoint: SocketAddr,
    ) -> Result<TicketHandle, PlatformError> {
        (**self).issue_for_endpoint(endpoint)
    }

    fn issue_generic(&self, context: &str) -> Result<TicketHandle, PlatformError> {
        (**self).issue_generic(context)
    }

    fn cancel_issuance(&self, handle: TicketHandle) {
        (**self).cancel_issuance(handle)
    }

    fn invalidate_ticket(&self, handle: TicketHandle) {
        (**self).invalidate_ticket(handle)
    }

    fn poll_events(&self) -> Vec<TicketEvent> {
        (**self).poll_events()
    }
}
