//! Error types surfaced to callers.

use std::time::Duration;

use keystone_registry::RegistryError;

/// Everything that can go wrong with a ticket request or a ticket.
///
/// No variant is ever retried by Keystone itself; retry policy belongs to
/// the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TicketError {
    /// The platform refused to start issuance (not logged in, bad
    /// endpoint string, ...). Nothing was registered.
    #[error("issuance rejected: {0}")]
    IssuanceRejected(String),

    /// Issuance started but the authority reported a failure.
    #[error("issuance failed: {0}")]
    IssuanceFailed(String),

    /// The ticket was canceled; its bytes are no longer available.
    #[error("ticket has been canceled")]
    TicketCanceled,

    /// The request was canceled before the authority answered.
    #[error("ticket request was canceled before completion")]
    RequestCanceled,

    /// The authority did not answer within the request timeout. The
    /// request has been canceled.
    #[error("ticket was not issued within {0:?}")]
    TimedOut(Duration),

    /// The client was shut down; no new requests are accepted.
    #[error("client has been shut down")]
    ClientShutDown,

    /// The platform broke its contract (for example by issuing a handle
    /// that is still pending). Not recoverable locally.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RegistryError> for TicketError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Rejected(e) => Self::IssuanceRejected(e.to_string()),
            RegistryError::Closed => Self::ClientShutDown,
            e @ RegistryError::DuplicateHandle(_) => Self::Internal(e.to_string()),
        }
    }
}

/// Errors raised while bringing a client up.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The event pump needs a Tokio runtime to run on.
    #[error("no Tokio runtime is running: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}
