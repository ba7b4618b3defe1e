//! Error types for the registry.

use keystone_platform::{PlatformError, TicketHandle};

/// Errors raised while registering a request.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The handle already has a pending entry. A correct platform never
    /// hands out a handle that is still outstanding, so this is a breach
    /// of the platform contract rather than a runtime condition.
    #[error("handle {0} is already registered")]
    DuplicateHandle(TicketHandle),

    /// The platform refused to start issuance. No entry was created.
    #[error("issuance rejected: {0}")]
    Rejected(#[from] PlatformError),

    /// The registry was closed by a client shutdown.
    #[error("registry is closed")]
    Closed,
}
