/// Errors a platform raises when it refuses to start issuance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    /// The local user is not signed in to the platform.
    #[error("not logged in")]
    NotLoggedIn,

    /// The endpoint string could not be used to scope a ticket.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The platform is not in a state to issue tickets.
    #[error("platform unavailable: {0}")]
    Unavailable(String),
}
