//! The public entry points for requesting tickets.
//!
//! Every variant runs the same pipeline and differs only in which platform
//! issuance call it makes:
//!
//! ```text
//! issue ──→ register ──→ wait ──→ Ticket (Active)
//!   │                      └────→ TicketError::IssuanceFailed
//!   └──→ TicketError::IssuanceRejected (nothing registered)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use keystone_platform::{AccountId, Platform, PlatformError, TicketHandle};
use keystone_registry::{Registry, RegistryError};

use crate::{BrokerConfig, PendingTicket, Ticket, TicketError};

/// Requests tickets from the platform.
///
/// Cheap to clone: all clones share one registry.
pub struct Broker<P: Platform> {
    registry: Arc<Registry<P>>,
    config: BrokerConfig,
}

impl<P: Platform> Broker<P> {
    /// Creates a broker in front of `registry`.
    pub fn new(registry: Arc<Registry<P>>, config: BrokerConfig) -> Self {
        Self { registry, config }
    }

    /// The platform tickets are issued by.
    pub fn platform(&self) -> &P {
        self.registry.platform()
    }

    /// The shared request registry.
    pub fn registry(&self) -> &Arc<Registry<P>> {
        &self.registry
    }

    /// The broker's request settings.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    // -- Issue (non-suspending) --------------------------------------------

    /// Starts a request scoped to a persistent account.
    pub fn issue_for_identity(
        &self,
        identity: impl Into<AccountId>,
    ) -> Result<PendingTicket<P>, TicketError> {
        let account = identity.into();
        tracing::info!(%account, "requesting ticket for identity");
        self.issue_with(|p| p.issue_for_identity(account))
    }

    /// Starts a request scoped to a peer endpoint given as `"ip:port"`.
    ///
    /// # Errors
    /// [`TicketError::IssuanceRejected`] if `endpoint` is not a socket
    /// address; the platform is never called in that case.
    pub fn issue_for_endpoint(
        &self,
        endpoint: &str,
    ) -> Result<PendingTicket<P>, TicketError> {
        let addr: SocketAddr = endpoint.parse().map_err(|e| {
            let err = PlatformError::InvalidEndpoint(format!("{endpoint:?}: {e}"));
            tracing::warn!(error = %err, "ticket request rejected");
            TicketError::IssuanceRejected(err.to_string())
        })?;
        tracing::info!(endpoint = %addr, "requesting ticket for endpoint");
        self.issue_with(|p| p.issue_for_endpoint(addr))
    }

    /// Starts a request for an application-supplied context label.
    pub fn issue(&self, context: &str) -> Result<PendingTicket<P>, TicketError> {
        tracing::info!(context, "requesting ticket");
        self.issue_with(|p| p.issue_generic(context))
    }

    fn issue_with<F>(&self, issue: F) -> Result<PendingTicket<P>, TicketError>
    where
        F: FnOnce(&P) -> Result<TicketHandle, PlatformError>,
    {
        match self.registry.issue(issue) {
            Ok(request) => {
                tracing::debug!(handle = %request.handle(), "ticket request pending");
                Ok(PendingTicket::new(request, self.config.request_timeout))
            }
            // Duplicate handles are already logged at error level by the
            // registry.
            Err(err @ RegistryError::DuplicateHandle(_)) => Err(err.into()),
            Err(err) => {
                tracing::warn!(error = %err, "ticket request not started");
                Err(err.into())
            }
        }
    }

    // -- Request (suspending) ----------------------------------------------

    /// Requests a ticket scoped to a persistent account and waits for it.
    pub async fn request_ticket_for_identity(
        &self,
        identity: impl Into<AccountId>,
    ) -> Result<Ticket<P>, TicketError> {
        self.issue_for_identity(identity)?.wait().await
    }

    /// Requests a ticket scoped to a peer endpoint and waits for it.
    pub async fn request_ticket_for_endpoint(
        &self,
        endpoint: &str,
    ) -> Result<Ticket<P>, TicketError> {
        self.issue_for_endpoint(endpoint)?.wait().await
    }

    /// Requests a ticket for a context label and waits for it.
    pub async fn request_ticket(
        &self,
        context: &str,
    ) -> Result<Ticket<P>, TicketError> {
        self.issue(context)?.wait().await
    }
}

impl<P: Platform> Clone for Broker<P> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            config: self.config.clone(),
        }
    }
}
