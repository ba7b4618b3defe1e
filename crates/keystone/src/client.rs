//! `KeystoneClient` builder and lifecycle.
//!
//! The client is the explicit context object the rest of the API hangs
//! off. Building it (init) creates the request registry and starts the
//! event pump; [`KeystoneClient::shutdown`] stops both.

use std::sync::Arc;

use keystone_platform::Platform;
use keystone_pump::{EventPump, PumpConfig, PumpHandle, PumpStats};
use keystone_registry::Registry;

use crate::{Broker, BrokerConfig, ClientConfig, ClientError};

/// Builder for configuring and starting a [`KeystoneClient`].
///
/// # Example
///
/// ```rust,ignore
/// use keystone::prelude::*;
///
/// let client = KeystoneClientBuilder::new()
///     .pump_config(PumpConfig::with_rate(60))
///     .build(my_platform)?;
/// ```
pub struct KeystoneClientBuilder {
    config: ClientConfig,
}

impl KeystoneClientBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event pump configuration.
    pub fn pump_config(mut self, config: PumpConfig) -> Self {
        self.config.pump = config;
        self
    }

    /// Sets the broker configuration.
    pub fn broker_config(mut self, config: BrokerConfig) -> Self {
        self.config.broker = config;
        self
    }

    /// Starts the client on the current Tokio runtime.
    ///
    /// # Errors
    /// [`ClientError::NoRuntime`] when called outside a Tokio runtime.
    pub fn build<P: Platform>(
        self,
        platform: P,
    ) -> Result<KeystoneClient<P>, ClientError> {
        tokio::runtime::Handle::try_current()?;

        let registry = Arc::new(Registry::new(platform));
        let pump = EventPump::spawn(Arc::clone(&registry), self.config.pump);

        tracing::info!("keystone client started");
        Ok(KeystoneClient {
            registry,
            broker_config: self.config.broker,
            pump: Some(pump),
        })
    }
}

impl Default for KeystoneClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running ticket client.
///
/// Dropping the client without calling [`shutdown`](Self::shutdown) still
/// stops the pump and cancels outstanding requests, but skips the final
/// event drain.
pub struct KeystoneClient<P: Platform> {
    registry: Arc<Registry<P>>,
    broker_config: BrokerConfig,
    pump: Option<PumpHandle>,
}

impl<P: Platform> KeystoneClient<P> {
    /// A broker for requesting tickets through this client.
    pub fn broker(&self) -> Broker<P> {
        Broker::new(Arc::clone(&self.registry), self.broker_config.clone())
    }

    /// The platform this client talks to.
    pub fn platform(&self) -> &P {
        self.registry.platform()
    }

    /// Event pump totals so far. `None` once shut down.
    pub fn pump_stats(&self) -> Option<PumpStats> {
        self.pump.as_ref().map(PumpHandle::stats)
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.pump.is_none()
    }

    /// Stops the event pump and closes the registry.
    ///
    /// Events already queued at the platform are delivered first. Every
    /// request still pending afterwards is canceled and its waiter sees
    /// [`TicketError::RequestCanceled`](crate::TicketError::RequestCanceled).
    /// Brokers handed out earlier then fail new requests with
    /// [`TicketError::ClientShutDown`](crate::TicketError::ClientShutDown).
    ///
    /// Returns the pump's totals on the first call and `None` afterwards.
    pub async fn shutdown(&mut self) -> Option<PumpStats> {
        let pump = self.pump.take()?;
        let totals = pump.shutdown().await;
        let canceled = self.registry.close();
        tracing::info!(
            delivered = totals.delivered,
            canceled,
            "keystone client shut down"
        );
        Some(totals)
    }
}

impl<P: Platform> Drop for KeystoneClient<P> {
    fn drop(&mut self) {
        if self.pump.is_some() {
            // The pump stops when its handle drops with us.
            self.registry.close();
        }
    }
}
