//! Client and broker configuration.

use std::time::Duration;

use keystone_pump::PumpConfig;
use serde::{Deserialize, Serialize};

/// Settings for ticket requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// How long a request may stay pending before it is canceled and
    /// reported as [`TicketError::TimedOut`](crate::TicketError::TimedOut).
    ///
    /// Default: 10 seconds. `None` waits forever.
    pub request_timeout: Option<Duration>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// Everything [`KeystoneClient`](crate::KeystoneClient) needs at init.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Event pump settings.
    pub pump: PumpConfig,
    /// Ticket request settings.
    pub broker: BrokerConfig,
}
