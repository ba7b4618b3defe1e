//! # Keystone
//!
//! Authentication session tickets for game-platform clients.
//!
//! A ticket is requested from the platform's identity authority, delivered
//! once the authority confirms issuance, and can be canceled by its owner
//! at any time. Keystone turns the platform's callback-driven issuance into
//! one `async` call per request.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use keystone::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = KeystoneClientBuilder::new().build(LoopbackPlatform::auto_completing())?;
//! let broker = client.broker();
//!
//! let mut ticket = broker.request_ticket_for_identity(123456u64).await?;
//! println!("{} bytes", ticket.get_bytes()?.len());
//! ticket.cancel();
//!
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod broker;
mod client;
mod config;
mod error;
mod ticket;

pub use broker::Broker;
pub use client::{KeystoneClient, KeystoneClientBuilder};
pub use config::{BrokerConfig, ClientConfig};
pub use error::{ClientError, TicketError};
pub use ticket::{PendingTicket, Ticket, TicketCanceller, TicketState};

pub use keystone_platform as platform;
pub use keystone_pump::{PumpConfig, PumpStats};

pub mod prelude {
    pub use crate::{
        Broker, BrokerConfig, ClientConfig, ClientError, KeystoneClient,
        KeystoneClientBuilder, PendingTicket, PumpConfig, Ticket, TicketCanceller, TicketError,
        TicketState,
    };
    #[cfg(feature = "loopback")]
    pub use keystone_platform::LoopbackPlatform;
    pub use keystone_platform::{
        AccountId, Platform, PlatformError, TicketEvent, TicketHandle,
        TicketOutcome,
    };
}
