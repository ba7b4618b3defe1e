//! Ticket request registry for Keystone.
//!
//! The platform finishes ticket issuance whenever it likes and reports it
//! through an event. The caller that started the request is somewhere else,
//! suspended on a future. This crate is the one place where the two meet:
//!
//! 1. **Registration** — a freshly issued [`TicketHandle`] gets a pending
//!    entry and the caller gets a [`PendingRequest`] to wait on.
//! 2. **Resolution** — the event pump hands each completion event to
//!    [`Registry::resolve`], which wakes exactly one waiter.
//! 3. **Cancellation** — [`Registry::cancel_pending`] races resolution on
//!    the same handle. Whichever removes the entry first wins; the other
//!    becomes a no-op. Drop guards and cancellers hold a [`Registration`]
//!    rather than a bare handle, so they cannot cancel a later request the
//!    platform issued the same recycled handle to.
//!
//! # How it fits in the stack
//!
//! ```text
//! Broker (above)  ← issues requests, turns outcomes into tickets
//!     ↕
//! Registry (this crate)  ← handle table, wake-ups, cancel races
//!     ↕
//! Platform (below)  ← TicketHandle, TicketEvent, issuance calls
//! ```
//!
//! [`TicketHandle`]: keystone_platform::TicketHandle

mod error;
mod pending;
mod registry;

pub use error::RegistryError;
pub use pending::{PendingRequest, Resolution};
pub use registry::{CancelStatus, Registration, Registry, ResolveStatus};
