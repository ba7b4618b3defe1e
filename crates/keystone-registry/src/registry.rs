//! The handle table shared by the event pump and every caller task.
//!
//! # Concurrency note
//!
//! The table sits behind one `std::sync::Mutex`. Every operation holds it
//! only for a map insert or remove and never across an `.await`, so a
//! blocking mutex is the right tool. Expected load is tens of outstanding
//! tickets, not millions.
//!
//! Entries are always removed *before* anything is done with them. That is
//! what makes `resolve` and `cancel_pending` safe to race: only the one
//! that gets the entry out of the map acts on it.
//!
//! The platform may hand a released handle out again, so a handle alone
//! does not name one request. Each entry also carries a registration id,
//! and callers that outlive their entry (drop guards, cancellers) go
//! through [`Registry::cancel_registration`], which leaves a newer entry
//! under the same handle alone.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use keystone_platform::{
    Platform, PlatformError, TicketEvent, TicketHandle, TicketOutcome,
};
use tokio::sync::oneshot;

use crate::{PendingRequest, RegistryError};

/// What [`Registry::resolve`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStatus {
    /// A waiter was found and the outcome handed to it.
    Delivered,
    /// Nobody was waiting (already canceled or never registered).
    Discarded,
}

/// What [`Registry::cancel_pending`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelStatus {
    /// The entry was still unresolved; it is gone and issuance was
    /// canceled at the platform.
    WasPending,
    /// No entry: the request was already resolved or canceled.
    NotPending,
}

/// One registration of a handle.
///
/// Two registrations of the same recycled handle compare unequal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Registration {
    handle: TicketHandle,
    id: u64,
}

impl Registration {
    /// The platform handle that was registered.
    pub fn handle(&self) -> TicketHandle {
        self.handle
    }
}

#[derive(Debug)]
struct Slot {
    id: u64,
    sender: oneshot::Sender<TicketOutcome>,
}

#[derive(Debug, Default)]
struct HandleTable {
    pending: HashMap<TicketHandle, Slot>,
    next_id: u64,
    closed: bool,
}

/// Correlates platform completion events with the callers waiting on them.
///
/// ## Entry lifecycle
///
/// ```text
/// register() ──→ [pending] ──resolve()────────→ removed, waiter woken
///                    │
///                    └──cancel_pending()──→ removed, issuance canceled,
///                                           waiter sees Canceled
/// ```
pub struct Registry<P: Platform> {
    platform: P,
    table: Mutex<HandleTable>,
}

impl<P: Platform> Registry<P> {
    /// Creates an empty registry in front of `platform`.
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            table: Mutex::new(HandleTable::default()),
        }
    }

    /// The platform this registry releases handles to.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    fn lock(&self) -> MutexGuard<'_, HandleTable> {
        // A panic while holding the lock can only interrupt a map insert or
        // remove, which leaves the map consistent.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a pending entry for a handle the platform just issued.
    ///
    /// # Errors
    /// - [`RegistryError::DuplicateHandle`] if the handle is already pending.
    /// - [`RegistryError::Closed`] after [`close`](Self::close).
    pub fn register(
        self: &Arc<Self>,
        handle: TicketHandle,
    ) -> Result<PendingRequest<P>, RegistryError> {
        let mut table = self.lock();
        self.insert(&mut table, handle)
    }

    /// Runs a platform issuance call and registers the handle it returns.
    ///
    /// The table lock is held across the call, so an event for the new
    /// handle that the pump drains concurrently cannot reach `resolve`
    /// before the entry exists.
    ///
    /// # Errors
    /// - [`RegistryError::Rejected`] if the platform refused the request.
    /// - [`RegistryError::DuplicateHandle`] / [`RegistryError::Closed`] as
    ///   for [`register`](Self::register).
    pub fn issue<F>(
        self: &Arc<Self>,
        issue: F,
    ) -> Result<PendingRequest<P>, RegistryError>
    where
        F: FnOnce(&P) -> Result<TicketHandle, PlatformError>,
    {
        let mut table = self.lock();
        if table.closed {
            return Err(RegistryError::Closed);
        }
        let handle = issue(&self.platform)?;
        self.insert(&mut table, handle)
    }

    fn insert(
        self: &Arc<Self>,
        table: &mut HandleTable,
        handle: TicketHandle,
    ) -> Result<PendingRequest<P>, RegistryError> {
        if table.closed {
            return Err(RegistryError::Closed);
        }
        match table.pending.entry(handle) {
            Entry::Occupied(_) => {
                tracing::error!(%handle, "platform issued a handle that is still pending");
                Err(RegistryError::DuplicateHandle(handle))
            }
            Entry::Vacant(vacant) => {
                let id = table.next_id;
                table.next_id += 1;
                let (sender, rx) = oneshot::channel();
                vacant.insert(Slot { id, sender });
                tracing::debug!(%handle, id, "request registered");
                Ok(PendingRequest::new(
                    Registration { handle, id },
                    rx,
                    Arc::clone(self),
                ))
            }
        }
    }

    /// Feeds one completion event into the table.
    ///
    /// Events for handles with no pending entry are dropped: the request
    /// was canceled before the platform finished it.
    pub fn resolve(&self, event: TicketEvent) -> ResolveStatus {
        let TicketEvent { handle, outcome } = event;

        // Remove under the lock, act outside it.
        let slot = self.lock().pending.remove(&handle);
        let Some(Slot { sender, .. }) = slot else {
            tracing::debug!(%handle, "discarding event for a handle nobody is waiting on");
            return ResolveStatus::Discarded;
        };

        match sender.send(outcome) {
            Ok(()) => {
                tracing::debug!(%handle, "request resolved");
                ResolveStatus::Delivered
            }
            Err(outcome) => {
                // The waiter went away between our removal and the send.
                tracing::debug!(%handle, "waiter gone before delivery");
                self.release_orphan(handle, &outcome);
                ResolveStatus::Discarded
            }
        }
    }

    /// Removes a still-unresolved entry and cancels issuance at the
    /// platform. Dropping the entry wakes its waiter with
    /// [`Resolution::Canceled`](crate::Resolution::Canceled).
    pub fn cancel_pending(&self, handle: TicketHandle) -> CancelStatus {
        let slot = self.lock().pending.remove(&handle);
        self.finish_cancel(handle, slot)
    }

    /// Like [`cancel_pending`](Self::cancel_pending), but only if the entry
    /// under the handle is still `registration`.
    ///
    /// Once a request is resolved or canceled its handle goes back to the
    /// platform, which may reissue it to another request. A stale
    /// registration then reports [`CancelStatus::NotPending`] and the newer
    /// entry stays pending.
    pub fn cancel_registration(&self, registration: Registration) -> CancelStatus {
        let Registration { handle, id } = registration;
        let slot = {
            let mut table = self.lock();
            let current = table.pending.get(&handle).is_some_and(|slot| slot.id == id);
            if current {
                table.pending.remove(&handle)
            } else {
                None
            }
        };
        self.finish_cancel(handle, slot)
    }

    fn finish_cancel(&self, handle: TicketHandle, slot: Option<Slot>) -> CancelStatus {
        match slot {
            Some(slot) => {
                drop(slot.sender);
                self.platform.cancel_issuance(handle);
                tracing::info!(%handle, id = slot.id, "pending request canceled");
                CancelStatus::WasPending
            }
            None => CancelStatus::NotPending,
        }
    }

    /// Releases a handle whose outcome nobody will ever read.
    pub(crate) fn release_orphan(
        &self,
        handle: TicketHandle,
        outcome: &TicketOutcome,
    ) {
        match outcome {
            TicketOutcome::Success(_) => self.platform.invalidate_ticket(handle),
            TicketOutcome::Failure(_) => self.platform.cancel_issuance(handle),
        }
    }

    /// Refuses new registrations and cancels every outstanding entry.
    ///
    /// Returns how many entries were canceled. Calling it again is a no-op.
    pub fn close(&self) -> usize {
        let drained: Vec<TicketHandle> = {
            let mut table = self.lock();
            table.closed = true;
            table.pending.drain().map(|(handle, _)| handle).collect()
        };

        for handle in &drained {
            self.platform.cancel_issuance(*handle);
        }
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "registry closed with requests in flight");
        }
        drained.len()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Whether `handle` has an unresolved entry.
    pub fn contains(&self, handle: TicketHandle) -> bool {
        self.lock().pending.contains_key(&handle)
    }

    /// Whether `registration` is still the unresolved entry for its handle.
    pub fn is_pending(&self, registration: Registration) -> bool {
        self.lock()
            .pending
            .get(&registration.handle)
            .is_some_and(|slot| slot.id == registration.id)
    }

    /// Number of unresolved entries.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }
}

// =========================================================================
// Tests
// =========================================================================
