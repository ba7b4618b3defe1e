//! In-memory authority that stands in for a real platform SDK.
//!
//! Issued handles count up from 1. With recycling on
//! ([`LoopbackPlatform::recycling`]), a handle released through
//! `cancel_issuance` or `invalidate_ticket` goes on a free list and is
//! handed out again before any fresh one, the way SDKs with small handle
//! pools behave. Completion events are queued either
//! explicitly ([`LoopbackPlatform::complete`], [`LoopbackPlatform::fail`])
//! or automatically with a random payload when auto-completion is on.
//! Every cancel and invalidate call is recorded so tests can assert on
//! what the subsystem released.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::Rng;

use crate::{
    AccountId, Platform, PlatformError, TicketEvent, TicketHandle,
};

/// Which issuance call produced a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueRequest {
    Identity(AccountId),
    Endpoint(SocketAddr),
    Generic(String),
}

#[derive(Debug)]
struct LoopbackState {
    next_handle: u32,
    last_issued: Option<TicketHandle>,
    logged_in: bool,
    auto_complete: bool,
    recycle: bool,
    free: VecDeque<TicketHandle>,
    live: HashSet<TicketHandle>,
    issued: HashMap<TicketHandle, IssueRequest>,
    events: VecDeque<TicketEvent>,
    canceled: HashMap<TicketHandle, usize>,
    invalidated: HashMap<TicketHandle, usize>,
}

impl LoopbackState {
    fn release(&mut self, handle: TicketHandle) {
        if self.live.remove(&handle) && self.recycle {
            self.free.push_back(handle);
        }
    }
}

/// A loopback [`Platform`] for tests and offline development.
#[derive(Debug)]
pub struct LoopbackPlatform {
    state: Mutex<LoopbackState>,
}

impl LoopbackPlatform {
    /// Creates a logged-in platform that only completes requests when told to.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LoopbackState {
                next_handle: 1,
                last_issued: None,
                logged_in: true,
                auto_complete: false,
                recycle: false,
                free: VecDeque::new(),
                live: HashSet::new(),
                issued: HashMap::new(),
                events: VecDeque::new(),
                canceled: HashMap::new(),
                invalidated: HashMap::new(),
            }),
        }
    }

    /// Creates a platform that completes every request with random bytes.
    pub fn auto_completing() -> Self {
        let platform = Self::new();
        platform.set_auto_complete(true);
        platform
    }

    /// Creates a platform that reissues released handles.
    pub fn recycling() -> Self {
        let platform = Self::new();
        platform.lock().recycle = true;
        platform
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signs the local user in or out. Signed out, every issuance call is
    /// rejected with [`PlatformError::NotLoggedIn`].
    pub fn set_logged_in(&self, logged_in: bool) {
        self.lock().logged_in = logged_in;
    }

    /// When on, each issuance queues a success event with a random payload.
    pub fn set_auto_complete(&self, auto_complete: bool) {
        self.lock().auto_complete = auto_complete;
    }

    /// Queues a success event for `handle`.
    pub fn complete(&self, handle: TicketHandle, bytes: impl Into<Vec<u8>>) {
        self.lock()
            .events
            .push_back(TicketEvent::success(handle, bytes));
    }

    /// Queues a failure event for `handle`.
    pub fn fail(&self, handle: TicketHandle, reason: impl Into<String>) {
        self.lock()
            .events
            .push_back(TicketEvent::failure(handle, reason));
    }

    /// The most recently issued handle, if any.
    pub fn last_issued(&self) -> Option<TicketHandle> {
        self.lock().last_issued
    }

    /// The issuance call that produced `handle`.
    pub fn request_for(&self, handle: TicketHandle) -> Option<IssueRequest> {
        self.lock().issued.get(&handle).cloned()
    }

    /// Whether `cancel_issuance` was called for `handle`.
    pub fn was_canceled(&self, handle: TicketHandle) -> bool {
        self.cancel_count(handle) > 0
    }

    /// Whether `invalidate_ticket` was called for `handle`.
    pub fn was_invalidated(&self, handle: TicketHandle) -> bool {
        self.invalidate_count(handle) > 0
    }

    /// How many times `cancel_issuance` was called for `handle`, across
    /// every issuance of it.
    pub fn cancel_count(&self, handle: TicketHandle) -> usize {
        self.lock().canceled.get(&handle).copied().unwrap_or(0)
    }

    /// How many times `invalidate_ticket` was called for `handle`.
    pub fn invalidate_count(&self, handle: TicketHandle) -> usize {
        self.lock().invalidated.get(&handle).copied().unwrap_or(0)
    }

    /// Whether `handle` has been issued and not released since.
    pub fn is_live(&self, handle: TicketHandle) -> bool {
        self.lock().live.contains(&handle)
    }

    /// Number of events queued and not yet drained.
    pub fn pending_events(&self) -> usize {
        self.lock().events.len()
    }

    fn issue(&self, request: IssueRequest) -> Result<TicketHandle, PlatformError> {
        let mut state = self.lock();
        if !state.logged_in {
            return Err(PlatformError::NotLoggedIn);
        }

        let handle = match state.free.pop_front() {
            Some(handle) => handle,
            None => {
                let handle = TicketHandle::new(state.next_handle);
                state.next_handle = state.next_handle.wrapping_add(1).max(1);
                handle
            }
        };
        state.live.insert(handle);
        state.last_issued = Some(handle);
        tracing::debug!(%handle, ?request, "loopback issued handle");
        state.issued.insert(handle, request);

        if state.auto_complete {
            let payload: [u8; 32] = rand::rng().random();
            state
                .events
                .push_back(TicketEvent::success(handle, payload.to_vec()));
        }
        Ok(handle)
    }
}

impl Default for LoopbackPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for LoopbackPlatform {
    fn issue_for_identity(
        &self,
        account: AccountId,
    ) -> Result<TicketHandle, PlatformError> {
        self.issue(IssueRequest::Identity(account))
    }

    fn issue_for_endpoint(
        &self,
        endpoint: SocketAddr,
    ) -> Result<TicketHandle, PlatformError> {
        self.issue(IssueRequest::Endpoint(endpoint))
    }

    fn issue_generic(&self, context: &str) -> Result<TicketHandle, PlatformError> {
        self.issue(IssueRequest::Generic(context.to_string()))
    }

    fn cancel_issuance(&self, handle: TicketHandle) {
        let mut state = self.lock();
        *state.canceled.entry(handle).or_default() += 1;
        state.release(handle);
    }

    fn invalidate_ticket(&self, handle: TicketHandle) {
        let mut state = self.lock();
        *state.invalidated.entry(handle).or_default() += 1;
        state.release(handle);
    }

    fn poll_events(&self) -> Vec<TicketEvent> {
        self.lock().events.drain(..).collect()
    }
}
