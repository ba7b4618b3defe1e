//! Integration tests for the broker, tickets, and the full request flow.
//!
//! Every test runs a real client (registry + spawned event pump) against
//! the loopback platform. Time is paused, so pump intervals and request
//! timeouts elapse instantly whenever the runtime is idle.

use std::time::Duration;

use futures_util::future::join;
use keystone::prelude::*;

// =========================================================================
// Helpers
// =========================================================================

fn client() -> KeystoneClient<LoopbackPlatform> {
    KeystoneClientBuilder::new()
        .pump_config(PumpConfig {
            initial_jitter_us: 0,
            ..PumpConfig::with_rate(30)
        })
        .build(LoopbackPlatform::new())
        .expect("inside a runtime")
}

/// A client whose platform reissues released handles.
fn recycling_client() -> KeystoneClient<LoopbackPlatform> {
    KeystoneClientBuilder::new()
        .pump_config(PumpConfig {
            initial_jitter_us: 0,
            ..PumpConfig::with_rate(30)
        })
        .build(LoopbackPlatform::recycling())
        .expect("inside a runtime")
}

/// Waits until a spawned request has reached the platform.
async fn first_issued(platform: &LoopbackPlatform) -> TicketHandle {
    loop {
        if let Some(handle) = platform.last_issued() {
            return handle;
        }
        tokio::task::yield_now().await;
    }
}

// =========================================================================
// Successful issuance, all three variants
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_identity_request_returns_delivered_bytes_then_cancel() {
    let client = client();
    let broker = client.broker();

    let task = tokio::spawn(async move { broker.request_ticket_for_identity(123456u64).await });
    let handle = first_issued(client.platform()).await;
    client.platform().complete(handle, [0xAA, 0xBB]);

    let mut ticket = task.await.unwrap().expect("ticket should be issued");
    assert_eq!(ticket.handle(), handle);
    assert_eq!(ticket.get_bytes().unwrap(), &[0xAA, 0xBB]);

    ticket.cancel();

    assert_eq!(ticket.get_bytes(), Err(TicketError::TicketCanceled));
    assert!(client.platform().was_invalidated(handle));
}

#[tokio::test(start_paused = true)]
async fn test_endpoint_request_returns_delivered_bytes() {
    let client = client();
    let pending = client.broker().issue_for_endpoint("192.168.0.5:1234").unwrap();
    client.platform().complete(pending.handle(), [1, 2, 3]);

    let ticket = pending.wait().await.unwrap();

    assert_eq!(ticket.get_bytes().unwrap(), &[1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_context_request_returns_delivered_bytes() {
    let client = client();
    let broker = client.broker();

    let task = tokio::spawn(async move { broker.request_ticket("test").await });
    let handle = first_issued(client.platform()).await;
    client.platform().complete(handle, b"ticket-bytes".to_vec());

    let ticket = task.await.unwrap().unwrap();
    assert_eq!(ticket.get_bytes().unwrap(), b"ticket-bytes");
    assert!(ticket.is_active());
}

// =========================================================================
// Failure
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_context_request_failure_yields_issuance_failed() {
    let client = client();
    let pending = client.broker().issue("test").unwrap();
    let handle = pending.handle();
    client.platform().fail(handle, "not_logged_in");

    let result = pending.wait().await;

    assert_eq!(
        result.unwrap_err(),
        TicketError::IssuanceFailed("not_logged_in".into())
    );
    assert!(client.platform().was_canceled(handle), "failed handle is released");
}

#[tokio::test(start_paused = true)]
async fn test_request_logged_out_is_rejected_immediately() {
    let client = client();
    client.platform().set_logged_in(false);

    let result = client.broker().request_ticket("test").await;

    assert_eq!(
        result.unwrap_err(),
        TicketError::IssuanceRejected("not logged in".into())
    );
}

#[tokio::test(start_paused = true)]
async fn test_request_bad_endpoint_is_rejected_immediately() {
    let client = client();

    let result = client.broker().request_ticket_for_endpoint("localhost").await;

    assert!(matches!(result, Err(TicketError::IssuanceRejected(_))));
    assert_eq!(client.platform().last_issued(), None);
}

// =========================================================================
// Cancellation
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_cancel_before_completion_discards_late_event() {
    let client = client();
    let pending = client.broker().issue_for_endpoint("192.168.0.5:1234").unwrap();
    let handle = pending.handle();
    let canceller = pending.canceller();
    let waiter = tokio::spawn(pending.wait());

    assert!(canceller.cancel(), "request was still pending");
    client.platform().complete(handle, [0xDE, 0xAD]);

    let result = waiter.await.unwrap();
    assert_eq!(result.unwrap_err(), TicketError::RequestCanceled);
    assert!(client.platform().was_canceled(handle));

    // Let the pump pick up the late event; it must go nowhere.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.platform().pending_events(), 0);
    let stats = client.pump_stats().unwrap();
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.discarded, 1);
}

#[tokio::test(start_paused = true)]
async fn test_canceller_second_call_reports_not_pending() {
    let client = client();
    let pending = client.broker().issue("test").unwrap();
    let canceller = pending.canceller();

    assert!(canceller.clone().cancel());
    assert!(!canceller.cancel());
}

#[tokio::test(start_paused = true)]
async fn test_pending_cancel_releases_handle() {
    let client = client();
    let pending = client.broker().issue("test").unwrap();
    let handle = pending.handle();

    pending.cancel();

    assert!(client.platform().was_canceled(handle));
    assert!(client.broker().registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_pending_ticket_releases_handle() {
    let client = client();
    let pending = client.broker().issue_for_identity(7u64).unwrap();
    let handle = pending.handle();

    drop(pending);

    assert!(client.platform().was_canceled(handle));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_completion_is_idempotent() {
    let client = client();
    let pending = client.broker().issue("test").unwrap();
    client.platform().complete(pending.handle(), [1]);
    let mut ticket = pending.wait().await.unwrap();

    ticket.cancel();
    ticket.cancel();

    assert_eq!(ticket.state(), TicketState::Canceled);
    assert_eq!(ticket.get_bytes(), Err(TicketError::TicketCanceled));
    assert!(client.platform().was_invalidated(ticket.handle()));
}

// =========================================================================
// Recycled handles
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_dropped_stale_pending_ticket_leaves_recycled_handle_pending() {
    let client = recycling_client();
    let broker = client.broker();
    let stale = broker.issue("first").unwrap();
    let handle = stale.handle();
    assert!(stale.canceller().cancel());

    let fresh = broker.issue("second").unwrap();
    assert_eq!(fresh.handle(), handle, "platform reissued the released handle");

    drop(stale);

    assert!(broker.registry().contains(handle));
    assert_eq!(client.platform().cancel_count(handle), 1);
    client.platform().complete(handle, [0x0B]);
    let ticket = fresh.wait().await.unwrap();
    assert_eq!(ticket.get_bytes().unwrap(), &[0x0B]);
}

#[tokio::test(start_paused = true)]
async fn test_kept_canceller_after_failure_leaves_recycled_handle_alone() {
    let client = recycling_client();
    let broker = client.broker();
    let failed = broker.issue("first").unwrap();
    let stale = failed.canceller();
    client.platform().fail(failed.handle(), "denied");
    assert_eq!(
        failed.wait().await.unwrap_err(),
        TicketError::IssuanceFailed("denied".into())
    );

    let fresh = broker.issue("second").unwrap();
    assert_eq!(fresh.handle(), stale.handle());

    assert!(!stale.cancel(), "stale canceller must not reach the new request");
    assert!(broker.registry().contains(fresh.handle()));
    client.platform().complete(fresh.handle(), [0x0C]);
    let ticket = fresh.wait().await.unwrap();
    assert_eq!(ticket.get_bytes().unwrap(), &[0x0C]);
}

#[tokio::test(start_paused = true)]
async fn test_pending_cancel_releases_handle_exactly_once() {
    let client = recycling_client();
    let pending = client.broker().issue("test").unwrap();
    let handle = pending.handle();

    pending.cancel();
    let reissued = client.broker().issue("again").unwrap();

    assert_eq!(reissued.handle(), handle);
    assert_eq!(client.platform().cancel_count(handle), 1);
    assert!(client.broker().registry().contains(handle));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_ticket_is_invalidated() {
    let client = client();
    let pending = client.broker().issue("test").unwrap();
    let handle = pending.handle();
    client.platform().complete(handle, [1]);
    let ticket = pending.wait().await.unwrap();

    drop(ticket);

    assert_eq!(client.platform().invalidate_count(handle), 1);
}

// =========================================================================
// Timeouts
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_unanswered_request_times_out_and_cancels() {
    let client = client();
    let pending = client.broker().issue("slow").unwrap();
    let handle = pending.handle();

    let result = pending.wait().await;

    assert_eq!(result.unwrap_err(), TicketError::TimedOut(Duration::from_secs(10)));
    assert!(client.platform().was_canceled(handle));
    assert!(client.broker().registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_with_timeout_overrides_default() {
    let client = client();
    let pending = client
        .broker()
        .issue("slow")
        .unwrap()
        .with_timeout(Some(Duration::from_millis(250)));

    let result = pending.wait().await;

    assert_eq!(
        result.unwrap_err(),
        TicketError::TimedOut(Duration::from_millis(250))
    );
}

#[tokio::test(start_paused = true)]
async fn test_caller_side_timeout_race_then_cancel() {
    // A caller that disables the built-in timeout can race the wait
    // against its own timer; dropping the wait cancels the request.
    let client = client();
    let pending = client.broker().issue("slow").unwrap().with_timeout(None);
    let handle = pending.handle();

    let raced = tokio::time::timeout(Duration::from_secs(3), pending.wait()).await;

    assert!(raced.is_err());
    assert!(client.platform().was_canceled(handle));
}

// =========================================================================
// Concurrency
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_completed_out_of_order() {
    let client = client();
    let broker = client.broker();
    let first = broker.issue_for_identity(1u64).unwrap();
    let second = broker.issue_for_endpoint("10.0.0.1:27015").unwrap();

    client.platform().complete(second.handle(), [0x02]);
    client.platform().complete(first.handle(), [0x01]);

    let (a, b) = join(first.wait(), second.wait()).await;

    assert_eq!(a.unwrap().get_bytes().unwrap(), &[0x01]);
    assert_eq!(b.unwrap().get_bytes().unwrap(), &[0x02]);
    assert_eq!(client.pump_stats().unwrap().delivered, 2);
}

#[tokio::test(start_paused = true)]
async fn test_many_auto_completed_requests_each_resolve_once() {
    let client = client();
    client.platform().set_auto_complete(true);
    let broker = client.broker();

    let mut tasks = Vec::new();
    for i in 0..20u64 {
        let broker = broker.clone();
        tasks.push(tokio::spawn(async move {
            broker.request_ticket_for_identity(i).await
        }));
    }

    let mut handles = Vec::new();
    for task in tasks {
        let ticket = task.await.unwrap().unwrap();
        assert_eq!(ticket.get_bytes().unwrap().len(), 32);
        handles.push(ticket.handle());
    }
    handles.sort_by_key(|h| h.into_inner());
    handles.dedup();
    assert_eq!(handles.len(), 20, "every request got its own handle");
    assert!(broker.registry().is_empty());
}
