//! Integration tests against the mock transport in `tests/support`, covering
//! spec §8 scenarios 1-4, 6, 9, and the rate-limiter's parking behavior (the
//! spirit of scenario 5, at a size a test can assert on deterministically
//! rather than via a real ≥24s wall-clock floor).

mod support;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use smtp_pool::{Address, Envelope, GenericPool, Mail, PoolError, StaticMessage};
use support::{init_test_logging, MockTransportManager};

fn mail(from: &str) -> Mail {
    let envelope = Envelope { from: Address::new(from), to: vec![Address::new("rcpt@valid.recipient")] };
    let mut headers = HashMap::new();
    headers.insert("Message-Id".to_owned(), "<abc123@example.com>".to_owned());
    Mail::with_envelope(envelope, StaticMessage::new(headers, b"hello\r\n".to_vec()))
}

#[tokio::test]
async fn single_send_succeeds() {
    init_test_logging();
    let manager = MockTransportManager::new();
    let pool = GenericPool::from_manager(manager, 5, 100, None);

    let info = pool.send(mail("test@valid.sender")).await.unwrap();
    assert_eq!(info.message_id, "abc123@example.com");
    assert_eq!(info.envelope.to, vec![Address::new("rcpt@valid.recipient")]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fan_out_across_resources() {
    init_test_logging();
    let manager = MockTransportManager::new();
    let stats = manager.stats();
    let pool = Arc::new(GenericPool::from_manager(manager, 5, 100, None));

    let mut handles = Vec::new();
    for i in 0..100 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move { pool.send(mail(&format!("sender{}@valid.sender", i))).await }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    assert!(stats.resource_count() > 1, "expected more than one resource to have been used");
    assert_eq!(stats.total_messages(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_failures_do_not_double_report() {
    init_test_logging();
    let manager = MockTransportManager::new();
    let pool = Arc::new(GenericPool::from_manager(manager, 5, 100, None));

    let mut handles = Vec::new();
    for i in 0..100 {
        let pool = pool.clone();
        let from = if i % 2 == 0 { format!("ok{}@valid.sender", i) } else { format!("bad{}@invalid.sender", i) };
        handles.push(tokio::spawn(async move { (i, pool.send(mail(&from)).await) }));
    }

    let mut ok_count = 0;
    let mut err_count = 0;
    for h in handles {
        let (i, result) = h.await.unwrap();
        if i % 2 == 0 {
            assert!(result.is_ok(), "even-indexed submission {} should succeed", i);
            ok_count += 1;
        } else {
            assert!(result.is_err(), "odd-indexed submission {} should fail", i);
            err_count += 1;
        }
    }
    assert_eq!(ok_count, 50);
    assert_eq!(err_count, 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn max_messages_cap_rotates_resources() {
    init_test_logging();
    let manager = MockTransportManager::new();
    let stats = manager.stats();
    let pool = Arc::new(GenericPool::from_manager(manager, 1, 5, None));

    let mut handles = Vec::new();
    for i in 0..100 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move { pool.send(mail(&format!("sender{}@valid.sender", i))).await }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    assert_eq!(stats.total_messages(), 100);
    let per_resource = stats.messages_per_resource.lock().unwrap();
    assert!(per_resource.values().all(|&n| n <= 5), "no resource should exceed max_messages");
}

#[tokio::test]
async fn close_with_pending_rejects_queued_submissions() {
    init_test_logging();
    let manager = MockTransportManager::new();
    let gate = Arc::new(Notify::new());
    let manager = manager.with_send_gate(gate.clone());
    let pool = Arc::new(GenericPool::from_manager(manager, 1, 100, None));

    let first_pool = pool.clone();
    let first = tokio::spawn(async move { first_pool.send(mail("first@valid.sender")).await });

    // Give the dispatcher a chance to assign `first` to the only resource
    // before anything else is enqueued.
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    let mut rest = Vec::new();
    for i in 0..99 {
        let pool = pool.clone();
        rest.push(tokio::spawn(async move { pool.send(mail(&format!("rest{}@valid.sender", i))).await }));
    }
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    pool.close().await;

    // Unblock the in-flight send only after close() has already drained the queue.
    gate.notify_one();

    assert!(first.await.unwrap().is_ok());
    for h in rest {
        assert!(matches!(h.await.unwrap(), Err(PoolError::ClosedPool)));
    }
}

#[tokio::test]
async fn verify_succeeds_against_a_healthy_transport() {
    init_test_logging();
    let manager = MockTransportManager::new();
    let pool = GenericPool::from_manager(manager, 5, 100, None);
    assert!(pool.verify().await.is_ok());
}

#[tokio::test]
async fn verify_fails_against_an_unreachable_transport() {
    init_test_logging();
    let manager = MockTransportManager::with_connect_failing();
    let pool = GenericPool::from_manager(manager, 5, 100, None);
    assert!(matches!(pool.verify().await, Err(PoolError::Verify(_))));
}

#[tokio::test(start_paused = true)]
async fn rate_limit_parks_the_second_wave() {
    init_test_logging();
    let manager = MockTransportManager::new();
    let stats = manager.stats();
    let pool = Arc::new(GenericPool::from_manager(manager, 2, 100, Some(2)));

    let mut handles = Vec::new();
    for i in 0..4 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move { pool.send(mail(&format!("sender{}@valid.sender", i))).await }));
    }

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    // The first wave (bounded by max_connections) lands, then both
    // resources get parked trying to re-admit into an already-spent window.
    assert_eq!(stats.total_messages(), 2);

    tokio::time::advance(Duration::from_millis(1100)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    for h in handles {
        assert!(h.await.unwrap().is_ok());
    }
    assert_eq!(stats.total_messages(), 4);
}
