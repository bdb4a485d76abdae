//! Integration tests for webhook delivery through the retry queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tally_core::classify::{get_category, is_retryable};
use tally_core::notify::{Dispatch, RetryPolicy, RetryQueue, Transport, WebhookPayload, WebhookTransport};
use tally_core::{Block, ErrorCategory, OpenOptions, Store};
use tokio::sync::watch;

fn policy() -> RetryPolicy {
    RetryPolicy {
        delivery_timeout: Duration::from_secs(5),
        ..RetryPolicy::default()
    }
}

#[tokio::test]
async fn test_failed_webhook_is_redelivered_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let options = OpenOptions::persistent(dir.path()).with_thresholds(0, 0);
    let mut down_server = mockito::Server::new_async().await;
    let mut up_server = mockito::Server::new_async().await;

    let block = Block::new("owner", "web", "design", "", Utc::now());
    let payload = WebhookPayload::tracking_started(&block);

    let down = down_server
        .mock("POST", "/hook")
        .with_status(502)
        .create_async()
        .await;
    {
        let queue = RetryQueue::new(Arc::new(Store::open(options.clone()).unwrap()), policy());
        let url = format!("{}/hook", down_server.url());
        let transport = WebhookTransport::new(&url, "secret", Duration::from_secs(5)).unwrap();
        let outcome = queue.dispatch(&transport, payload.clone()).await.unwrap();
        assert!(matches!(outcome, Dispatch::Queued(_)));
    }
    down.assert_async().await;

    let up = up_server
        .mock("POST", "/hook")
        .match_body(mockito::Matcher::PartialJson(serde_json::json!({
            "event_id": payload.event_id,
        })))
        .with_status(200)
        .create_async()
        .await;

    let queue = RetryQueue::new(Arc::new(Store::open(options).unwrap()), policy());
    assert_eq!(queue.len().unwrap(), 1);
    let url = format!("{}/hook", up_server.url());
    let transport = WebhookTransport::new(&url, "secret", Duration::from_secs(5)).unwrap();
    let (_tx, rx) = watch::channel(false);
    let later = Utc::now() + chrono::Duration::minutes(1);
    let report = queue.process_due(&transport, later, &rx).await.unwrap();

    assert_eq!(report.delivered, 1);
    assert!(queue.is_empty().unwrap());
    up.assert_async().await;
}

#[tokio::test]
async fn test_unreachable_endpoint_is_retryable() {
    // Nothing listens on port 9 of the loopback interface.
    let transport =
        WebhookTransport::new("http://127.0.0.1:9/hook", "", Duration::from_secs(2)).unwrap();
    let err = transport.deliver(&WebhookPayload::test()).await.unwrap_err();
    assert_eq!(get_category(Some(&err)), ErrorCategory::Recoverable);
    assert!(is_retryable(&err));
}
