use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::{DeliveryError, EventType, Transport, WebhookPayload};
use crate::classify::is_retryable;
use crate::error::Result;
use crate::model::{entity_key, entity_prefix, Entity};
use crate::repository::NotificationRepo;
use crate::storage::{KeyValueStore, Store};

/// How the queue paces and bounds delivery attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Time between polls of the queue.
    pub check_interval: Duration,
    /// Upper bound on one delivery attempt.
    pub delivery_timeout: Duration,
    pub max_attempts: u32,
    /// Delay before the next attempt, indexed by attempts so far. The last
    /// entry repeats.
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            delivery_timeout: Duration::from_secs(30),
            max_attempts: 5,
            backoff: [5, 30, 120, 300, 900]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempts: u32) -> Duration {
        match self.backoff.len() {
            0 => self.check_interval,
            len => self.backoff[(attempts as usize).min(len - 1)],
        }
    }
}

/// A notification waiting for another delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryableNotification {
    pub key: String,
    pub id: String,
    pub payload: WebhookPayload,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: String,
}

impl Entity for RetryableNotification {
    const PREFIX: &'static str = "notify";

    fn key(&self) -> &str {
        &self.key
    }
}

/// A notification given up on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDelivery {
    pub id: String,
    pub event_type: EventType,
    pub attempts: u32,
    pub error: String,
}

/// Outcome of one pass over the due entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub delivered: usize,
    pub rescheduled: usize,
    pub failed: Vec<FailedDelivery>,
    /// Shutdown was requested before every due entry was tried.
    pub interrupted: bool,
}

impl PollReport {
    pub fn is_empty(&self) -> bool {
        self.delivered == 0 && self.rescheduled == 0 && self.failed.is_empty()
    }
}

/// Result of an immediate delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Delivered,
    Queued(RetryableNotification),
}

/// Durable queue of notifications awaiting redelivery.
///
/// Entries live in the store under `notify:<event id>`, one per event.
/// Deliveries run outside any store transaction.
pub struct RetryQueue {
    store: Arc<Store>,
    policy: RetryPolicy,
}

impl RetryQueue {
    pub fn new(store: Arc<Store>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn repo(&self) -> NotificationRepo<'_> {
        NotificationRepo::new(&self.store)
    }

    /// Queue `payload` after a failed first attempt.
    pub fn enqueue(
        &self,
        payload: WebhookPayload,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<RetryableNotification> {
        self.enqueue_attempted(payload, error, now, 0)
    }

    /// Queue `payload` with `attempts` already used up. The first retry
    /// always waits the first backoff delay.
    fn enqueue_attempted(
        &self,
        payload: WebhookPayload,
        error: &str,
        now: DateTime<Utc>,
        attempts: u32,
    ) -> Result<RetryableNotification> {
        let entry = RetryableNotification {
            key: entity_key::<RetryableNotification>(&payload.event_id),
            id: payload.event_id.clone(),
            payload,
            attempt_count: attempts,
            max_attempts: self.policy.max_attempts,
            next_attempt_at: after(now, self.policy.delay_for(0)),
            created_at: now,
            last_error: error.to_string(),
        };
        self.repo().update(&entry)?;
        tracing::debug!(id = %entry.id, next = %entry.next_attempt_at, "notification queued");
        Ok(entry)
    }

    /// Try `payload` once now. A retryable failure queues it with that
    /// attempt counted against `max_attempts`; any other failure, or a
    /// budget of a single attempt, is returned.
    pub async fn dispatch(&self, transport: &dyn Transport, payload: WebhookPayload) -> Result<Dispatch> {
        match self.attempt(transport, &payload).await {
            Ok(()) => Ok(Dispatch::Delivered),
            Err(e) if is_retryable(&e) && self.policy.max_attempts > 1 => {
                tracing::warn!(id = %payload.event_id, error = %e, "delivery failed, queued for retry");
                let entry = self.enqueue_attempted(payload, &e.to_string(), Utc::now(), 1)?;
                Ok(Dispatch::Queued(entry))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Every queued entry, earliest due first.
    pub fn list(&self) -> Result<Vec<RetryableNotification>> {
        let mut entries = self.repo().list()?;
        entries.sort_by(|a, b| {
            a.next_attempt_at
                .cmp(&b.next_attempt_at)
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(entries)
    }

    pub fn len(&self) -> Result<usize> {
        let keys = self
            .store
            .list_by_prefix(&entity_prefix::<RetryableNotification>())?;
        Ok(keys.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Attempt every entry due at `now`, earliest first.
    ///
    /// `shutdown` is checked between entries; an attempt already under way
    /// runs to completion.
    pub async fn process_due(
        &self,
        transport: &dyn Transport,
        now: DateTime<Utc>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<PollReport> {
        let due: Vec<_> = self
            .list()?
            .into_iter()
            .filter(|n| n.next_attempt_at <= now)
            .collect();
        let mut report = PollReport::default();

        for mut entry in due {
            let stop = *shutdown.borrow();
            if stop {
                report.interrupted = true;
                break;
            }

            let err = match self.attempt(transport, &entry.payload).await {
                Ok(()) => {
                    self.repo().delete_by_key(&entry.key)?;
                    tracing::debug!(id = %entry.id, "notification delivered");
                    report.delivered += 1;
                    continue;
                }
                Err(e) => e,
            };

            entry.last_error = err.to_string();
            let retryable = is_retryable(&err);
            if retryable {
                entry.attempt_count += 1;
            }

            if retryable && entry.attempt_count < entry.max_attempts {
                entry.next_attempt_at = after(now, self.policy.delay_for(entry.attempt_count));
                self.repo().update(&entry)?;
                tracing::debug!(
                    id = %entry.id,
                    attempt = entry.attempt_count,
                    next = %entry.next_attempt_at,
                    "notification rescheduled"
                );
                report.rescheduled += 1;
            } else {
                self.repo().delete_by_key(&entry.key)?;
                tracing::warn!(
                    id = %entry.id,
                    attempts = entry.attempt_count,
                    error = %entry.last_error,
                    "notification dropped"
                );
                report.failed.push(FailedDelivery {
                    id: entry.id,
                    event_type: entry.payload.event_type,
                    attempts: entry.attempt_count + u32::from(!retryable),
                    error: entry.last_error,
                });
            }
        }
        Ok(report)
    }

    /// Poll every `check_interval` until `shutdown` turns true or its
    /// sender goes away. A cycle finishes before the next one starts.
    pub async fn run(&self, transport: &dyn Transport, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let period = self.policy.check_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval = ?period, "retry queue started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.process_due(transport, Utc::now(), &shutdown).await {
                Ok(report) if !report.is_empty() => tracing::info!(
                    delivered = report.delivered,
                    rescheduled = report.rescheduled,
                    failed = report.failed.len(),
                    "retry pass finished"
                ),
                Ok(_) => {}
                Err(e) if is_retryable(&e) => {
                    tracing::warn!(error = %e, "retry pass failed, trying again next tick");
                }
                Err(e) => return Err(e),
            }

            let stop = *shutdown.borrow();
            if stop {
                break;
            }
        }
        tracing::info!("retry queue stopped");
        Ok(())
    }

    async fn attempt(&self, transport: &dyn Transport, payload: &WebhookPayload) -> Result<(), DeliveryError> {
        let limit = self.policy.delivery_timeout;
        match tokio::time::timeout(limit, transport.deliver(payload)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(limit)),
        }
    }
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    /// Answers with the scripted statuses in order, then with the last one.
    struct Scripted {
        statuses: Mutex<Vec<u16>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(statuses: &[u16]) -> Self {
            let mut statuses = statuses.to_vec();
            statuses.reverse();
            Self {
                statuses: Mutex::new(statuses),
                calls: AtomicUsize::new(0),
            }
        }

        fn always(status: u16) -> Self {
            Self::new(&[status])
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn deliver(&self, _payload: &WebhookPayload) -> Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let status = {
                let mut statuses = self.statuses.lock().unwrap();
                if statuses.len() > 1 {
                    statuses.pop().unwrap()
                } else {
                    statuses[0]
                }
            };
            match status {
                200..=299 => Ok(()),
                status => Err(DeliveryError::Status { status }),
            }
        }
    }

    struct Hangs;

    #[async_trait]
    impl Transport for Hangs {
        async fn deliver(&self, _payload: &WebhookPayload) -> Result<(), DeliveryError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn queue() -> RetryQueue {
        RetryQueue::new(Arc::new(Store::open_memory().unwrap()), RetryPolicy::default())
    }

    fn running() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[test]
    fn backoff_index_clamps_to_last_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(120));
        assert_eq!(policy.delay_for(4), Duration::from_secs(900));
        assert_eq!(policy.delay_for(40), Duration::from_secs(900));
    }

    #[test]
    fn enqueue_schedules_first_retry() {
        let queue = queue();
        let now = Utc::now();
        let entry = queue.enqueue(WebhookPayload::test(), "boom", now).unwrap();
        assert_eq!(entry.attempt_count, 0);
        assert_eq!(entry.next_attempt_at, now + chrono::Duration::seconds(5));
        assert_eq!(queue.len().unwrap(), 1);
        assert_eq!(queue.list().unwrap(), vec![entry]);
    }

    #[tokio::test]
    async fn entries_not_yet_due_are_left_alone() {
        let queue = queue();
        let now = Utc::now();
        queue.enqueue(WebhookPayload::test(), "boom", now).unwrap();
        let transport = Scripted::always(200);
        let (_tx, rx) = running();

        let report = queue.process_due(&transport, now, &rx).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(transport.calls(), 0);
        assert_eq!(queue.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn success_removes_entry() {
        let queue = queue();
        let now = Utc::now();
        queue.enqueue(WebhookPayload::test(), "boom", now).unwrap();
        let transport = Scripted::always(200);
        let (_tx, rx) = running();

        let later = now + chrono::Duration::minutes(1);
        let report = queue.process_due(&transport, later, &rx).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert!(queue.is_empty().unwrap());
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let queue = queue();
        let mut now = Utc::now();
        queue.enqueue(WebhookPayload::test(), "boom", now).unwrap();
        let transport = Scripted::always(503);
        let (_tx, rx) = running();

        for attempt in 1..=5u32 {
            now += chrono::Duration::hours(1);
            let report = queue.process_due(&transport, now, &rx).await.unwrap();
            if attempt < 5 {
                assert_eq!(report.rescheduled, 1);
                let entries = queue.list().unwrap();
                let entry = &entries[0];
                assert_eq!(entry.attempt_count, attempt);
                let delay = RetryPolicy::default().delay_for(attempt);
                assert_eq!(
                    entry.next_attempt_at,
                    now + chrono::Duration::from_std(delay).unwrap()
                );
            } else {
                assert_eq!(report.failed.len(), 1);
                assert_eq!(report.failed[0].attempts, 5);
            }
        }
        assert_eq!(transport.calls(), 5);
        assert!(queue.is_empty().unwrap());

        now += chrono::Duration::hours(1);
        queue.process_due(&transport, now, &rx).await.unwrap();
        assert_eq!(transport.calls(), 5);
    }

    #[tokio::test]
    async fn permanent_failure_is_dropped_at_once() {
        let queue = queue();
        let now = Utc::now();
        queue.enqueue(WebhookPayload::test(), "boom", now).unwrap();
        let transport = Scripted::always(404);
        let (_tx, rx) = running();

        let report = queue
            .process_due(&transport, now + chrono::Duration::minutes(1), &rx)
            .await
            .unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].attempts, 1);
        assert!(queue.is_empty().unwrap());
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let queue = queue();
        let mut now = Utc::now();
        queue.enqueue(WebhookPayload::test(), "boom", now).unwrap();
        let transport = Scripted::new(&[500, 429, 200]);
        let (_tx, rx) = running();

        let mut delivered = 0;
        for _ in 0..3 {
            now += chrono::Duration::hours(1);
            delivered += queue.process_due(&transport, now, &rx).await.unwrap().delivered;
        }
        assert_eq!(delivered, 1);
        assert_eq!(transport.calls(), 3);
        assert!(queue.is_empty().unwrap());
    }

    #[tokio::test]
    async fn dispatch_queues_only_retryable_failures() {
        let queue = queue();
        let ok = queue
            .dispatch(&Scripted::always(200), WebhookPayload::test())
            .await
            .unwrap();
        assert_eq!(ok, Dispatch::Delivered);

        let queued = queue
            .dispatch(&Scripted::always(502), WebhookPayload::test())
            .await
            .unwrap();
        assert!(matches!(queued, Dispatch::Queued(_)));

        let rejected = queue
            .dispatch(&Scripted::always(401), WebhookPayload::test())
            .await;
        assert!(rejected.is_err());
        assert_eq!(queue.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn dispatch_attempt_counts_toward_max_attempts() {
        let queue = queue();
        let transport = Scripted::always(503);
        let (_tx, rx) = running();

        let Dispatch::Queued(entry) = queue
            .dispatch(&transport, WebhookPayload::test())
            .await
            .unwrap()
        else {
            panic!("expected the failed delivery to be queued");
        };
        assert_eq!(entry.attempt_count, 1);
        assert_eq!(
            entry.next_attempt_at,
            entry.created_at + chrono::Duration::seconds(5)
        );

        let mut now = Utc::now();
        let mut failed = Vec::new();
        for _ in 0..10 {
            now += chrono::Duration::hours(1);
            failed.extend(queue.process_due(&transport, now, &rx).await.unwrap().failed);
        }
        assert_eq!(transport.calls(), 5);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, 5);
        assert!(queue.is_empty().unwrap());
    }

    #[tokio::test]
    async fn single_attempt_budget_is_never_queued() {
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        let queue = RetryQueue::new(Arc::new(Store::open_memory().unwrap()), policy);
        let result = queue
            .dispatch(&Scripted::always(503), WebhookPayload::test())
            .await;
        assert!(result.is_err());
        assert!(queue.is_empty().unwrap());
    }

    #[tokio::test]
    async fn shutdown_is_checked_between_entries() {
        let queue = queue();
        let now = Utc::now();
        queue.enqueue(WebhookPayload::test(), "boom", now).unwrap();
        queue.enqueue(WebhookPayload::test(), "boom", now).unwrap();
        let (tx, rx) = running();
        tx.send(true).unwrap();

        let transport = Scripted::always(200);
        let report = queue
            .process_due(&transport, now + chrono::Duration::minutes(1), &rx)
            .await
            .unwrap();
        assert!(report.interrupted);
        assert_eq!(transport.calls(), 0);
        assert_eq!(queue.len().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_endpoint_times_out() {
        let queue = queue();
        let now = Utc::now();
        queue.enqueue(WebhookPayload::test(), "boom", now).unwrap();
        let (_tx, rx) = running();

        let report = queue
            .process_due(&Hangs, now + chrono::Duration::minutes(1), &rx)
            .await
            .unwrap();
        assert_eq!(report.rescheduled, 1);
        assert!(queue.list().unwrap()[0].last_error.contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let queue = queue();
        let (tx, rx) = running();
        let transport = Scripted::always(200);

        let stopper = async {
            tokio::time::sleep(Duration::from_secs(90)).await;
            tx.send(true).unwrap();
        };
        let (result, ()) = tokio::join!(queue.run(&transport, rx), stopper);
        result.unwrap();
    }
}
