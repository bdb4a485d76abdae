//! Webhook delivery from the CLI and the retry queue commands.

use std::error::Error;
use std::sync::Arc;

use chrono::Utc;
use clap::Subcommand;
use tally_core::notify::Dispatch;
use tally_core::{CoreError, RetryQueue, Settings, Store, UserError, WebhookPayload, WebhookTransport};
use tokio::runtime::Runtime;
use tokio::sync::watch;

use super::{open_store, print_json, CmdResult};

#[derive(Subcommand)]
pub enum NotifyAction {
    /// List notifications waiting for redelivery
    List,
    /// Attempt every due notification once
    Flush,
    /// Keep redelivering until interrupted (Ctrl-C)
    Run,
    /// Send a test event to the configured webhook
    Test,
}

pub fn run(action: NotifyAction, settings: &Settings) -> CmdResult {
    let store = Arc::new(open_store(settings)?);
    let queue = RetryQueue::new(Arc::clone(&store), settings.retry_policy());

    match action {
        NotifyAction::List => print_json(&queue.list()?),
        NotifyAction::Flush => {
            let transport = transport(settings)?;
            let (_tx, rx) = watch::channel(false);
            let report = runtime()?.block_on(queue.process_due(&transport, Utc::now(), &rx))?;
            print_json(&report)
        }
        NotifyAction::Run => {
            let transport = transport(settings)?;
            runtime()?.block_on(async {
                let (tx, rx) = watch::channel(false);
                tokio::spawn(async move {
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => {
                            let _ = tx.send(true);
                        }
                        Err(e) => tracing::warn!(error = %e, "cannot listen for Ctrl-C"),
                    }
                });
                queue.run(&transport, rx).await
            })?;
            print_json(&serde_json::json!({ "pending": queue.len()? }))
        }
        NotifyAction::Test => {
            let transport = transport(settings)?;
            let outcome = runtime()?.block_on(queue.dispatch(&transport, WebhookPayload::test()))?;
            let delivered = matches!(outcome, Dispatch::Delivered);
            print_json(&serde_json::json!({ "delivered": delivered }))
        }
    }
}

/// Deliver `events` now. Failures are queued for retry; nothing here
/// fails the command that produced the events.
pub fn send(settings: &Settings, store: &Arc<Store>, events: Vec<WebhookPayload>) {
    if !settings.webhook_enabled() || events.is_empty() {
        return;
    }
    if let Err(e) = deliver(settings, store, events) {
        tracing::warn!(error = %e, "notifications dropped");
    }
}

fn deliver(settings: &Settings, store: &Arc<Store>, events: Vec<WebhookPayload>) -> Result<(), Box<dyn Error>> {
    let transport = transport(settings)?;
    let queue = RetryQueue::new(Arc::clone(store), settings.retry_policy());
    runtime()?.block_on(async {
        for payload in events {
            let event = payload.event_type;
            match queue.dispatch(&transport, payload).await? {
                Dispatch::Delivered => tracing::debug!(event = event.as_str(), "notification delivered"),
                Dispatch::Queued(entry) => tracing::info!(
                    id = %entry.id,
                    next = %entry.next_attempt_at,
                    "notification queued for retry"
                ),
            }
        }
        Ok::<_, CoreError>(())
    })?;
    Ok(())
}

fn transport(settings: &Settings) -> Result<WebhookTransport, Box<dyn Error>> {
    if !settings.webhook_enabled() {
        return Err(UserError::new("webhook notifications are disabled")
            .with_suggestion("Set notifications.webhook_url and notifications.enabled with `tally config set`.")
            .into());
    }
    Ok(WebhookTransport::from_settings(&settings.notifications)?)
}

fn runtime() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
}
