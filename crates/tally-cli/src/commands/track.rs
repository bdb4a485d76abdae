//! Tracking commands: start, stop, resume and status.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Args;
use tally_core::{Block, Settings, Tracker, WebhookPayload};

use super::{notify, open_store, print_json, time_or_now, CmdResult};

#[derive(Args)]
pub struct StartArgs {
    /// Project identifier, created on first use
    pub project: String,
    /// Task identifier within the project, created on first use
    pub task: Option<String>,
    /// Free-form note stored on the block
    #[arg(long, default_value = "")]
    pub note: String,
    /// Start time (RFC 3339), defaults to now
    #[arg(long)]
    pub at: Option<String>,
}

pub fn start(args: StartArgs, settings: &Settings) -> CmdResult {
    let at = time_or_now("at", args.at.as_deref())?;
    let store = Arc::new(open_store(settings)?);
    let tracker = Tracker::new(&store);

    let started = tracker.start(&args.project, args.task.as_deref(), &args.note, at)?;
    print_json(&started)?;

    let mut events = Vec::new();
    if let Some(stopped) = &started.stopped {
        events.extend(stop_events(&tracker, stopped, at, settings));
    }
    events.push(WebhookPayload::tracking_started(&started.block));
    notify::send(settings, &store, events);
    Ok(())
}

pub fn stop(at: Option<&str>, settings: &Settings) -> CmdResult {
    let at = time_or_now("at", at)?;
    let store = Arc::new(open_store(settings)?);
    let tracker = Tracker::new(&store);

    let block = tracker.stop(at)?;
    print_json(&block)?;

    let events = stop_events(&tracker, &block, at, settings);
    notify::send(settings, &store, events);
    Ok(())
}

pub fn resume(at: Option<&str>, settings: &Settings) -> CmdResult {
    let at = time_or_now("at", at)?;
    let store = Arc::new(open_store(settings)?);

    let started = Tracker::new(&store).resume(at)?;
    print_json(&started)?;

    notify::send(settings, &store, vec![WebhookPayload::tracking_started(&started.block)]);
    Ok(())
}

pub fn status(settings: &Settings) -> CmdResult {
    let store = open_store(settings)?;
    let status = Tracker::new(&store).status(Utc::now())?;
    print_json(&status)
}

/// Payloads for a block that just closed: the stop itself, plus a goal
/// event when this block completed the project's goal.
fn stop_events(
    tracker: &Tracker<'_>,
    block: &Block,
    at: DateTime<Utc>,
    settings: &Settings,
) -> Vec<WebhookPayload> {
    let mut events = vec![WebhookPayload::tracking_stopped(block)];
    if !settings.webhook_enabled() {
        return events;
    }
    match tracker.goal_crossed(block, at) {
        Ok(Some((goal, progress))) => events.push(WebhookPayload::goal_reached(&goal, &progress)),
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, project = %block.project_sid, "goal check failed"),
    }
    events
}
