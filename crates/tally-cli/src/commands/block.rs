//! Block history commands for CLI.

use clap::Subcommand;
use tally_core::{BlockEdit, BlockFilter, BlockRepo, Settings, Tracker};

use super::{not_found, open_store, parse_time, print_json, CmdResult};

#[derive(Subcommand)]
pub enum BlockAction {
    /// List blocks, newest first
    List {
        /// Only blocks of this project
        #[arg(long)]
        project: Option<String>,
        /// Only blocks of this task (needs --project)
        #[arg(long, requires = "project")]
        task: Option<String>,
        /// Only blocks starting at or after this time (RFC 3339)
        #[arg(long)]
        since: Option<String>,
        /// Maximum number of blocks, 0 for all
        #[arg(long, default_value = "0")]
        limit: usize,
    },
    /// Delete a block. Deleting the running block stops tracking.
    Rm {
        /// Block id, with or without the "block:" prefix
        id: String,
    },
    /// Replace a block's note, or move its start and end
    Note {
        /// Block id, with or without the "block:" prefix
        id: String,
        /// New note
        text: Option<String>,
        /// New start time (RFC 3339)
        #[arg(long)]
        start: Option<String>,
        /// New end time (RFC 3339); ending the running block stops tracking
        #[arg(long)]
        end: Option<String>,
    },
}

pub fn run(action: BlockAction, settings: &Settings) -> CmdResult {
    let store = open_store(settings)?;
    let blocks = BlockRepo::new(&store);

    match action {
        BlockAction::List { project, task, since, limit } => {
            let mut filter = BlockFilter::new().limit(limit);
            if let Some(project) = project {
                filter = filter.project(project);
            }
            if let Some(task) = task {
                filter = filter.task(task);
            }
            if let Some(since) = since {
                filter = filter.start_after(parse_time("since", &since)?);
            }
            print_json(&blocks.list_filtered(&filter)?)
        }
        BlockAction::Rm { id } => {
            let key = block_key(&id);
            if blocks.find_by_key(&key)?.is_none() {
                return Err(not_found("block", &id).into());
            }
            Tracker::new(&store).delete_block(&key)?;
            print_json(&serde_json::json!({ "deleted": key }))
        }
        BlockAction::Note { id, text, start, end } => {
            let key = block_key(&id);
            if blocks.find_by_key(&key)?.is_none() {
                return Err(not_found("block", &id).into());
            }
            let edit = BlockEdit {
                note: text,
                start: start.map(|s| parse_time("start", &s)).transpose()?,
                end: end.map(|s| parse_time("end", &s)).transpose()?,
            };
            let block = Tracker::new(&store).edit_block(&key, edit)?;
            print_json(&block)
        }
    }
}

fn block_key(id: &str) -> String {
    if id.starts_with("block:") {
        id.to_string()
    } else {
        format!("block:{id}")
    }
}
