use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pmform")]
#[command(about = "Fill, save, and submit maintenance forms, online or off")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory for local drafts and the offline queue
    #[arg(long, global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// Form API base URL (overrides PMFORM_API_BASE_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage locally saved drafts
    Draft {
        #[command(subcommand)]
        command: DraftCommands,
    },
    /// Submit a form, queueing it when the API is unreachable
    Submit {
        /// Draft to submit when no file or stdin payload is given
        #[arg(long, value_name = "ID", default_value = DEFAULT_FORM_ID)]
        form_id: String,
        /// JSON file with the form data
        #[arg(short, long, value_name = "PATH")]
        file: Option<PathBuf>,
        /// Keep the draft after the form is delivered or queued
        #[arg(long)]
        keep_draft: bool,
    },
    /// Inspect and deliver the offline queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Watch connectivity and sync the queue whenever the API comes back
    Watch,
}

pub const DEFAULT_FORM_ID: &str = "maintenance";

#[derive(Subcommand)]
pub enum DraftCommands {
    /// Save form data from a file or stdin as the draft
    Save {
        #[arg(value_name = "ID", default_value = DEFAULT_FORM_ID)]
        form_id: String,
        /// JSON file with the form data (stdin when omitted)
        #[arg(short, long, value_name = "PATH")]
        file: Option<PathBuf>,
    },
    /// Print a saved draft
    Show {
        #[arg(value_name = "ID", default_value = DEFAULT_FORM_ID)]
        form_id: String,
        /// Output the full draft record as JSON
        #[arg(long)]
        json: bool,
    },
    /// List forms that have a draft
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a draft
    Clear {
        #[arg(value_name = "ID", default_value = DEFAULT_FORM_ID)]
        form_id: String,
    },
    /// Open the draft in $EDITOR and auto-save the result
    Edit {
        #[arg(value_name = "ID", default_value = DEFAULT_FORM_ID)]
        form_id: String,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Show per-status counts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List queued submissions
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Deliver pending submissions now
    Sync,
    /// Move failed submissions back to pending
    Retry {
        /// Sync right after resetting
        #[arg(long)]
        sync: bool,
    },
    /// Remove submissions from the queue
    Clear {
        /// Only remove completed submissions
        #[arg(long)]
        completed: bool,
    },
}
