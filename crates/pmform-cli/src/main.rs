//! pmform CLI - fill in maintenance forms and submit them, online or off
//!
//! Drafts and undelivered submissions live in a local SQLite file, so
//! nothing typed in the field is lost while the API is unreachable.

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands, DraftCommands, QueueCommands};
use crate::commands::common::{load_config, open_store};
use crate::commands::draft::{
    run_draft_clear, run_draft_edit, run_draft_list, run_draft_save, run_draft_show,
};
use crate::commands::queue::{
    run_queue_clear, run_queue_list, run_queue_retry, run_queue_status, run_queue_sync,
};
use crate::commands::submit::run_submit;
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pmform=info".parse().expect("valid directive")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.data_dir.as_deref(), cli.api_url.as_deref())?;
    let store = open_store(&config)?;

    match cli.command {
        Commands::Draft { command } => match command {
            DraftCommands::Save { form_id, file } => {
                run_draft_save(&form_id, file.as_deref(), store)?;
            }
            DraftCommands::Show { form_id, json } => run_draft_show(&form_id, json, store)?,
            DraftCommands::List { json } => run_draft_list(json, store)?,
            DraftCommands::Clear { form_id } => run_draft_clear(&form_id, store)?,
            DraftCommands::Edit { form_id } => run_draft_edit(&form_id, &config, store)?,
        },
        Commands::Submit {
            form_id,
            file,
            keep_draft,
        } => run_submit(&form_id, file.as_deref(), keep_draft, &config, store).await?,
        Commands::Queue { command } => match command {
            QueueCommands::Status { json } => run_queue_status(json, store)?,
            QueueCommands::List { json } => run_queue_list(json, store)?,
            QueueCommands::Sync => run_queue_sync(&config, store).await?,
            QueueCommands::Retry { sync } => run_queue_retry(sync, &config, store).await?,
            QueueCommands::Clear { completed } => run_queue_clear(completed, store)?,
        },
        Commands::Watch => run_watch(&config, store).await?,
    }

    Ok(())
}
