use std::sync::Arc;

use pmform_core::{ClientConfig, LocalStore, NetworkMonitor, OfflineQueue, SyncCoordinator};

use crate::commands::common::{
    build_client, format_queue_lines, format_stats, format_sync_report, open_queue, short_id,
};
use crate::error::CliError;

pub fn run_queue_status(as_json: bool, store: LocalStore) -> Result<(), CliError> {
    let queue = OfflineQueue::new(store);
    let stats = queue.stats();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{}", format_stats(&stats));
    if let Some(oldest) = queue.oldest_pending() {
        println!(
            "Oldest pending: {} queued {}",
            short_id(oldest.id.as_str()),
            oldest.queued_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}

pub fn run_queue_list(as_json: bool, store: LocalStore) -> Result<(), CliError> {
    let items = OfflineQueue::new(store).list();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if items.is_empty() {
        println!("Offline queue is empty.");
    } else {
        for line in format_queue_lines(&items) {
            println!("{line}");
        }
    }
    Ok(())
}

pub async fn run_queue_sync(config: &ClientConfig, store: LocalStore) -> Result<(), CliError> {
    let queue = open_queue(store)?;
    if !queue.has_pending() {
        println!("Nothing to sync.");
        return Ok(());
    }

    let client = Arc::new(build_client(config)?);
    let monitor = NetworkMonitor::new(false);
    if !monitor
        .check_now(client.as_ref(), config.health_timeout)
        .await
    {
        return Err(CliError::Offline(config.api_base_url.clone()));
    }

    let coordinator = SyncCoordinator::new(queue, client);
    let report = coordinator
        .sync_with_progress(|current, total, item| {
            println!("[{current}/{total}] {}", short_id(item.id.as_str()));
        })
        .await;

    match report {
        Some(report) => println!("{}", format_sync_report(&report)),
        None => println!("Sync skipped."),
    }
    Ok(())
}

pub async fn run_queue_retry(
    sync: bool,
    config: &ClientConfig,
    store: LocalStore,
) -> Result<(), CliError> {
    let reset = OfflineQueue::new(store.clone()).retry_failed()?;
    println!("Reset {reset} failed submission(s) to pending");

    if sync && reset > 0 {
        run_queue_sync(config, store).await?;
    }
    Ok(())
}

pub fn run_queue_clear(completed_only: bool, store: LocalStore) -> Result<(), CliError> {
    let queue = OfflineQueue::new(store);
    if completed_only {
        let removed = queue.clear_completed()?;
        println!("Removed {removed} completed submission(s)");
    } else {
        let total = queue.stats().total;
        queue.clear()?;
        println!("Removed {total} submission(s)");
    }
    Ok(())
}
