use std::sync::Arc;

use pmform_core::{ClientConfig, LocalStore, NetworkMonitor, NetworkStatus, SyncCoordinator};
use tokio::sync::watch;

use crate::commands::common::{build_client, format_stats, open_queue};
use crate::error::CliError;

/// Poll the API and deliver the queue on every reconnect until Ctrl-C.
pub async fn run_watch(config: &ClientConfig, store: LocalStore) -> Result<(), CliError> {
    let queue = open_queue(store)?;
    let client = Arc::new(build_client(config)?);
    let monitor = NetworkMonitor::new(false);
    monitor
        .check_now(client.as_ref(), config.health_timeout)
        .await;

    let poller = monitor.spawn_polling(
        Arc::clone(&client),
        config.health_poll_interval,
        config.health_timeout,
    );
    let coordinator = SyncCoordinator::new(queue, client);

    println!(
        "Watching {} ({}); press Ctrl-C to stop",
        config.api_base_url,
        connectivity_label(monitor.is_online())
    );
    println!("{}", format_stats(&coordinator.queue().stats()));

    let result = tokio::select! {
        () = coordinator.run_on_reconnect(monitor.subscribe(), config.reconnect_settle) => Ok(()),
        () = report_transitions(monitor.subscribe()) => Ok(()),
        signal = tokio::signal::ctrl_c() => signal,
    };
    poller.abort();
    result?;

    println!("{}", format_stats(&coordinator.queue().stats()));
    Ok(())
}

async fn report_transitions(mut status: watch::Receiver<NetworkStatus>) {
    let mut was_online = status.borrow_and_update().online;
    while status.changed().await.is_ok() {
        let online = status.borrow_and_update().online;
        if online != was_online {
            println!("API is now {}", connectivity_label(online));
            was_online = online;
        }
    }
}

pub const fn connectivity_label(online: bool) -> &'static str {
    if online {
        "online"
    } else {
        "offline"
    }
}
