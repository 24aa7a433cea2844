use std::path::Path;
use std::sync::Arc;

use pmform_core::{
    ClientConfig, DraftStore, LocalStore, NetworkMonitor, SubmitError, SubmitOutcome,
    SyncCoordinator,
};

use crate::commands::common::{build_client, normalize_form_id, open_queue, read_payload};
use crate::error::CliError;

pub async fn run_submit(
    form_id: &str,
    file: Option<&Path>,
    keep_draft: bool,
    config: &ClientConfig,
    store: LocalStore,
) -> Result<(), CliError> {
    let form_id = normalize_form_id(form_id)?;
    let drafts = DraftStore::new(store.clone());
    let (data, from_draft) = match read_payload(file)? {
        Some(data) => (data, false),
        None => {
            let data = drafts
                .load_data(&form_id)
                .ok_or_else(|| CliError::DraftNotFound(form_id.clone()))?;
            (data, true)
        }
    };

    let client = Arc::new(build_client(config)?);
    let monitor = NetworkMonitor::new(false);
    let online = monitor
        .check_now(client.as_ref(), config.health_timeout)
        .await;
    let coordinator = SyncCoordinator::new(open_queue(store)?, client);

    match coordinator.submit_or_queue(data, online).await {
        Ok(SubmitOutcome::Delivered(receipt)) => {
            println!("{} {}", receipt.submission_id, receipt.message);
        }
        Ok(SubmitOutcome::Queued { id, reason }) => {
            println!("Queued {id} for delivery when the API is reachable ({reason})");
        }
        Err(pmform_core::Error::Submit(SubmitError::Rejected {
            status,
            message,
            errors,
        })) => {
            for error in &errors {
                eprintln!("  {error}");
            }
            return Err(SubmitError::Rejected {
                status,
                message,
                errors,
            }
            .into());
        }
        Err(error) => return Err(error.into()),
    }

    if from_draft && !keep_draft {
        drafts.remove_draft(&form_id)?;
        tracing::debug!(form_id = form_id.as_str(), "Cleared submitted draft");
    }
    Ok(())
}
