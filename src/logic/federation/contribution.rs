//! Contribution Loop
//!
//! Background task: train, submit and pull the global model every
//! `contribution_frequency_hours` until shutdown is signalled.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use super::client::FederationClient;
use super::model::LocalModel;
use super::transport::FederationTransport;
use super::types::{ContributionStatus, TrainingData};
use crate::constants::MAX_STATUS_ERRORS;
use crate::error::{FederationError, FederationResult};

/// Training batch and optional validation split for one round
pub type ContributionBatch = (TrainingData, Option<TrainingData>);

/// Run contribution rounds until `shutdown` turns true (or its sender is dropped)
///
/// `next_batch` returning `None` skips training for that cycle. Round failures
/// are recorded in the status and do not stop the loop.
pub async fn run_contribution_loop<M, T, F>(
    client: Arc<FederationClient<M, T>>,
    mut next_batch: F,
    mut shutdown: watch::Receiver<bool>,
) -> ContributionStatus
where
    M: LocalModel + 'static,
    T: FederationTransport + 'static,
    F: FnMut() -> Option<ContributionBatch>,
{
    let hours = client.config().contribution_frequency_hours;
    let interval = Duration::from_secs(hours.saturating_mul(3600));

    tracing::info!(
        organization_id = %client.config().organization_id,
        interval_hours = hours,
        "Starting contribution loop"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        match next_batch() {
            Some((training, validation)) => {
                if let Err(e) = contribute_once(&client, training, validation).await {
                    tracing::warn!(error = %e, "Contribution round failed");
                    client
                        .status
                        .write()
                        .record_error(e.to_string(), MAX_STATUS_ERRORS);
                }
            }
            None => tracing::debug!("No training data for this contribution round"),
        }

        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }

    let status = client.contribution_status();
    tracing::info!(
        rounds = status.rounds_completed,
        accepted = status.updates_accepted,
        "Contribution loop stopped"
    );
    status
}

async fn contribute_once<M, T>(
    client: &Arc<FederationClient<M, T>>,
    training: TrainingData,
    validation: Option<TrainingData>,
) -> FederationResult<()>
where
    M: LocalModel + 'static,
    T: FederationTransport + 'static,
{
    let trainer = Arc::clone(client);
    let update = tokio::task::spawn_blocking(move || trainer.train_local(&training, validation.as_ref()))
        .await
        .map_err(|e| FederationError::Training(format!("training task failed: {}", e)))??;

    let accepted = client.submit_update(update).await?;
    {
        let mut status = client.status.write();
        status.last_submission = Some(Utc::now());
        if accepted {
            status.updates_accepted += 1;
        } else {
            status.updates_rejected += 1;
        }
    }

    let global = client.get_global_update().await?;
    if let Some(global) = &global {
        client.apply_global_update(global);
    }

    let mut status = client.status.write();
    status.last_global_fetch = Some(Utc::now());
    if let Some(global) = global {
        status.last_global_version = Some(global.model_version);
    }
    status.rounds_completed += 1;
    Ok(())
}
