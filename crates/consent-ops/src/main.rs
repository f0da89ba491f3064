use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use consent_core::{LinkStore, SubmissionOutcome};
use consent_orders::OrderSubmitter;
use consent_platform::{PgLinkStore, ServiceConfig, connect_database, run_migrations};
use tracing::{error, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct BatchSummary {
    attempted: usize,
    succeeded: usize,
    failed: usize,
    errored: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "consent_ops=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("")?;
    let api = config
        .order_api
        .as_ref()
        .context("ORDER_API_URL is required to resubmit orders")?;
    let pool = connect_database(&config.database_url).await?;
    run_migrations(&pool).await?;

    let store: Arc<dyn LinkStore> = Arc::new(PgLinkStore::new(pool));
    let submitter = api.submitter(store.clone())?;

    let started_at = Utc::now();
    let summary = resubmit_pending(store.as_ref(), &submitter, config.resubmit_batch_limit).await?;
    info!(
        attempted = summary.attempted,
        succeeded = summary.succeeded,
        failed = summary.failed,
        errored = summary.errored,
        elapsed_ms = (Utc::now() - started_at).num_milliseconds(),
        "resubmission pass finished"
    );

    Ok(())
}

/// Submits every AGREED link that has no successful order yet, oldest first.
/// One link failing never stops the batch.
async fn resubmit_pending(
    store: &dyn LinkStore,
    submitter: &OrderSubmitter,
    limit: i64,
) -> Result<BatchSummary> {
    let pending = store
        .pending_submissions(limit)
        .await
        .context("failed to list pending submissions")?;
    if pending.is_empty() {
        info!("no agreed links waiting for submission");
    }

    let mut summary = BatchSummary::default();
    for link_id in pending {
        summary.attempted += 1;
        match submitter.submit(link_id).await {
            Ok(record) if record.outcome == SubmissionOutcome::Succeeded => summary.succeeded += 1,
            Ok(record) => {
                warn!(link_id, outcome = record.outcome.as_str(), "order still not accepted");
                summary.failed += 1;
            }
            Err(err) => {
                error!("failed to resubmit link {link_id}: {err:#}");
                summary.errored += 1;
            }
        }
    }

    Ok(summary)
}
