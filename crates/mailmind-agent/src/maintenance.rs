use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use mailmind_pipeline::ArtifactPipeline;

/// Scheduled TTL purge pass. Runs once at startup, then on the configured
/// interval, until `shutdown` flips.
pub async fn run(
    pipeline: Arc<ArtifactPipeline>,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs, "maintenance loop started");
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match pipeline.purge_expired() {
                    Ok(removed) if removed > 0 => {
                        info!(removed, "purge pass removed expired artifacts");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "purge pass failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("maintenance loop shutting down");
                    break;
                }
            }
        }
    }
}
