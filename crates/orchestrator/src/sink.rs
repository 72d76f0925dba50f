use std::sync::Arc;

use campaign_routing::RoutedRecord;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::orchestrator::CampaignOrchestrator;

/// Drain the routing pipeline's output into the orchestrator. A failing
/// record is logged and the next one is processed.
pub fn spawn_routed_sink(
    orchestrator: Arc<CampaignOrchestrator>,
    mut records: mpsc::UnboundedReceiver<RoutedRecord>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(record) = records.recv().await {
            if let Err(e) = orchestrator.handle_routed(&record) {
                warn!(
                    campaign_id = %record.campaign_id,
                    subject_id = %record.subject_id(),
                    kind = ?record.kind,
                    error = %e,
                    "Failed to handle routed record"
                );
            }
        }
        debug!("Routed record stream closed");
    })
}
