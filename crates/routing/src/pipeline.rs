//! Partitioned routing pipeline.
//!
//! Each partition is a Tokio task that exclusively owns the index shard for
//! the event names hashed to it. Interest deltas and user events for the same
//! name travel through the same unbounded queue, so they are applied in
//! arrival order, while different partitions run concurrently. Routed records
//! from every partition are merged into one output channel.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use anyhow::anyhow;
use campaign_core::types::{CampaignChange, UserEvent};
use campaign_core::CampaignResult;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::index::{derive_deltas, CampaignIndex, Interest, InterestDelta};
use crate::router::{EventRouter, RoutedRecord};

enum PartitionMessage {
    Delta(InterestDelta),
    Event(UserEvent),
    Query {
        event_name: String,
        reply: oneshot::Sender<Interest>,
    },
    Shutdown,
}

/// Cloneable entry point into a running pipeline.
#[derive(Clone)]
pub struct RoutingHandle {
    partitions: Arc<Vec<mpsc::UnboundedSender<PartitionMessage>>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

/// Spawn `partitions` partition tasks. Returns the handle used to feed the
/// pipeline and the receiver of routed records.
pub fn spawn_pipeline(partitions: usize) -> (RoutingHandle, mpsc::UnboundedReceiver<RoutedRecord>) {
    let partitions = partitions.max(1);
    let (output_tx, output_rx) = mpsc::unbounded_channel();

    let mut senders = Vec::with_capacity(partitions);
    let mut tasks = Vec::with_capacity(partitions);
    for partition in 0..partitions {
        let (tx, rx) = mpsc::unbounded_channel();
        senders.push(tx);
        tasks.push(tokio::spawn(run_partition(partition, rx, output_tx.clone())));
    }

    info!(partitions, "Routing pipeline started");

    let handle = RoutingHandle {
        partitions: Arc::new(senders),
        tasks: Arc::new(Mutex::new(tasks)),
    };
    (handle, output_rx)
}

async fn run_partition(
    partition: usize,
    mut inbox: mpsc::UnboundedReceiver<PartitionMessage>,
    output: mpsc::UnboundedSender<RoutedRecord>,
) {
    let mut index = CampaignIndex::new();
    let router = EventRouter::new();

    while let Some(message) = inbox.recv().await {
        match message {
            PartitionMessage::Delta(delta) => index.apply_delta(&delta),
            PartitionMessage::Event(event) => {
                let interest = index.interest_for(&event.event_name);
                for record in router.route(&interest, &event) {
                    if output.send(record).is_err() {
                        warn!(partition, "Routed record receiver dropped");
                        return;
                    }
                }
            }
            PartitionMessage::Query { event_name, reply } => {
                let _ = reply.send(index.interest_for(&event_name));
            }
            PartitionMessage::Shutdown => break,
        }
    }

    debug!(partition, event_names = index.event_names(), "Routing partition stopped");
}

impl RoutingHandle {
    pub fn partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Apply a campaign change. Deltas are enqueued in derivation order.
    pub fn apply_change(&self, change: &CampaignChange) -> CampaignResult<()> {
        for delta in derive_deltas(change) {
            let partition = self.partition_for(&delta.event_name);
            self.send(partition, PartitionMessage::Delta(delta))?;
        }
        Ok(())
    }

    pub fn publish_event(&self, event: UserEvent) -> CampaignResult<()> {
        let partition = self.partition_for(&event.event_name);
        self.send(partition, PartitionMessage::Event(event))
    }

    /// Current interest for `event_name`, after everything enqueued before this call.
    pub async fn interest_for(&self, event_name: &str) -> CampaignResult<Interest> {
        let (reply, response) = oneshot::channel();
        let partition = self.partition_for(event_name);
        self.send(
            partition,
            PartitionMessage::Query {
                event_name: event_name.to_string(),
                reply,
            },
        )?;
        response
            .await
            .map_err(|_| anyhow!("routing partition {} dropped query", partition).into())
    }

    /// Stop every partition after it drains what was already enqueued.
    pub async fn shutdown(&self) {
        for sender in self.partitions.iter() {
            let _ = sender.send(PartitionMessage::Shutdown);
        }
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        info!("Routing pipeline stopped");
    }

    fn partition_for(&self, event_name: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        event_name.hash(&mut hasher);
        (hasher.finish() % self.partitions.len() as u64) as usize
    }

    fn send(&self, partition: usize, message: PartitionMessage) -> CampaignResult<()> {
        self.partitions[partition]
            .send(message)
            .map_err(|_| anyhow!("routing partition {} is closed", partition).into())
    }
}

/// Forward a campaign change feed into the pipeline until the feed closes.
pub fn spawn_change_feed(
    handle: RoutingHandle,
    mut changes: mpsc::UnboundedReceiver<CampaignChange>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(change) = changes.recv().await {
            if let Err(e) = handle.apply_change(&change) {
                warn!(error = %e, "Failed to apply campaign change");
                break;
            }
        }
        debug!("Campaign change feed closed");
    })
}
