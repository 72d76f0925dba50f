//! Delivery scheduler: an in-memory job table keyed by `campaign` or
//! `campaign:subject`, plus a background timer task that pops due jobs off a
//! priority queue and hands them to a bounded worker pool.
//!
//! Registration policy is replace: scheduling under an existing key
//! supersedes the old job. A job already handed to a worker still completes
//! that invocation even if it is removed afterwards.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use campaign_core::config::SchedulerConfig;
use campaign_core::types::{Campaign, Delivery, SubjectAction};
use campaign_core::{CampaignError, CampaignResult};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::delay::{resolve_delay, resolve_recurrence};
use crate::job::{DeliveryHandler, FiredJob, JobKey, JobPayload, JobTrigger, ScheduledJob};

/// Longest the timer sleeps before re-checking the queue.
const MAX_TIMER_SLEEP: Duration = Duration::from_secs(60);

/// Stale queue items tolerated beyond one per live job before the queue is rebuilt.
const QUEUE_SLACK: usize = 64;

/// Result of a registration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled { next_fire: DateTime<Utc> },
    /// Another job already holds the key (only from the `_if_absent` variants).
    AlreadyScheduled,
    /// The trigger has no future fire time; nothing was registered.
    Expired,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct QueueItem {
    fire_at: DateTime<Utc>,
    generation: u64,
    key: JobKey,
}

struct JobEntry {
    job: Arc<ScheduledJob>,
    generation: u64,
    next_fire: DateTime<Utc>,
    running: Arc<AtomicUsize>,
}

struct DueJob {
    job: Arc<ScheduledJob>,
    running: Arc<AtomicUsize>,
    fire_time: DateTime<Utc>,
}

/// Jobs plus a min-queue of fire times. Queue items whose generation no
/// longer matches the entry are stale and dropped on pop.
#[derive(Default)]
struct JobTable {
    entries: HashMap<JobKey, JobEntry>,
    queue: BinaryHeap<Reverse<QueueItem>>,
    next_generation: u64,
}

impl JobTable {
    fn insert(&mut self, job: ScheduledJob, first_fire: DateTime<Utc>) -> bool {
        self.next_generation += 1;
        let generation = self.next_generation;
        let key = job.key.clone();
        self.queue.push(Reverse(QueueItem {
            fire_at: first_fire,
            generation,
            key: key.clone(),
        }));
        let replaced = self
            .entries
            .insert(
                key,
                JobEntry {
                    job: Arc::new(job),
                    generation,
                    next_fire: first_fire,
                    running: Arc::new(AtomicUsize::new(0)),
                },
            )
            .is_some();
        if replaced {
            self.compact_if_stale();
        }
        replaced
    }

    fn remove(&mut self, key: &JobKey) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.compact_if_stale();
        }
        removed
    }

    /// Every live entry owns exactly one queue item at `(next_fire, generation)`,
    /// so the queue can be rebuilt from the entries alone.
    fn compact_if_stale(&mut self) {
        if self.queue.len() <= self.entries.len() * 2 + QUEUE_SLACK {
            return;
        }
        let stale = self.queue.len() - self.entries.len();
        self.queue = self
            .entries
            .iter()
            .map(|(key, entry)| {
                Reverse(QueueItem {
                    fire_at: entry.next_fire,
                    generation: entry.generation,
                    key: key.clone(),
                })
            })
            .collect();
        debug!(dropped = stale, live = self.entries.len(), "Compacted job queue");
    }

    fn take_due(&mut self, now: DateTime<Utc>) -> Vec<DueJob> {
        let mut due = Vec::new();
        while let Some(Reverse(head)) = self.queue.peek() {
            if head.fire_at > now {
                break;
            }
            let Some(Reverse(item)) = self.queue.pop() else {
                break;
            };
            let Some(entry) = self.entries.get_mut(&item.key) else {
                continue;
            };
            if entry.generation != item.generation {
                continue;
            }

            due.push(DueJob {
                job: entry.job.clone(),
                running: entry.running.clone(),
                fire_time: item.fire_at,
            });

            match entry.job.trigger.next_after(item.fire_at, now) {
                Some(next) => {
                    entry.next_fire = next;
                    self.queue.push(Reverse(QueueItem {
                        fire_at: next,
                        generation: item.generation,
                        key: item.key,
                    }));
                }
                None => {
                    // One-shot jobs and exhausted intervals expire once dequeued.
                    self.entries.remove(&item.key);
                }
            }
        }
        due
    }

    fn next_wake(&self) -> Option<DateTime<Utc>> {
        self.queue.peek().map(|Reverse(item)| item.fire_at)
    }
}

struct SchedulerInner {
    table: Mutex<JobTable>,
    wake: Notify,
    workers: Arc<Semaphore>,
    timezone: Tz,
    max_instances: usize,
    shutdown: AtomicBool,
}

/// Time-driven delivery scheduler. Cheap to clone; all clones share one job table.
#[derive(Clone)]
pub struct DeliveryScheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for DeliveryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryScheduler")
            .field("jobs", &self.len())
            .field("timezone", &self.inner.timezone)
            .finish()
    }
}

impl DeliveryScheduler {
    pub fn new(config: &SchedulerConfig) -> CampaignResult<Self> {
        let timezone: Tz = config.timezone.parse().map_err(|e| {
            CampaignError::Config(format!("invalid timezone '{}': {}", config.timezone, e))
        })?;
        if config.max_workers == 0 {
            return Err(CampaignError::Config("scheduler.max_workers must be > 0".into()));
        }

        info!(
            timezone = %timezone,
            max_workers = config.max_workers,
            max_instances = config.max_instances,
            "Delivery scheduler initialized"
        );

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                table: Mutex::new(JobTable::default()),
                wake: Notify::new(),
                workers: Arc::new(Semaphore::new(config.max_workers)),
                timezone,
                max_instances: config.max_instances.max(1),
                shutdown: AtomicBool::new(false),
            }),
        })
    }

    /// Spawn the timer task. Must be called from within a Tokio runtime.
    pub fn start(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run_timer().await })
    }

    /// Stop the timer task. Invocations already handed to workers complete.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.wake.notify_one();
    }

    pub fn timezone(&self) -> Tz {
        self.inner.timezone
    }

    /// Register a scheduled-kind campaign under key `campaignID`.
    pub fn schedule_scheduled_delivery(
        &self,
        campaign: &Campaign,
        handler: Arc<dyn DeliveryHandler>,
    ) -> CampaignResult<ScheduleOutcome> {
        let Delivery::Scheduled(scheduled) = &campaign.delivery else {
            return Err(CampaignError::Internal(anyhow!(
                "campaign {} is not a scheduled delivery",
                campaign.id
            )));
        };

        let trigger = resolve_recurrence(scheduled.schedule.as_ref())?;
        self.register(
            ScheduledJob {
                key: JobKey::for_campaign(&campaign.id),
                trigger,
                payload: JobPayload::Scheduled {
                    campaign: campaign.clone(),
                },
                handler,
            },
            false,
        )
    }

    /// Register an action-based campaign under key `campaignID:subjectID`.
    pub fn schedule_action_based_delivery(
        &self,
        campaign: &Campaign,
        action: SubjectAction,
        handler: Arc<dyn DeliveryHandler>,
    ) -> CampaignResult<ScheduleOutcome> {
        let job = self.action_based_job(campaign, action, handler)?;
        self.register(job, false)
    }

    /// Like [`schedule_action_based_delivery`](Self::schedule_action_based_delivery),
    /// but checks and registers under one lock so a pending delivery is never replaced.
    pub fn schedule_action_based_if_absent(
        &self,
        campaign: &Campaign,
        action: SubjectAction,
        handler: Arc<dyn DeliveryHandler>,
    ) -> CampaignResult<ScheduleOutcome> {
        let job = self.action_based_job(campaign, action, handler)?;
        self.register(job, true)
    }

    /// True iff a job is registered under the key.
    pub fn exists(&self, campaign_id: &str, subject_id: Option<&str>) -> bool {
        let key = JobKey::new(campaign_id, subject_id);
        self.inner.table.lock().entries.contains_key(&key)
    }

    /// Remove the job under the key. Removing an absent key is a no-op.
    /// Returns whether a job was removed.
    pub fn remove(&self, campaign_id: &str, subject_id: Option<&str>) -> bool {
        let key = JobKey::new(campaign_id, subject_id);
        let removed = self.inner.table.lock().remove(&key);
        if removed {
            metrics::counter!("scheduler.jobs_removed").increment(1);
            info!(job_key = %key, "Removed scheduled job");
        } else {
            debug!(job_key = %key, "Remove requested for absent job");
        }
        removed
    }

    pub fn next_fire_time(&self, campaign_id: &str, subject_id: Option<&str>) -> Option<DateTime<Utc>> {
        let key = JobKey::new(campaign_id, subject_id);
        self.inner
            .table
            .lock()
            .entries
            .get(&key)
            .map(|entry| entry.next_fire)
    }

    pub fn len(&self) -> usize {
        self.inner.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    fn action_based_job(
        &self,
        campaign: &Campaign,
        action: SubjectAction,
        handler: Arc<dyn DeliveryHandler>,
    ) -> CampaignResult<ScheduledJob> {
        let Delivery::ActionBased(action_based) = &campaign.delivery else {
            return Err(CampaignError::Internal(anyhow!(
                "campaign {} is not an action-based delivery",
                campaign.id
            )));
        };
        if action.subject_id().is_empty() {
            return Err(CampaignError::MissingSubject(campaign.id.clone()));
        }

        let trigger = resolve_delay(
            action_based.delay.as_ref(),
            Utc::now(),
            self.inner.timezone,
        )?;

        Ok(ScheduledJob {
            key: JobKey::for_subject(&campaign.id, action.subject_id()),
            trigger,
            payload: JobPayload::ActionBased {
                campaign: campaign.clone(),
                action,
            },
            handler,
        })
    }

    fn register(&self, job: ScheduledJob, only_if_absent: bool) -> CampaignResult<ScheduleOutcome> {
        let key = job.key.clone();
        let Some(first_fire) = job.trigger.first_fire(Utc::now()) else {
            warn!(job_key = %key, trigger = ?job.trigger, "Trigger has no future fire time, job not registered");
            return Ok(ScheduleOutcome::Expired);
        };

        let replaced = {
            let mut table = self.inner.table.lock();
            if only_if_absent && table.entries.contains_key(&key) {
                debug!(job_key = %key, "Job already scheduled");
                return Ok(ScheduleOutcome::AlreadyScheduled);
            }
            table.insert(job, first_fire)
        };
        self.inner.wake.notify_one();

        metrics::counter!("scheduler.jobs_scheduled").increment(1);
        info!(
            job_key = %key,
            next_fire = %first_fire,
            replaced = replaced,
            "Scheduled job"
        );

        Ok(ScheduleOutcome::Scheduled {
            next_fire: first_fire,
        })
    }
}

impl SchedulerInner {
    async fn run_timer(self: Arc<Self>) {
        info!("Delivery scheduler timer started");

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            let now = Utc::now();
            let (due, next_wake) = {
                let mut table = self.table.lock();
                let due = table.take_due(now);
                (due, table.next_wake())
            };

            for job in due {
                self.dispatch(job);
            }

            match next_wake {
                Some(at) => {
                    let wait = (at - Utc::now())
                        .to_std()
                        .unwrap_or(Duration::ZERO)
                        .min(MAX_TIMER_SLEEP);
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.wake.notified() => {}
                    }
                }
                None => self.wake.notified().await,
            }
        }

        info!("Delivery scheduler timer stopped");
    }

    fn dispatch(&self, due: DueJob) {
        let DueJob {
            job,
            running,
            fire_time,
        } = due;

        if job.trigger.is_recurring() && running.load(Ordering::Acquire) >= self.max_instances {
            warn!(
                job_key = %job.key,
                max_instances = self.max_instances,
                "Previous invocations still running, skipping this one"
            );
            metrics::counter!("scheduler.invocations_skipped").increment(1);
            return;
        }

        running.fetch_add(1, Ordering::AcqRel);
        let workers = self.workers.clone();

        tokio::spawn(async move {
            let _permit = match workers.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(job_key = %job.key, error = %e, "Worker pool closed");
                    running.fetch_sub(1, Ordering::AcqRel);
                    return;
                }
            };

            metrics::counter!("scheduler.jobs_fired").increment(1);
            debug!(job_key = %job.key, fire_time = %fire_time, "Firing job");

            let fired = FiredJob {
                key: job.key.clone(),
                payload: job.payload.clone(),
                fire_time,
            };
            if let Err(e) = job.handler.on_fire(fired).await {
                error!(job_key = %job.key, error = %e, "Delivery callback failed");
            }
            running.fetch_sub(1, Ordering::AcqRel);
        });
    }
}
