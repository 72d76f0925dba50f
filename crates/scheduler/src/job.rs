use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use campaign_core::types::{Campaign, SubjectAction};
use campaign_core::CampaignResult;
use chrono::{DateTime, TimeDelta, Utc};

/// Job identity: `campaignID` for scheduled deliveries,
/// `campaignID:subjectID` for action-based deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobKey(String);

impl JobKey {
    pub fn for_campaign(campaign_id: &str) -> Self {
        Self(campaign_id.to_string())
    }

    pub fn for_subject(campaign_id: &str, subject_id: &str) -> Self {
        Self(format!("{}:{}", campaign_id, subject_id))
    }

    pub fn new(campaign_id: &str, subject_id: Option<&str>) -> Self {
        match subject_id {
            Some(subject) => Self::for_subject(campaign_id, subject),
            None => Self::for_campaign(campaign_id),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTrigger {
    /// Run as soon as a worker is free.
    Immediate,
    /// Run once at an absolute time. Past times run immediately.
    At(DateTime<Utc>),
    /// Run every `every`, aligned to `start`, until `end` passes.
    Interval {
        every: TimeDelta,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    },
}

impl JobTrigger {
    pub fn is_recurring(&self) -> bool {
        matches!(self, JobTrigger::Interval { .. })
    }

    /// First fire time at or after `now`, or `None` if the trigger will never fire.
    pub fn first_fire(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            JobTrigger::Immediate => Some(now),
            JobTrigger::At(at) => Some(*at),
            JobTrigger::Interval { every, start, end } => {
                let every_ms = every.num_milliseconds();
                if every_ms <= 0 {
                    return None;
                }
                let next = if now <= *start {
                    *start
                } else {
                    let elapsed_ms = (now - *start).num_milliseconds();
                    let ticks = (elapsed_ms + every_ms - 1) / every_ms;
                    *start + TimeDelta::milliseconds(ticks.checked_mul(every_ms)?)
                };
                match end {
                    Some(end) if next > *end => None,
                    _ => Some(next),
                }
            }
        }
    }

    /// Fire time following a fire at `previous`. Ticks missed while the
    /// process was busy are not replayed.
    pub fn next_after(
        &self,
        previous: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match self {
            JobTrigger::Immediate | JobTrigger::At(_) => None,
            JobTrigger::Interval { .. } => {
                let floor = (previous + TimeDelta::milliseconds(1)).max(now);
                self.first_fire(floor)
            }
        }
    }
}

/// What a job carries to its callback.
#[derive(Debug, Clone)]
pub enum JobPayload {
    Scheduled {
        campaign: Campaign,
    },
    ActionBased {
        campaign: Campaign,
        action: SubjectAction,
    },
}

impl JobPayload {
    pub fn campaign(&self) -> &Campaign {
        match self {
            JobPayload::Scheduled { campaign } | JobPayload::ActionBased { campaign, .. } => {
                campaign
            }
        }
    }

    pub fn subject_id(&self) -> Option<&str> {
        match self {
            JobPayload::Scheduled { .. } => None,
            JobPayload::ActionBased { action, .. } => Some(action.subject_id()),
        }
    }
}

/// A single invocation handed to a worker.
#[derive(Debug, Clone)]
pub struct FiredJob {
    pub key: JobKey,
    pub payload: JobPayload,
    pub fire_time: DateTime<Utc>,
}

/// Caller-supplied callback invoked when a job fires.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn on_fire(&self, job: FiredJob) -> CampaignResult<()>;
}

/// A registered job.
pub struct ScheduledJob {
    pub key: JobKey,
    pub trigger: JobTrigger,
    pub payload: JobPayload,
    pub handler: Arc<dyn DeliveryHandler>,
}

impl fmt::Debug for ScheduledJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledJob")
            .field("key", &self.key)
            .field("trigger", &self.trigger)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_job_keys() {
        assert_eq!(JobKey::for_campaign("c1").as_str(), "c1");
        assert_eq!(JobKey::for_subject("c1", "42").to_string(), "c1:42");
        assert_eq!(JobKey::new("c1", Some("42")), JobKey::for_subject("c1", "42"));
    }

    #[test]
    fn test_interval_aligns_to_start() {
        let trigger = JobTrigger::Interval {
            every: TimeDelta::days(1),
            start: at(1, 9),
            end: None,
        };
        assert_eq!(trigger.first_fire(at(1, 0)), Some(at(1, 9)));
        assert_eq!(trigger.first_fire(at(3, 10)), Some(at(4, 9)));
        assert_eq!(trigger.first_fire(at(3, 9)), Some(at(3, 9)));
        assert_eq!(trigger.next_after(at(3, 9), at(3, 9)), Some(at(4, 9)));
    }

    #[test]
    fn test_interval_respects_end() {
        let trigger = JobTrigger::Interval {
            every: TimeDelta::days(7),
            start: at(1, 9),
            end: Some(at(10, 0)),
        };
        assert_eq!(trigger.next_after(at(1, 9), at(1, 9)), Some(at(8, 9)));
        assert_eq!(trigger.next_after(at(8, 9), at(8, 9)), None);
    }

    #[test]
    fn test_one_shot_has_no_successor() {
        assert_eq!(JobTrigger::At(at(1, 9)).next_after(at(1, 9), at(1, 9)), None);
        assert_eq!(JobTrigger::Immediate.next_after(at(1, 9), at(1, 9)), None);
    }
}
