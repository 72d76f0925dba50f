//! Delay policy evaluation. Turns delay specifications and recurrence
//! policies into fire triggers.
//!
//! Calendar arithmetic always happens in the configured zone, never in the
//! machine's local zone.

use campaign_core::types::{CalendarOp, CalendarRule, DelaySpec, Frequency, Recurrence};
use campaign_core::{CampaignError, CampaignResult};
use chrono::{DateTime, Datelike, Days, NaiveDate, TimeDelta, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use crate::job::JobTrigger;

/// Monthly recurrence is a fixed 30-day interval, not a calendar month.
pub const MONTHLY_INTERVAL_DAYS: i64 = 30;

/// Resolves a delay specification against `reference` in `timezone`.
pub fn resolve(
    spec: &DelaySpec,
    reference: DateTime<Utc>,
    timezone: Tz,
) -> CampaignResult<DateTime<Tz>> {
    let local = reference.with_timezone(&timezone);

    match spec {
        DelaySpec::FixedOffset { seconds } => {
            if *seconds < 0 {
                return Err(CampaignError::InvalidDelaySpec(format!(
                    "negative offset {}s",
                    seconds
                )));
            }
            TimeDelta::try_seconds(*seconds)
                .and_then(|offset| local.checked_add_signed(offset))
                .ok_or_else(|| {
                    CampaignError::InvalidDelaySpec(format!("offset {}s out of range", seconds))
                })
        }
        DelaySpec::Calendar(rule) => {
            let date = resolve_calendar_date(rule, local.date_naive())?;
            timezone
                .from_local_datetime(&date.and_time(rule.at_time))
                .earliest()
                .ok_or_else(|| {
                    CampaignError::InvalidDelaySpec(format!(
                        "{} {} does not exist in {}",
                        date, rule.at_time, timezone
                    ))
                })
        }
    }
}

fn resolve_calendar_date(rule: &CalendarRule, today: NaiveDate) -> CampaignResult<NaiveDate> {
    match &rule.op {
        CalendarOp::NextWeekday => {
            let target = u8::try_from(rule.value)
                .ok()
                .and_then(|v| Weekday::try_from(v).ok())
                .ok_or_else(|| {
                    CampaignError::InvalidDelaySpec(format!(
                        "weekday must be 0 (Monday) to 6 (Sunday), got {}",
                        rule.value
                    ))
                })?;

            // "Next" excludes today.
            let mut ahead = (7 + target.num_days_from_monday()
                - today.weekday().num_days_from_monday())
                % 7;
            if ahead == 0 {
                ahead = 7;
            }
            today
                .checked_add_days(Days::new(u64::from(ahead)))
                .ok_or_else(|| CampaignError::InvalidDelaySpec("date out of range".into()))
        }
        CalendarOp::AddDays => {
            let days = u64::try_from(rule.value).map_err(|_| {
                CampaignError::InvalidDelaySpec(format!("negative day count {}", rule.value))
            })?;
            today
                .checked_add_days(Days::new(days))
                .ok_or_else(|| CampaignError::InvalidDelaySpec("date out of range".into()))
        }
        CalendarOp::Unsupported(op) => Err(CampaignError::InvalidDelaySpec(format!(
            "unknown calendar operator '{}'",
            op
        ))),
    }
}

/// Trigger for an action-based delivery. No delay means fire now.
pub fn resolve_delay(
    delay: Option<&DelaySpec>,
    reference: DateTime<Utc>,
    timezone: Tz,
) -> CampaignResult<JobTrigger> {
    match delay {
        None => Ok(JobTrigger::Immediate),
        Some(spec) => {
            let fire_at = resolve(spec, reference, timezone)?;
            Ok(JobTrigger::At(fire_at.with_timezone(&Utc)))
        }
    }
}

/// Trigger for a scheduled delivery. No schedule means fire once, now.
pub fn resolve_recurrence(schedule: Option<&Recurrence>) -> CampaignResult<JobTrigger> {
    let Some(schedule) = schedule else {
        return Ok(JobTrigger::Immediate);
    };

    if let Some(end) = schedule.end_date {
        if end < schedule.start_date {
            return Err(CampaignError::InvalidRecurrence(format!(
                "end date {} precedes start date {}",
                end, schedule.start_date
            )));
        }
    }

    let every = match &schedule.frequency {
        Frequency::Once => return Ok(JobTrigger::At(schedule.start_date)),
        Frequency::Daily => TimeDelta::days(1),
        Frequency::Weekly => TimeDelta::weeks(1),
        Frequency::Monthly => TimeDelta::days(MONTHLY_INTERVAL_DAYS),
        Frequency::Unsupported(other) => {
            return Err(CampaignError::InvalidRecurrence(format!(
                "unknown frequency '{}'",
                other
            )))
        }
    };

    Ok(JobTrigger::Interval {
        every,
        start: schedule.start_date,
        end: schedule.end_date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    const SEOUL: Tz = chrono_tz::Asia::Seoul;

    fn kst(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Tz> {
        SEOUL.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn calendar(op: CalendarOp, value: i64, hour: u32) -> DelaySpec {
        DelaySpec::Calendar(CalendarRule {
            op,
            value,
            at_time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
        })
    }

    #[test]
    fn test_add_days_at_time() {
        let reference = kst(2024, 1, 1, 0, 0).with_timezone(&Utc);
        let fire = resolve(&calendar(CalendarOp::AddDays, 3, 9), reference, SEOUL).unwrap();
        assert_eq!(fire, kst(2024, 1, 4, 9, 0));
    }

    #[test]
    fn test_next_weekday_skips_today() {
        // 2024-01-01 is a Monday.
        let reference = kst(2024, 1, 1, 10, 0).with_timezone(&Utc);
        let fire = resolve(&calendar(CalendarOp::NextWeekday, 0, 8), reference, SEOUL).unwrap();
        assert_eq!(fire, kst(2024, 1, 8, 8, 0));
    }

    #[test]
    fn test_next_weekday_later_this_week() {
        let reference = kst(2024, 1, 1, 10, 0).with_timezone(&Utc);
        // Friday = 4
        let fire = resolve(&calendar(CalendarOp::NextWeekday, 4, 18), reference, SEOUL).unwrap();
        assert_eq!(fire, kst(2024, 1, 5, 18, 0));
    }

    #[test]
    fn test_calendar_uses_configured_zone_date() {
        // 2024-01-01T20:00Z is already 2024-01-02 in Seoul.
        let reference = Utc.with_ymd_and_hms(2024, 1, 1, 20, 0, 0).unwrap();
        let fire = resolve(&calendar(CalendarOp::AddDays, 1, 9), reference, SEOUL).unwrap();
        assert_eq!(fire, kst(2024, 1, 3, 9, 0));
    }

    #[test]
    fn test_fixed_offset() {
        let reference = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let fire = resolve(&DelaySpec::FixedOffset { seconds: 90 }, reference, SEOUL).unwrap();
        assert_eq!(fire.with_timezone(&Utc), reference + TimeDelta::seconds(90));
    }

    #[test]
    fn test_invalid_delay_specs() {
        let reference = Utc::now();
        let unknown = calendar(CalendarOp::Unsupported("hours".into()), 1, 9);
        assert!(matches!(
            resolve(&unknown, reference, SEOUL),
            Err(CampaignError::InvalidDelaySpec(_))
        ));
        assert!(matches!(
            resolve(&calendar(CalendarOp::NextWeekday, 7, 9), reference, SEOUL),
            Err(CampaignError::InvalidDelaySpec(_))
        ));
        assert!(matches!(
            resolve(&DelaySpec::FixedOffset { seconds: -5 }, reference, SEOUL),
            Err(CampaignError::InvalidDelaySpec(_))
        ));
    }

    #[test]
    fn test_no_delay_fires_immediately() {
        let trigger = resolve_delay(None, Utc::now(), SEOUL).unwrap();
        assert_eq!(trigger, JobTrigger::Immediate);
    }

    #[test]
    fn test_recurrence_triggers() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let recurrence = |frequency| Recurrence {
            frequency,
            start_date: start,
            end_date: None,
        };

        assert_eq!(resolve_recurrence(None).unwrap(), JobTrigger::Immediate);
        assert_eq!(
            resolve_recurrence(Some(&recurrence(Frequency::Once))).unwrap(),
            JobTrigger::At(start)
        );
        assert_eq!(
            resolve_recurrence(Some(&recurrence(Frequency::Weekly))).unwrap(),
            JobTrigger::Interval {
                every: TimeDelta::days(7),
                start,
                end: None
            }
        );
        assert_eq!(
            resolve_recurrence(Some(&recurrence(Frequency::Monthly))).unwrap(),
            JobTrigger::Interval {
                every: TimeDelta::days(30),
                start,
                end: None
            }
        );
        assert!(matches!(
            resolve_recurrence(Some(&recurrence(Frequency::Unsupported("yearly".into())))),
            Err(CampaignError::InvalidRecurrence(_))
        ));
    }

    #[test]
    fn test_recurrence_end_before_start() {
        let start = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let recurrence = Recurrence {
            frequency: Frequency::Daily,
            start_date: start,
            end_date: Some(start - TimeDelta::days(1)),
        };
        assert!(matches!(
            resolve_recurrence(Some(&recurrence)),
            Err(CampaignError::InvalidRecurrence(_))
        ));
    }
}
