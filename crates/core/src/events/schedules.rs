//! Scheduled-event entries and next-occurrence helpers.
//!
//! The dispatcher stores one-shot [`ScheduledEntry`] values ordered by fire
//! time. The helpers here compute the next wall-clock occurrence for the
//! standing refresh schedules (daily, hourly, weekend evening); callers
//! re-arm after each firing if they want recurrence.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, Utc, Weekday};

use crate::errors::{EventError, Result};
use crate::events::envelope::Event;

/// Handle for cancelling a scheduled entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScheduleId(pub(crate) u64);

/// A one-shot scheduled event awaiting its fire time.
#[derive(Clone, Debug)]
pub struct ScheduledEntry {
    pub id: ScheduleId,
    pub fire_at: DateTime<Utc>,
    pub event: Event,
}

fn time_of_day(hour: u32, minute: u32) -> Result<NaiveTime> {
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| {
        EventError::Scheduling(format!("invalid time of day {hour:02}:{minute:02}"))
    })
}

/// Next occurrence of `hour:minute` strictly after `after`.
pub fn next_daily(after: DateTime<Utc>, hour: u32, minute: u32) -> Result<DateTime<Utc>> {
    let time = time_of_day(hour, minute)?;
    let mut candidate = after.date_naive().and_time(time).and_utc();
    if candidate <= after {
        candidate += ChronoDuration::days(1);
    }
    Ok(candidate)
}

/// Next occurrence of minute `minute` in some hour, strictly after `after`.
pub fn next_hourly(after: DateTime<Utc>, minute: u32) -> Result<DateTime<Utc>> {
    if minute >= 60 {
        return Err(EventError::Scheduling(format!(
            "invalid minute of hour {minute}"
        )));
    }
    let truncated = after
        .date_naive()
        .and_time(time_of_day(chrono::Timelike::hour(&after), minute)?)
        .and_utc();
    if truncated > after {
        Ok(truncated)
    } else {
        Ok(truncated + ChronoDuration::hours(1))
    }
}

/// Next Saturday 18:00, strictly after `after`.
pub fn next_weekend_evening(after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let time = time_of_day(18, 0)?;
    let days_ahead = (Weekday::Sat.num_days_from_monday() + 7
        - after.weekday().num_days_from_monday())
        % 7;
    let mut candidate = (after.date_naive() + ChronoDuration::days(i64::from(days_ahead)))
        .and_time(time)
        .and_utc();
    if candidate <= after {
        candidate += ChronoDuration::days(7);
    }
    Ok(candidate)
}

/// Installs the standing refresh schedules against a dispatcher.
///
/// Each method arms a single firing at the next matching wall-clock time;
/// there is no automatic re-arming.
pub struct TimeBasedEventScheduler {
    dispatcher: crate::events::dispatcher::TimeEventDispatcher,
}

impl TimeBasedEventScheduler {
    pub fn new(dispatcher: crate::events::dispatcher::TimeEventDispatcher) -> Self {
        Self { dispatcher }
    }

    /// Full assumption-layer refresh at the next `hour:minute`.
    pub fn schedule_daily_assumption_update(&self, hour: u32, minute: u32) -> Result<ScheduleId> {
        let fire_at = next_daily(self.dispatcher.now(), hour, minute)?;
        let event = Event::assumption_layer_update(
            crate::events::envelope::LayerKind::All,
            "daily_refresh",
        );
        Ok(self.dispatcher.schedule_event(event, fire_at))
    }

    /// Spending-propensity refresh at the top of the next hour.
    pub fn schedule_hourly_spending_update(&self) -> Result<ScheduleId> {
        let fire_at = next_hourly(self.dispatcher.now(), 0)?;
        let event = Event::assumption_layer_update(
            crate::events::envelope::LayerKind::SpendingPropensity,
            "hourly_refresh",
        );
        Ok(self.dispatcher.schedule_event(event, fire_at))
    }

    /// College-presence refresh at the next Saturday evening.
    pub fn schedule_weekend_college_update(&self) -> Result<ScheduleId> {
        let fire_at = next_weekend_evening(self.dispatcher.now())?;
        let event = Event::assumption_layer_update(
            crate::events::envelope::LayerKind::CollegePresence,
            "weekend_refresh",
        );
        Ok(self.dispatcher.schedule_event(event, fire_at))
    }
}
