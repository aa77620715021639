use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};

use crate::quota::config::{DaySchedule, TimeBlock};
use crate::quota::error::{QuotaError, Result};

/// The time block in force at a given instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveBlock {
    /// Zero-based position among the blocks of all schedules matching the
    /// day, in stored order. Numbering does not restart per schedule: the
    /// first block of a second matching schedule follows the last block of
    /// the first. Usage records are keyed by this value.
    pub index: usize,
    pub block: TimeBlock,
}

/// Resolves which quota window applies to a device at a given time
pub struct ScheduleResolver;

impl ScheduleResolver {
    /// Find the active time block for `at` (local wall-clock time)
    ///
    /// Schedules are scanned in stored order, then their blocks in stored
    /// order; the first block with `start <= now < end` wins.
    pub fn active_block(schedules: &[DaySchedule], at: NaiveDateTime) -> Result<Option<ActiveBlock>> {
        let weekday = at.weekday();
        let now = at.hour() * 60 + at.minute();
        let mut index = 0;

        for schedule in schedules {
            if !Self::day_matches(&schedule.days, weekday) {
                continue;
            }

            for block in &schedule.time_blocks {
                let start = parse_clock(&block.start)?;
                let end = parse_clock(&block.end)?;
                if start <= now && now < end {
                    return Ok(Some(ActiveBlock {
                        index,
                        block: block.clone(),
                    }));
                }
                index += 1;
            }
        }

        Ok(None)
    }

    /// Check whether any of the day selectors covers `weekday`
    pub fn day_matches(selectors: &[String], weekday: Weekday) -> bool {
        let day_name = Self::weekday_name(weekday);

        selectors.iter().any(|selector| {
            match selector.to_lowercase().as_str() {
                "weekdays" => !Self::is_weekend(weekday),
                "weekends" => Self::is_weekend(weekday),
                other => other == day_name,
            }
        })
    }

    /// Check if a weekday is a weekend
    pub fn is_weekend(weekday: Weekday) -> bool {
        matches!(weekday, Weekday::Sat | Weekday::Sun)
    }

    /// Lowercase English day name
    pub fn weekday_name(weekday: Weekday) -> &'static str {
        match weekday {
            Weekday::Mon => "monday",
            Weekday::Tue => "tuesday",
            Weekday::Wed => "wednesday",
            Weekday::Thu => "thursday",
            Weekday::Fri => "friday",
            Weekday::Sat => "saturday",
            Weekday::Sun => "sunday",
        }
    }
}

/// Parse `HH:MM` into minutes since midnight; `24:00` is accepted as 1440
pub fn parse_clock(value: &str) -> Result<u32> {
    let invalid = || QuotaError::InvalidSchedule {
        detail: format!("expected HH:MM, got '{}'", value),
    };

    let (hours, minutes) = value.trim().split_once(':').ok_or_else(invalid)?;
    if hours.len() != 2 || minutes.len() != 2 {
        return Err(invalid());
    }

    let hours: u32 = hours.parse().map_err(|_| invalid())?;
    let minutes: u32 = minutes.parse().map_err(|_| invalid())?;

    match (hours, minutes) {
        (24, 0) => Ok(24 * 60),
        (h, m) if h < 24 && m < 60 => Ok(h * 60 + m),
        _ => Err(invalid()),
    }
}
