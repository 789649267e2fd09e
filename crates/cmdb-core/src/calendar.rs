//! Release-calendar arithmetic.
//!
//! Maps a [`ReleaseSchedule`] to concrete fire instants. Every function takes
//! "now" as a parameter and never reads the wall clock, so schedules can be
//! tested against any simulated instant.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use crate::jobs::{Frequency, ReleaseSchedule};

/// Months that open a calendar quarter.
const QUARTER_MONTHS: [u32; 4] = [1, 4, 7, 10];

/// Compute the next instant at or after `now` at which the schedule fires.
///
/// Returns `None` for on-demand schedules (manual invocation only) and for
/// weekly/monthly schedules whose required day field is missing; load-time
/// validation rejects those, so a `None` here means the schedule never fires
/// automatically.
///
/// Candidate instants are resolved in the schedule's timezone and converted
/// to UTC. A local time made ambiguous by a DST fold maps to the earlier
/// instant; a local time skipped by a DST gap rolls forward one hour.
#[must_use]
pub fn next_fire_after(schedule: &ReleaseSchedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let tz = schedule.timezone;
    let local_date = now.with_timezone(&tz).date_naive();
    let time = schedule.time_of_day;

    match schedule.frequency {
        Frequency::OnDemand => None,
        Frequency::Daily => {
            let mut date = local_date;
            // A candidate can miss by at most a weekend plus one day.
            for _ in 0..8 {
                if is_business_day(date) {
                    if let Some(fire) = localize(tz, date.and_time(time)) {
                        if fire >= now {
                            return Some(fire);
                        }
                    }
                }
                date = date.succ_opt()?;
            }
            None
        }
        Frequency::Weekly => {
            let target = schedule.day_of_week?;
            let mut date = local_date;
            for _ in 0..9 {
                if date.weekday() == target {
                    if let Some(fire) = localize(tz, date.and_time(time)) {
                        if fire >= now {
                            return Some(fire);
                        }
                    }
                }
                date = date.succ_opt()?;
            }
            None
        }
        Frequency::Monthly => next_period_fire(schedule, now, 1),
        Frequency::Quarterly => next_period_fire(schedule, now, 3),
    }
}

/// Whether the schedule is due on the given local calendar date.
///
/// Time-of-day is deliberately ignored: this answers "does this source
/// publish today", which is what the `today` command and manual catch-up
/// care about.
#[must_use]
pub fn fires_on(schedule: &ReleaseSchedule, date: NaiveDate) -> bool {
    match schedule.frequency {
        Frequency::OnDemand => false,
        Frequency::Daily => is_business_day(date),
        Frequency::Weekly => schedule.day_of_week == Some(date.weekday()),
        Frequency::Monthly => day_matches(schedule, date),
        Frequency::Quarterly => QUARTER_MONTHS.contains(&date.month()) && day_matches(schedule, date),
    }
}

/// All fire instants within `horizon` of `now`, in order.
#[must_use]
pub fn upcoming_fires(
    schedule: &ReleaseSchedule,
    now: DateTime<Utc>,
    horizon: Duration,
) -> Vec<DateTime<Utc>> {
    let end = now + horizon;
    let mut fires = Vec::new();
    let mut cursor = now;
    while let Some(fire) = next_fire_after(schedule, cursor) {
        if fire > end {
            break;
        }
        fires.push(fire);
        // Nudge past the found instant so the same slot is not returned again.
        cursor = fire + Duration::minutes(1);
    }
    fires
}

/// Default descriptor for the period a firing's data covers: the fire date in
/// the schedule's timezone, minus the publication lag. This is the only place
/// `lag_days` participates; it never shifts the fire time.
#[must_use]
pub fn default_data_period(schedule: &ReleaseSchedule, fired_at: DateTime<Utc>) -> String {
    let local = fired_at.with_timezone(&schedule.timezone).date_naive();
    let period = local - Duration::days(i64::from(schedule.lag_days));
    period.format("%Y-%m-%d").to_string()
}

/// Resolve a day-of-month specifier against a concrete month.
///
/// Positive days clamp to the month's length (day 31 in February resolves to
/// the 28th or 29th). Negative days count back from the last day of that
/// month, the last day itself being -1, using the month's exact length. A
/// negative specifier that reaches before the 1st clamps to day 1.
#[must_use]
pub fn resolve_day_of_month(day: i8, year: i32, month: u32) -> u32 {
    let len = days_in_month(year, month);
    let resolved = if day > 0 {
        i64::from(day)
    } else {
        i64::from(len) + i64::from(day) + 1
    };
    u32::try_from(resolved.clamp(1, i64::from(len))).unwrap_or(1)
}

fn day_matches(schedule: &ReleaseSchedule, date: NaiveDate) -> bool {
    schedule
        .day_of_month
        .is_some_and(|d| resolve_day_of_month(d, date.year(), date.month()) == date.day())
}

fn next_period_fire(
    schedule: &ReleaseSchedule,
    now: DateTime<Utc>,
    step_months: u32,
) -> Option<DateTime<Utc>> {
    let day_spec = schedule.day_of_month?;
    let tz = schedule.timezone;
    let local_date = now.with_timezone(&tz).date_naive();

    let mut year = local_date.year();
    let mut month = local_date.month();
    if step_months == 3 {
        month = quarter_first_month(month);
    }

    // Two periods always suffice; a few spares cover degenerate dates.
    for _ in 0..8 {
        let day = resolve_day_of_month(day_spec, year, month);
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            if let Some(fire) = localize(tz, date.and_time(schedule.time_of_day)) {
                if fire >= now {
                    return Some(fire);
                }
            }
        }
        month += step_months;
        if month > 12 {
            month -= 12;
            year += 1;
        }
    }
    None
}

fn quarter_first_month(month: u32) -> u32 {
    ((month - 1) / 3) * 3 + 1
}

fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map_or(31, |d| d.day())
}

fn localize(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => tz
            .from_local_datetime(&(local + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[path = "calendar_test.rs"]
mod tests;
