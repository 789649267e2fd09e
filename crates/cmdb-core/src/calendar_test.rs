use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use super::*;
use crate::jobs::{Frequency, ReleaseSchedule};

fn schedule(frequency: Frequency) -> ReleaseSchedule {
    ReleaseSchedule {
        frequency,
        day_of_week: None,
        day_of_month: None,
        time_of_day: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        timezone: chrono_tz::UTC,
        lag_days: 0,
        description: None,
    }
}

fn monthly(day: i8) -> ReleaseSchedule {
    ReleaseSchedule {
        day_of_month: Some(day),
        ..schedule(Frequency::Monthly)
    }
}

fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

#[test]
fn monthly_negative_day_uses_exact_month_length() {
    // September has 30 days: -5 resolves to the 26th.
    let fire = next_fire_after(&monthly(-5), at(2025, 9, 1, 0, 0)).unwrap();
    assert_eq!(fire, at(2025, 9, 26, 9, 0));

    // July has 31 days: the same rule lands on the 27th.
    let fire = next_fire_after(&monthly(-5), at(2025, 7, 1, 0, 0)).unwrap();
    assert_eq!(fire, at(2025, 7, 27, 9, 0));
}

#[test]
fn monthly_positive_day_clamps_to_month_length() {
    let fire = next_fire_after(&monthly(31), at(2025, 2, 1, 0, 0)).unwrap();
    assert_eq!(fire, at(2025, 2, 28, 9, 0));

    // Leap year February keeps its 29th.
    let fire = next_fire_after(&monthly(31), at(2024, 2, 1, 0, 0)).unwrap();
    assert_eq!(fire, at(2024, 2, 29, 9, 0));
}

#[test]
fn monthly_rolls_into_next_month_when_day_has_passed() {
    let fire = next_fire_after(&monthly(15), at(2025, 9, 20, 0, 0)).unwrap();
    assert_eq!(fire, at(2025, 10, 15, 9, 0));
}

#[test]
fn resolve_day_of_month_clamps_below_first() {
    // -30 in a 28-day month reaches before the 1st; clamp rather than wrap.
    assert_eq!(resolve_day_of_month(-30, 2025, 2), 1);
    assert_eq!(resolve_day_of_month(-1, 2025, 2), 28);
    assert_eq!(resolve_day_of_month(-1, 2024, 2), 29);
}

#[test]
fn daily_fires_same_business_day_before_time() {
    let s = ReleaseSchedule {
        time_of_day: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        timezone: chrono_tz::America::New_York,
        ..schedule(Frequency::Daily)
    };
    // 2025-07-11 is a Friday; 08:00 EDT is before the 15:30 slot.
    let fire = next_fire_after(&s, at(2025, 7, 11, 12, 0)).unwrap();
    assert_eq!(fire, at(2025, 7, 11, 19, 30));
}

#[test]
fn daily_skips_weekend_to_monday() {
    let s = ReleaseSchedule {
        time_of_day: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        timezone: chrono_tz::America::New_York,
        ..schedule(Frequency::Daily)
    };
    // Friday 16:00 EDT, after the slot: next fire is Monday.
    let fire = next_fire_after(&s, at(2025, 7, 11, 20, 0)).unwrap();
    assert_eq!(fire, at(2025, 7, 14, 19, 30));
}

#[test]
fn weekly_finds_next_target_weekday() {
    let s = ReleaseSchedule {
        day_of_week: Some(Weekday::Fri),
        time_of_day: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        timezone: chrono_tz::America::New_York,
        ..schedule(Frequency::Weekly)
    };
    let fire = next_fire_after(&s, at(2025, 7, 9, 0, 0)).unwrap();
    assert_eq!(fire, at(2025, 7, 11, 19, 30));
}

#[test]
fn weekly_fire_at_exact_instant_is_included() {
    let s = ReleaseSchedule {
        day_of_week: Some(Weekday::Fri),
        time_of_day: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        timezone: chrono_tz::America::New_York,
        ..schedule(Frequency::Weekly)
    };
    let slot = at(2025, 7, 11, 19, 30);
    assert_eq!(next_fire_after(&s, slot), Some(slot));
}

#[test]
fn weekly_utc_offset_tracks_dst() {
    let s = ReleaseSchedule {
        day_of_week: Some(Weekday::Fri),
        time_of_day: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        timezone: chrono_tz::America::New_York,
        ..schedule(Frequency::Weekly)
    };
    // January: EST, UTC-5.
    let fire = next_fire_after(&s, at(2025, 1, 8, 0, 0)).unwrap();
    assert_eq!(fire, at(2025, 1, 10, 20, 30));
    // July: EDT, UTC-4.
    let fire = next_fire_after(&s, at(2025, 7, 9, 0, 0)).unwrap();
    assert_eq!(fire, at(2025, 7, 11, 19, 30));
}

#[test]
fn quarterly_restricted_to_quarter_opening_months() {
    let s = ReleaseSchedule {
        day_of_month: Some(5),
        ..schedule(Frequency::Quarterly)
    };
    // Mid-February: next quarter opens in April.
    let fire = next_fire_after(&s, at(2025, 2, 10, 0, 0)).unwrap();
    assert_eq!(fire, at(2025, 4, 5, 9, 0));

    // Early January: the current quarter's own opening month still qualifies.
    let fire = next_fire_after(&s, at(2025, 1, 2, 0, 0)).unwrap();
    assert_eq!(fire, at(2025, 1, 5, 9, 0));
}

#[test]
fn quarterly_negative_day() {
    let s = ReleaseSchedule {
        day_of_month: Some(-1),
        ..schedule(Frequency::Quarterly)
    };
    let fire = next_fire_after(&s, at(2025, 5, 1, 0, 0)).unwrap();
    assert_eq!(fire, at(2025, 7, 31, 9, 0));
}

#[test]
fn on_demand_never_fires() {
    assert_eq!(
        next_fire_after(&schedule(Frequency::OnDemand), at(2025, 7, 9, 0, 0)),
        None
    );
}

#[test]
fn fires_on_matches_each_frequency() {
    let friday = NaiveDate::from_ymd_opt(2025, 7, 11).unwrap();
    let saturday = NaiveDate::from_ymd_opt(2025, 7, 12).unwrap();

    assert!(fires_on(&schedule(Frequency::Daily), friday));
    assert!(!fires_on(&schedule(Frequency::Daily), saturday));

    let weekly = ReleaseSchedule {
        day_of_week: Some(Weekday::Fri),
        ..schedule(Frequency::Weekly)
    };
    assert!(fires_on(&weekly, friday));
    assert!(!fires_on(&weekly, saturday));

    let sept_26 = NaiveDate::from_ymd_opt(2025, 9, 26).unwrap();
    assert!(fires_on(&monthly(-5), sept_26));
    assert!(!fires_on(&monthly(-5), friday));

    let quarterly = ReleaseSchedule {
        day_of_month: Some(26),
        ..schedule(Frequency::Quarterly)
    };
    // Day 26, but September does not open a quarter.
    assert!(!fires_on(&quarterly, sept_26));
    let oct_26 = NaiveDate::from_ymd_opt(2025, 10, 26).unwrap();
    assert!(fires_on(&quarterly, oct_26));

    assert!(!fires_on(&schedule(Frequency::OnDemand), friday));
}

#[test]
fn upcoming_fires_lists_fires_within_horizon() {
    let s = ReleaseSchedule {
        day_of_week: Some(Weekday::Fri),
        time_of_day: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        timezone: chrono_tz::America::New_York,
        ..schedule(Frequency::Weekly)
    };
    let fires = upcoming_fires(&s, at(2025, 7, 9, 0, 0), Duration::days(14));
    assert_eq!(fires, vec![at(2025, 7, 11, 19, 30), at(2025, 7, 18, 19, 30)]);
}

#[test]
fn default_data_period_subtracts_lag_days() {
    let s = ReleaseSchedule {
        day_of_week: Some(Weekday::Fri),
        time_of_day: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        timezone: chrono_tz::America::New_York,
        lag_days: 3,
        ..schedule(Frequency::Weekly)
    };
    assert_eq!(default_data_period(&s, at(2025, 7, 11, 19, 30)), "2025-07-08");
}

#[test]
fn timezone_difference_changes_utc_fire() {
    let utc = monthly(5);
    let tokyo = ReleaseSchedule {
        timezone: "Asia/Tokyo".parse::<Tz>().unwrap(),
        ..monthly(5)
    };
    let now = at(2025, 9, 1, 0, 0);
    assert_eq!(next_fire_after(&utc, now).unwrap(), at(2025, 9, 5, 9, 0));
    // 09:00 JST is midnight UTC.
    assert_eq!(next_fire_after(&tokyo, now).unwrap(), at(2025, 9, 5, 0, 0));
}
