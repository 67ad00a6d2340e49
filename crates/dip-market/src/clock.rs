//! Period boundary math and ET-localised slug fragments.
//!
//! Market slugs for hourly and daily windows embed New York calendar
//! fragments. A server running in UTC that formats slugs from its local
//! clock will request markets that do not exist yet, so every calendar
//! fragment here goes through America/New_York, DST included.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use chrono_tz::America::New_York;

use dip_common::Timeframe;

/// Lowercase English month names, indexed by `month0`.
const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// Unix seconds of the period boundary at or before `now`.
pub fn current_period_start(now: DateTime<Utc>, timeframe: Timeframe) -> i64 {
    let period = timeframe.period_secs();
    let ts = now.timestamp();
    ts - ts.rem_euclid(period)
}

/// Unix seconds of the period `offset` windows after the current one.
pub fn period_start(now: DateTime<Utc>, timeframe: Timeframe, offset: u8) -> i64 {
    current_period_start(now, timeframe) + i64::from(offset) * timeframe.period_secs()
}

/// Milliseconds until the next period boundary. Strictly positive: exactly
/// on a boundary yields one full period.
pub fn ms_until_next_boundary(now: DateTime<Utc>, timeframe: Timeframe) -> u64 {
    let period_ms = timeframe.period_secs() * 1000;
    let now_ms = now.timestamp_millis();
    let rem = now_ms.rem_euclid(period_ms);
    (period_ms - rem) as u64
}

/// ET calendar fragments used to build hourly/daily market slugs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlugFragments {
    /// Lowercase English month name ("january").
    pub month_name: &'static str,
    /// Day of month, 1-31.
    pub day: u32,
    /// Hour on the 12-hour clock, 1-12.
    pub hour12: u32,
    /// "am" or "pm".
    pub am_pm: &'static str,
}

impl SlugFragments {
    /// Compute the fragments for a period start, in America/New_York.
    pub fn for_period(period_ts: i64, _timeframe: Timeframe) -> Self {
        let utc = Utc
            .timestamp_opt(period_ts, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let et = utc.with_timezone(&New_York);

        let (is_pm, hour12) = et.hour12();
        Self {
            month_name: MONTH_NAMES[et.month0() as usize],
            day: et.day(),
            hour12,
            am_pm: if is_pm { "pm" } else { "am" },
        }
    }
}
