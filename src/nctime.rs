//! Conversion between CF-convention numeric times and [`NaiveDateTime`] values.
use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use regex::Regex;

use crate::error::PrepError;

/// Units written for time coordinates in output files. Times are stored as
/// whole seconds, so any sub-second part is dropped on write.
pub const OUTPUT_TIME_UNITS: &str = "seconds since 1970-01-01 00:00:00";
/// Calendar written for time coordinates in output files.
pub const OUTPUT_CALENDAR: &str = "proleptic_gregorian";

fn units_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"^\s*(?<unit>[a-zA-Z]+)\s+since\s+",
            r"(?<date>\d{1,4}-\d{1,2}-\d{1,2})",
            r"(?:[ T](?<time>\d{1,2}:\d{1,2}(?::\d{1,2}(?:\.\d+)?)?))?",
        ))
        .expect("time units regex must be valid")
    })
}

/// A parsed CF time units string, e.g. "hours since 1900-01-01 00:00:00".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeUnits {
    pub(crate) step_millis: i64,
    pub(crate) epoch: NaiveDateTime,
}

impl TimeUnits {
    /// Parse a CF "<unit> since <date>[ <time>]" string. Returns `None` if the
    /// string does not have that form, which is how time coordinates are told
    /// apart from other coordinates when reading.
    pub fn parse(units: &str) -> Option<Self> {
        let caps = units_regex().captures(units)?;
        let step_millis = match caps["unit"].to_ascii_lowercase().as_str() {
            "milliseconds" | "millisecond" | "msec" | "ms" => 1,
            "seconds" | "second" | "secs" | "sec" | "s" => 1_000,
            "minutes" | "minute" | "mins" | "min" => 60_000,
            "hours" | "hour" | "hrs" | "hr" | "h" => 3_600_000,
            "days" | "day" | "d" => 86_400_000,
            _ => return None,
        };

        let date = NaiveDate::parse_from_str(&caps["date"], "%Y-%m-%d").ok()?;
        let time = match caps.name("time") {
            Some(t) => parse_time_of_day(t.as_str())?,
            None => NaiveTime::MIN,
        };
        Some(Self {
            step_millis,
            epoch: date.and_time(time),
        })
    }

    /// Convert one numeric value in these units to a datetime.
    pub fn to_datetime(&self, value: f64) -> Result<NaiveDateTime, PrepError> {
        let millis = (value * self.step_millis as f64).round();
        // i64::MAX as f64 rounds up to 2^63, so both ends are exclusive
        if !millis.is_finite() || millis >= i64::MAX as f64 || millis <= i64::MIN as f64 {
            return Err(PrepError::BadTimeUnits(format!(
                "value {value} cannot be represented as a datetime"
            )));
        }
        TimeDelta::try_milliseconds(millis as i64)
            .and_then(|delta| self.epoch.checked_add_signed(delta))
            .ok_or_else(|| {
                PrepError::BadTimeUnits(format!("value {value} overflows the datetime range"))
            })
    }
}

fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

/// Decode a sequence of numeric times given their CF units string.
pub fn nctimes_to_datetimes<I: IntoIterator<Item = f64>>(
    values: I,
    units: &str,
) -> Result<Vec<NaiveDateTime>, PrepError> {
    let units = TimeUnits::parse(units).ok_or_else(|| PrepError::BadTimeUnits(units.to_string()))?;
    values.into_iter().map(|v| units.to_datetime(v)).collect()
}

/// Seconds since 1970-01-01 for `t`, matching [`OUTPUT_TIME_UNITS`].
/// Fractional seconds are floored, so `23:59:59.900` becomes `23:59:59`.
pub fn datetime_to_epoch_seconds(t: &NaiveDateTime) -> i64 {
    t.and_utc().timestamp()
}
