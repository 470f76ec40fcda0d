//! Millisecond spans and calendar timestamps.
//!
//! [`TimeSpan`] is a signed count of milliseconds with unit constructors and
//! both "total" (fractional) and "component" (floor/modulo) accessors.
//! [`Timestamp`] is a span since midnight, January 1 of year 0, with proper
//! 4/100/400 leap-year handling, so calendar math and scheduling share one
//! representation.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::time::{SystemTime, UNIX_EPOCH};

const MILLIS_PER_SECOND: i64 = 1000;
const MILLIS_PER_MINUTE: i64 = MILLIS_PER_SECOND * 60;
const MILLIS_PER_HOUR: i64 = MILLIS_PER_MINUTE * 60;
const MILLIS_PER_DAY: i64 = MILLIS_PER_HOUR * 24;
const MILLIS_PER_WEEK: i64 = MILLIS_PER_DAY * 7;

/// A signed duration stored as whole milliseconds.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
pub struct TimeSpan {
    milliseconds: i64,
}

impl TimeSpan {
    /// The zero-length span.
    pub const ZERO: TimeSpan = TimeSpan { milliseconds: 0 };

    /// A span long enough to be treated as "forever" by poll timeouts.
    pub const MAX: TimeSpan = TimeSpan {
        milliseconds: i64::MAX,
    };

    /// Creates a span from (fractional) milliseconds, truncating toward zero.
    pub fn from_milliseconds(milliseconds: f64) -> Self {
        Self {
            milliseconds: milliseconds as i64,
        }
    }

    /// Creates a span from seconds.
    pub fn from_seconds(seconds: f64) -> Self {
        Self::from_milliseconds(seconds * 1000.0)
    }

    /// Creates a span from minutes.
    pub fn from_minutes(minutes: f64) -> Self {
        Self::from_seconds(minutes * 60.0)
    }

    /// Creates a span from hours.
    pub fn from_hours(hours: f64) -> Self {
        Self::from_minutes(hours * 60.0)
    }

    /// Creates a span from days.
    pub fn from_days(days: f64) -> Self {
        Self::from_hours(days * 24.0)
    }

    /// Creates a span from weeks.
    pub fn from_weeks(weeks: f64) -> Self {
        Self::from_days(weeks * 7.0)
    }

    /// The whole span expressed in milliseconds.
    pub fn total_milliseconds(&self) -> f64 {
        self.milliseconds as f64
    }

    /// The whole span expressed in seconds.
    pub fn total_seconds(&self) -> f64 {
        self.total_milliseconds() / 1000.0
    }

    /// The whole span expressed in minutes.
    pub fn total_minutes(&self) -> f64 {
        self.total_seconds() / 60.0
    }

    /// The whole span expressed in hours.
    pub fn total_hours(&self) -> f64 {
        self.total_minutes() / 60.0
    }

    /// The whole span expressed in days.
    pub fn total_days(&self) -> f64 {
        self.total_hours() / 24.0
    }

    /// The whole span expressed in weeks.
    pub fn total_weeks(&self) -> f64 {
        self.total_days() / 7.0
    }

    /// The milliseconds component, `-999..=999`.
    pub fn milliseconds(&self) -> i16 {
        (self.milliseconds % MILLIS_PER_SECOND) as i16
    }

    /// The seconds component, `-59..=59`.
    pub fn seconds(&self) -> i8 {
        ((self.milliseconds / MILLIS_PER_SECOND) % 60) as i8
    }

    /// The minutes component, `-59..=59`.
    pub fn minutes(&self) -> i8 {
        ((self.milliseconds / MILLIS_PER_MINUTE) % 60) as i8
    }

    /// The hours component, `-23..=23`.
    pub fn hours(&self) -> i8 {
        ((self.milliseconds / MILLIS_PER_HOUR) % 24) as i8
    }

    /// The days component, `-6..=6`.
    pub fn days(&self) -> i8 {
        ((self.milliseconds / MILLIS_PER_DAY) % 7) as i8
    }

    /// The weeks component.
    pub fn weeks(&self) -> i64 {
        self.milliseconds / MILLIS_PER_WEEK
    }

    /// Whether the span is strictly positive.
    pub fn is_positive(&self) -> bool {
        self.milliseconds > 0
    }

    pub(crate) fn as_std(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.milliseconds.max(0) as u64)
    }
}

impl Add for TimeSpan {
    type Output = TimeSpan;

    fn add(self, rhs: TimeSpan) -> TimeSpan {
        TimeSpan {
            milliseconds: self.milliseconds + rhs.milliseconds,
        }
    }
}

impl AddAssign for TimeSpan {
    fn add_assign(&mut self, rhs: TimeSpan) {
        self.milliseconds += rhs.milliseconds;
    }
}

impl Sub for TimeSpan {
    type Output = TimeSpan;

    fn sub(self, rhs: TimeSpan) -> TimeSpan {
        TimeSpan {
            milliseconds: self.milliseconds - rhs.milliseconds,
        }
    }
}

impl SubAssign for TimeSpan {
    fn sub_assign(&mut self, rhs: TimeSpan) {
        self.milliseconds -= rhs.milliseconds;
    }
}

impl Neg for TimeSpan {
    type Output = TimeSpan;

    fn neg(self) -> TimeSpan {
        TimeSpan {
            milliseconds: -self.milliseconds,
        }
    }
}

/// Cumulative days in a common year before (index `m - 1`) or through
/// (index `m`) month `m`.
const YEAR_DAYS: [u16; 13] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334, 365];

fn leap_year(year: u16) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

fn days_in_year(year: u16) -> u16 {
    if leap_year(year) {
        366
    } else {
        365
    }
}

fn days_in_month(month: u8, year: u16) -> u16 {
    YEAR_DAYS[month as usize] - YEAR_DAYS[month as usize - 1]
        + if month == 2 && leap_year(year) { 1 } else { 0 }
}

/// A point in time: days plus time-of-day since January 1 of year 0 (UTC).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
pub struct Timestamp {
    since_year_zero: TimeSpan,
}

impl Timestamp {
    /// The Unix epoch, 1970-01-01T00:00:00.000.
    pub fn epoch() -> Timestamp {
        Timestamp::from_ymd(1970, 1, 1)
    }

    /// The current UTC wall-clock time.
    pub fn now_utc() -> Timestamp {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp::epoch() + TimeSpan::from_milliseconds(since_epoch.as_millis() as f64)
    }

    /// Midnight on the given calendar date.
    pub fn from_ymd(year: u16, month: u8, day: u8) -> Timestamp {
        let mut days: i64 = 0;
        for y in 0..year {
            days += days_in_year(y) as i64;
        }
        days += YEAR_DAYS[month as usize - 1] as i64;
        if month > 2 && leap_year(year) {
            days += 1;
        }
        days += day as i64 - 1;

        Timestamp {
            since_year_zero: TimeSpan::from_days(days as f64),
        }
    }

    fn to_ymd(self) -> (u16, u8, u8) {
        let mut days = (self.since_year_zero.total_milliseconds() as i64) / MILLIS_PER_DAY;

        let mut year: u16 = 0;
        while days >= days_in_year(year) as i64 {
            days -= days_in_year(year) as i64;
            year += 1;
        }

        let mut month: u8 = 1;
        while (days_in_month(month, year) as i64) <= days {
            days -= days_in_month(month, year) as i64;
            month += 1;
        }

        (year, month, days as u8 + 1)
    }

    /// The calendar year.
    pub fn year(&self) -> u16 {
        self.to_ymd().0
    }

    /// The calendar month, 1-based.
    pub fn month(&self) -> u8 {
        self.to_ymd().1
    }

    /// The calendar day of month, 1-based.
    pub fn day(&self) -> u8 {
        self.to_ymd().2
    }

    /// The hour of day.
    pub fn hour(&self) -> i8 {
        self.since_year_zero.hours()
    }

    /// The minute of the hour.
    pub fn minute(&self) -> i8 {
        self.since_year_zero.minutes()
    }

    /// The second of the minute.
    pub fn second(&self) -> i8 {
        self.since_year_zero.seconds()
    }

    /// The millisecond of the second.
    pub fn millisecond(&self) -> i16 {
        self.since_year_zero.milliseconds()
    }
}

impl Add<TimeSpan> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: TimeSpan) -> Timestamp {
        Timestamp {
            since_year_zero: self.since_year_zero + rhs,
        }
    }
}

impl AddAssign<TimeSpan> for Timestamp {
    fn add_assign(&mut self, rhs: TimeSpan) {
        self.since_year_zero += rhs;
    }
}

impl Sub<TimeSpan> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: TimeSpan) -> Timestamp {
        Timestamp {
            since_year_zero: self.since_year_zero - rhs,
        }
    }
}

impl Sub for Timestamp {
    type Output = TimeSpan;

    fn sub(self, rhs: Timestamp) -> TimeSpan {
        self.since_year_zero - rhs.since_year_zero
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (year, month, day) = self.to_ymd();
        write!(
            f,
            "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}",
            self.hour(),
            self.minute(),
            self.second(),
            self.millisecond()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_round_trip_through_every_unit() {
        assert_eq!(TimeSpan::from_milliseconds(1234.0).total_milliseconds(), 1234.0);
        assert_eq!(TimeSpan::from_seconds(2.514).total_seconds(), 2.514);
        assert_eq!(TimeSpan::from_minutes(3.0).total_minutes(), 3.0);
        assert_eq!(TimeSpan::from_hours(12.0), TimeSpan::from_days(0.5));
        assert_eq!(TimeSpan::from_days(9.25).total_days(), 9.25);
        assert_eq!(TimeSpan::from_weeks(2.0).total_weeks(), 2.0);
    }

    #[test]
    fn span_arithmetic_and_ordering() {
        assert!(TimeSpan::from_minutes(1.0) < TimeSpan::from_seconds(75.0));
        assert_eq!(
            (TimeSpan::from_weeks(1.0) - TimeSpan::from_days(2.0)).total_days(),
            5.0
        );
        assert_eq!(
            TimeSpan::from_days(2.0) + TimeSpan::from_days(5.0),
            TimeSpan::from_weeks(1.0)
        );
    }

    #[test]
    fn span_components_floor_divide_and_wrap() {
        let span = TimeSpan::from_days(10.5);
        assert_eq!(span.weeks(), 1);
        assert_eq!(span.days(), 3);
        assert_eq!(span.hours(), 12);

        assert_eq!(TimeSpan::from_milliseconds(3999.0).seconds(), 3);
        assert_eq!(TimeSpan::from_milliseconds(3999.0).milliseconds(), 999);
        assert_eq!(TimeSpan::from_milliseconds(-3999.0).seconds(), -3);
        assert_eq!(TimeSpan::from_milliseconds(-3999.0).milliseconds(), -999);
    }

    #[test]
    fn timestamps_observe_leap_year_rules() {
        let far = Timestamp::epoch() + TimeSpan::from_seconds(67_221_446_400.0);
        assert_eq!(far.year(), 4100);
        assert_eq!(far.month(), 3);
        assert_eq!(far.day(), 1);

        assert_eq!(
            (Timestamp::from_ymd(4100, 3, 1) - Timestamp::epoch()).total_seconds(),
            67_221_446_400.0
        );
    }

    #[test]
    fn timestamp_algebra_is_consistent() {
        let a = Timestamp::from_ymd(2012, 2, 29);
        let b = Timestamp::from_ymd(2013, 3, 1) + TimeSpan::from_hours(7.0);
        assert_eq!(a + (b - a), b);
    }

    #[test]
    fn timestamps_format_as_iso_like_strings() {
        let t = Timestamp::from_ymd(2012, 2, 29) + TimeSpan::from_seconds(3671.25);
        assert_eq!(t.to_string(), "2012-02-29T01:01:11.250");
    }
}
