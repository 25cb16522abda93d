use crate::utils::{self, MICROS_PER_DAY, MICROS_PER_HOUR, MICROS_PER_MINUTE, MICROS_PER_SECOND};
use chrono::{DateTime, Datelike, Utc};
use regex::Regex;
use std::fmt;

/// Maps timestamps onto the start of the bucket they fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampSampler {
    /// Fixed-width buckets aligned to the epoch, width in microseconds.
    Fixed(i64),
    /// Calendar months, aligned to January 1970.
    Month(u32),
    Year(u32),
}

impl TimestampSampler {
    /// Parses interval qualifiers such as `15m`, `1h`, `d`, `3M` or `1y`.
    pub fn parse(token: &str) -> Option<Self> {
        let re = Regex::new(r"^(\d+)?([TsmhdMy])$").ok()?;
        let caps = re.captures(utils::unquote(token))?;
        let count: u32 = match caps.get(1) {
            Some(count) => count.as_str().parse().ok()?,
            None => 1,
        };
        if count == 0 {
            return None;
        }
        let width = |unit: i64| Some(Self::Fixed(unit.checked_mul(count as i64)?));
        match &caps[2] {
            "T" => width(1_000),
            "s" => width(MICROS_PER_SECOND),
            "m" => width(MICROS_PER_MINUTE),
            "h" => width(MICROS_PER_HOUR),
            "d" => width(MICROS_PER_DAY),
            "M" => Some(Self::Month(count)),
            "y" => Some(Self::Year(count)),
            _ => None,
        }
    }

    fn month_index(ts: i64) -> i64 {
        let date = DateTime::<Utc>::from_timestamp(
            ts.div_euclid(MICROS_PER_SECOND),
            (ts.rem_euclid(MICROS_PER_SECOND) * 1_000) as u32,
        )
        .unwrap_or_default();
        (date.year() as i64 - 1970) * 12 + date.month0() as i64
    }

    fn month_start(index: i64) -> i64 {
        let year = 1970 + index.div_euclid(12);
        let month = index.rem_euclid(12) as u32 + 1;
        utils::micros_of(year as i32, month, 1, 0, 0, 0).unwrap_or(i64::MAX)
    }

    fn months(&self) -> i64 {
        match self {
            Self::Month(n) => *n as i64,
            Self::Year(n) => *n as i64 * 12,
            Self::Fixed(_) => 0,
        }
    }

    pub fn round(&self, ts: i64) -> i64 {
        match self {
            Self::Fixed(width) => ts - ts.rem_euclid(*width),
            _ => {
                let index = Self::month_index(ts);
                Self::month_start(index - index.rem_euclid(self.months()))
            }
        }
    }

    /// Start of the bucket following the one starting at `bucket`.
    pub fn next(&self, bucket: i64) -> i64 {
        match self {
            Self::Fixed(width) => bucket.saturating_add(*width),
            _ => Self::month_start(Self::month_index(bucket) + self.months()),
        }
    }
}

impl fmt::Display for TimestampSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(width) => write!(f, "{}us", width),
            Self::Month(n) => write!(f, "{}M", n),
            Self::Year(n) => write!(f, "{}y", n),
        }
    }
}
