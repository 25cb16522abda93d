use chrono::NaiveDate;

pub const MICROS_PER_SECOND: i64 = 1_000_000;
pub const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SECOND;
pub const MICROS_PER_HOUR: i64 = 60 * MICROS_PER_MINUTE;
pub const MICROS_PER_DAY: i64 = 24 * MICROS_PER_HOUR;

pub fn is_quoted(token: &str) -> bool {
    token.len() >= 2
        && ((token.starts_with('\'') && token.ends_with('\''))
            || (token.starts_with('"') && token.ends_with('"')))
}

pub fn unquote(token: &str) -> &str {
    if is_quoted(token) {
        &token[1..token.len() - 1]
    } else {
        token
    }
}

/// Epoch microseconds of a calendar date-time, `None` if it does not exist.
pub fn micros_of(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<i64> {
    Some(
        NaiveDate::from_ymd_opt(year, month, day)?
            .and_hms_opt(hour, min, sec)?
            .and_utc()
            .timestamp_micros(),
    )
}

pub fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn digits(s: &str, range: std::ops::Range<usize>) -> Option<u32> {
    let part = s.get(range)?;
    if part.bytes().all(|b| b.is_ascii_digit()) {
        part.parse().ok()
    } else {
        None
    }
}

fn separator(s: &str, index: usize, allowed: &[u8]) -> Option<()> {
    s.as_bytes()
        .get(index)
        .filter(|b| allowed.contains(b))
        .map(|_| ())
}

/// Parses a possibly partial date-time literal (`2020`, `2020-01`, `2020-01-01`,
/// `2020-01-01T10`, `2020-01-01T10:15`, `2020-01-01T10:15:30`, `2020-01-01T10:15:30.123`) into
/// the inclusive range of microseconds it denotes.
fn parse_period(s: &str) -> Option<(i64, i64)> {
    let s = s.strip_suffix('Z').unwrap_or(s);
    let year = digits(s, 0..4)? as i32;
    if s.len() == 4 {
        return Some((micros_of(year, 1, 1, 0, 0, 0)?, micros_of(year + 1, 1, 1, 0, 0, 0)? - 1));
    }
    separator(s, 4, b"-")?;
    let month = digits(s, 5..7)?;
    if s.len() == 7 {
        let (next_year, next_month) = next_month(year, month);
        return Some((
            micros_of(year, month, 1, 0, 0, 0)?,
            micros_of(next_year, next_month, 1, 0, 0, 0)? - 1,
        ));
    }
    separator(s, 7, b"-")?;
    let day = digits(s, 8..10)?;
    let (lo, width) = if s.len() == 10 {
        (micros_of(year, month, day, 0, 0, 0)?, MICROS_PER_DAY)
    } else {
        separator(s, 10, b"T ")?;
        let hour = digits(s, 11..13)?;
        if s.len() == 13 {
            (micros_of(year, month, day, hour, 0, 0)?, MICROS_PER_HOUR)
        } else {
            separator(s, 13, b":")?;
            let min = digits(s, 14..16)?;
            if s.len() == 16 {
                (micros_of(year, month, day, hour, min, 0)?, MICROS_PER_MINUTE)
            } else {
                separator(s, 16, b":")?;
                let sec = digits(s, 17..19)?;
                let lo = micros_of(year, month, day, hour, min, sec)?;
                if s.len() == 19 {
                    (lo, MICROS_PER_SECOND)
                } else {
                    separator(s, 19, b".")?;
                    let frac = &s[20..];
                    if frac.is_empty() || frac.len() > 6 {
                        return None;
                    }
                    let scale = 10i64.pow(6 - frac.len() as u32);
                    (lo + digits(s, 20..s.len())? as i64 * scale, scale)
                }
            }
        }
    };
    Some((lo, lo + width - 1))
}

fn parse_duration(s: &str) -> Option<i64> {
    let unit = s.chars().last()?;
    let count: i64 = s[..s.len() - unit.len_utf8()].parse().ok()?;
    let micros = match unit {
        's' => MICROS_PER_SECOND,
        'm' => MICROS_PER_MINUTE,
        'h' => MICROS_PER_HOUR,
        'd' => MICROS_PER_DAY,
        _ => return None,
    };
    count.checked_mul(micros)
}

/// Interval denoted by a timestamp literal, optionally extended by a `;<count><unit>` suffix.
pub fn parse_timestamp_interval(literal: &str) -> Option<(i64, i64)> {
    let literal = unquote(literal).trim();
    let (period, extension) = match literal.split_once(';') {
        Some((period, extension)) => (period.trim(), Some(extension.trim())),
        None => (literal, None),
    };
    let (lo, hi) = parse_period(period)?;
    match extension {
        Some(extension) => Some((lo, hi.checked_add(parse_duration(extension)?)?)),
        None => Some((lo, hi)),
    }
}

/// Point in time denoted by a timestamp literal: the start of its period, or a raw microsecond
/// count for integer literals.
pub fn parse_timestamp(literal: &str) -> Option<i64> {
    if let Ok(micros) = literal.parse::<i64>() {
        return Some(micros);
    }
    parse_period(unquote(literal).trim()).map(|(lo, _)| lo)
}
