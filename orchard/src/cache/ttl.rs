//! TTL parsing
//!
//! Expirations are configured as human duration strings (`"1h"`, `"30s"`,
//! `"1h 30m"`, `"500ms"`) or as plain millisecond counts, and are applied to
//! the store in whole seconds.

use crate::error::{OrchardError, Result};
use std::time::Duration;

/// Parse a TTL string into a `Duration`
///
/// A bare number is read as milliseconds. Units: `ms`, `s`, `m`, `h`, `d`, `w`.
///
/// # Examples
///
/// ```
/// use orchard::cache::ttl::parse_ttl;
/// use std::time::Duration;
///
/// assert_eq!(parse_ttl("1h").unwrap(), Duration::from_secs(3600));
/// assert_eq!(parse_ttl("1h 30m").unwrap(), Duration::from_secs(5400));
/// assert_eq!(parse_ttl("60000").unwrap(), Duration::from_secs(60));
/// ```
pub fn parse_ttl(raw: &str) -> Result<Duration> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(OrchardError::Config("empty ttl".to_string()));
    }

    if let Ok(millis) = s.parse::<u64>() {
        return Ok(Duration::from_millis(millis));
    }

    let mut total = Duration::ZERO;
    let mut number = String::new();
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch.is_ascii_digit() || ch == '.' {
            number.push(ch);
            continue;
        }
        if ch.is_whitespace() {
            continue;
        }

        if number.is_empty() {
            return Err(OrchardError::Config(format!(
                "invalid ttl {:?}: expected number before unit",
                raw
            )));
        }

        let value: f64 = number
            .parse()
            .map_err(|_| OrchardError::Config(format!("invalid ttl number: {}", number)))?;

        let seconds = match ch {
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                value / 1000.0
            }
            's' => value,
            'm' => value * 60.0,
            'h' => value * 3600.0,
            'd' => value * 86_400.0,
            'w' => value * 604_800.0,
            other => {
                return Err(OrchardError::Config(format!(
                    "invalid ttl {:?}: unknown unit '{}'",
                    raw, other
                )))
            }
        };

        let out_of_range = || OrchardError::Config(format!("invalid ttl {:?}: out of range", raw));
        let term = Duration::try_from_secs_f64(seconds).map_err(|_| out_of_range())?;
        total = total.checked_add(term).ok_or_else(out_of_range)?;
        number.clear();
    }

    if !number.is_empty() {
        return Err(OrchardError::Config(format!(
            "invalid ttl {:?}: missing unit after number",
            raw
        )));
    }

    Ok(total)
}

/// Whole seconds to hand to the store's `expire`
///
/// Returns `None` when the duration rounds down to zero, in which case no
/// expiry is applied.
pub fn ttl_seconds(ttl: Duration) -> Option<u64> {
    match ttl.as_secs() {
        0 => None,
        secs => Some(secs),
    }
}
