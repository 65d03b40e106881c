//! `Retry-After` header parsing.
//!
//! Accepts both forms allowed by RFC 9110: delay-seconds (`"120"`) and an
//! HTTP-date (`"Wed, 21 Oct 2026 07:28:00 GMT"`). Anything that does not
//! yield a strictly positive delay is treated as absent, and the caller
//! falls back to computed backoff.

use std::time::{Duration, SystemTime};

use tracing::debug;

/// Parse a raw `Retry-After` value relative to the current wall clock.
pub fn parse_retry_after(raw: Option<&str>) -> Option<Duration> {
    parse_retry_after_at(raw, SystemTime::now())
}

/// Parse a raw `Retry-After` value relative to `now`.
pub fn parse_retry_after_at(raw: Option<&str>, now: SystemTime) -> Option<Duration> {
    let value = raw?.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(seconds) = value.parse::<u64>() {
        return (seconds > 0).then(|| Duration::from_secs(seconds));
    }

    let date = match httpdate::parse_http_date(value) {
        Ok(date) => date,
        Err(_) => {
            debug!(value, "ignoring unparseable Retry-After");
            return None;
        }
    };
    match date.duration_since(now) {
        Ok(delta) if !delta.is_zero() => Some(delta),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_now() -> SystemTime {
        // 2026-01-01T00:00:00Z
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_767_225_600)
    }

    #[test]
    fn integer_seconds() {
        assert_eq!(
            parse_retry_after(Some("120")),
            Some(Duration::from_millis(120_000))
        );
        assert_eq!(parse_retry_after(Some("1")), Some(Duration::from_secs(1)));
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert_eq!(
            parse_retry_after(Some("  45 ")),
            Some(Duration::from_secs(45))
        );
    }

    #[test]
    fn zero_is_absent() {
        assert_eq!(parse_retry_after(Some("0")), None);
    }

    #[test]
    fn missing_or_garbage_is_absent() {
        assert_eq!(parse_retry_after(None), None);
        assert_eq!(parse_retry_after(Some("")), None);
        assert_eq!(parse_retry_after(Some("soon")), None);
        assert_eq!(parse_retry_after(Some("-5")), None);
        assert_eq!(parse_retry_after(Some("1.5")), None);
    }

    #[test]
    fn future_http_date_yields_delta() {
        let now = fixed_now();
        let target = now + Duration::from_secs(90);
        let header = httpdate::fmt_http_date(target);
        assert_eq!(
            parse_retry_after_at(Some(&header), now),
            Some(Duration::from_secs(90))
        );
    }

    #[test]
    fn past_http_date_is_absent() {
        let now = fixed_now();
        let header = httpdate::fmt_http_date(now - Duration::from_secs(30));
        assert_eq!(parse_retry_after_at(Some(&header), now), None);
    }

    #[test]
    fn http_date_equal_to_now_is_absent() {
        let now = fixed_now();
        let header = httpdate::fmt_http_date(now);
        assert_eq!(parse_retry_after_at(Some(&header), now), None);
    }

    #[test]
    fn literal_http_date_format() {
        let now = fixed_now();
        // Exactly one hour after fixed_now()
        let parsed = parse_retry_after_at(Some("Thu, 01 Jan 2026 01:00:00 GMT"), now);
        assert_eq!(parsed, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn wall_clock_future_date_is_positive() {
        let header = httpdate::fmt_http_date(SystemTime::now() + Duration::from_secs(600));
        let parsed = parse_retry_after(Some(&header)).unwrap();
        // Second granularity in the header, plus test scheduling slack
        assert!(parsed <= Duration::from_secs(600));
        assert!(parsed >= Duration::from_secs(595), "got {parsed:?}");
    }
}
