//! Range and conditional request negotiation.
//!
//! # Responsibilities
//! - Parse `Range: bytes=...` against a known total size
//! - Decide `If-Modified-Since` at whole-second granularity
//!
//! # Design Decisions
//! - Pure functions; the resource handler decides what to do with errors
//! - Only the `bytes` unit is understood
//! - Suffix ranges longer than the resource cover the whole resource

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// An inclusive byte range within a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub from: u64,
    pub to: u64,
}

impl ByteRange {
    /// Number of bytes covered.
    pub fn length(&self) -> u64 {
        self.to - self.from + 1
    }

    /// `Content-Range` value, e.g. `bytes 10-19/100`.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.from, self.to, total)
    }
}

/// A `Range` header that cannot be honoured.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeParseError {
    #[error("unsupported range unit in '{0}'")]
    Unit(String),

    #[error("malformed range '{0}'")]
    Syntax(String),

    #[error("range '{0}' is not satisfiable")]
    Unsatisfiable(String),
}

/// An `If-Modified-Since` value that is not an HTTP date.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid If-Modified-Since value '{0}'")]
pub struct ConditionalHeaderParseError(pub String);

/// Parse a `Range` header for a resource of `total` bytes.
pub fn parse_ranges(total: u64, header: &str) -> Result<Vec<ByteRange>, RangeParseError> {
    let header = header.trim();
    let specs = match header.split_once('=') {
        Some((unit, specs)) if unit.trim().eq_ignore_ascii_case("bytes") => specs,
        _ => return Err(RangeParseError::Unit(header.to_string())),
    };

    let mut ranges = Vec::new();
    for spec in specs.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        ranges.push(parse_one(total, spec)?);
    }
    if ranges.is_empty() {
        return Err(RangeParseError::Syntax(header.to_string()));
    }
    Ok(ranges)
}

fn parse_one(total: u64, spec: &str) -> Result<ByteRange, RangeParseError> {
    let syntax = || RangeParseError::Syntax(spec.to_string());
    let unsatisfiable = || RangeParseError::Unsatisfiable(spec.to_string());
    let number = |s: &str| s.trim().parse::<u64>().map_err(|_| syntax());

    let (start, end) = spec.split_once('-').ok_or_else(syntax)?;
    if total == 0 {
        return Err(unsatisfiable());
    }
    let last = total - 1;

    let range = match (start.trim().is_empty(), end.trim().is_empty()) {
        (true, true) => return Err(syntax()),
        // bytes=-N: the final N bytes
        (true, false) => {
            let suffix = number(end)?;
            if suffix == 0 {
                return Err(unsatisfiable());
            }
            ByteRange {
                from: total.saturating_sub(suffix),
                to: last,
            }
        }
        (false, true) => ByteRange {
            from: number(start)?,
            to: last,
        },
        (false, false) => {
            let from = number(start)?;
            let to = number(end)?;
            if to < from {
                return Err(syntax());
            }
            ByteRange {
                from,
                to: to.min(last),
            }
        }
    };

    if range.from > last {
        return Err(unsatisfiable());
    }
    Ok(range)
}

fn whole_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// True if a resource last modified at `last_modified` is unchanged since
/// the client's `If-Modified-Since` date.
pub fn is_not_modified(
    last_modified: SystemTime,
    if_modified_since: &str,
) -> Result<bool, ConditionalHeaderParseError> {
    let since = httpdate::parse_http_date(if_modified_since.trim())
        .map_err(|_| ConditionalHeaderParseError(if_modified_since.to_string()))?;
    Ok(whole_seconds(last_modified) <= whole_seconds(since))
}

/// `Last-Modified` value for a timestamp.
pub fn http_date(time: SystemTime) -> String {
    httpdate::fmt_http_date(time)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_range() {
        let ranges = parse_ranges(100, "bytes=10-19").unwrap();
        assert_eq!(ranges, vec![ByteRange { from: 10, to: 19 }]);
        assert_eq!(ranges[0].length(), 10);
        assert_eq!(ranges[0].content_range(100), "bytes 10-19/100");
    }

    #[test]
    fn open_and_suffix_ranges() {
        assert_eq!(parse_ranges(100, "bytes=90-").unwrap(), vec![ByteRange { from: 90, to: 99 }]);
        assert_eq!(parse_ranges(100, "bytes=-5").unwrap(), vec![ByteRange { from: 95, to: 99 }]);
        assert_eq!(parse_ranges(10, "bytes=-50").unwrap(), vec![ByteRange { from: 0, to: 9 }]);
    }

    #[test]
    fn end_is_clamped_to_resource() {
        assert_eq!(parse_ranges(100, "bytes=50-500").unwrap(), vec![ByteRange { from: 50, to: 99 }]);
    }

    #[test]
    fn multiple_ranges_are_all_returned() {
        let ranges = parse_ranges(100, "bytes=0-1, 5-6").unwrap();
        assert_eq!(ranges.len(), 2);
    }

    #[test]
    fn malformed_ranges_are_errors() {
        assert!(matches!(parse_ranges(100, "bytes=abc"), Err(RangeParseError::Syntax(_))));
        assert!(matches!(parse_ranges(100, "bytes=20-10"), Err(RangeParseError::Syntax(_))));
        assert!(matches!(parse_ranges(100, "bytes=-"), Err(RangeParseError::Syntax(_))));
        assert!(matches!(parse_ranges(100, "bytes="), Err(RangeParseError::Syntax(_))));
        assert!(matches!(parse_ranges(100, "items=0-1"), Err(RangeParseError::Unit(_))));
        assert!(matches!(parse_ranges(100, "bytes=100-"), Err(RangeParseError::Unsatisfiable(_))));
        assert!(matches!(parse_ranges(0, "bytes=0-"), Err(RangeParseError::Unsatisfiable(_))));
    }

    #[test]
    fn not_modified_at_second_granularity() {
        let modified = UNIX_EPOCH + Duration::from_millis(1_700_000_000_750);
        let same_second = http_date(UNIX_EPOCH + Duration::from_secs(1_700_000_000));
        let second_before = http_date(UNIX_EPOCH + Duration::from_secs(1_699_999_999));

        assert!(is_not_modified(modified, &same_second).unwrap());
        assert!(!is_not_modified(modified, &second_before).unwrap());
    }

    #[test]
    fn invalid_date_is_an_error() {
        let err = is_not_modified(SystemTime::now(), "yesterday-ish").unwrap_err();
        assert_eq!(err.0, "yesterday-ish");
    }
}
