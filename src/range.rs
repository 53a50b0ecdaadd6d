//! Encoding of HTTP `Range` request headers and parsing of `Content-Range`
//! response headers, per RFC 7233 (restricted to the single-range case this
//! crate ever needs).

use crate::error::RemoteZipError;

/// A byte range to request from the remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// Absolute bytes `a..=b`, `a <= b`.
    Bounded(u64, u64),
    /// From `a` to the end of the resource.
    From(u64),
    /// The last `n` bytes of the resource (a "suffix range").
    Suffix(u64),
}

impl RangeSpec {
    /// Render the `Range` header value, e.g. `bytes=0-1023`, `bytes=1024-`,
    /// `bytes=-65536`.
    pub fn to_header_value(self) -> String {
        match self {
            RangeSpec::Bounded(a, b) => format!("bytes={a}-{b}"),
            RangeSpec::From(a) => format!("bytes={a}-"),
            RangeSpec::Suffix(n) => format!("bytes=-{n}"),
        }
    }
}

/// The parsed `min`/`max` fields of a `Content-Range: bytes <min>-<max>/<total>`
/// response header. `<total>` is intentionally discarded: it may be `*`, and
/// even when numeric this crate never cross-checks it against a known file
/// size (see the Open Question on this in the design notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub min: u64,
    pub max: u64,
}

impl ContentRange {
    /// Parse a `Content-Range` header value. Accepts `bytes <min>-<max>/<total>`
    /// with `<total>` being either a decimal integer or `*`.
    pub fn parse(value: &str) -> Result<Self, RemoteZipError> {
        let rest = value
            .strip_prefix("bytes ")
            .ok_or(RemoteZipError::RangeNotSupported)?;
        let range_part = rest.split('/').next().unwrap_or(rest);
        let (min_str, max_str) = range_part
            .split_once('-')
            .ok_or(RemoteZipError::RangeNotSupported)?;
        let min: u64 = min_str
            .trim()
            .parse()
            .map_err(|_| RemoteZipError::RangeNotSupported)?;
        let max: u64 = max_str
            .trim()
            .parse()
            .map_err(|_| RemoteZipError::RangeNotSupported)?;
        Ok(ContentRange { min, max })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_bounded() {
        assert_eq!(RangeSpec::Bounded(0, 1023).to_header_value(), "bytes=0-1023");
    }

    #[test]
    fn encodes_from() {
        assert_eq!(RangeSpec::From(1024).to_header_value(), "bytes=1024-");
    }

    #[test]
    fn encodes_suffix() {
        assert_eq!(RangeSpec::Suffix(65536).to_header_value(), "bytes=-65536");
    }

    #[test]
    fn parses_content_range_with_total() {
        let cr = ContentRange::parse("bytes 100-199/1000").unwrap();
        assert_eq!(cr, ContentRange { min: 100, max: 199 });
    }

    #[test]
    fn parses_content_range_with_star_total() {
        let cr = ContentRange::parse("bytes 100-199/*").unwrap();
        assert_eq!(cr, ContentRange { min: 100, max: 199 });
    }

    #[test]
    fn rejects_missing_bytes_prefix() {
        assert!(ContentRange::parse("100-199/1000").is_err());
    }
}
