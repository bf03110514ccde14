//! Byte-range header parsing for `/data`.
//!
//! Supports the single-range forms `bytes=a-b`, `bytes=a-`, and
//! `bytes=-n`. Multi-range requests and non-byte units fall back to a
//! full-body response rather than an error; an unsatisfiable range (start
//! at or past the end) is a 416.

use axum::http::HeaderValue;

use super::error::ApiError;

/// Outcome of parsing a `Range` header against a known content length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// Serve the whole body with a 200.
    Full,
    /// Serve `start..=end` with a 206.
    Slice { start: u64, end: u64 },
}

pub fn parse(header: Option<&HeaderValue>, length: u64) -> Result<RangeRequest, ApiError> {
    let Some(header) = header else {
        return Ok(RangeRequest::Full);
    };
    let Ok(value) = header.to_str() else {
        return Ok(RangeRequest::Full);
    };
    let Some(spec) = value.strip_prefix("bytes=") else {
        return Ok(RangeRequest::Full);
    };
    if spec.contains(',') {
        // Multi-range: serve the whole body instead.
        return Ok(RangeRequest::Full);
    }

    let Some((start_s, end_s)) = spec.split_once('-') else {
        return Ok(RangeRequest::Full);
    };
    let start_s = start_s.trim();
    let end_s = end_s.trim();

    if start_s.is_empty() {
        // Suffix form: last n bytes.
        let Ok(suffix) = end_s.parse::<u64>() else {
            return Ok(RangeRequest::Full);
        };
        if suffix == 0 || length == 0 {
            return Err(ApiError::RangeNotSatisfiable(length));
        }
        let start = length.saturating_sub(suffix);
        return Ok(RangeRequest::Slice {
            start,
            end: length - 1,
        });
    }

    let Ok(start) = start_s.parse::<u64>() else {
        return Ok(RangeRequest::Full);
    };
    if start >= length {
        return Err(ApiError::RangeNotSatisfiable(length));
    }

    let end = if end_s.is_empty() {
        length - 1
    } else {
        let Ok(end) = end_s.parse::<u64>() else {
            return Ok(RangeRequest::Full);
        };
        if end < start {
            return Err(ApiError::RangeNotSatisfiable(length));
        }
        end.min(length - 1)
    };

    Ok(RangeRequest::Slice { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(value: &str) -> HeaderValue {
        HeaderValue::from_str(value).unwrap()
    }

    #[test]
    fn test_no_header_is_full() {
        assert_eq!(parse(None, 100).unwrap(), RangeRequest::Full);
    }

    #[test]
    fn test_closed_range() {
        assert_eq!(
            parse(Some(&header("bytes=10-19")), 100).unwrap(),
            RangeRequest::Slice { start: 10, end: 19 }
        );
    }

    #[test]
    fn test_open_range_runs_to_end() {
        assert_eq!(
            parse(Some(&header("bytes=90-")), 100).unwrap(),
            RangeRequest::Slice { start: 90, end: 99 }
        );
    }

    #[test]
    fn test_suffix_range() {
        assert_eq!(
            parse(Some(&header("bytes=-10")), 100).unwrap(),
            RangeRequest::Slice { start: 90, end: 99 }
        );
        // Suffix longer than the body clamps to the whole body.
        assert_eq!(
            parse(Some(&header("bytes=-500")), 100).unwrap(),
            RangeRequest::Slice { start: 0, end: 99 }
        );
    }

    #[test]
    fn test_end_clamped_to_length() {
        assert_eq!(
            parse(Some(&header("bytes=50-500")), 100).unwrap(),
            RangeRequest::Slice { start: 50, end: 99 }
        );
    }

    #[test]
    fn test_start_past_end_is_unsatisfiable() {
        assert!(matches!(
            parse(Some(&header("bytes=100-")), 100),
            Err(ApiError::RangeNotSatisfiable(100))
        ));
    }

    #[test]
    fn test_inverted_range_is_unsatisfiable() {
        assert!(matches!(
            parse(Some(&header("bytes=20-10")), 100),
            Err(ApiError::RangeNotSatisfiable(100))
        ));
    }

    #[test]
    fn test_multi_range_falls_back_to_full() {
        assert_eq!(
            parse(Some(&header("bytes=0-1,5-6")), 100).unwrap(),
            RangeRequest::Full
        );
    }

    #[test]
    fn test_other_units_fall_back_to_full() {
        assert_eq!(
            parse(Some(&header("items=0-5")), 100).unwrap(),
            RangeRequest::Full
        );
    }
}
