//! Pluggable timestamp recognition.
//!
//! A recognizer looks at the leading bytes of a line and returns the instant
//! it was logged at, if it can tell. The scanner only ever sees a bounded
//! prefix of each line, so recognizers must not expect the full text.

use super::{json_field, json_value};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::fmt::Debug;
use std::sync::Arc;

/// Instant attached to a line record
pub type Timestamp = DateTime<Utc>;

/// Strategy for pulling a timestamp out of a line
pub trait TimestampRecognizer: Send + Sync + Debug {
    /// Return the timestamp of `line`, or `None` when nothing is recognized
    fn recognize(&self, line: &[u8]) -> Option<Timestamp>;
}

/// Recognizer used when a session does not configure one: JSON fields first,
/// then a textual ISO-8601 prefix.
pub fn default_recognizer() -> Arc<dyn TimestampRecognizer> {
    Arc::new(ChainRecognizer::new(vec![
        Arc::new(JsonFieldRecognizer::default()),
        Arc::new(PrefixRecognizer::default()),
    ]))
}

/// Tries each recognizer in order and returns the first hit
#[derive(Debug, Clone)]
pub struct ChainRecognizer {
    recognizers: Vec<Arc<dyn TimestampRecognizer>>,
}

impl ChainRecognizer {
    pub fn new(recognizers: Vec<Arc<dyn TimestampRecognizer>>) -> Self {
        Self { recognizers }
    }
}

impl TimestampRecognizer for ChainRecognizer {
    fn recognize(&self, line: &[u8]) -> Option<Timestamp> {
        self.recognizers.iter().find_map(|r| r.recognize(line))
    }
}

/// Reads a timestamp from well-known keys of a JSON-lines record.
///
/// String values are parsed as ISO-8601; numeric values are taken as epoch
/// seconds, milliseconds, microseconds or nanoseconds depending on magnitude.
#[derive(Debug, Clone)]
pub struct JsonFieldRecognizer {
    fields: Vec<String>,
}

impl JsonFieldRecognizer {
    pub fn new(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for JsonFieldRecognizer {
    fn default() -> Self {
        Self::new(["timestamp", "@timestamp", "time", "ts", "datetime", "date"])
    }
}

impl TimestampRecognizer for JsonFieldRecognizer {
    fn recognize(&self, line: &[u8]) -> Option<Timestamp> {
        self.fields.iter().find_map(|field| {
            let raw = json_field(line, field)?;
            match json_value(raw)? {
                serde_json::Value::String(text) => parse_text_timestamp(&text),
                serde_json::Value::Number(number) => from_epoch(number.as_f64()?),
                _ => None,
            }
        })
    }
}

/// Finds an ISO-8601 style date-time within the first `max_scan` bytes of a line.
///
/// Accepts `YYYY-MM-DD[T ]HH:MM:SS`, an optional `.fff` or `,fff` fraction and an
/// optional numeric offset. A trailing `Z` or a missing offset means UTC.
#[derive(Debug, Clone)]
pub struct PrefixRecognizer {
    max_scan: usize,
}

impl PrefixRecognizer {
    pub fn new(max_scan: usize) -> Self {
        Self { max_scan }
    }
}

impl Default for PrefixRecognizer {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Longest textual timestamp we try to parse (with nanoseconds and offset)
const MAX_TIMESTAMP_LEN: usize = 40;

impl TimestampRecognizer for PrefixRecognizer {
    fn recognize(&self, line: &[u8]) -> Option<Timestamp> {
        let window = &line[..line.len().min(self.max_scan + MAX_TIMESTAMP_LEN)];
        let text = match std::str::from_utf8(window) {
            Ok(text) => text,
            Err(e) => std::str::from_utf8(&window[..e.valid_up_to()]).ok()?,
        };

        let bytes = text.as_bytes();
        let limit = bytes.len().min(self.max_scan);
        (0..limit)
            .filter(|&start| start == 0 || !bytes[start - 1].is_ascii_digit())
            .filter(|&start| looks_like_date(&bytes[start..]))
            .find_map(|start| parse_text_timestamp(&text[start..]))
    }
}

fn looks_like_date(bytes: &[u8]) -> bool {
    bytes.len() >= 10
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..7].iter().all(u8::is_ascii_digit)
        && bytes[7] == b'-'
        && bytes[8..10].iter().all(u8::is_ascii_digit)
}

const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

// The comma variant (Python logging) must come before the plain one, which
// would otherwise succeed and drop the milliseconds.
const NAIVE_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S,%3f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// Parse a date-time at the start of `text`, ignoring whatever follows it.
pub fn parse_text_timestamp(text: &str) -> Option<Timestamp> {
    for format in OFFSET_FORMATS {
        if let Ok((parsed, _)) = DateTime::parse_and_remainder(text, format) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok((parsed, _)) = NaiveDateTime::parse_and_remainder(text, format) {
            return Some(parsed.and_utc());
        }
    }
    None
}

fn from_epoch(value: f64) -> Option<Timestamp> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let millis = if value >= 1e17 {
        value / 1e6
    } else if value >= 1e14 {
        value / 1e3
    } else if value >= 1e11 {
        value
    } else {
        value * 1e3
    };
    Utc.timestamp_millis_opt(millis as i64).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn utc(text: &str) -> Timestamp {
        DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_prefix_iso_with_zulu() {
        let recognizer = PrefixRecognizer::default();
        let ts = recognizer
            .recognize(b"2024-01-15T10:30:00Z INFO started")
            .unwrap();
        assert_eq!(ts, utc("2024-01-15T10:30:00Z"));
    }

    #[test]
    fn test_prefix_with_offset_is_normalized() {
        let recognizer = PrefixRecognizer::default();
        let ts = recognizer
            .recognize(b"2024-01-15T12:30:00+02:00 request done")
            .unwrap();
        assert_eq!(ts, utc("2024-01-15T10:30:00Z"));
    }

    #[test]
    fn test_prefix_python_logging_millis() {
        let recognizer = PrefixRecognizer::default();
        let ts = recognizer
            .recognize(b"2024-01-15 10:30:00,250 WARNING disk")
            .unwrap();
        assert_eq!(ts.nanosecond(), 250_000_000);
        assert_eq!(ts.second(), 0);
    }

    #[test]
    fn test_prefix_inside_brackets() {
        let recognizer = PrefixRecognizer::default();
        let ts = recognizer
            .recognize(b"[2024-09-02 10:01:02] INFO: Request 1")
            .unwrap();
        assert_eq!(ts, utc("2024-09-02T10:01:02Z"));
    }

    #[test]
    fn test_prefix_respects_scan_window() {
        let recognizer = PrefixRecognizer::new(4);
        assert!(recognizer
            .recognize(b"some text then 2024-01-15T10:30:00Z")
            .is_none());
    }

    #[test]
    fn test_no_timestamp() {
        let recognizer = default_recognizer();
        assert!(recognizer.recognize(b"plain line without a date").is_none());
        assert!(recognizer.recognize(b"").is_none());
    }

    #[test]
    fn test_json_string_field() {
        let recognizer = JsonFieldRecognizer::default();
        let ts = recognizer
            .recognize(br#"{"level":"info","timestamp":"2024-01-15T10:30:00Z","msg":"x"}"#)
            .unwrap();
        assert_eq!(ts, utc("2024-01-15T10:30:00Z"));
    }

    #[test]
    fn test_json_epoch_fields() {
        let recognizer = JsonFieldRecognizer::default();
        let seconds = recognizer.recognize(br#"{"ts": 1700000000}"#).unwrap();
        let millis = recognizer.recognize(br#"{"ts": 1700000000000}"#).unwrap();
        assert_eq!(seconds, millis);
        assert_eq!(seconds.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_chain_prefers_first_hit() {
        let recognizer = default_recognizer();
        let ts = recognizer
            .recognize(br#"{"time":"2024-01-15T10:30:00Z","msg":"2023-01-01T00:00:00Z"}"#)
            .unwrap();
        assert_eq!(ts, utc("2024-01-15T10:30:00Z"));
    }

    #[test]
    fn test_invalid_utf8_prefix_is_tolerated() {
        let recognizer = PrefixRecognizer::default();
        let mut line = b"2024-01-15T10:30:00Z ".to_vec();
        line.extend_from_slice(&[0xff, 0xfe, b'x']);
        assert!(recognizer.recognize(&line).is_some());
    }
}
