//! Best-effort metadata extraction from raw line bytes.
//!
//! Nothing in here fails a line: a line without a recognizable timestamp or
//! severity is still indexed, it just carries `None`.

pub mod format;
pub mod level;
pub mod timestamp;

pub use format::format_line;
pub use level::{extract_level, Severity};
pub use timestamp::{
    default_recognizer, ChainRecognizer, JsonFieldRecognizer, PrefixRecognizer, Timestamp,
    TimestampRecognizer,
};

use bstr::ByteSlice;

/// Locate the raw value bytes following `"key":` in a JSON object line.
///
/// This is a byte-level probe, not a parser: it avoids deserializing the whole
/// line just to read one field.
pub(crate) fn json_field<'a>(line: &'a [u8], key: &str) -> Option<&'a [u8]> {
    let trimmed = line.trim_start();
    if trimmed.first() != Some(&b'{') {
        return None;
    }

    let needle = format!("\"{}\"", key);
    let finder = memchr::memmem::Finder::new(needle.as_bytes());
    let mut search_from = 0;
    while let Some(pos) = finder.find(&trimmed[search_from..]) {
        let after_key = search_from + pos + needle.len();
        let rest = trimmed[after_key..].trim_start();
        if let Some(value) = rest.strip_prefix(b":") {
            return Some(value.trim_start());
        }
        search_from = after_key;
    }
    None
}

/// Decode the single JSON value at the start of `bytes`.
pub(crate) fn json_value(bytes: &[u8]) -> Option<serde_json::Value> {
    serde_json::Deserializer::from_slice(bytes)
        .into_iter::<serde_json::Value>()
        .next()?
        .ok()
}
