//! Rendering a line for export (copy, detail view).

use crate::error::{LogtailError, Result};

/// Return the text to export for `line`.
///
/// With `raw` the line is returned unchanged; otherwise it must be a JSON
/// document and is pretty-printed with two-space indentation.
pub fn format_line(line: &str, raw: bool) -> Result<String> {
    if raw {
        return Ok(line.to_string());
    }

    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|_| LogtailError::invalid_argument("Not valid JSON"))?;
    serde_json::to_string_pretty(&value).map_err(|e| LogtailError::other(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_passthrough() {
        assert_eq!(format_line("not json", true).unwrap(), "not json");
    }

    #[test]
    fn test_pretty_json() {
        let pretty = format_line(r#"{"a":1,"b":[true]}"#, false).unwrap();
        assert_eq!(pretty, "{\n  \"a\": 1,\n  \"b\": [\n    true\n  ]\n}");
    }

    #[test]
    fn test_pretty_rejects_plain_text() {
        let err = format_line("plain text", false).unwrap_err();
        assert!(matches!(err, LogtailError::InvalidArgument { .. }));
        assert_eq!(err.to_string(), "Invalid argument: Not valid JSON");
    }

    #[test]
    fn test_pretty_keeps_unicode() {
        let pretty = format_line(r#"{"msg":"héllo"}"#, false).unwrap();
        assert!(pretty.contains("héllo"));
    }
}
