//! Severity levels and their extraction from log lines.

use super::{json_field, json_value};
use crate::error::{LogtailError, Result};
use std::fmt;
use std::str::FromStr;

/// Log severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl Severity {
    /// Case-insensitive lookup of a level name, including common aliases.
    pub fn from_name(name: &str) -> Option<Self> {
        let severity = match name.trim().to_ascii_lowercase().as_str() {
            "trace" | "trc" => Severity::Trace,
            "debug" | "dbg" => Severity::Debug,
            "info" | "information" | "inf" | "notice" => Severity::Info,
            "warn" | "warning" | "wrn" => Severity::Warn,
            "error" | "err" | "erro" => Severity::Error,
            "critical" | "crit" | "fatal" | "panic" | "alert" | "emergency" => {
                Severity::Critical
            }
            _ => return None,
        };
        Some(severity)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Trace => "trace",
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = LogtailError;

    fn from_str(s: &str) -> Result<Self> {
        Severity::from_name(s)
            .ok_or_else(|| LogtailError::invalid_argument(format!("unknown log level '{}'", s)))
    }
}

const JSON_LEVEL_KEYS: [&str; 4] = ["level", "severity", "lvl", "levelname"];

/// How many leading tokens of a plain line may hold the level
const MAX_LEVEL_TOKENS: usize = 6;

/// Extract the severity of a line.
///
/// JSON records are probed for a level key. Plain lines are split on
/// whitespace, `/`, `[`, `]` and `:`, and the first few tokens are matched
/// against level names.
pub fn extract_level(line: &[u8]) -> Option<Severity> {
    for key in JSON_LEVEL_KEYS {
        if let Some(raw) = json_field(line, key) {
            match json_value(raw) {
                Some(serde_json::Value::String(name)) => return Severity::from_name(&name),
                Some(serde_json::Value::Number(number)) => {
                    return number.as_u64().and_then(from_numeric_level)
                }
                _ => {}
            }
        }
    }

    let head = &line[..line.len().min(256)];
    let text = String::from_utf8_lossy(head);
    text.split(|c: char| c.is_whitespace() || matches!(c, '/' | '[' | ']' | ':'))
        .filter(|token| !token.is_empty())
        .take(MAX_LEVEL_TOKENS)
        .find_map(Severity::from_name)
}

// bunyan/pino numeric levels
fn from_numeric_level(level: u64) -> Option<Severity> {
    match level {
        10 => Some(Severity::Trace),
        20 => Some(Severity::Debug),
        30 => Some(Severity::Info),
        40 => Some(Severity::Warn),
        50 => Some(Severity::Error),
        60 => Some(Severity::Critical),
        _ => None,
    }
}
