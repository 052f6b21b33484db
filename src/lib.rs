//! # logtail - Log Ingestion and Live-Tail Engine
//!
//! The engine behind a log viewer: it indexes very large log files without
//! loading their contents, merges several files into one chronological
//! stream, keeps that stream live as files grow or rotate, and layers find
//! and filter on top.
//!
//! ## Features
//!
//! - **Streaming Index**: Chunked, SIMD-accelerated newline scanning; only line
//!   boundaries and timestamps are kept in memory
//! - **Multi-File Merge**: Stable timestamp-ordered merge with O(log n) line lookup
//! - **Live Tail**: Growth, truncation and rotation detection with incremental re-indexing
//! - **Find and Filter**: Literal or regex predicates powered by ripgrep core libraries
//! - **Typed Events**: Bounded, non-blocking delivery of progress and tail events
//!
//! ## Architecture
//!
//! - [`error`] - Centralized error types and handling
//! - [`config`] - Session tuning and per-open options
//! - [`extract`] - Timestamp and severity recognition
//! - [`file_handler`] - Per-file scanning, indexing, reading and watching
//! - [`merged`] - Global line numbering over several files
//! - [`search`] - Find and filter engines
//! - [`session`] - The session object, its background tasks and events

// Core modules
pub mod config;
pub mod error;
pub mod extract;
pub mod file_handler;

// Core components
pub mod merged;
pub mod search;
pub mod session;

// Re-export commonly used types for convenience
pub use error::{LogtailError, Result};

// Public API surface for external usage
pub use config::{OpenOptions, SessionConfig};
pub use extract::{format_line, Severity, Timestamp};
pub use file_handler::{LineText, LogFile, TextOptions};
pub use search::{SearchDirection, SearchOutcome};
pub use session::{EventReceiver, LineSpan, PointerState, Session, SessionEvent, TailState};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
