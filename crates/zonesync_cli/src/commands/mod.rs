//! CLI command implementations.

pub mod cursor;
pub mod inspect_changes;

/// Change log file name inside the data directory.
pub const CHANGE_LOG_FILE: &str = "changes.zsl";

/// Cursor file name inside the data directory.
pub const CURSOR_FILE: &str = "cursors.zsc";
