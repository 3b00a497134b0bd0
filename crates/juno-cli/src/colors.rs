//! Terminal color constants for CLI output.

use juno_core::Status;

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const CYAN: &str = "\x1b[36m";
pub const RED: &str = "\x1b[31m";

/// Color used to print a paragraph status.
pub fn status(status: Status) -> &'static str {
    match status {
        Status::Finished => GREEN,
        Status::Error => RED,
        Status::Abort => YELLOW,
        Status::Pending | Status::Running => CYAN,
        Status::Ready => DIM,
    }
}
