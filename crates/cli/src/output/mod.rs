//! Output handling for human-readable and JSON modes

mod formatter;

pub use formatter::{Formatter, Paint};

/// Output switches shared by every command
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    /// Strict JSON output, no styling
    pub json: bool,
    pub no_color: bool,
    /// Suppress everything but errors
    pub quiet: bool,
}
