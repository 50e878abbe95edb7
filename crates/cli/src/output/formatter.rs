//! Human-readable and JSON output
//!
//! Every command reports through a [`Formatter`], so `--json`, `--quiet`
//! and `--no-color` behave the same everywhere.

use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::{ContentArrangement, Table};
use console::Style;
use serde::Serialize;

use super::OutputConfig;

/// What a piece of text stands for; decides its style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paint {
    /// Common prefixes in listings
    Prefix,
    /// Object keys and local paths
    Object,
    Size,
    Timestamp,
    /// Property labels in `stat`-like output
    Label,
    Url,
    /// Backend and bucket names
    Name,
    Up,
    Down,
}

impl Paint {
    fn style(self) -> Style {
        match self {
            Paint::Prefix => Style::new().blue().bold(),
            Paint::Object => Style::new(),
            Paint::Size => Style::new().green(),
            Paint::Timestamp => Style::new().dim(),
            Paint::Label => Style::new().cyan(),
            Paint::Url => Style::new().cyan().underlined(),
            Paint::Name => Style::new().bold(),
            Paint::Up => Style::new().green(),
            Paint::Down => Style::new().red(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Notice {
    Success,
    Warning,
    Error,
}

impl Notice {
    fn marker(self) -> (&'static str, Style) {
        match self {
            Notice::Success => ("✓", Style::new().green()),
            Notice::Warning => ("⚠", Style::new().yellow()),
            Notice::Error => ("✗", Style::new().red()),
        }
    }
}

/// Formatter for CLI output
///
/// In JSON mode stdout carries only JSON documents and nothing is styled.
#[derive(Debug, Clone, Default)]
pub struct Formatter {
    config: OutputConfig,
}

impl Formatter {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }

    pub fn is_json(&self) -> bool {
        self.config.json
    }

    pub fn colors_enabled(&self) -> bool {
        !(self.config.no_color || self.config.json)
    }

    /// Style `text` for its role; plain text when colors are off
    pub fn paint(&self, role: Paint, text: &str) -> String {
        if self.colors_enabled() {
            role.style().apply_to(text).to_string()
        } else {
            text.to_string()
        }
    }

    /// Health status word, green when up
    pub fn paint_status(&self, text: &str, up: bool) -> String {
        self.paint(if up { Paint::Up } else { Paint::Down }, text)
    }

    fn notice(&self, kind: Notice, message: &str) {
        let (marker, style) = kind.marker();
        let marker = if self.colors_enabled() {
            style.apply_to(marker).to_string()
        } else {
            marker.to_string()
        };
        match kind {
            Notice::Success => println!("{marker} {message}"),
            Notice::Warning | Notice::Error => eprintln!("{marker} {message}"),
        }
    }

    /// Confirmation of a completed action; silent in JSON and quiet mode
    pub fn success(&self, message: &str) {
        if !self.config.quiet && !self.config.json {
            self.notice(Notice::Success, message);
        }
    }

    /// Always printed on stderr; a `{"error": ...}` document in JSON mode
    pub fn error(&self, message: &str) {
        if self.config.json {
            let document = serde_json::json!({ "error": message });
            match serde_json::to_string_pretty(&document) {
                Ok(json) => eprintln!("{json}"),
                Err(_) => eprintln!("{message}"),
            }
        } else {
            self.notice(Notice::Error, message);
        }
    }

    pub fn warning(&self, message: &str) {
        if !self.config.quiet && !self.config.json {
            self.notice(Notice::Warning, message);
        }
    }

    /// Print `value` as pretty JSON on stdout
    pub fn json<T: Serialize>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{json}"),
            Err(e) => self.error(&format!("Cannot serialize output: {e}")),
        }
    }

    /// Print a line unless quiet
    pub fn println(&self, message: &str) {
        if !self.config.quiet {
            println!("{message}");
        }
    }

    /// Empty table with the shared look and the given header
    pub fn table(&self, header: &[&str]) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_BORDERS_ONLY)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(header.to_vec());
        if !self.colors_enabled() {
            table.force_no_tty();
        }
        table
    }

    pub fn print_table(&self, table: &Table) {
        self.println(&table.to_string());
    }
}
