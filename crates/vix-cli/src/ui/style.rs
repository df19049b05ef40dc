//! Message styling for CLI output.
//!
//! Provides consistent prefixes, colors, and formatting for all CLI messages.
//!
//! ## Message Types
//!
//! | Prefix | Meaning | Color |
//! |--------|---------|-------|
//! | `[ok]` | Success | Green |
//! | `[err]` | Error | Red |
//! | `[warn]` | Warning | Yellow |
//! | `[info]` | Information | Blue |
//! | `[hint]` | Suggestion | Cyan |
//! | `[skip]` | Skipped | Dim |

use owo_colors::OwoColorize;

use vix_core::{ConnectionState, MigrationState};

use super::color::ColorMode;

/// Message severity/type for CLI output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Success - operation completed successfully
    Ok,
    /// Error - operation failed, cannot continue
    Err,
    /// Warning - operation succeeded with caveats
    Warn,
    /// Information - neutral status or progress update
    Info,
    /// Hint - actionable next step or tip
    Hint,
    /// Skipped - item was intentionally not processed
    Skip,
}

impl MessageType {
    /// Returns the prefix text for this message type.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Ok => "[ok]",
            Self::Err => "[err]",
            Self::Warn => "[warn]",
            Self::Info => "[info]",
            Self::Hint => "[hint]",
            Self::Skip => "[skip]",
        }
    }
}

/// Main styling interface for CLI output.
///
/// # Example
///
/// ```
/// use vix_cli::ui::{Style, MessageType, ColorMode};
///
/// let style = Style::new(ColorMode::Never);
/// println!("{}", style.message(MessageType::Ok, "Profile created"));
/// ```
#[derive(Debug, Clone)]
pub struct Style {
    color_mode: ColorMode,
}

impl Style {
    /// Create a Style instance with an explicit color mode.
    pub fn new(color_mode: ColorMode) -> Self {
        Self { color_mode }
    }

    /// Check if colors are enabled.
    pub fn colors_enabled(&self) -> bool {
        self.color_mode.is_enabled()
    }

    /// Format a simple message with a type prefix.
    ///
    /// ```
    /// use vix_cli::ui::{Style, MessageType, ColorMode};
    ///
    /// let style = Style::new(ColorMode::Never);
    /// assert_eq!(style.message(MessageType::Ok, "Done"), "[ok] Done");
    /// ```
    pub fn message(&self, msg_type: MessageType, text: &str) -> String {
        let prefix = msg_type.prefix();
        if self.colors_enabled() {
            let colored_prefix = match msg_type {
                MessageType::Ok => prefix.green().to_string(),
                MessageType::Err => prefix.red().to_string(),
                MessageType::Warn => prefix.yellow().to_string(),
                MessageType::Info => prefix.blue().to_string(),
                MessageType::Hint => prefix.cyan().to_string(),
                MessageType::Skip => prefix.dimmed().to_string(),
            };
            format!("{} {}", colored_prefix, text)
        } else {
            format!("{} {}", prefix, text)
        }
    }

    /// Format a detail line with 5-space indentation.
    ///
    /// Use this for multi-line messages where details follow the main message.
    pub fn message_detail(&self, label: &str, value: &str) -> String {
        format!("     {}: {}", label, value)
    }

    /// Format a section header.
    pub fn section(&self, title: &str) -> String {
        if self.colors_enabled() {
            title.bold().to_string()
        } else {
            title.to_string()
        }
    }

    /// Format a structured error with optional cause and hint.
    ///
    /// ```
    /// use vix_cli::ui::{Style, ColorMode};
    ///
    /// let style = Style::new(ColorMode::Never);
    /// let output = style.error_with_context(
    ///     "Failed to connect",
    ///     Some("Connection refused"),
    ///     Some("Check if the server is running"),
    /// );
    /// assert!(output.contains("[err] Failed to connect"));
    /// assert!(output.contains("Cause: Connection refused"));
    /// assert!(output.contains("Hint: Check if the server is running"));
    /// ```
    pub fn error_with_context(&self, msg: &str, cause: Option<&str>, hint: Option<&str>) -> String {
        let mut output = self.message(MessageType::Err, msg);

        if let Some(cause_text) = cause {
            output.push('\n');
            output.push_str(&format!("      Cause: {}", cause_text));
        }

        if let Some(hint_text) = hint {
            output.push('\n');
            output.push_str(&format!("      Hint: {}", hint_text));
        }

        output
    }

    /// Format a list item with a prefix marker.
    ///
    /// The prefix `+` is colored green, `-` is colored red.
    pub fn list_item(&self, prefix: &str, text: &str) -> String {
        let styled_prefix = if self.colors_enabled() {
            match prefix {
                "+" => prefix.green().to_string(),
                "-" => prefix.red().to_string(),
                _ => prefix.to_string(),
            }
        } else {
            prefix.to_string()
        };
        format!("  {} {}", styled_prefix, text)
    }

    /// Format a key-value pair with optional coloring.
    pub fn key_value(&self, key: &str, value: &str) -> String {
        if self.colors_enabled() {
            format!("{}: {}", key.dimmed(), value)
        } else {
            format!("{}: {}", key, value)
        }
    }

    /// Format an id (first 8 chars, colored yellow).
    pub fn id(&self, id: &str) -> String {
        let short = id.get(..8).unwrap_or(id);
        if self.colors_enabled() {
            short.yellow().to_string()
        } else {
            short.to_string()
        }
    }

    /// Format a profile or collection name (colored cyan).
    pub fn name(&self, name: &str) -> String {
        if self.colors_enabled() {
            name.cyan().to_string()
        } else {
            name.to_string()
        }
    }

    /// Format a connection state.
    pub fn connection_state(&self, state: ConnectionState) -> String {
        let text = state.as_str();
        if !self.colors_enabled() {
            return text.to_string();
        }
        match state {
            ConnectionState::Connected => text.green().to_string(),
            ConnectionState::Connecting => text.yellow().to_string(),
            ConnectionState::Error => text.red().to_string(),
            ConnectionState::Disconnected => text.dimmed().to_string(),
        }
    }

    /// Format a migration state.
    pub fn migration_state(&self, state: MigrationState) -> String {
        let text = state.as_str();
        if !self.colors_enabled() {
            return text.to_string();
        }
        match state {
            MigrationState::Completed => text.green().to_string(),
            MigrationState::Failed => text.red().to_string(),
            MigrationState::Cancelled => text.yellow().to_string(),
            MigrationState::Pending | MigrationState::Running => text.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_prefix() {
        assert_eq!(MessageType::Ok.prefix(), "[ok]");
        assert_eq!(MessageType::Err.prefix(), "[err]");
        assert_eq!(MessageType::Warn.prefix(), "[warn]");
        assert_eq!(MessageType::Info.prefix(), "[info]");
        assert_eq!(MessageType::Hint.prefix(), "[hint]");
        assert_eq!(MessageType::Skip.prefix(), "[skip]");
    }

    #[test]
    fn test_message_no_color() {
        let style = Style::new(ColorMode::Never);
        assert_eq!(style.message(MessageType::Ok, "Success"), "[ok] Success");
        assert_eq!(style.message(MessageType::Err, "Failed"), "[err] Failed");
        assert_eq!(style.message_detail("Copied", "42"), "     Copied: 42");
    }

    #[test]
    fn test_error_with_context() {
        let style = Style::new(ColorMode::Never);
        let output = style.error_with_context("Connect failed", Some("timeout"), Some("Check network"));
        assert_eq!(
            output,
            "[err] Connect failed\n      Cause: timeout\n      Hint: Check network"
        );
        assert_eq!(
            style.error_with_context("Bare", None, None),
            "[err] Bare"
        );
    }

    #[test]
    fn test_plain_values() {
        let style = Style::new(ColorMode::Never);
        assert_eq!(style.id("abc12345def67890"), "abc12345");
        assert_eq!(style.id("short"), "short");
        assert_eq!(style.list_item("+", "docs"), "  + docs");
        assert_eq!(style.connection_state(ConnectionState::Error), "error");
        assert_eq!(
            style.migration_state(MigrationState::Completed),
            "completed"
        );
    }
}
