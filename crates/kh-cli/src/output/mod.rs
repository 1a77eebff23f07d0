//! Output formatting utilities for the CLI
//!
//! This module provides functions for formatting the agent's keys as
//! human-readable tables, plus colored status messages.

use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use crate::ipc::Identity;

/// Format a list of keys as an ASCII table
///
/// The detailed view adds the full comment and what the agent holds for
/// each key (cleartext, encrypted file, or both).
///
/// # Arguments
/// * `keys` - Keys as listed by the agent
/// * `detailed` - If true, includes the decryption state column
///
/// # Returns
/// A formatted string suitable for terminal output, or a note that the
/// agent holds no keys.
pub fn format_keys(keys: &[Identity], detailed: bool) -> String {
    if keys.is_empty() {
        return "The agent has no keys.".to_string();
    }

    #[derive(Tabled)]
    struct KeyRow {
        #[tabled(rename = "TYPE")]
        algorithm: String,
        #[tabled(rename = "FINGERPRINT")]
        fingerprint: String,
        #[tabled(rename = "COMMENT")]
        comment: String,
    }

    #[derive(Tabled)]
    struct KeyRowDetailed {
        #[tabled(rename = "TYPE")]
        algorithm: String,
        #[tabled(rename = "FINGERPRINT")]
        fingerprint: String,
        #[tabled(rename = "COMMENT")]
        comment: String,
        #[tabled(rename = "STATE")]
        state: String,
    }

    if detailed {
        let rows: Vec<KeyRowDetailed> = keys
            .iter()
            .map(|k| KeyRowDetailed {
                algorithm: k.algorithm(),
                fingerprint: k.fingerprint(),
                comment: display_comment(&k.comment),
                state: k.state.label().to_string(),
            })
            .collect();

        Table::new(rows)
            .with(Style::rounded())
            .with(Width::wrap(120))
            .to_string()
    } else {
        let rows: Vec<KeyRow> = keys
            .iter()
            .map(|k| KeyRow {
                algorithm: k.algorithm(),
                fingerprint: k.fingerprint(),
                comment: truncate(&display_comment(&k.comment), 40),
            })
            .collect();

        Table::new(rows).with(Style::rounded()).to_string()
    }
}

fn display_comment(comment: &str) -> String {
    if comment.is_empty() {
        "-".to_string()
    } else {
        comment.to_string()
    }
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
///
/// Outputs to stdout with green coloring for positive feedback to the user.
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr with red coloring for error feedback to the user.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow with a warning symbol prefix
///
/// Outputs to stderr with yellow coloring for cautionary feedback to the user.
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan with an info symbol prefix
///
/// Outputs to stdout with cyan coloring for informational feedback to the user.
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
