//! Shared styling utilities for the CLI.

use console::Style;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Informational status (no change made).
pub fn info(msg: &str) -> String {
    let style = Style::new().cyan();
    format!("{} {}", style.apply_to("•"), msg)
}

pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// `old -> new` rename line.
pub fn rename(from: &str, to: &str) -> String {
    format!(
        "  {} {} {}",
        Style::new().red().apply_to(from),
        dim("->"),
        Style::new().green().apply_to(to)
    )
}
