//! Output formatting utilities

use chrono::{DateTime, FixedOffset, Utc};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a rounded table
pub fn print_table<T: Tabled>(rows: Vec<T>) {
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format an instant in the display zone
pub fn format_instant(instant: Option<DateTime<Utc>>, zone: FixedOffset) -> String {
    match instant {
        Some(at) => at
            .with_timezone(&zone)
            .format("%Y-%m-%d %H:%M:%S %:z")
            .to_string(),
        None => "never".dimmed().to_string(),
    }
}

/// Format a forecast value; failed steps are shown in red
pub fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{}", v),
        None => "failed".red().to_string(),
    }
}

/// First characters of a hex checksum
pub fn short_checksum(checksum: &str) -> String {
    if checksum.is_empty() {
        return "-".to_string();
    }
    checksum.chars().take(12).collect()
}
