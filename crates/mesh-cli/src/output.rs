//! Shared output helpers for text and JSON modes.

use colored::Colorize;
use mesh_forge::{Annotation, IssueSeverity};
use serde::Serialize;

use crate::OutputFormat;

/// Print a serializable result. Text mode falls back to pretty JSON.
pub fn print<T: Serialize>(value: &T, format: OutputFormat, quiet: bool) {
    if quiet && matches!(format, OutputFormat::Text) {
        return;
    }
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("{}: could not serialize result: {}", "Error".red().bold(), e),
    }
}

/// Print a success line in text mode.
pub fn success(message: &str, format: OutputFormat, quiet: bool) {
    if quiet || matches!(format, OutputFormat::Json) {
        return;
    }
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an informational line in text mode.
pub fn info(message: &str, format: OutputFormat, quiet: bool) {
    if quiet || matches!(format, OutputFormat::Json) {
        return;
    }
    println!("  {}", message.dimmed());
}

/// Print annotations, coloured by severity.
pub fn annotations(annotations: &[Annotation], format: OutputFormat, quiet: bool) {
    if quiet || matches!(format, OutputFormat::Json) || annotations.is_empty() {
        return;
    }
    println!("  {}:", "Notes".cyan());
    for annotation in annotations {
        let code = match annotation.severity() {
            IssueSeverity::Info => annotation.code().blue(),
            IssueSeverity::Warning => annotation.code().yellow(),
        };
        println!("    [{}] {}", code, annotation);
    }
}

pub fn yes_no(flag: bool) -> colored::ColoredString {
    if flag { "yes".green() } else { "no".red() }
}
