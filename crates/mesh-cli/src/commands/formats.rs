//! mesh formats command - list the capability table.

use anyhow::Result;
use colored::Colorize;
use mesh_forge::convert::capability_table;

use crate::{Cli, OutputFormat, output};

pub fn run(cli: &Cli) -> Result<()> {
    let table = capability_table();

    match cli.format {
        OutputFormat::Json => output::print(&table, cli.format, cli.quiet),
        OutputFormat::Text => {
            if cli.quiet {
                return Ok(());
            }
            println!("{}", "Supported Formats".bold().underline());
            println!(
                "  {:<6} {:<7} {:<8} {:<16} {}",
                "Tag", "Decode", "Built-in", "Prefers external", "External input"
            );
            for cap in &table {
                println!(
                    "  {:<6} {:<7} {:<8} {:<16} {}",
                    cap.format.tag().cyan(),
                    if cap.format.is_polygon() { "yes" } else { "no" },
                    if cap.builtin { "yes" } else { "no" },
                    if cap.prefers_external { "yes" } else { "no" },
                    cap.external_input.map(|f| f.tag()).unwrap_or("-")
                );
            }
        }
    }

    Ok(())
}
