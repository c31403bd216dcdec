//! mesh convert command - convert between mesh formats.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use colored::Colorize;
use mesh_forge::backend::ExternalBackendConfig;
use mesh_forge::{Annotation, ConversionOptions, ConverterService};
use serde::Serialize;

use super::{output_format, read_input, write_output};
use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct ConvertResult {
    input: String,
    output: String,
    input_format: String,
    output_format: String,
    backend: String,
    bytes: usize,
    annotations: Vec<Annotation>,
}

pub fn run(
    input: &Path,
    output_path: &Path,
    backend: Option<&Path>,
    timeout_secs: f64,
    tolerance: Option<f64>,
    cli: &Cli,
) -> Result<()> {
    ensure!(
        timeout_secs.is_finite() && timeout_secs > 0.0,
        "Timeout must be a positive number of seconds"
    );

    let (bytes, from) = read_input(input)?;
    let to = output_format(output_path)?;

    let service = match backend {
        Some(exe) => ConverterService::new(ExternalBackendConfig::for_executable(exe)),
        None => ConverterService::builtin_only(),
    };
    let options = ConversionOptions {
        tolerance,
        ..ConversionOptions::with_timeout(Duration::from_secs_f64(timeout_secs))
    };

    let converted = service
        .convert(&bytes, from, to, &options)
        .with_context(|| format!("Failed to convert {:?}", input))?;
    write_output(output_path, &converted.bytes)?;

    let result = ConvertResult {
        input: input.display().to_string(),
        output: output_path.display().to_string(),
        input_format: from.tag().to_string(),
        output_format: to.tag().to_string(),
        backend: converted.backend,
        bytes: converted.bytes.len(),
        annotations: converted.annotations,
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&result, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                output::success(
                    &format!("Converted {} to {}", input.display(), output_path.display()),
                    cli.format,
                    cli.quiet,
                );
                println!(
                    "  {}: {} → {}",
                    "Format".cyan(),
                    result.input_format.to_uppercase(),
                    result.output_format.to_uppercase()
                );
                println!("  {}: {}", "Backend".cyan(), result.backend);
                println!("  {}: {} bytes", "Size".cyan(), result.bytes);
                output::annotations(&result.annotations, cli.format, cli.quiet);
            }
        }
    }

    Ok(())
}
