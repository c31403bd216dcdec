//! mesh process command - run the quality-gated processing pipeline.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use mesh_forge::{Annotation, OutputSpec, PipelineConfig, QualityMetrics, run_pipeline};
use serde::Serialize;

use super::{output_format, read_input, write_output};
use crate::{Cli, OutputFormat, ProcessArgs, output};

#[derive(Serialize)]
struct ProcessResult {
    input: String,
    output: String,
    state: String,
    attempts: usize,
    backend: String,
    metrics: QualityMetrics,
    annotations: Vec<Annotation>,
}

pub fn run(
    input: &Path,
    output_path: &Path,
    config_path: Option<&Path>,
    args: &ProcessArgs,
    cli: &Cli,
) -> Result<()> {
    let (bytes, input_format) = read_input(input)?;
    let target = output_format(output_path)?;

    let base = match config_path {
        Some(path) => PipelineConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load pipeline config from {:?}", path))?,
        None => PipelineConfig::default(),
    };
    // The pipeline file's conversion options for this format still apply.
    let spec = base
        .outputs
        .iter()
        .find(|s| s.format == target)
        .cloned()
        .unwrap_or_else(|| OutputSpec::new(target));
    let config = PipelineConfig {
        process: args.apply(base.process.clone()),
        outputs: vec![spec],
        ..base
    };

    let service = config.converter_service();
    let result = run_pipeline(&bytes, input_format, &config, &service)
        .with_context(|| format!("Failed to process {:?}", input))?;

    let Some(export) = result.exports.first() else {
        anyhow::bail!("Pipeline produced no output");
    };
    write_output(output_path, &export.bytes)?;

    let report = ProcessResult {
        input: input.display().to_string(),
        output: output_path.display().to_string(),
        state: result.state.to_string(),
        attempts: result.attempts.len(),
        backend: export.backend.clone(),
        metrics: result.metrics,
        annotations: result.annotations,
    };

    match cli.format {
        OutputFormat::Json => output::print(&report, cli.format, cli.quiet),
        OutputFormat::Text => {
            if cli.quiet {
                return Ok(());
            }
            output::success(
                &format!("Processed {} → {}", input.display(), output_path.display()),
                cli.format,
                cli.quiet,
            );
            println!(
                "  {}: {} after {} attempt(s)",
                "Result".cyan(),
                report.state,
                report.attempts
            );
            println!(
                "  {}: {:.1}/10, {} faces, watertight {}",
                "Quality".cyan(),
                report.metrics.overall_score,
                report.metrics.face_count,
                output::yes_no(report.metrics.watertight)
            );
            println!(
                "  {}: {} → {} ({})",
                "Format".cyan(),
                input_format.tag().to_uppercase(),
                target.tag().to_uppercase(),
                report.backend
            );
            output::annotations(&report.annotations, cli.format, cli.quiet);
        }
    }

    Ok(())
}
