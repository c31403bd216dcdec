//! mesh batch command - run the pipeline over many files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use mesh_forge::batch::BatchError;
use mesh_forge::progress::{Progress, ProgressCallback};
use mesh_forge::{
    BatchConfig, MeshError, MeshFormat, MeshResult, PipelineConfig, run_batch,
    run_pipeline,
};
use serde::Serialize;

use crate::{Cli, OutputFormat, ProcessArgs, output};

#[derive(Serialize)]
struct FileResult {
    input: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<f64>,
    outputs: Vec<String>,
    annotations: usize,
}

#[derive(Serialize)]
struct BatchSummary {
    succeeded: usize,
    failed: usize,
    cancelled: usize,
    files: Vec<FileResult>,
}

/// What one successful file produced.
struct Processed {
    score: f64,
    outputs: Vec<PathBuf>,
    annotations: usize,
}

fn process_file(
    path: &Path,
    out_dir: &Path,
    config: &PipelineConfig,
    service: &mesh_forge::ConverterService,
) -> MeshResult<Processed> {
    let bytes = std::fs::read(path).map_err(|e| MeshError::io_read(path, e))?;
    let format = MeshFormat::from_path(path)
        .or_else(|| MeshFormat::detect(&bytes))
        .ok_or_else(|| MeshError::unsupported_format(path.display().to_string()))?;

    let result = run_pipeline(&bytes, format, config, service)?;

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mesh".to_string());
    let mut outputs = Vec::with_capacity(result.exports.len());
    for export in &result.exports {
        let out = out_dir.join(format!("{}.{}", stem, export.format.extension()));
        std::fs::write(&out, &export.bytes).map_err(|e| MeshError::io_write(&out, e))?;
        outputs.push(out);
    }

    Ok(Processed {
        score: result.metrics.overall_score,
        outputs,
        annotations: result.annotations.len(),
    })
}

pub fn run(
    inputs: &[PathBuf],
    out_dir: &Path,
    jobs: Option<usize>,
    config_path: Option<&Path>,
    fail_fast: bool,
    args: &ProcessArgs,
    cli: &Cli,
) -> Result<()> {
    let base = match config_path {
        Some(path) => PipelineConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load pipeline config from {:?}", path))?,
        None => PipelineConfig::default(),
    };
    let config = PipelineConfig {
        process: args.apply(base.process.clone()),
        ..base
    };
    let service = config.converter_service();

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory {:?}", out_dir))?;

    let batch_config = match jobs {
        Some(n) => BatchConfig::with_concurrency(n),
        None => BatchConfig::default(),
    };

    let show_progress = !cli.quiet && matches!(cli.format, OutputFormat::Text);
    let callback: ProgressCallback = Box::new(move |p: &Progress| {
        if show_progress {
            eprintln!(
                "  [{}/{}] {} {}",
                p.completed,
                p.total,
                p.message,
                if p.failed > 0 {
                    format!("({} failed)", p.failed).red().to_string()
                } else {
                    String::new()
                }
            );
        }
        !(fail_fast && p.failed > 0)
    });

    let report = run_batch(inputs, &batch_config, Some(&callback), |path| {
        process_file(path, out_dir, &config, &service)
    });

    let files: Vec<FileResult> = inputs
        .iter()
        .zip(&report.results)
        .map(|(path, result)| match result {
            Ok(p) => FileResult {
                input: path.display().to_string(),
                ok: true,
                error: None,
                score: Some(p.score),
                outputs: p.outputs.iter().map(|o| o.display().to_string()).collect(),
                annotations: p.annotations,
            },
            Err(e) => FileResult {
                input: path.display().to_string(),
                ok: false,
                error: Some(e.to_string()),
                score: None,
                outputs: Vec::new(),
                annotations: 0,
            },
        })
        .collect();

    let summary = BatchSummary {
        succeeded: report.succeeded,
        failed: report.failed,
        cancelled: report.cancelled,
        files,
    };

    match cli.format {
        OutputFormat::Json => output::print(&summary, cli.format, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                for (file, result) in summary.files.iter().zip(&report.results) {
                    match result {
                        Ok(p) => println!(
                            "{} {} ({:.1}/10, {} output(s))",
                            "✓".green().bold(),
                            file.input,
                            p.score,
                            p.outputs.len()
                        ),
                        Err(BatchError::Cancelled) => {
                            println!("{} {} (skipped)", "-".dimmed(), file.input)
                        }
                        Err(e) => println!("{} {}: {}", "✗".red().bold(), file.input, e),
                    }
                }
                println!(
                    "{}: {} succeeded, {} failed, {} skipped",
                    "Batch".bold(),
                    summary.succeeded,
                    summary.failed,
                    summary.cancelled
                );
            }
        }
    }

    if summary.failed > 0 {
        anyhow::bail!("{} of {} file(s) failed", summary.failed, inputs.len());
    }
    Ok(())
}
