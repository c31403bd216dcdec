//! mesh combine command - merge two meshes.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use mesh_forge::{
    Annotation, BooleanOp, CombinationRequest, ConversionTarget, ConverterService, Mesh, Operand,
    ProcessConfig, Scale, Transform, combine, combine_and_process,
};
use serde::Serialize;

use super::{output_format, write_output};
use crate::{Cli, OutputFormat, output};

pub struct CombineArgs<'a> {
    pub primary: &'a Path,
    pub secondary: Option<&'a Path>,
    pub op: BooleanOp,
    pub primary_transform: Transform,
    pub secondary_transform: Transform,
    pub output: &'a Path,
    /// Orchestrator settings; `None` writes the raw combined mesh.
    pub process: Option<ProcessConfig>,
}

/// Scale then translate, identity for missing parts.
pub fn transform(scale: Option<Scale>, translate: Option<[f64; 3]>) -> Transform {
    let [x, y, z] = translate.unwrap_or_default();
    Transform {
        scale: scale.unwrap_or_default(),
        ..Transform::translate(x, y, z)
    }
}

#[derive(Serialize)]
struct CombineResult {
    output: String,
    operator: BooleanOp,
    operator_applied: BooleanOp,
    fallback: Option<String>,
    vertices: usize,
    faces: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<f64>,
    annotations: Vec<Annotation>,
}

fn load(path: &Path) -> Result<Mesh> {
    Mesh::load(path).with_context(|| format!("Failed to load mesh from {:?}", path))
}

pub fn run(args: CombineArgs<'_>, cli: &Cli) -> Result<()> {
    let target = output_format(args.output)?;
    let primary = Operand::new(load(args.primary)?).with_transform(args.primary_transform);
    let secondary = match args.secondary {
        Some(path) => Some(Operand::new(load(path)?).with_transform(args.secondary_transform)),
        None => None,
    };
    let request = CombinationRequest::new(primary, secondary, args.op);

    let (mesh, operator_applied, fallback, mut annotations, score) = if let Some(config) = &args.process {
        let outcome = combine_and_process(request, config);
        let processed = outcome.processed;
        (
            processed.mesh,
            outcome.operator_applied,
            outcome.fallback,
            processed.annotations,
            Some(processed.metrics.overall_score),
        )
    } else {
        let outcome = combine(request);
        (
            outcome.mesh,
            outcome.operator_applied,
            outcome.fallback,
            outcome.annotations,
            None,
        )
    };

    let export = ConverterService::builtin_only()
        .export(&mesh, &[ConversionTarget::new(target)])
        .with_context(|| format!("Failed to export {}", target))?
        .into_iter()
        .next()
        .context("Converter produced no output")?;
    annotations.extend(export.annotations);
    write_output(args.output, &export.bytes)?;

    let result = CombineResult {
        output: args.output.display().to_string(),
        operator: args.op,
        operator_applied,
        fallback: fallback.map(|f| f.name().to_string()),
        vertices: mesh.vertex_count(),
        faces: mesh.face_count(),
        score,
        annotations,
    };

    match cli.format {
        OutputFormat::Json => output::print(&result, cli.format, cli.quiet),
        OutputFormat::Text => {
            if cli.quiet {
                return Ok(());
            }
            output::success(
                &format!("Combined into {}", args.output.display()),
                cli.format,
                cli.quiet,
            );
            match &result.fallback {
                Some(fallback) => println!(
                    "  {}: {} (fell back to {})",
                    "Operator".cyan(),
                    result.operator,
                    fallback.yellow()
                ),
                None => println!("  {}: {}", "Operator".cyan(), result.operator_applied),
            }
            println!(
                "  {}: {} vertices, {} faces",
                "Size".cyan(),
                result.vertices,
                result.faces
            );
            if let Some(score) = result.score {
                println!("  {}: {:.1}/10", "Quality".cyan(), score);
            }
            output::annotations(&result.annotations, cli.format, cli.quiet);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_defaults_to_identity() {
        assert!(transform(None, None).is_identity());

        let t = transform(Some(Scale::Uniform(2.0)), Some([1.0, 0.0, -3.0]));
        assert_eq!(t.scale, Scale::Uniform(2.0));
        assert_eq!(t.translation, [1.0, 0.0, -3.0]);
    }

    #[test]
    fn test_combine_processes_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let cube = Mesh::from_raw(
            &[
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
                [1.0, 0.0, 1.0],
                [1.0, 1.0, 1.0],
                [0.0, 1.0, 1.0],
            ],
            &[
                [0, 2, 1],
                [0, 3, 2],
                [4, 5, 6],
                [4, 6, 7],
                [0, 1, 5],
                [0, 5, 4],
                [2, 3, 7],
                [2, 7, 6],
                [1, 2, 6],
                [1, 6, 5],
                [3, 0, 4],
                [3, 4, 7],
            ],
        );
        let primary = dir.path().join("a.obj");
        cube.save(&primary).unwrap();
        let output = dir.path().join("out.obj");

        let cli = <crate::Cli as clap::Parser>::try_parse_from(["mesh", "-q", "formats"]).unwrap();
        run(
            CombineArgs {
                primary: &primary,
                secondary: None,
                op: BooleanOp::Concatenate,
                primary_transform: transform(Some(Scale::Uniform(10.0)), None),
                secondary_transform: Transform::default(),
                output: &output,
                process: Some(ProcessConfig::default()),
            },
            &cli,
        )
        .unwrap();

        let written = Mesh::load(&output).unwrap();
        let (min, max) = written.bounds().unwrap();
        assert!(max.x - min.x > 5.0);
        assert!(written.validate().is_watertight);
    }
}
