//! mesh score command - report quality metrics.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use mesh_forge::{Mesh, QualityMetrics};
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScoreReport {
    path: String,
    #[serde(flatten)]
    metrics: QualityMetrics,
}

pub fn run(input: &Path, cli: &Cli) -> Result<()> {
    let mesh =
        Mesh::load(input).with_context(|| format!("Failed to load mesh from {:?}", input))?;
    let metrics = mesh.score();

    match cli.format {
        OutputFormat::Json => {
            let report = ScoreReport {
                path: input.display().to_string(),
                metrics,
            };
            output::print(&report, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if cli.quiet {
                return Ok(());
            }
            println!("{}", "Mesh Quality".bold().underline());
            println!("  {}: {}", "File".cyan(), input.display());
            println!(
                "  {}: {} vertices, {} faces, {} edges",
                "Size".cyan(),
                metrics.vertex_count,
                metrics.face_count,
                metrics.edge_count
            );
            println!("  {}: {}", "Watertight".cyan(), output::yes_no(metrics.watertight));
            println!("  {}: {}", "Manifold".cyan(), output::yes_no(metrics.manifold));
            println!("  {}: {}", "Genus".cyan(), metrics.genus);
            if metrics.face_count > 0 {
                println!(
                    "  {}: {:.4} .. {:.4} (avg {:.4})",
                    "Edge length".cyan(),
                    metrics.min_edge_length,
                    metrics.max_edge_length,
                    metrics.avg_edge_length
                );
                println!(
                    "  {}: {:.1}° .. {:.1}°",
                    "Face angles".cyan(),
                    metrics.min_face_angle,
                    metrics.max_face_angle
                );
            }

            let score = format!("{:.1}/10", metrics.overall_score);
            let score = if metrics.overall_score >= 7.0 {
                score.green().bold()
            } else {
                score.yellow().bold()
            };
            println!("  {}: {}", "Score".cyan(), score);

            let needs: Vec<&str> = [
                (metrics.needs_repair, "repair"),
                (metrics.needs_decimation, "decimation"),
                (metrics.needs_smoothing, "smoothing"),
            ]
            .into_iter()
            .filter_map(|(flag, name)| flag.then_some(name))
            .collect();
            if !needs.is_empty() {
                println!("  {}: {}", "Needs".yellow(), needs.join(", "));
            }
        }
    }

    Ok(())
}
