//! mesh-cli: Command-line interface for mesh post-processing.
//!
//! Exposes mesh-forge to shell pipelines and batch jobs: clean, repair,
//! decimate and score generated meshes, combine parts, and convert between
//! formats with an optional external converter.
//!
//! # Logging
//!
//! Set the `RUST_LOG` environment variable to control log output:
//! - `RUST_LOG=mesh_forge=info` - Stage summaries
//! - `RUST_LOG=mesh_forge=debug` - Per-attempt and per-iteration details
//! - `RUST_LOG=mesh_forge::timing=debug` - Performance timing
//! - `RUST_LOG=debug` - All debug output
//!
//! # Example
//!
//! ```bash
//! # Process a generated asset down to 20k faces
//! mesh process model.glb -o clean.glb --target-faces 20000
//!
//! # CAD hand-off through an external converter, falling back to the built-in writer
//! mesh convert clean.glb -o part.step --backend /opt/freecad/bin/freecadcmd
//!
//! # Batch with a pipeline file
//! mesh batch scans/*.ply --out-dir out --config pipeline.toml --jobs 4
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use mesh_forge::{BooleanOp, Scale};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod output;

use commands::{batch, combine, convert, formats, process, score};

/// mesh - post-processing for generated 3D meshes.
///
/// Clean, repair, decimate, score, combine and convert triangle meshes.
#[derive(Parser)]
#[command(name = "mesh")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for results
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Suppress all non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

/// Processing flags shared by `process` and `batch`.
#[derive(clap::Args, Clone, Default)]
pub struct ProcessArgs {
    /// Face budget for the first attempt
    #[arg(long)]
    target_faces: Option<usize>,

    /// Score an attempt must reach to be accepted (1-10)
    #[arg(long)]
    min_quality: Option<f64>,

    /// Maximum number of attempts
    #[arg(long)]
    max_retries: Option<usize>,

    /// Skip the cleanup stage
    #[arg(long)]
    no_clean: bool,

    /// Skip the repair stage
    #[arg(long)]
    no_repair: bool,

    /// Skip the decimation stage
    #[arg(long)]
    no_decimate: bool,

    /// Skip the smoothing stage
    #[arg(long)]
    no_smooth: bool,

    /// Keep every connected component instead of dropping small debris
    #[arg(long)]
    keep_all_components: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean, repair, decimate and smooth a mesh until it scores well enough
    Process {
        /// Input mesh file
        input: PathBuf,

        /// Output file path (format determined by extension)
        #[arg(short, long)]
        output: PathBuf,

        /// Pipeline file (TOML) providing defaults for the flags below
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        process: ProcessArgs,
    },

    /// Report quality metrics without modifying the mesh
    Score {
        /// Input mesh file
        input: PathBuf,
    },

    /// Combine two meshes with a boolean operator or by concatenation
    Combine {
        /// Primary mesh file
        primary: PathBuf,

        /// Secondary mesh file
        #[arg(long)]
        secondary: Option<PathBuf>,

        /// Operator
        #[arg(long, default_value = "concatenate", value_parser = parse_operator)]
        op: BooleanOp,

        /// Scale of the primary: one factor or "x,y,z"
        #[arg(long, value_parser = parse_scale)]
        primary_scale: Option<Scale>,

        /// Translation of the primary: "x,y,z"
        #[arg(long, value_parser = parse_vector, allow_hyphen_values = true)]
        primary_translate: Option<[f64; 3]>,

        /// Scale of the secondary: one factor or "x,y,z"
        #[arg(long, value_parser = parse_scale)]
        scale: Option<Scale>,

        /// Translation of the secondary: "x,y,z"
        #[arg(long, value_parser = parse_vector, allow_hyphen_values = true)]
        translate: Option<[f64; 3]>,

        /// Output file path (format determined by extension)
        #[arg(short, long)]
        output: PathBuf,

        /// Write the raw combined mesh without running the processing pipeline
        #[arg(long)]
        no_process: bool,

        #[command(flatten)]
        process: ProcessArgs,
    },

    /// Convert a mesh between formats
    Convert {
        /// Input mesh file
        input: PathBuf,

        /// Output file path (format determined by extension)
        #[arg(short, long)]
        output: PathBuf,

        /// External converter executable for STEP and DXF
        #[arg(long)]
        backend: Option<PathBuf>,

        /// External converter timeout in seconds
        #[arg(long, default_value = "120")]
        timeout: f64,

        /// Merge vertices closer than this before a built-in export
        #[arg(long)]
        tolerance: Option<f64>,
    },

    /// Run the pipeline over many files on a bounded worker pool
    Batch {
        /// Input mesh files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Directory for the exported files
        #[arg(long)]
        out_dir: PathBuf,

        /// Maximum files processed at once
        #[arg(long, short)]
        jobs: Option<usize>,

        /// Pipeline file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Stop scheduling new files after the first failure
        #[arg(long)]
        fail_fast: bool,

        #[command(flatten)]
        process: ProcessArgs,
    },

    /// List supported formats and which backend writes them
    Formats,
}

fn parse_operator(s: &str) -> Result<BooleanOp, String> {
    s.parse()
}

fn parse_vector(s: &str) -> Result<[f64; 3], String> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("{:?}: {}", p, e)))
        .collect::<Result<_, _>>()?;
    match parts.as_slice() {
        &[x, y, z] => Ok([x, y, z]),
        _ => Err(format!("expected \"x,y,z\", got {:?}", s)),
    }
}

fn parse_scale(s: &str) -> Result<Scale, String> {
    if s.contains(',') {
        parse_vector(s).map(Scale::PerAxis)
    } else {
        s.trim()
            .parse::<f64>()
            .map(Scale::Uniform)
            .map_err(|e| format!("{:?}: {}", s, e))
    }
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, quiet: bool) {
    // Check RUST_LOG first, then fall back to -v flags
    let filter = if quiet {
        EnvFilter::new("error")
    } else if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "mesh_forge=info",
            2 => "mesh_forge=debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    // Install miette's panic hook for better error display
    #[cfg(debug_assertions)]
    miette::set_panic_hook();

    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Process {
            input,
            output,
            config,
            process: args,
        } => process::run(input, output, config.as_deref(), args, &cli),
        Commands::Score { input } => score::run(input, &cli),
        Commands::Combine {
            primary,
            secondary,
            op,
            primary_scale,
            primary_translate,
            scale,
            translate,
            output,
            no_process,
            process: args,
        } => combine::run(
            combine::CombineArgs {
                primary,
                secondary: secondary.as_deref(),
                op: *op,
                primary_transform: combine::transform(*primary_scale, *primary_translate),
                secondary_transform: combine::transform(*scale, *translate),
                output,
                process: (!*no_process).then(|| args.apply(mesh_forge::ProcessConfig::default())),
            },
            &cli,
        ),
        Commands::Convert {
            input,
            output,
            backend,
            timeout,
            tolerance,
        } => convert::run(input, output, backend.as_deref(), *timeout, *tolerance, &cli),
        Commands::Batch {
            inputs,
            out_dir,
            jobs,
            config,
            fail_fast,
            process: args,
        } => batch::run(
            inputs,
            out_dir,
            *jobs,
            config.as_deref(),
            *fail_fast,
            args,
            &cli,
        ),
        Commands::Formats => formats::run(&cli),
    };

    if let Err(e) = &result {
        if !cli.quiet {
            if let Some(mesh_err) = e.downcast_ref::<mesh_forge::MeshError>() {
                eprintln!("{}: {}", "Error".red().bold(), mesh_err);
                eprintln!("  {}: {}", "Code".cyan(), mesh_err.code());
                eprintln!(
                    "  {}: {}",
                    "Suggestion".green(),
                    mesh_err.recovery_suggestion()
                );
                if let Some(location) = mesh_err.location() {
                    eprintln!("  {}: {}", "Location".yellow(), location);
                }
            } else {
                eprintln!("{}: {}", "Error".red().bold(), e);
                for cause in e.chain().skip(1) {
                    eprintln!("  {}: {}", "Caused by".yellow(), cause);
                }
            }
        }
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vector() {
        assert_eq!(parse_vector("1,-2.5, 3").unwrap(), [1.0, -2.5, 3.0]);
        assert!(parse_vector("1,2").is_err());
        assert!(parse_vector("a,b,c").is_err());
    }

    #[test]
    fn test_parse_scale() {
        assert_eq!(parse_scale("2").unwrap(), Scale::Uniform(2.0));
        assert_eq!(parse_scale("1,2,3").unwrap(), Scale::PerAxis([1.0, 2.0, 3.0]));
        assert!(parse_scale("big").is_err());
    }

    #[test]
    fn test_cli_parses_combine() {
        let cli = Cli::try_parse_from([
            "mesh",
            "combine",
            "a.stl",
            "--secondary",
            "b.stl",
            "--op",
            "union",
            "--translate",
            "-1,0,2",
            "-o",
            "out.glb",
        ])
        .unwrap();
        match cli.command {
            Commands::Combine {
                op,
                translate,
                primary_translate,
                no_process,
                ..
            } => {
                assert_eq!(op, BooleanOp::Union);
                assert_eq!(translate, Some([-1.0, 0.0, 2.0]));
                assert_eq!(primary_translate, None);
                assert!(!no_process);
            }
            _ => panic!("expected combine"),
        }
    }

    #[test]
    fn test_cli_combine_primary_transform_and_opt_out() {
        let cli = Cli::try_parse_from([
            "mesh",
            "combine",
            "a.stl",
            "--primary-scale",
            "1,2,3",
            "--primary-translate",
            "0,-5,0",
            "--no-process",
            "--no-smooth",
            "-o",
            "out.stl",
        ])
        .unwrap();
        match cli.command {
            Commands::Combine {
                primary_scale,
                primary_translate,
                no_process,
                process,
                ..
            } => {
                assert_eq!(primary_scale, Some(Scale::PerAxis([1.0, 2.0, 3.0])));
                assert_eq!(primary_translate, Some([0.0, -5.0, 0.0]));
                assert!(no_process);
                assert!(process.no_smooth);
            }
            _ => panic!("expected combine"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_operator() {
        assert!(
            Cli::try_parse_from(["mesh", "combine", "a.stl", "--op", "xor", "-o", "o.stl"])
                .is_err()
        );
    }
}
