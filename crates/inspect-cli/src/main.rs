//! cloud-inspect: Command-line interface for the point cloud inspection
//! pipeline.
//!
//! # Logging
//!
//! Set the `RUST_LOG` environment variable to control log output:
//! - `RUST_LOG=cloud_inspect=info` - Basic operation logging
//! - `RUST_LOG=cloud_inspect=debug` - Detailed progress logging
//! - `RUST_LOG=cloud_inspect::timing=debug` - Performance timing
//! - `RUST_LOG=debug` - All debug output
//!
//! # Example
//!
//! ```bash
//! # Process one cloud with info logging
//! RUST_LOG=cloud_inspect=info cloud-inspect file scan.ply -o out/
//!
//! # Batch-process scan subfolders with an external generator
//! cloud-inspect run scans/ -o out/ --generator /opt/scanner/range-image-gen
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use miette::Diagnostic;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cloud_inspect::{
    pipeline, BatchEngine, CloudError, CloudPipeline, GeneratorCommand, ProcessingParams,
    ReconstructionParams, RunSummary,
};

/// cloud-inspect - Flag high-curvature anomalies in scanned point clouds and
/// reconstruct density-filtered meshes.
#[derive(Parser)]
#[command(name = "cloud-inspect")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Suppress all non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every scan subfolder under a root directory
    Run {
        /// Root directory containing scan subfolders
        root: PathBuf,

        /// Output directory (mirrors the subfolder layout)
        #[arg(short, long)]
        output: PathBuf,

        /// External raw-cloud generator to run per subfolder
        #[arg(long)]
        generator: Option<PathBuf>,

        /// Generator deadline in seconds
        #[arg(long, default_value = "600")]
        generator_timeout: u64,

        /// Worker count (default: cores minus 4, capped at 100)
        #[arg(long)]
        workers: Option<usize>,

        #[command(flatten)]
        params: ParamArgs,
    },

    /// Process a single .ply cloud file
    File {
        /// Input point cloud file
        input: PathBuf,

        /// Output directory for the three artifacts
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        params: ParamArgs,
    },
}

#[derive(Args)]
struct ParamArgs {
    /// Neighborhood radius; zero selects per-point thresholding, a negative
    /// value is used as its absolute value
    #[arg(long, default_value = "0.1", value_parser = parse_roi_radius)]
    roi_radius: f64,

    /// Curvature threshold (per-point) or curvature-variance threshold
    /// (neighborhood mode)
    #[arg(long, default_value = "0.1", value_parser = parse_threshold)]
    curvature_threshold: f64,

    /// Fraction by which curvature neighborhoods shrink, in [0, 1]
    #[arg(long, default_value = "0.1", value_parser = parse_unit_interval)]
    erosion_ratio: f64,

    /// Minimum normalized density for mesh vertices, in [0, 1]
    #[arg(long, default_value = "0.1", value_parser = parse_unit_interval)]
    density_threshold: f64,

    /// Octree depth for reconstruction (grid capped at 64 cells per axis)
    #[arg(long, default_value = "9")]
    depth: u32,
}

impl ParamArgs {
    fn processing(&self) -> ProcessingParams {
        ProcessingParams {
            roi_radius: self.roi_radius,
            curvature_threshold: self.curvature_threshold,
            erosion_ratio: self.erosion_ratio,
            density_threshold: self.density_threshold,
        }
    }

    fn reconstruction(&self) -> ReconstructionParams {
        ReconstructionParams {
            octree_depth: self.depth,
            ..Default::default()
        }
    }
}

fn parse_roi_radius(s: &str) -> Result<f64, String> {
    let v: f64 = s.parse().map_err(|_| format!("`{s}` is not a number"))?;
    if !v.is_finite() || v.abs() > 100.0 {
        return Err(format!("radius {v} is outside [-100, 100]"));
    }
    Ok(v)
}

fn parse_threshold(s: &str) -> Result<f64, String> {
    let v: f64 = s.parse().map_err(|_| format!("`{s}` is not a number"))?;
    if !v.is_finite() || v <= 0.0 || v > 1.0 {
        return Err(format!("threshold {v} is outside (0, 1]"));
    }
    Ok(v)
}

fn parse_unit_interval(s: &str) -> Result<f64, String> {
    let v: f64 = s.parse().map_err(|_| format!("`{s}` is not a number"))?;
    if !v.is_finite() || !(0.0..=1.0).contains(&v) {
        return Err(format!("value {v} is outside [0, 1]"));
    }
    Ok(v)
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    // RUST_LOG wins over -v flags when set.
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "cloud_inspect=info",
            2 => "cloud_inspect=debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn print_summary(summary: &RunSummary) {
    println!("{}", "Run summary".bold());
    println!("  Subfolders:      {}", summary.subfolders);
    println!("  Files processed: {}", summary.files_total());
    println!(
        "  Succeeded:       {}",
        summary.files_succeeded.to_string().green()
    );

    if !summary.file_failures.is_empty() {
        println!(
            "  Failed:          {}",
            summary.file_failures.len().to_string().red()
        );
        for outcome in &summary.file_failures {
            if let Err(details) = &outcome.result {
                println!("    {} {}", outcome.path.display(), details.red());
            }
        }
    }

    if !summary.generator_failures.is_empty() {
        println!(
            "  Generator failures: {}",
            summary.generator_failures.len().to_string().red()
        );
        for (subfolder, details) in &summary.generator_failures {
            println!("    {} {}", subfolder.display(), details.red());
        }
    }
}

fn run_batch(
    root: &PathBuf,
    output: &PathBuf,
    generator: Option<&PathBuf>,
    generator_timeout: u64,
    workers: Option<usize>,
    params: &ParamArgs,
    quiet: bool,
) -> Result<()> {
    let engine = match workers {
        Some(n) => BatchEngine::new(n)?,
        None => BatchEngine::with_default_workers()?,
    };

    let generator = generator.map(|program| {
        GeneratorCommand::new(program).with_timeout(Duration::from_secs(generator_timeout))
    });

    let pipeline = CloudPipeline::new(
        params.processing(),
        params.reconstruction(),
        generator,
        engine,
    );

    let summary = pipeline.run(root, output)?;

    if !quiet {
        print_summary(&summary);
    }

    // A run that completed exits zero even with per-file failures; the
    // summary and logs carry the failure detail.
    Ok(())
}

fn run_file(input: &PathBuf, output: &PathBuf, params: &ParamArgs, quiet: bool) -> Result<()> {
    std::fs::create_dir_all(output)?;

    let artifacts =
        pipeline::process_file(input, output, params.processing(), params.reconstruction())?;

    if !quiet {
        println!("{}", "Artifacts".bold());
        println!("  {}", artifacts.colored_cloud.display());
        println!("  {}", artifacts.original_mesh.display());
        println!("  {}", artifacts.colored_mesh.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    // Nicer panic reports during development.
    #[cfg(debug_assertions)]
    miette::set_panic_hook();

    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Run {
            root,
            output,
            generator,
            generator_timeout,
            workers,
            params,
        } => run_batch(
            root,
            output,
            generator.as_ref(),
            *generator_timeout,
            *workers,
            params,
            cli.quiet,
        ),
        Commands::File {
            input,
            output,
            params,
        } => run_file(input, output, params, cli.quiet),
    };

    if let Err(e) = &result {
        if !cli.quiet {
            if let Some(cloud_err) = e.downcast_ref::<CloudError>() {
                eprintln!("{}: {}", "Error".red().bold(), cloud_err);
                eprintln!("  {}: {}", "Code".cyan(), cloud_err.code());
                if let Some(help) = cloud_err.help() {
                    eprintln!("  {}: {}", "Suggestion".green(), help);
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
    fn cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn radius_validation() {
        assert!(parse_roi_radius("0.5").is_ok());
        assert!(parse_roi_radius("-0.5").is_ok());
        assert!(parse_roi_radius("150").is_err());
        assert!(parse_roi_radius("nan").is_err());
    }

    #[test]
    fn threshold_validation() {
        assert!(parse_threshold("0.0003").is_ok());
        assert!(parse_threshold("1").is_ok());
        assert!(parse_threshold("0").is_err());
        assert!(parse_threshold("1.5").is_err());
    }

    #[test]
    fn unit_interval_validation() {
        assert!(parse_unit_interval("0").is_ok());
        assert!(parse_unit_interval("1").is_ok());
        assert!(parse_unit_interval("-0.1").is_err());
        assert!(parse_unit_interval("2").is_err());
    }
}
