//! TileTune Command Line Interface
//!
//! Usage:
//!   tiletune [OPTIONS] <input-file>
//!   tiletune --help
//!
//! Examples:
//!   tiletune conv3d.c                          # Full tuning run with defaults
//!   tiletune --tile-sizes=16,64 conv3d.c       # Restrict the tile-size ladder
//!   tiletune --emit=variants conv3d.c          # Only synthesize the tiled sources
//!   tiletune --scop --nest=1 seidel.c          # Target a #pragma scop region
//!   tiletune --dims i=DEPTH --dims j=HEIGHT conv3d.c  # Explicit bounds

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::{debug, info};
use std::path::PathBuf;
use tiletune::prelude::*;

/// TileTune - Empirical loop-nest tiling autotuner for C kernels
#[derive(Parser, Debug)]
#[command(name = "tiletune")]
#[command(version)]
#[command(about = "Enumerate, compile, and time tiling strategies for a C loop nest", long_about = None)]
struct Cli {
    /// Input C source containing the target loop nest
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// What to produce
    #[arg(long, default_value = "tune")]
    emit: EmitKind,

    /// Working directory for generated sources and binaries
    #[arg(long, value_name = "DIR", default_value = "/tmp/tiletune")]
    work_dir: PathBuf,

    /// CSV result file (defaults to <work-dir>/results.csv)
    #[arg(long, value_name = "FILE")]
    csv: Option<PathBuf>,

    /// C compiler to invoke
    #[arg(long, default_value = "clang")]
    compiler: String,

    /// Compiler flag, repeatable (replaces the default -O3 -march=native
    /// -funroll-loops set when given)
    #[arg(long = "flag", value_name = "FLAG")]
    flags: Vec<String>,

    /// Candidate tile sizes (comma-separated)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    tile_sizes: Option<Vec<usize>>,

    /// 1-based ordinal of the target nest within the scan region
    #[arg(long, default_value = "1")]
    nest: usize,

    /// Scan between #pragma scop / #pragma endscop markers instead of
    /// inside main
    #[arg(long)]
    scop: bool,

    /// Explicit dimension bound, repeatable (e.g. --dims i=DEPTH)
    #[arg(long = "dims", value_name = "DIM=BOUND")]
    dims: Vec<String>,

    /// Untiled outer dimensions in fixed position (comma-separated,
    /// e.g. a stencil's temporal loop)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    outer_dims: Option<Vec<String>>,

    /// Tiled spatial dimensions (comma-separated)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    spatial_dims: Option<Vec<String>>,

    /// Infer missing bounds from #define names by convention
    /// (depth/height/width); inferred trials are flagged
    #[arg(long)]
    infer_bounds: bool,

    /// Skip cycle-count instrumentation
    #[arg(long)]
    no_instrument: bool,

    /// Compare wall time against the budget only after each child exits,
    /// instead of killing it at the deadline
    #[arg(long)]
    no_kill: bool,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress warnings)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmitKind {
    /// The search space as JSON, without touching the input
    Plans,
    /// Every tiled source variant, without compiling or running
    Variants,
    /// The full search: baseline, all trials, CSV results
    Tune,
}

const DEFAULT_FLAGS: &[&str] = &["-O3", "-march=native", "-funroll-loops"];

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        log::LevelFilter::Error
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    info!("TileTune v{}", tiletune::VERSION);
    debug!("Input file: {:?}", cli.input);

    let config = build_config(&cli)?;
    debug!("Tuner config: {:?}", config);

    match cli.emit {
        EmitKind::Plans => {
            let tuner = Tuner::new(
                config,
                Box::new(FakePlansToolchain),
                Box::new(MemorySink::new()),
            );
            let plans = tuner.search_space();
            println!("{}", serde_json::to_string_pretty(&plans)?);
        }
        EmitKind::Variants => {
            let tuner = Tuner::new(
                config,
                Box::new(FakePlansToolchain),
                Box::new(MemorySink::new()),
            );
            let paths = tuner
                .generate_variants(&cli.input)
                .with_context(|| format!("failed to generate variants for {:?}", cli.input))?;
            println!("{} variants written", paths.len());
            for path in &paths {
                println!("{}", path.display());
            }
        }
        EmitKind::Tune => {
            let flags = if cli.flags.is_empty() {
                DEFAULT_FLAGS.iter().map(|f| f.to_string()).collect()
            } else {
                cli.flags.clone()
            };
            let toolchain = SystemToolchain::new(&cli.compiler, flags);

            let csv_path = cli
                .csv
                .clone()
                .unwrap_or_else(|| cli.work_dir.join("results.csv"));
            std::fs::create_dir_all(&cli.work_dir)
                .with_context(|| format!("failed to create work dir {:?}", cli.work_dir))?;
            let sink = CsvSink::create(&csv_path)
                .with_context(|| format!("failed to create result file {:?}", csv_path))?;

            let mut tuner = Tuner::new(config, Box::new(toolchain), Box::new(sink));
            let summary = tuner
                .run(&cli.input)
                .with_context(|| format!("tuning run failed for {:?}", cli.input))?;

            summary.print();
            println!("Results: {}", csv_path.display());
        }
    }

    Ok(())
}

fn build_config(cli: &Cli) -> Result<TunerConfig> {
    let mut config = TunerConfig::new()
        .nest_ordinal(cli.nest)
        .work_dir(cli.work_dir.clone())
        .instrument(!cli.no_instrument);

    if cli.scop {
        config = config.region(ScanRegion::scop_pragmas());
    }
    if let Some(ref sizes) = cli.tile_sizes {
        config = config.tile_sizes(sizes.clone());
    }
    for entry in &cli.dims {
        let (dim, bound) = entry
            .split_once('=')
            .with_context(|| format!("--dims expects DIM=BOUND, got '{}'", entry))?;
        config = config.dimension_bound(dim, bound);
    }
    match (&cli.outer_dims, &cli.spatial_dims) {
        (Some(outer), Some(spatial)) => {
            config = config.outer_spatial(outer.clone(), spatial.clone());
        }
        (None, Some(spatial)) => {
            config = config.outer_spatial(vec![], spatial.clone());
        }
        (Some(_), None) => {
            bail!("--outer-dims requires --spatial-dims");
        }
        (None, None) => {}
    }
    config.infer_bounds = cli.infer_bounds;
    config.enforce_budget = !cli.no_kill;

    Ok(config)
}

/// Inert toolchain for artifact-only emit kinds, which never compile or
/// run anything.
struct FakePlansToolchain;

impl Toolchain for FakePlansToolchain {
    fn compile(&self, _source: &std::path::Path, _output: &std::path::Path) -> std::result::Result<(), ToolchainError> {
        Ok(())
    }

    fn run(
        &self,
        _exe: &std::path::Path,
        _deadline: Option<std::time::Duration>,
    ) -> std::result::Result<RunOutcome, ToolchainError> {
        Err(ToolchainError::Spawn("inert toolchain".to_string()))
    }
}
