//! # TileTune - Empirical Loop-Nest Tiling Autotuner
//!
//! TileTune takes a C kernel containing a triply-nested loop, enumerates
//! tiling strategies (legal loop interleavings crossed with tile sizes),
//! synthesizes one transformed source variant per strategy, then compiles,
//! runs, and times every variant against an untiled baseline.
//!
//! ## Architecture
//!
//! ```text
//! Source → Locate nest → Transform (tile) → Instrument → Compile/Run → Record
//!             ↑                ↑
//!         ScanRegion       TilingPlan (from the search-space generator)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use tiletune::prelude::*;
//!
//! let config = TunerConfig::default()
//!     .tile_sizes(vec![16, 32, 64])
//!     .nest_ordinal(2);
//!
//! let toolchain = SystemToolchain::new("clang", vec!["-O3".to_string()]);
//! let sink = CsvSink::create("results.csv")?;
//! let mut tuner = Tuner::new(config, Box::new(toolchain), Box::new(sink));
//! let summary = tuner.run("kernels/conv3d.c")?;
//! ```
//!
//! Dependence analysis is deliberately not performed: whether a given tile
//! order preserves the semantics of a loop-carried dependence is the
//! caller's responsibility.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod harness;
pub mod instrument;
pub mod locate;
pub mod search;
pub mod transform;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::config::TunerConfig;
    pub use crate::error::{ToolchainError, TuneError, TuneResult};
    pub use crate::harness::exec::{RunMetrics, RunOutcome, SystemToolchain, Toolchain};
    pub use crate::harness::results::{CsvSink, MemorySink, ResultSink, TrialRecord, TrialStatus};
    pub use crate::harness::{Baseline, Tuner, TuningSummary};
    pub use crate::locate::{find_nest, ForHeader, NestRegion, ScanRegion};
    pub use crate::search::{legal_orders, search_space, LoopLabel, LoopRole, TilingPlan};
    pub use crate::transform::{BoundResolver, TilingTransformer, TransformReport};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
