//! Error types for the autotuner.
//!
//! Only two conditions are fatal to a search run: a baseline that fails to
//! compile or execute (no budget can exist without it), and I/O failure on
//! the search run itself. Everything else - a missing nest, a variant that
//! fails to compile or crashes, a trial over budget - is recorded per trial
//! and the search continues.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for a tuning run.
#[derive(Error, Debug)]
pub enum TuneError {
    /// Input kernel source does not exist or cannot be read.
    #[error("input source not found: {path}: {source}")]
    InputNotFound {
        /// Path that was requested
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The untiled baseline failed to compile or run. Fatal: every trial
    /// is classified against the baseline's wall time.
    #[error("baseline failed: {0}")]
    BaselineFailure(String),

    /// A synthesized region ended up with mismatched braces. Indicates a
    /// malformed input nest; the variant is never written.
    #[error("emitted region is not brace-balanced ({opens} opening vs {closes} closing)")]
    UnbalancedRegion {
        /// Count of `{` in the emitted region
        opens: usize,
        /// Count of `}` in the emitted region
        closes: usize,
    },

    /// Toolchain-level failure that is not attributable to a single trial.
    #[error("toolchain error: {0}")]
    Toolchain(#[from] ToolchainError),

    /// I/O error on the search run itself (work dir, artifacts, result sink).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error from the external compiler or a spawned child process.
#[derive(Error, Debug)]
pub enum ToolchainError {
    /// The compiler exited non-zero; carries its diagnostics.
    #[error("compilation failed: {0}")]
    CompileFailed(String),

    /// The compiler or child binary could not be launched at all.
    #[error("failed to launch process: {0}")]
    Spawn(String),

    /// The child ran but could not be awaited or observed.
    #[error("child process could not be observed: {0}")]
    Observe(String),
}

/// Result type using TuneError.
pub type TuneResult<T> = Result<T, TuneError>;
