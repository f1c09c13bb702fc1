//! Tuning run configuration.

use crate::locate::ScanRegion;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Configuration for a tuning run.
#[derive(Clone, Debug, Serialize)]
pub struct TunerConfig {
    /// Working directory for generated sources and binaries
    pub work_dir: PathBuf,

    /// Candidate tile sizes; each is crossed with every legal order
    pub tile_sizes: Vec<usize>,

    /// 1-based ordinal of the target nest within the scan region
    pub nest_ordinal: usize,

    /// Scan-region strategy
    pub region: ScanRegion,

    /// Spatial (tiled) dimension names, outermost first
    pub spatial_dims: Vec<String>,

    /// Outer dimensions kept untiled in fixed position (e.g. a temporal
    /// loop); empty for plain rectangular tiling
    pub outer_dims: Vec<String>,

    /// Explicit dimension → bound-expression mapping
    pub dimension_bounds: HashMap<String, String>,

    /// Fall back to convention-based `#define` inference for bounds.
    /// Inferred bounds flag the trial rather than being trusted silently.
    pub infer_bounds: bool,

    /// Inject cycle-count instrumentation around the nest
    pub instrument: bool,

    /// Kill a child once its wall time passes the baseline budget instead
    /// of only comparing after it exits
    pub enforce_budget: bool,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/tiletune"),
            tile_sizes: vec![8, 16, 32, 64, 128, 256, 512],
            nest_ordinal: 1,
            region: ScanRegion::main_function(),
            spatial_dims: vec!["i".to_string(), "j".to_string(), "k".to_string()],
            outer_dims: vec![],
            dimension_bounds: HashMap::new(),
            infer_bounds: false,
            instrument: true,
            enforce_budget: true,
        }
    }
}

impl TunerConfig {
    /// Config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set candidate tile sizes.
    pub fn tile_sizes(mut self, sizes: Vec<usize>) -> Self {
        self.tile_sizes = sizes;
        self
    }

    /// Set the target nest ordinal.
    pub fn nest_ordinal(mut self, ordinal: usize) -> Self {
        self.nest_ordinal = ordinal;
        self
    }

    /// Set the scan-region strategy.
    pub fn region(mut self, region: ScanRegion) -> Self {
        self.region = region;
        self
    }

    /// Set the working directory.
    pub fn work_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Set an explicit bound expression for one dimension.
    pub fn dimension_bound(mut self, dim: &str, bound: &str) -> Self {
        self.dimension_bounds.insert(dim.to_string(), bound.to_string());
        self
    }

    /// Enable or disable instrumentation.
    pub fn instrument(mut self, enabled: bool) -> Self {
        self.instrument = enabled;
        self
    }

    /// Split dimensions into untiled outer and tiled spatial sets.
    pub fn outer_spatial(mut self, outer: Vec<String>, spatial: Vec<String>) -> Self {
        self.outer_dims = outer;
        self.spatial_dims = spatial;
        self
    }

    /// Quick preset: a small tile-size set for fast exploration.
    pub fn quick() -> Self {
        Self {
            tile_sizes: vec![16, 64, 256],
            ..Default::default()
        }
    }

    /// Thorough preset: the full power-of-two ladder.
    pub fn thorough() -> Self {
        Self {
            tile_sizes: vec![4, 8, 16, 32, 64, 128, 256, 512, 1024],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        let config = TunerConfig::new()
            .tile_sizes(vec![32, 64])
            .nest_ordinal(2)
            .dimension_bound("i", "DEPTH")
            .instrument(false);

        assert_eq!(config.tile_sizes, vec![32, 64]);
        assert_eq!(config.nest_ordinal, 2);
        assert_eq!(config.dimension_bounds["i"], "DEPTH");
        assert!(!config.instrument);
    }

    #[test]
    fn test_presets_differ() {
        assert!(TunerConfig::quick().tile_sizes.len() < TunerConfig::thorough().tile_sizes.len());
    }
}
