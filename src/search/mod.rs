//! Search-space generation for tiling strategies.
//!
//! A strategy is a loop order crossed with a tile size. For each spatial
//! dimension `d` there is a (tile, point) pair `(d_t, d)`; a loop order is
//! *legal* iff it is an interleaving of the pairs that keeps every tile
//! loop before its own point loop. For n pairs there are (2n)!/2^n legal
//! orders (90 for the usual three dimensions).
//!
//! Generation is deterministic, total, and side-effect free. Whether a
//! particular order is semantically valid for a dependent kernel body is
//! not checked here.

use serde::Serialize;
use std::fmt;

/// Role a loop plays in a tiling plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum LoopRole {
    /// Outer loop stepping over fixed-size blocks of a dimension.
    Tile,
    /// Inner loop visiting points, clamped to the tile window and the
    /// original domain bound. Also used for untiled passthrough dimensions.
    Point,
}

/// One loop of a tiling plan: a base dimension name plus its role.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct LoopLabel {
    /// Base dimension name (e.g. `i`)
    pub dim: String,
    /// Tile or point
    pub role: LoopRole,
}

impl LoopLabel {
    /// Tile loop over `dim`.
    pub fn tile(dim: &str) -> Self {
        Self { dim: dim.to_string(), role: LoopRole::Tile }
    }

    /// Point loop over `dim`.
    pub fn point(dim: &str) -> Self {
        Self { dim: dim.to_string(), role: LoopRole::Point }
    }

    /// The C variable this loop iterates (`i_t` for tile, `i` for point).
    pub fn var(&self) -> String {
        match self.role {
            LoopRole::Tile => format!("{}_t", self.dim),
            LoopRole::Point => self.dim.clone(),
        }
    }
}

impl fmt::Display for LoopLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.var())
    }
}

/// An ordered loop sequence plus the uniform tile size shared by every
/// tiled dimension.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TilingPlan {
    /// Loop order, outermost first
    pub order: Vec<LoopLabel>,
    /// Tile size applied to every tiled dimension
    pub tile_size: usize,
}

impl TilingPlan {
    /// Create a plan from an order and a tile size.
    pub fn new(order: Vec<LoopLabel>, tile_size: usize) -> Self {
        Self { order, tile_size }
    }

    /// A plan is legal iff no point loop precedes its own tile loop.
    pub fn is_legal(&self) -> bool {
        for (idx, label) in self.order.iter().enumerate() {
            if label.role == LoopRole::Point {
                let tile_pos = self
                    .order
                    .iter()
                    .position(|l| l.dim == label.dim && l.role == LoopRole::Tile);
                if let Some(t) = tile_pos {
                    if t > idx {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Whether `dim` has a tile loop anywhere in the order. A point loop
    /// without one is an untiled passthrough dimension and ignores the
    /// plan's tile size.
    pub fn has_tile_for(&self, dim: &str) -> bool {
        self.order
            .iter()
            .any(|l| l.dim == dim && l.role == LoopRole::Tile)
    }

    /// Compact order encoding for file names and result records,
    /// e.g. `i_tj_tk_tijk`.
    pub fn order_string(&self) -> String {
        self.order.iter().map(|l| l.var()).collect()
    }
}

impl fmt::Display for TilingPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.order_string(), self.tile_size)
    }
}

/// Enumerate every legal interleaving of the (tile, point) pairs for the
/// given dimensions, preserving each pair's internal order.
///
/// Backtracking selection: at each step pick any dimension whose next
/// unemitted element (tile first, then point) is still available, emit it,
/// recurse, undo. Exhaustive and duplicate-free; yields (2n)!/2^n orders.
pub fn legal_orders(dims: &[&str]) -> Vec<Vec<LoopLabel>> {
    let n = dims.len();
    let mut emitted = vec![0usize; n]; // 0 = nothing, 1 = tile, 2 = both
    let mut current: Vec<LoopLabel> = Vec::with_capacity(2 * n);
    let mut out = Vec::new();

    fn recurse(
        dims: &[&str],
        emitted: &mut [usize],
        current: &mut Vec<LoopLabel>,
        out: &mut Vec<Vec<LoopLabel>>,
    ) {
        if current.len() == dims.len() * 2 {
            out.push(current.clone());
            return;
        }
        for (i, dim) in dims.iter().enumerate() {
            if emitted[i] < 2 {
                let label = if emitted[i] == 0 {
                    LoopLabel::tile(dim)
                } else {
                    LoopLabel::point(dim)
                };
                current.push(label);
                emitted[i] += 1;
                recurse(dims, emitted, current, out);
                emitted[i] -= 1;
                current.pop();
            }
        }
    }

    recurse(dims, &mut emitted, &mut current, &mut out);
    out
}

/// Cross product of legal orders with candidate tile sizes. Every plan
/// uses one uniform size across all tiled dimensions.
pub fn search_space(dims: &[&str], tile_sizes: &[usize]) -> Vec<TilingPlan> {
    let mut plans = Vec::new();
    for order in legal_orders(dims) {
        for &size in tile_sizes {
            plans.push(TilingPlan::new(order.clone(), size));
        }
    }
    plans
}

/// Generalized search space with outer (never tiled, fixed-position)
/// dimensions, e.g. a temporal `t` loop of a stencil. The order is always
/// outer dimensions, then some permutation of the tile loops, then some
/// permutation of the point loops.
pub fn outer_spatial_space(
    outer: &[&str],
    spatial: &[&str],
    tile_sizes: &[usize],
) -> Vec<TilingPlan> {
    let tile_labels: Vec<LoopLabel> = spatial.iter().map(|d| LoopLabel::tile(d)).collect();
    let point_labels: Vec<LoopLabel> = spatial.iter().map(|d| LoopLabel::point(d)).collect();

    let mut plans = Vec::new();
    for tile_perm in permutations(&tile_labels) {
        for point_perm in permutations(&point_labels) {
            let mut order: Vec<LoopLabel> =
                outer.iter().map(|d| LoopLabel::point(d)).collect();
            order.extend(tile_perm.iter().cloned());
            order.extend(point_perm.iter().cloned());
            for &size in tile_sizes {
                plans.push(TilingPlan::new(order.clone(), size));
            }
        }
    }
    plans
}

/// All permutations of `items`, in a stable order.
fn permutations<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
    if items.is_empty() {
        return vec![vec![]];
    }
    let mut out = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let head = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, head.clone());
            out.push(tail);
        }
    }
    out
}
