//! Source-to-source rectangular tiling.
//!
//! Given a located three-level nest and a tiling plan, synthesizes the
//! replacement region: one header per plan entry, the original innermost
//! body spliced back in under standardized variable names, and one closing
//! brace per opened loop. Everything outside the replaced span is
//! preserved byte-for-byte.
//!
//! Per plan entry the emitted header is:
//! - tile loop over `d`:   `for (int d_t = init; d_t < BOUND; d_t += T) {`
//! - point loop, paired:   `for (int d = d_t; d < d_t + T && d < BOUND; d++) {`
//! - point loop, unpaired: the original counted loop regenerated unchanged
//!   (an untiled passthrough dimension; its nominal tile size is ignored)
//!
//! The tile-window / domain-bound conjunction on paired point loops clamps
//! the final partial tile, so no remainder loop is needed.
//!
//! No dependence analysis is performed; whether a tile order is valid for
//! a dependent kernel body is the caller's responsibility.

mod rename;

pub use rename::rename_identifiers;

use crate::error::TuneError;
use crate::locate::{brace_delta, find_nest, ForHeader, NestRegion, ScanRegion};
use crate::search::{LoopRole, TilingPlan};
use log::warn;
use std::collections::HashMap;

/// Standardized point-loop variable names assigned to the nest's
/// dimensions, outer to inner.
pub const STANDARD_DIMS: [&str; 3] = ["i", "j", "k"];

/// Per-trial report of what the transform actually did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransformReport {
    /// Whether the nest was found and rewritten. False means the source
    /// was returned unchanged (a non-fatal, reportable outcome).
    pub applied: bool,
    /// Whether any dimension bound came from convention-based macro
    /// inference rather than an explicit mapping or the parsed header.
    pub inferred_bounds: bool,
    /// Plan dimensions absent from the located nest, skipped on emission.
    pub skipped_dims: Vec<String>,
}

/// Maps a spatial dimension to the bound expression its loops iterate to.
///
/// Resolution order: an explicit caller-supplied mapping wins; otherwise,
/// when macro inference is enabled, a `#define` whose name starts with the
/// dimension's conventional prefix (depth/height/width for i/j/k) is used
/// and the trial is flagged; otherwise the original parsed limit
/// expression is passed through.
#[derive(Clone, Debug, Default)]
pub struct BoundResolver {
    explicit: HashMap<String, String>,
    infer_macros: bool,
}

/// A resolved dimension bound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedBound {
    /// Bound expression to emit
    pub expr: String,
    /// True when the bound came from macro-name inference
    pub inferred: bool,
}

impl BoundResolver {
    /// Resolver with an explicit dimension → bound mapping.
    pub fn new(explicit: HashMap<String, String>) -> Self {
        Self { explicit, infer_macros: false }
    }

    /// Enable convention-based `#define` inference as a fallback.
    pub fn with_macro_inference(mut self, enabled: bool) -> Self {
        self.infer_macros = enabled;
        self
    }

    /// Resolve the bound for `dim`, whose original header is `header`.
    pub fn resolve(&self, dim: &str, header: &ForHeader, lines: &[String]) -> ResolvedBound {
        if let Some(expr) = self.explicit.get(dim) {
            return ResolvedBound { expr: expr.clone(), inferred: false };
        }
        if self.infer_macros {
            if let Some(name) = infer_dimension_macro(dim, lines) {
                return ResolvedBound { expr: name, inferred: true };
            }
        }
        ResolvedBound { expr: header.limit.clone(), inferred: false }
    }
}

/// Convention-based macro lookup: scan `#define` lines above `main` for a
/// name whose prefix denotes the dimension (depth → i, height → j,
/// width → k).
fn infer_dimension_macro(dim: &str, lines: &[String]) -> Option<String> {
    let prefix = match dim {
        "i" => "depth",
        "j" => "height",
        "k" => "width",
        _ => return None,
    };
    for line in lines {
        if line.contains("int main") {
            break;
        }
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("#define") {
            let mut parts = rest.split_whitespace();
            if let (Some(name), Some(_value)) = (parts.next(), parts.next()) {
                if name.to_lowercase().starts_with(prefix) {
                    return Some(name.to_string());
                }
            }
        }
    }
    None
}

/// The tiling transformer: a scan region, a target nest ordinal, and a
/// bound resolver.
#[derive(Clone, Debug)]
pub struct TilingTransformer {
    region: ScanRegion,
    ordinal: usize,
    resolver: BoundResolver,
    /// Rename the nest's variables to the standardized i/j/k set. Disabled
    /// for marker regions, where plans address the original variable names.
    rename_to_standard: bool,
}

impl TilingTransformer {
    /// Transformer targeting the `ordinal`-th nest in `region`.
    pub fn new(region: ScanRegion, ordinal: usize, resolver: BoundResolver) -> Self {
        let rename_to_standard = matches!(region, ScanRegion::FunctionToken(_));
        Self { region, ordinal, resolver, rename_to_standard }
    }

    /// Override variable standardization.
    pub fn rename_to_standard(mut self, enabled: bool) -> Self {
        self.rename_to_standard = enabled;
        self
    }

    /// Apply `plan` to the source. When the target nest is absent the
    /// input is returned unchanged with `applied = false`.
    pub fn apply(
        &self,
        lines: &[String],
        plan: &TilingPlan,
    ) -> Result<(Vec<String>, TransformReport), TuneError> {
        let nest = match find_nest(lines, &self.region, self.ordinal) {
            Some(nest) => nest,
            None => {
                warn!(
                    "no 3-level loop nest (ordinal {}) found; tiling not applied",
                    self.ordinal
                );
                return Ok((lines.to_vec(), TransformReport::default()));
            }
        };

        let mut report = TransformReport { applied: true, ..Default::default() };
        let emitted = self.emit_region(lines, &nest, plan, &mut report)?;

        // Structural balance postcondition for the replacement region.
        let opens: usize = emitted.iter().map(|l| l.matches('{').count()).sum();
        let closes: usize = emitted.iter().map(|l| l.matches('}').count()).sum();
        if opens != closes {
            return Err(TuneError::UnbalancedRegion { opens, closes });
        }

        let mut out = Vec::with_capacity(lines.len());
        out.extend_from_slice(&lines[..nest.start]);
        out.extend(emitted);
        out.extend_from_slice(&lines[nest.end + 1..]);
        Ok((out, report))
    }

    /// Synthesize the replacement lines for the nest region.
    fn emit_region(
        &self,
        lines: &[String],
        nest: &NestRegion,
        plan: &TilingPlan,
        report: &mut TransformReport,
    ) -> Result<Vec<String>, TuneError> {
        // Map original loop variables to the dimension names plans use.
        let var_map: HashMap<String, String> = if self.rename_to_standard {
            nest.vars()
                .iter()
                .zip(STANDARD_DIMS.iter())
                .map(|(orig, std)| (orig.to_string(), std.to_string()))
                .collect()
        } else {
            nest.vars()
                .iter()
                .map(|v| (v.to_string(), v.to_string()))
                .collect()
        };

        // Dimension name -> original header.
        let headers: HashMap<&str, &ForHeader> = nest
            .vars()
            .iter()
            .zip(nest.headers.iter())
            .map(|(orig, header)| (var_map[*orig].as_str(), header))
            .collect();

        let base_indent = indent_of(&lines[nest.start]);
        let mut indent = base_indent.clone();
        let mut out = Vec::new();
        let mut opened = 0usize;

        for label in &plan.order {
            let header = match headers.get(label.dim.as_str()) {
                Some(h) => *h,
                None => {
                    warn!("plan references unknown dimension '{}'; entry skipped", label.dim);
                    report.skipped_dims.push(label.dim.clone());
                    continue;
                }
            };
            let bound = self.resolver.resolve(&label.dim, header, lines);
            if bound.inferred {
                report.inferred_bounds = true;
            }

            let line = match label.role {
                LoopRole::Tile => format!(
                    "{}for (int {v} = {init}; {v} {cmp} {bound}; {v} += {tile}) {{",
                    indent,
                    v = label.var(),
                    init = header.init,
                    cmp = header.cmp,
                    bound = bound.expr,
                    tile = plan.tile_size,
                ),
                LoopRole::Point if plan.has_tile_for(&label.dim) => format!(
                    "{}for (int {v} = {t}; {v} < {t} + {tile} && {v} {cmp} {bound}; {v}++) {{",
                    indent,
                    v = label.dim,
                    t = format!("{}_t", label.dim),
                    tile = plan.tile_size,
                    cmp = header.cmp,
                    bound = bound.expr,
                ),
                // Untiled passthrough dimension: the original counted loop,
                // same start, comparator, and limit.
                LoopRole::Point => format!(
                    "{}for (int {v} = {init}; {v} {cmp} {bound}; {v}++) {{",
                    indent,
                    v = label.dim,
                    init = header.init,
                    cmp = header.cmp,
                    bound = bound.expr,
                ),
            };
            out.push(line);
            indent.push_str("    ");
            opened += 1;
        }

        // Splice the innermost body under the standardized names.
        for line in self.body_lines(lines, nest)? {
            if line.trim().is_empty() {
                out.push(String::new());
            } else {
                out.push(format!("{}{}", indent, rename_identifiers(line.trim(), &var_map)));
            }
        }

        // One closing brace per opened loop, innermost first.
        for _ in 0..opened {
            indent.truncate(indent.len().saturating_sub(4));
            out.push(format!("{}}}", indent));
        }

        Ok(out)
    }

    /// Lines strictly inside the innermost loop's block.
    fn body_lines<'a>(
        &self,
        lines: &'a [String],
        nest: &NestRegion,
    ) -> Result<&'a [String], TuneError> {
        let inner = nest.header_lines[2];
        let mut balance = 0i64;
        let mut opened = false;
        for (idx, line) in lines.iter().enumerate().skip(inner) {
            balance += brace_delta(line);
            if balance > 0 {
                opened = true;
            } else if opened {
                return Ok(&lines[inner + 1..idx]);
            }
        }
        // find_nest already balanced this span; reaching here means the
        // source changed underneath us.
        Err(TuneError::UnbalancedRegion { opens: 1, closes: 0 })
    }
}

/// Leading whitespace of a line.
fn indent_of(line: &str) -> String {
    line.chars().take_while(|c| c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{LoopLabel, TilingPlan};

    fn to_lines(source: &str) -> Vec<String> {
        source.lines().map(|l| l.to_string()).collect()
    }

    fn full_plan(tile: usize) -> TilingPlan {
        TilingPlan::new(
            vec![
                LoopLabel::tile("i"),
                LoopLabel::tile("j"),
                LoopLabel::tile("k"),
                LoopLabel::point("i"),
                LoopLabel::point("j"),
                LoopLabel::point("k"),
            ],
            tile,
        )
    }

    fn transformer() -> TilingTransformer {
        TilingTransformer::new(
            ScanRegion::main_function(),
            1,
            BoundResolver::default(),
        )
    }

    const KERNEL: &str = r#"
#include <stdio.h>
static int data[256][512][128];
int main() {
    for (int x = 0; x < 256; x++) {
        for (int y = 0; y < 512; y++) {
            for (int z = 0; z < 128; z++) {
                data[x][y][z] = x + y + z;
            }
        }
    }
    return 0;
}
"#;

    #[test]
    fn test_full_tiling_structure() {
        let lines = to_lines(KERNEL);
        let (out, report) = transformer().apply(&lines, &full_plan(64)).unwrap();
        assert!(report.applied);
        assert!(report.skipped_dims.is_empty());

        let region: Vec<&String> = out
            .iter()
            .filter(|l| l.contains("for (") || l.trim() == "}")
            .collect();
        // 6 headers + 6 closing braces + main's own closing brace.
        let headers: Vec<&&String> = region.iter().filter(|l| l.contains("for (")).collect();
        assert_eq!(headers.len(), 6);

        assert!(out.iter().any(|l| l
            .contains("for (int i_t = 0; i_t < 256; i_t += 64) {")));
        assert!(out.iter().any(|l| l
            .contains("for (int i = i_t; i < i_t + 64 && i < 256; i++) {")));
        assert!(out.iter().any(|l| l
            .contains("for (int j = j_t; j < j_t + 64 && j < 512; j++) {")));
        // Body renamed from x/y/z to i/j/k.
        assert!(out.iter().any(|l| l.contains("data[i][j][k] = i + j + k;")));
        assert!(!out.iter().any(|l| l.contains("data[x]")));
    }

    #[test]
    fn test_partial_tile_clamp_order() {
        // Order [i_t, j_t, i, j] over i in [0,256), j in [0,512) with
        // tile 64 emits 4 headers then body then 4 braces, and the i
        // point-loop test is `i < i_t + 64 && i < 256`.
        let plan = TilingPlan::new(
            vec![
                LoopLabel::tile("i"),
                LoopLabel::tile("j"),
                LoopLabel::point("i"),
                LoopLabel::point("j"),
            ],
            64,
        );
        let lines = to_lines(KERNEL);
        let (out, report) = transformer().apply(&lines, &plan).unwrap();
        assert!(report.applied);
        // k is absent from the plan, not skipped (skips are plan dims
        // missing from the nest).
        assert!(report.skipped_dims.is_empty());

        let headers: Vec<usize> = out
            .iter()
            .enumerate()
            .filter(|(_, l)| l.contains("for ("))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(headers.len(), 4);
        assert!(out[headers[2]].contains("i < i_t + 64 && i < 256"));

        // 4 consecutive closing braces after the body.
        let body_idx = out.iter().position(|l| l.contains("data[i]")).unwrap();
        for off in 1..=4 {
            assert_eq!(out[body_idx + off].trim(), "}");
        }
    }

    #[test]
    fn test_surrounding_lines_byte_for_byte() {
        let lines = to_lines(KERNEL);
        let (out, _) = transformer().apply(&lines, &full_plan(32)).unwrap();

        // Everything before the nest and after it is untouched.
        assert_eq!(out[..4], lines[..4]);
        let tail_out = &out[out.len() - 2..];
        let tail_in = &lines[lines.len() - 2..];
        assert_eq!(tail_out, tail_in);
    }

    #[test]
    fn test_region_brace_balance() {
        let lines = to_lines(KERNEL);
        let (out, _) = transformer().apply(&lines, &full_plan(8)).unwrap();
        let opens: usize = out.iter().map(|l| l.matches('{').count()).sum();
        let closes: usize = out.iter().map(|l| l.matches('}').count()).sum();
        assert_eq!(opens, closes);
    }

    #[test]
    fn test_oversized_tile_keeps_domain_bound() {
        // Tile >= extent: the point loop's conjunction degenerates to the
        // domain bound; a single full tile covers the whole range.
        let lines = to_lines(KERNEL);
        let (out, _) = transformer().apply(&lines, &full_plan(512)).unwrap();
        assert!(out.iter().any(|l| l
            .contains("for (int k = k_t; k < k_t + 512 && k < 128; k++) {")));
    }

    #[test]
    fn test_decreasing_nest_left_unchanged() {
        // Downward-counting loops are not recognized as tiling candidates:
        // an increment-stepped tile loop over them would never terminate.
        let source = r#"
int main() {
    for (int x = 63; x > 0; x--) {
        for (int y = 63; y > 0; y--) {
            for (int z = 63; z > 0; z--) {
                work(x, y, z);
            }
        }
    }
    return 0;
}
"#;
        let lines = to_lines(source);
        let (out, report) = transformer().apply(&lines, &full_plan(8)).unwrap();
        assert!(!report.applied);
        assert_eq!(out, lines);
        assert!(!out.iter().any(|l| l.contains("i_t")));
    }

    #[test]
    fn test_nest_not_found_is_noop() {
        let source = "int main() {\n    return 0;\n}";
        let lines = to_lines(source);
        let (out, report) = transformer().apply(&lines, &full_plan(64)).unwrap();
        assert!(!report.applied);
        assert_eq!(out, lines);
    }

    #[test]
    fn test_unknown_dimension_skipped() {
        let mut plan = full_plan(64);
        plan.order.push(LoopLabel::point("q"));
        let lines = to_lines(KERNEL);
        let (out, report) = transformer().apply(&lines, &plan).unwrap();
        assert!(report.applied);
        assert_eq!(report.skipped_dims, vec!["q".to_string()]);
        // Still balanced: closing braces follow opened loops, not plan length.
        let opens: usize = out.iter().map(|l| l.matches('{').count()).sum();
        let closes: usize = out.iter().map(|l| l.matches('}').count()).sum();
        assert_eq!(opens, closes);
    }

    #[test]
    fn test_untiled_passthrough_dimension() {
        // j appears only as a point loop: original header regenerated,
        // tile size ignored for it.
        let plan = TilingPlan::new(
            vec![
                LoopLabel::tile("i"),
                LoopLabel::point("i"),
                LoopLabel::point("j"),
                LoopLabel::point("k"),
            ],
            64,
        );
        let lines = to_lines(KERNEL);
        let (out, _) = transformer().apply(&lines, &plan).unwrap();
        assert!(out.iter().any(|l| l.contains("for (int j = 0; j < 512; j++) {")));
        assert!(!out.iter().any(|l| l.contains("j_t")));
    }

    #[test]
    fn test_explicit_bounds_override() {
        let mut bounds = HashMap::new();
        bounds.insert("i".to_string(), "DEPTH".to_string());
        let t = TilingTransformer::new(
            ScanRegion::main_function(),
            1,
            BoundResolver::new(bounds),
        );
        let lines = to_lines(KERNEL);
        let (out, report) = t.apply(&lines, &full_plan(16)).unwrap();
        assert!(!report.inferred_bounds);
        assert!(out.iter().any(|l| l.contains("i_t < DEPTH")));
        assert!(out.iter().any(|l| l.contains("j_t < 512"))); // header fallback
    }

    #[test]
    fn test_macro_inference_flags_report() {
        let source = r#"
#define DEPTH 64
#define HEIGHT 32
#define WIDTH 16
int main() {
    for (int a = 0; a < DEPTH; a++) {
        for (int b = 0; b < HEIGHT; b++) {
            for (int c = 0; c < WIDTH; c++) {
                use(a, b, c);
            }
        }
    }
    return 0;
}
"#;
        let lines = to_lines(source);
        let t = TilingTransformer::new(
            ScanRegion::main_function(),
            1,
            BoundResolver::default().with_macro_inference(true),
        );
        let (out, report) = t.apply(&lines, &full_plan(8)).unwrap();
        assert!(report.inferred_bounds);
        assert!(out.iter().any(|l| l.contains("j_t < HEIGHT")));
    }

    #[test]
    fn test_marker_region_keeps_original_names() {
        let source = r#"
int main() {
#pragma scop
    for (int t = 0; t < 10; t++) {
        for (int i = 1; i < 100; i++) {
            for (int j = 1; j < 100; j++) {
                A[i][j] = A[i][j] + t;
            }
        }
    }
#pragma endscop
    return 0;
}
"#;
        let plan = TilingPlan::new(
            vec![
                LoopLabel::point("t"),
                LoopLabel::tile("i"),
                LoopLabel::tile("j"),
                LoopLabel::point("i"),
                LoopLabel::point("j"),
            ],
            64,
        );
        let lines = to_lines(source);
        let t = TilingTransformer::new(
            ScanRegion::scop_pragmas(),
            1,
            BoundResolver::default(),
        );
        let (out, report) = t.apply(&lines, &plan).unwrap();
        assert!(report.applied);
        assert!(out.iter().any(|l| l.contains("for (int t = 0; t < 10; t++) {")));
        assert!(out.iter().any(|l| l.contains("for (int i_t = 1; i_t < 100; i_t += 64) {")));
        assert!(out.iter().any(|l| l.contains("i < i_t + 64 && i < 100")));
        assert!(out.iter().any(|l| l.contains("A[i][j] = A[i][j] + t;")));
    }
}
