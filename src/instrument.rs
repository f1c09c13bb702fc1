//! Cycle-count instrumentation.
//!
//! Optionally wraps a loop nest (untiled or already tiled) with a
//! serialized `rdtsc` probe and injects a report statement emitting the
//! delta in a fixed, machine-parseable format:
//!
//! ```text
//! Execution cycles for tiled loop: <count>
//! ```
//!
//! Wrapping adds an observable side channel only; it never alters the
//! nest's computed results.

use crate::locate::{find_nest, ScanRegion};
use log::warn;

/// The fixed prefix of the report line written by instrumented binaries.
pub const CYCLE_REPORT_PREFIX: &str = "Execution cycles for tiled loop:";

/// C helper injected once per instrumented source. `cpuid` serializes the
/// pipeline so out-of-order execution cannot leak into the measurement.
const RDTSC_HELPER: &[&str] = &[
    "",
    "static inline unsigned long long rdtsc_serialized(void) {",
    "    unsigned int low, high;",
    "    asm volatile (\"cpuid\" : : : \"%rax\", \"%rbx\", \"%rcx\", \"%rdx\");",
    "    asm volatile (\"rdtsc\" : \"=a\" (low), \"=d\" (high));",
    "    return ((unsigned long long)high << 32) | low;",
    "}",
    "",
];

/// Inject the `rdtsc` helper after the first `#include` and the counter
/// declarations at the top of `main`. Prepares a source for [`wrap_nest`];
/// idempotence is not required because every trial starts from a fresh
/// copy.
pub fn inject_counter_support(lines: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len() + RDTSC_HELPER.len() + 1);

    let include_idx = lines
        .iter()
        .position(|l| l.trim_start().starts_with("#include"));
    match include_idx {
        Some(idx) => {
            out.extend_from_slice(&lines[..=idx]);
            out.extend(RDTSC_HELPER.iter().map(|l| l.to_string()));
            out.extend_from_slice(&lines[idx + 1..]);
        }
        None => {
            out.extend(RDTSC_HELPER.iter().map(|l| l.to_string()));
            out.extend_from_slice(lines);
        }
    }

    let mut with_vars = Vec::with_capacity(out.len() + 1);
    let mut declared = false;
    for line in out {
        let is_main = line.contains("int main");
        with_vars.push(line);
        if is_main && !declared {
            with_vars.push("    unsigned long long start_cycles, end_cycles;".to_string());
            declared = true;
        }
    }
    with_vars
}

/// Wrap the `ordinal`-th nest in `region` with counter reads and the
/// report statement. Returns the new lines and whether a nest was found;
/// absence leaves the input unchanged.
///
/// A nest already tiled by the transformer is still found: its first three
/// headers form the candidate and brace balance closes at the outermost
/// tile loop, so the probe brackets the whole tiled construct.
pub fn wrap_nest(lines: &[String], region: &ScanRegion, ordinal: usize) -> (Vec<String>, bool) {
    let nest = match find_nest(lines, region, ordinal) {
        Some(nest) => nest,
        None => {
            warn!("no nest (ordinal {}) to instrument; probe not injected", ordinal);
            return (lines.to_vec(), false);
        }
    };

    let mut out = Vec::with_capacity(lines.len() + 4);
    out.extend_from_slice(&lines[..nest.start]);
    out.push("    start_cycles = rdtsc_serialized();".to_string());
    out.extend_from_slice(&lines[nest.start..=nest.end]);
    out.push("    end_cycles = rdtsc_serialized();".to_string());
    out.push(format!(
        "    printf(\"{} %llu\\n\", end_cycles - start_cycles);",
        CYCLE_REPORT_PREFIX
    ));
    out.extend_from_slice(&lines[nest.end + 1..]);
    (out, true)
}

/// Extract the cycle count from a captured stdout stream.
pub fn parse_cycles(stdout: &str) -> Option<u64> {
    stdout.lines().find_map(|line| {
        line.trim()
            .strip_prefix(CYCLE_REPORT_PREFIX)
            .and_then(|rest| rest.trim().parse::<u64>().ok())
    })
}
