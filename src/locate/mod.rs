//! Loop-nest location.
//!
//! Scans source text for the N-th three-level perfectly nested `for`
//! construct inside a designated region, using brace-depth tracking only.
//! Nothing else about the language is understood; lines that are not `for`
//! headers or brace events are opaque.
//!
//! Two region strategies exist behind the one locator: entry via a
//! function-signature token (e.g. `int main`), and an explicit begin/end
//! marker pair (e.g. `#pragma scop` / `#pragma endscop`). Absence of a
//! qualifying nest is a normal, reportable outcome - the locator never
//! fails on malformed input.
//!
//! Known limitation: loops whose bodies are single statements without an
//! enclosing block are unsupported; brace-balance tracking requires every
//! loop to open an explicit block.

mod header;

pub use header::{is_for_line, parse_for_header, ForHeader};

use log::debug;
use serde::Serialize;

/// Strategy for delimiting the portion of the source eligible for
/// scanning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum ScanRegion {
    /// Region begins at the first line containing this token (a function
    /// signature fragment) and ends when its brace balance closes.
    FunctionToken(String),
    /// Region is the span strictly between two marker lines.
    Markers {
        /// Line substring opening the region
        begin: String,
        /// Line substring closing the region
        end: String,
    },
}

impl ScanRegion {
    /// The conventional `int main` entry.
    pub fn main_function() -> Self {
        ScanRegion::FunctionToken("int main".to_string())
    }

    /// The conventional `#pragma scop` / `#pragma endscop` marker pair.
    pub fn scop_pragmas() -> Self {
        ScanRegion::Markers {
            begin: "#pragma scop".to_string(),
            end: "#pragma endscop".to_string(),
        }
    }
}

/// A located three-level nest: an inclusive line span, the line index and
/// parsed header of each loop (outer to inner).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NestRegion {
    /// Line index of the outermost `for` header
    pub start: usize,
    /// Line index of the outermost loop's closing brace (inclusive)
    pub end: usize,
    /// Line index of each header, outer to inner
    pub header_lines: [usize; 3],
    /// Parsed header of each loop, outer to inner
    pub headers: [ForHeader; 3],
}

impl NestRegion {
    /// Loop variable names, outer to inner.
    pub fn vars(&self) -> [&str; 3] {
        [
            &self.headers[0].var,
            &self.headers[1].var,
            &self.headers[2].var,
        ]
    }
}

/// Find the `ordinal`-th (1-based) three-level nest inside the designated
/// region. Returns None when the region or the nest is absent.
pub fn find_nest(lines: &[String], region: &ScanRegion, ordinal: usize) -> Option<NestRegion> {
    let (first, last) = region_span(lines, region)?;

    let mut stack: Vec<(usize, ForHeader)> = Vec::new();
    let mut found = 0usize;

    let mut idx = first;
    while idx <= last {
        let line = &lines[idx];
        if is_for_line(line) {
            if let Some(header) = parse_for_header(line) {
                stack.push((idx, header));
                if stack.len() == 3 {
                    found += 1;
                    let start = stack[0].0;
                    if found == ordinal {
                        let end = nest_end(lines, start)?;
                        let header_lines = [stack[0].0, stack[1].0, stack[2].0];
                        let headers = [
                            stack[0].1.clone(),
                            stack[1].1.clone(),
                            stack[2].1.clone(),
                        ];
                        return Some(NestRegion { start, end, header_lines, headers });
                    }
                    // Not the requested nest: skip past it and keep counting.
                    debug!("skipping nest #{} at line {}", found, start);
                    let end = nest_end(lines, start)?;
                    stack.clear();
                    idx = end + 1;
                    continue;
                }
            }
        }
        idx += 1;
    }
    None
}

/// Inclusive line range the region strategy designates, or None when the
/// region itself is absent.
fn region_span(lines: &[String], region: &ScanRegion) -> Option<(usize, usize)> {
    match region {
        ScanRegion::FunctionToken(token) => {
            let entry = lines.iter().position(|l| l.contains(token.as_str()))?;
            // Track brace balance from the signature line; the region ends
            // where the function's body closes.
            let mut depth = 0i64;
            let mut entered = false;
            for (idx, line) in lines.iter().enumerate().skip(entry) {
                depth += brace_delta(line);
                if depth > 0 {
                    entered = true;
                } else if entered {
                    return Some((entry, idx));
                }
            }
            // Unterminated body: scan to end of file rather than failing.
            if entered {
                Some((entry, lines.len() - 1))
            } else {
                None
            }
        }
        ScanRegion::Markers { begin, end } => {
            let b = lines.iter().position(|l| l.contains(begin.as_str()))?;
            let e = lines
                .iter()
                .skip(b + 1)
                .position(|l| l.contains(end.as_str()))?
                + b
                + 1;
            if e > b + 1 {
                Some((b + 1, e - 1))
            } else {
                None
            }
        }
    }
}

/// Lexical end of the nest whose outermost header is at `start`: the line
/// where brace balance, tracked from `start`, returns to zero.
fn nest_end(lines: &[String], start: usize) -> Option<usize> {
    let mut balance = 0i64;
    let mut opened = false;
    for (idx, line) in lines.iter().enumerate().skip(start) {
        balance += brace_delta(line);
        if balance > 0 {
            opened = true;
        } else if opened {
            return Some(idx);
        }
    }
    None
}

/// Net brace count of one line.
pub(crate) fn brace_delta(line: &str) -> i64 {
    let opens = line.matches('{').count() as i64;
    let closes = line.matches('}').count() as i64;
    opens - closes
}
