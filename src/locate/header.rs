//! Structured parsing of C `for` headers.
//!
//! The locator does not understand C; it only needs the pieces of a
//! canonical counted-loop header: the loop variable, its start expression,
//! the comparison operator, and the limit expression. Headers that do not
//! fit that shape (no init, comma operators, missing condition) are simply
//! not recognized as loops, which the locator treats as a normal outcome.

use std::iter::Peekable;
use std::str::Chars;
use unicode_xid::UnicodeXID;

/// A parsed `for (init; cond; step)` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForHeader {
    /// Loop variable name
    pub var: String,
    /// Start expression (right-hand side of the init)
    pub init: String,
    /// Comparison operator of the condition (`<` or `<=`)
    pub cmp: String,
    /// Limit expression (right-hand side of the condition)
    pub limit: String,
}

/// Character cursor over a single header line.
struct Cursor<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str) -> Self {
        Self { chars: source.chars().peekable() }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn advance(&mut self) -> Option<char> {
        self.chars.next()
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.advance();
        }
    }

    /// Consume an identifier, or None if the cursor is not at one.
    fn identifier(&mut self) -> Option<String> {
        let first = self.peek()?;
        if !(first.is_xid_start() || first == '_') {
            return None;
        }
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if c.is_xid_continue() || c == '_' {
                ident.push(c);
                self.advance();
            } else {
                break;
            }
        }
        Some(ident)
    }

    /// Consume everything up to (not including) the given delimiter.
    fn until(&mut self, delim: char) -> Option<String> {
        let mut out = String::new();
        loop {
            match self.peek() {
                Some(c) if c == delim => return Some(out.trim().to_string()),
                Some(c) => {
                    out.push(c);
                    self.advance();
                }
                None => return None,
            }
        }
    }
}

/// Whether the trimmed line begins a `for` construct.
pub fn is_for_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    match trimmed.strip_prefix("for") {
        Some(rest) => rest.trim_start().starts_with('('),
        None => false,
    }
}

/// Parse a `for` header from one source line.
///
/// Accepts `for (int i = E1; i < E2; ...)` and the declaration-free form
/// `for (i = E1; i <= E2; ...)`. The step clause is not interpreted; tiled
/// replacements synthesize their own, always increment-stepped, so only
/// increasing loops (`<` / `<=`) are recognized - a `>`-family header would
/// be rewritten into a loop that never terminates. Returns None for
/// anything that does not match, including a condition whose left side is
/// not the loop variable.
pub fn parse_for_header(line: &str) -> Option<ForHeader> {
    let mut cur = Cursor::new(line.trim_start());

    cur.skip_whitespace();
    if cur.identifier()? != "for" {
        return None;
    }
    cur.skip_whitespace();
    if !cur.match_char('(') {
        return None;
    }

    // Init: optional type keywords, then `var = expr;`. The variable is
    // the last identifier before `=`.
    cur.skip_whitespace();
    let mut var = cur.identifier()?;
    loop {
        cur.skip_whitespace();
        match cur.peek() {
            Some(c) if c.is_xid_start() || c == '_' => {
                var = cur.identifier()?;
            }
            _ => break,
        }
    }
    cur.skip_whitespace();
    if !cur.match_char('=') {
        return None;
    }
    let init = cur.until(';')?;
    if init.is_empty() {
        return None;
    }
    cur.advance(); // ;

    // Condition: `var OP expr;`
    cur.skip_whitespace();
    let cond_var = cur.identifier()?;
    if cond_var != var {
        return None;
    }
    cur.skip_whitespace();
    let mut cmp = String::new();
    while let Some(c @ ('<' | '>' | '=')) = cur.peek() {
        cmp.push(c);
        cur.advance();
    }
    if !matches!(cmp.as_str(), "<" | "<=") {
        return None;
    }
    let limit = cur.until(';')?;
    if limit.is_empty() {
        return None;
    }

    Some(ForHeader { var, init, cmp, limit })
}
