//! Token-boundary identifier substitution.
//!
//! Body lines are spliced back under renamed loop variables, so every
//! occurrence of an original variable must be replaced - but only whole
//! identifiers. `idx` must survive a rename of `i`, and `data2` a rename
//! of `a`.

use std::collections::HashMap;
use unicode_xid::UnicodeXID;

fn is_ident_start(c: char) -> bool {
    c.is_xid_start() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_xid_continue() || c == '_'
}

/// Replace whole-identifier occurrences per the mapping, leaving every
/// other byte of the line untouched.
pub fn rename_identifiers(line: &str, map: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    // True when the previous char belonged to an identifier or number, so
    // a following letter cannot start a fresh identifier (e.g. `0x1f`).
    let mut glued = false;

    while let Some(&c) = chars.peek() {
        if !glued && is_ident_start(c) {
            let mut ident = String::new();
            while let Some(&c) = chars.peek() {
                if is_ident_continue(c) {
                    ident.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            match map.get(&ident) {
                Some(replacement) => out.push_str(replacement),
                None => out.push_str(&ident),
            }
            glued = true;
        } else {
            glued = is_ident_continue(c);
            out.push(c);
            chars.next();
        }
    }
    out
}
