//! Partial-JSON Parser (C2) — §4.1.
//!
//! Given a continuously-appending buffer, returns the largest prefix that
//! parses as JSON plus a state tag. The only repairs this parser performs
//! are the deterministic ones §4.1 allows: closing open strings and open
//! containers. It never guesses at a dangling, not-yet-terminated token
//! (a bare trailing `,` or `:` with no following value) — those are
//! trimmed back to the last point a value was known to be complete before
//! the closers are appended.

use serde::{Deserialize, Serialize};

/// Outcome tag for [`parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseState {
    /// The entire buffer is already valid JSON.
    Complete,
    /// A deterministic extension of the buffer (closing brackets,
    /// terminating strings) yields valid JSON.
    Repaired,
    /// No prefix of the buffer yields a useful parse.
    Incomplete,
}

/// Result of parsing a partial buffer.
#[derive(Debug, Clone)]
pub struct PartialParse {
    pub value: Option<serde_json::Value>,
    pub state: ParseState,
}

#[derive(Clone, Copy)]
enum Container {
    Object,
    Array,
}

/// Parse `buffer`, returning the largest prefix that is (or can be
/// deterministically repaired into) valid JSON.
///
/// Linear in `buffer.len()`: a single forward scan tracks open containers
/// and string state, and any fallback trim (for a dangling trailing comma
/// or an unterminated key) only ever looks backward from the scan's end
/// point, so total work stays O(n).
pub fn parse(buffer: &str) -> PartialParse {
    if buffer.trim().is_empty() {
        return PartialParse {
            value: None,
            state: ParseState::Incomplete,
        };
    }

    if let Ok(value) = serde_json::from_str(buffer) {
        return PartialParse {
            value: Some(value),
            state: ParseState::Complete,
        };
    }

    match repair(buffer) {
        Some(value) => PartialParse {
            value: Some(value),
            state: ParseState::Repaired,
        },
        None => PartialParse {
            value: None,
            state: ParseState::Incomplete,
        },
    }
}

fn repair(buffer: &str) -> Option<serde_json::Value> {
    let ScanResult {
        stack,
        in_string,
        trailing_backslash,
    } = scan(buffer);

    let mut candidate = buffer.to_string();

    if in_string {
        if trailing_backslash {
            candidate.pop();
        }
        candidate.push('"');
    }

    // Try the straightforward repair (just close everything open) first.
    if let Some(value) = try_close(&candidate, &stack) {
        return Some(value);
    }

    // Fall back to trimming a dangling trailing comma or an unterminated
    // `"key":` with no value, then retry.
    let trimmed = trim_dangling_tail(&candidate);
    try_close(&trimmed, &stack)
}

fn try_close(candidate: &str, stack: &[Container]) -> Option<serde_json::Value> {
    let mut attempt = candidate.to_string();
    for c in stack.iter().rev() {
        attempt.push(match c {
            Container::Object => '}',
            Container::Array => ']',
        });
    }
    serde_json::from_str(&attempt).ok()
}

struct ScanResult {
    stack: Vec<Container>,
    in_string: bool,
    trailing_backslash: bool,
}

fn scan(buffer: &str) -> ScanResult {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escape = false;

    for b in buffer.bytes() {
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => stack.push(Container::Object),
            b'[' => stack.push(Container::Array),
            b'}' | b']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    ScanResult {
        stack,
        in_string,
        trailing_backslash: escape,
    }
}

/// Strip a dangling trailing comma (`{"a":1,`) or an unterminated key with
/// no value (`{"a":`) from the tail of `candidate`, so that closing the
/// remaining open containers yields valid JSON.
fn trim_dangling_tail(candidate: &str) -> String {
    let trimmed_end = candidate.trim_end();
    let mut s = trimmed_end.to_string();

    if s.ends_with(':') {
        // Walk back over the key string (and any preceding comma) so the
        // whole incomplete `"key":` entry is dropped.
        s.pop(); // drop ':'
        let s_trimmed = s.trim_end().to_string();
        s = s_trimmed;
        if s.ends_with('"') {
            s.pop(); // closing quote of key
            if let Some(open_quote) = find_unescaped_quote_from_end(&s) {
                s.truncate(open_quote);
            }
        }
        let s_trimmed = s.trim_end().to_string();
        s = s_trimmed;
        if s.ends_with(',') {
            s.pop();
        }
        return s;
    }

    if s.ends_with(',') {
        s.pop();
        return s;
    }

    s
}

/// Find the byte offset of the nearest unescaped `"` scanning backward from
/// the end of `s`, treating `s` as ending right after a key string's
/// content (i.e. the closing quote has already been removed by the
/// caller).
fn find_unescaped_quote_from_end(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = bytes.len();
    while i > 0 {
        i -= 1;
        if bytes[i] == b'"' {
            let mut backslashes = 0;
            let mut j = i;
            while j > 0 && bytes[j - 1] == b'\\' {
                backslashes += 1;
                j -= 1;
            }
            if backslashes % 2 == 0 {
                return Some(i);
            }
        }
    }
    None
}
