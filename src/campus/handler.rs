//! Parsing of inline `onclick` handlers such as `moveFunc('SYW0001000-flow', 0)`
//! or `refer('2024','31','31101','ja_JP')`. The script is never evaluated.

use once_cell::sync::Lazy;
use regex::Regex;

static CALL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:javascript:)?\s*([A-Za-z_$][\w$]*)\s*\((.*)\)\s*;?\s*(?:return\s+false\s*;?\s*)?$")
        .unwrap()
});

/// A single function call with literal arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineCall {
    pub name: String,
    pub args: Vec<String>,
}

impl InlineCall {
    pub fn parse(source: &str) -> Option<Self> {
        let caps = CALL_RE.captures(source)?;
        let name = caps.get(1)?.as_str().to_string();
        let args = split_args(caps.get(2)?.as_str())?;
        Some(Self { name, args })
    }

    /// Parse and require a specific function name.
    pub fn parse_named(source: &str, name: &str) -> Option<Self> {
        Self::parse(source).filter(|call| call.name == name)
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}

/// Split a comma-separated argument list, unquoting string literals.
/// Returns `None` on an unterminated quote.
fn split_args(raw: &str) -> Option<Vec<String>> {
    if raw.trim().is_empty() {
        return Some(Vec::new());
    }

    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in raw.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    current.push(ch);
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    quote = None;
                } else {
                    current.push(ch);
                }
            }
            None => match ch {
                '\'' | '"' => quote = Some(ch),
                ',' => {
                    args.push(current.trim().to_string());
                    current.clear();
                }
                _ => current.push(ch),
            },
        }
    }

    if quote.is_some() {
        return None;
    }
    args.push(current.trim().to_string());
    Some(args)
}
