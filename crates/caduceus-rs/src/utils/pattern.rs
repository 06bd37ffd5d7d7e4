//! Wildcard pattern matching for event sources and types.
//!
//! Route patterns support `*` wildcards, each expanding to `.*` in an
//! anchored, case-sensitive regex. All other regex metacharacters are
//! escaped, so `health.patient.*` matches `health.patient.registered` but
//! not `healthXpatient.registered`.
//!
//! Note: the AMQP `#` multi-segment wildcard is NOT supported here; `#` is
//! matched literally. Broker bindings keep `#`, route patterns use `*`.

use ahash::HashMap as AHashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::{Arc, RwLock};

use log::warn;

// Compiled wildcard patterns are shared process-wide; the same handful of
// route patterns is evaluated for every consumed event.
static PATTERN_CACHE: Lazy<RwLock<AHashMap<String, Arc<Regex>>>> =
    Lazy::new(|| RwLock::new(AHashMap::default()));

/// Returns true when `value` matches the wildcard `pattern`.
///
/// Matching rules:
/// - `pattern == value` matches (including the empty pattern against the
///   empty value);
/// - `"*"` matches everything;
/// - a pattern containing `*` is compiled to an anchored regex with each
///   `*` expanded to `.*` and every other metacharacter escaped.
pub fn wildcard_match(value: &str, pattern: &str) -> bool {
    if pattern == value {
        return true;
    }
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        // Literal pattern that already failed the equality check.
        return false;
    }

    match compiled(pattern) {
        Some(regex) => regex.is_match(value),
        None => false,
    }
}

fn compiled(pattern: &str) -> Option<Arc<Regex>> {
    if let Some(regex) = PATTERN_CACHE
        .read()
        .ok()
        .and_then(|cache| cache.get(pattern).cloned())
    {
        return Some(regex);
    }

    let source = wildcard_to_regex(pattern);
    match Regex::new(&source) {
        Ok(regex) => {
            let regex = Arc::new(regex);
            if let Ok(mut cache) = PATTERN_CACHE.write() {
                cache.insert(pattern.to_string(), regex.clone());
            }
            Some(regex)
        }
        Err(e) => {
            warn!("failed to compile wildcard pattern '{}': {}", pattern, e);
            None
        }
    }
}

/// Converts a wildcard pattern to an anchored regex source string.
fn wildcard_to_regex(pattern: &str) -> String {
    let mut source = String::with_capacity(pattern.len() * 2 + 2);
    source.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            // Escape special regex characters
            '.' | '?' | '+' | '^' | '$' | '[' | ']' | '(' | ')' | '|' | '\\' | '{' | '}' => {
                source.push('\\');
                source.push(ch);
            }
            _ => source.push(ch),
        }
    }
    source.push('$');
    source
}
