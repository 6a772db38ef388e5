//! Prefix patterns used for intents and state provenance.
//!
//! A pattern matches when it matches at the start of the subject, so
//! `"shop"` matches `"shop.checkout"` and `"greet"` matches `"greeting"`.

use crate::error::Result;
use regex::Regex;

/// Compile a pattern anchored at the start of the subject.
pub fn prefix_pattern(pattern: &str) -> Result<Regex> {
    Ok(Regex::new(&format!("^(?:{pattern})"))?)
}
