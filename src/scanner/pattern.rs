//! NamePattern - boundary-aware literal matching for one catalog name
//!
//! A name only matches when flanked on both sides by the text edge, whitespace
//! or sentence punctuation, so "Go" is found in "Go (the game) is fun." but
//! not inside "Going" or "Congo".

use regex::{Regex, RegexBuilder};
use std::ops::Range;

use crate::error::{EngineError, Result};

/// Punctuation accepted immediately next to a name
pub const BOUNDARY_PUNCTUATION: [char; 14] =
    ['.', '!', '?', ',', ':', ';', '\'', '"', '(', ')', '[', ']', '{', '}'];

const FLANK: &str = r#"[\s.!?,:;'"()\[\]{}]"#;

pub fn is_boundary_char(c: char) -> bool {
    c.is_whitespace() || BOUNDARY_PUNCTUATION.contains(&c)
}

#[derive(Debug, Clone)]
pub struct NamePattern {
    name: String,
    regex: Regex,
}

impl NamePattern {
    /// Compile the pattern for `name`. The name is escaped, never interpreted.
    pub fn compile(name: &str, case_insensitive: bool, size_limit: usize) -> Result<Self> {
        let source = format!(r"(?:^|{FLANK})({})(?:$|{FLANK})", regex::escape(name));
        let regex = RegexBuilder::new(&source)
            .case_insensitive(case_insensitive)
            .size_limit(size_limit)
            .build()
            .map_err(|e| EngineError::Pattern {
                name: name.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self { name: name.to_string(), regex })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Byte range of the first boundary-delimited occurrence (flanks excluded)
    pub fn find_first(&self, text: &str) -> Option<Range<usize>> {
        self.regex
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.range())
    }
}
