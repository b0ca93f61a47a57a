//! Matcher - which catalog names occur in a block of text
//!
//! Two stages:
//! 1. Aho-Corasick over every indexed name (overlapping, so "Gloomhaven" is
//!    still reported inside "Gloomhaven: Jaws of the Lion") as a cheap
//!    existence prefilter over large blobs like the whole page text.
//! 2. Each candidate is confirmed with its boundary-aware `NamePattern`.
//!
//! Positions are not returned. The annotator re-derives them per text leaf.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use super::pattern::NamePattern;
use crate::catalog::{CatalogEntry, NameIndex};
use crate::error::{EngineError, Result};

const DEFAULT_SIZE_LIMIT: usize = 1 << 20;

pub struct Matcher {
    /// Prefilter automaton (None for an empty index)
    automaton: Option<AhoCorasick>,
    /// Automaton pattern id -> index key
    keys: Vec<String>,
    /// Lazily compiled boundary patterns; None remembers a failed compile
    patterns: HashMap<String, Option<NamePattern>>,
    case_insensitive: bool,
    size_limit: usize,
}

impl Matcher {
    pub fn new(index: &NameIndex, case_insensitive: bool) -> Result<Self> {
        Self::with_size_limit(index, case_insensitive, DEFAULT_SIZE_LIMIT)
    }

    pub fn with_size_limit(index: &NameIndex, case_insensitive: bool, size_limit: usize) -> Result<Self> {
        let mut keys: Vec<String> = index.names().map(str::to_string).collect();
        keys.sort();

        let automaton = if keys.is_empty() {
            None
        } else {
            let needles: Vec<String> = keys
                .iter()
                .map(|k| fold(k, case_insensitive).into_owned())
                .collect();
            let automaton = AhoCorasickBuilder::new()
                .match_kind(MatchKind::Standard)
                .build(&needles)
                .map_err(|e| EngineError::Pattern {
                    name: format!("<{} names>", keys.len()),
                    message: e.to_string(),
                })?;
            Some(automaton)
        };

        Ok(Self {
            automaton,
            keys,
            patterns: HashMap::new(),
            case_insensitive,
            size_limit,
        })
    }

    pub fn case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    pub fn name_count(&self) -> usize {
        self.keys.len()
    }

    /// Names whose pattern failed to compile so far
    pub fn skipped_patterns(&self) -> usize {
        self.patterns.values().filter(|p| p.is_none()).count()
    }

    /// Boundary pattern for `name`, compiled on first use.
    ///
    /// A compile failure is logged once and the name is skipped from then on.
    pub fn pattern(&mut self, name: &str) -> Option<&NamePattern> {
        if !self.patterns.contains_key(name) {
            let compiled = match NamePattern::compile(name, self.case_insensitive, self.size_limit) {
                Ok(pattern) => Some(pattern),
                Err(err) => {
                    warn!(name, error = %err, "skipping catalog entry with unusable pattern");
                    None
                }
            };
            self.patterns.insert(name.to_string(), compiled);
        }
        self.patterns.get(name).and_then(Option::as_ref)
    }

    /// Entries whose name occurs at least once, boundary-delimited, in `text`
    pub fn find_matches(&mut self, text: &str, index: &NameIndex) -> Vec<Arc<CatalogEntry>> {
        let Some(automaton) = self.automaton.as_ref() else {
            return Vec::new();
        };
        if text.trim().is_empty() {
            return Vec::new();
        }

        let haystack = fold(text, self.case_insensitive);
        let mut seen = vec![false; self.keys.len()];
        for m in automaton.find_overlapping_iter(&*haystack) {
            seen[m.pattern().as_usize()] = true;
        }

        let mut found = Vec::new();
        for (id, hit) in seen.into_iter().enumerate() {
            if !hit {
                continue;
            }
            let key = self.keys[id].clone();
            let confirmed = self.pattern(&key).is_some_and(|p| p.is_match(text));
            if confirmed {
                if let Some(entry) = index.get(&key) {
                    found.push(Arc::clone(entry));
                }
            }
        }
        found
    }
}

/// Prefilter form of `text`. In case-insensitive mode every character is
/// folded on its own, so two characters the confirming regex treats as equal
/// always fold to the same thing. Folding more than the regex does is fine;
/// folding less would hide real matches.
fn fold(text: &str, case_insensitive: bool) -> Cow<'_, str> {
    if case_insensitive {
        Cow::Owned(text.chars().map(fold_char).collect())
    } else {
        Cow::Borrowed(text)
    }
}

fn fold_char(c: char) -> char {
    match c {
        'ς' => 'σ',
        'ſ' => 's',
        'µ' => 'μ',
        'ϐ' => 'β',
        'ϑ' => 'θ',
        'ϕ' => 'φ',
        'ϖ' => 'π',
        'ϰ' => 'κ',
        'ϱ' => 'ρ',
        'ϵ' => 'ε',
        '\u{0345}' | '\u{1FBE}' => 'ι',
        'ẛ' => 'ṡ',
        '\u{1C80}' => 'в',
        '\u{1C81}' => 'д',
        '\u{1C82}' => 'о',
        '\u{1C83}' => 'с',
        '\u{1C84}' | '\u{1C85}' => 'т',
        '\u{1C86}' => 'ъ',
        '\u{1C87}' => 'ѣ',
        '\u{1C88}' => 'ꙋ',
        _ => {
            // Multi-char lowercasings (İ) have no simple fold; keep as is
            let mut lower = c.to_lowercase();
            match (lower.next(), lower.next()) {
                (Some(single), None) => single,
                _ => c,
            }
        }
    }
}

/// One-shot form: build a throwaway matcher and run it once
pub fn find_matches(text: &str, index: &NameIndex, case_insensitive: bool) -> Vec<Arc<CatalogEntry>> {
    match Matcher::new(index, case_insensitive) {
        Ok(mut matcher) => matcher.find_matches(text, index),
        Err(err) => {
            warn!(error = %err, "could not build matcher");
            Vec::new()
        }
    }
}

/// Order for annotation: longest name first so a superstring title wraps its
/// text before the shorter title's pattern can consume part of it
pub fn sort_longest_first(entries: &mut [Arc<CatalogEntry>]) {
    entries.sort_by(|a, b| {
        b.name
            .chars()
            .count()
            .cmp(&a.name.chars().count())
            .then_with(|| a.name.cmp(&b.name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn index(names: &[&str]) -> NameIndex {
        NameIndex::build(
            names
                .iter()
                .enumerate()
                .map(|(i, n)| CatalogEntry::new(&i.to_string(), n, "1", "7.0", "2000")),
            true,
        )
    }

    fn names(mut found: Vec<Arc<CatalogEntry>>) -> Vec<String> {
        sort_longest_first(&mut found);
        found.into_iter().map(|e| e.name.clone()).collect()
    }

    #[test]
    fn test_finds_boundary_matches_only() {
        let idx = index(&["Go", "Catan"]);
        let found = find_matches("Going to Congo with Catan.", &idx, false);
        assert_eq!(names(found), vec!["Catan"]);
    }

    #[test]
    fn test_one_entry_per_name() {
        let idx = index(&["Catan"]);
        let found = find_matches("Catan, Catan and more Catan", &idx, false);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_superstring_reports_both() {
        let idx = index(&["Gloomhaven", "Gloomhaven: Jaws of the Lion"]);
        let found = find_matches("Gloomhaven: Jaws of the Lion is out", &idx, false);
        // "Gloomhaven" is followed by ':' there, a valid boundary
        assert_eq!(names(found), vec!["Gloomhaven: Jaws of the Lion", "Gloomhaven"]);
    }

    #[test]
    fn test_case_sensitive_requires_exact_case() {
        let idx = index(&["Catan"]);
        assert!(find_matches("i love catan", &idx, false).is_empty());
        assert_eq!(find_matches("i love Catan", &idx, false).len(), 1);
    }

    #[test]
    fn test_case_insensitive_invariant_under_case_changes() {
        let idx = index(&["Ticket to Ride", "Azul", "Go"]);
        let text = "We played Ticket to Ride, then Azul; nobody wanted Go.";
        let mut matcher = Matcher::new(&idx, true).unwrap();
        let base = names(matcher.find_matches(text, &idx));
        assert_eq!(names(matcher.find_matches(&text.to_uppercase(), &idx)), base);
        assert_eq!(names(matcher.find_matches(&text.to_lowercase(), &idx)), base);
        assert_eq!(base.len(), 3);
    }

    #[test]
    fn test_case_insensitive_greek_final_sigma() {
        let idx = index(&["Κνωσός"]);
        let mut matcher = Matcher::new(&idx, true).unwrap();
        let text = "Κνωσός's board";
        assert_eq!(matcher.find_matches(text, &idx).len(), 1);
        assert_eq!(matcher.find_matches(&text.to_uppercase(), &idx).len(), 1);
        assert_eq!(matcher.find_matches(&text.to_lowercase(), &idx).len(), 1);
    }

    #[test]
    fn test_fold_is_per_character() {
        assert_eq!(fold("ΟΔΟΣ", true), fold("οδος", true));
        assert_eq!(fold("οδός", true), "οδόσ");
        assert_eq!(fold("ſtar", true), "star");
        assert_eq!(fold("İ", true), "İ");
        assert_eq!(fold("Catan", false), "Catan");
    }

    #[test]
    fn test_empty_index_and_blank_text() {
        let empty = index(&[]);
        assert!(find_matches("Catan", &empty, false).is_empty());
        let idx = index(&["Catan"]);
        assert!(find_matches("   \n", &idx, false).is_empty());
    }

    #[test]
    fn test_failed_pattern_skipped_not_fatal() {
        let idx = index(&["Catan", "Azul"]);
        let mut matcher = Matcher::with_size_limit(&idx, false, 1).unwrap();
        assert!(matcher.find_matches("Catan and Azul", &idx).is_empty());
        assert_eq!(matcher.skipped_patterns(), 2);
        // Remembered: asking again does not retry
        assert!(matcher.pattern("Catan").is_none());
    }

    #[test]
    fn test_sort_longest_first_ties_by_name() {
        let idx = index(&["Azul", "Go", "Hive", "Gloomhaven"]);
        let mut all: Vec<Arc<CatalogEntry>> = idx.entries().cloned().collect();
        sort_longest_first(&mut all);
        let order: Vec<&str> = all.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(order, vec!["Gloomhaven", "Azul", "Hive", "Go"]);
    }

    proptest! {
        #[test]
        fn prop_case_insensitive_stable_under_case_changes(
            words in proptest::collection::vec("[a-zA-Zà-öø-þΑ-Ωα-ωА-яſ]{1,8}", 1..4),
            filler in "[a-zA-Zα-ωΑ-Ω ,.!?]{0,20}",
        ) {
            let catalog: Vec<&str> = words.iter().map(String::as_str).collect();
            let idx = index(&catalog);
            let text = format!("{filler} {} {filler}", catalog.join(" and "));
            let mut matcher = Matcher::new(&idx, true).unwrap();
            let base = names(matcher.find_matches(&text, &idx));
            prop_assert_eq!(names(matcher.find_matches(&text.to_uppercase(), &idx)), base.clone());
            prop_assert_eq!(names(matcher.find_matches(&text.to_lowercase(), &idx)), base);
        }

        #[test]
        fn prop_prefilter_agrees_with_pattern(
            name in "[a-zA-Zα-ωΑ-Ως]{1,6}",
            text in "[a-zA-Zα-ωΑ-Ως ,.]{0,30}",
            case_insensitive in any::<bool>(),
        ) {
            let idx = index(&[name.as_str()]);
            prop_assume!(idx.len() == 1);
            let mut matcher = Matcher::new(&idx, case_insensitive).unwrap();
            let confirmed = NamePattern::compile(&name, case_insensitive, DEFAULT_SIZE_LIMIT)
                .unwrap()
                .is_match(&text);
            prop_assert_eq!(matcher.find_matches(&text, &idx).len() == 1, confirmed);
        }
    }
}
