//! Catalog: the reference list of recognizable titles
//!
//! - `index.rs` - NameIndex: display name -> entry, ambiguous names dropped
//! - `provider.rs` - CatalogProvider / DetailProvider collaborator seams

pub mod index;
pub mod provider;

pub use index::*;
pub use provider::*;

use serde::{Deserialize, Deserializer, Serialize};

/// Sentinel rank for titles without a numeric rank
pub const UNRANKED: &str = "unranked";

/// One recognizable title and its metadata. Immutable for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(deserialize_with = "text_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default = "unranked", deserialize_with = "text_or_number")]
    pub rank: String,
    #[serde(default, deserialize_with = "text_or_number")]
    pub average: String,
    #[serde(default, deserialize_with = "text_or_number")]
    pub year: String,
}

fn unranked() -> String {
    UNRANKED.to_string()
}

/// Dumps are inconsistent about quoting numeric columns
fn text_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(value) => value.to_string(),
    })
}

impl CatalogEntry {
    pub fn new(id: &str, name: &str, rank: &str, average: &str, year: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            rank: rank.to_string(),
            average: average.to_string(),
            year: year.to_string(),
        }
    }

    /// Average score, if it parses to a finite number
    pub fn score(&self) -> Option<f64> {
        self.average.trim().parse::<f64>().ok().filter(|v| v.is_finite())
    }

    pub fn is_ranked(&self) -> bool {
        self.rank.trim().parse::<u32>().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_parsing_strings() {
        let json = r#"{"id": "13", "name": "Catan", "rank": "5", "average": "7.2", "year": "1995"}"#;
        let entry: CatalogEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry, CatalogEntry::new("13", "Catan", "5", "7.2", "1995"));
        assert!(entry.is_ranked());
        assert_eq!(entry.score(), Some(7.2));
    }

    #[test]
    fn test_entry_parsing_numbers_and_defaults() {
        let json = r#"{"id": 99, "name": "Obscure", "average": 6.5, "year": 2001}"#;
        let entry: CatalogEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.id, "99");
        assert_eq!(entry.rank, UNRANKED);
        assert!(!entry.is_ranked());
        assert_eq!(entry.average, "6.5");
        assert_eq!(entry.year, "2001");
    }

    #[test]
    fn test_unparsable_score() {
        let entry = CatalogEntry::new("1", "X", UNRANKED, "n/a", "");
        assert_eq!(entry.score(), None);
    }
}
