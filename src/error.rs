//! Engine error taxonomy
//!
//! Only `CatalogUnavailable` is fatal (it aborts a session start). Every other
//! variant is local to one catalog entry or one DOM node and is logged and
//! skipped by the pass that hit it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// No cached catalog and the refresh failed
    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// A single catalog name could not be compiled into a matching pattern
    #[error("could not compile pattern for {name:?}: {message}")]
    Pattern { name: String, message: String },

    /// A queued node left the document before it was processed
    #[error("node detached before processing: {0}")]
    DetachedNode(String),

    /// The detail collaborator had nothing for this item
    #[error("no detail available for item {0}")]
    EnrichmentUnavailable(String),

    /// A host DOM call failed
    #[error("dom operation failed: {0}")]
    Dom(String),

    #[error("invalid config: {0}")]
    Config(String),
}

impl EngineError {
    /// True for the one failure that aborts a session start
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::CatalogUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_catalog_unavailable_is_fatal() {
        assert!(EngineError::CatalogUnavailable("offline".into()).is_fatal());
        assert!(!EngineError::DetachedNode("div".into()).is_fatal());
        assert!(!EngineError::Pattern {
            name: "Catan".into(),
            message: "too big".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_messages_carry_context() {
        let err = EngineError::Pattern {
            name: "Gloomhaven".into(),
            message: "compiled regex exceeds size limit".into(),
        };
        let text = err.to_string();
        assert!(text.contains("\"Gloomhaven\""));
        assert!(text.contains("size limit"));
    }
}
