//! Expanded badge info, backed by the detail collaborator
//!
//! A missing record never blocks anything: the view degrades to a terse
//! "Details unavailable".

use tracing::debug;

use super::decoration::{BADGE_ATTR, ITEM_ID_ATTR};
use crate::catalog::{DetailProvider, DetailRecord};
use crate::dom::Dom;
use crate::error::EngineError;

const UNAVAILABLE: &str = "Details unavailable";
const EXCERPT_CHARS: usize = 160;

#[derive(Debug, Clone, PartialEq)]
pub enum DetailView {
    Ready(DetailRecord),
    Unavailable { id: String },
}

impl DetailView {
    pub fn is_ready(&self) -> bool {
        matches!(self, DetailView::Ready(_))
    }

    /// Multi-line text for the expanded surface
    pub fn summary(&self) -> String {
        let record = match self {
            DetailView::Ready(record) => record,
            DetailView::Unavailable { .. } => return UNAVAILABLE.to_string(),
        };

        let mut lines = vec![record.name.clone()];
        match (record.min_players, record.max_players) {
            (Some(min), Some(max)) if min == max => lines.push(format!("Players: {min}")),
            (Some(min), Some(max)) => lines.push(format!("Players: {min}-{max}")),
            (Some(n), None) | (None, Some(n)) => lines.push(format!("Players: {n}")),
            (None, None) => {}
        }
        if let Some(minutes) = record.playing_time.filter(|m| *m > 0) {
            lines.push(format!("Play time: {minutes} min"));
        }
        if let Some(weight) = record.weight.filter(|w| *w > 0.0) {
            lines.push(format!("Weight: {weight:.2}/5"));
        }
        if let Some(description) = record.description.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            lines.push(excerpt(description));
        }
        lines.join("\n")
    }
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(EXCERPT_CHARS).collect();
    format!("{}…", cut.trim_end())
}

/// Look one item up. `EnrichmentUnavailable` is absorbed into the view.
pub async fn describe<P: DetailProvider + ?Sized>(provider: &P, id: &str) -> DetailView {
    match provider.detail(id).await {
        Some(record) => DetailView::Ready(record),
        None => {
            let err = EngineError::EnrichmentUnavailable(id.to_string());
            debug!(error = %err, "showing unavailable state");
            DetailView::Unavailable { id: id.to_string() }
        }
    }
}

/// Catalog id carried by a badge (or by the wrapper around one)
pub fn badge_item_id<D: Dom>(dom: &D, node: &D::Node) -> Option<String> {
    if dom.has_attribute(node, BADGE_ATTR) {
        return dom.attribute(node, ITEM_ID_ATTR);
    }
    dom.children(node)
        .iter()
        .find(|child| dom.has_attribute(child, BADGE_ATTR))
        .and_then(|badge| dom.attribute(badge, ITEM_ID_ATTR))
}
