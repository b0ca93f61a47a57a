//! Decoration markup: badge + wrapper around one recognized occurrence
//!
//! ```text
//! <span data-boardlens-wrapper="">
//!   <span data-boardlens-badge="" data-boardlens-id="13" title="..." style="...">7.2</span>
//!   Catan
//! </span>
//! ```
//!
//! The marker attributes are the only bookkeeping: their presence is how
//! re-scans, the watcher and teardown recognize engine-owned nodes.

use crate::catalog::CatalogEntry;
use crate::dom::{Dom, NodeKind};
use crate::error::Result;

pub const WRAPPER_ATTR: &str = "data-boardlens-wrapper";
pub const BADGE_ATTR: &str = "data-boardlens-badge";
pub const STATUS_ATTR: &str = "data-boardlens-status";
pub const ITEM_ID_ATTR: &str = "data-boardlens-id";

/// Every attribute that marks an engine-owned element
pub const MARKER_ATTRS: [&str; 3] = [WRAPPER_ATTR, BADGE_ATTR, STATUS_ATTR];

const BADGE_STYLE: &str = "display:inline-block;margin-right:0.25em;padding:0 0.3em;\
border-radius:3px;color:#fff;font:bold 0.75em/1.4 sans-serif;vertical-align:middle;cursor:help";

/// Colour band for an average score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBand {
    Unrated,
    Dismal,
    Poor,
    Mixed,
    Good,
    Great,
    Exceptional,
}

impl ScoreBand {
    /// 0 or unparsable is Unrated
    pub fn for_score(score: Option<f64>) -> Self {
        match score {
            None => ScoreBand::Unrated,
            Some(s) if s == 0.0 => ScoreBand::Unrated,
            Some(s) if s < 3.0 => ScoreBand::Dismal,
            Some(s) if s < 5.0 => ScoreBand::Poor,
            Some(s) if s < 7.0 => ScoreBand::Mixed,
            Some(s) if s < 8.0 => ScoreBand::Good,
            Some(s) if s < 9.0 => ScoreBand::Great,
            Some(_) => ScoreBand::Exceptional,
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            ScoreBand::Unrated => "#666e75",     // neutral gray
            ScoreBand::Dismal => "#b2151f",      // dark red
            ScoreBand::Poor => "#d71925",        // red
            ScoreBand::Mixed => "#5369a2",       // blue-gray
            ScoreBand::Good => "#1978b3",        // blue
            ScoreBand::Great => "#1d804c",       // dark green
            ScoreBand::Exceptional => "#186b40", // deepest green
        }
    }
}

/// Rendered badge contents for one entry
#[derive(Debug, Clone, PartialEq)]
pub struct Badge {
    pub item_id: String,
    pub label: String,
    pub tooltip: String,
    pub band: ScoreBand,
}

impl Badge {
    pub fn for_entry(entry: &CatalogEntry) -> Self {
        let score = entry.score();
        let band = ScoreBand::for_score(score);
        let label = match score {
            Some(s) if s > 0.0 => format!("{s:.1}"),
            _ => "N/A".to_string(),
        };
        let rank = if entry.is_ranked() { format!("#{}", entry.rank.trim()) } else { "unranked".to_string() };
        let year = if entry.year.trim().is_empty() { "unknown" } else { entry.year.trim() };
        let tooltip = format!(
            "{}\nRating: {}\nRank: {}\nYear: {}",
            entry.name, label, rank, year
        );
        Self { item_id: entry.id.clone(), label, tooltip, band }
    }

    fn style(&self) -> String {
        format!("{BADGE_STYLE};background:{}", self.band.color())
    }
}

/// Build a detached wrapper holding the badge and the matched text
pub fn build<D: Dom>(dom: &mut D, entry: &CatalogEntry, matched: &str) -> Result<D::Node> {
    let badge = Badge::for_entry(entry);

    let badge_node = dom.create_element("span")?;
    dom.set_attribute(&badge_node, BADGE_ATTR, "")?;
    dom.set_attribute(&badge_node, ITEM_ID_ATTR, &badge.item_id)?;
    dom.set_attribute(&badge_node, "title", &badge.tooltip)?;
    dom.set_attribute(&badge_node, "style", &badge.style())?;
    let label = dom.create_text(&badge.label)?;
    dom.append_child(&badge_node, &label)?;

    let wrapper = dom.create_element("span")?;
    dom.set_attribute(&wrapper, WRAPPER_ATTR, "")?;
    dom.append_child(&wrapper, &badge_node)?;
    let text = dom.create_text(matched)?;
    dom.append_child(&wrapper, &text)?;
    Ok(wrapper)
}

pub fn has_marker<D: Dom>(dom: &D, node: &D::Node) -> bool {
    dom.kind(node) == NodeKind::Element && MARKER_ATTRS.iter().any(|a| dom.has_attribute(node, a))
}

/// `node` or one of its ancestors is engine-owned
pub fn within_marker<D: Dom>(dom: &D, node: &D::Node) -> bool {
    let mut current = Some(node.clone());
    while let Some(n) = current {
        if has_marker(dom, &n) {
            return true;
        }
        current = dom.parent(&n);
    }
    false
}

/// Some descendant of `node` is engine-owned
pub fn contains_marker<D: Dom>(dom: &D, node: &D::Node) -> bool {
    let mut stack = dom.children(node);
    while let Some(n) = stack.pop() {
        if dom.kind(&n) != NodeKind::Element {
            continue;
        }
        if has_marker(dom, &n) {
            return true;
        }
        stack.extend(dom.children(&n));
    }
    false
}

/// Wrapper text with the badge left out
pub fn visible_wrapper_text<D: Dom>(dom: &D, wrapper: &D::Node) -> String {
    dom.children(wrapper)
        .iter()
        .filter(|child| !dom.has_attribute(child, BADGE_ATTR))
        .map(|child| dom.text_content(child))
        .collect()
}
