//! Annotator - splice decorations into text leaves, and strip them again
//!
//! For each entry (already sorted longest-first) the walk collects the
//! eligible text leaves under the root, then splits every leaf holding a
//! boundary-delimited occurrence into `before | wrapper | after`. A leaf is
//! matched once per visit; the `after` remainder is a fresh leaf and is visited
//! next, so repeated occurrences in one sentence are all decorated while text
//! already inside a wrapper is never touched again.

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

use super::decoration::{self, BADGE_ATTR, WRAPPER_ATTR};
use crate::catalog::CatalogEntry;
use crate::dom::{Dom, NodeKind};
use crate::error::{EngineError, Result};
use crate::scanner::{Matcher, NamePattern};

/// Containers whose text is never rendered as prose
pub const SKIPPED_TAGS: [&str; 7] = ["script", "style", "noscript", "template", "textarea", "title", "head"];

fn is_skipped_container<D: Dom>(dom: &D, node: &D::Node) -> bool {
    dom.tag_name(node)
        .is_some_and(|tag| SKIPPED_TAGS.contains(&tag.as_str()))
}

/// Root or an ancestor is engine-owned, non-renderable or excluded
fn is_shielded<D, F>(dom: &D, node: &D::Node, exclude: &F) -> bool
where
    D: Dom,
    F: Fn(&D::Node) -> bool,
{
    let mut current = Some(node.clone());
    while let Some(n) = current {
        if exclude(&n) || decoration::has_marker(dom, &n) || is_skipped_container(dom, &n) {
            return true;
        }
        current = dom.parent(&n);
    }
    false
}

fn parent_holds_badge<D: Dom>(dom: &D, leaf: &D::Node) -> bool {
    dom.parent(leaf).is_some_and(|parent| {
        dom.children(&parent)
            .iter()
            .any(|sibling| dom.kind(sibling) == NodeKind::Element && dom.has_attribute(sibling, BADGE_ATTR))
    })
}

/// Eligible text leaves under `root` in document order
pub fn collect_leaves<D, F>(dom: &D, root: &D::Node, exclude: &F) -> Vec<D::Node>
where
    D: Dom,
    F: Fn(&D::Node) -> bool,
{
    let mut leaves = Vec::new();
    if is_shielded(dom, root, exclude) {
        return leaves;
    }

    let mut stack = vec![root.clone()];
    while let Some(node) = stack.pop() {
        match dom.kind(&node) {
            NodeKind::Text => {
                let has_text = dom.text(&node).is_some_and(|t| !t.trim().is_empty());
                if has_text && !parent_holds_badge(dom, &node) {
                    leaves.push(node);
                }
            }
            NodeKind::Element | NodeKind::Document => {
                if node != *root
                    && (exclude(&node) || decoration::has_marker(dom, &node) || is_skipped_container(dom, &node))
                {
                    continue;
                }
                let mut children = dom.children(&node);
                children.reverse();
                stack.extend(children);
            }
            NodeKind::Other => {}
        }
    }
    leaves
}

/// Text the matcher should see for `root`: eligible leaves, concatenated
pub fn visible_text<D: Dom>(dom: &D, root: &D::Node) -> String {
    let leaves = collect_leaves(dom, root, &|_: &D::Node| false);
    let mut out = String::new();
    for leaf in leaves {
        if let Some(data) = dom.text(&leaf) {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&data);
        }
    }
    out
}

/// Replace `leaf` with `before | wrapper | after`; returns the `after` node
fn splice<D: Dom>(
    dom: &mut D,
    leaf: &D::Node,
    text: &str,
    range: Range<usize>,
    entry: &CatalogEntry,
) -> Result<Option<D::Node>> {
    let parent = dom
        .parent(leaf)
        .ok_or_else(|| EngineError::DetachedNode(dom.describe(leaf)))?;

    let before = &text[..range.start];
    let matched = &text[range.clone()];
    let after = &text[range.end..];

    if !before.is_empty() {
        let node = dom.create_text(before)?;
        dom.insert_before(&parent, &node, leaf)?;
    }
    let wrapper = decoration::build(dom, entry, matched)?;
    dom.insert_before(&parent, &wrapper, leaf)?;
    let rest = if after.is_empty() {
        None
    } else {
        let node = dom.create_text(after)?;
        dom.insert_before(&parent, &node, leaf)?;
        Some(node)
    };
    dom.remove(leaf)?;
    Ok(rest)
}

/// Decorate every boundary-delimited occurrence of one entry under `root`
pub fn annotate_entry<D, F>(
    dom: &mut D,
    root: &D::Node,
    entry: &CatalogEntry,
    pattern: &NamePattern,
    exclude: &F,
) -> usize
where
    D: Dom,
    F: Fn(&D::Node) -> bool,
{
    let mut queue: VecDeque<D::Node> = collect_leaves(dom, root, exclude).into();
    let mut added = 0;

    while let Some(leaf) = queue.pop_front() {
        let Some(text) = dom.text(&leaf) else { continue };
        let Some(range) = pattern.find_first(&text) else { continue };
        match splice(dom, &leaf, &text, range, entry) {
            Ok(rest) => {
                added += 1;
                if let Some(rest) = rest {
                    queue.push_front(rest);
                }
            }
            Err(err) => {
                debug!(name = %entry.name, node = %dom.describe(&leaf), error = %err, "leaf skipped");
            }
        }
    }
    added
}

/// Annotate `root` with `entries` in the given (longest-first) order.
/// Returns the number of decorations added.
pub fn annotate<D, F>(
    dom: &mut D,
    root: &D::Node,
    entries: &[Arc<CatalogEntry>],
    matcher: &mut Matcher,
    exclude: F,
) -> usize
where
    D: Dom,
    F: Fn(&D::Node) -> bool,
{
    let mut added = 0;
    for entry in entries {
        // Unusable patterns are logged by the matcher and skipped here
        let Some(pattern) = matcher.pattern(&entry.name) else { continue };
        added += annotate_entry(dom, root, entry, pattern, &exclude);
    }
    added
}

/// Remove every decoration under `root`, restoring plain text.
/// Returns the number of wrappers removed.
pub fn strip<D: Dom>(dom: &mut D, root: &D::Node) -> usize {
    let mut removed = 0;
    let mut touched: Vec<D::Node> = Vec::new();

    for wrapper in dom.descendants_with_attribute(root, WRAPPER_ATTR) {
        let Some(parent) = dom.parent(&wrapper) else { continue };
        let text = decoration::visible_wrapper_text(dom, &wrapper);
        let outcome = dom
            .create_text(&text)
            .and_then(|node| dom.insert_before(&parent, &node, &wrapper))
            .and_then(|_| dom.remove(&wrapper));
        match outcome {
            Ok(()) => {
                removed += 1;
                if !touched.contains(&parent) {
                    touched.push(parent);
                }
            }
            Err(err) => debug!(error = %err, "could not strip wrapper"),
        }
    }

    // Badges orphaned by page scripts moving nodes around
    for badge in dom.descendants_with_attribute(root, BADGE_ATTR) {
        if let Some(parent) = dom.parent(&badge) {
            if dom.remove(&badge).is_ok() && !touched.contains(&parent) {
                touched.push(parent);
            }
        }
    }

    for parent in touched {
        if let Err(err) = dom.normalize(&parent) {
            debug!(error = %err, "could not normalize after strip");
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NameIndex;
    use crate::dom::{ArenaDom, NodeId};
    use crate::engine::decoration::STATUS_ATTR;
    use crate::scanner::sort_longest_first;
    use proptest::prelude::*;

    fn setup(entries: Vec<CatalogEntry>) -> (NameIndex, Matcher) {
        let index = NameIndex::build(entries, true);
        let matcher = Matcher::new(&index, false).unwrap();
        (index, matcher)
    }

    fn run(dom: &mut ArenaDom, index: &NameIndex, matcher: &mut Matcher) -> usize {
        let root = dom.body();
        let text = visible_text(dom, &root);
        let mut entries = matcher.find_matches(&text, index);
        sort_longest_first(&mut entries);
        annotate(dom, &root, &entries, matcher, |_: &NodeId| false)
    }

    fn wrappers(dom: &ArenaDom) -> Vec<NodeId> {
        dom.descendants_with_attribute(&dom.body(), WRAPPER_ATTR)
    }

    fn wrapped_texts(dom: &ArenaDom) -> Vec<String> {
        wrappers(dom)
            .iter()
            .map(|w| decoration::visible_wrapper_text(dom, w))
            .collect()
    }

    #[test]
    fn test_catan_scenario() {
        let (index, mut matcher) = setup(vec![CatalogEntry::new("13", "Catan", "5", "7.2", "1995")]);
        let mut dom = ArenaDom::new();
        dom.append_element_with_text(dom.body(), "p", "I love Catan and Catan Junior.");

        assert_eq!(run(&mut dom, &index, &mut matcher), 2);
        assert_eq!(wrapped_texts(&dom), vec!["Catan", "Catan"]);

        let badges = dom.descendants_with_attribute(&dom.body(), BADGE_ATTR);
        assert_eq!(badges.len(), 2);
        // 7.2 sits in [7, 8): blue
        let style = dom.attribute(&badges[0], "style").unwrap();
        assert!(style.ends_with("background:#1978b3"));
    }

    #[test]
    fn test_catan_badge_is_blue_gray_for_mid_score() {
        let (index, mut matcher) = setup(vec![CatalogEntry::new("13", "Catan", "5", "6.5", "1995")]);
        let mut dom = ArenaDom::new();
        dom.append_element_with_text(dom.body(), "p", "Catan night");
        run(&mut dom, &index, &mut matcher);
        let badge = dom.descendants_with_attribute(&dom.body(), BADGE_ATTR)[0];
        assert!(dom.attribute(&badge, "style").unwrap().ends_with("background:#5369a2"));
    }

    #[test]
    fn test_second_run_adds_nothing() {
        let (index, mut matcher) = setup(vec![
            CatalogEntry::new("1", "Catan", "5", "7.2", "1995"),
            CatalogEntry::new("2", "Azul", "40", "7.8", "2017"),
        ]);
        let mut dom = ArenaDom::new();
        dom.append_element_with_text(dom.body(), "p", "Catan, Azul and Catan.");
        let first = run(&mut dom, &index, &mut matcher);
        let markup = dom.render(dom.body());

        assert_eq!(first, 3);
        assert_eq!(run(&mut dom, &index, &mut matcher), 0);
        assert_eq!(dom.render(dom.body()), markup);
    }

    #[test]
    fn test_longest_name_wins_overlap() {
        let (index, mut matcher) = setup(vec![
            CatalogEntry::new("1", "Gloomhaven", "3", "8.6", "2017"),
            CatalogEntry::new("2", "Gloomhaven: Jaws of the Lion", "6", "8.4", "2020"),
        ]);
        let mut dom = ArenaDom::new();
        dom.append_element_with_text(
            dom.body(),
            "p",
            "Gloomhaven: Jaws of the Lion is smaller than Gloomhaven.",
        );
        assert_eq!(run(&mut dom, &index, &mut matcher), 2);
        assert_eq!(wrapped_texts(&dom), vec!["Gloomhaven: Jaws of the Lion", "Gloomhaven"]);
        for wrapper in wrappers(&dom) {
            assert!(dom.descendants_with_attribute(&wrapper, WRAPPER_ATTR).is_empty());
        }
    }

    #[test]
    fn test_boundaries_respected_in_dom() {
        let (index, mut matcher) = setup(vec![CatalogEntry::new("188", "Go", "300", "7.6", "-2200")]);
        let mut dom = ArenaDom::new();
        let body = dom.body();
        dom.append_element_with_text(body, "p", "Going to the Congo.");
        dom.append_element_with_text(body, "p", "Go (the game) is fun.");
        dom.append_element_with_text(body, "p", "Nothing beats Go");
        assert_eq!(run(&mut dom, &index, &mut matcher), 2);
        assert_eq!(dom.text_content(&body).matches("Going to the Congo.").count(), 1);
    }

    #[test]
    fn test_skips_script_style_and_excluded() {
        let (index, mut matcher) = setup(vec![CatalogEntry::new("1", "Azul", "40", "7.8", "2017")]);
        let mut dom = ArenaDom::new();
        let body = dom.body();
        dom.append_element_with_text(body, "script", "var game = 'Azul';");
        dom.append_element_with_text(body, "style", ".Azul { }");
        let status = dom.append_element_with_text(body, "div", "Azul loading");
        dom.set_attr(status, STATUS_ATTR, "");
        let aside = dom.append_element_with_text(body, "aside", "Azul sidebar");
        dom.append_element_with_text(body, "p", "Azul is pretty.");

        let entries: Vec<Arc<CatalogEntry>> = index.entries().cloned().collect();
        let added = annotate(&mut dom, &body, &entries, &mut matcher, |n: &NodeId| *n == aside);
        assert_eq!(added, 1);
        assert_eq!(dom.render(aside), "<aside>Azul sidebar</aside>");
    }

    #[test]
    fn test_leaf_next_to_badge_skipped() {
        let (index, mut matcher) = setup(vec![CatalogEntry::new("1", "Azul", "40", "7.8", "2017")]);
        let mut dom = ArenaDom::new();
        let body = dom.body();
        let span = dom.append_element(body, "span");
        let badge = dom.append_element_with_text(span, "span", "7.8");
        dom.set_attr(badge, BADGE_ATTR, "");
        dom.append_text(span, "Azul");
        assert_eq!(run(&mut dom, &index, &mut matcher), 0);
    }

    #[test]
    fn test_root_inside_wrapper_is_noop() {
        let (index, mut matcher) = setup(vec![CatalogEntry::new("1", "Azul", "40", "7.8", "2017")]);
        let mut dom = ArenaDom::new();
        dom.append_element_with_text(dom.body(), "p", "Azul");
        run(&mut dom, &index, &mut matcher);
        let wrapper = wrappers(&dom)[0];
        let entries: Vec<Arc<CatalogEntry>> = index.entries().cloned().collect();
        assert_eq!(annotate(&mut dom, &wrapper, &entries, &mut matcher, |_: &NodeId| false), 0);
    }

    #[test]
    fn test_strip_restores_text_and_structure() {
        let (index, mut matcher) = setup(vec![
            CatalogEntry::new("1", "Catan", "5", "7.2", "1995"),
            CatalogEntry::new("2", "Azul", "40", "7.8", "2017"),
        ]);
        let mut dom = ArenaDom::new();
        let body = dom.body();
        let p = dom.append_element_with_text(body, "p", "I love Catan and Catan Junior.");
        dom.append_element_with_text(p, "em", "Azul!");
        let before_text = dom.text_content(&body);
        let before_markup = dom.render(body);

        assert_eq!(run(&mut dom, &index, &mut matcher), 3);
        assert_ne!(dom.text_content(&body), before_text);

        assert_eq!(strip(&mut dom, &body), 3);
        assert_eq!(dom.text_content(&body), before_text);
        assert_eq!(dom.render(body), before_markup);
        assert!(dom.descendants_with_attribute(&body, BADGE_ATTR).is_empty());
    }

    #[test]
    fn test_strip_without_decorations() {
        let mut dom = ArenaDom::new();
        dom.append_element_with_text(dom.body(), "p", "plain");
        let body = dom.body();
        assert_eq!(strip(&mut dom, &body), 0);
        assert_eq!(dom.render(body), "<body><p>plain</p></body>");
    }

    #[test]
    fn test_visible_text_excludes_hidden_and_decorated() {
        let mut dom = ArenaDom::new();
        let body = dom.body();
        dom.append_element_with_text(body, "p", "Catan");
        dom.append_element_with_text(body, "script", "Azul");
        let wrapper = dom.append_element_with_text(body, "span", "Hive");
        dom.set_attr(wrapper, WRAPPER_ATTR, "");
        assert_eq!(visible_text(&dom, &body), "Catan");
    }

    const WORDS: [&str; 14] = [
        "Catan", "Azul", "Go", "Gloomhaven", "Gloomhaven: Jaws of the Lion", "Going", "Congo",
        "and", "the", ",", ".", "(", ")", "7",
    ];

    fn catalog() -> Vec<CatalogEntry> {
        vec![
            CatalogEntry::new("1", "Catan", "5", "7.2", "1995"),
            CatalogEntry::new("2", "Azul", "40", "7.8", "2017"),
            CatalogEntry::new("3", "Go", "300", "7.6", "-2200"),
            CatalogEntry::new("4", "Gloomhaven", "3", "8.6", "2017"),
            CatalogEntry::new("5", "Gloomhaven: Jaws of the Lion", "6", "8.4", "2020"),
            CatalogEntry::new("6", "7", "9", "6.0", "2001"),
        ]
    }

    fn paragraphs() -> impl Strategy<Value = Vec<String>> {
        let sentence = proptest::collection::vec(proptest::sample::select(WORDS.to_vec()), 1..10)
            .prop_map(|words| words.join(" "));
        proptest::collection::vec(sentence, 1..4)
    }

    proptest! {
        #[test]
        fn prop_annotate_is_idempotent(texts in paragraphs()) {
            let (index, mut matcher) = setup(catalog());
            let mut dom = ArenaDom::new();
            for text in &texts {
                dom.append_element_with_text(dom.body(), "p", text);
            }
            run(&mut dom, &index, &mut matcher);
            let markup = dom.render(dom.body());
            prop_assert_eq!(run(&mut dom, &index, &mut matcher), 0);
            prop_assert_eq!(dom.render(dom.body()), markup);
        }

        #[test]
        fn prop_strip_restores_page(texts in paragraphs()) {
            let (index, mut matcher) = setup(catalog());
            let mut dom = ArenaDom::new();
            for text in &texts {
                dom.append_element_with_text(dom.body(), "p", text);
            }
            let body = dom.body();
            let before = dom.render(body);
            let added = run(&mut dom, &index, &mut matcher);
            prop_assert_eq!(strip(&mut dom, &body), added);
            prop_assert_eq!(dom.render(body), before);
        }
    }
}
