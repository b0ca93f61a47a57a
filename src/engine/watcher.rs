//! MutationWatcher: debounced queue of page-added elements
//!
//! # States
//! Idle → Observing → Debouncing → Draining → Observing
//!
//! The watcher owns no timer and no observer. The host delivers childList
//! records through `record` and schedules the debounce timer it is handed as
//! a `TimerAction`. Every re-arm bumps the generation; a timer firing with an
//! older generation is ignored, which is how a burst keeps pushing the drain
//! back without ever cancelling anything.
//!
//! # Self-mutation suppression
//! Engine writes are bracketed by `suppress()` / `release(records)`. Records
//! delivered while suppressed are the engine's own and are discarded.

use serde::Serialize;
use tracing::trace;

use super::decoration;
use crate::dom::{Dom, MutationRecord, NodeKind};

// =============================================================================
// State Machine
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// No observer attached
    Idle,
    /// Attached, nothing pending
    Observing,
    /// Queue non-empty, debounce timer running
    Debouncing,
    /// Queue handed to the session for processing
    Draining,
}

/// What the host should do with its debounce timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    None,
    /// (Re)start the timer; hand `generation` back to `fire`
    Arm { generation: u64, delay_ms: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchStats {
    pub records_seen: usize,
    pub elements_queued: usize,
    pub elements_ignored: usize,
    pub self_records_discarded: usize,
    pub drains: usize,
}

// =============================================================================
// MutationWatcher
// =============================================================================

#[derive(Debug)]
pub struct MutationWatcher<N> {
    state: WatchState,
    queue: Vec<N>,
    generation: u64,
    debounce_ms: u32,
    suppressed: bool,
    stats: WatchStats,
}

impl<N: Clone + PartialEq> MutationWatcher<N> {
    pub fn new(debounce_ms: u32) -> Self {
        Self {
            state: WatchState::Idle,
            queue: Vec::new(),
            generation: 0,
            debounce_ms,
            suppressed: false,
            stats: WatchStats::default(),
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn state_name(&self) -> &'static str {
        match self.state {
            WatchState::Idle => "idle",
            WatchState::Observing => "observing",
            WatchState::Debouncing => "debouncing",
            WatchState::Draining => "draining",
        }
    }

    /// Elements waiting for the next drain
    pub fn pending(&self) -> &[N] {
        &self.queue
    }

    pub fn is_suppressing(&self) -> bool {
        self.suppressed
    }

    pub fn debounce_ms(&self) -> u32 {
        self.debounce_ms
    }

    pub fn stats(&self) -> &WatchStats {
        &self.stats
    }

    /// Idle → Observing. No-op in any other state.
    pub fn attach(&mut self) {
        if self.state == WatchState::Idle {
            self.state = WatchState::Observing;
        }
    }

    /// Any state → Idle. Drops the queue and invalidates an armed timer.
    pub fn detach(&mut self) {
        self.state = WatchState::Idle;
        self.queue.clear();
        self.generation += 1;
        self.suppressed = false;
    }

    /// Feed childList records observed on the page
    pub fn record<D>(&mut self, dom: &D, records: Vec<MutationRecord<N>>) -> TimerAction
    where
        D: Dom<Node = N>,
    {
        if self.state == WatchState::Idle || records.is_empty() {
            return TimerAction::None;
        }
        if self.suppressed {
            self.stats.self_records_discarded += records.len();
            return TimerAction::None;
        }

        self.stats.records_seen += records.len();
        let mut queued = false;
        for record in records {
            for node in record.added {
                if !qualifies(dom, &node) {
                    self.stats.elements_ignored += 1;
                    continue;
                }
                if !self.queue.contains(&node) {
                    trace!(node = %dom.describe(&node), "queued");
                    self.queue.push(node);
                    self.stats.elements_queued += 1;
                    queued = true;
                }
            }
        }

        if !queued {
            return TimerAction::None;
        }
        match self.state {
            WatchState::Observing | WatchState::Debouncing => {
                self.state = WatchState::Debouncing;
                self.arm()
            }
            // Held for the next cycle; finish_drain re-arms
            WatchState::Draining | WatchState::Idle => TimerAction::None,
        }
    }

    /// Debounce timer fired. Returns the batch to process, if this generation
    /// is still current and anything is pending.
    pub fn fire(&mut self, generation: u64) -> Option<Vec<N>> {
        if generation != self.generation || self.state != WatchState::Debouncing {
            return None;
        }
        if self.queue.is_empty() {
            self.state = WatchState::Observing;
            return None;
        }
        self.state = WatchState::Draining;
        self.stats.drains += 1;
        Some(std::mem::take(&mut self.queue))
    }

    /// Draining → Observing, or straight back to Debouncing when the page
    /// kept adding content during the drain
    pub fn finish_drain(&mut self) -> TimerAction {
        if self.state != WatchState::Draining {
            return TimerAction::None;
        }
        if self.queue.is_empty() {
            self.state = WatchState::Observing;
            TimerAction::None
        } else {
            self.state = WatchState::Debouncing;
            self.arm()
        }
    }

    /// Start of an engine write section
    pub fn suppress(&mut self) {
        self.suppressed = true;
    }

    /// End of an engine write section; `own` are the records swept right
    /// after the writes
    pub fn release(&mut self, own: Vec<MutationRecord<N>>) {
        self.stats.self_records_discarded += own.len();
        self.suppressed = false;
    }

    fn arm(&mut self) -> TimerAction {
        self.generation += 1;
        TimerAction::Arm { generation: self.generation, delay_ms: self.debounce_ms }
    }
}

/// An added node worth a scan: an element with visible text that is neither
/// engine-owned nor inside or around engine-owned markup
pub fn qualifies<D: Dom>(dom: &D, node: &D::Node) -> bool {
    if dom.kind(node) != NodeKind::Element {
        return false;
    }
    if decoration::within_marker(dom, node) || decoration::contains_marker(dom, node) {
        return false;
    }
    !dom.text_content(node).trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;
    use crate::dom::{ArenaDom, NodeId};

    fn observed() -> (ArenaDom, MutationWatcher<NodeId>) {
        let mut dom = ArenaDom::new();
        dom.observe();
        let mut watcher = MutationWatcher::new(750);
        watcher.attach();
        (dom, watcher)
    }

    fn arm_generation(action: TimerAction) -> u64 {
        match action {
            TimerAction::Arm { generation, .. } => generation,
            TimerAction::None => panic!("expected the timer to be armed"),
        }
    }

    // Requirement: Idle ignores everything

    #[test]
    fn test_idle_ignores_records() {
        let mut dom = ArenaDom::new();
        dom.observe();
        let mut watcher = MutationWatcher::new(750);
        dom.append_element_with_text(dom.body(), "p", "Catan");
        let records = dom.take_records();
        assert_eq!(watcher.record(&dom, records), TimerAction::None);
        assert!(watcher.pending().is_empty());
        assert_eq!(watcher.state_name(), "idle");
    }

    // Requirement: qualifying element → Debouncing, timer armed

    #[test]
    fn test_qualifying_mutation_arms_timer() {
        let (mut dom, mut watcher) = observed();
        let p = dom.append_element_with_text(dom.body(), "p", "Catan");
        let records = dom.take_records();
        let action = watcher.record(&dom, records);
        assert_eq!(action, TimerAction::Arm { generation: 1, delay_ms: 750 });
        assert_eq!(watcher.state(), WatchState::Debouncing);
        assert_eq!(watcher.pending(), &[p]);
    }

    #[test]
    fn test_non_qualifying_nodes_ignored() {
        let (mut dom, mut watcher) = observed();
        let body = dom.body();
        dom.append_text(body, "loose text");
        dom.append_element(body, "div");
        dom.append_element_with_text(body, "div", "   \n ");
        let wrapper = dom.append_element_with_text(body, "span", "Catan");
        dom.set_attr(wrapper, decoration::WRAPPER_ATTR, "");

        let records = dom.take_records();
        assert_eq!(watcher.record(&dom, records), TimerAction::None);
        assert!(watcher.pending().is_empty());
        assert_eq!(watcher.state(), WatchState::Observing);
        assert!(watcher.stats().elements_ignored >= 4);
    }

    #[test]
    fn test_container_of_decoration_ignored() {
        let (mut dom, mut watcher) = observed();
        let section = dom.append_element(dom.body(), "section");
        let entry = CatalogEntry::new("1", "Azul", "1", "7.8", "2017");
        let wrapper = decoration::build(&mut dom, &entry, "Azul").unwrap();
        dom.append_child(&section, &wrapper).unwrap();
        let records = dom.take_records();
        watcher.record(&dom, records);
        assert!(watcher.pending().is_empty());
        assert_eq!(watcher.state(), WatchState::Observing);
    }

    // Requirement: bursts reset the debounce timer

    #[test]
    fn test_burst_resets_timer_and_stale_fire_is_noop() {
        let (mut dom, mut watcher) = observed();
        let body = dom.body();
        dom.append_element_with_text(body, "p", "one");
        let records = dom.take_records();
        let first = arm_generation(watcher.record(&dom, records));

        dom.append_element_with_text(body, "p", "two");
        let records = dom.take_records();
        let second = arm_generation(watcher.record(&dom, records));
        assert!(second > first);

        assert!(watcher.fire(first).is_none());
        assert_eq!(watcher.state(), WatchState::Debouncing);
        let batch = watcher.fire(second).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(watcher.state(), WatchState::Draining);
        assert_eq!(watcher.stats().drains, 1);
    }

    #[test]
    fn test_duplicate_additions_queued_once() {
        let (mut dom, mut watcher) = observed();
        let body = dom.body();
        let p = dom.append_element_with_text(body, "p", "Catan");
        let div = dom.append_element(body, "div");
        dom.append_child(&div, &p).unwrap();
        dom.append_child(&body, &p).unwrap();
        let records = dom.take_records();
        watcher.record(&dom, records);
        assert_eq!(watcher.pending(), &[p]);
    }

    // Requirement: suppression discards self-inflicted records only

    #[test]
    fn test_suppressed_records_discarded() {
        let (mut dom, mut watcher) = observed();
        watcher.suppress();
        dom.append_element_with_text(dom.body(), "p", "engine write");
        let records = dom.take_records();
        assert_eq!(watcher.record(&dom, records), TimerAction::None);
        watcher.release(dom.take_records());
        assert!(watcher.pending().is_empty());
        assert!(!watcher.is_suppressing());
        assert_eq!(watcher.stats().self_records_discarded, 2);
    }

    #[test]
    fn test_release_sweeps_own_writes() {
        let (mut dom, mut watcher) = observed();
        watcher.suppress();
        dom.append_element_with_text(dom.body(), "p", "engine write");
        watcher.release(dom.take_records());

        let page = dom.append_element_with_text(dom.body(), "p", "page write");
        let records = dom.take_records();
        watcher.record(&dom, records);
        assert_eq!(watcher.pending(), &[page]);
    }

    // Requirement: mutations during Draining wait for the next cycle

    #[test]
    fn test_draining_keeps_concurrent_page_mutations() {
        let (mut dom, mut watcher) = observed();
        let body = dom.body();
        dom.append_element_with_text(body, "p", "first");
        let records = dom.take_records();
        let generation = arm_generation(watcher.record(&dom, records));
        watcher.fire(generation).unwrap();

        let late = dom.append_element_with_text(body, "p", "late arrival");
        let records = dom.take_records();
        assert_eq!(watcher.record(&dom, records), TimerAction::None);
        assert_eq!(watcher.pending(), &[late]);

        let next = arm_generation(watcher.finish_drain());
        assert_eq!(watcher.state(), WatchState::Debouncing);
        assert_eq!(watcher.fire(next).unwrap(), vec![late]);
        assert_eq!(watcher.finish_drain(), TimerAction::None);
        assert_eq!(watcher.state(), WatchState::Observing);
    }

    #[test]
    fn test_detach_clears_and_invalidates() {
        let (mut dom, mut watcher) = observed();
        dom.append_element_with_text(dom.body(), "p", "Catan");
        let records = dom.take_records();
        let generation = arm_generation(watcher.record(&dom, records));
        watcher.detach();
        assert_eq!(watcher.state(), WatchState::Idle);
        assert!(watcher.pending().is_empty());
        assert!(watcher.fire(generation).is_none());
    }
}
