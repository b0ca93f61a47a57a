//! AnnotationSession: one annotation run over one document
//!
//! # Lifecycle
//! Inactive → Loading → Scanning → Watching → (stop) → Inactive
//!
//! # Scheduling
//! Nothing here blocks or sleeps. Work is queued as a job (the full pass over
//! entry chunks, or a drain over element chunks) and advanced one chunk per
//! `step`. Hosts yield to their event loop between `Step::Continue`s and arm
//! the debounce timer they are handed in `Step::Idle`.
//!
//! # Usage
//! ```ignore
//! let mut session = AnnotationSession::new(EngineConfig::default())?;
//! session.start(&mut dom, &provider).await?;
//! session.run_to_idle(&mut dom);
//! // host: on_mutations(..) / on_timer(..) / step(..) as events arrive
//! session.stop(&mut dom);
//! ```

use std::sync::Arc;

use instant::Instant;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::annotator;
use super::decoration::{self, STATUS_ATTR};
use super::watcher::{MutationWatcher, TimerAction};
use crate::catalog::{load_catalog, CatalogEntry, CatalogProvider, CatalogSource, NameIndex};
use crate::config::EngineConfig;
use crate::dom::{Dom, MutationRecord};
use crate::error::{EngineError, Result};
use crate::scanner::{sort_longest_first, Matcher};

pub const LOADING_TEXT: &str = "Loading game catalog…";
pub const FAILURE_TEXT: &str = "Could not load the game catalog";

// =============================================================================
// Public types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Inactive,
    /// Waiting on the catalog provider
    Loading,
    /// Full-document pass in progress
    Scanning,
    /// Full pass done, reacting to page mutations
    Watching,
}

/// Handed out by `begin_loading`; a ticket from before a stop or restart is
/// rejected by `begin`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// More work queued; yield, then step again
    Continue,
    /// Nothing queued; apply the timer action and wait for events
    Idle(TimerAction),
    /// Session is not running
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub decorations: usize,
    pub full_pass_ms: f64,
    pub incremental_passes: usize,
    pub detached_skipped: usize,
    pub catalog_size: usize,
    pub skipped_patterns: usize,
}

// =============================================================================
// Internals
// =============================================================================

enum Job<N> {
    FullPass {
        entries: Vec<Arc<CatalogEntry>>,
        next: usize,
        started: Instant,
    },
    Drain {
        elements: Vec<N>,
        next: usize,
    },
}

struct StatusIndicator<N> {
    element: N,
    text: N,
}

// =============================================================================
// AnnotationSession
// =============================================================================

pub struct AnnotationSession<D: Dom> {
    config: EngineConfig,
    phase: Phase,
    epoch: u64,
    index: Option<NameIndex>,
    matcher: Option<Matcher>,
    watcher: MutationWatcher<D::Node>,
    job: Option<Job<D::Node>>,
    /// Timer request raised outside a drain, handed out on the next Idle
    timer: TimerAction,
    status: Option<StatusIndicator<D::Node>>,
    /// Active-flag changes not yet handed to the host
    signals: Vec<bool>,
    stats: SessionStats,
}

impl<D: Dom> AnnotationSession<D> {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let watcher = MutationWatcher::new(config.debounce_ms);
        Ok(Self {
            config,
            phase: Phase::Inactive,
            epoch: 0,
            index: None,
            matcher: None,
            watcher,
            job: None,
            timer: TimerAction::None,
            status: None,
            signals: Vec::new(),
            stats: SessionStats::default(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase != Phase::Inactive
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn watcher(&self) -> &MutationWatcher<D::Node> {
        &self.watcher
    }

    pub fn index(&self) -> Option<&NameIndex> {
        self.index.as_ref()
    }

    /// Current status indicator text, if one is shown
    pub fn status_text(&self, dom: &D) -> Option<String> {
        self.status.as_ref().and_then(|s| dom.text(&s.text))
    }

    /// Every `is_active` flip since the last call, oldest first.
    ///
    /// Hosts notify their own listeners with these once they have let go of
    /// the session, so a listener may call straight back into it.
    pub fn take_signals(&mut self) -> Vec<bool> {
        std::mem::take(&mut self.signals)
    }

    pub fn has_signals(&self) -> bool {
        !self.signals.is_empty()
    }

    // -------------------------------------------------------------------------
    // Start
    // -------------------------------------------------------------------------

    /// Load the catalog and queue the full pass. Drive it with `step`.
    ///
    /// The returned source tells the host whether a background refresh is
    /// due. `None` when a stop or restart overtook this start.
    pub async fn start<P>(&mut self, dom: &mut D, provider: &P) -> Result<Option<CatalogSource>>
    where
        P: CatalogProvider + ?Sized,
    {
        let ticket = self.begin_loading(dom);
        match load_catalog(provider).await {
            Ok(load) => {
                let started = self.begin(dom, ticket, load.entries)?;
                Ok(started.then_some(load.source))
            }
            Err(err) => {
                self.abort_start(dom, ticket, &err);
                Err(err)
            }
        }
    }

    /// First half of a start. An active session is stopped first.
    pub fn begin_loading(&mut self, dom: &mut D) -> LoadTicket {
        if self.is_active() {
            debug!("restarting active session");
            self.stop(dom);
        }
        self.epoch += 1;
        self.stats = SessionStats::default();
        self.set_phase(Phase::Loading);
        self.show_status(dom, LOADING_TEXT);
        LoadTicket { epoch: self.epoch }
    }

    /// Second half of a start: index the catalog and queue the full pass.
    /// `Ok(false)` when the ticket was overtaken by a stop or restart.
    pub fn begin(&mut self, dom: &mut D, ticket: LoadTicket, entries: Vec<CatalogEntry>) -> Result<bool> {
        if ticket.epoch != self.epoch || self.phase != Phase::Loading {
            debug!("discarding catalog for an abandoned start");
            return Ok(false);
        }

        let index = NameIndex::build(entries, self.config.filter_short_numerals);
        let mut matcher = match Matcher::with_size_limit(
            &index,
            self.config.case_insensitive,
            self.config.pattern_size_limit,
        ) {
            Ok(matcher) => matcher,
            Err(err) => {
                self.abort_start(dom, ticket, &err);
                return Err(err);
            }
        };
        let Some(root) = dom.root() else {
            let err = EngineError::Dom("document has no body".into());
            self.abort_start(dom, ticket, &err);
            return Err(err);
        };

        let text = annotator::visible_text(dom, &root);
        let mut found = matcher.find_matches(&text, &index);
        sort_longest_first(&mut found);

        info!(catalog = index.len(), matched = found.len(), "catalog indexed");
        self.stats.catalog_size = index.len();
        self.stats.skipped_patterns = matcher.skipped_patterns();
        self.index = Some(index);
        self.matcher = Some(matcher);
        self.set_phase(Phase::Scanning);
        self.show_status(dom, &progress_text(found.len(), 0));
        self.job = Some(Job::FullPass { entries: found, next: 0, started: Instant::now() });
        Ok(true)
    }

    /// Catalog could not be obtained: show the failure and stay unannotated
    pub fn abort_start(&mut self, dom: &mut D, ticket: LoadTicket, err: &EngineError) {
        if ticket.epoch != self.epoch {
            return;
        }
        error!(error = %err, "annotation could not start");
        self.job = None;
        self.index = None;
        self.matcher = None;
        self.show_status(dom, &format!("{FAILURE_TEXT}: {err}"));
        self.set_phase(Phase::Inactive);
    }

    // -------------------------------------------------------------------------
    // Work
    // -------------------------------------------------------------------------

    /// Advance the current job by one chunk
    pub fn step(&mut self, dom: &mut D) -> Step {
        if self.phase == Phase::Inactive {
            return Step::Stopped;
        }
        match self.job.take() {
            None => Step::Idle(std::mem::replace(&mut self.timer, TimerAction::None)),
            Some(Job::FullPass { entries, next, started }) => self.full_pass_chunk(dom, entries, next, started),
            Some(Job::Drain { elements, next }) => self.drain_chunk(dom, elements, next),
        }
    }

    /// Step until idle or stopped; returns the last timer action
    pub fn run_to_idle(&mut self, dom: &mut D) -> TimerAction {
        loop {
            match self.step(dom) {
                Step::Continue => continue,
                Step::Idle(action) => return action,
                Step::Stopped => return TimerAction::None,
            }
        }
    }

    fn full_pass_chunk(
        &mut self,
        dom: &mut D,
        entries: Vec<Arc<CatalogEntry>>,
        next: usize,
        started: Instant,
    ) -> Step {
        let Some(root) = dom.root() else {
            warn!("document body went away during the full pass");
            return self.finish_full_pass(dom, started);
        };

        let end = (next + self.config.entries_per_chunk).min(entries.len());
        let added = self.annotate_under(dom, &root, &entries[next..end]);
        self.stats.decorations += added;

        if end < entries.len() {
            self.show_status(dom, &progress_text(entries.len(), end));
            self.job = Some(Job::FullPass { entries, next: end, started });
            Step::Continue
        } else {
            self.finish_full_pass(dom, started)
        }
    }

    fn finish_full_pass(&mut self, dom: &mut D, started: Instant) -> Step {
        self.stats.full_pass_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.hide_status(dom);
        if let Err(err) = dom.observe_mutations() {
            warn!(error = %err, "could not observe page mutations");
        }
        self.watcher.attach();
        self.set_phase(Phase::Watching);
        info!(
            decorations = self.stats.decorations,
            ms = self.stats.full_pass_ms,
            "full pass complete"
        );
        Step::Idle(std::mem::replace(&mut self.timer, TimerAction::None))
    }

    fn drain_chunk(&mut self, dom: &mut D, elements: Vec<D::Node>, next: usize) -> Step {
        let end = (next + self.config.elements_per_chunk).min(elements.len());
        for element in &elements[next..end] {
            if !dom.is_connected(element) {
                let err = EngineError::DetachedNode(dom.describe(element));
                debug!(error = %err, "skipping");
                self.stats.detached_skipped += 1;
                continue;
            }
            if decoration::within_marker(dom, element) {
                continue;
            }
            let text = annotator::visible_text(dom, element);
            let found = match (self.matcher.as_mut(), self.index.as_ref()) {
                (Some(matcher), Some(index)) => {
                    let mut found = matcher.find_matches(&text, index);
                    sort_longest_first(&mut found);
                    found
                }
                _ => Vec::new(),
            };
            if !found.is_empty() {
                let added = self.annotate_under(dom, element, &found);
                self.stats.decorations += added;
            }
        }

        if end < elements.len() {
            self.job = Some(Job::Drain { elements, next: end });
            return Step::Continue;
        }

        self.stats.incremental_passes += 1;
        debug!(elements = elements.len(), "drain complete");
        let action = match self.watcher.finish_drain() {
            TimerAction::None => std::mem::replace(&mut self.timer, TimerAction::None),
            armed => {
                self.timer = TimerAction::None;
                armed
            }
        };
        Step::Idle(action)
    }

    /// One suppressed write section of annotation under `root`
    fn annotate_under(&mut self, dom: &mut D, root: &D::Node, entries: &[Arc<CatalogEntry>]) -> usize {
        let status = self.status.as_ref().map(|s| s.element.clone());
        let Some(matcher) = self.matcher.as_mut() else {
            return 0;
        };

        let foreign = dom.take_records();
        let action = self.watcher.record(dom, foreign);
        self.watcher.suppress();
        let added = annotator::annotate(dom, root, entries, matcher, |node: &D::Node| {
            status.as_ref() == Some(node)
        });
        let own = dom.take_records();
        self.watcher.release(own);

        self.stats.skipped_patterns = matcher.skipped_patterns();
        self.remember_timer(action);
        added
    }

    fn remember_timer(&mut self, action: TimerAction) {
        if let TimerAction::Arm { .. } = action {
            self.timer = action;
        }
    }

    // -------------------------------------------------------------------------
    // Host events
    // -------------------------------------------------------------------------

    /// Observer callback
    pub fn on_mutations(&mut self, dom: &D, records: Vec<MutationRecord<D::Node>>) -> TimerAction {
        self.watcher.record(dom, records)
    }

    /// Debounce timer fired. True when a drain was queued; drive it with `step`.
    pub fn on_timer(&mut self, dom: &D, generation: u64) -> bool {
        if self.phase != Phase::Watching || self.job.is_some() {
            return false;
        }
        let Some(batch) = self.watcher.fire(generation) else {
            return false;
        };
        let elements = prune_nested(dom, batch);
        debug!(elements = elements.len(), "draining queued elements");
        self.job = Some(Job::Drain { elements, next: 0 });
        true
    }

    // -------------------------------------------------------------------------
    // Settings
    // -------------------------------------------------------------------------

    /// Applies to every pass from now on
    pub fn set_case_sensitivity(&mut self, case_insensitive: bool) -> Result<()> {
        if self.config.case_insensitive == case_insensitive {
            return Ok(());
        }
        self.config.case_insensitive = case_insensitive;
        if let Some(index) = self.index.as_ref() {
            self.matcher = Some(Matcher::with_size_limit(
                index,
                case_insensitive,
                self.config.pattern_size_limit,
            )?);
        }
        Ok(())
    }

    /// Swap in a refreshed catalog for subsequent passes
    pub fn replace_catalog(&mut self, entries: Vec<CatalogEntry>) -> Result<()> {
        if self.index.is_none() {
            debug!("no running session, refreshed catalog dropped");
            return Ok(());
        }
        let index = NameIndex::build(entries, self.config.filter_short_numerals);
        let matcher = Matcher::with_size_limit(&index, self.config.case_insensitive, self.config.pattern_size_limit)?;
        info!(catalog = index.len(), "catalog replaced");
        self.stats.catalog_size = index.len();
        self.index = Some(index);
        self.matcher = Some(matcher);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Stop
    // -------------------------------------------------------------------------

    /// Tear everything down and restore the page text. Idempotent.
    pub fn stop(&mut self, dom: &mut D) {
        self.epoch += 1;
        self.job = None;
        self.timer = TimerAction::None;
        self.watcher.detach();
        dom.disconnect_observer();

        let removed = match dom.root() {
            Some(root) => annotator::strip(dom, &root),
            None => 0,
        };
        self.hide_status(dom);
        self.index = None;
        self.matcher = None;

        if self.is_active() {
            info!(removed, "annotation stopped");
        }
        self.set_phase(Phase::Inactive);
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn set_phase(&mut self, phase: Phase) {
        let was_active = self.is_active();
        self.phase = phase;
        let active = self.is_active();
        if was_active != active {
            self.signals.push(active);
        }
    }

    fn show_status(&mut self, dom: &mut D, message: &str) {
        if let Some(status) = self.status.as_ref() {
            if dom.is_connected(&status.element) {
                if let Err(err) = dom.set_text(&status.text, message) {
                    debug!(error = %err, "could not update status");
                }
                return;
            }
        }

        let Some(root) = dom.root() else { return };
        let foreign = dom.take_records();
        let action = self.watcher.record(dom, foreign);
        self.watcher.suppress();
        let created = create_status(dom, &root, message);
        let own = dom.take_records();
        self.watcher.release(own);
        self.remember_timer(action);

        match created {
            Ok(status) => self.status = Some(status),
            Err(err) => debug!(error = %err, "could not show status"),
        }
    }

    fn hide_status(&mut self, dom: &mut D) {
        let Some(status) = self.status.take() else { return };
        let foreign = dom.take_records();
        let action = self.watcher.record(dom, foreign);
        self.watcher.suppress();
        if let Err(err) = dom.remove(&status.element) {
            debug!(error = %err, "could not remove status");
        }
        let own = dom.take_records();
        self.watcher.release(own);
        self.remember_timer(action);
    }
}

fn create_status<D: Dom>(dom: &mut D, root: &D::Node, message: &str) -> Result<StatusIndicator<D::Node>> {
    let element = dom.create_element("div")?;
    dom.set_attribute(&element, STATUS_ATTR, "")?;
    dom.set_attribute(&element, "role", "status")?;
    let text = dom.create_text(message)?;
    dom.append_child(&element, &text)?;
    dom.append_child(root, &element)?;
    Ok(StatusIndicator { element, text })
}

fn progress_text(total: usize, done: usize) -> String {
    format!("Annotating {total} titles… {done}/{total}")
}

/// Drop elements whose ancestor is also in the batch; the ancestor's pass
/// covers them
fn prune_nested<D: Dom>(dom: &D, batch: Vec<D::Node>) -> Vec<D::Node> {
    batch
        .iter()
        .filter(|node| {
            let mut current = dom.parent(node);
            while let Some(ancestor) = current {
                if batch.contains(&ancestor) {
                    return false;
                }
                current = dom.parent(&ancestor);
            }
            true
        })
        .cloned()
        .collect()
}
