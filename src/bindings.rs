//! PageAnnotator: the engine as a JS class
//!
//! The binding owns everything asynchronous: the MutationObserver callback,
//! the debounce `setTimeout`, the cooperative yield between steps and the
//! background catalog refresh. The session itself stays synchronous and is
//! only ever borrowed for one step at a time.
//!
//! # Usage (WASM)
//! ```javascript,ignore
//! const annotator = new PageAnnotator(
//!   { debounce_ms: 750 },
//!   { auto_run: true, case_insensitive: false },
//!   { getCurrent: () => cache.current(), refresh: () => cache.refresh() },
//!   { getDetail: (id) => details.get(id) },
//! );
//! annotator.onActiveChange((active) => setToolbarIcon(active));
//! if (annotator.shouldAutoRun()) await annotator.start();
//! ```

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use async_trait::async_trait;
use js_sys::{Array, Function, Promise, Reflect};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{future_to_promise, spawn_local, JsFuture};
use web_sys::{MutationObserver, Node};

use crate::catalog::{
    load_catalog, CatalogEntry, CatalogProvider, CatalogSnapshot, DetailProvider, DetailRecord, ProviderError,
};
use crate::config::{EngineConfig, OriginPolicy};
use crate::dom::{convert_records, WebDom};
use crate::engine::{badge_item_id, describe, AnnotationSession, DetailView, SessionStats, Step, TimerAction, WatchStats};
use crate::error::EngineError;

impl From<EngineError> for JsValue {
    fn from(err: EngineError) -> Self {
        JsValue::from_str(&err.to_string())
    }
}

// =============================================================================
// JS collaborators
// =============================================================================

fn method(target: &JsValue, name: &str) -> Result<Function, JsValue> {
    Reflect::get(target, &JsValue::from_str(name))?
        .dyn_into::<Function>()
        .map_err(|_| JsValue::from_str(&format!("provider has no {name}() method")))
}

/// Await a value that may or may not be a promise
async fn settle(value: JsValue) -> Result<JsValue, JsValue> {
    JsFuture::from(Promise::resolve(&value)).await
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RefreshPayload {
    List(Vec<CatalogEntry>),
    Wrapped { entries: Vec<CatalogEntry> },
}

struct JsCatalogProvider {
    target: JsValue,
}

#[async_trait(?Send)]
impl CatalogProvider for JsCatalogProvider {
    fn current(&self) -> CatalogSnapshot {
        let value = method(&self.target, "getCurrent").and_then(|f| f.call0(&self.target));
        match value {
            Ok(value) if value.is_object() => serde_wasm_bindgen::from_value(value).unwrap_or_else(|e| {
                warn!(error = %e, "unreadable cached catalog");
                CatalogSnapshot::default()
            }),
            Ok(_) => CatalogSnapshot::default(),
            Err(e) => {
                warn!(error = ?e, "getCurrent failed");
                CatalogSnapshot::default()
            }
        }
    }

    async fn refresh(&self) -> Result<Vec<CatalogEntry>, ProviderError> {
        let pending = method(&self.target, "refresh")
            .and_then(|f| f.call0(&self.target))
            .map_err(|e| ProviderError(format!("{e:?}")))?;
        let value = settle(pending).await.map_err(|e| ProviderError(format!("{e:?}")))?;
        match serde_wasm_bindgen::from_value(value) {
            Ok(RefreshPayload::List(entries)) | Ok(RefreshPayload::Wrapped { entries }) => Ok(entries),
            Err(e) => Err(ProviderError(format!("unreadable catalog: {e}"))),
        }
    }
}

struct JsDetailProvider {
    target: JsValue,
}

#[async_trait(?Send)]
impl DetailProvider for JsDetailProvider {
    async fn detail(&self, id: &str) -> Option<DetailRecord> {
        let pending = method(&self.target, "getDetail")
            .and_then(|f| f.call1(&self.target, &JsValue::from_str(id)))
            .ok()?;
        let value = settle(pending).await.ok()?;
        if value.is_null() || value.is_undefined() {
            return None;
        }
        serde_wasm_bindgen::from_value(value)
            .map_err(|e| debug!(id, error = %e, "unreadable detail record"))
            .ok()
    }
}

// =============================================================================
// Scheduling
// =============================================================================

struct Inner {
    session: AnnotationSession<WebDom>,
    dom: WebDom,
    /// A drive loop is running
    driving: bool,
    /// `onActiveChange` callbacks
    listeners: Vec<Function>,
}

/// Resolve on the next turn of the host task queue
async fn next_turn() {
    let promise = Promise::new(&mut |resolve, _reject| {
        let scheduled = web_sys::window()
            .map(|w| w.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, 0).is_ok())
            .unwrap_or(false);
        if !scheduled {
            let _ = resolve.call0(&JsValue::UNDEFINED);
        }
    });
    let _ = JsFuture::from(promise).await;
}

/// Hand queued active-flag changes to the JS listeners. Must run with no
/// borrow of `inner` outstanding so a listener can call back into the
/// annotator; a busy `inner` leaves the changes queued for the next call.
fn announce(inner: &Rc<RefCell<Inner>>) {
    let (signals, listeners) = {
        let Ok(mut guard) = inner.try_borrow_mut() else { return };
        if !guard.session.has_signals() {
            return;
        }
        (guard.session.take_signals(), guard.listeners.clone())
    };
    for active in signals {
        for listener in &listeners {
            if let Err(e) = listener.call1(&JsValue::NULL, &JsValue::from_bool(active)) {
                warn!(error = ?e, "active-change listener threw");
            }
        }
    }
}

fn ensure_driving(inner: &Rc<RefCell<Inner>>) {
    {
        let Ok(mut guard) = inner.try_borrow_mut() else { return };
        if guard.driving {
            return;
        }
        guard.driving = true;
    }
    spawn_local(drive(Rc::clone(inner)));
}

/// Step the session, yielding between chunks, until it goes idle
async fn drive(inner: Rc<RefCell<Inner>>) {
    loop {
        let step = {
            let mut guard = inner.borrow_mut();
            let Inner { session, dom, .. } = &mut *guard;
            session.step(dom)
        };
        announce(&inner);
        match step {
            Step::Continue => next_turn().await,
            Step::Idle(action) => {
                inner.borrow_mut().driving = false;
                schedule(&inner, action);
                return;
            }
            Step::Stopped => {
                inner.borrow_mut().driving = false;
                return;
            }
        }
    }
}

fn schedule(inner: &Rc<RefCell<Inner>>, action: TimerAction) {
    let TimerAction::Arm { generation, delay_ms } = action else { return };
    let weak = Rc::downgrade(inner);
    let callback = Closure::once_into_js(move || {
        let Some(inner) = weak.upgrade() else { return };
        let queued = {
            let Ok(mut guard) = inner.try_borrow_mut() else { return };
            let Inner { session, dom, .. } = &mut *guard;
            session.on_timer(dom, generation)
        };
        if queued {
            ensure_driving(&inner);
        }
    });
    let armed = web_sys::window().map(|w| {
        let delay = i32::try_from(delay_ms).unwrap_or(i32::MAX);
        w.set_timeout_with_callback_and_timeout_and_arguments_0(callback.unchecked_ref(), delay)
    });
    if !matches!(armed, Some(Ok(_))) {
        warn!(generation, "could not arm debounce timer");
    }
}

fn on_records(weak: &Weak<RefCell<Inner>>, records: Array) {
    let Some(inner) = weak.upgrade() else { return };
    let action = {
        let Ok(mut guard) = inner.try_borrow_mut() else {
            warn!("mutation records arrived during a step");
            return;
        };
        let Inner { session, dom, .. } = &mut *guard;
        session.on_mutations(dom, convert_records(&records))
    };
    schedule(&inner, action);
}

async fn background_refresh(inner: Weak<RefCell<Inner>>, catalog: Rc<JsCatalogProvider>) {
    let entries = match catalog.refresh().await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "background catalog refresh failed");
            return;
        }
    };
    // The session is only ever borrowed within one turn; wait it out
    loop {
        let Some(strong) = inner.upgrade() else { return };
        if strong.try_borrow_mut().is_err() {
            drop(strong);
            debug!("annotator busy, applying refreshed catalog next turn");
            next_turn().await;
            continue;
        }
        if let Err(e) = strong.borrow_mut().session.replace_catalog(entries) {
            warn!(error = %e, "refreshed catalog rejected");
        }
        return;
    }
}

#[derive(Serialize)]
struct StatsView<'a> {
    session: &'a SessionStats,
    watcher: &'a WatchStats,
    phase: String,
}

// =============================================================================
// PageAnnotator
// =============================================================================

#[wasm_bindgen]
pub struct PageAnnotator {
    inner: Rc<RefCell<Inner>>,
    catalog: Rc<JsCatalogProvider>,
    details: Option<Rc<JsDetailProvider>>,
    policy: OriginPolicy,
    _observer_callback: Closure<dyn FnMut(Array, MutationObserver)>,
}

#[wasm_bindgen]
impl PageAnnotator {
    /// `config` and `policy` are plain objects (missing fields use defaults);
    /// `detailProvider` may be omitted
    #[wasm_bindgen(constructor)]
    pub fn js_new(
        config: JsValue,
        policy: JsValue,
        catalog_provider: JsValue,
        detail_provider: JsValue,
    ) -> Result<PageAnnotator, JsValue> {
        let mut config: EngineConfig = if config.is_undefined() || config.is_null() {
            EngineConfig::default()
        } else {
            serde_wasm_bindgen::from_value(config)
                .map_err(|e| JsValue::from_str(&format!("Failed to parse config: {}", e)))?
        };
        let policy: OriginPolicy = if policy.is_undefined() || policy.is_null() {
            OriginPolicy::default()
        } else {
            serde_wasm_bindgen::from_value(policy)
                .map_err(|e| JsValue::from_str(&format!("Failed to parse policy: {}", e)))?
        };
        config.apply_policy(&policy);

        let session = AnnotationSession::new(config)?;
        let dom = WebDom::from_window()?;
        let inner = Rc::new(RefCell::new(Inner { session, dom, driving: false, listeners: Vec::new() }));

        let weak = Rc::downgrade(&inner);
        let callback = Closure::wrap(Box::new(move |records: Array, _observer: MutationObserver| {
            on_records(&weak, records);
        }) as Box<dyn FnMut(Array, MutationObserver)>);
        let observer = MutationObserver::new(callback.as_ref().unchecked_ref())?;
        inner.borrow_mut().dom.set_observer(observer);

        let details = if detail_provider.is_undefined() || detail_provider.is_null() {
            None
        } else {
            Some(Rc::new(JsDetailProvider { target: detail_provider }))
        };

        Ok(PageAnnotator {
            inner,
            catalog: Rc::new(JsCatalogProvider { target: catalog_provider }),
            details,
            policy,
            _observer_callback: callback,
        })
    }

    /// Load the catalog and annotate the page. Resolves to false when a stop
    /// or restart overtook this start; rejects when the catalog is unavailable.
    #[wasm_bindgen(js_name = "start")]
    pub fn js_start(&self) -> Promise {
        let inner = Rc::clone(&self.inner);
        let catalog = Rc::clone(&self.catalog);
        future_to_promise(async move {
            let ticket = {
                let mut guard = inner.borrow_mut();
                let Inner { session, dom, .. } = &mut *guard;
                session.begin_loading(dom)
            };
            announce(&inner);

            let load = match load_catalog(catalog.as_ref()).await {
                Ok(load) => load,
                Err(err) => {
                    {
                        let mut guard = inner.borrow_mut();
                        let Inner { session, dom, .. } = &mut *guard;
                        session.abort_start(dom, ticket, &err);
                    }
                    announce(&inner);
                    return Err(err.into());
                }
            };

            let refresh = load.needs_background_refresh();
            let started = {
                let mut guard = inner.borrow_mut();
                let Inner { session, dom, .. } = &mut *guard;
                session.begin(dom, ticket, load.entries)
            };
            announce(&inner);
            if !started? {
                return Ok(JsValue::FALSE);
            }

            if refresh {
                info!("catalog is stale, refreshing in the background");
                spawn_local(background_refresh(Rc::downgrade(&inner), Rc::clone(&catalog)));
            }
            ensure_driving(&inner);
            Ok(JsValue::TRUE)
        })
    }

    /// Remove every decoration and stop watching. Safe at any time.
    #[wasm_bindgen(js_name = "stop")]
    pub fn js_stop(&self) -> Result<(), JsValue> {
        {
            let mut guard = self
                .inner
                .try_borrow_mut()
                .map_err(|_| JsValue::from_str("annotator is busy"))?;
            let Inner { session, dom, .. } = &mut *guard;
            session.stop(dom);
        }
        announce(&self.inner);
        Ok(())
    }

    #[wasm_bindgen(js_name = "setCaseSensitivity")]
    pub fn js_set_case_sensitivity(&self, case_insensitive: bool) -> Result<(), JsValue> {
        self.inner
            .borrow_mut()
            .session
            .set_case_sensitivity(case_insensitive)
            .map_err(JsValue::from)
    }

    #[wasm_bindgen(js_name = "isActive")]
    pub fn js_is_active(&self) -> bool {
        self.inner.borrow().session.is_active()
    }

    #[wasm_bindgen(js_name = "shouldAutoRun")]
    pub fn js_should_auto_run(&self) -> bool {
        self.policy.auto_run
    }

    /// `callback(active: boolean)` on every activation change
    #[wasm_bindgen(js_name = "onActiveChange")]
    pub fn js_on_active_change(&self, callback: Function) {
        self.inner.borrow_mut().listeners.push(callback);
    }

    /// Expanded info for a badge (or its wrapper) as display text
    #[wasm_bindgen(js_name = "describeBadge")]
    pub fn js_describe_badge(&self, node: Node) -> Promise {
        let id = {
            let guard = self.inner.borrow();
            badge_item_id(&guard.dom, &node)
        };
        let details = self.details.clone();
        future_to_promise(async move {
            let id = id.ok_or_else(|| JsValue::from_str("not a decoration"))?;
            let view = match details {
                Some(provider) => describe(provider.as_ref(), &id).await,
                None => DetailView::Unavailable { id },
            };
            Ok(JsValue::from_str(&view.summary()))
        })
    }

    #[wasm_bindgen(js_name = "stats")]
    pub fn js_stats(&self) -> JsValue {
        let guard = self.inner.borrow();
        let view = StatsView {
            session: guard.session.stats(),
            watcher: guard.session.watcher().stats(),
            phase: format!("{:?}", guard.session.phase()).to_lowercase(),
        };
        serde_wasm_bindgen::to_value(&view).unwrap_or(JsValue::NULL)
    }
}

impl Drop for PageAnnotator {
    fn drop(&mut self) {
        // The observer callback is freed with us
        if let Ok(mut guard) = self.inner.try_borrow_mut() {
            guard.dom.disconnect_observer();
        }
    }
}
