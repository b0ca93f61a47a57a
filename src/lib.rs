//! BoardLens: live page annotation for board game titles
//!
//! A Rust/WASM engine that finds catalog titles in arbitrary web pages, wraps
//! each occurrence with a rating badge and keeps the page annotated while it
//! mutates (SPA navigation, infinite scroll, lazy content).
//!
//! # Architecture
//!
//! ## Catalog
//! - `catalog/mod.rs` - CatalogEntry
//! - `catalog/index.rs` - NameIndex: display name -> entry, short numerals dropped
//! - `catalog/provider.rs` - CatalogProvider / DetailProvider seams, `load_catalog`
//!
//! ## Scanner
//! - `scanner/pattern.rs` - NamePattern: boundary-aware literal regex per name
//! - `scanner/matcher.rs` - Matcher: Aho-Corasick prefilter + pattern confirmation
//!
//! ## Engine
//! - `engine/decoration.rs` - Badge + wrapper markup, colour ramp
//! - `engine/annotator.rs` - Splice decorations into text leaves, strip them
//! - `engine/watcher.rs` - MutationWatcher: debounced queue, self-mutation suppression
//! - `engine/session.rs` - AnnotationSession: lifecycle, chunked full pass and drains
//! - `engine/enrich.rs` - Expanded badge info
//!
//! ## DOM
//! - `dom/arena.rs` - ArenaDom: in-memory tree (native, tests)
//! - `dom/web.rs` - WebDom: live browser document (wasm32)
//!
//! # Usage (WASM)
//! ```javascript,ignore
//! import init, { PageAnnotator } from 'boardlens';
//!
//! await init();
//!
//! const annotator = new PageAnnotator(
//!   {},                                        // EngineConfig overrides
//!   { auto_run: true, case_insensitive: false },
//!   catalogCache,                              // { getCurrent(), refresh() }
//!   detailCache,                               // { getDetail(id) }
//! );
//! annotator.onActiveChange((active) => updateToolbar(active));
//! await annotator.start();
//! // ...
//! annotator.stop();
//! ```

pub mod catalog;
pub mod config;
pub mod dom;
pub mod engine;
pub mod error;
pub mod scanner;

#[cfg(target_arch = "wasm32")]
pub mod bindings;

pub use catalog::{CatalogEntry, CatalogProvider, CatalogSnapshot, DetailProvider, DetailRecord, NameIndex};
pub use config::{EngineConfig, OriginPolicy};
pub use engine::{AnnotationSession, Phase, Step, TimerAction};
pub use error::{EngineError, Result};
pub use scanner::{find_matches, sort_longest_first, Matcher};

#[cfg(target_arch = "wasm32")]
pub use bindings::PageAnnotator;

use wasm_bindgen::prelude::*;

// When the `wee_alloc` feature is enabled, use `wee_alloc` as the global
// allocator for smaller WASM bundle size.
#[cfg(feature = "wee_alloc")]
#[global_allocator]
static ALLOC: wee_alloc::WeeAlloc = wee_alloc::WeeAlloc::INIT;

/// Panic hook and tracing subscriber for the browser console
#[wasm_bindgen(start)]
pub fn main() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();

    #[cfg(target_arch = "wasm32")]
    tracing_wasm::set_as_global_default();
}

/// Get version information
#[wasm_bindgen]
pub fn version() -> String {
    format!("boardlens v{}", env!("CARGO_PKG_VERSION"))
}
