//! Engine: decorating the page and keeping it decorated
//!
//! - `decoration.rs` - badge + wrapper markup, marker attributes, colour ramp
//! - `annotator.rs` - splice decorations into text leaves, strip them again
//! - `watcher.rs` - debounced queue of page-added elements
//! - `session.rs` - lifecycle and chunked scheduling over all of the above
//! - `enrich.rs` - expanded badge info from the detail collaborator

pub mod annotator;
pub mod decoration;
pub mod enrich;
pub mod session;
pub mod watcher;

pub use annotator::{annotate, strip, visible_text};
pub use decoration::{Badge, ScoreBand, BADGE_ATTR, ITEM_ID_ATTR, MARKER_ATTRS, STATUS_ATTR, WRAPPER_ATTR};
pub use enrich::{badge_item_id, describe, DetailView};
pub use session::{AnnotationSession, LoadTicket, Phase, SessionStats, Step};
pub use watcher::{MutationWatcher, TimerAction, WatchState, WatchStats};
