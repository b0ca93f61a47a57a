//! Scanner: which catalog names occur in a block of text

pub mod pattern;
pub mod matcher;

pub use pattern::*;
pub use matcher::*;
