//! Bounded reading window.
//!
//! Readings are held most-recent-first with a fixed capacity. Inserts
//! push to the front and evict from the back; updates replace in place.
//! The completion guard decides whether a late fetch result may still
//! touch the window.

mod guard;
mod store;

pub use guard::{CompletionGuard, EventSeq, Placement};
pub use store::ReadingStore;
