//! Shared, mutation-serializing stores: recommendation history and the
//! review queue.
//!
//! Each comes with an in-memory implementation and a JSON-file
//! implementation rooted in a state directory.

pub mod history;
pub mod json_file;
pub mod review_queue;

pub use history::{HistoryRecord, HistoryStore, JsonHistoryStore, MemoryHistoryStore};
pub use json_file::DEFAULT_STATE_DIR;
pub use review_queue::{
    parse_approval_key, queue_key, JsonReviewQueue, MemoryReviewQueue, ReviewEntry, ReviewQueue,
};
