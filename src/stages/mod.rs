//! Pipeline stages, each a [`crate::consumer::Consumer`] driven by its own
//! [`crate::consumer::ConsumerRunner`].

pub mod counter;
pub mod scroller;
pub mod status;

pub use counter::CounterComputation;
pub use scroller::ScrollerComputation;
pub use status::StatusComputation;

/// Stream carrying submitted [`crate::messaging::BulkCommand`]s
pub const COMMAND_STREAM: &str = "bulk-command";

/// Stream carrying status deltas toward the Status stage
pub const STATUS_STREAM: &str = "bulk-status";

/// Stream carrying [`crate::messaging::BulkCounter`]s from action processors
pub const COUNTER_STREAM: &str = "bulk-counter";

/// Stream carrying an action's buckets
pub fn bucket_stream(action: &str) -> String {
    format!("bulk-{action}")
}
