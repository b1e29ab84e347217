//! Wire messages exchanged between pipeline stages.

pub mod codec;
pub mod message;

pub use message::{BulkBucket, BulkCommand, BulkCounter, BulkState, BulkStatus};
