//! Batch queue between the tracker and storage
//!
//! Events are buffered in memory and written in batches, either when the
//! queue reaches the batch size or when the flush timer fires.

mod batcher;

pub use batcher::{BatchQueue, FlushOutcome, QueueItem, QueueStats};
