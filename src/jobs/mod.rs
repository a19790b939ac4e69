//! Durable job queue: records, retry policy and the background processor.

pub mod model;
pub mod processor;
pub mod retry;

pub use model::{Job, JobInput, JobStatus};
pub use processor::{JobProcessor, LoopStats, ProcessOutcome};
pub use retry::RetryPolicy;
