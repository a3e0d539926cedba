//! lumen-runtime: scheduling and caching around `lumen-pipeline`.
//!
//! - [`TaskQueue`]: FIFO queue with a concurrency bound and per-task
//!   [`CancellationToken`](tokio_util::sync::CancellationToken)s.
//! - [`BoundedCache`]: fixed-capacity LRU map.
//! - [`jobs`]: pipeline runs on the queue, with the task's token wired
//!   to the pipeline interrupt, and a shared result cache.
//!
//! The queue runs on Tokio and must be used from inside a runtime. The
//! cache does no locking of its own.

pub mod cache;
pub mod jobs;
pub mod queue;

pub use cache::BoundedCache;
pub use jobs::{JobError, PipelineQueue, PipelineTask, ResultCache, enqueue_pipeline, process_cached};
pub use queue::{TaskError, TaskHandle, TaskQueue};
