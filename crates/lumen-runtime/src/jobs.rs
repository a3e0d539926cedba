//! Pipeline runs as queued, cancellable, cached jobs.

use std::hash::Hasher;
use std::sync::Arc;

use lumen_pipeline::{Pipeline, PipelineError, PipelineOptions, ProcessOutput};
use parking_lot::Mutex;
use siphasher::sip::SipHasher13;

use crate::cache::BoundedCache;
use crate::queue::{TaskError, TaskHandle, TaskQueue};

/// Why a pipeline job failed.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// A stage failed (including cancellation, attributed to the stage
    /// that saw it).
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// The blocking worker went away without a result.
    #[error("pipeline worker failed: {0}")]
    Worker(String),
}

/// Queue whose tasks are pipeline runs.
pub type PipelineQueue = TaskQueue<ProcessOutput, JobError>;

/// Handle to a queued pipeline run.
pub type PipelineTask = TaskHandle<ProcessOutput, JobError>;

/// Queue one pipeline run.
///
/// The run executes on Tokio's blocking pool. Its cancellation token is
/// installed as the pipeline interrupt, so cancelling the task stops the
/// run at the next stage, tile, or encode probe.
pub fn enqueue_pipeline(
    queue: &PipelineQueue,
    id: impl Into<String>,
    bytes: Vec<u8>,
    options: PipelineOptions,
) -> PipelineTask {
    queue.enqueue(id, move |token| async move {
        let run = tokio::task::spawn_blocking(move || {
            Pipeline::new(bytes, options)
                .with_interrupt(move || token.is_cancelled())
                .decode()?
                .frame()?
                .upscale()?
                .denoise()?
                .sharpen()?
                .encode()
                .map(lumen_pipeline::pipeline::Encoded::into_output)
        });
        match run.await {
            Ok(result) => result.map_err(JobError::from),
            // Re-raise worker panics so the queue reports them as aborted.
            Err(join) => match join.try_into_panic() {
                Ok(payload) => std::panic::resume_unwind(payload),
                Err(join) => Err(JobError::Worker(join.to_string())),
            },
        }
    })
}

/// Cache key for one input under one set of options.
///
/// # Errors
///
/// Fails only if `options` cannot be serialized.
pub fn content_key(bytes: &[u8], options: &PipelineOptions) -> Result<u64, serde_json::Error> {
    let options = serde_json::to_vec(options)?;
    let mut hasher = SipHasher13::new();
    hasher.write_usize(bytes.len());
    hasher.write(bytes);
    hasher.write(&options);
    Ok(hasher.finish())
}

/// Finished outputs keyed by [`content_key`], shareable across tasks.
pub struct ResultCache {
    inner: Mutex<BoundedCache<u64, Arc<ProcessOutput>>>,
}

impl ResultCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BoundedCache::new(capacity)),
        }
    }

    #[must_use]
    pub fn get(&self, key: u64) -> Option<Arc<ProcessOutput>> {
        self.inner.lock().get(&key).cloned()
    }

    pub fn insert(&self, key: u64, output: Arc<ProcessOutput>) {
        if let Some((evicted, _)) = self.inner.lock().set(key, output) {
            log::debug!("evicted cached result {evicted:016x}");
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

/// Return the cached output for `bytes` and `options`, or run the
/// pipeline on `queue` and cache what it produces.
///
/// # Errors
///
/// The queued task's [`TaskError`].
pub async fn process_cached(
    queue: &PipelineQueue,
    cache: &ResultCache,
    id: impl Into<String>,
    bytes: Vec<u8>,
    options: PipelineOptions,
) -> Result<Arc<ProcessOutput>, TaskError<JobError>> {
    let key = match content_key(&bytes, &options) {
        Ok(key) => Some(key),
        Err(e) => {
            log::warn!("options not cacheable: {e}");
            None
        }
    };
    if let Some(hit) = key.and_then(|key| cache.get(key)) {
        log::debug!("result cache hit");
        return Ok(hit);
    }

    let output = Arc::new(enqueue_pipeline(queue, id, bytes, options).join().await?);
    if let Some(key) = key {
        cache.insert(key, Arc::clone(&output));
    }
    Ok(output)
}
