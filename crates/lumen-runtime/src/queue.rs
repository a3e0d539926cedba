//! Bounded-parallelism task queue with cooperative cancellation.
//!
//! Tasks wait in FIFO order until one of `max_concurrency` slots frees
//! up, then run as Tokio tasks. Every task gets its own
//! [`CancellationToken`]:
//!
//! - cancelling a waiting task removes it from the queue; its work is
//!   never invoked and its handle resolves to [`TaskError::Cancelled`];
//! - cancelling a running task cancels its token, and it is up to the
//!   task to notice. An `Err` returned after cancellation is reported as
//!   [`TaskError::Cancelled`]; an `Ok` is kept.
//!
//! A task that fails or panics only rejects its own handle.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Why a task did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum TaskError<E> {
    /// Cancelled before it started, or failed after its token was
    /// cancelled.
    #[error("task cancelled")]
    Cancelled,

    /// The task returned an error.
    #[error("task failed: {0}")]
    Failed(E),

    /// The task panicked or was torn down with the runtime.
    #[error("task aborted: {0}")]
    Aborted(String),
}

impl<E> TaskError<E> {
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

type TaskResult<T, E> = Result<T, TaskError<E>>;
type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type Work<T, E> = Box<dyn FnOnce(CancellationToken) -> BoxFuture<Result<T, E>> + Send>;

struct Queued<T, E> {
    seq: u64,
    id: String,
    token: CancellationToken,
    work: Work<T, E>,
    done: oneshot::Sender<TaskResult<T, E>>,
}

struct Running {
    id: String,
    token: CancellationToken,
}

struct State<T, E> {
    pending: VecDeque<Queued<T, E>>,
    running: HashMap<u64, Running>,
    max_concurrency: usize,
    next_seq: u64,
}

impl<T, E> State<T, E> {
    /// Cancel every waiting or running task matching `pred`. Returns
    /// whether anything matched.
    fn cancel_where(&mut self, pred: impl Fn(u64, &str) -> bool) -> bool {
        let mut found = false;

        let (cancelled, kept): (VecDeque<_>, VecDeque<_>) = self
            .pending
            .drain(..)
            .partition(|task| pred(task.seq, &task.id));
        self.pending = kept;
        for task in cancelled {
            found = true;
            log::debug!("cancelled queued task {}", task.id);
            task.token.cancel();
            resolve(task.done, &task.id, Err(TaskError::Cancelled));
        }

        for (&seq, running) in &self.running {
            if pred(seq, &running.id) {
                found = true;
                log::debug!("cancelling running task {}", running.id);
                running.token.cancel();
            }
        }
        found
    }
}

fn resolve<T, E>(done: oneshot::Sender<TaskResult<T, E>>, id: &str, result: TaskResult<T, E>) {
    if done.send(result).is_err() {
        log::debug!("handle for task {id} was dropped before completion");
    }
}

/// FIFO queue running at most `max_concurrency` tasks at once.
///
/// Cloning yields another handle to the same queue. Must be used from
/// within a Tokio runtime.
pub struct TaskQueue<T, E> {
    state: Arc<Mutex<State<T, E>>>,
}

impl<T, E> Clone for TaskQueue<T, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T, E> TaskQueue<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Default number of concurrently running tasks.
    pub const DEFAULT_MAX_CONCURRENCY: usize = 2;

    /// Create a queue. A `max_concurrency` of 0 is treated as 1.
    #[must_use]
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                pending: VecDeque::new(),
                running: HashMap::new(),
                max_concurrency: max_concurrency.max(1),
                next_seq: 0,
            })),
        }
    }

    /// Queue `work` under `id`.
    ///
    /// `work` is called with the task's token once a slot is free. Ids
    /// need not be unique; [`cancel`](Self::cancel) affects every task
    /// with the given id.
    pub fn enqueue<F, Fut>(&self, id: impl Into<String>, work: F) -> TaskHandle<T, E>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let id = id.into();
        let token = CancellationToken::new();
        let (done, receiver) = oneshot::channel();
        let work: Work<T, E> = Box::new(move |token| Box::pin(work(token)));

        let seq = {
            let mut state = self.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.push_back(Queued {
                seq,
                id: id.clone(),
                token: token.clone(),
                work,
                done,
            });
            log::debug!("queued task {id} ({} waiting)", state.pending.len());
            seq
        };
        Self::pump(&self.state);

        TaskHandle {
            id,
            seq,
            receiver,
            state: Arc::clone(&self.state),
        }
    }

    /// Cancel every task with `id`, waiting or running. Returns whether
    /// any task matched.
    pub fn cancel(&self, id: &str) -> bool {
        self.state.lock().cancel_where(|_, task_id| task_id == id)
    }

    /// Cancel everything: waiting tasks are dropped and resolve to
    /// [`TaskError::Cancelled`], running tasks have their tokens cancelled.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        log::debug!(
            "clearing queue ({} waiting, {} running)",
            state.pending.len(),
            state.running.len()
        );
        state.cancel_where(|_, _| true);
    }

    /// Number of tasks waiting for a slot.
    #[must_use]
    pub fn size(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Number of tasks currently running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.state.lock().running.len()
    }

    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.state.lock().max_concurrency
    }

    /// Change the concurrency bound. Raising it dispatches waiting tasks
    /// immediately; lowering it never interrupts running ones.
    pub fn set_max_concurrency(&self, max_concurrency: usize) {
        self.state.lock().max_concurrency = max_concurrency.max(1);
        Self::pump(&self.state);
    }

    /// Start waiting tasks until every slot is busy.
    fn pump(state: &Arc<Mutex<State<T, E>>>) {
        loop {
            let task = {
                let mut guard = state.lock();
                if guard.running.len() >= guard.max_concurrency {
                    return;
                }
                let Some(task) = guard.pending.pop_front() else {
                    return;
                };
                guard.running.insert(
                    task.seq,
                    Running {
                        id: task.id.clone(),
                        token: task.token.clone(),
                    },
                );
                task
            };
            log::debug!("starting task {}", task.id);

            let state = Arc::clone(state);
            tokio::spawn(async move {
                let Queued {
                    seq,
                    id,
                    token,
                    work,
                    done,
                } = task;

                // A nested task turns a panic into a JoinError instead of
                // taking the slot down with it.
                let result = match tokio::spawn(work(token.clone())).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(_)) if token.is_cancelled() => Err(TaskError::Cancelled),
                    Ok(Err(err)) => Err(TaskError::Failed(err)),
                    Err(join) => Err(TaskError::Aborted(join.to_string())),
                };
                match &result {
                    Ok(_) => log::debug!("task {id} finished"),
                    Err(err) => log::debug!("task {id} ended: {}", describe(err)),
                }

                state.lock().running.remove(&seq);
                resolve(done, &id, result);
                Self::pump(&state);
            });
        }
    }
}

const fn describe<E>(err: &TaskError<E>) -> &'static str {
    match err {
        TaskError::Cancelled => "cancelled",
        TaskError::Failed(_) => "failed",
        TaskError::Aborted(_) => "aborted",
    }
}

impl<T, E> Default for TaskQueue<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_CONCURRENCY)
    }
}

/// Handle to one queued task.
#[must_use = "a task handle does nothing unless joined or cancelled"]
pub struct TaskHandle<T, E> {
    id: String,
    seq: u64,
    receiver: oneshot::Receiver<TaskResult<T, E>>,
    state: Arc<Mutex<State<T, E>>>,
}

impl<T, E> TaskHandle<T, E> {
    /// The id the task was queued under.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cancel this task only. Returns `false` if it already finished.
    pub fn cancel(&self) -> bool {
        let seq = self.seq;
        self.state.lock().cancel_where(|task_seq, _| task_seq == seq)
    }

    /// Wait for the task to settle.
    ///
    /// # Errors
    ///
    /// The task's [`TaskError`]. If the queue was torn down before the
    /// task settled, [`TaskError::Aborted`].
    pub async fn join(self) -> TaskResult<T, E> {
        self.receiver
            .await
            .unwrap_or_else(|_| Err(TaskError::Aborted(format!("task {} was dropped", self.id))))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    type Queue = TaskQueue<u32, String>;

    /// Queue a task that waits for the returned sender before finishing
    /// with `value`.
    fn gated(queue: &Queue, id: &str, value: u32) -> (TaskHandle<u32, String>, oneshot::Sender<()>) {
        let (open, gate) = oneshot::channel::<()>();
        let handle = queue.enqueue(id, move |_| async move {
            gate.await.map_err(|e| e.to_string())?;
            Ok(value)
        });
        (handle, open)
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let queue = Queue::new(2);
        let mut gates = Vec::new();
        let mut handles = Vec::new();
        for i in 0..5 {
            let (handle, gate) = gated(&queue, &format!("t{i}"), i);
            handles.push(handle);
            gates.push(gate);
        }
        assert_eq!(queue.active(), 2);
        assert_eq!(queue.size(), 3);

        for gate in gates {
            gate.send(()).unwrap();
        }
        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.join().await.unwrap());
        }
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.active(), 0);
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn zero_concurrency_means_one() {
        let queue = Queue::new(0);
        assert_eq!(queue.max_concurrency(), 1);
        assert_eq!(Queue::default().max_concurrency(), 2);
    }

    #[tokio::test]
    async fn raising_the_bound_dispatches_waiting_tasks() {
        let queue = Queue::new(1);
        let (handles, gates): (Vec<_>, Vec<_>) =
            (0..4).map(|i| gated(&queue, &format!("t{i}"), i)).unzip();
        assert_eq!(queue.active(), 1);
        assert_eq!(queue.size(), 3);

        queue.set_max_concurrency(3);
        assert_eq!(queue.max_concurrency(), 3);
        assert_eq!(queue.active(), 3);
        assert_eq!(queue.size(), 1);

        // Lowering the bound leaves running tasks alone.
        queue.set_max_concurrency(1);
        assert_eq!(queue.active(), 3);

        for gate in gates {
            gate.send(()).unwrap();
        }
        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.join().await.unwrap());
        }
        assert_eq!(values, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn cancel_before_start_never_runs_work() {
        let queue = Queue::new(1);
        let (blocker, gate) = gated(&queue, "blocker", 1);

        let invoked = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&invoked);
        let waiting = queue.enqueue("waiting", move |_| async move {
            flag.store(true, Ordering::SeqCst);
            Ok(2)
        });
        assert_eq!(queue.size(), 1);
        assert!(queue.cancel("waiting"));
        assert_eq!(queue.size(), 0);

        gate.send(()).unwrap();
        assert_eq!(blocker.join().await.unwrap(), 1);
        assert!(matches!(waiting.join().await, Err(TaskError::Cancelled)));
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn handle_cancel_removes_only_that_task() {
        let queue = Queue::new(1);
        let (blocker, gate) = gated(&queue, "same", 1);
        let second = queue.enqueue("same", |_| async { Ok(2) });
        assert!(second.cancel());
        gate.send(()).unwrap();
        assert_eq!(blocker.join().await.unwrap(), 1);
        assert!(second.join().await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn running_task_observes_its_token() {
        let queue = Queue::new(2);
        let handle = queue.enqueue("long", |token| async move {
            token.cancelled().await;
            Err("stopped".to_owned())
        });
        tokio::task::yield_now().await;
        assert_eq!(queue.active(), 1);
        assert!(queue.cancel("long"));
        assert!(matches!(handle.join().await, Err(TaskError::Cancelled)));
    }

    #[tokio::test]
    async fn result_before_noticing_cancel_is_kept() {
        let queue = Queue::new(1);
        let (handle, gate) = gated(&queue, "racy", 7);
        tokio::task::yield_now().await;
        assert!(handle.cancel());
        gate.send(()).unwrap();
        assert_eq!(handle.join().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn failure_rejects_only_its_own_handle() {
        let queue = Queue::new(2);
        let bad = queue.enqueue("bad", |_| async { Err("boom".to_owned()) });
        let good = queue.enqueue("good", |_| async { Ok(3) });
        assert!(matches!(bad.join().await, Err(TaskError::Failed(msg)) if msg == "boom"));
        assert_eq!(good.join().await.unwrap(), 3);
    }

    fn explode() -> Result<u32, String> {
        panic!("kaboom")
    }

    #[tokio::test]
    async fn panic_is_aborted_and_frees_the_slot() {
        let queue = Queue::new(1);
        let bad = queue.enqueue("panics", |_| async { explode() });
        let next = queue.enqueue("next", |_| async { Ok(4) });
        assert!(matches!(bad.join().await, Err(TaskError::Aborted(_))));
        assert_eq!(next.join().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn single_slot_runs_in_fifo_order() {
        let queue = Queue::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..5)
            .map(|i| {
                let order = Arc::clone(&order);
                queue.enqueue(format!("t{i}"), move |_| async move {
                    order.lock().push(i);
                    tokio::task::yield_now().await;
                    Ok(i)
                })
            })
            .collect();
        for handle in handles {
            handle.join().await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn clear_cancels_waiting_and_running() {
        let queue = Queue::new(1);
        let running = queue.enqueue("running", |token| async move {
            token.cancelled().await;
            Err("stopped".to_owned())
        });
        let waiting = queue.enqueue("waiting", |_| async { Ok(1) });
        tokio::task::yield_now().await;

        queue.clear();
        assert_eq!(queue.size(), 0);
        assert!(running.join().await.unwrap_err().is_cancelled());
        assert!(waiting.join().await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn cancel_unknown_id_is_false() {
        let queue = Queue::new(1);
        assert!(!queue.cancel("nope"));
    }
}
