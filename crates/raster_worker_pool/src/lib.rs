//! Fixed set of raster threads fed from a priority-ordered queue.
//!
//! The scheduling thread replaces the not-yet-started set with
//! [`RasterWorkerPool::schedule_tasks`]. Workers always take the front of
//! that list. Results travel back through one SPSC ring per worker and are
//! only ever observed on the scheduling thread, via
//! [`RasterWorkerPool::collect_completed`] or
//! [`RasterWorkerPool::wait_for_completions`].

mod task;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use raster_protocol::RasterTaskId;
use rtrb::{Consumer, Producer, PushError, RingBuffer};

pub use task::{CancelOutcome, CancellationToken, RasterCompletion, RasterOutcome, RasterTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterWorkerPoolConfig {
    /// Zero runs nothing in the background; see
    /// [`RasterWorkerPool::run_pending_inline`].
    pub thread_count: usize,
    /// Per-worker completion ring slots.
    pub completion_capacity: usize,
}

impl Default for RasterWorkerPoolConfig {
    fn default() -> Self {
        Self {
            thread_count: 2,
            completion_capacity: 256,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PoolStartError {
    #[error("completion ring capacity must be greater than zero")]
    ZeroCompletionCapacity,
    #[error("failed to spawn raster worker thread")]
    SpawnFailed(#[from] std::io::Error),
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<RasterTask>,
    /// Taken by a worker and not yet collected on the scheduling thread.
    started: HashMap<RasterTaskId, CancellationToken>,
}

struct Shared {
    state: Mutex<QueueState>,
    work_available: Condvar,
    stop_requested: AtomicBool,
}

impl QueueState {
    fn pop_next(&mut self) -> Option<RasterTask> {
        let task = self.pending.pop_front()?;
        self.started.insert(task.id, task.cancel.clone());
        Some(task)
    }
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().expect("raster queue lock poisoned")
    }
}

pub struct RasterWorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    completion_consumers: Vec<Consumer<RasterCompletion>>,
    notify_receiver: Receiver<()>,
    inline_completions: VecDeque<RasterCompletion>,
}

impl std::fmt::Debug for RasterWorkerPool {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RasterWorkerPool")
            .field("threads", &self.workers.len())
            .field("pending", &self.pending_count())
            .field("running", &self.running_count())
            .finish()
    }
}

impl RasterWorkerPool {
    pub fn start(config: RasterWorkerPoolConfig) -> Result<Self, PoolStartError> {
        if config.completion_capacity == 0 {
            return Err(PoolStartError::ZeroCompletionCapacity);
        }
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            work_available: Condvar::new(),
            stop_requested: AtomicBool::new(false),
        });
        let (notify_sender, notify_receiver) = bounded(1);
        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(config.thread_count),
            completion_consumers: Vec::with_capacity(config.thread_count),
            notify_receiver,
            inline_completions: VecDeque::new(),
        };

        for index in 0..config.thread_count {
            let (producer, consumer) = RingBuffer::new(config.completion_capacity);
            let worker_shared = Arc::clone(&pool.shared);
            let worker_notify = notify_sender.clone();
            // On error `pool` drops here and joins the workers already spawned.
            let join_handle = std::thread::Builder::new()
                .name(format!("raster_worker_{index}"))
                .spawn(move || raster_worker_loop(worker_shared, producer, worker_notify))?;
            pool.workers.push(join_handle);
            pool.completion_consumers.push(consumer);
        }
        tracing::debug!(threads = config.thread_count, "raster worker pool started");
        Ok(pool)
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Tasks that started and whose completion has not been collected yet.
    pub fn running_count(&self) -> usize {
        self.shared.lock().started.len()
    }

    pub fn is_idle(&self) -> bool {
        let state = self.shared.lock();
        state.pending.is_empty() && state.started.is_empty()
    }

    /// Replaces every not-yet-started task with `tasks`, highest priority
    /// first. Tasks that already started are left alone, including when
    /// `tasks` names them again. Returns the ids that were queued before and
    /// are not queued now; they will never run.
    pub fn schedule_tasks(&mut self, tasks: Vec<RasterTask>) -> Vec<RasterTaskId> {
        let mut state = self.shared.lock();
        let wanted: HashSet<RasterTaskId> = tasks.iter().map(|task| task.id).collect();
        let dropped: Vec<RasterTaskId> = state
            .pending
            .drain(..)
            .filter(|task| !wanted.contains(&task.id))
            .map(|task| task.id)
            .collect();

        let mut seen = HashSet::with_capacity(tasks.len());
        for task in tasks {
            if state.started.contains_key(&task.id) || !seen.insert(task.id) {
                continue;
            }
            state.pending.push_back(task);
        }
        let queued = state.pending.len();
        drop(state);

        if queued > 0 {
            self.shared.work_available.notify_all();
        }
        tracing::trace!(queued, dropped = dropped.len(), "raster tasks scheduled");
        dropped
    }

    pub fn cancel(&mut self, id: RasterTaskId) -> CancelOutcome {
        let mut state = self.shared.lock();
        if let Some(position) = state.pending.iter().position(|task| task.id == id) {
            if let Some(task) = state.pending.remove(position) {
                task.cancel.cancel();
            }
            return CancelOutcome::CancelledBeforeStart;
        }
        match state.started.get(&id) {
            Some(token) => {
                token.cancel();
                CancelOutcome::AlreadyRunning
            }
            None => CancelOutcome::Unknown,
        }
    }

    /// Runs up to `max_tasks` queued tasks on the calling thread. Intended
    /// for pools started with zero threads.
    pub fn run_pending_inline(&mut self, max_tasks: usize) -> usize {
        let mut executed = 0;
        while executed < max_tasks {
            let Some(task) = self.shared.lock().pop_next() else {
                break;
            };
            self.inline_completions.push_back(task.execute());
            executed += 1;
        }
        executed
    }

    /// Appends every completion that has arrived so far to `output`.
    pub fn collect_completed(&mut self, output: &mut Vec<RasterCompletion>) -> usize {
        let before = output.len();
        output.extend(self.inline_completions.drain(..));
        for consumer in &mut self.completion_consumers {
            while let Ok(completion) = consumer.pop() {
                output.push(completion);
            }
        }
        let collected = &output[before..];
        if !collected.is_empty() {
            let mut state = self.shared.lock();
            for completion in collected {
                state.started.remove(&completion.task_id);
            }
        }
        collected.len()
    }

    /// Like [`Self::collect_completed`], but if nothing is ready waits up
    /// to `timeout` for the first completion.
    pub fn wait_for_completions(
        &mut self,
        output: &mut Vec<RasterCompletion>,
        timeout: Duration,
    ) -> usize {
        let collected = self.collect_completed(output);
        if collected > 0 || timeout.is_zero() {
            return collected;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return 0;
            }
            match self
                .notify_receiver
                .recv_timeout(deadline.saturating_duration_since(now))
            {
                Ok(()) => {
                    let collected = self.collect_completed(output);
                    if collected > 0 {
                        return collected;
                    }
                }
                Err(RecvTimeoutError::Timeout) => return 0,
                Err(RecvTimeoutError::Disconnected) => {
                    // Only zero-thread pools get here.
                    return self.collect_completed(output);
                }
            }
        }
    }
}

impl Drop for RasterWorkerPool {
    fn drop(&mut self) {
        self.shared.stop_requested.store(true, Ordering::Release);
        {
            let mut state = self.shared.lock();
            for task in state.pending.drain(..) {
                task.cancel.cancel();
            }
            for token in state.started.values() {
                token.cancel();
            }
        }
        self.shared.work_available.notify_all();
        for join_handle in self.workers.drain(..) {
            join_handle.join().expect("join raster worker thread");
        }
    }
}

fn raster_worker_loop(
    shared: Arc<Shared>,
    mut completion_producer: Producer<RasterCompletion>,
    notify_sender: Sender<()>,
) {
    loop {
        let task = {
            let mut state = shared.lock();
            loop {
                if shared.stop_requested.load(Ordering::Acquire) {
                    return;
                }
                if let Some(task) = state.pop_next() {
                    break task;
                }
                state = shared
                    .work_available
                    .wait(state)
                    .expect("raster queue lock poisoned");
            }
        };

        let task_id = task.id;
        tracing::trace!(?task_id, tile = ?task.tile, "raster task started");
        let completion = task.execute();

        if !push_completion(&shared, &mut completion_producer, completion) {
            return;
        }
        match notify_sender.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => return,
        }
    }
}

/// Blocks while the ring is full. Gives up only when the pool is stopping.
fn push_completion(
    shared: &Shared,
    producer: &mut Producer<RasterCompletion>,
    mut completion: RasterCompletion,
) -> bool {
    loop {
        match producer.push(completion) {
            Ok(()) => return true,
            Err(PushError::Full(returned)) => {
                if shared.stop_requested.load(Ordering::Acquire) {
                    return false;
                }
                completion = returned;
                std::thread::yield_now();
            }
        }
    }
}
