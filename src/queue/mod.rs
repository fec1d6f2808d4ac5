// Priority work queue drained by a fixed pool of workers.
//
// - Priority: critical < normal < background service order
// - WorkQueue: heap of pending items keyed by (priority, sequence)
// - WorkerPool: tokio tasks that pop, run and resolve items

pub mod deferred;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use deferred::{deferred, DeferredResult, Resolver};
use crate::error::{ParleyError, Result};

/// Service class of a job; lower rank is serviced first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical = 0,
    #[default]
    Normal = 1,
    Background = 2,
}

impl Priority {
    /// Lenient parse: anything unrecognized is treated as normal.
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "critical" => Self::Critical,
            "background" => Self::Background,
            _ => Self::Normal,
        }
    }

    pub fn to_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Normal => "normal",
            Self::Background => "background",
        }
    }

    pub fn rank(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_str())
    }
}

pub type JobFuture = Pin<Box<dyn Future<Output = Result<String>> + Send + 'static>>;
pub type Job = Box<dyn FnOnce() -> JobFuture + Send + 'static>;

/// A pending unit of work. Never mutated after submission.
pub struct WorkItem {
    pub priority: Priority,
    pub sequence: u64,
    job: Job,
    resolver: Resolver,
}

impl WorkItem {
    fn sort_key(&self) -> (u8, u64) {
        (self.priority.rank(), self.sequence)
    }
}

impl PartialEq for WorkItem {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for WorkItem {}

impl PartialOrd for WorkItem {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for WorkItem {
    // BinaryHeap is a max-heap; invert so the lowest (rank, sequence) pops first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.sort_key().cmp(&self.sort_key())
    }
}

/// Unbounded priority queue. Items pop by priority rank, then FIFO.
pub struct WorkQueue {
    items: Mutex<BinaryHeap<WorkItem>>,
    next_sequence: AtomicU64,
    available: Notify,
    closed: AtomicBool,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(BinaryHeap::new()),
            next_sequence: AtomicU64::new(0),
            available: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a job and hand back the handle its outcome will land in.
    pub fn submit<F, Fut>(&self, priority: Priority, job: F) -> DeferredResult
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let (resolver, handle) = deferred();

        // `closed` is checked under the items lock; `close` flips it under the
        // same lock, so an item is either rejected here or seen by the drain.
        let mut items = self.lock();
        if self.is_closed() {
            drop(items);
            resolver.resolve(Err(ParleyError::QueueClosed));
            return handle;
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        items.push(WorkItem {
            priority,
            sequence,
            job: Box::new(move || Box::pin(job()) as JobFuture),
            resolver,
        });
        let depth = items.len();
        drop(items);
        debug!("Queued job #{} ({}), depth {}", sequence, priority, depth);

        self.available.notify_one();
        handle
    }

    /// Pop the most urgent item, if any.
    pub fn pop(&self) -> Option<WorkItem> {
        self.lock().pop()
    }

    /// Wait up to `poll` for an item to show up.
    pub async fn pop_or_wait(&self, poll: Duration) -> Option<WorkItem> {
        if let Some(item) = self.pop() {
            return Some(item);
        }
        let _ = tokio::time::timeout(poll, self.available.notified()).await;
        self.pop()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting work. Items still queued are settled with
    /// [`ParleyError::QueueClosed`] by [`WorkerPool::shutdown`].
    pub fn close(&self) {
        {
            let _items = self.lock();
            self.closed.store(true, Ordering::SeqCst);
        }
        self.available.notify_waiters();
    }

    /// Take every pending item at once.
    fn drain(&self) -> Vec<WorkItem> {
        self.lock().drain().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, BinaryHeap<WorkItem>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Fixed set of workers draining a shared [`WorkQueue`].
pub struct WorkerPool {
    queue: Arc<WorkQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one) on the current tokio runtime.
    pub fn start(queue: Arc<WorkQueue>, size: usize, poll_interval: Duration) -> Self {
        let size = size.max(1);
        let workers = (0..size)
            .map(|id| tokio::spawn(worker_loop(id, queue.clone(), poll_interval)))
            .collect();
        info!("Started {} translation worker(s)", size);
        Self { queue, workers }
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Close the queue and wait for every worker to exit. A job already
    /// running is allowed to finish.
    pub async fn shutdown(self) {
        self.queue.close();
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!("Worker exited abnormally: {}", e);
            }
        }
        // Anything left was never started.
        for item in self.queue.drain() {
            item.resolver.resolve(Err(ParleyError::QueueClosed));
        }
        info!("Worker pool stopped");
    }
}

async fn worker_loop(id: usize, queue: Arc<WorkQueue>, poll_interval: Duration) {
    debug!("Worker {} started", id);
    while !queue.is_closed() {
        let Some(item) = queue.pop_or_wait(poll_interval).await else {
            continue;
        };
        run_item(id, item).await;
    }
    debug!("Worker {} stopped", id);
}

async fn run_item(worker: usize, item: WorkItem) {
    let WorkItem {
        priority,
        sequence,
        job,
        resolver,
    } = item;
    debug!("Worker {} running job #{} ({})", worker, sequence, priority);

    // Run on its own task so a panicking job fails its handle instead of
    // taking the worker down with it.
    let outcome = match tokio::spawn(job()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Job #{} did not complete: {}", sequence, e);
            Err(ParleyError::JobAbandoned(e.to_string()))
        }
    };

    if let Err(e) = &outcome {
        debug!("Job #{} failed: {}", sequence, e);
    }
    resolver.resolve(outcome);
}
