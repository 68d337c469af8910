//! Bounded, typed dispatch of per-message side effects.
//!
//! Each task kind has its own lane: a bounded queue drained by one worker
//! that takes a permit from the kind's semaphore (if any) and runs the task on
//! a shared [`TaskTracker`]. `submit` never waits on execution.

pub mod tasks;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, RwLock,
};

use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        Semaphore,
    },
    task::JoinHandle,
};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

pub use tasks::{AiTriggerJob, DispatchTask, TaskExecutor, TaskKind, TaskTimeouts};

#[derive(Clone, Copy, Debug)]
pub struct DispatchConfig {
    pub queue_capacity: usize,
    pub ai_concurrency: usize,
    pub alert_concurrency: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            ai_concurrency: 2,
            alert_concurrency: 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Placed on the kind's lane.
    Queued,
    /// Lane full or closed; a persist task will still run.
    Deferred,
    /// Best-effort task discarded because its lane was full or shutting down.
    Dropped,
    /// Refused because shutdown has begun.
    Rejected,
}

/// Counters for tasks that never ran.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub dropped_notify: u64,
    pub dropped_alert: u64,
    pub dropped_ai: u64,
    pub rejected: u64,
}

#[derive(Default)]
struct Counters {
    dropped: [AtomicU64; 4],
    rejected: AtomicU64,
}

pub struct Dispatcher {
    executor: Arc<TaskExecutor>,
    tracker: TaskTracker,
    senders: RwLock<Option<[mpsc::Sender<DispatchTask>; 4]>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutting_down: AtomicBool,
    counters: Counters,
}

impl Dispatcher {
    /// Build the lanes and start their workers. Must run inside a tokio runtime.
    pub fn start(executor: TaskExecutor, cfg: DispatchConfig) -> Self {
        let executor = Arc::new(executor);
        let tracker = TaskTracker::new();
        let capacity = cfg.queue_capacity.max(1);

        let mut workers = Vec::with_capacity(TaskKind::ALL.len());
        let senders = TaskKind::ALL.map(|kind| {
            let (tx, rx) = mpsc::channel(capacity);
            let ceiling = match kind {
                TaskKind::Ai => Some(Arc::new(Semaphore::new(cfg.ai_concurrency.max(1)))),
                TaskKind::Alert => Some(Arc::new(Semaphore::new(cfg.alert_concurrency.max(1)))),
                TaskKind::Persist | TaskKind::Notify => None,
            };
            workers.push(tokio::spawn(run_lane(
                kind,
                rx,
                ceiling,
                executor.clone(),
                tracker.clone(),
            )));
            tx
        });

        Self {
            executor,
            tracker,
            senders: RwLock::new(Some(senders)),
            workers: Mutex::new(workers),
            shutting_down: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Hand a task to its lane without waiting for it to run.
    pub fn submit(&self, task: DispatchTask) -> SubmitOutcome {
        let kind = task.kind();
        let tx = if self.shutting_down.load(Ordering::Acquire) {
            None
        } else {
            self.senders
                .read()
                .unwrap_or_else(|p| p.into_inner())
                .as_ref()
                .map(|lanes| lanes[kind.index()].clone())
        };

        let Some(tx) = tx else {
            return self.submit_after_shutdown(task);
        };

        match tx.try_send(task) {
            Ok(()) => SubmitOutcome::Queued,
            Err(TrySendError::Full(task)) => {
                if kind == TaskKind::Persist {
                    // Never drop a record: wait for room off the caller's path.
                    let executor = self.executor.clone();
                    self.tracker.spawn(async move {
                        if let Err(mpsc::error::SendError(task)) = tx.send(task).await {
                            debug!("persist lane closed while waiting, running directly");
                            executor.run(task).await;
                        }
                    });
                    return SubmitOutcome::Deferred;
                }
                self.count_dropped(kind);
                match kind {
                    TaskKind::Notify => debug!(kind = %kind, "lane full, task dropped"),
                    _ => warn!(kind = %kind, "lane full, task dropped"),
                }
                SubmitOutcome::Dropped
            }
            Err(TrySendError::Closed(task)) => self.submit_after_shutdown(task),
        }
    }

    fn submit_after_shutdown(&self, task: DispatchTask) -> SubmitOutcome {
        match task.kind() {
            TaskKind::Persist => {
                let executor = self.executor.clone();
                self.tracker.spawn(async move { executor.run(task).await });
                SubmitOutcome::Deferred
            }
            TaskKind::Notify => {
                self.count_dropped(TaskKind::Notify);
                debug!("shutting down, notify dropped");
                SubmitOutcome::Dropped
            }
            kind => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(kind = %kind, "shutting down, task rejected");
                SubmitOutcome::Rejected
            }
        }
    }

    fn count_dropped(&self, kind: TaskKind) {
        self.counters.dropped[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> DispatchStats {
        let d = &self.counters.dropped;
        DispatchStats {
            dropped_notify: d[TaskKind::Notify.index()].load(Ordering::Relaxed),
            dropped_alert: d[TaskKind::Alert.index()].load(Ordering::Relaxed),
            dropped_ai: d[TaskKind::Ai.index()].load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Close the lanes and wait for queued and in-flight tasks to finish.
    ///
    /// Safe to call more than once; later calls wait for anything submitted
    /// since (persist tasks are still accepted while shutting down).
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        drop(self.senders.write().unwrap_or_else(|p| p.into_inner()).take());

        let workers: Vec<_> = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|p| p.into_inner()));
        for worker in workers {
            let _ = worker.await;
        }

        self.tracker.close();
        self.tracker.wait().await;
        info!(stats = ?self.stats(), "dispatcher drained");
    }
}

async fn run_lane(
    kind: TaskKind,
    mut rx: mpsc::Receiver<DispatchTask>,
    ceiling: Option<Arc<Semaphore>>,
    executor: Arc<TaskExecutor>,
    tracker: TaskTracker,
) {
    while let Some(task) = rx.recv().await {
        let permit = match &ceiling {
            Some(sem) => match sem.clone().acquire_owned().await {
                Ok(p) => Some(p),
                Err(_) => break,
            },
            None => None,
        };
        let executor = executor.clone();
        tracker.spawn(async move {
            let _permit = permit;
            executor.run(task).await;
        });
    }
    debug!(kind = %kind, "lane closed");
}
