//! Task manager: admission, completion tracking and idle detection
//!
//! This module handles:
//! - Priority queue management for submitted tasks
//! - Global concurrency limiting (pending passes never exceed the configured limit)
//! - Coalescing of submissions that share a task id
//! - Edge-triggered `Empty` and `Idle` signals
//!
//! The manager does not know what a pass does. It hands each admitted task to a [`Worker`] in
//! its own tokio task and settles the task's completion future with the returned [`Outcome`].

use super::queue::PriorityQueue;
use super::task::Task;
use crate::CrawlError;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{broadcast, oneshot, watch};

/// Final result of a task
pub type TaskResult = Result<Task, Arc<CrawlError>>;

/// Cloneable completion future of a submitted task
///
/// Every submission of the same task id while it is in flight receives a clone of the same
/// handle.
pub type TaskHandle = Shared<BoxFuture<'static, TaskResult>>;

/// Queue state transitions published to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerEvent {
    /// The queue just ran dry; passes may still be in flight
    Empty,

    /// The queue is empty and nothing is in flight
    Idle,
}

/// How a pass ended
#[derive(Debug)]
pub enum Outcome {
    /// Settle the task's future with the task
    Resolved(Task),

    /// Reject the task's future; `id` is only used for logging
    Failed { id: String, error: CrawlError },

    /// Put the task back in the queue; a changed id carries the pending future along
    Requeue(Task),
}

/// Runs passes on behalf of the manager
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Runs one pass over `task`
    async fn run(&self, task: Task) -> Outcome;

    /// Called once per transition into the idle state
    async fn on_idle(&self);
}

struct PendingEntry {
    sender: oneshot::Sender<TaskResult>,
    handle: TaskHandle,
}

struct State {
    queue: PriorityQueue<Task>,
    pending: usize,
    peak: usize,
    running: bool,
    waiting: HashMap<String, PendingEntry>,
    empty_signalled: bool,
    idle_signalled: bool,
    epoch: u64,
}

#[derive(Default)]
struct Signals {
    empty: bool,
    idle: Option<u64>,
}

struct Inner {
    state: Mutex<State>,
    concurrency: usize,
    worker: Weak<dyn Worker>,
    events: broadcast::Sender<ManagerEvent>,
    idle: watch::Sender<bool>,
}

/// Priority-ordered task manager with a fixed concurrency budget
///
/// Cloning is cheap and every clone drives the same queue.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Inner>,
}

impl Manager {
    /// Creates a stopped manager
    ///
    /// # Arguments
    ///
    /// * `concurrency` - Maximum number of passes in flight (at least 1)
    /// * `worker` - Runs the passes; the manager holds it weakly
    pub fn new(concurrency: usize, worker: Weak<dyn Worker>) -> Self {
        let (events, _) = broadcast::channel(64);
        let (idle, _) = watch::channel(true);

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: PriorityQueue::by_priority(),
                    pending: 0,
                    peak: 0,
                    running: false,
                    waiting: HashMap::new(),
                    empty_signalled: true,
                    idle_signalled: true,
                    epoch: 0,
                }),
                concurrency: concurrency.max(1),
                worker,
                events,
                idle,
            }),
        }
    }

    /// Queues a task and returns its completion future
    ///
    /// The task must already carry its id. A task whose id is still in flight is not queued
    /// again; the existing handle is returned instead.
    pub fn add(&self, task: Task) -> TaskHandle {
        let id = task.id().to_string();
        let handle = {
            let mut state = self.lock();
            if let Some(existing) = state.waiting.get(&id) {
                tracing::debug!("Coalescing duplicate submission of task {}", id);
                return existing.handle.clone();
            }

            let (sender, receiver) = oneshot::channel();
            let abandoned = id.clone();
            let handle = receiver
                .map(move |result| {
                    result.unwrap_or_else(|_| Err(Arc::new(CrawlError::Abandoned { id: abandoned })))
                })
                .boxed()
                .shared();

            state.waiting.insert(
                id.clone(),
                PendingEntry {
                    sender,
                    handle: handle.clone(),
                },
            );
            self.push(&mut state, task);
            handle
        };

        tracing::trace!("Queued task {}", id);
        self.pump();
        handle
    }

    /// Starts admitting queued tasks
    pub fn start(&self) {
        let signals = {
            let mut state = self.lock();
            if state.running {
                return;
            }
            state.running = true;
            self.signals(&mut state)
        };
        tracing::debug!("Manager started");
        self.emit(signals);
        self.pump();
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Number of passes currently in flight
    pub fn pending(&self) -> usize {
        self.lock().pending
    }

    /// Highest number of passes ever in flight at once
    pub fn peak(&self) -> usize {
        self.lock().peak
    }

    /// Number of tasks waiting in the queue
    pub fn queued(&self) -> usize {
        self.lock().queue.size()
    }

    /// Number of unresolved task ids
    pub fn unresolved(&self) -> usize {
        self.lock().waiting.len()
    }

    /// The queued tasks in the order they will run
    pub fn snapshot(&self) -> Vec<Task> {
        self.lock().queue.values()
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.inner.events.subscribe()
    }

    /// Waits until the queue is empty, nothing is in flight and the idle handler finished
    ///
    /// Returns immediately when the manager is already idle.
    pub async fn wait_idle(&self) {
        let mut idle = self.inner.idle.subscribe();
        // The sender lives as long as the manager, so this cannot fail while we hold `self`
        let _ = idle.wait_for(|idle| *idle).await;
    }

    /// Settles a task's completion future
    ///
    /// Returns false when the id has no pending entry.
    pub(crate) fn resolve(&self, id: &str, result: TaskResult) -> bool {
        let entry = self.lock().waiting.remove(id);
        match entry {
            Some(entry) => {
                // The receiver is gone only when every handle was dropped
                let _ = entry.sender.send(result);
                true
            }
            None => {
                tracing::warn!("No pending entry for task {}", id);
                false
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, state: &mut State, task: Task) {
        state.queue.enqueue(task);
        state.empty_signalled = false;
        state.idle_signalled = false;
        state.epoch += 1;
        self.inner.idle.send_replace(false);
    }

    fn signals(&self, state: &mut State) -> Signals {
        let mut signals = Signals::default();
        if !state.running || !state.queue.is_empty() {
            return signals;
        }
        if !state.empty_signalled {
            state.empty_signalled = true;
            signals.empty = true;
        }
        if state.pending == 0 && !state.idle_signalled {
            state.idle_signalled = true;
            signals.idle = Some(state.epoch);
        }
        signals
    }

    fn emit(&self, signals: Signals) {
        if signals.empty {
            tracing::debug!("Queue is empty");
            // No subscribers is fine
            let _ = self.inner.events.send(ManagerEvent::Empty);
        }

        if let Some(epoch) = signals.idle {
            tracing::debug!("Manager is idle");
            let _ = self.inner.events.send(ManagerEvent::Idle);

            let manager = self.clone();
            let worker = self.inner.worker.upgrade();
            tokio::spawn(async move {
                if let Some(worker) = worker {
                    worker.on_idle().await;
                }
                // Only report idle if no task arrived while the idle handler ran
                let state = manager.lock();
                if state.epoch == epoch {
                    manager.inner.idle.send_replace(true);
                }
            });
        }
    }

    /// Admits queued tasks until the concurrency budget or the queue runs out
    fn pump(&self) {
        loop {
            let (task, signals) = {
                let mut state = self.lock();
                if !state.running || state.pending >= self.inner.concurrency {
                    return;
                }
                let Some(task) = state.queue.dequeue() else {
                    return;
                };
                state.pending += 1;
                state.peak = state.peak.max(state.pending);
                let signals = self.signals(&mut state);
                (task, signals)
            };

            self.emit(signals);
            self.spawn_pass(task);
        }
    }

    /// Queues `task` again, moving its pending entry when a hook gave it a new id
    ///
    /// A new id that is already pending takes over: the task is not queued twice and the
    /// admitted future settles with the result of the existing one.
    fn requeue(&self, admitted: &str, mut task: Task) {
        let id = task.ensure_id().to_string();
        let mut state = self.lock();

        if id != admitted {
            if let Some(entry) = state.waiting.remove(admitted) {
                if let Some(existing) = state.waiting.get(&id) {
                    tracing::debug!("Requeued task {} coalesces onto pending task {}", admitted, id);
                    let handle = existing.handle.clone();
                    tokio::spawn(async move {
                        // The receiver is gone only when every handle was dropped
                        let _ = entry.sender.send(handle.await);
                    });
                    return;
                }
                tracing::debug!("Requeueing task {} as {}", admitted, id);
                state.waiting.insert(id, entry);
            }
        } else {
            tracing::debug!("Requeueing task {}", id);
        }

        self.push(&mut state, task);
    }

    fn spawn_pass(&self, task: Task) {
        let manager = self.clone();
        let worker = self.inner.worker.upgrade();

        tokio::spawn(async move {
            // Hooks may rewrite `meta.id`; the pending entry stays under the admitted id
            let id = task.id().to_string();
            let outcome = match worker {
                Some(worker) => AssertUnwindSafe(worker.run(task))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        tracing::error!("Task {} panicked", id);
                        Outcome::Failed {
                            id: id.clone(),
                            error: CrawlError::Panicked { id: id.clone() },
                        }
                    }),
                None => Outcome::Failed {
                    id: id.clone(),
                    error: CrawlError::Abandoned { id: id.clone() },
                },
            };
            manager.finish_pass(&id, outcome);
        });
    }

    fn finish_pass(&self, admitted: &str, outcome: Outcome) {
        match outcome {
            Outcome::Resolved(task) => {
                self.resolve(admitted, Ok(task));
            }
            Outcome::Failed { id, error } => {
                tracing::warn!("Task {} failed: {}", id, error);
                self.resolve(admitted, Err(Arc::new(error)));
            }
            Outcome::Requeue(task) => self.requeue(admitted, task),
        }

        let signals = {
            let mut state = self.lock();
            state.pending = state.pending.saturating_sub(1);
            self.signals(&mut state)
        };
        self.emit(signals);
        self.pump();
    }
}
