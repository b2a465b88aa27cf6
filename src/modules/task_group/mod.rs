//! Bounded concurrency for fire-and-collect async work.
//!
//! A [`TaskGroup`] queues zero-argument async tasks and starts them on the
//! tokio runtime one [`acquire`](TaskGroup::acquire) at a time, never letting
//! more than `capacity` run unresolved. Results are collected in enqueue order.

use std::collections::VecDeque;
use std::future::Future;

use futures::FutureExt;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};

type QueuedTask<T, E> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, E>> + Send>;

#[derive(Debug, Error)]
pub enum TaskGroupError<E> {
    #[error("task failed: {0}")]
    Task(E),
    #[error("task did not run to completion: {0}")]
    Join(#[from] JoinError),
}

enum Slot<T, E> {
    Running(JoinHandle<Result<T, E>>),
    Settled(Result<T, TaskGroupError<E>>),
    Taken,
}

/// Notifies the group when a started task resolves, including by panic.
struct CompletionSignal {
    index: usize,
    tx: mpsc::UnboundedSender<usize>,
}

impl Drop for CompletionSignal {
    fn drop(&mut self) {
        let _ = self.tx.send(self.index);
    }
}

pub struct TaskGroup<T, E> {
    capacity: usize,
    queued: VecDeque<QueuedTask<T, E>>,
    slots: Vec<Slot<T, E>>,
    in_flight: usize,
    done_tx: mpsc::UnboundedSender<usize>,
    done_rx: mpsc::UnboundedReceiver<usize>,
}

impl<T, E> TaskGroup<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Create a group; a capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            capacity: capacity.max(1),
            queued: VecDeque::new(),
            slots: Vec::new(),
            in_flight: 0,
            done_tx,
            done_rx,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Started tasks that have not resolved yet, as last observed.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Tasks enqueued but not started.
    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    pub fn enqueue<F, Fut>(&mut self, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.queued.push_back(Box::new(move || task().boxed()));
    }

    /// Start the next queued task, first waiting for a running one to resolve
    /// when the group is at capacity.
    pub async fn acquire(&mut self) {
        self.drain_completions();
        if self.in_flight >= self.capacity && self.done_rx.recv().await.is_some() {
            self.in_flight -= 1;
            self.drain_completions();
        }
        self.start_next();
    }

    /// Run everything still queued, then wait for all results in enqueue order.
    ///
    /// The first failure (in enqueue order) is returned; tasks after it keep
    /// running detached.
    pub async fn all(mut self) -> Result<Vec<T>, TaskGroupError<E>> {
        while !self.queued.is_empty() {
            self.acquire().await;
        }

        let mut results = Vec::with_capacity(self.slots.len());
        for slot in std::mem::take(&mut self.slots) {
            let result = match slot {
                Slot::Running(handle) => settle(handle.await),
                Slot::Settled(result) => result,
                Slot::Taken => continue,
            };
            results.push(result?);
        }
        Ok(results)
    }

    /// Results of the tasks that have already completed successfully, in
    /// enqueue order. Useful for checkpointing partial progress.
    pub async fn all_fulfilled(&mut self) -> Vec<&T> {
        for slot in self.slots.iter_mut() {
            if !matches!(slot, Slot::Running(handle) if handle.is_finished()) {
                continue;
            }
            if let Slot::Running(handle) = std::mem::replace(slot, Slot::Taken) {
                *slot = Slot::Settled(settle(handle.await));
            }
        }

        self.slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Settled(Ok(value)) => Some(value),
                _ => None,
            })
            .collect()
    }

    fn drain_completions(&mut self) {
        while self.done_rx.try_recv().is_ok() {
            self.in_flight = self.in_flight.saturating_sub(1);
        }
    }

    fn start_next(&mut self) {
        let Some(task) = self.queued.pop_front() else {
            log::debug!("acquire called with no queued task");
            return;
        };
        let signal = CompletionSignal {
            index: self.slots.len(),
            tx: self.done_tx.clone(),
        };
        let handle = tokio::spawn(async move {
            let _signal = signal;
            task().await
        });
        self.slots.push(Slot::Running(handle));
        self.in_flight += 1;
    }
}

fn settle<T, E>(joined: Result<Result<T, E>, JoinError>) -> Result<T, TaskGroupError<E>> {
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TaskGroupError::Task(err)),
        Err(err) => Err(TaskGroupError::Join(err)),
    }
}
