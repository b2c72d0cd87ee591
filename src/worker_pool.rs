//! Bounded task pool with explicit submit / join / cancel.
//!
//! Every submitted task is spawned immediately but waits for one of
//! `concurrency` permits before it starts. Cancelling the pool stops tasks
//! still waiting for a permit from ever starting and drops in-flight tasks at
//! their next await point. `join` always returns one outcome per submitted
//! task, in submission order.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<O> {
    Finished(O),
    /// The pool was cancelled. `started` tells whether the task had a permit.
    Cancelled { started: bool },
    Panicked,
}

pub struct WorkerPool<O> {
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    tasks: JoinSet<(usize, TaskOutcome<O>)>,
    in_flight: Arc<AtomicUsize>,
    submitted: usize,
}

impl<O: Send + 'static> WorkerPool<O> {
    pub fn new(concurrency: usize, cancel: CancellationToken) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            cancel,
            tasks: JoinSet::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            submitted: 0,
        }
    }

    /// Queue `work`. Returns its position in the outcome list.
    pub fn submit<F>(&mut self, work: F) -> usize
    where
        F: Future<Output = O> + Send + 'static,
    {
        let index = self.submitted;
        self.submitted += 1;

        let semaphore = self.semaphore.clone();
        let cancel = self.cancel.clone();
        let in_flight = self.in_flight.clone();

        self.tasks.spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.acquire_owned() => permit.ok(),
            };
            let Some(_permit) = permit else {
                return (index, TaskOutcome::Cancelled { started: false });
            };
            if cancel.is_cancelled() {
                return (index, TaskOutcome::Cancelled { started: false });
            }

            in_flight.fetch_add(1, Ordering::SeqCst);
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => TaskOutcome::Cancelled { started: true },
                result = AssertUnwindSafe(work).catch_unwind() => match result {
                    Ok(output) => TaskOutcome::Finished(output),
                    Err(_) => TaskOutcome::Panicked,
                },
            };
            in_flight.fetch_sub(1, Ordering::SeqCst);

            (index, outcome)
        });

        index
    }

    /// Stop dispatching and interrupt running tasks.
    #[cfg(test)]
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[cfg(test)]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Tasks currently holding a permit.
    #[cfg(test)]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait for every submitted task and return outcomes in submission order.
    pub async fn join(mut self) -> Vec<TaskOutcome<O>> {
        let mut outcomes: Vec<Option<TaskOutcome<O>>> =
            (0..self.submitted).map(|_| None).collect();

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => tracing::error!("Worker task failed to join: {}", e),
            }
        }

        outcomes
            .into_iter()
            .map(|outcome| outcome.unwrap_or(TaskOutcome::Panicked))
            .collect()
    }
}
