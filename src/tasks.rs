//! In-flight Task Set
//!
//! Qualification and lifecycle tasks are spawned into one shared
//! `JoinSet`. On shutdown `main` drains it instead of dropping the runtime:
//! monitors stop between ticks, and a swap already submitted (entry, exit
//! or sell probe) runs to completion first.
//!
//! Author: AI-Generated
//! Created: 2026-10-16

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinSet;
use tracing::error;

#[derive(Clone, Default)]
pub struct TaskSet {
    set: Arc<Mutex<JoinSet<()>>>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.lock();
        // Reap what already finished so the set tracks only live work
        while let Some(result) = set.try_join_next() {
            if let Err(e) = result {
                error!("Task panicked: {}", e);
            }
        }
        set.spawn(task);
    }

    /// Tasks not yet reaped (finished ones included)
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for every task, including ones spawned while draining.
    /// Returns how many were joined.
    pub async fn drain(&self) -> usize {
        let mut joined = 0;
        loop {
            let mut batch = std::mem::take(&mut *self.lock());
            if batch.is_empty() {
                return joined;
            }
            while let Some(result) = batch.join_next().await {
                if let Err(e) = result {
                    error!("Task panicked: {}", e);
                }
                joined += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_drain_waits_for_nested_spawns() {
        let tasks = TaskSet::new();
        let done = Arc::new(AtomicUsize::new(0));

        let inner_tasks = tasks.clone();
        let inner_done = done.clone();
        tasks.spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let nested_done = inner_done.clone();
            inner_tasks.spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                nested_done.fetch_add(1, Ordering::SeqCst);
            });
            inner_done.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(tasks.drain().await, 2);
        assert_eq!(done.load(Ordering::SeqCst), 2);
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_stop_drain() {
        let tasks = TaskSet::new();
        tasks.spawn(async { panic!("boom") });
        tasks.spawn(async {});
        assert_eq!(tasks.drain().await, 2);
    }
}
