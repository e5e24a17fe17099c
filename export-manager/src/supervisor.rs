//! Owner of background export tasks.
//!
//! Tasks run on a tokio `JoinSet`. Finished tasks are reaped whenever a new
//! one is spawned. On shutdown the supervisor stops accepting work, waits for
//! in-flight tasks up to a deadline and aborts whatever is left.

use serde::Serialize;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

/// Returned by [`TaskSupervisor::spawn`] once shutdown has begun.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorClosed;

impl std::fmt::Display for SupervisorClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Export service is shutting down")
    }
}

impl std::error::Error for SupervisorClosed {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Tasks that finished within the deadline
    pub completed: usize,
    /// Tasks still running at the deadline
    pub aborted: usize,
}

struct SupervisorState {
    tasks: JoinSet<()>,
    accepting: bool,
}

/// `accepting` lives under the same lock as the task set, so no task can be
/// added after shutdown has taken the set.
pub struct TaskSupervisor {
    state: Mutex<SupervisorState>,
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SupervisorState {
                tasks: JoinSet::new(),
                accepting: true,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SupervisorState> {
        // A panic while holding the lock leaves the set itself intact
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn spawn<F>(&self, task: F) -> Result<(), SupervisorClosed>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.lock();
        if !state.accepting {
            return Err(SupervisorClosed);
        }

        while let Some(result) = state.tasks.try_join_next() {
            log_join_result(result);
        }
        state.tasks.spawn(task);
        Ok(())
    }

    /// Tasks spawned and not yet reaped.
    pub fn active(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_accepting(&self) -> bool {
        self.lock().accepting
    }

    /// Stops accepting tasks and drains the running ones.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        let mut tasks = {
            let mut state = self.lock();
            state.accepting = false;
            std::mem::take(&mut state.tasks)
        };
        info!(in_flight = tasks.len(), timeout_secs = timeout.as_secs(), "Draining export tasks");

        let deadline = tokio::time::Instant::now() + timeout;
        let mut completed = 0;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(result)) => {
                    log_join_result(result);
                    completed += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    let aborted = tasks.len();
                    warn!(aborted, "Shutdown deadline reached, aborting export tasks");
                    tasks.shutdown().await;
                    return ShutdownReport { completed, aborted };
                }
            }
        }

        ShutdownReport {
            completed,
            aborted: 0,
        }
    }
}

fn log_join_result(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(error = %e, "Export task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_shutdown_waits_for_running_tasks() {
        let supervisor = TaskSupervisor::new();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = done.clone();
            supervisor
                .spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        let report = supervisor.shutdown(Duration::from_secs(5)).await;
        assert_eq!(report, ShutdownReport { completed: 3, aborted: 0 });
        assert_eq!(done.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_after_deadline() {
        let supervisor = TaskSupervisor::new();
        supervisor
            .spawn(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
            .unwrap();
        supervisor.spawn(async {}).unwrap();

        let report = supervisor.shutdown(Duration::from_millis(50)).await;
        assert_eq!(report, ShutdownReport { completed: 1, aborted: 1 });
        assert_eq!(supervisor.active(), 0);
    }

    #[tokio::test]
    async fn test_spawn_refused_after_shutdown() {
        let supervisor = TaskSupervisor::new();
        supervisor.shutdown(Duration::from_millis(10)).await;

        assert!(!supervisor.is_accepting());
        assert_eq!(supervisor.spawn(async {}), Err(SupervisorClosed));
    }

    #[tokio::test]
    async fn test_panicking_task_is_contained() {
        let supervisor = TaskSupervisor::new();
        supervisor.spawn(async { panic!("adapter bug") }).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Reaped on the next spawn without affecting the new task
        supervisor.spawn(async {}).unwrap();
        let report = supervisor.shutdown(Duration::from_secs(1)).await;
        assert_eq!(report.aborted, 0);
    }

    /// Every accepted task is part of the drained set, even when spawns race
    /// with shutdown.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_spawns_racing_shutdown_are_drained() {
        let supervisor = Arc::new(TaskSupervisor::new());
        let accepted = Arc::new(AtomicUsize::new(0));
        let ran = Arc::new(AtomicUsize::new(0));

        let mut spawners = Vec::new();
        for _ in 0..4 {
            let supervisor = supervisor.clone();
            let accepted = accepted.clone();
            let ran = ran.clone();
            spawners.push(tokio::spawn(async move {
                loop {
                    let ran = ran.clone();
                    let spawned = supervisor.spawn(async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        ran.fetch_add(1, Ordering::SeqCst);
                    });
                    if spawned.is_err() {
                        break;
                    }
                    accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                }
            }));
        }

        tokio::time::sleep(Duration::from_millis(5)).await;
        let report = supervisor.shutdown(Duration::from_secs(10)).await;
        for spawner in spawners {
            spawner.await.unwrap();
        }

        assert_eq!(report.aborted, 0);
        assert_eq!(ran.load(Ordering::SeqCst), accepted.load(Ordering::SeqCst));
        assert_eq!(supervisor.active(), 0);
    }
}
