use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

use super::engine::ControlEngine;

/// Something the scheduler runs once per period.
#[async_trait]
pub trait CycleTask: Send + Sync {
    async fn run_once(&self) -> Result<()>;
}

#[async_trait]
impl CycleTask for ControlEngine {
    async fn run_once(&self) -> Result<()> {
        self.run_cycle_now().await.map(|_| ())
    }
}

/// Task status tracking
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskStatus {
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub run_count: u64,
    pub success_count: u64,
    pub error_count: u64,
}

/// Runs the control cycle forever, sleeping a fixed interval after each run.
///
/// The interval counts from the end of a cycle, so a slow cycle pushes the next one back
/// instead of piling up. Errors and panics are recorded and the loop carries on.
pub struct CycleScheduler {
    task: Arc<dyn CycleTask>,
    interval: Duration,
    status: Arc<RwLock<TaskStatus>>,
}

impl CycleScheduler {
    pub fn new(task: Arc<dyn CycleTask>, interval: Duration) -> Self {
        Self {
            task,
            interval,
            status: Arc::new(RwLock::new(TaskStatus::default())),
        }
    }

    /// Shared handle for observers (the status endpoint).
    pub fn status_handle(&self) -> Arc<RwLock<TaskStatus>> {
        self.status.clone()
    }

    pub async fn status(&self) -> TaskStatus {
        self.status.read().await.clone()
    }

    /// One guarded run with bookkeeping.
    pub async fn tick(&self) {
        let now = Utc::now();
        {
            let mut status = self.status.write().await;
            status.last_run = Some(now);
            status.run_count += 1;
        }

        let outcome = AssertUnwindSafe(self.task.run_once()).catch_unwind().await;
        let mut status = self.status.write().await;
        match outcome {
            Ok(Ok(())) => {
                status.last_success = Some(now);
                status.success_count += 1;
                status.last_error = None;
            }
            Ok(Err(e)) => {
                status.error_count += 1;
                status.last_error = Some(format!("{e:#}"));
                error!(error = %format!("{e:#}"), "control cycle failed");
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                status.error_count += 1;
                status.last_error = Some(format!("panic: {msg}"));
                error!(panic = %msg, "control cycle panicked");
            }
        }
    }

    /// Loop until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "control loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.tick().await;
            tokio::select! {
                _ = sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("control loop stopped");
    }

    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails on the second call and panics on the third.
    struct Flaky {
        calls: AtomicU32,
    }

    #[async_trait]
    impl CycleTask for Flaky {
        async fn run_once(&self) -> Result<()> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                1 => anyhow::bail!("sensor store unreadable"),
                2 => panic!("boom"),
                _ => Ok(()),
            }
        }
    }

    fn scheduler(interval: Duration) -> (Arc<Flaky>, CycleScheduler) {
        let task = Arc::new(Flaky {
            calls: AtomicU32::new(0),
        });
        (task.clone(), CycleScheduler::new(task, interval))
    }

    #[tokio::test]
    async fn test_tick_records_outcomes() {
        let (_, sched) = scheduler(Duration::from_secs(60));

        sched.tick().await;
        let st = sched.status().await;
        assert_eq!((st.run_count, st.success_count, st.error_count), (1, 1, 0));

        sched.tick().await;
        let st = sched.status().await;
        assert_eq!(st.error_count, 1);
        assert_eq!(st.last_error.as_deref(), Some("sensor store unreadable"));

        sched.tick().await;
        let st = sched.status().await;
        assert_eq!(st.error_count, 2);
        assert_eq!(st.last_error.as_deref(), Some("panic: boom"));

        sched.tick().await;
        let st = sched.status().await;
        assert_eq!((st.run_count, st.success_count), (4, 2));
        assert!(st.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_failures_and_stops_on_shutdown() {
        let (task, sched) = scheduler(Duration::from_secs(60));
        let sched = Arc::new(sched);
        let (tx, rx) = watch::channel(false);
        let handle = sched.clone().start(rx);

        sleep(Duration::from_secs(60 * 4 + 1)).await;
        assert!(task.calls.load(Ordering::SeqCst) >= 4);

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(sched.status().await.error_count, 2);
    }
}
