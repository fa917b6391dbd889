//! Cooperative run loop driving the long-lived workers.
//!
//! A worker implements [`RunLoop`] and is driven by [`run_loop`], which calls
//! [`RunLoop::work`] until a stop is requested through the shared [`RunLoopHandle`]. The stop
//! flag is only checked between two calls, so a worker always finishes the step it started.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::bail;
use crate::error::{CdcError, CdcResult, ErrorKind};

/// Lifecycle of a run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Running,
    StopRequested,
    Stopped,
}

/// Shared control over one run loop.
#[derive(Debug, Clone)]
pub struct RunLoopHandle {
    state: Arc<watch::Sender<TaskState>>,
}

impl RunLoopHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(TaskState::Created);

        Self {
            state: Arc::new(tx),
        }
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    pub fn is_stop_requested(&self) -> bool {
        matches!(
            self.state(),
            TaskState::StopRequested | TaskState::Stopped
        )
    }

    /// Asks the loop to stop after its current step. Has no effect once stopped.
    pub fn request_stop(&self) {
        self.state.send_if_modified(|state| match state {
            TaskState::Created | TaskState::Running => {
                *state = TaskState::StopRequested;
                true
            }
            TaskState::StopRequested | TaskState::Stopped => false,
        });
    }

    /// Resolves once a stop was requested, letting a step cut a wait short.
    pub async fn stop_requested(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx
            .wait_for(|state| matches!(state, TaskState::StopRequested | TaskState::Stopped))
            .await;
    }

    /// Waits until the loop reports [`TaskState::Stopped`].
    pub async fn await_stop(&self, timeout: Duration) -> CdcResult<()> {
        let mut rx = self.state.subscribe();
        let stopped = rx.wait_for(|state| *state == TaskState::Stopped);

        match tokio::time::timeout(timeout, stopped).await {
            Ok(_) => Ok(()),
            Err(_) => bail!(
                ErrorKind::WorkerStopTimeout,
                "The run loop did not stop in time",
                detail = format!("Still {:?} after {timeout:?}", self.state())
            ),
        }
    }

    fn set(&self, state: TaskState) {
        self.state.send_replace(state);
    }

    fn start(&self) {
        self.state.send_if_modified(|state| {
            if *state == TaskState::Created {
                *state = TaskState::Running;
                return true;
            }
            false
        });
    }
}

impl Default for RunLoopHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// A unit of work repeated until a stop is requested.
pub trait RunLoop {
    fn before_start(&mut self) -> impl Future<Output = CdcResult<()>> + Send {
        async { Ok(()) }
    }

    /// Performs one step. Should return within a bounded time so stop requests are observed.
    fn work(&mut self) -> impl Future<Output = CdcResult<()>> + Send;

    /// Called once after the loop ended, whether it failed or not.
    fn before_stop(&mut self) -> impl Future<Output = CdcResult<()>> + Send {
        async { Ok(()) }
    }
}

/// Drives `process` until a stop is requested or a step fails.
///
/// The handle reports [`TaskState::Stopped`] when this returns, also on error.
pub async fn run_loop<P>(process: &mut P, handle: &RunLoopHandle) -> CdcResult<()>
where
    P: RunLoop,
{
    handle.start();

    let result = async {
        process.before_start().await?;
        while !handle.is_stop_requested() {
            process.work().await?;
        }

        Ok::<(), CdcError>(())
    }
    .await;

    debug!(state = ?handle.state(), failed = result.is_err(), "run loop ended");
    let stop_result = process.before_stop().await;
    handle.set(TaskState::Stopped);

    match (result, stop_result) {
        (Err(err), Err(stop_err)) => Err(vec![err, stop_err].into()),
        (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
        (Ok(()), Ok(())) => Ok(()),
    }
}
