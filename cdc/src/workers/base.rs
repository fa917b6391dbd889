use tokio::task::JoinHandle;

use crate::cdc_error;
use crate::concurrency::run_loop::{RunLoopHandle, TaskState};
use crate::error::{CdcResult, ErrorKind};

/// Handle on a spawned run-loop worker.
///
/// The handle can request a stop, wait for the loop to observe it and collect the final
/// result, translating a panicked or aborted task into a [`crate::error::CdcError`].
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    join: Option<JoinHandle<CdcResult<()>>>,
    run_loop: RunLoopHandle,
    panic_kind: ErrorKind,
    cancelled_kind: ErrorKind,
}

impl WorkerHandle {
    pub(crate) fn new(
        name: &'static str,
        join: JoinHandle<CdcResult<()>>,
        run_loop: RunLoopHandle,
        panic_kind: ErrorKind,
        cancelled_kind: ErrorKind,
    ) -> Self {
        Self {
            name,
            join: Some(join),
            run_loop,
            panic_kind,
            cancelled_kind,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> TaskState {
        self.run_loop.state()
    }

    pub fn run_loop(&self) -> &RunLoopHandle {
        &self.run_loop
    }

    pub fn request_stop(&self) {
        self.run_loop.request_stop();
    }

    /// Cancels the task at its next suspension point.
    pub fn abort(&self) {
        if let Some(join) = &self.join {
            join.abort();
        }
    }

    /// Waits for the worker task to complete and returns its result.
    ///
    /// Returns `Ok(())` if the result was already collected.
    pub async fn wait(&mut self) -> CdcResult<()> {
        let Some(join) = self.join.take() else {
            return Ok(());
        };

        join.await.map_err(|err| {
            if err.is_cancelled() {
                cdc_error!(self.cancelled_kind, "Worker was cancelled", self.name, source: err)
            } else {
                cdc_error!(self.panic_kind, "Worker panicked", self.name, source: err)
            }
        })?
    }
}
