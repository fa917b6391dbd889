use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use config::shared::BatchConfig;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info};

use crate::bail;
use crate::checkpoint::CallbackCompleter;
use crate::cdc_error;
use crate::error::{CdcResult, ErrorKind};
use crate::sink::Sink;
use crate::types::RowChangeRecord;

/// Writes groups of records to a downstream system.
pub trait BatchWriter: Send + Sync + 'static {
    /// Returns the name of the downstream system.
    fn name() -> &'static str;

    /// Writes `records` in order. The whole batch fails or succeeds as one.
    fn write_batch(
        &self,
        records: Vec<RowChangeRecord>,
    ) -> impl Future<Output = CdcResult<()>> + Send;
}

type Pending = (RowChangeRecord, CallbackCompleter);

/// Sink that accumulates records and writes them in batches from a background task.
///
/// A batch is written once it holds `max_size` records or `max_fill_ms` elapsed since its first
/// record arrived. Every completer of a batch is completed after the write succeeds, or failed
/// if it does not.
#[derive(Debug)]
pub struct BatchingSink<W> {
    tx: mpsc::Sender<Pending>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    _writer: std::marker::PhantomData<fn() -> W>,
}

impl<W> Clone for BatchingSink<W> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
            handle: self.handle.clone(),
            _writer: std::marker::PhantomData,
        }
    }
}

impl<W> BatchingSink<W>
where
    W: BatchWriter,
{
    /// Starts the background task writing through `writer`. Must be called within a tokio
    /// runtime.
    pub fn new(writer: W, config: BatchConfig) -> Self {
        let max_size = config.max_size.max(1);
        let (tx, rx) = mpsc::channel(max_size * 2);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let span = tracing::info_span!("batching_sink", sink = W::name());
        let handle = tokio::spawn(
            run_batches(
                writer,
                rx,
                shutdown_rx,
                max_size,
                Duration::from_millis(config.max_fill_ms),
            )
            .instrument(span.or_current()),
        );

        Self {
            tx,
            shutdown_tx: Arc::new(shutdown_tx),
            handle: Arc::new(Mutex::new(Some(handle))),
            _writer: std::marker::PhantomData,
        }
    }
}

impl<W> Sink for BatchingSink<W>
where
    W: BatchWriter,
{
    fn name() -> &'static str {
        W::name()
    }

    async fn push(&self, record: RowChangeRecord, completer: CallbackCompleter) -> CdcResult<()> {
        if self.tx.send((record, completer)).await.is_err() {
            bail!(
                ErrorKind::SinkPushFailed,
                "The batching sink is shut down",
                detail = format!("Sink `{}` no longer accepts records", W::name())
            );
        }

        Ok(())
    }

    /// Writes the records still buffered and waits for the background task to exit.
    async fn shutdown(&self) -> CdcResult<()> {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(handle) = handle else {
            return Ok(());
        };

        let _ = self.shutdown_tx.send(true);
        info!(sink = W::name(), "waiting for batching sink to flush");

        handle.await.map_err(|err| {
            cdc_error!(
                ErrorKind::SinkShutdownFailed,
                "The batching sink task failed",
                source: err
            )
        })
    }
}

async fn run_batches<W>(
    writer: W,
    mut rx: mpsc::Receiver<Pending>,
    mut shutdown_rx: watch::Receiver<bool>,
    max_size: usize,
    max_fill: Duration,
) where
    W: BatchWriter,
{
    let mut batch: Vec<Pending> = Vec::with_capacity(max_size);
    let mut stopping = false;

    while !stopping {
        let first = tokio::select! {
            biased;

            _ = shutdown_rx.changed() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        batch.push(first);
        let deadline = Instant::now() + max_fill;

        while batch.len() < max_size {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    stopping = true;
                    break;
                }
                item = rx.recv() => match item {
                    Some(item) => batch.push(item),
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        write(&writer, &mut batch).await;
    }

    // Records accepted before the shutdown request are still written.
    while let Ok(item) = rx.try_recv() {
        batch.push(item);
        if batch.len() >= max_size {
            write(&writer, &mut batch).await;
        }
    }
    write(&writer, &mut batch).await;
    debug!(sink = W::name(), "batching sink stopped");
}

async fn write<W>(writer: &W, batch: &mut Vec<Pending>)
where
    W: BatchWriter,
{
    if batch.is_empty() {
        return;
    }

    let (records, completers): (Vec<_>, Vec<_>) = batch.drain(..).unzip();
    let size = records.len();

    match writer.write_batch(records).await {
        Ok(()) => {
            debug!(sink = W::name(), size, "wrote batch");
            completers
                .into_iter()
                .for_each(CallbackCompleter::mark_completed);
        }
        Err(err) => {
            error!(sink = W::name(), size, error = %err, "failed to write batch");
            for completer in completers {
                completer.mark_failed(&err);
            }
        }
    }
}
