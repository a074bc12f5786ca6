//! Batch transformation buffer.
//!
//! Callers hand over one input at a time and wait for their own output,
//! while the buffer feeds an underlying [`BatchOperation`] with up to
//! `max_batch_size` inputs at once. Batches are flushed:
//!
//! - every `flush_interval` by a scheduled task, whatever the fill level
//! - immediately when a caller finds the buffer full
//! - whenever a waiting caller's backoff step times out
//!
//! Entries still queued at shutdown are abandoned: their callers give up
//! with [`BatchError::Abandoned`] once `await_timeout` has passed.

mod transformer;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sifter_core::metrics::events::{BatchFlushed, FlushTrigger};
use sifter_core::{BatchConfig, ScheduledTask, TaskRunner, emit};
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub use transformer::{BatchTransformer, BatchTransformerConfig};

use crate::error::BatchError;

/// Backoff steps of a caller waiting for its output; the last one repeats.
const AWAIT_BACKOFF_MS: [u64; 5] = [20, 50, 100, 100, 200];

/// An operation that is cheaper when called with many inputs at once.
///
/// The returned outputs must line up with the inputs: output `i` belongs to
/// input `i`.
#[async_trait]
pub trait BatchOperation<I, O>: Send + Sync {
    async fn map(&self, inputs: Vec<I>) -> Result<Vec<O>, BatchError>;
}

struct BatchEntry<I, O> {
    input: I,
    output: oneshot::Sender<Result<O, BatchError>>,
}

struct Inner<I, O> {
    name: String,
    operation: Arc<dyn BatchOperation<I, O>>,
    queue: Mutex<VecDeque<BatchEntry<I, O>>>,
    flush_lock: tokio::sync::Mutex<()>,
    shut_down: AtomicBool,
    max_batch_size: usize,
}

impl<I, O> Inner<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Queue an entry, handing it back when the queue is full.
    fn try_push(&self, entry: BatchEntry<I, O>) -> Result<(), BatchEntry<I, O>> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if queue.len() >= self.max_batch_size {
            return Err(entry);
        }
        queue.push_back(entry);
        Ok(())
    }

    async fn flush(&self, trigger: FlushTrigger) {
        if self.is_shut_down() {
            return;
        }
        let _flushing = self.flush_lock.lock().await;

        let entries: Vec<BatchEntry<I, O>> = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            let count = queue.len().min(self.max_batch_size);
            queue.drain(..count).collect()
        };
        if entries.is_empty() {
            return;
        }

        let size = entries.len();
        let (inputs, senders): (Vec<I>, Vec<_>) =
            entries.into_iter().map(|e| (e.input, e.output)).unzip();
        emit!(BatchFlushed { size, trigger });
        debug!(buffer = %self.name, size, trigger = trigger.as_str(), "Flushing batch");

        match self.operation.map(inputs).await {
            Ok(outputs) if outputs.len() == size => {
                for (sender, output) in senders.into_iter().zip(outputs) {
                    // The caller may already have given up.
                    let _ = sender.send(Ok(output));
                }
            }
            Ok(outputs) => {
                let error = BatchError::SizeMismatch {
                    expected: size,
                    found: outputs.len(),
                };
                warn!(buffer = %self.name, error = %error, "Batch operation misbehaved");
                for sender in senders {
                    let _ = sender.send(Err(error.clone()));
                }
            }
            Err(error) => {
                warn!(buffer = %self.name, size, error = %error, "Batch operation failed");
                for sender in senders {
                    let _ = sender.send(Err(error.clone()));
                }
            }
        }
    }
}

/// Buffer between one-at-a-time callers and a batch operation.
pub struct BatchBuffer<I, O> {
    inner: Arc<Inner<I, O>>,
    flush_interval: Duration,
    await_timeout: Duration,
    scheduled: Mutex<Option<ScheduledTask>>,
}

impl<I, O> BatchBuffer<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn new(
        name: impl Into<String>,
        operation: Arc<dyn BatchOperation<I, O>>,
        config: &BatchConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                operation,
                queue: Mutex::new(VecDeque::with_capacity(config.max_batch_size)),
                flush_lock: tokio::sync::Mutex::new(()),
                shut_down: AtomicBool::new(false),
                max_batch_size: config.max_batch_size.max(1),
            }),
            flush_interval: config.flush_interval(),
            await_timeout: config.await_timeout(),
            scheduled: Mutex::new(None),
        }
    }

    pub fn max_batch_size(&self) -> usize {
        self.inner.max_batch_size
    }

    /// Number of entries waiting for a flush.
    pub fn queued(&self) -> usize {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }

    /// Start the periodic flush on `runner`. Calling it twice replaces the
    /// earlier schedule.
    pub fn start(&self, runner: &TaskRunner) {
        let inner = self.inner.clone();
        let task = runner.schedule("batch-flush", self.flush_interval, move || {
            let inner = inner.clone();
            async move { inner.flush(FlushTrigger::Scheduled).await }
        });
        let previous = self
            .scheduled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        drop(previous);
        debug!(
            buffer = %self.inner.name,
            max_batch_size = self.inner.max_batch_size,
            flush_interval_ms = self.flush_interval.as_millis(),
            "Batch buffer started"
        );
    }

    /// Hand over one input and wait for its output.
    pub async fn enqueue(&self, input: I) -> Result<O, BatchError> {
        if self.is_shut_down() {
            return Err(BatchError::ShutDown);
        }

        let (sender, receiver) = oneshot::channel();
        let mut entry = BatchEntry {
            input,
            output: sender,
        };
        while let Err(rejected) = self.inner.try_push(entry) {
            entry = rejected;
            self.inner.flush(FlushTrigger::BufferFull).await;
            if self.is_shut_down() {
                return Err(BatchError::ShutDown);
            }
        }

        self.await_output(receiver).await
    }

    async fn await_output(
        &self,
        mut receiver: oneshot::Receiver<Result<O, BatchError>>,
    ) -> Result<O, BatchError> {
        let started = Instant::now();
        let mut step = 0;

        loop {
            let remaining = self.await_timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(BatchError::Abandoned {
                    waited_ms: started.elapsed().as_millis(),
                });
            }
            let backoff_ms = AWAIT_BACKOFF_MS[step.min(AWAIT_BACKOFF_MS.len() - 1)];
            let backoff = Duration::from_millis(backoff_ms);
            step += 1;

            match tokio::time::timeout(backoff.min(remaining), &mut receiver).await {
                Ok(Ok(output)) => return output,
                Ok(Err(_)) => {
                    return Err(BatchError::Abandoned {
                        waited_ms: started.elapsed().as_millis(),
                    });
                }
                Err(_) => self.inner.flush(FlushTrigger::AwaitTimeout).await,
            }
        }
    }

    /// Flush one batch now.
    pub async fn flush(&self) {
        self.inner.flush(FlushTrigger::Scheduled).await;
    }

    /// Stop the periodic flush. Entries still queued are not flushed.
    pub async fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
        let task = self
            .scheduled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.stop().await;
        }
        let abandoned = self.queued();
        if abandoned > 0 {
            warn!(
                buffer = %self.inner.name,
                abandoned,
                "Batch buffer shut down with queued entries"
            );
        } else {
            debug!(buffer = %self.inner.name, "Batch buffer shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Upper {
        calls: AtomicUsize,
        sizes: Mutex<Vec<usize>>,
    }

    impl Upper {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                sizes: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl BatchOperation<String, String> for Upper {
        async fn map(&self, inputs: Vec<String>) -> Result<Vec<String>, BatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.sizes.lock().unwrap().push(inputs.len());
            Ok(inputs.iter().map(|s| s.to_uppercase()).collect())
        }
    }

    struct Truncating;

    #[async_trait]
    impl BatchOperation<u32, u32> for Truncating {
        async fn map(&self, mut inputs: Vec<u32>) -> Result<Vec<u32>, BatchError> {
            inputs.pop();
            Ok(inputs)
        }
    }

    fn config(max_batch_size: usize, flush_interval_ms: u64, await_timeout_ms: u64) -> BatchConfig {
        BatchConfig {
            max_batch_size,
            flush_interval_ms,
            await_timeout_ms,
        }
    }

    #[tokio::test]
    async fn test_single_caller_gets_its_output() {
        let operation = Upper::new();
        let buffer = BatchBuffer::new("upper", operation.clone(), &config(3, 20, 5_000));
        buffer.start(&TaskRunner::new(1));

        let output = buffer.enqueue("abc".to_string()).await.unwrap();
        assert_eq!(output, "ABC");
        assert_eq!(operation.calls.load(Ordering::SeqCst), 1);
        buffer.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_callers_get_matching_outputs() {
        let operation = Upper::new();
        let buffer = Arc::new(BatchBuffer::new("upper", operation.clone(), &config(4, 30, 5_000)));
        buffer.start(&TaskRunner::new(1));

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let buffer = buffer.clone();
                tokio::spawn(async move { (i, buffer.enqueue(format!("v{i}")).await) })
            })
            .collect();

        for handle in handles {
            let (i, output) = handle.await.unwrap();
            assert_eq!(output.unwrap(), format!("V{i}"));
        }
        let sizes = operation.sizes.lock().unwrap().clone();
        assert_eq!(sizes.iter().sum::<usize>(), 10);
        assert!(sizes.iter().all(|size| *size <= 4));
        buffer.shutdown().await;
    }

    #[tokio::test]
    async fn test_size_mismatch_fails_every_entry() {
        let buffer = Arc::new(BatchBuffer::new(
            "truncating",
            Arc::new(Truncating),
            &config(2, 10_000, 5_000),
        ));

        let first = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.enqueue(1).await })
        };
        let second = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.enqueue(2).await })
        };

        for handle in [first, second] {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, BatchError::SizeMismatch { .. }));
        }
    }

    #[tokio::test]
    async fn test_shutdown_abandons_queued_entries() {
        let operation = Upper::new();
        let buffer = Arc::new(BatchBuffer::new(
            "upper",
            operation.clone(),
            &config(3, 10_000, 150),
        ));
        buffer.start(&TaskRunner::new(1));

        let waiting = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.enqueue("late".to_string()).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        buffer.shutdown().await;

        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, BatchError::Abandoned { .. }));
        assert_eq!(operation.calls.load(Ordering::SeqCst), 0);
        assert_eq!(buffer.queued(), 1);

        assert_eq!(
            buffer.enqueue("after".to_string()).await.unwrap_err(),
            BatchError::ShutDown
        );
    }
}
