//! Bounded inbound queue for a stage.

use tokio::sync::{mpsc, Mutex};

use crate::cancellation::CancellationToken;
use crate::errors::PipelineError;
use crate::pipeline::PipelineConfig;

/// A bounded, cancellation-safe inbox.
///
/// Both `take` and `put` may be dropped mid-wait without losing or
/// duplicating a unit. Once [`StageQueue::close`] is called, `put` fails
/// with [`PipelineError::QueueClosed`] and `take` fails the same way as soon
/// as the remaining units have been drained.
#[derive(Debug)]
pub struct StageQueue<W> {
    stage: String,
    tx: mpsc::Sender<W>,
    rx: Mutex<mpsc::Receiver<W>>,
    closure: CancellationToken,
}

impl<W: Send> StageQueue<W> {
    /// Creates an inbox holding at most `capacity` units (minimum 1).
    #[must_use]
    pub fn with_capacity(stage: impl Into<String>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            stage: stage.into(),
            tx,
            rx: Mutex::new(rx),
            closure: CancellationToken::new(),
        }
    }

    /// Creates an inbox sized by `config.queue_capacity`.
    #[must_use]
    pub fn from_config(stage: impl Into<String>, config: &PipelineConfig) -> Self {
        Self::with_capacity(stage, config.queue_capacity)
    }

    /// Waits for the next unit.
    pub async fn take(&self) -> Result<W, PipelineError> {
        let mut rx = self.rx.lock().await;
        if let Ok(unit) = rx.try_recv() {
            return Ok(unit);
        }
        tokio::select! {
            biased;
            unit = rx.recv() => unit.ok_or_else(|| PipelineError::queue_closed(&self.stage)),
            () = self.closure.cancelled() => Err(PipelineError::queue_closed(&self.stage)),
        }
    }

    /// Waits for capacity and enqueues a unit.
    pub async fn put(&self, unit: W) -> Result<(), PipelineError> {
        if self.is_closed() {
            return Err(PipelineError::queue_closed(&self.stage));
        }
        tokio::select! {
            biased;
            () = self.closure.cancelled() => Err(PipelineError::queue_closed(&self.stage)),
            sent = self.tx.send(unit) => sent.map_err(|_| PipelineError::queue_closed(&self.stage)),
        }
    }

    /// Enqueues a unit only if there is room right now.
    pub fn try_put(&self, unit: W) -> Result<(), PipelineError> {
        if self.is_closed() {
            return Err(PipelineError::queue_closed(&self.stage));
        }
        self.tx.try_send(unit).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                PipelineError::delivery(&self.stage, "inbox is full")
            }
            mpsc::error::TrySendError::Closed(_) => PipelineError::queue_closed(&self.stage),
        })
    }

    /// Stops accepting units. Idempotent.
    pub fn close(&self) {
        self.closure.cancel(format!("inbox of '{}' closed", self.stage));
    }

    /// Returns true once the inbox has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closure.is_cancelled()
    }

    /// Returns the number of queued units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Returns true if no unit is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_put_then_take_in_order() {
        let queue = StageQueue::with_capacity("fetch", 4);
        queue.put(1).await.unwrap();
        queue.put(2).await.unwrap();
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.take().await.unwrap(), 1);
        assert_eq!(queue.take().await.unwrap(), 2);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_try_put_rejects_when_full() {
        let queue = StageQueue::with_capacity("execute", 1);
        queue.try_put("a").unwrap();

        let err = queue.try_put("b").unwrap_err();
        assert!(err.to_string().contains("inbox is full"));
    }

    #[tokio::test]
    async fn test_cancelled_take_loses_nothing() {
        let queue = Arc::new(StageQueue::with_capacity("report", 1));

        let timed_out = tokio::time::timeout(Duration::from_millis(20), queue.take()).await;
        assert!(timed_out.is_err());

        queue.put("op").await.unwrap();
        assert_eq!(queue.take().await.unwrap(), "op");
    }

    #[tokio::test]
    async fn test_closed_inbox_drains_then_refuses() {
        let queue = StageQueue::with_capacity("execute", 2);
        queue.put("op-1").await.unwrap();
        queue.close();

        assert!(matches!(queue.put("op-2").await, Err(PipelineError::QueueClosed { .. })));
        assert!(matches!(queue.try_put("op-3"), Err(PipelineError::QueueClosed { .. })));
        assert_eq!(queue.take().await.unwrap(), "op-1");
        assert!(matches!(queue.take().await, Err(PipelineError::QueueClosed { .. })));
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_take() {
        let queue = Arc::new(StageQueue::<&str>::with_capacity("report", 1));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.take().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.close();
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(PipelineError::QueueClosed { ref stage }) if stage == "report"));
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        let queue = StageQueue::with_capacity("tiny", 0);
        queue.try_put(7).unwrap();
        assert_eq!(queue.len(), 1);
    }
}
