//! Background work queue.
//!
//! The webhook handler validates a delivery and hands it to [`WorkQueue`],
//! which never blocks: a full queue is reported back so the transport can
//! answer `503` and let the sender redeliver. A single dispatcher task drains
//! the channel and spawns one task per event, so events run concurrently and
//! in no particular order.
//!
//! Transient failures (`StorageFailure`) are retried with exponential
//! backoff; everything else is logged once and dropped.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::pipeline::{Pipeline, PushEvent};

pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("work queue is full")]
    Full,
    #[error("work queue is closed")]
    Closed,
}

/// Sending half of the queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    sender: mpsc::Sender<PushEvent>,
}

impl WorkQueue {
    pub fn enqueue(&self, event: PushEvent) -> Result<(), QueueError> {
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }
}

/// Start the dispatcher. It exits once every [`WorkQueue`] clone is dropped
/// and the channel is drained.
pub fn spawn_worker(pipeline: Arc<Pipeline>, capacity: usize) -> (WorkQueue, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::channel::<PushEvent>(capacity.max(1));

    let handle = tokio::spawn(async move {
        let mut tasks = tokio::task::JoinSet::new();
        while let Some(event) = receiver.recv().await {
            let pipeline = pipeline.clone();
            tasks.spawn(async move { run_with_retry(&pipeline, event).await });
            // Reap finished tasks so the set does not grow without bound
            while tasks.try_join_next().is_some() {}
        }
        while tasks.join_next().await.is_some() {}
        tracing::debug!("work queue drained");
    });

    (WorkQueue { sender }, handle)
}

async fn run_with_retry(pipeline: &Pipeline, event: PushEvent) {
    for attempt in 1..=MAX_ATTEMPTS {
        match pipeline.process(&event).await {
            Ok(_) => return,
            Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                // Exponential backoff: 100ms, 200ms, ...
                let delay = Duration::from_millis(100 << (attempt - 1));
                tracing::warn!(
                    attempt,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "event processing failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                tracing::error!(attempt, error = %err, "event processing failed");
                return;
            }
        }
    }
}
