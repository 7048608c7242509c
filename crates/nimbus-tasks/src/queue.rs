//! The work-queue collaborator: envelopes, the `WorkQueue` seam, the
//! in-process mpsc-backed queue and the worker loops that drain it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

use crate::runner::TaskRunner;

/// One queued unit of work. `seq_id` is absent for externally triggered
/// submissions and carried on every re-enqueue of a polling chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_key: String,
    pub owner_id: String,
    pub args: serde_json::Value,
    #[serde(default)]
    pub seq_id: Option<String>,
}

impl TaskEnvelope {
    pub fn new(task_key: &str, owner_id: &str, args: serde_json::Value) -> Self {
        Self {
            task_key: task_key.to_string(),
            owner_id: owner_id.to_string(),
            args,
            seq_id: None,
        }
    }

    pub fn with_seq(mut self, seq_id: &str) -> Self {
        self.seq_id = Some(seq_id.to_string());
        self
    }
}

/// Asynchronous execution substrate. The framework only ever hands work
/// off through this seam; a production deployment would back it with a
/// distributed queue.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, envelope: TaskEnvelope, delay: Duration);
}

/// In-process queue over an unbounded tokio channel. Delayed envelopes are
/// parked on a timer and sent when due.
pub struct MpscQueue {
    tx: mpsc::UnboundedSender<TaskEnvelope>,
}

impl MpscQueue {
    /// Build the queue plus the receiving end for the worker loops.
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<TaskEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl WorkQueue for MpscQueue {
    async fn enqueue(&self, envelope: TaskEnvelope, delay: Duration) {
        if delay.is_zero() {
            if self.tx.send(envelope).is_err() {
                tracing::warn!("⚠️ work queue closed, envelope dropped");
            }
            return;
        }
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(envelope).is_err() {
                tracing::debug!("work queue closed before delayed envelope became due");
            }
        });
    }
}

/// Spawn `count` worker loops draining the queue through the runner.
/// Workers race on the shared receiver; execution of different envelopes
/// proceeds in parallel.
pub fn spawn_workers(
    runner: Arc<TaskRunner>,
    rx: mpsc::UnboundedReceiver<TaskEnvelope>,
    count: usize,
) {
    let rx = Arc::new(Mutex::new(rx));
    for worker_id in 0..count {
        let runner = runner.clone();
        let rx = rx.clone();
        tokio::spawn(async move {
            tracing::info!("⚙️ worker {worker_id} started");
            loop {
                let envelope = {
                    let mut rx = rx.lock().await;
                    rx.recv().await
                };
                let Some(envelope) = envelope else {
                    tracing::info!("⚙️ worker {worker_id} stopping: queue closed");
                    break;
                };
                let outcome = runner.run(envelope.clone()).await;
                tracing::debug!(
                    "⚙️ worker {worker_id} finished {} for {}: {:?}",
                    envelope.task_key,
                    envelope.owner_id,
                    outcome
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_immediate_enqueue_delivers() {
        let (queue, mut rx) = MpscQueue::channel();
        queue
            .enqueue(
                TaskEnvelope::new("ping", "org-1", serde_json::json!({"host": "10.0.0.1"})),
                Duration::ZERO,
            )
            .await;
        let env = rx.recv().await.unwrap();
        assert_eq!(env.task_key, "ping");
        assert!(env.seq_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_enqueue_waits() {
        let (queue, mut rx) = MpscQueue::channel();
        queue
            .enqueue(
                TaskEnvelope::new("probe", "org-1", serde_json::json!({})).with_seq("seq-1"),
                Duration::from_secs(120),
            )
            .await;

        // Not yet due
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(61)).await;
        let env = rx.recv().await.unwrap();
        assert_eq!(env.seq_id.as_deref(), Some("seq-1"));
    }
}
