use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use super::{Delivery, JobEnvelope, JobSource, QueueName, TaskQueue};
use crate::error::{AppError, AppResult};

#[derive(Default)]
struct Queues {
    pending: HashMap<QueueName, VecDeque<JobEnvelope>>,
    in_flight: HashMap<QueueName, Vec<Delivery>>,
}

/// Process-local queue implementing both producer and consumer sides
#[derive(Default)]
pub struct InMemoryTaskQueue {
    queues: Mutex<Queues>,
    notify: Notify,
    rejecting: AtomicBool,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// When true, `enqueue` fails as if the broker were down
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    pub async fn len(&self, queue: QueueName) -> usize {
        self.queues
            .lock()
            .await
            .pending
            .get(&queue)
            .map_or(0, VecDeque::len)
    }

    pub async fn is_empty(&self, queue: QueueName) -> bool {
        self.len(queue).await == 0
    }

    /// Fetched but not yet acked
    pub async fn in_flight(&self, queue: QueueName) -> usize {
        self.queues
            .lock()
            .await
            .in_flight
            .get(&queue)
            .map_or(0, Vec::len)
    }

    /// Removes and returns every pending job of `queue`, oldest first
    pub async fn drain(&self, queue: QueueName) -> Vec<JobEnvelope> {
        self.queues
            .lock()
            .await
            .pending
            .get_mut(&queue)
            .map(|jobs| jobs.drain(..).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, envelope: JobEnvelope) -> AppResult<()> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(AppError::UpstreamUnavailable("task queue is unavailable".to_string()));
        }

        self.queues
            .lock()
            .await
            .pending
            .entry(envelope.job.queue())
            .or_default()
            .push_back(envelope);
        self.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl JobSource for InMemoryTaskQueue {
    async fn next_job(&self, queue: QueueName, wait: Duration) -> AppResult<Option<Delivery>> {
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            // Register interest before checking so a push in between is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut queues = self.queues.lock().await;
                if let Some(envelope) = queues.pending.get_mut(&queue).and_then(VecDeque::pop_front) {
                    let delivery = Delivery::new(envelope, Uuid::new_v4().to_string());
                    queues
                        .in_flight
                        .entry(queue)
                        .or_default()
                        .push(delivery.clone());
                    return Ok(Some(delivery));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, queue: QueueName, delivery: &Delivery) -> AppResult<()> {
        if let Some(held) = self.queues.lock().await.in_flight.get_mut(&queue) {
            held.retain(|d| d.receipt() != delivery.receipt());
        }
        Ok(())
    }

    async fn requeue_unacked(&self, queue: QueueName) -> AppResult<usize> {
        let mut queues = self.queues.lock().await;
        let held = queues.in_flight.remove(&queue).unwrap_or_default();
        let requeued = held.len();

        let pending = queues.pending.entry(queue).or_default();
        for delivery in held.into_iter().rev() {
            pending.push_front(delivery.envelope);
        }
        drop(queues);

        if requeued > 0 {
            self.notify.notify_waiters();
        }
        Ok(requeued)
    }
}
