use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::scheduler::job::JobDescriptor;

/// Unbounded FIFO of job descriptors shared by producers and workers.
///
/// Cloning yields another handle onto the same queue.
#[derive(Debug, Clone, Default)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    items: Mutex<VecDeque<JobDescriptor>>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a descriptor and wake one waiting consumer.
    pub async fn push(&self, job: JobDescriptor) {
        self.inner.items.lock().await.push_back(job);
        self.inner.notify.notify_one();
    }

    /// Pop the oldest descriptor, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` when the timeout expires with the queue still empty.
    pub async fn dequeue(&self, timeout: Duration) -> Option<JobDescriptor> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before checking so a push between the check
            // and the wait is not missed.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.inner.items.lock().await.pop_front() {
                return Some(job);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Pop without waiting.
    pub async fn try_dequeue(&self) -> Option<JobDescriptor> {
        self.inner.items.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.inner.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.items.lock().await.is_empty()
    }

    /// Snapshot of the queued descriptors in FIFO order.
    pub async fn snapshot(&self) -> Vec<JobDescriptor> {
        self.inner.items.lock().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_order() {
        let queue = WorkQueue::new();
        queue.push(JobDescriptor::new(1, "/a", "/b")).await;
        queue.push(JobDescriptor::new(2, "/c", "/d")).await;
        queue.push(JobDescriptor::new(3, "/e", "/f")).await;
        assert_eq!(queue.len().await, 3);

        let ids: Vec<i64> = [
            queue.dequeue(Duration::from_millis(10)).await,
            queue.dequeue(Duration::from_millis(10)).await,
            queue.dequeue(Duration::from_millis(10)).await,
        ]
        .into_iter()
        .map(|j| j.unwrap().id)
        .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn dequeue_times_out_when_empty() {
        let queue = WorkQueue::new();
        let started = std::time::Instant::now();
        assert!(queue.dequeue(Duration::from_millis(50)).await.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn dequeue_wakes_on_push() {
        let queue = WorkQueue::new();
        let consumer = queue.clone();
        let handle =
            tokio::spawn(async move { consumer.dequeue(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(JobDescriptor::new(7, "/src", "/dst")).await;

        let job = handle.await.unwrap().expect("consumer should receive the job");
        assert_eq!(job.id, 7);
    }

    #[tokio::test]
    async fn each_item_is_delivered_once() {
        let queue = WorkQueue::new();
        for id in 0..100 {
            queue.push(JobDescriptor::new(id, "s", "d")).await;
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let q = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(job) = q.dequeue(Duration::from_millis(20)).await {
                    got.push(job.id);
                }
                got
            }));
        }

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn snapshot_does_not_consume() {
        let queue = WorkQueue::new();
        queue.push(JobDescriptor::new(1, "a", "b")).await;
        assert_eq!(queue.snapshot().await.len(), 1);
        assert_eq!(queue.try_dequeue().await.map(|j| j.id), Some(1));
        assert!(queue.try_dequeue().await.is_none());
    }
}
