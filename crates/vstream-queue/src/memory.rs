//! In-process priority queue for tests and single-node runs.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::backend::WorkQueue;
use crate::error::QueueResult;
use crate::job::QueueJob;

struct Entry {
    score: f64,
    seq: u64,
    job: QueueJob,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Max-heap: best score first, then earliest push
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct State {
    seq: u64,
    heap: BinaryHeap<Entry>,
    pushed: Vec<QueueJob>,
    dead: Vec<(QueueJob, String)>,
}

/// [`WorkQueue`] kept in memory. Records every push and dead letter so
/// callers can inspect what was submitted.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<State>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every job ever pushed, in push order.
    pub async fn pushed(&self) -> Vec<QueueJob> {
        self.state.lock().await.pushed.clone()
    }

    /// Jobs currently pending, best first.
    pub async fn pending(&self) -> Vec<QueueJob> {
        let state = self.state.lock().await;
        let mut entries: Vec<&Entry> = state.heap.iter().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|e| e.job.clone()).collect()
    }

    pub async fn dead_letters(&self) -> Vec<(QueueJob, String)> {
        self.state.lock().await.dead.clone()
    }

    fn try_pop(state: &mut State) -> Option<QueueJob> {
        state.heap.pop().map(|e| e.job)
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn push(&self, job: &QueueJob) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state.seq += 1;
        let entry = Entry {
            score: job.score(),
            seq: state.seq,
            job: job.clone(),
        };
        state.heap.push(entry);
        state.pushed.push(job.clone());
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, wait: Duration) -> QueueResult<Option<QueueJob>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            if let Some(job) = Self::try_pop(&mut *self.state.lock().await) {
                return Ok(Some(job));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Self::try_pop(&mut *self.state.lock().await));
            }
        }
    }

    async fn dead_letter(&self, job: &QueueJob, error: &str) -> QueueResult<()> {
        self.state
            .lock()
            .await
            .dead
            .push((job.clone(), error.to_string()));
        Ok(())
    }

    async fn len(&self) -> QueueResult<u64> {
        Ok(self.state.lock().await.heap.len() as u64)
    }

    async fn ping(&self) -> QueueResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{EncodeResolutionJob, StartEncodingJob};
    use std::sync::Arc;
    use vstream_models::{Resolution, VideoId};

    fn encode(priority: u8) -> QueueJob {
        QueueJob::EncodeResolution(EncodeResolutionJob::new(VideoId(1), Resolution::P360, priority))
    }

    #[tokio::test]
    async fn test_pops_highest_priority_first() {
        let queue = MemoryQueue::new();
        queue.push(&encode(6)).await.unwrap();
        queue.push(&encode(9)).await.unwrap();
        queue
            .push(&QueueJob::StartEncoding(StartEncodingJob::new(VideoId(2))))
            .await
            .unwrap();

        let order: Vec<u8> = [
            queue.pop(Duration::ZERO).await.unwrap().unwrap(),
            queue.pop(Duration::ZERO).await.unwrap().unwrap(),
            queue.pop(Duration::ZERO).await.unwrap().unwrap(),
        ]
        .iter()
        .map(QueueJob::priority)
        .collect();
        assert_eq!(order, vec![10, 9, 6]);
        assert!(queue.pop(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_same_priority_is_fifo() {
        let queue = MemoryQueue::new();
        let first = encode(5);
        let second = encode(5);
        queue.push(&first).await.unwrap();
        queue.push(&second).await.unwrap();

        assert_eq!(queue.pop(Duration::ZERO).await.unwrap().unwrap(), first);
        assert_eq!(queue.pop(Duration::ZERO).await.unwrap().unwrap(), second);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(MemoryQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop(Duration::from_secs(5)).await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(&encode(7)).await.unwrap();

        let job = waiter.await.unwrap().unwrap();
        assert_eq!(job.priority(), 7);
        assert_eq!(queue.pushed().await.len(), 1);
        assert_eq!(queue.len().await.unwrap(), 0);
    }
}
