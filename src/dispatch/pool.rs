//! A bounded pool of tokio tasks running dispatch jobs by priority.
//!
//! Jobs are queued on one unbounded channel per [`Priority`]. A single scheduler task waits for a
//! free worker slot first and only then picks a job, always taking from the highest non-empty
//! priority queue. This way a latency sensitive job queued while the pool is saturated overtakes
//! bulk jobs which were queued earlier.
//!
//! The scheduler stops once every [`WorkerPool`] handle has been dropped and the queues are
//! drained.

use std::{fmt, sync::Arc};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, Semaphore};
use tracing::trace;

use crate::message::Priority;

pub(crate) type Job = BoxFuture<'static, ()>;

#[derive(Clone)]
pub(crate) struct WorkerPool {
    // Indexed by `Priority::DESCENDING` order.
    queues: Arc<[mpsc::UnboundedSender<Job>; 5]>,
}

impl WorkerPool {
    /// Spawns the scheduler task.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub(crate) fn spawn(workers: usize) -> Self {
        let (max_tx, max_rx) = mpsc::unbounded_channel();
        let (high_tx, high_rx) = mpsc::unbounded_channel();
        let (normal_tx, normal_rx) = mpsc::unbounded_channel();
        let (low_tx, low_rx) = mpsc::unbounded_channel();
        let (min_tx, min_rx) = mpsc::unbounded_channel();

        let queues = Queues {
            max: max_rx,
            high: high_rx,
            normal: normal_rx,
            low: low_rx,
            min: min_rx,
        };
        tokio::spawn(schedule(queues, Arc::new(Semaphore::new(workers.max(1)))));

        WorkerPool {
            queues: Arc::new([max_tx, high_tx, normal_tx, low_tx, min_tx]),
        }
    }

    /// Queues a job. Returns the job back if the scheduler is no longer running.
    pub(crate) fn submit(&self, priority: Priority, job: Job) -> Result<(), Job> {
        self.queues[queue_index(priority)]
            .send(job)
            .map_err(|err| err.0)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.queues[0].is_closed()
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn queue_index(priority: Priority) -> usize {
    match priority {
        Priority::Max => 0,
        Priority::High => 1,
        Priority::Normal => 2,
        Priority::Low => 3,
        Priority::Min => 4,
    }
}

struct Queues {
    max: mpsc::UnboundedReceiver<Job>,
    high: mpsc::UnboundedReceiver<Job>,
    normal: mpsc::UnboundedReceiver<Job>,
    low: mpsc::UnboundedReceiver<Job>,
    min: mpsc::UnboundedReceiver<Job>,
}

impl Queues {
    async fn next(&mut self) -> Option<Job> {
        tokio::select! {
            biased;
            Some(job) = self.max.recv() => Some(job),
            Some(job) = self.high.recv() => Some(job),
            Some(job) = self.normal.recv() => Some(job),
            Some(job) = self.low.recv() => Some(job),
            Some(job) = self.min.recv() => Some(job),
            else => None,
        }
    }
}

async fn schedule(mut queues: Queues, slots: Arc<Semaphore>) {
    loop {
        let Ok(permit) = slots.clone().acquire_owned().await else {
            break;
        };
        let Some(job) = queues.next().await else {
            break;
        };
        tokio::spawn(async move {
            job.await;
            drop(permit);
        });
    }

    trace!("worker pool scheduler stopped");
}
