use crate::error::{BlockchainError, Result};
use crossbeam::channel::{bounded, Sender};
use log::{debug, error};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of worker threads draining a bounded job queue.
///
/// `submit` blocks while the queue is full. Dropping the pool closes the
/// queue, lets the workers finish what is already queued and joins them.
pub struct TaskPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskPool {
    pub fn new(workers: usize, capacity: usize) -> Result<TaskPool> {
        if workers == 0 || capacity == 0 {
            return Err(BlockchainError::Config(
                "Task pool needs at least one worker and one queue slot".to_string(),
            ));
        }
        let (sender, receiver) = bounded::<Job>(capacity);
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("task-worker-{id}"))
                .spawn(move || {
                    for job in receiver.iter() {
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!("Task panicked in worker {id}");
                        }
                    }
                    debug!("Task worker {id} stopped");
                })?;
            handles.push(handle);
        }
        Ok(TaskPool {
            sender: Some(sender),
            workers: handles,
        })
    }

    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| BlockchainError::Invariant("Task pool is shut down".to_string()))?;
        sender
            .send(Box::new(job))
            .map_err(|_| BlockchainError::Invariant("Task queue closed".to_string()))
    }

    pub fn queued(&self) -> usize {
        self.sender.as_ref().map(Sender::len).unwrap_or(0)
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Task worker exited abnormally");
            }
        }
    }
}
