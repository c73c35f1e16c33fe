//! Bounded worker pool: each archival job runs start-to-finish on one
//! worker thread pulled from a shared crossbeam job channel. Dropping the
//! sender closes the channel so workers exit.

use crossbeam_channel::{Sender, unbounded};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    job_tx: Mutex<Option<Sender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        let (job_tx, job_rx) = unbounded::<Job>();
        let handles = (0..workers.max(1))
            .map(|_| {
                let job_rx = job_rx.clone();
                thread::spawn(move || {
                    while let Ok(job) = job_rx.recv() {
                        job();
                    }
                })
            })
            .collect();
        Self {
            job_tx: Mutex::new(Some(job_tx)),
            handles: Mutex::new(handles),
        }
    }

    /// Queue a job. Silently dropped after shutdown; the registry never
    /// submits after shutdown anyway.
    pub fn submit(&self, job: Job) {
        if let Some(tx) = self.job_tx.lock().unwrap().as_ref() {
            let _ = tx.send(job);
        }
    }

    /// Close the queue and wait for every worker to finish its current job.
    pub fn shutdown(&self) {
        self.job_tx.lock().unwrap().take();
        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        for h in handles {
            let _ = h.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
