//! Single-lane worker for camera completion callbacks.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{channel, Sender},
        Arc,
    },
    thread::JoinHandle,
};

use anyhow::Result;
use log::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct CameraExecutor {
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl CameraExecutor {
    pub fn new_single_thread(name: &str) -> Result<Self> {
        let (sender, receiver) = channel::<Job>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = shutdown.clone();
        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    if shutdown_flag.load(Ordering::Acquire) {
                        break;
                    }
                    job();
                }
                debug!("executor worker exit");
            })?;
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            shutdown,
        })
    }

    /// Queue `job`. Returns false once the executor has been shut down.
    pub fn execute<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_shutdown() {
            warn!("executor is shut down, job rejected");
            return false;
        }
        match self.sender.as_ref() {
            Some(sender) => sender.send(Box::new(job)).is_ok(),
            None => false,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting work and wait for the running job, if any. Jobs still
    /// queued are dropped without running.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("executor worker panicked");
            }
        }
    }
}

impl Drop for CameraExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{atomic::AtomicUsize, mpsc},
        time::Duration,
    };

    #[test]
    fn runs_jobs_in_order_on_one_thread() {
        let executor = CameraExecutor::new_single_thread("test-lane").unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..5 {
            let tx = tx.clone();
            assert!(executor.execute(move || {
                let name = std::thread::current().name().map(str::to_string);
                tx.send((i, name)).unwrap();
            }));
        }
        for i in 0..5 {
            let (n, name) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(n, i);
            assert_eq!(name.as_deref(), Some("test-lane"));
        }
    }

    #[test]
    fn rejects_work_after_shutdown() {
        let mut executor = CameraExecutor::new_single_thread("test-lane").unwrap();
        executor.shutdown();
        assert!(executor.is_shutdown());
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        assert!(!executor.execute(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn shutdown_waits_for_running_job_and_drops_queued() {
        let mut executor = CameraExecutor::new_single_thread("test-lane").unwrap();
        let (started_tx, started_rx) = mpsc::channel();
        let ran = Arc::new(AtomicUsize::new(0));
        let first = ran.clone();
        executor.execute(move || {
            started_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(50));
            first.fetch_add(1, Ordering::SeqCst);
        });
        let second = ran.clone();
        executor.execute(move || {
            second.fetch_add(10, Ordering::SeqCst);
        });
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        executor.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_twice_is_harmless() {
        let mut executor = CameraExecutor::new_single_thread("test-lane").unwrap();
        executor.shutdown();
        executor.shutdown();
    }
}
