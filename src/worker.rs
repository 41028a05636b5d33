//! Background job handoff. Callers enqueue and return; outcomes only reach the log.

use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use camino::Utf8PathBuf;
use tracing::{error, info};

use crate::error::BrokerError;
use crate::export::AssayMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    ImportSpreadsheet {
        path: Utf8PathBuf,
        submission_url: String,
    },
    ExportAssay(AssayMessage),
}

impl Job {
    pub fn label(&self) -> String {
        match self {
            Job::ImportSpreadsheet { submission_url, .. } => {
                format!("import into {submission_url}")
            }
            Job::ExportAssay(message) => format!("export {}", message.callback_link),
        }
    }
}

pub trait JobHandler: Send + 'static {
    fn handle(&mut self, job: Job) -> Result<(), BrokerError>;
}

/// Single worker thread draining an unbounded channel.
pub struct JobQueue {
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl JobQueue {
    pub fn start<H: JobHandler>(mut handler: H) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker = thread::spawn(move || {
            for job in receiver {
                let label = job.label();
                info!(job = %label, "job started");
                match handler.handle(job) {
                    Ok(()) => info!(job = %label, "job finished"),
                    Err(err) => error!(job = %label, %err, "job failed"),
                }
            }
        });
        Self {
            sender: Some(sender),
            worker: Some(worker),
        }
    }

    pub fn enqueue(&self, job: Job) -> Result<(), BrokerError> {
        self.sender
            .as_ref()
            .ok_or(BrokerError::WorkerStopped)?
            .send(job)
            .map_err(|_| BrokerError::WorkerStopped)
    }

    /// Stops accepting jobs and waits for queued ones to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("job worker panicked");
            }
        }
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl JobHandler for Recorder {
        fn handle(&mut self, job: Job) -> Result<(), BrokerError> {
            self.seen.lock().unwrap().push(job.label());
            match job {
                Job::ExportAssay(_) => Err(BrokerError::Validation("boom".to_string())),
                Job::ImportSpreadsheet { .. } => Ok(()),
            }
        }
    }

    #[test]
    fn failures_do_not_stop_the_worker() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let queue = JobQueue::start(Recorder { seen: Arc::clone(&seen) });
        queue
            .enqueue(Job::ExportAssay(AssayMessage {
                callback_link: "/processes/1".to_string(),
                document_uuid: "d".to_string(),
                envelope_uuid: "e".to_string(),
                assay_index: 0,
                total_assays: 1,
            }))
            .unwrap();
        queue
            .enqueue(Job::ImportSpreadsheet {
                path: Utf8PathBuf::from("sheets"),
                submission_url: "http://ingest/submissionEnvelopes/1".to_string(),
            })
            .unwrap();
        queue.shutdown();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[1].starts_with("import into"));
    }
}
