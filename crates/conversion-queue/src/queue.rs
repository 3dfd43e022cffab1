//! Sequential job dispatcher
//!
//! One worker task pulls job ids off an unbounded channel and runs them
//! through the encoder, so jobs finish in the order they were submitted.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::encoder::Encoder;
use crate::error::{ConvertError, Result};
use crate::job::{ConversionJob, ConversionRequest, JobStatus};

#[derive(Default)]
struct Jobs {
    by_id: HashMap<String, ConversionJob>,
    /// Submission order
    order: Vec<String>,
    next_submission: u64,
}

type SharedJobs = Arc<RwLock<Jobs>>;

pub struct ConversionQueue {
    jobs: SharedJobs,
    sender: Mutex<Option<mpsc::UnboundedSender<(String, u64)>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ConversionQueue {
    /// Spawn the worker. Must be called inside a tokio runtime.
    pub fn start(encoder: Arc<dyn Encoder>) -> Self {
        let jobs: SharedJobs = Arc::new(RwLock::new(Jobs::default()));
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, u64)>();

        let worker_jobs = jobs.clone();
        let worker = tokio::spawn(async move {
            while let Some((id, submission)) = rx.recv().await {
                run_job(&worker_jobs, encoder.as_ref(), &id, submission).await;
            }
            debug!("Conversion worker stopped");
        });

        Self {
            jobs,
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a job. An id may only be reused once its previous job has
    /// finished.
    pub async fn submit(&self, request: ConversionRequest) -> Result<ConversionJob> {
        request.validate()?;

        let sender = self.sender.lock().await;
        let tx = sender.as_ref().ok_or(ConvertError::QueueClosed)?;

        let mut jobs = self.jobs.write().await;
        if let Some(existing) = jobs.by_id.get(&request.id) {
            if !existing.status.is_terminal() {
                return Err(ConvertError::InvalidRequest(format!(
                    "job {} is already queued",
                    request.id
                )));
            }
            jobs.order.retain(|id| id != &request.id);
        }

        let id = request.id.clone();
        let submission = jobs.next_submission;
        jobs.next_submission += 1;
        let mut job = ConversionJob::new(request);
        job.submission = submission;
        tx.send((id.clone(), submission))
            .map_err(|_| ConvertError::QueueClosed)?;
        jobs.by_id.insert(id.clone(), job.clone());
        jobs.order.push(id.clone());

        info!(job_id = %id, queued = jobs.order.len(), "Conversion job queued");
        Ok(job)
    }

    pub async fn get(&self, id: &str) -> Option<ConversionJob> {
        self.jobs.read().await.by_id.get(id).cloned()
    }

    /// All known jobs in submission order
    pub async fn list(&self) -> Vec<ConversionJob> {
        let jobs = self.jobs.read().await;
        jobs.order
            .iter()
            .filter_map(|id| jobs.by_id.get(id).cloned())
            .collect()
    }

    /// Cancel a job that has not started yet
    pub async fn cancel(&self, id: &str) -> Result<ConversionJob> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .by_id
            .get_mut(id)
            .ok_or_else(|| ConvertError::UnknownJob(id.to_string()))?;
        if job.status != JobStatus::Pending {
            return Err(ConvertError::NotCancellable(id.to_string()));
        }
        job.status = JobStatus::Cancelled;
        job.finished_at = Some(Utc::now());
        info!(job_id = %id, "Conversion job cancelled");
        Ok(job.clone())
    }

    /// Forget every job that has finished, failed or been cancelled
    pub async fn clear_finished(&self) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.by_id.len();
        jobs.by_id.retain(|_, job| !job.status.is_terminal());
        let Jobs { by_id, order, .. } = &mut *jobs;
        order.retain(|id| by_id.contains_key(id));
        let removed = before - jobs.by_id.len();
        debug!(removed, "Cleared finished conversion jobs");
        removed
    }

    /// Stop accepting work, cancel everything still pending and wait for
    /// the running job to finish.
    pub async fn shutdown(&self) {
        self.sender.lock().await.take();

        {
            let mut jobs = self.jobs.write().await;
            let now = Utc::now();
            for job in jobs.by_id.values_mut() {
                if job.status == JobStatus::Pending {
                    job.status = JobStatus::Cancelled;
                    job.finished_at = Some(now);
                }
            }
        }

        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(e) = worker.await {
                warn!(error = %e, "Conversion worker ended abnormally");
            }
        }
    }
}

async fn run_job(jobs: &RwLock<Jobs>, encoder: &dyn Encoder, id: &str, submission: u64) {
    let request = {
        let mut jobs = jobs.write().await;
        let Some(job) = jobs.by_id.get_mut(id) else {
            return;
        };
        if job.submission != submission || job.status != JobStatus::Pending {
            debug!(job_id = %id, "Skipping job that is no longer pending");
            return;
        }
        job.status = JobStatus::Processing;
        job.started_at = Some(Utc::now());
        job.request.clone()
    };
    info!(job_id = %id, input = ?request.file_path, "Conversion started");

    let (progress_tx, mut progress_rx) = watch::channel(0.0f32);
    let encode = encoder.encode(&request, progress_tx);
    tokio::pin!(encode);

    let result = loop {
        tokio::select! {
            result = &mut encode => break result,
            changed = progress_rx.changed() => {
                if changed.is_err() {
                    break (&mut encode).await;
                }
                let pct = *progress_rx.borrow_and_update();
                if let Some(job) = jobs.write().await.by_id.get_mut(id) {
                    job.progress = pct;
                }
            }
        }
    };

    let mut jobs = jobs.write().await;
    let Some(job) = jobs.by_id.get_mut(id) else {
        return;
    };
    job.finished_at = Some(Utc::now());
    match result {
        Ok(output_path) => {
            info!(job_id = %id, output = ?output_path, "Conversion completed");
            job.progress = 100.0;
            job.status = JobStatus::Completed { output_path };
        }
        Err(e) => {
            warn!(job_id = %id, error = %e, "Conversion failed");
            job.status = JobStatus::Failed {
                error: e.to_string(),
            };
        }
    }
}
