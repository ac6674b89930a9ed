//! Queue worker.
//!
//! Polls the runner's task queue, hands each decoded step to
//! [`WorkflowRunner::process_step`] and acknowledges the job according to
//! how the engine dealt with it:
//!
//! | result                         | job                                   |
//! |--------------------------------|---------------------------------------|
//! | `Ok(_)`                        | completed                             |
//! | infrastructure error           | failed (requeued until `max_attempts`) |
//! | any other error, bad payload   | dead-lettered                         |
//!
//! When a requeued step finally dead-letters, the run it belongs to is
//! failed through [`WorkflowRunner::abandon_step`] so it does not hang in
//! `in_progress`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use queue::{FailOutcome, Job};

use crate::error::{EngineError, ErrorKind};
use crate::models::StepDescriptor;
use crate::runner::WorkflowRunner;

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Steps processed at the same time.
    pub concurrency: usize,
    /// Sleep between polls of an empty queue.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl WorkerConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[derive(Clone)]
pub struct Worker {
    runner: Arc<WorkflowRunner>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(runner: Arc<WorkflowRunner>, config: WorkerConfig) -> Self {
        Self { runner, config }
    }

    /// Poll until `shutdown` flips to `true`, then wait for in-flight steps.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            concurrency = self.config.concurrency,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "worker started"
        );

        let permits = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();

        loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }

            // Reap finished tasks so the set does not grow unbounded.
            while tasks.try_join_next().is_some() {}

            let permit = tokio::select! {
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match self.runner.queue().dequeue().await {
                Ok(Some(job)) => {
                    let worker = self.clone();
                    tasks.spawn(async move {
                        worker.handle_job(job).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    self.idle(&mut shutdown).await;
                }
                Err(e) => {
                    drop(permit);
                    error!(error = %e, "failed to poll queue");
                    self.idle(&mut shutdown).await;
                }
            }
        }

        info!(in_flight = tasks.len(), "worker draining");
        while tasks.join_next().await.is_some() {}
        info!("worker stopped");
    }

    /// Process jobs one at a time until the queue is empty or `max_jobs`
    /// have been handled. Returns the number handled.
    pub async fn run_until_idle(&self, max_jobs: usize) -> usize {
        let mut handled = 0;
        while handled < max_jobs {
            match self.runner.queue().dequeue().await {
                Ok(Some(job)) => {
                    self.handle_job(job).await;
                    handled += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "failed to poll queue");
                    break;
                }
            }
        }
        debug!(handled, "queue drained");
        handled
    }

    async fn idle(&self, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.poll_interval) => {}
            _ = shutdown.changed() => {}
        }
    }

    async fn handle_job(&self, job: Job) {
        let queue = self.runner.queue();

        let step = match StepDescriptor::from_job_payload(job.payload.clone()) {
            Ok(step) => step,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "undecodable job payload");
                if let Err(e) = queue.dead_letter(job.id, &format!("undecodable step: {e}")).await {
                    error!(job_id = %job.id, error = %e, "failed to dead-letter job");
                }
                return;
            }
        };

        let result = self.runner.process_step(step.clone()).await;
        let ack = match result {
            Ok(disposition) => {
                debug!(job_id = %job.id, ?disposition, "step processed");
                queue.complete(job.id).await
            }
            Err(err) if err.kind() == ErrorKind::Infrastructure => {
                self.retry_or_abandon(&job, &step, &err).await;
                return;
            }
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "step rejected");
                queue.dead_letter(job.id, &err.to_string()).await
            }
        };

        if let Err(e) = ack {
            error!(job_id = %job.id, error = %e, "failed to acknowledge job");
        }
    }

    async fn retry_or_abandon(&self, job: &Job, step: &StepDescriptor, err: &EngineError) {
        let message = err.to_string();
        warn!(
            job_id = %job.id,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            error = %message,
            "step hit an infrastructure error"
        );

        match self.runner.queue().fail(job.id, &message).await {
            Ok(FailOutcome::Requeued) => {}
            Ok(FailOutcome::DeadLettered) => {
                let reason = format!("step abandoned after {} attempts: {message}", job.attempts);
                if let Err(e) = self.runner.abandon_step(step, &reason).await {
                    error!(execution_id = %step.execution_id, error = %e, "failed to fail abandoned execution");
                }
            }
            Err(e) => error!(job_id = %job.id, error = %e, "failed to hand job back to queue"),
        }
    }
}
