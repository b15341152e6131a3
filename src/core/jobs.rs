//! Background job plumbing: a periodic runner with cooperative shutdown.

use crate::err::Result;
use crate::utilities::AsyncLogger;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::select;
use tokio::task::JoinHandle;

#[async_trait]
pub trait AsyncHandleable: Send {
    async fn handle(&mut self) -> Result<()>;
}

/// A periodic async job wrapper that repeatedly runs an async function and
/// sleeps between runs.
pub struct PeriodicJob<J, F>
where
    J: FnMut() -> F + Send + 'static,
    F: Future<Output = Result<()>> + Send + 'static,
{
    job_name: String,
    job: J,
    period_in_seconds: u64,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
    logger: AsyncLogger,
}

#[async_trait]
impl<J, F> AsyncHandleable for PeriodicJob<J, F>
where
    J: FnMut() -> F + Send + 'static,
    F: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&mut self) -> Result<()> {
        loop {
            match (self.job)().await {
                Ok(()) => {
                    self.logger
                        .debug(format!("Job {} completed successfully.", &self.job_name));
                }
                Err(job_err) => {
                    // A single failed run must not end the periodic job.
                    self.logger
                        .error(format!("Job {} failed: {}", &self.job_name, job_err));
                }
            }
            select! {
                biased;
                _ = &mut self.shutdown_rx => {
                    self.logger.info(format!(
                        "Received a shutdown signal. The job {} will exit.",
                        &self.job_name
                    ));
                    break;
                }
                _ = tokio::time::sleep(Duration::from_secs(self.period_in_seconds)) => {}
            }
        }
        Ok(())
    }
}

/// Handle for a launched job: keeps the shutdown sender and the task.
pub struct JobHandle {
    pub name: String,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
    pub join: JoinHandle<()>,
}

impl JobHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.join.await;
    }
}

pub fn launch_periodic_job<J, F>(
    job_name: &str,
    job: J,
    period_in_seconds: u64,
    logger: AsyncLogger,
) -> JobHandle
where
    J: FnMut() -> F + Send + 'static,
    F: Future<Output = Result<()>> + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let mut periodic = PeriodicJob {
        job_name: String::from(job_name),
        job,
        period_in_seconds,
        shutdown_rx,
        logger: logger.clone(),
    };
    let join = tokio::spawn(async move {
        if let Err(e) = periodic.handle().await {
            periodic
                .logger
                .error(format!("Job {} exited with error: {}", periodic.job_name, e));
        }
    });
    JobHandle {
        name: String::from(job_name),
        shutdown_tx,
        join,
    }
}
