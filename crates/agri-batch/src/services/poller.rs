use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::services::context::{
    BatchJobClient, JobHandle, JobState, PipelineError, PipelineResult,
};

/// Waits for a batch job to reach a terminal state.
///
/// The first status query is issued immediately; afterwards the poller sleeps
/// `interval` between queries. No query is issued after a terminal state.
pub struct JobPoller<'a> {
    client: &'a dyn BatchJobClient,
    interval: Duration,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl<'a> JobPoller<'a> {
    pub fn new(client: &'a dyn BatchJobClient, interval: Duration) -> Self {
        debug_assert!(!interval.is_zero());
        Self {
            client,
            interval,
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Poll until SUCCEEDED, returning the refreshed handle.
    pub async fn wait(&self, job_id: &str) -> PipelineResult<JobHandle> {
        let started = Instant::now();
        let deadline = self.timeout.map(|timeout| started + timeout);
        let mut queries = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled {
                    job_id: job_id.to_string(),
                });
            }

            let handle = self.client.job_status(job_id).await?;
            queries += 1;
            tracing::info!(
                job_id,
                state = %handle.state,
                query = queries,
                elapsed_secs = started.elapsed().as_secs(),
                "batch job status"
            );

            match handle.state {
                JobState::Succeeded => return Ok(handle),
                JobState::Failed | JobState::Cancelled => {
                    return Err(PipelineError::JobDidNotSucceed {
                        job_id: handle.job_id,
                        state: handle.state,
                        message: handle.error,
                    });
                }
                JobState::Pending | JobState::Running => {}
            }

            let mut wake = Instant::now() + self.interval;
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(PipelineError::PollTimeout {
                        job_id: job_id.to_string(),
                        waited: started.elapsed(),
                    });
                }
                wake = wake.min(deadline);
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(PipelineError::Cancelled {
                        job_id: job_id.to_string(),
                    });
                }
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::context::UploadedFile;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedClient {
        states: Mutex<Vec<JobState>>,
        queries: Mutex<usize>,
    }

    impl ScriptedClient {
        fn new(states: &[JobState]) -> Self {
            let mut states = states.to_vec();
            states.reverse();
            Self {
                states: Mutex::new(states),
                queries: Mutex::new(0),
            }
        }

        fn queries(&self) -> usize {
            *self.queries.lock().expect("lock")
        }
    }

    #[async_trait]
    impl BatchJobClient for ScriptedClient {
        async fn upload_file(&self, _: &str, _: Vec<u8>) -> PipelineResult<UploadedFile> {
            Err(PipelineError::message("not used"))
        }

        async fn create_job(&self, _: &str, _: &UploadedFile) -> PipelineResult<JobHandle> {
            Err(PipelineError::message("not used"))
        }

        async fn job_status(&self, job_id: &str) -> PipelineResult<JobHandle> {
            *self.queries.lock().expect("lock") += 1;
            let mut states = self.states.lock().expect("lock");
            let state = if states.len() > 1 {
                states.pop().expect("state")
            } else {
                *states.last().expect("state")
            };
            Ok(JobHandle {
                job_id: job_id.to_string(),
                state,
                result_location: None,
                error: (state == JobState::Failed).then(|| "boom".to_string()),
            })
        }

        async fn download_file(&self, _: &str) -> PipelineResult<Vec<u8>> {
            Err(PipelineError::message("not used"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_first_terminal_state() {
        let client = ScriptedClient::new(&[
            JobState::Pending,
            JobState::Running,
            JobState::Running,
            JobState::Succeeded,
        ]);
        let handle = JobPoller::new(&client, Duration::from_secs(30))
            .wait("batches/1")
            .await
            .expect("job succeeds");
        assert_eq!(handle.state, JobState::Succeeded);
        assert_eq!(client.queries(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_is_a_distinct_error() {
        let client = ScriptedClient::new(&[JobState::Running, JobState::Failed]);
        let err = JobPoller::new(&client, Duration::from_secs(5))
            .wait("batches/2")
            .await
            .expect_err("job fails");
        match err {
            PipelineError::JobDidNotSucceed { state, message, .. } => {
                assert_eq!(state, JobState::Failed);
                assert_eq!(message.as_deref(), Some("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(client.queries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_the_wait() {
        let client = ScriptedClient::new(&[JobState::Running]);
        let err = JobPoller::new(&client, Duration::from_secs(10))
            .with_timeout(Some(Duration::from_secs(25)))
            .wait("batches/3")
            .await
            .expect_err("times out");
        assert!(matches!(err, PipelineError::PollTimeout { .. }));
        assert_eq!(client.queries(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_sleep() {
        let client = ScriptedClient::new(&[JobState::Pending]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(45)).await;
            trigger.cancel();
        });
        let err = JobPoller::new(&client, Duration::from_secs(30))
            .with_cancellation(cancel)
            .wait("batches/4")
            .await
            .expect_err("cancelled");
        assert!(matches!(err, PipelineError::Cancelled { .. }));
        assert_eq!(client.queries(), 2);
    }
}
