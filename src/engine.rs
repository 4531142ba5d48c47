use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::{debug, info};

use crate::config::{Config, CHANNEL_CAPACITY};
use crate::error::{Result, ScreenerError};
use crate::rest::RestClient;
use crate::store::JobStore;
use crate::tracker::StatusTracker;
use crate::types::{
    ChannelState, ExportArtifact, ExportFormat, JobState, ResultSet, ScreeningJob,
    ScreeningRequest,
};
use crate::ws::StatusChannel;

/// Handles to the tracking pair armed for the current job.
struct TrackedJob {
    job_id: String,
    shutdown_tx: broadcast::Sender<()>,
    channel_state: watch::Receiver<ChannelState>,
}

impl TrackedJob {
    fn retire(&self) {
        // Receivers may already be gone when the tracker stopped on its own.
        let _ = self.shutdown_tx.send(());
    }
}

/// Front door for the screening service: submit, track, read, cancel,
/// export. Owns the shared [`JobStore`] and the one armed channel/tracker
/// pair; at most one job is tracked at a time, and re-arming retires the
/// previous pair before the new job id goes live.
pub struct ScreeningEngine {
    cfg: Config,
    rest: RestClient,
    store: Arc<JobStore>,
    tracked: Mutex<Option<TrackedJob>>,
}

impl ScreeningEngine {
    pub fn new(cfg: Config) -> Result<Self> {
        let rest = RestClient::new(&cfg)?;
        Ok(Self {
            cfg,
            rest,
            store: JobStore::new(),
            tracked: Mutex::new(None),
        })
    }

    /// The shared cache; subscribe here to observe status updates.
    pub fn store(&self) -> Arc<JobStore> {
        Arc::clone(&self.store)
    }

    /// Validate and submit a screening run. On success the returned job id
    /// is armed for tracking, superseding any previously tracked job.
    pub async fn submit(&self, request: ScreeningRequest) -> Result<String> {
        request.validate().map_err(ScreenerError::Rejected)?;
        let ack = self.rest.submit(&request).await?;
        info!(job_id = %ack.job_id, "screening job accepted");
        self.arm(ack.job_id.clone()).await;
        Ok(ack.job_id)
    }

    async fn arm(&self, job_id: String) {
        let mut tracked = self.tracked.lock().await;
        if let Some(old) = tracked.take() {
            // Retire the old pair first: its timers stop, and any response
            // still in flight is discarded by the armed-id check.
            old.retire();
            debug!(job_id = %old.job_id, "retired tracking for superseded job");
        }

        self.store.arm(&job_id);
        self.store.seed(ScreeningJob::pending(&job_id));

        let (shutdown_tx, channel_shutdown_rx) = broadcast::channel(1);
        let tracker_shutdown_rx = shutdown_tx.subscribe();
        let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);
        let (push_tx, push_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let channel = StatusChannel::new(
            &self.cfg,
            &job_id,
            Arc::clone(&self.store),
            push_tx,
            state_tx,
            channel_shutdown_rx,
        );
        tokio::spawn(channel.run());

        let tracker = StatusTracker::new(
            &self.cfg,
            &job_id,
            self.rest.clone(),
            Arc::clone(&self.store),
            push_rx,
            state_rx.clone(),
            shutdown_tx.clone(),
            tracker_shutdown_rx,
        );
        tokio::spawn(tracker.run());

        *tracked = Some(TrackedJob {
            job_id,
            shutdown_tx,
            channel_state: state_rx,
        });
    }

    /// Stop tracking the current job, if any. Cached entries stay readable.
    pub async fn detach(&self) {
        let mut tracked = self.tracked.lock().await;
        if let Some(old) = tracked.take() {
            old.retire();
            debug!(job_id = %old.job_id, "detached");
        }
        self.store.disarm();
    }

    /// Push-channel state for the armed job, if one is tracked.
    pub async fn channel_state(&self) -> Option<ChannelState> {
        self.tracked
            .lock()
            .await
            .as_ref()
            .map(|t| *t.channel_state.borrow())
    }

    /// Request cancellation. A no-op success when the job is already
    /// terminal; "too late" is never an error.
    pub async fn cancel(&self, job_id: &str) -> Result<()> {
        if let Some(cached) = self.store.status(job_id) {
            if cached.status.is_terminal() {
                debug!(job_id, status = %cached.status, "cancel is a no-op, job already terminal");
                return Ok(());
            }
        }

        self.rest.cancel(job_id).await?;

        // Transition locally; the rank guard makes this harmless if a
        // terminal report won the race.
        if let Some(mut cached) = self.store.status(job_id) {
            cached.status = JobState::Cancelled;
            cached.completed_at = Some(crate::types::now_iso());
            self.store.apply_status(cached);
        }

        let mut tracked = self.tracked.lock().await;
        if tracked.as_ref().map_or(false, |t| t.job_id == job_id) {
            if let Some(t) = tracked.take() {
                t.retire();
            }
        }
        info!(job_id, "cancellation acknowledged");
        Ok(())
    }

    /// Fetch the result set for a completed job. One-shot: a failed fetch
    /// is surfaced, never silently retried. The stored set is immutable
    /// and later calls return the same cached value.
    pub async fn results(&self, job_id: &str) -> Result<Arc<ResultSet>> {
        if let Some(cached) = self.store.results(job_id) {
            return Ok(cached);
        }
        match self.store.status(job_id) {
            Some(s) if s.status == JobState::Completed => {}
            Some(s) => {
                return Err(ScreenerError::ResultsUnavailable(format!(
                    "job {job_id} is {}, results exist only for completed jobs",
                    s.status
                )))
            }
            None => return Err(ScreenerError::UnknownJob(job_id.to_string())),
        }

        let resp = self.rest.results(job_id).await?;
        let rows = resp.results.unwrap_or_default();
        let total_found = resp.total_found.unwrap_or(rows.len() as u64);
        let set = ResultSet {
            job_id: job_id.to_string(),
            rows,
            total_found,
            execution_time: resp.execution_time,
        };
        Ok(self.store.put_results(set))
    }

    /// Materialize an export. The server decides whether export is legal;
    /// the payload is delivered untouched.
    pub async fn export(&self, job_id: &str, format: ExportFormat) -> Result<ExportArtifact> {
        self.rest.export(job_id, format).await
    }

    /// Past runs, most recent first.
    pub async fn history(&self, limit: u32, offset: u32) -> Result<Vec<ScreeningJob>> {
        self.rest.history(limit, offset).await
    }

    /// Wait until the job's cached lifecycle reaches a terminal state and
    /// return that final status.
    pub async fn wait_terminal(&self, job_id: &str) -> Result<ScreeningJob> {
        let mut rx = self
            .store
            .subscribe_status(job_id)
            .ok_or_else(|| ScreenerError::UnknownJob(job_id.to_string()))?;
        loop {
            let current = rx.borrow_and_update().clone();
            if current.status.is_terminal() {
                return Ok(current);
            }
            if rx.changed().await.is_err() {
                return Err(ScreenerError::UnknownJob(format!(
                    "{job_id} (status entry cleared while waiting)"
                )));
            }
        }
    }
}
