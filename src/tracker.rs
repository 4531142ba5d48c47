use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::rest::RestClient;
use crate::store::{ApplyOutcome, JobStore};
use crate::types::{ChannelState, ScreeningJob};

/// Hybrid push/poll tracker for a single job id.
///
/// While the push channel is connected its reports are authoritative and
/// no polls are issued. Whenever it is not (connecting, reconnecting,
/// degraded), the status endpoint is polled on a fixed interval. Every
/// report from either leg goes through `JobStore::apply_status`; the loop
/// stops unconditionally once a terminal lifecycle is reached, and signals
/// the channel to tear down with it.
pub struct StatusTracker {
    job_id: String,
    rest: RestClient,
    store: Arc<JobStore>,
    push_rx: mpsc::Receiver<ScreeningJob>,
    channel_state: watch::Receiver<ChannelState>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
    polls_issued: u64,
    degraded_logged: bool,
}

impl StatusTracker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: &Config,
        job_id: &str,
        rest: RestClient,
        store: Arc<JobStore>,
        push_rx: mpsc::Receiver<ScreeningJob>,
        channel_state: watch::Receiver<ChannelState>,
        shutdown_tx: broadcast::Sender<()>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            rest,
            store,
            push_rx,
            channel_state,
            shutdown_tx,
            shutdown_rx,
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
            polls_issued: 0,
            degraded_logged: false,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = interval(self.poll_interval);
        ticker.tick().await; // skip immediate first tick, the seed is fresh
        let mut push_open = true;

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    debug!(job_id = %self.job_id, "tracker detached");
                    return;
                }

                maybe = self.push_rx.recv(), if push_open => {
                    match maybe {
                        Some(report) => {
                            if self.apply(report) {
                                break;
                            }
                        }
                        None => {
                            // Channel task ended; polling carries on below.
                            push_open = false;
                        }
                    }
                }

                _ = ticker.tick() => {
                    if *self.channel_state.borrow() == ChannelState::Connected {
                        // Push is authoritative while connected.
                        continue;
                    }
                    self.note_degraded();
                    self.polls_issued += 1;
                    match self.rest.status(&self.job_id).await {
                        Ok(report) => {
                            if self.apply(report) {
                                break;
                            }
                        }
                        // Transient; the next tick retries.
                        Err(e) => warn!(job_id = %self.job_id, "status poll failed: {e}"),
                    }
                }
            }
        }

        // Terminal: stop the channel's socket and any pending reconnect.
        let _ = self.shutdown_tx.send(());
        debug!(
            job_id = %self.job_id,
            polls = self.polls_issued,
            "tracker stopped at terminal state"
        );
    }

    /// Apply one report; returns true when tracking is finished.
    fn apply(&mut self, report: ScreeningJob) -> bool {
        let progress = report.progress;
        let state = report.status;
        match self.store.apply_status(report) {
            ApplyOutcome::Applied { terminal } => {
                if terminal {
                    info!(job_id = %self.job_id, status = %state, "job reached terminal state");
                } else {
                    debug!(job_id = %self.job_id, status = %state, progress, "status applied");
                }
                terminal
            }
            ApplyOutcome::StaleRank | ApplyOutcome::ForeignJob => self
                .store
                .status(&self.job_id)
                .map_or(false, |s| s.status.is_terminal()),
        }
    }

    fn note_degraded(&mut self) {
        if !self.degraded_logged && *self.channel_state.borrow() == ChannelState::Degraded {
            self.degraded_logged = true;
            warn!(
                job_id = %self.job_id,
                "push channel degraded, tracking continues by polling only"
            );
        }
    }
}
