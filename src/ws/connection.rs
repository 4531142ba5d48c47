use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::{Config, WS_PING_INTERVAL_SECS};
use crate::error::Result;
use crate::store::JobStore;
use crate::types::{ChannelState, ScreeningJob};
use crate::ws::messages::{parse_status_frame, ChannelFrame};

/// How one established connection ended.
enum ConnectionEnd {
    /// Server closed the stream or the read side drained.
    Closed { received_frames: bool },
    /// Shutdown was signalled; tear down without reconnecting.
    Shutdown,
}

/// One persistent progress connection, scoped to exactly one job id.
///
/// Frames whose embedded job id does not match the armed one are dropped
/// here, before they ever reach the tracker. Reconnects use the capped
/// backoff ladder; after `max_attempts` consecutive failures the channel
/// reports `Degraded` and exits, leaving the tracker on polling alone.
pub struct StatusChannel {
    url: String,
    job_id: String,
    store: Arc<JobStore>,
    push_tx: mpsc::Sender<ScreeningJob>,
    state_tx: watch::Sender<ChannelState>,
    shutdown_rx: broadcast::Receiver<()>,
    backoff_ms: Vec<u64>,
    max_attempts: u32,
}

impl StatusChannel {
    pub fn new(
        cfg: &Config,
        job_id: &str,
        store: Arc<JobStore>,
        push_tx: mpsc::Sender<ScreeningJob>,
        state_tx: watch::Sender<ChannelState>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            url: format!("{}/screening/ws/{job_id}", cfg.ws_url.trim_end_matches('/')),
            job_id: job_id.to_string(),
            store,
            push_tx,
            state_tx,
            shutdown_rx,
            backoff_ms: cfg.reconnect_backoff_ms.clone(),
            max_attempts: cfg.max_reconnect_attempts,
        }
    }

    pub async fn run(mut self) {
        let mut attempts = 0u32;

        loop {
            let state = if attempts == 0 {
                ChannelState::Connecting
            } else {
                ChannelState::Reconnecting
            };
            self.state_tx.send_replace(state);

            match self.connect_once().await {
                Ok(ConnectionEnd::Shutdown) => {
                    self.state_tx.send_replace(ChannelState::Disconnected);
                    debug!(job_id = %self.job_id, "status channel detached");
                    return;
                }
                Ok(ConnectionEnd::Closed { received_frames }) => {
                    if self.job_finished() {
                        // Server closes the stream after the final status;
                        // nothing left to reconnect for.
                        self.state_tx.send_replace(ChannelState::Disconnected);
                        debug!(job_id = %self.job_id, "status stream finished");
                        return;
                    }
                    if received_frames {
                        attempts = 0;
                    }
                    attempts += 1;
                    info!(job_id = %self.job_id, "status stream closed before terminal state");
                }
                Err(e) => {
                    attempts += 1;
                    warn!(job_id = %self.job_id, attempt = attempts, "status channel error: {e}");
                }
            }

            if attempts > self.max_attempts {
                warn!(
                    job_id = %self.job_id,
                    attempts,
                    "status channel exhausted retries, falling back to polling"
                );
                self.state_tx.send_replace(ChannelState::Degraded);
                return;
            }

            let delay_ms = self
                .backoff_ms
                .get(attempts.saturating_sub(1) as usize)
                .or(self.backoff_ms.last())
                .copied()
                .unwrap_or(1000);
            debug!(job_id = %self.job_id, "reconnecting in {delay_ms}ms");
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                _ = self.shutdown_rx.recv() => {
                    self.state_tx.send_replace(ChannelState::Disconnected);
                    return;
                }
            }
        }
    }

    async fn connect_once(&mut self) -> Result<ConnectionEnd> {
        let (ws_stream, _) = tokio::select! {
            res = connect_async(self.url.as_str()) => res?,
            _ = self.shutdown_rx.recv() => return Ok(ConnectionEnd::Shutdown),
        };
        self.state_tx.send_replace(ChannelState::Connected);
        info!(job_id = %self.job_id, "status channel connected");

        let (mut write, mut read) = ws_stream.split();
        let mut received_frames = false;

        let mut ping_interval = interval(Duration::from_secs(WS_PING_INTERVAL_SECS));
        ping_interval.tick().await; // consume immediate first tick

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            received_frames |= self.handle_frame(&text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Ok(ConnectionEnd::Closed { received_frames });
                        }
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(_)) => {}
                    }
                }

                _ = ping_interval.tick() => {
                    write.send(Message::Ping(Vec::new())).await?;
                }

                _ = self.shutdown_rx.recv() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(ConnectionEnd::Shutdown);
                }
            }
        }
    }

    /// Returns true if the frame carried a usable status for the armed job.
    async fn handle_frame(&self, text: &str) -> bool {
        match parse_status_frame(text) {
            Some(ChannelFrame::Status(job)) => {
                if job.job_id != self.job_id {
                    // A frame for a superseded or unrelated job: a late
                    // server push racing a re-arm. Never forwarded.
                    debug!(
                        got = %job.job_id,
                        armed = %self.job_id,
                        "dropping status frame for foreign job id"
                    );
                    return false;
                }
                if self.push_tx.send(job).await.is_err() {
                    debug!(job_id = %self.job_id, "tracker gone, dropping status frame");
                }
                true
            }
            Some(ChannelFrame::ServerError(err)) => {
                warn!(job_id = %self.job_id, "status stream error: {err}");
                true
            }
            None => false,
        }
    }

    fn job_finished(&self) -> bool {
        self.store
            .status(&self.job_id)
            .map_or(false, |s| s.status.is_terminal())
    }
}
