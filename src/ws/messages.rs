use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use tracing::warn;

use crate::types::ScreeningJob;

static PARSE_FAILURES: AtomicU64 = AtomicU64::new(0);

/// `{"error": ...}`: the server reports a stream failure instead of a status.
#[derive(Debug, Deserialize)]
struct RawErrorMsg {
    error: String,
}

/// Parsed event from a single progress-channel frame.
#[derive(Debug)]
pub enum ChannelFrame {
    /// A status report tagged with its job id.
    Status(ScreeningJob),
    ServerError(String),
}

/// Parse a raw WebSocket text frame.
///
/// Progress messages are `ScreeningJob`-shaped JSON; anything else that
/// still parses as `{"error": ...}` is surfaced as a stream error.
/// Unrecognized frames are dropped and counted.
pub fn parse_status_frame(raw: &str) -> Option<ChannelFrame> {
    if let Ok(job) = serde_json::from_str::<ScreeningJob>(raw) {
        if !job.job_id.is_empty() {
            return Some(ChannelFrame::Status(job));
        }
    }
    if let Ok(msg) = serde_json::from_str::<RawErrorMsg>(raw) {
        return Some(ChannelFrame::ServerError(msg.error));
    }

    let count = PARSE_FAILURES.fetch_add(1, Ordering::Relaxed) + 1;
    if count <= 10 || count % 100 == 0 {
        let sample = &raw[..200.min(raw.len())];
        warn!(count, "unrecognized status frame: {sample}");
    }
    None
}
