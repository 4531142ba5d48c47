//! In-process mock of the screening service. Each job is a script: a
//! sequence of poll statuses (the last repeats), an optional WebSocket
//! push script, and optional results. Timings are controlled by the
//! shrunken `Config` from [`MockScreener::config`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use screener_client::Config;

#[derive(Clone, Default)]
pub struct JobScript {
    pub job_id: String,
    /// Served in order on successive status polls; the last value repeats.
    pub poll_statuses: Vec<serde_json::Value>,
    /// Pushed over the socket shortly after connect, in order.
    pub ws_statuses: Vec<serde_json::Value>,
    /// Refuse the WebSocket upgrade to force the polling path.
    pub ws_reject: bool,
    /// Payload for GET /results; `None` answers 400.
    pub results: Option<serde_json::Value>,
}

pub fn status_json(job_id: &str, status: &str, progress: u8) -> serde_json::Value {
    json!({
        "job_id": job_id,
        "status": status,
        "progress": progress,
        "created_at": "2026-08-06T10:00:00Z",
    })
}

pub fn results_json(job_id: &str, count: usize) -> serde_json::Value {
    let rows: Vec<serde_json::Value> = (0..count)
        .map(|i| {
            json!({
                "stock": format!("STOCK{i}"),
                "consolidating": "Range: 4.2%",
                "breaking_out": "BO: 102.5",
                "ltp": "100.0",
                "volume": "2.1x",
                "ma_signal": "Bullish",
                "rsi": 55,
                "trend": "Strong Up",
                "pattern": "",
            })
        })
        .collect();
    json!({
        "job_id": job_id,
        "status": "completed",
        "results": rows,
        "total_found": count,
        "execution_time": 12.5,
    })
}

#[derive(Default)]
struct ServerState {
    scripts: Mutex<HashMap<String, JobScript>>,
    /// Job ids handed out by POST /run, in order.
    submit_queue: Mutex<VecDeque<String>>,
    cursors: Mutex<HashMap<String, usize>>,
    polls: Mutex<HashMap<String, usize>>,
    cancelled: Mutex<HashSet<String>>,
}

pub struct MockScreener {
    pub addr: SocketAddr,
    state: Arc<ServerState>,
}

impl MockScreener {
    pub async fn start() -> Self {
        let state = Arc::new(ServerState::default());
        let app = Router::new()
            .route("/api/v1/screening/run", post(run_handler))
            .route("/api/v1/screening/status/:job_id", get(status_handler))
            .route("/api/v1/screening/results/:job_id", get(results_handler))
            .route("/api/v1/screening/cancel/:job_id", delete(cancel_handler))
            .route("/api/v1/screening/history", get(history_handler))
            .route("/api/v1/screening/export/:job_id", get(export_handler))
            .route("/api/v1/screening/ws/:job_id", get(ws_handler))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock server");
        });

        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/api/v1", self.addr)
    }

    /// Client config pointed at this server with test-sized timings.
    pub fn config(&self) -> Config {
        let mut cfg = Config::for_server(&self.base_url()).expect("config");
        cfg.poll_interval_ms = 50;
        cfg.reconnect_backoff_ms = vec![10, 20];
        cfg.max_reconnect_attempts = 2;
        cfg.http_timeout_secs = 5;
        cfg
    }

    /// Register a job script; the next POST /run hands out its id.
    pub fn add_job(&self, script: JobScript) {
        self.state
            .submit_queue
            .lock()
            .unwrap()
            .push_back(script.job_id.clone());
        self.state
            .scripts
            .lock()
            .unwrap()
            .insert(script.job_id.clone(), script);
    }

    pub fn status_polls(&self, job_id: &str) -> usize {
        self.state
            .polls
            .lock()
            .unwrap()
            .get(job_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn was_cancelled(&self, job_id: &str) -> bool {
        self.state.cancelled.lock().unwrap().contains(job_id)
    }
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"detail": "Job not found"})),
    )
        .into_response()
}

async fn run_handler(State(st): State<Arc<ServerState>>) -> Response {
    let next = st.submit_queue.lock().unwrap().pop_front();
    match next {
        Some(job_id) => Json(json!({"job_id": job_id, "status": "pending"})).into_response(),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "no scripted job"})),
        )
            .into_response(),
    }
}

async fn status_handler(
    State(st): State<Arc<ServerState>>,
    Path(job_id): Path<String>,
) -> Response {
    *st.polls.lock().unwrap().entry(job_id.clone()).or_insert(0) += 1;

    let script = st.scripts.lock().unwrap().get(&job_id).cloned();
    let Some(script) = script else {
        return not_found();
    };

    if st.cancelled.lock().unwrap().contains(&job_id) {
        return Json(status_json(&job_id, "cancelled", 0)).into_response();
    }
    if script.poll_statuses.is_empty() {
        return Json(status_json(&job_id, "pending", 0)).into_response();
    }

    let mut cursors = st.cursors.lock().unwrap();
    let cursor = cursors.entry(job_id.clone()).or_insert(0);
    let idx = (*cursor).min(script.poll_statuses.len() - 1);
    *cursor += 1;
    Json(script.poll_statuses[idx].clone()).into_response()
}

async fn results_handler(
    State(st): State<Arc<ServerState>>,
    Path(job_id): Path<String>,
) -> Response {
    let script = st.scripts.lock().unwrap().get(&job_id).cloned();
    match script {
        Some(s) => match s.results {
            Some(v) => Json(v).into_response(),
            None => (
                StatusCode::BAD_REQUEST,
                Json(json!({"detail": "Job not completed yet"})),
            )
                .into_response(),
        },
        None => not_found(),
    }
}

async fn cancel_handler(
    State(st): State<Arc<ServerState>>,
    Path(job_id): Path<String>,
) -> Response {
    if !st.scripts.lock().unwrap().contains_key(&job_id) {
        return not_found();
    }
    let mut cancelled = st.cancelled.lock().unwrap();
    if cancelled.contains(&job_id) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": "Job cannot be cancelled"})),
        )
            .into_response();
    }
    cancelled.insert(job_id);
    Json(json!({"message": "Job cancelled successfully"})).into_response()
}

async fn history_handler(State(_st): State<Arc<ServerState>>) -> Response {
    Json(json!([
        status_json("H2", "completed", 100),
        status_json("H1", "failed", 72),
    ]))
    .into_response()
}

#[derive(Deserialize)]
struct ExportQuery {
    format: String,
}

async fn export_handler(
    State(st): State<Arc<ServerState>>,
    Path(job_id): Path<String>,
    Query(q): Query<ExportQuery>,
) -> Response {
    let script = st.scripts.lock().unwrap().get(&job_id).cloned();
    let Some(script) = script else {
        return not_found();
    };
    let Some(results) = script.results else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": "No results available"})),
        )
            .into_response();
    };

    let rows = results
        .get("results")
        .and_then(|r| r.as_array())
        .cloned()
        .unwrap_or_default();

    let (body, content_type, ext) = if q.format == "json" {
        (
            serde_json::to_vec_pretty(&rows).expect("serialize rows"),
            "application/json",
            "json",
        )
    } else {
        let mut csv = String::from("stock,ltp,rsi,trend\n");
        for row in &rows {
            csv.push_str(&format!(
                "{},{},{},{}\n",
                row["stock"].as_str().unwrap_or(""),
                row["ltp"].as_str().unwrap_or(""),
                row["rsi"],
                row["trend"].as_str().unwrap_or(""),
            ));
        }
        (csv.into_bytes(), "text/csv", "csv")
    };

    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=screening_results_{job_id}.{ext}"),
            ),
        ],
        body,
    )
        .into_response()
}

async fn ws_handler(
    State(st): State<Arc<ServerState>>,
    Path(job_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let script = st.scripts.lock().unwrap().get(&job_id).cloned();
    match script {
        Some(s) if !s.ws_reject => ws.on_upgrade(move |socket| push_script(socket, s)),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn push_script(mut socket: WebSocket, script: JobScript) {
    for status in &script.ws_statuses {
        if socket
            .send(WsMessage::Text(status.to_string()))
            .await
            .is_err()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // Linger so the client drains the final frame before the close races it.
    tokio::time::sleep(Duration::from_millis(300)).await;
}
