use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use screener_client::error::{Result, ScreenerError};
use screener_client::types::{
    ExportFormat, IndexType, JobState, ScreeningCriteria, ScreeningRequest,
};
use screener_client::{Config, ScreeningEngine};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let request = request_from_env()?;
    info!(
        index = ?request.index_type,
        criteria = ?request.criteria,
        "submitting screening run to {}",
        cfg.api_url,
    );

    let engine = ScreeningEngine::new(cfg)?;
    let job_id = engine.submit(request).await?;

    // Follow the cache until the job settles.
    let mut rx = engine
        .store()
        .subscribe_status(&job_id)
        .ok_or_else(|| ScreenerError::UnknownJob(job_id.clone()))?;
    let final_status = loop {
        let snapshot = rx.borrow_and_update().clone();
        info!(
            job_id = %snapshot.job_id,
            status = %snapshot.status,
            progress = snapshot.progress,
            screened = snapshot.screened_stocks.unwrap_or(0),
            found = snapshot.found_stocks.unwrap_or(0),
            "{} | {}%",
            snapshot.status,
            snapshot.progress,
        );
        if snapshot.status.is_terminal() {
            break snapshot;
        }
        if rx.changed().await.is_err() {
            break snapshot;
        }
    };

    match final_status.status {
        JobState::Completed => {
            let results = engine.results(&job_id).await?;
            info!(
                total_found = results.total_found,
                execution_time = ?results.execution_time,
                "screening complete: {} matches",
                results.total_found,
            );
            for row in results.rows.iter().take(20) {
                info!(
                    "{:<14} ltp={:<10} rsi={:<4} trend={:<12} ma={:<10} pattern={}",
                    row.stock, row.ltp, row.rsi, row.trend, row.ma_signal, row.pattern,
                );
            }
            if results.rows.len() > 20 {
                info!("... and {} more", results.rows.len() - 20);
            }

            if let Ok(fmt) = std::env::var("SCREENER_EXPORT_FORMAT") {
                let format: ExportFormat = fmt.parse().map_err(ScreenerError::Config)?;
                let artifact = engine.export(&job_id, format).await?;
                std::fs::write(&artifact.file_name, &artifact.bytes)?;
                info!(
                    file = %artifact.file_name,
                    bytes = artifact.bytes.len(),
                    "results exported"
                );
            }
        }
        JobState::Failed => {
            error!(
                job_id = %job_id,
                "screening failed: {}",
                final_status.error_message.as_deref().unwrap_or("unknown error"),
            );
        }
        JobState::Cancelled => info!(job_id = %job_id, "screening cancelled"),
        _ => {}
    }

    Ok(())
}

/// Build a request from SCREENER_* environment variables. Selectors accept
/// either the wire code or the snake_case name; malformed numeric knobs
/// fall back to unset.
fn request_from_env() -> Result<ScreeningRequest> {
    let mut request = ScreeningRequest::new(
        parse_env("SCREENER_INDEX", IndexType::Nifty50)?,
        parse_env("SCREENER_CRITERIA", ScreeningCriteria::FullScreening)?,
    );
    request.stock_codes = std::env::var("SCREENER_STOCKS").ok().map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    });
    request.backtest_date = std::env::var("SCREENER_BACKTEST_DATE").ok();
    request.rsi_min = env_opt_num("SCREENER_RSI_MIN");
    request.rsi_max = env_opt_num("SCREENER_RSI_MAX");
    request.volume_days = env_opt_num("SCREENER_VOLUME_DAYS");
    request.reversal_type = parse_env_opt("SCREENER_REVERSAL_TYPE")?;
    request.ma_length = env_opt_num("SCREENER_MA_LENGTH");
    request.nr_range = env_opt_num("SCREENER_NR_RANGE");
    request.chart_pattern = parse_env_opt("SCREENER_CHART_PATTERN")?;
    request.lookback_candles = env_opt_num("SCREENER_LOOKBACK_CANDLES");
    request.confluence_percentage = env_opt_num("SCREENER_CONFLUENCE_PCT");
    Ok(request)
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    match std::env::var(key) {
        Ok(v) => v.parse().map_err(ScreenerError::Config),
        Err(_) => Ok(default),
    }
}

fn parse_env_opt<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = String>,
{
    match std::env::var(key) {
        Ok(v) => v.parse().map(Some).map_err(ScreenerError::Config),
        Err(_) => Ok(None),
    }
}

fn env_opt_num<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
