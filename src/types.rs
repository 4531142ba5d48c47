use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Request selectors (wire codes match the screening service verbatim)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexType {
    #[serde(rename = "0")]
    ByStockName,
    #[serde(rename = "1")]
    Nifty50,
    #[serde(rename = "2")]
    NiftyNext50,
    #[serde(rename = "3")]
    Nifty100,
    #[serde(rename = "4")]
    Nifty200,
    #[serde(rename = "5")]
    Nifty500,
    #[serde(rename = "6")]
    NiftySmallcap50,
    #[serde(rename = "7")]
    NiftySmallcap100,
    #[serde(rename = "8")]
    NiftySmallcap250,
    #[serde(rename = "9")]
    NiftyMidcap50,
    #[serde(rename = "10")]
    NiftyMidcap100,
    #[serde(rename = "11")]
    NiftyMidcap150,
    #[serde(rename = "12")]
    AllStocks,
    #[serde(rename = "13")]
    NewlyListed,
    #[serde(rename = "14")]
    FnoStocks,
    #[serde(rename = "15")]
    UsSp500,
    #[serde(rename = "16")]
    SectoralIndices,
}

impl std::str::FromStr for IndexType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use IndexType::*;
        Ok(match s {
            "0" | "by_stock_name" => ByStockName,
            "1" | "nifty_50" => Nifty50,
            "2" | "nifty_next_50" => NiftyNext50,
            "3" | "nifty_100" => Nifty100,
            "4" | "nifty_200" => Nifty200,
            "5" | "nifty_500" => Nifty500,
            "6" | "nifty_smallcap_50" => NiftySmallcap50,
            "7" | "nifty_smallcap_100" => NiftySmallcap100,
            "8" | "nifty_smallcap_250" => NiftySmallcap250,
            "9" | "nifty_midcap_50" => NiftyMidcap50,
            "10" | "nifty_midcap_100" => NiftyMidcap100,
            "11" | "nifty_midcap_150" => NiftyMidcap150,
            "12" | "all_stocks" => AllStocks,
            "13" | "newly_listed" => NewlyListed,
            "14" | "fno_stocks" => FnoStocks,
            "15" | "us_sp500" => UsSp500,
            "16" | "sectoral_indices" => SectoralIndices,
            other => return Err(format!("unknown index selector: {other}")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScreeningCriteria {
    #[serde(rename = "0")]
    FullScreening,
    #[serde(rename = "1")]
    BreakoutConsolidation,
    #[serde(rename = "2")]
    BreakoutVolume,
    #[serde(rename = "3")]
    Consolidating,
    #[serde(rename = "4")]
    LowestVolume,
    #[serde(rename = "5")]
    RsiScreening,
    #[serde(rename = "6")]
    ReversalSignals,
    #[serde(rename = "7")]
    ChartPatterns,
}

impl std::str::FromStr for ScreeningCriteria {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use ScreeningCriteria::*;
        Ok(match s {
            "0" | "full_screening" => FullScreening,
            "1" | "breakout_consolidation" => BreakoutConsolidation,
            "2" | "breakout_volume" => BreakoutVolume,
            "3" | "consolidating" => Consolidating,
            "4" | "lowest_volume" => LowestVolume,
            "5" | "rsi_screening" => RsiScreening,
            "6" | "reversal_signals" => ReversalSignals,
            "7" | "chart_patterns" => ChartPatterns,
            other => return Err(format!("unknown screening criteria: {other}")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReversalType {
    #[serde(rename = "1")]
    BuySignal,
    #[serde(rename = "2")]
    SellSignal,
    #[serde(rename = "3")]
    MomentumGainers,
    #[serde(rename = "4")]
    MaReversal,
    #[serde(rename = "5")]
    VsaReversal,
    #[serde(rename = "6")]
    NarrowRange,
    #[serde(rename = "7")]
    Lorentzian,
    #[serde(rename = "8")]
    RsiMaCrossing,
}

impl std::str::FromStr for ReversalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use ReversalType::*;
        Ok(match s {
            "1" | "buy_signal" => BuySignal,
            "2" | "sell_signal" => SellSignal,
            "3" | "momentum_gainers" => MomentumGainers,
            "4" | "ma_reversal" => MaReversal,
            "5" | "vsa_reversal" => VsaReversal,
            "6" | "narrow_range" => NarrowRange,
            "7" | "lorentzian" => Lorentzian,
            "8" | "rsi_ma_crossing" => RsiMaCrossing,
            other => return Err(format!("unknown reversal type: {other}")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChartPattern {
    #[serde(rename = "1")]
    BullishInsideBar,
    #[serde(rename = "2")]
    BearishInsideBar,
    #[serde(rename = "3")]
    Confluence,
    #[serde(rename = "4")]
    Vcp,
    #[serde(rename = "5")]
    TrendlineSupport,
}

impl std::str::FromStr for ChartPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use ChartPattern::*;
        Ok(match s {
            "1" | "bullish_inside_bar" => BullishInsideBar,
            "2" | "bearish_inside_bar" => BearishInsideBar,
            "3" | "confluence" => Confluence,
            "4" | "vcp" => Vcp,
            "5" | "trendline_support" => TrendlineSupport,
            other => return Err(format!("unknown chart pattern: {other}")),
        })
    }
}

// ---------------------------------------------------------------------------
// ScreeningRequest
// ---------------------------------------------------------------------------

/// A screening run request. Immutable once submitted; validated locally
/// before it ever reaches the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningRequest {
    pub index_type: IndexType,
    pub criteria: ScreeningCriteria,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock_codes: Option<Vec<String>>,
    /// ISO date `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtest_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsi_min: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsi_max: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reversal_type: Option<ReversalType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ma_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nr_range: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_pattern: Option<ChartPattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookback_candles: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confluence_percentage: Option<f64>,
}

impl ScreeningRequest {
    /// Minimal request: index + criteria, no optional parameters.
    pub fn new(index_type: IndexType, criteria: ScreeningCriteria) -> Self {
        Self {
            index_type,
            criteria,
            stock_codes: None,
            backtest_date: None,
            rsi_min: None,
            rsi_max: None,
            volume_days: None,
            reversal_type: None,
            ma_length: None,
            nr_range: None,
            chart_pattern: None,
            lookback_candles: None,
            confluence_percentage: None,
        }
    }

    /// Check every optional parameter against its declared bounds.
    /// Bounds mirror the server's schema so a rejected request never
    /// costs a round trip.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(min) = self.rsi_min {
            check_range("rsi_min", min as i64, 0, 100)?;
        }
        if let Some(max) = self.rsi_max {
            check_range("rsi_max", max as i64, 0, 100)?;
        }
        if let (Some(min), Some(max)) = (self.rsi_min, self.rsi_max) {
            if max <= min {
                return Err(format!("rsi_max ({max}) must be greater than rsi_min ({min})"));
            }
        }
        if let Some(v) = self.volume_days {
            check_range("volume_days", v as i64, 1, 100)?;
        }
        if let Some(v) = self.ma_length {
            check_range("ma_length", v as i64, 1, 200)?;
        }
        if let Some(v) = self.nr_range {
            check_range("nr_range", v as i64, 1, 14)?;
        }
        if let Some(v) = self.lookback_candles {
            check_range("lookback_candles", v as i64, 1, 50)?;
        }
        if let Some(v) = self.confluence_percentage {
            if !(0.1..=5.0).contains(&v) {
                return Err(format!(
                    "confluence_percentage must be within 0.1-5.0, got {v}"
                ));
            }
        }
        if let Some(ref date) = self.backtest_date {
            if !is_iso_date(date) {
                return Err(format!("backtest_date must be YYYY-MM-DD, got {date}"));
            }
        }
        Ok(())
    }
}

fn check_range(name: &str, value: i64, lo: i64, hi: i64) -> Result<(), String> {
    if value < lo || value > hi {
        return Err(format!("{name} must be within {lo}-{hi}, got {value}"));
    }
    Ok(())
}

/// Strict `YYYY-MM-DD` shape check; month 1-12, day 1-31.
fn is_iso_date(s: &str) -> bool {
    let b = s.as_bytes();
    if b.len() != 10 || b[4] != b'-' || b[7] != b'-' {
        return false;
    }
    if !b.iter().enumerate().all(|(i, c)| {
        if i == 4 || i == 7 {
            true
        } else {
            c.is_ascii_digit()
        }
    }) {
        return false;
    }
    let month: u32 = match s[5..7].parse() {
        Ok(m) => m,
        Err(_) => return false,
    };
    let day: u32 = match s[8..10].parse() {
        Ok(d) => d,
        Err(_) => return false,
    };
    (1..=12).contains(&month) && (1..=31).contains(&day)
}

// ---------------------------------------------------------------------------
// Job lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// Partial-order rank: Pending < Running < terminal. The cached rank
    /// never decreases for a given job id.
    pub fn rank(self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::Running => 1,
            JobState::Completed | JobState::Failed | JobState::Cancelled => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// One job's status as reported by the service, over either transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningJob {
    pub job_id: String,
    pub status: JobState,
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_stocks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screened_stocks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub found_stocks: Option<u64>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ScreeningJob {
    /// Initial cache seed for a freshly accepted job. The first report
    /// from the server overwrites the client-side timestamp.
    pub fn pending(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: JobState::Pending,
            progress: 0,
            total_stocks: None,
            screened_stocks: None,
            found_stocks: None,
            created_at: now_iso(),
            completed_at: None,
            error_message: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Results: opaque rows, fixed shape
// ---------------------------------------------------------------------------

/// One matched stock. The client never interprets these fields; they pass
/// through to whatever renders or exports them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockResult {
    pub stock: String,
    pub consolidating: String,
    pub breaking_out: String,
    pub ltp: String,
    pub volume: String,
    pub ma_signal: String,
    pub rsi: i64,
    pub trend: String,
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_plus_1d: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_plus_1wk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_plus_1mo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_plus_6mo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_plus_1y: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_plus_52wk_high: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_plus_52wk_low: Option<String>,
}

/// Submission / results envelope from the REST API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningResponse {
    pub job_id: String,
    pub status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<StockResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_found: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
}

/// Final output of one completed job. Produced once, immutable thereafter.
#[derive(Debug, Clone, Serialize)]
pub struct ResultSet {
    pub job_id: String,
    pub rows: Vec<StockResult>,
    pub total_found: u64,
    pub execution_time: Option<f64>,
}

// ---------------------------------------------------------------------------
// Transport channel state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Retries exhausted; the tracker runs on polling alone.
    Degraded,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelState::Disconnected => "disconnected",
            ChannelState::Connecting => "connecting",
            ChannelState::Connected => "connected",
            ChannelState::Reconnecting => "reconnecting",
            ChannelState::Degraded => "degraded",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Json => "application/json",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(format!("unknown export format: {other} (expected csv or json)")),
        }
    }
}

/// A materialized export delivered to the caller untouched.
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Current UTC wall clock as `YYYY-MM-DDTHH:MM:SSZ` without pulling in a
/// date-time crate for one timestamp.
pub fn now_iso() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    let days = secs.div_euclid(86_400);
    let rem = secs.rem_euclid(86_400);
    let (hour, minute, second) = (rem / 3600, (rem % 3600) / 60, rem % 60);

    // Civil-from-days conversion over a 400-year era.
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);

    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}Z")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
