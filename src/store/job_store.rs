use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;

use crate::types::{ResultSet, ScreeningJob};

/// What happened to a status report handed to [`JobStore::apply_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { terminal: bool },
    /// Lifecycle rank was behind the cached one (out-of-order delivery).
    StaleRank,
    /// Report was tagged with a job id that is not armed.
    ForeignJob,
}

/// Shared cache of job statuses and result sets, keyed by job id.
///
/// Statuses fan out through `watch` channels so every current subscriber
/// of a key sees a write before the writing call returns. `apply_status`
/// is the single reducer for both transports: it enforces the armed-id
/// check and the lifecycle-rank guard, so no caller can regress the cache.
pub struct JobStore {
    /// The one job id currently being tracked. Writes for any other id
    /// are discarded; the sole guard against cross-job corruption when
    /// a job is superseded while its network calls are still in flight.
    armed: watch::Sender<Option<String>>,
    /// job_id → latest status.
    statuses: DashMap<String, watch::Sender<ScreeningJob>>,
    /// job_id → immutable result set. First write wins.
    results: DashMap<String, Arc<ResultSet>>,
    stale_discards: AtomicU64,
    foreign_discards: AtomicU64,
}

impl JobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn arm(&self, job_id: &str) {
        self.armed.send_replace(Some(job_id.to_string()));
    }

    pub fn disarm(&self) {
        self.armed.send_replace(None);
    }

    pub fn armed_job(&self) -> Option<String> {
        self.armed.borrow().clone()
    }

    pub fn is_armed(&self, job_id: &str) -> bool {
        self.armed.borrow().as_deref() == Some(job_id)
    }

    /// Seed or reset the status entry for a freshly submitted job.
    pub fn seed(&self, job: ScreeningJob) {
        match self.statuses.entry(job.job_id.clone()) {
            Entry::Occupied(e) => {
                e.get().send_replace(job);
            }
            Entry::Vacant(v) => {
                let (tx, _rx) = watch::channel(job);
                v.insert(tx);
            }
        }
    }

    /// Apply a status report from either transport.
    ///
    /// Discards reports for unarmed job ids and reports whose lifecycle
    /// rank is behind the cached one. At equal rank the last arrival wins,
    /// with `progress` clamped so it never decreases while the lifecycle
    /// stays put.
    pub fn apply_status(&self, mut report: ScreeningJob) -> ApplyOutcome {
        if !self.is_armed(&report.job_id) {
            self.foreign_discards.fetch_add(1, Ordering::Relaxed);
            debug!(job_id = %report.job_id, "discarding status report for unarmed job");
            return ApplyOutcome::ForeignJob;
        }

        match self.statuses.entry(report.job_id.clone()) {
            Entry::Vacant(v) => {
                let terminal = report.status.is_terminal();
                let (tx, _rx) = watch::channel(report);
                v.insert(tx);
                ApplyOutcome::Applied { terminal }
            }
            Entry::Occupied(e) => {
                let tx = e.get();
                let (cached_rank, cached_progress) = {
                    let cached = tx.borrow();
                    (cached.status.rank(), cached.progress)
                };
                if report.status.rank() < cached_rank {
                    self.stale_discards.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        job_id = %report.job_id,
                        incoming = %report.status,
                        "discarding behind-rank status report"
                    );
                    return ApplyOutcome::StaleRank;
                }
                if report.status.rank() == cached_rank {
                    report.progress = report.progress.max(cached_progress);
                }
                let terminal = report.status.is_terminal();
                tx.send_replace(report);
                ApplyOutcome::Applied { terminal }
            }
        }
    }

    pub fn status(&self, job_id: &str) -> Option<ScreeningJob> {
        self.statuses.get(job_id).map(|tx| tx.borrow().clone())
    }

    /// Subscribe to status updates for one job. The receiver immediately
    /// holds the latest value.
    pub fn subscribe_status(&self, job_id: &str) -> Option<watch::Receiver<ScreeningJob>> {
        self.statuses.get(job_id).map(|tx| tx.subscribe())
    }

    /// Store a result set. First write wins; later calls return the
    /// already-cached value untouched.
    pub fn put_results(&self, set: ResultSet) -> Arc<ResultSet> {
        let entry = self
            .results
            .entry(set.job_id.clone())
            .or_insert_with(|| Arc::new(set));
        Arc::clone(entry.value())
    }

    pub fn results(&self, job_id: &str) -> Option<Arc<ResultSet>> {
        self.results.get(job_id).map(|r| Arc::clone(r.value()))
    }

    /// Explicit eviction. Superseded entries are otherwise left readable
    /// for stragglers; they just stop being written.
    pub fn clear_job(&self, job_id: &str) {
        self.statuses.remove(job_id);
        self.results.remove(job_id);
    }

    pub fn stale_discards(&self) -> u64 {
        self.stale_discards.load(Ordering::Relaxed)
    }

    pub fn foreign_discards(&self) -> u64 {
        self.foreign_discards.load(Ordering::Relaxed)
    }
}

impl Default for JobStore {
    fn default() -> Self {
        let (armed, _rx) = watch::channel(None);
        Self {
            armed,
            statuses: DashMap::new(),
            results: DashMap::new(),
            stale_discards: AtomicU64::new(0),
            foreign_discards: AtomicU64::new(0),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobState, StockResult};

    fn report(job_id: &str, status: JobState, progress: u8) -> ScreeningJob {
        ScreeningJob {
            job_id: job_id.to_string(),
            status,
            progress,
            total_stocks: None,
            screened_stocks: None,
            found_stocks: None,
            created_at: "2026-08-06T10:00:00Z".to_string(),
            completed_at: None,
            error_message: None,
        }
    }

    fn row(stock: &str) -> StockResult {
        StockResult {
            stock: stock.to_string(),
            consolidating: String::new(),
            breaking_out: String::new(),
            ltp: "100.0".to_string(),
            volume: "1.0x".to_string(),
            ma_signal: String::new(),
            rsi: 50,
            trend: String::new(),
            pattern: String::new(),
            t_plus_1d: None,
            t_plus_1wk: None,
            t_plus_1mo: None,
            t_plus_6mo: None,
            t_plus_1y: None,
            t_plus_52wk_high: None,
            t_plus_52wk_low: None,
        }
    }

    #[test]
    fn lifecycle_rank_is_monotone() {
        let store = JobStore::new();
        store.arm("J1");
        store.seed(ScreeningJob::pending("J1"));

        assert_eq!(
            store.apply_status(report("J1", JobState::Running, 40)),
            ApplyOutcome::Applied { terminal: false }
        );
        assert_eq!(
            store.apply_status(report("J1", JobState::Completed, 100)),
            ApplyOutcome::Applied { terminal: true }
        );

        // A late non-terminal report must not regress the cache.
        assert_eq!(
            store.apply_status(report("J1", JobState::Running, 90)),
            ApplyOutcome::StaleRank
        );
        assert_eq!(store.status("J1").unwrap().status, JobState::Completed);
        assert_eq!(store.stale_discards(), 1);
    }

    #[test]
    fn foreign_job_id_never_mutates_the_cache() {
        let store = JobStore::new();
        store.arm("J2");
        store.seed(ScreeningJob::pending("J2"));

        let before = store.status("J2").unwrap();
        assert_eq!(
            store.apply_status(report("OTHER", JobState::Running, 50)),
            ApplyOutcome::ForeignJob
        );
        let after = store.status("J2").unwrap();
        assert_eq!(before.status, after.status);
        assert_eq!(before.progress, after.progress);
        assert!(store.status("OTHER").is_none());
        assert_eq!(store.foreign_discards(), 1);
    }

    #[test]
    fn rearming_discards_writes_for_the_old_job() {
        let store = JobStore::new();
        store.arm("A");
        store.seed(ScreeningJob::pending("A"));
        store.apply_status(report("A", JobState::Running, 20));

        store.arm("B");
        store.seed(ScreeningJob::pending("B"));

        // A's late in-flight response lands after the re-arm.
        assert_eq!(
            store.apply_status(report("A", JobState::Running, 90)),
            ApplyOutcome::ForeignJob
        );
        assert_eq!(store.status("A").unwrap().progress, 20);
        assert_eq!(store.status("B").unwrap().status, JobState::Pending);
    }

    #[test]
    fn equal_rank_last_write_wins_with_progress_clamp() {
        let store = JobStore::new();
        store.arm("J3");
        store.seed(ScreeningJob::pending("J3"));
        store.apply_status(report("J3", JobState::Running, 60));

        // Poll and push race at the same rank; the later arrival wins but
        // progress never moves backwards.
        let mut late = report("J3", JobState::Running, 45);
        late.screened_stocks = Some(90);
        assert_eq!(
            store.apply_status(late),
            ApplyOutcome::Applied { terminal: false }
        );
        let cached = store.status("J3").unwrap();
        assert_eq!(cached.progress, 60);
        assert_eq!(cached.screened_stocks, Some(90));
    }

    #[test]
    fn subscriber_sees_write_before_apply_returns() {
        let store = JobStore::new();
        store.arm("J4");
        store.seed(ScreeningJob::pending("J4"));
        let rx = store.subscribe_status("J4").unwrap();

        store.apply_status(report("J4", JobState::Running, 10));
        assert_eq!(rx.borrow().status, JobState::Running);
    }

    #[test]
    fn results_are_immutable_once_stored() {
        let store = JobStore::new();
        let first = store.put_results(ResultSet {
            job_id: "J5".to_string(),
            rows: vec![row("RELIANCE")],
            total_found: 1,
            execution_time: Some(3.2),
        });
        let second = store.put_results(ResultSet {
            job_id: "J5".to_string(),
            rows: vec![row("TCS"), row("INFY")],
            total_found: 2,
            execution_time: None,
        });
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.results("J5").unwrap().rows.len(), 1);
    }

    #[test]
    fn clear_job_evicts_both_kinds() {
        let store = JobStore::new();
        store.arm("J6");
        store.seed(ScreeningJob::pending("J6"));
        store.put_results(ResultSet {
            job_id: "J6".to_string(),
            rows: vec![],
            total_found: 0,
            execution_time: None,
        });
        store.clear_job("J6");
        assert!(store.status("J6").is_none());
        assert!(store.results("J6").is_none());
    }
}
