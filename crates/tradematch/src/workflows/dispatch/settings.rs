use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_AGE_THRESHOLD_HOURS: u32 = 48;
pub const DEFAULT_MAX_OPEN_JOBS_LIMIT: u32 = 10;

const AGE_THRESHOLD_RANGE: (u32, u32) = (1, 720);
const MAX_OPEN_JOBS_RANGE: (u32, u32) = (1, 100);
const STATS_WINDOW_DAYS: i64 = 30;
const SHORT_WINDOW_DAYS: i64 = 7;

/// Auto-approval counts reported back to operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoApprovalStats {
    pub total: u64,
    pub last_30_days: u64,
    pub last_7_days: u64,
}

/// Outcome of one completed sweep, kept for the trailing stats window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepRunRecord {
    pub run_id: String,
    pub completed_at: DateTime<Utc>,
    pub assigned: u32,
}

/// Process-wide auto-approval configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoApprovalSettings {
    pub enabled: bool,
    pub age_threshold_hours: u32,
    pub max_open_jobs_limit: u32,
    pub consider_service_area: bool,
    pub use_workload_balancing: bool,
    /// Reserved; the evaluator does not read it.
    pub use_rating_weight: bool,
    pub stats: AutoApprovalStats,
    pub last_auto_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recent_runs: Vec<SweepRunRecord>,
    #[serde(default)]
    pub revision: u64,
}

impl Default for AutoApprovalSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            age_threshold_hours: DEFAULT_AGE_THRESHOLD_HOURS,
            max_open_jobs_limit: DEFAULT_MAX_OPEN_JOBS_LIMIT,
            consider_service_area: true,
            use_workload_balancing: true,
            use_rating_weight: false,
            stats: AutoApprovalStats::default(),
            last_auto_run_at: None,
            recent_runs: Vec::new(),
            revision: 0,
        }
    }
}

impl AutoApprovalSettings {
    pub fn age_threshold(&self) -> Duration {
        Duration::hours(i64::from(self.age_threshold_hours))
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        check_range(
            "age_threshold_hours",
            self.age_threshold_hours,
            AGE_THRESHOLD_RANGE,
        )?;
        check_range(
            "max_open_jobs_limit",
            self.max_open_jobs_limit,
            MAX_OPEN_JOBS_RANGE,
        )
    }

    /// Apply an operator edit, leaving stats and run bookkeeping untouched.
    pub fn apply(&self, update: &SettingsUpdate) -> Result<Self, SettingsError> {
        let mut next = self.clone();
        if let Some(enabled) = update.enabled {
            next.enabled = enabled;
        }
        if let Some(hours) = update.age_threshold_hours {
            next.age_threshold_hours = hours;
        }
        if let Some(limit) = update.max_open_jobs_limit {
            next.max_open_jobs_limit = limit;
        }
        if let Some(consider) = update.consider_service_area {
            next.consider_service_area = consider;
        }
        if let Some(balancing) = update.use_workload_balancing {
            next.use_workload_balancing = balancing;
        }
        if let Some(rating) = update.use_rating_weight {
            next.use_rating_weight = rating;
        }
        next.validate()?;
        Ok(next)
    }

    /// Fold a finished sweep into the counters and prune runs outside the window.
    pub fn record_run(&mut self, record: SweepRunRecord) {
        let now = record.completed_at;
        self.stats.total += u64::from(record.assigned);
        self.last_auto_run_at = Some(now);
        self.recent_runs.push(record);

        let window_start = now - Duration::days(STATS_WINDOW_DAYS);
        self.recent_runs.retain(|run| run.completed_at > window_start);

        let short_start = now - Duration::days(SHORT_WINDOW_DAYS);
        self.stats.last_30_days = self
            .recent_runs
            .iter()
            .map(|run| u64::from(run.assigned))
            .sum();
        self.stats.last_7_days = self
            .recent_runs
            .iter()
            .filter(|run| run.completed_at > short_start)
            .map(|run| u64::from(run.assigned))
            .sum();
    }
}

/// Operator-editable subset of the settings document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub age_threshold_hours: Option<u32>,
    #[serde(default)]
    pub max_open_jobs_limit: Option<u32>,
    #[serde(default)]
    pub consider_service_area: Option<bool>,
    #[serde(default)]
    pub use_workload_balancing: Option<bool>,
    #[serde(default)]
    pub use_rating_weight: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("{field} must be between {min} and {max} (found {found})")]
    OutOfRange {
        field: &'static str,
        min: u32,
        max: u32,
        found: u32,
    },
}

fn check_range(
    field: &'static str,
    value: u32,
    (min, max): (u32, u32),
) -> Result<(), SettingsError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(SettingsError::OutOfRange {
            field,
            min,
            max,
            found: value,
        })
    }
}
