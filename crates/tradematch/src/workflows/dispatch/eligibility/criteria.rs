use serde::{Deserialize, Serialize};

use super::super::settings::AutoApprovalSettings;

/// The slice of the auto-approval settings the evaluator reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityCriteria {
    pub consider_service_area: bool,
    pub max_open_jobs_limit: u32,
    pub use_workload_balancing: bool,
}

impl Default for EligibilityCriteria {
    fn default() -> Self {
        Self::from(&AutoApprovalSettings::default())
    }
}

impl From<&AutoApprovalSettings> for EligibilityCriteria {
    fn from(settings: &AutoApprovalSettings) -> Self {
        Self {
            consider_service_area: settings.consider_service_area,
            max_open_jobs_limit: settings.max_open_jobs_limit,
            use_workload_balancing: settings.use_workload_balancing,
        }
    }
}
