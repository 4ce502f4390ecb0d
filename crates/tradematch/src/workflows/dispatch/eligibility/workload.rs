use std::collections::HashMap;

use super::super::domain::{CompletionStatus, Job, ProviderId};
use super::EligibleProvider;

/// Point-in-time count of assigned, uncompleted jobs per provider.
#[derive(Debug, Clone, Default)]
pub struct WorkloadSnapshot {
    counts: HashMap<ProviderId, u32>,
}

impl WorkloadSnapshot {
    pub fn from_jobs<'a, I>(jobs: I) -> Self
    where
        I: IntoIterator<Item = &'a Job>,
    {
        let mut counts = HashMap::new();
        for job in jobs {
            if job.completion_status == CompletionStatus::Completed {
                continue;
            }
            if let Some(provider_id) = &job.assigned_provider_id {
                *counts.entry(provider_id.clone()).or_insert(0) += 1;
            }
        }
        Self { counts }
    }

    pub fn active_for(&self, provider_id: &ProviderId) -> u32 {
        self.counts.get(provider_id).copied().unwrap_or(0)
    }
}

/// Order candidates by ascending workload. The sort is stable, so ties keep roster order.
pub(crate) fn rank_by_workload(candidates: &mut [EligibleProvider]) {
    candidates.sort_by_key(|candidate| candidate.active_workload);
}
