mod criteria;
mod workload;

pub use criteria::EligibilityCriteria;
pub use workload::WorkloadSnapshot;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::areas::AreaMatcher;
use super::domain::{Job, Provider, ProviderId, ProviderStatus};
use workload::rank_by_workload;

/// A provider that may receive a job, annotated for display and ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibleProvider {
    pub provider: Provider,
    pub active_workload: u32,
    pub area_match: bool,
}

/// Why a provider was filtered out for a particular job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Exclusion {
    NotApproved { status: ProviderStatus },
    OutsideServiceArea,
    AtCapacity { active_workload: u32, limit: u32 },
}

/// Per-provider audit row produced by [`EligibilityEvaluator::explain`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAssessment {
    pub provider_id: ProviderId,
    pub area_match: bool,
    pub active_workload: u32,
    pub exclusion: Option<Exclusion>,
}

/// Stateless evaluator producing the ranked list of providers for a job.
#[derive(Clone)]
pub struct EligibilityEvaluator {
    matcher: Arc<dyn AreaMatcher>,
}

impl EligibilityEvaluator {
    pub fn new(matcher: Arc<dyn AreaMatcher>) -> Self {
        Self { matcher }
    }

    pub fn matcher(&self) -> &dyn AreaMatcher {
        self.matcher.as_ref()
    }

    /// Check a single provider against the job. Filters run in order: status, area, capacity.
    pub fn assess(
        &self,
        job: &Job,
        provider: &Provider,
        workloads: &WorkloadSnapshot,
        criteria: &EligibilityCriteria,
    ) -> Result<EligibleProvider, Exclusion> {
        if !provider.is_approved() {
            return Err(Exclusion::NotApproved {
                status: provider.status,
            });
        }

        let area_match = self
            .matcher
            .matches(job.postcode(), &provider.service_areas);
        if criteria.consider_service_area && !area_match {
            return Err(Exclusion::OutsideServiceArea);
        }

        let active_workload = workloads.active_for(&provider.id);
        if active_workload >= criteria.max_open_jobs_limit {
            return Err(Exclusion::AtCapacity {
                active_workload,
                limit: criteria.max_open_jobs_limit,
            });
        }

        Ok(EligibleProvider {
            provider: provider.clone(),
            active_workload,
            area_match,
        })
    }

    /// Eligible providers for `job`, least loaded first when balancing is enabled.
    ///
    /// `jobs` is the full job set the workload counts are taken from. An empty result is a
    /// valid answer; callers decide whether that means "skip" or "alert".
    pub fn rank(
        &self,
        job: &Job,
        providers: &[Provider],
        jobs: &[Job],
        criteria: &EligibilityCriteria,
    ) -> Vec<EligibleProvider> {
        let workloads = WorkloadSnapshot::from_jobs(jobs);
        let mut eligible: Vec<EligibleProvider> = providers
            .iter()
            .filter_map(
                |provider| match self.assess(job, provider, &workloads, criteria) {
                    Ok(candidate) => Some(candidate),
                    Err(exclusion) => {
                        debug!(job_id = %job.id, provider_id = %provider.id, ?exclusion, "provider excluded");
                        None
                    }
                },
            )
            .collect();

        if criteria.use_workload_balancing {
            rank_by_workload(&mut eligible);
        }

        eligible
    }

    pub fn explain(
        &self,
        job: &Job,
        providers: &[Provider],
        jobs: &[Job],
        criteria: &EligibilityCriteria,
    ) -> Vec<ProviderAssessment> {
        let workloads = WorkloadSnapshot::from_jobs(jobs);
        providers
            .iter()
            .map(|provider| ProviderAssessment {
                provider_id: provider.id.clone(),
                area_match: self
                    .matcher
                    .matches(job.postcode(), &provider.service_areas),
                active_workload: workloads.active_for(&provider.id),
                exclusion: self.assess(job, provider, &workloads, criteria).err(),
            })
            .collect()
    }
}
