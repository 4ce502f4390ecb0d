//! Job dispatch: provider eligibility, the assignment and request state machines, and the
//! unattended auto-approval sweep.
//!
//! Every mutation goes through [`DispatchService`], which writes jobs with compare-and-set so
//! an operator and the sweep acting on the same job cannot both win.

pub mod areas;
pub mod assignment;
pub mod clock;
pub mod domain;
pub mod eligibility;
pub mod error;
pub mod repository;
pub mod requests;
pub mod router;
pub mod service;
pub mod settings;
pub mod store;
pub mod sweeper;

#[cfg(test)]
mod tests;

pub use areas::{AreaMatcher, AreaTable, AreaTableError, PostcodeAreaMatcher, CATCH_ALL_AREA};
pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::{
    AssignmentStatus, CompletionStatus, Job, JobId, JobLocation, JobRequest, JobSnapshot,
    JobState, Provider, ProviderId, ProviderStatus, RequestId, RequestStatus,
    AUTO_APPROVAL_ACTOR, AUTO_ASSIGNMENT_NOTE,
};
pub use eligibility::{
    EligibilityCriteria, EligibilityEvaluator, EligibleProvider, Exclusion, ProviderAssessment,
    WorkloadSnapshot,
};
pub use error::{DispatchError, EntityKind, InvalidTransition};
pub use repository::{
    DispatchNotice, DispatchNotifier, DispatchRepository, JobRepository, NotifyError,
    ProviderRepository, RepositoryError, RequestRepository, SettingsRepository,
};
pub use requests::{ReviewDecision, DEFAULT_PENDING_REQUEST_CAP};
pub use router::dispatch_router;
pub use service::{DispatchService, EligibleJob, EngineConfig};
pub use settings::{
    AutoApprovalSettings, AutoApprovalStats, SettingsError, SettingsUpdate, SweepRunRecord,
};
pub use store::{InMemoryDispatchStore, RecordingNotifier};
pub use sweeper::{SweepAssignment, SweepFailure, SweepOutcome, SweepReport, SweepSkip};
