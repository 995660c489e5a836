mod aggregator;
mod assignment;
mod ledger;
mod queries;
mod service;

pub use aggregator::ResultAggregator;
pub use assignment::{
    AssignmentEngine, AssignmentPolicy, Candidate, LeastLoaded, OptOutOutcome, ReviewerPool,
    SelectionStrategy,
};
pub use ledger::VoteLedger;
pub use queries::{ProposalListing, ReviewQueries};
pub use service::{
    BulkAcceptReport, Capabilities, NoopNotifier, Notifier, ReviewDetail, ReviewService,
    StatsView,
};

use review_core::review_contracts::ContractError;
use review_core::ProposalId;
use review_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("forbidden: {reason}")]
    Forbidden { reason: String },
    #[error("invalid vote: {value:?}")]
    InvalidVote { value: String },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("reviewer {reviewer_id} already holds an active assignment on proposal {proposal_id}")]
    Conflict {
        proposal_id: ProposalId,
        reviewer_id: String,
    },
    #[error("message text cannot be empty")]
    EmptyMessage,
    #[error("contract error: {0}")]
    Contract(ContractError),
    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl ReviewError {
    pub(crate) fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<StorageError> for ReviewError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DuplicateActiveAssignment {
                proposal_id,
                reviewer_id,
            } => Self::Conflict {
                proposal_id,
                reviewer_id,
            },
            other => Self::Storage(other),
        }
    }
}

impl From<ContractError> for ReviewError {
    fn from(err: ContractError) -> Self {
        match err {
            ContractError::InvalidVote { value } => Self::InvalidVote { value },
            other => Self::Contract(other),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, TimeZone, Utc};
    use review_core::{Proposal, ProposalKind, Speaker, StaticCatalog};

    pub fn ts(hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 23, hour, min, sec)
            .single()
            .expect("valid timestamp")
    }

    pub fn talk(id: i64, section: &str, speakers: &[&str]) -> Proposal {
        Proposal {
            id,
            title: format!("Proposal {id}"),
            section: section.to_string(),
            kind: ProposalKind::Talk {
                duration_minutes: Some(30),
            },
            speakers: speakers
                .iter()
                .map(|user_id| Speaker {
                    user_id: user_id.to_string(),
                    name: user_id.to_string(),
                    email: Some(format!("{user_id}@example.org")),
                })
                .collect(),
            submitted_at: ts(9, 0, id as u32 % 60),
        }
    }

    pub fn catalog(proposals: Vec<Proposal>) -> StaticCatalog {
        StaticCatalog::new(proposals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_assignment_maps_to_conflict() {
        let err = ReviewError::from(StorageError::DuplicateActiveAssignment {
            proposal_id: 4,
            reviewer_id: "ana".to_string(),
        });
        assert!(matches!(err, ReviewError::Conflict { proposal_id: 4, .. }));

        let err = ReviewError::from(StorageError::LockPoisoned);
        assert!(matches!(err, ReviewError::Storage(_)));
    }

    #[test]
    fn invalid_vote_contract_error_is_surfaced_as_invalid_vote() {
        let err = ReviewError::from(ContractError::InvalidVote {
            value: "+3".to_string(),
        });
        assert!(matches!(err, ReviewError::InvalidVote { value } if value == "+3"));
    }
}
