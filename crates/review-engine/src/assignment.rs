use crate::ReviewError;
use chrono::Utc;
use review_core::review_contracts::{AssignmentOrigin, ReviewAssignment};
use review_core::{Proposal, ProposalCatalog, ProposalId, UserId};
use review_storage::{ReviewStore, ReviewTx, StorageError};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Source of reviewers eligible for automatic assignment.
pub trait ReviewerPool {
    fn reviewers(&self) -> Vec<UserId>;
}

impl ReviewerPool for Vec<UserId> {
    fn reviewers(&self) -> Vec<UserId> {
        self.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub reviewer_id: UserId,
    /// Active assignments the reviewer holds across all proposals.
    pub active_load: i64,
}

/// Picks reviewers for a proposal from pre-filtered candidates.
///
/// Candidates never include speakers or reviewers who already held an
/// assignment on the proposal. Returned ids outside the candidate list are
/// ignored, as is anything beyond `wanted`.
pub trait SelectionStrategy: Send + Sync {
    fn select(&self, proposal: &Proposal, candidates: Vec<Candidate>, wanted: usize)
        -> Vec<UserId>;
}

/// Lowest active load first, ties broken by reviewer id.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastLoaded;

impl SelectionStrategy for LeastLoaded {
    fn select(
        &self,
        _proposal: &Proposal,
        mut candidates: Vec<Candidate>,
        wanted: usize,
    ) -> Vec<UserId> {
        candidates.sort_by(|left, right| {
            left.active_load
                .cmp(&right.active_load)
                .then_with(|| left.reviewer_id.cmp(&right.reviewer_id))
        });
        candidates
            .into_iter()
            .take(wanted)
            .map(|candidate| candidate.reviewer_id)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignmentPolicy {
    pub reviewers_per_proposal: usize,
}

impl Default for AssignmentPolicy {
    fn default() -> Self {
        Self {
            reviewers_per_proposal: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OptOutOutcome {
    pub assignment: ReviewAssignment,
    /// False when the assignment was already opted out.
    pub newly_opted_out: bool,
    pub replacement: Option<ReviewAssignment>,
}

pub struct AssignmentEngine<'a> {
    store: &'a ReviewStore,
    catalog: &'a dyn ProposalCatalog,
    pool: &'a dyn ReviewerPool,
    strategy: Box<dyn SelectionStrategy>,
    policy: AssignmentPolicy,
}

impl<'a> AssignmentEngine<'a> {
    pub fn new(
        store: &'a ReviewStore,
        catalog: &'a dyn ProposalCatalog,
        pool: &'a dyn ReviewerPool,
    ) -> Self {
        Self {
            store,
            catalog,
            pool,
            strategy: Box::new(LeastLoaded),
            policy: AssignmentPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: AssignmentPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_strategy(mut self, strategy: Box<dyn SelectionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Fills the proposal up to `reviewers_per_proposal` active assignments.
    pub fn create_assignments(
        &self,
        proposal: &Proposal,
        origin: AssignmentOrigin,
    ) -> Result<Vec<ReviewAssignment>, ReviewError> {
        let created = self.store.write(|tx| {
            let active = tx
                .assignments_for_proposal(proposal.id)?
                .into_iter()
                .filter(ReviewAssignment::is_active)
                .count();
            let wanted = self.policy.reviewers_per_proposal.saturating_sub(active);
            self.assign_in(tx, proposal, origin, wanted)
        })?;

        info!(
            event = "assignments_created",
            proposal_id = proposal.id,
            origin = origin.as_str(),
            created = created.len()
        );
        Ok(created)
    }

    pub fn assign_reviewer(
        &self,
        proposal: &Proposal,
        reviewer_id: &str,
    ) -> Result<ReviewAssignment, ReviewError> {
        if proposal.is_speaker(reviewer_id) {
            return Err(ReviewError::forbidden(format!(
                "{reviewer_id} is a speaker on proposal {}",
                proposal.id
            )));
        }

        let assignment = self.store.write(|tx| {
            let already_active = tx
                .assignments_for_proposal(proposal.id)?
                .iter()
                .any(|existing| existing.is_active() && existing.reviewer_id == reviewer_id);
            if already_active {
                return Err(ReviewError::Conflict {
                    proposal_id: proposal.id,
                    reviewer_id: reviewer_id.to_string(),
                });
            }
            Ok(tx.insert_assignment(
                proposal.id,
                reviewer_id,
                AssignmentOrigin::Manual,
                Utc::now(),
            )?)
        })?;

        info!(
            event = "reviewer_assigned",
            proposal_id = proposal.id,
            assignment_id = assignment.assignment_id,
            reviewer = %reviewer_id
        );
        Ok(assignment)
    }

    /// Opts the reviewer out of an assignment and tops the proposal up with
    /// one replacement, all in one transaction. Repeating it is a no-op.
    pub fn opt_out(
        &self,
        assignment_id: i64,
        reviewer_id: &str,
    ) -> Result<OptOutOutcome, ReviewError> {
        let outcome = self.store.write(|tx| {
            let assignment = tx
                .assignment(assignment_id)?
                .filter(|assignment| assignment.reviewer_id == reviewer_id)
                .ok_or_else(|| ReviewError::not_found("assignment", assignment_id))?;

            if !tx.mark_opted_out(assignment_id)? {
                return Ok(OptOutOutcome {
                    assignment,
                    newly_opted_out: false,
                    replacement: None,
                });
            }

            let replacement = match self.catalog.proposal(assignment.proposal_id) {
                Some(proposal) => self
                    .assign_in(tx, &proposal, AssignmentOrigin::AutoAssignedLater, 1)?
                    .into_iter()
                    .next(),
                None => {
                    warn!(
                        event = "replacement_skipped",
                        proposal_id = assignment.proposal_id,
                        reason = "proposal missing from catalog"
                    );
                    None
                }
            };

            Ok::<_, ReviewError>(OptOutOutcome {
                assignment: ReviewAssignment {
                    opted_out: true,
                    ..assignment
                },
                newly_opted_out: true,
                replacement,
            })
        })?;

        if outcome.newly_opted_out {
            info!(
                event = "assignment_opted_out",
                assignment_id,
                proposal_id = outcome.assignment.proposal_id,
                reviewer = %reviewer_id,
                replacement = outcome
                    .replacement
                    .as_ref()
                    .map(|replacement| replacement.reviewer_id.as_str())
                    .unwrap_or("none")
            );
        } else {
            debug!(event = "opt_out_repeated", assignment_id, reviewer = %reviewer_id);
        }
        Ok(outcome)
    }

    pub fn list_active_assignments(
        &self,
        reviewer_id: &str,
    ) -> Result<Vec<ReviewAssignment>, ReviewError> {
        Ok(self
            .store
            .read(|tx| tx.active_assignments_for_reviewer(reviewer_id))?)
    }

    pub fn assignments_for_proposal(
        &self,
        proposal_id: ProposalId,
    ) -> Result<Vec<ReviewAssignment>, ReviewError> {
        Ok(self.store.read(|tx| tx.assignments_for_proposal(proposal_id))?)
    }

    fn assign_in(
        &self,
        tx: &ReviewTx<'_>,
        proposal: &Proposal,
        origin: AssignmentOrigin,
        wanted: usize,
    ) -> Result<Vec<ReviewAssignment>, StorageError> {
        if wanted == 0 {
            return Ok(Vec::new());
        }

        let held: BTreeSet<UserId> = tx
            .assignments_for_proposal(proposal.id)?
            .into_iter()
            .map(|assignment| assignment.reviewer_id)
            .collect();
        let load = tx.active_assignment_load()?;
        let eligible: BTreeSet<UserId> = self
            .pool
            .reviewers()
            .into_iter()
            .filter(|reviewer| !proposal.is_speaker(reviewer) && !held.contains(reviewer))
            .collect();
        let candidates = eligible
            .iter()
            .map(|reviewer| Candidate {
                reviewer_id: reviewer.clone(),
                active_load: load.get(reviewer).copied().unwrap_or(0),
            })
            .collect();

        let mut chosen = BTreeSet::new();
        let mut created = Vec::new();
        let now = Utc::now();
        for reviewer in self.strategy.select(proposal, candidates, wanted) {
            if created.len() == wanted {
                break;
            }
            if !eligible.contains(&reviewer) || !chosen.insert(reviewer.clone()) {
                debug!(
                    event = "selection_ignored",
                    proposal_id = proposal.id,
                    reviewer = %reviewer
                );
                continue;
            }
            created.push(tx.insert_assignment(proposal.id, &reviewer, origin, now)?);
        }

        if created.len() < wanted {
            debug!(
                event = "reviewer_pool_short",
                proposal_id = proposal.id,
                wanted,
                created = created.len()
            );
        }
        Ok(created)
    }
}
