use crate::{
    AssignmentEngine, AssignmentPolicy, OptOutOutcome, ProposalListing, ResultAggregator,
    ReviewError, ReviewQueries, ReviewerPool, VoteLedger,
};
use chrono::Utc;
use review_core::review_contracts::{
    AssignmentOrigin, Classification, Decision, ProposalMessage, ReviewAssignment, ReviewEvent,
    ReviewResult, ReviewerSummary, Vote,
};
use review_core::{Proposal, ProposalCatalog, ProposalId, ProposalKindName, Speaker, UserId};
use review_storage::{ReviewStore, StorageError};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Role predicates owned by the surrounding application.
pub trait Capabilities {
    fn is_reviewer(&self, user_id: &str) -> bool;
    fn is_reviewer_admin(&self, user_id: &str) -> bool;
    fn can_review_section(&self, user_id: &str, section: &str) -> bool;

    fn is_staff(&self, user_id: &str) -> bool {
        self.is_reviewer_admin(user_id)
    }

    fn is_superuser(&self, _user_id: &str) -> bool {
        false
    }
}

/// Outbound notification hook. Delivery is the implementor's concern.
pub trait Notifier {
    fn proposal_message(&self, speaker: &Speaker, proposal: &Proposal, message: &ProposalMessage);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn proposal_message(
        &self,
        _speaker: &Speaker,
        _proposal: &Proposal,
        _message: &ProposalMessage,
    ) {
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewDetail {
    pub proposal: Proposal,
    pub result: ReviewResult,
    pub latest_vote: Option<Vote>,
    /// Newest first.
    pub reviews: Vec<ReviewEvent>,
    /// Oldest first.
    pub messages: Vec<ProposalMessage>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct BulkAcceptReport {
    pub accepted: Vec<ProposalId>,
    pub unknown: Vec<ProposalId>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StatsView {
    Overview {
        overview: BTreeMap<Classification, Vec<ProposalListing>>,
    },
    Class {
        classification: Classification,
        count: usize,
        proposals: Vec<ProposalListing>,
    },
}

/// Entry point for callers acting on behalf of a user. Every operation checks
/// the actor's capabilities before touching the ledger or assignments.
pub struct ReviewService<'a> {
    store: &'a ReviewStore,
    catalog: &'a dyn ProposalCatalog,
    capabilities: &'a dyn Capabilities,
    pool: &'a dyn ReviewerPool,
    notifier: &'a dyn Notifier,
    policy: AssignmentPolicy,
}

impl<'a> ReviewService<'a> {
    pub fn new(
        store: &'a ReviewStore,
        catalog: &'a dyn ProposalCatalog,
        capabilities: &'a dyn Capabilities,
        pool: &'a dyn ReviewerPool,
    ) -> Self {
        Self {
            store,
            catalog,
            capabilities,
            pool,
            notifier: &NoopNotifier,
            policy: AssignmentPolicy::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: &'a dyn Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_policy(mut self, policy: AssignmentPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn section_listing(
        &self,
        actor: &str,
        section: &str,
        assigned_only: bool,
    ) -> Result<Vec<ProposalListing>, ReviewError> {
        self.require(
            self.capabilities.can_review_section(actor, section),
            actor,
            "section_listing",
        )?;

        let assigned: Option<BTreeSet<ProposalId>> = if assigned_only {
            Some(
                self.engine()
                    .list_active_assignments(actor)?
                    .into_iter()
                    .map(|assignment| assignment.proposal_id)
                    .collect(),
            )
        } else {
            None
        };
        let proposals = self
            .catalog
            .proposals_in_section(section)
            .into_iter()
            .filter(|proposal| !proposal.is_speaker(actor))
            .filter(|proposal| {
                assigned
                    .as_ref()
                    .map_or(true, |assigned| assigned.contains(&proposal.id))
            });
        self.queries().annotated(proposals, Some(actor))
    }

    /// Reviewed proposals grouped by kind, tutorials excluded. With a
    /// `username`, only proposals that user currently votes on.
    pub fn review_list(
        &self,
        actor: &str,
        username: Option<&str>,
    ) -> Result<BTreeMap<ProposalKindName, Vec<ProposalListing>>, ReviewError> {
        let admin = self.capabilities.is_reviewer_admin(actor);
        match username {
            Some(username) => self.require(admin || actor == username, actor, "review_list")?,
            None => self.require(self.capabilities.is_reviewer(actor), actor, "review_list")?,
        }

        let voted: Option<BTreeSet<ProposalId>> = match username {
            Some(username) => Some(
                self.store
                    .read(|tx| tx.current_votes_for_reviewer(username))?
                    .into_iter()
                    .map(|current| current.proposal_id)
                    .collect(),
            ),
            None => None,
        };

        let mut proposals: Vec<Proposal> = self
            .catalog
            .proposals()
            .into_iter()
            .filter(|proposal| proposal.kind_name() != ProposalKindName::Tutorial)
            .filter(|proposal| admin || !proposal.is_speaker(actor))
            .filter(|proposal| {
                voted
                    .as_ref()
                    .map_or(true, |voted| voted.contains(&proposal.id))
            })
            .collect();
        proposals.sort_by(|left, right| {
            left.submitted_at
                .cmp(&right.submitted_at)
                .then(left.id.cmp(&right.id))
        });

        let mut grouped: BTreeMap<ProposalKindName, Vec<ProposalListing>> = BTreeMap::new();
        for listing in self
            .queries()
            .annotated(proposals, Some(username.unwrap_or(actor)))?
        {
            grouped.entry(listing.kind).or_default().push(listing);
        }
        Ok(grouped)
    }

    pub fn reviewer_overview(&self, actor: &str) -> Result<Vec<ReviewerSummary>, ReviewError> {
        self.require_admin(actor, "reviewer_overview")?;
        let reviewers: Vec<UserId> = self
            .pool
            .reviewers()
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        self.queries().reviewer_summaries(&reviewers)
    }

    pub fn detail(
        &self,
        actor: &str,
        proposal_id: ProposalId,
    ) -> Result<ReviewDetail, ReviewError> {
        let proposal = self.proposal(proposal_id)?;
        self.require(
            self.capabilities.can_review_section(actor, &proposal.section),
            actor,
            "detail",
        )?;
        self.require(
            !proposal.is_speaker(actor) || self.capabilities.is_superuser(actor),
            actor,
            "detail",
        )?;

        let (result, latest_vote, reviews, messages) = self.store.read(|tx| {
            Ok::<_, StorageError>((
                tx.result(proposal_id)?,
                tx.current_vote(proposal_id, actor)?,
                tx.reviews_for_proposal(proposal_id)?,
                tx.messages_for_proposal(proposal_id)?,
            ))
        })?;

        Ok(ReviewDetail {
            result: result.unwrap_or_else(|| ReviewResult::empty(proposal_id)),
            latest_vote: latest_vote.map(|current| current.vote),
            reviews,
            messages,
            proposal,
        })
    }

    pub fn record_vote(
        &self,
        actor: &str,
        proposal_id: ProposalId,
        vote_code: &str,
        comment: Option<&str>,
    ) -> Result<ReviewEvent, ReviewError> {
        let proposal = self.proposal(proposal_id)?;
        self.require(
            self.capabilities.can_review_section(actor, &proposal.section),
            actor,
            "record_vote",
        )?;
        self.require(!proposal.is_speaker(actor), actor, "record_vote")?;
        let vote: Vote = vote_code.parse()?;
        VoteLedger::new(self.store).record_vote(&proposal, actor, vote, comment)
    }

    pub fn post_message(
        &self,
        actor: &str,
        proposal_id: ProposalId,
        text: &str,
    ) -> Result<ProposalMessage, ReviewError> {
        let proposal = self.proposal(proposal_id)?;
        self.require(
            self.capabilities.can_review_section(actor, &proposal.section),
            actor,
            "post_message",
        )?;
        self.require(!proposal.is_speaker(actor), actor, "post_message")?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ReviewError::EmptyMessage);
        }

        let message = self
            .store
            .write(|tx| tx.insert_message(proposal_id, actor, text, Utc::now()))?;

        let mut notified = 0usize;
        for speaker in proposal
            .speakers
            .iter()
            .filter(|speaker| {
                speaker
                    .email
                    .as_deref()
                    .is_some_and(|email| !email.trim().is_empty())
            })
        {
            self.notifier.proposal_message(speaker, &proposal, &message);
            notified += 1;
        }
        info!(
            event = "message_posted",
            proposal_id,
            message_id = message.message_id,
            author = %actor,
            notified
        );
        Ok(message)
    }

    pub fn decide(
        &self,
        actor: &str,
        proposal_id: ProposalId,
        decision: Decision,
    ) -> Result<ReviewResult, ReviewError> {
        self.require(self.capabilities.is_staff(actor), actor, "decide")?;
        self.proposal(proposal_id)?;
        ResultAggregator::new(self.store).decide(proposal_id, decision)
    }

    pub fn delete_review(&self, actor: &str, review_id: i64) -> Result<ReviewEvent, ReviewError> {
        self.require_admin(actor, "delete_review")?;
        VoteLedger::new(self.store).delete_vote(review_id)
    }

    /// Accepts every listed proposal known to the catalog.
    pub fn bulk_accept(
        &self,
        actor: &str,
        proposal_ids: &[ProposalId],
    ) -> Result<BulkAcceptReport, ReviewError> {
        self.require_admin(actor, "bulk_accept")?;
        let aggregator = ResultAggregator::new(self.store);
        let mut report = BulkAcceptReport::default();
        for &proposal_id in proposal_ids {
            if self.catalog.proposal(proposal_id).is_none() {
                report.unknown.push(proposal_id);
                continue;
            }
            aggregator.decide(proposal_id, Decision::Accept)?;
            report.accepted.push(proposal_id);
        }

        if !report.unknown.is_empty() {
            warn!(
                event = "bulk_accept_unknown",
                actor = %actor,
                unknown = ?report.unknown
            );
        }
        info!(
            event = "bulk_accepted",
            actor = %actor,
            accepted = report.accepted.len()
        );
        Ok(report)
    }

    /// The classification overview or a single class with its size. Proposals
    /// the actor speaks on are hidden unless the actor is a reviewer admin.
    pub fn stats(
        &self,
        actor: &str,
        section: Option<&str>,
        classification: Option<Classification>,
    ) -> Result<StatsView, ReviewError> {
        self.require(self.capabilities.is_reviewer(actor), actor, "stats")?;
        let admin = self.capabilities.is_reviewer_admin(actor);
        let visible = |listing: &ProposalListing| {
            admin
                || !self
                    .catalog
                    .proposal(listing.proposal_id)
                    .is_some_and(|proposal| proposal.is_speaker(actor))
        };

        let queries = self.queries();
        match classification {
            Some(classification) => {
                let proposals: Vec<ProposalListing> = queries
                    .classified(section, classification)?
                    .into_iter()
                    .filter(|listing| visible(listing))
                    .collect();
                Ok(StatsView::Class {
                    classification,
                    count: proposals.len(),
                    proposals,
                })
            }
            None => {
                let mut overview = queries.classification_overview(section)?;
                for listings in overview.values_mut() {
                    listings.retain(|listing| visible(listing));
                }
                Ok(StatsView::Overview { overview })
            }
        }
    }

    pub fn assignments(&self, actor: &str) -> Result<Vec<ReviewAssignment>, ReviewError> {
        self.require(self.capabilities.is_reviewer(actor), actor, "assignments")?;
        self.engine().list_active_assignments(actor)
    }

    pub fn opt_out(&self, actor: &str, assignment_id: i64) -> Result<OptOutOutcome, ReviewError> {
        self.engine().opt_out(assignment_id, actor)
    }

    pub fn assign_reviewer(
        &self,
        actor: &str,
        proposal_id: ProposalId,
        reviewer_id: &str,
    ) -> Result<ReviewAssignment, ReviewError> {
        self.require_admin(actor, "assign_reviewer")?;
        let proposal = self.proposal(proposal_id)?;
        self.engine().assign_reviewer(&proposal, reviewer_id)
    }

    pub fn auto_assign(
        &self,
        actor: &str,
        proposal_id: ProposalId,
    ) -> Result<Vec<ReviewAssignment>, ReviewError> {
        self.require_admin(actor, "auto_assign")?;
        let proposal = self.proposal(proposal_id)?;
        self.engine()
            .create_assignments(&proposal, AssignmentOrigin::AutoAssigned)
    }

    fn proposal(&self, proposal_id: ProposalId) -> Result<Proposal, ReviewError> {
        self.catalog
            .proposal(proposal_id)
            .ok_or_else(|| ReviewError::not_found("proposal", proposal_id))
    }

    fn engine(&self) -> AssignmentEngine<'a> {
        AssignmentEngine::new(self.store, self.catalog, self.pool).with_policy(self.policy)
    }

    fn queries(&self) -> ReviewQueries<'a> {
        ReviewQueries::new(self.store, self.catalog)
    }

    fn require_admin(&self, actor: &str, action: &'static str) -> Result<(), ReviewError> {
        self.require(self.capabilities.is_reviewer_admin(actor), actor, action)
    }

    fn require(&self, allowed: bool, actor: &str, action: &'static str) -> Result<(), ReviewError> {
        if allowed {
            return Ok(());
        }
        warn!(event = "access_denied", actor = %actor, action);
        Err(ReviewError::forbidden(format!(
            "{actor} may not perform {action}"
        )))
    }
}
