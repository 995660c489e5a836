use crate::{ProposalId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Class name rendered for a reviewer who has not voted on a proposal.
pub const NO_VOTE_CLASS: &str = "no-vote";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("invalid vote: {value:?}, expected one of +1, +0, -0, -1")]
    InvalidVote { value: String },
    #[error("unknown decision: {value:?}")]
    UnknownDecision { value: String },
    #[error("unknown assignment origin: {value:?}")]
    UnknownOrigin { value: String },
    #[error("unknown classification: {value:?}")]
    UnknownClassification { value: String },
}

/// A reviewer's judgment. Variants are declared weakest first so the derived
/// ordering matches `+1 > +0 > -0 > -1`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Vote {
    #[serde(rename = "-1")]
    MinusOne,
    #[serde(rename = "-0")]
    MinusZero,
    #[serde(rename = "+0")]
    PlusZero,
    #[serde(rename = "+1")]
    PlusOne,
}

impl Vote {
    pub const ALL: [Vote; 4] = [Vote::PlusOne, Vote::PlusZero, Vote::MinusZero, Vote::MinusOne];

    pub fn as_str(self) -> &'static str {
        match self {
            Vote::PlusOne => "+1",
            Vote::PlusZero => "+0",
            Vote::MinusZero => "-0",
            Vote::MinusOne => "-1",
        }
    }

    pub fn css_class(self) -> &'static str {
        match self {
            Vote::PlusOne => "plus-one",
            Vote::PlusZero => "plus-zero",
            Vote::MinusZero => "minus-zero",
            Vote::MinusOne => "minus-one",
        }
    }

    /// Contribution of this vote to a proposal score. Strong votes count double.
    pub fn weight(self) -> i64 {
        match self {
            Vote::PlusOne => 2,
            Vote::PlusZero => 1,
            Vote::MinusZero => -1,
            Vote::MinusOne => -2,
        }
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vote {
    type Err = ContractError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().replace('\u{2212}', "-").to_lowercase();
        match normalized.as_str() {
            "+1" | "plus_one" | "plus-one" => Ok(Vote::PlusOne),
            "+0" | "plus_zero" | "plus-zero" => Ok(Vote::PlusZero),
            "-0" | "minus_zero" | "minus-zero" => Ok(Vote::MinusZero),
            "-1" | "minus_one" | "minus-one" => Ok(Vote::MinusOne),
            _ => Err(ContractError::InvalidVote {
                value: input.to_string(),
            }),
        }
    }
}

pub fn vote_css_class(vote: Option<Vote>) -> &'static str {
    vote.map(Vote::css_class).unwrap_or(NO_VOTE_CLASS)
}

/// Trims a submitted comment; blank comments are treated as absent.
pub fn normalize_comment(comment: Option<&str>) -> Option<String> {
    comment
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// A single vote cast by a reviewer. Never mutated; a revote is a new event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewEvent {
    pub review_id: i64,
    pub proposal_id: ProposalId,
    pub reviewer_id: UserId,
    pub vote: Vote,
    pub comment: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl ReviewEvent {
    /// Events are ordered by submission time, then by id for equal timestamps.
    pub fn ordering_key(&self) -> (DateTime<Utc>, i64) {
        (self.submitted_at, self.review_id)
    }

    pub fn has_comment(&self) -> bool {
        self.comment
            .as_deref()
            .is_some_and(|comment| !comment.trim().is_empty())
    }
}

/// The most recent surviving vote of one reviewer on one proposal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentVote {
    pub proposal_id: ProposalId,
    pub reviewer_id: UserId,
    pub review_id: i64,
    pub vote: Vote,
    pub submitted_at: DateTime<Utc>,
}

impl From<&ReviewEvent> for CurrentVote {
    fn from(event: &ReviewEvent) -> Self {
        Self {
            proposal_id: event.proposal_id,
            reviewer_id: event.reviewer_id.clone(),
            review_id: event.review_id,
            vote: event.vote,
            submitted_at: event.submitted_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteCounts {
    pub plus_one: i64,
    pub plus_zero: i64,
    pub minus_zero: i64,
    pub minus_one: i64,
}

impl VoteCounts {
    pub fn tally(votes: impl IntoIterator<Item = Vote>) -> Self {
        let mut counts = Self::default();
        for vote in votes {
            counts.record(vote);
        }
        counts
    }

    pub fn record(&mut self, vote: Vote) {
        match vote {
            Vote::PlusOne => self.plus_one += 1,
            Vote::PlusZero => self.plus_zero += 1,
            Vote::MinusZero => self.minus_zero += 1,
            Vote::MinusOne => self.minus_one += 1,
        }
    }

    pub fn total(&self) -> i64 {
        self.plus_one + self.plus_zero + self.minus_zero + self.minus_one
    }

    pub fn score(&self) -> i64 {
        self.plus_one * Vote::PlusOne.weight()
            + self.plus_zero * Vote::PlusZero.weight()
            + self.minus_zero * Vote::MinusZero.weight()
            + self.minus_one * Vote::MinusOne.weight()
    }

    pub fn classification(&self) -> Classification {
        Classification::of(self.plus_one, self.minus_one)
    }
}

/// Tri-state outcome of the administrative accept/reject decision.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Acceptance {
    #[default]
    Undecided,
    Accepted,
    Rejected,
}

impl Acceptance {
    pub fn as_option(self) -> Option<bool> {
        match self {
            Acceptance::Undecided => None,
            Acceptance::Accepted => Some(true),
            Acceptance::Rejected => Some(false),
        }
    }

    pub fn from_option(value: Option<bool>) -> Self {
        match value {
            None => Acceptance::Undecided,
            Some(true) => Acceptance::Accepted,
            Some(false) => Acceptance::Rejected,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Reject,
    Undecide,
}

impl Decision {
    pub fn acceptance(self) -> Acceptance {
        match self {
            Decision::Accept => Acceptance::Accepted,
            Decision::Reject => Acceptance::Rejected,
            Decision::Undecide => Acceptance::Undecided,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Accept => "accept",
            Decision::Reject => "reject",
            Decision::Undecide => "undecide",
        }
    }
}

impl FromStr for Decision {
    type Err = ContractError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "accept" => Ok(Decision::Accept),
            "reject" => Ok(Decision::Reject),
            "undecide" | "undecided" => Ok(Decision::Undecide),
            _ => Err(ContractError::UnknownDecision {
                value: input.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Good,
    Bad,
    Indifferent,
    Controversial,
}

impl Classification {
    pub const ALL: [Classification; 4] = [
        Classification::Good,
        Classification::Bad,
        Classification::Indifferent,
        Classification::Controversial,
    ];

    pub fn of(plus_one: i64, minus_one: i64) -> Self {
        match (plus_one > 0, minus_one > 0) {
            (true, false) => Classification::Good,
            (false, true) => Classification::Bad,
            (false, false) => Classification::Indifferent,
            (true, true) => Classification::Controversial,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Good => "good",
            Classification::Bad => "bad",
            Classification::Indifferent => "indifferent",
            Classification::Controversial => "controversial",
        }
    }

    /// Listing order within the class: best first for good and controversial,
    /// worst first for bad, least reviewed first for indifferent.
    pub fn compare(self, left: &ReviewResult, right: &ReviewResult) -> Ordering {
        let primary = match self {
            Classification::Good | Classification::Controversial => right.score.cmp(&left.score),
            Classification::Bad => left.score.cmp(&right.score),
            Classification::Indifferent => left.vote_count.cmp(&right.vote_count),
        };
        primary.then(left.proposal_id.cmp(&right.proposal_id))
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Classification {
    type Err = ContractError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "good" => Ok(Classification::Good),
            "bad" => Ok(Classification::Bad),
            "indifferent" => Ok(Classification::Indifferent),
            "controversial" => Ok(Classification::Controversial),
            _ => Err(ContractError::UnknownClassification {
                value: input.to_string(),
            }),
        }
    }
}

/// Materialized per-proposal tally. Only `accepted` is ever set directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewResult {
    pub proposal_id: ProposalId,
    pub comment_count: i64,
    pub vote_count: i64,
    pub plus_one: i64,
    pub plus_zero: i64,
    pub minus_zero: i64,
    pub minus_one: i64,
    pub score: i64,
    pub accepted: Acceptance,
}

impl ReviewResult {
    pub fn empty(proposal_id: ProposalId) -> Self {
        Self::from_tally(proposal_id, VoteCounts::default(), 0, Acceptance::Undecided)
    }

    pub fn from_tally(
        proposal_id: ProposalId,
        counts: VoteCounts,
        comment_count: i64,
        accepted: Acceptance,
    ) -> Self {
        Self {
            proposal_id,
            comment_count,
            vote_count: counts.total(),
            plus_one: counts.plus_one,
            plus_zero: counts.plus_zero,
            minus_zero: counts.minus_zero,
            minus_one: counts.minus_one,
            score: counts.score(),
            accepted,
        }
    }

    pub fn counts(&self) -> VoteCounts {
        VoteCounts {
            plus_one: self.plus_one,
            plus_zero: self.plus_zero,
            minus_zero: self.minus_zero,
            minus_one: self.minus_one,
        }
    }

    pub fn classification(&self) -> Classification {
        Classification::of(self.plus_one, self.minus_one)
    }

    pub fn is_good(&self) -> bool {
        self.plus_one > 0 && self.minus_one == 0
    }

    pub fn is_bad(&self) -> bool {
        self.minus_one > 0 && self.plus_one == 0
    }

    pub fn is_indifferent(&self) -> bool {
        self.plus_one == 0 && self.minus_one == 0
    }

    pub fn is_controversial(&self) -> bool {
        self.plus_one > 0 && self.minus_one > 0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentOrigin {
    Manual,
    AutoAssigned,
    /// Replacement created after another reviewer opted out.
    AutoAssignedLater,
}

impl AssignmentOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentOrigin::Manual => "manual",
            AssignmentOrigin::AutoAssigned => "auto_assigned",
            AssignmentOrigin::AutoAssignedLater => "auto_assigned_later",
        }
    }
}

impl FromStr for AssignmentOrigin {
    type Err = ContractError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "manual" => Ok(AssignmentOrigin::Manual),
            "auto_assigned" | "auto-assigned" => Ok(AssignmentOrigin::AutoAssigned),
            "auto_assigned_later" | "auto-assigned-later" => {
                Ok(AssignmentOrigin::AutoAssignedLater)
            }
            _ => Err(ContractError::UnknownOrigin {
                value: input.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewAssignment {
    pub assignment_id: i64,
    pub proposal_id: ProposalId,
    pub reviewer_id: UserId,
    pub origin: AssignmentOrigin,
    pub opted_out: bool,
    pub assigned_at: DateTime<Utc>,
}

impl ReviewAssignment {
    pub fn is_active(&self) -> bool {
        !self.opted_out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProposalMessage {
    pub message_id: i64,
    pub proposal_id: ProposalId,
    pub author_id: UserId,
    pub message: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewerSummary {
    pub reviewer_id: UserId,
    /// Every review event authored, superseded ones included.
    pub review_count: i64,
    /// Proposals on which the reviewer currently holds a vote.
    pub vote_count: i64,
    #[serde(flatten)]
    pub counts: VoteCounts,
}
