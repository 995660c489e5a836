use crate::aggregator::recompute_in;
use crate::ReviewError;
use chrono::{DateTime, Utc};
use review_core::review_contracts::{normalize_comment, CurrentVote, ReviewEvent, Vote};
use review_core::{Proposal, ProposalId};
use review_storage::{ReviewStore, ReviewTx, StorageError};
use tracing::{info, warn};

/// Append-only vote history plus the derived current vote per reviewer.
///
/// Every mutation writes the event, refreshes the pair's current vote and
/// recomputes the proposal's result in one store transaction.
pub struct VoteLedger<'a> {
    store: &'a ReviewStore,
}

impl<'a> VoteLedger<'a> {
    pub fn new(store: &'a ReviewStore) -> Self {
        Self { store }
    }

    pub fn record_vote(
        &self,
        proposal: &Proposal,
        reviewer_id: &str,
        vote: Vote,
        comment: Option<&str>,
    ) -> Result<ReviewEvent, ReviewError> {
        self.record_vote_at(proposal, reviewer_id, vote, comment, Utc::now())
    }

    /// Records a vote with an explicit submission time. A back-dated event
    /// joins the history but only becomes current if it sorts last.
    pub fn record_vote_at(
        &self,
        proposal: &Proposal,
        reviewer_id: &str,
        vote: Vote,
        comment: Option<&str>,
        submitted_at: DateTime<Utc>,
    ) -> Result<ReviewEvent, ReviewError> {
        if proposal.is_speaker(reviewer_id) {
            warn!(
                event = "vote_refused",
                proposal_id = proposal.id,
                reviewer = %reviewer_id,
                reason = "speaker"
            );
            return Err(ReviewError::forbidden(format!(
                "{reviewer_id} is a speaker on proposal {}",
                proposal.id
            )));
        }

        let comment = normalize_comment(comment);
        let (review, current, result) = self.store.write(|tx| {
            let review = tx.insert_review(
                proposal.id,
                reviewer_id,
                vote,
                comment.as_deref(),
                submitted_at,
            )?;
            let current = refresh_current_vote(tx, proposal.id, reviewer_id)?;
            let result = recompute_in(tx, proposal.id)?;
            Ok::<_, ReviewError>((review, current, result))
        })?;

        info!(
            event = "vote_recorded",
            proposal_id = proposal.id,
            review_id = review.review_id,
            reviewer = %reviewer_id,
            vote = %vote,
            current = current.as_ref().map(|c| c.vote.as_str()).unwrap_or("none"),
            vote_count = result.vote_count,
            score = result.score
        );
        Ok(review)
    }

    /// Administrative removal of one event. Returns the deleted event.
    pub fn delete_vote(&self, review_id: i64) -> Result<ReviewEvent, ReviewError> {
        let (review, current) = self.store.write(|tx| {
            let review = tx
                .review(review_id)?
                .ok_or_else(|| ReviewError::not_found("review", review_id))?;
            tx.delete_review(review_id)?;
            let current = refresh_current_vote(tx, review.proposal_id, &review.reviewer_id)?;
            recompute_in(tx, review.proposal_id)?;
            Ok::<_, ReviewError>((review, current))
        })?;

        info!(
            event = "vote_deleted",
            proposal_id = review.proposal_id,
            review_id,
            reviewer = %review.reviewer_id,
            current = current.as_ref().map(|c| c.vote.as_str()).unwrap_or("none")
        );
        Ok(review)
    }

    pub fn current_vote_of(
        &self,
        proposal_id: ProposalId,
        reviewer_id: &str,
    ) -> Result<Option<Vote>, ReviewError> {
        let current = self
            .store
            .read(|tx| tx.current_vote(proposal_id, reviewer_id))?;
        Ok(current.map(|current| current.vote))
    }

    /// Every surviving event on the proposal, newest first.
    pub fn history(&self, proposal_id: ProposalId) -> Result<Vec<ReviewEvent>, ReviewError> {
        Ok(self.store.read(|tx| tx.reviews_for_proposal(proposal_id))?)
    }
}

/// Re-derives the current vote for a pair from its surviving history.
pub(crate) fn refresh_current_vote(
    tx: &ReviewTx<'_>,
    proposal_id: ProposalId,
    reviewer_id: &str,
) -> Result<Option<CurrentVote>, StorageError> {
    match tx.latest_review_for_pair(proposal_id, reviewer_id)? {
        Some(latest) => {
            let current = CurrentVote::from(&latest);
            tx.upsert_current_vote(&current)?;
            Ok(Some(current))
        }
        None => {
            tx.delete_current_vote(proposal_id, reviewer_id)?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{talk, ts};
    use crate::ResultAggregator;

    #[test]
    fn latest_vote_wins_per_reviewer() {
        let store = ReviewStore::open_in_memory().expect("open store");
        let ledger = VoteLedger::new(&store);
        let proposal = talk(1, "talks", &["sam"]);

        ledger
            .record_vote_at(&proposal, "ana", Vote::PlusOne, None, ts(10, 0, 0))
            .expect("first vote");
        ledger
            .record_vote_at(&proposal, "ana", Vote::MinusZero, None, ts(10, 5, 0))
            .expect("revote");
        ledger
            .record_vote_at(&proposal, "ana", Vote::MinusOne, None, ts(9, 0, 0))
            .expect("back-dated vote");

        assert_eq!(
            ledger.current_vote_of(1, "ana").expect("current vote"),
            Some(Vote::MinusZero)
        );
        assert_eq!(ledger.current_vote_of(1, "bo").expect("no vote"), None);

        let result = ResultAggregator::new(&store)
            .result(1)
            .expect("load result")
            .expect("result present");
        assert_eq!(result.vote_count, 1);
        assert_eq!(result.minus_zero, 1);
        assert_eq!(result.score, -1);
    }

    #[test]
    fn nanosecond_backfill_keeps_later_vote_current() {
        let store = ReviewStore::open_in_memory().expect("open store");
        let ledger = VoteLedger::new(&store);
        let proposal = talk(5, "talks", &[]);

        ledger
            .record_vote_at(
                &proposal,
                "ana",
                Vote::PlusOne,
                None,
                ts(12, 0, 0) + chrono::Duration::nanoseconds(900),
            )
            .expect("later vote");
        ledger
            .record_vote_at(
                &proposal,
                "ana",
                Vote::MinusOne,
                None,
                ts(12, 0, 0) + chrono::Duration::nanoseconds(100),
            )
            .expect("earlier vote");

        assert_eq!(
            ledger.current_vote_of(5, "ana").expect("current vote"),
            Some(Vote::PlusOne)
        );
    }

    #[test]
    fn speakers_cannot_vote_on_their_proposal() {
        let store = ReviewStore::open_in_memory().expect("open store");
        let ledger = VoteLedger::new(&store);
        let proposal = talk(2, "talks", &["sam", "lee"]);

        let err = ledger
            .record_vote(&proposal, "lee", Vote::PlusOne, Some("my own talk"))
            .expect_err("speaker vote refused");
        assert!(matches!(err, ReviewError::Forbidden { .. }));
        assert!(ledger.history(2).expect("history").is_empty());
    }

    #[test]
    fn deleting_current_event_restores_previous_vote() {
        let store = ReviewStore::open_in_memory().expect("open store");
        let ledger = VoteLedger::new(&store);
        let aggregator = ResultAggregator::new(&store);
        let proposal = talk(3, "talks", &[]);

        let first = ledger
            .record_vote_at(&proposal, "ana", Vote::PlusZero, Some("ok"), ts(10, 0, 0))
            .expect("first vote");
        let second = ledger
            .record_vote_at(&proposal, "ana", Vote::PlusOne, Some("better now"), ts(11, 0, 0))
            .expect("second vote");

        let before = aggregator.result(3).expect("result").expect("present");
        assert_eq!(before.comment_count, 2);
        assert_eq!(before.plus_one, 1);

        let deleted = ledger.delete_vote(second.review_id).expect("delete");
        assert_eq!(deleted, second);
        assert_eq!(
            ledger.current_vote_of(3, "ana").expect("current"),
            Some(Vote::PlusZero)
        );
        let after = aggregator.result(3).expect("result").expect("present");
        assert_eq!(after.comment_count, 1);
        assert_eq!(after.plus_one, 0);
        assert_eq!(after.plus_zero, 1);

        ledger.delete_vote(first.review_id).expect("delete last");
        assert_eq!(ledger.current_vote_of(3, "ana").expect("current"), None);
        let empty = aggregator.result(3).expect("result").expect("present");
        assert_eq!(empty.vote_count, 0);
        assert_eq!(empty.comment_count, 0);

        let missing = ledger.delete_vote(first.review_id).expect_err("already gone");
        assert!(matches!(missing, ReviewError::NotFound { entity: "review", .. }));
    }

    #[test]
    fn deleting_superseded_event_keeps_current_vote() {
        let store = ReviewStore::open_in_memory().expect("open store");
        let ledger = VoteLedger::new(&store);
        let proposal = talk(4, "talks", &[]);

        let old = ledger
            .record_vote_at(&proposal, "bo", Vote::MinusOne, Some("weak"), ts(8, 0, 0))
            .expect("old vote");
        ledger
            .record_vote_at(&proposal, "bo", Vote::PlusOne, None, ts(9, 0, 0))
            .expect("new vote");

        ledger.delete_vote(old.review_id).expect("delete superseded");
        assert_eq!(
            ledger.current_vote_of(4, "bo").expect("current"),
            Some(Vote::PlusOne)
        );
        let result = ResultAggregator::new(&store)
            .result(4)
            .expect("result")
            .expect("present");
        assert_eq!(result.comment_count, 0);
        assert_eq!(result.plus_one, 1);
    }
}
