use crate::ReviewError;
use review_core::review_contracts::{Decision, ReviewResult, VoteCounts};
use review_core::ProposalId;
use review_storage::{ReviewStore, ReviewTx, StorageError};
use tracing::{debug, info};

pub struct ResultAggregator<'a> {
    store: &'a ReviewStore,
}

impl<'a> ResultAggregator<'a> {
    pub fn new(store: &'a ReviewStore) -> Self {
        Self { store }
    }

    pub fn recompute(&self, proposal_id: ProposalId) -> Result<ReviewResult, ReviewError> {
        Ok(self.store.write(|tx| recompute_in(tx, proposal_id))?)
    }

    /// Sets the administrative decision. The tally columns are never touched;
    /// a proposal without a result row gets its tally materialized first.
    pub fn decide(
        &self,
        proposal_id: ProposalId,
        decision: Decision,
    ) -> Result<ReviewResult, ReviewError> {
        let result = self.store.write(|tx| {
            if tx.result(proposal_id)?.is_none() {
                recompute_in(tx, proposal_id)?;
            }
            tx.set_acceptance(proposal_id, decision.acceptance())?;
            tx.result(proposal_id)?
                .ok_or_else(|| ReviewError::not_found("review result", proposal_id))
        })?;

        info!(
            event = "proposal_decided",
            proposal_id,
            decision = decision.as_str(),
            score = result.score
        );
        Ok(result)
    }

    pub fn result(&self, proposal_id: ProposalId) -> Result<Option<ReviewResult>, ReviewError> {
        Ok(self.store.read(|tx| tx.result(proposal_id))?)
    }

    pub fn results(&self) -> Result<Vec<ReviewResult>, ReviewError> {
        Ok(self.store.read(|tx| tx.results())?)
    }
}

/// Rebuilds the tally for one proposal from its current votes and surviving
/// events, keeping whatever decision was already recorded.
pub(crate) fn recompute_in(
    tx: &ReviewTx<'_>,
    proposal_id: ProposalId,
) -> Result<ReviewResult, StorageError> {
    let accepted = tx
        .result(proposal_id)?
        .map(|existing| existing.accepted)
        .unwrap_or_default();
    let counts = VoteCounts::tally(
        tx.current_votes_for_proposal(proposal_id)?
            .into_iter()
            .map(|current| current.vote),
    );
    let comment_count = tx.comment_count_for_proposal(proposal_id)?;
    let result = ReviewResult::from_tally(proposal_id, counts, comment_count, accepted);
    tx.upsert_result(&result)?;

    debug!(
        event = "result_recomputed",
        proposal_id,
        plus_one = result.plus_one,
        plus_zero = result.plus_zero,
        minus_zero = result.minus_zero,
        minus_one = result.minus_one,
        comment_count = result.comment_count,
        score = result.score
    );
    Ok(result)
}
