use crate::ReviewError;
use chrono::{DateTime, Utc};
use review_core::review_contracts::{
    vote_css_class, Classification, ReviewResult, ReviewerSummary, VoteCounts,
};
use review_core::{Proposal, ProposalCatalog, ProposalId, ProposalKindName, UserId};
use review_storage::{ReviewStore, ReviewTx, StorageError};
use serde::Serialize;
use std::collections::BTreeMap;

/// One proposal row as shown on listing pages.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProposalListing {
    pub proposal_id: ProposalId,
    pub title: String,
    pub section: String,
    pub kind: ProposalKindName,
    pub submitted_at: DateTime<Utc>,
    pub result: ReviewResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote_class: Option<String>,
}

impl ProposalListing {
    fn new(proposal: &Proposal, result: ReviewResult) -> Self {
        Self {
            proposal_id: proposal.id,
            title: proposal.title.clone(),
            section: proposal.section.clone(),
            kind: proposal.kind_name(),
            submitted_at: proposal.submitted_at,
            result,
            vote_class: None,
        }
    }
}

/// Read-only views over stored results joined with the proposal catalog.
pub struct ReviewQueries<'a> {
    store: &'a ReviewStore,
    catalog: &'a dyn ProposalCatalog,
}

impl<'a> ReviewQueries<'a> {
    pub fn new(store: &'a ReviewStore, catalog: &'a dyn ProposalCatalog) -> Self {
        Self { store, catalog }
    }

    /// Proposals in one class, in that class's listing order.
    pub fn classified(
        &self,
        section: Option<&str>,
        classification: Classification,
    ) -> Result<Vec<ProposalListing>, ReviewError> {
        let mut listings: Vec<ProposalListing> = self
            .with_results(section)?
            .into_iter()
            .filter(|listing| listing.result.classification() == classification)
            .collect();
        listings.sort_by(|left, right| classification.compare(&left.result, &right.result));
        Ok(listings)
    }

    /// All four classes at once; every class has an entry, possibly empty.
    pub fn classification_overview(
        &self,
        section: Option<&str>,
    ) -> Result<BTreeMap<Classification, Vec<ProposalListing>>, ReviewError> {
        let mut overview: BTreeMap<Classification, Vec<ProposalListing>> = Classification::ALL
            .into_iter()
            .map(|classification| (classification, Vec::new()))
            .collect();
        for listing in self.with_results(section)? {
            overview
                .entry(listing.result.classification())
                .or_default()
                .push(listing);
        }
        for (classification, listings) in overview.iter_mut() {
            listings.sort_by(|left, right| classification.compare(&left.result, &right.result));
        }
        Ok(overview)
    }

    /// Catalog proposals that have a result, optionally limited to a section,
    /// ordered by proposal id.
    pub fn with_results(
        &self,
        section: Option<&str>,
    ) -> Result<Vec<ProposalListing>, ReviewError> {
        let proposals = match section {
            Some(section) => self.catalog.proposals_in_section(section),
            None => self.catalog.proposals(),
        };
        self.annotated(proposals, None)
    }

    /// Joins proposals with their results, dropping the ones never reviewed.
    /// With a `voter`, each listing carries that reviewer's vote class.
    pub fn annotated(
        &self,
        proposals: impl IntoIterator<Item = Proposal>,
        voter: Option<&str>,
    ) -> Result<Vec<ProposalListing>, ReviewError> {
        let listings = self.store.read(|tx| {
            let mut listings = Vec::new();
            for proposal in proposals {
                let Some(result) = tx.result(proposal.id)? else {
                    continue;
                };
                let mut listing = ProposalListing::new(&proposal, result);
                if let Some(voter) = voter {
                    let vote = tx.current_vote(proposal.id, voter)?.map(|current| current.vote);
                    listing.vote_class = Some(vote_css_class(vote).to_string());
                }
                listings.push(listing);
            }
            Ok::<_, StorageError>(listings)
        })?;
        Ok(listings)
    }

    pub fn reviewer_summary(&self, reviewer_id: &str) -> Result<ReviewerSummary, ReviewError> {
        Ok(self.store.read(|tx| summary_in(tx, reviewer_id))?)
    }

    pub fn reviewer_summaries(
        &self,
        reviewer_ids: &[UserId],
    ) -> Result<Vec<ReviewerSummary>, ReviewError> {
        let summaries = self.store.read(|tx| {
            let mut summaries = Vec::with_capacity(reviewer_ids.len());
            for reviewer_id in reviewer_ids {
                summaries.push(summary_in(tx, reviewer_id)?);
            }
            Ok::<_, StorageError>(summaries)
        })?;
        Ok(summaries)
    }

    /// Proposals the reviewer currently holds a vote on, annotated with it.
    pub fn proposals_reviewed_by(
        &self,
        reviewer_id: &str,
    ) -> Result<Vec<ProposalListing>, ReviewError> {
        let voted = self
            .store
            .read(|tx| tx.current_votes_for_reviewer(reviewer_id))?;
        let proposals = voted
            .iter()
            .filter_map(|current| self.catalog.proposal(current.proposal_id));
        self.annotated(proposals, Some(reviewer_id))
    }
}

fn summary_in(tx: &ReviewTx<'_>, reviewer_id: &str) -> Result<ReviewerSummary, StorageError> {
    let votes = tx.current_votes_for_reviewer(reviewer_id)?;
    Ok(ReviewerSummary {
        reviewer_id: reviewer_id.to_string(),
        review_count: tx.review_count_for_reviewer(reviewer_id)?,
        vote_count: votes.len() as i64,
        counts: VoteCounts::tally(votes.iter().map(|current| current.vote)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{catalog, talk, ts};
    use crate::VoteLedger;
    use review_core::review_contracts::Vote;

    fn seeded() -> (ReviewStore, review_core::StaticCatalog) {
        let store = ReviewStore::open_in_memory().expect("open store");
        let proposals = vec![
            talk(1, "talks", &[]),
            talk(2, "talks", &[]),
            talk(3, "talks", &[]),
            talk(4, "posters", &[]),
            talk(5, "talks", &[]),
            talk(6, "talks", &[]),
        ];
        let ledger = VoteLedger::new(&store);
        let votes = [
            (1, "ana", Vote::PlusOne),
            (2, "ana", Vote::PlusOne),
            (2, "bo", Vote::PlusOne),
            (3, "ana", Vote::MinusOne),
            (3, "bo", Vote::MinusZero),
            (4, "ana", Vote::PlusOne),
            (5, "ana", Vote::PlusZero),
            (6, "ana", Vote::PlusOne),
            (6, "bo", Vote::MinusOne),
        ];
        for (index, (proposal_id, reviewer, vote)) in votes.into_iter().enumerate() {
            let proposal = proposals
                .iter()
                .find(|proposal| proposal.id == proposal_id)
                .expect("seeded proposal");
            ledger
                .record_vote_at(proposal, reviewer, vote, None, ts(10, index as u32, 0))
                .expect("seed vote");
        }
        (store, catalog(proposals))
    }

    fn ids(listings: &[ProposalListing]) -> Vec<ProposalId> {
        listings.iter().map(|listing| listing.proposal_id).collect()
    }

    #[test]
    fn good_lists_best_first_within_section() {
        let (store, catalog) = seeded();
        let queries = ReviewQueries::new(&store, &catalog);

        let good = queries
            .classified(Some("talks"), Classification::Good)
            .expect("good talks");
        assert_eq!(ids(&good), vec![2, 1]);

        let everywhere = queries
            .classified(None, Classification::Good)
            .expect("good everywhere");
        assert_eq!(ids(&everywhere), vec![2, 1, 4]);
    }

    #[test]
    fn overview_partitions_reviewed_proposals() {
        let (store, catalog) = seeded();
        let queries = ReviewQueries::new(&store, &catalog);

        let overview = queries
            .classification_overview(Some("talks"))
            .expect("overview");
        assert_eq!(overview.len(), 4);
        assert_eq!(ids(&overview[&Classification::Good]), vec![2, 1]);
        assert_eq!(ids(&overview[&Classification::Bad]), vec![3]);
        assert_eq!(ids(&overview[&Classification::Indifferent]), vec![5]);
        assert_eq!(ids(&overview[&Classification::Controversial]), vec![6]);
        assert_eq!(overview.values().map(Vec::len).sum::<usize>(), 5);
    }

    #[test]
    fn reviewer_summary_counts_current_votes() {
        let (store, catalog) = seeded();
        let proposal = catalog.proposal(1).expect("proposal 1");
        VoteLedger::new(&store)
            .record_vote_at(&proposal, "ana", Vote::MinusOne, Some("changed my mind"), ts(12, 0, 0))
            .expect("revote");
        let queries = ReviewQueries::new(&store, &catalog);

        let summary = queries.reviewer_summary("ana").expect("summary");
        assert_eq!(summary.review_count, 7);
        assert_eq!(summary.vote_count, 6);
        assert_eq!(summary.counts.plus_one, 3);
        assert_eq!(summary.counts.minus_one, 2);
        assert_eq!(summary.counts.plus_zero, 1);

        let summaries = queries
            .reviewer_summaries(&["bo".to_string(), "nobody".to_string()])
            .expect("summaries");
        assert_eq!(summaries[0].vote_count, 3);
        assert_eq!(summaries[1].review_count, 0);
    }

    #[test]
    fn reviewed_by_annotates_vote_class() {
        let (store, catalog) = seeded();
        let queries = ReviewQueries::new(&store, &catalog);

        let reviewed = queries.proposals_reviewed_by("bo").expect("reviewed");
        assert_eq!(ids(&reviewed), vec![2, 3, 6]);
        let classes: Vec<Option<&str>> = reviewed
            .iter()
            .map(|listing| listing.vote_class.as_deref())
            .collect();
        assert_eq!(
            classes,
            vec![Some("plus-one"), Some("minus-zero"), Some("minus-one")]
        );

        let annotated = queries
            .annotated(catalog.proposals_in_section("posters"), Some("bo"))
            .expect("annotated");
        assert_eq!(annotated[0].vote_class.as_deref(), Some("no-vote"));
    }
}
