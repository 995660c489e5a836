pub mod review_contracts;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub type ProposalId = i64;
pub type UserId = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Speaker {
    pub user_id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProposalKind {
    Talk {
        #[serde(default)]
        duration_minutes: Option<u32>,
    },
    Tutorial {
        #[serde(default)]
        max_attendees: Option<u32>,
    },
    Poster {
        #[serde(default)]
        needs_power: bool,
    },
}

impl ProposalKind {
    pub fn name(&self) -> ProposalKindName {
        match self {
            ProposalKind::Talk { .. } => ProposalKindName::Talk,
            ProposalKind::Tutorial { .. } => ProposalKindName::Tutorial,
            ProposalKind::Poster { .. } => ProposalKindName::Poster,
        }
    }
}

/// Payload-free discriminant of [`ProposalKind`], usable as a grouping key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKindName {
    Talk,
    Tutorial,
    Poster,
}

impl ProposalKindName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalKindName::Talk => "talk",
            ProposalKindName::Tutorial => "tutorial",
            ProposalKindName::Poster => "poster",
        }
    }
}

impl fmt::Display for ProposalKindName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProposalKindName {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "talk" => Ok(ProposalKindName::Talk),
            "tutorial" => Ok(ProposalKindName::Tutorial),
            "poster" => Ok(ProposalKindName::Poster),
            other => Err(format!("Unknown proposal kind: {other}")),
        }
    }
}

/// A submitted proposal as seen by the review engine. Read-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Proposal {
    pub id: ProposalId,
    pub title: String,
    pub section: String,
    #[serde(flatten)]
    pub kind: ProposalKind,
    #[serde(default)]
    pub speakers: Vec<Speaker>,
    pub submitted_at: DateTime<Utc>,
}

impl Proposal {
    pub fn speakers(&self) -> impl Iterator<Item = &UserId> {
        self.speakers.iter().map(|speaker| &speaker.user_id)
    }

    pub fn is_speaker(&self, user_id: &str) -> bool {
        self.speakers().any(|speaker| speaker == user_id)
    }

    pub fn kind_name(&self) -> ProposalKindName {
        self.kind.name()
    }
}

pub trait ProposalCatalog {
    fn proposal(&self, id: ProposalId) -> Option<Proposal>;

    /// All proposals, ordered by id.
    fn proposals(&self) -> Vec<Proposal>;

    fn proposals_in_section(&self, section: &str) -> Vec<Proposal> {
        self.proposals()
            .into_iter()
            .filter(|proposal| proposal.section == section)
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogData {
    #[serde(default)]
    pub proposals: Vec<Proposal>,
}

/// In-memory catalog, typically loaded from a JSON export of the proposal system.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    proposals: BTreeMap<ProposalId, Proposal>,
}

impl StaticCatalog {
    pub fn new(proposals: impl IntoIterator<Item = Proposal>) -> Self {
        Self {
            proposals: proposals
                .into_iter()
                .map(|proposal| (proposal.id, proposal))
                .collect(),
        }
    }

    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        let data: CatalogData = serde_json::from_str(input)?;
        Ok(Self::new(data.proposals))
    }

    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }
}

impl ProposalCatalog for StaticCatalog {
    fn proposal(&self, id: ProposalId) -> Option<Proposal> {
        self.proposals.get(&id).cloned()
    }

    fn proposals(&self) -> Vec<Proposal> {
        self.proposals.values().cloned().collect()
    }
}
