//! Governance proposal helpers: dashboard counters, vote shares, quorum
//! progress and time left on a vote.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Active,
    Pending,
    Passed,
    Rejected,
    Expired,
    #[serde(other)]
    Unknown,
}

/// DAO proposal as shown on the governance pages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub status: ProposalStatus,
    #[serde(default)]
    pub votes_for: u64,
    #[serde(default)]
    pub votes_against: u64,
    #[serde(default)]
    pub total_votes: u64,
    #[serde(default)]
    pub quorum: u64,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub has_voted: bool,
    pub user_voting_power: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalStats {
    pub active_proposals: usize,
    pub voted_proposals: usize,
    pub total_voting_power: u64,
}

/// Counters for the governance dashboard.
///
/// `total_voting_power` is the first proposal's voting power, not a sum.
/// Voting power is per user, so every proposal carries the same figure.
pub fn proposal_stats(proposals: &[Proposal]) -> ProposalStats {
    ProposalStats {
        active_proposals: proposals
            .iter()
            .filter(|p| p.status == ProposalStatus::Active)
            .count(),
        voted_proposals: proposals.iter().filter(|p| p.has_voted).count(),
        total_voting_power: proposals
            .first()
            .and_then(|p| p.user_voting_power)
            .unwrap_or(0),
    }
}

/// Share of `total` as a one-decimal percentage; `"0.0"` when nobody voted.
pub fn vote_percentage(votes: u64, total: u64) -> String {
    if total == 0 {
        return "0.0".to_string();
    }
    format!("{:.1}", votes as f64 / total as f64 * 100.0)
}

/// Progress towards quorum as a one-decimal percentage.
///
/// A zero quorum is not guarded and renders as `inf` or `NaN`.
pub fn quorum_progress(total_votes: u64, quorum: u64) -> String {
    format!("{:.1}", total_votes as f64 / quorum as f64 * 100.0)
}

/// Whole days left until `end`, rounded up, never negative.
pub fn days_remaining(end: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let diff = end.timestamp_millis() - now.timestamp_millis();
    if diff <= 0 {
        return 0;
    }
    (diff + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY
}

/// Derived figures for one proposal card
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalSummary {
    pub id: String,
    pub title: String,
    pub status: ProposalStatus,
    pub for_percentage: String,
    pub against_percentage: String,
    pub quorum_progress: String,
    pub days_remaining: Option<i64>,
}

impl Proposal {
    pub fn summary(&self, now: DateTime<Utc>) -> ProposalSummary {
        ProposalSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            status: self.status,
            for_percentage: vote_percentage(self.votes_for, self.total_votes),
            against_percentage: vote_percentage(self.votes_against, self.total_votes),
            quorum_progress: quorum_progress(self.total_votes, self.quorum),
            days_remaining: self.end_date.map(|end| days_remaining(end, now)),
        }
    }
}
