//! Audit trail of a vote.
//!
//! Candidates are recorded by their display label at the time of the vote,
//! so a record stays meaningful after the candidates themselves changed.

use serde::Serialize;

use crate::ballot::Ballot;
use crate::engine::VoteParameters;

/// A candidate and its score in one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub candidate: String,
    pub score: i64,
}

/// Engine-specific detail attached to a round (e.g. the instant-runoff
/// passes), meant to be rendered as a bar chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extra {
    pub title: String,
    pub kind: String,
    pub values: Vec<(String, i64)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BallotRecord {
    pub elector: String,
    #[serde(rename = "for")]
    pub votes_for: Vec<String>,
    pub against: Vec<String>,
}

/// One round of a vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundRecord {
    pub number: usize,
    pub candidates: Vec<String>,
    pub ballots: Vec<BallotRecord>,
    /// Scores, best first.
    pub results: Vec<Tally>,
    pub extra: Vec<Extra>,
}

impl RoundRecord {
    pub fn new<C: std::fmt::Display>(number: usize, candidates: &[C]) -> Self {
        Self {
            number,
            candidates: candidates.iter().map(ToString::to_string).collect(),
            ballots: Vec::new(),
            results: Vec::new(),
            extra: Vec::new(),
        }
    }

    /// Record the ballots; secret ones are labelled `<Secret-N>`.
    pub fn set_ballots<C: std::fmt::Display + Clone + PartialEq>(&mut self, ballots: &[Ballot<C>]) {
        let mut secrets = 0;
        self.ballots = ballots
            .iter()
            .map(|ballot| BallotRecord {
                elector: match ballot.elector() {
                    Some(elector) => elector.to_string(),
                    None => {
                        secrets += 1;
                        format!("<Secret-{secrets}>")
                    }
                },
                votes_for: ballot.votes_for().iter().map(ToString::to_string).collect(),
                against: ballot
                    .votes_against()
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            })
            .collect();
    }

    /// Record the scores, sorted best first. Equal scores keep the given
    /// order.
    pub fn set_results<C: std::fmt::Display>(&mut self, scores: &[(C, i64)]) {
        let mut results: Vec<Tally> = scores
            .iter()
            .map(|(candidate, score)| Tally {
                candidate: candidate.to_string(),
                score: *score,
            })
            .collect();
        results.sort_by(|a, b| b.score.cmp(&a.score));
        self.results = results;
    }

    pub fn add_extra<C: std::fmt::Display>(&mut self, title: impl Into<String>, values: &[(C, i64)]) {
        self.extra.push(Extra {
            title: title.into(),
            kind: "bar".to_string(),
            values: values.iter().map(|(c, v)| (c.to_string(), *v)).collect(),
        });
    }

    /// Score of a candidate in this round, by label.
    pub fn score_of(&self, candidate: &str) -> Option<i64> {
        self.results
            .iter()
            .find(|t| t.candidate == candidate)
            .map(|t| t.score)
    }
}

/// Everything about one vote, kept by the vote core for inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteRecord {
    pub name: String,
    pub kind: String,
    pub subject: String,
    pub candidates: Vec<String>,
    pub electors: Vec<String>,
    pub parameters: VoteParameters,
    pub rounds: Vec<RoundRecord>,
    pub coup_d_etat: bool,
    /// Elected candidates; empty when the vote fell back to nothing.
    pub results: Vec<String>,
}

impl VoteRecord {
    pub fn new<C: std::fmt::Display>(
        name: &str,
        kind: &str,
        subject: String,
        candidates: &[C],
        electors: Vec<String>,
        parameters: VoteParameters,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            subject,
            candidates: candidates.iter().map(ToString::to_string).collect(),
            electors,
            parameters,
            rounds: Vec::new(),
            coup_d_etat: false,
            results: Vec::new(),
        }
    }

    pub fn winner(&self) -> Option<&str> {
        self.results.first().map(String::as_str)
    }
}
