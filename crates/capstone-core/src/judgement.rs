//! # Judgement Taxonomy
//!
//! Closed, per-phase enumerations of the outcomes a committee can record,
//! plus the single classification function the resolver matches on.
//!
//! | Phase    | Pass                                        | Retry                       | Absent | Reject   |
//! |----------|---------------------------------------------|-----------------------------|--------|----------|
//! | Proposal | ACCEPTED, ACCEPTED_CONDITIONALLY            | RE_DEFENSE                  | ABSENT | REJECTED |
//! | Mid      | PROGRESS_SATISFACTORY, PROGRESS_SEEN        | PROGRESS_NOT_SATISFACTORY   | ABSENT | -        |
//! | Final    | ACCEPTED, ACCEPTED_CONDITIONALLY            | RE_DEFENSE                  | ABSENT | -        |

use crate::{CapstoneError, Phase};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcomes of a proposal defense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalJudgement {
    Accepted,
    AcceptedConditionally,
    ReDefense,
    Absent,
    Rejected,
}

/// Outcomes of a mid-term progress defense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MidJudgement {
    ProgressSatisfactory,
    ProgressSeen,
    ProgressNotSatisfactory,
    Absent,
}

/// Outcomes of a final defense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalJudgement {
    Accepted,
    AcceptedConditionally,
    ReDefense,
    Absent,
}

/// A committee outcome, tagged with the phase it belongs to.
///
/// A judgement can only be constructed for its own phase, so a mid-phase
/// outcome can never be recorded against a proposal defense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Judgement {
    Proposal(ProposalJudgement),
    Mid(MidJudgement),
    Final(FinalJudgement),
}

/// What the resolver does with a judgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JudgementClass {
    /// Phase passed (including conditional passes).
    Pass,
    /// Re-defense required.
    Retry,
    /// The team did not appear.
    Absent,
    /// Terminal rejection of a proposal.
    Reject,
}

impl JudgementClass {
    #[must_use]
    pub fn is_pass(self) -> bool {
        matches!(self, JudgementClass::Pass)
    }

    /// Retry, Absent and Reject all invalidate the submitted report.
    #[must_use]
    pub fn invalidates_report(self) -> bool {
        !self.is_pass()
    }
}

impl Judgement {
    /// The phase this judgement belongs to.
    #[must_use]
    pub fn phase(self) -> Phase {
        match self {
            Judgement::Proposal(_) => Phase::Proposal,
            Judgement::Mid(_) => Phase::Mid,
            Judgement::Final(_) => Phase::Final,
        }
    }

    /// Classify into the resolver's four outcome classes.
    #[must_use]
    pub fn classify(self) -> JudgementClass {
        match self {
            Judgement::Proposal(j) => match j {
                ProposalJudgement::Accepted | ProposalJudgement::AcceptedConditionally => {
                    JudgementClass::Pass
                }
                ProposalJudgement::ReDefense => JudgementClass::Retry,
                ProposalJudgement::Absent => JudgementClass::Absent,
                ProposalJudgement::Rejected => JudgementClass::Reject,
            },
            Judgement::Mid(j) => match j {
                MidJudgement::ProgressSatisfactory | MidJudgement::ProgressSeen => {
                    JudgementClass::Pass
                }
                MidJudgement::ProgressNotSatisfactory => JudgementClass::Retry,
                MidJudgement::Absent => JudgementClass::Absent,
            },
            Judgement::Final(j) => match j {
                FinalJudgement::Accepted | FinalJudgement::AcceptedConditionally => {
                    JudgementClass::Pass
                }
                FinalJudgement::ReDefense => JudgementClass::Retry,
                FinalJudgement::Absent => JudgementClass::Absent,
            },
        }
    }

    /// The wire label, e.g. `ACCEPTED_CONDITIONALLY`.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Judgement::Proposal(j) => match j {
                ProposalJudgement::Accepted => "ACCEPTED",
                ProposalJudgement::AcceptedConditionally => "ACCEPTED_CONDITIONALLY",
                ProposalJudgement::ReDefense => "RE_DEFENSE",
                ProposalJudgement::Absent => "ABSENT",
                ProposalJudgement::Rejected => "REJECTED",
            },
            Judgement::Mid(j) => match j {
                MidJudgement::ProgressSatisfactory => "PROGRESS_SATISFACTORY",
                MidJudgement::ProgressSeen => "PROGRESS_SEEN",
                MidJudgement::ProgressNotSatisfactory => "PROGRESS_NOT_SATISFACTORY",
                MidJudgement::Absent => "ABSENT",
            },
            Judgement::Final(j) => match j {
                FinalJudgement::Accepted => "ACCEPTED",
                FinalJudgement::AcceptedConditionally => "ACCEPTED_CONDITIONALLY",
                FinalJudgement::ReDefense => "RE_DEFENSE",
                FinalJudgement::Absent => "ABSENT",
            },
        }
    }

    /// Every judgement defined for `phase`.
    #[must_use]
    pub fn all_for(phase: Phase) -> Vec<Judgement> {
        match phase {
            Phase::Proposal => [
                ProposalJudgement::Accepted,
                ProposalJudgement::AcceptedConditionally,
                ProposalJudgement::ReDefense,
                ProposalJudgement::Absent,
                ProposalJudgement::Rejected,
            ]
            .into_iter()
            .map(Judgement::Proposal)
            .collect(),
            Phase::Mid => [
                MidJudgement::ProgressSatisfactory,
                MidJudgement::ProgressSeen,
                MidJudgement::ProgressNotSatisfactory,
                MidJudgement::Absent,
            ]
            .into_iter()
            .map(Judgement::Mid)
            .collect(),
            Phase::Final => [
                FinalJudgement::Accepted,
                FinalJudgement::AcceptedConditionally,
                FinalJudgement::ReDefense,
                FinalJudgement::Absent,
            ]
            .into_iter()
            .map(Judgement::Final)
            .collect(),
        }
    }

    /// Parse a wire label for a given phase.
    ///
    /// Labels are matched case-insensitively; `-` and spaces are accepted in
    /// place of `_`. A label that exists only in another phase is rejected.
    pub fn parse(phase: Phase, label: &str) -> Result<Judgement, CapstoneError> {
        let normalized = label.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        Judgement::all_for(phase)
            .into_iter()
            .find(|j| j.label() == normalized)
            .ok_or_else(|| {
                CapstoneError::Validation(format!(
                    "'{}' is not a valid {} judgement",
                    label.trim(),
                    phase
                ))
            })
    }
}

impl fmt::Display for Judgement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// TESTS
// =============================================================================
