//! # Core Type Definitions
//!
//! This module contains the vocabulary shared by every component:
//! - Document identifiers (`StudentId`, `ProjectId`, `DefenseId`, ...)
//! - Lifecycle coordinates (`Tier`, `Phase`, `Step`, `ProjectStatus`)
//! - Error types (`CapstoneError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer identifiers only
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// DOCUMENT IDENTIFIERS
// =============================================================================

macro_rules! document_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            /// Get the raw identifier value.
            #[must_use]
            pub const fn value(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $label, self.0)
            }
        }
    };
}

document_id!(
    /// A registered student.
    StudentId,
    "student"
);
document_id!(
    /// A team project within one event.
    ProjectId,
    "project"
);
document_id!(
    /// A committee member who grades defenses.
    EvaluatorId,
    "evaluator"
);
document_id!(
    /// A faculty member who can supervise minor/major projects.
    SupervisorId,
    "supervisor"
);
document_id!(
    /// One scheduled defense instance (one phase of one event).
    DefenseId,
    "defense"
);
document_id!(
    /// An academic event grouping the projects of one tier and year.
    EventId,
    "event"
);
document_id!(
    /// One immutable evaluation record.
    EvaluationId,
    "evaluation"
);

// =============================================================================
// LIFECYCLE COORDINATES
// =============================================================================

/// Program tier a project belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    FirstYear,
    Minor,
    Major,
}

impl Tier {
    /// All tiers in progression order.
    pub const ALL: [Tier; 3] = [Tier::FirstYear, Tier::Minor, Tier::Major];

    /// Defense phases of this tier, in order. The first-year tier has no mid defense.
    #[must_use]
    pub fn phases(self) -> &'static [Phase] {
        match self {
            Tier::FirstYear => &[Phase::Proposal, Phase::Final],
            Tier::Minor | Tier::Major => &[Phase::Proposal, Phase::Mid, Phase::Final],
        }
    }

    /// Whether `phase` exists in this tier.
    #[must_use]
    pub fn has_phase(self, phase: Phase) -> bool {
        self.phases().contains(&phase)
    }

    /// The tier a student enters after passing this tier's final defense.
    #[must_use]
    pub fn next(self) -> Option<Tier> {
        match self {
            Tier::FirstYear => Some(Tier::Minor),
            Tier::Minor => Some(Tier::Major),
            Tier::Major => None,
        }
    }

    /// Minor and major projects are supervised; first-year projects are not.
    #[must_use]
    pub fn requires_supervisor(self) -> bool {
        !matches!(self, Tier::FirstYear)
    }

    /// Human readable name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Tier::FirstYear => "first-year",
            Tier::Minor => "minor",
            Tier::Major => "major",
        }
    }

    /// Tier a student starts in, by academic year.
    #[must_use]
    pub fn for_academic_year(year: u8) -> Tier {
        match year {
            0..=2 => Tier::FirstYear,
            3 => Tier::Minor,
            _ => Tier::Major,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Tier {
    type Err = CapstoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first-year" | "first" | "first_year" => Ok(Tier::FirstYear),
            "minor" => Ok(Tier::Minor),
            "major" => Ok(Tier::Major),
            other => Err(CapstoneError::Validation(format!("unknown tier '{}'", other))),
        }
    }
}

/// Defense stage within a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    Proposal,
    Mid,
    Final,
}

impl Phase {
    /// All phases in order.
    pub const ALL: [Phase; 3] = [Phase::Proposal, Phase::Mid, Phase::Final];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Phase::Proposal => "proposal",
            Phase::Mid => "mid",
            Phase::Final => "final",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Phase {
    type Err = CapstoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proposal" => Ok(Phase::Proposal),
            "mid" => Ok(Phase::Mid),
            "final" => Ok(Phase::Final),
            other => Err(CapstoneError::Validation(format!("unknown phase '{}'", other))),
        }
    }
}

/// Sub-state within a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Step {
    /// Phase not yet open, or the last attempt failed.
    InitialOrFailed,
    /// The team may upload its report for this phase.
    EligibleForReport,
    /// The report is in; the team waits for a defense slot.
    EligibleForDefense,
}

impl Step {
    pub const ALL: [Step; 3] = [
        Step::InitialOrFailed,
        Step::EligibleForReport,
        Step::EligibleForDefense,
    ];
}

/// Lifecycle status of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProjectStatus {
    Active,
    Complete,
    Archived,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Capstone engine.
///
/// - No silent failures
/// - Use `Result<T, CapstoneError>` for fallible operations
/// - The engine never panics; a failed unit of work leaves no partial writes
#[derive(Debug, Error)]
pub enum CapstoneError {
    /// Missing or malformed input. Nothing was persisted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced document does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: u64 },

    /// The evaluator is not on the roster of the attempt being graded.
    #[error("{evaluator} is not assigned to {project} for {defense}")]
    NotAssigned {
        evaluator: EvaluatorId,
        project: ProjectId,
        defense: DefenseId,
    },

    /// Two submissions disagree about the facts of the same sitting.
    #[error("Conflicting judgement for {project} at {defense}: {detail}")]
    ConflictingJudgement {
        project: ProjectId,
        defense: DefenseId,
        detail: String,
    },

    /// The progress codec has no entry for this combination.
    #[error("No {signal} transition defined for {tier} {phase}")]
    UnknownEligibilityTransition {
        tier: Tier,
        phase: Phase,
        signal: &'static str,
    },

    /// A stored progress code does not decode to any defined position.
    #[error("Unknown progress code '{0}'")]
    UnknownProgressCode(String),

    /// A phase already has an attempt that has not been graded.
    #[error("{project} already has an open {phase} attempt")]
    AttemptAlreadyOpen { project: ProjectId, phase: Phase },

    /// The presented access code matches no pending defense.
    #[error("Invalid or exhausted access code")]
    InvalidAccessCode,

    /// A document changed between read and commit.
    #[error("Write conflict on {table} #{id}")]
    WriteConflict { table: &'static str, id: u64 },

    /// One team member's update failed; the whole team update was rolled back.
    #[error("Team update aborted at {student}: {source}")]
    TeamUpdateAborted {
        student: StudentId,
        #[source]
        source: Box<CapstoneError>,
    },

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O or storage engine error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

impl CapstoneError {
    /// Shorthand for a `Validation` error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether retrying the same unit of work could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WriteConflict { .. })
    }
}

// =============================================================================
// TESTS
// =============================================================================
