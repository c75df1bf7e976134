//! # Document Model
//!
//! The persisted documents of the engine. Cross-document links are plain
//! identifiers (a document store with referential fields); nothing here
//! performs I/O.
//!
//! Invariants owned by these types:
//! - `DefenseAttempt::is_graded` is monotonic and true exactly when every
//!   assigned evaluator has evaluated.
//! - A `PhaseRecord` holds at most one open (ungraded) attempt.
//! - `Student::is_associated` implies `Student::project` is set.

use crate::judgement::{Judgement, JudgementClass};
use crate::progress::ProgressStatus;
use crate::storage::Document;
use crate::{
    CapstoneError, DefenseId, EvaluationId, EvaluatorId, EventId, Phase, ProjectId,
    ProjectStatus, StudentId, SupervisorId, Tier,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// STUDENT
// =============================================================================

/// A registered student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub email: String,
    pub academic_year: u8,
    /// The sole authoritative lifecycle pointer. Stored as the legacy code.
    pub progress: ProgressStatus,
    pub is_associated: bool,
    pub project: Option<ProjectId>,
}

impl Student {
    /// Bind the student to an active project.
    pub fn associate(&mut self, project: ProjectId) {
        self.project = Some(project);
        self.is_associated = true;
    }

    /// Detach from the current project. `keep_history` retains the reference
    /// to a completed project while clearing the association flag.
    pub fn detach(&mut self, keep_history: bool) {
        self.is_associated = false;
        if !keep_history {
            self.project = None;
        }
    }
}

// =============================================================================
// PROJECT
// =============================================================================

/// The report uploaded for one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub file_path: String,
    pub submitted_by: StudentId,
    pub submitted_on: DateTime<Utc>,
}

/// One evaluator on an attempt's roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorAssignment {
    pub evaluator: EvaluatorId,
    pub has_evaluated: bool,
}

/// One scheduled sitting of a defense for a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefenseAttempt {
    pub defense: DefenseId,
    pub assignments: Vec<EvaluatorAssignment>,
    pub is_graded: bool,
    /// Outcome class applied by the resolver; `None` until resolved.
    pub resolution: Option<JudgementClass>,
}

impl DefenseAttempt {
    /// A fresh attempt with every evaluator pending.
    #[must_use]
    pub fn new(defense: DefenseId, evaluators: &[EvaluatorId]) -> Self {
        let mut seen = BTreeSet::new();
        let assignments = evaluators
            .iter()
            .filter(|e| seen.insert(**e))
            .map(|&evaluator| EvaluatorAssignment {
                evaluator,
                has_evaluated: false,
            })
            .collect();
        Self {
            defense,
            assignments,
            is_graded: false,
            resolution: None,
        }
    }

    #[must_use]
    pub fn is_assigned(&self, evaluator: EvaluatorId) -> bool {
        self.assignments.iter().any(|a| a.evaluator == evaluator)
    }

    #[must_use]
    pub fn has_evaluated(&self, evaluator: EvaluatorId) -> bool {
        self.assignments
            .iter()
            .any(|a| a.evaluator == evaluator && a.has_evaluated)
    }

    /// Mark `evaluator` as done and recompute `is_graded`.
    ///
    /// Returns `true` if this call flipped the attempt to graded.
    pub fn mark_evaluated(&mut self, evaluator: EvaluatorId) -> bool {
        for a in &mut self.assignments {
            if a.evaluator == evaluator {
                a.has_evaluated = true;
            }
        }
        let was_graded = self.is_graded;
        let all = !self.assignments.is_empty() && self.assignments.iter().all(|a| a.has_evaluated);
        self.is_graded = was_graded || all;
        !was_graded && self.is_graded
    }

    /// Number of evaluators still to submit.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.assignments.iter().filter(|a| !a.has_evaluated).count()
    }
}

/// Everything recorded for one phase of a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub attempts: Vec<DefenseAttempt>,
    pub has_graduated_phase: bool,
    pub report: Option<Report>,
    /// Append-only audit trail.
    pub evaluations: Vec<EvaluationId>,
}

impl PhaseRecord {
    /// The attempt that has not been graded yet, if any.
    #[must_use]
    pub fn open_attempt(&self) -> Option<&DefenseAttempt> {
        self.attempts.iter().find(|a| !a.is_graded)
    }

    #[must_use]
    pub fn attempt_for(&self, defense: DefenseId) -> Option<&DefenseAttempt> {
        self.attempts.iter().find(|a| a.defense == defense)
    }

    pub fn attempt_for_mut(&mut self, defense: DefenseId) -> Option<&mut DefenseAttempt> {
        self.attempts.iter_mut().find(|a| a.defense == defense)
    }
}

/// A team project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub event: EventId,
    pub title: String,
    pub tier: Tier,
    pub status: ProjectStatus,
    /// Fixed at creation.
    pub members: Vec<StudentId>,
    pub categories: BTreeSet<String>,
    pub supervisor: Option<SupervisorId>,
    pub phases: BTreeMap<Phase, PhaseRecord>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Empty phase records for every phase of `tier`.
    #[must_use]
    pub fn empty_phases(tier: Tier) -> BTreeMap<Phase, PhaseRecord> {
        tier.phases()
            .iter()
            .map(|&p| (p, PhaseRecord::default()))
            .collect()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == ProjectStatus::Active
    }

    #[must_use]
    pub fn has_member(&self, student: StudentId) -> bool {
        self.members.contains(&student)
    }

    pub fn phase(&self, phase: Phase) -> Result<&PhaseRecord, CapstoneError> {
        self.phases.get(&phase).ok_or_else(|| {
            CapstoneError::Validation(format!(
                "{} tier project {} has no {} phase",
                self.tier, self.id, phase
            ))
        })
    }

    pub fn phase_mut(&mut self, phase: Phase) -> Result<&mut PhaseRecord, CapstoneError> {
        let (tier, id) = (self.tier, self.id);
        self.phases.get_mut(&phase).ok_or_else(|| {
            CapstoneError::Validation(format!(
                "{} tier project {} has no {} phase",
                tier, id, phase
            ))
        })
    }

    /// The tier's last phase.
    #[must_use]
    pub fn is_final_phase(&self, phase: Phase) -> bool {
        self.tier.phases().last() == Some(&phase)
    }
}

// =============================================================================
// EVALUATION
// =============================================================================

/// One evaluator's marks for one student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndividualScore {
    pub student: StudentId,
    pub absent: bool,
    pub marks: u16,
}

/// Immutable record of one evaluator's submission for one sitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: EvaluationId,
    pub project: ProjectId,
    pub evaluator: EvaluatorId,
    pub defense: DefenseId,
    pub phase: Phase,
    pub scores: Vec<IndividualScore>,
    pub judgement: Judgement,
    pub remarks: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl Evaluation {
    /// Absence flags keyed by student, for order-independent comparison.
    #[must_use]
    pub fn absence_pattern(&self) -> BTreeMap<StudentId, bool> {
        absence_pattern(&self.scores)
    }
}

/// Absence flags keyed by student.
#[must_use]
pub fn absence_pattern(scores: &[IndividualScore]) -> BTreeMap<StudentId, bool> {
    scores.iter().map(|s| (s.student, s.absent)).collect()
}

// =============================================================================
// EVALUATOR
// =============================================================================

/// Stored form of a one-time access code. The plaintext is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCode {
    pub defense: DefenseId,
    /// Hex-encoded random salt.
    pub salt: String,
    /// Hex-encoded blake3 digest of salt and code.
    pub hash: String,
    pub issued_at: DateTime<Utc>,
}

/// A committee member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluator {
    pub id: EvaluatorId,
    pub name: String,
    pub email: String,
    pub access_codes: Vec<AccessCode>,
}

impl Evaluator {
    #[must_use]
    pub fn code_for(&self, defense: DefenseId) -> Option<&AccessCode> {
        self.access_codes.iter().find(|c| c.defense == defense)
    }

    /// Replace (or add) the code for `code.defense`.
    pub fn store_code(&mut self, code: AccessCode) {
        self.access_codes.retain(|c| c.defense != code.defense);
        self.access_codes.push(code);
    }

    /// Clear the code for `defense`. Returns `true` if one was present.
    pub fn revoke_code(&mut self, defense: DefenseId) -> bool {
        let before = self.access_codes.len();
        self.access_codes.retain(|c| c.defense != defense);
        self.access_codes.len() != before
    }
}

// =============================================================================
// DEFENSE / EVENT / SUPERVISOR
// =============================================================================

/// Evaluators and projects sharing one room during a defense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomAssignment {
    pub room: String,
    pub evaluators: Vec<EvaluatorId>,
    pub projects: Vec<ProjectId>,
}

/// Date and start time of a defense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefenseSlot {
    pub date: NaiveDate,
    pub time: NaiveTime,
}

/// One scheduled defense instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defense {
    pub id: DefenseId,
    pub event: EventId,
    pub phase: Phase,
    pub slot: DefenseSlot,
    pub rooms: Vec<RoomAssignment>,
    pub created_at: DateTime<Utc>,
}

impl Defense {
    /// Every project the evaluator has to grade in this defense.
    #[must_use]
    pub fn projects_for(&self, evaluator: EvaluatorId) -> BTreeSet<ProjectId> {
        self.rooms
            .iter()
            .filter(|r| r.evaluators.contains(&evaluator))
            .flat_map(|r| r.projects.iter().copied())
            .collect()
    }

    /// Distinct evaluators across all rooms.
    #[must_use]
    pub fn evaluators(&self) -> BTreeSet<EvaluatorId> {
        self.rooms
            .iter()
            .flat_map(|r| r.evaluators.iter().copied())
            .collect()
    }
}

/// An academic event (one tier, one year).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    pub tier: Tier,
    pub year: u16,
    pub created_at: DateTime<Utc>,
}

/// A faculty member who can supervise projects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supervisor {
    pub id: SupervisorId,
    pub name: String,
    pub email: String,
    pub tags: BTreeSet<String>,
}

// =============================================================================
// DOCUMENT BINDINGS
// =============================================================================

macro_rules! document {
    ($doc:ty, $id:ident, $table:literal, $kind:literal) => {
        impl Document for $doc {
            type Id = $id;
            const TABLE: &'static str = $table;
            const KIND: &'static str = $kind;

            fn id(&self) -> $id {
                self.id
            }

            fn raw_id(id: $id) -> u64 {
                id.0
            }

            fn from_raw(raw: u64) -> $id {
                $id(raw)
            }
        }
    };
}

document!(Student, StudentId, "students", "Student");
document!(Project, ProjectId, "projects", "Project");
document!(Evaluator, EvaluatorId, "evaluators", "Evaluator");
document!(Evaluation, EvaluationId, "evaluations", "Evaluation");
document!(Defense, DefenseId, "defenses", "Defense");
document!(Event, EventId, "events", "Event");
document!(Supervisor, SupervisorId, "supervisors", "Supervisor");

/// Every document table, for backends that create tables up front.
pub const ALL_TABLES: [&str; 7] = [
    Student::TABLE,
    Project::TABLE,
    Evaluator::TABLE,
    Evaluation::TABLE,
    Defense::TABLE,
    Event::TABLE,
    Supervisor::TABLE,
];

// =============================================================================
// TESTS
// =============================================================================
