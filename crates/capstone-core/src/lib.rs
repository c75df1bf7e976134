//! # capstone-core
//!
//! The deterministic engine behind Capstone: an academic progress state
//! machine combined with a multi-evaluator defense-consensus protocol.
//!
//! It tracks where every student and project stands (tier × phase × step),
//! reconciles independent evaluator submissions into one authoritative
//! judgement, and turns that judgement into team-wide progress transitions.
//!
//! ## Control Flow
//!
//! ```text
//! submit_evaluation ─► consensus ─► (attempt graded?) ─► resolver ─► progress codec
//!                                                    └─► access-code revocation
//! match_supervisors ─► preview ─► commit_matched_supervisors
//! ```
//!
//! ## Architectural Constraints
//!
//! - No async, no network dependencies (pure Rust)
//! - BTreeMap/BTreeSet only; integer arithmetic only
//! - Every mutating operation commits one change set or nothing
//! - Mail delivery is the only injected collaborator

// =============================================================================
// MODULES
// =============================================================================

pub mod access;
pub mod consensus;
pub mod judgement;
pub mod matching;
pub mod model;
pub mod primitives;
pub mod progress;
pub mod registry;
pub mod resolver;
pub mod schedule;
pub mod session;
pub mod storage;
pub mod types;
pub mod workflow;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    CapstoneError, DefenseId, EvaluationId, EvaluatorId, EventId, Phase, ProjectId,
    ProjectStatus, Step, StudentId, SupervisorId, Tier,
};

// =============================================================================
// RE-EXPORTS: Lifecycle
// =============================================================================

pub use judgement::{FinalJudgement, Judgement, JudgementClass, MidJudgement, ProposalJudgement};
pub use model::{
    AccessCode, Defense, DefenseAttempt, DefenseSlot, Evaluation, Evaluator, EvaluatorAssignment,
    Event, IndividualScore, PhaseRecord, Project, Report, RoomAssignment, Student, Supervisor,
};
pub use progress::{
    EligibilitySignal, NextCode, Position, ProgressStatus, next_code, next_required_defense_phase,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use access::{AccessPolicy, EvaluatorGrant};
pub use consensus::{EvaluationRequest, SubmissionOutcome, SubmissionStatus};
pub use matching::{MatchPlan, MatchResult, SupervisorMatch};
pub use resolver::Resolution;
pub use schedule::{AccessCodeMailer, DefensePlan, DeliveryReport, RoomPlan};
pub use session::{ResumedAttempt, ScheduleOutcome, Session, StorageBackend};
pub use storage::{ChangeSet, Document, DocumentStore, MemoryStore, RedbStore, Transaction};
pub use workflow::NewTeam;
