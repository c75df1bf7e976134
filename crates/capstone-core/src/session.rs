//! # Session Module
//!
//! The engine's entry point: one storage backend plus the access policy.
//!
//! Every mutating operation runs as one unit of work: it executes against
//! a [`Transaction`], and the resulting [`ChangeSet`](crate::storage::ChangeSet)
//! is applied atomically. A `WriteConflict` re-runs the whole unit of work
//! from fresh reads, up to [`MAX_COMMIT_ATTEMPTS`] times.
//!
//! ## Storage Backends
//!
//! - `InMemory`: [`MemoryStore`] (fast, volatile)
//! - `Persistent`: [`RedbStore`] (ACID, disk-backed)

use crate::access::{self, AccessPolicy, EvaluatorGrant};
use crate::consensus::{self, EvaluationRequest, SubmissionOutcome};
use crate::matching::{self, MatchResult, SupervisorMatch};
use crate::model::{Evaluation, Evaluator, Event, Project, Student, Supervisor};
use crate::primitives::MAX_COMMIT_ATTEMPTS;
use crate::progress;
use crate::registry;
use crate::resolver::{self, Resolution};
use crate::schedule::{self, AccessCodeMailer, DefensePlan, DeliveryReport};
use crate::storage::{ChangeSet, Document, DocumentStore, MemoryStore, RedbStore, Stored, Transaction};
use crate::workflow::{self, NewTeam};
use crate::{
    CapstoneError, DefenseId, EvaluatorId, EventId, Phase, ProjectId, StudentId, SupervisorId, Tier,
};
use chrono::Utc;
use serde::Serialize;
use std::path::Path;

/// Storage backend for a Session.
#[derive(Debug)]
pub enum StorageBackend {
    /// In-memory tables (fast, volatile).
    InMemory(MemoryStore),
    /// Disk-backed tables using redb (ACID, persistent).
    Persistent(RedbStore),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(MemoryStore::new())
    }
}

impl DocumentStore for StorageBackend {
    fn read(&self, table: &'static str, id: u64) -> Result<Option<Stored>, CapstoneError> {
        match self {
            Self::InMemory(s) => s.read(table, id),
            Self::Persistent(s) => s.read(table, id),
        }
    }

    fn scan(&self, table: &'static str) -> Result<Vec<(u64, Stored)>, CapstoneError> {
        match self {
            Self::InMemory(s) => s.scan(table),
            Self::Persistent(s) => s.scan(table),
        }
    }

    fn sequence(&self, table: &'static str) -> Result<u64, CapstoneError> {
        match self {
            Self::InMemory(s) => s.sequence(table),
            Self::Persistent(s) => s.sequence(table),
        }
    }

    fn apply(&mut self, changes: ChangeSet) -> Result<(), CapstoneError> {
        match self {
            Self::InMemory(s) => s.apply(changes),
            Self::Persistent(s) => s.apply(changes),
        }
    }
}

/// Outcome of scheduling a defense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleOutcome {
    pub defense: DefenseId,
    pub delivery: DeliveryReport,
}

/// One attempt picked up by [`Session::resume_pending_resolutions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumedAttempt {
    pub project: ProjectId,
    pub phase: Phase,
    pub defense: DefenseId,
    /// `None` when the project already reflected the outcome.
    pub resolution: Option<Resolution>,
}

/// The engine session.
#[derive(Debug, Default)]
pub struct Session {
    backend: StorageBackend,
    policy: AccessPolicy,
}

impl Session {
    /// Create a session with in-memory storage.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Create a session over an existing in-memory store.
    #[must_use]
    pub fn with_store(store: MemoryStore) -> Self {
        Self {
            backend: StorageBackend::InMemory(store),
            policy: AccessPolicy::default(),
        }
    }

    /// Create a session with persistent redb storage.
    pub fn with_redb(path: impl AsRef<Path>) -> Result<Self, CapstoneError> {
        Ok(Self {
            backend: StorageBackend::Persistent(RedbStore::open(path)?),
            policy: AccessPolicy::default(),
        })
    }

    /// Replace the access policy.
    pub fn with_policy(mut self, policy: AccessPolicy) -> Result<Self, CapstoneError> {
        policy.validate()?;
        self.policy = policy;
        Ok(self)
    }

    #[must_use]
    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    #[must_use]
    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }

    // =========================================================================
    // UNITS OF WORK
    // =========================================================================

    /// Run `work` as one atomic unit, retrying on write conflicts.
    pub fn transact<T>(
        &mut self,
        operation: &'static str,
        mut work: impl FnMut(&mut Transaction<'_, StorageBackend>) -> Result<T, CapstoneError>,
    ) -> Result<T, CapstoneError> {
        let mut attempt = 1;
        loop {
            let (value, changes) = {
                let mut tx = Transaction::begin(&self.backend);
                let value = work(&mut tx)?;
                (value, tx.into_changes())
            };
            let writes = changes.write_count();
            match self.backend.apply(changes) {
                Ok(()) => {
                    tracing::debug!(operation, writes, attempt, "unit of work committed");
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < MAX_COMMIT_ATTEMPTS => {
                    tracing::warn!(operation, attempt, error = %e, "write conflict, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(operation, attempt, error = %e, "unit of work rolled back");
                    return Err(e);
                }
            }
        }
    }

    /// Run a read-only query; staged writes are discarded.
    pub fn read<T>(
        &self,
        query: impl FnOnce(&mut Transaction<'_, StorageBackend>) -> Result<T, CapstoneError>,
    ) -> Result<T, CapstoneError> {
        let mut tx = Transaction::begin(&self.backend);
        query(&mut tx)
    }

    /// Fetch one document.
    pub fn get<D: Document>(&self, id: D::Id) -> Result<D, CapstoneError> {
        self.read(|tx| tx.load::<D>(id))
    }

    /// Every document of one kind, in id order.
    pub fn list<D: Document>(&self) -> Result<Vec<D>, CapstoneError> {
        self.read(|tx| tx.scan::<D>())
    }

    // =========================================================================
    // REGISTRATION
    // =========================================================================

    pub fn register_student(
        &mut self,
        name: &str,
        email: &str,
        academic_year: u8,
    ) -> Result<Student, CapstoneError> {
        self.transact("register_student", |tx| {
            registry::register_student(tx, name, email, academic_year)
        })
    }

    pub fn register_evaluator(&mut self, name: &str, email: &str) -> Result<Evaluator, CapstoneError> {
        self.transact("register_evaluator", |tx| {
            registry::register_evaluator(tx, name, email)
        })
    }

    pub fn register_supervisor(
        &mut self,
        name: &str,
        email: &str,
        tags: &[String],
    ) -> Result<Supervisor, CapstoneError> {
        self.transact("register_supervisor", |tx| {
            registry::register_supervisor(tx, name, email, tags)
        })
    }

    pub fn create_event(&mut self, title: &str, tier: Tier, year: u16) -> Result<Event, CapstoneError> {
        let now = Utc::now();
        self.transact("create_event", |tx| {
            registry::create_event(tx, title, tier, year, now)
        })
    }

    // =========================================================================
    // TEAM WORKFLOW
    // =========================================================================

    pub fn create_team(&mut self, team: &NewTeam) -> Result<Project, CapstoneError> {
        let now = Utc::now();
        self.transact("create_team", |tx| workflow::create_team(tx, team, now))
    }

    pub fn submit_report(
        &mut self,
        project: ProjectId,
        student: StudentId,
        phase: Phase,
        file_path: &str,
    ) -> Result<Project, CapstoneError> {
        let now = Utc::now();
        self.transact("submit_report", |tx| {
            workflow::submit_report(tx, project, student, phase, file_path, now)
        })
    }

    pub fn reopen_report_submission(&mut self, project: ProjectId) -> Result<Phase, CapstoneError> {
        self.transact("reopen_report_submission", |tx| {
            workflow::reopen_report_submission(tx, project)
        })
    }

    pub fn approve_by_supervisor(
        &mut self,
        project: ProjectId,
        supervisor: SupervisorId,
    ) -> Result<Phase, CapstoneError> {
        self.transact("approve_by_supervisor", |tx| {
            workflow::approve_by_supervisor(tx, project, supervisor)
        })
    }

    // =========================================================================
    // DEFENSES AND ACCESS CODES
    // =========================================================================

    /// Schedule a defense, then deliver every access code through `mailer`.
    ///
    /// Delivery happens after commit; failed deliveries are reported, and the
    /// affected codes can be re-sent with [`Session::reissue_access_code`].
    pub fn schedule_defense(
        &mut self,
        plan: &DefensePlan,
        mailer: &mut dyn AccessCodeMailer,
    ) -> Result<ScheduleOutcome, CapstoneError> {
        let now = Utc::now();
        let policy = self.policy;
        let mut rng = rand::thread_rng();
        let scheduled = self.transact("schedule_defense", |tx| {
            schedule::schedule_defense(tx, &mut rng, plan, &policy, now)
        })?;
        let defense = scheduled.defense.id;
        let delivery = schedule::deliver_codes(mailer, &scheduled.defense, scheduled.codes);
        Ok(ScheduleOutcome { defense, delivery })
    }

    /// Replace a pending code and deliver the new one.
    pub fn reissue_access_code(
        &mut self,
        evaluator: EvaluatorId,
        defense: DefenseId,
        mailer: &mut dyn AccessCodeMailer,
    ) -> Result<DeliveryReport, CapstoneError> {
        let now = Utc::now();
        let policy = self.policy;
        let mut rng = rand::thread_rng();
        let (defense_doc, code) = self.transact("reissue_access_code", |tx| {
            schedule::reissue_access_code(tx, &mut rng, evaluator, defense, &policy, now)
        })?;
        Ok(schedule::deliver_codes(mailer, &defense_doc, vec![code]))
    }

    /// Log an evaluator in with a plaintext access code.
    pub fn authenticate(
        &self,
        evaluator: EvaluatorId,
        code: &str,
    ) -> Result<EvaluatorGrant, CapstoneError> {
        let now = Utc::now();
        let result = self.read(|tx| access::authenticate(tx, evaluator, code, &self.policy, now));
        if result.is_err() {
            tracing::warn!(%evaluator, "access code rejected");
        }
        result
    }

    /// Submit an evaluation under an evaluator grant.
    pub fn submit_evaluation(
        &mut self,
        grant: &EvaluatorGrant,
        request: &EvaluationRequest,
    ) -> Result<SubmissionOutcome, CapstoneError> {
        let now = Utc::now();
        if !grant.permits(request.evaluator, request.defense, now) {
            return Err(CapstoneError::InvalidAccessCode);
        }
        self.transact("submit_evaluation", |tx| {
            consensus::submit_evaluation(tx, request, now)
        })
    }

    /// Run the resolver for graded attempts that carry no resolution.
    pub fn resume_pending_resolutions(&mut self) -> Result<Vec<ResumedAttempt>, CapstoneError> {
        let resumed = self.transact("resume_pending_resolutions", |tx| {
            let mut resumed = Vec::new();
            for mut project in tx.scan::<Project>()? {
                let pending: Vec<(Phase, DefenseId)> = project
                    .phases
                    .iter()
                    .flat_map(|(phase, record)| {
                        record
                            .attempts
                            .iter()
                            .filter(|a| a.is_graded && a.resolution.is_none())
                            .map(|a| (*phase, a.defense))
                    })
                    .collect();
                if pending.is_empty() {
                    continue;
                }

                for (phase, defense) in pending {
                    let mut class = None;
                    for &id in &project.phase(phase)?.evaluations {
                        let evaluation: Evaluation = tx.load(id)?;
                        if evaluation.defense == defense {
                            class = Some(evaluation.judgement.classify());
                            break;
                        }
                    }
                    let Some(class) = class else {
                        tracing::warn!(project = %project.id, %defense, "graded attempt has no evaluations");
                        continue;
                    };
                    let resolution = resolver::resolve(tx, &mut project, phase, defense, class)?;
                    resumed.push(ResumedAttempt {
                        project: project.id,
                        phase,
                        defense,
                        resolution,
                    });
                }
                tx.put(&project)?;
            }
            Ok(resumed)
        })?;
        tracing::info!(count = resumed.len(), "pending resolutions resumed");
        Ok(resumed)
    }

    // =========================================================================
    // SUPERVISOR MATCHING
    // =========================================================================

    /// Preview a supervisor assignment. Nothing is written.
    pub fn match_supervisors(
        &self,
        event: EventId,
        available: &[SupervisorId],
    ) -> Result<MatchResult, CapstoneError> {
        self.read(|tx| matching::match_supervisors(tx, event, available))
    }

    /// Persist a confirmed assignment atomically.
    pub fn commit_matched_supervisors(
        &mut self,
        matches: &[SupervisorMatch],
    ) -> Result<Vec<Project>, CapstoneError> {
        self.transact("commit_matched_supervisors", |tx| {
            matching::commit_matched_supervisors(tx, matches)
        })
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// The phase of the student's next required defense, `None` if unknown.
    pub fn next_required_defense_phase(&self, student: StudentId) -> Result<Option<Phase>, CapstoneError> {
        let student: Student = self.get(student)?;
        Ok(progress::next_required_defense_phase(&student.progress.encode()))
    }

    /// Evaluations recorded for one phase of a project, in submission order.
    pub fn evaluations_for(
        &self,
        project: ProjectId,
        phase: Phase,
    ) -> Result<Vec<Evaluation>, CapstoneError> {
        self.read(|tx| {
            let project: Project = tx.load(project)?;
            project
                .phase(phase)?
                .evaluations
                .iter()
                .map(|&id| tx.load::<Evaluation>(id))
                .collect()
        })
    }
}
