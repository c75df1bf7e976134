//! # Defense Scheduling
//!
//! Creates a defense instance, opens one attempt per scheduled project and
//! issues one access code per evaluator. Plaintext codes are returned to the
//! caller for delivery through an [`AccessCodeMailer`] after the unit of work
//! has committed.

use crate::access::{self, AccessPolicy, PendingCode};
use crate::model::{Defense, DefenseAttempt, DefenseSlot, Evaluator, Event, Project, RoomAssignment, Student};
use crate::primitives::MAX_ROOMS;
use crate::storage::{DocumentStore, Transaction};
use crate::{CapstoneError, DefenseId, EvaluatorId, EventId, Phase, ProjectId, Step};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Out-of-band delivery of plaintext access codes.
pub trait AccessCodeMailer {
    /// Deliver one code. Failures are reported, never retried by the engine.
    fn send_access_code(
        &mut self,
        email: &str,
        code: &str,
        phase: Phase,
        room: &str,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<(), CapstoneError>;
}

/// One room of a defense plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomPlan {
    pub room: String,
    pub evaluators: Vec<EvaluatorId>,
    pub projects: Vec<ProjectId>,
}

/// Everything needed to schedule one defense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefensePlan {
    pub event: EventId,
    pub phase: Phase,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub rooms: Vec<RoomPlan>,
}

/// A committed defense plus the codes still to be delivered.
#[derive(Debug)]
pub struct ScheduledDefense {
    pub defense: Defense,
    pub codes: Vec<PendingCode>,
}

/// Per-evaluator delivery report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivered: Vec<EvaluatorId>,
    pub failed: Vec<(EvaluatorId, String)>,
}

fn validate_plan_shape(plan: &DefensePlan) -> Result<(), CapstoneError> {
    if plan.rooms.is_empty() {
        return Err(CapstoneError::invalid("a defense needs at least one room"));
    }
    if plan.rooms.len() > MAX_ROOMS {
        return Err(CapstoneError::invalid(format!(
            "{} rooms exceed the maximum of {}",
            plan.rooms.len(),
            MAX_ROOMS
        )));
    }

    let mut rooms = BTreeSet::new();
    let mut projects = BTreeSet::new();
    for room in &plan.rooms {
        let name = room.room.trim();
        if name.is_empty() {
            return Err(CapstoneError::invalid("room name must not be empty"));
        }
        if !rooms.insert(name) {
            return Err(CapstoneError::invalid(format!("room '{}' listed twice", name)));
        }
        if room.evaluators.is_empty() {
            return Err(CapstoneError::invalid(format!("room '{}' has no evaluators", name)));
        }
        if room.projects.is_empty() {
            return Err(CapstoneError::invalid(format!("room '{}' has no projects", name)));
        }
        for project in &room.projects {
            if !projects.insert(*project) {
                return Err(CapstoneError::invalid(format!(
                    "{} is scheduled in more than one room",
                    project
                )));
            }
        }
    }
    Ok(())
}

/// A project is ready for a defense of `phase` when its report is in, every
/// member waits at the eligible-for-defense step and no attempt is open.
fn check_project_ready<S: DocumentStore + ?Sized>(
    tx: &mut Transaction<'_, S>,
    project: &Project,
    event: &Event,
    phase: Phase,
) -> Result<(), CapstoneError> {
    if project.event != event.id {
        return Err(CapstoneError::invalid(format!(
            "{} does not belong to {}",
            project.id, event.id
        )));
    }
    if !project.is_active() {
        return Err(CapstoneError::invalid(format!("{} is not active", project.id)));
    }
    let record = project.phase(phase)?;
    if record.has_graduated_phase {
        return Err(CapstoneError::invalid(format!(
            "{} has already passed its {} defense",
            project.id, phase
        )));
    }
    if record.open_attempt().is_some() {
        return Err(CapstoneError::AttemptAlreadyOpen {
            project: project.id,
            phase,
        });
    }
    if record.report.is_none() {
        return Err(CapstoneError::invalid(format!(
            "{} has no {} report",
            project.id, phase
        )));
    }
    for &member in &project.members {
        let student: Student = tx.load(member)?;
        let ready = student.progress.tier() == Some(project.tier)
            && student.progress.is_at(phase, Step::EligibleForDefense);
        if !ready {
            return Err(CapstoneError::invalid(format!(
                "{} of {} is not eligible for the {} defense (at {})",
                member, project.id, phase, student.progress
            )));
        }
    }
    Ok(())
}

/// Schedule a defense inside `tx`.
pub fn schedule_defense<S: DocumentStore + ?Sized, R: Rng>(
    tx: &mut Transaction<'_, S>,
    rng: &mut R,
    plan: &DefensePlan,
    policy: &AccessPolicy,
    now: DateTime<Utc>,
) -> Result<ScheduledDefense, CapstoneError> {
    validate_plan_shape(plan)?;

    let event: Event = tx.load(plan.event)?;
    if !event.tier.has_phase(plan.phase) {
        return Err(CapstoneError::invalid(format!(
            "{} tier events have no {} defense",
            event.tier, plan.phase
        )));
    }

    let defense_id: DefenseId = tx.allocate::<Defense>()?;

    // Evaluator -> rooms they sit in, for the code notice.
    let mut seats: BTreeMap<EvaluatorId, Vec<&str>> = BTreeMap::new();
    for room in &plan.rooms {
        for &evaluator in &room.evaluators {
            let rooms = seats.entry(evaluator).or_default();
            if !rooms.contains(&room.room.trim()) {
                rooms.push(room.room.trim());
            }
        }
        for &project_id in &room.projects {
            let mut project: Project = tx.load(project_id)?;
            check_project_ready(tx, &project, &event, plan.phase)?;
            project
                .phase_mut(plan.phase)?
                .attempts
                .push(DefenseAttempt::new(defense_id, &room.evaluators));
            tx.put(&project)?;
        }
    }

    let mut codes = Vec::with_capacity(seats.len());
    for (evaluator_id, rooms) in &seats {
        let mut evaluator: Evaluator = tx.load(*evaluator_id)?;
        let plaintext = access::issue(rng, &mut evaluator, defense_id, policy, now);
        tx.put(&evaluator)?;
        codes.push(PendingCode {
            evaluator: *evaluator_id,
            email: evaluator.email.clone(),
            defense: defense_id,
            room: rooms.join(", "),
            plaintext,
        });
    }

    let defense = Defense {
        id: defense_id,
        event: plan.event,
        phase: plan.phase,
        slot: DefenseSlot {
            date: plan.date,
            time: plan.time,
        },
        rooms: plan
            .rooms
            .iter()
            .map(|r| RoomAssignment {
                room: r.room.trim().to_string(),
                evaluators: r.evaluators.clone(),
                projects: r.projects.clone(),
            })
            .collect(),
        created_at: now,
    };
    tx.put(&defense)?;

    tracing::info!(
        defense = %defense_id,
        event = %plan.event,
        phase = %plan.phase,
        rooms = plan.rooms.len(),
        evaluators = codes.len(),
        "defense scheduled"
    );
    Ok(ScheduledDefense { defense, codes })
}

/// Issue a replacement code for a pair whose code is still pending.
pub fn reissue_access_code<S: DocumentStore + ?Sized, R: Rng>(
    tx: &mut Transaction<'_, S>,
    rng: &mut R,
    evaluator_id: EvaluatorId,
    defense_id: DefenseId,
    policy: &AccessPolicy,
    now: DateTime<Utc>,
) -> Result<(Defense, PendingCode), CapstoneError> {
    let defense: Defense = tx.load(defense_id)?;
    let mut evaluator: Evaluator = tx.load(evaluator_id)?;

    let rooms: Vec<&str> = defense
        .rooms
        .iter()
        .filter(|r| r.evaluators.contains(&evaluator_id))
        .map(|r| r.room.as_str())
        .collect();
    if rooms.is_empty() {
        return Err(CapstoneError::invalid(format!(
            "{} does not sit in {}",
            evaluator_id, defense_id
        )));
    }
    if evaluator.code_for(defense_id).is_none() {
        return Err(CapstoneError::invalid(format!(
            "{} has no pending code for {}",
            evaluator_id, defense_id
        )));
    }

    let plaintext = access::issue(rng, &mut evaluator, defense_id, policy, now);
    tx.put(&evaluator)?;
    tracing::info!(evaluator = %evaluator_id, defense = %defense_id, "access code reissued");

    let code = PendingCode {
        evaluator: evaluator_id,
        email: evaluator.email.clone(),
        defense: defense_id,
        room: rooms.join(", "),
        plaintext,
    };
    Ok((defense, code))
}

/// Hand every pending code to `mailer`. Failures are logged and reported.
pub fn deliver_codes(
    mailer: &mut dyn AccessCodeMailer,
    defense: &Defense,
    codes: Vec<PendingCode>,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    for code in codes {
        match mailer.send_access_code(
            &code.email,
            &code.plaintext,
            defense.phase,
            &code.room,
            defense.slot.date,
            defense.slot.time,
        ) {
            Ok(()) => report.delivered.push(code.evaluator),
            Err(e) => {
                tracing::warn!(
                    evaluator = %code.evaluator,
                    defense = %defense.id,
                    error = %e,
                    "access code delivery failed"
                );
                report.failed.push((code.evaluator, e.to_string()));
            }
        }
    }
    report
}
