//! # Judgement Resolver
//!
//! Turns the outcome of one graded attempt into team-wide effects:
//!
//! | Class        | Members                          | Project / phase                          |
//! |--------------|----------------------------------|------------------------------------------|
//! | Pass         | `defensePass`                    | `has_graduated_phase`; final phase: Complete |
//! | Retry/Absent | `defenseFail`                    | report cleared                           |
//! | Reject       | `rejected`, detached             | report cleared, Archived                 |
//!
//! A pass of a tier's final phase detaches every member. Members of the
//! terminal tier also lose the project reference; members moving on to the
//! next tier keep it as history of a completed project.
//!
//! Rejection only has a codec transition in the proposal phase; anywhere else
//! the first member update fails and the team update aborts.
//!
//! All member updates are staged in the caller's transaction. The first
//! failing member aborts the whole team update with `TeamUpdateAborted`, and
//! nothing is committed.

use crate::judgement::JudgementClass;
use crate::model::{Project, Student};
use crate::progress::{self, EligibilitySignal, ProgressStatus};
use crate::storage::{DocumentStore, Transaction};
use crate::{CapstoneError, DefenseId, Phase, ProjectStatus, StudentId};
use serde::Serialize;

/// What one resolution changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub class: JudgementClass,
    pub phase: Phase,
    pub project_status: ProjectStatus,
    /// New progress code of every member, in team order.
    pub members: Vec<(StudentId, ProgressStatus)>,
}

/// Signal the resolver feeds the codec for each outcome class.
#[must_use]
pub fn signal_for(class: JudgementClass) -> EligibilitySignal {
    match class {
        JudgementClass::Pass => EligibilitySignal::DefensePass,
        JudgementClass::Retry | JudgementClass::Absent => EligibilitySignal::DefenseFail,
        JudgementClass::Reject => EligibilitySignal::Rejected,
    }
}

/// Resolve the attempt of `project` for `defense` in `phase`.
///
/// `project` is the caller's in-flight copy; the caller persists it.
/// Returns `None` when the attempt was already resolved or the project
/// state already reflects `class`.
pub fn resolve<S: DocumentStore + ?Sized>(
    tx: &mut Transaction<'_, S>,
    project: &mut Project,
    phase: Phase,
    defense: DefenseId,
    class: JudgementClass,
) -> Result<Option<Resolution>, CapstoneError> {
    let attempt = project
        .phase(phase)?
        .attempt_for(defense)
        .ok_or(CapstoneError::NotFound {
            kind: "DefenseAttempt",
            id: defense.value(),
        })?;
    if !attempt.is_graded {
        return Err(CapstoneError::invalid(format!(
            "{} attempt at {} is not graded yet",
            project.id, defense
        )));
    }
    if attempt.resolution.is_some() {
        return Ok(None);
    }

    if already_reflected(tx, project, phase, class)? {
        tracing::info!(
            project = %project.id,
            %defense,
            ?class,
            "resolution already applied, recording marker only"
        );
        mark_resolved(project, phase, defense, class)?;
        return Ok(None);
    }

    let tier = project.tier;
    let final_phase = project.is_final_phase(phase);
    let signal = signal_for(class);

    let mut members = Vec::with_capacity(project.members.len());
    for &student_id in &project.members {
        let status = update_member(tx, project, student_id, phase, signal, class, final_phase)
            .map_err(|source| CapstoneError::TeamUpdateAborted {
                student: student_id,
                source: Box::new(source),
            })?;
        members.push((student_id, status));
    }

    let record = project.phase_mut(phase)?;
    if class.is_pass() {
        record.has_graduated_phase = true;
    }
    if class.invalidates_report() {
        record.report = None;
    }
    match class {
        JudgementClass::Pass if final_phase => project.status = ProjectStatus::Complete,
        JudgementClass::Reject => project.status = ProjectStatus::Archived,
        _ => {}
    }
    mark_resolved(project, phase, defense, class)?;

    tracing::info!(
        project = %project.id,
        %defense,
        %phase,
        %tier,
        ?class,
        members = members.len(),
        "attempt resolved"
    );

    Ok(Some(Resolution {
        class,
        phase,
        project_status: project.status,
        members,
    }))
}

fn mark_resolved(
    project: &mut Project,
    phase: Phase,
    defense: DefenseId,
    class: JudgementClass,
) -> Result<(), CapstoneError> {
    if let Some(attempt) = project.phase_mut(phase)?.attempt_for_mut(defense) {
        attempt.resolution = Some(class);
    }
    Ok(())
}

fn update_member<S: DocumentStore + ?Sized>(
    tx: &mut Transaction<'_, S>,
    project: &Project,
    student_id: StudentId,
    phase: Phase,
    signal: EligibilitySignal,
    class: JudgementClass,
    final_phase: bool,
) -> Result<ProgressStatus, CapstoneError> {
    let mut student: Student = tx.load(student_id)?;

    let position = student.progress.position().ok_or_else(|| {
        CapstoneError::invalid(format!("{} has already graduated", student_id))
    })?;
    if position.tier != project.tier || position.phase != phase {
        return Err(CapstoneError::invalid(format!(
            "{} is at {} {} but {} is resolving {} {}",
            student_id, position.tier, position.phase, project.id, project.tier, phase
        )));
    }
    if student.project != Some(project.id) {
        return Err(CapstoneError::invalid(format!(
            "{} is not bound to {}",
            student_id, project.id
        )));
    }

    student.progress = progress::advance(project.tier, phase, signal)?;
    match class {
        JudgementClass::Pass if final_phase => {
            student.detach(project.tier.next().is_some());
        }
        JudgementClass::Reject => student.detach(false),
        _ => {}
    }

    tx.put(&student)?;
    Ok(student.progress)
}

/// Whether the project already shows the effects of `class` for `phase`.
fn already_reflected<S: DocumentStore + ?Sized>(
    tx: &mut Transaction<'_, S>,
    project: &Project,
    phase: Phase,
    class: JudgementClass,
) -> Result<bool, CapstoneError> {
    let record = project.phase(phase)?;
    match class {
        JudgementClass::Pass => Ok(record.has_graduated_phase
            && (!project.is_final_phase(phase) || project.status == ProjectStatus::Complete)),
        JudgementClass::Reject => Ok(project.status == ProjectStatus::Archived),
        JudgementClass::Retry | JudgementClass::Absent => {
            if record.report.is_some() {
                return Ok(false);
            }
            let failed = progress::advance(project.tier, phase, EligibilitySignal::DefenseFail)?;
            for &student_id in &project.members {
                let student: Student = tx.load(student_id)?;
                if student.progress != failed {
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_classes_map_to_codec_signals() {
        assert_eq!(signal_for(JudgementClass::Pass), EligibilitySignal::DefensePass);
        assert_eq!(signal_for(JudgementClass::Retry), EligibilitySignal::DefenseFail);
        assert_eq!(signal_for(JudgementClass::Absent), EligibilitySignal::DefenseFail);
        assert_eq!(signal_for(JudgementClass::Reject), EligibilitySignal::Rejected);
    }
}
