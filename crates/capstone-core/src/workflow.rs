//! # Team Workflow
//!
//! The operator-driven transitions outside defense grading:
//! - `createTeam`: form a project and move every member to report submission
//! - `eligibleForDefense`: a report is uploaded for the current phase
//! - `eligibleForReportSubmission`: re-open submission after a failed attempt
//! - `approvalFromSupervisor`: supervisor releases a mid/final phase
//!
//! Each operation changes every member or none of them.

use crate::judgement::JudgementClass;
use crate::model::{Event, Project, Report, Student, Supervisor};
use crate::primitives::{MAX_NAME_LENGTH, MAX_TAGS, MAX_TEAM_SIZE};
use crate::progress::{self, EligibilitySignal, Position, ProgressStatus};
use crate::storage::{DocumentStore, Transaction};
use crate::{CapstoneError, EventId, Phase, ProjectId, ProjectStatus, Step, StudentId, SupervisorId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Input for [`create_team`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTeam {
    pub event: EventId,
    pub title: String,
    pub members: Vec<StudentId>,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// Trim, lowercase and de-duplicate category tags.
pub fn normalize_tags(tags: &[String]) -> Result<BTreeSet<String>, CapstoneError> {
    let set: BTreeSet<String> = tags
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    if set.len() > MAX_TAGS {
        return Err(CapstoneError::invalid(format!(
            "{} tags exceed the maximum of {}",
            set.len(),
            MAX_TAGS
        )));
    }
    if let Some(tag) = set.iter().find(|t| t.len() > MAX_NAME_LENGTH) {
        return Err(CapstoneError::invalid(format!("tag '{}' is too long", tag)));
    }
    Ok(set)
}

/// Apply `signal` to every member, wrapping the first failure.
fn apply_to_team<S: DocumentStore + ?Sized>(
    tx: &mut Transaction<'_, S>,
    members: Vec<Student>,
    signal: EligibilitySignal,
    position: Position,
    mut extra: impl FnMut(&mut Student),
) -> Result<ProgressStatus, CapstoneError> {
    let next = progress::advance(position.tier, position.phase, signal)?;
    for mut student in members {
        let id = student.id;
        student.progress = next;
        extra(&mut student);
        tx.put(&student)
            .map_err(|source| CapstoneError::TeamUpdateAborted {
                student: id,
                source: Box::new(source),
            })?;
    }
    Ok(next)
}

/// Load every member and require one shared position in the project's tier.
fn team_position<S: DocumentStore + ?Sized>(
    tx: &mut Transaction<'_, S>,
    project: &Project,
) -> Result<(Vec<Student>, Position), CapstoneError> {
    let mut members = Vec::with_capacity(project.members.len());
    let mut shared: Option<Position> = None;
    for &id in &project.members {
        let student: Student = tx.load(id)?;
        let position = student.progress.position().ok_or_else(|| {
            CapstoneError::invalid(format!("{} has already graduated", id))
        })?;
        if position.tier != project.tier {
            return Err(CapstoneError::invalid(format!(
                "{} is in the {} tier, {} is {}",
                id, position.tier, project.id, project.tier
            )));
        }
        match shared {
            None => shared = Some(position),
            Some(p) if p != position => {
                return Err(CapstoneError::invalid(format!(
                    "members of {} are out of step ({} vs {})",
                    project.id,
                    ProgressStatus::Active(p),
                    ProgressStatus::Active(position)
                )));
            }
            Some(_) => {}
        }
        members.push(student);
    }
    let position =
        shared.ok_or_else(|| CapstoneError::invalid(format!("{} has no members", project.id)))?;
    Ok((members, position))
}

fn load_active<S: DocumentStore + ?Sized>(
    tx: &mut Transaction<'_, S>,
    id: ProjectId,
) -> Result<Project, CapstoneError> {
    let project: Project = tx.load(id)?;
    if !project.is_active() {
        return Err(CapstoneError::invalid(format!("{} is not active", id)));
    }
    Ok(project)
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Form a team and open its proposal phase.
pub fn create_team<S: DocumentStore + ?Sized>(
    tx: &mut Transaction<'_, S>,
    team: &NewTeam,
    now: DateTime<Utc>,
) -> Result<Project, CapstoneError> {
    let title = team.title.trim();
    if title.is_empty() || title.len() > MAX_NAME_LENGTH {
        return Err(CapstoneError::invalid("project title must be 1-256 characters"));
    }
    if team.members.is_empty() || team.members.len() > MAX_TEAM_SIZE {
        return Err(CapstoneError::invalid(format!(
            "a team has 1 to {} members, got {}",
            MAX_TEAM_SIZE,
            team.members.len()
        )));
    }
    let distinct: BTreeSet<StudentId> = team.members.iter().copied().collect();
    if distinct.len() != team.members.len() {
        return Err(CapstoneError::invalid("a student is listed twice"));
    }
    let categories = normalize_tags(&team.categories)?;

    let event: Event = tx.load(team.event)?;
    let initial = ProgressStatus::initial(event.tier);

    let mut members = Vec::with_capacity(team.members.len());
    for &id in &team.members {
        let student: Student = tx.load(id)?;
        if student.is_associated {
            return Err(CapstoneError::invalid(format!("{} already has a team", id)));
        }
        if student.progress != initial {
            return Err(CapstoneError::invalid(format!(
                "{} is at {}, a {} team needs {}",
                id, student.progress, event.tier, initial
            )));
        }
        members.push(student);
    }

    let id: ProjectId = tx.allocate::<Project>()?;
    let project = Project {
        id,
        event: event.id,
        title: title.to_string(),
        tier: event.tier,
        status: ProjectStatus::Active,
        members: team.members.clone(),
        categories,
        supervisor: None,
        phases: Project::empty_phases(event.tier),
        created_at: now,
    };

    let position = Position::new(event.tier, Phase::Proposal, Step::InitialOrFailed);
    apply_to_team(tx, members, EligibilitySignal::CreateTeam, position, |s| {
        s.associate(id);
    })?;
    tx.put(&project)?;

    tracing::info!(project = %id, event = %event.id, tier = %event.tier, members = project.members.len(), "team created");
    Ok(project)
}

/// Store a phase report and move the team to the defense queue.
pub fn submit_report<S: DocumentStore + ?Sized>(
    tx: &mut Transaction<'_, S>,
    project_id: ProjectId,
    submitted_by: StudentId,
    phase: Phase,
    file_path: &str,
    now: DateTime<Utc>,
) -> Result<Project, CapstoneError> {
    let file_path = file_path.trim();
    if file_path.is_empty() {
        return Err(CapstoneError::invalid("report file path must not be empty"));
    }

    let mut project = load_active(tx, project_id)?;
    if !project.has_member(submitted_by) {
        return Err(CapstoneError::invalid(format!(
            "{} is not a member of {}",
            submitted_by, project_id
        )));
    }
    if project.phase(phase)?.has_graduated_phase {
        return Err(CapstoneError::invalid(format!(
            "{} has already passed its {} defense",
            project_id, phase
        )));
    }

    let (members, position) = team_position(tx, &project)?;
    if position.phase != phase || position.step != Step::EligibleForReport {
        return Err(CapstoneError::invalid(format!(
            "{} is not accepting a {} report (team at {})",
            project_id,
            phase,
            ProgressStatus::Active(position)
        )));
    }

    project.phase_mut(phase)?.report = Some(Report {
        file_path: file_path.to_string(),
        submitted_by,
        submitted_on: now,
    });
    apply_to_team(tx, members, EligibilitySignal::EligibleForDefense, position, |_| {})?;
    tx.put(&project)?;

    tracing::info!(project = %project_id, %phase, student = %submitted_by, "report submitted");
    Ok(project)
}

/// Re-open report submission after a Retry or Absent outcome.
pub fn reopen_report_submission<S: DocumentStore + ?Sized>(
    tx: &mut Transaction<'_, S>,
    project_id: ProjectId,
) -> Result<Phase, CapstoneError> {
    let project = load_active(tx, project_id)?;
    let (members, position) = team_position(tx, &project)?;
    if position.step != Step::InitialOrFailed {
        return Err(CapstoneError::invalid(format!(
            "{} is not waiting after a failed attempt",
            project_id
        )));
    }

    let last = project
        .phase(position.phase)?
        .attempts
        .last()
        .and_then(|a| a.resolution);
    if !matches!(last, Some(JudgementClass::Retry | JudgementClass::Absent)) {
        return Err(CapstoneError::invalid(format!(
            "{} has no failed {} attempt to recover from",
            project_id, position.phase
        )));
    }

    apply_to_team(
        tx,
        members,
        EligibilitySignal::EligibleForReportSubmission,
        position,
        |_| {},
    )?;
    tracing::info!(project = %project_id, phase = %position.phase, "report submission re-opened");
    Ok(position.phase)
}

/// Supervisor releases the mid or final phase of a supervised project.
pub fn approve_by_supervisor<S: DocumentStore + ?Sized>(
    tx: &mut Transaction<'_, S>,
    project_id: ProjectId,
    supervisor_id: SupervisorId,
) -> Result<Phase, CapstoneError> {
    let project = load_active(tx, project_id)?;
    if !project.tier.requires_supervisor() {
        return Err(CapstoneError::invalid(format!(
            "{} tier projects are not supervised",
            project.tier
        )));
    }
    let _: Supervisor = tx.load(supervisor_id)?;
    if project.supervisor != Some(supervisor_id) {
        return Err(CapstoneError::invalid(format!(
            "{} does not supervise {}",
            supervisor_id, project_id
        )));
    }

    let (members, position) = team_position(tx, &project)?;
    if position.phase == Phase::Proposal || position.step != Step::InitialOrFailed {
        return Err(CapstoneError::invalid(format!(
            "{} is not waiting for supervisor approval (team at {})",
            project_id,
            ProgressStatus::Active(position)
        )));
    }

    // After a failed attempt the team recovers through re-opening instead.
    let defended = project
        .phase(position.phase)?
        .attempts
        .iter()
        .any(|a| a.resolution.is_some());
    if defended {
        return Err(CapstoneError::invalid(format!(
            "{} was already defended at {}; re-open report submission instead",
            project_id, position.phase
        )));
    }

    apply_to_team(
        tx,
        members,
        EligibilitySignal::ApprovalFromSupervisor,
        position,
        |_| {},
    )?;
    tracing::info!(project = %project_id, supervisor = %supervisor_id, phase = %position.phase, "phase approved by supervisor");
    Ok(position.phase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_normalized() {
        let tags = normalize_tags(&[" ML ".into(), "ml".into(), "".into(), "Web".into()])
            .expect("tags");
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec!["ml", "web"]);
    }

    #[test]
    fn too_many_tags_rejected() {
        let tags: Vec<String> = (0..=MAX_TAGS).map(|i| format!("t{}", i)).collect();
        assert!(normalize_tags(&tags).is_err());
    }
}
