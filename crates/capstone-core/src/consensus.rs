//! # Defense Evaluation Consensus
//!
//! Accepts one evaluator's submission for one project at one defense and
//! decides whether the attempt is now authoritative.
//!
//! One call is one unit of work:
//!
//! 1. Validate the submission (phase, roster, score sheet, marks).
//! 2. Conflict check against every prior evaluation of the same sitting.
//! 3. Record the evaluation and mark the evaluator as done.
//! 4. If the attempt flipped to graded, run the resolver.
//! 5. Revoke the evaluator's access code once their rooms are fully graded.
//!
//! Every write goes through the caller's transaction, so a failure at any
//! step leaves no trace.

use crate::access;
use crate::judgement::{Judgement, JudgementClass};
use crate::model::{
    Defense, DefenseAttempt, Evaluation, Evaluator, IndividualScore, Project, absence_pattern,
};
use crate::primitives::MAX_INDIVIDUAL_MARKS;
use crate::resolver::{self, Resolution};
use crate::storage::{DocumentStore, Transaction};
use crate::{CapstoneError, DefenseId, EvaluationId, EvaluatorId, Phase, ProjectId, StudentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One evaluator's scoring submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub project: ProjectId,
    pub defense: DefenseId,
    pub evaluator: EvaluatorId,
    pub phase: Phase,
    pub scores: Vec<IndividualScore>,
    pub judgement: Judgement,
    #[serde(default)]
    pub remarks: Option<String>,
}

/// How a submission was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubmissionStatus {
    /// A new evaluation was recorded.
    Recorded,
    /// The evaluator had already submitted identical facts; nothing changed.
    Duplicate,
}

/// Result of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionOutcome {
    pub status: SubmissionStatus,
    pub evaluation: Option<EvaluationId>,
    /// Attempt state after the submission.
    pub attempt: DefenseAttempt,
    /// Whether this submission completed the attempt and ran the resolver.
    pub resolved: bool,
    pub resolution: Option<Resolution>,
    /// Whether the evaluator's access code for this defense was cleared.
    pub code_revoked: bool,
}

// =============================================================================
// VALIDATION
// =============================================================================

/// Checks that need nothing but the request itself.
fn validate_request(request: &EvaluationRequest) -> Result<(), CapstoneError> {
    if request.judgement.phase() != request.phase {
        return Err(CapstoneError::invalid(format!(
            "judgement {} does not belong to the {} phase",
            request.judgement, request.phase
        )));
    }
    if let Some(score) = request.scores.iter().find(|s| s.marks > MAX_INDIVIDUAL_MARKS) {
        return Err(CapstoneError::invalid(format!(
            "{} marks for {} exceed the maximum of {}",
            score.marks, score.student, MAX_INDIVIDUAL_MARKS
        )));
    }
    if let Some(score) = request.scores.iter().find(|s| s.absent && s.marks > 0) {
        return Err(CapstoneError::invalid(format!(
            "{} is marked absent but was awarded {} marks",
            score.student, score.marks
        )));
    }

    let all_absent = !request.scores.is_empty() && request.scores.iter().all(|s| s.absent);
    let absent_class = request.judgement.classify() == JudgementClass::Absent;
    if absent_class != all_absent {
        return Err(CapstoneError::invalid(if absent_class {
            "an ABSENT judgement requires every member to be marked absent"
        } else {
            "every member is absent; the judgement must be ABSENT"
        }));
    }
    Ok(())
}

/// The score sheet must name every team member exactly once.
fn validate_score_sheet(
    project: &Project,
    scores: &[IndividualScore],
) -> Result<(), CapstoneError> {
    if scores.len() != project.members.len() {
        return Err(CapstoneError::invalid(format!(
            "{} scores submitted for a team of {}",
            scores.len(),
            project.members.len()
        )));
    }
    let mut seen: BTreeSet<StudentId> = BTreeSet::new();
    for score in scores {
        if !project.has_member(score.student) {
            return Err(CapstoneError::invalid(format!(
                "{} is not a member of {}",
                score.student, project.id
            )));
        }
        if !seen.insert(score.student) {
            return Err(CapstoneError::invalid(format!(
                "{} is scored more than once",
                score.student
            )));
        }
    }
    Ok(())
}

/// Compare the request against every prior evaluation of the same sitting.
///
/// Returns `true` when a prior evaluation by the same evaluator carries
/// identical facts.
fn check_conflicts<S: DocumentStore + ?Sized>(
    tx: &mut Transaction<'_, S>,
    project: &Project,
    request: &EvaluationRequest,
) -> Result<bool, CapstoneError> {
    let incoming = absence_pattern(&request.scores);
    let mut own_duplicate = false;

    for &id in &project.phase(request.phase)?.evaluations {
        let prior: Evaluation = tx.load(id)?;
        if prior.defense != request.defense {
            continue;
        }
        if prior.judgement != request.judgement {
            return Err(CapstoneError::ConflictingJudgement {
                project: project.id,
                defense: request.defense,
                detail: format!(
                    "{} recorded {}, submission says {}",
                    prior.evaluator, prior.judgement, request.judgement
                ),
            });
        }
        if prior.absence_pattern() != incoming {
            return Err(CapstoneError::ConflictingJudgement {
                project: project.id,
                defense: request.defense,
                detail: format!("{} recorded a different attendance", prior.evaluator),
            });
        }
        if prior.evaluator == request.evaluator {
            own_duplicate = true;
        }
    }
    Ok(own_duplicate)
}

// =============================================================================
// SUBMISSION
// =============================================================================

/// Accept one evaluator's submission inside `tx`.
pub fn submit_evaluation<S: DocumentStore + ?Sized>(
    tx: &mut Transaction<'_, S>,
    request: &EvaluationRequest,
    now: DateTime<Utc>,
) -> Result<SubmissionOutcome, CapstoneError> {
    validate_request(request)?;

    let mut project: Project = tx.load(request.project)?;
    let defense: Defense = tx.load(request.defense)?;
    let mut evaluator: Evaluator = tx.load(request.evaluator)?;

    if defense.phase != request.phase {
        return Err(CapstoneError::invalid(format!(
            "{} is a {} defense, not {}",
            defense.id, defense.phase, request.phase
        )));
    }

    let not_assigned = || CapstoneError::NotAssigned {
        evaluator: request.evaluator,
        project: request.project,
        defense: request.defense,
    };
    let attempt = project
        .phase(request.phase)?
        .attempt_for(request.defense)
        .ok_or_else(not_assigned)?;
    if !attempt.is_assigned(request.evaluator) {
        return Err(not_assigned());
    }
    let already_evaluated = attempt.has_evaluated(request.evaluator);

    validate_score_sheet(&project, &request.scores)?;
    let own_duplicate = check_conflicts(tx, &project, request)?;

    if already_evaluated || own_duplicate {
        tracing::info!(
            project = %request.project,
            defense = %request.defense,
            evaluator = %request.evaluator,
            "duplicate submission ignored"
        );
        let attempt = project
            .phase(request.phase)?
            .attempt_for(request.defense)
            .cloned()
            .ok_or_else(not_assigned)?;
        return Ok(SubmissionOutcome {
            status: SubmissionStatus::Duplicate,
            evaluation: None,
            attempt,
            resolved: false,
            resolution: None,
            code_revoked: false,
        });
    }

    let evaluation_id = tx.allocate::<Evaluation>()?;
    let evaluation = Evaluation {
        id: evaluation_id,
        project: request.project,
        evaluator: request.evaluator,
        defense: request.defense,
        phase: request.phase,
        scores: request.scores.clone(),
        judgement: request.judgement,
        remarks: request.remarks.clone(),
        submitted_at: now,
    };
    tx.put(&evaluation)?;

    let record = project.phase_mut(request.phase)?;
    record.evaluations.push(evaluation_id);
    let flipped = record
        .attempt_for_mut(request.defense)
        .ok_or_else(not_assigned)?
        .mark_evaluated(request.evaluator);

    tracing::info!(
        project = %request.project,
        defense = %request.defense,
        evaluator = %request.evaluator,
        judgement = %request.judgement,
        graded = flipped,
        "evaluation recorded"
    );

    let resolution = if flipped {
        resolver::resolve(
            tx,
            &mut project,
            request.phase,
            request.defense,
            request.judgement.classify(),
        )?
    } else {
        None
    };

    let code_revoked = access::has_finished_defense(tx, &defense, request.evaluator, &project)?
        && evaluator.revoke_code(request.defense);
    if code_revoked {
        tx.put(&evaluator)?;
        tracing::info!(
            evaluator = %request.evaluator,
            defense = %request.defense,
            "access code revoked"
        );
    }

    tx.put(&project)?;

    let attempt = project
        .phase(request.phase)?
        .attempt_for(request.defense)
        .cloned()
        .ok_or_else(not_assigned)?;
    Ok(SubmissionOutcome {
        status: SubmissionStatus::Recorded,
        evaluation: Some(evaluation_id),
        attempt,
        resolved: resolution.is_some(),
        resolution,
        code_revoked,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judgement::{FinalJudgement, ProposalJudgement};

    fn request(judgement: Judgement, absences: &[bool]) -> EvaluationRequest {
        EvaluationRequest {
            project: ProjectId(1),
            defense: DefenseId(1),
            evaluator: EvaluatorId(1),
            phase: Phase::Proposal,
            scores: absences
                .iter()
                .enumerate()
                .map(|(i, &absent)| IndividualScore {
                    student: StudentId(i as u64 + 1),
                    absent,
                    marks: if absent { 0 } else { 70 },
                })
                .collect(),
            judgement,
            remarks: None,
        }
    }

    #[test]
    fn judgement_must_match_phase() {
        let r = request(Judgement::Final(FinalJudgement::Accepted), &[false]);
        assert!(matches!(validate_request(&r), Err(CapstoneError::Validation(_))));
    }

    #[test]
    fn absent_judgement_requires_everyone_absent() {
        let absent = Judgement::Proposal(ProposalJudgement::Absent);
        assert!(validate_request(&request(absent, &[true, true])).is_ok());
        assert!(validate_request(&request(absent, &[true, false])).is_err());

        let accepted = Judgement::Proposal(ProposalJudgement::Accepted);
        assert!(validate_request(&request(accepted, &[true, false])).is_ok());
        assert!(validate_request(&request(accepted, &[true, true])).is_err());
    }

    #[test]
    fn marks_are_bounded() {
        let mut r = request(Judgement::Proposal(ProposalJudgement::Accepted), &[false]);
        r.scores[0].marks = MAX_INDIVIDUAL_MARKS + 1;
        assert!(validate_request(&r).is_err());
    }
}
