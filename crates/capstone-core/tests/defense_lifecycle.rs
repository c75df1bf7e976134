//! # Defense Lifecycle Tests
//!
//! End-to-end runs of the engine through its public session API.
//!
//! ## Groups
//! - L0: Consensus (unanimity, conflicts, duplicates)
//! - L1: Resolution (pass, retry, absent, reject, tier hand-over)
//! - L2: Atomicity (rolled-back team updates, idempotent recovery)
//! - L3: Access codes (single use, reissue)
//! - L4: Supervisor matching and approval

use capstone_core::{
    AccessCodeMailer, CapstoneError, DefenseId, DefensePlan, EvaluationRequest, EvaluatorGrant,
    EvaluatorId, EventId, FinalJudgement, IndividualScore, Judgement, MatchResult, MidJudgement,
    NewTeam, Phase, Project, ProjectId, ProjectStatus, ProposalJudgement, RoomPlan, Session,
    Student, StudentId, SubmissionStatus, Tier,
};
use chrono::{NaiveDate, NaiveTime};
use std::collections::BTreeMap;

// =============================================================================
// FIXTURES
// =============================================================================

/// Mailer that keeps the last code sent to each address.
#[derive(Default)]
struct RecordingMailer {
    codes: BTreeMap<String, String>,
    fail_for: Option<String>,
}

impl AccessCodeMailer for RecordingMailer {
    fn send_access_code(
        &mut self,
        email: &str,
        code: &str,
        _phase: Phase,
        _room: &str,
        _date: NaiveDate,
        _time: NaiveTime,
    ) -> Result<(), CapstoneError> {
        if self.fail_for.as_deref() == Some(email) {
            return Err(CapstoneError::Io("mailbox unavailable".into()));
        }
        self.codes.insert(email.to_string(), code.to_string());
        Ok(())
    }
}

struct Team {
    event: EventId,
    project: ProjectId,
    members: Vec<StudentId>,
}

fn academic_year(tier: Tier) -> u8 {
    match tier {
        Tier::FirstYear => 1,
        Tier::Minor => 3,
        Tier::Major => 4,
    }
}

fn team(session: &mut Session, tier: Tier, size: usize, categories: &[&str]) -> Team {
    let event = session
        .create_event(&format!("{} 2025", tier), tier, 2025)
        .expect("event");
    let members: Vec<StudentId> = (0..size)
        .map(|i| {
            session
                .register_student(
                    &format!("Student {}", i),
                    &format!("s{}@uni.edu", i),
                    academic_year(tier),
                )
                .expect("student")
                .id
        })
        .collect();
    let project = session
        .create_team(&NewTeam {
            event: event.id,
            title: "Smart Attendance".into(),
            members: members.clone(),
            categories: categories.iter().map(|c| c.to_string()).collect(),
        })
        .expect("team");
    Team {
        event: event.id,
        project: project.id,
        members,
    }
}

fn evaluators(session: &mut Session, n: usize) -> Vec<EvaluatorId> {
    (0..n)
        .map(|i| {
            session
                .register_evaluator(&format!("Evaluator {}", i), &format!("e{}@uni.edu", i))
                .expect("evaluator")
                .id
        })
        .collect()
}

fn schedule(
    session: &mut Session,
    team: &Team,
    phase: Phase,
    panel: &[EvaluatorId],
    mailer: &mut RecordingMailer,
) -> DefenseId {
    let plan = DefensePlan {
        event: team.event,
        phase,
        date: NaiveDate::from_ymd_opt(2025, 4, 2).expect("date"),
        time: NaiveTime::from_hms_opt(9, 30, 0).expect("time"),
        rooms: vec![RoomPlan {
            room: "Lab 3".into(),
            evaluators: panel.to_vec(),
            projects: vec![team.project],
        }],
    };
    let outcome = session.schedule_defense(&plan, mailer).expect("schedule");
    assert_eq!(outcome.delivery.delivered.len(), panel.len());
    outcome.defense
}

fn login(
    session: &Session,
    mailer: &RecordingMailer,
    evaluator: EvaluatorId,
) -> Result<EvaluatorGrant, CapstoneError> {
    let email = session
        .get::<capstone_core::Evaluator>(evaluator)
        .expect("evaluator")
        .email;
    let code = mailer.codes.get(&email).cloned().unwrap_or_default();
    session.authenticate(evaluator, &code)
}

fn request(
    team: &Team,
    defense: DefenseId,
    evaluator: EvaluatorId,
    phase: Phase,
    judgement: Judgement,
    absent: &[bool],
) -> EvaluationRequest {
    EvaluationRequest {
        project: team.project,
        defense,
        evaluator,
        phase,
        scores: team
            .members
            .iter()
            .zip(absent)
            .map(|(&student, &absent)| IndividualScore {
                student,
                absent,
                marks: if absent { 0 } else { 72 },
            })
            .collect(),
        judgement,
        remarks: None,
    }
}

fn submit(
    session: &mut Session,
    mailer: &RecordingMailer,
    req: &EvaluationRequest,
) -> Result<capstone_core::SubmissionOutcome, CapstoneError> {
    let grant = login(session, mailer, req.evaluator)?;
    session.submit_evaluation(&grant, req)
}

fn codes(session: &Session, team: &Team) -> Vec<String> {
    team.members
        .iter()
        .map(|&id| session.get::<Student>(id).expect("student").progress.encode())
        .collect()
}

fn project(session: &Session, team: &Team) -> Project {
    session.get::<Project>(team.project).expect("project")
}

fn proposed(result: MatchResult) -> capstone_core::MatchPlan {
    match result {
        MatchResult::Proposed(plan) => Some(plan),
        MatchResult::NoEligibleProjects => None,
    }
    .expect("expected a proposal")
}

/// Run one defense where every panel member submits `judgement`.
fn run_defense(
    session: &mut Session,
    team: &Team,
    phase: Phase,
    panel: &[EvaluatorId],
    judgement: Judgement,
    absent: &[bool],
) -> DefenseId {
    let mut mailer = RecordingMailer::default();
    let defense = schedule(session, team, phase, panel, &mut mailer);
    for &evaluator in panel {
        let req = request(team, defense, evaluator, phase, judgement, absent);
        submit(session, &mailer, &req).expect("submit");
    }
    defense
}

fn accepted(phase: Phase) -> Judgement {
    match phase {
        Phase::Proposal => Judgement::Proposal(ProposalJudgement::Accepted),
        Phase::Mid => Judgement::Mid(MidJudgement::ProgressSatisfactory),
        Phase::Final => Judgement::Final(FinalJudgement::Accepted),
    }
}

/// The example scenario: two evaluators accept a minor proposal.
fn two_evaluator_proposal(session: &mut Session) {
    let t = team(session, Tier::Minor, 2, &["ml"]);
    assert_eq!(codes(session, &t), vec!["211", "211"]);
    session
        .submit_report(t.project, t.members[0], Phase::Proposal, "reports/proposal.pdf")
        .expect("report");
    assert_eq!(codes(session, &t), vec!["212", "212"]);

    let panel = evaluators(session, 2);
    let mut mailer = RecordingMailer::default();
    let defense = schedule(session, &t, Phase::Proposal, &panel, &mut mailer);

    let accept = accepted(Phase::Proposal);
    let a = submit(
        session,
        &mailer,
        &request(&t, defense, panel[0], Phase::Proposal, accept, &[false, false]),
    )
    .expect("A");
    assert_eq!(a.status, SubmissionStatus::Recorded);
    assert!(!a.attempt.is_graded);
    assert!(!a.resolved);
    assert_eq!(codes(session, &t), vec!["212", "212"]);

    let b = submit(
        session,
        &mailer,
        &request(&t, defense, panel[1], Phase::Proposal, accept, &[false, false]),
    )
    .expect("B");
    assert!(b.attempt.is_graded);
    assert!(b.resolved);
    assert_eq!(codes(session, &t), vec!["220", "220"]);

    let p = project(session, &t);
    let proposal = p.phase(Phase::Proposal).expect("phase");
    assert!(proposal.has_graduated_phase);
    assert_eq!(proposal.evaluations.len(), 2);
    assert_eq!(p.status, ProjectStatus::Active);
}

// =============================================================================
// L0: CONSENSUS
// =============================================================================

mod l0_consensus {
    use super::*;
    use tempfile::tempdir;

    /// L0.1: The example scenario holds on the in-memory backend.
    #[test]
    fn example_scenario_in_memory() {
        two_evaluator_proposal(&mut Session::in_memory());
    }

    /// L0.2: The example scenario holds on the redb backend, across reopen.
    #[test]
    fn example_scenario_on_redb() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("capstone.redb");
        {
            let mut session = Session::with_redb(&path).expect("open");
            two_evaluator_proposal(&mut session);
        }
        let session = Session::with_redb(&path).expect("reopen");
        let students = session.list::<Student>().expect("list");
        assert!(students.iter().all(|s| s.progress.encode() == "220"));
    }

    /// L0.3: N evaluators grade only once the Nth distinct one submits.
    #[test]
    fn consensus_requires_unanimity() {
        let mut session = Session::in_memory();
        let t = team(&mut session, Tier::Major, 3, &[]);
        session
            .submit_report(t.project, t.members[1], Phase::Proposal, "p.pdf")
            .expect("report");
        let panel = evaluators(&mut session, 3);
        let mut mailer = RecordingMailer::default();
        let defense = schedule(&mut session, &t, Phase::Proposal, &panel, &mut mailer);

        let accept = accepted(Phase::Proposal);
        let absent = [false, true, false];
        for (i, &evaluator) in panel.iter().enumerate() {
            let out = submit(
                &mut session,
                &mailer,
                &request(&t, defense, evaluator, Phase::Proposal, accept, &absent),
            )
            .expect("submit");
            assert_eq!(out.attempt.is_graded, i == panel.len() - 1);
            assert_eq!(out.attempt.pending(), panel.len() - i - 1);
        }
        // Individual absence does not split the team outcome.
        assert_eq!(codes(&session, &t), vec!["320", "320", "320"]);
    }

    /// L0.4: A contradicting judgement is rejected and changes nothing.
    #[test]
    fn contradicting_judgement_is_conflict() {
        let mut session = Session::in_memory();
        let t = team(&mut session, Tier::Minor, 2, &[]);
        session
            .submit_report(t.project, t.members[0], Phase::Proposal, "p.pdf")
            .expect("report");
        let panel = evaluators(&mut session, 2);
        let mut mailer = RecordingMailer::default();
        let defense = schedule(&mut session, &t, Phase::Proposal, &panel, &mut mailer);

        let accept = accepted(Phase::Proposal);
        submit(
            &mut session,
            &mailer,
            &request(&t, defense, panel[0], Phase::Proposal, accept, &[false, false]),
        )
        .expect("A");

        let reject = Judgement::Proposal(ProposalJudgement::Rejected);
        let err = submit(
            &mut session,
            &mailer,
            &request(&t, defense, panel[1], Phase::Proposal, reject, &[false, false]),
        )
        .expect_err("conflict");
        assert!(matches!(err, CapstoneError::ConflictingJudgement { .. }));

        let p = project(&session, &t);
        let attempt = p
            .phase(Phase::Proposal)
            .expect("phase")
            .attempt_for(defense)
            .expect("attempt");
        assert!(!attempt.has_evaluated(panel[1]));
        assert_eq!(session.evaluations_for(t.project, Phase::Proposal).expect("evals").len(), 1);
    }

    /// L0.5: Differing attendance is a conflict too.
    #[test]
    fn differing_absence_is_conflict() {
        let mut session = Session::in_memory();
        let t = team(&mut session, Tier::Minor, 2, &[]);
        session
            .submit_report(t.project, t.members[0], Phase::Proposal, "p.pdf")
            .expect("report");
        let panel = evaluators(&mut session, 2);
        let mut mailer = RecordingMailer::default();
        let defense = schedule(&mut session, &t, Phase::Proposal, &panel, &mut mailer);

        let accept = accepted(Phase::Proposal);
        submit(
            &mut session,
            &mailer,
            &request(&t, defense, panel[0], Phase::Proposal, accept, &[false, false]),
        )
        .expect("A");
        let err = submit(
            &mut session,
            &mailer,
            &request(&t, defense, panel[1], Phase::Proposal, accept, &[true, false]),
        )
        .expect_err("conflict");
        assert!(matches!(err, CapstoneError::ConflictingJudgement { .. }));
    }

    /// L0.6: Resubmitting identical facts is a harmless duplicate.
    #[test]
    fn identical_resubmission_is_duplicate() {
        let mut session = Session::in_memory();
        let t = team(&mut session, Tier::Minor, 2, &[]);
        session
            .submit_report(t.project, t.members[0], Phase::Proposal, "p.pdf")
            .expect("report");
        let panel = evaluators(&mut session, 2);
        let mut mailer = RecordingMailer::default();
        let defense = schedule(&mut session, &t, Phase::Proposal, &panel, &mut mailer);

        // The grant outlives the code, which is revoked after the first submission.
        let req = request(
            &t,
            defense,
            panel[0],
            Phase::Proposal,
            accepted(Phase::Proposal),
            &[false, false],
        );
        let grant = login(&session, &mailer, panel[0]).expect("login");
        let first = session.submit_evaluation(&grant, &req).expect("first");
        let second = session.submit_evaluation(&grant, &req).expect("second");
        assert_eq!(first.status, SubmissionStatus::Recorded);
        assert_eq!(second.status, SubmissionStatus::Duplicate);
        assert_eq!(second.evaluation, None);
        assert_eq!(session.evaluations_for(t.project, Phase::Proposal).expect("evals").len(), 1);
    }

    /// L0.7: Evaluators off the roster are rejected.
    #[test]
    fn unassigned_evaluator_rejected() {
        let mut session = Session::in_memory();
        let t = team(&mut session, Tier::Minor, 1, &[]);
        session
            .submit_report(t.project, t.members[0], Phase::Proposal, "p.pdf")
            .expect("report");
        let panel = evaluators(&mut session, 2);
        let mut mailer = RecordingMailer::default();
        let defense = schedule(&mut session, &t, Phase::Proposal, &panel[..1], &mut mailer);

        // Outsiders never receive a code; hand-build a grant instead.
        let now = chrono::Utc::now();
        let grant = EvaluatorGrant {
            evaluator: panel[1],
            defense,
            issued_at: now,
            expires_at: now + chrono::Duration::minutes(5),
        };
        let req = request(&t, defense, panel[1], Phase::Proposal, accepted(Phase::Proposal), &[false]);
        let err = session.submit_evaluation(&grant, &req).expect_err("not assigned");
        assert!(matches!(err, CapstoneError::NotAssigned { .. }));
    }

    /// L0.8: Score sheets must cover the team exactly.
    #[test]
    fn score_sheet_must_match_team() {
        let mut session = Session::in_memory();
        let t = team(&mut session, Tier::Minor, 2, &[]);
        session
            .submit_report(t.project, t.members[0], Phase::Proposal, "p.pdf")
            .expect("report");
        let panel = evaluators(&mut session, 1);
        let mut mailer = RecordingMailer::default();
        let defense = schedule(&mut session, &t, Phase::Proposal, &panel, &mut mailer);

        let mut req = request(&t, defense, panel[0], Phase::Proposal, accepted(Phase::Proposal), &[false, false]);
        req.scores.pop();
        let err = submit(&mut session, &mailer, &req).expect_err("short sheet");
        assert!(matches!(err, CapstoneError::Validation(_)));
    }
}

// =============================================================================
// L1: RESOLUTION
// =============================================================================

mod l1_resolution {
    use super::*;
    use capstone_core::JudgementClass;
    use capstone_core::resolver;

    /// L1.0: A rejection outside the proposal phase has no transition and
    /// changes nothing.
    #[test]
    fn rejection_outside_proposal_is_refused() {
        let mut session = Session::in_memory();
        let t = team(&mut session, Tier::FirstYear, 2, &[]);
        session
            .submit_report(t.project, t.members[0], Phase::Proposal, "p.pdf")
            .expect("report");
        let panel = evaluators(&mut session, 1);
        run_defense(&mut session, &t, Phase::Proposal, &panel, accepted(Phase::Proposal), &[false, false]);
        session
            .submit_report(t.project, t.members[0], Phase::Final, "f.pdf")
            .expect("final report");
        let mut mailer = RecordingMailer::default();
        let defense = schedule(&mut session, &t, Phase::Final, &panel, &mut mailer);
        assert_eq!(codes(&session, &t), vec!["132", "132"]);

        let (project_id, evaluator) = (t.project, panel[0]);
        let err = session
            .transact("reject final", |tx| {
                let mut p: Project = tx.load(project_id)?;
                if let Some(a) = p.phase_mut(Phase::Final)?.attempt_for_mut(defense) {
                    a.mark_evaluated(evaluator);
                }
                resolver::resolve(tx, &mut p, Phase::Final, defense, JudgementClass::Reject)
            })
            .expect_err("final has no rejection");
        assert!(matches!(
            err,
            CapstoneError::TeamUpdateAborted { ref source, .. }
                if matches!(**source, CapstoneError::UnknownEligibilityTransition { .. })
        ));
        assert_eq!(codes(&session, &t), vec!["132", "132"]);
        assert_eq!(project(&session, &t).status, ProjectStatus::Active);
    }

    /// L1.1: Re-defense sends the team back and clears the report.
    #[test]
    fn redefense_moves_back_and_clears_report() {
        let mut session = Session::in_memory();
        let t = team(&mut session, Tier::Minor, 2, &[]);
        session
            .submit_report(t.project, t.members[0], Phase::Proposal, "p.pdf")
            .expect("report");
        let panel = evaluators(&mut session, 2);
        let redefense = Judgement::Proposal(ProposalJudgement::ReDefense);
        run_defense(&mut session, &t, Phase::Proposal, &panel, redefense, &[false, false]);

        assert_eq!(codes(&session, &t), vec!["210", "210"]);
        let p = project(&session, &t);
        let record = p.phase(Phase::Proposal).expect("phase");
        assert!(record.report.is_none());
        assert!(!record.has_graduated_phase);

        // Recover: re-open, resubmit, defend again.
        assert_eq!(session.reopen_report_submission(t.project).expect("reopen"), Phase::Proposal);
        assert_eq!(codes(&session, &t), vec!["211", "211"]);
        session
            .submit_report(t.project, t.members[1], Phase::Proposal, "p-v2.pdf")
            .expect("resubmit");
        run_defense(&mut session, &t, Phase::Proposal, &panel, accepted(Phase::Proposal), &[false, false]);
        assert_eq!(codes(&session, &t), vec!["220", "220"]);
        assert_eq!(project(&session, &t).phase(Phase::Proposal).expect("phase").attempts.len(), 2);
    }

    /// L1.2: An absent team is treated like a failed attempt.
    #[test]
    fn absent_team_fails_attempt() {
        let mut session = Session::in_memory();
        let t = team(&mut session, Tier::FirstYear, 2, &[]);
        session
            .submit_report(t.project, t.members[0], Phase::Proposal, "p.pdf")
            .expect("report");
        let panel = evaluators(&mut session, 1);
        let absent = Judgement::Proposal(ProposalJudgement::Absent);
        run_defense(&mut session, &t, Phase::Proposal, &panel, absent, &[true, true]);
        assert_eq!(codes(&session, &t), vec!["110", "110"]);
    }

    /// L1.3: Rejection archives the project and frees the students.
    #[test]
    fn rejection_archives_and_detaches() {
        let mut session = Session::in_memory();
        let t = team(&mut session, Tier::Major, 2, &[]);
        session
            .submit_report(t.project, t.members[0], Phase::Proposal, "p.pdf")
            .expect("report");
        let panel = evaluators(&mut session, 2);
        let reject = Judgement::Proposal(ProposalJudgement::Rejected);
        run_defense(&mut session, &t, Phase::Proposal, &panel, reject, &[false, false]);

        assert_eq!(project(&session, &t).status, ProjectStatus::Archived);
        for &id in &t.members {
            let s: Student = session.get(id).expect("student");
            assert_eq!(s.progress.encode(), "310");
            assert!(!s.is_associated);
            assert_eq!(s.project, None);
        }
    }

    /// L1.4: Passing the first-year final moves the team into the minor tier.
    #[test]
    fn first_year_final_hands_over_to_minor() {
        let mut session = Session::in_memory();
        let t = team(&mut session, Tier::FirstYear, 2, &[]);
        let panel = evaluators(&mut session, 1);

        session
            .submit_report(t.project, t.members[0], Phase::Proposal, "p.pdf")
            .expect("report");
        run_defense(&mut session, &t, Phase::Proposal, &panel, accepted(Phase::Proposal), &[false, false]);
        // First-year skips mid and goes straight to final report submission.
        assert_eq!(codes(&session, &t), vec!["131", "131"]);

        session
            .submit_report(t.project, t.members[0], Phase::Final, "f.pdf")
            .expect("final report");
        let conditional = Judgement::Final(FinalJudgement::AcceptedConditionally);
        run_defense(&mut session, &t, Phase::Final, &panel, conditional, &[false, false]);

        assert_eq!(codes(&session, &t), vec!["210", "210"]);
        assert_eq!(project(&session, &t).status, ProjectStatus::Complete);
        for &id in &t.members {
            let s: Student = session.get(id).expect("student");
            assert!(!s.is_associated);
            assert_eq!(s.project, Some(t.project));
        }
    }

    /// L1.5: A mid judgement cannot be recorded against a proposal defense.
    #[test]
    fn judgement_phase_is_enforced() {
        let mut session = Session::in_memory();
        let t = team(&mut session, Tier::Minor, 1, &[]);
        session
            .submit_report(t.project, t.members[0], Phase::Proposal, "p.pdf")
            .expect("report");
        let panel = evaluators(&mut session, 1);
        let mut mailer = RecordingMailer::default();
        let defense = schedule(&mut session, &t, Phase::Proposal, &panel, &mut mailer);
        let req = request(&t, defense, panel[0], Phase::Proposal, accepted(Phase::Mid), &[false]);
        assert!(matches!(
            submit(&mut session, &mailer, &req),
            Err(CapstoneError::Validation(_))
        ));
    }
}

// =============================================================================
// L2: ATOMICITY
// =============================================================================

mod l2_atomicity {
    use super::*;
    use capstone_core::consensus;
    use capstone_core::{
        DocumentStore, Evaluation, ProgressStatus, Step, StorageBackend, Transaction,
    };
    use chrono::Utc;

    /// L2.1: One bad member aborts the whole submission.
    #[test]
    fn bad_member_rolls_back_everything() {
        let mut session = Session::in_memory();
        let t = team(&mut session, Tier::Minor, 2, &[]);
        session
            .submit_report(t.project, t.members[0], Phase::Proposal, "p.pdf")
            .expect("report");
        let panel = evaluators(&mut session, 2);
        let mut mailer = RecordingMailer::default();
        let defense = schedule(&mut session, &t, Phase::Proposal, &panel, &mut mailer);

        let accept = accepted(Phase::Proposal);
        submit(
            &mut session,
            &mailer,
            &request(&t, defense, panel[0], Phase::Proposal, accept, &[false, false]),
        )
        .expect("A");

        // Knock the second member into another tier behind the engine's back.
        let stray = t.members[1];
        session
            .transact("corrupt", |tx| {
                let mut s: Student = tx.load(stray)?;
                s.progress = ProgressStatus::at(Tier::Major, Phase::Mid, Step::InitialOrFailed);
                tx.put(&s)
            })
            .expect("corrupt");

        let err = submit(
            &mut session,
            &mailer,
            &request(&t, defense, panel[1], Phase::Proposal, accept, &[false, false]),
        )
        .expect_err("abort");
        assert!(matches!(
            err,
            CapstoneError::TeamUpdateAborted { student, .. } if student == stray
        ));

        // Nothing from the failed unit of work is visible.
        let p = project(&session, &t);
        let record = p.phase(Phase::Proposal).expect("phase");
        let attempt = record.attempt_for(defense).expect("attempt");
        assert!(!attempt.is_graded);
        assert!(!attempt.has_evaluated(panel[1]));
        assert!(!record.has_graduated_phase);
        assert_eq!(record.evaluations.len(), 1);
        assert_eq!(codes(&session, &t)[0], "212");
        // B's code was not revoked.
        assert!(login(&session, &mailer, panel[1]).is_ok());
    }

    /// L2.2: A graded attempt left unresolved is picked up exactly once.
    #[test]
    fn unresolved_attempt_is_resumed_once() {
        let mut session = Session::in_memory();
        let t = team(&mut session, Tier::Major, 2, &[]);
        session
            .submit_report(t.project, t.members[0], Phase::Proposal, "p.pdf")
            .expect("report");
        let panel = evaluators(&mut session, 1);
        let mut mailer = RecordingMailer::default();
        let defense = schedule(&mut session, &t, Phase::Proposal, &panel, &mut mailer);

        // Simulate an interrupted run: evaluation recorded, attempt graded,
        // resolver never ran.
        let members = t.members.clone();
        let (project_id, evaluator) = (t.project, panel[0]);
        session
            .transact("interrupted", |tx| {
                let mut p: Project = tx.load(project_id)?;
                let id = tx.allocate::<Evaluation>()?;
                tx.put(&Evaluation {
                    id,
                    project: project_id,
                    evaluator,
                    defense,
                    phase: Phase::Proposal,
                    scores: members
                        .iter()
                        .map(|&student| IndividualScore {
                            student,
                            absent: false,
                            marks: 80,
                        })
                        .collect(),
                    judgement: accepted(Phase::Proposal),
                    remarks: None,
                    submitted_at: chrono::Utc::now(),
                })?;
                let record = p.phase_mut(Phase::Proposal)?;
                record.evaluations.push(id);
                if let Some(a) = record.attempt_for_mut(defense) {
                    a.mark_evaluated(evaluator);
                }
                tx.put(&p)
            })
            .expect("interrupted");
        assert_eq!(codes(&session, &t), vec!["312", "312"]);

        let resumed = session.resume_pending_resolutions().expect("resume");
        assert_eq!(resumed.len(), 1);
        assert!(resumed[0].resolution.is_some());
        assert_eq!(codes(&session, &t), vec!["320", "320"]);

        // Second run: nothing pending, nothing changes.
        assert!(session.resume_pending_resolutions().expect("resume").is_empty());
        assert_eq!(codes(&session, &t), vec!["320", "320"]);
    }

    /// L2.3: A lost resolution marker is restored without a second transition.
    #[test]
    fn resolution_is_idempotent() {
        let mut session = Session::in_memory();
        let t = team(&mut session, Tier::Minor, 2, &[]);
        session
            .submit_report(t.project, t.members[0], Phase::Proposal, "p.pdf")
            .expect("report");
        let panel = evaluators(&mut session, 1);
        let defense = run_defense(&mut session, &t, Phase::Proposal, &panel, accepted(Phase::Proposal), &[false, false]);
        let before = codes(&session, &t);

        let project_id = t.project;
        session
            .transact("drop marker", |tx| {
                let mut p: Project = tx.load(project_id)?;
                if let Some(a) = p.phase_mut(Phase::Proposal)?.attempt_for_mut(defense) {
                    a.resolution = None;
                }
                tx.put(&p)
            })
            .expect("drop marker");

        let resumed = session.resume_pending_resolutions().expect("resume");
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0].resolution, None);
        assert_eq!(codes(&session, &t), before);
    }

    /// L2.4: A second open attempt for the same phase cannot be scheduled.
    #[test]
    fn one_open_attempt_per_phase() {
        let mut session = Session::in_memory();
        let t = team(&mut session, Tier::Minor, 1, &[]);
        session
            .submit_report(t.project, t.members[0], Phase::Proposal, "p.pdf")
            .expect("report");
        let panel = evaluators(&mut session, 1);
        let mut mailer = RecordingMailer::default();
        schedule(&mut session, &t, Phase::Proposal, &panel, &mut mailer);

        let plan = DefensePlan {
            event: t.event,
            phase: Phase::Proposal,
            date: NaiveDate::from_ymd_opt(2025, 4, 3).expect("date"),
            time: NaiveTime::from_hms_opt(9, 0, 0).expect("time"),
            rooms: vec![RoomPlan {
                room: "Lab 4".into(),
                evaluators: panel.clone(),
                projects: vec![t.project],
            }],
        };
        assert!(matches!(
            session.schedule_defense(&plan, &mut mailer),
            Err(CapstoneError::AttemptAlreadyOpen { .. })
        ));
    }
    /// L2.5: Two last evaluations racing from the same state resolve once.
    #[test]
    fn racing_last_evaluations_resolve_once() {
        let mut session = Session::in_memory();
        let t = team(&mut session, Tier::Minor, 2, &[]);
        session
            .submit_report(t.project, t.members[0], Phase::Proposal, "p.pdf")
            .expect("report");
        let panel = evaluators(&mut session, 2);
        let mut mailer = RecordingMailer::default();
        let defense = schedule(&mut session, &t, Phase::Proposal, &panel, &mut mailer);

        let mut store = match session.backend() {
            StorageBackend::InMemory(store) => Some(store.clone()),
            StorageBackend::Persistent(_) => None,
        }
        .expect("in-memory backend");

        let accept = accepted(Phase::Proposal);
        let req_a = request(&t, defense, panel[0], Phase::Proposal, accept, &[false, false]);
        let req_b = request(&t, defense, panel[1], Phase::Proposal, accept, &[false, false]);
        let now = Utc::now();

        // Both units of work read the same pre-state.
        let mut tx_a = Transaction::begin(&store);
        let mut tx_b = Transaction::begin(&store);
        let out_a = consensus::submit_evaluation(&mut tx_a, &req_a, now).expect("A");
        let out_b = consensus::submit_evaluation(&mut tx_b, &req_b, now).expect("B");
        assert!(!out_a.resolved);
        assert!(!out_b.resolved);
        let (changes_a, changes_b) = (tx_a.into_changes(), tx_b.into_changes());

        store.apply(changes_a).expect("apply A");
        assert!(matches!(
            store.apply(changes_b),
            Err(CapstoneError::WriteConflict { .. })
        ));

        // The loser re-runs from fresh reads and becomes the last evaluation.
        let mut session = Session::with_store(store);
        let retried = session
            .transact("retry", |tx| consensus::submit_evaluation(tx, &req_b, now))
            .expect("retry B");
        assert!(retried.resolved);
        assert!(retried.attempt.is_graded);
        assert_eq!(codes(&session, &t), vec!["220", "220"]);

        let p = project(&session, &t);
        assert_eq!(p.phase(Phase::Proposal).expect("phase").evaluations.len(), 2);
        assert!(session.resume_pending_resolutions().expect("resume").is_empty());
        assert_eq!(codes(&session, &t), vec!["220", "220"]);
    }
}

// =============================================================================
// L3: ACCESS CODES
// =============================================================================

mod l3_access_codes {
    use super::*;

    /// L3.1: The code dies once the evaluator has graded their whole room.
    #[test]
    fn code_is_single_use_per_room() {
        let mut session = Session::in_memory();
        let t1 = team(&mut session, Tier::Minor, 1, &[]);
        session
            .submit_report(t1.project, t1.members[0], Phase::Proposal, "p.pdf")
            .expect("report");

        // Second team in the same event.
        let s = session.register_student("Ravi", "ravi@uni.edu", 3).expect("student");
        let p2 = session
            .create_team(&NewTeam {
                event: t1.event,
                title: "Crop Monitor".into(),
                members: vec![s.id],
                categories: vec![],
            })
            .expect("team");
        session
            .submit_report(p2.id, s.id, Phase::Proposal, "p2.pdf")
            .expect("report");
        let t2 = Team {
            event: t1.event,
            project: p2.id,
            members: vec![s.id],
        };

        let panel = evaluators(&mut session, 1);
        let mut mailer = RecordingMailer::default();
        let plan = DefensePlan {
            event: t1.event,
            phase: Phase::Proposal,
            date: NaiveDate::from_ymd_opt(2025, 4, 2).expect("date"),
            time: NaiveTime::from_hms_opt(9, 30, 0).expect("time"),
            rooms: vec![RoomPlan {
                room: "Lab 3".into(),
                evaluators: panel.clone(),
                projects: vec![t1.project, t2.project],
            }],
        };
        let defense = session.schedule_defense(&plan, &mut mailer).expect("schedule").defense;
        let accept = accepted(Phase::Proposal);

        let first = submit(&mut session, &mailer, &request(&t1, defense, panel[0], Phase::Proposal, accept, &[false]))
            .expect("first project");
        assert!(!first.code_revoked);
        assert!(login(&session, &mailer, panel[0]).is_ok());

        let second = submit(&mut session, &mailer, &request(&t2, defense, panel[0], Phase::Proposal, accept, &[false]))
            .expect("second project");
        assert!(second.code_revoked);
        assert!(matches!(
            login(&session, &mailer, panel[0]),
            Err(CapstoneError::InvalidAccessCode)
        ));
    }

    /// L3.2: Wrong codes and unknown evaluators are indistinguishable.
    #[test]
    fn wrong_code_rejected() {
        let mut session = Session::in_memory();
        let t = team(&mut session, Tier::Minor, 1, &[]);
        session
            .submit_report(t.project, t.members[0], Phase::Proposal, "p.pdf")
            .expect("report");
        let panel = evaluators(&mut session, 1);
        let mut mailer = RecordingMailer::default();
        schedule(&mut session, &t, Phase::Proposal, &panel, &mut mailer);

        assert!(matches!(
            session.authenticate(panel[0], "WRONGCODE123"),
            Err(CapstoneError::InvalidAccessCode)
        ));
        assert!(matches!(
            session.authenticate(EvaluatorId(999), "WRONGCODE123"),
            Err(CapstoneError::InvalidAccessCode)
        ));
    }

    /// L3.3: Failed delivery is reported and can be recovered by reissue.
    #[test]
    fn reissue_replaces_lost_code() {
        let mut session = Session::in_memory();
        let t = team(&mut session, Tier::Minor, 1, &[]);
        session
            .submit_report(t.project, t.members[0], Phase::Proposal, "p.pdf")
            .expect("report");
        let panel = evaluators(&mut session, 1);
        let mut mailer = RecordingMailer {
            fail_for: Some("e0@uni.edu".into()),
            ..RecordingMailer::default()
        };
        let plan = DefensePlan {
            event: t.event,
            phase: Phase::Proposal,
            date: NaiveDate::from_ymd_opt(2025, 4, 2).expect("date"),
            time: NaiveTime::from_hms_opt(9, 30, 0).expect("time"),
            rooms: vec![RoomPlan {
                room: "Lab 3".into(),
                evaluators: panel.clone(),
                projects: vec![t.project],
            }],
        };
        let outcome = session.schedule_defense(&plan, &mut mailer).expect("schedule");
        assert_eq!(outcome.delivery.failed.len(), 1);

        mailer.fail_for = None;
        let report = session
            .reissue_access_code(panel[0], outcome.defense, &mut mailer)
            .expect("reissue");
        assert_eq!(report.delivered, vec![panel[0]]);
        assert!(login(&session, &mailer, panel[0]).is_ok());
    }
}

// =============================================================================
// L4: SUPERVISION
// =============================================================================

mod l4_supervision {
    use super::*;

    /// L4.1: Full minor tier: match, approve, mid, final (legacy "233").
    #[test]
    fn minor_tier_through_supervision() {
        let mut session = Session::in_memory();
        let t = team(&mut session, Tier::Minor, 2, &["ml", "vision"]);
        let panel = evaluators(&mut session, 1);
        let supervisor = session
            .register_supervisor("Dr. Sen", "sen@uni.edu", &["vision".into()])
            .expect("supervisor");

        assert_eq!(
            session.match_supervisors(t.event, &[]).expect("match"),
            MatchResult::NoEligibleProjects
        );

        session
            .submit_report(t.project, t.members[0], Phase::Proposal, "p.pdf")
            .expect("report");
        run_defense(&mut session, &t, Phase::Proposal, &panel, accepted(Phase::Proposal), &[false, false]);

        let plan = proposed(session.match_supervisors(t.event, &[]).expect("match"));
        assert_eq!(plan.matches[0].projects, vec![t.project]);
        // Preview only.
        assert_eq!(project(&session, &t).supervisor, None);

        session.commit_matched_supervisors(&plan.matches).expect("commit");
        assert_eq!(project(&session, &t).supervisor, Some(supervisor.id));

        assert_eq!(session.approve_by_supervisor(t.project, supervisor.id).expect("approve"), Phase::Mid);
        assert_eq!(codes(&session, &t), vec!["221", "221"]);
        session
            .submit_report(t.project, t.members[1], Phase::Mid, "m.pdf")
            .expect("mid report");
        run_defense(&mut session, &t, Phase::Mid, &panel, accepted(Phase::Mid), &[false, false]);
        assert_eq!(codes(&session, &t), vec!["230", "230"]);

        session.approve_by_supervisor(t.project, supervisor.id).expect("approve final");
        session
            .submit_report(t.project, t.members[0], Phase::Final, "f.pdf")
            .expect("final report");
        assert_eq!(codes(&session, &t), vec!["233", "233"]);

        run_defense(&mut session, &t, Phase::Final, &panel, accepted(Phase::Final), &[false, false]);
        assert_eq!(codes(&session, &t), vec!["310", "310"]);
        assert_eq!(project(&session, &t).status, ProjectStatus::Complete);
    }

    /// L4.2: Only the project's own supervisor may approve.
    #[test]
    fn foreign_supervisor_cannot_approve() {
        let mut session = Session::in_memory();
        let t = team(&mut session, Tier::Major, 1, &["ml"]);
        let panel = evaluators(&mut session, 1);
        let own = session
            .register_supervisor("Dr. Sen", "sen@uni.edu", &["ml".into()])
            .expect("own");
        let other = session
            .register_supervisor("Dr. Roy", "roy@uni.edu", &["web".into()])
            .expect("other");
        session
            .submit_report(t.project, t.members[0], Phase::Proposal, "p.pdf")
            .expect("report");
        run_defense(&mut session, &t, Phase::Proposal, &panel, accepted(Phase::Proposal), &[false]);

        let plan = proposed(session.match_supervisors(t.event, &[own.id, other.id]).expect("match"));
        session.commit_matched_supervisors(&plan.matches).expect("commit");

        assert!(session.approve_by_supervisor(t.project, other.id).is_err());
        assert!(session.approve_by_supervisor(t.project, own.id).is_ok());
    }

    /// L4.3: Graduation from the major tier clears the project reference.
    #[test]
    fn major_final_graduates() {
        let mut session = Session::in_memory();
        let t = team(&mut session, Tier::Major, 1, &["ml"]);
        let panel = evaluators(&mut session, 1);
        let sup = session
            .register_supervisor("Dr. Sen", "sen@uni.edu", &["ml".into()])
            .expect("supervisor");

        session.submit_report(t.project, t.members[0], Phase::Proposal, "p.pdf").expect("report");
        run_defense(&mut session, &t, Phase::Proposal, &panel, accepted(Phase::Proposal), &[false]);
        let plan = proposed(session.match_supervisors(t.event, &[]).expect("match"));
        session.commit_matched_supervisors(&plan.matches).expect("commit");

        for phase in [Phase::Mid, Phase::Final] {
            session.approve_by_supervisor(t.project, sup.id).expect("approve");
            session.submit_report(t.project, t.members[0], phase, "r.pdf").expect("report");
            run_defense(&mut session, &t, phase, &panel, accepted(phase), &[false]);
        }

        let s: Student = session.get(t.members[0]).expect("student");
        assert!(s.progress.is_graduated());
        assert_eq!(s.progress.encode(), "400");
        assert_eq!(s.project, None);
        assert!(!s.is_associated);
        assert_eq!(session.next_required_defense_phase(s.id).expect("phase"), None);
    }

    /// L4.4: A failed mid defense is recovered by re-opening, not by approval.
    #[test]
    fn approval_does_not_recover_failed_attempt() {
        let mut session = Session::in_memory();
        let t = team(&mut session, Tier::Major, 1, &["ml"]);
        let panel = evaluators(&mut session, 1);
        let sup = session
            .register_supervisor("Dr. Sen", "sen@uni.edu", &["ml".into()])
            .expect("supervisor");

        session.submit_report(t.project, t.members[0], Phase::Proposal, "p.pdf").expect("report");
        run_defense(&mut session, &t, Phase::Proposal, &panel, accepted(Phase::Proposal), &[false]);
        let plan = proposed(session.match_supervisors(t.event, &[]).expect("match"));
        session.commit_matched_supervisors(&plan.matches).expect("commit");

        session.approve_by_supervisor(t.project, sup.id).expect("approve");
        session.submit_report(t.project, t.members[0], Phase::Mid, "m.pdf").expect("report");
        let retry = Judgement::Mid(MidJudgement::ProgressNotSatisfactory);
        run_defense(&mut session, &t, Phase::Mid, &panel, retry, &[false]);
        assert_eq!(codes(&session, &t), vec!["320"]);

        assert!(matches!(
            session.approve_by_supervisor(t.project, sup.id),
            Err(CapstoneError::Validation(_))
        ));
        assert_eq!(codes(&session, &t), vec!["320"]);

        assert_eq!(session.reopen_report_submission(t.project).expect("reopen"), Phase::Mid);
        assert_eq!(codes(&session, &t), vec!["321"]);
    }
}
