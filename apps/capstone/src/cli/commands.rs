//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use super::{RegisterCommand, ReportCommand};
use crate::config::{Backend, Config};
use capstone_core::{
    AccessCodeMailer, CapstoneError, DefenseId, DefensePlan, DeliveryReport, EvaluationRequest,
    Evaluator, EvaluatorId, Event, EventId, IndividualScore, Judgement, MatchResult, NewTeam,
    Phase, Project, ProjectId, RoomPlan, Session, Student, StudentId, Supervisor, SupervisorId,
    Tier, next_required_defense_phase,
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// =============================================================================
// FILE LIMITS
// =============================================================================

/// Maximum size of a plan or submission file (1 MiB).
const MAX_INPUT_FILE_SIZE: u64 = 1024 * 1024;

/// Resolve and read an input file.
///
/// Canonicalizes the path (resolving symlinks and ".."), requires a regular
/// file, and rejects oversized input before reading it.
fn read_input_file(path: &Path) -> Result<String, CapstoneError> {
    let canonical = path.canonicalize().map_err(|e| {
        CapstoneError::Io(format!("Invalid file path '{}': {}", path.display(), e))
    })?;
    let metadata = std::fs::metadata(&canonical)
        .map_err(|e| CapstoneError::Io(format!("Cannot read file metadata: {}", e)))?;
    if !metadata.is_file() {
        return Err(CapstoneError::Io(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }
    if metadata.len() > MAX_INPUT_FILE_SIZE {
        return Err(CapstoneError::Validation(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_INPUT_FILE_SIZE
        )));
    }
    std::fs::read_to_string(&canonical)
        .map_err(|e| CapstoneError::Io(format!("Cannot read '{}': {}", path.display(), e)))
}

fn print_json(value: &impl Serialize) -> Result<(), CapstoneError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| CapstoneError::Serialization(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

fn parse_phase(phase: &str) -> Result<Phase, CapstoneError> {
    phase.parse()
}

// =============================================================================
// INPUT FILES
// =============================================================================

/// One room of a `plan.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoomFile {
    pub room: String,
    pub evaluators: Vec<u64>,
    pub projects: Vec<u64>,
}

/// A defense plan as written by operators.
///
/// ```toml
/// event = 1
/// phase = "proposal"
/// date = "2025-04-02"
/// time = "09:30"
///
/// [[rooms]]
/// room = "Lab 3"
/// evaluators = [1, 2]
/// projects = [1]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanFile {
    pub event: u64,
    pub phase: String,
    pub date: String,
    pub time: String,
    pub rooms: Vec<RoomFile>,
}

impl PlanFile {
    pub fn parse(text: &str) -> Result<Self, CapstoneError> {
        toml::from_str(text)
            .map_err(|e| CapstoneError::Serialization(format!("Invalid plan: {}", e)))
    }

    pub fn into_plan(self) -> Result<DefensePlan, CapstoneError> {
        let date = NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d")
            .map_err(|e| CapstoneError::invalid(format!("bad date '{}': {}", self.date, e)))?;
        let time = NaiveTime::parse_from_str(self.time.trim(), "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(self.time.trim(), "%H:%M:%S"))
            .map_err(|e| CapstoneError::invalid(format!("bad time '{}': {}", self.time, e)))?;
        Ok(DefensePlan {
            event: EventId(self.event),
            phase: parse_phase(&self.phase)?,
            date,
            time,
            rooms: self
                .rooms
                .into_iter()
                .map(|r| RoomPlan {
                    room: r.room,
                    evaluators: r.evaluators.into_iter().map(EvaluatorId).collect(),
                    projects: r.projects.into_iter().map(ProjectId).collect(),
                })
                .collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoreFile {
    pub student: u64,
    #[serde(default)]
    pub absent: bool,
    #[serde(default)]
    pub marks: u16,
}

/// An evaluation as submitted by an evaluator.
///
/// ```json
/// {"project": 1, "defense": 1, "evaluator": 2, "phase": "proposal",
///  "judgement": "accepted_conditionally",
///  "scores": [{"student": 1, "marks": 78}, {"student": 2, "absent": true}]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmissionFile {
    pub project: u64,
    pub defense: u64,
    pub evaluator: u64,
    pub phase: String,
    pub judgement: String,
    pub scores: Vec<ScoreFile>,
    #[serde(default)]
    pub remarks: Option<String>,
}

impl SubmissionFile {
    pub fn parse(text: &str) -> Result<Self, CapstoneError> {
        serde_json::from_str(text)
            .map_err(|e| CapstoneError::Serialization(format!("Invalid submission: {}", e)))
    }

    pub fn into_request(self) -> Result<EvaluationRequest, CapstoneError> {
        let phase = parse_phase(&self.phase)?;
        Ok(EvaluationRequest {
            project: ProjectId(self.project),
            defense: DefenseId(self.defense),
            evaluator: EvaluatorId(self.evaluator),
            phase,
            judgement: Judgement::parse(phase, &self.judgement)?,
            scores: self
                .scores
                .into_iter()
                .map(|s| IndividualScore {
                    student: StudentId(s.student),
                    absent: s.absent,
                    marks: s.marks,
                })
                .collect(),
            remarks: self.remarks,
        })
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Open a session over the configured backend.
pub fn open_session(config: &Config) -> Result<Session, CapstoneError> {
    let session = match config.storage.backend {
        Backend::Redb => Session::with_redb(&config.storage.path)?,
        Backend::Memory => {
            tracing::warn!("memory backend: changes are discarded on exit");
            Session::in_memory()
        }
    };
    session.with_policy(config.access_policy()?)
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize a new database.
pub fn cmd_init(config: &Config, force: bool) -> Result<(), CapstoneError> {
    if config.storage.backend == Backend::Memory {
        println!("Memory backend selected; nothing to initialize.");
        return Ok(());
    }
    let path: &PathBuf = &config.storage.path;
    if path.exists() {
        if !force {
            return Err(CapstoneError::Io(format!(
                "Database {:?} already exists. Use --force to replace it.",
                path
            )));
        }
        std::fs::remove_file(path)
            .map_err(|e| CapstoneError::Io(format!("Cannot remove {:?}: {}", path, e)))?;
    }
    Session::with_redb(path)?;
    tracing::info!(path = %path.display(), "database initialized");
    println!("Initialized empty database at {:?}", path);
    Ok(())
}

// =============================================================================
// REGISTRATION AND TEAM COMMANDS
// =============================================================================

pub fn cmd_register(
    session: &mut Session,
    json_mode: bool,
    what: RegisterCommand,
) -> Result<(), CapstoneError> {
    match what {
        RegisterCommand::Student { name, email, year } => {
            let student = session.register_student(&name, &email, year)?;
            if json_mode {
                return print_json(&student);
            }
            println!(
                "Registered {} ({}) at progress {}",
                student.id, student.name, student.progress
            );
        }
        RegisterCommand::Evaluator { name, email } => {
            let evaluator = session.register_evaluator(&name, &email)?;
            if json_mode {
                return print_json(&evaluator);
            }
            println!("Registered {} ({})", evaluator.id, evaluator.name);
        }
        RegisterCommand::Supervisor { name, email, tags } => {
            let supervisor = session.register_supervisor(&name, &email, &tags)?;
            if json_mode {
                return print_json(&supervisor);
            }
            println!(
                "Registered {} ({}) with tags: {}",
                supervisor.id,
                supervisor.name,
                supervisor.tags.iter().cloned().collect::<Vec<_>>().join(", ")
            );
        }
        RegisterCommand::Event { title, tier, year } => {
            let tier: Tier = tier.parse()?;
            let event = session.create_event(&title, tier, year)?;
            if json_mode {
                return print_json(&event);
            }
            println!("Created {} ({}, {} tier, {})", event.id, event.title, event.tier, event.year);
        }
    }
    Ok(())
}

pub fn cmd_team_create(
    session: &mut Session,
    json_mode: bool,
    event: u64,
    title: &str,
    members: &[u64],
    categories: Vec<String>,
) -> Result<(), CapstoneError> {
    let project = session.create_team(&NewTeam {
        event: EventId(event),
        title: title.to_string(),
        members: members.iter().copied().map(StudentId).collect(),
        categories,
    })?;
    if json_mode {
        return print_json(&project);
    }
    println!(
        "Created {} \"{}\" with {} member(s)",
        project.id,
        project.title,
        project.members.len()
    );
    Ok(())
}

pub fn cmd_report(
    session: &mut Session,
    json_mode: bool,
    action: ReportCommand,
) -> Result<(), CapstoneError> {
    match action {
        ReportCommand::Submit {
            project,
            student,
            phase,
            file,
        } => {
            let phase = parse_phase(&phase)?;
            let project =
                session.submit_report(ProjectId(project), StudentId(student), phase, &file)?;
            if json_mode {
                return print_json(&project);
            }
            println!("{} report recorded for {}; team is eligible for defense", phase, project.id);
        }
        ReportCommand::Reopen { project } => {
            let phase = session.reopen_report_submission(ProjectId(project))?;
            if json_mode {
                return print_json(&serde_json::json!({ "project": project, "phase": phase }));
            }
            println!("{} report submission re-opened for project#{}", phase, project);
        }
    }
    Ok(())
}

pub fn cmd_approve(
    session: &mut Session,
    json_mode: bool,
    project: u64,
    supervisor: u64,
) -> Result<(), CapstoneError> {
    let phase = session.approve_by_supervisor(ProjectId(project), SupervisorId(supervisor))?;
    if json_mode {
        return print_json(&serde_json::json!({ "project": project, "phase": phase }));
    }
    println!("project#{} approved for {} report submission", project, phase);
    Ok(())
}

// =============================================================================
// DEFENSE COMMANDS
// =============================================================================

fn print_delivery(report: &DeliveryReport) {
    println!("Codes delivered: {}", report.delivered.len());
    for (evaluator, reason) in &report.failed {
        println!("  FAILED {}: {} (use `capstone reissue`)", evaluator, reason);
    }
}

pub fn cmd_schedule(
    session: &mut Session,
    json_mode: bool,
    file: &Path,
    mailer: &mut dyn AccessCodeMailer,
) -> Result<(), CapstoneError> {
    let plan = PlanFile::parse(&read_input_file(file)?)?.into_plan()?;
    let outcome = session.schedule_defense(&plan, mailer)?;
    if json_mode {
        return print_json(&outcome);
    }
    println!(
        "Scheduled {} ({} defense on {} at {})",
        outcome.defense,
        plan.phase,
        plan.date,
        plan.time.format("%H:%M")
    );
    print_delivery(&outcome.delivery);
    Ok(())
}

pub fn cmd_reissue(
    session: &mut Session,
    json_mode: bool,
    evaluator: u64,
    defense: u64,
    mailer: &mut dyn AccessCodeMailer,
) -> Result<(), CapstoneError> {
    let report =
        session.reissue_access_code(EvaluatorId(evaluator), DefenseId(defense), mailer)?;
    if json_mode {
        return print_json(&report);
    }
    print_delivery(&report);
    Ok(())
}

pub fn cmd_login(
    session: &Session,
    json_mode: bool,
    evaluator: u64,
    code: &str,
) -> Result<(), CapstoneError> {
    let grant = session.authenticate(EvaluatorId(evaluator), code)?;
    if json_mode {
        return print_json(&grant);
    }
    println!(
        "{} may grade {} until {}",
        grant.evaluator, grant.defense, grant.expires_at
    );
    Ok(())
}

pub fn cmd_evaluate(
    session: &mut Session,
    json_mode: bool,
    file: &Path,
    code: &str,
) -> Result<(), CapstoneError> {
    let request = SubmissionFile::parse(&read_input_file(file)?)?.into_request()?;
    let grant = session.authenticate(request.evaluator, code)?;
    let outcome = session.submit_evaluation(&grant, &request)?;
    if json_mode {
        return print_json(&outcome);
    }
    println!("Submission {:?} for {}", outcome.status, request.project);
    println!("Evaluators pending: {}", outcome.attempt.pending());
    if let Some(resolution) = &outcome.resolution {
        println!("Attempt resolved as {:?}; project is {:?}", resolution.class, resolution.project_status);
        for (student, status) in &resolution.members {
            println!("  {} -> {}", student, status);
        }
    }
    if outcome.code_revoked {
        println!("Access code used up for {}", request.defense);
    }
    Ok(())
}

pub fn cmd_resume(session: &mut Session, json_mode: bool) -> Result<(), CapstoneError> {
    let resumed = session.resume_pending_resolutions()?;
    if json_mode {
        return print_json(&resumed);
    }
    if resumed.is_empty() {
        println!("No pending resolutions.");
    }
    for r in &resumed {
        match &r.resolution {
            Some(resolution) => println!(
                "{} {} at {}: resolved as {:?}",
                r.project, r.phase, r.defense, resolution.class
            ),
            None => println!("{} {} at {}: already reflected", r.project, r.phase, r.defense),
        }
    }
    Ok(())
}

// =============================================================================
// MATCHING COMMAND
// =============================================================================

pub fn cmd_match(
    session: &mut Session,
    json_mode: bool,
    event: u64,
    supervisors: &[u64],
    commit: bool,
) -> Result<(), CapstoneError> {
    let available: Vec<SupervisorId> = supervisors.iter().copied().map(SupervisorId).collect();
    let plan = match session.match_supervisors(EventId(event), &available)? {
        MatchResult::Proposed(plan) => plan,
        MatchResult::NoEligibleProjects => {
            if json_mode {
                return print_json(&MatchResult::NoEligibleProjects);
            }
            println!("No projects of event#{} are waiting for a supervisor.", event);
            return Ok(());
        }
    };

    let committed = if commit {
        Some(session.commit_matched_supervisors(&plan.matches)?.len())
    } else {
        None
    };

    if json_mode {
        return print_json(&serde_json::json!({ "plan": plan, "committed": committed }));
    }
    println!("Supervisor matching for event#{} (cap {} per supervisor)", event, plan.cap);
    for m in &plan.matches {
        let projects: Vec<String> = m.projects.iter().map(ToString::to_string).collect();
        println!("  {}: {}", m.supervisor, projects.join(", "));
    }
    if !plan.unassigned.is_empty() {
        let projects: Vec<String> = plan.unassigned.iter().map(ToString::to_string).collect();
        println!("  unassigned: {}", projects.join(", "));
    }
    match committed {
        Some(n) => println!("Committed {} assignment(s).", n),
        None => println!("Preview only; re-run with --commit to persist."),
    }
    Ok(())
}

// =============================================================================
// STATUS COMMANDS
// =============================================================================

pub fn cmd_status(
    session: &Session,
    config: &Config,
    json_mode: bool,
    student: Option<u64>,
    project: Option<u64>,
) -> Result<(), CapstoneError> {
    if let Some(id) = student {
        let student: Student = session.get(StudentId(id))?;
        let next = next_required_defense_phase(&student.progress.encode());
        if json_mode {
            return print_json(&serde_json::json!({ "student": student, "next_defense": next }));
        }
        println!("{} {} <{}>", student.id, student.name, student.email);
        println!("Progress:     {}", student.progress);
        println!(
            "Next defense: {}",
            next.map_or_else(|| "none".to_string(), |p| p.to_string())
        );
        match student.project {
            Some(p) if student.is_associated => println!("Project:      {}", p),
            Some(p) => println!("Project:      {} (completed)", p),
            None => println!("Project:      none"),
        }
        return Ok(());
    }

    if let Some(id) = project {
        let project: Project = session.get(ProjectId(id))?;
        if json_mode {
            return print_json(&project);
        }
        println!("{} \"{}\" ({} tier, {:?})", project.id, project.title, project.tier, project.status);
        if let Some(s) = project.supervisor {
            println!("Supervisor: {}", s);
        }
        for (phase, record) in &project.phases {
            println!(
                "  {:<8} graduated={} report={} attempts={} evaluations={}",
                phase.to_string(),
                record.has_graduated_phase,
                record.report.is_some(),
                record.attempts.len(),
                record.evaluations.len()
            );
        }
        return Ok(());
    }

    let counts = serde_json::json!({
        "database": config.storage.path.to_string_lossy(),
        "persistent": session.is_persistent(),
        "events": session.list::<Event>()?.len(),
        "students": session.list::<Student>()?.len(),
        "projects": session.list::<Project>()?.len(),
        "evaluators": session.list::<Evaluator>()?.len(),
        "supervisors": session.list::<Supervisor>()?.len(),
    });
    if json_mode {
        return print_json(&counts);
    }
    println!("Capstone Status");
    println!("===============");
    println!("Database:    {:?}", config.storage.path);
    println!("Persistent:  {}", session.is_persistent());
    println!();
    for key in ["events", "students", "projects", "evaluators", "supervisors"] {
        println!("{:<12} {}", format!("{}:", key), counts[key]);
    }
    Ok(())
}

pub fn cmd_next_phase(json_mode: bool, code: &str) -> Result<(), CapstoneError> {
    let next = next_required_defense_phase(code.trim());
    if json_mode {
        return print_json(&serde_json::json!({ "code": code.trim(), "next_defense": next }));
    }
    match next {
        Some(phase) => println!("{}: next required defense is {}", code.trim(), phase),
        None => println!("{}: unknown (no further defense can be scheduled)", code.trim()),
    }
    Ok(())
}
