//! # Capstone CLI Module
//!
//! This module implements the operator interface for Capstone.
//!
//! ## Available Commands
//!
//! - `init` - Initialize a new database
//! - `register` - Register a student, evaluator, supervisor or event
//! - `team create` - Form a team project
//! - `report submit|reopen` - Upload a phase report / re-open submission
//! - `approve` - Supervisor approval of the next phase
//! - `schedule` - Schedule a defense from a TOML plan and deliver access codes
//! - `reissue` - Replace and re-deliver one evaluator's access code
//! - `login` - Check an evaluator access code
//! - `evaluate` - Submit an evaluation from a JSON file
//! - `match` - Propose (and optionally commit) supervisor assignments
//! - `status` - Show database, student or project status
//! - `next-phase` - Decode a progress code
//! - `resume` - Resolve graded attempts left unresolved

mod commands;

use crate::config::{Backend, Config, LogFormat};
use crate::mailer::ConsoleMailer;
use capstone_core::{AccessCodeMailer, CapstoneError};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Capstone - academic defense evaluation engine
///
/// Tracks student progress through proposal, mid and final defenses and
/// reconciles evaluator judgements into team-wide transitions.
#[derive(Parser, Debug)]
#[command(name = "capstone")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the config file (default: ./capstone.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the database (overrides config and CAPSTONE_DB)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Storage backend: "redb" (ACID database) or "memory" (volatile)
    #[arg(short = 'B', long, global = true)]
    pub backend: Option<Backend>,

    /// Log format: "text" or "json"
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new empty database
    Init {
        /// Replace an existing database
        #[arg(short, long)]
        force: bool,
    },

    /// Register people and events
    Register {
        #[command(subcommand)]
        what: RegisterCommand,
    },

    /// Team management
    Team {
        #[command(subcommand)]
        action: TeamCommand,
    },

    /// Phase reports
    Report {
        #[command(subcommand)]
        action: ReportCommand,
    },

    /// Supervisor approval of the next phase
    Approve {
        #[arg(short, long)]
        project: u64,

        #[arg(short, long)]
        supervisor: u64,
    },

    /// Schedule a defense from a TOML plan and deliver access codes
    Schedule {
        /// Path to the plan file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Replace a pending access code and deliver it again
    Reissue {
        #[arg(short, long)]
        evaluator: u64,

        #[arg(short, long)]
        defense: u64,
    },

    /// Check an evaluator access code
    Login {
        #[arg(short, long)]
        evaluator: u64,

        /// Plaintext access code
        #[arg(long)]
        code: String,
    },

    /// Submit an evaluation from a JSON file
    Evaluate {
        /// Path to the submission file
        #[arg(short, long)]
        file: PathBuf,

        /// The evaluator's access code
        #[arg(long)]
        code: String,
    },

    /// Match supervisors to projects by category similarity
    Match {
        #[arg(short, long)]
        event: u64,

        /// Restrict to these supervisors (comma-separated; default: all)
        #[arg(short, long, value_delimiter = ',')]
        supervisors: Vec<u64>,

        /// Persist the proposed assignment
        #[arg(long)]
        commit: bool,
    },

    /// Show database, student or project status
    Status {
        #[arg(long, conflicts_with = "project")]
        student: Option<u64>,

        #[arg(long)]
        project: Option<u64>,
    },

    /// Decode a progress code and show the next required defense
    NextPhase {
        #[arg(long)]
        code: String,
    },

    /// Resolve graded attempts that carry no resolution
    Resume,
}

#[derive(Subcommand, Debug)]
pub enum RegisterCommand {
    Student {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// Academic year (1-2 first-year, 3 minor, 4+ major)
        #[arg(long)]
        year: u8,
    },
    Evaluator {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
    Supervisor {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// Expertise tags (comma-separated)
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    Event {
        #[arg(long)]
        title: String,
        /// first-year, minor or major
        #[arg(long)]
        tier: String,
        #[arg(long)]
        year: u16,
    },
}

#[derive(Subcommand, Debug)]
pub enum TeamCommand {
    Create {
        #[arg(short, long)]
        event: u64,
        #[arg(short, long)]
        title: String,
        /// Student ids (comma-separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        members: Vec<u64>,
        /// Project categories (comma-separated)
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ReportCommand {
    Submit {
        #[arg(short, long)]
        project: u64,
        #[arg(short, long)]
        student: u64,
        /// proposal, mid or final
        #[arg(long)]
        phase: String,
        /// Stored report location
        #[arg(short, long)]
        file: String,
    },
    Reopen {
        #[arg(short, long)]
        project: u64,
    },
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Resolve the effective configuration: file, then environment, then flags.
pub fn resolve_config(
    cli: &Cli,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config, CapstoneError> {
    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_env(env)?;
    if let Some(path) = &cli.database {
        config.storage.path.clone_from(path);
    }
    if let Some(backend) = cli.backend {
        config.storage.backend = backend;
    }
    if let Some(format) = cli.log_format {
        config.log.format = format;
    }
    Ok(config)
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI, delivering access codes to stdout.
pub fn execute(cli: Cli, config: &Config) -> Result<(), CapstoneError> {
    let mut mailer = ConsoleMailer::stdout();
    execute_with(cli, config, &mut mailer)
}

/// Execute the CLI with an explicit mail collaborator.
pub fn execute_with(
    cli: Cli,
    config: &Config,
    mailer: &mut dyn AccessCodeMailer,
) -> Result<(), CapstoneError> {
    let json_mode = cli.json_mode;

    if let Some(Commands::Init { force }) = cli.command {
        return cmd_init(config, force);
    }

    let mut session = open_session(config)?;
    match cli.command {
        Some(Commands::Init { .. }) => Ok(()),
        Some(Commands::Register { what }) => cmd_register(&mut session, json_mode, what),
        Some(Commands::Team {
            action:
                TeamCommand::Create {
                    event,
                    title,
                    members,
                    categories,
                },
        }) => cmd_team_create(&mut session, json_mode, event, &title, &members, categories),
        Some(Commands::Report { action }) => cmd_report(&mut session, json_mode, action),
        Some(Commands::Approve {
            project,
            supervisor,
        }) => cmd_approve(&mut session, json_mode, project, supervisor),
        Some(Commands::Schedule { file }) => cmd_schedule(&mut session, json_mode, &file, mailer),
        Some(Commands::Reissue {
            evaluator,
            defense,
        }) => cmd_reissue(&mut session, json_mode, evaluator, defense, mailer),
        Some(Commands::Login { evaluator, code }) => {
            cmd_login(&session, json_mode, evaluator, &code)
        }
        Some(Commands::Evaluate { file, code }) => {
            cmd_evaluate(&mut session, json_mode, &file, &code)
        }
        Some(Commands::Match {
            event,
            supervisors,
            commit,
        }) => cmd_match(&mut session, json_mode, event, &supervisors, commit),
        Some(Commands::Status { student, project }) => {
            cmd_status(&session, config, json_mode, student, project)
        }
        Some(Commands::NextPhase { code }) => cmd_next_phase(json_mode, &code),
        Some(Commands::Resume) => cmd_resume(&mut session, json_mode),
        None => {
            // No subcommand - show status by default
            cmd_status(&session, config, json_mode, None, None)
        }
    }
}
