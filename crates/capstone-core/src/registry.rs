//! # Registry
//!
//! Minimal data entry for the people and events the engine works with.

use crate::model::{Evaluator, Event, Student, Supervisor};
use crate::primitives::MAX_NAME_LENGTH;
use crate::progress::ProgressStatus;
use crate::storage::{DocumentStore, Transaction};
use crate::workflow::normalize_tags;
use crate::{CapstoneError, Tier};
use chrono::{DateTime, Utc};

fn check_name(field: &str, value: &str) -> Result<String, CapstoneError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CapstoneError::invalid(format!("{} must not be empty", field)));
    }
    if value.len() > MAX_NAME_LENGTH {
        return Err(CapstoneError::invalid(format!(
            "{} exceeds {} characters",
            field, MAX_NAME_LENGTH
        )));
    }
    Ok(value.to_string())
}

fn check_email(value: &str) -> Result<String, CapstoneError> {
    let email = check_name("email", value)?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            Ok(email.to_ascii_lowercase())
        }
        _ => Err(CapstoneError::invalid(format!("'{}' is not an e-mail address", email))),
    }
}

/// Register a student at the initial code of their academic year's tier.
pub fn register_student<S: DocumentStore + ?Sized>(
    tx: &mut Transaction<'_, S>,
    name: &str,
    email: &str,
    academic_year: u8,
) -> Result<Student, CapstoneError> {
    if academic_year == 0 {
        return Err(CapstoneError::invalid("academic year starts at 1"));
    }
    let student = Student {
        id: tx.allocate::<Student>()?,
        name: check_name("name", name)?,
        email: check_email(email)?,
        academic_year,
        progress: ProgressStatus::for_academic_year(academic_year),
        is_associated: false,
        project: None,
    };
    tx.put(&student)?;
    tracing::info!(student = %student.id, code = %student.progress, "student registered");
    Ok(student)
}

pub fn register_evaluator<S: DocumentStore + ?Sized>(
    tx: &mut Transaction<'_, S>,
    name: &str,
    email: &str,
) -> Result<Evaluator, CapstoneError> {
    let evaluator = Evaluator {
        id: tx.allocate::<Evaluator>()?,
        name: check_name("name", name)?,
        email: check_email(email)?,
        access_codes: Vec::new(),
    };
    tx.put(&evaluator)?;
    tracing::info!(evaluator = %evaluator.id, "evaluator registered");
    Ok(evaluator)
}

pub fn register_supervisor<S: DocumentStore + ?Sized>(
    tx: &mut Transaction<'_, S>,
    name: &str,
    email: &str,
    tags: &[String],
) -> Result<Supervisor, CapstoneError> {
    let supervisor = Supervisor {
        id: tx.allocate::<Supervisor>()?,
        name: check_name("name", name)?,
        email: check_email(email)?,
        tags: normalize_tags(tags)?,
    };
    tx.put(&supervisor)?;
    tracing::info!(supervisor = %supervisor.id, tags = supervisor.tags.len(), "supervisor registered");
    Ok(supervisor)
}

pub fn create_event<S: DocumentStore + ?Sized>(
    tx: &mut Transaction<'_, S>,
    title: &str,
    tier: Tier,
    year: u16,
    now: DateTime<Utc>,
) -> Result<Event, CapstoneError> {
    let event = Event {
        id: tx.allocate::<Event>()?,
        title: check_name("title", title)?,
        tier,
        year,
        created_at: now,
    };
    tx.put(&event)?;
    tracing::info!(event = %event.id, %tier, year, "event created");
    Ok(event)
}
