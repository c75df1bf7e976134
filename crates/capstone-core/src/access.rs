//! # Access-Code Lifecycle
//!
//! One-time evaluator credentials, one per (evaluator, defense) pair.
//!
//! - Issuance: a random plaintext code is sealed as `blake3(salt || code)`
//!   and only the sealed form is stored. The plaintext leaves the engine
//!   through the mail collaborator and is never persisted or logged.
//! - Consumption: [`authenticate`] checks a plaintext code against every
//!   pending code of one evaluator and yields an [`EvaluatorGrant`] scoped
//!   to the matching defense.
//! - Revocation: once the evaluator has graded every project of their rooms
//!   for that defense, the sealed code is removed.

use crate::model::{AccessCode, Defense, Evaluator, Project};
use crate::primitives::{
    ACCESS_CODE_ALPHABET, ACCESS_CODE_SALT_LEN, DEFAULT_ACCESS_CODE_LENGTH, DEFAULT_GRANT_MINUTES,
    MIN_ACCESS_CODE_LENGTH,
};
use crate::storage::{DocumentStore, Transaction};
use crate::{CapstoneError, DefenseId, EvaluatorId};
use chrono::{DateTime, Duration, Utc};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// Operator-tunable access-code settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    /// Length of generated plaintext codes.
    pub code_length: usize,
    /// Lifetime of an evaluator grant, in minutes.
    pub grant_minutes: i64,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            code_length: DEFAULT_ACCESS_CODE_LENGTH,
            grant_minutes: DEFAULT_GRANT_MINUTES,
        }
    }
}

impl AccessPolicy {
    pub fn validate(&self) -> Result<(), CapstoneError> {
        if self.code_length < MIN_ACCESS_CODE_LENGTH {
            return Err(CapstoneError::invalid(format!(
                "access code length {} is below the minimum of {}",
                self.code_length, MIN_ACCESS_CODE_LENGTH
            )));
        }
        if self.grant_minutes <= 0 {
            return Err(CapstoneError::invalid("grant lifetime must be positive"));
        }
        Ok(())
    }
}

/// A short-lived evaluator session scoped to one defense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorGrant {
    pub evaluator: EvaluatorId,
    pub defense: DefenseId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl EvaluatorGrant {
    /// Whether the grant authorizes `evaluator` on `defense` at `now`.
    #[must_use]
    pub fn permits(&self, evaluator: EvaluatorId, defense: DefenseId, now: DateTime<Utc>) -> bool {
        self.evaluator == evaluator && self.defense == defense && now < self.expires_at
    }
}

/// A freshly generated code waiting for delivery.
///
/// Holds the plaintext in memory only; dropped after the mail collaborator
/// has been called.
#[derive(Clone, PartialEq, Eq)]
pub struct PendingCode {
    pub evaluator: EvaluatorId,
    pub email: String,
    pub defense: DefenseId,
    pub room: String,
    pub plaintext: String,
}

impl std::fmt::Debug for PendingCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCode")
            .field("evaluator", &self.evaluator)
            .field("defense", &self.defense)
            .field("room", &self.room)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// CODE GENERATION AND SEALING
// =============================================================================

/// Generate a random plaintext code over [`ACCESS_CODE_ALPHABET`].
pub fn generate_code<R: Rng>(rng: &mut R, length: usize) -> String {
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..ACCESS_CODE_ALPHABET.len());
            char::from(ACCESS_CODE_ALPHABET[idx])
        })
        .collect()
}

fn digest(salt: &[u8], code: &str) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt);
    hasher.update(normalize(code).as_bytes());
    hasher.finalize()
}

/// Codes are compared case-insensitively, ignoring surrounding whitespace.
fn normalize(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Seal a plaintext code for storage.
pub fn seal<R: RngCore>(
    rng: &mut R,
    defense: DefenseId,
    plaintext: &str,
    now: DateTime<Utc>,
) -> AccessCode {
    let mut salt = [0u8; ACCESS_CODE_SALT_LEN];
    rng.fill_bytes(&mut salt);
    AccessCode {
        defense,
        salt: hex::encode(salt),
        hash: digest(&salt, plaintext).to_hex().to_string(),
        issued_at: now,
    }
}

/// Constant-time check of a plaintext code against its sealed form.
#[must_use]
pub fn verify(stored: &AccessCode, plaintext: &str) -> bool {
    let (Ok(salt), Ok(expected)) = (
        hex::decode(&stored.salt),
        blake3::Hash::from_hex(&stored.hash),
    ) else {
        return false;
    };
    let actual = digest(&salt, plaintext);
    actual.as_bytes().ct_eq(expected.as_bytes()).into()
}

// =============================================================================
// LIFECYCLE OPERATIONS
// =============================================================================

/// Generate and store a fresh code for `evaluator` on `defense`.
///
/// Replaces any code already held for that defense. Returns the plaintext.
pub fn issue<R: Rng>(
    rng: &mut R,
    evaluator: &mut Evaluator,
    defense: DefenseId,
    policy: &AccessPolicy,
    now: DateTime<Utc>,
) -> String {
    let plaintext = generate_code(rng, policy.code_length);
    evaluator.store_code(seal(rng, defense, &plaintext, now));
    plaintext
}

/// Check a plaintext code against every pending code of `evaluator`.
///
/// Read-only: login does not consume the code.
pub fn authenticate<S: DocumentStore + ?Sized>(
    tx: &mut Transaction<'_, S>,
    evaluator: EvaluatorId,
    plaintext: &str,
    policy: &AccessPolicy,
    now: DateTime<Utc>,
) -> Result<EvaluatorGrant, CapstoneError> {
    let Some(record) = tx.get::<Evaluator>(evaluator)? else {
        return Err(CapstoneError::InvalidAccessCode);
    };

    // Scan every code so timing does not reveal which defense matched.
    let mut matched = None;
    for code in &record.access_codes {
        if verify(code, plaintext) && matched.is_none() {
            matched = Some(code.defense);
        }
    }

    let defense = matched.ok_or(CapstoneError::InvalidAccessCode)?;
    tracing::info!(%evaluator, %defense, "evaluator authenticated");
    Ok(EvaluatorGrant {
        evaluator,
        defense,
        issued_at: now,
        expires_at: now + Duration::minutes(policy.grant_minutes),
    })
}

/// Whether `evaluator` has graded every project assigned to them in `defense`.
///
/// `current` is the in-flight copy of the project just graded; other
/// projects are read through the transaction.
pub fn has_finished_defense<S: DocumentStore + ?Sized>(
    tx: &mut Transaction<'_, S>,
    defense: &Defense,
    evaluator: EvaluatorId,
    current: &Project,
) -> Result<bool, CapstoneError> {
    for project_id in defense.projects_for(evaluator) {
        let project = if project_id == current.id {
            current.clone()
        } else {
            tx.load::<Project>(project_id)?
        };
        let done = project
            .phase(defense.phase)?
            .attempt_for(defense.id)
            .is_some_and(|a| a.has_evaluated(evaluator));
        if !done {
            return Ok(false);
        }
    }
    Ok(true)
}
