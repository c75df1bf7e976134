//! # Engine Primitives
//!
//! Hardcoded runtime constants for the Capstone engine.
//!
//! These values are compiled into the binary and are immutable at runtime.
//! Operator-tunable values (code length, grant lifetime) live in the app
//! configuration and only default to the constants below.

/// Magic bytes stored in the database metadata to identify a Capstone store.
pub const MAGIC_BYTES: &[u8; 4] = b"CAPS";

/// Current document envelope format version.
///
/// Increment this when making breaking changes to the stored document layout.
pub const FORMAT_VERSION: u8 = 1;

/// Maximum number of students in one team.
pub const MAX_TEAM_SIZE: usize = 5;

/// Highest mark an evaluator may award one student.
pub const MAX_INDIVIDUAL_MARKS: u16 = 100;

/// Maximum number of optimistic commit attempts for one unit of work.
///
/// A unit of work that keeps hitting `WriteConflict` after this many
/// attempts surfaces the conflict to the caller.
pub const MAX_COMMIT_ATTEMPTS: usize = 3;

// =============================================================================
// ACCESS CODES
// =============================================================================

/// Default length of a plaintext evaluator access code.
pub const DEFAULT_ACCESS_CODE_LENGTH: usize = 12;

/// Shortest access code the engine will issue.
pub const MIN_ACCESS_CODE_LENGTH: usize = 8;

/// Alphabet for plaintext access codes (no ambiguous 0/O, 1/I).
pub const ACCESS_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length in bytes of the random salt prepended before hashing a code.
pub const ACCESS_CODE_SALT_LEN: usize = 16;

/// Default lifetime of an evaluator grant, in minutes.
pub const DEFAULT_GRANT_MINUTES: i64 = 240;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length for names, titles and e-mail addresses.
pub const MAX_NAME_LENGTH: usize = 256;

/// Maximum number of category tags on a project or supervisor.
pub const MAX_TAGS: usize = 32;

/// Maximum number of rooms in one defense.
pub const MAX_ROOMS: usize = 64;
