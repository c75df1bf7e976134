//! # Progress Status Codec
//!
//! A student's lifecycle position is the structured triple
//! `{tier, phase, step}` (or the terminal `Graduated` marker). The legacy
//! three-digit string form exists only at the persistence boundary:
//!
//! ```text
//!   T P S        T: 1 first-year, 2 minor, 3 major
//!   │ │ └─ step   P: 1 proposal, 2 mid, 3 final
//!   │ └─── phase  S: 0 initial/failed, 1 eligible for report, 2 eligible for defense
//!   └───── tier   "400" = graduated
//! ```
//!
//! ## Legacy deviation
//!
//! Stored data uses `"233"` (not `"232"`) for minor / final / eligible for
//! defense. The encoder keeps emitting `"233"` so existing documents stay
//! valid; the decoder accepts both spellings for that one position.
//!
//! ## Transition tables
//!
//! Each tier owns a static table mapping `(phase, signal)` to the resulting
//! position. Lookups are pure; an undefined combination yields
//! [`NextCode::Unknown`], which callers must turn into a hard error.

use crate::{CapstoneError, Phase, Step, Tier};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Code of the terminal graduated position.
pub const GRADUATED_CODE: &str = "400";

/// Stored spelling of minor / final / eligible for defense.
pub const LEGACY_MINOR_FINAL_DEFENSE_CODE: &str = "233";

/// Pattern-conforming spelling of the same position, accepted on decode.
pub const NORMALIZED_MINOR_FINAL_DEFENSE_CODE: &str = "232";

// =============================================================================
// POSITION
// =============================================================================

/// A position inside one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub tier: Tier,
    pub phase: Phase,
    pub step: Step,
}

impl Position {
    #[must_use]
    pub const fn new(tier: Tier, phase: Phase, step: Step) -> Self {
        Self { tier, phase, step }
    }
}

/// Where a student stands in the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProgressStatus {
    Active(Position),
    Graduated,
}

impl ProgressStatus {
    /// Initial position for a tier: proposal phase, nothing submitted.
    #[must_use]
    pub const fn initial(tier: Tier) -> Self {
        ProgressStatus::Active(Position::new(tier, Phase::Proposal, Step::InitialOrFailed))
    }

    /// Initial position at registration, derived from the academic year.
    #[must_use]
    pub fn for_academic_year(year: u8) -> Self {
        Self::initial(Tier::for_academic_year(year))
    }

    #[must_use]
    pub const fn at(tier: Tier, phase: Phase, step: Step) -> Self {
        ProgressStatus::Active(Position::new(tier, phase, step))
    }

    #[must_use]
    pub fn position(&self) -> Option<Position> {
        match self {
            ProgressStatus::Active(p) => Some(*p),
            ProgressStatus::Graduated => None,
        }
    }

    #[must_use]
    pub fn tier(&self) -> Option<Tier> {
        self.position().map(|p| p.tier)
    }

    #[must_use]
    pub fn is_graduated(&self) -> bool {
        matches!(self, ProgressStatus::Graduated)
    }

    /// The phase whose defense this student must pass next, if any.
    #[must_use]
    pub fn next_required_defense(&self) -> Option<Phase> {
        self.position().map(|p| p.phase)
    }

    /// Whether the student sits at `step` of `phase`.
    #[must_use]
    pub fn is_at(&self, phase: Phase, step: Step) -> bool {
        self.position()
            .is_some_and(|p| p.phase == phase && p.step == step)
    }

    /// Ordering key over (tier, phase) used to check monotonic progression.
    ///
    /// Graduated sorts after every active position.
    #[must_use]
    pub fn progression_rank(&self) -> (u8, u8) {
        match self {
            ProgressStatus::Active(p) => (tier_digit(p.tier), phase_digit(p.phase)),
            ProgressStatus::Graduated => (4, 0),
        }
    }

    /// Encode to the legacy three-digit code.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            ProgressStatus::Graduated => GRADUATED_CODE.to_string(),
            ProgressStatus::Active(p) => {
                if (p.tier, p.phase, p.step) == (Tier::Minor, Phase::Final, Step::EligibleForDefense)
                {
                    return LEGACY_MINOR_FINAL_DEFENSE_CODE.to_string();
                }
                format!(
                    "{}{}{}",
                    tier_digit(p.tier),
                    phase_digit(p.phase),
                    step_digit(p.step)
                )
            }
        }
    }

    /// Decode a legacy code.
    ///
    /// Anything outside the defined tier/phase/step combinations is
    /// `UnknownProgressCode`; the decoder never guesses.
    pub fn decode(code: &str) -> Result<Self, CapstoneError> {
        let unknown = || CapstoneError::UnknownProgressCode(code.to_string());

        if code == GRADUATED_CODE {
            return Ok(ProgressStatus::Graduated);
        }
        if code == LEGACY_MINOR_FINAL_DEFENSE_CODE || code == NORMALIZED_MINOR_FINAL_DEFENSE_CODE {
            return Ok(ProgressStatus::at(
                Tier::Minor,
                Phase::Final,
                Step::EligibleForDefense,
            ));
        }

        let bytes = code.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_digit) {
            return Err(unknown());
        }

        let tier = match bytes[0] {
            b'1' => Tier::FirstYear,
            b'2' => Tier::Minor,
            b'3' => Tier::Major,
            _ => return Err(unknown()),
        };
        let phase = match bytes[1] {
            b'1' => Phase::Proposal,
            b'2' => Phase::Mid,
            b'3' => Phase::Final,
            _ => return Err(unknown()),
        };
        let step = match bytes[2] {
            b'0' => Step::InitialOrFailed,
            b'1' => Step::EligibleForReport,
            b'2' => Step::EligibleForDefense,
            _ => return Err(unknown()),
        };

        if !tier.has_phase(phase) {
            return Err(unknown());
        }
        Ok(ProgressStatus::at(tier, phase, step))
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl From<ProgressStatus> for String {
    fn from(status: ProgressStatus) -> Self {
        status.encode()
    }
}

impl TryFrom<String> for ProgressStatus {
    type Error = CapstoneError;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        ProgressStatus::decode(&code)
    }
}

const fn tier_digit(tier: Tier) -> u8 {
    match tier {
        Tier::FirstYear => 1,
        Tier::Minor => 2,
        Tier::Major => 3,
    }
}

const fn phase_digit(phase: Phase) -> u8 {
    match phase {
        Phase::Proposal => 1,
        Phase::Mid => 2,
        Phase::Final => 3,
    }
}

const fn step_digit(step: Step) -> u8 {
    match step {
        Step::InitialOrFailed => 0,
        Step::EligibleForReport => 1,
        Step::EligibleForDefense => 2,
    }
}

/// Next required defense phase for a stored code.
///
/// Returns `None` ("unknown") for graduated students and for codes that do
/// not decode; callers must block the action in that case.
#[must_use]
pub fn next_required_defense_phase(code: &str) -> Option<Phase> {
    ProgressStatus::decode(code)
        .ok()
        .and_then(|s| s.next_required_defense())
}

// =============================================================================
// ELIGIBILITY SIGNALS
// =============================================================================

/// Named event fed into the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EligibilitySignal {
    CreateTeam,
    EligibleForReportSubmission,
    EligibleForDefense,
    DefensePass,
    DefenseFail,
    ApprovalFromSupervisor,
    Rejected,
}

impl EligibilitySignal {
    pub const ALL: [EligibilitySignal; 7] = [
        EligibilitySignal::CreateTeam,
        EligibilitySignal::EligibleForReportSubmission,
        EligibilitySignal::EligibleForDefense,
        EligibilitySignal::DefensePass,
        EligibilitySignal::DefenseFail,
        EligibilitySignal::ApprovalFromSupervisor,
        EligibilitySignal::Rejected,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            EligibilitySignal::CreateTeam => "createTeam",
            EligibilitySignal::EligibleForReportSubmission => "eligibleForReportSubmission",
            EligibilitySignal::EligibleForDefense => "eligibleForDefense",
            EligibilitySignal::DefensePass => "defensePass",
            EligibilitySignal::DefenseFail => "defenseFail",
            EligibilitySignal::ApprovalFromSupervisor => "approvalFromSupervisor",
            EligibilitySignal::Rejected => "rejected",
        }
    }
}

impl fmt::Display for EligibilitySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of a table lookup. `Unknown` is the sentinel for undefined entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextCode {
    Code(ProgressStatus),
    Unknown,
}

/// One row of a tier transition table.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub phase: Phase,
    pub signal: EligibilitySignal,
    pub to: ProgressStatus,
}

const fn row(phase: Phase, signal: EligibilitySignal, to: ProgressStatus) -> Transition {
    Transition { phase, signal, to }
}

use EligibilitySignal as Sig;
use Phase::{Final, Mid, Proposal};
use Step::{EligibleForDefense as Defense, EligibleForReport as Report, InitialOrFailed as Initial};

/// First-year tier: proposal and final only, no supervisor.
#[rustfmt::skip]
pub const FIRST_YEAR_TABLE: &[Transition] = &[
    row(Proposal, Sig::CreateTeam, ProgressStatus::at(Tier::FirstYear, Proposal, Report)),
    row(Proposal, Sig::EligibleForReportSubmission, ProgressStatus::at(Tier::FirstYear, Proposal, Report)),
    row(Proposal, Sig::EligibleForDefense, ProgressStatus::at(Tier::FirstYear, Proposal, Defense)),
    row(Proposal, Sig::DefensePass, ProgressStatus::at(Tier::FirstYear, Final, Report)),
    row(Proposal, Sig::DefenseFail, ProgressStatus::at(Tier::FirstYear, Proposal, Initial)),
    row(Proposal, Sig::Rejected, ProgressStatus::at(Tier::FirstYear, Proposal, Initial)),
    row(Final, Sig::EligibleForReportSubmission, ProgressStatus::at(Tier::FirstYear, Final, Report)),
    row(Final, Sig::EligibleForDefense, ProgressStatus::at(Tier::FirstYear, Final, Defense)),
    row(Final, Sig::DefensePass, ProgressStatus::initial(Tier::Minor)),
    row(Final, Sig::DefenseFail, ProgressStatus::at(Tier::FirstYear, Final, Initial)),
];

/// Minor tier: supervised mid and final phases.
#[rustfmt::skip]
pub const MINOR_TABLE: &[Transition] = &[
    row(Proposal, Sig::CreateTeam, ProgressStatus::at(Tier::Minor, Proposal, Report)),
    row(Proposal, Sig::EligibleForReportSubmission, ProgressStatus::at(Tier::Minor, Proposal, Report)),
    row(Proposal, Sig::EligibleForDefense, ProgressStatus::at(Tier::Minor, Proposal, Defense)),
    row(Proposal, Sig::DefensePass, ProgressStatus::at(Tier::Minor, Mid, Initial)),
    row(Proposal, Sig::DefenseFail, ProgressStatus::at(Tier::Minor, Proposal, Initial)),
    row(Proposal, Sig::Rejected, ProgressStatus::at(Tier::Minor, Proposal, Initial)),
    row(Mid, Sig::ApprovalFromSupervisor, ProgressStatus::at(Tier::Minor, Mid, Report)),
    row(Mid, Sig::EligibleForReportSubmission, ProgressStatus::at(Tier::Minor, Mid, Report)),
    row(Mid, Sig::EligibleForDefense, ProgressStatus::at(Tier::Minor, Mid, Defense)),
    row(Mid, Sig::DefensePass, ProgressStatus::at(Tier::Minor, Final, Initial)),
    row(Mid, Sig::DefenseFail, ProgressStatus::at(Tier::Minor, Mid, Initial)),
    row(Final, Sig::ApprovalFromSupervisor, ProgressStatus::at(Tier::Minor, Final, Report)),
    row(Final, Sig::EligibleForReportSubmission, ProgressStatus::at(Tier::Minor, Final, Report)),
    // Encodes as the legacy "233".
    row(Final, Sig::EligibleForDefense, ProgressStatus::at(Tier::Minor, Final, Defense)),
    row(Final, Sig::DefensePass, ProgressStatus::initial(Tier::Major)),
    row(Final, Sig::DefenseFail, ProgressStatus::at(Tier::Minor, Final, Initial)),
];

/// Major tier: terminal; passing the final defense graduates.
#[rustfmt::skip]
pub const MAJOR_TABLE: &[Transition] = &[
    row(Proposal, Sig::CreateTeam, ProgressStatus::at(Tier::Major, Proposal, Report)),
    row(Proposal, Sig::EligibleForReportSubmission, ProgressStatus::at(Tier::Major, Proposal, Report)),
    row(Proposal, Sig::EligibleForDefense, ProgressStatus::at(Tier::Major, Proposal, Defense)),
    row(Proposal, Sig::DefensePass, ProgressStatus::at(Tier::Major, Mid, Initial)),
    row(Proposal, Sig::DefenseFail, ProgressStatus::at(Tier::Major, Proposal, Initial)),
    row(Proposal, Sig::Rejected, ProgressStatus::at(Tier::Major, Proposal, Initial)),
    row(Mid, Sig::ApprovalFromSupervisor, ProgressStatus::at(Tier::Major, Mid, Report)),
    row(Mid, Sig::EligibleForReportSubmission, ProgressStatus::at(Tier::Major, Mid, Report)),
    row(Mid, Sig::EligibleForDefense, ProgressStatus::at(Tier::Major, Mid, Defense)),
    row(Mid, Sig::DefensePass, ProgressStatus::at(Tier::Major, Final, Initial)),
    row(Mid, Sig::DefenseFail, ProgressStatus::at(Tier::Major, Mid, Initial)),
    row(Final, Sig::ApprovalFromSupervisor, ProgressStatus::at(Tier::Major, Final, Report)),
    row(Final, Sig::EligibleForReportSubmission, ProgressStatus::at(Tier::Major, Final, Report)),
    row(Final, Sig::EligibleForDefense, ProgressStatus::at(Tier::Major, Final, Defense)),
    row(Final, Sig::DefensePass, ProgressStatus::Graduated),
    row(Final, Sig::DefenseFail, ProgressStatus::at(Tier::Major, Final, Initial)),
];

/// The transition table owned by `tier`.
#[must_use]
pub fn table(tier: Tier) -> &'static [Transition] {
    match tier {
        Tier::FirstYear => FIRST_YEAR_TABLE,
        Tier::Minor => MINOR_TABLE,
        Tier::Major => MAJOR_TABLE,
    }
}

/// Pure lookup: the code produced by `signal` in `phase` of `tier`.
#[must_use]
pub fn next_code(tier: Tier, phase: Phase, signal: EligibilitySignal) -> NextCode {
    table(tier)
        .iter()
        .find(|t| t.phase == phase && t.signal == signal)
        .map_or(NextCode::Unknown, |t| NextCode::Code(t.to))
}

/// Like [`next_code`], with the `Unknown` sentinel turned into an error.
pub fn advance(
    tier: Tier,
    phase: Phase,
    signal: EligibilitySignal,
) -> Result<ProgressStatus, CapstoneError> {
    match next_code(tier, phase, signal) {
        NextCode::Code(status) => Ok(status),
        NextCode::Unknown => Err(CapstoneError::UnknownEligibilityTransition {
            tier,
            phase,
            signal: signal.name(),
        }),
    }
}

// =============================================================================
// TESTS
// =============================================================================
