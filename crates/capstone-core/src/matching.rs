//! # Supervisor Matching
//!
//! Similarity-based, capacity-balanced assignment of supervisors to
//! projects that passed their proposal defense.
//!
//! 1. Build the tag universe over candidate projects and supervisors.
//! 2. Represent each side as a binary presence vector over that universe.
//! 3. Score every (project, supervisor) pair by cosine similarity.
//! 4. In project order, assign the most similar supervisor still below the
//!    fairness cap `ceil(projects / supervisors)`.
//!
//! Cosine similarity is kept exact with integer arithmetic: two scores
//! `dot1 / sqrt(n1)` and `dot2 / sqrt(n2)` compare as `dot1² · n2` against
//! `dot2² · n1`. [`Similarity::per_million`] gives a fixed-point view for
//! display.

use crate::model::{Event, Project, Supervisor};
use crate::storage::{DocumentStore, Transaction};
use crate::{CapstoneError, EventId, Phase, ProjectId, SupervisorId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// SIMILARITY
// =============================================================================

/// Cosine similarity of two binary vectors, held as `dot / sqrt(norms)`.
#[derive(Debug, Clone, Copy)]
pub struct Similarity {
    /// Shared tag count.
    pub dot: u64,
    /// Product of the two squared magnitudes (tag counts).
    pub norms: u64,
}

impl Similarity {
    pub const ZERO: Similarity = Similarity { dot: 0, norms: 1 };

    /// Similarity of two presence vectors; zero if either vector is all-zero.
    #[must_use]
    pub fn of(a: &[bool], b: &[bool]) -> Self {
        let dot = a.iter().zip(b).filter(|(x, y)| **x && **y).count() as u64;
        let na = a.iter().filter(|x| **x).count() as u64;
        let nb = b.iter().filter(|x| **x).count() as u64;
        if na == 0 || nb == 0 {
            return Self::ZERO;
        }
        Self {
            dot,
            norms: na.saturating_mul(nb),
        }
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.dot == 0
    }

    /// Similarity scaled to `0..=1_000_000`, rounded down.
    #[must_use]
    pub fn per_million(&self) -> u32 {
        if self.is_zero() {
            return 0;
        }
        let scaled = (self.dot as u128 * self.dot as u128 * 1_000_000_000_000) / self.norms as u128;
        scaled.isqrt().min(1_000_000) as u32
    }
}

impl Ord for Similarity {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.dot as u128 * self.dot as u128 * other.norms as u128;
        let rhs = other.dot as u128 * other.dot as u128 * self.norms as u128;
        lhs.cmp(&rhs)
    }
}

impl PartialEq for Similarity {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Similarity {}

impl PartialOrd for Similarity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The sorted universe of tags, mapping each tag to a vector position.
#[derive(Debug, Clone, Default)]
pub struct TagSpace {
    index: BTreeMap<String, usize>,
}

impl TagSpace {
    pub fn new<'a>(sets: impl IntoIterator<Item = &'a BTreeSet<String>>) -> Self {
        let universe: BTreeSet<&String> = sets.into_iter().flatten().collect();
        let index = universe
            .into_iter()
            .enumerate()
            .map(|(i, tag)| (tag.clone(), i))
            .collect();
        Self { index }
    }

    /// Binary presence vector of `tags` over this space.
    #[must_use]
    pub fn vector(&self, tags: &BTreeSet<String>) -> Vec<bool> {
        let mut v = vec![false; self.index.len()];
        for tag in tags {
            if let Some(&i) = self.index.get(tag) {
                v[i] = true;
            }
        }
        v
    }
}

// =============================================================================
// ASSIGNMENT
// =============================================================================

/// One supervisor and the projects proposed for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorMatch {
    pub supervisor: SupervisorId,
    pub projects: Vec<ProjectId>,
}

/// Proposed grouping; nothing is persisted until it is committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPlan {
    /// One entry per supervisor, in input order.
    pub matches: Vec<SupervisorMatch>,
    pub unassigned: Vec<ProjectId>,
    /// Maximum projects per supervisor in this run.
    pub cap: usize,
}

/// Result of a matching run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchResult {
    Proposed(MatchPlan),
    NoEligibleProjects,
}

/// `ceil(projects / supervisors)`; zero when there are no supervisors.
#[must_use]
pub fn fairness_cap(projects: usize, supervisors: usize) -> usize {
    if supervisors == 0 {
        0
    } else {
        projects.div_ceil(supervisors)
    }
}

/// Pure assignment over tag sets, in input order on both sides.
#[must_use]
pub fn assign(
    projects: &[(ProjectId, BTreeSet<String>)],
    supervisors: &[(SupervisorId, BTreeSet<String>)],
) -> MatchPlan {
    let space = TagSpace::new(
        projects
            .iter()
            .map(|(_, t)| t)
            .chain(supervisors.iter().map(|(_, t)| t)),
    );
    let supervisor_vectors: Vec<Vec<bool>> =
        supervisors.iter().map(|(_, t)| space.vector(t)).collect();
    let cap = fairness_cap(projects.len(), supervisors.len());

    let mut load = vec![0usize; supervisors.len()];
    let mut grouped: Vec<Vec<ProjectId>> = vec![Vec::new(); supervisors.len()];
    let mut unassigned = Vec::new();

    for (project_id, tags) in projects {
        let pv = space.vector(tags);
        let mut ranked: Vec<(usize, Similarity)> = supervisor_vectors
            .iter()
            .enumerate()
            .map(|(i, sv)| (i, Similarity::of(&pv, sv)))
            .collect();
        // Stable: equal scores keep supervisor input order.
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        let chosen = ranked
            .into_iter()
            .find(|(i, sim)| !sim.is_zero() && load[*i] < cap)
            .map(|(i, _)| i);
        match chosen {
            Some(i) => {
                load[i] += 1;
                grouped[i].push(*project_id);
            }
            None => unassigned.push(*project_id),
        }
    }

    MatchPlan {
        matches: supervisors
            .iter()
            .zip(grouped)
            .map(|((supervisor, _), projects)| SupervisorMatch {
                supervisor: *supervisor,
                projects,
            })
            .collect(),
        unassigned,
        cap,
    }
}

/// Whether `project` may receive a supervisor.
#[must_use]
pub fn is_candidate(project: &Project) -> bool {
    project.is_active()
        && project.tier.requires_supervisor()
        && project.supervisor.is_none()
        && project
            .phases
            .get(&Phase::Proposal)
            .is_some_and(|r| r.has_graduated_phase)
}

/// Preview an assignment for the candidates of `event`.
///
/// An empty `available` list means every registered supervisor.
pub fn match_supervisors<S: DocumentStore + ?Sized>(
    tx: &mut Transaction<'_, S>,
    event: EventId,
    available: &[SupervisorId],
) -> Result<MatchResult, CapstoneError> {
    let _: Event = tx.load(event)?;

    let candidates: Vec<(ProjectId, BTreeSet<String>)> = tx
        .scan::<Project>()?
        .into_iter()
        .filter(|p| p.event == event && is_candidate(p))
        .map(|p| (p.id, p.categories))
        .collect();
    if candidates.is_empty() {
        tracing::info!(%event, "no projects eligible for supervisor matching");
        return Ok(MatchResult::NoEligibleProjects);
    }

    let supervisors: Vec<Supervisor> = if available.is_empty() {
        tx.scan::<Supervisor>()?
    } else {
        let mut seen = BTreeSet::new();
        let mut list = Vec::with_capacity(available.len());
        for &id in available {
            if seen.insert(id) {
                list.push(tx.load::<Supervisor>(id)?);
            }
        }
        list
    };
    let supervisors: Vec<(SupervisorId, BTreeSet<String>)> =
        supervisors.into_iter().map(|s| (s.id, s.tags)).collect();

    let plan = assign(&candidates, &supervisors);
    tracing::info!(
        %event,
        projects = candidates.len(),
        supervisors = supervisors.len(),
        unassigned = plan.unassigned.len(),
        cap = plan.cap,
        "supervisor matching proposed"
    );
    Ok(MatchResult::Proposed(plan))
}

/// Persist a confirmed assignment. Every pair is re-checked; one stale pair
/// rejects the whole commit.
pub fn commit_matched_supervisors<S: DocumentStore + ?Sized>(
    tx: &mut Transaction<'_, S>,
    matches: &[SupervisorMatch],
) -> Result<Vec<Project>, CapstoneError> {
    let mut updated = Vec::new();
    let mut seen = BTreeSet::new();
    for m in matches {
        let _: Supervisor = tx.load(m.supervisor)?;
        for &project_id in &m.projects {
            if !seen.insert(project_id) {
                return Err(CapstoneError::invalid(format!(
                    "{} is matched more than once",
                    project_id
                )));
            }
            let mut project: Project = tx.load(project_id)?;
            if !is_candidate(&project) {
                return Err(CapstoneError::invalid(format!(
                    "{} is no longer eligible for a supervisor",
                    project_id
                )));
            }
            project.supervisor = Some(m.supervisor);
            tx.put(&project)?;
            updated.push(project);
        }
    }
    tracing::info!(projects = updated.len(), "supervisor assignment committed");
    Ok(updated)
}
