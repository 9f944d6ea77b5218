//! Tier resolution
//!
//! Candidates for the same id are ranked by tier, then version, then source
//! priority (higher wins). Whatever still ties is broken by the smallest
//! source path and flagged as ambiguous so the caller can surface it.
//! Profiles are applied after ranking.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::config::Profile;
use crate::definition::DefinitionRecord;
use crate::scan::TierScan;
use crate::{Error, Result};

/// An id offered by more than one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: String,
    pub winner: DefinitionRecord,
    pub losers: Vec<DefinitionRecord>,
    /// The winner tied with a loser on tier, version and priority.
    pub ambiguous: bool,
}

/// One winning record per id, after profile filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionPlan {
    pub winners: BTreeMap<String, DefinitionRecord>,
    pub excluded_ids: BTreeSet<String>,
    pub conflicts: Vec<Conflict>,
}

impl ResolutionPlan {
    pub fn len(&self) -> usize {
        self.winners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.winners.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&DefinitionRecord> {
        self.winners.get(id)
    }

    /// Narrow the plan to `ids`.
    ///
    /// Every id must be a winner of this plan; excluded or unknown ids are a
    /// validation error.
    pub fn subset<S: AsRef<str>>(&self, ids: &[S]) -> Result<Self> {
        let mut winners = BTreeMap::new();
        let mut unknown = Vec::new();
        for id in ids {
            let id = id.as_ref();
            match self.winners.get(id) {
                Some(record) => {
                    winners.insert(id.to_string(), record.clone());
                }
                None => unknown.push(id.to_string()),
            }
        }
        if !unknown.is_empty() {
            return Err(Error::validation(format!(
                "unknown or excluded ids: {}",
                unknown.join(", ")
            )));
        }

        let conflicts = self
            .conflicts
            .iter()
            .filter(|c| winners.contains_key(&c.id))
            .cloned()
            .collect();
        Ok(Self {
            winners,
            excluded_ids: BTreeSet::new(),
            conflicts,
        })
    }
}

/// Ranking used to pick a winner; `Greater` means `a` beats `b`.
pub fn precedence(a: &DefinitionRecord, b: &DefinitionRecord) -> Ordering {
    a.tier
        .cmp(&b.tier)
        .then_with(|| a.version.cmp(&b.version))
        .then_with(|| a.source_priority.cmp(&b.source_priority))
}

fn ranks_higher(a: &DefinitionRecord, b: &DefinitionRecord) -> bool {
    match precedence(a, b) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => tie_key(a) < tie_key(b),
    }
}

fn tie_key(record: &DefinitionRecord) -> String {
    record.raw_path.to_string_lossy().into_owned()
}

/// Merge tier scans into a plan.
///
/// Scans may arrive in any order; precedence is a property of the records.
pub fn resolve(tiers: &[TierScan], profile: &Profile) -> ResolutionPlan {
    let mut groups: BTreeMap<&str, Vec<&DefinitionRecord>> = BTreeMap::new();
    for scan in tiers {
        for record in &scan.records {
            groups.entry(record.id.as_str()).or_default().push(record);
        }
    }

    let mut plan = ResolutionPlan::default();
    for (id, candidates) in groups {
        let mut winner = candidates[0];
        for candidate in &candidates[1..] {
            if ranks_higher(candidate, winner) {
                winner = *candidate;
            }
        }

        if candidates.len() > 1 {
            let losers: Vec<DefinitionRecord> = candidates
                .iter()
                .filter(|c| !std::ptr::eq(**c, winner))
                .map(|c| (*c).clone())
                .collect();
            let ambiguous = losers
                .iter()
                .any(|l| precedence(l, winner) == Ordering::Equal);
            if ambiguous {
                tracing::warn!(id, "Ambiguous definition, picked smallest source path");
            } else {
                tracing::debug!(id, tier = %winner.tier, version = %winner.version, "Resolved conflict");
            }
            plan.conflicts.push(Conflict {
                id: id.to_string(),
                winner: winner.clone(),
                losers,
                ambiguous,
            });
        }

        if profile.excludes(id) {
            plan.excluded_ids.insert(id.to_string());
        } else {
            plan.winners.insert(id.to_string(), winner.clone());
        }
    }

    plan
}
