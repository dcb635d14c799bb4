//! Device archetype detection from the standard clusters a device exposes.

use crate::catalog::{Catalog, GENERIC_PROFILE, ProfileSpec};
use serde::Serialize;
use std::collections::BTreeSet;

/// Result of profile detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub profile: String,
    pub score: f32,
}

impl Detection {
    pub fn generic() -> Self {
        Self {
            profile: GENERIC_PROFILE.to_string(),
            score: 0.0,
        }
    }

    pub fn is_generic(&self) -> bool {
        self.profile == GENERIC_PROFILE
    }
}

/// Weighted fraction of the profile's expected clusters that are exposed.
pub fn score(profile: &ProfileSpec, exposed: &BTreeSet<u16>) -> f32 {
    let total: f32 = profile.clusters.iter().map(|c| c.weight).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let matched: f32 = profile
        .clusters
        .iter()
        .filter(|c| exposed.contains(&c.id))
        .map(|c| c.weight)
        .sum();
    matched / total
}

/// Picks the best scoring profile for `exposed_clusters`.
///
/// Ties go to the profile listed first in the catalog. A best score under the
/// catalog threshold yields [`Detection::generic`].
pub fn detect_profile(exposed_clusters: &[u16], catalog: &Catalog) -> Detection {
    let exposed: BTreeSet<u16> = exposed_clusters.iter().copied().collect();

    let mut best: Option<(&ProfileSpec, f32)> = None;
    for profile in &catalog.profiles {
        let s = score(profile, &exposed);
        if best.is_none_or(|(_, top)| s > top) {
            best = Some((profile, s));
        }
    }

    match best {
        Some((profile, s)) if s >= catalog.threshold && s > 0.0 => Detection {
            profile: profile.name.clone(),
            score: s,
        },
        _ => Detection::generic(),
    }
}
