//! Per-model device manifests.
//!
//! Manifests are read-only static data owned by the host. When one matches a
//! device it overrides cluster based detection.

use crate::error::Result;
use crate::mapping::MappingEntry;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceManifest {
    pub model: String,
    /// Manufacturer names (`_TZE200_xxxxxxxx` style) sharing this model
    #[serde(default)]
    pub manufacturers: Vec<String>,
    /// Explicit profile; detection runs on `clusters` when absent
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub clusters: Vec<u16>,
    /// Known dp assignments, applied over the profile tables
    #[serde(default)]
    pub datapoints: Vec<MappingEntry>,
}

impl DeviceManifest {
    pub fn matches(&self, manufacturer: &str, model: &str) -> bool {
        self.model.eq_ignore_ascii_case(model)
            && (self.manufacturers.is_empty()
                || self
                    .manufacturers
                    .iter()
                    .any(|m| m.eq_ignore_ascii_case(manufacturer)))
    }
}

/// Read-only manifest store consumed by session resolution.
pub trait ManifestLookup: Send + Sync {
    fn lookup(&self, manufacturer: &str, model: &str) -> Option<&DeviceManifest>;
}

/// In-memory manifest list, searched in order.
#[derive(Debug, Clone, Default)]
pub struct StaticManifests {
    manifests: Vec<DeviceManifest>,
}

impl StaticManifests {
    pub fn new(manifests: Vec<DeviceManifest>) -> Self {
        Self { manifests }
    }

    /// Loads a JSON array of manifests.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }
}

impl ManifestLookup for StaticManifests {
    fn lookup(&self, manufacturer: &str, model: &str) -> Option<&DeviceManifest> {
        self.manifests.iter().find(|m| m.matches(manufacturer, model))
    }
}
