//! Static profile and datapoint tables.
//!
//! The built-in catalog is created once per process and shared read-only.
//! Deployments that need other tables load their own with
//! [`Catalog::from_json`].

use crate::codec::DpType;
use crate::error::Result;
use crate::mapping::MappingEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Profile name returned when no archetype scores above the threshold.
pub const GENERIC_PROFILE: &str = "generic";

/// Minimum overlap score for a detected profile.
pub const DEFAULT_THRESHOLD: f32 = 0.3;

/// Standard ZCL cluster ids referenced by the built-in profiles.
pub mod cluster {
    pub const BASIC: u16 = 0x0000;
    pub const POWER_CONFIG: u16 = 0x0001;
    pub const ON_OFF: u16 = 0x0006;
    pub const LEVEL_CONTROL: u16 = 0x0008;
    pub const DOOR_LOCK: u16 = 0x0101;
    pub const WINDOW_COVERING: u16 = 0x0102;
    pub const THERMOSTAT: u16 = 0x0201;
    pub const COLOR_CONTROL: u16 = 0x0300;
    pub const ILLUMINANCE: u16 = 0x0400;
    pub const TEMPERATURE: u16 = 0x0402;
    pub const PRESSURE: u16 = 0x0403;
    pub const HUMIDITY: u16 = 0x0405;
    pub const OCCUPANCY: u16 = 0x0406;
    pub const IAS_ZONE: u16 = 0x0500;
    pub const IAS_WD: u16 = 0x0502;
    pub const METERING: u16 = 0x0702;
    pub const ELECTRICAL_MEASUREMENT: u16 = 0x0B04;
}

fn default_weight() -> f32 {
    1.0
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpectedCluster {
    pub id: u16,
    #[serde(default = "default_weight")]
    pub weight: f32,
}

/// A device archetype and the standard clusters it is expected to expose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSpec {
    pub name: String,
    pub clusters: Vec<ExpectedCluster>,
}

impl ProfileSpec {
    pub fn new(name: impl Into<String>, clusters: &[(u16, f32)]) -> Self {
        Self {
            name: name.into(),
            clusters: clusters
                .iter()
                .map(|&(id, weight)| ExpectedCluster { id, weight })
                .collect(),
        }
    }
}

/// Profiles, in priority order, plus the datapoint tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Detection candidates; earlier entries win ties
    pub profiles: Vec<ProfileSpec>,
    /// Associations shared by every profile
    #[serde(default)]
    pub common: Vec<MappingEntry>,
    /// Per-profile associations, keyed by profile name
    #[serde(default)]
    pub datapoints: BTreeMap<String, Vec<MappingEntry>>,
}

static BUILTIN: OnceLock<Catalog> = OnceLock::new();

impl Catalog {
    /// Process-wide default tables.
    pub fn builtin() -> &'static Catalog {
        BUILTIN.get_or_init(build_builtin)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn profile(&self, name: &str) -> Option<&ProfileSpec> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// True when `name` is a detection profile or has a datapoint table.
    pub fn knows(&self, name: &str) -> bool {
        self.profile(name).is_some() || self.datapoints.contains_key(name)
    }
}

fn build_builtin() -> Catalog {
    use DpType::{Bool, Enum, Value};
    use cluster::*;

    // More specific archetypes first: a dimmable light also matches "switch".
    let profiles = vec![
        ProfileSpec::new("light", &[(ON_OFF, 1.0), (LEVEL_CONTROL, 1.0), (COLOR_CONTROL, 1.0)]),
        ProfileSpec::new("dimmer", &[(ON_OFF, 1.0), (LEVEL_CONTROL, 1.0)]),
        ProfileSpec::new(
            "plug",
            &[(ON_OFF, 1.0), (METERING, 1.0), (ELECTRICAL_MEASUREMENT, 1.0)],
        ),
        ProfileSpec::new("cover", &[(WINDOW_COVERING, 1.0), (POWER_CONFIG, 0.25)]),
        ProfileSpec::new(
            "thermostat",
            &[(THERMOSTAT, 1.0), (TEMPERATURE, 0.5), (POWER_CONFIG, 0.25)],
        ),
        ProfileSpec::new("lock", &[(DOOR_LOCK, 1.0), (POWER_CONFIG, 0.25)]),
        ProfileSpec::new("climate", &[(TEMPERATURE, 1.0), (HUMIDITY, 1.0), (POWER_CONFIG, 0.5)]),
        ProfileSpec::new("motion", &[(OCCUPANCY, 1.0), (ILLUMINANCE, 0.5), (POWER_CONFIG, 0.5)]),
        ProfileSpec::new("contact", &[(IAS_ZONE, 1.0), (POWER_CONFIG, 0.5)]),
        ProfileSpec::new("siren", &[(IAS_WD, 1.0), (IAS_ZONE, 0.5), (POWER_CONFIG, 0.25)]),
        ProfileSpec::new(
            "sensor",
            &[
                (TEMPERATURE, 1.0),
                (HUMIDITY, 1.0),
                (PRESSURE, 1.0),
                (ILLUMINANCE, 1.0),
                (OCCUPANCY, 1.0),
                (POWER_CONFIG, 0.5),
            ],
        ),
        ProfileSpec::new("switch", &[(ON_OFF, 1.0), (BASIC, 0.25)]),
    ];

    let common = vec![
        MappingEntry::new(1, "onoff", Bool),
        MappingEntry::new(2, "dim", Value).scaled(1000),
    ];

    let mut datapoints = BTreeMap::new();
    let mut table = |name: &str, entries: Vec<MappingEntry>| {
        datapoints.insert(name.to_string(), entries);
    };

    table(
        "climate",
        vec![
            MappingEntry::new(1, "measure_temperature", Value).scaled(10).signed(),
            MappingEntry::new(2, "measure_humidity", Value),
            MappingEntry::new(4, "measure_battery", Value),
        ],
    );
    table(
        "soil",
        vec![
            MappingEntry::new(3, "measure_humidity", Value),
            MappingEntry::new(5, "measure_temperature", Value).scaled(10).signed(),
            MappingEntry::new(15, "measure_battery", Value),
        ],
    );
    table(
        "motion",
        vec![
            MappingEntry::new(1, "alarm_motion", Bool),
            MappingEntry::new(5, "measure_temperature", Value).scaled(10).signed(),
            MappingEntry::new(6, "measure_humidity", Value),
            MappingEntry::new(12, "measure_luminance", Value),
            MappingEntry::new(15, "measure_battery", Value),
        ],
    );
    table(
        "contact",
        vec![
            MappingEntry::new(1, "alarm_contact", Bool).inverted(),
            MappingEntry::new(3, "measure_battery", Value),
        ],
    );
    table(
        "plug",
        vec![
            MappingEntry::new(17, "measure_current", Value).scaled(1000),
            MappingEntry::new(18, "measure_power", Value).scaled(10),
            MappingEntry::new(19, "measure_voltage", Value).scaled(10),
            MappingEntry::new(20, "meter_power", Value).scaled(100),
        ],
    );
    table(
        "cover",
        vec![
            MappingEntry::new(1, "windowcoverings_state", Enum).with_labels(["up", "idle", "down"]),
            MappingEntry::new(2, "windowcoverings_set", Value).scaled(100),
            MappingEntry::new(3, "windowcoverings_position", Value).scaled(100),
        ],
    );
    table(
        "thermostat",
        vec![
            MappingEntry::new(2, "target_temperature", Value).scaled(10).signed(),
            MappingEntry::new(3, "measure_temperature", Value).scaled(10).signed(),
            MappingEntry::new(4, "thermostat_mode", Enum),
        ],
    );
    table(
        "siren",
        vec![
            MappingEntry::new(104, "alarm_generic", Bool),
            MappingEntry::new(105, "measure_temperature", Value).scaled(10).signed(),
            MappingEntry::new(106, "measure_humidity", Value),
        ],
    );

    Catalog {
        threshold: DEFAULT_THRESHOLD,
        profiles,
        common,
        datapoints,
    }
}
