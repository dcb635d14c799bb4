//! Bidirectional datapoint to capability translation.

use crate::catalog::{Catalog, GENERIC_PROFILE};
use crate::codec::{DpType, DpValue, EncodeOptions};
use crate::error::{DpError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};

/// One dp ↔ capability association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub dp: u8,
    pub capability: String,
    #[serde(rename = "type")]
    pub dp_type: DpType,
    /// Integer divisor applied to inbound numbers, multiplier for outbound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
    /// Numeric payloads are two's complement
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub signed: bool,
    /// Booleans reported inverted (contact sensors report "closed")
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub invert: bool,
    /// Labels for enum indices
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

impl MappingEntry {
    pub fn new(dp: u8, capability: impl Into<String>, dp_type: DpType) -> Self {
        Self {
            dp,
            capability: capability.into(),
            dp_type,
            scale: None,
            signed: false,
            invert: false,
            labels: Vec::new(),
        }
    }

    pub fn scaled(mut self, divisor: u32) -> Self {
        self.scale = Some(divisor);
        self
    }

    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    /// Codec options for decoding this entry's payloads.
    pub fn decode_options(&self) -> EncodeOptions {
        EncodeOptions {
            signed: self.signed,
            ..Default::default()
        }
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    fn divisor(&self) -> Option<u32> {
        self.scale.filter(|&s| s > 1)
    }

    /// Capability-side rendering of a decoded datapoint.
    pub fn to_capability(&self, value: &DpValue) -> JsonValue {
        match value {
            DpValue::Bool(b) => JsonValue::Bool(*b != self.invert),
            DpValue::Enum(n) if !self.labels.is_empty() => usize::try_from(*n)
                .ok()
                .and_then(|i| self.labels.get(i))
                .map(|label| JsonValue::String(label.clone()))
                .unwrap_or_else(|| JsonValue::from(*n)),
            DpValue::Value(n) | DpValue::Enum(n) => match self.divisor() {
                Some(d) => serde_json::Number::from_f64(*n as f64 / f64::from(d))
                    .map(JsonValue::Number)
                    .unwrap_or_else(|| JsonValue::from(*n)),
                None => JsonValue::from(*n),
            },
            other => other.to_json(),
        }
    }

    /// Datapoint value for a capability write.
    pub fn to_dp_value(&self, value: &JsonValue) -> Result<DpValue> {
        if let JsonValue::String(label) = value
            && let Some(index) = self.labels.iter().position(|l| l == label)
        {
            return DpValue::from_json(&JsonValue::from(index), self.dp_type);
        }

        match (self.dp_type, value) {
            (DpType::Bool, _) => match DpValue::from_json(value, DpType::Bool)? {
                DpValue::Bool(b) => Ok(DpValue::Bool(b != self.invert)),
                other => Ok(other),
            },
            (DpType::Value | DpType::Enum, JsonValue::Number(n)) if self.divisor().is_some() => {
                let d = self.divisor().map(f64::from).unwrap_or(1.0);
                let f = n
                    .as_f64()
                    .filter(|f| f.is_finite())
                    .ok_or_else(|| DpError::encode(value, self.dp_type))?;
                DpValue::from_json(&JsonValue::from((f * d).round() as i64), self.dp_type)
            }
            _ => DpValue::from_json(value, self.dp_type),
        }
    }
}

/// Immutable-after-build bidirectional map between datapoint ids and
/// capability names. Each dp and each capability appears at most once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DpMapping {
    by_dp: BTreeMap<u8, MappingEntry>,
    by_capability: HashMap<String, u8>,
}

impl DpMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `entry`, evicting any existing pair that shares its dp or its
    /// capability. Returns the evicted entries.
    pub fn insert(&mut self, entry: MappingEntry) -> Vec<MappingEntry> {
        let mut evicted = Vec::new();
        if let Some(old) = self.by_dp.remove(&entry.dp) {
            self.by_capability.remove(&old.capability);
            evicted.push(old);
        }
        if let Some(old_dp) = self.by_capability.remove(&entry.capability)
            && let Some(old) = self.by_dp.remove(&old_dp)
        {
            evicted.push(old);
        }
        self.by_capability.insert(entry.capability.clone(), entry.dp);
        self.by_dp.insert(entry.dp, entry);
        evicted
    }

    pub fn extend<I: IntoIterator<Item = MappingEntry>>(&mut self, entries: I) {
        for entry in entries {
            for old in self.insert(entry) {
                debug!("Mapping dp {} -> {} overridden", old.dp, old.capability);
            }
        }
    }

    pub fn entry_for_dp(&self, dp: u8) -> Option<&MappingEntry> {
        self.by_dp.get(&dp)
    }

    pub fn entry_for_capability(&self, capability: &str) -> Option<&MappingEntry> {
        self.by_capability
            .get(capability)
            .and_then(|dp| self.by_dp.get(dp))
    }

    pub fn capability(&self, dp: u8) -> Option<&str> {
        self.by_dp.get(&dp).map(|e| e.capability.as_str())
    }

    pub fn dp(&self, capability: &str) -> Option<u8> {
        self.by_capability.get(capability).copied()
    }

    pub fn len(&self) -> usize {
        self.by_dp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_dp.is_empty()
    }

    /// Entries in ascending dp order.
    pub fn iter(&self) -> impl Iterator<Item = &MappingEntry> {
        self.by_dp.values()
    }
}

impl FromIterator<MappingEntry> for DpMapping {
    fn from_iter<I: IntoIterator<Item = MappingEntry>>(iter: I) -> Self {
        let mut mapping = DpMapping::new();
        mapping.extend(iter);
        mapping
    }
}

/// Builds the mapping for a resolved profile: the common table first, then
/// the profile table which wins on conflicts.
pub fn build_mapping(profile: &str, catalog: &Catalog) -> Result<DpMapping> {
    if profile != GENERIC_PROFILE && !catalog.knows(profile) {
        return Err(DpError::UnknownProfile(profile.to_string()));
    }
    let mut mapping = DpMapping::new();
    mapping.extend(catalog.common.iter().cloned());
    if let Some(entries) = catalog.datapoints.get(profile) {
        mapping.extend(entries.iter().cloned());
    }
    debug!("Built mapping for profile '{}' with {} entries", profile, mapping.len());
    Ok(mapping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn insert_keeps_the_map_one_to_one() {
        let mut m = DpMapping::new();
        m.insert(MappingEntry::new(1, "onoff", DpType::Bool));
        m.insert(MappingEntry::new(2, "dim", DpType::Value));
        let evicted = m.insert(MappingEntry::new(2, "onoff", DpType::Bool));
        assert_eq!(evicted.len(), 2);
        assert_eq!(m.len(), 1);
        assert_eq!(m.dp("onoff"), Some(2));
        assert_eq!(m.capability(1), None);
        assert_eq!(m.dp("dim"), None);
    }

    #[test]
    fn scaled_values_both_ways() {
        let e = MappingEntry::new(1, "measure_temperature", DpType::Value).scaled(10);
        assert_eq!(e.to_capability(&DpValue::Value(215)), json!(21.5));
        assert_eq!(e.to_dp_value(&json!(21.46)).unwrap(), DpValue::Value(215));
        assert_eq!(e.to_dp_value(&json!(20)).unwrap(), DpValue::Value(200));
    }

    #[test]
    fn inverted_booleans() {
        let e = MappingEntry::new(1, "alarm_contact", DpType::Bool).inverted();
        assert_eq!(e.to_capability(&DpValue::Bool(false)), json!(true));
        assert_eq!(e.to_dp_value(&json!(true)).unwrap(), DpValue::Bool(false));
    }

    #[test]
    fn enum_labels() {
        let e = MappingEntry::new(1, "windowcoverings_state", DpType::Enum).with_labels(["up", "idle", "down"]);
        assert_eq!(e.to_capability(&DpValue::Enum(2)), json!("down"));
        assert_eq!(e.to_capability(&DpValue::Enum(7)), json!(7));
        assert_eq!(e.to_dp_value(&json!("idle")).unwrap(), DpValue::Enum(1));
        assert_eq!(e.to_dp_value(&json!(0)).unwrap(), DpValue::Enum(0));
        assert!(e.to_dp_value(&json!("sideways")).is_err());
    }

    #[test]
    fn later_layers_win_over_common_entries() {
        let mut m = build_mapping("climate", Catalog::builtin()).unwrap();

        // profile dp 2 and dp 1 displace the common dim and onoff pairs
        assert_eq!(m.capability(2), Some("measure_humidity"));
        assert_eq!(m.dp("dim"), None);
        assert_eq!(m.capability(1), Some("measure_temperature"));
        assert_eq!(m.dp("onoff"), None);
        let temperature = m.entry_for_dp(1).unwrap();
        assert_eq!((temperature.scale, temperature.signed), (Some(10), true));

        // manifest entries go on last
        m.extend([MappingEntry::new(2, "measure_luminance", DpType::Value)]);
        assert_eq!(m.capability(2), Some("measure_luminance"));
        assert_eq!(m.dp("measure_humidity"), None);
        assert_eq!(m.dp("measure_battery"), Some(4));
    }

    #[test]
    fn unknown_profile_is_rejected() {
        assert_eq!(
            build_mapping("toaster", Catalog::builtin()),
            Err(DpError::UnknownProfile("toaster".into()))
        );
        assert!(build_mapping(GENERIC_PROFILE, Catalog::builtin()).is_ok());
    }
}
