//! Per-device session: resolved profile and mapping, inbound translation and
//! outbound writes.

use crate::catalog::Catalog;
use crate::codec::{self, DpType, DpValue, EncodeOptions};
use crate::error::{DpError, Result};
use crate::manifest::{DeviceManifest, ManifestLookup};
use crate::mapping::{DpMapping, build_mapping};
use crate::profile::{Detection, detect_profile};
use crate::protocol::{self, DpFrame};
use crate::transport::{ClusterTransport, Dispatcher, Outbound};
use futures_core::stream::Stream;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

const EVENT_CAPACITY: usize = 64;

/// Inbound datapoint surfaced to the capability layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DpEvent {
    Capability {
        dp: u8,
        capability: String,
        value: JsonValue,
    },
    /// Datapoint without a mapping. Informational, never an error.
    UnknownDatapoint {
        dp: u8,
        dp_type: DpType,
        raw: Vec<u8>,
        value: JsonValue,
    },
}

impl DpEvent {
    pub fn dp(&self) -> u8 {
        match self {
            DpEvent::Capability { dp, .. } | DpEvent::UnknownDatapoint { dp, .. } => *dp,
        }
    }
}

/// Where the session's profile came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileSource {
    Manifest,
    Detected,
}

/// Resolved once at device init and read-only afterwards.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    id: String,
    detection: Detection,
    source: ProfileSource,
    mapping: Arc<DpMapping>,
    broadcast_tx: broadcast::Sender<DpEvent>,
}

impl DeviceSession {
    /// Resolves the profile and mapping for a device.
    ///
    /// A manifest naming a profile wins. Otherwise the profile is detected from
    /// the manifest clusters when listed, else from `exposed_clusters`.
    /// Manifest datapoints are applied last.
    pub fn resolve(
        id: impl Into<String>,
        exposed_clusters: &[u16],
        manifest: Option<&DeviceManifest>,
        catalog: &Catalog,
    ) -> Result<Self> {
        let id = id.into();

        let (detection, source) = match manifest {
            Some(DeviceManifest {
                profile: Some(name), ..
            }) => (
                Detection {
                    profile: name.clone(),
                    score: 1.0,
                },
                ProfileSource::Manifest,
            ),
            Some(m) if !m.clusters.is_empty() => (detect_profile(&m.clusters, catalog), ProfileSource::Detected),
            _ => (detect_profile(exposed_clusters, catalog), ProfileSource::Detected),
        };

        let mut mapping = build_mapping(&detection.profile, catalog)?;
        if let Some(m) = manifest {
            mapping.extend(m.datapoints.iter().cloned());
        }

        info!(
            "Resolved device {} as '{}' (score {:.2}, {:?}) with {} mapped dp(s)",
            id,
            detection.profile,
            detection.score,
            source,
            mapping.len()
        );

        let (broadcast_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            id,
            detection,
            source,
            mapping: Arc::new(mapping),
            broadcast_tx,
        })
    }

    /// Resolves through a manifest store keyed by manufacturer and model.
    pub fn lookup(
        id: impl Into<String>,
        manufacturer: &str,
        model: &str,
        exposed_clusters: &[u16],
        manifests: &dyn ManifestLookup,
        catalog: &Catalog,
    ) -> Result<Self> {
        let manifest = manifests.lookup(manufacturer, model);
        if manifest.is_none() {
            debug!("No manifest for {}/{}, detecting from clusters", manufacturer, model);
        }
        Self::resolve(id, exposed_clusters, manifest, catalog)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn profile(&self) -> &str {
        &self.detection.profile
    }

    pub fn detection(&self) -> &Detection {
        &self.detection
    }

    pub fn source(&self) -> ProfileSource {
        self.source
    }

    pub fn mapping(&self) -> &DpMapping {
        &self.mapping
    }

    /// Translates one parsed record.
    pub fn translate(&self, frame: &DpFrame) -> Result<DpEvent> {
        match self.mapping.entry_for_dp(frame.dp) {
            Some(entry) => {
                if entry.dp_type != frame.dp_type {
                    debug!(
                        "Device {} dp {} reported as {} but mapped as {}",
                        self.id, frame.dp, frame.dp_type, entry.dp_type
                    );
                }
                let value = codec::decode(&frame.payload, frame.dp_type, &entry.decode_options())?;
                Ok(DpEvent::Capability {
                    dp: frame.dp,
                    capability: entry.capability.clone(),
                    value: entry.to_capability(&value),
                })
            }
            // unmapped records always surface; the raw bytes carry what did not decode
            None => {
                let value = match codec::decode(&frame.payload, frame.dp_type, &EncodeOptions::default()) {
                    Ok(value) => value.to_json(),
                    Err(e) => {
                        debug!("Device {} unknown dp {} kept undecoded: {}", self.id, frame.dp, e);
                        JsonValue::Null
                    }
                };
                debug!(
                    "Device {} unknown dp {} ({}) = {}",
                    self.id, frame.dp, frame.dp_type, value
                );
                Ok(DpEvent::UnknownDatapoint {
                    dp: frame.dp,
                    dp_type: frame.dp_type,
                    raw: frame.payload.clone(),
                    value,
                })
            }
        }
    }

    /// Parses a DataReport/DataResponse payload and broadcasts the resulting
    /// events. A mapped record that fails to decode is logged and skipped.
    pub fn handle_report(&self, bytes: &[u8]) -> Result<Vec<DpEvent>> {
        let frames = protocol::parse_report(bytes)?;
        let mut events = Vec::with_capacity(frames.len());
        for frame in &frames {
            match self.translate(frame) {
                Ok(event) => {
                    let _ = self.broadcast_tx.send(event.clone());
                    events.push(event);
                }
                Err(e) => warn!("Device {} dropped dp {}: {}", self.id, frame.dp, e),
            }
        }
        Ok(events)
    }

    /// Encodes a capability write into an outbound message.
    pub fn prepare_write(&self, capability: &str, value: &JsonValue) -> Result<Outbound> {
        let entry = self
            .mapping
            .entry_for_capability(capability)
            .ok_or_else(|| DpError::UnknownCapability(capability.to_string()))?;
        let dp_value = entry.to_dp_value(value)?;
        let payload = codec::encode(&dp_value, entry.dp_type, &EncodeOptions::default())?;
        debug!(
            "Device {} {} = {} -> dp {} ({})",
            self.id, capability, value, entry.dp, entry.dp_type
        );
        Outbound::datapoint(entry.dp, entry.dp_type, payload)
    }

    /// Encodes a write to a datapoint by id, bypassing the mapping.
    pub fn prepare_dp_write(&self, dp: u8, value: &DpValue, options: &EncodeOptions) -> Result<Outbound> {
        let payload = codec::encode(value, value.dp_type(), options)?;
        Outbound::datapoint(dp, value.dp_type(), payload)
    }

    /// Encodes and delivers a capability write.
    pub async fn write(
        &self,
        dispatcher: &Dispatcher,
        transport: &dyn ClusterTransport,
        capability: &str,
        value: &JsonValue,
    ) -> Result<()> {
        let outbound = self.prepare_write(capability, value)?;
        dispatcher.dispatch(transport, &outbound).await
    }

    /// Asks the device to report every datapoint.
    pub async fn query(&self, dispatcher: &Dispatcher, transport: &dyn ClusterTransport) -> Result<()> {
        dispatcher.dispatch(transport, &Outbound::data_query()).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DpEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Returns a Stream of events produced by [`handle_report`](Self::handle_report).
    pub fn stream(&self) -> impl Stream<Item = DpEvent> + Send + 'static {
        let mut rx = self.broadcast_tx.subscribe();
        let id = self.id.clone();
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        yield event;
                    }
                    Err(RecvError::Lagged(n)) => warn!("Device {} stream lagged by {} event(s)", id, n),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}
