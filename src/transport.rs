//! Outbound delivery through an unstable cluster transport.
//!
//! Host Zigbee bindings expose different primitives depending on their version
//! and fork, and some firmware only answers non-standard shapes. The
//! [`Dispatcher`] therefore tries an ordered list of [`Strategy`] values, each
//! one a single primitive plus argument shape, and stops at the first that
//! completes. Failed attempts are logged and swallowed. When the primary
//! endpoint is exhausted the same list is replayed on the alternate endpoints.
//!
//! Strategy order matters: a partially matching shape can write an unintended
//! attribute, so the least risky shapes come first.

use crate::codec::DpType;
use crate::error::{DpError, Result};
use crate::protocol::{self, CLUSTER_EF00, Ef00Command};
use futures_util::future::{self, BoxFuture};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_PRIMARY_ENDPOINT: u8 = 1;
/// Endpoints some firmware uses for a misplaced EF00 service.
/// Reverse-engineered; override through [`DispatcherBuilder::alternate_endpoints`].
pub const DEFAULT_ALTERNATE_ENDPOINTS: &[u8] = &[2, 3];
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Failure of a single transport attempt. Never leaves the dispatcher.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The transport does not expose this primitive or argument shape
    #[error("Primitive not available: {0}")]
    Unsupported(&'static str),

    /// The primitive exists but the call failed
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The attempt did not complete within the per-attempt limit
    #[error("Attempt timed out")]
    Timeout,
}

pub type TransportResult = std::result::Result<(), TransportError>;

/// Argument shapes accepted by a cluster's datapoint primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatapointArgs<'a> {
    /// `{ dp, datatype, data }`
    Fields {
        dp: u8,
        dp_type: DpType,
        data: &'a [u8],
    },
    /// `{ data }` holding the complete frame, sequence number included
    Frame(&'a [u8]),
}

fn unsupported<'a>(primitive: &'static str) -> BoxFuture<'a, TransportResult> {
    Box::pin(future::ready(Err(TransportError::Unsupported(primitive))))
}

/// The host's cluster binding for one device.
///
/// Every primitive is optional: the default implementations report
/// [`TransportError::Unsupported`], so an implementation only overrides what
/// the underlying binding actually exposes.
pub trait ClusterTransport: Send + Sync {
    /// Generic datapoint setter of an intermediary EF00 manager.
    fn send_dp<'a>(
        &'a self,
        _endpoint: u8,
        _dp: u8,
        _dp_type: DpType,
        _data: &'a [u8],
    ) -> BoxFuture<'a, TransportResult> {
        unsupported("send_dp")
    }

    /// The cluster's `datapoint` command.
    fn datapoint<'a>(&'a self, _endpoint: u8, _args: DatapointArgs<'a>) -> BoxFuture<'a, TransportResult> {
        unsupported("datapoint")
    }

    /// The cluster's `setData` command, with records lacking the sequence prefix.
    fn set_data<'a>(&'a self, _endpoint: u8, _seq: u16, _dp_values: &'a [u8]) -> BoxFuture<'a, TransportResult> {
        unsupported("set_data")
    }

    /// Generic cluster command dispatcher.
    fn command<'a>(
        &'a self,
        _endpoint: u8,
        _command: Ef00Command,
        _payload: &'a [u8],
    ) -> BoxFuture<'a, TransportResult> {
        unsupported("command")
    }

    /// Raw frame send on the endpoint.
    fn send_frame<'a>(
        &'a self,
        _endpoint: u8,
        _cluster: u16,
        _frame: &'a [u8],
        _command: u8,
    ) -> BoxFuture<'a, TransportResult> {
        unsupported("send_frame")
    }

    /// Attribute writer on a cluster.
    fn write_attribute<'a>(
        &'a self,
        _endpoint: u8,
        _cluster: u16,
        _attribute: u16,
        _data: &'a [u8],
    ) -> BoxFuture<'a, TransportResult> {
        unsupported("write_attribute")
    }
}

/// A datapoint write carried by an [`Outbound`] message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DpWrite {
    pub dp: u8,
    pub dp_type: DpType,
    pub payload: Vec<u8>,
}

/// One outbound EF00 message, ready for any strategy shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub seq: u16,
    pub command: Ef00Command,
    // complete cluster payload; for datapoint writes, the full frame
    body: Vec<u8>,
    write: Option<DpWrite>,
}

impl Outbound {
    /// Datapoint write with an already encoded payload.
    pub fn datapoint(dp: u8, dp_type: DpType, payload: Vec<u8>) -> Result<Self> {
        let seq = protocol::next_seq();
        let body = protocol::build_frame_with_seq(seq, dp, dp_type, &payload)?;
        Ok(Self {
            seq,
            command: Ef00Command::DataRequest,
            body,
            write: Some(DpWrite {
                dp,
                dp_type,
                payload,
            }),
        })
    }

    /// Datapoint write from an already built frame. Trailing bytes are dropped.
    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        let parsed = protocol::parse_frame(frame)?;
        let seq = protocol::frame_seq(frame)?;
        let body = protocol::build_frame_with_seq(seq, parsed.dp, parsed.dp_type, &parsed.payload)?;
        Ok(Self {
            seq,
            command: Ef00Command::DataRequest,
            body,
            write: Some(DpWrite {
                dp: parsed.dp,
                dp_type: parsed.dp_type,
                payload: parsed.payload,
            }),
        })
    }

    /// Any other EF00 command (data query, time sync, ...).
    /// Only frame-shaped strategies can deliver it.
    pub fn command(command: Ef00Command, seq: u16, body: Vec<u8>) -> Self {
        Self {
            seq,
            command,
            body,
            write: None,
        }
    }

    /// DataQuery asking the device to report every datapoint.
    pub fn data_query() -> Self {
        let seq = protocol::next_seq();
        Self::command(Ef00Command::DataQuery, seq, protocol::data_query_payload(seq))
    }

    /// TimeSync answer, seconds since the Unix epoch.
    pub fn time_sync(seq: u16, utc_secs: u32, local_secs: u32) -> Result<Self> {
        let body = protocol::time_sync_payload(seq, utc_secs, local_secs)?;
        Ok(Self::command(Ef00Command::TimeSync, seq, body))
    }

    /// Complete cluster payload. For datapoint writes this is the full frame.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn dp_write(&self) -> Option<&DpWrite> {
        self.write.as_ref()
    }
}

pub type StrategyFn =
    for<'a> fn(&'a dyn ClusterTransport, u8, &'a Outbound) -> BoxFuture<'a, TransportResult>;

/// One candidate primitive and argument shape.
#[derive(Clone, Copy)]
pub struct Strategy {
    pub name: &'static str,
    pub call: StrategyFn,
}

impl Strategy {
    pub const fn new(name: &'static str, call: StrategyFn) -> Self {
        Self { name, call }
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Strategy").field(&self.name).finish()
    }
}

fn needs_dp<'a>() -> BoxFuture<'a, TransportResult> {
    unsupported("shape requires a datapoint write")
}

fn via_manager_send_dp<'a>(
    t: &'a dyn ClusterTransport,
    endpoint: u8,
    out: &'a Outbound,
) -> BoxFuture<'a, TransportResult> {
    match out.dp_write() {
        Some(w) => t.send_dp(endpoint, w.dp, w.dp_type, &w.payload),
        None => needs_dp(),
    }
}

fn via_datapoint_fields<'a>(
    t: &'a dyn ClusterTransport,
    endpoint: u8,
    out: &'a Outbound,
) -> BoxFuture<'a, TransportResult> {
    match out.dp_write() {
        Some(w) => t.datapoint(
            endpoint,
            DatapointArgs::Fields {
                dp: w.dp,
                dp_type: w.dp_type,
                data: &w.payload,
            },
        ),
        None => needs_dp(),
    }
}

fn via_datapoint_frame<'a>(
    t: &'a dyn ClusterTransport,
    endpoint: u8,
    out: &'a Outbound,
) -> BoxFuture<'a, TransportResult> {
    match out.dp_write() {
        Some(_) => t.datapoint(endpoint, DatapointArgs::Frame(&out.body)),
        None => needs_dp(),
    }
}

fn via_set_data<'a>(t: &'a dyn ClusterTransport, endpoint: u8, out: &'a Outbound) -> BoxFuture<'a, TransportResult> {
    // body is seq(2) followed by the record
    match (out.dp_write(), out.body.get(2..)) {
        (Some(_), Some(dp_values)) => t.set_data(endpoint, out.seq, dp_values),
        _ => needs_dp(),
    }
}

fn via_command<'a>(t: &'a dyn ClusterTransport, endpoint: u8, out: &'a Outbound) -> BoxFuture<'a, TransportResult> {
    t.command(endpoint, out.command, &out.body)
}

fn via_send_frame<'a>(t: &'a dyn ClusterTransport, endpoint: u8, out: &'a Outbound) -> BoxFuture<'a, TransportResult> {
    t.send_frame(endpoint, CLUSTER_EF00, &out.body, out.command.as_u8())
}

fn via_write_attribute<'a>(
    t: &'a dyn ClusterTransport,
    endpoint: u8,
    out: &'a Outbound,
) -> BoxFuture<'a, TransportResult> {
    match out.dp_write() {
        Some(w) => t.write_attribute(endpoint, CLUSTER_EF00, u16::from(w.dp), &w.payload),
        None => needs_dp(),
    }
}

/// Default strategy order. Changing the order changes behavior.
pub const DEFAULT_STRATEGIES: &[Strategy] = &[
    Strategy::new("manager.send_dp", via_manager_send_dp),
    Strategy::new("cluster.datapoint(fields)", via_datapoint_fields),
    Strategy::new("cluster.datapoint(frame)", via_datapoint_frame),
    Strategy::new("cluster.set_data", via_set_data),
    Strategy::new("cluster.command", via_command),
    Strategy::new("endpoint.send_frame", via_send_frame),
    Strategy::new("cluster.write_attribute", via_write_attribute),
];

/// Delivery counters. Repeated exhaustion is a signal for availability logic
/// above this layer; the dispatcher never escalates on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub exhausted: u64,
    pub consecutive_failures: u32,
}

/// Serializable dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub primary_endpoint: u8,
    pub alternate_endpoints: Vec<u8>,
    /// Per-attempt limit in milliseconds, `null` for none
    pub attempt_timeout_ms: Option<u64>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            primary_endpoint: DEFAULT_PRIMARY_ENDPOINT,
            alternate_endpoints: DEFAULT_ALTERNATE_ENDPOINTS.to_vec(),
            attempt_timeout_ms: Some(DEFAULT_ATTEMPT_TIMEOUT.as_millis() as u64),
        }
    }
}

/// Builder for [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatcherBuilder {
    primary_endpoint: u8,
    alternate_endpoints: Vec<u8>,
    attempt_timeout: Option<Duration>,
    strategies: Vec<Strategy>,
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::from_config(&DispatcherConfig::default())
    }

    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self {
            primary_endpoint: config.primary_endpoint,
            alternate_endpoints: config.alternate_endpoints.clone(),
            attempt_timeout: config.attempt_timeout_ms.map(Duration::from_millis),
            strategies: DEFAULT_STRATEGIES.to_vec(),
        }
    }

    pub fn primary_endpoint(mut self, endpoint: u8) -> Self {
        self.primary_endpoint = endpoint;
        self
    }

    pub fn alternate_endpoints<I: IntoIterator<Item = u8>>(mut self, endpoints: I) -> Self {
        self.alternate_endpoints = endpoints.into_iter().collect();
        self
    }

    /// Bound on a single attempt. A timed out attempt counts as a failure and
    /// dispatch continues with the next strategy.
    pub fn attempt_timeout(mut self, limit: Option<Duration>) -> Self {
        self.attempt_timeout = limit;
        self
    }

    /// Replaces the strategy order.
    pub fn strategies(mut self, strategies: Vec<Strategy>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn build(self) -> Dispatcher {
        let mut endpoints = vec![self.primary_endpoint];
        for ep in self.alternate_endpoints {
            if !endpoints.contains(&ep) {
                endpoints.push(ep);
            }
        }
        Dispatcher {
            endpoints,
            attempt_timeout: self.attempt_timeout,
            strategies: self.strategies,
            stats: Mutex::new(DispatchStats::default()),
        }
    }
}

/// Tries every strategy on every endpoint until one completes.
///
/// Each call is an exhaustive trial within the same call; there is no
/// delayed retry or backoff at this layer.
#[derive(Debug)]
pub struct Dispatcher {
    // primary first, then alternates
    endpoints: Vec<u8>,
    attempt_timeout: Option<Duration>,
    strategies: Vec<Strategy>,
    stats: Mutex<DispatchStats>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        DispatcherBuilder::new().build()
    }

    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn endpoints(&self) -> &[u8] {
        &self.endpoints
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    pub fn stats(&self) -> DispatchStats {
        *self.stats.lock()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.stats.lock().consecutive_failures
    }

    /// Delivers `outbound`. Returns `Ok(())` as soon as one strategy completes,
    /// [`DpError::TransportExhausted`] when none did.
    pub async fn dispatch(&self, transport: &dyn ClusterTransport, outbound: &Outbound) -> Result<()> {
        self.run(transport, outbound, None).await
    }

    /// Same as [`dispatch`](Self::dispatch), aborting the remaining strategies
    /// when `cancel` fires.
    pub async fn dispatch_until(
        &self,
        transport: &dyn ClusterTransport,
        outbound: &Outbound,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.run(transport, outbound, Some(cancel)).await
    }

    async fn run(
        &self,
        transport: &dyn ClusterTransport,
        outbound: &Outbound,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let mut attempts = 0usize;

        for (index, &endpoint) in self.endpoints.iter().enumerate() {
            if index == 1 {
                info!(
                    "All strategies failed on endpoint {}, retrying on alternates {:?}",
                    self.endpoints[0],
                    &self.endpoints[1..]
                );
            }

            for strategy in &self.strategies {
                if cancel.is_some_and(|t| t.is_cancelled()) {
                    debug!("Dispatch cancelled after {} attempt(s)", attempts);
                    return Err(DpError::Cancelled);
                }
                attempts += 1;

                let attempt = self.bounded((strategy.call)(transport, endpoint, outbound));
                let result = match cancel {
                    Some(token) => tokio::select! {
                        _ = token.cancelled() => {
                            debug!("Dispatch cancelled during {} on endpoint {}", strategy.name, endpoint);
                            return Err(DpError::Cancelled);
                        }
                        r = attempt => r,
                    },
                    None => attempt.await,
                };

                match result {
                    Ok(()) => {
                        debug!(
                            "Delivered cmd=0x{:02X} seq={} via {} on endpoint {}",
                            outbound.command.as_u8(),
                            outbound.seq,
                            strategy.name,
                            endpoint
                        );
                        let mut stats = self.stats.lock();
                        stats.delivered += 1;
                        stats.consecutive_failures = 0;
                        return Ok(());
                    }
                    Err(e) => {
                        debug!("Strategy {} on endpoint {} failed: {}", strategy.name, endpoint, e);
                    }
                }
            }
        }

        let consecutive = {
            let mut stats = self.stats.lock();
            stats.exhausted += 1;
            stats.consecutive_failures += 1;
            stats.consecutive_failures
        };
        warn!(
            "Transport exhausted for cmd=0x{:02X} seq={} after {} attempt(s) on endpoints {:?} (consecutive: {})",
            outbound.command.as_u8(),
            outbound.seq,
            attempts,
            self.endpoints,
            consecutive
        );
        Err(DpError::TransportExhausted { attempts })
    }

    async fn bounded(&self, attempt: BoxFuture<'_, TransportResult>) -> TransportResult {
        match self.attempt_timeout {
            Some(limit) => timeout(limit, attempt)
                .await
                .unwrap_or(Err(TransportError::Timeout)),
            None => attempt.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_start_with_primary_without_duplicates() {
        let d = Dispatcher::builder()
            .primary_endpoint(2)
            .alternate_endpoints([2, 1, 3, 1])
            .build();
        assert_eq!(d.endpoints(), &[2, 1, 3]);
        assert_eq!(Dispatcher::new().endpoints(), &[1, 2, 3]);
    }

    #[test]
    fn default_strategy_order() {
        let names: Vec<&str> = Dispatcher::new().strategies().iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "manager.send_dp",
                "cluster.datapoint(fields)",
                "cluster.datapoint(frame)",
                "cluster.set_data",
                "cluster.command",
                "endpoint.send_frame",
                "cluster.write_attribute",
            ]
        );
    }

    #[test]
    fn outbound_from_frame_drops_trailing_bytes() {
        let mut frame = protocol::build_frame_with_seq(9, 3, DpType::Enum, &[1]).unwrap();
        frame.push(0xEE);
        let out = Outbound::from_frame(&frame).unwrap();
        assert_eq!(out.seq, 9);
        assert_eq!(out.body(), &frame[..frame.len() - 1]);
        assert_eq!(out.dp_write().map(|w| w.dp), Some(3));
    }

    #[test]
    fn oversized_datapoint_write_is_rejected() {
        let payload = vec![0; protocol::MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            Outbound::datapoint(1, DpType::Raw, payload),
            Err(DpError::PayloadTooLong(protocol::MAX_PAYLOAD_LEN + 1))
        );
        let out = Outbound::datapoint(1, DpType::Raw, vec![0; protocol::MAX_PAYLOAD_LEN]).unwrap();
        assert_eq!(out.body().len(), protocol::FRAME_HEADER_LEN + protocol::MAX_PAYLOAD_LEN);
    }

    #[tokio::test]
    async fn set_data_skips_a_body_without_sequence() {
        struct AcceptsSetData;
        impl ClusterTransport for AcceptsSetData {
            fn set_data<'a>(&'a self, _endpoint: u8, _seq: u16, _values: &'a [u8]) -> BoxFuture<'a, TransportResult> {
                Box::pin(future::ready(Ok(())))
            }
        }

        let short = Outbound {
            seq: 0,
            command: Ef00Command::DataRequest,
            body: vec![0],
            write: Some(DpWrite {
                dp: 1,
                dp_type: DpType::Bool,
                payload: vec![1],
            }),
        };
        let result = via_set_data(&AcceptsSetData, 1, &short).await;
        assert!(matches!(result, Err(TransportError::Unsupported(_))));

        let full = Outbound::datapoint(1, DpType::Bool, vec![1]).unwrap();
        assert!(via_set_data(&AcceptsSetData, 1, &full).await.is_ok());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let cfg: DispatcherConfig = serde_json::from_str(r#"{"alternate_endpoints": [242]}"#).unwrap();
        assert_eq!(cfg.primary_endpoint, 1);
        assert_eq!(cfg.alternate_endpoints, vec![242]);
        assert_eq!(cfg.attempt_timeout_ms, Some(5000));
        let cfg: DispatcherConfig = serde_json::from_str(r#"{"attempt_timeout_ms": null}"#).unwrap();
        assert_eq!(DispatcherBuilder::from_config(&cfg).build().attempt_timeout, None);
    }
}
