//! Tuya EF00 cluster wire format.
//! Builds and parses the datapoint frame carried by the manufacturer cluster:
//! `seq(2) | dp(1) | type(1) | len(2, BE) | payload`.

use crate::codec::DpType;
use crate::error::{DpError, Result};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use log::{debug, warn};
use rand::Rng;

/// Tuya manufacturer-specific cluster id.
pub const CLUSTER_EF00: u16 = 0xEF00;

/// Size of the fixed frame header.
pub const FRAME_HEADER_LEN: usize = 6;

/// Size of a single datapoint record header inside a report (`dp | type | len`).
pub const RECORD_HEADER_LEN: usize = 4;

define_ef00_command! {
    DataRequest = 0x00,
    DataResponse = 0x01,
    DataReport = 0x02,
    DataQuery = 0x03,
    McuVersionRequest = 0x10,
    McuVersionResponse = 0x11,
    TimeSync = 0x24,
}

/// One datapoint record as it travels through the EF00 cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DpFrame {
    pub dp: u8,
    pub dp_type: DpType,
    pub payload: Vec<u8>,
}

/// Pseudo-random sequence number. Not used for request/response correlation.
pub fn next_seq() -> u16 {
    rand::rng().random()
}

/// Largest payload the length field can declare.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Builds a complete frame with a fresh sequence number.
pub fn build_frame(dp: u8, dp_type: DpType, payload: &[u8]) -> Result<Vec<u8>> {
    build_frame_with_seq(next_seq(), dp, dp_type, payload)
}

/// Builds a complete frame with a caller-chosen sequence number.
pub fn build_frame_with_seq(seq: u16, dp: u8, dp_type: DpType, payload: &[u8]) -> Result<Vec<u8>> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&seq.to_be_bytes());
    frame.extend_from_slice(&record(dp, dp_type, payload)?);
    debug!(
        "Built frame: seq={}, dp={}, type={}, payload_len={}",
        seq,
        dp,
        dp_type,
        payload.len()
    );
    Ok(frame)
}

/// A datapoint record without the sequence prefix (`dp | type | len | payload`).
/// This is the `dpValues` shape some cluster bindings expect.
pub fn record(dp: u8, dp_type: DpType, payload: &[u8]) -> Result<Vec<u8>> {
    let len = u16::try_from(payload.len()).map_err(|_| DpError::PayloadTooLong(payload.len()))?;
    let mut out = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
    out.push(dp);
    out.push(dp_type.as_u8());
    let mut len_buf = [0u8; 2];
    BigEndian::write_u16(&mut len_buf, len);
    out.extend_from_slice(&len_buf);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Returns the sequence number of a frame.
pub fn frame_seq(bytes: &[u8]) -> Result<u16> {
    if bytes.len() < 2 {
        return Err(DpError::FrameTooShort(bytes.len()));
    }
    Ok(BigEndian::read_u16(bytes))
}

/// Parses a single-datapoint frame.
///
/// The payload is sliced by the declared length; trailing bytes that some
/// firmware appends are ignored.
pub fn parse_frame(bytes: &[u8]) -> Result<DpFrame> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(DpError::FrameTooShort(bytes.len()));
    }
    let (frame, _) = parse_record(&bytes[2..])?;
    if bytes.len() > FRAME_HEADER_LEN + frame.payload.len() {
        debug!(
            "Ignoring {} trailing byte(s) after dp {}",
            bytes.len() - FRAME_HEADER_LEN - frame.payload.len(),
            frame.dp
        );
    }
    Ok(frame)
}

// Parses one record and returns it with the number of bytes consumed.
fn parse_record(bytes: &[u8]) -> Result<(DpFrame, usize)> {
    if bytes.len() < RECORD_HEADER_LEN {
        return Err(DpError::FrameTooShort(bytes.len() + 2));
    }
    let dp = bytes[0];
    let dp_type = DpType::from_u8(bytes[1])
        .ok_or_else(|| DpError::UnknownDatatype(format!("tag {:#04x}", bytes[1])))?;
    let declared = BigEndian::read_u16(&bytes[2..4]) as usize;
    let available = bytes.len() - RECORD_HEADER_LEN;
    if declared > available {
        return Err(DpError::TruncatedPayload { declared, available });
    }
    let payload = bytes[RECORD_HEADER_LEN..RECORD_HEADER_LEN + declared].to_vec();
    Ok((
        DpFrame {
            dp,
            dp_type,
            payload,
        },
        RECORD_HEADER_LEN + declared,
    ))
}

/// Parses a data report that may carry several datapoint records after the
/// sequence number.
///
/// Parsing stops at the first malformed record; records read before it are
/// returned. Only a report that yields no record at all is an error.
pub fn parse_report(bytes: &[u8]) -> Result<Vec<DpFrame>> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(DpError::FrameTooShort(bytes.len()));
    }
    let mut frames = Vec::new();
    let mut offset = 2;
    while bytes.len() - offset >= RECORD_HEADER_LEN {
        match parse_record(&bytes[offset..]) {
            Ok((frame, used)) => {
                frames.push(frame);
                offset += used;
            }
            Err(e) if frames.is_empty() => return Err(e),
            Err(e) => {
                warn!("Stopping report parse at offset {}: {}", offset, e);
                break;
            }
        }
    }
    Ok(frames)
}

/// Body of a DataQuery command: asks the device to report every datapoint.
pub fn data_query_payload(seq: u16) -> Vec<u8> {
    seq.to_be_bytes().to_vec()
}

/// Body of a TimeSync response: `seq(2) | utc(4) | local(4)`, seconds since
/// the Unix epoch, big-endian.
pub fn time_sync_payload(seq: u16, utc_secs: u32, local_secs: u32) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(10);
    out.write_u16::<BigEndian>(seq)?;
    out.write_u32::<BigEndian>(utc_secs)?;
    out.write_u32::<BigEndian>(local_secs)?;
    Ok(out)
}
