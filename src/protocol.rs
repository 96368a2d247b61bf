//! Detector wire protocol: the JSON shapes sent over the PUB/SUB socket and
//! their validated, internal equivalents.
//!
//! The detector speaks human-readable field names with spaces and
//! inconsistent casing (`"Frame Number"`, `"F_Reset"`). We map those once,
//! here, via `serde(rename)`; everything downstream of [`decode_start`] /
//! [`decode_event_header`] / [`decode_stop`] sees only validated,
//! snake_case Rust types.

use crate::error::{AppResult, XpsError};
use serde::{Deserialize, Serialize};

/// Detector-declared pixel element type. Wire byte order is always
/// big-endian; values become host-native once decoded into a [`crate::messages::Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl DataType {
    /// Size in bytes of one element on the wire.
    pub fn byte_size(self) -> usize {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::U16 | DataType::I16 => 2,
            DataType::U32 | DataType::I32 | DataType::F32 => 4,
            DataType::U64 | DataType::I64 | DataType::F64 => 8,
        }
    }

    /// Map the detector's wire string to a [`DataType`].
    pub fn from_wire(s: &str) -> AppResult<Self> {
        match s {
            "U8" => Ok(DataType::U8),
            "U16" => Ok(DataType::U16),
            "U32" => Ok(DataType::U32),
            "U64" => Ok(DataType::U64),
            "I8" => Ok(DataType::I8),
            "I16" => Ok(DataType::I16),
            "I32" => Ok(DataType::I32),
            "I64" => Ok(DataType::I64),
            "Single Float" => Ok(DataType::F32),
            "Double Float" => Ok(DataType::F64),
            other => Err(XpsError::UnmappedDataType(other.to_string())),
        }
    }
}

/// Detector readout rectangle: H = `bottom - top`, W = `right - left`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Rectangle {
    #[serde(rename = "Left")]
    pub left: i64,
    #[serde(rename = "Top")]
    pub top: i64,
    #[serde(rename = "Right")]
    pub right: i64,
    #[serde(rename = "Bottom")]
    pub bottom: i64,
    #[serde(rename = "Rotation")]
    pub rotation: f64,
}

impl Rectangle {
    pub fn height(&self) -> AppResult<usize> {
        let h = self.bottom - self.top;
        usize::try_from(h).map_err(|_| XpsError::Protocol(format!("non-positive height {h}")))
    }

    pub fn width(&self) -> AppResult<usize> {
        let w = self.right - self.left;
        usize::try_from(w).map_err(|_| XpsError::Protocol(format!("non-positive width {w}")))
    }
}

/// Raw JSON shape of a `"start"` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartWire {
    pub msg_type: String,
    pub scan_name: String,
    pub data_type: String,
    #[serde(rename = "F_Reset")]
    pub f_reset: i64,
    #[serde(rename = "Rectangle")]
    pub rectangle: Rectangle,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Raw JSON shape of an `"event"` header (the binary pixel blob is the next
/// frame on the socket, decoded separately).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventWire {
    pub msg_type: String,
    #[serde(rename = "Frame Number")]
    pub frame_number: i64,
}

/// Raw JSON shape of a `"stop"` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopWire {
    pub msg_type: String,
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Validated scan geometry, derived once from a `"start"` message and
/// attached to every [`crate::messages::Message::RawEvent`] for the scan.
#[derive(Debug, Clone)]
pub struct ScanGeometry {
    pub scan_name: String,
    pub data_type: DataType,
    pub f_reset: u64,
    pub height: usize,
    pub width: usize,
    pub notes: Option<serde_json::Value>,
}

/// Parse and validate a `"start"` message.
pub fn decode_start(bytes: &[u8]) -> AppResult<ScanGeometry> {
    let wire: StartWire =
        serde_json::from_slice(bytes).map_err(|e| XpsError::Protocol(e.to_string()))?;
    if wire.msg_type != "start" {
        return Err(XpsError::UnknownMsgType(wire.msg_type));
    }
    if wire.f_reset <= 0 {
        return Err(XpsError::Protocol(format!(
            "F_Reset must be positive, got {}",
            wire.f_reset
        )));
    }
    let data_type = DataType::from_wire(&wire.data_type)?;
    let height = wire.rectangle.height()?;
    let width = wire.rectangle.width()?;
    Ok(ScanGeometry {
        scan_name: wire.scan_name,
        data_type,
        f_reset: wire.f_reset as u64,
        height,
        width,
        notes: wire.extra.get("Notes").cloned(),
    })
}

/// Parse and validate an `"event"` JSON header (the blob is read separately
/// by the decoder's mode register).
pub fn decode_event_header(bytes: &[u8]) -> AppResult<u64> {
    let wire: EventWire =
        serde_json::from_slice(bytes).map_err(|e| XpsError::Protocol(e.to_string()))?;
    if wire.msg_type != "event" {
        return Err(XpsError::UnknownMsgType(wire.msg_type));
    }
    u64::try_from(wire.frame_number)
        .map_err(|_| XpsError::Protocol(format!("negative frame_number {}", wire.frame_number)))
}

/// Parse and validate a `"stop"` message. The metadata sub-object is always
/// optional (open question #2 in SPEC_FULL.md).
pub fn decode_stop(bytes: &[u8]) -> AppResult<Option<serde_json::Value>> {
    let wire: StopWire =
        serde_json::from_slice(bytes).map_err(|e| XpsError::Protocol(e.to_string()))?;
    if wire.msg_type != "stop" {
        return Err(XpsError::UnknownMsgType(wire.msg_type));
    }
    if wire.metadata.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::Value::Object(wire.metadata)))
    }
}

/// What the decoder's mode register is currently expecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderMode {
    Idle,
    Armed,
    AwaitingBlob,
}
