//! Wire protocol decoder. Consumes an ordered byte stream of framed
//! messages and reconstructs {ScanStart, RawEvent, ScanStop}.
//!
//! The transport itself (the detector's ZMQ PUB/SUB socket) is abstracted
//! behind [`FrameSource`] — no ZMQ client crate appears anywhere in this
//! workspace's retrieved reference pack, so the shipped [`TcpFrameSource`]
//! reads length-prefixed frames over TCP instead, in the length-prefixed
//! framing idiom the teacher's `network/protocol.rs` uses by hand. The
//! mode-register / JSON+blob pairing logic in [`Decoder`] is exactly the
//! part the contract actually specifies, and is fully transport-agnostic.

use crate::error::{AppResult, XpsError};
use crate::messages::{Frame, Message, PixelBuffer};
use crate::protocol::{decode_event_header, decode_start, decode_stop, DataType, DecoderMode, ScanGeometry};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// A source of ordered, already-delimited byte frames. One call returns one
/// logical wire frame: either a JSON message or a binary pixel blob.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> std::io::Result<Option<Bytes>>;
}

/// Reads `u32`-length-prefixed frames over a TCP stream.
pub struct TcpFrameSource {
    stream: TcpStream,
}

impl TcpFrameSource {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl FrameSource for TcpFrameSource {
    async fn next_frame(&mut self) -> std::io::Result<Option<Bytes>> {
        let mut len_buf = [0u8; 4];
        match self.stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await?;
        Ok(Some(Bytes::from(payload)))
    }
}

/// Writes one `u32`-length-prefixed frame. Used by test fixtures and by any
/// bridge that re-frames an upstream ZMQ feed onto this transport.
pub async fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> std::io::Result<()> {
    stream.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    stream.write_all(payload).await
}

/// Parses big-endian pixel bytes into a host-native [`PixelBuffer`].
fn decode_pixels(bytes: &[u8], dtype: DataType, count: usize) -> AppResult<PixelBuffer> {
    macro_rules! parse {
        ($ty:ty, $from_be:expr, $variant:ident) => {{
            let mut values = Vec::with_capacity(count);
            for chunk in bytes.chunks_exact(std::mem::size_of::<$ty>()) {
                values.push($from_be(chunk.try_into().expect("chunk size matches")));
            }
            PixelBuffer::$variant(values)
        }};
    }
    Ok(match dtype {
        DataType::U8 => PixelBuffer::U8(bytes.to_vec()),
        DataType::I8 => parse!(i8, i8::from_be_bytes, I8),
        DataType::U16 => parse!(u16, u16::from_be_bytes, U16),
        DataType::I16 => parse!(i16, i16::from_be_bytes, I16),
        DataType::U32 => parse!(u32, u32::from_be_bytes, U32),
        DataType::I32 => parse!(i32, i32::from_be_bytes, I32),
        DataType::F32 => parse!(f32, f32::from_be_bytes, F32),
        DataType::U64 => parse!(u64, u64::from_be_bytes, U64),
        DataType::I64 => parse!(i64, i64::from_be_bytes, I64),
        DataType::F64 => parse!(f64, f64::from_be_bytes, F64),
    })
}

/// Mode-register decoder. One instance tracks exactly one scan's geometry
/// across successive `accept` calls.
pub struct Decoder {
    mode: DecoderMode,
    geometry: Option<ScanGeometry>,
    pending_frame_number: Option<u64>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self {
            mode: DecoderMode::Idle,
            geometry: None,
            pending_frame_number: None,
        }
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> DecoderMode {
        self.mode
    }

    /// Feed one wire frame. Returns `Ok(None)` for a consumed-but-not-yet-
    /// complete frame (an event header awaiting its blob) and for
    /// recoverable protocol errors the caller should just log and skip.
    /// Socket-level errors are the caller's concern, not this function's.
    pub fn accept(&mut self, frame_bytes: &[u8]) -> AppResult<Option<Message>> {
        match self.mode {
            DecoderMode::Idle | DecoderMode::Armed => self.accept_json(frame_bytes),
            DecoderMode::AwaitingBlob => self.accept_blob(frame_bytes),
        }
    }

    fn accept_json(&mut self, frame_bytes: &[u8]) -> AppResult<Option<Message>> {
        let value: serde_json::Value =
            serde_json::from_slice(frame_bytes).map_err(|e| XpsError::Protocol(e.to_string()))?;
        let msg_type = value
            .get("msg_type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| XpsError::Protocol("missing msg_type".to_string()))?;

        match msg_type {
            "start" => {
                let geometry = decode_start(frame_bytes)?;
                debug!(scan_name = %geometry.scan_name, "scan start decoded");
                self.geometry = Some(geometry.clone());
                self.mode = DecoderMode::Armed;
                Ok(Some(Message::ScanStart(geometry)))
            }
            "event" => {
                if self.mode == DecoderMode::Idle {
                    warn!("event received in IDLE, dropping");
                    return Ok(None);
                }
                let frame_number = decode_event_header(frame_bytes)?;
                self.pending_frame_number = Some(frame_number);
                self.mode = DecoderMode::AwaitingBlob;
                Ok(None)
            }
            "stop" => {
                let metadata = decode_stop(frame_bytes)?;
                self.geometry = None;
                self.mode = DecoderMode::Idle;
                Ok(Some(Message::ScanStop(metadata)))
            }
            other => Err(XpsError::UnknownMsgType(other.to_string())),
        }
    }

    fn accept_blob(&mut self, frame_bytes: &[u8]) -> AppResult<Option<Message>> {
        // Any error here still returns the decoder to ARMED: the blob slot
        // is consumed either way, and the next frame is JSON again.
        self.mode = DecoderMode::Armed;
        let geometry = self
            .geometry
            .clone()
            .ok_or(XpsError::EventOutsideScan)?;
        let frame_number = self
            .pending_frame_number
            .take()
            .ok_or_else(|| XpsError::Protocol("blob with no pending event header".to_string()))?;

        let count = geometry.height * geometry.width;
        let expected = count * geometry.data_type.byte_size();
        if frame_bytes.len() != expected {
            return Err(XpsError::BlobSizeMismatch {
                expected,
                got: frame_bytes.len(),
            });
        }

        let pixels = decode_pixels(frame_bytes, geometry.data_type, count)?;
        Ok(Some(Message::RawEvent(Frame {
            frame_number,
            height: geometry.height,
            width: geometry.width,
            pixels,
        })))
    }
}
