use std::error::Error;
use std::fmt::{Display, Formatter};

mod framer;

pub use framer::Framer;

/// Size of the fixed envelope header in bytes.
///
/// Layout, all integers network byte order:
/// `length: u32 | type: u32 | sequence_size: u32 | sequence: u32 | request_id: i64`.
pub const HEADER_LEN: usize = 24;

/// Ceiling on a single frame, header included. Anything larger is hostile.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FrameType {
    Unknown = 0,
    Text = 1,
    Binary = 2,
    FileStream = 3,
    HeartBeat = 4,
}

impl FrameType {
    fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::Text,
            2 => Self::Binary,
            3 => Self::FileStream,
            4 => Self::HeartBeat,
            // Unrecognized codes surface as Unknown; the router answers them
            // with an error response rather than the decoder rejecting them.
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    DataTooSmall,
    InvalidData,
    IncompletePackage,
    EmptyLength,
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DataTooSmall => write!(f, "buffer smaller than envelope header"),
            Self::InvalidData => write!(f, "declared length disagrees with data"),
            Self::IncompletePackage => write!(f, "no complete frame buffered"),
            Self::EmptyLength => write!(f, "zero length prefix at buffer head"),
        }
    }
}

impl Error for CodecError {}

/// One on-the-wire envelope.
///
/// `sequence_size`/`sequence` exist for segmented payloads; the server
/// requires `sequence_size == 1` today. `request_id` is echoed verbatim in
/// the response correlated with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub sequence_size: u32,
    pub sequence: u32,
    pub request_id: i64,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            sequence_size: 1,
            sequence: 0,
            request_id: 0,
            payload,
        }
    }

    /// A `Text` frame carrying a JSON payload, correlated to `request_id`.
    pub fn text(request_id: i64, payload: Vec<u8>) -> Self {
        Self {
            request_id,
            ..Self::new(FrameType::Text, payload)
        }
    }

    /// Heartbeats carry an empty payload and never reach the router.
    pub fn heartbeat() -> Self {
        Self::new(FrameType::HeartBeat, Vec::new())
    }

    /// Total wire length of this frame, header included.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Serializes the frame into its canonical big-endian representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut encoded = Vec::with_capacity(self.wire_len());
        encoded.extend_from_slice(&(self.wire_len() as u32).to_be_bytes());
        encoded.extend_from_slice(&(self.frame_type as u32).to_be_bytes());
        encoded.extend_from_slice(&self.sequence_size.to_be_bytes());
        encoded.extend_from_slice(&self.sequence.to_be_bytes());
        encoded.extend_from_slice(&self.request_id.to_be_bytes());
        encoded.extend_from_slice(&self.payload);
        encoded
    }

    /// Decodes a frame from a buffer holding exactly one frame.
    ///
    /// Fails with [`CodecError::DataTooSmall`] when the candidate is shorter
    /// than the header, and [`CodecError::InvalidData`] when the declared
    /// length disagrees with the buffer, undercuts the header, or exceeds
    /// [`MAX_FRAME_LEN`].
    pub fn decode(buffer: &[u8]) -> Result<Self, CodecError> {
        if buffer.len() < HEADER_LEN {
            return Err(CodecError::DataTooSmall);
        }
        let declared = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
        if declared != buffer.len() || declared < HEADER_LEN || declared > MAX_FRAME_LEN {
            return Err(CodecError::InvalidData);
        }
        let frame_type = FrameType::from_u32(u32::from_be_bytes([
            buffer[4], buffer[5], buffer[6], buffer[7],
        ]));
        let sequence_size = u32::from_be_bytes([buffer[8], buffer[9], buffer[10], buffer[11]]);
        let sequence = u32::from_be_bytes([buffer[12], buffer[13], buffer[14], buffer[15]]);
        let request_id = i64::from_be_bytes([
            buffer[16], buffer[17], buffer[18], buffer[19], buffer[20], buffer[21], buffer[22],
            buffer[23],
        ]);
        Ok(Frame {
            frame_type,
            sequence_size,
            sequence,
            request_id,
            payload: buffer[HEADER_LEN..].to_vec(),
        })
    }
}
