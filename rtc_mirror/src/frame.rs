//! Socket wire format.
//!
//! Every frame is an 8-byte header followed by the actuator values:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | `(0x5555 << 16) \| count`, little-endian |
//! | 4 | 4 | frame number, little-endian |
//! | 8 | 2 × count | `u16` values, little-endian |
//!
//! The header and payload are kept in separate buffers and handed to the
//! socket as one vectored write.

use static_assertions::const_assert;

/// Tag in the upper half of header word 0.
pub const FRAME_TAG: u16 = 0x5555;

/// Header length in bytes.
pub const HEADER_LEN: usize = 8;

/// Most values one frame can carry.
pub const MAX_VALUES: usize = u16::MAX as usize;

const_assert!(HEADER_LEN == 2 * size_of::<u32>());
const_assert!(MAX_VALUES <= u16::MAX as usize);

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Values following the header.
    pub count: u16,
    /// Frame number.
    pub frame: u32,
}

impl FrameHeader {
    /// Header for `count` values. `None` if `count` exceeds [`MAX_VALUES`].
    pub fn new(count: usize, frame: u32) -> Option<Self> {
        Some(Self {
            count: u16::try_from(count).ok()?,
            frame,
        })
    }

    /// First header word: tag and count.
    #[inline]
    pub fn word0(&self) -> u32 {
        (u32::from(FRAME_TAG) << 16) | u32::from(self.count)
    }

    /// Wire bytes.
    #[inline]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&self.word0().to_le_bytes());
        out[4..].copy_from_slice(&self.frame.to_le_bytes());
        out
    }

    /// Parse wire bytes. `None` if the tag does not match.
    pub fn parse(bytes: &[u8; HEADER_LEN]) -> Option<Self> {
        let word0 = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if (word0 >> 16) as u16 != FRAME_TAG {
            return None;
        }
        Some(Self {
            count: (word0 & 0xFFFF) as u16,
            frame: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }

    /// Payload length in bytes.
    pub fn payload_len(&self) -> usize {
        usize::from(self.count) * size_of::<u16>()
    }
}

/// Reusable little-endian encoding of the socket share of a frame.
#[derive(Debug, Default, Clone)]
pub struct PayloadBuf {
    bytes: Vec<u8>,
}

impl PayloadBuf {
    /// Buffer sized for `values` actuators.
    pub fn with_capacity(values: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(values * size_of::<u16>()),
        }
    }

    /// Replace the contents with `values`.
    pub fn load(&mut self, values: &[u16]) {
        self.bytes.clear();
        self.bytes.extend(values.iter().flat_map(|v| v.to_le_bytes()));
    }

    /// Number of encoded values.
    pub fn count(&self) -> usize {
        self.bytes.len() / size_of::<u16>()
    }

    /// Encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
