//! CAN message type.

use serde::{Deserialize, Serialize};

use crate::core::error::{Result, RouterError};

/// Maximum payload of a classic CAN frame.
pub const MAX_PAYLOAD: usize = 8;

/// Largest identifier in the 29-bit extended frame range.
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// Largest identifier in the 11-bit standard frame range.
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// Header overhead counted per frame in traffic statistics.
///
/// Extended frames carry up to 8 bytes of header; the same figure is used
/// for standard frames.
pub const FRAME_HEADER_BYTES: u64 = 8;

/// A single CAN message.
///
/// Stack-allocated with a fixed 8-byte buffer, so copying a message into
/// several output channels never touches the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "RawCanMessage")]
pub struct CanMessage {
    /// Frame identifier (standard or extended range).
    pub can_id: u32,
    data: [u8; MAX_PAYLOAD],
    size: u8,
}

impl CanMessage {
    /// Create a message, validating identifier range and payload length.
    pub fn new(can_id: u32, payload: &[u8]) -> Result<Self> {
        if can_id > MAX_EXTENDED_ID {
            return Err(RouterError::invalid(format!(
                "CAN id 0x{:X} exceeds 29-bit range",
                can_id
            )));
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(RouterError::invalid(format!(
                "payload of {} bytes exceeds {} byte limit",
                payload.len(),
                MAX_PAYLOAD
            )));
        }

        let mut data = [0u8; MAX_PAYLOAD];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            can_id,
            data,
            size: payload.len() as u8,
        })
    }

    /// Payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.size as usize]
    }

    /// Payload length in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size as usize
    }

    /// Whether the identifier needs an extended (29-bit) frame.
    #[inline]
    pub fn is_extended(&self) -> bool {
        self.can_id > MAX_STANDARD_ID
    }

    /// Bytes accounted for this frame in traffic statistics.
    #[inline]
    pub fn accounted_bytes(&self) -> u64 {
        FRAME_HEADER_BYTES + self.size as u64
    }
}

/// Wire form of [`CanMessage`], checked before it becomes one.
#[derive(Deserialize)]
struct RawCanMessage {
    can_id: u32,
    data: [u8; MAX_PAYLOAD],
    size: u8,
}

impl TryFrom<RawCanMessage> for CanMessage {
    type Error = RouterError;

    fn try_from(raw: RawCanMessage) -> Result<Self> {
        let size = raw.size as usize;
        if size > MAX_PAYLOAD {
            return Err(RouterError::invalid(format!(
                "payload of {} bytes exceeds {} byte limit",
                size, MAX_PAYLOAD
            )));
        }
        Self::new(raw.can_id, &raw.data[..size])
    }
}

impl std::fmt::Display for CanMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:03X} [{}]", self.can_id, self.size)?;
        for byte in self.payload() {
            write!(f, " {:02X}", byte)?;
        }
        Ok(())
    }
}

/// Parses the `cansend` notation: `<id>#<hex payload>`, e.g. `123#DEADBEEF`.
///
/// Payload bytes may be separated by dots (`1A#DE.AD`).
impl std::str::FromStr for CanMessage {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (id, data) = s
            .split_once('#')
            .ok_or_else(|| RouterError::invalid(format!("missing '#' in {:?}", s)))?;

        let can_id = u32::from_str_radix(id, 16)
            .map_err(|_| RouterError::invalid(format!("bad CAN id {:?}", id)))?;

        let hex: Vec<u8> = data.bytes().filter(|b| *b != b'.').collect();
        if hex.len() % 2 != 0 {
            return Err(RouterError::invalid(format!("odd payload length in {:?}", data)));
        }
        let mut payload = Vec::with_capacity(hex.len() / 2);
        for pair in hex.chunks(2) {
            let digits = std::str::from_utf8(pair)
                .map_err(|_| RouterError::invalid(format!("bad payload {:?}", data)))?;
            let byte = u8::from_str_radix(digits, 16)
                .map_err(|_| RouterError::invalid(format!("bad payload byte {:?}", digits)))?;
            payload.push(byte);
        }

        Self::new(can_id, &payload)
    }
}
