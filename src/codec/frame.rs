//! Record framing
//!
//! Every record in the log is framed as:
//!
//! ```text
//! +------------------+
//! | Entry Tag        | (u8, 0xAC = attribute container)
//! +------------------+
//! | Payload Length   | (u32 LE)
//! +------------------+
//! | Payload          | (variable)
//! +------------------+
//! | Checksum         | (u32 LE)
//! +------------------+
//! ```
//!
//! The checksum covers tag, length and payload, so truncation at any point
//! and any flipped bit are detected before the payload is parsed.

use super::checksum::compute_checksum;
use crate::errors::{StoreError, StoreResult};

/// Entry tag of an attribute container record
pub const CONTAINER_ENTRY_TAG: u8 = 0xAC;

/// Bytes preceding the payload: tag + length
pub const FRAME_HEADER_SIZE: usize = 1 + 4;

/// Bytes added around a payload: tag + length + checksum
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_SIZE + 4;

/// Largest payload a frame can carry
pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize - FRAME_OVERHEAD;

/// Wraps a payload into a checksummed frame.
pub fn wrap(payload: &[u8]) -> StoreResult<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(StoreError::encoding(format!(
            "record payload of {} bytes exceeds the frame limit",
            payload.len()
        )));
    }

    let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    frame.push(CONTAINER_ENTRY_TAG);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    let checksum = compute_checksum(&frame);
    frame.extend_from_slice(&checksum.to_le_bytes());
    Ok(frame)
}

/// Returns the total frame length announced by a frame header.
pub fn frame_len(header: &[u8]) -> StoreResult<usize> {
    if header.len() < FRAME_HEADER_SIZE {
        return Err(StoreError::corrupt_record(format!(
            "record header truncated: {} bytes",
            header.len()
        )));
    }
    if header[0] != CONTAINER_ENTRY_TAG {
        return Err(StoreError::corrupt_record(format!(
            "unknown entry tag 0x{:02x}",
            header[0]
        )));
    }
    let payload_len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(StoreError::corrupt_record(format!(
            "invalid payload length: {}",
            payload_len
        )));
    }
    Ok(payload_len + FRAME_OVERHEAD)
}

/// Validates a complete frame and returns its payload.
///
/// The input must be exactly one frame: trailing bytes are corruption.
pub fn unwrap(frame: &[u8]) -> StoreResult<&[u8]> {
    let total = frame_len(frame)?;

    if frame.len() < total {
        return Err(StoreError::corrupt_record(format!(
            "record truncated: expected {} bytes, got {}",
            total,
            frame.len()
        )));
    }
    if frame.len() > total {
        return Err(StoreError::corrupt_record(format!(
            "{} unexpected bytes after record",
            frame.len() - total
        )));
    }

    let checksum_offset = total - 4;
    let stored = u32::from_le_bytes([
        frame[checksum_offset],
        frame[checksum_offset + 1],
        frame[checksum_offset + 2],
        frame[checksum_offset + 3],
    ]);
    let computed = compute_checksum(&frame[..checksum_offset]);
    if computed != stored {
        return Err(StoreError::corrupt_record(format!(
            "checksum mismatch: computed {:08x}, stored {:08x}",
            computed, stored
        )));
    }

    Ok(&frame[FRAME_HEADER_SIZE..checksum_offset])
}
