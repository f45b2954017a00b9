/*!
 * Frame Codec
 * Length-prefixed JSON frames for byte-stream transports
 */

use super::super::types::{IpcError, IpcResult};
use crate::core::limits::{FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

/// Write one frame: u32 little-endian length, then the JSON payload
pub fn write_frame<W: Write, T: Serialize>(mut w: W, msg: &T) -> IpcResult<()> {
    let payload = serde_json::to_vec(msg)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(IpcError::FrameTooLarge {
            size: payload.len(),
            limit: MAX_FRAME_SIZE,
        });
    }
    // Checked above, fits in u32
    let len = payload.len() as u32;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(&payload)?;
    w.flush()?;
    Ok(())
}

/// Read one frame, blocking until it is complete
pub fn read_frame<R: Read, T: DeserializeOwned>(mut r: R) -> IpcResult<T> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    r.read_exact(&mut header)?;
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(IpcError::FrameTooLarge {
            size: len,
            limit: MAX_FRAME_SIZE,
        });
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    Ok(serde_json::from_slice(&payload)?)
}
