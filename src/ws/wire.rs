//! Binary framing for the movement hot path.
//!
//! All integers and floats are little-endian.
//! - `0xB1` command batch: u16 count, then count × (i16 frame, u16 flags)
//! - `0xB2` snapshot: 16-byte entity id, i16 frame, 3 × f32 position
//! - `0xB3` rotation: 16-byte entity id, 4 × f32 quaternion (x, y, z, w)

use bytes::{Buf, BufMut, Bytes, BytesMut};
use glam::{Quat, Vec3};
use uuid::Uuid;

use crate::sync::{Frame, InputCommand, InputFlags, Snapshot};

pub const TAG_BATCH: u8 = 0xB1;
pub const TAG_SNAPSHOT: u8 = 0xB2;
pub const TAG_ROTATION: u8 = 0xB3;

/// Hard cap on commands per batch, well above the largest adaptive size
pub const MAX_BATCH_LEN: usize = 64;

const COMMAND_LEN: usize = 4;
const SNAPSHOT_LEN: usize = 1 + 16 + 2 + 12;
const ROTATION_LEN: usize = 1 + 16 + 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("short read: needed {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    #[error("unknown message tag {0:#04x}")]
    UnknownTag(u8),

    #[error("command batch is empty")]
    EmptyBatch,

    #[error("command batch of {0} exceeds the cap of {MAX_BATCH_LEN}")]
    OversizedBatch(usize),

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

/// A decoded server-to-client binary message
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServerFrame {
    Snapshot { entity: Uuid, snapshot: Snapshot },
    Rotation { entity: Uuid, rotation: Quat },
}

pub fn encode_batch(commands: &[InputCommand]) -> Bytes {
    let mut buf = BytesMut::with_capacity(3 + commands.len() * COMMAND_LEN);
    buf.put_u8(TAG_BATCH);
    buf.put_u16_le(commands.len() as u16);
    for command in commands {
        buf.put_i16_le(command.frame.value());
        buf.put_u16_le(command.flags.bits());
    }
    buf.freeze()
}

/// Decode a client command batch. Frame validity is left to the authority.
pub fn decode_batch(mut input: &[u8]) -> Result<Vec<InputCommand>, WireError> {
    need(input, 3)?;
    let tag = input.get_u8();
    if tag != TAG_BATCH {
        return Err(WireError::UnknownTag(tag));
    }
    let count = input.get_u16_le() as usize;
    if count == 0 {
        return Err(WireError::EmptyBatch);
    }
    if count > MAX_BATCH_LEN {
        return Err(WireError::OversizedBatch(count));
    }
    need(input, count * COMMAND_LEN)?;

    let commands = (0..count)
        .map(|_| {
            let frame = Frame(input.get_i16_le());
            let flags = InputFlags::from_bits(input.get_u16_le());
            InputCommand::new(frame, flags)
        })
        .collect();
    finish(input)?;
    Ok(commands)
}

pub fn encode_snapshot(entity: Uuid, snapshot: &Snapshot) -> Bytes {
    let mut buf = BytesMut::with_capacity(SNAPSHOT_LEN);
    buf.put_u8(TAG_SNAPSHOT);
    buf.put_slice(entity.as_bytes());
    buf.put_i16_le(snapshot.frame.value());
    for v in snapshot.position.to_array() {
        buf.put_f32_le(v);
    }
    buf.freeze()
}

pub fn encode_rotation(entity: Uuid, rotation: Quat) -> Bytes {
    let mut buf = BytesMut::with_capacity(ROTATION_LEN);
    buf.put_u8(TAG_ROTATION);
    buf.put_slice(entity.as_bytes());
    for v in rotation.to_array() {
        buf.put_f32_le(v);
    }
    buf.freeze()
}

/// Decode a snapshot or rotation publish
pub fn decode_server(mut input: &[u8]) -> Result<ServerFrame, WireError> {
    need(input, 1)?;
    let tag = input.get_u8();
    let frame = match tag {
        TAG_SNAPSHOT => {
            need(input, SNAPSHOT_LEN - 1)?;
            let entity = get_uuid(&mut input);
            let frame = Frame(input.get_i16_le());
            let position = Vec3::new(input.get_f32_le(), input.get_f32_le(), input.get_f32_le());
            ServerFrame::Snapshot {
                entity,
                snapshot: Snapshot { frame, position },
            }
        }
        TAG_ROTATION => {
            need(input, ROTATION_LEN - 1)?;
            let entity = get_uuid(&mut input);
            let rotation = Quat::from_xyzw(
                input.get_f32_le(),
                input.get_f32_le(),
                input.get_f32_le(),
                input.get_f32_le(),
            );
            ServerFrame::Rotation { entity, rotation }
        }
        other => return Err(WireError::UnknownTag(other)),
    };
    finish(input)?;
    Ok(frame)
}

fn need(input: &[u8], needed: usize) -> Result<(), WireError> {
    if input.len() < needed {
        return Err(WireError::Truncated {
            needed,
            available: input.len(),
        });
    }
    Ok(())
}

fn finish(input: &[u8]) -> Result<(), WireError> {
    match input.remaining() {
        0 => Ok(()),
        n => Err(WireError::TrailingBytes(n)),
    }
}

fn get_uuid(input: &mut &[u8]) -> Uuid {
    let mut raw = [0u8; 16];
    input.copy_to_slice(&mut raw);
    Uuid::from_bytes(raw)
}
