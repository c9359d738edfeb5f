#![forbid(unsafe_code)]

use bytes::{Buf, BufMut, BytesMut};
use prost::Message;
use thiserror::Error;

/// Default maximum frame payload size.
///
/// Chat envelopes are small; the largest frames are rosters, which stay
/// far below this even with thousands of connections.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 256 * 1024;

/// Length-prefix size in bytes (big-endian `u32`).
const LEN_PREFIX: usize = 4;

#[derive(Debug, Error)]
pub enum FramingError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("protobuf decode error: {0}")]
	Decode(#[from] prost::DecodeError),

	#[error("protobuf encode error: {0}")]
	Encode(#[from] prost::EncodeError),
}

/// Encode a protobuf message into a length-prefixed frame.
pub fn encode_frame<M: Message>(msg: &M, max_frame_size: usize) -> Result<Vec<u8>, FramingError> {
	let payload_len = msg.encoded_len();
	if payload_len > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len: payload_len,
			max: max_frame_size,
		});
	}

	let mut out = Vec::with_capacity(LEN_PREFIX + payload_len);
	out.extend_from_slice(&(payload_len as u32).to_be_bytes());
	msg.encode(&mut out)?;
	Ok(out)
}

/// Append an encoded frame to the provided buffer.
pub fn encode_frame_into<M: Message>(buf: &mut BytesMut, msg: &M, max_frame_size: usize) -> Result<(), FramingError> {
	let payload_len = msg.encoded_len();
	if payload_len > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len: payload_len,
			max: max_frame_size,
		});
	}

	buf.reserve(LEN_PREFIX + payload_len);
	buf.put_u32(payload_len as u32);
	msg.encode(buf)?;
	Ok(())
}

/// Try to decode one frame from the front of a growable read buffer.
///
/// Returns `Ok(None)` until a complete frame has accumulated; consumed
/// bytes are split off the buffer, so partial trailing frames survive for
/// the next read.
pub fn try_decode_frame<M: Message + Default>(buf: &mut BytesMut, max_frame_size: usize) -> Result<Option<M>, FramingError> {
	if buf.len() < LEN_PREFIX {
		return Ok(None);
	}

	let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
	if len > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len,
			max: max_frame_size,
		});
	}

	if buf.len() < LEN_PREFIX + len {
		return Ok(None);
	}

	buf.advance(LEN_PREFIX);
	let payload = buf.split_to(len);
	let msg = M::decode(&payload[..])?;
	Ok(Some(msg))
}
