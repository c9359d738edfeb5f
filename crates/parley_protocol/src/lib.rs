#![forbid(unsafe_code)]

pub mod framing;
pub mod wire;

pub use framing::{DEFAULT_MAX_FRAME_SIZE, FramingError, encode_frame, encode_frame_into, try_decode_frame};
