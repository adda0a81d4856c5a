//! Wire protocol for JT/T 808.
//!
//! ## Frame format (all integers big-endian)
//!
//! ```text
//! 0x7E | msg_id:u16 | body_attr:u16 | phone:BCD[6] | flow:u16
//!      [ total_packets:u16 | packet_seq:u16 ]   <- only when fragmented
//!      | body[msg_len]
//!      | xor_checksum:u8
//!      | 0x7E
//! ```
//!
//! Byte stuffing applies to everything between the sentinels: 0x7E becomes
//! `7D 02`, 0x7D becomes `7D 01`. The checksum is the XOR of every byte
//! from the first head byte through the last body byte.

pub mod escape;
pub mod fragment;
pub mod frame;
pub mod head;
pub mod message;

pub use escape::{escape, unescape, xor_checksum};
pub use fragment::Reassembly;
pub use frame::{FrameBuffer, FrameCodec};
pub use head::{BodyAttr, MsgHead};
pub use message::{msg_id, Acknowledge, MessageContent, ProtocolParameter};

/// Frame sentinel byte.
pub const FRAME_SIGN: u8 = 0x7E;

/// Escape marker byte.
pub const ESCAPE_MARK: u8 = 0x7D;

/// Second byte of an escaped sentinel (`7D 02` -> 0x7E).
pub const ESCAPE_SIGN: u8 = 0x02;

/// Second byte of an escaped escape marker (`7D 01` -> 0x7D).
pub const ESCAPE_ESCAPE: u8 = 0x01;

/// Head length without fragment fields.
pub const PLAIN_HEAD_LEN: usize = 12;

/// Head length with fragment fields.
pub const FRAGMENTED_HEAD_LEN: usize = 16;

/// Maximum body size: the 10-bit msg_len field.
pub const MAX_BODY_SIZE: usize = 1023;

/// Minimum unescaped frame: sentinel + 12-byte head + checksum + sentinel.
pub const MIN_FRAME_LEN: usize = 15;

/// Maximum escaped frame the stream codec will buffer before giving up:
/// worst case every byte of a maximal frame is stuffed.
pub const MAX_FRAME_SIZE: usize = 2 * (FRAGMENTED_HEAD_LEN + MAX_BODY_SIZE + 1) + 2;
