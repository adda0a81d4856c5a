//! Message head encoding and decoding.

use byteorder::{BigEndian, ByteOrder};

use super::{FRAGMENTED_HEAD_LEN, MAX_BODY_SIZE, MIN_FRAME_LEN, PLAIN_HEAD_LEN};
use crate::error::{CodecError, Result};
use crate::types::{FlowNumber, PhoneNumber};

/// Message body attributes: a 16-bit word carrying the body length,
/// encryption mode and fragmentation flag.
///
/// Bit layout (value domain): bits 0-9 `msg_len`, bits 10-12 `encrypt`
/// (bit 10 set means RSA), bit 13 `fragmented`, bits 14-15 reserved.
/// Always encoded big-endian; never rely on native bit-field layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BodyAttr(u16);

impl BodyAttr {
    const MSG_LEN_MASK: u16 = 0x03FF;
    const ENCRYPT_SHIFT: u16 = 10;
    const ENCRYPT_MASK: u16 = 0x07;
    const RSA_BIT: u16 = 1 << 10;
    const FRAGMENT_BIT: u16 = 1 << 13;

    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Body length in bytes: payload only, excluding head, checksum,
    /// sentinels and escape expansion.
    pub const fn msg_len(self) -> u16 {
        self.0 & Self::MSG_LEN_MASK
    }

    pub fn set_msg_len(&mut self, len: u16) {
        self.0 = (self.0 & !Self::MSG_LEN_MASK) | (len & Self::MSG_LEN_MASK);
    }

    /// Raw 3-bit encryption field.
    pub const fn encrypt(self) -> u8 {
        ((self.0 >> Self::ENCRYPT_SHIFT) & Self::ENCRYPT_MASK) as u8
    }

    /// RSA encryption flag (encrypt bit 10).
    pub const fn rsa(self) -> bool {
        self.0 & Self::RSA_BIT != 0
    }

    pub fn set_rsa(&mut self, on: bool) {
        if on {
            self.0 |= Self::RSA_BIT;
        } else {
            self.0 &= !Self::RSA_BIT;
        }
    }

    pub const fn fragmented(self) -> bool {
        self.0 & Self::FRAGMENT_BIT != 0
    }

    pub fn set_fragmented(&mut self, on: bool) {
        if on {
            self.0 |= Self::FRAGMENT_BIT;
        } else {
            self.0 &= !Self::FRAGMENT_BIT;
        }
    }
}

/// Message head: the fixed 12-byte prefix of every frame, extended to
/// 16 bytes by the fragment fields when `attr.fragmented()` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MsgHead {
    /// Message ID.
    pub msg_id: u16,
    /// Body attributes.
    pub attr: BodyAttr,
    /// Terminal phone number (6-byte BCD on the wire).
    pub phone: PhoneNumber,
    /// Flow number.
    pub flow_num: FlowNumber,
    /// Total number of packets; meaningful only when fragmented.
    pub total_packets: u16,
    /// 1-based packet sequence number; meaningful only when fragmented.
    pub packet_seq: u16,
}

impl MsgHead {
    /// Encoded head length for the current fragmentation mode.
    pub fn encoded_len(&self) -> usize {
        if self.attr.fragmented() {
            FRAGMENTED_HEAD_LEN
        } else {
            PLAIN_HEAD_LEN
        }
    }

    /// Encode the head, stamping `payload_len` into the body attributes.
    pub fn encode(&self, payload_len: usize) -> Result<Vec<u8>> {
        if payload_len > MAX_BODY_SIZE {
            return Err(CodecError::BodyTooLarge {
                size: payload_len,
                max: MAX_BODY_SIZE,
            }
            .into());
        }

        let mut attr = self.attr;
        attr.set_msg_len(payload_len as u16);

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.msg_id.to_be_bytes());
        buf.extend_from_slice(&attr.raw().to_be_bytes());
        buf.extend_from_slice(&self.phone.to_bcd()?);
        buf.extend_from_slice(&self.flow_num.value().to_be_bytes());
        if attr.fragmented() {
            buf.extend_from_slice(&self.total_packets.to_be_bytes());
            buf.extend_from_slice(&self.packet_seq.to_be_bytes());
        }
        Ok(buf)
    }

    /// Decode a head from an unescaped, sentinel-bounded frame.
    ///
    /// Needs at least sentinel + 12-byte head + checksum + sentinel.
    /// Fragmentation is inferred from bit 13 of the body attributes; a
    /// fragmented head requires the 4 extra bytes to be present.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame.len() < MIN_FRAME_LEN {
            return Err(CodecError::BadHeader.into());
        }

        let msg_id = BigEndian::read_u16(&frame[1..3]);
        let attr = BodyAttr::new(BigEndian::read_u16(&frame[3..5]));
        let phone = PhoneNumber::from_bcd(&frame[5..11])?;
        let flow_num = FlowNumber::new(BigEndian::read_u16(&frame[11..13]));

        let (total_packets, packet_seq) = if attr.fragmented() {
            // Sentinel + 16-byte head + checksum + sentinel minimum.
            if frame.len() < MIN_FRAME_LEN + 4 {
                return Err(CodecError::BadHeader.into());
            }
            let total = BigEndian::read_u16(&frame[13..15]);
            let seq = BigEndian::read_u16(&frame[15..17]);
            if total == 0 || seq == 0 || seq > total {
                return Err(CodecError::BadHeader.into());
            }
            (total, seq)
        } else {
            (0, 0)
        };

        Ok(Self {
            msg_id,
            attr,
            phone,
            flow_num,
            total_packets,
            packet_seq,
        })
    }

    /// Offset of the first body byte within the sentinel-bounded frame.
    pub fn body_offset(&self) -> usize {
        1 + self.encoded_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_head() -> MsgHead {
        MsgHead {
            msg_id: 0x0200,
            attr: BodyAttr::default(),
            phone: PhoneNumber::new("13523339527").unwrap(),
            flow_num: FlowNumber(7),
            total_packets: 0,
            packet_seq: 0,
        }
    }

    fn frame_around(head_bytes: &[u8], body: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x7E];
        frame.extend_from_slice(head_bytes);
        frame.extend_from_slice(body);
        frame.push(0x00); // checksum placeholder, not verified here
        frame.push(0x7E);
        frame
    }

    #[test]
    fn body_attr_fields() {
        let mut attr = BodyAttr::new(0);
        attr.set_msg_len(28);
        attr.set_fragmented(true);
        assert_eq!(attr.msg_len(), 28);
        assert!(attr.fragmented());
        assert!(!attr.rsa());
        assert_eq!(attr.raw(), 0x2000 | 28);
    }

    #[test]
    fn body_attr_round_trip() {
        for raw in [0u16, 0x201C, 0x0400, 0xFFFF] {
            assert_eq!(BodyAttr::new(raw).raw(), raw);
        }
    }

    #[test]
    fn head_round_trip_plain() {
        let head = sample_head();
        let bytes = head.encode(5).unwrap();
        assert_eq!(bytes.len(), 12);

        let frame = frame_around(&bytes, &[0; 5]);
        let decoded = MsgHead::decode(&frame).unwrap();
        assert_eq!(decoded.msg_id, 0x0200);
        assert_eq!(decoded.attr.msg_len(), 5);
        assert_eq!(decoded.phone, head.phone);
        assert_eq!(decoded.flow_num, FlowNumber(7));
        assert_eq!(decoded.body_offset(), 13);
    }

    #[test]
    fn head_round_trip_fragmented() {
        let mut head = sample_head();
        head.attr.set_fragmented(true);
        head.total_packets = 6;
        head.packet_seq = 3;

        let bytes = head.encode(100).unwrap();
        assert_eq!(bytes.len(), 16);

        let frame = frame_around(&bytes, &[0; 100]);
        let decoded = MsgHead::decode(&frame).unwrap();
        assert!(decoded.attr.fragmented());
        assert_eq!(decoded.total_packets, 6);
        assert_eq!(decoded.packet_seq, 3);
        assert_eq!(decoded.body_offset(), 17);
    }

    #[test]
    fn decode_rejects_short_frames() {
        assert!(MsgHead::decode(&[0x7E; 14]).is_err());
    }

    #[test]
    fn decode_rejects_bad_fragment_fields() {
        let mut head = sample_head();
        head.attr.set_fragmented(true);
        head.total_packets = 2;
        head.packet_seq = 3; // seq > total
        let bytes = head.encode(0).unwrap();
        let frame = frame_around(&bytes, &[]);
        assert!(MsgHead::decode(&frame).is_err());
    }

    #[test]
    fn encode_rejects_oversized_body() {
        assert!(sample_head().encode(1024).is_err());
    }
}
