//! Frame parsing: the decoder dispatch table and the built-in body
//! decoders for every supported message ID.
//!
//! `parse_frame` is the single inbound entry point: unescape, verify the
//! XOR checksum, decode the head, slice the body to the declared length
//! and dispatch to the registered decoder, which populates the `parse`
//! side of the [`ProtocolParameter`].

use std::collections::HashMap;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};

use crate::error::{CodecError, ProtocolError, Result};
use crate::location::{AlarmBits, ExtensionMap, LocationBasic, StatusBits};
use crate::media::MultimediaUpload;
use crate::params::TerminalParameters;
use crate::protocol::escape::{unescape, xor_checksum};
use crate::protocol::head::MsgHead;
use crate::protocol::message::msg_id;
use crate::protocol::ProtocolParameter;
use crate::types::PlateColor;
use crate::util::bcd;

/// A body decoder: consumes the body slice and fills the `parse` side.
pub type DecodeFn = Arc<dyn Fn(&[u8], &mut ProtocolParameter) -> Result<()> + Send + Sync>;

/// Decoder dispatch table keyed by message ID.
pub struct Parser {
    handlers: HashMap<u16, DecodeFn>,
}

impl Parser {
    /// An empty table with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// A table with every built-in handler installed.
    pub fn with_defaults() -> Self {
        let mut parser = Self::new();
        parser.install_defaults();
        parser
    }

    /// Insert a handler only when `id` is absent. Returns `false` when a
    /// handler already exists.
    pub fn append(&mut self, id: u16, handler: DecodeFn) -> bool {
        if self.handlers.contains_key(&id) {
            return false;
        }
        self.handlers.insert(id, handler);
        true
    }

    /// Insert or replace a handler. Always returns `true`.
    pub fn override_handler(&mut self, id: u16, handler: DecodeFn) -> bool {
        self.handlers.insert(id, handler);
        true
    }

    pub fn contains(&self, id: u16) -> bool {
        self.handlers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    /// Decode the body for `id` into the `parse` side.
    pub fn decode_body(&self, id: u16, body: &[u8], para: &mut ProtocolParameter) -> Result<()> {
        let handler = self
            .handlers
            .get(&id)
            .ok_or(ProtocolError::NoHandler(id))?;
        handler(body, para)
    }

    /// Install the built-in handlers for the supported command set.
    pub fn install_defaults(&mut self) {
        let empty_body: DecodeFn = Arc::new(|_, _| Ok(()));

        // 0x0001 / 0x8001, general responses.
        let general_response: DecodeFn = Arc::new(|body, para| {
            let mut r = BodyReader::new(body);
            para.parse.ack.flow_num = r.u16()?;
            para.parse.ack.msg_id = r.u16()?;
            para.parse.ack.result = r.u8()?;
            Ok(())
        });
        self.handlers
            .insert(msg_id::TERMINAL_GENERAL_RESPONSE, general_response.clone());
        self.handlers
            .insert(msg_id::PLATFORM_GENERAL_RESPONSE, general_response);

        // Empty bodies.
        self.handlers
            .insert(msg_id::TERMINAL_HEARTBEAT, empty_body.clone());
        self.handlers
            .insert(msg_id::TERMINAL_LOGOUT, empty_body.clone());
        self.handlers.insert(msg_id::QUERY_LOCATION, empty_body);

        // 0x8104, query all parameters: an empty body that resets the
        // queried-ID list so the reply emits the full map.
        self.handlers.insert(
            msg_id::QUERY_PARAMETERS,
            Arc::new(|_, para| {
                para.parse.query_param_ids.clear();
                Ok(())
            }),
        );

        // 0x8003, fill packet request. Packet IDs are big-endian u16.
        self.handlers.insert(
            msg_id::FILL_PACKET_REQUEST,
            Arc::new(|body, para| {
                let mut r = BodyReader::new(body);
                let first_flow = r.u16()?;
                let count = r.u8()? as usize;
                if body.len() != 3 + count * 2 {
                    return Err(CodecError::BadLength {
                        expected: 3 + count * 2,
                        got: body.len(),
                    }
                    .into());
                }
                let fill = &mut para.parse.fill_packet;
                fill.first_packet_flow = first_flow;
                fill.packet_ids.clear();
                for _ in 0..count {
                    fill.packet_ids.push(r.u16()?);
                }
                Ok(())
            }),
        );

        // 0x0100, terminal register.
        self.handlers.insert(
            msg_id::TERMINAL_REGISTER,
            Arc::new(|body, para| {
                let mut r = BodyReader::new(body);
                let info = &mut para.parse.register_info;
                info.province_id = r.u16()?;
                info.city_id = r.u16()?;
                info.manufacturer_id = r.bytes(5)?.to_vec();
                info.terminal_model = strip_padding(r.bytes(20)?);
                info.terminal_id = strip_padding(r.bytes(7)?);
                let color = r.u8()?;
                info.plate_color = PlateColor::from_u8(color).unwrap_or(PlateColor::Other);
                info.plate_number.clear();
                if info.plate_color != PlateColor::Unregistered {
                    info.plate_number = String::from_utf8_lossy(r.rest()).into_owned();
                }
                Ok(())
            }),
        );

        // 0x8100, register response: the auth code rides along on success.
        self.handlers.insert(
            msg_id::REGISTER_RESPONSE,
            Arc::new(|body, para| {
                let mut r = BodyReader::new(body);
                para.parse.ack.flow_num = r.u16()?;
                para.parse.ack.msg_id = msg_id::TERMINAL_REGISTER;
                para.parse.ack.result = r.u8()?;
                para.parse.auth_code.clear();
                if para.parse.ack.result == 0 {
                    para.parse.auth_code = r.rest().to_vec();
                }
                Ok(())
            }),
        );

        // 0x0102, terminal authentication.
        self.handlers.insert(
            msg_id::TERMINAL_AUTH,
            Arc::new(|body, para| {
                para.parse.auth_code = body.to_vec();
                Ok(())
            }),
        );

        // 0x8103, set terminal parameters.
        self.handlers.insert(
            msg_id::SET_PARAMETERS,
            Arc::new(|body, para| {
                para.parse.parameters = TerminalParameters::decode_list(body)?;
                Ok(())
            }),
        );

        // 0x8106, query specific terminal parameters.
        self.handlers.insert(
            msg_id::QUERY_SPECIFIC_PARAMETERS,
            Arc::new(|body, para| {
                let mut r = BodyReader::new(body);
                let count = r.u8()? as usize;
                if body.len() != 1 + count * 4 {
                    return Err(CodecError::BadLength {
                        expected: 1 + count * 4,
                        got: body.len(),
                    }
                    .into());
                }
                para.parse.query_param_ids.clear();
                for _ in 0..count {
                    para.parse.query_param_ids.push(r.u32()?);
                }
                Ok(())
            }),
        );

        // 0x0104, query parameters response.
        self.handlers.insert(
            msg_id::QUERY_PARAMETERS_RESPONSE,
            Arc::new(|body, para| {
                let mut r = BodyReader::new(body);
                para.parse.ack.flow_num = r.u16()?;
                para.parse.ack.msg_id = msg_id::QUERY_PARAMETERS;
                para.parse.parameters = TerminalParameters::decode_list(r.rest())?;
                Ok(())
            }),
        );

        // 0x8108, upgrade package.
        self.handlers.insert(
            msg_id::UPGRADE_PACKAGE,
            Arc::new(|body, para| {
                let mut r = BodyReader::new(body);
                let up = &mut para.parse.upgrade;
                up.target = r.u8()?;
                up.manufacturer_id = r.bytes(5)?.to_vec();
                let version_len = r.u8()? as usize;
                up.version = String::from_utf8_lossy(r.bytes(version_len)?).into_owned();
                up.total_len = r.u32()?;
                up.data = r.rest().to_vec();
                Ok(())
            }),
        );

        // 0x0108, upgrade result report.
        self.handlers.insert(
            msg_id::UPGRADE_RESULT,
            Arc::new(|body, para| {
                let mut r = BodyReader::new(body);
                para.parse.upgrade.target = r.u8()?;
                para.parse.upgrade.result = r.u8()?;
                Ok(())
            }),
        );

        // 0x0200, location report.
        self.handlers.insert(
            msg_id::LOCATION_REPORT,
            Arc::new(|body, para| {
                let (basic, extensions) = decode_location_body(body)?;
                para.parse.location = basic;
                para.parse.extensions = extensions;
                Ok(())
            }),
        );

        // 0x0201, location query response.
        self.handlers.insert(
            msg_id::QUERY_LOCATION_RESPONSE,
            Arc::new(|body, para| {
                let mut r = BodyReader::new(body);
                para.parse.ack.flow_num = r.u16()?;
                para.parse.ack.msg_id = msg_id::QUERY_LOCATION;
                let (basic, extensions) = decode_location_body(r.rest())?;
                para.parse.location = basic;
                para.parse.extensions = extensions;
                Ok(())
            }),
        );

        // 0x8202, tracking control: exactly 6 bytes.
        self.handlers.insert(
            msg_id::TRACKING_CONTROL,
            Arc::new(|body, para| {
                if body.len() != 6 {
                    return Err(CodecError::BadLength {
                        expected: 6,
                        got: body.len(),
                    }
                    .into());
                }
                let mut r = BodyReader::new(body);
                para.parse.tracking.interval = r.u16()?;
                para.parse.tracking.duration = r.u32()?;
                Ok(())
            }),
        );

        // 0x8604, set polygon area.
        self.handlers.insert(
            msg_id::SET_POLYGON_AREA,
            Arc::new(|body, para| {
                let mut r = BodyReader::new(body);
                let area = &mut para.parse.polygon_area;
                area.area_id = r.u32()?;
                area.attribute = crate::area::AreaAttribute::new(r.u16()?);
                if area.attribute.by_time() {
                    area.start_time = bcd::decode_zero_filled(r.bytes(6)?);
                    area.stop_time = bcd::decode_zero_filled(r.bytes(6)?);
                } else {
                    area.start_time.clear();
                    area.stop_time.clear();
                }
                if area.attribute.speed_limited() {
                    area.max_speed = r.u16()?;
                    area.overspeed_duration = r.u8()?;
                } else {
                    area.max_speed = 0;
                    area.overspeed_duration = 0;
                }
                let count = r.u16()? as usize;
                if r.remaining() != count * 8 {
                    return Err(CodecError::BadLength {
                        expected: count * 8,
                        got: r.remaining(),
                    }
                    .into());
                }
                area.vertices.clear();
                for _ in 0..count {
                    let lat = f64::from(r.u32()?) * 1e-6;
                    let lon = f64::from(r.u32()?) * 1e-6;
                    area.vertices.push(crate::area::LocationPoint::new(lat, lon));
                }
                Ok(())
            }),
        );

        // 0x8605, delete polygon areas.
        self.handlers.insert(
            msg_id::DELETE_POLYGON_AREA,
            Arc::new(|body, para| {
                let mut r = BodyReader::new(body);
                let count = r.u8()? as usize;
                if body.len() != 1 + count * 4 {
                    return Err(CodecError::BadLength {
                        expected: 1 + count * 4,
                        got: body.len(),
                    }
                    .into());
                }
                para.parse.delete_area_ids.clear();
                for _ in 0..count {
                    para.parse.delete_area_ids.push(r.u32()?);
                }
                Ok(())
            }),
        );

        // 0x0801, multimedia data upload.
        self.handlers.insert(
            msg_id::MULTIMEDIA_UPLOAD,
            Arc::new(|body, para| {
                let mut r = BodyReader::new(body);
                let media: &mut MultimediaUpload = &mut para.parse.media;
                media.media_id = r.u32()?;
                media.media_type = r.u8()?;
                media.media_format = r.u8()?;
                media.event = r.u8()?;
                media.channel_id = r.u8()?;
                media.location = r.bytes(LocationBasic::WIRE_LEN)?.to_vec();
                media.data = r.rest().to_vec();
                Ok(())
            }),
        );

        // 0x8800, multimedia upload response.
        self.handlers.insert(
            msg_id::MULTIMEDIA_UPLOAD_RESPONSE,
            Arc::new(|body, para| {
                let mut r = BodyReader::new(body);
                let ack = &mut para.parse.media_ack;
                ack.media_id = r.u32()?;
                ack.reload_packet_ids.clear();
                if r.remaining() > 0 {
                    let count = r.u8()? as usize;
                    if r.remaining() != count * 2 {
                        return Err(CodecError::BadLength {
                            expected: count * 2,
                            got: r.remaining(),
                        }
                        .into());
                    }
                    for _ in 0..count {
                        ack.reload_packet_ids.push(r.u16()?);
                    }
                }
                Ok(())
            }),
        );

        // 0x0704, batch location report.
        self.handlers.insert(
            msg_id::BATCH_LOCATION_REPORT,
            Arc::new(|body, para| {
                let mut r = BodyReader::new(body);
                let count = r.u16()? as usize;
                para.parse.batch_location.kind = r.u8()?;
                para.parse.batch_location.items.clear();
                for _ in 0..count {
                    let len = r.u16()? as usize;
                    para.parse
                        .batch_location
                        .items
                        .push(r.bytes(len)?.to_vec());
                }
                if r.remaining() != 0 {
                    return Err(CodecError::BadLength {
                        expected: body.len() - r.remaining(),
                        got: body.len(),
                    }
                    .into());
                }
                Ok(())
            }),
        );

        // 0x0705, CAN broadcast data: fixed 12-byte frames.
        self.handlers.insert(
            msg_id::CAN_BROADCAST,
            Arc::new(|body, para| {
                let mut r = BodyReader::new(body);
                let count = r.u16()? as usize;
                para.parse.can_data.receive_time = bcd::decode_zero_filled(r.bytes(5)?);
                if r.remaining() != count * 12 {
                    return Err(CodecError::BadLength {
                        expected: count * 12,
                        got: r.remaining(),
                    }
                    .into());
                }
                para.parse.can_data.frames.clear();
                for _ in 0..count {
                    let id = r.u32()?;
                    let data = r.bytes(8)?.to_vec();
                    para.parse
                        .can_data
                        .frames
                        .push(crate::protocol::message::CanFrame { id, data });
                }
                Ok(())
            }),
        );

        // 0x0205, version information.
        self.handlers.insert(
            msg_id::VERSION_INFO,
            Arc::new(|body, para| {
                let mut r = BodyReader::new(body);
                let info = &mut para.parse.version_info;
                info.version = r.str8()?;
                info.release_date = r.str8()?;
                info.cpu_id = r.bytes8()?;
                info.model = r.str8()?;
                info.imei = r.str8()?;
                info.imsi = r.str8()?;
                info.iccid = r.str8()?;
                info.car_model = r.u16()?;
                info.vin = r.str8()?;
                info.total_mileage = r.u32()?;
                info.total_fuel = r.u32()?;
                Ok(())
            }),
        );

        // 0x0252, driving licence data.
        self.handlers.insert(
            msg_id::DRIVING_LICENCE_DATA,
            Arc::new(|body, para| {
                let mut r = BodyReader::new(body);
                let licence = &mut para.parse.licence;
                licence.card.name = r.str8()?;
                licence.card.country = r.str8()?;
                licence.card.citizen_id = r.str8()?;
                licence.card.expire_date = r.str8()?;
                licence.card.date_of_birth = r.str8()?;
                licence.card.licence_type = r.str8()?;
                licence.card.gender = r.str8()?;
                licence.card.licence_id = r.str8()?;
                licence.card.issuing_branch = r.str8()?;
                licence.card.track = r.str8()?;
                licence.login_status = r.u8()?;
                licence.upload_allowed = r.u8()?;
                Ok(())
            }),
        );
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Parse one complete escaped frame, populating the `parse` side.
///
/// Returns the message ID on success. Errors are frame-local: the caller
/// decides whether to answer, log or drop; the session is never torn down
/// here.
pub fn parse_frame(parser: &Parser, input: &[u8], para: &mut ProtocolParameter) -> Result<u16> {
    let raw = unescape(input)?;
    if raw.len() < crate::protocol::MIN_FRAME_LEN {
        return Err(CodecError::BadHeader.into());
    }

    let expected = raw[raw.len() - 2];
    let computed = xor_checksum(&raw[1..raw.len() - 2]);
    if computed != expected {
        return Err(CodecError::BadChecksum {
            expected,
            got: computed,
        }
        .into());
    }

    let head = MsgHead::decode(&raw)?;
    let body_start = head.body_offset();
    let body_len = head.attr.msg_len() as usize;
    let id = head.msg_id;
    // Store the head before the body checks so callers can still answer
    // a malformed-body frame with a protocol-level response.
    para.parse.head = head;

    // Frame layout: sentinel + head + body + checksum + sentinel.
    let declared = body_start + body_len + 2;
    if declared != raw.len() {
        return Err(CodecError::BadLength {
            expected: declared,
            got: raw.len(),
        }
        .into());
    }

    let body = raw[body_start..body_start + body_len].to_vec();
    parser.decode_body(id, &body, para)?;
    Ok(id)
}

/// Decode the 28-byte basic location block plus the additional items.
pub fn decode_location_body(body: &[u8]) -> Result<(LocationBasic, ExtensionMap)> {
    if body.len() < LocationBasic::WIRE_LEN {
        return Err(CodecError::BadLength {
            expected: LocationBasic::WIRE_LEN,
            got: body.len(),
        }
        .into());
    }

    let basic = LocationBasic {
        alarm: AlarmBits::new(BigEndian::read_u32(&body[0..4])),
        status: StatusBits::new(BigEndian::read_u32(&body[4..8])),
        latitude: BigEndian::read_u32(&body[8..12]),
        longitude: BigEndian::read_u32(&body[12..16]),
        altitude: BigEndian::read_u16(&body[16..18]),
        speed: BigEndian::read_u16(&body[18..20]),
        bearing: BigEndian::read_u16(&body[20..22]),
        time: bcd::decode_zero_filled(&body[22..28]),
    };

    let mut extensions = ExtensionMap::new();
    let mut pos = LocationBasic::WIRE_LEN;
    while pos + 2 <= body.len() {
        let id = body[pos];
        let len = body[pos + 1] as usize;
        if pos + 2 + len > body.len() {
            return Err(CodecError::BadLength {
                expected: pos + 2 + len,
                got: body.len(),
            }
            .into());
        }
        extensions.insert(id, body[pos + 2..pos + 2 + len].to_vec());
        pos += 2 + len;
    }
    if pos != body.len() {
        return Err(CodecError::BadLength {
            expected: body.len(),
            got: pos,
        }
        .into());
    }

    Ok((basic, extensions))
}

/// Bounds-checked sequential reader over a body slice.
struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(CodecError::BadLength {
                expected: self.pos + n,
                got: self.buf.len(),
            }
            .into());
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    fn u16(&mut self) -> Result<u16> {
        self.need(2)?;
        let v = BigEndian::read_u16(&self.buf[self.pos..self.pos + 2]);
        self.pos += 2;
        Ok(v)
    }

    fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        let v = BigEndian::read_u32(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(v)
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.need(n)?;
        let v = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(v)
    }

    fn rest(&mut self) -> &'a [u8] {
        let v = &self.buf[self.pos..];
        self.pos = self.buf.len();
        v
    }

    fn bytes8(&mut self) -> Result<Vec<u8>> {
        let len = self.u8()? as usize;
        Ok(self.bytes(len)?.to_vec())
    }

    fn str8(&mut self) -> Result<String> {
        let bytes = self.bytes8()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn strip_padding(bytes: &[u8]) -> Vec<u8> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    bytes[..end].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packager::{package_frame, Packager};
    use crate::types::{FlowNumber, PhoneNumber};

    fn roundtrip(stage: impl FnOnce(&mut ProtocolParameter), id: u16) -> ProtocolParameter {
        let mut para = ProtocolParameter::new();
        para.desired.head.phone = PhoneNumber::new("13523339527").unwrap();
        para.desired.head.flow_num = FlowNumber(1);
        para.desired.head.msg_id = id;
        stage(&mut para);

        let frame = package_frame(&Packager::with_defaults(), &para).unwrap();
        let parsed_id = parse_frame(&Parser::with_defaults(), &frame, &mut para).unwrap();
        assert_eq!(parsed_id, id);
        assert_eq!(para.parse.head.phone.as_str(), "13523339527");
        para
    }

    #[test]
    fn general_response_round_trip() {
        let para = roundtrip(
            |p| {
                p.desired.ack.flow_num = 3;
                p.desired.ack.msg_id = msg_id::TERMINAL_AUTH;
                p.desired.ack.result = 0;
            },
            msg_id::PLATFORM_GENERAL_RESPONSE,
        );
        assert_eq!(para.parse.ack.flow_num, 3);
        assert_eq!(para.parse.ack.msg_id, msg_id::TERMINAL_AUTH);
        assert_eq!(para.parse.ack.result, 0);
    }

    #[test]
    fn fill_packet_ids_are_big_endian() {
        let para = roundtrip(
            |p| {
                p.desired.fill_packet.first_packet_flow = 0x0102;
                p.desired.fill_packet.packet_ids = vec![0x0103, 0x0204];
            },
            msg_id::FILL_PACKET_REQUEST,
        );
        assert_eq!(para.parse.fill_packet.first_packet_flow, 0x0102);
        assert_eq!(para.parse.fill_packet.packet_ids, vec![0x0103, 0x0204]);
    }

    #[test]
    fn fill_packet_length_check() {
        let mut para = ProtocolParameter::new();
        let parser = Parser::with_defaults();
        // count says 2 but only one id present
        let body = [0x00, 0x01, 0x02, 0x00, 0x03];
        assert!(matches!(
            parser.decode_body(msg_id::FILL_PACKET_REQUEST, &body, &mut para),
            Err(crate::Error::Codec(CodecError::BadLength { .. }))
        ));
    }

    #[test]
    fn register_round_trip() {
        let para = roundtrip(
            |p| {
                p.desired.register_info = crate::types::RegisterInfo {
                    province_id: 12,
                    city_id: 34,
                    manufacturer_id: b"MFG01".to_vec(),
                    terminal_model: b"MODELABC".to_vec(),
                    terminal_id: b"T001".to_vec(),
                    plate_color: PlateColor::Yellow,
                    plate_number: "\u{9c81}A12345".to_string(),
                };
            },
            msg_id::TERMINAL_REGISTER,
        );
        let info = &para.parse.register_info;
        assert_eq!(info.province_id, 12);
        assert_eq!(info.city_id, 34);
        assert_eq!(info.manufacturer_id, b"MFG01");
        assert_eq!(info.terminal_model, b"MODELABC");
        assert_eq!(info.terminal_id, b"T001");
        assert_eq!(info.plate_color, PlateColor::Yellow);
        assert_eq!(info.plate_number, "\u{9c81}A12345");
    }

    #[test]
    fn location_report_round_trip() {
        let para = roundtrip(
            |p| {
                p.desired.location = LocationBasic::from_units(
                    31.824636,
                    117.2,
                    40.0,
                    60.0,
                    90.0,
                    "200714123045",
                );
                let mut status = StatusBits::new(0);
                status.set(StatusBits::POSITIONED);
                p.desired.location.status = status;
                p.desired
                    .extensions
                    .insert(0x01, vec![0x00, 0x00, 0x05, 0x78]);
            },
            msg_id::LOCATION_REPORT,
        );
        let loc = &para.parse.location;
        assert_eq!(loc.latitude, 31_824_636);
        assert_eq!(loc.longitude, 117_200_000);
        assert_eq!(loc.altitude, 40);
        assert_eq!(loc.speed, 600);
        assert_eq!(loc.bearing, 90);
        assert_eq!(loc.time, "200714123045");
        assert!(loc.status.positioned());
        assert_eq!(loc.alarm.raw(), 0);
        assert_eq!(
            para.parse.extensions.get(0x01),
            Some(&[0x00, 0x00, 0x05, 0x78][..])
        );
    }

    #[test]
    fn location_extension_overrun_is_rejected() {
        let mut body = vec![0u8; 28];
        body.extend_from_slice(&[0x01, 0x09, 0x00]); // declares 9, has 1
        // fix up the BCD time so decode of basic block succeeds
        let mut para = ProtocolParameter::new();
        let parser = Parser::with_defaults();
        assert!(matches!(
            parser.decode_body(msg_id::LOCATION_REPORT, &body, &mut para),
            Err(crate::Error::Codec(CodecError::BadLength { .. }))
        ));
    }

    #[test]
    fn polygon_area_round_trip() {
        use crate::area::{AreaAttribute, LocationPoint, PolygonArea};
        let para = roundtrip(
            |p| {
                let mut attribute = AreaAttribute::new(0);
                attribute.set(AreaAttribute::BY_TIME);
                attribute.set(AreaAttribute::SPEED_LIMIT);
                p.desired.polygon_area = PolygonArea {
                    area_id: 9001,
                    attribute,
                    start_time: "200101000000".into(),
                    stop_time: "201231235959".into(),
                    max_speed: 80,
                    overspeed_duration: 10,
                    vertices: vec![
                        LocationPoint::new(31.0, 117.0),
                        LocationPoint::new(31.1, 117.0),
                        LocationPoint::new(31.1, 117.1),
                        LocationPoint::new(31.0, 117.1),
                    ],
                };
            },
            msg_id::SET_POLYGON_AREA,
        );
        let area = &para.parse.polygon_area;
        assert_eq!(area.area_id, 9001);
        assert_eq!(area.start_time, "200101000000");
        assert_eq!(area.stop_time, "201231235959");
        assert_eq!(area.max_speed, 80);
        assert_eq!(area.overspeed_duration, 10);
        assert_eq!(area.vertices.len(), 4);
        assert!((area.vertices[0].latitude - 31.0).abs() < 1e-6);
        assert!((area.vertices[2].longitude - 117.1).abs() < 1e-6);
    }

    #[test]
    fn polygon_vertex_count_must_account_for_remaining() {
        let mut para = ProtocolParameter::new();
        let parser = Parser::with_defaults();
        let mut body = Vec::new();
        body.extend_from_slice(&1u32.to_be_bytes()); // area id
        body.extend_from_slice(&0u16.to_be_bytes()); // attr: no time, no speed
        body.extend_from_slice(&2u16.to_be_bytes()); // claims 2 vertices
        body.extend_from_slice(&[0u8; 8]); // only one present
        assert!(matches!(
            parser.decode_body(msg_id::SET_POLYGON_AREA, &body, &mut para),
            Err(crate::Error::Codec(CodecError::BadLength { .. }))
        ));
    }

    #[test]
    fn multimedia_round_trip() {
        let para = roundtrip(
            |p| {
                p.desired.media = crate::media::MultimediaUpload {
                    media_id: 77,
                    media_type: 0,
                    media_format: 0,
                    event: 2,
                    channel_id: 1,
                    location: vec![0u8; 28],
                    data: vec![0xDE, 0xAD, 0xBE, 0xEF],
                };
            },
            msg_id::MULTIMEDIA_UPLOAD,
        );
        assert_eq!(para.parse.media.media_id, 77);
        assert_eq!(para.parse.media.location.len(), 28);
        assert_eq!(para.parse.media.data, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn media_ack_reload_ids_optional() {
        let para = roundtrip(
            |p| {
                p.desired.media_ack.media_id = 77;
                p.desired.media_ack.reload_packet_ids = vec![];
            },
            msg_id::MULTIMEDIA_UPLOAD_RESPONSE,
        );
        assert!(para.parse.media_ack.reload_packet_ids.is_empty());

        let para = roundtrip(
            |p| {
                p.desired.media_ack.media_id = 78;
                p.desired.media_ack.reload_packet_ids = vec![2, 5];
            },
            msg_id::MULTIMEDIA_UPLOAD_RESPONSE,
        );
        assert_eq!(para.parse.media_ack.media_id, 78);
        assert_eq!(para.parse.media_ack.reload_packet_ids, vec![2, 5]);
    }

    #[test]
    fn version_info_round_trip() {
        let para = roundtrip(
            |p| {
                p.desired.version_info = crate::protocol::message::VersionInfo {
                    version: "HBT530CVMFF2D1".into(),
                    release_date: "2020-06-24".into(),
                    cpu_id: vec![0xFD, 0xFF, 0x02, 0x00],
                    model: "EC200U".into(),
                    imei: "864714067557109".into(),
                    imsi: "520031008795627".into(),
                    iccid: "8966032421096431741F".into(),
                    car_model: 61526,
                    vin: "LSVNV2182E2100001".into(),
                    total_mileage: 123456,
                    total_fuel: 9876,
                };
            },
            msg_id::VERSION_INFO,
        );
        assert_eq!(para.parse.version_info.version, "HBT530CVMFF2D1");
        assert_eq!(para.parse.version_info.car_model, 61526);
        assert_eq!(para.parse.version_info.total_mileage, 123456);
    }

    #[test]
    fn can_broadcast_round_trip() {
        let para = roundtrip(
            |p| {
                p.desired.can_data = crate::protocol::message::CanBroadcast {
                    receive_time: "1230450010".into(),
                    frames: vec![crate::protocol::message::CanFrame {
                        id: 0x18FEF100,
                        data: vec![1, 2, 3, 4, 5, 6, 7, 8],
                    }],
                };
            },
            msg_id::CAN_BROADCAST,
        );
        assert_eq!(para.parse.can_data.receive_time, "1230450010");
        assert_eq!(para.parse.can_data.frames.len(), 1);
        assert_eq!(para.parse.can_data.frames[0].id, 0x18FEF100);
    }

    #[test]
    fn checksum_tamper_is_detected() {
        let mut para = ProtocolParameter::new();
        para.desired.head.phone = PhoneNumber::new("1").unwrap();
        para.desired.head.msg_id = msg_id::TERMINAL_HEARTBEAT;
        let mut frame = package_frame(&Packager::with_defaults(), &para).unwrap();
        // Flip a head byte (interior, not an escape-sensitive value).
        frame[2] ^= 0x01;
        let err = parse_frame(&Parser::with_defaults(), &frame, &mut para).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Codec(CodecError::BadChecksum { .. })
        ));
    }

    #[test]
    fn unescaped_interior_sentinel_is_bad_escape() {
        let mut para = ProtocolParameter::new();
        para.desired.head.phone = PhoneNumber::new("1").unwrap();
        para.desired.head.msg_id = msg_id::TERMINAL_HEARTBEAT;
        let frame = package_frame(&Packager::with_defaults(), &para).unwrap();
        // Splice a bare 0x7E into the interior.
        let mut bad = frame.clone();
        bad.insert(3, 0x7E);
        // The frame codec would split this differently; feed the parser
        // directly to exercise the escape check.
        let err = parse_frame(&Parser::with_defaults(), &bad, &mut para).unwrap_err();
        assert!(matches!(err, crate::Error::Codec(CodecError::BadEscape)));
    }

    #[test]
    fn unknown_id_is_no_handler() {
        let mut para = ProtocolParameter::new();
        para.desired.head.phone = PhoneNumber::new("1").unwrap();
        para.desired.head.msg_id = 0x0F00;
        let mut packager = Packager::with_defaults();
        packager.append(0x0F00, Arc::new(|_| Ok(vec![1, 2, 3])));
        let frame = package_frame(&packager, &para).unwrap();
        let err = parse_frame(&Parser::with_defaults(), &frame, &mut para).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Protocol(ProtocolError::NoHandler(0x0F00))
        ));
    }

    #[test]
    fn registry_semantics() {
        let mut parser = Parser::with_defaults();
        let count = parser.len();
        let noop: DecodeFn = Arc::new(|_, _| Ok(()));
        assert!(!parser.append(msg_id::TERMINAL_HEARTBEAT, noop.clone()));
        assert!(parser.override_handler(msg_id::TERMINAL_HEARTBEAT, noop.clone()));
        assert!(parser.append(0x0F01, noop));
        parser.clear();
        assert!(parser.is_empty());
        parser.install_defaults();
        assert_eq!(parser.len(), count);
    }
}
