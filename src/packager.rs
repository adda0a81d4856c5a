//! Message body packaging: the encoder dispatch table and the built-in
//! body encoders for every supported message ID.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{CodecError, ProtocolError, Result};
use crate::location::{ExtensionMap, LocationBasic};
use crate::protocol::escape::{escape, xor_checksum};
use crate::protocol::message::msg_id;
use crate::protocol::{ProtocolParameter, FRAME_SIGN};
use crate::types::PlateColor;
use crate::util::bcd;

/// A body encoder: reads the `desired` side and produces the body bytes.
pub type EncodeFn = Arc<dyn Fn(&ProtocolParameter) -> Result<Vec<u8>> + Send + Sync>;

/// Encoder dispatch table keyed by message ID.
///
/// Shared, read-mostly: populated before the session engines start and
/// read-only afterwards.
pub struct Packager {
    handlers: HashMap<u16, EncodeFn>,
}

impl Packager {
    /// An empty table with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// A table with every built-in handler installed.
    pub fn with_defaults() -> Self {
        let mut packager = Self::new();
        packager.install_defaults();
        packager
    }

    /// Insert a handler only when `id` is absent. Returns `false` when a
    /// handler already exists.
    pub fn append(&mut self, id: u16, handler: EncodeFn) -> bool {
        if self.handlers.contains_key(&id) {
            return false;
        }
        self.handlers.insert(id, handler);
        true
    }

    /// Insert or replace a handler. Always returns `true`.
    pub fn override_handler(&mut self, id: u16, handler: EncodeFn) -> bool {
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

    /// Encode the body for `id`. Unknown IDs are a recoverable error so
    /// callers can register custom commands without patching the core.
    pub fn encode_body(&self, id: u16, para: &ProtocolParameter) -> Result<Vec<u8>> {
        let handler = self
            .handlers
            .get(&id)
            .ok_or(ProtocolError::NoHandler(id))?;
        handler(para)
    }

    /// Install the built-in handlers for the supported command set.
    pub fn install_defaults(&mut self) {
        let empty_body: EncodeFn = Arc::new(|_| Ok(Vec::new()));

        // 0x0001 / 0x8001, general responses: ack_flow, ack_msg_id, result.
        let general_response: EncodeFn = Arc::new(|para| {
            let ack = &para.desired.ack;
            let mut body = Vec::with_capacity(5);
            body.extend_from_slice(&ack.flow_num.to_be_bytes());
            body.extend_from_slice(&ack.msg_id.to_be_bytes());
            body.push(ack.result);
            Ok(body)
        });
        self.handlers
            .insert(msg_id::TERMINAL_GENERAL_RESPONSE, general_response.clone());
        self.handlers
            .insert(msg_id::PLATFORM_GENERAL_RESPONSE, general_response);

        // 0x0002 heartbeat, 0x0003 logout, 0x8104 query all parameters,
        // 0x8201 query location: empty bodies.
        self.handlers
            .insert(msg_id::TERMINAL_HEARTBEAT, empty_body.clone());
        self.handlers
            .insert(msg_id::TERMINAL_LOGOUT, empty_body.clone());
        self.handlers
            .insert(msg_id::QUERY_PARAMETERS, empty_body.clone());
        self.handlers.insert(msg_id::QUERY_LOCATION, empty_body);

        // 0x8003, fill packet request.
        self.handlers.insert(
            msg_id::FILL_PACKET_REQUEST,
            Arc::new(|para| {
                let fill = &para.desired.fill_packet;
                let mut body = Vec::with_capacity(3 + fill.packet_ids.len() * 2);
                body.extend_from_slice(&fill.first_packet_flow.to_be_bytes());
                body.push(fill.packet_ids.len() as u8);
                for id in &fill.packet_ids {
                    body.extend_from_slice(&id.to_be_bytes());
                }
                Ok(body)
            }),
        );

        // 0x0100, terminal register.
        self.handlers.insert(
            msg_id::TERMINAL_REGISTER,
            Arc::new(|para| {
                let info = &para.desired.register_info;
                let mut body = Vec::with_capacity(37 + info.plate_number.len());
                body.extend_from_slice(&info.province_id.to_be_bytes());
                body.extend_from_slice(&info.city_id.to_be_bytes());
                put_padded(&mut body, &info.manufacturer_id, 5);
                put_padded(&mut body, &info.terminal_model, 20);
                put_padded(&mut body, &info.terminal_id, 7);
                body.push(info.plate_color as u8);
                if info.plate_color != PlateColor::Unregistered {
                    body.extend_from_slice(info.plate_number.as_bytes());
                }
                Ok(body)
            }),
        );

        // 0x8100, register response. The auth code rides along only on
        // success.
        self.handlers.insert(
            msg_id::REGISTER_RESPONSE,
            Arc::new(|para| {
                let ack = &para.desired.ack;
                let mut body = Vec::with_capacity(3 + para.desired.auth_code.len());
                body.extend_from_slice(&ack.flow_num.to_be_bytes());
                body.push(ack.result);
                if ack.result == 0 {
                    body.extend_from_slice(&para.desired.auth_code);
                }
                Ok(body)
            }),
        );

        // 0x0102, terminal authentication: the code bytes, whole body.
        self.handlers.insert(
            msg_id::TERMINAL_AUTH,
            Arc::new(|para| Ok(para.desired.auth_code.clone())),
        );

        // 0x8103, set terminal parameters.
        self.handlers.insert(
            msg_id::SET_PARAMETERS,
            Arc::new(|para| Ok(para.desired.parameters.encode_list())),
        );

        // 0x8106, query specific terminal parameters.
        self.handlers.insert(
            msg_id::QUERY_SPECIFIC_PARAMETERS,
            Arc::new(|para| {
                let ids = &para.desired.query_param_ids;
                let mut body = Vec::with_capacity(1 + ids.len() * 4);
                body.push(ids.len() as u8);
                for id in ids {
                    body.extend_from_slice(&id.to_be_bytes());
                }
                Ok(body)
            }),
        );

        // 0x0104, query parameters response. A preceding specific query
        // fixes the item order; otherwise the full map is emitted.
        self.handlers.insert(
            msg_id::QUERY_PARAMETERS_RESPONSE,
            Arc::new(|para| {
                let mut body = Vec::new();
                body.extend_from_slice(&para.desired.ack.flow_num.to_be_bytes());
                let items = if para.desired.query_param_ids.is_empty() {
                    para.desired.parameters.encode_list()
                } else {
                    para.desired
                        .parameters
                        .encode_selected(&para.desired.query_param_ids)
                };
                body.extend_from_slice(&items);
                Ok(body)
            }),
        );

        // 0x8108, upgrade package. `upgrade.data` holds the current
        // fragment during a fragmented push.
        self.handlers.insert(
            msg_id::UPGRADE_PACKAGE,
            Arc::new(|para| {
                let up = &para.desired.upgrade;
                if up.version.len() > u8::MAX as usize {
                    return Err(CodecError::BodyTooLarge {
                        size: up.version.len(),
                        max: u8::MAX as usize,
                    }
                    .into());
                }
                let mut body = Vec::with_capacity(11 + up.version.len() + up.data.len());
                body.push(up.target);
                put_padded(&mut body, &up.manufacturer_id, 5);
                body.push(up.version.len() as u8);
                body.extend_from_slice(up.version.as_bytes());
                body.extend_from_slice(&up.total_len.to_be_bytes());
                body.extend_from_slice(&up.data);
                Ok(body)
            }),
        );

        // 0x0108, upgrade result report.
        self.handlers.insert(
            msg_id::UPGRADE_RESULT,
            Arc::new(|para| {
                let up = &para.desired.upgrade;
                Ok(vec![up.target, up.result])
            }),
        );

        // 0x0200, location report.
        self.handlers.insert(
            msg_id::LOCATION_REPORT,
            Arc::new(|para| {
                encode_location_body(&para.desired.location, &para.desired.extensions)
            }),
        );

        // 0x0201, location query response: ack flow then the report body.
        self.handlers.insert(
            msg_id::QUERY_LOCATION_RESPONSE,
            Arc::new(|para| {
                let mut body = Vec::new();
                body.extend_from_slice(&para.desired.ack.flow_num.to_be_bytes());
                body.extend_from_slice(&encode_location_body(
                    &para.desired.location,
                    &para.desired.extensions,
                )?);
                Ok(body)
            }),
        );

        // 0x8202, tracking control.
        self.handlers.insert(
            msg_id::TRACKING_CONTROL,
            Arc::new(|para| {
                let ctrl = &para.desired.tracking;
                let mut body = Vec::with_capacity(6);
                body.extend_from_slice(&ctrl.interval.to_be_bytes());
                body.extend_from_slice(&ctrl.duration.to_be_bytes());
                Ok(body)
            }),
        );

        // 0x8604, set polygon area. Time fields only with by_time, speed
        // fields only with speed_limit.
        self.handlers.insert(
            msg_id::SET_POLYGON_AREA,
            Arc::new(|para| {
                let area = &para.desired.polygon_area;
                let mut body = Vec::new();
                body.extend_from_slice(&area.area_id.to_be_bytes());
                body.extend_from_slice(&area.attribute.raw().to_be_bytes());
                if area.attribute.by_time() {
                    body.extend_from_slice(&bcd::encode(&area.start_time, 6)?);
                    body.extend_from_slice(&bcd::encode(&area.stop_time, 6)?);
                }
                if area.attribute.speed_limited() {
                    body.extend_from_slice(&area.max_speed.to_be_bytes());
                    body.push(area.overspeed_duration);
                }
                body.extend_from_slice(&(area.vertices.len() as u16).to_be_bytes());
                for vertex in &area.vertices {
                    let lat = (vertex.latitude * 1e6) as u32;
                    let lon = (vertex.longitude * 1e6) as u32;
                    body.extend_from_slice(&lat.to_be_bytes());
                    body.extend_from_slice(&lon.to_be_bytes());
                }
                Ok(body)
            }),
        );

        // 0x8605, delete polygon areas. Zero IDs means delete all.
        self.handlers.insert(
            msg_id::DELETE_POLYGON_AREA,
            Arc::new(|para| {
                let ids = &para.desired.delete_area_ids;
                let mut body = Vec::with_capacity(1 + ids.len() * 4);
                body.push(ids.len() as u8);
                for id in ids {
                    body.extend_from_slice(&id.to_be_bytes());
                }
                Ok(body)
            }),
        );

        // 0x0801, multimedia data upload. `media.data` holds the current
        // fragment during a fragmented upload.
        self.handlers.insert(
            msg_id::MULTIMEDIA_UPLOAD,
            Arc::new(|para| {
                let media = &para.desired.media;
                if media.location.len() != LocationBasic::WIRE_LEN {
                    return Err(CodecError::BadLength {
                        expected: LocationBasic::WIRE_LEN,
                        got: media.location.len(),
                    }
                    .into());
                }
                let mut body = Vec::with_capacity(36 + media.data.len());
                body.extend_from_slice(&media.media_id.to_be_bytes());
                body.push(media.media_type);
                body.push(media.media_format);
                body.push(media.event);
                body.push(media.channel_id);
                body.extend_from_slice(&media.location);
                body.extend_from_slice(&media.data);
                Ok(body)
            }),
        );

        // 0x8800, multimedia upload response. Reload IDs ride along only
        // when re-sends are requested.
        self.handlers.insert(
            msg_id::MULTIMEDIA_UPLOAD_RESPONSE,
            Arc::new(|para| {
                let ack = &para.desired.media_ack;
                let mut body = Vec::with_capacity(5 + ack.reload_packet_ids.len() * 2);
                body.extend_from_slice(&ack.media_id.to_be_bytes());
                if !ack.reload_packet_ids.is_empty() {
                    body.push(ack.reload_packet_ids.len() as u8);
                    for id in &ack.reload_packet_ids {
                        body.extend_from_slice(&id.to_be_bytes());
                    }
                }
                Ok(body)
            }),
        );

        // 0x0704, batch location report.
        self.handlers.insert(
            msg_id::BATCH_LOCATION_REPORT,
            Arc::new(|para| {
                let batch = &para.desired.batch_location;
                let mut body = Vec::new();
                body.extend_from_slice(&(batch.items.len() as u16).to_be_bytes());
                body.push(batch.kind);
                for item in &batch.items {
                    body.extend_from_slice(&(item.len() as u16).to_be_bytes());
                    body.extend_from_slice(item);
                }
                Ok(body)
            }),
        );

        // 0x0705, CAN broadcast data.
        self.handlers.insert(
            msg_id::CAN_BROADCAST,
            Arc::new(|para| {
                let can = &para.desired.can_data;
                let mut body = Vec::with_capacity(7 + can.frames.len() * 12);
                body.extend_from_slice(&(can.frames.len() as u16).to_be_bytes());
                body.extend_from_slice(&bcd::encode(&can.receive_time, 5)?);
                for frame in &can.frames {
                    if frame.data.len() != 8 {
                        return Err(CodecError::BadLength {
                            expected: 8,
                            got: frame.data.len(),
                        }
                        .into());
                    }
                    body.extend_from_slice(&frame.id.to_be_bytes());
                    body.extend_from_slice(&frame.data);
                }
                Ok(body)
            }),
        );

        // 0x0205, version information. Vendor extension: u8-length-prefixed
        // fields in declaration order, then the fixed-width tail.
        self.handlers.insert(
            msg_id::VERSION_INFO,
            Arc::new(|para| {
                let info = &para.desired.version_info;
                let mut body = Vec::new();
                put_str8(&mut body, &info.version)?;
                put_str8(&mut body, &info.release_date)?;
                put_bytes8(&mut body, &info.cpu_id)?;
                put_str8(&mut body, &info.model)?;
                put_str8(&mut body, &info.imei)?;
                put_str8(&mut body, &info.imsi)?;
                put_str8(&mut body, &info.iccid)?;
                body.extend_from_slice(&info.car_model.to_be_bytes());
                put_str8(&mut body, &info.vin)?;
                body.extend_from_slice(&info.total_mileage.to_be_bytes());
                body.extend_from_slice(&info.total_fuel.to_be_bytes());
                Ok(body)
            }),
        );

        // 0x0252, driving licence data. Vendor extension, same framing.
        self.handlers.insert(
            msg_id::DRIVING_LICENCE_DATA,
            Arc::new(|para| {
                let licence = &para.desired.licence;
                let card = &licence.card;
                let mut body = Vec::new();
                put_str8(&mut body, &card.name)?;
                put_str8(&mut body, &card.country)?;
                put_str8(&mut body, &card.citizen_id)?;
                put_str8(&mut body, &card.expire_date)?;
                put_str8(&mut body, &card.date_of_birth)?;
                put_str8(&mut body, &card.licence_type)?;
                put_str8(&mut body, &card.gender)?;
                put_str8(&mut body, &card.licence_id)?;
                put_str8(&mut body, &card.issuing_branch)?;
                put_str8(&mut body, &card.track)?;
                body.push(licence.login_status);
                body.push(licence.upload_allowed);
                Ok(body)
            }),
        );
    }
}

impl Default for Packager {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Encode the 28-byte basic location block plus the additional items.
pub fn encode_location_body(basic: &LocationBasic, extensions: &ExtensionMap) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(LocationBasic::WIRE_LEN);
    body.extend_from_slice(&basic.alarm.raw().to_be_bytes());
    body.extend_from_slice(&basic.status.raw().to_be_bytes());
    body.extend_from_slice(&basic.latitude.to_be_bytes());
    body.extend_from_slice(&basic.longitude.to_be_bytes());
    body.extend_from_slice(&basic.altitude.to_be_bytes());
    body.extend_from_slice(&basic.speed.to_be_bytes());
    body.extend_from_slice(&basic.bearing.to_be_bytes());
    body.extend_from_slice(&bcd::encode(&basic.time, 6)?);
    for (id, value) in extensions.iter() {
        body.push(id);
        body.push(value.len() as u8);
        body.extend_from_slice(value);
    }
    Ok(body)
}

/// Build the complete escaped frame for the staged `desired` message.
///
/// Body encoding, head encoding, checksum and escaping in one pass; the
/// caller owns flow-number assignment.
pub fn package_frame(packager: &Packager, para: &ProtocolParameter) -> Result<Vec<u8>> {
    let head = &para.desired.head;
    let body = packager.encode_body(head.msg_id, para)?;
    let head_bytes = head.encode(body.len())?;

    let mut raw = Vec::with_capacity(head_bytes.len() + body.len() + 3);
    raw.push(FRAME_SIGN);
    raw.extend_from_slice(&head_bytes);
    raw.extend_from_slice(&body);
    let checksum = xor_checksum(&raw[1..]);
    raw.push(checksum);
    raw.push(FRAME_SIGN);
    escape(&raw)
}

fn put_padded(buf: &mut Vec<u8>, value: &[u8], width: usize) {
    let take = value.len().min(width);
    buf.extend_from_slice(&value[..take]);
    buf.resize(buf.len() + width - take, 0);
}

fn put_str8(buf: &mut Vec<u8>, value: &str) -> Result<()> {
    put_bytes8(buf, value.as_bytes())
}

fn put_bytes8(buf: &mut Vec<u8>, value: &[u8]) -> Result<()> {
    if value.len() > u8::MAX as usize {
        return Err(CodecError::BodyTooLarge {
            size: value.len(),
            max: u8::MAX as usize,
        }
        .into());
    }
    buf.push(value.len() as u8);
    buf.extend_from_slice(value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FlowNumber, PhoneNumber};

    fn para_with_phone() -> ProtocolParameter {
        let mut para = ProtocolParameter::new();
        para.desired.head.phone = PhoneNumber::new("13523339527").unwrap();
        para.desired.head.flow_num = FlowNumber(1);
        para
    }

    #[test]
    fn append_respects_existing() {
        let mut packager = Packager::with_defaults();
        let noop: EncodeFn = Arc::new(|_| Ok(vec![0xFF]));
        assert!(!packager.append(msg_id::TERMINAL_HEARTBEAT, noop.clone()));
        assert!(packager.append(0x0F00, noop));
        assert!(packager.contains(0x0F00));
    }

    #[test]
    fn override_always_wins() {
        let mut packager = Packager::with_defaults();
        let custom: EncodeFn = Arc::new(|_| Ok(vec![0xAB]));
        assert!(packager.override_handler(msg_id::TERMINAL_HEARTBEAT, custom));
        let body = packager
            .encode_body(msg_id::TERMINAL_HEARTBEAT, &ProtocolParameter::new())
            .unwrap();
        assert_eq!(body, vec![0xAB]);
    }

    #[test]
    fn clear_then_defaults_restores() {
        let mut packager = Packager::with_defaults();
        let count = packager.len();
        packager.clear();
        assert!(packager.is_empty());
        packager.install_defaults();
        assert_eq!(packager.len(), count);
    }

    #[test]
    fn unknown_id_is_recoverable() {
        let packager = Packager::with_defaults();
        let err = packager
            .encode_body(0x0F00, &ProtocolParameter::new())
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Protocol(ProtocolError::NoHandler(0x0F00))
        ));
    }

    #[test]
    fn register_body_layout() {
        let mut para = para_with_phone();
        para.desired.register_info = crate::types::RegisterInfo {
            province_id: 12,
            city_id: 34,
            manufacturer_id: b"MFG01".to_vec(),
            terminal_model: b"MODELABC".to_vec(),
            terminal_id: b"T001".to_vec(),
            plate_color: PlateColor::Yellow,
            plate_number: "\u{9c81}A12345".to_string(),
        };
        let body = packager_body(&para, msg_id::TERMINAL_REGISTER);
        assert_eq!(&body[0..2], &[0, 12]);
        assert_eq!(&body[2..4], &[0, 34]);
        assert_eq!(&body[4..9], b"MFG01");
        assert_eq!(&body[9..17], b"MODELABC");
        assert_eq!(&body[17..29], &[0u8; 12]); // model padding
        assert_eq!(&body[29..33], b"T001");
        assert_eq!(&body[33..36], &[0u8; 3]); // terminal id padding
        assert_eq!(body[36], PlateColor::Yellow as u8);
        assert_eq!(&body[37..], "\u{9c81}A12345".as_bytes());
    }

    #[test]
    fn register_body_omits_vin_plate() {
        let mut para = para_with_phone();
        para.desired.register_info.plate_color = PlateColor::Unregistered;
        para.desired.register_info.plate_number = "IGNORED".into();
        let body = packager_body(&para, msg_id::TERMINAL_REGISTER);
        assert_eq!(body.len(), 37);
    }

    #[test]
    fn register_response_carries_code_only_on_success() {
        let mut para = para_with_phone();
        para.desired.ack.flow_num = 1;
        para.desired.ack.result = 0;
        para.desired.auth_code = b"7788".to_vec();
        let body = packager_body(&para, msg_id::REGISTER_RESPONSE);
        assert_eq!(body, vec![0, 1, 0, b'7', b'7', b'8', b'8']);

        para.desired.ack.result = 4;
        let body = packager_body(&para, msg_id::REGISTER_RESPONSE);
        assert_eq!(body, vec![0, 1, 4]);
    }

    #[test]
    fn package_frame_is_escaped_and_checksummed() {
        let mut para = para_with_phone();
        para.desired.head.msg_id = msg_id::TERMINAL_HEARTBEAT;
        let packager = Packager::with_defaults();
        let frame = package_frame(&packager, &para).unwrap();
        assert_eq!(frame[0], 0x7E);
        assert_eq!(*frame.last().unwrap(), 0x7E);
        // Heartbeat: 12-byte head, empty body.
        let unescaped = crate::protocol::unescape(&frame).unwrap();
        assert_eq!(unescaped.len(), 15);
        let checksum = xor_checksum(&unescaped[1..unescaped.len() - 2]);
        assert_eq!(checksum, unescaped[unescaped.len() - 2]);
    }

    fn packager_body(para: &ProtocolParameter, id: u16) -> Vec<u8> {
        Packager::with_defaults().encode_body(id, para).unwrap()
    }
}
