//! Terminal parameter store: typed id -> value map with the wire list
//! codec and the declared-width table of the standard parameter IDs.

use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder};

use crate::error::{CodecError, Result};

/// Standard JT/T 808 terminal parameter IDs (2013 table subset) plus the
/// custom Ntrip CORS range.
pub mod param_id {
    /// Heartbeat interval in seconds, DWORD.
    pub const HEARTBEAT_INTERVAL: u32 = 0x0001;
    /// TCP response timeout in seconds, DWORD.
    pub const TCP_TIMEOUT: u32 = 0x0002;
    /// TCP retransmission count, DWORD.
    pub const TCP_RETRIES: u32 = 0x0003;
    /// UDP response timeout in seconds, DWORD.
    pub const UDP_TIMEOUT: u32 = 0x0004;
    /// UDP retransmission count, DWORD.
    pub const UDP_RETRIES: u32 = 0x0005;
    /// Main server APN, STRING.
    pub const MAIN_APN: u32 = 0x0010;
    /// Main server dial-up user, STRING.
    pub const MAIN_DIAL_USER: u32 = 0x0011;
    /// Main server dial-up password, STRING.
    pub const MAIN_DIAL_PASSWORD: u32 = 0x0012;
    /// Main server address, STRING.
    pub const MAIN_SERVER: u32 = 0x0013;
    /// Backup server APN, STRING.
    pub const BACKUP_APN: u32 = 0x0014;
    /// Backup server dial-up user, STRING.
    pub const BACKUP_DIAL_USER: u32 = 0x0015;
    /// Backup server dial-up password, STRING.
    pub const BACKUP_DIAL_PASSWORD: u32 = 0x0016;
    /// Backup server address, STRING.
    pub const BACKUP_SERVER: u32 = 0x0017;
    /// Server TCP port, DWORD.
    pub const TCP_PORT: u32 = 0x0018;
    /// Server UDP port, DWORD.
    pub const UDP_PORT: u32 = 0x0019;
    /// Location reporting strategy, DWORD: 0 timed, 1 by distance, 2 both.
    pub const REPORT_STRATEGY: u32 = 0x0020;
    /// Location reporting scheme, DWORD: 0 by ACC, 1 by login state.
    pub const REPORT_SCHEME: u32 = 0x0021;
    /// Report interval while driver not logged in, seconds, DWORD.
    pub const UNLOGGED_REPORT_INTERVAL: u32 = 0x0022;
    /// Report interval while asleep, seconds, DWORD.
    pub const SLEEP_REPORT_INTERVAL: u32 = 0x0027;
    /// Report interval during an emergency alarm, seconds, DWORD.
    pub const ALARM_REPORT_INTERVAL: u32 = 0x0028;
    /// Default report interval, seconds, DWORD.
    pub const DEFAULT_REPORT_INTERVAL: u32 = 0x0029;
    /// Default distance report interval, meters, DWORD.
    pub const DEFAULT_REPORT_DISTANCE: u32 = 0x002C;
    /// Distance interval while driver not logged in, meters, DWORD.
    pub const UNLOGGED_REPORT_DISTANCE: u32 = 0x002D;
    /// Distance interval while asleep, meters, DWORD.
    pub const SLEEP_REPORT_DISTANCE: u32 = 0x002E;
    /// Distance interval during an emergency alarm, meters, DWORD.
    pub const ALARM_REPORT_DISTANCE: u32 = 0x002F;
    /// Turn angle triggering a supplementary report, degrees, DWORD.
    pub const TURN_ANGLE: u32 = 0x0030;
    /// Geofence radius, meters, WORD.
    pub const FENCE_RADIUS: u32 = 0x0031;
    /// Monitoring platform phone number, STRING.
    pub const PLATFORM_PHONE: u32 = 0x0040;
    /// Platform SMS phone number, STRING.
    pub const PLATFORM_SMS_PHONE: u32 = 0x0048;
    /// Alarm mask word, DWORD.
    pub const ALARM_MASK: u32 = 0x0050;
    /// Maximum speed, km/h, DWORD.
    pub const MAX_SPEED: u32 = 0x0055;
    /// Overspeed duration, seconds, DWORD.
    pub const OVERSPEED_DURATION: u32 = 0x0056;
    /// Continuous driving limit, seconds, DWORD.
    pub const CONTINUOUS_DRIVING_LIMIT: u32 = 0x0057;
    /// Accumulated daily driving limit, seconds, DWORD.
    pub const DAILY_DRIVING_LIMIT: u32 = 0x0058;
    /// Minimum rest time, seconds, DWORD.
    pub const MIN_REST_TIME: u32 = 0x0059;
    /// Maximum parking time, seconds, DWORD.
    pub const MAX_PARKING_TIME: u32 = 0x005A;
    /// Image quality 1-10, DWORD.
    pub const IMAGE_QUALITY: u32 = 0x0070;
    /// Brightness 0-255, DWORD.
    pub const BRIGHTNESS: u32 = 0x0071;
    /// Contrast 0-127, DWORD.
    pub const CONTRAST: u32 = 0x0072;
    /// Saturation 0-127, DWORD.
    pub const SATURATION: u32 = 0x0073;
    /// Chroma 0-255, DWORD.
    pub const CHROMA: u32 = 0x0074;
    /// Odometer reading, 1/10 km, DWORD.
    pub const ODOMETER: u32 = 0x0080;
    /// Province ID of the vehicle, WORD.
    pub const PROVINCE_ID: u32 = 0x0081;
    /// City ID of the vehicle, WORD.
    pub const CITY_ID: u32 = 0x0082;
    /// Plate number, STRING.
    pub const PLATE_NUMBER: u32 = 0x0083;
    /// Plate color, BYTE.
    pub const PLATE_COLOR: u32 = 0x0084;

    // Custom range: Ntrip CORS differential station configuration.

    /// Ntrip CORS server address, STRING.
    pub const NTRIP_CORS_IP: u32 = 0xF020;
    /// Ntrip CORS server port, WORD.
    pub const NTRIP_CORS_PORT: u32 = 0xF021;
    /// Ntrip CORS username, STRING.
    pub const NTRIP_CORS_USER: u32 = 0xF022;
    /// Ntrip CORS password, STRING.
    pub const NTRIP_CORS_PASSWORD: u32 = 0xF023;
    /// Ntrip CORS mount point, STRING.
    pub const NTRIP_CORS_MOUNT_POINT: u32 = 0xF024;
    /// GGA report interval in seconds, BYTE.
    pub const NTRIP_CORS_GGA_INTERVAL: u32 = 0xF025;
    /// Enable the module at startup, BYTE: 0 off, 1 on.
    pub const NTRIP_CORS_STARTUP: u32 = 0xF026;
}

/// Declared width of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamWidth {
    Byte,
    Word,
    Dword,
    Str,
}

/// Declared width of a standard (or known custom) parameter ID.
pub fn declared_width(id: u32) -> Option<ParamWidth> {
    use param_id::*;
    Some(match id {
        HEARTBEAT_INTERVAL | TCP_TIMEOUT | TCP_RETRIES | UDP_TIMEOUT | UDP_RETRIES | TCP_PORT
        | UDP_PORT | REPORT_STRATEGY | REPORT_SCHEME | UNLOGGED_REPORT_INTERVAL
        | SLEEP_REPORT_INTERVAL | ALARM_REPORT_INTERVAL | DEFAULT_REPORT_INTERVAL
        | DEFAULT_REPORT_DISTANCE | UNLOGGED_REPORT_DISTANCE | SLEEP_REPORT_DISTANCE
        | ALARM_REPORT_DISTANCE | TURN_ANGLE | ALARM_MASK | MAX_SPEED | OVERSPEED_DURATION
        | CONTINUOUS_DRIVING_LIMIT | DAILY_DRIVING_LIMIT | MIN_REST_TIME | MAX_PARKING_TIME
        | IMAGE_QUALITY | BRIGHTNESS | CONTRAST | SATURATION | CHROMA | ODOMETER => {
            ParamWidth::Dword
        }
        FENCE_RADIUS | PROVINCE_ID | CITY_ID | NTRIP_CORS_PORT => ParamWidth::Word,
        PLATE_COLOR | NTRIP_CORS_GGA_INTERVAL | NTRIP_CORS_STARTUP => ParamWidth::Byte,
        MAIN_APN | MAIN_DIAL_USER | MAIN_DIAL_PASSWORD | MAIN_SERVER | BACKUP_APN
        | BACKUP_DIAL_USER | BACKUP_DIAL_PASSWORD | BACKUP_SERVER | PLATFORM_PHONE
        | PLATFORM_SMS_PHONE | PLATE_NUMBER | NTRIP_CORS_IP | NTRIP_CORS_USER
        | NTRIP_CORS_PASSWORD | NTRIP_CORS_MOUNT_POINT => ParamWidth::Str,
        _ => return None,
    })
}

/// A typed value that can live in the parameter map.
pub trait ParamValue: Sized {
    fn encode(&self) -> Vec<u8>;
    fn decode(bytes: &[u8]) -> Result<Self>;
}

impl ParamValue for u8 {
    fn encode(&self) -> Vec<u8> {
        vec![*self]
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 1 {
            return Err(CodecError::BadLength {
                expected: 1,
                got: bytes.len(),
            }
            .into());
        }
        Ok(bytes[0])
    }
}

impl ParamValue for u16 {
    fn encode(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 2 {
            return Err(CodecError::BadLength {
                expected: 2,
                got: bytes.len(),
            }
            .into());
        }
        Ok(BigEndian::read_u16(bytes))
    }
}

impl ParamValue for u32 {
    fn encode(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 4 {
            return Err(CodecError::BadLength {
                expected: 4,
                got: bytes.len(),
            }
            .into());
        }
        Ok(BigEndian::read_u32(bytes))
    }
}

impl ParamValue for String {
    fn encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// The terminal parameter map: id -> raw value bytes.
///
/// Duplicate IDs on decode overwrite; iteration is in ID order. Ordering
/// requirements of a specific-query reply are carried by the queried ID
/// list, not by this map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminalParameters {
    items: BTreeMap<u32, Vec<u8>>,
}

impl TerminalParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a typed parameter value.
    pub fn set<T: ParamValue>(&mut self, id: u32, value: T) {
        self.items.insert(id, value.encode());
    }

    /// Get a typed parameter value. Fails when the stored width does not
    /// match the requested type.
    pub fn get<T: ParamValue>(&self, id: u32) -> Option<Result<T>> {
        self.items.get(&id).map(|raw| T::decode(raw))
    }

    pub fn set_raw(&mut self, id: u32, value: Vec<u8>) {
        self.items.insert(id, value);
    }

    pub fn get_raw(&self, id: u32) -> Option<&[u8]> {
        self.items.get(&id).map(Vec::as_slice)
    }

    pub fn remove(&mut self, id: u32) -> Option<Vec<u8>> {
        self.items.remove(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.items.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.items.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    /// Merge another map into this one, overwriting on conflict.
    pub fn merge(&mut self, other: &TerminalParameters) {
        for (id, value) in &other.items {
            self.items.insert(*id, value.clone());
        }
    }

    /// Heartbeat interval (0x0001) in seconds; `None` when the parameter
    /// is absent, which means "no heartbeat".
    pub fn heartbeat_interval(&self) -> Option<u32> {
        self.get::<u32>(param_id::HEARTBEAT_INTERVAL)
            .and_then(Result::ok)
    }

    pub fn set_heartbeat_interval(&mut self, seconds: u32) {
        self.set(param_id::HEARTBEAT_INTERVAL, seconds);
    }

    /// Encode the wire list form: count u8, then (id u32, len u8, value).
    pub fn encode_list(&self) -> Vec<u8> {
        encode_items(self.items.iter().map(|(k, v)| (*k, v.as_slice())))
    }

    /// Encode only the given IDs, in the given order, skipping absent ones.
    pub fn encode_selected(&self, ids: &[u32]) -> Vec<u8> {
        encode_items(
            ids.iter()
                .filter_map(|id| self.items.get(id).map(|v| (*id, v.as_slice()))),
        )
    }

    /// Decode the wire list form, replacing the current contents.
    pub fn decode_list(body: &[u8]) -> Result<Self> {
        if body.is_empty() {
            return Err(CodecError::BadLength {
                expected: 1,
                got: 0,
            }
            .into());
        }
        let count = body[0] as usize;
        let mut items = BTreeMap::new();
        let mut pos = 1;
        for _ in 0..count {
            if pos + 5 > body.len() {
                return Err(CodecError::BadLength {
                    expected: pos + 5,
                    got: body.len(),
                }
                .into());
            }
            let id = BigEndian::read_u32(&body[pos..pos + 4]);
            let len = body[pos + 4] as usize;
            pos += 5;
            if pos + len > body.len() {
                return Err(CodecError::BadLength {
                    expected: pos + len,
                    got: body.len(),
                }
                .into());
            }
            items.insert(id, body[pos..pos + len].to_vec());
            pos += len;
        }
        Ok(Self { items })
    }
}

fn encode_items<'a>(items: impl Iterator<Item = (u32, &'a [u8])>) -> Vec<u8> {
    let mut body = vec![0u8];
    let mut count: u8 = 0;
    for (id, value) in items {
        body.extend_from_slice(&id.to_be_bytes());
        body.push(value.len() as u8);
        body.extend_from_slice(value);
        count = count.wrapping_add(1);
    }
    body[0] = count;
    body
}

/// Package the Ntrip CORS differential station configuration into the map.
#[allow(clippy::too_many_arguments)]
pub fn set_ntrip_cors(
    params: &mut TerminalParameters,
    ip: &str,
    port: u16,
    user: &str,
    password: &str,
    mount_point: &str,
    gga_interval: u8,
    startup: u8,
) {
    params.set(param_id::NTRIP_CORS_IP, ip.to_string());
    params.set(param_id::NTRIP_CORS_PORT, port);
    params.set(param_id::NTRIP_CORS_USER, user.to_string());
    params.set(param_id::NTRIP_CORS_PASSWORD, password.to_string());
    params.set(param_id::NTRIP_CORS_MOUNT_POINT, mount_point.to_string());
    params.set(param_id::NTRIP_CORS_GGA_INTERVAL, gga_interval);
    params.set(param_id::NTRIP_CORS_STARTUP, startup);
}

/// The parsed Ntrip CORS configuration block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NtripCors {
    pub ip: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub mount_point: String,
    pub gga_interval: u8,
    pub startup: u8,
}

/// Parse the Ntrip CORS configuration from the map. `None` when any field
/// is absent.
pub fn get_ntrip_cors(params: &TerminalParameters) -> Option<NtripCors> {
    Some(NtripCors {
        ip: params.get::<String>(param_id::NTRIP_CORS_IP)?.ok()?,
        port: params.get::<u16>(param_id::NTRIP_CORS_PORT)?.ok()?,
        user: params.get::<String>(param_id::NTRIP_CORS_USER)?.ok()?,
        password: params.get::<String>(param_id::NTRIP_CORS_PASSWORD)?.ok()?,
        mount_point: params
            .get::<String>(param_id::NTRIP_CORS_MOUNT_POINT)?
            .ok()?,
        gga_interval: params.get::<u8>(param_id::NTRIP_CORS_GGA_INTERVAL)?.ok()?,
        startup: params.get::<u8>(param_id::NTRIP_CORS_STARTUP)?.ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_round_trip() {
        let mut params = TerminalParameters::new();
        params.set(param_id::HEARTBEAT_INTERVAL, 30u32);
        params.set(param_id::FENCE_RADIUS, 250u16);
        params.set(param_id::PLATE_COLOR, 2u8);
        params.set(param_id::MAIN_SERVER, "platform.example.com".to_string());

        assert_eq!(params.get::<u32>(param_id::HEARTBEAT_INTERVAL).unwrap().unwrap(), 30);
        assert_eq!(params.get::<u16>(param_id::FENCE_RADIUS).unwrap().unwrap(), 250);
        assert_eq!(params.get::<u8>(param_id::PLATE_COLOR).unwrap().unwrap(), 2);
        assert_eq!(
            params.get::<String>(param_id::MAIN_SERVER).unwrap().unwrap(),
            "platform.example.com"
        );
    }

    #[test]
    fn typed_get_checks_width() {
        let mut params = TerminalParameters::new();
        params.set(param_id::FENCE_RADIUS, 250u16);
        assert!(params.get::<u32>(param_id::FENCE_RADIUS).unwrap().is_err());
    }

    #[test]
    fn list_round_trip() {
        let mut params = TerminalParameters::new();
        set_ntrip_cors(
            &mut params,
            "192.168.3.111",
            8002,
            "user01",
            "123456",
            "RTCM23_GPS",
            10,
            1,
        );
        assert_eq!(params.len(), 7);

        let wire = params.encode_list();
        assert_eq!(wire[0], 7);
        let decoded = TerminalParameters::decode_list(&wire).unwrap();
        assert_eq!(decoded, params);

        let cors = get_ntrip_cors(&decoded).unwrap();
        assert_eq!(cors.ip, "192.168.3.111");
        assert_eq!(cors.port, 8002);
        assert_eq!(cors.mount_point, "RTCM23_GPS");
        assert_eq!(cors.startup, 1);
    }

    #[test]
    fn selected_encoding_preserves_query_order() {
        let mut params = TerminalParameters::new();
        params.set(param_id::NTRIP_CORS_IP, "10.0.0.1".to_string());
        params.set(param_id::NTRIP_CORS_PORT, 2101u16);
        params.set(param_id::NTRIP_CORS_USER, "u".to_string());

        // Query order reversed relative to ID order; one absent ID skipped.
        let wire = params.encode_selected(&[param_id::NTRIP_CORS_PORT, 0xF0FF, param_id::NTRIP_CORS_IP]);
        assert_eq!(wire[0], 2);
        let first_id = u32::from_be_bytes([wire[1], wire[2], wire[3], wire[4]]);
        assert_eq!(first_id, param_id::NTRIP_CORS_PORT);
    }

    #[test]
    fn decode_rejects_truncation() {
        let mut params = TerminalParameters::new();
        params.set(param_id::HEARTBEAT_INTERVAL, 30u32);
        let mut wire = params.encode_list();
        wire.truncate(wire.len() - 1);
        assert!(TerminalParameters::decode_list(&wire).is_err());
    }

    #[test]
    fn missing_heartbeat_means_none() {
        let params = TerminalParameters::new();
        assert_eq!(params.heartbeat_interval(), None);
    }

    #[test]
    fn width_table_covers_custom_range() {
        assert_eq!(declared_width(param_id::NTRIP_CORS_PORT), Some(ParamWidth::Word));
        assert_eq!(declared_width(param_id::NTRIP_CORS_IP), Some(ParamWidth::Str));
        assert_eq!(declared_width(param_id::HEARTBEAT_INTERVAL), Some(ParamWidth::Dword));
        assert_eq!(declared_width(0xDEAD), None);
    }
}
