//! Location report data model: alarm/status bit words, the 28-byte basic
//! position block and the TLV additional-item map.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{CodecError, Result};

/// Alarm word of the location report: 32 bits, one flag per named alarm.
///
/// Implemented as explicit shift/mask over the raw word; the word is
/// always encoded big-endian.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlarmBits(u32);

impl AlarmBits {
    pub const SOS: u32 = 1 << 0;
    pub const OVERSPEED: u32 = 1 << 1;
    pub const FATIGUE: u32 = 1 << 2;
    pub const EARLY_WARNING: u32 = 1 << 3;
    pub const GNSS_FAULT: u32 = 1 << 4;
    pub const GNSS_ANTENNA_CUT: u32 = 1 << 5;
    pub const GNSS_ANTENNA_SHORT: u32 = 1 << 6;
    pub const POWER_LOW: u32 = 1 << 7;
    pub const POWER_CUT: u32 = 1 << 8;
    pub const LCD_FAULT: u32 = 1 << 9;
    pub const TTS_FAULT: u32 = 1 << 10;
    pub const CAMERA_FAULT: u32 = 1 << 11;
    pub const OBD_FAULT: u32 = 1 << 12;
    pub const DAY_DRIVE_OVERTIME: u32 = 1 << 18;
    pub const STOP_OVERTIME: u32 = 1 << 19;
    pub const IN_OUT_AREA: u32 = 1 << 20;
    pub const IN_OUT_ROUTE: u32 = 1 << 21;
    pub const ROUTE_DRIVE_TIME: u32 = 1 << 22;
    pub const ROUTE_DEVIATE: u32 = 1 << 23;
    pub const VSS_FAULT: u32 = 1 << 24;
    pub const OIL_FAULT: u32 = 1 << 25;
    pub const VEHICLE_THEFT: u32 = 1 << 26;
    pub const ILLEGAL_IGNITION: u32 = 1 << 27;
    pub const ILLEGAL_MOVE: u32 = 1 << 28;
    pub const COLLISION: u32 = 1 << 29;

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn has(self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    pub fn set(&mut self, flag: u32) {
        self.0 |= flag;
    }

    pub fn clear(&mut self, flag: u32) {
        self.0 &= !flag;
    }

    pub const fn sos(self) -> bool {
        self.has(Self::SOS)
    }

    pub const fn overspeed(self) -> bool {
        self.has(Self::OVERSPEED)
    }

    pub const fn in_out_area(self) -> bool {
        self.has(Self::IN_OUT_AREA)
    }

    pub fn set_in_out_area(&mut self, on: bool) {
        if on {
            self.set(Self::IN_OUT_AREA);
        } else {
            self.clear(Self::IN_OUT_AREA);
        }
    }
}

/// Status word of the location report. Hemispheres live here, not in the
/// sign of the coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusBits(u32);

impl StatusBits {
    pub const ACC_ON: u32 = 1 << 0;
    pub const POSITIONED: u32 = 1 << 1;
    /// 0 north, 1 south.
    pub const SOUTH_LATITUDE: u32 = 1 << 2;
    /// 0 east, 1 west.
    pub const WEST_LONGITUDE: u32 = 1 << 3;
    pub const OUT_OF_SERVICE: u32 = 1 << 4;
    pub const COORDS_ENCRYPTED: u32 = 1 << 5;
    pub const OIL_CUT: u32 = 1 << 10;
    pub const CIRCUIT_CUT: u32 = 1 << 11;
    pub const DOOR_LOCKED: u32 = 1 << 12;
    pub const DOOR1_OPEN: u32 = 1 << 13;
    pub const DOOR2_OPEN: u32 = 1 << 14;
    pub const DOOR3_OPEN: u32 = 1 << 15;
    pub const DOOR4_OPEN: u32 = 1 << 16;
    pub const DOOR5_OPEN: u32 = 1 << 17;
    pub const GPS_IN_USE: u32 = 1 << 18;
    pub const BEIDOU_IN_USE: u32 = 1 << 19;
    pub const GLONASS_IN_USE: u32 = 1 << 20;
    pub const GALILEO_IN_USE: u32 = 1 << 21;

    const TRIP_SHIFT: u32 = 8;
    const TRIP_MASK: u32 = 0b11;

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn has(self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    pub fn set(&mut self, flag: u32) {
        self.0 |= flag;
    }

    pub fn clear(&mut self, flag: u32) {
        self.0 &= !flag;
    }

    pub const fn acc_on(self) -> bool {
        self.has(Self::ACC_ON)
    }

    pub const fn positioned(self) -> bool {
        self.has(Self::POSITIONED)
    }

    pub const fn south_latitude(self) -> bool {
        self.has(Self::SOUTH_LATITUDE)
    }

    pub const fn west_longitude(self) -> bool {
        self.has(Self::WEST_LONGITUDE)
    }

    /// Trip load state: 0 empty, 1 half, 3 full.
    pub const fn trip_status(self) -> u8 {
        ((self.0 >> Self::TRIP_SHIFT) & Self::TRIP_MASK) as u8
    }

    pub fn set_trip_status(&mut self, v: u8) {
        self.0 = (self.0 & !(Self::TRIP_MASK << Self::TRIP_SHIFT))
            | (((v as u32) & Self::TRIP_MASK) << Self::TRIP_SHIFT);
    }
}

/// Extended vehicle signal word (additional item 0x25).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VehicleSignalBits(u32);

impl VehicleSignalBits {
    pub const LOW_BEAM: u32 = 1 << 0;
    pub const HIGH_BEAM: u32 = 1 << 1;
    pub const RIGHT_TURN: u32 = 1 << 2;
    pub const LEFT_TURN: u32 = 1 << 3;
    pub const BRAKING: u32 = 1 << 4;
    pub const REVERSING: u32 = 1 << 5;
    pub const FOG_LAMP: u32 = 1 << 6;
    pub const OUTLINE_LAMP: u32 = 1 << 7;
    pub const HORN: u32 = 1 << 8;
    pub const AIR_CONDITIONER: u32 = 1 << 9;
    pub const NEUTRAL: u32 = 1 << 10;
    pub const RETARDER: u32 = 1 << 11;
    pub const ABS_WORKING: u32 = 1 << 12;
    pub const HEATER: u32 = 1 << 13;
    pub const CLUTCH: u32 = 1 << 14;

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn has(self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    pub fn set(&mut self, flag: u32) {
        self.0 |= flag;
    }
}

/// IO status word (additional item 0x2A).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStatusBits(u16);

impl IoStatusBits {
    pub const DEEP_SLEEP: u16 = 1 << 0;
    pub const SLEEP: u16 = 1 << 1;

    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn deep_sleep(self) -> bool {
        self.0 & Self::DEEP_SLEEP != 0
    }

    pub const fn sleep(self) -> bool {
        self.0 & Self::SLEEP != 0
    }
}

/// Additional-item IDs of the location report.
pub mod extension_id {
    /// Mileage, 1/10 km, DWORD.
    pub const MILEAGE: u8 = 0x01;
    /// Fuel, 1/10 L, WORD.
    pub const FUEL: u8 = 0x02;
    /// Tachograph speed, 1/10 km/h, WORD.
    pub const TACHOGRAPH_SPEED: u8 = 0x03;
    /// Alarm event ID requiring manual confirmation, WORD.
    pub const ALARM_EVENT_ID: u8 = 0x04;
    /// Overspeed alarm detail, BYTE or BYTE+DWORD.
    pub const OVERSPEED_ALARM: u8 = 0x11;
    /// In/out area or route alarm detail, BYTE+DWORD+BYTE.
    pub const AREA_ROUTE_ALARM: u8 = 0x12;
    /// Driving-time alarm detail, DWORD+WORD+BYTE.
    pub const DRIVING_TIME_ALARM: u8 = 0x13;
    /// Extended vehicle signal word, DWORD.
    pub const VEHICLE_SIGNAL: u8 = 0x25;
    /// IO status word, WORD.
    pub const IO_STATUS: u8 = 0x2A;
    /// Analog quantities, DWORD.
    pub const ANALOG: u8 = 0x2B;
    /// Wireless signal strength, BYTE.
    pub const NETWORK_SIGNAL: u8 = 0x30;
    /// GNSS satellites in view, BYTE.
    pub const GNSS_SATELLITES: u8 = 0x31;
}

/// Location type codes of the area/route alarm detail item.
pub mod area_alarm_location {
    pub const CIRCLE: u8 = 0;
    pub const RECTANGLE: u8 = 1;
    pub const POLYGON: u8 = 2;
    pub const ROUTE: u8 = 3;
}

/// Direction codes of the area/route alarm detail item.
pub mod area_alarm_direction {
    pub const ENTER: u8 = 0;
    pub const LEAVE: u8 = 1;
}

/// Insertion-ordered map of additional items (id -> value bytes).
///
/// Unknown IDs are preserved verbatim and re-emitted in insertion order;
/// inserting an existing ID replaces the value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionMap {
    items: Vec<(u8, Vec<u8>)>,
}

impl ExtensionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: u8, value: Vec<u8>) {
        if let Some(slot) = self.items.iter_mut().find(|(k, _)| *k == id) {
            slot.1 = value;
        } else {
            self.items.push((id, value));
        }
    }

    pub fn get(&self, id: u8) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|(k, _)| *k == id)
            .map(|(_, v)| v.as_slice())
    }

    pub fn remove(&mut self, id: u8) -> Option<Vec<u8>> {
        let pos = self.items.iter().position(|(k, _)| *k == id)?;
        Some(self.items.remove(pos).1)
    }

    pub fn contains(&self, id: u8) -> bool {
        self.items.iter().any(|(k, _)| *k == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &[u8])> {
        self.items.iter().map(|(k, v)| (*k, v.as_slice()))
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
}

/// The 28-byte basic location block.
///
/// Latitude and longitude are unsigned degrees x 10^6; hemispheres are
/// carried in the status bits. Speed is 1/10 km/h. Time is a
/// `YYMMDDhhmmss` string in GMT+8.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationBasic {
    pub alarm: AlarmBits,
    pub status: StatusBits,
    pub latitude: u32,
    pub longitude: u32,
    /// Altitude in meters.
    pub altitude: u16,
    /// Speed in 1/10 km/h.
    pub speed: u16,
    /// Bearing 0-359, true north 0, clockwise.
    pub bearing: u16,
    pub time: String,
}

impl LocationBasic {
    /// Wire size of the basic block.
    pub const WIRE_LEN: usize = 28;

    /// Populate from application units: degrees, meters, km/h.
    pub fn from_units(
        latitude: f64,
        longitude: f64,
        altitude: f32,
        speed_kmh: f32,
        bearing: f32,
        time: impl Into<String>,
    ) -> Self {
        Self {
            alarm: AlarmBits::default(),
            status: StatusBits::default(),
            latitude: (latitude * 1e6) as u32,
            longitude: (longitude * 1e6) as u32,
            altitude: altitude as u16,
            speed: (speed_kmh * 10.0) as u16,
            bearing: bearing as u16,
            time: time.into(),
        }
    }

    pub fn latitude_degrees(&self) -> f64 {
        f64::from(self.latitude) * 1e-6
    }

    pub fn longitude_degrees(&self) -> f64 {
        f64::from(self.longitude) * 1e-6
    }

    pub fn speed_kmh(&self) -> f32 {
        f32::from(self.speed) / 10.0
    }
}

/// Temporary location tracking control (0x8202 body).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackingControl {
    /// Report interval in seconds; 0 stops tracking.
    pub interval: u16,
    /// Validity window in seconds.
    pub duration: u32,
}

/// Build the overspeed alarm detail item (0x11): location type, and the
/// area/route ID when the type names one.
pub fn encode_overspeed_alarm(location_type: u8, area_route_id: u32) -> Vec<u8> {
    let mut out = vec![location_type];
    if location_type != 0 {
        let mut id = [0u8; 4];
        BigEndian::write_u32(&mut id, area_route_id);
        out.extend_from_slice(&id);
    }
    out
}

/// Parse the overspeed alarm detail item (0x11).
pub fn decode_overspeed_alarm(body: &[u8]) -> Result<(u8, u32)> {
    match body.len() {
        1 => Ok((body[0], 0)),
        5 => Ok((body[0], BigEndian::read_u32(&body[1..5]))),
        got => Err(CodecError::BadLength { expected: 5, got }.into()),
    }
}

/// Build the in/out area or route alarm detail item (0x12).
pub fn encode_area_route_alarm(location_type: u8, area_route_id: u32, direction: u8) -> Vec<u8> {
    let mut out = vec![location_type];
    let mut id = [0u8; 4];
    BigEndian::write_u32(&mut id, area_route_id);
    out.extend_from_slice(&id);
    out.push(direction);
    out
}

/// Parse the in/out area or route alarm detail item (0x12).
pub fn decode_area_route_alarm(body: &[u8]) -> Result<(u8, u32, u8)> {
    if body.len() != 6 {
        return Err(CodecError::BadLength {
            expected: 6,
            got: body.len(),
        }
        .into());
    }
    Ok((body[0], BigEndian::read_u32(&body[1..5]), body[5]))
}
