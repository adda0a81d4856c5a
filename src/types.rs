//! Core types used throughout the JT808 stack.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::util::bcd;

/// Terminal phone number: up to 12 decimal digits, carried on the wire as
/// 6 bytes of BCD with leading zeros.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Wire width of the BCD field in bytes.
    pub const BCD_WIDTH: usize = 6;

    /// Create from a digit string. Validates digits and length eagerly so
    /// encoding at send time cannot fail.
    pub fn new(digits: impl Into<String>) -> Result<Self, CodecError> {
        let digits = digits.into();
        if let Some(bad) = digits.chars().find(|c| !c.is_ascii_digit()) {
            return Err(CodecError::BadDigit(bad));
        }
        if digits.len() > Self::BCD_WIDTH * 2 {
            return Err(CodecError::TooManyDigits {
                max: Self::BCD_WIDTH * 2,
                got: digits.len(),
            });
        }
        Ok(Self(digits))
    }

    /// Decode from the 6-byte BCD wire field, stripping leading zeros.
    pub fn from_bcd(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != Self::BCD_WIDTH {
            return Err(CodecError::BadHeader);
        }
        Ok(Self(bcd::decode(bytes)))
    }

    /// Encode to the 6-byte BCD wire field, zero-padded on the left.
    pub fn to_bcd(&self) -> Result<Vec<u8>, CodecError> {
        bcd::encode(&self.0, Self::BCD_WIDTH)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PhoneNumber {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Message flow number: a monotonically increasing 16-bit counter issued per
/// outbound frame within a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowNumber(pub u16);

impl FlowNumber {
    pub fn new(n: u16) -> Self {
        Self(n)
    }

    /// The successor, wrapping at u16::MAX.
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    pub fn value(self) -> u16 {
        self.0
    }
}

impl fmt::Display for FlowNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Vehicle plate color codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PlateColor {
    /// Vehicle not yet registered; the register body carries a VIN instead
    /// of a plate.
    #[default]
    Unregistered = 0,
    Blue = 1,
    Yellow = 2,
    Black = 3,
    White = 4,
    Other = 9,
}

impl PlateColor {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Unregistered),
            1 => Some(Self::Blue),
            2 => Some(Self::Yellow),
            3 => Some(Self::Black),
            4 => Some(Self::White),
            9 => Some(Self::Other),
            _ => None,
        }
    }
}

/// General-response result codes (0x0001 / 0x8001).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GeneralResult {
    #[default]
    Success = 0,
    Failure = 1,
    MessageHasWrong = 2,
    NotSupported = 3,
    /// Alarm handling confirmation; used only by the platform response.
    AlarmAck = 4,
}

impl GeneralResult {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Success),
            1 => Some(Self::Failure),
            2 => Some(Self::MessageHasWrong),
            3 => Some(Self::NotSupported),
            4 => Some(Self::AlarmAck),
            _ => None,
        }
    }
}

/// Register-response result codes (0x8100).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RegisterResult {
    #[default]
    Success = 0,
    VehicleAlreadyRegistered = 1,
    VehicleNotInDatabase = 2,
    TerminalAlreadyRegistered = 3,
    TerminalNotInDatabase = 4,
}

impl RegisterResult {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Success),
            1 => Some(Self::VehicleAlreadyRegistered),
            2 => Some(Self::VehicleNotInDatabase),
            3 => Some(Self::TerminalAlreadyRegistered),
            4 => Some(Self::TerminalNotInDatabase),
            _ => None,
        }
    }
}

/// Upgrade target types (0x8108).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UpgradeTarget {
    #[default]
    Terminal = 0x00,
    /// Road transport certificate IC card reader.
    IcCardReader = 0x0C,
    /// Beidou satellite positioning module.
    Gnss = 0x34,
}

impl UpgradeTarget {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Self::Terminal),
            0x0C => Some(Self::IcCardReader),
            0x34 => Some(Self::Gnss),
            _ => None,
        }
    }
}

/// Upgrade outcome reported by the terminal (0x0108).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UpgradeOutcome {
    #[default]
    Success = 0,
    Failed = 1,
    Cancelled = 2,
}

/// Terminal registration information (0x0100 body).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterInfo {
    /// Province ID per GB/T 2260.
    pub province_id: u16,
    /// City or county ID per GB/T 2260.
    pub city_id: u16,
    /// Manufacturer ID, 5 bytes on the wire.
    pub manufacturer_id: Vec<u8>,
    /// Terminal model, 20 bytes on the wire, NUL-padded.
    pub terminal_model: Vec<u8>,
    /// Terminal ID, 7 bytes on the wire, NUL-padded.
    pub terminal_id: Vec<u8>,
    /// Plate color; `Unregistered` means the plate field carries a VIN.
    pub plate_color: PlateColor,
    /// Plate number (or VIN when unregistered). Only present on the wire
    /// when `plate_color` is not `Unregistered`.
    pub plate_number: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_number_round_trip() {
        let phone = PhoneNumber::new("13523339527").unwrap();
        let wire = phone.to_bcd().unwrap();
        assert_eq!(wire.len(), 6);
        assert_eq!(PhoneNumber::from_bcd(&wire).unwrap(), phone);
    }

    #[test]
    fn phone_number_rejects_garbage() {
        assert!(PhoneNumber::new("+8613523339527").is_err());
        assert!(PhoneNumber::new("1352333952712345").is_err());
    }

    #[test]
    fn flow_number_wraps() {
        assert_eq!(FlowNumber(u16::MAX).next(), FlowNumber(0));
        assert_eq!(FlowNumber(1).next(), FlowNumber(2));
    }

    #[test]
    fn plate_color_codes() {
        assert_eq!(PlateColor::from_u8(2), Some(PlateColor::Yellow));
        assert_eq!(PlateColor::from_u8(9), Some(PlateColor::Other));
        assert_eq!(PlateColor::from_u8(5), None);
    }
}
