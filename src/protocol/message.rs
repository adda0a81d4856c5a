//! Message IDs and the per-session protocol parameter aggregate.

use crate::area::PolygonArea;
use crate::location::{ExtensionMap, LocationBasic, TrackingControl};
use crate::media::{MultimediaUpload, MultimediaUploadAck};
use crate::params::TerminalParameters;
use crate::types::RegisterInfo;
use crate::upgrade::{FillPacket, UpgradeInfo};

use super::head::MsgHead;

/// Supported message IDs. The set is closed: any other ID arriving
/// triggers `NoHandler`.
pub mod msg_id {
    // Terminal -> platform.
    pub const TERMINAL_GENERAL_RESPONSE: u16 = 0x0001;
    pub const TERMINAL_HEARTBEAT: u16 = 0x0002;
    pub const TERMINAL_LOGOUT: u16 = 0x0003;
    pub const TERMINAL_REGISTER: u16 = 0x0100;
    pub const TERMINAL_AUTH: u16 = 0x0102;
    pub const QUERY_PARAMETERS_RESPONSE: u16 = 0x0104;
    pub const UPGRADE_RESULT: u16 = 0x0108;
    pub const LOCATION_REPORT: u16 = 0x0200;
    pub const QUERY_LOCATION_RESPONSE: u16 = 0x0201;
    pub const VERSION_INFO: u16 = 0x0205;
    pub const DRIVING_LICENCE_DATA: u16 = 0x0252;
    pub const BATCH_LOCATION_REPORT: u16 = 0x0704;
    pub const CAN_BROADCAST: u16 = 0x0705;
    pub const MULTIMEDIA_UPLOAD: u16 = 0x0801;

    // Platform -> terminal.
    pub const PLATFORM_GENERAL_RESPONSE: u16 = 0x8001;
    pub const FILL_PACKET_REQUEST: u16 = 0x8003;
    pub const REGISTER_RESPONSE: u16 = 0x8100;
    pub const SET_PARAMETERS: u16 = 0x8103;
    pub const QUERY_PARAMETERS: u16 = 0x8104;
    pub const QUERY_SPECIFIC_PARAMETERS: u16 = 0x8106;
    pub const UPGRADE_PACKAGE: u16 = 0x8108;
    pub const QUERY_LOCATION: u16 = 0x8201;
    pub const TRACKING_CONTROL: u16 = 0x8202;
    pub const SET_POLYGON_AREA: u16 = 0x8604;
    pub const DELETE_POLYGON_AREA: u16 = 0x8605;
    pub const MULTIMEDIA_UPLOAD_RESPONSE: u16 = 0x8800;
}

/// Message IDs that are themselves responses and must not be acknowledged
/// with a general response.
pub const RESPONSE_COMMANDS: &[u16] = &[
    msg_id::TERMINAL_GENERAL_RESPONSE,
    msg_id::PLATFORM_GENERAL_RESPONSE,
    msg_id::REGISTER_RESPONSE,
    msg_id::QUERY_PARAMETERS_RESPONSE,
    msg_id::QUERY_LOCATION_RESPONSE,
];

/// Check whether `id` is a response command.
pub fn is_response_command(id: u16) -> bool {
    RESPONSE_COMMANDS.contains(&id)
}

/// The (flow, msg_id, result) triple carried by acknowledgments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Acknowledge {
    /// Flow number of the message being acknowledged.
    pub flow_num: u16,
    /// ID of the message being acknowledged.
    pub msg_id: u16,
    /// Result code.
    pub result: u8,
}

/// Device version information (0x0205 body, vendor extension).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: String,
    pub release_date: String,
    pub cpu_id: Vec<u8>,
    pub model: String,
    pub imei: String,
    pub imsi: String,
    pub iccid: String,
    pub car_model: u16,
    pub vin: String,
    pub total_mileage: u32,
    pub total_fuel: u32,
}

/// Driver card details carried by the driving-licence message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardInfo {
    pub name: String,
    pub country: String,
    pub citizen_id: String,
    /// Expiration date, `yymm`.
    pub expire_date: String,
    /// Date of birth, `yyyymmdd`.
    pub date_of_birth: String,
    pub licence_type: String,
    pub gender: String,
    pub licence_id: String,
    pub issuing_branch: String,
    /// Raw track 1-3 data.
    pub track: String,
}

/// Driving licence data (0x0252 body, vendor extension).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrivingLicence {
    pub card: CardInfo,
    /// 0 logged out, 1 logged in.
    pub login_status: u8,
    /// 0 upload not allowed, 1 allowed.
    pub upload_allowed: u8,
}

/// One CAN frame of a CAN broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u32,
    /// Fixed 8 data bytes on the wire.
    pub data: Vec<u8>,
}

/// CAN broadcast data (0x0705 body).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanBroadcast {
    /// Receive time `hhmmssmsms` (5 bytes BCD on the wire).
    pub receive_time: String,
    pub frames: Vec<CanFrame>,
}

/// Batch location report (0x0704 body).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchLocation {
    /// 0 normal batch, 1 blind-zone supplement.
    pub kind: u8,
    /// Raw location report bodies, one per fix.
    pub items: Vec<Vec<u8>>,
}

/// One directional side of the protocol parameter: everything a message
/// body can carry, in both directions.
#[derive(Debug, Clone, Default)]
pub struct MessageContent {
    /// Message head.
    pub head: MsgHead,
    /// Acknowledgment triple for general/register responses.
    pub ack: Acknowledge,
    /// Terminal registration information.
    pub register_info: RegisterInfo,
    /// Authentication code issued by the platform.
    pub auth_code: Vec<u8>,
    /// Terminal parameter map.
    pub parameters: TerminalParameters,
    /// Parameter IDs being queried (0x8106), in query order.
    pub query_param_ids: Vec<u32>,
    /// Basic location block.
    pub location: LocationBasic,
    /// Location additional items.
    pub extensions: ExtensionMap,
    /// Temporary tracking control.
    pub tracking: TrackingControl,
    /// Polygon area being set.
    pub polygon_area: PolygonArea,
    /// Polygon area IDs being deleted.
    pub delete_area_ids: Vec<u32>,
    /// Upgrade package description.
    pub upgrade: UpgradeInfo,
    /// Fill-packet request.
    pub fill_packet: FillPacket,
    /// Multimedia upload.
    pub media: MultimediaUpload,
    /// Multimedia upload acknowledgment.
    pub media_ack: MultimediaUploadAck,
    /// Device version information.
    pub version_info: VersionInfo,
    /// Driving licence data.
    pub licence: DrivingLicence,
    /// CAN broadcast data.
    pub can_data: CanBroadcast,
    /// Batch location report.
    pub batch_location: BatchLocation,
    /// Reserved bytes.
    pub retain: Vec<u8>,
}

/// Per-session protocol state: the outbound `desired` side mutated by
/// application code, and the inbound `parse` side overwritten by each
/// received frame.
///
/// Ownership is exclusive per session; encoders read `desired`, decoders
/// write `parse`.
#[derive(Debug, Clone, Default)]
pub struct ProtocolParameter {
    /// Outbound fields.
    pub desired: MessageContent,
    /// Fields of the last parsed inbound frame.
    pub parse: MessageContent,
}

impl ProtocolParameter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an acknowledgment of the last parsed message with `result`.
    pub fn stage_ack(&mut self, result: u8) {
        self.desired.ack = Acknowledge {
            flow_num: self.parse.head.flow_num.value(),
            msg_id: self.parse.head.msg_id,
            result,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_command_set() {
        assert!(is_response_command(msg_id::TERMINAL_GENERAL_RESPONSE));
        assert!(is_response_command(msg_id::QUERY_LOCATION_RESPONSE));
        assert!(!is_response_command(msg_id::LOCATION_REPORT));
        assert!(!is_response_command(msg_id::TERMINAL_HEARTBEAT));
    }

    #[test]
    fn stage_ack_copies_parse_head() {
        let mut para = ProtocolParameter::new();
        para.parse.head.msg_id = msg_id::TERMINAL_AUTH;
        para.parse.head.flow_num = crate::types::FlowNumber(9);
        para.stage_ack(0);
        assert_eq!(para.desired.ack.msg_id, msg_id::TERMINAL_AUTH);
        assert_eq!(para.desired.ack.flow_num, 9);
        assert_eq!(para.desired.ack.result, 0);
    }
}
