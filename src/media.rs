//! Multimedia upload data model (0x0801 / 0x8800).

/// Multimedia payload kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum MediaType {
    #[default]
    Image = 0,
    Audio = 1,
    Video = 2,
}

impl MediaType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Image),
            1 => Some(Self::Audio),
            2 => Some(Self::Video),
            _ => None,
        }
    }
}

/// Multimedia container format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum MediaFormat {
    #[default]
    Jpeg = 0,
    Tif = 1,
    Mp3 = 2,
    Wav = 3,
    Wmv = 4,
}

impl MediaFormat {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Jpeg),
            1 => Some(Self::Tif),
            2 => Some(Self::Mp3),
            3 => Some(Self::Wav),
            4 => Some(Self::Wmv),
            _ => None,
        }
    }
}

/// A multimedia upload (0x0801 body).
///
/// `location` carries the 28-byte basic location block captured when the
/// media was produced; it is forwarded verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultimediaUpload {
    pub media_id: u32,
    pub media_type: u8,
    pub media_format: u8,
    /// Event that triggered the capture.
    pub event: u8,
    pub channel_id: u8,
    /// Raw 28-byte location report body.
    pub location: Vec<u8>,
    pub data: Vec<u8>,
}

/// Platform acknowledgment of a multimedia upload (0x8800 body).
///
/// `reload_packet_ids` lists the fragment sequence numbers the platform
/// wants re-sent; empty means the transfer is complete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultimediaUploadAck {
    pub media_id: u32,
    pub reload_packet_ids: Vec<u16>,
}
