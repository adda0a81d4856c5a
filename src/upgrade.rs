//! Firmware upgrade data model (0x8108 / 0x0108).

/// Upgrade package description and, during a transfer, the current
/// fragment's data slice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeInfo {
    /// Upgrade target (terminal, IC card reader, GNSS module).
    pub target: u8,
    /// Result reported back by the terminal (0x0108).
    pub result: u8,
    /// Manufacturer ID, 5 bytes on the wire.
    pub manufacturer_id: Vec<u8>,
    /// Version string of the package.
    pub version: String,
    /// Total length of the complete upgrade package in bytes.
    pub total_len: u32,
    /// Package data; for a fragmented transfer this holds the current
    /// fragment only.
    pub data: Vec<u8>,
}

/// Fill-packet request (0x8003 body): the flow number of the transfer's
/// first packet plus the sequence numbers to re-send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FillPacket {
    pub first_packet_flow: u16,
    pub packet_ids: Vec<u16>,
}
