//! # JT808
//!
//! Client/server stack for the JT/T 808 vehicle-telematics wire protocol.
//!
//! Terminals register, authenticate, heartbeat, report GNSS location and
//! alarms, upload multimedia, and receive configuration and firmware
//! upgrades; platforms accept connections, validate credentials, and issue
//! parameters, geofences, tracking control and upgrade packages.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Application Layer                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │        Session Engines (TerminalClient / PlatformServer)        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │        Dispatch Tables (Packager / Parser, per message ID)      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   Framing Codec (escape / checksum / head / fragmentation)      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                 Transport (TCP / in-memory pipe)                │
//! └─────────────────────────────────────────────────────────────────┘
//!
//! Outbound: the caller stages fields on the `desired` side of a
//! [`protocol::ProtocolParameter`], the session engine selects a message
//! ID, the packager writes the body, the head codec prepends the head,
//! the framing codec appends the checksum and escapes, the transport
//! sends. Inbound is the mirror image into the `parse` side.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)] // Wire widths are checked at the call sites
#![allow(clippy::len_without_is_empty)]

pub mod area;
pub mod client;
pub mod config;
pub mod error;
pub mod location;
pub mod media;
pub mod packager;
pub mod params;
pub mod parser;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod types;
pub mod upgrade;
pub mod util;

pub use config::Config;
pub use error::{Error, Result};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::area::{AreaAttribute, LocationPoint, PolygonArea, PolygonAreaSet};
    pub use crate::client::{ClientState, TerminalClient};
    pub use crate::config::{ClientConfig, Config, ServerConfig};
    pub use crate::error::{Error, Result};
    pub use crate::location::{AlarmBits, ExtensionMap, LocationBasic, StatusBits, TrackingControl};
    pub use crate::media::{MultimediaUpload, MultimediaUploadAck};
    pub use crate::packager::{package_frame, Packager};
    pub use crate::params::{param_id, TerminalParameters};
    pub use crate::parser::{parse_frame, Parser};
    pub use crate::protocol::{msg_id, BodyAttr, MsgHead, ProtocolParameter};
    pub use crate::server::{PlatformServer, SessionState, TerminalSession};
    pub use crate::transport::{MemoryTransport, TcpTransport, Transport};
    pub use crate::types::{
        FlowNumber, GeneralResult, PhoneNumber, PlateColor, RegisterInfo, RegisterResult,
    };
    pub use crate::upgrade::{FillPacket, UpgradeInfo};
}
