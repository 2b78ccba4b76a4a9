//! Native TCP protocol packets.
//!
//! Every packet starts with a uvarint tag. Client packets are encoded by [`Request`],
//! server packets are decoded into [`Response`]. [`ProtocolTransport`] pairs the two over
//! one [`Transport`] stream and carries the negotiated revision, which gates the optional
//! fields of almost every packet.
//!
//! # Block bodies
//!
//! Data, Totals and Extremes packets carry a block. When compression is enabled the block
//! (but not the packet tag or the table name before it) is wrapped in checksummed frames,
//! see [`compression`]. Log and ProfileEvents blocks are never compressed.
pub mod compression;
mod exception;
mod request;
mod response;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use compression::Compression;
pub use exception::ChError;
pub use request::{ClientInfo, Request};
pub use response::{PasswordRule, ProfileInfo, Progress, Response, ServerInfo};
pub use transport::{DeadlineHandle, ProtocolTransport, Transport};

/// Protocol revisions at which optional packet fields were introduced.
pub mod revision {
    /// Revision this client speaks.
    pub const CLIENT_REVISION: u64 = 54462;

    pub const CLIENT_INFO: u64 = 54032;
    pub const SERVER_TIMEZONE: u64 = 54058;
    pub const QUOTA_KEY_IN_CLIENT_INFO: u64 = 54060;
    pub const SERVER_DISPLAY_NAME: u64 = 54372;
    pub const VERSION_PATCH: u64 = 54401;
    pub const CLIENT_WRITE_INFO: u64 = 54420;
    pub const SETTINGS_AS_STRINGS: u64 = 54429;
    pub const INTERSERVER_SECRET: u64 = 54441;
    pub const OPENTELEMETRY: u64 = 54442;
    pub const DISTRIBUTED_DEPTH: u64 = 54448;
    pub const INITIAL_QUERY_START_TIME: u64 = 54449;
    pub const PARALLEL_REPLICAS: u64 = 54453;
    pub const CUSTOM_SERIALIZATION: u64 = 54454;
    pub const ADDENDUM: u64 = 54458;
    pub const PARAMETERS: u64 = 54459;
    pub const SERVER_QUERY_TIME_IN_PROGRESS: u64 = 54460;
    pub const PASSWORD_COMPLEXITY_RULES: u64 = 54461;
    pub const INTERSERVER_SECRET_V2: u64 = 54462;
    pub const TOTAL_BYTES_IN_PROGRESS: u64 = 54463;
}

/// Client version reported in Hello and ClientInfo.
pub const CLIENT_VERSION_MAJOR: u64 = 1;
pub const CLIENT_VERSION_MINOR: u64 = 0;
pub const CLIENT_VERSION_PATCH: u64 = 0;

pub(crate) mod client_packet {
    pub const HELLO: u64 = 0;
    pub const QUERY: u64 = 1;
    pub const DATA: u64 = 2;
    pub const CANCEL: u64 = 3;
    pub const PING: u64 = 4;
}

pub(crate) mod server_packet {
    pub const HELLO: u64 = 0;
    pub const DATA: u64 = 1;
    pub const EXCEPTION: u64 = 2;
    pub const PROGRESS: u64 = 3;
    pub const PONG: u64 = 4;
    pub const END_OF_STREAM: u64 = 5;
    pub const PROFILE_INFO: u64 = 6;
    pub const TOTALS: u64 = 7;
    pub const EXTREMES: u64 = 8;
    pub const LOG: u64 = 10;
    pub const TABLE_COLUMNS: u64 = 11;
    pub const PROFILE_EVENTS: u64 = 14;
}

/// Query processing stage requested from the server.
pub(crate) const STAGE_COMPLETE: u64 = 2;
