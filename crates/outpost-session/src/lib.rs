//! # outpost-session - Bridge Transport for Outpost
//!
//! Owns the persistent WebSocket connection to the bridge and the REST
//! control plane client.
//!
//! ## Public API
//!
//! ### Session (`session`)
//! - [`Session`] - The one persistent connection: connect/reconnect
//!   lifecycle, correlated request/response, push-event fan-out
//! - [`ConnectionState`] - Disconnected / Connecting / Connected /
//!   Reconnecting
//!
//! ### Protocol (`protocol`)
//! - [`RequestKind`] - Typed request registry (wire name, reply names,
//!   per-kind timeout)
//! - [`Frame`], [`parse_wire_message()`] - Wire frame parsing
//! - [`ReplyTracker`] - Name-correlated FIFO reply slots
//!
//! ### Fan-out (`router`)
//! - [`EventRouter`], [`Subscription`] - Per-event-kind subscriber registry
//!
//! ### REST (`rest`)
//! - [`RestClient`] - CRUD / pairing / proxy / notification settings
//!
//! Typed request wrappers (`commands`) hang off [`Session`]:
//! `server_info`, `team_info`, `device_control`, `map_image`, …

pub mod commands;
pub mod protocol;
pub mod rest;
pub mod router;
pub mod session;

pub use commands::{
    DeviceInfo, GameTime, MapInfo, Monument, ServerInfo, TeamChatEntry, TeamInfo, TeamMember,
};
pub use protocol::{
    parse_wire_message, Frame, ReplyTracker, RequestKind, WireMessage, METADATA_TIMEOUT,
    PAYLOAD_TIMEOUT,
};
pub use rest::{
    ApiEnvelope, NewDevice, NewServer, NotificationSettings, PairingCredentials, PairingStatus,
    ProxyNode, ProxyStatusInfo, RestClient,
};
pub use router::{EventRouter, Subscription};
pub use session::{ConnectionState, Session};

#[cfg(any(test, feature = "test-helpers"))]
pub use session::test_support::{BridgeStub, CapturedRequest};
