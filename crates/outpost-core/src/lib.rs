//! # outpost-core - Core Domain Types
//!
//! Foundation crate for Outpost. Provides domain types, error handling,
//! push-event definitions, epoch-time normalization, and the tracing
//! bootstrap.
//!
//! This crate has **zero internal dependencies** -- it only depends on
//! external crates (serde, chrono, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`RemoteTarget`] - A managed remote game-server session
//! - [`Device`], [`DeviceKind`] - Paired smart devices
//! - [`ChatMessage`] - One entry in a reconciled team-chat log
//!
//! ### Events (`events`)
//! - [`PushEvent`] - Typed unsolicited events from the bridge
//! - [`EventKind`] - Registry key for the fan-out router
//! - [`parse_push_event()`] - Wire name + payload → typed event
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ### Time (`time`)
//! - [`normalize_epoch_ms()`] - Seconds-or-milliseconds epoch normalization
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use outpost_core::prelude::*;
//! ```

pub mod error;
pub mod events;
pub mod logging;
pub mod time;
pub mod types;

/// Prelude for common imports used throughout all Outpost crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

// Re-export commonly used types at crate root for convenience
pub use error::{Error, Result, ResultExt};
pub use events::{
    EntityChanged, EventKind, parse_push_event, PlayerEvent, PlayerEventKind, ProxyNodeChanged,
    ProxyStatus, PushEvent, ServerConnected, ServerDisconnected, ServerPaired, TeamMessage,
};
pub use time::normalize_epoch_ms;
pub use types::{ChatMessage, Device, DeviceKind, RemoteTarget};
