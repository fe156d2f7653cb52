//! # outpost-app - Application State for Outpost
//!
//! The reconciliation and control layer between the transport
//! (`outpost-session`) and presentation. Everything here is driven by the
//! session's fan-out events and typed requests; nothing talks to the wire
//! directly.
//!
//! ## Public API
//!
//! ### Chat (`chat`)
//! - [`ChatLog`] - History/live merge, echo suppression, fragmentation,
//!   bounded retention, scroll/unread tracking
//!
//! ### Devices (`devices`)
//! - [`DeviceStore`] - Shared local device state
//! - [`DeviceController`] - Optimistic toggle with rollback, authoritative
//!   refresh
//!
//! ### Targets (`state`)
//! - [`ServerStore`] - Target collection, active selection, one-shot
//!   auto-select
//! - [`ActiveTargetCell`] - Shared always-current selection for async
//!   callbacks
//!
//! ### Connection (`monitor`)
//! - [`ConnectionMonitor`] - One resync per transition into Connected
//!
//! ### Notices (`notify`)
//! - [`NoticeFeed`], [`Notice`], [`NoticeLevel`] - Self-expiring UI notices
//!
//! ### Settings (`config`)
//! - [`Settings`] - `.outpost/config.toml`

pub mod chat;
pub mod config;
pub mod devices;
pub mod monitor;
pub mod notify;
pub mod state;

pub use chat::{ChatLog, LoadState, PushOutcome, MAX_FRAGMENT_LEN, RETENTION_BOUND};
pub use config::{default_config_path, Settings};
pub use devices::{DeviceController, DeviceStore};
pub use monitor::ConnectionMonitor;
pub use notify::{Notice, NoticeFeed, NoticeLevel, DEFAULT_NOTICE_TTL};
pub use state::{ActiveTargetCell, ServerStore};
