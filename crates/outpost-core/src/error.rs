//! Application error types with rich context

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Transport Errors
    // ─────────────────────────────────────────────────────────────
    /// A request was attempted before the connection was established.
    /// Never queued: callers get this immediately.
    #[error("not connected to the bridge")]
    NotConnected,

    #[error("transport error: {message}")]
    Transport { message: String },

    /// No reply arrived within the request's deadline. Distinct from
    /// [`Error::Remote`] so callers can tell "server said no" from
    /// "server never answered".
    #[error("request '{request}' timed out")]
    Timeout { request: String },

    /// The remote side replied with an explicit error event. The message
    /// is surfaced intact.
    #[error("{message}")]
    Remote { message: String },

    #[error("wire protocol error: {message}")]
    Protocol { message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("channel send error: {message}")]
    ChannelSend { message: String },

    #[error("channel closed unexpectedly")]
    ChannelClosed,

    // ─────────────────────────────────────────────────────────────
    // REST Control Plane Errors
    // ─────────────────────────────────────────────────────────────
    #[error("API error: {message}")]
    Rest { message: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("configuration error: {message}")]
    Config { message: String },

    // ─────────────────────────────────────────────────────────────
    // Domain Errors
    // ─────────────────────────────────────────────────────────────
    #[error("unknown server: {server_id}")]
    UnknownServer { server_id: String },

    #[error("unknown device entity: {entity_id}")]
    UnknownDevice { entity_id: u32 },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn timeout(request: impl Into<String>) -> Self {
        Self::Timeout {
            request: request.into(),
        }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn channel_send(message: impl Into<String>) -> Self {
        Self::ChannelSend {
            message: message.into(),
        }
    }

    pub fn rest(message: impl Into<String>) -> Self {
        Self::Rest {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn unknown_server(server_id: impl Into<String>) -> Self {
        Self::UnknownServer {
            server_id: server_id.into(),
        }
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NotConnected
                | Error::Transport { .. }
                | Error::Timeout { .. }
                | Error::Remote { .. }
                | Error::Protocol { .. }
                | Error::ChannelSend { .. }
                | Error::ChannelClosed
                | Error::Rest { .. }
        )
    }

    /// Check if this error should trigger application exit
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config { .. })
    }

    /// `true` for the timeout taxonomy class — no reply within the bound.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = Error::remote("command failed");
        assert_eq!(err.to_string(), "command failed");

        let err = Error::timeout("server:info");
        assert_eq!(err.to_string(), "request 'server:info' timed out");

        let err = Error::NotConnected;
        assert!(err.to_string().contains("not connected"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_timeout_distinct_from_remote() {
        assert!(Error::timeout("device:control").is_timeout());
        assert!(!Error::remote("device rejected").is_timeout());
        assert!(!Error::NotConnected.is_timeout());
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(Error::NotConnected.is_recoverable());
        assert!(Error::timeout("map:get").is_recoverable());
        assert!(Error::remote("nope").is_recoverable());
        assert!(Error::rest("500").is_recoverable());
        assert!(!Error::config("bad toml").is_recoverable());
    }

    #[test]
    fn test_error_is_fatal() {
        assert!(Error::config("bad toml").is_fatal());
        assert!(!Error::ChannelClosed.is_fatal());
        assert!(!Error::transport("socket closed").is_fatal());
    }

    #[test]
    fn test_error_constructors() {
        let _ = Error::transport("test");
        let _ = Error::timeout("test");
        let _ = Error::remote("test");
        let _ = Error::protocol("test");
        let _ = Error::channel_send("test");
        let _ = Error::rest("test");
        let _ = Error::config("test");
        let _ = Error::unknown_server("abc");
    }
}
