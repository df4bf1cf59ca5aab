//! Error types
//!
//! Comprehensive error handling for all FBP runtime operations.

use thiserror::Error;

/// Main error type for FBP runtime operations
#[derive(Error, Debug)]
pub enum FbpError {
    /// `send` was attempted with content that failed the port's type handler.
    #[error("packet validation failed on port '{port}': {message}")]
    PacketValidation { port: String, message: String },

    /// No registered `TypeHandler` claims the descriptor.
    #[error("no type handler claims descriptor {descriptor}")]
    TypeHandler { descriptor: String },

    /// A packet was operated on by a component that does not own it, or was
    /// dropped/sent twice.
    #[error("ownership violation: {0}")]
    Ownership(String),

    /// A component terminated while packets it received were neither sent
    /// nor explicitly dropped. Fatal to the network.
    #[error("component '{component}' terminated while still owning packets")]
    PacketLeak { component: String },

    /// `send` was attempted on a connection that is closed.
    #[error("send on closed connection '{connection}'")]
    ConnectionClosed { connection: String },

    /// An operation was attempted on a port that has already been closed.
    #[error("operation on closed port '{port}'")]
    PortNotOpen { port: String },

    /// User component logic returned an error or panicked.
    #[error("component '{component}' failed: {message}")]
    Component { component: String, message: String },

    /// Quiescence was reached with components still alive.
    #[error("deadlock detected; participants: {participants:?}")]
    Deadlock { participants: Vec<String> },

    /// The graph description passed to the builder is invalid.
    #[error("graph construction error: {0}")]
    GraphBuild(String),

    /// Component logic surfaced a raw I/O error rather than mapping it
    /// into one of the taxonomy variants above.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for FBP runtime operations
pub type Result<T> = std::result::Result<T, FbpError>;

impl FbpError {
    /// Create a packet validation error with a port name and message
    pub fn packet_validation(port: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PacketValidation {
            port: port.into(),
            message: message.into(),
        }
    }

    /// Create a type-handler resolution error for the given descriptor
    pub fn type_handler(descriptor: impl std::fmt::Display) -> Self {
        Self::TypeHandler {
            descriptor: descriptor.to_string(),
        }
    }

    /// Create a connection-closed error for the named connection
    pub fn connection_closed(connection: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            connection: connection.into(),
        }
    }

    /// Create a port-not-open error for the named port
    pub fn port_not_open(port: impl Into<String>) -> Self {
        Self::PortNotOpen { port: port.into() }
    }

    /// Check if this error is recoverable by ordinary user logic (as
    /// opposed to being fatal to the whole network).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PacketValidation { .. } | Self::ConnectionClosed { .. }
        )
    }

    /// Check if this error is fatal to the network as a whole.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PacketLeak { .. } | Self::Deadlock { .. })
    }

    /// Check if this error specifically means a `send`/`receive` was
    /// attempted on a connection or port that is no longer open.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::ConnectionClosed { .. } | Self::PortNotOpen { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_vs_fatal() {
        let validation = FbpError::packet_validation("in", "not a string");
        assert!(validation.is_recoverable());
        assert!(!validation.is_fatal());

        let leak = FbpError::PacketLeak {
            component: "Sink".into(),
        };
        assert!(!leak.is_recoverable());
        assert!(leak.is_fatal());

        let deadlock = FbpError::Deadlock {
            participants: vec!["A".into(), "B".into()],
        };
        assert!(deadlock.is_fatal());
    }
}
