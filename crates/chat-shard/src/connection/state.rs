//! Connection state

/// Lifecycle of one shard's connection
///
/// `Dead → Connecting → Connected → Disconnecting → Dead`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No socket
    #[default]
    Dead,
    /// Socket opening or handshake in progress
    Connecting,
    /// Handshake sent; reader and heartbeat running
    Connected,
    /// Tearing the socket down
    Disconnecting,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dead => "dead",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
