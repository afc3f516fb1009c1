//! The closed set of broker-managed game services.
//!
//! Each tag binds a protocol handler module in the back process to a
//! well-known client-facing TCP port on the front. The pair
//! `(tag, connection index)` is the globally addressable identity of a live
//! client socket.

use std::fmt;

/// A broker-managed TCP service.
///
/// Tags travel over the RPC link as plain strings so that a newer front can
/// talk to an older back; the dispatcher ignores tags it does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerTag {
    /// Server browser / matchmaking queries.
    ServerBrowser,
    /// GameSpy presence and messaging.
    Gpcm,
    /// GameSpy presence search.
    Gpsp,
    /// Game statistics.
    GameStats,
}

impl ServerTag {
    /// Every broker-managed TCP service, in listener start order.
    pub const ALL: [ServerTag; 4] = [
        ServerTag::ServerBrowser,
        ServerTag::Gpcm,
        ServerTag::Gpsp,
        ServerTag::GameStats,
    ];

    /// The wire tag used to address this service over the RPC link.
    pub fn tag(self) -> &'static str {
        match self {
            ServerTag::ServerBrowser => "serverbrowser",
            ServerTag::Gpcm => "gpcm",
            ServerTag::Gpsp => "gpsp",
            ServerTag::GameStats => "gamestats",
        }
    }

    /// The well-known client-facing port of this service.
    pub fn port(self) -> u16 {
        match self {
            ServerTag::ServerBrowser => 28910,
            ServerTag::Gpcm => 29900,
            ServerTag::Gpsp => 29901,
            ServerTag::GameStats => 29920,
        }
    }

    /// Resolve a wire tag. Returns `None` for tags outside the closed set.
    pub fn from_tag(tag: &str) -> Option<ServerTag> {
        match tag {
            "serverbrowser" => Some(ServerTag::ServerBrowser),
            "gpcm" => Some(ServerTag::Gpcm),
            "gpsp" => Some(ServerTag::Gpsp),
            "gamestats" => Some(ServerTag::GameStats),
            _ => None,
        }
    }
}

impl fmt::Display for ServerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_port_bindings() {
        assert_eq!(ServerTag::ServerBrowser.port(), 28910);
        assert_eq!(ServerTag::Gpcm.port(), 29900);
        assert_eq!(ServerTag::Gpsp.port(), 29901);
        assert_eq!(ServerTag::GameStats.port(), 29920);
    }

    #[test]
    fn test_tag_round_trip() {
        for server in ServerTag::ALL {
            assert_eq!(ServerTag::from_tag(server.tag()), Some(server));
        }
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(ServerTag::from_tag("nas"), None);
        assert_eq!(ServerTag::from_tag(""), None);
        assert_eq!(ServerTag::from_tag("GPCM"), None);
    }

    #[test]
    fn test_display_matches_wire_tag() {
        assert_eq!(ServerTag::Gpcm.to_string(), "gpcm");
    }
}
