use thiserror::Error;
use tokio::time::error::Elapsed;

use crate::packet::PacketType;

/// Possible errors for the package.
///
/// Session errors (`MissingCredentials` through `Socket`) are never returned
/// from a client operation; they arrive as [crate::client::Event::Error].
#[derive(Error, Debug)]
pub enum RconError {
    /// Returned if `connect` was called with an empty host or password.
    #[error("host and password are required")]
    MissingCredentials,
    /// Returned if the host name could not be resolved to any address.
    #[error("cannot resolve host")]
    Dns(#[source] std::io::Error),
    /// Returned if you can't remember the password.
    #[error("bad password")]
    LoginFailed,
    /// Returned if the server stopped acknowledging keepalive packets.
    #[error("no keepalive acknowledgement within one interval")]
    KeepaliveExceeded,
    /// Returned if the UDP socket could not be opened, written to or read from.
    #[error("socket error: {0}")]
    Socket(#[source] std::io::Error),

    /// Returned by `send_command` unless the session is logged in.
    #[error("not connected")]
    NotConnected,
    /// Returned by `connect` while another connection attempt is in flight or live.
    #[error("already connected or connecting")]
    AlreadyConnected,
    /// Returned if the client task has gone away.
    #[error("client has shut down")]
    EngineStopped,

    /// Returned if a datagram is shorter than the fixed header.
    #[error("packet too short ({0} bytes)")]
    PacketTooShort(usize),
    /// Returned if a datagram does not start with `BE`.
    #[error("packet header malformed (missing BE marker)")]
    BadMarker,
    /// Returned if the header checksum does not match the payload.
    #[error("checksum mismatch: header says {expected:#010x}, payload is {computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },
    /// Returned if we received a packet that does not have a type known to us.
    #[error("unknown rcon packet type: {0:#04x}")]
    UnknownPacketType(u8),
    /// Returned if the payload is too short for its packet type.
    #[error("payload truncated for {0:?} packet")]
    TruncatedPayload(PacketType),

    /// Returned if a configuration file cannot be parsed.
    #[error("invalid configuration")]
    Config(#[from] toml::de::Error),
    /// Returned if a configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Returned if a configuration file cannot be read.
    #[error("cannot read configuration")]
    Io(#[from] std::io::Error),
    /// Returned if the server did not respond in time.
    #[error("timeout")]
    TimeoutError(#[from] Elapsed),
}
