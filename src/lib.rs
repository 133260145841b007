//! Pure Rust async implementation of the [BattlEye RCon protocol](https://www.battleye.com/downloads/BERConProtocol.txt).
pub mod client;
pub mod config;
pub mod crc;
pub mod error;
pub mod keepalive;
pub mod packet;
pub mod server;
pub mod session;
pub mod transport;
