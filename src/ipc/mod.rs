//! Event transport: framing, server and client.

pub mod client;
pub mod protocol;
pub mod server;
