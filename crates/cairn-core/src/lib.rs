//! cairn-core — wire codec, framing, secure channel machinery and service
//! messages for the Cairn OPC UA toolkit. Every other Cairn crate depends on
//! this one.

pub mod channel;
pub mod chunks;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod messages;
pub mod status;
pub mod types;
pub mod wire;

pub use channel::{ChannelError, ChannelRole, ChannelState, ScId, ScOutput, SecureChannel};
pub use status::StatusCode;
pub use types::{DataValue, NodeId, Variant};
