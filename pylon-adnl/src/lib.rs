//! ADNL client transport, the framing TON lite-servers speak over TCP.
//!
//! Three layers, all sans-IO:
//!
//! - [`handshake`]: one-shot Curve25519 handshake deriving the session
//!   keystreams from a client-chosen init block.
//! - [`frame`]: the AES-CTR record layer with SHA-256 integrity.
//! - [`connection`]: query and ping correlation over decoded frames.
//!
//! Message payloads are schema-driven TL, encoded through
//! [`pylon_tl::Codec`] against a registry holding the ADNL scheme at
//! [`ADNL_LAYER`].

#![deny(unsafe_code)]

pub mod connection;
pub mod frame;
pub mod handshake;

pub use connection::{
    AdnlEvent, Connection, ConnectionError, PING_INTERVAL_SECS, QueryError, method_id,
};
pub use frame::{FrameError, FrameReader};
pub use handshake::key_id;

/// Registry layer slot the ADNL scheme is loaded under.
pub const ADNL_LAYER: u32 = 1;
