//! MTProto 2.0 protocol engine, sans-IO.
//!
//! The crate splits the protocol into independent pieces:
//!
//! - [`authentication`] — the auth key handshake and temp-key binding
//! - [`keys`] — per-datacenter permanent/temporary key state
//! - [`msg_id`] — message id allocation and replay protection
//! - [`session`] — the connection state machine: queueing, container
//!   packing, encryption and incoming dispatch
//! - [`transport`] — abridged framing over a caller-provided byte stream
//!
//! Nothing here performs network IO; callers move bytes between these
//! state machines and their sockets. Requests and responses are dynamic
//! [`pylon_tl`] objects resolved through a schema registry.

#![deny(unsafe_code)]

pub mod authentication;
pub mod keys;
pub mod msg_id;
pub mod session;
pub mod transport;

pub use authentication::{Finished, Handshake, HandshakeEvent};
pub use keys::{AuthInfo, AuthKeyRef, KeyStore, TempKey};
pub use msg_id::{MsgIdError, MsgIdGen, MsgIdValidator};
pub use session::{InitParams, RequestError, Session, SessionError, SessionEvent};
pub use transport::{Abridged, AbridgedTransport, Transport};

/// Layer slot the service scheme (handshake and session-control
/// constructors) is expected to occupy in the registry. Lookups fall
/// back upward from here, so API schemes load at higher layers.
pub const MTPROTO_LAYER: u32 = 1;
