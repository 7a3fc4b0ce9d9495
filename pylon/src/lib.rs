//! # pylon — schema-driven MTProto engine
//!
//! `pylon` is a modular client-side implementation of the MTProto
//! protocol and its ADNL companion transport. It consists of four
//! focused sub-crates wired together here for convenience:
//!
//! | Sub-crate       | Role                                                |
//! |-----------------|-----------------------------------------------------|
//! | `pylon-tl`      | Layered TL scheme registry and value-level codec    |
//! | `pylon-crypto`  | AES-IGE/CTR, SHA, RSA, factorization, key agreement |
//! | `pylon-mtproto` | Auth key exchange, session machine, framing         |
//! | `pylon-adnl`    | ADNL handshake, record layer, query correlation     |
//!
//! Everything is sans-IO: the caller owns the sockets and the clock,
//! and each state machine consumes and produces byte frames.
//!
//! ## Quick start: opening an auth key
//!
//! ```rust,no_run
//! use pylon::mtproto::{Handshake, InitParams, Session};
//! use pylon::tl::{Codec, Registry};
//!
//! let mut registry = Registry::new();
//! registry.load_json(1, r#"{"constructors": [], "methods": []}"#)?;
//! let codec = Codec::new(&registry);
//!
//! let mut session = Session::new(InitParams::default());
//! let mut handshake = Handshake::perm();
//! let request = handshake.start()?;
//! let frame = session.pack_plain(&codec, &request)?;
//! // write `frame` to the wire; on each reply, deserialize the plain
//! // body and feed it to `handshake.advance` until `Done` hands over
//! // the finished key for `session.set_auth_key`.
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]

/// Re-export of [`pylon_tl`] — scheme registry, codec, values, streams.
pub use pylon_tl as tl;

/// Re-export of [`pylon_crypto`] — AES-IGE/CTR, SHA, RSA, factorize, AuthKey.
pub use pylon_crypto as crypto;

/// Re-export of [`pylon_mtproto`] — authentication, session, transport.
pub use pylon_mtproto as mtproto;

/// Re-export of [`pylon_adnl`] — ADNL connection, record layer, handshake.
pub use pylon_adnl as adnl;

pub use pylon_crypto::AuthKey;
pub use pylon_mtproto::{Handshake, HandshakeEvent, InitParams, Session, SessionEvent};
pub use pylon_tl::{Codec, Registry, Value};
