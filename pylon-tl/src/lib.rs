//! Schema-driven TL (Type Language) support: a word-aligned binary
//! stream, a layered schema registry loaded from JSON, a dynamic value
//! model and a recursive codec over all three.
//!
//! Unlike generated-code bindings, the wire format here is data: schemes
//! are registered at runtime and values are built as [`Obj`] trees, which
//! is what lets one engine speak several MTProto layers plus the internal
//! handshake scheme at once.
#![deny(unsafe_code)]

pub mod codec;
pub mod error;
pub mod schema;
pub mod stream;
pub mod value;

pub use codec::{BOOL_FALSE_ID, BOOL_TRUE_ID, Codec, GZIP_PACKED_ID, VECTOR_ID};
pub use error::{Error, Result};
pub use schema::{Definition, Kind, Registry, Scheme};
pub use stream::Stream;
pub use value::{Obj, Value};
