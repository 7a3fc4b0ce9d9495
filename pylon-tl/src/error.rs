//! Error types shared by the registry and the codec.

use std::fmt;

/// Result of a registry lookup or a (de)serialization pass.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for schema lookups and TL (de)serialization.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The stream ended before the value was fully read.
    UnexpectedEof,

    /// A constructor identifier on the wire is not present in any
    /// registered layer.
    UnknownId {
        id: u32,
    },

    /// A boxed slot contained a constructor of a different type than the
    /// schema declares.
    UnexpectedConstructor {
        id: u32,
    },

    /// No definition with this predicate in the requested layer or any
    /// other. Recoverable during `*Empty` probing.
    PredicateNotFound {
        predicate: String,
        layer: u32,
    },

    /// No constructor producing this type in the given layer.
    TypeNotFound {
        ty: String,
        layer: u32,
    },

    /// A required field was absent and no synthesis rule applied.
    MissingParameter {
        predicate: String,
        name: String,
    },

    /// The provided value's variant does not match the declared wire type.
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    /// The JSON scheme could not be interpreted.
    InvalidScheme {
        reason: String,
    },

    /// A `gzip_packed` payload failed to inflate.
    Gzip {
        reason: String,
    },

    /// A `dataJSON` payload failed to parse or render.
    Json {
        reason: String,
    },
}

impl Error {
    /// `true` for the lookup failures the serializer may recover from by
    /// probing an alternative predicate.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::PredicateNotFound { .. } | Self::TypeNotFound { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of stream"),
            Self::UnknownId { id } => {
                write!(f, "unknown constructor id {:08x}", id)
            }
            Self::UnexpectedConstructor { id } => {
                write!(f, "unexpected constructor id {:08x}", id)
            }
            Self::PredicateNotFound { predicate, layer } => {
                write!(f, "predicate {} not found (layer {})", predicate, layer)
            }
            Self::TypeNotFound { ty, layer } => {
                write!(f, "type {} not found (layer {})", ty, layer)
            }
            Self::MissingParameter { predicate, name } => {
                write!(f, "missing parameter {} for {}", name, predicate)
            }
            Self::TypeMismatch {
                name,
                expected,
                found,
            } => {
                write!(
                    f,
                    "field {}: expected {}, found {}",
                    name, expected, found
                )
            }
            Self::InvalidScheme { reason } => {
                write!(f, "invalid scheme: {}", reason)
            }
            Self::Gzip { reason } => write!(f, "gzip_packed: {}", reason),
            Self::Json { reason } => write!(f, "dataJSON: {}", reason),
        }
    }
}

impl std::error::Error for Error {}
