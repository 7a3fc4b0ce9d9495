//! Dynamic value model for schema-driven (de)serialization.
//!
//! Every wire value is one explicit variant; the codec matches on the
//! variant instead of inspecting runtime shapes, so a mismatch between a
//! field and its declared type is an error rather than a silent coercion.

use std::fmt;

/// A decoded or to-be-encoded TL value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i32),
    /// Unsigned 32-bit value, used for `#` (flags) fields.
    UInt(u32),
    Long(i64),
    /// Little-endian words, lowest first.
    Int128([u32; 4]),
    Int256([u32; 8]),
    Int512([u32; 16]),
    Double(f64),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    Vector(Vec<Value>),
    /// Payload of a `dataJSON` wrapper.
    Json(serde_json::Value),
    Obj(Obj),
}

/// A constructor instance: predicate plus fields in schema order.
///
/// Fields keep insertion order; `set` replaces in place so an object can
/// be amended without reordering what a serializer will walk.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Obj {
    predicate: String,
    fields: Vec<(String, Value)>,
}

impl Obj {
    pub fn new(predicate: impl Into<String>) -> Self {
        Self {
            predicate: predicate.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style field append.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn predicate(&self) -> &str {
        &self.predicate
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(field, _)| *field == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let index = self.fields.iter().position(|(field, _)| field == name)?;
        Some(self.fields.remove(index).1)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl fmt::Display for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.predicate)?;
        for (i, (name, _)) in self.fields.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", name)?;
        }
        write!(f, "}}")
    }
}

impl Value {
    /// Variant name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Long(_) => "long",
            Self::Int128(_) => "int128",
            Self::Int256(_) => "int256",
            Self::Int512(_) => "int512",
            Self::Double(_) => "double",
            Self::Bool(_) => "bool",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Vector(_) => "vector",
            Self::Json(_) => "json",
            Self::Obj(_) => "object",
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Self::Int(v) => Some(v),
            Self::UInt(v) => Some(v as i32),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            Self::Int(v) => Some(v as u32),
            Self::UInt(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Long(v) => Some(v),
            Self::Int(v) => Some(v as i64),
            Self::UInt(v) => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            Self::String(v) => Some(v.as_bytes()),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[Value]> {
        match self {
            Self::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_obj(&self) -> Option<&Obj> {
        match self {
            Self::Obj(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int128(&self) -> Option<[u32; 4]> {
        match *self {
            Self::Int128(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int256(&self) -> Option<[u32; 8]> {
        match *self {
            Self::Int256(v) => Some(v),
            _ => None,
        }
    }

    /// Byte view of an `Int128`, little-endian.
    pub fn int128_bytes(&self) -> Option<[u8; 16]> {
        let words = self.as_int128()?;
        let mut out = [0u8; 16];
        for (i, word) in words.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        Some(out)
    }

    /// Byte view of an `Int256`, little-endian.
    pub fn int256_bytes(&self) -> Option<[u8; 32]> {
        let words = self.as_int256()?;
        let mut out = [0u8; 32];
        for (i, word) in words.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        Some(out)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::UInt(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl From<[u8; 16]> for Value {
    fn from(v: [u8; 16]) -> Self {
        let mut words = [0u32; 4];
        for (i, chunk) in v.chunks_exact(4).enumerate() {
            words[i] = u32::from_le_bytes(chunk.try_into().unwrap());
        }
        Self::Int128(words)
    }
}

impl From<[u8; 32]> for Value {
    fn from(v: [u8; 32]) -> Self {
        let mut words = [0u32; 8];
        for (i, chunk) in v.chunks_exact(4).enumerate() {
            words[i] = u32::from_le_bytes(chunk.try_into().unwrap());
        }
        Self::Int256(words)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Vector(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl From<Obj> for Value {
    fn from(v: Obj) -> Self {
        Self::Obj(v)
    }
}
