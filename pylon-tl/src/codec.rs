//! Recursive TL serializer and deserializer driven by a [`Registry`].
//!
//! Constructors with well-known magic ids (`vector`, the two `Bool`
//! constructors, `gzip_packed`, `dataJSON`) are handled inline so schemes
//! stay declarative; everything else goes through the registry.

use std::io::Read;

use flate2::read::GzDecoder;

use crate::error::{Error, Result};
use crate::schema::{Definition, Kind, Param, Registry};
use crate::stream::Stream;
use crate::value::{Obj, Value};

pub const VECTOR_ID: u32 = 0x1cb5_c415;
pub const BOOL_TRUE_ID: u32 = 0x9972_75b5;
pub const BOOL_FALSE_ID: u32 = 0xbc79_9737;
pub const GZIP_PACKED_ID: u32 = 0x3072_cfa1;

fn secure_random(buffer: &mut [u8]) {
    getrandom::getrandom(buffer).expect("failed to generate secure random data");
}

pub struct Codec<'a> {
    registry: &'a Registry,
    fill_random: fn(&mut [u8]),
}

impl<'a> Codec<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            fill_random: secure_random,
        }
    }

    /// Codec with an injected randomness source, for deterministic use of
    /// the `random_*` synthesis rules.
    pub fn with_random(registry: &'a Registry, fill_random: fn(&mut [u8])) -> Self {
        Self {
            registry,
            fill_random,
        }
    }

    pub fn registry(&self) -> &Registry {
        self.registry
    }

    /// Decodes one boxed value at the cursor.
    pub fn deserialize(&self, stream: &mut Stream) -> Result<Value> {
        let id = stream.read_u32()?;
        self.deserialize_id(stream, id)
    }

    /// Decodes one boxed value from a standalone byte buffer.
    pub fn from_bytes(&self, bytes: &[u8]) -> Result<Value> {
        self.deserialize(&mut Stream::from_bytes(bytes))
    }

    /// Encodes one boxed value.
    pub fn serialize(&self, stream: &mut Stream, value: &Value, layer: u32) -> Result<()> {
        match value {
            Value::Obj(obj) => {
                let def = self.registry.find_by_predicate(obj.predicate(), layer)?;
                stream.prepare_length(1 + def.min_size);
                stream.write_u32(def.id);
                self.serialize_def(stream, obj, def)
            }
            Value::Bool(flag) => {
                stream.write_u32(if *flag { BOOL_TRUE_ID } else { BOOL_FALSE_ID });
                Ok(())
            }
            Value::Vector(items) => {
                let id = self
                    .registry
                    .find_by_predicate("vector", layer)
                    .map(|def| def.id)
                    .unwrap_or(VECTOR_ID);
                stream.write_u32(id);
                stream.write_u32(items.len() as u32);
                for item in items {
                    self.serialize(stream, item, layer)?;
                }
                Ok(())
            }
            Value::Json(json) => {
                let data = serde_json::to_string(json).map_err(|err| Error::Json {
                    reason: err.to_string(),
                })?;
                self.serialize(stream, &Obj::new("dataJSON").with("data", data).into(), layer)
            }
            other => Err(Error::TypeMismatch {
                name: "<root>".into(),
                expected: "object",
                found: other.kind(),
            }),
        }
    }

    /// Encodes one boxed value into a fresh byte buffer.
    pub fn to_bytes(&self, value: &Value, layer: u32) -> Result<Vec<u8>> {
        let mut stream = Stream::new();
        self.serialize(&mut stream, value, layer)?;
        Ok(stream.written_bytes())
    }

    fn deserialize_id(&self, stream: &mut Stream, id: u32) -> Result<Value> {
        match id {
            BOOL_TRUE_ID => Ok(Value::Bool(true)),
            BOOL_FALSE_ID => Ok(Value::Bool(false)),
            VECTOR_ID => {
                let count = stream.read_u32()? as usize;
                // every element takes at least one word
                if count > stream.remaining() {
                    return Err(Error::UnexpectedEof);
                }
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.deserialize(stream)?);
                }
                Ok(Value::Vector(items))
            }
            GZIP_PACKED_ID => {
                let packed = stream.read_bytes()?;
                let mut inflated = Vec::new();
                GzDecoder::new(&packed[..])
                    .read_to_end(&mut inflated)
                    .map_err(|err| Error::Gzip {
                        reason: err.to_string(),
                    })?;
                self.deserialize(&mut Stream::from_bytes(&inflated))
            }
            _ => {
                let def = self.registry.find_by_id(id)?;
                let value = self.deserialize_def(stream, def)?;
                if def.predicate == "dataJSON" {
                    return unwrap_data_json(value);
                }
                Ok(value)
            }
        }
    }

    fn deserialize_def(&self, stream: &mut Stream, def: &Definition) -> Result<Value> {
        let mut obj = Obj::new(def.predicate.clone());
        for param in &def.params {
            if let Some(flag) = &param.flag {
                let flags = obj.get(&flag.field).and_then(Value::as_u32).unwrap_or(0);
                let present = flags & flag.mask() != 0;
                if param.kind == Kind::True {
                    obj.set(param.name.clone(), present);
                    continue;
                }
                if !present {
                    continue;
                }
            }
            let value = self.deserialize_kind(stream, &param.kind, def.layer)?;
            obj.set(param.name.clone(), value);
        }
        Ok(Value::Obj(obj))
    }

    fn deserialize_kind(&self, stream: &mut Stream, kind: &Kind, layer: u32) -> Result<Value> {
        Ok(match kind {
            Kind::Int => Value::Int(stream.read_i32()?),
            Kind::Flags => Value::UInt(stream.read_u32()?),
            Kind::Long => Value::Long(stream.read_i64()?),
            Kind::Int128 => Value::Int128(stream.read_words::<4>()?),
            Kind::Int256 => Value::Int256(stream.read_words::<8>()?),
            Kind::Int512 => Value::Int512(stream.read_words::<16>()?),
            Kind::Double => Value::Double(stream.read_f64()?),
            Kind::Bool => match stream.read_u32()? {
                BOOL_TRUE_ID => Value::Bool(true),
                BOOL_FALSE_ID => Value::Bool(false),
                other => return Err(Error::UnexpectedConstructor { id: other }),
            },
            Kind::True => Value::Bool(true),
            Kind::String => Value::String(stream.read_string()?),
            Kind::Bytes => Value::Bytes(stream.read_bytes()?),
            Kind::Json => self.deserialize(stream)?,
            Kind::Vector { bare, item } => {
                if !bare {
                    let id = stream.read_u32()?;
                    if id == GZIP_PACKED_ID {
                        return self.deserialize_id(stream, id);
                    }
                    if id != VECTOR_ID
                        && self
                            .registry
                            .find_by_id(id)
                            .map(|def| def.predicate != "vector")
                            .unwrap_or(true)
                    {
                        return Err(Error::UnexpectedConstructor { id });
                    }
                }
                let count = stream.read_u32()? as usize;
                // every element takes at least one word
                if count > stream.remaining() {
                    return Err(Error::UnexpectedEof);
                }
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.deserialize_kind(stream, item, layer)?);
                }
                Value::Vector(items)
            }
            Kind::Object {
                predicate: Some(predicate),
                ..
            } => {
                let def = self.registry.find_by_predicate(predicate, layer)?;
                self.deserialize_def(stream, def)?
            }
            Kind::Object { predicate: None, .. } => self.deserialize(stream)?,
        })
    }

    fn serialize_def(&self, stream: &mut Stream, obj: &Obj, def: &Definition) -> Result<()> {
        stream.prepare_length(def.min_size);
        for param in &def.params {
            if param.kind == Kind::Flags {
                stream.write_u32(collect_flags(obj, def, &param.name));
                continue;
            }
            if param.kind == Kind::True {
                continue;
            }
            if param.flag.is_some() && obj.get(&param.name).is_none() {
                continue;
            }
            match obj.get(&param.name) {
                Some(value) => {
                    self.serialize_kind(stream, value, &param.kind, def.layer, &param.name)?
                }
                None => self.synthesize(stream, obj, def, param)?,
            }
        }
        Ok(())
    }

    fn serialize_kind(
        &self,
        stream: &mut Stream,
        value: &Value,
        kind: &Kind,
        layer: u32,
        name: &str,
    ) -> Result<()> {
        let mismatch = |expected: &'static str| Error::TypeMismatch {
            name: name.to_owned(),
            expected,
            found: value.kind(),
        };
        match kind {
            Kind::Int => stream.write_i32(value.as_i32().ok_or_else(|| mismatch("int"))?),
            Kind::Flags => stream.write_u32(value.as_u32().ok_or_else(|| mismatch("#"))?),
            Kind::Long => stream.write_i64(value.as_i64().ok_or_else(|| mismatch("long"))?),
            Kind::Int128 => match value {
                Value::Int128(words) => stream.write_words(words),
                Value::Bytes(bytes) if bytes.len() == 16 => {
                    stream.write_words(&words_of(bytes))
                }
                _ => return Err(mismatch("int128")),
            },
            Kind::Int256 => match value {
                Value::Int256(words) => stream.write_words(words),
                Value::Bytes(bytes) if bytes.len() == 32 => {
                    stream.write_words(&words_of(bytes))
                }
                _ => return Err(mismatch("int256")),
            },
            Kind::Int512 => match value {
                Value::Int512(words) => stream.write_words(&words[..]),
                Value::Bytes(bytes) if bytes.len() == 64 => {
                    stream.write_words(&words_of(bytes))
                }
                _ => return Err(mismatch("int512")),
            },
            Kind::Double => stream.write_f64(value.as_f64().ok_or_else(|| mismatch("double"))?),
            Kind::Bool => {
                let flag = value.as_bool().ok_or_else(|| mismatch("Bool"))?;
                stream.write_u32(if flag { BOOL_TRUE_ID } else { BOOL_FALSE_ID });
            }
            Kind::True => {}
            Kind::String => match value {
                Value::String(text) => stream.write_str(text),
                Value::Bytes(bytes) => stream.write_bytes(bytes),
                _ => return Err(mismatch("string")),
            },
            Kind::Bytes => {
                stream.write_bytes(value.as_bytes().ok_or_else(|| mismatch("bytes"))?)
            }
            Kind::Json => match value {
                Value::Json(_) | Value::Obj(_) => self.serialize(stream, value, layer)?,
                _ => return Err(mismatch("DataJSON")),
            },
            Kind::Vector { bare, item } => {
                let items = value.as_vector().ok_or_else(|| mismatch("vector"))?;
                if !bare {
                    let id = self
                        .registry
                        .find_by_predicate("vector", layer)
                        .map(|def| def.id)
                        .unwrap_or(VECTOR_ID);
                    stream.write_u32(id);
                }
                stream.write_u32(items.len() as u32);
                for element in items {
                    self.serialize_kind(stream, element, item, layer, name)?;
                }
            }
            Kind::Object {
                predicate: Some(predicate),
                ..
            } => {
                let obj = value.as_obj().ok_or_else(|| mismatch("object"))?;
                if obj.predicate() != predicate {
                    return Err(Error::TypeMismatch {
                        name: name.to_owned(),
                        expected: "pinned bare constructor",
                        found: "object",
                    });
                }
                let def = self.registry.find_by_predicate(predicate, layer)?;
                self.serialize_def(stream, obj, def)?;
            }
            Kind::Object { predicate: None, .. } => self.serialize(stream, value, layer)?,
        }
        Ok(())
    }

    /// Fills in an absent required field, in fixed precedence order.
    fn synthesize(
        &self,
        stream: &mut Stream,
        obj: &Obj,
        def: &Definition,
        param: &Param,
    ) -> Result<()> {
        if param.name == "random_bytes" && param.kind == Kind::Bytes {
            let mut pick = [0u8; 1];
            (self.fill_random)(&mut pick);
            let mut buffer = vec![0u8; 15 + 4 * (pick[0] % 3) as usize];
            (self.fill_random)(&mut buffer);
            stream.write_bytes(&buffer);
            return Ok(());
        }
        if param.name == "random_id" {
            match &param.kind {
                Kind::Int => {
                    stream.write_i32(self.random_i32());
                    return Ok(());
                }
                Kind::Long => {
                    stream.write_i64(self.random_i64());
                    return Ok(());
                }
                Kind::Vector { bare, item } if **item == Kind::Long => {
                    // one random id per entry of the sibling `id` vector
                    let count = obj
                        .get("id")
                        .and_then(Value::as_vector)
                        .map(<[Value]>::len)
                        .ok_or_else(|| Error::MissingParameter {
                            predicate: def.predicate.clone(),
                            name: param.name.clone(),
                        })?;
                    if !bare {
                        stream.write_u32(VECTOR_ID);
                    }
                    stream.write_u32(count as u32);
                    for _ in 0..count {
                        stream.write_i64(self.random_i64());
                    }
                    return Ok(());
                }
                _ => {}
            }
        }
        match &param.kind {
            Kind::String | Kind::Bytes => {
                stream.write_bytes(&[]);
                return Ok(());
            }
            Kind::Vector { bare, .. } => {
                if !bare {
                    stream.write_u32(VECTOR_ID);
                }
                stream.write_u32(0);
                return Ok(());
            }
            _ => {}
        }
        if param.name == "hash" && param.kind == Kind::Int {
            stream.write_i32(0);
            return Ok(());
        }
        if def.ty == "DocumentAttribute"
            && matches!(param.name.as_str(), "w" | "h" | "duration")
            && param.kind == Kind::Int
        {
            stream.write_i32(0);
            return Ok(());
        }
        if let Kind::Object { ty, .. } = &param.kind {
            for candidate in [format!("input{}Empty", ty), format!("{}Empty", lcfirst(ty))] {
                match self.registry.find_by_predicate(&candidate, def.layer) {
                    Ok(found) if found.ty == *ty => {
                        stream.write_u32(found.id);
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Err(err),
                }
            }
        }
        Err(Error::MissingParameter {
            predicate: def.predicate.clone(),
            name: param.name.clone(),
        })
    }

    fn random_i32(&self) -> i32 {
        let mut buffer = [0u8; 4];
        (self.fill_random)(&mut buffer);
        i32::from_le_bytes(buffer)
    }

    fn random_i64(&self) -> i64 {
        let mut buffer = [0u8; 8];
        (self.fill_random)(&mut buffer);
        i64::from_le_bytes(buffer)
    }
}

/// Recomputes a `#` word from which of its dependent siblings are set.
fn collect_flags(obj: &Obj, def: &Definition, field: &str) -> u32 {
    let mut flags = 0;
    for param in &def.params {
        let Some(flag) = &param.flag else { continue };
        if flag.field != field {
            continue;
        }
        let present = match obj.get(&param.name) {
            Some(Value::Bool(false)) if param.kind == Kind::True => false,
            Some(_) => true,
            None => false,
        };
        if present {
            flags |= flag.mask();
        }
    }
    flags
}

fn unwrap_data_json(value: Value) -> Result<Value> {
    let data = value
        .as_obj()
        .and_then(|obj| obj.get("data"))
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Json {
            reason: "missing data field".to_owned(),
        })?;
    let json = serde_json::from_str(data).map_err(|err| Error::Json {
        reason: err.to_string(),
    })?;
    Ok(Value::Json(json))
}

fn words_of(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

fn lcfirst(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}
