//! Layered TL schema registry.
//!
//! Schemes are loaded as JSON, one per layer, each with `constructors` and
//! `methods` tables. Both land in the same namespace; a method's name is
//! its predicate. Param types are normalized once at load time (flag
//! conditions, vectors, `%Type` pinning, the layer-1 `string` -> `bytes`
//! rewrite) so the codec never re-parses type strings.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Normalized wire type of one parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum Kind {
    Int,
    /// `#` bitfield driving flag-conditional siblings.
    Flags,
    Long,
    Int128,
    Int256,
    Int512,
    Double,
    Bool,
    /// Zero-width flag marker; presence lives entirely in the flags word.
    True,
    String,
    Bytes,
    /// `DataJSON` wrapper carrying a JSON document as a TL string.
    Json,
    Vector {
        bare: bool,
        item: Box<Kind>,
    },
    /// Constructor-valued field. `predicate` is pinned for bare encodings
    /// (`%Type` and lowercase item names); `None` means boxed.
    Object {
        ty: String,
        predicate: Option<String>,
    },
}

impl Kind {
    /// Guaranteed minimum wire size in 32-bit words, used to pre-grow the
    /// output buffer before a field loop.
    fn base_words(&self) -> usize {
        match self {
            Self::Int | Self::Flags | Self::String | Self::Bytes | Self::Json => 1,
            Self::Long | Self::Double => 2,
            Self::Int128 => 4,
            Self::Int256 => 8,
            Self::Int512 => 16,
            Self::Bool => 1,
            Self::True | Self::Vector { .. } | Self::Object { .. } => 0,
        }
    }
}

/// `field.N?` condition of a flag-gated parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct FlagBit {
    pub field: String,
    pub bit: u8,
}

impl FlagBit {
    pub fn mask(&self) -> u32 {
        1 << self.bit
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: String,
    pub kind: Kind,
    pub flag: Option<FlagBit>,
}

/// One constructor or method of one layer.
#[derive(Clone, Debug, PartialEq)]
pub struct Definition {
    pub id: u32,
    pub predicate: String,
    pub ty: String,
    pub layer: u32,
    pub is_method: bool,
    pub params: Vec<Param>,
    /// Lower bound of the encoded size in words, excluding the boxed id.
    pub min_size: usize,
}

/// JSON form of a scheme: the `{constructors, methods}` tables.
#[derive(Debug, Default, Deserialize)]
pub struct Scheme {
    #[serde(default)]
    pub constructors: Vec<RawDefinition>,
    #[serde(default)]
    pub methods: Vec<RawDefinition>,
}

#[derive(Debug, Deserialize)]
pub struct RawDefinition {
    pub id: RawId,
    #[serde(default)]
    pub predicate: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub params: Vec<RawParam>,
}

#[derive(Debug, Deserialize)]
pub struct RawParam {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// Published schemes write ids either as (possibly negative) decimal
/// numbers or as decimal strings; both denote the same 32-bit pattern.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Number(i64),
    Text(String),
}

impl RawId {
    fn to_u32(&self) -> Result<u32> {
        let value = match self {
            Self::Number(v) => *v,
            Self::Text(s) => s.parse::<i64>().map_err(|_| Error::InvalidScheme {
                reason: format!("bad constructor id {:?}", s),
            })?,
        };
        if value > u32::MAX as i64 || value < i32::MIN as i64 {
            return Err(Error::InvalidScheme {
                reason: format!("constructor id {} out of range", value),
            });
        }
        Ok(value as u32)
    }
}

/// All loaded layers, indexed by id, by (predicate, layer) and by
/// (type, layer).
#[derive(Debug, Default)]
pub struct Registry {
    defs: Vec<Definition>,
    by_id: HashMap<u32, usize>,
    by_predicate: HashMap<(String, u32), usize>,
    by_type: HashMap<(String, u32), usize>,
    layers: Vec<u32>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON scheme and registers it under `layer`.
    pub fn load_json(&mut self, layer: u32, json: &str) -> Result<()> {
        let scheme: Scheme = serde_json::from_str(json).map_err(|err| Error::InvalidScheme {
            reason: err.to_string(),
        })?;
        self.load(layer, scheme)
    }

    /// Registers an already-parsed scheme. Layers should be added in
    /// ascending order; for decoding, a later layer's id wins over an
    /// earlier one's.
    pub fn load(&mut self, layer: u32, scheme: Scheme) -> Result<()> {
        if !self.layers.contains(&layer) {
            self.layers.push(layer);
            self.layers.sort_unstable();
        }

        let base = self.defs.len();
        let mut raw_params = Vec::new();
        for (raw, is_method) in scheme
            .constructors
            .iter()
            .map(|raw| (raw, false))
            .chain(scheme.methods.iter().map(|raw| (raw, true)))
        {
            let predicate = raw
                .predicate
                .as_deref()
                .or(raw.method.as_deref())
                .ok_or_else(|| Error::InvalidScheme {
                    reason: format!("definition of type {} has no name", raw.ty),
                })?
                .to_owned();
            let key = (predicate.clone(), layer);
            if self.by_predicate.contains_key(&key) {
                return Err(Error::InvalidScheme {
                    reason: format!("duplicate predicate {} in layer {}", predicate, layer),
                });
            }
            let index = self.defs.len();
            self.by_predicate.insert(key, index);
            self.by_id.insert(raw.id.to_u32()?, index);
            self.by_type
                .entry((raw.ty.clone(), layer))
                .or_insert(index);
            self.defs.push(Definition {
                id: raw.id.to_u32()?,
                predicate,
                ty: raw.ty.clone(),
                layer,
                is_method,
                params: Vec::new(),
                min_size: if raw.ty == "Vector t" { 1 } else { 0 },
            });
            raw_params.push(&raw.params);
        }

        // second pass, once the layer's own types are indexed, so that
        // `%Type` and bare items can be pinned
        for (offset, raws) in raw_params.iter().enumerate() {
            let mut params = Vec::with_capacity(raws.len());
            let mut min_size = self.defs[base + offset].min_size;
            for raw in raws.iter() {
                let (flag, ty) = match split_flag(&raw.ty) {
                    Some((field, bit, rest)) => (
                        Some(FlagBit {
                            field: field.to_owned(),
                            bit,
                        }),
                        rest,
                    ),
                    None => (None, raw.ty.as_str()),
                };
                let kind = self.normalize(ty, layer)?;
                if flag.is_none() {
                    min_size += kind.base_words();
                }
                params.push(Param {
                    name: raw.name.clone(),
                    kind,
                    flag,
                });
            }
            self.defs[base + offset].params = params;
            self.defs[base + offset].min_size = min_size;
        }
        Ok(())
    }

    fn normalize(&self, ty: &str, layer: u32) -> Result<Kind> {
        let ty = ty.strip_prefix('!').unwrap_or(ty);
        let ty = if layer == 1 && ty == "string" {
            "bytes"
        } else {
            ty
        };
        Ok(match ty {
            "int" => Kind::Int,
            "#" => Kind::Flags,
            "long" => Kind::Long,
            "int128" => Kind::Int128,
            "int256" => Kind::Int256,
            "int512" => Kind::Int512,
            "double" => Kind::Double,
            "Bool" => Kind::Bool,
            "true" => Kind::True,
            "string" => Kind::String,
            "bytes" => Kind::Bytes,
            "DataJSON" => Kind::Json,
            _ => {
                if let Some(inner) = vector_item(ty) {
                    Kind::Vector {
                        bare: ty.starts_with('v'),
                        item: Box::new(self.normalize(inner, layer)?),
                    }
                } else if let Some(name) = ty.strip_prefix('%') {
                    let def = self.find_by_type(name, layer)?;
                    Kind::Object {
                        ty: def.ty.clone(),
                        predicate: Some(def.predicate.clone()),
                    }
                } else if starts_lowercase(ty) {
                    // lowercase names are bare constructors when known,
                    // otherwise treated as a boxed type
                    match self.find_by_predicate(ty, layer) {
                        Ok(def) => Kind::Object {
                            ty: def.ty.clone(),
                            predicate: Some(def.predicate.clone()),
                        },
                        Err(_) => Kind::Object {
                            ty: ty.to_owned(),
                            predicate: None,
                        },
                    }
                } else {
                    Kind::Object {
                        ty: ty.to_owned(),
                        predicate: None,
                    }
                }
            }
        })
    }

    pub fn find_by_id(&self, id: u32) -> Result<&Definition> {
        self.by_id
            .get(&id)
            .map(|&index| &self.defs[index])
            .ok_or(Error::UnknownId { id })
    }

    /// Exact layer first, then every loaded layer in ascending order.
    pub fn find_by_predicate(&self, predicate: &str, layer: u32) -> Result<&Definition> {
        if let Some(&index) = self.by_predicate.get(&(predicate.to_owned(), layer)) {
            return Ok(&self.defs[index]);
        }
        for &other in &self.layers {
            if other == layer {
                continue;
            }
            if let Some(&index) = self.by_predicate.get(&(predicate.to_owned(), other)) {
                return Ok(&self.defs[index]);
            }
        }
        Err(Error::PredicateNotFound {
            predicate: predicate.to_owned(),
            layer,
        })
    }

    pub fn find_by_type(&self, ty: &str, layer: u32) -> Result<&Definition> {
        if let Some(&index) = self.by_type.get(&(ty.to_owned(), layer)) {
            return Ok(&self.defs[index]);
        }
        for &other in &self.layers {
            if other == layer {
                continue;
            }
            if let Some(&index) = self.by_type.get(&(ty.to_owned(), other)) {
                return Ok(&self.defs[index]);
            }
        }
        Err(Error::TypeNotFound {
            ty: ty.to_owned(),
            layer,
        })
    }

    pub fn layers(&self) -> &[u32] {
        &self.layers
    }
}

fn split_flag(ty: &str) -> Option<(&str, u8, &str)> {
    let question = ty.find('?')?;
    let (cond, rest) = (&ty[..question], &ty[question + 1..]);
    let dot = cond.find('.')?;
    let bit: u8 = cond[dot + 1..].parse().ok()?;
    if bit >= 32 {
        return None;
    }
    Some((&cond[..dot], bit, rest))
}

fn vector_item(ty: &str) -> Option<&str> {
    let rest = ty
        .strip_prefix("vector<")
        .or_else(|| ty.strip_prefix("Vector<"))?;
    rest.strip_suffix('>')
}

fn starts_lowercase(ty: &str) -> bool {
    ty.chars().next().is_some_and(|c| c.is_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .load_json(
                1,
                r#"{
                    "constructors": [
                        {"id": "481674261", "predicate": "vector", "type": "Vector t", "params": []},
                        {"id": "85337187", "predicate": "resPQ", "type": "ResPQ", "params": [
                            {"name": "nonce", "type": "int128"},
                            {"name": "server_nonce", "type": "int128"},
                            {"name": "pq", "type": "bytes"},
                            {"name": "server_public_key_fingerprints", "type": "Vector<long>"}
                        ]},
                        {"id": "155834844", "predicate": "future_salt", "type": "FutureSalt", "params": [
                            {"name": "valid_since", "type": "int"},
                            {"name": "valid_until", "type": "int"},
                            {"name": "salt", "type": "long"}
                        ]},
                        {"id": "1013613780", "predicate": "p_q_inner_data_temp", "type": "P_Q_inner_data", "params": [
                            {"name": "pq", "type": "string"},
                            {"name": "expires_in", "type": "int"}
                        ]}
                    ],
                    "methods": [
                        {"id": "-1099002127", "method": "req_pq_multi", "type": "ResPQ", "params": [
                            {"name": "nonce", "type": "int128"}
                        ]}
                    ]
                }"#,
            )
            .unwrap();
        registry
            .load_json(
                14,
                r##"{
                    "constructors": [
                        {"id": 1577067778, "predicate": "user", "type": "User", "params": [
                            {"name": "flags", "type": "#"},
                            {"name": "verified", "type": "flags.1?true"},
                            {"name": "username", "type": "flags.3?string"},
                            {"name": "id", "type": "long"}
                        ]}
                    ],
                    "methods": []
                }"##,
            )
            .unwrap();
        registry
    }

    #[test]
    fn ids_accept_both_spellings() {
        let registry = registry();
        assert_eq!(registry.find_by_id(0x05162463).unwrap().predicate, "resPQ");
        assert_eq!(
            registry.find_by_id(0xbe7e8ef1).unwrap().predicate,
            "req_pq_multi"
        );
    }

    #[test]
    fn layer1_string_becomes_bytes() {
        let registry = registry();
        let def = registry.find_by_predicate("p_q_inner_data_temp", 1).unwrap();
        assert_eq!(def.params[0].kind, Kind::Bytes);
        // layer 14 strings keep their type
        let user = registry.find_by_predicate("user", 14).unwrap();
        assert_eq!(user.params[2].kind, Kind::String);
    }

    #[test]
    fn flag_conditions_are_split() {
        let registry = registry();
        let user = registry.find_by_predicate("user", 14).unwrap();
        assert_eq!(user.params[0].kind, Kind::Flags);
        assert_eq!(
            user.params[1].flag,
            Some(FlagBit {
                field: "flags".into(),
                bit: 1
            })
        );
        assert_eq!(user.params[1].kind, Kind::True);
        assert_eq!(
            user.params[2].flag,
            Some(FlagBit {
                field: "flags".into(),
                bit: 3
            })
        );
    }

    #[test]
    fn min_size_counts_unconditional_words() {
        let registry = registry();
        // int128 + int128 + bytes + vector
        let def = registry.find_by_predicate("resPQ", 1).unwrap();
        assert_eq!(def.min_size, 9);
        // flags word + long; conditional params excluded
        let user = registry.find_by_predicate("user", 14).unwrap();
        assert_eq!(user.min_size, 3);
    }

    #[test]
    fn layer_fallback_is_ascending() {
        let registry = registry();
        let def = registry.find_by_predicate("resPQ", 14).unwrap();
        assert_eq!(def.layer, 1);
        assert!(registry.find_by_predicate("missing", 14).is_err());
        assert!(
            registry
                .find_by_predicate("missing", 14)
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn duplicate_predicate_in_layer_is_rejected() {
        let mut registry = registry();
        let dup = r#"{"constructors": [
            {"id": 1, "predicate": "user", "type": "User", "params": []},
            {"id": 2, "predicate": "user", "type": "User", "params": []}
        ]}"#;
        assert!(matches!(
            registry.load_json(15, dup),
            Err(Error::InvalidScheme { .. })
        ));
    }
}
