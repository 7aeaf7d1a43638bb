//! Tagged-value entities and their binary/textual encodings.
//!
//! An [`Entity`] is the unit of storage for every non-legacy data model
//! (document, relational row, graph node or edge, vector carrier): a
//! `(table, pk)` identity plus an unordered field map of [`Value`]s. The
//! binary encoding supports extracting a single field without building
//! the full map, matching the access pattern the query engine needs for
//! predicate evaluation.

use crate::types::{Result, SombraError};
use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine as _;
use serde_json::{Map as JsonMap, Number as JsonNumber, Value as JsonValue};
use std::collections::BTreeMap;

/// Reserved field carrying the source vertex of a graph edge entity.
pub const FIELD_FROM: &str = "_from";
/// Reserved field carrying the target vertex of a graph edge entity.
pub const FIELD_TO: &str = "_to";
/// Reserved field carrying the edge type name.
pub const FIELD_TYPE: &str = "_type";
/// Reserved field carrying comma-joined node labels.
pub const FIELD_LABELS: &str = "_labels";
/// Reserved field carrying the millisecond start of a temporal validity window.
pub const FIELD_VALID_FROM: &str = "valid_from";
/// Reserved field carrying the millisecond end of a temporal validity window.
pub const FIELD_VALID_TO: &str = "valid_to";

/// One-byte tag identifying a [`Value`]'s variant in the binary encoding.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
enum Tag {
    Null = 0,
    Bool = 1,
    Int = 2,
    Float = 3,
    String = 4,
    Bytes = 5,
    FloatVector = 6,
}

impl Tag {
    fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Tag::Null),
            1 => Ok(Tag::Bool),
            2 => Ok(Tag::Int),
            3 => Ok(Tag::Float),
            4 => Ok(Tag::String),
            5 => Ok(Tag::Bytes),
            6 => Ok(Tag::FloatVector),
            _ => Err(SombraError::Corruption("unknown entity value tag")),
        }
    }
}

/// A single field's value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    /// A dense embedding, e.g. for vector-index fields.
    FloatVector(Vec<f32>),
}

impl Value {
    fn tag(&self) -> Tag {
        match self {
            Value::Null => Tag::Null,
            Value::Bool(_) => Tag::Bool,
            Value::Int(_) => Tag::Int,
            Value::Float(_) => Tag::Float,
            Value::String(_) => Tag::String,
            Value::Bytes(_) => Tag::Bytes,
            Value::FloatVector(_) => Tag::FloatVector,
        }
    }

    /// Returns the value as an `f64` if it is numeric (int or float).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            Value::FloatVector(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn encode_payload(&self, out: &mut Vec<u8>) {
        match self {
            Value::Null => {}
            Value::Bool(b) => out.push(*b as u8),
            Value::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::Float(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::String(s) => {
                out.extend_from_slice(&(s.len() as u32).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Value::Bytes(b) => {
                out.extend_from_slice(&(b.len() as u32).to_be_bytes());
                out.extend_from_slice(b);
            }
            Value::FloatVector(v) => {
                out.extend_from_slice(&(v.len() as u32).to_be_bytes());
                for f in v {
                    out.extend_from_slice(&f.to_be_bytes());
                }
            }
        }
    }

    fn decode_payload(tag: Tag, src: &[u8]) -> Result<(Self, usize)> {
        match tag {
            Tag::Null => Ok((Value::Null, 0)),
            Tag::Bool => {
                let b = *src.first().ok_or(SombraError::Corruption("truncated bool"))?;
                Ok((Value::Bool(b != 0), 1))
            }
            Tag::Int => {
                let bytes = src
                    .get(..8)
                    .ok_or(SombraError::Corruption("truncated int"))?;
                Ok((Value::Int(i64::from_be_bytes(bytes.try_into().unwrap())), 8))
            }
            Tag::Float => {
                let bytes = src
                    .get(..8)
                    .ok_or(SombraError::Corruption("truncated float"))?;
                Ok((
                    Value::Float(f64::from_be_bytes(bytes.try_into().unwrap())),
                    8,
                ))
            }
            Tag::String => {
                let (len, body) = read_len_prefixed(src)?;
                let s = std::str::from_utf8(body)
                    .map_err(|_| SombraError::Corruption("string value not valid utf-8"))?;
                Ok((Value::String(s.to_string()), 4 + len))
            }
            Tag::Bytes => {
                let (len, body) = read_len_prefixed(src)?;
                Ok((Value::Bytes(body.to_vec()), 4 + len))
            }
            Tag::FloatVector => {
                let count = u32::from_be_bytes(
                    src.get(..4)
                        .ok_or(SombraError::Corruption("truncated vector length"))?
                        .try_into()
                        .unwrap(),
                ) as usize;
                let mut consumed = 4;
                let mut vec = Vec::with_capacity(count);
                for _ in 0..count {
                    let bytes = src
                        .get(consumed..consumed + 4)
                        .ok_or(SombraError::Corruption("truncated vector element"))?;
                    vec.push(f32::from_be_bytes(bytes.try_into().unwrap()));
                    consumed += 4;
                }
                Ok((Value::FloatVector(vec), consumed))
            }
        }
    }

    fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(v) => JsonValue::Number((*v).into()),
            Value::Float(v) => JsonNumber::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Bytes(b) => JsonValue::String(BASE64_ENGINE.encode(b)),
            Value::FloatVector(v) => {
                JsonValue::Array(v.iter().map(|f| JsonValue::from(*f as f64)).collect())
            }
        }
    }
}

fn read_len_prefixed(src: &[u8]) -> Result<(usize, &[u8])> {
    let len_bytes = src
        .get(..4)
        .ok_or(SombraError::Corruption("truncated length prefix"))?;
    let len = u32::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
    let body = src
        .get(4..4 + len)
        .ok_or(SombraError::Corruption("truncated value payload"))?;
    Ok((len, body))
}

/// An entity's field map. Iteration order is the insertion order used at
/// [`encode`](Entity::encode) time, not alphabetical.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Entity {
    fields: Vec<(String, Value)>,
}

impl Entity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        let name = name.into();
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.fields.push((name, value));
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Encodes the entity as: field count (u32 BE), then per field a
    /// length-prefixed name, a one-byte tag, and a tag-width payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.fields.len() as u32).to_be_bytes());
        for (name, value) in &self.fields {
            out.extend_from_slice(&(name.len() as u32).to_be_bytes());
            out.extend_from_slice(name.as_bytes());
            out.push(value.tag() as u8);
            value.encode_payload(&mut out);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let count = read_u32(bytes, 0)? as usize;
        let mut off = 4;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let name_len = read_u32(bytes, off)? as usize;
            off += 4;
            let name_bytes = bytes
                .get(off..off + name_len)
                .ok_or(SombraError::Corruption("truncated field name"))?;
            let name = std::str::from_utf8(name_bytes)
                .map_err(|_| SombraError::Corruption("field name not valid utf-8"))?
                .to_string();
            off += name_len;
            let tag = Tag::from_u8(
                *bytes
                    .get(off)
                    .ok_or(SombraError::Corruption("truncated tag"))?,
            )?;
            off += 1;
            let (value, consumed) = Value::decode_payload(tag, &bytes[off..])?;
            off += consumed;
            fields.push((name, value));
        }
        Ok(Entity { fields })
    }

    /// Extracts a single field without decoding the rest of the record.
    pub fn extract_field(bytes: &[u8], name: &str) -> Result<Option<Value>> {
        let count = read_u32(bytes, 0)? as usize;
        let mut off = 4;
        for _ in 0..count {
            let name_len = read_u32(bytes, off)? as usize;
            off += 4;
            let name_bytes = bytes
                .get(off..off + name_len)
                .ok_or(SombraError::Corruption("truncated field name"))?;
            off += name_len;
            let tag = Tag::from_u8(
                *bytes
                    .get(off)
                    .ok_or(SombraError::Corruption("truncated tag"))?,
            )?;
            off += 1;
            let (value, consumed) = Value::decode_payload(tag, &bytes[off..])?;
            if name_bytes == name.as_bytes() {
                return Ok(Some(value));
            }
            off += consumed;
        }
        Ok(None)
    }

    /// Extracts every field as an owned map; used when the caller actually
    /// needs the whole entity rather than a single field.
    pub fn extract_all_fields(bytes: &[u8]) -> Result<BTreeMap<String, Value>> {
        let entity = Entity::decode(bytes)?;
        Ok(entity.fields.into_iter().collect())
    }

    /// Extracts a named field as a float vector, if present and of that type.
    pub fn extract_vector(bytes: &[u8], name: &str) -> Result<Option<Vec<f32>>> {
        match Entity::extract_field(bytes, name)? {
            Some(Value::FloatVector(v)) => Ok(Some(v)),
            _ => Ok(None),
        }
    }

    /// Renders the entity as stable (insertion-ordered) JSON text.
    pub fn to_json(&self) -> String {
        let mut map = JsonMap::new();
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_json());
        }
        JsonValue::Object(map).to_string()
    }

    pub fn labels(&self) -> Vec<String> {
        match self.get(FIELD_LABELS) {
            Some(Value::String(s)) if !s.is_empty() => {
                s.split(',').map(|s| s.to_string()).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn read_u32(bytes: &[u8], off: usize) -> Result<u32> {
    let slice = bytes
        .get(off..off + 4)
        .ok_or(SombraError::Corruption("truncated u32 field"))?;
    Ok(u32::from_be_bytes(slice.try_into().unwrap()))
}
