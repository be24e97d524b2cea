//! Dynamic messages: schema-driven decode, encode and the JSON
//! interchange form.
//!
//! The JSON form is the contract between protocol versions: field
//! *names* survive even when numeric tags are reshuffled. Conventions
//! match the original pipeline — enums as integers, 64-bit integers as
//! strings, bytes as Base64, lowerCamelCase keys, unknown keys ignored
//! on parse.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use serde_json::{Map as JsonMap, Number, Value as Json};

use crate::descriptor::{DescriptorPool, FieldDescriptor, FieldKind, MessageDescriptor};

/// Errors from wire or JSON (re)coding.
#[derive(Debug)]
pub enum WireError {
    /// Ran out of bytes mid-record.
    UnexpectedEof,
    /// A varint ran past ten bytes.
    InvalidVarint,
    /// Wire type does not fit the declared field kind.
    WireType {
        /// Offending field number.
        field: u32,
    },
    /// A sub-message type is missing from the pool.
    UnknownMessage(String),
    /// The JSON form did not fit the descriptor.
    Json {
        /// Offending field (JSON name).
        field: String,
        /// Human-readable reason.
        reason: String,
    },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of buffer"),
            Self::InvalidVarint => write!(f, "varint overflow"),
            Self::WireType { field } => write!(f, "bad wire type for field {field}"),
            Self::UnknownMessage(name) => write!(f, "unknown message type {name}"),
            Self::Json { field, reason } => write!(f, "field {field}: {reason}"),
        }
    }
}

impl std::error::Error for WireError {}

type Result<T> = std::result::Result<T, WireError>;

// ─── Values ──────────────────────────────────────────────────────────────────

/// A decoded field value.
pub enum Value {
    /// Bool fields.
    Bool(bool),
    /// int32, sint32, sfixed32 and enum fields.
    I32(i32),
    /// int64, sint64, sfixed64 fields.
    I64(i64),
    /// uint32 and fixed32 fields.
    U32(u32),
    /// uint64 and fixed64 fields.
    U64(u64),
    /// float fields.
    F32(f32),
    /// double fields.
    F64(f64),
    /// bytes fields.
    Bytes(Vec<u8>),
    /// string fields.
    Str(String),
    /// Sub-messages.
    Msg(DynamicMessage),
    /// Repeated fields.
    List(Vec<Value>),
}

// ─── Cursor ──────────────────────────────────────────────────────────────────

/// Zero-copy cursor over a wire buffer.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn byte(&mut self) -> Result<u8> {
        match self.buf.get(self.pos).copied() {
            Some(b) => {
                self.pos += 1;
                Ok(b)
            }
            None => Err(WireError::UnexpectedEof),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(WireError::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn varint(&mut self) -> Result<u64> {
        let mut out = 0u64;
        for shift in (0..70).step_by(7) {
            let b = self.byte()?;
            if shift == 63 && b > 1 {
                return Err(WireError::InvalidVarint);
            }
            out |= u64::from(b & 0x7F) << shift;
            if b & 0x80 == 0 {
                return Ok(out);
            }
        }
        Err(WireError::InvalidVarint)
    }

    fn fixed32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn fixed64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn delimited(&mut self) -> Result<&'a [u8]> {
        let len = self.varint()? as usize;
        self.take(len)
    }

    fn skip(&mut self, wire: u8) -> Result<()> {
        match wire {
            0 => {
                self.varint()?;
            }
            1 => {
                self.take(8)?;
            }
            2 => {
                self.delimited()?;
            }
            5 => {
                self.take(4)?;
            }
            _ => return Err(WireError::WireType { field: 0 }),
        }
        Ok(())
    }
}

// ─── DynamicMessage ──────────────────────────────────────────────────────────

/// A message decoded against a [`MessageDescriptor`].
pub struct DynamicMessage {
    desc: Arc<MessageDescriptor>,
    fields: BTreeMap<u32, Value>,
}

impl DynamicMessage {
    /// Decode wire bytes against `desc`, resolving sub-messages in `pool`.
    ///
    /// Unknown fields are skipped: the JSON interchange form cannot
    /// carry them, so dropping them at decode keeps both paths equal.
    pub fn decode(pool: &DescriptorPool, desc: Arc<MessageDescriptor>, bytes: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(bytes);
        let mut fields = BTreeMap::new();
        while cur.remaining() > 0 {
            let key = cur.varint()?;
            let number = (key >> 3) as u32;
            let wire = (key & 0x7) as u8;
            match desc.field_by_number(number) {
                None => cur.skip(wire)?,
                Some(f) => decode_field(pool, f, wire, &mut cur, &mut fields)?,
            }
        }
        Ok(Self { desc, fields })
    }

    /// Serialize back to wire bytes, fields in number order.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (&number, value) in &self.fields {
            let Some(f) = self.desc.field_by_number(number) else { continue };
            encode_field(&mut out, f, value);
        }
        out
    }

    /// Render the JSON interchange form.
    pub fn to_json(&self) -> Json {
        let mut map = JsonMap::new();
        for f in self.desc.fields() {
            if let Some(v) = self.fields.get(&f.number) {
                map.insert(f.json_name.clone(), value_to_json(v));
            }
        }
        Json::Object(map)
    }

    /// Parse the JSON interchange form against `desc`.
    ///
    /// Keys that match no field are ignored; `null` clears nothing and
    /// is skipped.
    pub fn from_json(pool: &DescriptorPool, desc: Arc<MessageDescriptor>, json: &Json) -> Result<Self> {
        let Json::Object(map) = json else {
            return Err(WireError::Json {
                field: desc.name().to_string(),
                reason: "expected an object".into(),
            });
        };
        let mut fields = BTreeMap::new();
        for (key, item) in map {
            let Some(f) = desc.field_by_json(key) else { continue };
            if item.is_null() {
                continue;
            }
            let value = if f.repeated {
                let items = match item {
                    Json::Array(a) => a.as_slice(),
                    other => std::slice::from_ref(other),
                };
                let mut list = Vec::with_capacity(items.len());
                for entry in items {
                    list.push(value_from_json(pool, f, entry)?);
                }
                Value::List(list)
            } else {
                value_from_json(pool, f, item)?
            };
            fields.insert(f.number, value);
        }
        Ok(Self { desc, fields })
    }
}

// ─── Wire decode ─────────────────────────────────────────────────────────────

fn decode_field(
    pool: &DescriptorPool,
    f: &FieldDescriptor,
    wire: u8,
    cur: &mut Cursor<'_>,
    fields: &mut BTreeMap<u32, Value>,
) -> Result<()> {
    // A length-delimited record on a packable repeated field is the
    // packed encoding; proto3 writes scalars that way by default.
    if f.repeated && wire == 2 && f.kind.packable() {
        let chunk = cur.delimited()?;
        let mut inner = Cursor::new(chunk);
        while inner.remaining() > 0 {
            let v = decode_scalar(pool, f, &mut inner)?;
            push(fields, f, v);
        }
        return Ok(());
    }

    if wire != scalar_wire(&f.kind) {
        return Err(WireError::WireType { field: f.number });
    }
    let v = decode_scalar(pool, f, cur)?;
    if f.repeated {
        push(fields, f, v);
    } else {
        fields.insert(f.number, v);
    }
    Ok(())
}

fn push(fields: &mut BTreeMap<u32, Value>, f: &FieldDescriptor, v: Value) {
    match fields.entry(f.number).or_insert_with(|| Value::List(Vec::new())) {
        Value::List(list) => list.push(v),
        slot => *slot = Value::List(vec![v]),
    }
}

fn scalar_wire(kind: &FieldKind) -> u8 {
    match kind {
        FieldKind::Int32
        | FieldKind::Int64
        | FieldKind::Uint32
        | FieldKind::Uint64
        | FieldKind::Sint32
        | FieldKind::Sint64
        | FieldKind::Bool
        | FieldKind::Enum => 0,
        FieldKind::Fixed64 | FieldKind::Sfixed64 | FieldKind::Double => 1,
        FieldKind::Fixed32 | FieldKind::Sfixed32 | FieldKind::Float => 5,
        FieldKind::String | FieldKind::Bytes | FieldKind::Message(_) => 2,
    }
}

fn decode_scalar(pool: &DescriptorPool, f: &FieldDescriptor, cur: &mut Cursor<'_>) -> Result<Value> {
    Ok(match &f.kind {
        FieldKind::Int32 => Value::I32(cur.varint()? as i64 as i32),
        FieldKind::Int64 => Value::I64(cur.varint()? as i64),
        FieldKind::Uint32 => Value::U32(cur.varint()? as u32),
        FieldKind::Uint64 => Value::U64(cur.varint()?),
        FieldKind::Sint32 => {
            let n = cur.varint()? as u32;
            Value::I32(((n >> 1) as i32) ^ -((n & 1) as i32))
        }
        FieldKind::Sint64 => {
            let n = cur.varint()?;
            Value::I64(((n >> 1) as i64) ^ -((n & 1) as i64))
        }
        FieldKind::Bool => Value::Bool(cur.varint()? != 0),
        FieldKind::Enum => Value::I32(cur.varint()? as i64 as i32),
        FieldKind::Fixed32 => Value::U32(cur.fixed32()?),
        FieldKind::Sfixed32 => Value::I32(cur.fixed32()? as i32),
        FieldKind::Float => Value::F32(f32::from_bits(cur.fixed32()?)),
        FieldKind::Fixed64 => Value::U64(cur.fixed64()?),
        FieldKind::Sfixed64 => Value::I64(cur.fixed64()? as i64),
        FieldKind::Double => Value::F64(f64::from_bits(cur.fixed64()?)),
        FieldKind::String => {
            let raw = cur.delimited()?;
            Value::Str(String::from_utf8_lossy(raw).into_owned())
        }
        FieldKind::Bytes => Value::Bytes(cur.delimited()?.to_vec()),
        FieldKind::Message(type_name) => {
            let raw = cur.delimited()?;
            let desc = pool.get(type_name).ok_or_else(|| WireError::UnknownMessage(type_name.clone()))?;
            Value::Msg(DynamicMessage::decode(pool, desc, raw)?)
        }
    })
}

// ─── Wire encode ─────────────────────────────────────────────────────────────

fn put_varint(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn put_tag(out: &mut Vec<u8>, number: u32, wire: u8) {
    put_varint(out, (u64::from(number) << 3) | u64::from(wire));
}

fn encode_field(out: &mut Vec<u8>, f: &FieldDescriptor, value: &Value) {
    match value {
        Value::List(items) => {
            if f.kind.packable() {
                let mut packed = Vec::new();
                for item in items {
                    encode_scalar(&mut packed, &f.kind, item);
                }
                put_tag(out, f.number, 2);
                put_varint(out, packed.len() as u64);
                out.extend_from_slice(&packed);
            } else {
                for item in items {
                    encode_single(out, f, item);
                }
            }
        }
        single => encode_single(out, f, single),
    }
}

fn encode_single(out: &mut Vec<u8>, f: &FieldDescriptor, value: &Value) {
    match (&f.kind, value) {
        (FieldKind::String, Value::Str(s)) => {
            put_tag(out, f.number, 2);
            put_varint(out, s.len() as u64);
            out.extend_from_slice(s.as_bytes());
        }
        (FieldKind::Bytes, Value::Bytes(b)) => {
            put_tag(out, f.number, 2);
            put_varint(out, b.len() as u64);
            out.extend_from_slice(b);
        }
        (FieldKind::Message(_), Value::Msg(m)) => {
            let body = m.encode();
            put_tag(out, f.number, 2);
            put_varint(out, body.len() as u64);
            out.extend_from_slice(&body);
        }
        (kind, scalar) => {
            put_tag(out, f.number, scalar_wire(kind));
            encode_scalar(out, kind, scalar);
        }
    }
}

fn encode_scalar(out: &mut Vec<u8>, kind: &FieldKind, value: &Value) {
    match (kind, value) {
        (FieldKind::Int32 | FieldKind::Enum, Value::I32(v)) => put_varint(out, *v as i64 as u64),
        (FieldKind::Int64, Value::I64(v)) => put_varint(out, *v as u64),
        (FieldKind::Uint32, Value::U32(v)) => put_varint(out, u64::from(*v)),
        (FieldKind::Uint64, Value::U64(v)) => put_varint(out, *v),
        (FieldKind::Sint32, Value::I32(v)) => put_varint(out, u64::from(((*v << 1) ^ (*v >> 31)) as u32)),
        (FieldKind::Sint64, Value::I64(v)) => put_varint(out, ((*v << 1) ^ (*v >> 63)) as u64),
        (FieldKind::Bool, Value::Bool(v)) => put_varint(out, u64::from(*v)),
        (FieldKind::Fixed32, Value::U32(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (FieldKind::Sfixed32, Value::I32(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (FieldKind::Float, Value::F32(v)) => out.extend_from_slice(&v.to_bits().to_le_bytes()),
        (FieldKind::Fixed64, Value::U64(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (FieldKind::Sfixed64, Value::I64(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (FieldKind::Double, Value::F64(v)) => out.extend_from_slice(&v.to_bits().to_le_bytes()),
        // Kind/value mismatches cannot be constructed through decode or
        // from_json; emit nothing rather than corrupt the stream.
        _ => {}
    }
}

// ─── JSON form ───────────────────────────────────────────────────────────────

fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Bool(v) => Json::Bool(*v),
        Value::I32(v) => Json::Number((*v).into()),
        Value::U32(v) => Json::Number((*v).into()),
        Value::I64(v) => Json::String(v.to_string()),
        Value::U64(v) => Json::String(v.to_string()),
        Value::F32(v) => float_json(f64::from(*v)),
        Value::F64(v) => float_json(*v),
        Value::Str(v) => Json::String(v.clone()),
        Value::Bytes(v) => Json::String(B64.encode(v)),
        Value::Msg(m) => m.to_json(),
        Value::List(items) => Json::Array(items.iter().map(value_to_json).collect()),
    }
}

fn float_json(v: f64) -> Json {
    match Number::from_f64(v) {
        Some(n) => Json::Number(n),
        None if v.is_nan() => Json::String("NaN".into()),
        None if v > 0.0 => Json::String("Infinity".into()),
        None => Json::String("-Infinity".into()),
    }
}

fn value_from_json(pool: &DescriptorPool, f: &FieldDescriptor, json: &Json) -> Result<Value> {
    let bad = |reason: &str| WireError::Json { field: f.json_name.clone(), reason: reason.into() };
    Ok(match &f.kind {
        FieldKind::Bool => Value::Bool(json.as_bool().ok_or_else(|| bad("expected bool"))?),
        FieldKind::Int32 | FieldKind::Sint32 | FieldKind::Sfixed32 | FieldKind::Enum => {
            Value::I32(json_i64(json).ok_or_else(|| bad("expected integer"))? as i32)
        }
        FieldKind::Int64 | FieldKind::Sint64 | FieldKind::Sfixed64 => {
            Value::I64(json_i64(json).ok_or_else(|| bad("expected integer"))?)
        }
        FieldKind::Uint32 | FieldKind::Fixed32 => {
            Value::U32(json_u64(json).ok_or_else(|| bad("expected unsigned integer"))? as u32)
        }
        FieldKind::Uint64 | FieldKind::Fixed64 => {
            Value::U64(json_u64(json).ok_or_else(|| bad("expected unsigned integer"))?)
        }
        FieldKind::Float => Value::F32(json_f64(json).ok_or_else(|| bad("expected number"))? as f32),
        FieldKind::Double => Value::F64(json_f64(json).ok_or_else(|| bad("expected number"))?),
        FieldKind::String => Value::Str(json.as_str().ok_or_else(|| bad("expected string"))?.to_string()),
        FieldKind::Bytes => {
            let raw = json.as_str().ok_or_else(|| bad("expected base64 string"))?;
            let decoded = B64
                .decode(raw)
                .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(raw))
                .map_err(|_| bad("invalid base64"))?;
            Value::Bytes(decoded)
        }
        FieldKind::Message(type_name) => {
            let desc = pool.get(type_name).ok_or_else(|| WireError::UnknownMessage(type_name.clone()))?;
            Value::Msg(DynamicMessage::from_json(pool, desc, json)?)
        }
    })
}

fn json_i64(json: &Json) -> Option<i64> {
    match json {
        Json::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Json::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn json_u64(json: &Json) -> Option<u64> {
    match json {
        Json::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Json::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn json_f64(json: &Json) -> Option<f64> {
    match json {
        Json::Number(n) => n.as_f64(),
        Json::String(s) => match s.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            other => other.parse().ok(),
        },
        _ => None,
    }
}
