//! Message descriptors loaded from compiled descriptor sets.
//!
//! A [`DescriptorPool`] is built once per protocol version from the
//! `FileDescriptorSet` blob its schemas were compiled to, and is
//! read-only afterwards. Sub-message fields are resolved through the
//! pool by type name at decode time, which keeps recursive schemas
//! simple.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use prost::Message as _;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, FileDescriptorSet};

/// Errors raised while building a pool.
#[derive(Debug)]
pub enum PoolError {
    /// The blob is not a valid `FileDescriptorSet`.
    Decode(prost::DecodeError),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "descriptor set: {e}"),
        }
    }
}

impl std::error::Error for PoolError {}

// ─── Field kinds ─────────────────────────────────────────────────────────────

/// The wire/value kind of one field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldKind {
    /// 64-bit IEEE float, fixed64 wire.
    Double,
    /// 32-bit IEEE float, fixed32 wire.
    Float,
    /// Signed varint.
    Int32,
    /// Signed varint.
    Int64,
    /// Unsigned varint.
    Uint32,
    /// Unsigned varint.
    Uint64,
    /// ZigZag varint.
    Sint32,
    /// ZigZag varint.
    Sint64,
    /// Fixed 4-byte unsigned.
    Fixed32,
    /// Fixed 8-byte unsigned.
    Fixed64,
    /// Fixed 4-byte signed.
    Sfixed32,
    /// Fixed 8-byte signed.
    Sfixed64,
    /// Varint 0/1.
    Bool,
    /// Length-delimited UTF-8.
    String,
    /// Length-delimited bytes.
    Bytes,
    /// Varint, carried as its integer value.
    Enum,
    /// Length-delimited sub-message; the fully-qualified type name.
    Message(String),
}

impl FieldKind {
    /// Whether values of this kind may be packed into one
    /// length-delimited record when repeated.
    pub fn packable(&self) -> bool {
        !matches!(self, Self::String | Self::Bytes | Self::Message(_))
    }
}

/// One field of a message descriptor.
pub struct FieldDescriptor {
    /// Field number on the wire.
    pub number: u32,
    /// Schema field name (snake_case).
    pub name: String,
    /// Name used in the JSON interchange form (lowerCamelCase).
    pub json_name: String,
    /// Value kind.
    pub kind: FieldKind,
    /// Whether the field is repeated.
    pub repeated: bool,
}

// ─── MessageDescriptor ───────────────────────────────────────────────────────

/// An immutable message schema.
pub struct MessageDescriptor {
    full_name: String,
    fields: Vec<FieldDescriptor>,
    by_number: HashMap<u32, usize>,
    by_json: HashMap<String, usize>,
}

impl MessageDescriptor {
    /// Short (unqualified) message name.
    pub fn name(&self) -> &str {
        self.full_name.rsplit('.').next().unwrap_or(&self.full_name)
    }

    /// Fully-qualified name, no leading dot.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// All fields, in descriptor order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Look up a field by wire number.
    pub fn field_by_number(&self, number: u32) -> Option<&FieldDescriptor> {
        self.by_number.get(&number).map(|&i| &self.fields[i])
    }

    /// Look up a field by JSON name or schema name.
    pub fn field_by_json(&self, key: &str) -> Option<&FieldDescriptor> {
        self.by_json.get(key).map(|&i| &self.fields[i])
    }
}

// ─── DescriptorPool ──────────────────────────────────────────────────────────

/// Every message descriptor of one protocol version.
pub struct DescriptorPool {
    by_full: HashMap<String, Arc<MessageDescriptor>>,
    by_short: HashMap<String, Arc<MessageDescriptor>>,
}

impl DescriptorPool {
    /// Decode a serialized `FileDescriptorSet` and build the pool.
    pub fn from_bytes(blob: &[u8]) -> Result<Self, PoolError> {
        let set = FileDescriptorSet::decode(blob).map_err(PoolError::Decode)?;
        Ok(Self::from_set(&set))
    }

    /// Build the pool from an already-decoded descriptor set.
    pub fn from_set(set: &FileDescriptorSet) -> Self {
        let mut pool = Self { by_full: HashMap::new(), by_short: HashMap::new() };
        for file in &set.file {
            let package = file.package.as_deref().unwrap_or("");
            for message in &file.message_type {
                pool.register(package, message);
            }
        }
        pool
    }

    /// Resolve a descriptor by fully-qualified name, falling back to
    /// the short name.
    pub fn get(&self, name: &str) -> Option<Arc<MessageDescriptor>> {
        let name = name.strip_prefix('.').unwrap_or(name);
        self.by_full
            .get(name)
            .or_else(|| self.by_short.get(name))
            .cloned()
    }

    fn register(&mut self, prefix: &str, proto: &DescriptorProto) {
        let short = proto.name.as_deref().unwrap_or("");
        let full = if prefix.is_empty() { short.to_string() } else { format!("{prefix}.{short}") };

        for nested in &proto.nested_type {
            self.register(&full, nested);
        }

        let mut fields = Vec::new();
        for f in &proto.field {
            let Some(kind) = field_kind(f) else { continue };
            let name = f.name.clone().unwrap_or_default();
            let json_name = match &f.json_name {
                Some(j) if !j.is_empty() => j.clone(),
                _ => lower_camel(&name),
            };
            fields.push(FieldDescriptor {
                number: f.number.unwrap_or(0) as u32,
                name,
                json_name,
                kind,
                repeated: f.label == Some(Label::Repeated as i32),
            });
        }

        let mut by_number = HashMap::new();
        let mut by_json = HashMap::new();
        for (i, f) in fields.iter().enumerate() {
            by_number.insert(f.number, i);
            by_json.insert(f.json_name.clone(), i);
            by_json.entry(f.name.clone()).or_insert(i);
        }

        let desc = Arc::new(MessageDescriptor { full_name: full.clone(), fields, by_number, by_json });
        self.by_short.insert(short.to_string(), desc.clone());
        self.by_full.insert(full, desc);
    }
}

fn field_kind(f: &prost_types::FieldDescriptorProto) -> Option<FieldKind> {
    Some(match Type::try_from(f.r#type.unwrap_or(0)).ok()? {
        Type::Double => FieldKind::Double,
        Type::Float => FieldKind::Float,
        Type::Int32 => FieldKind::Int32,
        Type::Int64 => FieldKind::Int64,
        Type::Uint32 => FieldKind::Uint32,
        Type::Uint64 => FieldKind::Uint64,
        Type::Sint32 => FieldKind::Sint32,
        Type::Sint64 => FieldKind::Sint64,
        Type::Fixed32 => FieldKind::Fixed32,
        Type::Fixed64 => FieldKind::Fixed64,
        Type::Sfixed32 => FieldKind::Sfixed32,
        Type::Sfixed64 => FieldKind::Sfixed64,
        Type::Bool => FieldKind::Bool,
        Type::String => FieldKind::String,
        Type::Bytes => FieldKind::Bytes,
        Type::Enum => FieldKind::Enum,
        Type::Message => {
            let type_name = f.type_name.as_deref().unwrap_or("");
            FieldKind::Message(type_name.strip_prefix('.').unwrap_or(type_name).to_string())
        }
        // Proto2 groups never occur in these schemas.
        Type::Group => return None,
    })
}

fn lower_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for c in name.chars() {
        if c == '_' {
            upper_next = true;
            continue;
        }
        if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_casing_matches_jsonpb() {
        assert_eq!(lower_camel("client_rand_key"), "clientRandKey");
        assert_eq!(lower_camel("retcode"), "retcode");
        assert_eq!(lower_camel("is_force_set"), "isForceSet");
        assert_eq!(lower_camel("_leading"), "Leading");
    }
}
