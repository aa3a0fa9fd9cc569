//! JSON schemas and values for the protocoder CLI.
//!
//! A schema file lists message descriptors (each with an optional storage layout)
//! followed by extension descriptors:
//!
//! ```json
//! {
//!   "messages": [
//!     {"full_name": "pkg.Msg", "syntax": "proto3",
//!      "fields": [{"name": "id", "number": 1, "kind": "int64"}]}
//!   ],
//!   "extensions": []
//! }
//! ```
//!
//! Values are JSON objects keyed by field name.
//! Extensions use their bracketed full name as the key, *e.g.* `"[pkg.ext]"`.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value as JsonValue};

use protocoder::{
    ExtensionDescriptor, FieldDescriptor, Kind, Message, MessageDescriptor, MessageInfo,
    MessageLayout, Registry, Value,
};

#[derive(Deserialize)]
struct Schema {
    #[serde(default)]
    messages: Vec<MessageEntry>,
    #[serde(default)]
    extensions: Vec<ExtensionDescriptor>,
}

#[derive(Deserialize)]
struct MessageEntry {
    #[serde(flatten)]
    descriptor: MessageDescriptor,
    #[serde(default)]
    layout: MessageLayout,
}

/// Read a schema file and register everything in it.
pub fn load_schema(path: &Path) -> Result<Arc<Registry>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read schema file {}", path.display()))?;
    let schema: Schema = serde_json::from_str(&text)
        .with_context(|| format!("Invalid schema file {}", path.display()))?;

    let registry = Registry::new();
    for entry in schema.messages {
        registry.register(entry.descriptor, entry.layout)?;
    }
    // Message types first: extension value types must already be registered.
    for extension in schema.extensions {
        let name = extension.full_name.clone();
        registry
            .register_extension(extension)
            .with_context(|| format!("Cannot register extension {name}"))?;
    }
    Ok(registry)
}

/// Build an instance of `info` from a JSON object.
pub fn to_message(registry: &Registry, info: &Arc<MessageInfo>, json: &JsonValue) -> Result<Message> {
    let JsonValue::Object(object) = json else {
        bail!("Value of {} must be a JSON object", info.full_name());
    };
    let mut message = Message::new(info);
    for (key, json) in object {
        if let Some(name) = key.strip_prefix('[').and_then(|key| key.strip_suffix(']')) {
            let ty = registry
                .find_extension_by_name(name)
                .ok_or_else(|| anyhow!("Unknown extension {name}"))?;
            let value = to_value(registry, &ty.descriptor().field, json)?;
            message.set_extension(&ty, value)?;
        } else {
            let field = info
                .descriptor()
                .fields
                .iter()
                .find(|field| field.name == *key)
                .ok_or_else(|| anyhow!("{} has no field '{key}'", info.full_name()))?;
            let value = to_value(registry, field, json)
                .with_context(|| format!("In {}.{key}", info.full_name()))?;
            message.set(field.number, value)?;
        }
    }
    Ok(message)
}

fn to_value(registry: &Registry, field: &FieldDescriptor, json: &JsonValue) -> Result<Value> {
    if !field.is_repeated() {
        return to_single(registry, field, json);
    }
    let JsonValue::Array(items) = json else {
        bail!("Repeated field '{}' expects an array", field.name);
    };
    items
        .iter()
        .map(|item| to_single(registry, field, item))
        .collect::<Result<_>>()
        .map(Value::List)
}

fn to_single(registry: &Registry, field: &FieldDescriptor, json: &JsonValue) -> Result<Value> {
    let name = &field.name;
    Ok(match field.kind {
        Kind::Bool => Value::Bool(
            json.as_bool()
                .ok_or_else(|| anyhow!("Field '{name}' expects a boolean"))?,
        ),
        Kind::Enum => Value::Enum(integer(field, json)?),
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => Value::I32(integer(field, json)?),
        Kind::Uint32 | Kind::Fixed32 => Value::U32(integer(field, json)?),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => Value::I64(integer(field, json)?),
        Kind::Uint64 | Kind::Fixed64 => Value::U64(integer(field, json)?),
        Kind::Float => Value::F32(float(field, json)? as f32),
        Kind::Double => Value::F64(float(field, json)?),
        Kind::String => Value::String(
            json.as_str()
                .ok_or_else(|| anyhow!("Field '{name}' expects a string"))?
                .to_owned(),
        ),
        // Bytes are written as hex strings.
        Kind::Bytes => {
            let text = json
                .as_str()
                .ok_or_else(|| anyhow!("Field '{name}' expects a hex string"))?;
            Value::Bytes(hex::decode(text).with_context(|| format!("Field '{name}'"))?)
        }
        Kind::Message | Kind::Group => {
            let type_name = field.message_type.as_deref().unwrap_or_default();
            let child = registry
                .message_info(type_name)
                .ok_or_else(|| anyhow!("Unregistered message type '{type_name}'"))?;
            to_message(registry, &child, json)?.into()
        }
    })
}

fn integer<T: TryFrom<i64> + TryFrom<u64>>(field: &FieldDescriptor, json: &JsonValue) -> Result<T> {
    let value = match (json.as_i64(), json.as_u64()) {
        (Some(n), _) => <T as TryFrom<i64>>::try_from(n).ok(),
        (None, Some(n)) => <T as TryFrom<u64>>::try_from(n).ok(),
        (None, None) => None,
    };
    value.ok_or_else(|| anyhow!("Field '{}' expects a {:?} integer", field.name, field.kind))
}

fn float(field: &FieldDescriptor, json: &JsonValue) -> Result<f64> {
    json.as_f64()
        .ok_or_else(|| anyhow!("Field '{}' expects a number", field.name))
}

/// Render a message as a JSON object, the inverse of [`to_message`].
/// Unknown fields are rendered as a hex string under `"[unknown]"`.
pub fn from_message(message: &Message) -> JsonValue {
    let mut object = Map::new();
    for field in &message.info().descriptor().fields {
        if let Some(value) = message.get(field.number) {
            object.insert(field.name.clone(), from_value(value));
        }
    }
    if let Some(extensions) = message.extensions() {
        for extension in extensions.values() {
            object.insert(
                format!("[{}]", extension.ty().full_name()),
                from_value(extension.value()),
            );
        }
    }
    if let Some(unknown) = message.unknown_fields().filter(|unknown| !unknown.is_empty()) {
        object.insert("[unknown]".into(), hex::encode(unknown).into());
    }
    JsonValue::Object(object)
}

fn from_value(value: &Value) -> JsonValue {
    match value {
        Value::Bool(b) => json!(b),
        Value::I32(n) | Value::Enum(n) => json!(n),
        Value::I64(n) => json!(n),
        Value::U32(n) => json!(n),
        Value::U64(n) => json!(n),
        Value::F32(x) => json!(x),
        Value::F64(x) => json!(x),
        Value::String(s) => json!(s),
        Value::Bytes(bytes) => json!(hex::encode(bytes)),
        Value::Message(message) => from_message(message),
        Value::List(items) => items.iter().map(from_value).collect(),
    }
}
