//! Storage for message instances.
//!
//! The coders never see a concrete layout: they reach field values through a
//! [`FieldAccessor`] and the per-instance slots (size cache, unknown bytes,
//! extensions) through the accessors on [`Message`].

use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use serde::Deserialize;

use crate::error::{Error, ErrorKind, Result};
use crate::extension::ExtensionType;
use crate::registry::MessageInfo;
use crate::schema::Kind;
use crate::MarshalOptions;

/// Sentinel stored in the size cache before any size has been computed.
const NO_CACHED_SIZE: i64 = -1;

/// Which optional per-instance slots a message type's storage provides.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct MessageLayout {
    /// Per-instance cache of the most recently computed encoded size.
    pub size_cache: bool,
    /// Raw bytes of fields this build of the schema does not know.
    pub unknown_fields: bool,
    /// Open-ended set of extension fields.
    pub extensions: bool,
}

/// A field value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    /// Enum number (not necessarily a declared variant).
    Enum(i32),
    String(String),
    Bytes(Vec<u8>),
    Message(Box<Message>),
    /// Values of a repeated field.
    List(Vec<Value>),
}

/// Extensions attached to an instance, keyed by field number.
/// Iteration order is unspecified; the marshaler sorts.
pub type ExtensionMap = HashMap<u32, ExtensionField>;

/// A single extension value together with its type.
#[derive(Clone)]
pub struct ExtensionField {
    ty: Arc<ExtensionType>,
    value: Value,
}

/// Reads or writes one field's storage inside an opaque instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FieldAccessor {
    index: usize,
}

/// An instance of a message type.
pub struct Message {
    info: Arc<MessageInfo>,

    /// One slot per declared field, in declaration order.
    /// `None` only for absent pointer-like fields.
    fields: Vec<Option<Value>>,

    /// Present iff the layout has a size cache.
    size_cache: Option<AtomicI64>,

    /// Present iff the layout has an unknown-fields slot.
    unknown: Option<Vec<u8>>,

    /// Present iff the layout has an extensions slot.
    extensions: Option<ExtensionMap>,
}

impl Default for MessageLayout {
    fn default() -> Self {
        Self {
            size_cache: true,
            unknown_fields: true,
            extensions: true,
        }
    }
}

impl Value {
    /// Zero value stored for implicit-presence fields.
    pub(crate) fn zero(kind: Kind) -> Option<Self> {
        Some(match kind {
            Kind::Bool => Value::Bool(false),
            Kind::Enum => Value::Enum(0),
            Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => Value::I32(0),
            Kind::Uint32 | Kind::Fixed32 => Value::U32(0),
            Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => Value::I64(0),
            Kind::Uint64 | Kind::Fixed64 => Value::U64(0),
            Kind::Float => Value::F32(0.0),
            Kind::Double => Value::F64(0.0),
            Kind::String => Value::String(String::new()),
            Kind::Bytes => Value::Bytes(Vec::new()),
            Kind::Message | Kind::Group => return None,
        })
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Value::Message(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<Message> for Value {
    fn from(message: Message) -> Self {
        Value::Message(Box::new(message))
    }
}

impl ExtensionField {
    pub(crate) fn new(ty: Arc<ExtensionType>, value: Value) -> Self {
        Self { ty, value }
    }

    pub fn ty(&self) -> &Arc<ExtensionType> {
        &self.ty
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub(crate) fn into_value(self) -> Value {
        self.value
    }
}

impl FieldAccessor {
    pub(crate) fn new(index: usize) -> Self {
        Self { index }
    }

    /// The field's value, or `None` if absent.
    #[inline(always)]
    pub(crate) fn get<'a>(&self, message: &'a Message) -> Option<&'a Value> {
        message.fields.get(self.index).and_then(Option::as_ref)
    }

    /// The field's storage slot, or `None` if the instance is of another type.
    #[inline(always)]
    pub(crate) fn slot_mut<'a>(&self, message: &'a mut Message) -> Option<&'a mut Option<Value>> {
        message.fields.get_mut(self.index)
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }
}

impl Message {
    /// Return a new instance with every field unset (or zero, for implicit presence).
    pub fn new(info: &Arc<MessageInfo>) -> Self {
        let layout = info.layout();
        Self {
            info: info.clone(),
            fields: info
                .slots()
                .iter()
                .map(|slot| {
                    if slot.pointer {
                        None
                    } else {
                        Value::zero(slot.kind)
                    }
                })
                .collect(),
            size_cache: layout
                .size_cache
                .then(|| AtomicI64::new(NO_CACHED_SIZE)),
            unknown: layout.unknown_fields.then(Vec::new),
            extensions: layout.extensions.then(HashMap::new),
        }
    }

    pub fn info(&self) -> &Arc<MessageInfo> {
        &self.info
    }

    pub(crate) fn is_instance_of(&self, info: &MessageInfo) -> bool {
        std::ptr::eq(self.info.as_ref(), info)
    }

    /// The value of the field numbered `number`, if set.
    pub fn get(&self, number: u32) -> Option<&Value> {
        self.info
            .slot_index(number)
            .and_then(|index| FieldAccessor::new(index).get(self))
    }

    /// Set a field. Setting a oneof member clears its siblings.
    ///
    /// The value is not checked against the field's kind here;
    /// a mismatch surfaces as an [`EncodeError`](crate::EncodeError) when marshaling.
    pub fn set(&mut self, number: u32, value: Value) -> Result<()> {
        let index = self.slot_index(number)?;
        self.fields[index] = Some(value);
        self.clear_oneof_siblings(index);
        Ok(())
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, number: u32, value: Value) -> Result<Self> {
        self.set(number, value)?;
        Ok(self)
    }

    /// Reset a field to absent, or to its zero value for implicit presence.
    pub fn clear(&mut self, number: u32) -> Result<()> {
        let index = self.slot_index(number)?;
        let slot = &self.info.slots()[index];
        self.fields[index] = if slot.pointer {
            None
        } else {
            Value::zero(slot.kind)
        };
        Ok(())
    }

    fn slot_index(&self, number: u32) -> Result<usize> {
        self.info.slot_index(number).ok_or_else(|| {
            Error::leaf(
                ErrorKind::Schema,
                format!("{} has no field {number}", self.info.full_name()),
            )
        })
    }

    /// Unset every other member of the oneof containing the field at `index`.
    pub(crate) fn clear_oneof_siblings(&mut self, index: usize) {
        let slots = self.info.slots();
        if let Some(oneof) = slots.get(index).and_then(|slot| slot.oneof) {
            for (sibling, slot) in slots.iter().enumerate() {
                if sibling != index && slot.oneof == Some(oneof) {
                    self.fields[sibling] = None;
                }
            }
        }
    }

    /// Raw bytes of unrecognized fields, or `None` if the type has no such slot.
    pub fn unknown_fields(&self) -> Option<&[u8]> {
        self.unknown.as_deref()
    }

    pub(crate) fn unknown_fields_mut(&mut self) -> Option<&mut Vec<u8>> {
        self.unknown.as_mut()
    }

    /// Replace the unknown-fields blob. Appended verbatim when marshaling.
    pub fn set_unknown_fields(&mut self, bytes: Vec<u8>) -> Result<()> {
        match &mut self.unknown {
            Some(unknown) => {
                *unknown = bytes;
                Ok(())
            }
            None => Err(Error::leaf(
                ErrorKind::Schema,
                format!("{} has no unknown-fields slot", self.info.full_name()),
            )),
        }
    }

    /// Attached extensions, or `None` if the type has no extension slot.
    pub fn extensions(&self) -> Option<&ExtensionMap> {
        self.extensions.as_ref()
    }

    pub(crate) fn extensions_mut(&mut self) -> Option<&mut ExtensionMap> {
        self.extensions.as_mut()
    }

    pub fn extension(&self, number: u32) -> Option<&ExtensionField> {
        self.extensions.as_ref()?.get(&number)
    }

    /// Attach (or replace) an extension value.
    pub fn set_extension(&mut self, ty: &Arc<ExtensionType>, value: Value) -> Result<()> {
        let descriptor = self.info.descriptor();
        if ty.extendee() != descriptor.full_name {
            return Err(Error::leaf(
                ErrorKind::Schema,
                format!("{} does not extend {}", ty.full_name(), descriptor.full_name),
            ));
        }
        if !descriptor.is_extension_number(ty.number()) {
            return Err(Error::leaf(
                ErrorKind::Schema,
                format!(
                    "{} is outside the extension ranges of {}",
                    ty.number(),
                    descriptor.full_name
                ),
            ));
        }
        match &mut self.extensions {
            Some(extensions) => {
                extensions.insert(ty.number(), ExtensionField::new(ty.clone(), value));
                Ok(())
            }
            None => Err(Error::leaf(
                ErrorKind::Schema,
                format!("{} has no extensions slot", descriptor.full_name),
            )),
        }
    }

    pub fn clear_extension(&mut self, number: u32) -> Option<ExtensionField> {
        self.extensions.as_mut()?.remove(&number)
    }

    /// The most recently computed size, if the type has a size cache and it was filled.
    pub fn cached_size(&self) -> Option<usize> {
        let size = self.size_cache.as_ref()?.load(Ordering::Relaxed);
        usize::try_from(size).ok()
    }

    /// Forget the cached size. Callers should do this after mutating a message
    /// they intend to marshal with [`use_cached_size`](MarshalOptions::use_cached_size).
    pub fn clear_cached_size(&self) {
        if let Some(cache) = &self.size_cache {
            cache.store(NO_CACHED_SIZE, Ordering::Relaxed);
        }
    }

    #[inline(always)]
    pub(crate) fn store_size(&self, size: usize) {
        if let Some(cache) = &self.size_cache {
            cache.store(
                i64::try_from(size).unwrap_or(NO_CACHED_SIZE),
                Ordering::Relaxed,
            );
        }
    }

    /// Encoded length of this message.
    pub fn size(&self, options: MarshalOptions) -> Result<usize> {
        Ok(self.info.size(Some(self), options)?)
    }

    /// Append the encoding of this message to `buf`.
    /// On error, bytes appended before the failure remain in `buf`.
    pub fn marshal(&self, buf: &mut BytesMut, options: MarshalOptions) -> Result<()> {
        self.info.marshal(buf, Some(self), options)
    }

    /// Size, then encode into an exactly-sized buffer.
    /// Nested lengths are taken from the size caches filled by the first pass.
    pub fn encode_to_vec(&self, options: MarshalOptions) -> Result<Vec<u8>> {
        let size = self.info.size(
            Some(self),
            MarshalOptions {
                use_cached_size: false,
                ..options
            },
        )?;
        let mut buf = BytesMut::with_capacity(size);
        self.info.marshal(
            &mut buf,
            Some(self),
            MarshalOptions {
                use_cached_size: true,
                ..options
            },
        )?;
        debug_assert_eq!(buf.len(), size);
        Ok(buf.to_vec())
    }

    /// Decode `src` and merge it into this message.
    pub fn merge_from(&mut self, src: &[u8]) -> Result<()> {
        let info = self.info.clone();
        info.merge(self, src)
    }

    /// Whether every required field is set, here and in nested messages.
    pub fn is_initialized(&self) -> Result<bool> {
        Ok(self.info.is_initialized(self)?)
    }
}

impl Clone for Message {
    fn clone(&self) -> Self {
        Self {
            info: self.info.clone(),
            fields: self.fields.clone(),
            size_cache: self
                .size_cache
                .as_ref()
                .map(|cache| AtomicI64::new(cache.load(Ordering::Relaxed))),
            unknown: self.unknown.clone(),
            extensions: self.extensions.clone(),
        }
    }
}

/// Equality of logical content: the size cache is ignored.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.info, &other.info)
            && self.fields == other.fields
            && self.unknown == other.unknown
            && self.extensions == other.extensions
    }
}

impl PartialEq for ExtensionField {
    fn eq(&self, other: &Self) -> bool {
        self.ty.full_name() == other.ty.full_name() && self.value == other.value
    }
}

impl Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let mut debug = f.debug_struct(self.info.full_name());
        for (slot, value) in self.info.slots().iter().zip(&self.fields) {
            if let Some(value) = value {
                debug.field(&slot.name, value);
            }
        }
        if let Some(extensions) = &self.extensions {
            for extension in extensions.values() {
                debug.field(extension.ty.full_name(), &extension.value);
            }
        }
        if let Some(unknown) = self.unknown.as_ref().filter(|u| !u.is_empty()) {
            debug.field("unknown_fields", unknown);
        }
        debug.finish()
    }
}

impl Debug for ExtensionField {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_tuple(self.ty.full_name()).field(&self.value).finish()
    }
}
