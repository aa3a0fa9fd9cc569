//! Per-kind coder functions.
//!
//! Every field is coded by a triple of plain function pointers
//! selected once, at table build time, by the field's [`Kind`] and [`Coding`].
//! The triple is stored by value in the table, so the hot path is a direct call.

pub(crate) mod compound;
pub(crate) mod scalar;

use std::sync::Arc;

use bytes::BytesMut;
use prost::encoding::{encoded_len_varint, WireType};

use crate::error::{DecodeError, EncodeError};
use crate::message::Value;
use crate::registry::MessageInfo;
use crate::schema::{FieldDescriptor, Kind};
use crate::{tag, MarshalOptions};

/// Return the encoded length of a field value, including its tag(s).
/// Never fails: a value of the wrong kind sizes to zero,
/// and the matching [`EncodeFn`] reports the mismatch.
pub(crate) type SizeFn = fn(&FieldCoder, &Value, MarshalOptions) -> usize;

/// Append a field value, including its tag(s), to the buffer.
pub(crate) type EncodeFn =
    fn(&FieldCoder, &Value, &mut BytesMut, MarshalOptions) -> Result<(), EncodeError>;

/// Decode one occurrence of a field (whose tag was just read) into its slot.
/// The last argument is how many more levels of nesting the input may open.
pub(crate) type DecodeFn =
    fn(&FieldCoder, WireType, &mut &[u8], &mut Option<Value>, u32) -> Result<(), DecodeError>;

/// The function triple for one `(kind, coding)` pair.
#[derive(Clone, Copy)]
pub(crate) struct CoderFuncs {
    /// Fields without a size function are skipped entirely by the sizer.
    pub(crate) size: Option<SizeFn>,
    pub(crate) encode: EncodeFn,
    pub(crate) decode: Option<DecodeFn>,
}

/// How a field's value is laid out, independently of its kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Coding {
    /// Singular, no presence: the zero value is not encoded.
    Implicit,
    /// Singular with presence: a set value is always encoded.
    Explicit,
    /// Repeated numeric, all values in one length-delimited record.
    Packed,
    /// Repeated, one record per value.
    Expanded,
}

/// Everything needed to size, encode and decode one field.
pub struct FieldCoder {
    pub(crate) funcs: CoderFuncs,
    pub(crate) kind: Kind,
    pub(crate) coding: Coding,

    /// Pre-encoded tag (number and wire type).
    pub(crate) wiretag: u64,

    /// Encoded length of [`wiretag`](Self::wiretag).
    pub(crate) tagsize: usize,

    /// Value type, for message and group fields.
    pub(crate) child: Option<Arc<MessageInfo>>,
}

impl Coding {
    pub(crate) fn of(field: &FieldDescriptor, has_presence: bool) -> Self {
        if field.is_packed() {
            Coding::Packed
        } else if field.is_repeated() {
            Coding::Expanded
        } else if has_presence {
            Coding::Explicit
        } else {
            Coding::Implicit
        }
    }
}

impl FieldCoder {
    pub(crate) fn new(
        number: u32,
        kind: Kind,
        coding: Coding,
        child: Option<Arc<MessageInfo>>,
    ) -> Self {
        let wire_type = match coding {
            Coding::Packed => WireType::LengthDelimited,
            _ => kind.wire_type(),
        };
        let wiretag = tag(number, wire_type);
        Self {
            funcs: coder_funcs(kind, coding),
            kind,
            coding,
            wiretag,
            tagsize: encoded_len_varint(wiretag),
            child,
        }
    }

    pub fn number(&self) -> u32 {
        (self.wiretag >> 3) as u32
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn coding(&self) -> Coding {
        self.coding
    }

    /// Wire type of the field's tag, which is length-delimited for packed fields.
    pub fn wire_type(&self) -> WireType {
        // The low three bits always hold a valid wire type; see `new`.
        WireType::try_from(self.wiretag & 7).unwrap_or(WireType::LengthDelimited)
    }

    pub fn tag_size(&self) -> usize {
        self.tagsize
    }

    /// Full name of the value type, for message and group fields.
    pub fn message_type(&self) -> Option<&str> {
        self.child.as_deref().map(MessageInfo::full_name)
    }

    #[inline(always)]
    pub(crate) fn size(&self, value: &Value, options: MarshalOptions) -> usize {
        self.funcs
            .size
            .map_or(0, |size| size(self, value, options))
    }

    #[inline(always)]
    pub(crate) fn encode(
        &self,
        value: &Value,
        buf: &mut BytesMut,
        options: MarshalOptions,
    ) -> Result<(), EncodeError> {
        (self.funcs.encode)(self, value, buf, options)
    }
}

/// Select the coder functions for a field.
pub(crate) fn coder_funcs(kind: Kind, coding: Coding) -> CoderFuncs {
    // Called once per field at build time, so an exhaustive match is fine.
    match kind {
        Kind::Bool => scalar::boolean::funcs(coding),
        Kind::Enum => scalar::enumeration::funcs(coding),
        Kind::Int32 => scalar::int32::funcs(coding),
        Kind::Sint32 => scalar::sint32::funcs(coding),
        Kind::Uint32 => scalar::uint32::funcs(coding),
        Kind::Int64 => scalar::int64::funcs(coding),
        Kind::Sint64 => scalar::sint64::funcs(coding),
        Kind::Uint64 => scalar::uint64::funcs(coding),
        Kind::Fixed32 => scalar::fixed32::funcs(coding),
        Kind::Sfixed32 => scalar::sfixed32::funcs(coding),
        Kind::Float => scalar::float::funcs(coding),
        Kind::Fixed64 => scalar::fixed64::funcs(coding),
        Kind::Sfixed64 => scalar::sfixed64::funcs(coding),
        Kind::Double => scalar::double::funcs(coding),
        Kind::String => scalar::string::funcs(coding),
        Kind::Bytes => scalar::binary::funcs(coding),
        Kind::Message => compound::message_funcs(coding),
        Kind::Group => compound::group_funcs(coding),
    }
}

/// Take the list out of a repeated field's slot, or start a new one.
pub(crate) fn take_list(slot: &mut Option<Value>) -> Vec<Value> {
    match slot.take() {
        Some(Value::List(items)) => items,
        _ => Vec::new(),
    }
}
