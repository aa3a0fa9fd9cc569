//! Table-driven encoder for the protobuf wire format.
//!
//! Each [registered](Registry::register) message type lazily builds a
//! [coder table](MessageCoderTable) the first time it is sized, marshaled or decoded.
//! The table maps every field to a tag, an accessor and a
//! triple of plain functions selected by the field's kind and coding,
//! so the hot paths never inspect the schema.
//!
//! ```text
//! size(message)     = extensions + fields (marshal order) + unknown bytes
//! marshal(message) := extensions (ascending) ++ fields (marshal order) ++ unknown bytes
//! ```
//!
//! The marshal order is ascending by field number,
//! except that members of (non-synthetic) oneofs come last,
//! grouped by oneof in declaration order.

#[macro_use]
mod logging;

mod coders;
mod decode;
mod encode;
mod error;
mod extension;
mod message;
mod messageset;
mod registry;
mod schema;
mod table;

use prost::encoding::WireType;

pub use coders::{Coding, FieldCoder};
pub use error::{BuildError, DecodeError, EncodeError, Error, ErrorKind, Result};
pub use extension::ExtensionType;
pub use message::{ExtensionField, ExtensionMap, Message, MessageLayout, Value};
pub use registry::{MessageInfo, Registry};
pub use schema::{
    Cardinality, ExtensionDescriptor, FieldDescriptor, Kind, MessageDescriptor, OneofDescriptor,
    Syntax, MAX_FIELD_NUMBER,
};
pub use table::{CoderFieldInfo, MessageCoderTable, DENSE_GROWTH, DENSE_MIN_NUMBER};

/// How deeply messages and groups may nest in decoded input,
/// counting unknown groups that are skipped over.
/// Matches the recursion limit of `prost`.
pub const MAX_NESTING_DEPTH: u32 = 100;

/// Per-call options for sizing and marshaling.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MarshalOptions {
    /// Trust sizes left in the size caches by a previous sizing pass,
    /// rather than traversing nested messages again.
    /// Only sound if nothing was mutated since.
    pub use_cached_size: bool,

    /// Request deterministic output.
    /// Output is always deterministic for a given message: extensions are sorted
    /// and there are no maps, so this only exists for interface compatibility.
    pub deterministic: bool,
}

/// Return the tag for a field number and wire type.
#[inline(always)]
pub(crate) fn tag(number: u32, wire_type: WireType) -> u64 {
    ((number as u64) << 3) | (wire_type as u64)
}

// Type mismatch error messages.
// These indicate that a field value does not match its declared kind.
const REPEATED_NON_LIST: &str = "Repeated field is not a list";
const BOOL_NON_BOOL: &str = "Bool field is not Bool";
const ENUM_NON_ENUM: &str = "Enum field is not Enum";
const INT32_NON_INT32: &str = "Int32 field is not I32";
const SINT32_NON_SINT32: &str = "Sint32 field is not I32";
const SFIXED32_NON_SFIXED32: &str = "Sfixed32 field is not I32";
const UINT32_NON_UINT32: &str = "Uint32 field is not U32";
const FIXED32_NON_FIXED32: &str = "Fixed32 field is not U32";
const INT64_NON_INT64: &str = "Int64 field is not I64";
const SINT64_NON_SINT64: &str = "Sint64 field is not I64";
const SFIXED64_NON_SFIXED64: &str = "Sfixed64 field is not I64";
const UINT64_NON_UINT64: &str = "Uint64 field is not U64";
const FIXED64_NON_FIXED64: &str = "Fixed64 field is not U64";
const FLOAT_NON_FLOAT: &str = "Float field is not F32";
const DOUBLE_NON_DOUBLE: &str = "Double field is not F64";
const STRING_NON_STRING: &str = "String field is not a string";
const BYTES_NON_BYTES: &str = "Bytes field is not bytes";
const MESSAGE_NON_MESSAGE: &str = "Message field is not a message";
const GROUP_NON_MESSAGE: &str = "Group field is not a message";
const MESSAGE_TYPE_MISMATCH: &str = "Message is of the wrong type";
const MESSAGE_SET_NON_MESSAGE: &str = "Message set item is not a message";

// Shared by encoding and decoding.
// Cannot happen for tables built through the registry, which vouches for nested types.
const NESTED_BUILD_FAILED: &str = "Nested message type has no coder table";

// Malformed input error messages.
const INVALID_VARINT: &str = "Invalid varint";
const INVALID_WIRE_TYPE: &str = "Invalid wire type";
const INVALID_FIELD_NUMBER: &str = "Invalid field number";
const TRUNCATED: &str = "Truncated input";
const WIRE_TYPE_MISMATCH: &str = "Unexpected wire type";
const UNEXPECTED_END_GROUP: &str = "Unexpected end of group";
const UNTERMINATED_GROUP: &str = "Unterminated group";
const INVALID_UTF8: &str = "String is not valid UTF-8";
const NESTING_TOO_DEEP: &str = "Exceeded maximum nesting depth";
