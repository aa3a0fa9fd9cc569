//! Coders for scalar fields (anything besides messages and groups).
//!
//! Each kind gets a module with the four codings' size and encode functions,
//! decoders for singular and repeated slots, and a `funcs` selector.

use bytes::{BufMut, BytesMut};
use prost::encoding::{encode_varint, encoded_len_varint, WireType};

use crate::coders::{take_list, CoderFuncs, Coding, FieldCoder};
use crate::decode::{check_wire_type, read_fixed32, read_fixed64, read_length_delimited, read_varint};
use crate::error::{DecodeError, EncodeError};
use crate::message::Value;
use crate::{
    MarshalOptions, BOOL_NON_BOOL, BYTES_NON_BYTES, DOUBLE_NON_DOUBLE, ENUM_NON_ENUM,
    FIXED32_NON_FIXED32, FIXED64_NON_FIXED64, FLOAT_NON_FLOAT, INT32_NON_INT32, INT64_NON_INT64,
    INVALID_UTF8, REPEATED_NON_LIST, SFIXED32_NON_SFIXED32, SFIXED64_NON_SFIXED64,
    SINT32_NON_SINT32, SINT64_NON_SINT64, STRING_NON_STRING, UINT32_NON_UINT32, UINT64_NON_UINT64,
};

/// Generate the coder module for one scalar kind.
///
/// - `$variant`: the [`Value`] variant holding values of this kind.
/// - `$wire_type`: the wire type of a single unpacked value.
/// - `$type_error`: reported when a field holds the wrong variant.
/// - `$is_default`, `$length`, `$encode`, `$decode`: per-value helpers.
macro_rules! scalar_coders {
    (
        $module:ident,
        $variant:path,
        $wire_type:expr,
        $type_error:ident,
        $is_default:ident,
        $length:ident,
        $encode:ident,
        $decode:ident $(,)?
    ) => {
        pub(crate) mod $module {
            use super::*;

            pub(crate) fn funcs(coding: Coding) -> CoderFuncs {
                match coding {
                    Coding::Implicit => CoderFuncs {
                        size: Some(implicit_size),
                        encode: implicit_encode,
                        decode: Some(decode_singular),
                    },
                    Coding::Explicit => CoderFuncs {
                        size: Some(explicit_size),
                        encode: explicit_encode,
                        decode: Some(decode_singular),
                    },
                    Coding::Packed => CoderFuncs {
                        size: Some(packed_size),
                        encode: packed_encode,
                        decode: Some(decode_repeated),
                    },
                    Coding::Expanded => CoderFuncs {
                        size: Some(expanded_size),
                        encode: expanded_encode,
                        decode: Some(decode_repeated),
                    },
                }
            }

            fn implicit_size(coder: &FieldCoder, value: &Value, _: MarshalOptions) -> usize {
                match value {
                    $variant(value) if !$is_default(value) => coder.tagsize + $length(value),
                    _ => 0,
                }
            }

            fn implicit_encode(
                coder: &FieldCoder,
                value: &Value,
                buf: &mut BytesMut,
                _: MarshalOptions,
            ) -> Result<(), EncodeError> {
                if let $variant(value) = value {
                    if !$is_default(value) {
                        encode_varint(coder.wiretag, buf);
                        $encode(value, buf);
                    }
                    Ok(())
                } else {
                    Err(EncodeError::new($type_error))
                }
            }

            fn explicit_size(coder: &FieldCoder, value: &Value, _: MarshalOptions) -> usize {
                match value {
                    $variant(value) => coder.tagsize + $length(value),
                    _ => 0,
                }
            }

            fn explicit_encode(
                coder: &FieldCoder,
                value: &Value,
                buf: &mut BytesMut,
                _: MarshalOptions,
            ) -> Result<(), EncodeError> {
                if let $variant(value) = value {
                    encode_varint(coder.wiretag, buf);
                    $encode(value, buf);
                    Ok(())
                } else {
                    Err(EncodeError::new($type_error))
                }
            }

            /// Length of the packed payload, without tag or length prefix.
            #[inline(always)]
            fn packed_payload(items: &[Value]) -> Result<usize, EncodeError> {
                let mut total = 0;
                for (i, item) in items.iter().enumerate() {
                    if let $variant(value) = item {
                        total += $length(value);
                    } else {
                        return Err(EncodeError::new($type_error).with_index(i));
                    }
                }
                Ok(total)
            }

            fn packed_size(coder: &FieldCoder, value: &Value, _: MarshalOptions) -> usize {
                match value {
                    Value::List(items) if !items.is_empty() => match packed_payload(items) {
                        Ok(payload) => coder.tagsize + encoded_len_varint(payload as u64) + payload,
                        Err(_) => 0,
                    },
                    _ => 0,
                }
            }

            fn packed_encode(
                coder: &FieldCoder,
                value: &Value,
                buf: &mut BytesMut,
                _: MarshalOptions,
            ) -> Result<(), EncodeError> {
                let Value::List(items) = value else {
                    return Err(EncodeError::new(REPEATED_NON_LIST));
                };
                // An empty packed field is omitted entirely.
                if items.is_empty() {
                    return Ok(());
                }
                let payload = packed_payload(items)?;
                encode_varint(coder.wiretag, buf);
                encode_varint(payload as u64, buf);
                for item in items {
                    if let $variant(value) = item {
                        $encode(value, buf);
                    }
                }
                Ok(())
            }

            fn expanded_size(coder: &FieldCoder, value: &Value, _: MarshalOptions) -> usize {
                match value {
                    Value::List(items) => items
                        .iter()
                        .map(|item| match item {
                            $variant(value) => coder.tagsize + $length(value),
                            _ => 0,
                        })
                        .sum(),
                    _ => 0,
                }
            }

            fn expanded_encode(
                coder: &FieldCoder,
                value: &Value,
                buf: &mut BytesMut,
                _: MarshalOptions,
            ) -> Result<(), EncodeError> {
                let Value::List(items) = value else {
                    return Err(EncodeError::new(REPEATED_NON_LIST));
                };
                for (i, item) in items.iter().enumerate() {
                    if let $variant(value) = item {
                        encode_varint(coder.wiretag, buf);
                        $encode(value, buf);
                    } else {
                        return Err(EncodeError::new($type_error).with_index(i));
                    }
                }
                Ok(())
            }

            fn decode_singular(
                _coder: &FieldCoder,
                wire_type: WireType,
                buf: &mut &[u8],
                slot: &mut Option<Value>,
                _depth: u32,
            ) -> Result<(), DecodeError> {
                check_wire_type($wire_type, wire_type)?;
                *slot = Some($variant($decode(buf)?));
                Ok(())
            }

            /// Accept both packed and expanded input, for packable kinds.
            fn decode_repeated(
                _coder: &FieldCoder,
                wire_type: WireType,
                buf: &mut &[u8],
                slot: &mut Option<Value>,
                _depth: u32,
            ) -> Result<(), DecodeError> {
                let mut items = take_list(slot);
                let result = if wire_type == WireType::LengthDelimited
                    && $wire_type != WireType::LengthDelimited
                {
                    read_length_delimited(buf).and_then(|mut packed| {
                        while !packed.is_empty() {
                            let i = items.len();
                            items.push($variant($decode(&mut packed).map_err(|e| e.with_index(i))?));
                        }
                        Ok(())
                    })
                } else {
                    check_wire_type($wire_type, wire_type)
                        .and_then(|()| $decode(buf))
                        .map(|value| items.push($variant(value)))
                };
                *slot = Some(Value::List(items));
                result
            }
        }
    };
}

#[inline(always)]
fn bool_encode(value: &bool, buf: &mut BytesMut) {
    buf.put_u8(*value as u8);
}
#[inline(always)]
fn bool_length(_: &bool) -> usize {
    1
}
#[inline(always)]
fn bool_default(value: &bool) -> bool {
    !*value // False is the default; return true if false.
}
#[inline(always)]
fn bool_decode(buf: &mut &[u8]) -> Result<bool, DecodeError> {
    Ok(read_varint(buf)? != 0)
}
scalar_coders!(
    boolean,
    Value::Bool,
    WireType::Varint,
    BOOL_NON_BOOL,
    bool_default,
    bool_length,
    bool_encode,
    bool_decode,
);

// Negative int32 values are sign-extended to ten bytes.
#[inline(always)]
fn int32_encode(value: &i32, buf: &mut BytesMut) {
    encode_varint(*value as i64 as u64, buf);
}
#[inline(always)]
fn int32_length(value: &i32) -> usize {
    encoded_len_varint(*value as i64 as u64)
}
#[inline(always)]
fn int32_default(value: &i32) -> bool {
    *value == 0
}
#[inline(always)]
fn int32_decode(buf: &mut &[u8]) -> Result<i32, DecodeError> {
    Ok(read_varint(buf)? as i32)
}
scalar_coders!(
    int32,
    Value::I32,
    WireType::Varint,
    INT32_NON_INT32,
    int32_default,
    int32_length,
    int32_encode,
    int32_decode,
);
scalar_coders!(
    enumeration,
    Value::Enum,
    WireType::Varint,
    ENUM_NON_ENUM,
    int32_default,
    int32_length,
    int32_encode,
    int32_decode,
);

#[inline(always)]
fn zigzag32(value: i32) -> u64 {
    ((value << 1) ^ (value >> 31)) as u32 as u64
}
#[inline(always)]
fn sint32_encode(value: &i32, buf: &mut BytesMut) {
    encode_varint(zigzag32(*value), buf);
}
#[inline(always)]
fn sint32_length(value: &i32) -> usize {
    encoded_len_varint(zigzag32(*value))
}
#[inline(always)]
fn sint32_decode(buf: &mut &[u8]) -> Result<i32, DecodeError> {
    let n = read_varint(buf)? as u32;
    Ok(((n >> 1) as i32) ^ -((n & 1) as i32))
}
scalar_coders!(
    sint32,
    Value::I32,
    WireType::Varint,
    SINT32_NON_SINT32,
    int32_default,
    sint32_length,
    sint32_encode,
    sint32_decode,
);

#[inline(always)]
fn sfixed32_encode(value: &i32, buf: &mut BytesMut) {
    buf.put_i32_le(*value);
}
#[inline(always)]
fn fixed32_length<T>(_: &T) -> usize {
    4
}
#[inline(always)]
fn sfixed32_decode(buf: &mut &[u8]) -> Result<i32, DecodeError> {
    Ok(read_fixed32(buf)? as i32)
}
scalar_coders!(
    sfixed32,
    Value::I32,
    WireType::ThirtyTwoBit,
    SFIXED32_NON_SFIXED32,
    int32_default,
    fixed32_length,
    sfixed32_encode,
    sfixed32_decode,
);

#[inline(always)]
fn uint32_encode(value: &u32, buf: &mut BytesMut) {
    encode_varint(*value as u64, buf);
}
#[inline(always)]
fn uint32_length(value: &u32) -> usize {
    encoded_len_varint(*value as u64)
}
#[inline(always)]
fn uint32_default(value: &u32) -> bool {
    *value == 0
}
#[inline(always)]
fn uint32_decode(buf: &mut &[u8]) -> Result<u32, DecodeError> {
    Ok(read_varint(buf)? as u32)
}
scalar_coders!(
    uint32,
    Value::U32,
    WireType::Varint,
    UINT32_NON_UINT32,
    uint32_default,
    uint32_length,
    uint32_encode,
    uint32_decode,
);

#[inline(always)]
fn fixed32_encode(value: &u32, buf: &mut BytesMut) {
    buf.put_u32_le(*value);
}
scalar_coders!(
    fixed32,
    Value::U32,
    WireType::ThirtyTwoBit,
    FIXED32_NON_FIXED32,
    uint32_default,
    fixed32_length,
    fixed32_encode,
    read_fixed32,
);

#[inline(always)]
fn int64_encode(value: &i64, buf: &mut BytesMut) {
    encode_varint(*value as u64, buf);
}
#[inline(always)]
fn int64_length(value: &i64) -> usize {
    encoded_len_varint(*value as u64)
}
#[inline(always)]
fn int64_default(value: &i64) -> bool {
    *value == 0
}
#[inline(always)]
fn int64_decode(buf: &mut &[u8]) -> Result<i64, DecodeError> {
    Ok(read_varint(buf)? as i64)
}
scalar_coders!(
    int64,
    Value::I64,
    WireType::Varint,
    INT64_NON_INT64,
    int64_default,
    int64_length,
    int64_encode,
    int64_decode,
);

#[inline(always)]
fn zigzag64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}
#[inline(always)]
fn sint64_encode(value: &i64, buf: &mut BytesMut) {
    encode_varint(zigzag64(*value), buf);
}
#[inline(always)]
fn sint64_length(value: &i64) -> usize {
    encoded_len_varint(zigzag64(*value))
}
#[inline(always)]
fn sint64_decode(buf: &mut &[u8]) -> Result<i64, DecodeError> {
    let n = read_varint(buf)?;
    Ok(((n >> 1) as i64) ^ -((n & 1) as i64))
}
scalar_coders!(
    sint64,
    Value::I64,
    WireType::Varint,
    SINT64_NON_SINT64,
    int64_default,
    sint64_length,
    sint64_encode,
    sint64_decode,
);

#[inline(always)]
fn sfixed64_encode(value: &i64, buf: &mut BytesMut) {
    buf.put_i64_le(*value);
}
#[inline(always)]
fn fixed64_length<T>(_: &T) -> usize {
    8
}
#[inline(always)]
fn sfixed64_decode(buf: &mut &[u8]) -> Result<i64, DecodeError> {
    Ok(read_fixed64(buf)? as i64)
}
scalar_coders!(
    sfixed64,
    Value::I64,
    WireType::SixtyFourBit,
    SFIXED64_NON_SFIXED64,
    int64_default,
    fixed64_length,
    sfixed64_encode,
    sfixed64_decode,
);

#[inline(always)]
fn uint64_encode(value: &u64, buf: &mut BytesMut) {
    encode_varint(*value, buf);
}
#[inline(always)]
fn uint64_length(value: &u64) -> usize {
    encoded_len_varint(*value)
}
#[inline(always)]
fn uint64_default(value: &u64) -> bool {
    *value == 0
}
scalar_coders!(
    uint64,
    Value::U64,
    WireType::Varint,
    UINT64_NON_UINT64,
    uint64_default,
    uint64_length,
    uint64_encode,
    read_varint,
);

#[inline(always)]
fn fixed64_encode(value: &u64, buf: &mut BytesMut) {
    buf.put_u64_le(*value);
}
scalar_coders!(
    fixed64,
    Value::U64,
    WireType::SixtyFourBit,
    FIXED64_NON_FIXED64,
    uint64_default,
    fixed64_length,
    fixed64_encode,
    read_fixed64,
);

#[inline(always)]
fn float_encode(value: &f32, buf: &mut BytesMut) {
    buf.put_f32_le(*value);
}
// Only positive zero is the default: negative zero is encoded.
#[inline(always)]
fn float_default(value: &f32) -> bool {
    value.to_bits() == 0
}
#[inline(always)]
fn float_decode(buf: &mut &[u8]) -> Result<f32, DecodeError> {
    Ok(f32::from_bits(read_fixed32(buf)?))
}
scalar_coders!(
    float,
    Value::F32,
    WireType::ThirtyTwoBit,
    FLOAT_NON_FLOAT,
    float_default,
    fixed32_length,
    float_encode,
    float_decode,
);

#[inline(always)]
fn double_encode(value: &f64, buf: &mut BytesMut) {
    buf.put_f64_le(*value);
}
#[inline(always)]
fn double_default(value: &f64) -> bool {
    value.to_bits() == 0
}
#[inline(always)]
fn double_decode(buf: &mut &[u8]) -> Result<f64, DecodeError> {
    Ok(f64::from_bits(read_fixed64(buf)?))
}
scalar_coders!(
    double,
    Value::F64,
    WireType::SixtyFourBit,
    DOUBLE_NON_DOUBLE,
    double_default,
    fixed64_length,
    double_encode,
    double_decode,
);

#[inline(always)]
fn string_encode(value: &String, buf: &mut BytesMut) {
    encode_varint(value.len() as u64, buf);
    buf.put_slice(value.as_bytes());
}
#[inline(always)]
fn string_length(value: &String) -> usize {
    encoded_len_varint(value.len() as u64) + value.len()
}
#[inline(always)]
fn string_default(value: &String) -> bool {
    value.is_empty()
}
#[inline(always)]
fn string_decode(buf: &mut &[u8]) -> Result<String, DecodeError> {
    let bytes = read_length_delimited(buf)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::new(INVALID_UTF8))
}
scalar_coders!(
    string,
    Value::String,
    WireType::LengthDelimited,
    STRING_NON_STRING,
    string_default,
    string_length,
    string_encode,
    string_decode,
);

#[inline(always)]
fn bytes_encode(value: &Vec<u8>, buf: &mut BytesMut) {
    encode_varint(value.len() as u64, buf);
    buf.put_slice(value);
}
#[inline(always)]
fn bytes_length(value: &Vec<u8>) -> usize {
    encoded_len_varint(value.len() as u64) + value.len()
}
#[inline(always)]
fn bytes_default(value: &Vec<u8>) -> bool {
    value.is_empty()
}
#[inline(always)]
fn bytes_decode(buf: &mut &[u8]) -> Result<Vec<u8>, DecodeError> {
    Ok(read_length_delimited(buf)?.to_vec())
}
scalar_coders!(
    binary,
    Value::Bytes,
    WireType::LengthDelimited,
    BYTES_NON_BYTES,
    bytes_default,
    bytes_length,
    bytes_encode,
    bytes_decode,
);
