//! Coders for message and group fields.
//!
//! A nested message's length prefix comes from the child's sizer,
//! which reuses the child's size cache when [`MarshalOptions::use_cached_size`] is set.

use std::sync::Arc;

use bytes::BytesMut;
use prost::encoding::{encode_varint, encoded_len_varint, WireType};

use crate::coders::{take_list, CoderFuncs, Coding, FieldCoder};
use crate::decode::{check_wire_type, read_length_delimited};
use crate::error::{DecodeError, EncodeError};
use crate::message::{Message, Value};
use crate::registry::MessageInfo;
use crate::{
    MarshalOptions, GROUP_NON_MESSAGE, MESSAGE_NON_MESSAGE, MESSAGE_TYPE_MISMATCH,
    NESTED_BUILD_FAILED, NESTING_TOO_DEEP, REPEATED_NON_LIST,
};

pub(crate) fn message_funcs(coding: Coding) -> CoderFuncs {
    match coding {
        Coding::Packed | Coding::Expanded => CoderFuncs {
            size: Some(message_repeated_size),
            encode: message_repeated_encode,
            decode: Some(message_repeated_decode),
        },
        Coding::Implicit | Coding::Explicit => CoderFuncs {
            size: Some(message_size),
            encode: message_encode,
            decode: Some(message_decode),
        },
    }
}

pub(crate) fn group_funcs(coding: Coding) -> CoderFuncs {
    match coding {
        Coding::Packed | Coding::Expanded => CoderFuncs {
            size: Some(group_repeated_size),
            encode: group_repeated_encode,
            decode: Some(message_repeated_decode),
        },
        Coding::Implicit | Coding::Explicit => CoderFuncs {
            size: Some(group_size),
            encode: group_encode,
            decode: Some(message_decode),
        },
    }
}

/// The nested type and instance, if `value` is a message of the field's type.
#[inline(always)]
fn nested<'a>(coder: &'a FieldCoder, value: &'a Value) -> Option<(&'a MessageInfo, &'a Message)> {
    let child = coder.child.as_deref()?;
    match value {
        Value::Message(message) if message.is_instance_of(child) => Some((child, message)),
        _ => None,
    }
}

/// Like [`nested`], but explains why not.
#[inline(always)]
fn nested_or_err<'a>(
    coder: &'a FieldCoder,
    value: &'a Value,
    non_message: &'static str,
) -> Result<(&'a MessageInfo, &'a Message), EncodeError> {
    match value {
        Value::Message(_) => {
            nested(coder, value).ok_or_else(|| EncodeError::new(MESSAGE_TYPE_MISMATCH))
        }
        _ => Err(EncodeError::new(non_message)),
    }
}

/// Size of the nested message's contents, without tags or length prefix.
#[inline(always)]
fn body_size(child: &MessageInfo, message: &Message, options: MarshalOptions) -> usize {
    // Nested types are validated when the parent's table is built.
    child.size(Some(message), options).unwrap_or_default()
}

#[inline(always)]
fn body_encode(
    child: &MessageInfo,
    message: &Message,
    buf: &mut BytesMut,
    options: MarshalOptions,
) -> Result<(), EncodeError> {
    let table = child
        .coder_table()
        .map_err(|_| EncodeError::new(NESTED_BUILD_FAILED))?;
    child.marshal_fields(table, buf, message, options)
}

fn message_size(coder: &FieldCoder, value: &Value, options: MarshalOptions) -> usize {
    match nested(coder, value) {
        Some((child, message)) => {
            let n = body_size(child, message, options);
            coder.tagsize + encoded_len_varint(n as u64) + n
        }
        None => 0,
    }
}

fn message_encode(
    coder: &FieldCoder,
    value: &Value,
    buf: &mut BytesMut,
    options: MarshalOptions,
) -> Result<(), EncodeError> {
    let (child, message) = nested_or_err(coder, value, MESSAGE_NON_MESSAGE)?;
    encode_varint(coder.wiretag, buf);
    encode_varint(body_size(child, message, options) as u64, buf);
    body_encode(child, message, buf, options)
}

fn message_repeated_size(coder: &FieldCoder, value: &Value, options: MarshalOptions) -> usize {
    match value {
        Value::List(items) => items
            .iter()
            .map(|item| message_size(coder, item, options))
            .sum(),
        _ => 0,
    }
}

fn message_repeated_encode(
    coder: &FieldCoder,
    value: &Value,
    buf: &mut BytesMut,
    options: MarshalOptions,
) -> Result<(), EncodeError> {
    let Value::List(items) = value else {
        return Err(EncodeError::new(REPEATED_NON_LIST));
    };
    for (i, item) in items.iter().enumerate() {
        message_encode(coder, item, buf, options).map_err(|e| e.with_index(i))?;
    }
    Ok(())
}

/// End-group tag matching a start-group `wiretag`.
#[inline(always)]
fn end_tag(wiretag: u64) -> u64 {
    (wiretag & !7) | WireType::EndGroup as u64
}

fn group_size(coder: &FieldCoder, value: &Value, options: MarshalOptions) -> usize {
    match nested(coder, value) {
        Some((child, message)) => 2 * coder.tagsize + body_size(child, message, options),
        None => 0,
    }
}

fn group_encode(
    coder: &FieldCoder,
    value: &Value,
    buf: &mut BytesMut,
    options: MarshalOptions,
) -> Result<(), EncodeError> {
    let (child, message) = nested_or_err(coder, value, GROUP_NON_MESSAGE)?;
    encode_varint(coder.wiretag, buf);
    body_encode(child, message, buf, options)?;
    encode_varint(end_tag(coder.wiretag), buf);
    Ok(())
}

fn group_repeated_size(coder: &FieldCoder, value: &Value, options: MarshalOptions) -> usize {
    match value {
        Value::List(items) => items
            .iter()
            .map(|item| group_size(coder, item, options))
            .sum(),
        _ => 0,
    }
}

fn group_repeated_encode(
    coder: &FieldCoder,
    value: &Value,
    buf: &mut BytesMut,
    options: MarshalOptions,
) -> Result<(), EncodeError> {
    let Value::List(items) = value else {
        return Err(EncodeError::new(REPEATED_NON_LIST));
    };
    for (i, item) in items.iter().enumerate() {
        group_encode(coder, item, buf, options).map_err(|e| e.with_index(i))?;
    }
    Ok(())
}

/// The existing message in a singular slot (to merge into), or a new one.
fn take_message(child: &Arc<MessageInfo>, slot: &mut Option<Value>) -> Message {
    match slot.take() {
        Some(Value::Message(message)) if message.is_instance_of(child) => *message,
        _ => Message::new(child),
    }
}

fn nested_decode(
    coder: &FieldCoder,
    wire_type: WireType,
    buf: &mut &[u8],
    message: &mut Message,
    depth: u32,
) -> Result<(), DecodeError> {
    let Some(child) = coder.child.as_deref() else {
        return Err(DecodeError::new(NESTED_BUILD_FAILED));
    };
    check_wire_type(coder.kind.wire_type(), wire_type)?;
    let depth = depth
        .checked_sub(1)
        .ok_or_else(|| DecodeError::new(NESTING_TOO_DEEP))?;
    match wire_type {
        WireType::StartGroup => child.merge_bytes(message, buf, Some(coder.number()), depth),
        _ => {
            let mut body = read_length_delimited(buf)?;
            child.merge_bytes(message, &mut body, None, depth)
        }
    }
}

/// Decodes group fields too; `nested_decode` dispatches on the wire type.
fn message_decode(
    coder: &FieldCoder,
    wire_type: WireType,
    buf: &mut &[u8],
    slot: &mut Option<Value>,
    depth: u32,
) -> Result<(), DecodeError> {
    let Some(child) = coder.child.as_ref() else {
        return Err(DecodeError::new(NESTED_BUILD_FAILED));
    };
    let mut message = take_message(child, slot);
    let result = nested_decode(coder, wire_type, buf, &mut message, depth);
    *slot = Some(message.into());
    result
}

fn message_repeated_decode(
    coder: &FieldCoder,
    wire_type: WireType,
    buf: &mut &[u8],
    slot: &mut Option<Value>,
    depth: u32,
) -> Result<(), DecodeError> {
    let Some(child) = coder.child.as_ref() else {
        return Err(DecodeError::new(NESTED_BUILD_FAILED));
    };
    let mut items = take_list(slot);
    let mut message = Message::new(child);
    let result = nested_decode(coder, wire_type, buf, &mut message, depth)
        .map_err(|e| e.with_index(items.len()));
    items.push(message.into());
    *slot = Some(Value::List(items));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_tag_matches_start_tag() {
        // Field 2, start group: (2 << 3) | 3.
        assert_eq!(end_tag(0x13), 0x14);
        // Field 1 of a message-set item.
        assert_eq!(end_tag(0x0B), 0x0C);
    }
}
