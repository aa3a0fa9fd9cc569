//! Legacy message-set wire format.
//!
//! A message set has no regular fields. Each extension is written as an item group:
//!
//! ```text
//! repeated group Item = 1 {
//!   required uint32 type_id = 2;  // extension field number
//!   required bytes message = 3;   // encoded extension value
//! }
//! ```
//!
//! Items are written in ascending order of type id, followed by the unknown bytes.

use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use prost::encoding::{encode_varint, encoded_len_varint, WireType};

use crate::decode::{decode_tag, read_length_delimited, read_varint, skip_field};
use crate::encode::in_number_order;
use crate::error::{DecodeError, EncodeError};
use crate::extension::ExtensionType;
use crate::message::{ExtensionField, Message, Value};
use crate::registry::MessageInfo;
use crate::{
    MarshalOptions, MESSAGE_SET_NON_MESSAGE, MESSAGE_TYPE_MISMATCH, NESTED_BUILD_FAILED,
    NESTING_TOO_DEEP, UNTERMINATED_GROUP,
};

const ITEM_NUMBER: u32 = 1;
const TYPE_ID_NUMBER: u32 = 2;
const MESSAGE_NUMBER: u32 = 3;

// All single-byte tags.
const ITEM_START: u8 = (ITEM_NUMBER << 3) as u8 | WireType::StartGroup as u8;
const ITEM_END: u8 = (ITEM_NUMBER << 3) as u8 | WireType::EndGroup as u8;
const TYPE_ID_TAG: u8 = (TYPE_ID_NUMBER << 3) as u8 | WireType::Varint as u8;
const MESSAGE_TAG: u8 = (MESSAGE_NUMBER << 3) as u8 | WireType::LengthDelimited as u8;

/// Item overhead besides the type id and message payload:
/// start and end tags, the type id tag and the message tag.
const ITEM_TAGS_SIZE: usize = 4;

/// The extension value as a message of its declared type.
fn item_message(extension: &ExtensionField) -> Result<(&MessageInfo, &Message), EncodeError> {
    let Value::Message(message) = extension.value() else {
        return Err(EncodeError::new(MESSAGE_SET_NON_MESSAGE));
    };
    match extension.ty().message_type() {
        Some(child) if message.is_instance_of(child) => Ok((child, message)),
        _ => Err(EncodeError::new(MESSAGE_TYPE_MISMATCH)),
    }
}

/// Encoded length of a message-set item, or zero for values that cannot be encoded.
fn item_size(number: u32, extension: &ExtensionField, options: MarshalOptions) -> usize {
    match item_message(extension) {
        Ok((child, message)) => {
            let n = child.size(Some(message), options).unwrap_or_default();
            ITEM_TAGS_SIZE + encoded_len_varint(number as u64) + encoded_len_varint(n as u64) + n
        }
        Err(_) => 0,
    }
}

/// Return the encoded length of a message set.
pub(crate) fn size(info: &MessageInfo, message: &Message, options: MarshalOptions) -> usize {
    let items: usize = message.extensions().map_or(0, |extensions| {
        extensions
            .iter()
            .map(|(&number, extension)| {
                // Populate the coder cache like regular extensions do.
                info.extension_coders.get(extension.ty());
                item_size(number, extension, options)
            })
            .sum()
    });
    items + message.unknown_fields().map_or(0, <[u8]>::len)
}

/// Append a message set, items first.
pub(crate) fn marshal(
    info: &MessageInfo,
    buf: &mut BytesMut,
    message: &Message,
    options: MarshalOptions,
) -> Result<(), EncodeError> {
    if let Some(extensions) = message.extensions() {
        in_number_order(extensions, |number, extension| {
            info.extension_coders.get(extension.ty());
            marshal_item(buf, number, extension, options).map_err(|e| e.with_field(number))
        })?;
    }
    if let Some(unknown) = message.unknown_fields() {
        buf.extend_from_slice(unknown);
    }
    Ok(())
}

fn marshal_item(
    buf: &mut BytesMut,
    number: u32,
    extension: &ExtensionField,
    options: MarshalOptions,
) -> Result<(), EncodeError> {
    let (child, message) = item_message(extension)?;
    let table = child
        .coder_table()
        .map_err(|_| EncodeError::new(NESTED_BUILD_FAILED))?;
    buf.put_u8(ITEM_START);
    buf.put_u8(TYPE_ID_TAG);
    encode_varint(number as u64, buf);
    buf.put_u8(MESSAGE_TAG);
    encode_varint(child.size(Some(message), options).unwrap_or_default() as u64, buf);
    child.marshal_fields(table, buf, message, options)?;
    buf.put_u8(ITEM_END);
    Ok(())
}

/// Decode a message set and merge it into `message`.
///
/// Items whose type id is a registered extension of this type are decoded into the extension map.
/// Anything else (including items of unknown type) is kept verbatim in the unknown bytes.
pub(crate) fn merge(
    info: &MessageInfo,
    message: &mut Message,
    buf: &mut &[u8],
    depth: u32,
) -> Result<(), DecodeError> {
    let registry = info.registry();
    while !buf.is_empty() {
        let start = *buf;
        let (number, wire_type) = decode_tag(buf)?;
        let item = if number == ITEM_NUMBER && wire_type == WireType::StartGroup {
            read_item(buf, depth)?
        } else {
            skip_field(number, wire_type, buf, depth)?;
            None
        };

        let extension = item.and_then(|(type_id, payload)| {
            let ty = registry.as_ref()?.find_extension(info.full_name(), type_id)?;
            Some((ty, payload))
        });
        match extension.filter(|_| message.extensions().is_some()) {
            Some((ty, payload)) => merge_item(message, &ty, payload, depth)?,
            None => {
                let consumed = start.len() - buf.len();
                if let Some(unknown) = message.unknown_fields_mut() {
                    unknown.extend_from_slice(&start[..consumed]);
                }
            }
        }
    }
    Ok(())
}

/// Merge one item's payload into the extension it names.
fn merge_item(
    message: &mut Message,
    ty: &Arc<ExtensionType>,
    mut payload: &[u8],
    depth: u32,
) -> Result<(), DecodeError> {
    let number = ty.number();
    let Some(child) = ty.message_type() else {
        return Err(DecodeError::new(MESSAGE_SET_NON_MESSAGE).with_field(number));
    };
    let Some(extensions) = message.extensions_mut() else {
        return Ok(());
    };
    let mut value = match extensions.remove(&number).map(ExtensionField::into_value) {
        Some(Value::Message(existing)) if existing.is_instance_of(child) => *existing,
        _ => Message::new(child),
    };
    let result = depth
        .checked_sub(1)
        .ok_or_else(|| DecodeError::new(NESTING_TOO_DEEP))
        .and_then(|depth| child.merge_bytes(&mut value, &mut payload, None, depth));
    extensions.insert(number, ExtensionField::new(ty.clone(), value.into()));
    result.map_err(|e| e.with_field(number))
}

/// Read the rest of an item group, after its start tag.
/// Returns the type id and message payload, if both are present.
fn read_item<'a>(
    buf: &mut &'a [u8],
    depth: u32,
) -> Result<Option<(u32, &'a [u8])>, DecodeError> {
    let mut type_id = None;
    let mut payload = None;
    loop {
        if buf.is_empty() {
            return Err(DecodeError::new(UNTERMINATED_GROUP));
        }
        let (number, wire_type) = decode_tag(buf)?;
        match (number, wire_type) {
            (ITEM_NUMBER, WireType::EndGroup) => break,
            (TYPE_ID_NUMBER, WireType::Varint) => type_id = Some(read_varint(buf)? as u32),
            (MESSAGE_NUMBER, WireType::LengthDelimited) => {
                payload = Some(read_length_delimited(buf)?)
            }
            _ => skip_field(number, wire_type, buf, depth)?,
        }
    }
    Ok(type_id.zip(payload))
}
