//! Decoding, the inverse of [marshaling](crate::encode).
//!
//! Dispatch goes through the same coder tables as encoding.
//! Fields this type does not know (or whose wire type does not fit)
//! are kept verbatim in the unknown bytes, if the type has that slot.

use std::sync::Arc;

use bytes::Buf;
use prost::encoding::{decode_varint, WireType};

use crate::coders::{Coding, FieldCoder};
use crate::error::{DecodeError, Error, ErrorKind, Result};
use crate::extension::ExtensionType;
use crate::message::{ExtensionField, Message};
use crate::messageset;
use crate::registry::MessageInfo;
use crate::schema::MAX_FIELD_NUMBER;
use crate::table::MessageCoderTable;
use crate::{
    INVALID_FIELD_NUMBER, INVALID_VARINT, INVALID_WIRE_TYPE, MAX_NESTING_DEPTH,
    NESTED_BUILD_FAILED, NESTING_TOO_DEEP, TRUNCATED, UNEXPECTED_END_GROUP, UNTERMINATED_GROUP,
    WIRE_TYPE_MISMATCH,
};

impl MessageInfo {
    /// Decode a new instance of this type.
    pub fn decode(self: &Arc<Self>, src: &[u8]) -> Result<Message> {
        let mut message = Message::new(self);
        self.merge(&mut message, src)?;
        Ok(message)
    }

    /// Decode `src` and merge it into `message`, an instance of this type.
    ///
    /// Singular fields are overwritten (messages are merged recursively),
    /// repeated fields are appended to, and unknown fields are appended.
    /// On error, fields decoded before the failure remain merged.
    /// Input nesting messages or groups more than [`MAX_NESTING_DEPTH`] deep is rejected.
    pub fn merge(&self, message: &mut Message, mut src: &[u8]) -> Result<()> {
        if !message.is_instance_of(self) {
            return Err(Error::leaf(
                ErrorKind::Schema,
                format!(
                    "Cannot merge {} into {}",
                    self.full_name(),
                    message.info().full_name()
                ),
            ));
        }
        let table = self.coder_table()?;
        Ok(self.merge_with(table, message, &mut src, None, MAX_NESTING_DEPTH)?)
    }

    /// Merge a nested message or group, whose fields may nest `depth` levels further.
    pub(crate) fn merge_bytes(
        &self,
        message: &mut Message,
        buf: &mut &[u8],
        group_end: Option<u32>,
        depth: u32,
    ) -> std::result::Result<(), DecodeError> {
        let table = self
            .coder_table()
            .map_err(|_| DecodeError::new(NESTED_BUILD_FAILED))?;
        self.merge_with(table, message, buf, group_end, depth)
    }

    /// Decode fields until the input is exhausted or,
    /// inside a group, until the end-group tag numbered `group_end`.
    fn merge_with(
        &self,
        table: &MessageCoderTable,
        message: &mut Message,
        buf: &mut &[u8],
        group_end: Option<u32>,
        depth: u32,
    ) -> std::result::Result<(), DecodeError> {
        // Whatever was cached no longer describes the message.
        message.clear_cached_size();
        if table.is_message_set() && group_end.is_none() {
            return messageset::merge(self, message, buf, depth);
        }

        while !buf.is_empty() {
            let start = *buf;
            let (number, wire_type) = decode_tag(buf)?;
            if wire_type == WireType::EndGroup {
                return match group_end {
                    Some(end) if end == number => Ok(()),
                    _ => Err(DecodeError::new(UNEXPECTED_END_GROUP).with_field(number)),
                };
            }

            if let Some(field) = table.field(number) {
                let coder = field.coder();
                if let (Some(decode), true) = (coder.funcs.decode, accepts(coder, wire_type)) {
                    let accessor = field.accessor();
                    if let Some(slot) = accessor.slot_mut(message) {
                        decode(coder, wire_type, buf, slot, depth)
                            .map_err(|e| e.with_field(number))?;
                        message.clear_oneof_siblings(accessor.index());
                        continue;
                    }
                }
            } else if let Some(ty) = self.find_extension(message, number) {
                if self.merge_extension(message, &ty, wire_type, buf, depth)? {
                    continue;
                }
            }

            skip_field(number, wire_type, buf, depth)?;
            let consumed = start.len() - buf.len();
            if let Some(unknown) = message.unknown_fields_mut() {
                unknown.extend_from_slice(&start[..consumed]);
            }
        }

        match group_end {
            Some(number) => Err(DecodeError::new(UNTERMINATED_GROUP).with_field(number)),
            None => Ok(()),
        }
    }

    /// A registered extension of this type numbered `number`,
    /// if `message` can hold extensions.
    fn find_extension(&self, message: &Message, number: u32) -> Option<Arc<ExtensionType>> {
        if message.extensions().is_none() || !self.descriptor().is_extension_number(number) {
            return None;
        }
        self.registry()?.find_extension(self.full_name(), number)
    }

    /// Decode one occurrence of an extension field.
    /// Returns false (consuming nothing) if the wire type does not fit.
    fn merge_extension(
        &self,
        message: &mut Message,
        ty: &Arc<ExtensionType>,
        wire_type: WireType,
        buf: &mut &[u8],
        depth: u32,
    ) -> std::result::Result<bool, DecodeError> {
        let info = self.extension_coders.get(ty);
        let coder = &info.coder;
        let (Some(decode), true) = (coder.funcs.decode, accepts(coder, wire_type)) else {
            return Ok(false);
        };
        let Some(extensions) = message.extensions_mut() else {
            return Ok(false);
        };
        let number = ty.number();
        let mut slot = extensions.remove(&number).map(ExtensionField::into_value);
        let result = decode(coder, wire_type, buf, &mut slot, depth);
        if let Some(value) = slot {
            extensions.insert(number, ExtensionField::new(ty.clone(), value));
        }
        result.map(|()| true).map_err(|e| e.with_field(number))
    }
}

/// Whether a field coded by `coder` can decode a record of `wire_type`.
/// Repeated numeric fields accept both packed and expanded records.
fn accepts(coder: &FieldCoder, wire_type: WireType) -> bool {
    wire_type == coder.kind.wire_type()
        || (matches!(coder.coding, Coding::Packed | Coding::Expanded)
            && coder.kind.is_packable()
            && wire_type == WireType::LengthDelimited)
}

#[inline(always)]
pub(crate) fn read_varint(buf: &mut &[u8]) -> std::result::Result<u64, DecodeError> {
    decode_varint(buf).map_err(|_| DecodeError::new(INVALID_VARINT))
}

#[inline(always)]
pub(crate) fn read_fixed32(buf: &mut &[u8]) -> std::result::Result<u32, DecodeError> {
    if buf.remaining() < 4 {
        return Err(DecodeError::new(TRUNCATED));
    }
    Ok(buf.get_u32_le())
}

#[inline(always)]
pub(crate) fn read_fixed64(buf: &mut &[u8]) -> std::result::Result<u64, DecodeError> {
    if buf.remaining() < 8 {
        return Err(DecodeError::new(TRUNCATED));
    }
    Ok(buf.get_u64_le())
}

/// Read a length prefix and return that many bytes.
#[inline(always)]
pub(crate) fn read_length_delimited<'a>(
    buf: &mut &'a [u8],
) -> std::result::Result<&'a [u8], DecodeError> {
    let length = read_varint(buf)?;
    let length = usize::try_from(length)
        .ok()
        .filter(|&length| length <= buf.len())
        .ok_or_else(|| DecodeError::new(TRUNCATED))?;
    let slice: &'a [u8] = *buf;
    let (head, tail) = slice.split_at(length);
    *buf = tail;
    Ok(head)
}

/// Read a field's tag, returning its number and wire type.
#[inline(always)]
pub(crate) fn decode_tag(buf: &mut &[u8]) -> std::result::Result<(u32, WireType), DecodeError> {
    let key = read_varint(buf)?;
    let wire_type = WireType::try_from(key & 7).map_err(|_| DecodeError::new(INVALID_WIRE_TYPE))?;
    let number = u32::try_from(key >> 3)
        .ok()
        .filter(|&number| number != 0 && number <= MAX_FIELD_NUMBER)
        .ok_or_else(|| DecodeError::new(INVALID_FIELD_NUMBER))?;
    Ok((number, wire_type))
}

#[inline(always)]
pub(crate) fn check_wire_type(
    expected: WireType,
    actual: WireType,
) -> std::result::Result<(), DecodeError> {
    if expected == actual {
        Ok(())
    } else {
        Err(DecodeError::new(WIRE_TYPE_MISMATCH))
    }
}

/// Skip over a field's value, whose tag was just read.
/// A group counts as one level of nesting against `depth`.
pub(crate) fn skip_field(
    number: u32,
    wire_type: WireType,
    buf: &mut &[u8],
    depth: u32,
) -> std::result::Result<(), DecodeError> {
    match wire_type {
        WireType::Varint => {
            read_varint(buf)?;
        }
        WireType::SixtyFourBit => {
            read_fixed64(buf)?;
        }
        WireType::ThirtyTwoBit => {
            read_fixed32(buf)?;
        }
        WireType::LengthDelimited => {
            read_length_delimited(buf)?;
        }
        WireType::StartGroup => {
            let depth = depth
                .checked_sub(1)
                .ok_or_else(|| DecodeError::new(NESTING_TOO_DEEP).with_field(number))?;
            loop {
                if buf.is_empty() {
                    return Err(DecodeError::new(UNTERMINATED_GROUP).with_field(number));
                }
                let (inner, inner_wire_type) = decode_tag(buf)?;
                if inner_wire_type == WireType::EndGroup {
                    if inner == number {
                        break;
                    }
                    return Err(DecodeError::new(UNEXPECTED_END_GROUP).with_field(inner));
                }
                skip_field(inner, inner_wire_type, buf, depth)
                    .map_err(|e| e.with_field(number))?;
            }
        }
        WireType::EndGroup => {
            return Err(DecodeError::new(UNEXPECTED_END_GROUP).with_field(number));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags() {
        let mut buf = &[0x08, 0x96, 0x01][..];
        assert!(matches!(decode_tag(&mut buf), Ok((1, WireType::Varint))));
        assert_eq!(read_varint(&mut buf).unwrap(), 150);
        assert!(buf.is_empty());

        // Field number zero.
        assert!(decode_tag(&mut &[0x02][..]).is_err());
        // Wire type 6 does not exist.
        assert!(decode_tag(&mut &[0x0E][..]).is_err());
    }

    #[test]
    fn truncated_input() {
        assert!(read_fixed32(&mut &[1, 2, 3][..]).is_err());
        assert!(read_fixed64(&mut &[1, 2, 3, 4, 5, 6, 7][..]).is_err());
        assert!(read_length_delimited(&mut &[0x05, 1, 2][..]).is_err());
        assert!(read_varint(&mut &[0x80][..]).is_err());
    }

    #[test]
    fn skip_nested_groups() {
        // Group 2 { varint 1, group 3 { fixed32 4 }, bytes 5 } then trailing 0xFF.
        let bytes = [
            0x13, 0x08, 0x01, 0x1B, 0x25, 1, 2, 3, 4, 0x1C, 0x2A, 0x01, 0xAA, 0x14, 0xFF,
        ];
        let mut buf = &bytes[1..];
        skip_field(2, WireType::StartGroup, &mut buf, MAX_NESTING_DEPTH).unwrap();
        assert_eq!(buf, &[0xFF]);

        // Two levels of groups need a budget of two.
        let mut buf = &bytes[1..];
        assert_eq!(
            skip_field(2, WireType::StartGroup, &mut buf, 1)
                .unwrap_err()
                .to_string(),
            "Malformed input (.2.3): Exceeded maximum nesting depth",
        );

        // Mismatched end group.
        let mut buf = &[0x08, 0x01, 0x1C][..];
        assert!(skip_field(2, WireType::StartGroup, &mut buf, MAX_NESTING_DEPTH).is_err());
    }

    #[test]
    fn error_traceback() {
        let error = DecodeError::new(TRUNCATED)
            .with_field(5)
            .with_index(0)
            .with_field(2);
        assert_eq!(
            error.to_string(),
            "Malformed input (.2[0].5): Truncated input",
        );
    }
}
