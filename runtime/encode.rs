//! Sizing and marshaling of whole messages.
//!
//! Output order is always: extensions (ascending by number),
//! regular fields in the table's marshal order, then unknown bytes verbatim.

use bytes::BytesMut;

use crate::error::{BuildError, EncodeError, Result};
use crate::message::{ExtensionField, ExtensionMap, Message};
use crate::messageset;
use crate::registry::MessageInfo;
use crate::table::MessageCoderTable;
use crate::MarshalOptions;

impl MessageInfo {
    /// Return the encoded length of `message`. An absent message has length zero.
    ///
    /// The result is stored in the message's size cache, if it has one.
    /// With [`use_cached_size`](MarshalOptions::use_cached_size),
    /// a previously cached size is returned without traversing the message.
    /// An instance of a different type is sized according to its own type.
    pub fn size(
        &self,
        message: Option<&Message>,
        options: MarshalOptions,
    ) -> std::result::Result<usize, BuildError> {
        let Some(message) = message else {
            return Ok(0);
        };
        if !message.is_instance_of(self) {
            return message.info().size(Some(message), options);
        }
        if options.use_cached_size {
            if let Some(size) = message.cached_size() {
                return Ok(size);
            }
        }
        let table = self.coder_table()?;
        Ok(self.size_with(table, message, options))
    }

    /// Traverse `message` and return its encoded length, filling the size cache.
    pub(crate) fn size_with(
        &self,
        table: &MessageCoderTable,
        message: &Message,
        options: MarshalOptions,
    ) -> usize {
        #[cfg(test)]
        self.counters.count_traversal();

        let size = if table.is_message_set() {
            messageset::size(self, message, options)
        } else {
            let mut size = self.size_extensions(message, options);
            for field in table.ordered_fields() {
                // Absent pointer-like fields contribute nothing.
                if let Some(value) = field.accessor().get(message) {
                    size += field.coder().size(value, options);
                }
            }
            size + message.unknown_fields().map_or(0, <[u8]>::len)
        };
        message.store_size(size);
        size
    }

    fn size_extensions(&self, message: &Message, options: MarshalOptions) -> usize {
        message.extensions().map_or(0, |extensions| {
            extensions
                .values()
                .map(|extension| {
                    self.extension_coders
                        .get(extension.ty())
                        .coder
                        .size(extension.value(), options)
                })
                .sum()
        })
    }

    /// Append the encoding of `message` to `buf`. An absent message appends nothing.
    ///
    /// The first field that fails to encode aborts the call;
    /// bytes appended before it remain in `buf`.
    pub fn marshal(
        &self,
        buf: &mut BytesMut,
        message: Option<&Message>,
        options: MarshalOptions,
    ) -> Result<()> {
        let Some(message) = message else {
            return Ok(());
        };
        if !message.is_instance_of(self) {
            return message.info().marshal(buf, Some(message), options);
        }
        let table = self.coder_table()?;
        Ok(self.marshal_fields(table, buf, message, options)?)
    }

    /// Append every field of `message` (an instance of this type) to `buf`.
    pub(crate) fn marshal_fields(
        &self,
        table: &MessageCoderTable,
        buf: &mut BytesMut,
        message: &Message,
        options: MarshalOptions,
    ) -> std::result::Result<(), EncodeError> {
        if table.is_message_set() {
            return messageset::marshal(self, buf, message, options);
        }
        if let Some(extensions) = message.extensions() {
            in_number_order(extensions, |number, extension| {
                self.extension_coders
                    .get(extension.ty())
                    .coder
                    .encode(extension.value(), buf, options)
                    .map_err(|e| e.with_field(number))
            })?;
        }
        for field in table.ordered_fields() {
            if let Some(value) = field.accessor().get(message) {
                field
                    .coder()
                    .encode(value, buf, options)
                    .map_err(|e| e.with_field(field.number()))?;
            }
        }
        if let Some(unknown) = message.unknown_fields() {
            buf.extend_from_slice(unknown);
        }
        Ok(())
    }
}

/// Visit extensions in ascending order of field number,
/// without sorting when there are fewer than two.
pub(crate) fn in_number_order<F>(
    extensions: &ExtensionMap,
    mut visit: F,
) -> std::result::Result<(), EncodeError>
where
    F: FnMut(u32, &ExtensionField) -> std::result::Result<(), EncodeError>,
{
    match extensions.len() {
        0 => Ok(()),
        1 => extensions
            .iter()
            .try_for_each(|(&number, extension)| visit(number, extension)),
        _ => {
            let mut numbers: Vec<u32> = extensions.keys().copied().collect();
            numbers.sort_unstable();
            numbers.into_iter().try_for_each(|number| match extensions.get(&number) {
                Some(extension) => visit(number, extension),
                None => Ok(()),
            })
        }
    }
}
