//! Extension types and their lazily built coders.

use std::sync::Arc;

use papaya::HashMap as LockFreeConcurrentHashMap;

use crate::coders::{Coding, FieldCoder};
use crate::registry::MessageInfo;
use crate::schema::ExtensionDescriptor;

/// A registered extension: a field declared outside its extendee.
///
/// Created only through [`Registry::register_extension`](crate::Registry::register_extension),
/// which resolves the value type, and validates every type it reaches,
/// so that building its coder cannot fail later.
pub struct ExtensionType {
    descriptor: ExtensionDescriptor,

    /// Resolved value type, for message and group extensions.
    child: Option<Arc<MessageInfo>>,
}

/// Coder for one extension type.
pub(crate) struct ExtensionCoderInfo {
    pub(crate) coder: FieldCoder,
}

/// Process-lifetime cache of extension coders, keyed by extension type identity:
/// its full name, which [`Registry::register_extension`](crate::Registry::register_extension)
/// refuses to register twice.
pub(crate) struct ExtensionCoderCache {
    infos: LockFreeConcurrentHashMap<String, Arc<ExtensionCoderInfo>>,
}

impl ExtensionType {
    pub(crate) fn new(descriptor: ExtensionDescriptor, child: Option<Arc<MessageInfo>>) -> Self {
        Self { descriptor, child }
    }

    pub fn full_name(&self) -> &str {
        &self.descriptor.full_name
    }

    pub fn extendee(&self) -> &str {
        &self.descriptor.extendee
    }

    pub fn number(&self) -> u32 {
        self.descriptor.field.number
    }

    pub fn descriptor(&self) -> &ExtensionDescriptor {
        &self.descriptor
    }

    /// Value type of a message or group extension.
    pub fn message_type(&self) -> Option<&Arc<MessageInfo>> {
        self.child.as_ref()
    }
}

impl ExtensionCoderInfo {
    fn new(ty: &ExtensionType) -> Self {
        let field = &ty.descriptor.field;
        // Singular extensions always track presence.
        let coding = Coding::of(field, true);
        Self {
            coder: FieldCoder::new(field.number, field.kind, coding, ty.child.clone()),
        }
    }
}

impl ExtensionCoderCache {
    pub(crate) fn new() -> Self {
        Self {
            infos: LockFreeConcurrentHashMap::new(),
        }
    }

    /// Return the coder for `ty`, building and caching it on first sight.
    pub(crate) fn get(&self, ty: &ExtensionType) -> Arc<ExtensionCoderInfo> {
        let infos = self.infos.pin();
        if let Some(info) = infos.get(ty.full_name()) {
            return info.clone();
        }
        infos
            .get_or_insert_with(ty.full_name().to_owned(), || {
                log_debug!(
                    message: ty.extendee(),
                    extension = ty.full_name(),
                    number = ty.number(),
                    "Cached extension coder"
                );
                Arc::new(ExtensionCoderInfo::new(ty))
            })
            .clone()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.infos.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::message::{Message, MessageLayout, Value};
    use crate::registry::Registry;
    use crate::schema::{ExtensionDescriptor, FieldDescriptor, Kind, MessageDescriptor, Syntax};
    use crate::MarshalOptions;

    #[test]
    fn coders_cached_once() {
        let registry = Registry::new();
        let info = registry
            .register(
                MessageDescriptor::new("test.Extendable", Syntax::Proto2).extensions(1, 100),
                MessageLayout::default(),
            )
            .unwrap();
        let ty = registry
            .register_extension(ExtensionDescriptor {
                full_name: "test.flag".into(),
                extendee: "test.Extendable".into(),
                field: FieldDescriptor::new("flag", 42, Kind::Bool),
            })
            .unwrap();
        assert_eq!(info.extension_coders.len(), 0);

        let mut message = Message::new(&info);
        message.set_extension(&ty, Value::Bool(true)).unwrap();
        for _ in 0..3 {
            assert_eq!(
                message.encode_to_vec(MarshalOptions::default()).unwrap(),
                [0xD0, 0x02, 0x01]
            );
        }
        assert_eq!(info.extension_coders.len(), 1);

        let coder = &info.extension_coders.get(&ty).coder;
        assert_eq!(coder.number(), 42);
        assert_eq!(coder.tag_size(), 2);
    }
}
