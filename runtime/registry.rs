//! Registry of message and extension types.
//!
//! Each registered message type gets a [`MessageInfo`],
//! which owns the type's lazily built [coder table](MessageCoderTable).
//! The table is built exactly once, on first use, and every caller
//! (including concurrent first callers) observes the same result.

use std::collections::{HashMap, HashSet};
use std::result::Result as StdResult;
use std::sync::{Arc, OnceLock, Weak};

use papaya::HashMap as LockFreeConcurrentHashMap;

use crate::error::{BuildError, Error, ErrorKind, Result};
use crate::extension::{ExtensionCoderCache, ExtensionType};
use crate::message::{Message, MessageLayout};
use crate::schema::{ExtensionDescriptor, Kind, MessageDescriptor, MAX_FIELD_NUMBER};
use crate::table::{validate_reachable, MessageCoderTable};

/// Lookup of message and extension types by full name.
///
/// Types may reference each other (even recursively) by name,
/// and may be registered in any order before their tables are first needed.
pub struct Registry {
    /// Map of full names to message types.
    types: LockFreeConcurrentHashMap<String, Arc<MessageInfo>>,

    /// Map of (extendee, field number) to extension types, for decoding.
    extensions: LockFreeConcurrentHashMap<(String, u32), Arc<ExtensionType>>,

    /// Map of full names to extension types.
    /// Extension coders are cached by full name, so it must be unique.
    extension_names: LockFreeConcurrentHashMap<String, Arc<ExtensionType>>,

    /// Shared with every registered [`MessageInfo`].
    extension_coders: Arc<ExtensionCoderCache>,
}

/// Storage information for one declared field.
pub(crate) struct SlotInfo {
    pub(crate) name: String,
    pub(crate) number: u32,
    pub(crate) kind: Kind,
    /// Absent until set (see [`FieldDescriptor::is_pointer_like`](crate::FieldDescriptor::is_pointer_like)).
    pub(crate) pointer: bool,
    pub(crate) oneof: Option<usize>,
}

/// Everything known about one message type.
pub struct MessageInfo {
    descriptor: MessageDescriptor,
    layout: MessageLayout,

    /// Per-field storage, in declaration order.
    slots: Vec<SlotInfo>,

    /// Map from field numbers to [`slots`](Self::slots) indices.
    slot_numbers: HashMap<u32, usize>,

    /// Used to resolve nested types when building the coder table.
    registry: Weak<Registry>,

    pub(crate) extension_coders: Arc<ExtensionCoderCache>,

    /// Built on first use. A failure is cached too: it is fatal for the type.
    coders: OnceLock<StdResult<MessageCoderTable, BuildError>>,

    #[cfg(test)]
    pub(crate) counters: counters::Counters,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            types: LockFreeConcurrentHashMap::new(),
            extensions: LockFreeConcurrentHashMap::new(),
            extension_names: LockFreeConcurrentHashMap::new(),
            extension_coders: Arc::new(ExtensionCoderCache::new()),
        })
    }

    /// Register a message type. Its coder table is not built until first needed.
    pub fn register(
        self: &Arc<Self>,
        descriptor: MessageDescriptor,
        layout: MessageLayout,
    ) -> Result<Arc<MessageInfo>> {
        let full_name = descriptor.full_name.clone();
        let info = Arc::new(MessageInfo::new(
            descriptor,
            layout,
            Arc::downgrade(self),
            self.extension_coders.clone(),
        ));
        match self.types.pin().try_insert(full_name, info.clone()) {
            Ok(_) => {
                log_debug!(message: info.full_name(), "Registered message type");
                Ok(info)
            }
            Err(_) => Err(Error::leaf(
                ErrorKind::Schema,
                format!("Duplicate message type: {}", info.full_name()),
            )),
        }
    }

    pub fn message_info(&self, full_name: &str) -> Option<Arc<MessageInfo>> {
        self.types.pin().get(full_name).cloned()
    }

    /// Register an extension type.
    /// For message and group extensions, the value type
    /// (and every type it reaches) must already be registered.
    pub fn register_extension(&self, descriptor: ExtensionDescriptor) -> Result<Arc<ExtensionType>> {
        let field = &descriptor.field;
        if field.number == 0 || field.number > MAX_FIELD_NUMBER {
            return Err(Error::leaf(
                ErrorKind::Schema,
                format!("Extension {} has invalid number {}", descriptor.full_name, field.number),
            ));
        }
        if field.oneof.is_some() {
            return Err(Error::leaf(
                ErrorKind::Schema,
                format!("Extension {} cannot be a oneof member", descriptor.full_name),
            ));
        }
        let child = if field.kind.is_message() {
            let name = field.message_type.as_deref().unwrap_or_default();
            let child = self.message_info(name).ok_or_else(|| {
                Error::leaf(
                    ErrorKind::Schema,
                    format!(
                        "Extension {} has unregistered message type '{name}'",
                        descriptor.full_name
                    ),
                )
            })?;
            // The value type's table, and every table it reaches, must build.
            let children = child.resolve(self)?;
            validate_reachable(&child, &children, self)?;
            Some(child)
        } else {
            None
        };

        let key = (descriptor.extendee.clone(), field.number);
        let ty = Arc::new(ExtensionType::new(descriptor, child));
        let names = self.extension_names.pin();
        if names.try_insert(ty.full_name().to_owned(), ty.clone()).is_err() {
            return Err(Error::leaf(
                ErrorKind::Schema,
                format!("Duplicate extension name: {}", ty.full_name()),
            ));
        }
        match self.extensions.pin().try_insert(key, ty.clone()) {
            Ok(_) => {
                log_debug!(
                    message: ty.extendee(),
                    extension = ty.full_name(),
                    number = ty.number(),
                    "Registered extension"
                );
                Ok(ty)
            }
            Err(_) => {
                names.remove(ty.full_name());
                Err(Error::leaf(
                    ErrorKind::Schema,
                    format!("Duplicate extension {} of {}", ty.number(), ty.extendee()),
                ))
            }
        }
    }

    pub fn find_extension(&self, extendee: &str, number: u32) -> Option<Arc<ExtensionType>> {
        self.extensions
            .pin()
            .get(&(extendee.to_owned(), number))
            .cloned()
    }

    pub fn find_extension_by_name(&self, full_name: &str) -> Option<Arc<ExtensionType>> {
        self.extension_names.pin().get(full_name).cloned()
    }
}

impl MessageInfo {
    fn new(
        descriptor: MessageDescriptor,
        layout: MessageLayout,
        registry: Weak<Registry>,
        extension_coders: Arc<ExtensionCoderCache>,
    ) -> Self {
        let slots: Vec<SlotInfo> = descriptor
            .fields
            .iter()
            .map(|field| SlotInfo {
                name: field.name.clone(),
                number: field.number,
                kind: field.kind,
                pointer: field.is_pointer_like(descriptor.syntax),
                oneof: field.oneof,
            })
            .collect();
        let slot_numbers = slots
            .iter()
            .enumerate()
            .map(|(index, slot)| (slot.number, index))
            .collect();
        Self {
            descriptor,
            layout,
            slots,
            slot_numbers,
            registry,
            extension_coders,
            coders: OnceLock::new(),
            #[cfg(test)]
            counters: counters::Counters::default(),
        }
    }

    pub fn full_name(&self) -> &str {
        &self.descriptor.full_name
    }

    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.descriptor
    }

    pub fn layout(&self) -> MessageLayout {
        self.layout
    }

    pub(crate) fn slots(&self) -> &[SlotInfo] {
        &self.slots
    }

    pub(crate) fn slot_index(&self, number: u32) -> Option<usize> {
        self.slot_numbers.get(&number).copied()
    }

    pub(crate) fn registry(&self) -> Option<Arc<Registry>> {
        self.registry.upgrade()
    }

    /// Return a new, empty instance of this type.
    pub fn new_message(self: &Arc<Self>) -> Message {
        Message::new(self)
    }

    /// Return the coder table, building it if this is the first use.
    ///
    /// Concurrent first callers block until the single build finishes.
    /// A build failure is returned to every caller, forever.
    pub fn coder_table(&self) -> StdResult<&MessageCoderTable, BuildError> {
        self.coders
            .get_or_init(|| {
                #[cfg(test)]
                self.counters.count_build();
                MessageCoderTable::build(self).inspect_err(|error| {
                    log_error!(message: self.full_name(), %error, "Coder table build failed");
                })
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Check this type's descriptor and resolve its nested message types,
    /// returning one entry per declared field.
    ///
    /// Everything that can make [`MessageCoderTable::build`] fail is checked here,
    /// without building anything, so a parent can vouch for its children's tables.
    pub(crate) fn resolve(&self, registry: &Registry) -> StdResult<Vec<Option<Arc<MessageInfo>>>, BuildError> {
        let descriptor = &self.descriptor;
        let fail = |field: Option<u32>, reason| BuildError::new(self.full_name(), field, reason);

        if descriptor.message_set_wire_format {
            if !self.layout.extensions {
                return Err(fail(None, MESSAGE_SET_NO_EXTENSIONS));
            }
            if !self.layout.unknown_fields {
                return Err(fail(None, MESSAGE_SET_NO_UNKNOWN));
            }
            if !descriptor.fields.is_empty() {
                return Err(fail(None, MESSAGE_SET_REGULAR_FIELDS));
            }
        }

        let mut seen = HashSet::with_capacity(descriptor.fields.len());
        let mut children = Vec::with_capacity(descriptor.fields.len());
        for field in &descriptor.fields {
            let number = Some(field.number);
            if field.number == 0 || field.number > MAX_FIELD_NUMBER {
                return Err(fail(number, INVALID_FIELD_NUMBER));
            }
            if !seen.insert(field.number) {
                return Err(fail(number, DUPLICATE_FIELD_NUMBER));
            }
            if let Some(oneof) = field.oneof {
                if oneof >= descriptor.oneofs.len() {
                    return Err(fail(number, INVALID_ONEOF_INDEX));
                }
                if field.is_repeated() {
                    return Err(fail(number, REPEATED_ONEOF_MEMBER));
                }
            }
            children.push(if field.kind.is_message() {
                let name = field
                    .message_type
                    .as_deref()
                    .ok_or_else(|| fail(number, MISSING_MESSAGE_TYPE))?;
                Some(
                    registry
                        .message_info(name)
                        .ok_or_else(|| fail(number, UNRESOLVED_MESSAGE_TYPE))?,
                )
            } else {
                None
            });
        }
        Ok(children)
    }

    /// Whether this type, or any type reachable through its message fields,
    /// has required fields or accepts extensions.
    pub(crate) fn needs_init_check(&self, registry: &Registry, visited: &mut HashSet<String>) -> bool {
        if !visited.insert(self.full_name().to_owned()) {
            return false;
        }
        if !self.descriptor.extension_ranges.is_empty() {
            return true;
        }
        self.descriptor.fields.iter().any(|field| {
            field.is_required()
                || field
                    .message_type
                    .as_deref()
                    .filter(|_| field.kind.is_message())
                    .and_then(|name| registry.message_info(name))
                    .is_some_and(|child| child.needs_init_check(registry, visited))
        })
    }

    /// Whether every required field is set, recursively.
    pub fn is_initialized(&self, message: &Message) -> StdResult<bool, BuildError> {
        let table = self.coder_table()?;
        if !table.needs_init_check() {
            return Ok(true);
        }
        Ok(self.check_initialized(table, message))
    }

    fn check_initialized(&self, table: &MessageCoderTable, message: &Message) -> bool {
        let required = table
            .fields()
            .filter(|field| field.is_required() && field.accessor().get(message).is_some())
            .count();
        if required < table.required_field_count() {
            return false;
        }
        let nested = table.fields().all(|field| {
            match (field.coder().child.as_ref(), field.accessor().get(message)) {
                (Some(child), Some(value)) => child.values_initialized(value),
                _ => true,
            }
        });
        nested
            && message.extensions().map_or(true, |extensions| {
                extensions.values().all(|extension| {
                    extension
                        .ty()
                        .message_type()
                        .map_or(true, |child| child.values_initialized(extension.value()))
                })
            })
    }

    fn values_initialized(&self, value: &crate::Value) -> bool {
        match value {
            crate::Value::Message(message) => self
                .coder_table()
                .map_or(false, |table| {
                    !table.needs_init_check() || self.check_initialized(table, message)
                }),
            crate::Value::List(items) => items.iter().all(|item| self.values_initialized(item)),
            _ => true,
        }
    }
}


// Build error reasons. All indicate a schema / storage mismatch, never bad data.
const MESSAGE_SET_NO_EXTENSIONS: &str = "MessageSet with no extensions slot";
const MESSAGE_SET_NO_UNKNOWN: &str = "MessageSet with no unknown-fields slot";
const MESSAGE_SET_REGULAR_FIELDS: &str = "MessageSet declares regular fields";
const INVALID_FIELD_NUMBER: &str = "Field number out of range";
const DUPLICATE_FIELD_NUMBER: &str = "Duplicate field number";
const INVALID_ONEOF_INDEX: &str = "Oneof index out of range";
const REPEATED_ONEOF_MEMBER: &str = "Oneof member cannot be repeated";
const MISSING_MESSAGE_TYPE: &str = "Message field has no message type";
const UNRESOLVED_MESSAGE_TYPE: &str = "Unregistered message type";
pub(crate) const REGISTRY_DROPPED: &str = "Registry no longer exists";
