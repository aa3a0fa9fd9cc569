//! Per-type coder tables.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::coders::{Coding, FieldCoder};
use crate::error::BuildError;
use crate::message::{FieldAccessor, MessageLayout};
use crate::registry::{MessageInfo, Registry, REGISTRY_DROPPED};
use crate::schema::relocates;

/// Field numbers below this always get a dense slot.
pub const DENSE_MIN_NUMBER: u32 = 16;

/// Past [`DENSE_MIN_NUMBER`], the dense array stops at the first number
/// at least this many times the largest number already in it.
pub const DENSE_GROWTH: u32 = 2;

/// How to size, encode and decode one field of a message type.
pub struct CoderFieldInfo {
    number: u32,
    coder: FieldCoder,
    accessor: FieldAccessor,

    /// Storage may be absent, in which case the field is skipped.
    is_pointer: bool,
    is_required: bool,

    /// Index of the containing (non-synthetic) oneof,
    /// whose members are marshaled after all other fields.
    oneof_group: Option<usize>,
}

/// Dispatch table for one message type. Immutable once built.
pub struct MessageCoderTable {
    /// All fields, ascending by number.
    fields: Vec<CoderFieldInfo>,

    /// Marshal order, as indices into [`fields`](Self::fields).
    ordered: Vec<usize>,

    /// Indices into [`fields`](Self::fields), by field number,
    /// for a prefix of small field numbers.
    dense: Vec<Option<usize>>,

    /// Indices into [`fields`](Self::fields), by field number.
    by_number: HashMap<u32, usize>,

    layout: MessageLayout,
    is_message_set: bool,

    /// Whether this type or anything reachable from it has required fields or extensions.
    needs_init_check: bool,
    required_field_count: usize,
}

impl CoderFieldInfo {
    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn coder(&self) -> &FieldCoder {
        &self.coder
    }

    pub(crate) fn accessor(&self) -> FieldAccessor {
        self.accessor
    }

    pub fn is_pointer(&self) -> bool {
        self.is_pointer
    }

    pub fn is_required(&self) -> bool {
        self.is_required
    }

    pub fn oneof_group(&self) -> Option<usize> {
        self.oneof_group
    }
}

impl MessageCoderTable {
    /// Build the table for `info`. Runs at most once per type;
    /// see [`MessageInfo::coder_table`].
    pub(crate) fn build(info: &MessageInfo) -> Result<Self, BuildError> {
        let registry = info
            .registry()
            .ok_or_else(|| BuildError::new(info.full_name(), None, REGISTRY_DROPPED))?;
        let children = info.resolve(&registry)?;
        // Vouch for every reachable type, so their own lazy builds cannot fail
        // halfway through encoding a parent.
        validate_reachable(info, &children, &registry)?;

        let descriptor = info.descriptor();
        let mut fields: Vec<CoderFieldInfo> = descriptor
            .fields
            .iter()
            .zip(children)
            .zip(info.slots())
            .enumerate()
            .map(|(index, ((field, child), slot))| {
                let coding = Coding::of(field, field.has_presence(descriptor.syntax));
                CoderFieldInfo {
                    number: field.number,
                    coder: FieldCoder::new(field.number, field.kind, coding, child),
                    accessor: FieldAccessor::new(index),
                    is_pointer: slot.pointer,
                    is_required: field.is_required(),
                    oneof_group: relocates(descriptor, field.oneof),
                }
            })
            .collect();
        fields.sort_by_key(|field| field.number);

        let mut max_dense = 0;
        for field in &fields {
            if field.number >= DENSE_MIN_NUMBER && field.number >= DENSE_GROWTH * max_dense {
                break;
            }
            max_dense = field.number;
        }
        let mut dense = vec![None; max_dense as usize + 1];
        for (index, field) in fields.iter().enumerate() {
            match dense.get_mut(field.number as usize) {
                Some(slot) => *slot = Some(index),
                None => break,
            }
        }

        let by_number = fields
            .iter()
            .enumerate()
            .map(|(index, field)| (field.number, index))
            .collect();

        let mut ordered: Vec<usize> = (0..fields.len()).collect();
        if !descriptor.oneofs.is_empty() {
            // Non-oneof fields first, then oneof members grouped by oneof.
            // Already ascending by number within each group.
            ordered.sort_by_key(|&index| {
                let field = &fields[index];
                (field.oneof_group.is_some(), field.oneof_group, field.number)
            });
        }

        let table = Self {
            required_field_count: fields.iter().filter(|field| field.is_required).count(),
            needs_init_check: info.needs_init_check(&registry, &mut HashSet::new()),
            is_message_set: descriptor.message_set_wire_format,
            layout: info.layout(),
            fields,
            ordered,
            dense,
            by_number,
        };
        log_debug!(
            message: info.full_name(),
            fields = table.fields.len(),
            dense = table.dense.len(),
            message_set = table.is_message_set,
            "Built coder table"
        );
        Ok(table)
    }

    /// Look up a field by number, trying the dense array first.
    #[inline(always)]
    pub fn field(&self, number: u32) -> Option<&CoderFieldInfo> {
        self.dense_field(number).or_else(|| self.mapped_field(number))
    }

    pub fn dense_field(&self, number: u32) -> Option<&CoderFieldInfo> {
        let index = (*self.dense.get(number as usize)?)?;
        self.fields.get(index)
    }

    pub fn mapped_field(&self, number: u32) -> Option<&CoderFieldInfo> {
        self.fields.get(*self.by_number.get(&number)?)
    }

    /// All fields, ascending by number.
    pub fn fields(&self) -> impl Iterator<Item = &CoderFieldInfo> {
        self.fields.iter()
    }

    /// All fields, in marshal order.
    pub fn ordered_fields(&self) -> impl Iterator<Item = &CoderFieldInfo> {
        self.ordered.iter().map(|&index| &self.fields[index])
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Length of the dense lookup array (one more than its largest field number).
    pub fn dense_len(&self) -> usize {
        self.dense.len()
    }

    pub fn layout(&self) -> MessageLayout {
        self.layout
    }

    pub fn is_message_set(&self) -> bool {
        self.is_message_set
    }

    pub fn needs_init_check(&self) -> bool {
        self.needs_init_check
    }

    pub fn required_field_count(&self) -> usize {
        self.required_field_count
    }
}

/// Resolve every type reachable from `root`, depth-first.
pub(crate) fn validate_reachable(
    root: &MessageInfo,
    children: &[Option<Arc<MessageInfo>>],
    registry: &Registry,
) -> Result<(), BuildError> {
    let mut seen = HashSet::from([root.full_name().to_owned()]);
    let mut pending: Vec<Arc<MessageInfo>> = children.iter().flatten().cloned().collect();
    while let Some(info) = pending.pop() {
        if seen.insert(info.full_name().to_owned()) {
            pending.extend(info.resolve(registry)?.into_iter().flatten());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::schema::{FieldDescriptor, Kind, MessageDescriptor, Syntax};
    use crate::{MessageInfo, MessageLayout, Registry};

    fn scalars(name: &str, numbers: &[u32]) -> MessageDescriptor {
        numbers
            .iter()
            .fold(MessageDescriptor::new(name, Syntax::Proto3), |d, &n| {
                d.field(FieldDescriptor::new(format!("f{n}"), n, Kind::Int32))
            })
    }

    fn register(registry: &Arc<Registry>, descriptor: MessageDescriptor) -> Arc<MessageInfo> {
        registry
            .register(descriptor, MessageLayout::default())
            .unwrap()
    }

    #[test]
    fn dense_prefix() {
        let registry = Registry::new();
        let cases: &[(&[u32], usize)] = &[
            (&[], 1),
            (&[1, 2, 3], 4),
            (&[3, 1, 2, 100], 4),
            (&[1, 16, 40], 2),
            (&[1, 2, 9, 17, 30, 60, 61], 31),
            (&[20], 1),
        ];
        for (i, (numbers, dense_len)) in cases.iter().enumerate() {
            let info = register(&registry, scalars(&format!("test.Dense{i}"), numbers));
            let table = info.coder_table().unwrap();
            assert_eq!(table.dense_len(), *dense_len, "numbers {numbers:?}");
            assert_eq!(table.len(), numbers.len());
        }
    }

    #[test]
    fn dense_and_mapped_lookups_agree() {
        let registry = Registry::new();
        let info = register(&registry, scalars("test.Lookup", &[1, 2, 5, 15, 16, 31, 64, 1000]));
        let table = info.coder_table().unwrap();
        for field in table.fields() {
            let mapped = table.mapped_field(field.number()).unwrap();
            assert!(std::ptr::eq(field, mapped));
            if let Some(dense) = table.dense_field(field.number()) {
                assert!(std::ptr::eq(dense, mapped));
            }
            assert!(std::ptr::eq(table.field(field.number()).unwrap(), mapped));
        }
        assert!(table.dense_field(1000).is_none());
        assert!(table.field(3).is_none());
        assert!(table.field(999).is_none());
    }

    #[test]
    fn fields_sorted_and_ordered() {
        let registry = Registry::new();
        let descriptor = MessageDescriptor::new("test.Oneofs", Syntax::Proto3)
            .oneof("second")
            .oneof("first")
            .field(FieldDescriptor::new("d", 4, Kind::Int32).in_oneof(0))
            .field(FieldDescriptor::new("a", 1, Kind::Int32))
            .field(FieldDescriptor::new("b", 2, Kind::Int32).in_oneof(1))
            .field(FieldDescriptor::new("c", 3, Kind::Int32))
            .field(FieldDescriptor::new("e", 5, Kind::Int32).in_oneof(0));
        let info = register(&registry, descriptor);
        let table = info.coder_table().unwrap();

        let by_number: Vec<u32> = table.fields().map(|f| f.number()).collect();
        assert_eq!(by_number, [1, 2, 3, 4, 5]);
        // Oneof 0 (fields 4, 5) sorts before oneof 1 (field 2).
        let ordered: Vec<u32> = table.ordered_fields().map(|f| f.number()).collect();
        assert_eq!(ordered, [1, 3, 4, 5, 2]);
    }

    #[test]
    fn synthetic_oneofs_keep_number_order() {
        let registry = Registry::new();
        let mut descriptor = MessageDescriptor::new("test.Synthetic", Syntax::Proto3)
            .oneof("_b")
            .field(FieldDescriptor::new("a", 1, Kind::Int32))
            .field(FieldDescriptor::new("b", 2, Kind::Int32).in_oneof(0))
            .field(FieldDescriptor::new("c", 3, Kind::Int32));
        descriptor.oneofs[0].synthetic = true;
        let info = register(&registry, descriptor);
        let table = info.coder_table().unwrap();
        let ordered: Vec<u32> = table.ordered_fields().map(|f| f.number()).collect();
        assert_eq!(ordered, [1, 2, 3]);
        assert_eq!(table.field(2).unwrap().oneof_group(), None);
    }

    #[test]
    fn init_check_is_transitive() {
        let registry = Registry::new();
        let leaf = MessageDescriptor::new("test.Leaf", Syntax::Proto2)
            .field(FieldDescriptor::new("id", 1, Kind::Int32).required());
        let middle = MessageDescriptor::new("test.Middle", Syntax::Proto2)
            .field(FieldDescriptor::new("leaf", 1, Kind::Message).of_type("test.Leaf"));
        let root = MessageDescriptor::new("test.Root", Syntax::Proto2)
            .field(FieldDescriptor::new("middle", 1, Kind::Message).of_type("test.Middle"))
            .field(FieldDescriptor::new("name", 2, Kind::String).required());
        let plain = MessageDescriptor::new("test.Plain", Syntax::Proto2)
            .field(FieldDescriptor::new("name", 1, Kind::String));
        let extendable = MessageDescriptor::new("test.Extendable", Syntax::Proto2).extensions(100, 200);
        register(&registry, leaf);
        let middle = register(&registry, middle);
        let root = register(&registry, root);
        let plain = register(&registry, plain);
        let extendable = register(&registry, extendable);

        let middle = middle.coder_table().unwrap();
        assert!(middle.needs_init_check());
        assert_eq!(middle.required_field_count(), 0);
        let root = root.coder_table().unwrap();
        assert!(root.needs_init_check());
        assert_eq!(root.required_field_count(), 1);
        assert!(!plain.coder_table().unwrap().needs_init_check());
        assert!(extendable.coder_table().unwrap().needs_init_check());
    }

    #[test]
    fn recursive_types_build() {
        let registry = Registry::new();
        let node = MessageDescriptor::new("test.Node", Syntax::Proto3)
            .field(FieldDescriptor::new("value", 1, Kind::Int32))
            .field(FieldDescriptor::new("next", 2, Kind::Message).of_type("test.Node"));
        let info = register(&registry, node);
        let table = info.coder_table().unwrap();
        let next = table.field(2).unwrap();
        assert_eq!(next.coder().message_type(), Some("test.Node"));
        assert!(next.is_pointer());
        assert!(!table.field(1).unwrap().is_pointer());
    }

    #[test]
    fn invalid_descriptors_fail() {
        let registry = Registry::new();
        let cases = [
            (
                scalars("test.Duplicate", &[1, 2, 1]),
                Some(1),
                "Duplicate field number",
            ),
            (scalars("test.Zero", &[0]), Some(0), "Field number out of range"),
            (
                MessageDescriptor::new("test.Untyped", Syntax::Proto3)
                    .field(FieldDescriptor::new("m", 1, Kind::Message)),
                Some(1),
                "Message field has no message type",
            ),
            (
                MessageDescriptor::new("test.Unresolved", Syntax::Proto3)
                    .field(FieldDescriptor::new("m", 7, Kind::Message).of_type("test.Missing")),
                Some(7),
                "Unregistered message type",
            ),
            (
                MessageDescriptor::new("test.BadOneof", Syntax::Proto3)
                    .field(FieldDescriptor::new("o", 1, Kind::Int32).in_oneof(0)),
                Some(1),
                "Oneof index out of range",
            ),
        ];
        for (descriptor, field, reason) in cases {
            let name = descriptor.full_name.clone();
            let info = register(&registry, descriptor);
            let error = info.coder_table().err().unwrap();
            assert_eq!(error.message_type, name);
            assert_eq!(error.field, field);
            assert_eq!(error.reason, reason);
        }
    }

    #[test]
    fn broken_nested_type_fails_parent() {
        let registry = Registry::new();
        register(&registry, scalars("test.Broken", &[3, 3]));
        let parent = register(
            &registry,
            MessageDescriptor::new("test.Parent", Syntax::Proto3)
                .field(FieldDescriptor::new("child", 1, Kind::Message).of_type("test.Broken")),
        );
        let error = parent.coder_table().err().unwrap();
        assert_eq!(error.message_type, "test.Broken");
        assert_eq!(error.reason, "Duplicate field number");
    }
}
