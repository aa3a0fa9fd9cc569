//! Schema descriptors consumed by the table builder.
//!
//! These are supplied by whatever compiles the schema (out of scope here)
//! and are immutable once registered.

use prost::encoding::WireType;
use serde::Deserialize;

/// Largest legal field number (`2^29 - 1`).
pub const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;

/// The value type of a field.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Bool,
    Enum,
    Int32,
    Sint32,
    Uint32,
    Int64,
    Sint64,
    Uint64,
    Fixed32,
    Sfixed32,
    Float,
    Fixed64,
    Sfixed64,
    Double,
    String,
    Bytes,
    Message,
    Group,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    #[default]
    Optional,
    Required,
    Repeated,
}

/// Schema generation, which decides whether singular scalars track presence.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Syntax {
    #[default]
    Proto2,
    Proto3,
    Editions,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub number: u32,
    pub kind: Kind,
    #[serde(default)]
    pub cardinality: Cardinality,
    /// Requested packed encoding; only honored for repeated numeric fields.
    #[serde(default)]
    pub packed: bool,
    /// Index into [`MessageDescriptor::oneofs`].
    #[serde(default)]
    pub oneof: Option<usize>,
    /// Full name of the value type, for message and group fields.
    #[serde(default)]
    pub message_type: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OneofDescriptor {
    pub name: String,
    /// Synthetic oneofs wrap a single proto3 `optional` field
    /// and are ordered like regular fields.
    #[serde(default)]
    pub synthetic: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MessageDescriptor {
    pub full_name: String,
    #[serde(default)]
    pub syntax: Syntax,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    #[serde(default)]
    pub oneofs: Vec<OneofDescriptor>,
    /// Half-open `[start, end)` ranges of extension field numbers.
    #[serde(default)]
    pub extension_ranges: Vec<(u32, u32)>,
    /// Legacy message-set wire format option.
    #[serde(default)]
    pub message_set_wire_format: bool,
}

/// Describes a field declared outside its extendee.
#[derive(Clone, Debug, Deserialize)]
pub struct ExtensionDescriptor {
    pub full_name: String,
    pub extendee: String,
    pub field: FieldDescriptor,
}

impl Kind {
    /// The wire type of a single (non-packed) value of this kind.
    pub fn wire_type(self) -> WireType {
        match self {
            Kind::Bool
            | Kind::Enum
            | Kind::Int32
            | Kind::Sint32
            | Kind::Uint32
            | Kind::Int64
            | Kind::Sint64
            | Kind::Uint64 => WireType::Varint,
            Kind::Fixed32 | Kind::Sfixed32 | Kind::Float => WireType::ThirtyTwoBit,
            Kind::Fixed64 | Kind::Sfixed64 | Kind::Double => WireType::SixtyFourBit,
            Kind::String | Kind::Bytes | Kind::Message => WireType::LengthDelimited,
            Kind::Group => WireType::StartGroup,
        }
    }

    /// Only scalar numeric kinds can be packed.
    pub fn is_packable(self) -> bool {
        !matches!(
            self,
            Kind::String | Kind::Bytes | Kind::Message | Kind::Group
        )
    }

    pub fn is_message(self) -> bool {
        matches!(self, Kind::Message | Kind::Group)
    }
}

impl FieldDescriptor {
    /// Convenience constructor for a singular optional field.
    pub fn new<S: Into<String>>(name: S, number: u32, kind: Kind) -> Self {
        Self {
            name: name.into(),
            number,
            kind,
            cardinality: Cardinality::Optional,
            packed: false,
            oneof: None,
            message_type: None,
        }
    }

    pub fn repeated(mut self) -> Self {
        self.cardinality = Cardinality::Repeated;
        self
    }

    pub fn required(mut self) -> Self {
        self.cardinality = Cardinality::Required;
        self
    }

    pub fn packed(mut self) -> Self {
        self.packed = true;
        self
    }

    pub fn in_oneof(mut self, index: usize) -> Self {
        self.oneof = Some(index);
        self
    }

    pub fn of_type<S: Into<String>>(mut self, message_type: S) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    pub fn is_repeated(&self) -> bool {
        self.cardinality == Cardinality::Repeated
    }

    pub fn is_required(&self) -> bool {
        self.cardinality == Cardinality::Required
    }

    /// Packed encoding applies only to repeated fields of packable kinds.
    pub fn is_packed(&self) -> bool {
        self.packed && self.is_repeated() && self.kind.is_packable()
    }

    /// Whether an unset singular value is distinguishable from its zero value.
    pub fn has_presence(&self, syntax: Syntax) -> bool {
        !self.is_repeated()
            && (self.kind.is_message() || syntax != Syntax::Proto3 || self.oneof.is_some())
    }

    /// Whether storage for this field may be absent and must be checked before access.
    pub fn is_pointer_like(&self, syntax: Syntax) -> bool {
        self.is_repeated() || self.has_presence(syntax)
    }
}

impl MessageDescriptor {
    pub fn new<S: Into<String>>(full_name: S, syntax: Syntax) -> Self {
        Self {
            full_name: full_name.into(),
            syntax,
            fields: Vec::new(),
            oneofs: Vec::new(),
            extension_ranges: Vec::new(),
            message_set_wire_format: false,
        }
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn oneof<S: Into<String>>(mut self, name: S) -> Self {
        self.oneofs.push(OneofDescriptor {
            name: name.into(),
            synthetic: false,
        });
        self
    }

    pub fn extensions(mut self, start: u32, end: u32) -> Self {
        self.extension_ranges.push((start, end));
        self
    }

    pub fn message_set(mut self) -> Self {
        self.message_set_wire_format = true;
        self
    }

    /// Whether `number` falls within one of the declared extension ranges.
    pub fn is_extension_number(&self, number: u32) -> bool {
        self.extension_ranges
            .iter()
            .any(|&(start, end)| start <= number && number < end)
    }
}

/// Whether a oneof relocates its members to the end of the marshal order.
pub(crate) fn relocates(descriptor: &MessageDescriptor, oneof: Option<usize>) -> Option<usize> {
    oneof.filter(|&index| {
        descriptor
            .oneofs
            .get(index)
            .is_some_and(|oneof| !oneof.synthetic)
    })
}
