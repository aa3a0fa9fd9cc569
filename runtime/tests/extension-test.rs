use std::sync::Arc;

use protocoder::{
    ErrorKind, ExtensionDescriptor, ExtensionType, FieldDescriptor, Kind, MarshalOptions, Message,
    MessageDescriptor, MessageInfo, MessageLayout, Registry, Syntax, Value, MAX_FIELD_NUMBER,
};

fn extension(registry: &Registry, extendee: &str, name: &str, field: FieldDescriptor) -> Arc<ExtensionType> {
    registry
        .register_extension(ExtensionDescriptor {
            full_name: name.to_owned(),
            extendee: extendee.to_owned(),
            field,
        })
        .unwrap()
}

struct Extendable {
    registry: Arc<Registry>,
    info: Arc<MessageInfo>,
    payload: Arc<MessageInfo>,
    /// Int32 extensions numbered 3, 5 and 9.
    scalars: Vec<Arc<ExtensionType>>,
    /// Payload extension numbered 7.
    nested: Arc<ExtensionType>,
}

/// `test.Extendable` accepts extensions 1 to 9, and has one regular field numbered 20.
fn extendable() -> Extendable {
    let registry = Registry::new();
    let payload = registry
        .register(
            MessageDescriptor::new("test.Payload", Syntax::Proto2)
                .field(FieldDescriptor::new("text", 1, Kind::String)),
            MessageLayout::default(),
        )
        .unwrap();
    let info = registry
        .register(
            MessageDescriptor::new("test.Extendable", Syntax::Proto2)
                .field(FieldDescriptor::new("x", 20, Kind::Int32))
                .extensions(1, 10),
            MessageLayout::default(),
        )
        .unwrap();
    let scalars = [3, 5, 9]
        .into_iter()
        .map(|number| {
            extension(
                &registry,
                "test.Extendable",
                &format!("test.e{number}"),
                FieldDescriptor::new(format!("e{number}"), number, Kind::Int32),
            )
        })
        .collect();
    let nested = extension(
        &registry,
        "test.Extendable",
        "test.payload",
        FieldDescriptor::new("payload", 7, Kind::Message).of_type("test.Payload"),
    );
    Extendable {
        registry,
        info,
        payload,
        scalars,
        nested,
    }
}

#[test]
fn test_extensions_sorted_regardless_of_insertion_order() {
    let schema = extendable();
    let encode = |order: [usize; 3]| {
        let mut message = Message::new(&schema.info).with(20, Value::I32(1)).unwrap();
        for i in order {
            let ty = &schema.scalars[i];
            message
                .set_extension(ty, Value::I32(ty.number() as i32))
                .unwrap();
        }
        message.encode_to_vec(MarshalOptions::default()).unwrap()
    };

    let expected = [
        24, 3,       // extension 3: tag (3 << 3) + 0
        40, 5,       // extension 5: tag (5 << 3) + 0
        72, 9,       // extension 9: tag (9 << 3) + 0
        160, 1, 1,   // field 20, after every extension
    ];
    assert_eq!(encode([2, 0, 1]), expected);
    assert_eq!(encode([1, 2, 0]), expected);
    assert_eq!(encode([0, 1, 2]), expected);
}

#[test]
fn test_single_extension() {
    let schema = extendable();
    let mut message = Message::new(&schema.info);
    message
        .set_extension(&schema.scalars[1], Value::I32(5))
        .unwrap();
    assert_eq!(message.size(MarshalOptions::default()).unwrap(), 2);
    assert_eq!(
        message.encode_to_vec(MarshalOptions::default()).unwrap(),
        [40, 5]
    );

    assert!(message.clear_extension(5).is_some());
    assert!(message
        .encode_to_vec(MarshalOptions::default())
        .unwrap()
        .is_empty());
}

#[test]
fn test_message_extension() {
    let schema = extendable();
    let payload = Message::new(&schema.payload)
        .with(1, Value::String("hi".into()))
        .unwrap();
    let mut message = Message::new(&schema.info);
    message
        .set_extension(&schema.nested, payload.into())
        .unwrap();
    assert_eq!(
        message.encode_to_vec(MarshalOptions::default()).unwrap(),
        [
            58,  // extension 7: tag (7 << 3) + 2
            4,   // length of payload
              10, 2, 104, 105,  // field 1: "hi"
        ]
    );
}

#[test]
fn test_extension_value_mismatch() {
    let schema = extendable();
    let mut message = Message::new(&schema.info);
    message
        .set_extension(&schema.scalars[0], Value::String("3".into()))
        .unwrap();
    let error = message
        .encode_to_vec(MarshalOptions::default())
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Encode);
    assert_eq!(error.msg, "EncodeError(.3): Int32 field is not I32");
}

#[test]
fn test_set_extension_checks() {
    let schema = extendable();
    let registry = &schema.registry;
    let other = registry
        .register(
            MessageDescriptor::new("test.Other", Syntax::Proto2).extensions(1, 10),
            MessageLayout::default(),
        )
        .unwrap();

    // Extension of a different message.
    let mut message = Message::new(&other);
    let error = message
        .set_extension(&schema.scalars[0], Value::I32(1))
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Schema);

    // Outside the extension ranges.
    let far = extension(
        registry,
        "test.Extendable",
        "test.far",
        FieldDescriptor::new("far", 50, Kind::Int32),
    );
    let mut message = Message::new(&schema.info);
    assert!(message.set_extension(&far, Value::I32(1)).is_err());

    // No extensions slot.
    let closed = registry
        .register(
            MessageDescriptor::new("test.Closed", Syntax::Proto2).extensions(1, 10),
            MessageLayout {
                extensions: false,
                ..MessageLayout::default()
            },
        )
        .unwrap();
    let closed_ext = extension(
        registry,
        "test.Closed",
        "test.closed",
        FieldDescriptor::new("closed", 1, Kind::Bool),
    );
    let mut message = Message::new(&closed);
    assert!(message.extensions().is_none());
    assert!(message.set_extension(&closed_ext, Value::Bool(true)).is_err());
}

#[test]
fn test_register_extension_checks() {
    let schema = extendable();
    let registry = &schema.registry;
    let register = |name: &str, field: FieldDescriptor| {
        registry.register_extension(ExtensionDescriptor {
            full_name: name.to_owned(),
            extendee: "test.Extendable".to_owned(),
            field,
        })
    };

    assert!(register("test.zero", FieldDescriptor::new("zero", 0, Kind::Int32)).is_err());
    assert!(register(
        "test.huge",
        FieldDescriptor::new("huge", MAX_FIELD_NUMBER + 1, Kind::Int32)
    )
    .is_err());
    assert!(register(
        "test.dangling",
        FieldDescriptor::new("dangling", 8, Kind::Message).of_type("test.Nowhere")
    )
    .is_err());
    // The value type is registered, but reaches a type that is not.
    registry
        .register(
            MessageDescriptor::new("test.Outer", Syntax::Proto2).field(
                FieldDescriptor::new("inner", 1, Kind::Message).of_type("test.Inner"),
            ),
            MessageLayout::default(),
        )
        .unwrap();
    registry
        .register(
            MessageDescriptor::new("test.Inner", Syntax::Proto2)
                .field(FieldDescriptor::new("m", 1, Kind::Message).of_type("test.Nowhere")),
            MessageLayout::default(),
        )
        .unwrap();
    let error = register(
        "test.outer",
        FieldDescriptor::new("outer", 8, Kind::Message).of_type("test.Outer"),
    )
    .err()
    .unwrap();
    assert_eq!(error.kind(), ErrorKind::Build);
    assert_eq!(
        error.msg,
        "Cannot build coder table for test.Inner (field 1): Unregistered message type"
    );
    assert!(registry.find_extension("test.Extendable", 8).is_none());
    // Number 3 is taken.
    let error = register("test.again", FieldDescriptor::new("again", 3, Kind::Int32))
        .err()
        .unwrap();
    assert_eq!(error.kind(), ErrorKind::Schema);

    let found = registry.find_extension("test.Extendable", 3).unwrap();
    assert_eq!(found.full_name(), "test.e3");
    assert!(registry.find_extension("test.Extendable", 4).is_none());
    let found = registry.find_extension_by_name("test.payload").unwrap();
    assert_eq!(found.number(), 7);
    assert!(found.message_type().is_some());
    assert!(registry.find_extension_by_name("test.again").is_none());
}

#[test]
fn test_extension_names_unique() {
    let registry = Registry::new();
    let [a, b] = ["test.A", "test.B"].map(|name| {
        registry
            .register(
                MessageDescriptor::new(name, Syntax::Proto2).extensions(1, 100),
                MessageLayout::default(),
            )
            .unwrap()
    });
    let flag = extension(
        &registry,
        "test.A",
        "test.ext",
        FieldDescriptor::new("ext", 10, Kind::Bool),
    );

    // Same name, different extendee.
    let error = registry
        .register_extension(ExtensionDescriptor {
            full_name: "test.ext".into(),
            extendee: "test.B".into(),
            field: FieldDescriptor::new("ext", 20, Kind::String),
        })
        .err()
        .unwrap();
    assert_eq!(error.kind(), ErrorKind::Schema);
    assert!(registry.find_extension("test.B", 20).is_none());
    assert_eq!(registry.find_extension_by_name("test.ext").unwrap().extendee(), "test.A");

    // A failed registration leaves its name free.
    assert!(registry
        .register_extension(ExtensionDescriptor {
            full_name: "test.other".into(),
            extendee: "test.A".into(),
            field: FieldDescriptor::new("other", 10, Kind::Int32),
        })
        .is_err());
    let text = extension(
        &registry,
        "test.B",
        "test.other",
        FieldDescriptor::new("other", 20, Kind::String),
    );

    let options = MarshalOptions::default();
    let mut message = Message::new(&a);
    message.set_extension(&flag, Value::Bool(true)).unwrap();
    assert_eq!(message.encode_to_vec(options).unwrap(), [80, 1]);

    let mut message = Message::new(&b);
    message.set_extension(&text, Value::String("hi".into())).unwrap();
    assert_eq!(message.size(options).unwrap(), 5);
    assert_eq!(
        message.encode_to_vec(options).unwrap(),
        [
            162, 1, // tag: (20 << 3) + 2
            2, 104, 105, // "hi"
        ]
    );
}

/// `test.Set` is a message set with two registered payload extensions, 10 and 12.
fn message_set() -> (Arc<Registry>, Arc<MessageInfo>, Arc<MessageInfo>, [Arc<ExtensionType>; 2]) {
    let registry = Registry::new();
    let payload = registry
        .register(
            MessageDescriptor::new("test.Payload", Syntax::Proto2)
                .field(FieldDescriptor::new("text", 1, Kind::String)),
            MessageLayout::default(),
        )
        .unwrap();
    let set = registry
        .register(
            MessageDescriptor::new("test.Set", Syntax::Proto2)
                .message_set()
                .extensions(4, MAX_FIELD_NUMBER + 1),
            MessageLayout::default(),
        )
        .unwrap();
    let items = [10, 12].map(|number| {
        extension(
            &registry,
            "test.Set",
            &format!("test.item{number}"),
            FieldDescriptor::new(format!("item{number}"), number, Kind::Message)
                .of_type("test.Payload"),
        )
    });
    (registry, set, payload, items)
}

const MESSAGE_SET_BYTES: [u8; 26] = [
    11,                 // item start: (1 << 3) + 3
      16, 10,           //   type_id: 10
      26, 4,            //   message: length 4
        10, 2, 104, 105, //    field 1: "hi"
    12,                 // item end: (1 << 3) + 4
    11,                 // item start
      16, 12,           //   type_id: 12
      26, 4,            //   message: length 4
        10, 2, 121, 111, //    field 1: "yo"
    12,                 // item end
    11, 16, 99, 26, 0, 12, // unregistered item 99, kept verbatim
];

#[test]
fn test_message_set_layout() {
    let (_registry, set, payload, [item10, item12]) = message_set();
    let text = |s: &str| {
        Message::new(&payload)
            .with(1, Value::String(s.into()))
            .unwrap()
    };
    let mut message = Message::new(&set);
    message.set_extension(&item12, text("yo").into()).unwrap();
    message.set_extension(&item10, text("hi").into()).unwrap();
    message
        .set_unknown_fields(MESSAGE_SET_BYTES[20..].to_vec())
        .unwrap();

    assert_eq!(
        message.size(MarshalOptions::default()).unwrap(),
        MESSAGE_SET_BYTES.len()
    );
    assert_eq!(
        message.encode_to_vec(MarshalOptions::default()).unwrap(),
        MESSAGE_SET_BYTES
    );
}

#[test]
fn test_message_set_decode() {
    let (_registry, set, _payload, _items) = message_set();
    let message = set.decode(&MESSAGE_SET_BYTES).unwrap();

    let extensions = message.extensions().unwrap();
    assert_eq!(extensions.len(), 2);
    let item = message.extension(12).unwrap().value().as_message().unwrap();
    assert_eq!(item.get(1), Some(&Value::String("yo".into())));
    assert_eq!(message.unknown_fields().unwrap(), &MESSAGE_SET_BYTES[20..]);

    assert_eq!(
        message.encode_to_vec(MarshalOptions::default()).unwrap(),
        MESSAGE_SET_BYTES
    );
}

#[test]
fn test_message_set_scalar_item() {
    let (registry, set, _payload, _items) = message_set();
    let scalar = extension(
        &registry,
        "test.Set",
        "test.scalar",
        FieldDescriptor::new("scalar", 20, Kind::Int32),
    );
    let mut message = Message::new(&set);
    message.set_extension(&scalar, Value::I32(1)).unwrap();
    assert_eq!(message.size(MarshalOptions::default()).unwrap(), 0);
    let error = message
        .encode_to_vec(MarshalOptions::default())
        .unwrap_err();
    assert_eq!(
        error.msg,
        "EncodeError(.20): Message set item is not a message"
    );
}

#[test]
fn test_message_set_missing_slots() {
    let registry = Registry::new();
    let no_unknown = registry
        .register(
            MessageDescriptor::new("test.NoUnknownSet", Syntax::Proto2).message_set(),
            MessageLayout {
                unknown_fields: false,
                ..MessageLayout::default()
            },
        )
        .unwrap();
    let no_extensions = registry
        .register(
            MessageDescriptor::new("test.NoExtensionsSet", Syntax::Proto2).message_set(),
            MessageLayout {
                extensions: false,
                ..MessageLayout::default()
            },
        )
        .unwrap();

    // The failure is cached: every use reports the same error.
    for _ in 0..2 {
        let error = no_unknown.coder_table().err().unwrap();
        assert_eq!(error.reason, "MessageSet with no unknown-fields slot");
        assert_eq!(error.field, None);
        let error = Message::new(&no_unknown)
            .size(MarshalOptions::default())
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Build);
        assert_eq!(
            error.msg,
            "Cannot build coder table for test.NoUnknownSet: MessageSet with no unknown-fields slot"
        );
    }
    assert_eq!(
        no_extensions.coder_table().err().unwrap().reason,
        "MessageSet with no extensions slot"
    );
    assert_eq!(
        no_extensions.decode(&[]).unwrap_err().kind(),
        ErrorKind::Build
    );
}

#[test]
fn test_message_set_with_fields() {
    let registry = Registry::new();
    let info = registry
        .register(
            MessageDescriptor::new("test.FieldSet", Syntax::Proto2)
                .message_set()
                .field(FieldDescriptor::new("x", 1, Kind::Int32)),
            MessageLayout::default(),
        )
        .unwrap();
    assert_eq!(
        info.coder_table().err().unwrap().reason,
        "MessageSet declares regular fields"
    );
}
