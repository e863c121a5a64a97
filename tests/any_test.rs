use bytes::Bytes;
use protoframe::reader::RawPayload;
use protoframe::{
    BinaryFormat, ClassType, CodecError, EnumType, Field, InterfaceType, TypeRef, TypeRegistry,
    Value,
};

fn point_type() -> ClassType {
    ClassType::new("Point")
        .field(Field::new("x", 1, TypeRef::INT))
        .field(Field::new("y", 2, TypeRef::INT))
}

fn holder_type() -> ClassType {
    ClassType::new("Holder").field(Field::new("content", 1, TypeRef::Any).optional())
}

fn holder(registry: &TypeRegistry, content: Value) -> Value {
    Value::Object(registry.instantiate("Holder", [("content", content)]).unwrap())
}

fn content(registry: &TypeRegistry, value: &Value) -> Value {
    registry
        .read_field(value.as_object().unwrap(), "content")
        .unwrap()
}

const HOLDER_WITH_POINT: &[u8] = &[
    0x0A, 0x0D, // content
    0x0A, 0x05, b'P', b'o', b'i', b'n', b't', // type tag
    0x12, 0x04, 0x08, 0x01, 0x10, 0x02, // payload
];

#[test]
fn test_any_round_trip() {
    let registry = TypeRegistry::new();
    registry.register(point_type()).unwrap();
    registry.register(holder_type()).unwrap();
    let format = BinaryFormat::new(registry.clone());

    let point = registry
        .instantiate("Point", [("x", Value::I32(1)), ("y", Value::I32(2))])
        .unwrap();
    let value = holder(&registry, Value::Object(point));
    let ty = TypeRef::named("Holder");
    let bytes = format.encode(&value, &ty).unwrap();
    assert_eq!(&bytes[..], HOLDER_WITH_POINT);
    assert_eq!(format.decode(bytes, &ty).unwrap(), value);
}

#[test]
fn test_any_scalars_arrays_and_maps() {
    let registry = TypeRegistry::new();
    registry.register(holder_type()).unwrap();
    registry
        .register(EnumType::new("Color", ["Red", "Green"]))
        .unwrap();
    let format = BinaryFormat::new(registry.clone());
    let ty = TypeRef::named("Holder");

    let green = registry.enumerator("Color", "Green").unwrap();
    let contents = vec![
        Value::I64(-5),
        Value::from("text"),
        Value::F64(0.5),
        Value::Bool(false),
        Value::Enum(green),
        Value::Array(vec![Value::I32(1), Value::from("two"), Value::Array(vec![])]),
        Value::Map(vec![(Value::from("k"), Value::U8(3))]),
    ];
    for item in contents {
        let value = holder(&registry, item.clone());
        let bytes = format.encode(&value, &ty).unwrap();
        let decoded = format.decode(bytes, &ty).unwrap();
        assert_eq!(content(&registry, &decoded), item);
    }

    let bytes = format.encode(&holder(&registry, Value::I64(-5)), &ty).unwrap();
    let mut expected = vec![0x0A, 0x11, 0x0A, 0x04];
    expected.extend_from_slice(b"long");
    expected.push(0x10);
    expected.extend_from_slice(&[0xFB, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
    assert_eq!(&bytes[..], &expected[..]);
}

#[test]
fn test_any_root() {
    let registry = TypeRegistry::new();
    registry.register(point_type()).unwrap();
    let format = BinaryFormat::new(registry.clone());
    let point = registry
        .instantiate("Point", [("x", Value::I32(1)), ("y", Value::I32(2))])
        .unwrap();
    let bytes = format.encode(&Value::Object(point.clone()), &TypeRef::Any).unwrap();
    assert_eq!(&bytes[..], &HOLDER_WITH_POINT[2..]);
    assert_eq!(
        format.decode(bytes, &TypeRef::Any).unwrap(),
        Value::Object(point)
    );
}

#[test]
fn test_named_interface() {
    let registry = TypeRegistry::new();
    registry.register(point_type()).unwrap();
    registry.register(InterfaceType::new("Shape")).unwrap();
    registry
        .register(ClassType::new("Canvas").field(Field::new("shape", 1, TypeRef::named("Shape"))))
        .unwrap();
    let format = BinaryFormat::new(registry.clone());
    let point = registry
        .instantiate("Point", [("x", Value::I32(1)), ("y", Value::I32(2))])
        .unwrap();
    let canvas = Value::Object(
        registry
            .instantiate("Canvas", [("shape", Value::Object(point))])
            .unwrap(),
    );
    let ty = TypeRef::named("Canvas");
    let bytes = format.encode(&canvas, &ty).unwrap();
    assert_eq!(&bytes[..], HOLDER_WITH_POINT);
    assert_eq!(format.decode(bytes, &ty).unwrap(), canvas);
}

#[test]
fn test_unknown_tag_is_deferred() {
    let registry = TypeRegistry::new();
    registry.register(holder_type()).unwrap();
    let format = BinaryFormat::new(registry.clone());
    let ty = TypeRef::named("Holder");

    let decoded = format
        .decode(Bytes::from_static(HOLDER_WITH_POINT), &ty)
        .unwrap();
    let deferred = content(&registry, &decoded);
    let deferred = deferred.as_deferred().unwrap().clone();
    assert_eq!(deferred.type_tag(), "Point");
    assert_eq!(
        deferred.payload(),
        &RawPayload::Delimited(Bytes::from_static(&[0x08, 0x01, 0x10, 0x02]))
    );

    // Passes through unchanged.
    let bytes = format.encode(&decoded, &ty).unwrap();
    assert_eq!(&bytes[..], HOLDER_WITH_POINT);

    // Not materializable until the type exists.
    let err = format
        .materialize(&deferred, &TypeRef::named("Point"))
        .unwrap_err();
    assert!(matches!(err, CodecError::UnsupportedFlavour { .. }));

    registry.register(point_type()).unwrap();
    let point = format
        .materialize(&deferred, &TypeRef::named("Point"))
        .unwrap();
    let expected = registry
        .instantiate("Point", [("x", Value::I32(1)), ("y", Value::I32(2))])
        .unwrap();
    assert_eq!(point, Value::Object(expected.clone()));
    assert_eq!(
        format.materialize_tagged(&deferred).unwrap(),
        Value::Object(expected.clone())
    );

    // Decoding again now resolves the tag directly.
    let decoded = format
        .decode(Bytes::from_static(HOLDER_WITH_POINT), &ty)
        .unwrap();
    assert_eq!(content(&registry, &decoded), Value::Object(expected));
}

#[test]
fn test_deferred_scalar_payload() {
    let registry = TypeRegistry::new();
    registry.register(holder_type()).unwrap();
    let format = BinaryFormat::new(registry.clone());
    let ty = TypeRef::named("Holder");

    // { content: { tag: "Counter", payload: varint 7 } }
    let mut input = vec![0x0A, 0x0B, 0x0A, 0x07];
    input.extend_from_slice(b"Counter");
    input.extend_from_slice(&[0x10, 0x07]);
    let input = Bytes::from(input);

    let decoded = format.decode(input.clone(), &ty).unwrap();
    let deferred = content(&registry, &decoded);
    let deferred = deferred.as_deferred().unwrap();
    assert_eq!(deferred.payload(), &RawPayload::Varint(7));
    assert_eq!(format.encode(&decoded, &ty).unwrap(), input);
    assert_eq!(
        format.materialize(deferred, &TypeRef::LONG).unwrap(),
        Value::I64(7)
    );
}

#[test]
fn test_payload_before_tag() {
    let registry = TypeRegistry::new();
    registry.register(point_type()).unwrap();
    registry.register(holder_type()).unwrap();
    let format = BinaryFormat::new(registry.clone());

    let mut input = vec![0x0A, 0x0D, 0x12, 0x04, 0x08, 0x01, 0x10, 0x02, 0x0A, 0x05];
    input.extend_from_slice(b"Point");
    let decoded = format
        .decode(Bytes::from(input), &TypeRef::named("Holder"))
        .unwrap();
    let expected = registry
        .instantiate("Point", [("x", Value::I32(1)), ("y", Value::I32(2))])
        .unwrap();
    assert_eq!(content(&registry, &decoded), Value::Object(expected));
}

#[test]
fn test_any_errors() {
    let registry = TypeRegistry::new();
    registry.register(holder_type()).unwrap();
    let format = BinaryFormat::new(registry.clone());
    let ty = TypeRef::named("Holder");

    // Encoding an instance of an unregistered class.
    let stray = protoframe::Object::new("Stray", 0);
    let err = format
        .encode(&holder(&registry, Value::Object(stray)), &ty)
        .unwrap_err();
    assert!(matches!(err, CodecError::UnresolvableType(ref name) if name == "Stray"));

    // An any-value without a tag.
    let err = format
        .decode(Bytes::from_static(&[0x0A, 0x02, 0x10, 0x01]), &ty)
        .unwrap_err();
    assert!(err.is_malformed());
}

#[test]
fn test_null_any_root() {
    let format = BinaryFormat::new(TypeRegistry::new());
    let bytes = format.encode(&Value::Null, &TypeRef::Any).unwrap();
    assert!(bytes.is_empty());
    assert_eq!(format.decode(bytes, &TypeRef::Any).unwrap(), Value::Null);

    // Non-empty input still needs a tag.
    let err = format
        .decode(Bytes::from_static(&[0x12, 0x00]), &TypeRef::Any)
        .unwrap_err();
    assert!(err.is_malformed());
}
