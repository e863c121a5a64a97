use bytes::Bytes;
use protoframe::{BinaryFormat, ClassType, Field, TypeRef, TypeRegistry, Value};

fn ints(values: &[i32]) -> Value {
    Value::Array(values.iter().copied().map(Value::I32).collect())
}

#[test]
fn test_root_array_is_repeated_field() {
    let format = BinaryFormat::new(TypeRegistry::new());
    let ty = TypeRef::array_of(TypeRef::INT);
    let bytes = format.encode(&ints(&[1, 2, 3]), &ty).unwrap();
    assert_eq!(&bytes[..], &[0x08, 0x01, 0x08, 0x02, 0x08, 0x03]);
    assert_eq!(format.decode(bytes, &ty).unwrap(), ints(&[1, 2, 3]));

    let bytes = format.encode(&ints(&[]), &ty).unwrap();
    assert!(bytes.is_empty());
    assert_eq!(format.decode(bytes, &ty).unwrap(), ints(&[]));
}

#[test]
fn test_null_elements_are_skipped() {
    let format = BinaryFormat::new(TypeRegistry::new());
    let ty = TypeRef::array_of(TypeRef::STRING);
    let value = Value::Array(vec![Value::from("a"), Value::Null, Value::from("b")]);
    let bytes = format.encode(&value, &ty).unwrap();
    assert_eq!(
        format.decode(bytes, &ty).unwrap(),
        Value::Array(vec![Value::from("a"), Value::from("b")])
    );
}

#[test]
fn test_array_of_arrays() {
    let format = BinaryFormat::new(TypeRegistry::new());
    let ty = TypeRef::array_of(TypeRef::array_of(TypeRef::INT));
    let value = Value::Array(vec![ints(&[1, 2]), ints(&[]), ints(&[3])]);
    let bytes = format.encode(&value, &ty).unwrap();
    assert_eq!(
        &bytes[..],
        &[0x0A, 0x04, 0x08, 0x01, 0x08, 0x02, 0x0A, 0x00, 0x0A, 0x02, 0x08, 0x03]
    );
    assert_eq!(format.decode(bytes, &ty).unwrap(), value);

    let ty = TypeRef::array_of(ty);
    let value = Value::Array(vec![
        Value::Array(vec![ints(&[1]), ints(&[2, 3])]),
        Value::Array(vec![]),
    ]);
    let bytes = format.encode(&value, &ty).unwrap();
    assert_eq!(format.decode(bytes, &ty).unwrap(), value);
}

#[test]
fn test_map_entries() {
    let format = BinaryFormat::new(TypeRegistry::new());
    let ty = TypeRef::map_of(TypeRef::STRING, TypeRef::INT);
    let value = Value::Map(vec![
        (Value::from("b"), Value::I32(2)),
        (Value::from("a"), Value::I32(1)),
    ]);
    let bytes = format.encode(&value, &ty).unwrap();
    assert_eq!(
        &bytes[..],
        &[
            0x0A, 0x05, 0x0A, 0x01, b'b', 0x10, 0x02, //
            0x0A, 0x05, 0x0A, 0x01, b'a', 0x10, 0x01,
        ]
    );
    assert_eq!(format.decode(bytes, &ty).unwrap(), value);
}

#[test]
fn test_map_with_array_values_and_null_values() {
    let format = BinaryFormat::new(TypeRegistry::new());
    let ty = TypeRef::map_of(TypeRef::STRING, TypeRef::array_of(TypeRef::INT));
    let value = Value::Map(vec![
        (Value::from("evens"), ints(&[2, 4])),
        (Value::from("none"), Value::Null),
        (Value::from("empty"), ints(&[])),
    ]);
    let bytes = format.encode(&value, &ty).unwrap();
    assert_eq!(format.decode(bytes, &ty).unwrap(), value);
}

#[test]
fn test_packed_scalars_are_accepted() {
    let format = BinaryFormat::new(TypeRegistry::new());
    let ty = TypeRef::array_of(TypeRef::INT);
    let packed = Bytes::from_static(&[0x0A, 0x04, 0x01, 0x02, 0xAC, 0x02, 0x08, 0x04]);
    assert_eq!(format.decode(packed, &ty).unwrap(), ints(&[1, 2, 300, 4]));

    let ty = TypeRef::array_of(TypeRef::DOUBLE);
    let mut packed = vec![0x0A, 0x10];
    packed.extend_from_slice(&1.5f64.to_le_bytes());
    packed.extend_from_slice(&(-2.0f64).to_le_bytes());
    assert_eq!(
        format.decode(Bytes::from(packed), &ty).unwrap(),
        Value::Array(vec![Value::F64(1.5), Value::F64(-2.0)])
    );
}

fn bag_registry() -> TypeRegistry {
    let registry = TypeRegistry::new();
    registry
        .register(
            ClassType::new("Point")
                .field(Field::new("x", 1, TypeRef::INT))
                .field(Field::new("y", 2, TypeRef::INT)),
        )
        .unwrap();
    registry
        .register(
            ClassType::new("Bag")
                .field(Field::new("items", 1, TypeRef::array_of(TypeRef::INT)))
                .field(Field::new("count", 2, TypeRef::INT).optional())
                .field(Field::new("tags", 3, TypeRef::array_of(TypeRef::STRING)).optional())
                .field(
                    Field::new("grid", 4, TypeRef::array_of(TypeRef::array_of(TypeRef::INT)))
                        .optional(),
                )
                .field(
                    Field::new("points", 5, TypeRef::array_of(TypeRef::named("Point"))).optional(),
                )
                .field(
                    Field::new("index", 6, TypeRef::map_of(TypeRef::STRING, TypeRef::named("Point")))
                        .optional(),
                ),
        )
        .unwrap();
    registry
}

#[test]
fn test_array_fields() {
    let registry = bag_registry();
    let format = BinaryFormat::new(registry.clone());
    let p = |x: i32, y: i32| {
        Value::Object(
            registry
                .instantiate("Point", [("x", Value::I32(x)), ("y", Value::I32(y))])
                .unwrap(),
        )
    };
    let bag = registry
        .instantiate(
            "Bag",
            [
                ("items", ints(&[5, 6, 7])),
                ("count", Value::I32(3)),
                ("tags", Value::Array(vec![Value::from("a"), Value::from("b")])),
                ("grid", Value::Array(vec![ints(&[1, 2]), ints(&[3])])),
                ("points", Value::Array(vec![p(1, 1), p(2, 2)])),
                ("index", Value::Map(vec![(Value::from("origin"), p(0, 0))])),
            ],
        )
        .unwrap();
    let ty = TypeRef::named("Bag");
    let bytes = format.encode(&Value::Object(bag.clone()), &ty).unwrap();
    assert_eq!(&bytes[..6], &[0x08, 0x05, 0x08, 0x06, 0x08, 0x07]);
    assert_eq!(format.decode(bytes, &ty).unwrap(), Value::Object(bag));
}

#[test]
fn test_absent_array_fields() {
    let registry = bag_registry();
    let format = BinaryFormat::new(registry.clone());
    let ty = TypeRef::named("Bag");

    let bag = registry.instantiate("Bag", [("items", ints(&[]))]).unwrap();
    let bytes = format.encode(&Value::Object(bag), &ty).unwrap();
    assert!(bytes.is_empty());

    let decoded = format.decode(bytes, &ty).unwrap();
    let decoded = decoded.as_object().unwrap();
    // Required arrays come back empty, optional ones absent.
    assert_eq!(registry.read_field(decoded, "items").unwrap(), ints(&[]));
    assert_eq!(registry.read_field(decoded, "tags").unwrap(), Value::Null);
    assert_eq!(registry.read_field(decoded, "index").unwrap(), Value::Null);
}

#[test]
fn test_interleaved_repeated_fields() {
    let registry = bag_registry();
    let format = BinaryFormat::new(registry.clone());
    let bytes = Bytes::from_static(&[0x08, 0x01, 0x10, 0x09, 0x08, 0x02, 0x1A, 0x01, b'z', 0x08, 0x03]);
    let decoded = format.decode(bytes, &TypeRef::named("Bag")).unwrap();
    let decoded = decoded.as_object().unwrap();
    assert_eq!(registry.read_field(decoded, "items").unwrap(), ints(&[1, 2, 3]));
    assert_eq!(registry.read_field(decoded, "count").unwrap(), Value::I32(9));
    assert_eq!(
        registry.read_field(decoded, "tags").unwrap(),
        Value::Array(vec![Value::from("z")])
    );
}

#[test]
fn test_null_array_root() {
    let format = BinaryFormat::new(TypeRegistry::new());
    let ty = TypeRef::array_of(TypeRef::INT);
    let bytes = format.encode(&Value::Null, &ty).unwrap();
    assert!(bytes.is_empty());
    assert_eq!(format.decode(bytes, &ty).unwrap(), ints(&[]));

    let ty = TypeRef::map_of(TypeRef::STRING, TypeRef::INT);
    let bytes = format.encode(&Value::Null, &ty).unwrap();
    assert!(bytes.is_empty());
    assert_eq!(format.decode(bytes, &ty).unwrap(), Value::Map(vec![]));
}
