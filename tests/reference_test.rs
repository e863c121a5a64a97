use bytes::Bytes;
use protoframe::{BinaryFormat, ClassType, CodecError, Field, Object, TypeRef, TypeRegistry, Value};

fn node_type(name: &str, references: bool) -> ClassType {
    ClassType::new(name)
        .field(Field::new("name", 1, TypeRef::STRING).optional())
        .field(Field::new("next", 2, TypeRef::named(name)).optional())
        .field(Field::new("peers", 3, TypeRef::array_of(TypeRef::named(name))).optional())
        .references(references)
}

fn node(registry: &TypeRegistry, ty: &str, name: &str) -> Object {
    registry.instantiate(ty, [("name", Value::from(name))]).unwrap()
}

fn field(registry: &TypeRegistry, value: &Value, name: &str) -> Value {
    registry.read_field(value.as_object().unwrap(), name).unwrap()
}

#[test]
fn test_shared_instance_written_once() {
    let registry = TypeRegistry::new();
    registry.register(node_type("Node", true)).unwrap();
    let format = BinaryFormat::new(registry.clone());

    let shared = Value::Object(node(&registry, "Node", "shared"));
    let root = registry
        .instantiate(
            "Node",
            [
                ("name", Value::from("root")),
                ("peers", Value::Array(vec![shared.clone(), shared])),
            ],
        )
        .unwrap();

    let ty = TypeRef::named("Node");
    let bytes = format.encode(&Value::Object(root), &ty).unwrap();
    // name, first peer in full, second peer as id 1 (the root is 0).
    let mut expected = vec![0x0A, 0x04];
    expected.extend_from_slice(b"root");
    expected.extend_from_slice(&[0x1A, 0x08, 0x0A, 0x06]);
    expected.extend_from_slice(b"shared");
    expected.extend_from_slice(&[0x18, 0x01]);
    assert_eq!(&bytes[..], &expected[..]);

    let decoded = format.decode(bytes, &ty).unwrap();
    let peers = field(&registry, &decoded, "peers");
    let peers = peers.as_array().unwrap();
    assert_eq!(peers.len(), 2);
    let (a, b) = (peers[0].as_object().unwrap(), peers[1].as_object().unwrap());
    assert!(Object::ptr_eq(a, b));
    assert_eq!(registry.read_field(a, "name").unwrap(), Value::from("shared"));
}

#[test]
fn test_without_references_instances_are_copied() {
    let registry = TypeRegistry::new();
    registry.register(node_type("Leaf", false)).unwrap();
    let format = BinaryFormat::new(registry.clone());

    let shared = Value::Object(node(&registry, "Leaf", "shared"));
    let root = registry
        .instantiate(
            "Leaf",
            [("peers", Value::Array(vec![shared.clone(), shared]))],
        )
        .unwrap();
    let ty = TypeRef::named("Leaf");
    let bytes = format.encode(&Value::Object(root), &ty).unwrap();
    let decoded = format.decode(bytes, &ty).unwrap();
    let peers = field(&registry, &decoded, "peers");
    let peers = peers.as_array().unwrap();
    assert_eq!(peers[0], peers[1]);
    assert!(!Object::ptr_eq(
        peers[0].as_object().unwrap(),
        peers[1].as_object().unwrap()
    ));
}

#[test]
fn test_cycle_round_trip() {
    let registry = TypeRegistry::new();
    registry.register(node_type("Node", true)).unwrap();
    let format = BinaryFormat::new(registry.clone());
    let access = registry.lookup("Node").unwrap();
    let next = access.desc().fields()[1].clone();

    let a = node(&registry, "Node", "a");
    let b = node(&registry, "Node", "b");
    access.set(&a, &next, Value::Object(b.clone())).unwrap();
    access.set(&b, &next, Value::Object(a.clone())).unwrap();

    let ty = TypeRef::named("Node");
    let bytes = format.encode(&Value::Object(a), &ty).unwrap();
    // a { name, next: b { name, next: #0 } }
    assert_eq!(
        &bytes[..],
        &[0x0A, 0x01, b'a', 0x12, 0x05, 0x0A, 0x01, b'b', 0x10, 0x00]
    );

    let decoded = format.decode(bytes, &ty).unwrap();
    let a2 = decoded.as_object().unwrap();
    let b2 = field(&registry, &decoded, "next");
    let back = field(&registry, &b2, "next");
    assert!(Object::ptr_eq(back.as_object().unwrap(), a2));
    assert_eq!(
        registry.read_field(b2.as_object().unwrap(), "name").unwrap(),
        Value::from("b")
    );
}

#[test]
fn test_self_reference() {
    let registry = TypeRegistry::new();
    registry.register(node_type("Node", true)).unwrap();
    let format = BinaryFormat::new(registry.clone());
    let access = registry.lookup("Node").unwrap();
    let next = access.desc().fields()[1].clone();

    let me = node(&registry, "Node", "me");
    access.set(&me, &next, Value::Object(me.clone())).unwrap();

    let ty = TypeRef::named("Node");
    let bytes = format.encode(&Value::Object(me), &ty).unwrap();
    assert_eq!(&bytes[..], &[0x0A, 0x02, b'm', b'e', 0x10, 0x00]);
    let decoded = format.decode(bytes, &ty).unwrap();
    let again = field(&registry, &decoded, "next");
    assert!(Object::ptr_eq(again.as_object().unwrap(), decoded.as_object().unwrap()));
}

#[test]
fn test_forward_reference_is_rejected() {
    let registry = TypeRegistry::new();
    registry.register(node_type("Node", true)).unwrap();
    let format = BinaryFormat::new(registry);

    let err = format
        .decode(Bytes::from_static(&[0x10, 0x05]), &TypeRef::named("Node"))
        .unwrap_err();
    assert!(matches!(
        err,
        CodecError::UnresolvableReference { id: 5, known: 1 }
    ));
}

#[test]
fn test_reference_ids_are_per_call() {
    let registry = TypeRegistry::new();
    registry.register(node_type("Node", true)).unwrap();
    let format = BinaryFormat::new(registry.clone());
    let ty = TypeRef::named("Node");

    let value = Value::Object(node(&registry, "Node", "n"));
    let first = format.encode(&value, &ty).unwrap();
    let second = format.encode(&value, &ty).unwrap();
    assert_eq!(first, second);
}
