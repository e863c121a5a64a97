use bytes::Bytes;
use protoframe::{
    BinaryFormat, ClassType, CodecError, Config, Field, Flavour, MalformedInput, MethodType, Object,
    TypeRef, TypeRegistry, Value,
};

fn point_type() -> ClassType {
    ClassType::new("Point")
        .field(Field::new("x", 1, TypeRef::INT))
        .field(Field::new("y", 2, TypeRef::INT))
}

fn point(registry: &TypeRegistry, x: i32, y: i32) -> Value {
    Value::Object(
        registry
            .instantiate("Point", [("x", Value::I32(x)), ("y", Value::I32(y))])
            .unwrap(),
    )
}

#[test]
fn test_unsupported_flavours() {
    let registry = TypeRegistry::new();
    registry.register(MethodType::new("run")).unwrap();
    let format = BinaryFormat::new(registry);

    let err = format.encode(&Value::Null, &TypeRef::named("run")).unwrap_err();
    assert!(matches!(
        err,
        CodecError::UnsupportedFlavour { flavour: Flavour::Method, ref type_name } if type_name == "run"
    ));

    let err = format
        .decode(Bytes::new(), &TypeRef::named("Missing"))
        .unwrap_err();
    assert!(matches!(
        err,
        CodecError::UnsupportedFlavour { flavour: Flavour::Unknown, .. }
    ));
}

#[test]
fn test_field_type_registered_later() {
    let registry = TypeRegistry::new();
    registry
        .register(ClassType::new("Line").field(Field::new("start", 1, TypeRef::named("Point"))))
        .unwrap();
    let format = BinaryFormat::new(registry.clone());
    let ty = TypeRef::named("Line");
    let bytes = Bytes::from_static(&[0x0A, 0x04, 0x08, 0x01, 0x10, 0x02]);

    let err = format.decode(bytes.clone(), &ty).unwrap_err();
    assert!(matches!(err, CodecError::UnsupportedFlavour { .. }));

    registry.register(point_type()).unwrap();
    let decoded = format.decode(bytes.clone(), &ty).unwrap();
    let line = registry
        .instantiate("Line", [("start", point(&registry, 1, 2))])
        .unwrap();
    assert_eq!(decoded, Value::Object(line.clone()));
    assert_eq!(format.encode(&Value::Object(line), &ty).unwrap(), bytes);
}

#[test]
fn test_cache_eviction() {
    let registry = TypeRegistry::new();
    registry.register(point_type()).unwrap();
    registry
        .register(
            ClassType::new("Chain")
                .field(Field::new("value", 1, TypeRef::INT))
                .field(Field::new("next", 2, TypeRef::named("Chain")).optional()),
        )
        .unwrap();
    let format = BinaryFormat::new(registry.clone());
    let cache = format.resolver().cache();
    assert!(cache.is_empty());

    let ty = TypeRef::named("Point");
    let bytes = format.encode(&point(&registry, 1, 2), &ty).unwrap();
    let access = registry.lookup("Point").unwrap();
    assert!(cache.contains(&access));

    // Primitives are not cached.
    format.encode(&Value::I32(1), &TypeRef::INT).unwrap();
    assert_eq!(cache.len(), 1);

    assert!(format.forget("Point").is_some());
    assert!(!cache.contains(&access));
    assert!(format.registry().lookup("Point").is_none());
    assert!(format.forget("Point").is_none());

    // A re-registered type gets a fresh codec.
    registry.register(point_type()).unwrap();
    assert_eq!(format.encode(&point(&registry, 1, 2), &ty).unwrap(), bytes);

    let tail = registry.instantiate("Chain", [("value", Value::I32(2))]).unwrap();
    let head = registry
        .instantiate("Chain", [("value", Value::I32(1)), ("next", Value::Object(tail))])
        .unwrap();
    let chain = Value::Object(head);
    let chain_ty = TypeRef::named("Chain");
    let bytes = format.encode(&chain, &chain_ty).unwrap();
    assert_eq!(&bytes[..], &[0x08, 0x01, 0x12, 0x02, 0x08, 0x02]);
    assert_eq!(cache.len(), 2);

    format.clear_cache();
    assert!(cache.is_empty());
    assert_eq!(format.encode(&chain, &chain_ty).unwrap(), bytes);
    assert_eq!(format.decode(bytes, &chain_ty).unwrap(), chain);
}

fn nested_registry() -> TypeRegistry {
    let registry = TypeRegistry::new();
    registry
        .register(ClassType::new("Inner").field(Field::new("a", 1, TypeRef::INT)))
        .unwrap();
    registry
        .register(ClassType::new("Outer").field(Field::new("inner", 1, TypeRef::named("Inner"))))
        .unwrap();
    registry
}

fn outer(registry: &TypeRegistry, inner: (&str, Value)) -> Value {
    let inner = registry.instantiate("Inner", [inner]).unwrap();
    Value::Object(
        registry
            .instantiate("Outer", [("inner", Value::Object(inner))])
            .unwrap(),
    )
}

const OUTER_WITH_TEXT: &[u8] = &[0x0A, 0x04, 0x0A, 0x02, b'h', b'i'];

#[test]
fn test_nested_type_replaced() {
    let registry = nested_registry();
    let format = BinaryFormat::new(registry.clone());
    let ty = TypeRef::named("Outer");
    let bytes = format
        .encode(&outer(&registry, ("a", Value::I32(5))), &ty)
        .unwrap();
    assert_eq!(&bytes[..], &[0x0A, 0x02, 0x08, 0x05]);
    let generation = registry.generation();

    registry
        .register(ClassType::new("Inner").field(Field::new("b", 1, TypeRef::STRING)))
        .unwrap();
    assert_eq!(registry.generation(), generation + 1);

    let value = outer(&registry, ("b", Value::from("hi")));
    let bytes = format.encode(&value, &ty).unwrap();
    assert_eq!(&bytes[..], OUTER_WITH_TEXT);
    assert_eq!(format.decode(bytes, &ty).unwrap(), value);
}

#[test]
fn test_forget_nested_type() {
    let registry = nested_registry();
    let format = BinaryFormat::new(registry.clone());
    let ty = TypeRef::named("Outer");
    let old = outer(&registry, ("a", Value::I32(5)));
    format.encode(&old, &ty).unwrap();

    assert!(format.forget("Inner").is_some());
    let err = format.encode(&old, &ty).unwrap_err();
    assert!(matches!(
        err,
        CodecError::UnsupportedFlavour { flavour: Flavour::Unknown, ref type_name } if type_name == "Inner"
    ));

    registry
        .register(ClassType::new("Inner").field(Field::new("b", 1, TypeRef::STRING)))
        .unwrap();
    let value = outer(&registry, ("b", Value::from("hi")));
    assert_eq!(format.encode(&value, &ty).unwrap(), OUTER_WITH_TEXT);
    assert_eq!(
        format.decode(Bytes::from_static(OUTER_WITH_TEXT), &ty).unwrap(),
        value
    );
}

#[test]
fn test_evict_unlinks_dependents() {
    let registry = nested_registry();
    let format = BinaryFormat::new(registry.clone());
    let cache = format.resolver().cache();
    let ty = TypeRef::named("Outer");
    let value = outer(&registry, ("a", Value::I32(5)));
    let bytes = format.encode(&value, &ty).unwrap();
    let inner = registry.lookup("Inner").unwrap();
    assert_eq!(cache.len(), 2);

    assert_eq!(cache.evict(&inner), 1);
    assert!(!cache.contains(&inner));
    // The outer codec no longer holds the evicted one and rebuilds it.
    assert_eq!(format.encode(&value, &ty).unwrap(), bytes);
    assert!(cache.contains(&inner));
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_cache_keys_on_integer_encoding() {
    let registry = TypeRegistry::new();
    registry
        .register(
            ClassType::new("Series")
                .field(Field::new("plain", 1, TypeRef::array_of(TypeRef::INT)))
                .field(Field::new("zig", 2, TypeRef::array_of(TypeRef::INT)).signed()),
        )
        .unwrap();
    let format = BinaryFormat::new(registry.clone());
    let series = registry
        .instantiate(
            "Series",
            [
                ("plain", Value::Array(vec![Value::I32(-1)])),
                ("zig", Value::Array(vec![Value::I32(-1)])),
            ],
        )
        .unwrap();
    let ty = TypeRef::named("Series");
    let bytes = format.encode(&Value::Object(series.clone()), &ty).unwrap();
    // 11 bytes for the plain element, 2 for the zigzag one.
    assert_eq!(bytes.len(), 13);
    assert_eq!(&bytes[11..], &[0x10, 0x01]);
    // The class and one array codec per encoding.
    assert_eq!(format.resolver().cache().len(), 3);
    assert_eq!(format.decode(bytes, &ty).unwrap(), Value::Object(series));
}

#[test]
fn test_malformed_input() {
    let format = BinaryFormat::new(TypeRegistry::new());
    let cases: [(&'static [u8], fn(&MalformedInput) -> bool); 5] = [
        (&[0x08, 0x96], |e| matches!(e, MalformedInput::Truncated)),
        (&[0x0B], |e| matches!(e, MalformedInput::UnknownWireType(3))),
        (&[0x00, 0x01], |e| matches!(e, MalformedInput::InvalidFieldNumber(0))),
        (&[0x0A, 0x05, b'a'], |e| matches!(e, MalformedInput::Truncated)),
        (
            &[0x08, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01],
            |e| matches!(e, MalformedInput::VarintOverflow),
        ),
    ];
    for (input, check) in cases {
        match format.decode(Bytes::from_static(input), &TypeRef::STRING) {
            Err(CodecError::Malformed(e)) => assert!(check(&e), "{input:02x?}: {e}"),
            other => panic!("{input:02x?}: unexpected {other:?}"),
        }
    }
}

fn chain_registry() -> TypeRegistry {
    let registry = TypeRegistry::new();
    registry
        .register(
            ClassType::new("Link")
                .field(Field::new("depth", 1, TypeRef::INT).optional())
                .field(Field::new("next", 2, TypeRef::named("Link")).optional()),
        )
        .unwrap();
    registry
}

fn chain(registry: &TypeRegistry, links: usize) -> Value {
    let mut next = Value::Null;
    for depth in (0..links).rev() {
        let link: Object = registry
            .instantiate(
                "Link",
                [("depth", Value::I32(depth as i32)), ("next", next)],
            )
            .unwrap();
        next = Value::Object(link);
    }
    next
}

#[test]
fn test_depth_limit() {
    let registry = chain_registry();
    let unlimited = BinaryFormat::new(registry.clone());
    let limited = BinaryFormat::with_config(registry.clone(), Config::default().with_max_depth(3));
    let ty = TypeRef::named("Link");

    // The root and three nested links fit.
    let fits = chain(&registry, 4);
    let bytes = limited.encode(&fits, &ty).unwrap();
    assert_eq!(limited.decode(bytes, &ty).unwrap(), fits);

    let deep = chain(&registry, 5);
    let err = limited.encode(&deep, &ty).unwrap_err();
    assert!(matches!(err, CodecError::Encode(_)));

    let bytes = unlimited.encode(&deep, &ty).unwrap();
    let err = limited.decode(bytes.clone(), &ty).unwrap_err();
    assert!(matches!(err, CodecError::Malformed(MalformedInput::TooDeep(3))));
    assert_eq!(unlimited.decode(bytes, &ty).unwrap(), deep);
}

#[test]
fn test_length_limit() {
    let format = BinaryFormat::with_config(TypeRegistry::new(), Config::default().with_max_length(4));
    let ok = format
        .decode(Bytes::from_static(b"\x0a\x04abcd"), &TypeRef::STRING)
        .unwrap();
    assert_eq!(ok, Value::from("abcd"));

    let err = format
        .decode(Bytes::from_static(b"\x0a\x05abcde"), &TypeRef::STRING)
        .unwrap_err();
    assert!(matches!(
        err,
        CodecError::Malformed(MalformedInput::LengthExceeded { found: 5, max: 4 })
    ));
}

#[test]
fn test_shared_between_threads() {
    let registry = chain_registry();
    let format = BinaryFormat::with_config(registry.clone(), Config::default().with_chunk_capacity(8));
    let ty = TypeRef::named("Link");

    std::thread::scope(|s| {
        for links in 1..=8 {
            let (format, registry, ty) = (&format, &registry, &ty);
            s.spawn(move || {
                let value = chain(registry, links);
                for _ in 0..50 {
                    let bytes = format.encode(&value, ty).unwrap();
                    assert_eq!(format.decode(bytes, ty).unwrap(), value);
                }
            });
        }
    });
    assert_eq!(format.resolver().cache().len(), 1);
}
