//! Binary codec round-trip behavior against the sample schema.

mod common;

use coda::binary::{decode_from_slice, encode_to_vec, BinaryDecoder};
use coda::descriptor::{
    DescriptorPool, FieldDescriptor, FieldKey, FieldOptions, FileDescriptor, StructDescriptor,
};
use coda::object::{ObjectRef, Value};
use coda::registry::TypeRegistry;
use coda::testing::assert_objects_equal;
use coda::types::Type;

use common::{create_sample, key, list, sample_schema};

/// A one-field `BoolValue { value: bool = 1 }` schema.
fn bool_value() -> (DescriptorPool, TypeRegistry, coda::descriptor::StructId) {
    let mut pool = DescriptorPool::new();
    let file = pool.add_file(FileDescriptor {
        name: "descriptors.coda".to_owned(),
        package: "coda.descriptors".to_owned(),
        ..Default::default()
    });
    let bool_ty = pool.intern_type(Type::Bool);
    let mut desc = StructDescriptor::new("BoolValue", file);
    desc.insert_field(FieldDescriptor {
        name: "value".to_owned(),
        id: 1,
        ty: bool_ty,
        options: FieldOptions::default(),
    });
    let sid = pool.add_struct(desc);
    pool.file_mut(file).structs.push(sid);
    pool.freeze();
    (pool, TypeRegistry::new(), sid)
}

#[test]
fn encode_decode_boolean() {
    let (pool, registry, bool_value) = bool_value();
    let value_key = FieldKey {
        holder: bool_value,
        id: 1,
    };
    let source = ObjectRef::new(bool_value);
    source.set(value_key, Value::Bool(true));

    let bytes = encode_to_vec(&pool, &source).unwrap();
    let result = decode_from_slice(&pool, &registry, &bytes, bool_value).unwrap();
    assert!(result.has(value_key));
    assert_eq!(result.get(value_key), Some(Value::Bool(true)));
}

#[test]
fn encode_decode_sample() {
    let sample = sample_schema();
    let source = create_sample(&sample);

    let bytes = encode_to_vec(&sample.pool, &source).unwrap();
    let result = decode_from_slice(&sample.pool, &sample.registry, &bytes, sample.s2).unwrap();
    assert_objects_equal(&sample.pool, &source, &result);
}

#[test]
fn roundtrip_is_byte_stable() {
    let sample = sample_schema();
    let source = create_sample(&sample);

    let first = encode_to_vec(&sample.pool, &source).unwrap();
    let decoded = decode_from_slice(&sample.pool, &sample.registry, &first, sample.s2).unwrap();
    let second = encode_to_vec(&sample.pool, &decoded).unwrap();
    assert_eq!(first, second);
}

#[test]
fn subtype_dispatch() {
    let sample = sample_schema();
    let source = create_sample(&sample);

    let bytes = encode_to_vec(&sample.pool, &source).unwrap();
    let result = decode_from_slice(&sample.pool, &sample.registry, &bytes, sample.s2).unwrap();

    // `right` was declared as S1 but written as an S3; the subtype framing
    // must recover the dynamic type.
    let Some(Value::Struct(right)) = result.get(key(sample.s2, 2)) else {
        panic!("right is present");
    };
    assert_eq!(right.descriptor(), sample.s3);
    let Some(Value::List(items)) = right.get(key(sample.s3, 1)) else {
        panic!("sList is present");
    };
    assert_eq!(items.len(), 2);
    let Value::Struct(second) = &items[1] else {
        panic!("sList[1] is a struct");
    };
    assert_eq!(second.descriptor(), sample.s2);
}

#[test]
fn shared_reference_identity() {
    let sample = sample_schema();
    let target = ObjectRef::new(sample.node);
    target.set(key(sample.node, 1), Value::String("shared".to_owned()));

    let pair = ObjectRef::new(sample.pair);
    pair.set(key(sample.pair, 1), Value::Struct(target.clone()));
    pair.set(key(sample.pair, 2), Value::Struct(target));

    let bytes = encode_to_vec(&sample.pool, &pair).unwrap();
    let result = decode_from_slice(&sample.pool, &sample.registry, &bytes, sample.pair).unwrap();

    let Some(Value::Struct(first)) = result.get(key(sample.pair, 1)) else {
        panic!("first is present");
    };
    let Some(Value::Struct(second)) = result.get(key(sample.pair, 2)) else {
        panic!("second is present");
    };
    assert!(first.ptr_eq(&second), "shared identity must survive");
    assert_eq!(
        first.get(key(sample.node, 1)),
        Some(Value::String("shared".to_owned()))
    );
}

#[test]
fn shared_cycle_roundtrips() {
    let sample = sample_schema();
    // a -> b -> a through `shared` fields is legal.
    let a = ObjectRef::new(sample.node);
    let b = ObjectRef::new(sample.node);
    a.set(key(sample.node, 1), Value::String("a".to_owned()));
    a.set(key(sample.node, 2), Value::Struct(b.clone()));
    b.set(key(sample.node, 1), Value::String("b".to_owned()));
    b.set(key(sample.node, 2), Value::Struct(a.clone()));

    let pair = ObjectRef::new(sample.pair);
    pair.set(key(sample.pair, 1), Value::Struct(a));

    let bytes = encode_to_vec(&sample.pool, &pair).unwrap();
    let result = decode_from_slice(&sample.pool, &sample.registry, &bytes, sample.pair).unwrap();
    let Some(Value::Struct(a2)) = result.get(key(sample.pair, 1)) else {
        panic!("first is present");
    };
    let Some(Value::Struct(b2)) = a2.get(key(sample.node, 2)) else {
        panic!("a.next is present");
    };
    let Some(Value::Struct(a3)) = b2.get(key(sample.node, 2)) else {
        panic!("b.next is present");
    };
    assert!(a2.ptr_eq(&a3));
}

#[test]
fn non_shared_cycle_is_rejected() {
    let sample = sample_schema();
    let outer = ObjectRef::new(sample.s2);
    let inner = ObjectRef::new(sample.s2);
    outer.set(key(sample.s2, 1), Value::Struct(inner.clone()));
    inner.set(key(sample.s2, 1), Value::Struct(outer.clone()));

    let err = encode_to_vec(&sample.pool, &outer).unwrap_err();
    assert!(err.to_string().contains("cycle"), "{}", err);
}

#[test]
fn transient_fields_stay_off_the_wire() {
    let mut pool = DescriptorPool::new();
    let file = pool.add_file(FileDescriptor::default());
    let i64_ty = pool.intern_type(Type::Integer { bits: 64 });
    let mut desc = StructDescriptor::new("T", file);
    desc.insert_field(FieldDescriptor {
        name: "keep".to_owned(),
        id: 1,
        ty: i64_ty,
        options: FieldOptions::default(),
    });
    desc.insert_field(FieldDescriptor {
        name: "skip".to_owned(),
        id: 2,
        ty: i64_ty,
        options: FieldOptions {
            transient: true,
            ..Default::default()
        },
    });
    let sid = pool.add_struct(desc);
    pool.file_mut(file).structs.push(sid);
    pool.freeze();

    let obj = ObjectRef::new(sid);
    obj.set(FieldKey { holder: sid, id: 1 }, Value::Integer(1));
    obj.set(FieldKey { holder: sid, id: 2 }, Value::Integer(2));
    let bytes = encode_to_vec(&pool, &obj).unwrap();

    let registry = TypeRegistry::new();
    let result = decode_from_slice(&pool, &registry, &bytes, sid).unwrap();
    assert!(result.has(FieldKey { holder: sid, id: 1 }));
    assert!(!result.has(FieldKey { holder: sid, id: 2 }));
}

#[test]
fn fixed_collections_pack() {
    let mut pool = DescriptorPool::new();
    let file = pool.add_file(FileDescriptor::default());
    let i16_ty = pool.intern_type(Type::Integer { bits: 16 });
    let list_ty = pool.intern_type(Type::List { element: i16_ty });
    let mut desc = StructDescriptor::new("Packed", file);
    desc.insert_field(FieldDescriptor {
        name: "values".to_owned(),
        id: 1,
        ty: list_ty,
        options: FieldOptions {
            fixed: true,
            ..Default::default()
        },
    });
    let sid = pool.add_struct(desc);
    pool.file_mut(file).structs.push(sid);
    pool.freeze();

    let obj = ObjectRef::new(sid);
    obj.set(
        FieldKey { holder: sid, id: 1 },
        list([Value::Integer(1), Value::Integer(-1), Value::Integer(300)]),
    );
    let bytes = encode_to_vec(&pool, &obj).unwrap();
    // Header, PLIST marker: FIXED16 element code, count 3, then 3 × 2 bytes
    // little-endian.
    assert_eq!(
        bytes,
        vec![
            0x1B, // (1 << 4) | PLIST
            0x04, // FIXED16
            0x03, // count
            0x01, 0x00, 0xFF, 0xFF, 0x2C, 0x01, // 1, -1, 300
            0x00, // END
        ]
    );
    let registry = TypeRegistry::new();
    let result = decode_from_slice(&pool, &registry, &bytes, sid).unwrap();
    assert_objects_equal(&pool, &obj, &result);
}

#[test]
fn unknown_subtype_is_rejected() {
    let sample = sample_schema();
    // SUBTYPE marker with id 9, which is not registered.
    let bytes = vec![(9 << 4) | 14u8, 0x00];
    let err = BinaryDecoder::new(&sample.pool, &sample.registry, bytes.as_slice())
        .decode(sample.s1)
        .unwrap_err();
    assert!(err.to_string().contains("unknown subtype id 9"), "{}", err);
}

#[test]
fn decoding_past_the_end_reports_offset() {
    let sample = sample_schema();
    let source = create_sample(&sample);
    let bytes = encode_to_vec(&sample.pool, &source).unwrap();
    let truncated = &bytes[..bytes.len() / 2];
    let err = decode_from_slice(&sample.pool, &sample.registry, truncated, sample.s2).unwrap_err();
    assert!(err.position().is_some(), "{}", err);
}

#[test]
fn freeze_then_encode() {
    let sample = sample_schema();
    let source = create_sample(&sample);
    source.freeze(true);
    // Frozen values still encode; the codec never mutates.
    let bytes = encode_to_vec(&sample.pool, &source).unwrap();
    assert!(!bytes.is_empty());
}
