//! Shared test fixture: the canonical sample schema and a fully populated
//! instance of it.
//!
//! ```text
//! enum E { E1 = 1, E2, E3 }
//! struct S1 { scalar and collection fields of every kind }
//! struct S2(S1) = 1 { left: S1 = 1; right: S1 = 2; }
//! struct S3(S1) = 2 { sList: list[S1] = 1; sSet: set[S1] = 2; sMap: map[string, S1] = 3; }
//! struct Node { name: string = 1; next: shared Node = 2; }
//! struct Pair { first: shared Node = 1; second: shared Node = 2; }
//! ```

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};

use coda::descriptor::{
    DescriptorPool, EnumDescriptor, EnumId, EnumValue, FieldDescriptor, FieldKey, FieldOptions,
    FileDescriptor, StructDescriptor, StructId,
};
use coda::object::{ObjectRef, Value};
use coda::registry::TypeRegistry;
use coda::types::Type;

pub struct Sample {
    pub pool: DescriptorPool,
    pub registry: TypeRegistry,
    pub e: EnumId,
    pub s1: StructId,
    pub s2: StructId,
    pub s3: StructId,
    pub node: StructId,
    pub pair: StructId,
}

pub fn key(holder: StructId, id: u32) -> FieldKey {
    FieldKey { holder, id }
}

fn field(name: &str, id: u32, ty: coda::types::TypeRef) -> FieldDescriptor {
    FieldDescriptor {
        name: name.to_owned(),
        id,
        ty,
        options: FieldOptions::default(),
    }
}

fn fixed_field(name: &str, id: u32, ty: coda::types::TypeRef) -> FieldDescriptor {
    FieldDescriptor {
        name: name.to_owned(),
        id,
        ty,
        options: FieldOptions {
            fixed: true,
            ..Default::default()
        },
    }
}

pub fn sample_schema() -> Sample {
    let mut pool = DescriptorPool::new();
    let file = pool.add_file(FileDescriptor {
        name: "sample.coda".to_owned(),
        directory: "idl".to_owned(),
        package: "sample".to_owned(),
        ..Default::default()
    });

    let e = pool.add_enum({
        let mut desc = EnumDescriptor::new("E", file);
        for (name, value) in [("E1", 1), ("E2", 2), ("E3", 3)] {
            desc.values.push(EnumValue {
                name: name.to_owned(),
                value,
            });
        }
        desc
    });

    let s1 = pool.add_struct(StructDescriptor::new("S1", file));
    let s2 = pool.add_struct({
        let mut desc = StructDescriptor::new("S2", file);
        desc.base_type = Some(s1);
        desc.type_id = Some(1);
        desc
    });
    let s3 = pool.add_struct({
        let mut desc = StructDescriptor::new("S3", file);
        desc.base_type = Some(s1);
        desc.type_id = Some(2);
        desc
    });
    let node = pool.add_struct(StructDescriptor::new("Node", file));
    let pair = pool.add_struct(StructDescriptor::new("Pair", file));

    let bool_ty = pool.intern_type(Type::Bool);
    let i16_ty = pool.intern_type(Type::Integer { bits: 16 });
    let i32_ty = pool.intern_type(Type::Integer { bits: 32 });
    let i64_ty = pool.intern_type(Type::Integer { bits: 64 });
    let float_ty = pool.intern_type(Type::Float);
    let double_ty = pool.intern_type(Type::Double);
    let string_ty = pool.intern_type(Type::String);
    let bytes_ty = pool.intern_type(Type::Bytes);
    let enum_ty = pool.intern_type(Type::Enum(e));
    let s1_ty = pool.intern_type(Type::Struct(s1));
    let node_ty = pool.intern_type(Type::Struct(node));
    let shared_node_ty = pool.intern_type(Type::Modified {
        element: node_ty,
        constant: false,
        shared: true,
    });
    let list_bool = pool.intern_type(Type::List { element: bool_ty });
    let list_i64 = pool.intern_type(Type::List { element: i64_ty });
    let list_float = pool.intern_type(Type::List { element: float_ty });
    let list_string = pool.intern_type(Type::List { element: string_ty });
    let list_enum = pool.intern_type(Type::List { element: enum_ty });
    let list_s1 = pool.intern_type(Type::List { element: s1_ty });
    let set_i64 = pool.intern_type(Type::Set { element: i64_ty });
    let set_string = pool.intern_type(Type::Set { element: string_ty });
    let set_enum = pool.intern_type(Type::Set { element: enum_ty });
    let set_s1 = pool.intern_type(Type::Set { element: s1_ty });
    let map_int_string = pool.intern_type(Type::Map {
        key: i64_ty,
        value: string_ty,
    });
    let map_string_int = pool.intern_type(Type::Map {
        key: string_ty,
        value: i64_ty,
    });
    let map_enum_struct = pool.intern_type(Type::Map {
        key: enum_ty,
        value: s1_ty,
    });
    let map_string_s1 = pool.intern_type(Type::Map {
        key: string_ty,
        value: s1_ty,
    });

    {
        let desc = pool.struct_mut(s1);
        desc.insert_field(field("scalarBoolean", 1, bool_ty));
        desc.insert_field(field("scalarI16", 2, i16_ty));
        desc.insert_field(field("scalarI32", 3, i32_ty));
        desc.insert_field(field("scalarI64", 4, i64_ty));
        desc.insert_field(fixed_field("scalarFixedI16", 5, i16_ty));
        desc.insert_field(fixed_field("scalarFixedI32", 6, i32_ty));
        desc.insert_field(fixed_field("scalarFixedI64", 7, i64_ty));
        desc.insert_field(field("scalarFloat", 8, float_ty));
        desc.insert_field(field("scalarDouble", 9, double_ty));
        desc.insert_field(field("scalarString", 10, string_ty));
        desc.insert_field(field("scalarBytes", 11, bytes_ty));
        desc.insert_field(field("scalarEnum", 12, enum_ty));
        desc.insert_field(field("listBoolean", 13, list_bool));
        desc.insert_field(field("listInt", 14, list_i64));
        desc.insert_field(field("listFloat", 15, list_float));
        desc.insert_field(field("listString", 16, list_string));
        desc.insert_field(field("listEnum", 17, list_enum));
        desc.insert_field(field("setInt", 18, set_i64));
        desc.insert_field(field("setString", 19, set_string));
        desc.insert_field(field("setEnum", 20, set_enum));
        desc.insert_field(field("mapIntString", 21, map_int_string));
        desc.insert_field(field("mapStringInt", 22, map_string_int));
        desc.insert_field(field("mapEnumStruct", 23, map_enum_struct));
        desc.insert_field(field("unused", 40, i32_ty));
    }
    {
        let desc = pool.struct_mut(s2);
        desc.insert_field(field("left", 1, s1_ty));
        desc.insert_field(field("right", 2, s1_ty));
    }
    {
        let desc = pool.struct_mut(s3);
        desc.insert_field(field("sList", 1, list_s1));
        desc.insert_field(field("sSet", 2, set_s1));
        desc.insert_field(field("sMap", 3, map_string_s1));
    }
    {
        let desc = pool.struct_mut(node);
        desc.insert_field(field("name", 1, string_ty));
        desc.insert_field(field("next", 2, shared_node_ty));
    }
    {
        let desc = pool.struct_mut(pair);
        desc.insert_field(field("first", 1, shared_node_ty));
        desc.insert_field(field("second", 2, shared_node_ty));
    }

    pool.file_mut(file).enums.push(e);
    pool.file_mut(file)
        .structs
        .extend([s1, s2, s3, node, pair]);

    let mut registry = TypeRegistry::new();
    registry.add_subtype(&pool, s2);
    registry.add_subtype(&pool, s3);

    pool.freeze();
    Sample {
        pool,
        registry,
        e,
        s1,
        s2,
        s3,
        node,
        pair,
    }
}

pub fn list(items: impl IntoIterator<Item = Value>) -> Value {
    Value::List(items.into_iter().collect())
}

pub fn set(items: impl IntoIterator<Item = Value>) -> Value {
    Value::Set(items.into_iter().collect::<BTreeSet<Value>>())
}

pub fn map(entries: impl IntoIterator<Item = (Value, Value)>) -> Value {
    Value::Map(entries.into_iter().collect::<BTreeMap<Value, Value>>())
}

/// The sample instance from the data generator: an `S2` whose `left` is a
/// fully populated `S1` and whose `right` is an `S3` holding further
/// instances.
pub fn create_sample(sample: &Sample) -> ObjectRef {
    let s1 = ObjectRef::new(sample.s1);
    s1.set(key(sample.s1, 1), Value::Bool(true));
    s1.set(key(sample.s1, 2), Value::Integer(11));
    s1.set(key(sample.s1, 3), Value::Integer(12));
    s1.set(key(sample.s1, 4), Value::Integer(13));
    s1.set(key(sample.s1, 5), Value::Integer(14));
    s1.set(key(sample.s1, 6), Value::Integer(15));
    s1.set(key(sample.s1, 7), Value::Integer(16));
    s1.set(key(sample.s1, 8), Value::Float(55.0));
    s1.set(key(sample.s1, 9), Value::Double(56.0));
    s1.set(key(sample.s1, 10), Value::String("alpha\n\t".to_owned()));
    s1.set(key(sample.s1, 11), Value::Bytes(b"beta".to_vec()));
    s1.set(key(sample.s1, 12), Value::Enum(1));
    s1.set(
        key(sample.s1, 13),
        list([Value::Bool(true), Value::Bool(false), Value::Bool(true)]),
    );
    s1.set(
        key(sample.s1, 14),
        list([Value::Integer(100), Value::Integer(101), Value::Integer(102)]),
    );
    s1.set(
        key(sample.s1, 15),
        list([Value::Float(110.0), Value::Float(110.1), Value::Float(110.2)]),
    );
    s1.set(
        key(sample.s1, 16),
        list([
            Value::String("beta".to_owned()),
            Value::String("delta\u{0}".to_owned()),
            Value::String("yin-yan: ☯".to_owned()),
        ]),
    );
    s1.set(
        key(sample.s1, 17),
        list([Value::Enum(1), Value::Enum(2), Value::Enum(1)]),
    );
    s1.set(
        key(sample.s1, 18),
        set([Value::Integer(200), Value::Integer(201), Value::Integer(202)]),
    );
    s1.set(
        key(sample.s1, 19),
        set([
            Value::String("gamma".to_owned()),
            Value::String("'single-quoted'".to_owned()),
            Value::String("\"double-quoted\"".to_owned()),
        ]),
    );
    s1.set(key(sample.s1, 20), set([Value::Enum(1), Value::Enum(2)]));
    s1.set(
        key(sample.s1, 21),
        map([
            (Value::Integer(300), Value::String("three_oh_oh".to_owned())),
            (Value::Integer(301), Value::String("three_oh_one".to_owned())),
        ]),
    );
    s1.set(
        key(sample.s1, 22),
        map([
            (Value::String("three_oh_oh".to_owned()), Value::Integer(300)),
            (Value::String("three_oh_one".to_owned()), Value::Integer(301)),
        ]),
    );
    s1.set(
        key(sample.s1, 23),
        map([
            (Value::Enum(1), Value::Struct(ObjectRef::new(sample.s1))),
            (Value::Enum(2), Value::Struct(ObjectRef::new(sample.s2))),
        ]),
    );

    let s3 = ObjectRef::new(sample.s3);
    s3.set(
        key(sample.s3, 1),
        list([
            Value::Struct(ObjectRef::new(sample.s1)),
            Value::Struct(ObjectRef::new(sample.s2)),
        ]),
    );

    let s2 = ObjectRef::new(sample.s2);
    s2.set(key(sample.s2, 1), Value::Struct(s1));
    s2.set(key(sample.s2, 2), Value::Struct(s3));
    s2
}
