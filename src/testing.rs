//! Structural assertions over descriptor-driven traversal, for use in tests
//! of code that produces or consumes CODA values. On mismatch the panic
//! message names the dotted path of the differing field.

use std::collections::BTreeSet;

use crate::descriptor::{DescriptorPool, FieldKey};
use crate::object::{ObjectRef, Value};
use crate::types::{Type, TypeKind};

/// Compares two values for structural equality, respecting presence bits,
/// and panics with a path-qualified message on the first difference.
pub fn assert_objects_equal(pool: &DescriptorPool, expected: &ObjectRef, actual: &ObjectRef) {
    // Instances already compared on this walk; breaks reference cycles.
    let mut checked = BTreeSet::new();
    compare_objects(pool, expected, actual, "", &mut checked);
}

fn compare_objects(
    pool: &DescriptorPool,
    expected: &ObjectRef,
    actual: &ObjectRef,
    prefix: &str,
    checked: &mut BTreeSet<(usize, usize)>,
) {
    if expected.descriptor() != actual.descriptor() {
        panic!(
            "expected '{}' to be of type {}, was {}",
            display_path(prefix),
            pool.struct_full_name(expected.descriptor()),
            pool.struct_full_name(actual.descriptor()),
        );
    }
    for &level in &pool.inheritance_chain(expected.descriptor()) {
        let desc = pool.struct_(level);
        for field in &desc.fields {
            let key = FieldKey {
                holder: level,
                id: field.id,
            };
            let field_path = if prefix.is_empty() {
                field.name.clone()
            } else {
                format!("{}.{}", prefix, field.name)
            };
            let exp_present = expected.is_present(pool, key);
            let act_present = actual.is_present(pool, key);
            if exp_present != act_present {
                if exp_present {
                    panic!("expected '{}' to be present, but was absent", field_path);
                } else {
                    panic!("expected '{}' to be absent, but was present", field_path);
                }
            }
            if exp_present {
                let exp = expected.get(key).expect("present field has a value");
                let act = actual.get(key).expect("present field has a value");
                compare_values(pool, field.ty, &exp, &act, &field_path, checked);
            }
        }
    }

    // Extension-field values live outside the declared field lists.
    let mut extension_keys: Vec<FieldKey> = expected
        .present_fields()
        .into_iter()
        .chain(actual.present_fields())
        .filter(|&key| {
            matches!(
                pool.field(key),
                Some(crate::descriptor::FieldRef::Extension(_))
            )
        })
        .collect();
    extension_keys.sort();
    extension_keys.dedup();
    for key in extension_keys {
        let field = pool.field(key).expect("extension key resolves");
        let field_path = if prefix.is_empty() {
            field.name().to_owned()
        } else {
            format!("{}.{}", prefix, field.name())
        };
        match (expected.get(key), actual.get(key)) {
            (Some(exp), Some(act)) => {
                compare_values(pool, field.ty(), &exp, &act, &field_path, checked)
            }
            (Some(_), None) => {
                panic!("expected '{}' to be present, but was absent", field_path)
            }
            (None, Some(_)) => {
                panic!("expected '{}' to be absent, but was present", field_path)
            }
            (None, None) => {}
        }
    }
}

fn compare_values(
    pool: &DescriptorPool,
    ty: crate::types::TypeRef,
    expected: &Value,
    actual: &Value,
    path: &str,
    checked: &mut BTreeSet<(usize, usize)>,
) {
    let unmod = pool.unmodified(ty);
    match pool.type_(unmod).kind() {
        TypeKind::Bool
        | TypeKind::Integer
        | TypeKind::Float
        | TypeKind::Double
        | TypeKind::String
        | TypeKind::Bytes
        | TypeKind::Enum => {
            if expected != actual {
                panic!(
                    "expected '{}' to be {:?}, was {:?}",
                    path, expected, actual
                );
            }
        }
        TypeKind::List => {
            let (Value::List(exp), Value::List(act)) = (expected, actual) else {
                panic!("expected '{}' to be a list, was {:?}", path, actual);
            };
            if exp.len() != act.len() {
                panic!(
                    "expected '{}' to have length {}, was {}",
                    path,
                    exp.len(),
                    act.len()
                );
            }
            let Type::List { element } = *pool.type_(unmod) else {
                unreachable!("list kind implies list type");
            };
            for (ix, (e, a)) in exp.iter().zip(act).enumerate() {
                compare_values(pool, element, e, a, &format!("{}[{}]", path, ix), checked);
            }
        }
        TypeKind::Set => {
            let (Value::Set(exp), Value::Set(act)) = (expected, actual) else {
                panic!("expected '{}' to be a set, was {:?}", path, actual);
            };
            for missing in exp.difference(act) {
                panic!("expected '{}' to contain {:?}", path, missing);
            }
            for extra in act.difference(exp) {
                panic!("expected '{}' not to contain {:?}", path, extra);
            }
        }
        TypeKind::Map => {
            let (Value::Map(exp), Value::Map(act)) = (expected, actual) else {
                panic!("expected '{}' to be a map, was {:?}", path, actual);
            };
            let Type::Map { value, .. } = *pool.type_(unmod) else {
                unreachable!("map kind implies map type");
            };
            for key in exp.keys() {
                if !act.contains_key(key) {
                    panic!("expected '{}' to contain key {:?}", path, key);
                }
            }
            for key in act.keys() {
                if !exp.contains_key(key) {
                    panic!("expected '{}' not to contain key {:?}", path, key);
                }
            }
            for (key, e) in exp {
                compare_values(
                    pool,
                    value,
                    e,
                    &act[key],
                    &format!("{}[{:?}]", path, key),
                    checked,
                );
            }
        }
        TypeKind::Struct => {
            let (Value::Struct(exp), Value::Struct(act)) = (expected, actual) else {
                panic!("expected '{}' to be a struct, was {:?}", path, actual);
            };
            if checked.insert((exp.addr(), act.addr())) {
                compare_objects(pool, exp, act, path, checked);
            }
        }
        TypeKind::Modified => unreachable!("modifiers stripped above"),
    }
}

fn display_path(prefix: &str) -> &str {
    if prefix.is_empty() {
        "<root>"
    } else {
        prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{
        FieldDescriptor, FieldOptions, FileDescriptor, StructDescriptor, StructId,
    };

    fn pool() -> (DescriptorPool, StructId, FieldKey) {
        let mut pool = DescriptorPool::new();
        let file = pool.add_file(FileDescriptor::default());
        let i64_ty = pool.intern_type(Type::Integer { bits: 64 });
        let mut desc = StructDescriptor::new("P", file);
        desc.insert_field(FieldDescriptor {
            name: "n".to_owned(),
            id: 1,
            ty: i64_ty,
            options: FieldOptions::default(),
        });
        let sid = pool.add_struct(desc);
        (pool, sid, FieldKey { holder: sid, id: 1 })
    }

    #[test]
    fn equal_objects_pass() {
        let (pool, sid, key) = pool();
        let a = ObjectRef::new(sid);
        let b = ObjectRef::new(sid);
        a.set(key, Value::Integer(5));
        b.set(key, Value::Integer(5));
        assert_objects_equal(&pool, &a, &b);
    }

    #[test]
    #[should_panic(expected = "expected 'n' to be present")]
    fn missing_field_reports_path() {
        let (pool, sid, key) = pool();
        let a = ObjectRef::new(sid);
        a.set(key, Value::Integer(5));
        let b = ObjectRef::new(sid);
        assert_objects_equal(&pool, &a, &b);
    }
}
