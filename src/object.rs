//! The runtime object model.
//!
//! Every data value is a [`Value`]; struct instances are [`ObjectRef`]s, a
//! shared handle with identity. Instances are created mutable, carry a
//! presence bit per set field, and may be frozen — mutation after freeze is a
//! detected programmer error. Equality and hashing are structural over
//! present fields; hashing additionally requires the instance to be frozen.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::descriptor::{DescriptorPool, FieldKey, StructId};
use crate::types::{Type, TypeRef};

/// A CODA data value.
#[derive(Clone, Debug)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Enum(i32),
    List(Vec<Value>),
    Set(BTreeSet<Value>),
    Map(BTreeMap<Value, Value>),
    Struct(ObjectRef),
}

impl Value {
    /// The type-specific zero value a cleared field reads back as.
    pub fn default_for(pool: &DescriptorPool, ty: TypeRef) -> Value {
        match pool.type_(ty) {
            Type::Bool => Value::Bool(false),
            Type::Integer { .. } => Value::Integer(0),
            Type::Float => Value::Float(0.0),
            Type::Double => Value::Double(0.0),
            Type::String => Value::String(String::new()),
            Type::Bytes => Value::Bytes(Vec::new()),
            Type::Enum(_) => Value::Enum(0),
            Type::List { .. } => Value::List(Vec::new()),
            Type::Set { .. } => Value::Set(BTreeSet::new()),
            Type::Map { .. } => Value::Map(BTreeMap::new()),
            Type::Struct(id) => Value::Struct(pool.default_instance(*id)),
            Type::Modified { element, .. } => Value::default_for(pool, *element),
        }
    }

    /// Whether a collection value is empty. Non-collections are never empty.
    pub fn is_empty_collection(&self) -> bool {
        match self {
            Value::List(v) => v.is_empty(),
            Value::Set(v) => v.is_empty(),
            Value::Map(v) => v.is_empty(),
            _ => false,
        }
    }

    fn order_class(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Integer(_) => 1,
            Value::Float(_) => 2,
            Value::Double(_) => 3,
            Value::String(_) => 4,
            Value::Bytes(_) => 5,
            Value::Enum(_) => 6,
            Value::List(_) => 7,
            Value::Set(_) => 8,
            Value::Map(_) => 9,
            Value::Struct(_) => 10,
        }
    }
}

// Total order over values so that sets and maps can hold any legal key type.
// Floats order by `total_cmp`; structs order structurally over their present
// fields. Equality is the `Ordering::Equal` case of the same relation, which
// keeps `Eq` and `Ord` consistent for the B-tree collections.
impl Ord for Value {
    fn cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Enum(a), Value::Enum(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.cmp(b),
            (Value::Set(a), Value::Set(b)) => a.cmp(b),
            (Value::Map(a), Value::Map(b)) => a.cmp(b),
            (Value::Struct(a), Value::Struct(b)) => a.structural_cmp(b),
            _ => self.order_class().cmp(&other.order_class()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Value) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.order_class().hash(state);
        match self {
            Value::Bool(v) => v.hash(state),
            Value::Integer(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Double(v) => v.to_bits().hash(state),
            Value::String(v) => v.hash(state),
            Value::Bytes(v) => v.hash(state),
            Value::Enum(v) => v.hash(state),
            Value::List(v) => v.hash(state),
            Value::Set(v) => v.hash(state),
            Value::Map(v) => {
                for entry in v {
                    entry.hash(state);
                }
            }
            Value::Struct(v) => v.hash_fields(state),
        }
    }
}

struct ObjectInner {
    descriptor: StructId,
    mutable: bool,
    fields: BTreeMap<FieldKey, Value>,
}

/// A shared handle to a struct instance. Cloning the handle shares the
/// underlying instance; identity (`ptr_eq`) is what the codecs preserve for
/// `shared`-typed values.
#[derive(Clone)]
pub struct ObjectRef {
    cell: Rc<RefCell<ObjectInner>>,
}

impl ObjectRef {
    /// Creates a new mutable instance with no fields present.
    pub fn new(descriptor: StructId) -> ObjectRef {
        ObjectRef {
            cell: Rc::new(RefCell::new(ObjectInner {
                descriptor,
                mutable: true,
                fields: BTreeMap::new(),
            })),
        }
    }

    pub fn descriptor(&self) -> StructId {
        self.cell.borrow().descriptor
    }

    /// Narrows or widens the dynamic type of an instance under construction.
    /// Used by the decoders when a SUBTYPE marker arrives after the instance
    /// was registered in the shared table; identity must not change.
    pub fn set_descriptor(&self, descriptor: StructId) {
        let mut inner = self.cell.borrow_mut();
        assert!(inner.mutable, "attempt to mutate a frozen instance");
        inner.descriptor = descriptor;
    }

    pub fn is_mutable(&self) -> bool {
        self.cell.borrow().mutable
    }

    fn check_mutable(&self) {
        assert!(
            self.cell.borrow().mutable,
            "attempt to mutate a frozen instance"
        );
    }

    /// Makes this instance immutable. With `deep`, owned struct values
    /// (including those inside collections) are frozen as well. Freezing is
    /// absorbing and cycle-safe.
    pub fn freeze(&self, deep: bool) {
        {
            let mut inner = self.cell.borrow_mut();
            if !inner.mutable {
                return;
            }
            inner.mutable = false;
        }
        if deep {
            let fields: Vec<Value> = self.cell.borrow().fields.values().cloned().collect();
            for value in fields {
                freeze_value(&value);
            }
        }
    }

    /// True iff the field carries a presence bit set by the application.
    pub fn has(&self, key: FieldKey) -> bool {
        self.cell.borrow().fields.contains_key(&key)
    }

    /// Presence as the codecs see it: collection-typed fields have no
    /// presence bit and count as present iff non-empty.
    pub fn is_present(&self, pool: &DescriptorPool, key: FieldKey) -> bool {
        let inner = self.cell.borrow();
        match inner.fields.get(&key) {
            Some(value) => {
                let field = pool.field(key).expect("field key resolves");
                if pool.type_(pool.unmodified(field.ty())).is_collection() {
                    !value.is_empty_collection()
                } else {
                    true
                }
            }
            None => false,
        }
    }

    /// The field value, if present.
    pub fn get(&self, key: FieldKey) -> Option<Value> {
        self.cell.borrow().fields.get(&key).cloned()
    }

    /// The field value, or its type default when absent.
    pub fn get_or_default(&self, pool: &DescriptorPool, key: FieldKey) -> Value {
        self.get(key).unwrap_or_else(|| {
            let field = pool.field(key).expect("field key resolves");
            Value::default_for(pool, field.ty())
        })
    }

    pub fn set(&self, key: FieldKey, value: Value) {
        self.check_mutable();
        self.cell.borrow_mut().fields.insert(key, value);
    }

    /// Resets the field to its default and removes the presence bit.
    pub fn clear(&self, key: FieldKey) {
        self.check_mutable();
        self.cell.borrow_mut().fields.remove(&key);
    }

    /// Applies `f` to the field value in place, inserting the type default
    /// first when the field is absent. This is the mutable-view accessor used
    /// to build up collection fields.
    pub fn update(&self, pool: &DescriptorPool, key: FieldKey, f: impl FnOnce(&mut Value)) {
        self.check_mutable();
        let default = || {
            let field = pool.field(key).expect("field key resolves");
            Value::default_for(pool, field.ty())
        };
        let mut inner = self.cell.borrow_mut();
        f(inner.fields.entry(key).or_insert_with(default));
    }

    /// The set of present field keys, in key order.
    pub fn present_fields(&self) -> Vec<FieldKey> {
        self.cell.borrow().fields.keys().copied().collect()
    }

    /// Folds the present fields of `src` into this instance. Both instances
    /// must share a descriptor.
    pub fn merge(&self, src: &ObjectRef) {
        self.check_mutable();
        assert_eq!(
            self.descriptor(),
            src.descriptor(),
            "merge requires instances of the same type"
        );
        let fields: Vec<(FieldKey, Value)> = {
            let inner = src.cell.borrow();
            inner.fields.iter().map(|(k, v)| (*k, v.clone())).collect()
        };
        let mut inner = self.cell.borrow_mut();
        for (key, value) in fields {
            inner.fields.insert(key, value);
        }
    }

    /// A mutable copy sharing the same presence set and field values. Struct
    /// children are shared, not copied.
    pub fn shallow_copy(&self) -> ObjectRef {
        let inner = self.cell.borrow();
        ObjectRef {
            cell: Rc::new(RefCell::new(ObjectInner {
                descriptor: inner.descriptor,
                mutable: true,
                fields: inner.fields.clone(),
            })),
        }
    }

    /// Identity comparison: do both handles designate the same instance?
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    /// Stable per-instance address, used by the codec identity tables.
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.cell) as usize
    }

    /// Structural hash over present fields. Only frozen instances may be
    /// hashed.
    pub fn hash_value(&self) -> u64 {
        assert!(
            !self.is_mutable(),
            "only frozen instances can be hashed"
        );
        let mut hasher = DefaultHasher::new();
        self.hash_fields(&mut hasher);
        hasher.finish()
    }

    fn hash_fields<H: Hasher>(&self, state: &mut H) {
        let inner = self.cell.borrow();
        inner.descriptor.hash(state);
        inner.fields.hash(state);
    }

    fn structural_cmp(&self, other: &ObjectRef) -> Ordering {
        if self.ptr_eq(other) {
            return Ordering::Equal;
        }
        let a = self.cell.borrow();
        let b = other.cell.borrow();
        a.descriptor
            .cmp(&b.descriptor)
            .then_with(|| a.fields.cmp(&b.fields))
    }

    /// Renders the instance for diagnostics, honoring the `novisit` field
    /// option and guarding against reference cycles.
    pub fn display(&self, pool: &DescriptorPool) -> String {
        let mut in_progress = BTreeSet::new();
        self.display_impl(pool, &mut in_progress)
    }

    fn display_impl(&self, pool: &DescriptorPool, in_progress: &mut BTreeSet<usize>) -> String {
        if !in_progress.insert(self.addr()) {
            return "self".to_owned();
        }
        let mut parts = Vec::new();
        for key in self.present_fields() {
            let Some(field) = pool.field(key) else {
                continue;
            };
            if field.options().novisit {
                continue;
            }
            let value = self.get(key).expect("present field has a value");
            let rendered = match &value {
                Value::Struct(child) => child.display_impl(pool, in_progress),
                other => format!("{:?}", other),
            };
            parts.push(format!("{}: {}", field.name(), rendered));
        }
        in_progress.remove(&self.addr());
        format!(
            "{} {{{}}}",
            pool.struct_full_name(self.descriptor()),
            parts.join("; ")
        )
    }
}

// Structural equality over present fields; the mutable flag is not part of
// value identity.
impl PartialEq for ObjectRef {
    fn eq(&self, other: &ObjectRef) -> bool {
        self.structural_cmp(other) == Ordering::Equal
    }
}

impl Eq for ObjectRef {}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.cell.borrow();
        f.debug_struct("ObjectRef")
            .field("descriptor", &inner.descriptor)
            .field("mutable", &inner.mutable)
            .field("fields", &inner.fields.len())
            .finish()
    }
}

fn freeze_value(value: &Value) {
    match value {
        Value::Struct(obj) => obj.freeze(true),
        Value::List(items) => items.iter().for_each(freeze_value),
        Value::Set(items) => items.iter().for_each(freeze_value),
        Value::Map(entries) => {
            for (k, v) in entries {
                freeze_value(k);
                freeze_value(v);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FieldDescriptor, FieldOptions, FileDescriptor, StructDescriptor};
    use crate::types::Type;

    fn pool_with_struct() -> (DescriptorPool, StructId, FieldKey, FieldKey) {
        let mut pool = DescriptorPool::new();
        let file = pool.add_file(FileDescriptor {
            name: "t.coda".to_owned(),
            package: "t".to_owned(),
            ..Default::default()
        });
        let i32_ty = pool.intern_type(Type::Integer { bits: 32 });
        let list_ty = pool.intern_type(Type::List { element: i32_ty });
        let mut desc = StructDescriptor::new("Box", file);
        desc.insert_field(FieldDescriptor {
            name: "value".to_owned(),
            id: 1,
            ty: i32_ty,
            options: FieldOptions::default(),
        });
        desc.insert_field(FieldDescriptor {
            name: "items".to_owned(),
            id: 2,
            ty: list_ty,
            options: FieldOptions::default(),
        });
        let sid = pool.add_struct(desc);
        let value = FieldKey { holder: sid, id: 1 };
        let items = FieldKey { holder: sid, id: 2 };
        (pool, sid, value, items)
    }

    #[test]
    fn presence_and_clear() {
        let (pool, sid, value, items) = pool_with_struct();
        let obj = ObjectRef::new(sid);
        assert!(!obj.has(value));
        obj.set(value, Value::Integer(7));
        assert!(obj.has(value));
        assert!(obj.is_present(&pool, value));
        assert_eq!(obj.get(value), Some(Value::Integer(7)));

        obj.clear(value);
        assert!(!obj.has(value));
        assert_eq!(obj.get_or_default(&pool, value), Value::Integer(0));

        // Collections are present iff non-empty.
        obj.set(items, Value::List(Vec::new()));
        assert!(!obj.is_present(&pool, items));
        obj.update(&pool, items, |v| {
            if let Value::List(list) = v {
                list.push(Value::Integer(1));
            }
        });
        assert!(obj.is_present(&pool, items));
    }

    #[test]
    fn equality_over_present_fields() {
        let (_, sid, value, _) = pool_with_struct();
        let a = ObjectRef::new(sid);
        let b = ObjectRef::new(sid);
        assert_eq!(a, b);
        a.set(value, Value::Integer(7));
        assert_ne!(a, b);
        b.set(value, Value::Integer(7));
        assert_eq!(a, b);
        assert!(!a.ptr_eq(&b));
    }

    #[test]
    fn freeze_is_absorbing_and_deep() {
        let (_, sid, value, _) = pool_with_struct();
        let child = ObjectRef::new(sid);
        let parent = ObjectRef::new(sid);
        parent.set(value, Value::Struct(child.clone()));
        parent.freeze(true);
        parent.freeze(true);
        assert!(!parent.is_mutable());
        assert!(!child.is_mutable());
    }

    #[test]
    #[should_panic(expected = "frozen")]
    fn mutating_frozen_panics() {
        let (_, sid, value, _) = pool_with_struct();
        let obj = ObjectRef::new(sid);
        obj.freeze(false);
        obj.set(value, Value::Integer(1));
    }

    #[test]
    fn hashing_requires_frozen() {
        let (_, sid, value, _) = pool_with_struct();
        let a = ObjectRef::new(sid);
        let b = ObjectRef::new(sid);
        a.set(value, Value::Integer(3));
        b.set(value, Value::Integer(3));
        a.freeze(false);
        b.freeze(false);
        assert_eq!(a.hash_value(), b.hash_value());
    }

    #[test]
    #[should_panic(expected = "frozen")]
    fn hashing_mutable_panics() {
        let (_, sid, _, _) = pool_with_struct();
        ObjectRef::new(sid).hash_value();
    }

    #[test]
    fn merge_and_shallow_copy() {
        let (_, sid, value, _) = pool_with_struct();
        let src = ObjectRef::new(sid);
        src.set(value, Value::Integer(9));
        let dst = ObjectRef::new(sid);
        dst.merge(&src);
        assert_eq!(dst.get(value), Some(Value::Integer(9)));

        let copy = src.shallow_copy();
        assert!(copy.is_mutable());
        assert_eq!(copy, src);
        assert!(!copy.ptr_eq(&src));
    }
}
