//! Registry for subtypes and extension fields.
//!
//! The registry is an explicit value threaded through analysis and codec
//! construction; an encoder or decoder never mutates it.

use std::collections::{BTreeMap, HashMap};

use crate::descriptor::{DescriptorPool, ExtId, FileId, StructId};

#[derive(Debug, Default)]
pub struct TypeRegistry {
    /// `subtypes[root][type_id]` — every struct with a base type, indexed
    /// under the topmost ancestor of its inheritance chain.
    subtypes: HashMap<StructId, BTreeMap<u32, StructId>>,
    /// `extensions[extended struct][field_id]`.
    extensions: HashMap<StructId, BTreeMap<u32, ExtId>>,
}

impl TypeRegistry {
    pub fn new() -> TypeRegistry {
        TypeRegistry::default()
    }

    /// Registers a struct as a subtype of its chain root. The struct must
    /// declare a type id and a base type; a duplicate type id at the same
    /// root is a registration error the analyzer reports before calling this.
    pub fn add_subtype(&mut self, pool: &DescriptorPool, subtype: StructId) {
        let desc = pool.struct_(subtype);
        let type_id = desc
            .type_id
            .unwrap_or_else(|| panic!("subtype {} has no type id", desc.name));
        assert!(
            desc.base_type.is_some(),
            "subtype {} has no base type",
            desc.name
        );
        let root = pool.root_struct(subtype);
        let for_root = self.subtypes.entry(root).or_default();
        if let Some(existing) = for_root.insert(type_id, subtype) {
            panic!(
                "error registering type {}: subtype id {} already registered by {}",
                pool.struct_full_name(subtype),
                type_id,
                pool.struct_full_name(existing),
            );
        }
    }

    /// Retrieves a subtype of a chain root by type id.
    pub fn get_subtype(&self, root: StructId, type_id: u32) -> Option<StructId> {
        self.subtypes.get(&root)?.get(&type_id).copied()
    }

    /// All registered subtypes of a chain root, ordered by type id.
    pub fn subtypes_of(&self, root: StructId) -> impl Iterator<Item = (u32, StructId)> + '_ {
        self.subtypes
            .get(&root)
            .into_iter()
            .flat_map(|m| m.iter().map(|(&id, &st)| (id, st)))
    }

    /// Registers an extension field against the struct it extends.
    pub fn add_extension(&mut self, pool: &DescriptorPool, ext: ExtId) {
        let field = pool.extension(ext);
        let extends = field
            .extends
            .unwrap_or_else(|| panic!("extension field {} has no resolved target", field.name));
        let for_struct = self.extensions.entry(extends).or_default();
        if for_struct.insert(field.id, ext).is_some() {
            panic!(
                "duplicate extension id {} for struct {}",
                field.id,
                pool.struct_full_name(extends),
            );
        }
    }

    pub fn get_extension(&self, extends: StructId, field_id: u32) -> Option<ExtId> {
        self.extensions.get(&extends)?.get(&field_id).copied()
    }

    /// All extension fields registered against a struct, ordered by field id.
    pub fn extensions_of(&self, extends: StructId) -> impl Iterator<Item = (u32, ExtId)> + '_ {
        self.extensions
            .get(&extends)
            .into_iter()
            .flat_map(|m| m.iter().map(|(&id, &ext)| (id, ext)))
    }

    /// Registers all subtypes and extensions declared within a file. This is
    /// the load-time path taken by generated registration functions.
    pub fn add_file(&mut self, pool: &DescriptorPool, file: FileId) {
        fn add_struct(registry: &mut TypeRegistry, pool: &DescriptorPool, id: StructId) {
            if pool.struct_(id).base_type.is_some() {
                registry.add_subtype(pool, id);
            }
            for &ext in &pool.struct_(id).extensions {
                registry.add_extension(pool, ext);
            }
            for &nested in &pool.struct_(id).structs {
                add_struct(registry, pool, nested);
            }
        }
        for &id in &pool.file(file).structs {
            add_struct(self, pool, id);
        }
        for &ext in &pool.file(file).extensions {
            self.add_extension(pool, ext);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FileDescriptor, StructDescriptor};

    #[test]
    fn subtype_registration() {
        let mut pool = DescriptorPool::new();
        let file = pool.add_file(FileDescriptor {
            name: "s.coda".to_owned(),
            ..Default::default()
        });
        let root = pool.add_struct(StructDescriptor::new("Root", file));
        let mut mid = StructDescriptor::new("Mid", file);
        mid.base_type = Some(root);
        mid.type_id = Some(1);
        let mid = pool.add_struct(mid);
        let mut leaf = StructDescriptor::new("Leaf", file);
        leaf.base_type = Some(mid);
        leaf.type_id = Some(2);
        let leaf = pool.add_struct(leaf);

        let mut registry = TypeRegistry::new();
        registry.add_subtype(&pool, mid);
        registry.add_subtype(&pool, leaf);

        // Both levels register under the chain root.
        assert_eq!(registry.get_subtype(root, 1), Some(mid));
        assert_eq!(registry.get_subtype(root, 2), Some(leaf));
        assert_eq!(registry.get_subtype(root, 3), None);
        assert_eq!(
            registry.subtypes_of(root).collect::<Vec<_>>(),
            vec![(1, mid), (2, leaf)]
        );
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_subtype_id_panics() {
        let mut pool = DescriptorPool::new();
        let file = pool.add_file(FileDescriptor::default());
        let root = pool.add_struct(StructDescriptor::new("Root", file));
        for name in ["A", "B"] {
            let mut sub = StructDescriptor::new(name, file);
            sub.base_type = Some(root);
            sub.type_id = Some(1);
            let sub = pool.add_struct(sub);
            let mut registry = TypeRegistry::new();
            registry.add_subtype(&pool, sub);
        }
        // Both subtypes in one registry collide.
        let mut registry = TypeRegistry::new();
        registry.add_subtype(&pool, StructId(1));
        registry.add_subtype(&pool, StructId(2));
    }
}
