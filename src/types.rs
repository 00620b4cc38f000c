//! The canonical representation of CODA types.
//!
//! Types are interned in a [`DescriptorPool`](crate::descriptor::DescriptorPool):
//! a [`TypeRef`] is a handle into the pool's type table, and two structurally
//! identical types always resolve to the same handle. Because the parameters
//! of a composite type are themselves handles, the [`Type`] value *is* its
//! canonical key: derived equality and hashing over the enum give exactly the
//! variant-tag + recursive-key identity the analyzer deduplicates on.

use crate::descriptor::{EnumId, StructId};

/// Interned handle to a [`Type`] in a descriptor pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeRef(pub(crate) u32);

impl TypeRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A CODA type expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Type {
    Bool,
    /// Signed integer; `bits` is 16, 32 or 64.
    Integer { bits: u8 },
    Float,
    Double,
    String,
    Bytes,
    List { element: TypeRef },
    Set { element: TypeRef },
    Map { key: TypeRef, value: TypeRef },
    /// `const` / `shared` wrapper. Only legal around a struct type.
    Modified {
        element: TypeRef,
        constant: bool,
        shared: bool,
    },
    Struct(StructId),
    Enum(EnumId),
}

/// Variant tag of a [`Type`], used for legality checks and wire dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Bool,
    Integer,
    Float,
    Double,
    String,
    Bytes,
    List,
    Set,
    Map,
    Modified,
    Struct,
    Enum,
}

impl Type {
    pub fn kind(&self) -> TypeKind {
        match self {
            Type::Bool => TypeKind::Bool,
            Type::Integer { .. } => TypeKind::Integer,
            Type::Float => TypeKind::Float,
            Type::Double => TypeKind::Double,
            Type::String => TypeKind::String,
            Type::Bytes => TypeKind::Bytes,
            Type::List { .. } => TypeKind::List,
            Type::Set { .. } => TypeKind::Set,
            Type::Map { .. } => TypeKind::Map,
            Type::Modified { .. } => TypeKind::Modified,
            Type::Struct(_) => TypeKind::Struct,
            Type::Enum(_) => TypeKind::Enum,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(
            self.kind(),
            TypeKind::List | TypeKind::Set | TypeKind::Map
        )
    }
}

impl TypeKind {
    /// Types permitted as list elements and map values.
    pub fn allowed_as_list_element(self) -> bool {
        !matches!(self, TypeKind::Modified)
    }

    /// Types permitted as set elements and map keys.
    pub fn allowed_as_set_element(self) -> bool {
        matches!(
            self,
            TypeKind::Integer
                | TypeKind::String
                | TypeKind::Bytes
                | TypeKind::Struct
                | TypeKind::Enum
        )
    }
}
