//! The descriptor graph: files, structs, enums, fields, methods, options and
//! extensions, held in a [`DescriptorPool`].
//!
//! Descriptors are plain data keyed by pool handles. The pool is mutable
//! while the analyzer (or a generated registration function) builds the
//! graph; [`DescriptorPool::freeze`] then makes it immutable — every `*_mut`
//! accessor panics afterwards, which is what makes mutation-after-freeze a
//! detected programmer error rather than silent corruption.

use std::collections::{BTreeMap, HashMap};

use crate::object::ObjectRef;
use crate::types::{Type, TypeRef};

/// Handle to a [`FileDescriptor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub(crate) u32);

/// Handle to a [`StructDescriptor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructId(pub(crate) u32);

/// Handle to an [`EnumDescriptor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnumId(pub(crate) u32);

/// Handle to an [`ExtensionField`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtId(pub(crate) u32);

/// Identifies a declared field: the struct level that declares it plus the
/// numeric field id. Field ids are only unique within one declaration level,
/// so instance storage and presence bits key on both.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldKey {
    pub holder: StructId,
    pub id: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FileDescriptor {
    pub name: String,
    pub directory: String,
    pub package: String,
    pub structs: Vec<StructId>,
    pub enums: Vec<EnumId>,
    pub imports: Vec<Import>,
    pub extensions: Vec<ExtId>,
    pub options: FileOptions,
}

/// An import of another IDL file, with the per-language package each backend
/// should use to reference the imported declarations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Import {
    pub path: String,
    pub package: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructDescriptor {
    pub name: String,
    pub file: FileId,
    pub enclosing: Option<StructId>,
    pub source_line: u32,
    pub base_type: Option<StructId>,
    /// Subtype id, unique across the inheritance chain rooted at the topmost
    /// ancestor that declares one.
    pub type_id: Option<u32>,
    /// Inclusive `[min, max]` range reserved for extension fields.
    pub extension_range: Option<(u32, u32)>,
    /// Ordered by ascending field id.
    pub fields: Vec<FieldDescriptor>,
    pub methods: Vec<MethodDescriptor>,
    pub structs: Vec<StructId>,
    pub enums: Vec<EnumId>,
    pub extensions: Vec<ExtId>,
    pub options: StructOptions,
}

impl StructDescriptor {
    pub fn new(name: impl Into<String>, file: FileId) -> StructDescriptor {
        StructDescriptor {
            name: name.into(),
            file,
            enclosing: None,
            source_line: 0,
            base_type: None,
            type_id: None,
            extension_range: None,
            fields: Vec::new(),
            methods: Vec::new(),
            structs: Vec::new(),
            enums: Vec::new(),
            extensions: Vec::new(),
            options: StructOptions::default(),
        }
    }

    pub fn field_by_id(&self, id: u32) -> Option<&FieldDescriptor> {
        self.fields
            .binary_search_by_key(&id, |f| f.id)
            .ok()
            .map(|ix| &self.fields[ix])
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn method_by_id(&self, id: u32) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.id == id)
    }

    pub fn method_by_name(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Inserts a field keeping the list ordered by id.
    pub fn insert_field(&mut self, field: FieldDescriptor) {
        let ix = self
            .fields
            .binary_search_by_key(&field.id, |f| f.id)
            .unwrap_or_else(|ix| ix);
        self.fields.insert(ix, field);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub id: u32,
    pub ty: TypeRef,
    pub options: FieldOptions,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MethodDescriptor {
    pub name: String,
    pub id: u32,
    pub params: Vec<Param>,
    pub return_type: TypeRef,
    pub options: MethodOptions,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: TypeRef,
}

/// A uniform view over a declared field or an extension field.
#[derive(Clone, Copy, Debug)]
pub enum FieldRef<'a> {
    Declared(&'a FieldDescriptor),
    Extension(&'a ExtensionField),
}

impl<'a> FieldRef<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            FieldRef::Declared(f) => &f.name,
            FieldRef::Extension(f) => &f.name,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            FieldRef::Declared(f) => f.id,
            FieldRef::Extension(f) => f.id,
        }
    }

    pub fn ty(&self) -> TypeRef {
        match self {
            FieldRef::Declared(f) => f.ty,
            FieldRef::Extension(f) => f.ty,
        }
    }

    pub fn options(&self) -> &'a FieldOptions {
        match self {
            FieldRef::Declared(f) => &f.options,
            FieldRef::Extension(f) => &f.options,
        }
    }
}

/// A field declared outside its owning struct, registered into the reserved
/// extension range of the struct it extends.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtensionField {
    pub name: String,
    pub id: u32,
    pub ty: TypeRef,
    /// The extensible struct this field registers against; `None` only while
    /// the analyzer has not yet resolved the `extend` target.
    pub extends: Option<StructId>,
    pub file: FileId,
    pub enclosing: Option<StructId>,
    pub source_line: u32,
    pub options: FieldOptions,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumDescriptor {
    pub name: String,
    pub file: FileId,
    pub enclosing: Option<StructId>,
    pub source_line: u32,
    pub values: Vec<EnumValue>,
    pub options: EnumOptions,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumValue {
    pub name: String,
    pub value: i32,
}

impl EnumDescriptor {
    pub fn new(name: impl Into<String>, file: FileId) -> EnumDescriptor {
        EnumDescriptor {
            name: name.into(),
            file,
            enclosing: None,
            source_line: 0,
            values: Vec::new(),
            options: EnumOptions::default(),
        }
    }

    pub fn value_by_name(&self, name: &str) -> Option<i32> {
        self.values
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.value)
    }

    pub fn name_of(&self, value: i32) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.value == value)
            .map(|v| v.name.as_str())
    }
}

// ===== Options records =====
//
// Options are self-describing: each record kind exposes a static field table
// (`option_fields`) that the analyzer resolves option names and types
// against, in place of the original's bootstrapped options descriptors.

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FileOptions {
    /// Backend-scoped package override (e.g. `package:rust = "my::mod"`).
    pub package: BTreeMap<String, String>,
    pub outer_class: BTreeMap<String, String>,
    pub filepath: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StructOptions {
    /// Backend-scoped mixin class injected into generated code.
    pub mixin: BTreeMap<String, String>,
    pub shared: bool,
    pub reference: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldOptions {
    pub nullable: bool,
    pub transient: bool,
    pub deprecated: bool,
    pub novisit: bool,
    /// Fixed-width integer encoding (FIXED16/32/64, PLIST packing).
    pub fixed: bool,
    pub ignore: BTreeMap<String, bool>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnumOptions {}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MethodOptions {
    pub constant: bool,
}

/// Which options record an option declaration applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionKind {
    File,
    Struct,
    Field,
    Enum,
    Method,
}

/// Static type of an option field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionType {
    Bool,
    Integer,
    Str,
    /// Map keyed by backend scope with string values.
    MapStr,
    /// Map keyed by backend scope with boolean values.
    MapBool,
}

pub struct OptionFieldDef {
    pub name: &'static str,
    pub ty: OptionType,
}

macro_rules! option_field_table {
    ($($name:literal => $ty:ident),* $(,)?) => {
        &[$(OptionFieldDef {
            name: $name,
            ty: OptionType::$ty,
        }),*]
    };
}

static FILE_OPTION_FIELDS: &[OptionFieldDef] = option_field_table! {
    "package" => MapStr,
    "outerClass" => MapStr,
    "filepath" => MapStr,
};

static STRUCT_OPTION_FIELDS: &[OptionFieldDef] = option_field_table! {
    "mixin" => MapStr,
    "shared" => Bool,
    "reference" => Bool,
};

static FIELD_OPTION_FIELDS: &[OptionFieldDef] = option_field_table! {
    "nullable" => Bool,
    "transient" => Bool,
    "deprecated" => Bool,
    "novisit" => Bool,
    "fixed" => Bool,
    "ignore" => MapBool,
};

static METHOD_OPTION_FIELDS: &[OptionFieldDef] = option_field_table! {
    "const" => Bool,
};

/// The field table for each options record kind.
pub fn option_fields(kind: OptionKind) -> &'static [OptionFieldDef] {
    match kind {
        OptionKind::File => FILE_OPTION_FIELDS,
        OptionKind::Struct => STRUCT_OPTION_FIELDS,
        OptionKind::Field => FIELD_OPTION_FIELDS,
        OptionKind::Enum => &[],
        OptionKind::Method => METHOD_OPTION_FIELDS,
    }
}

/// A coerced option literal.
#[derive(Clone, Debug, PartialEq)]
pub enum OptionValue {
    Bool(bool),
    Integer(i64),
    Str(String),
    List(Vec<OptionValue>),
}

/// Failure applying an option value to a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionError {
    /// The named field does not exist on this record kind.
    Unknown,
    /// A scope was given but the field is not map-typed.
    NotScoped,
    /// The scoped entry was already set.
    AlreadySet,
    /// The value does not coerce to the field's type.
    WrongType,
}

fn apply_map_str(
    map: &mut BTreeMap<String, String>,
    scope: Option<&str>,
    value: &OptionValue,
) -> Result<(), OptionError> {
    let OptionValue::Str(s) = value else {
        return Err(OptionError::WrongType);
    };
    let scope = scope.unwrap_or("").to_owned();
    if map.contains_key(&scope) {
        return Err(OptionError::AlreadySet);
    }
    map.insert(scope, s.clone());
    Ok(())
}

fn apply_map_bool(
    map: &mut BTreeMap<String, bool>,
    scope: Option<&str>,
    value: &OptionValue,
) -> Result<(), OptionError> {
    let OptionValue::Bool(b) = value else {
        return Err(OptionError::WrongType);
    };
    let scope = scope.unwrap_or("").to_owned();
    if map.contains_key(&scope) {
        return Err(OptionError::AlreadySet);
    }
    map.insert(scope, *b);
    Ok(())
}

fn apply_bool(slot: &mut bool, scope: Option<&str>, value: &OptionValue) -> Result<(), OptionError> {
    if scope.is_some() {
        return Err(OptionError::NotScoped);
    }
    let OptionValue::Bool(b) = value else {
        return Err(OptionError::WrongType);
    };
    *slot = *b;
    Ok(())
}

impl FileOptions {
    pub fn apply(
        &mut self,
        name: &str,
        scope: Option<&str>,
        value: &OptionValue,
    ) -> Result<(), OptionError> {
        match name {
            "package" => apply_map_str(&mut self.package, scope, value),
            "outerClass" => apply_map_str(&mut self.outer_class, scope, value),
            "filepath" => apply_map_str(&mut self.filepath, scope, value),
            _ => Err(OptionError::Unknown),
        }
    }
}

impl StructOptions {
    pub fn apply(
        &mut self,
        name: &str,
        scope: Option<&str>,
        value: &OptionValue,
    ) -> Result<(), OptionError> {
        match name {
            "mixin" => apply_map_str(&mut self.mixin, scope, value),
            "shared" => apply_bool(&mut self.shared, scope, value),
            "reference" => apply_bool(&mut self.reference, scope, value),
            _ => Err(OptionError::Unknown),
        }
    }
}

impl FieldOptions {
    pub fn apply(
        &mut self,
        name: &str,
        scope: Option<&str>,
        value: &OptionValue,
    ) -> Result<(), OptionError> {
        match name {
            "nullable" => apply_bool(&mut self.nullable, scope, value),
            "transient" => apply_bool(&mut self.transient, scope, value),
            "deprecated" => apply_bool(&mut self.deprecated, scope, value),
            "novisit" => apply_bool(&mut self.novisit, scope, value),
            "fixed" => apply_bool(&mut self.fixed, scope, value),
            "ignore" => apply_map_bool(&mut self.ignore, scope, value),
            _ => Err(OptionError::Unknown),
        }
    }
}

impl EnumOptions {
    pub fn apply(
        &mut self,
        _name: &str,
        _scope: Option<&str>,
        _value: &OptionValue,
    ) -> Result<(), OptionError> {
        Err(OptionError::Unknown)
    }
}

impl MethodOptions {
    pub fn apply(
        &mut self,
        name: &str,
        scope: Option<&str>,
        value: &OptionValue,
    ) -> Result<(), OptionError> {
        match name {
            "const" => apply_bool(&mut self.constant, scope, value),
            _ => Err(OptionError::Unknown),
        }
    }
}

/// Looks up a scoped option value, falling back through dotted scope
/// prefixes: `cpp.stl` falls back to `cpp`, then to the unscoped entry.
pub fn scoped_option<'a, V>(map: &'a BTreeMap<String, V>, scope: &str) -> Option<&'a V> {
    let mut scope = scope;
    loop {
        if let Some(value) = map.get(scope) {
            return Some(value);
        }
        if scope.is_empty() {
            return None;
        }
        scope = match scope.rfind('.') {
            Some(dot) => &scope[..dot],
            None => "",
        };
    }
}

// ===== The pool =====

/// Arena holding a complete descriptor graph and its interned type table.
#[derive(Default)]
pub struct DescriptorPool {
    files: Vec<FileDescriptor>,
    structs: Vec<StructDescriptor>,
    enums: Vec<EnumDescriptor>,
    extensions: Vec<ExtensionField>,
    types: Vec<Type>,
    type_index: HashMap<Type, TypeRef>,
    defaults: Vec<ObjectRef>,
    frozen: bool,
}

impl DescriptorPool {
    pub fn new() -> DescriptorPool {
        DescriptorPool::default()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn check_mutable(&self) {
        assert!(
            !self.frozen,
            "attempt to mutate a frozen descriptor pool"
        );
    }

    /// Freezes the graph and builds the per-struct default instances. All
    /// `*_mut` accessors panic from here on.
    pub fn freeze(&mut self) {
        if self.frozen {
            return;
        }
        self.frozen = true;
        self.defaults = (0..self.structs.len() as u32)
            .map(|ix| {
                let instance = ObjectRef::new(StructId(ix));
                instance.freeze(false);
                instance
            })
            .collect();
    }

    /// The process-wide immutable zero instance for a struct, used as the
    /// absent-field sentinel. Only available once the pool is frozen.
    pub fn default_instance(&self, id: StructId) -> ObjectRef {
        assert!(self.frozen, "default instances exist only after freeze");
        self.defaults[id.0 as usize].clone()
    }

    // Types.

    /// Interns a type, deduplicating on its canonical key.
    pub fn intern_type(&mut self, ty: Type) -> TypeRef {
        self.check_mutable();
        if let Some(&tr) = self.type_index.get(&ty) {
            return tr;
        }
        let tr = TypeRef(self.types.len() as u32);
        self.types.push(ty.clone());
        self.type_index.insert(ty, tr);
        tr
    }

    pub fn type_(&self, tr: TypeRef) -> &Type {
        &self.types[tr.index()]
    }

    /// Strips `Modified` wrappers.
    pub fn unmodified(&self, mut tr: TypeRef) -> TypeRef {
        while let Type::Modified { element, .. } = self.type_(tr) {
            tr = *element;
        }
        tr
    }

    /// Human-readable name of a type, `shared`/`const` prefixes included.
    pub fn type_name(&self, tr: TypeRef) -> String {
        match self.type_(tr) {
            Type::Bool => "bool".to_owned(),
            Type::Integer { bits } => format!("i{}", bits),
            Type::Float => "float".to_owned(),
            Type::Double => "double".to_owned(),
            Type::String => "string".to_owned(),
            Type::Bytes => "bytes".to_owned(),
            Type::List { element } => format!("list[{}]", self.type_name(*element)),
            Type::Set { element } => format!("set[{}]", self.type_name(*element)),
            Type::Map { key, value } => {
                format!("map[{}, {}]", self.type_name(*key), self.type_name(*value))
            }
            Type::Modified {
                element,
                constant,
                shared,
            } => {
                let mut s = self.type_name(*element);
                if *shared {
                    s = format!("shared {}", s);
                }
                if *constant {
                    s = format!("const {}", s);
                }
                s
            }
            Type::Struct(id) => self.struct_full_name(*id),
            Type::Enum(id) => self.enum_full_name(*id),
        }
    }

    // Files.

    pub fn add_file(&mut self, file: FileDescriptor) -> FileId {
        self.check_mutable();
        let id = FileId(self.files.len() as u32);
        self.files.push(file);
        id
    }

    pub fn file(&self, id: FileId) -> &FileDescriptor {
        &self.files[id.0 as usize]
    }

    pub fn file_mut(&mut self, id: FileId) -> &mut FileDescriptor {
        self.check_mutable();
        &mut self.files[id.0 as usize]
    }

    pub fn files(&self) -> impl Iterator<Item = FileId> {
        (0..self.files.len() as u32).map(FileId)
    }

    /// Path of the file as seen by the import mechanism.
    pub fn file_path(&self, id: FileId) -> String {
        let file = self.file(id);
        if file.directory.is_empty() {
            file.name.clone()
        } else {
            format!("{}/{}", file.directory, file.name)
        }
    }

    // Structs.

    pub fn add_struct(&mut self, desc: StructDescriptor) -> StructId {
        self.check_mutable();
        let id = StructId(self.structs.len() as u32);
        self.structs.push(desc);
        id
    }

    pub fn struct_(&self, id: StructId) -> &StructDescriptor {
        &self.structs[id.0 as usize]
    }

    pub fn struct_mut(&mut self, id: StructId) -> &mut StructDescriptor {
        self.check_mutable();
        &mut self.structs[id.0 as usize]
    }

    pub fn struct_full_name(&self, id: StructId) -> String {
        let desc = self.struct_(id);
        match desc.enclosing {
            Some(outer) => format!("{}.{}", self.struct_full_name(outer), desc.name),
            None => {
                let package = &self.file(desc.file).package;
                if package.is_empty() {
                    desc.name.clone()
                } else {
                    format!("{}.{}", package, desc.name)
                }
            }
        }
    }

    /// The topmost ancestor of a struct (the subtype root when the chain
    /// declares type ids).
    pub fn root_struct(&self, mut id: StructId) -> StructId {
        while let Some(base) = self.struct_(id).base_type {
            id = base;
        }
        id
    }

    /// The inheritance chain of a struct, root first, the struct itself last.
    pub fn inheritance_chain(&self, id: StructId) -> Vec<StructId> {
        let mut chain = vec![id];
        let mut cur = id;
        while let Some(base) = self.struct_(cur).base_type {
            chain.push(base);
            cur = base;
        }
        chain.reverse();
        chain
    }

    pub fn is_subtype(&self, mut id: StructId, base: StructId) -> bool {
        loop {
            if id == base {
                return true;
            }
            match self.struct_(id).base_type {
                Some(b) => id = b,
                None => return false,
            }
        }
    }

    /// The nearest struct in the inheritance chain that declares an extension
    /// range, starting from `id` itself.
    pub fn extensible_base(&self, mut id: StructId) -> Option<StructId> {
        loop {
            let desc = self.struct_(id);
            if desc.extension_range.is_some() {
                return Some(id);
            }
            id = desc.base_type?;
        }
    }

    /// Resolves a field id against one declaration level of a struct,
    /// falling back to extension fields registered against it.
    pub fn field(&self, key: FieldKey) -> Option<FieldRef<'_>> {
        if let Some(field) = self.struct_(key.holder).field_by_id(key.id) {
            return Some(FieldRef::Declared(field));
        }
        self.extensions
            .iter()
            .find(|ext| ext.extends == Some(key.holder) && ext.id == key.id)
            .map(FieldRef::Extension)
    }

    /// Finds a struct by fully-qualified name.
    pub fn find_struct(&self, full_name: &str) -> Option<StructId> {
        (0..self.structs.len() as u32)
            .map(StructId)
            .find(|&id| self.struct_full_name(id) == full_name)
    }

    /// Finds an enum by fully-qualified name.
    pub fn find_enum(&self, full_name: &str) -> Option<EnumId> {
        (0..self.enums.len() as u32)
            .map(EnumId)
            .find(|&id| self.enum_full_name(id) == full_name)
    }

    // Enums.

    pub fn add_enum(&mut self, desc: EnumDescriptor) -> EnumId {
        self.check_mutable();
        let id = EnumId(self.enums.len() as u32);
        self.enums.push(desc);
        id
    }

    pub fn enum_(&self, id: EnumId) -> &EnumDescriptor {
        &self.enums[id.0 as usize]
    }

    pub fn enum_mut(&mut self, id: EnumId) -> &mut EnumDescriptor {
        self.check_mutable();
        &mut self.enums[id.0 as usize]
    }

    pub fn enum_full_name(&self, id: EnumId) -> String {
        let desc = self.enum_(id);
        match desc.enclosing {
            Some(outer) => format!("{}.{}", self.struct_full_name(outer), desc.name),
            None => {
                let package = &self.file(desc.file).package;
                if package.is_empty() {
                    desc.name.clone()
                } else {
                    format!("{}.{}", package, desc.name)
                }
            }
        }
    }

    // Extensions.

    pub fn add_extension(&mut self, ext: ExtensionField) -> ExtId {
        self.check_mutable();
        let id = ExtId(self.extensions.len() as u32);
        self.extensions.push(ext);
        id
    }

    pub fn extension(&self, id: ExtId) -> &ExtensionField {
        &self.extensions[id.0 as usize]
    }

    pub fn extension_mut(&mut self, id: ExtId) -> &mut ExtensionField {
        self.check_mutable();
        &mut self.extensions[id.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pool() -> (DescriptorPool, FileId, StructId, StructId) {
        let mut pool = DescriptorPool::new();
        let file = pool.add_file(FileDescriptor {
            name: "sample.coda".to_owned(),
            directory: "idl".to_owned(),
            package: "sample".to_owned(),
            ..Default::default()
        });
        let base = pool.add_struct(StructDescriptor {
            type_id: Some(0),
            ..StructDescriptor::new("S1", file)
        });
        let mut sub = StructDescriptor::new("S2", file);
        sub.base_type = Some(base);
        sub.type_id = Some(1);
        let sub = pool.add_struct(sub);
        pool.file_mut(file).structs.extend([base, sub]);
        (pool, file, base, sub)
    }

    #[test]
    fn full_names_and_chains() {
        let (pool, file, base, sub) = small_pool();
        assert_eq!(pool.struct_full_name(base), "sample.S1");
        assert_eq!(pool.file_path(file), "idl/sample.coda");
        assert_eq!(pool.root_struct(sub), base);
        assert_eq!(pool.inheritance_chain(sub), vec![base, sub]);
        assert!(pool.is_subtype(sub, base));
        assert!(!pool.is_subtype(base, sub));
    }

    #[test]
    fn type_interning_dedups_on_canonical_key() {
        let (mut pool, _, base, _) = small_pool();
        let i32_a = pool.intern_type(Type::Integer { bits: 32 });
        let i32_b = pool.intern_type(Type::Integer { bits: 32 });
        assert_eq!(i32_a, i32_b);
        let i16 = pool.intern_type(Type::Integer { bits: 16 });
        assert_ne!(i32_a, i16);

        let list_a = pool.intern_type(Type::List { element: i32_a });
        let list_b = pool.intern_type(Type::List { element: i32_b });
        assert_eq!(list_a, list_b);

        let base_ty = pool.intern_type(Type::Struct(base));
        let shared = pool.intern_type(Type::Modified {
            element: base_ty,
            constant: false,
            shared: true,
        });
        assert_eq!(pool.type_name(shared), "shared sample.S1");
        assert_eq!(pool.unmodified(shared), base_ty);
    }

    #[test]
    #[should_panic(expected = "frozen")]
    fn frozen_pool_rejects_mutation() {
        let (mut pool, _, base, _) = small_pool();
        pool.freeze();
        pool.struct_mut(base).name = "oops".to_owned();
    }

    #[test]
    fn scoped_option_fallback() {
        let mut map = BTreeMap::new();
        map.insert("cpp".to_owned(), "a".to_owned());
        map.insert("".to_owned(), "b".to_owned());
        assert_eq!(scoped_option(&map, "cpp.stl").unwrap(), "a");
        assert_eq!(scoped_option(&map, "rust").unwrap(), "b");
        map.remove("");
        assert!(scoped_option(&map, "rust").is_none());
    }
}
