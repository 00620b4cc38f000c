//! Semantic analysis: turns parsed IDL files into a frozen descriptor graph
//! and a populated type registry.
//!
//! The analysis runs in three phases. Phase A registers declaration shells
//! under their fully-qualified names. Phase B resolves cross-file references:
//! subtype ids, base types, field types and extension targets, with the
//! static rules enforced along the way. Phase C types and applies options.
//! User errors never unwind; they accumulate in the [`ErrorReporter`] and the
//! driver aborts at the next phase boundary.

use std::collections::{HashMap, HashSet};

use coda::descriptor::{
    DescriptorPool, EnumDescriptor, EnumId, EnumValue, ExtId, ExtensionField, FieldDescriptor,
    FieldOptions, FileDescriptor, FileId, Import, MethodDescriptor, OptionKind, OptionType,
    OptionValue, OptionError, Param, StructDescriptor, StructId, option_fields,
};
use coda::registry::TypeRegistry;
use coda::types::{Type, TypeRef};
use itertools::Itertools;
use log::debug;

use crate::ast;
use crate::errors::{ErrorReporter, Location};

/// Result of a successful analysis run.
pub struct Analysis {
    pub pool: DescriptorPool,
    pub registry: TypeRegistry,
    /// The files named on the command line, in order (imports excluded).
    pub files: Vec<FileId>,
}

#[derive(Clone, Copy)]
enum GenericKind {
    List,
    Set,
    Map,
}

impl GenericKind {
    fn arity(self) -> usize {
        match self {
            GenericKind::List | GenericKind::Set => 1,
            GenericKind::Map => 2,
        }
    }
}

#[derive(Clone, Copy)]
enum Sym {
    Builtin(TypeRef),
    Generic(GenericKind),
    Struct(StructId),
    Enum(EnumId),
}

/// Lexical scope for name lookup: a struct body or the file level.
#[derive(Clone, Copy)]
enum DeclScope {
    Struct(StructId),
    File(FileId),
}

#[derive(Default)]
struct Pending<'a> {
    structs: Vec<(&'a ast::StructDef, StructId)>,
    fields: Vec<(&'a ast::FieldDecl, StructId)>,
    methods: Vec<(&'a ast::MethodDecl, StructId)>,
    extensions: Vec<(&'a ast::FieldDecl, ExtId, &'a ast::TypeAst, DeclScope)>,
}

pub struct Analyzer<'r> {
    reporter: &'r mut ErrorReporter,
    pool: DescriptorPool,
    registry: TypeRegistry,
    typenames: HashMap<String, Sym>,
    /// `visible[path]` — transitive import closure of a file.
    visible: HashMap<String, HashSet<String>>,
    files_by_path: HashMap<String, FileId>,
}

impl<'r> Analyzer<'r> {
    pub fn new(reporter: &'r mut ErrorReporter) -> Analyzer<'r> {
        let mut pool = DescriptorPool::new();
        let mut typenames = HashMap::new();
        for (name, ty) in [
            ("bool", Type::Bool),
            ("i16", Type::Integer { bits: 16 }),
            ("i32", Type::Integer { bits: 32 }),
            ("i64", Type::Integer { bits: 64 }),
            ("float", Type::Float),
            ("double", Type::Double),
            ("string", Type::String),
            ("bytes", Type::Bytes),
        ] {
            let tr = pool.intern_type(ty);
            typenames.insert(name.to_owned(), Sym::Builtin(tr));
        }
        typenames.insert("list".to_owned(), Sym::Generic(GenericKind::List));
        typenames.insert("set".to_owned(), Sym::Generic(GenericKind::Set));
        typenames.insert("map".to_owned(), Sym::Generic(GenericKind::Map));
        Analyzer {
            reporter,
            pool,
            registry: TypeRegistry::new(),
            typenames,
            visible: HashMap::new(),
            files_by_path: HashMap::new(),
        }
    }

    /// Analyzes the given files (with their parsed transitive imports) and
    /// returns the frozen descriptor graph. The caller must check the error
    /// count before trusting the result.
    pub fn run(mut self, asts: &[ast::File], import_asts: &[ast::File]) -> Analysis {
        let mut pending = Pending::default();
        let mut all: Vec<(&ast::File, FileId)> = Vec::new();
        let mut main_files = Vec::new();

        // Phase A: declaration shells.
        for file_ast in import_asts {
            let fid = self.process_file(file_ast, &mut pending);
            all.push((file_ast, fid));
        }
        for file_ast in asts {
            let fid = self.process_file(file_ast, &mut pending);
            all.push((file_ast, fid));
            main_files.push(fid);
        }

        // Phase B: cross-file resolution.
        for &(file_ast, fid) in &all {
            self.record_imports(file_ast, fid);
        }
        for &(_, fid) in &all {
            self.compute_visible(fid);
        }
        {
            let Pending {
                structs,
                fields,
                methods,
                extensions,
            } = &mut pending;
            // Subtype ids first so that base-type validation can rely on
            // them regardless of declaration order.
            for &(struct_ast, sid) in structs.iter() {
                self.resolve_type_id(struct_ast, sid);
            }
            for &(struct_ast, sid) in structs.iter() {
                self.analyze_struct(struct_ast, sid, fields, methods);
            }
            for &(field_ast, ext, extends, scope) in extensions.iter() {
                self.analyze_extension_field(field_ast, ext, extends, scope);
            }
        }

        // Phase C: options.
        for &(file_ast, fid) in &all {
            self.set_file_options(file_ast, fid);
        }
        for &(_, fid) in &all {
            self.set_import_packages(fid);
        }
        for &(struct_ast, sid) in &pending.structs {
            self.set_struct_options(struct_ast, sid);
        }
        for &(struct_ast, sid) in &pending.structs {
            self.check_shared_inheritance(struct_ast, sid);
        }
        for &(field_ast, sid) in &pending.fields {
            self.set_field_options(field_ast, sid);
        }
        for &(method_ast, sid) in &pending.methods {
            self.set_method_options(method_ast, sid);
        }

        self.pool.freeze();
        debug!(
            "analysis complete: {} file(s), {} error(s)",
            all.len(),
            self.reporter.error_count()
        );
        Analysis {
            pool: self.pool,
            registry: self.registry,
            files: main_files,
        }
    }

    // ===== Phase A =====

    fn process_file<'a>(&mut self, file_ast: &'a ast::File, pending: &mut Pending<'a>) -> FileId {
        let (directory, name) = match file_ast.path.rfind('/') {
            Some(slash) => (&file_ast.path[..slash], &file_ast.path[slash + 1..]),
            None => ("", file_ast.path.as_str()),
        };
        let fid = self.pool.add_file(FileDescriptor {
            name: name.to_owned(),
            directory: directory.to_owned(),
            package: file_ast.package.clone().unwrap_or_default(),
            ..Default::default()
        });
        self.files_by_path.insert(file_ast.path.clone(), fid);

        let prefix = match &file_ast.package {
            Some(package) => format!("{}.", package),
            None => String::new(),
        };
        for extend_ast in &file_ast.extensions {
            let exts = self.define_extension(extend_ast, fid, None, pending);
            self.pool.file_mut(fid).extensions.extend(exts);
        }
        for struct_ast in &file_ast.structs {
            let sid = self.define_struct(&prefix, struct_ast, fid, None, pending);
            self.pool.file_mut(fid).structs.push(sid);
        }
        for enum_ast in &file_ast.enums {
            let eid = self.define_enum(&prefix, enum_ast, fid, None);
            self.pool.file_mut(fid).enums.push(eid);
        }
        fid
    }

    fn define_struct<'a>(
        &mut self,
        prefix: &str,
        struct_ast: &'a ast::StructDef,
        file: FileId,
        enclosing: Option<StructId>,
        pending: &mut Pending<'a>,
    ) -> StructId {
        let full_name = format!("{}{}", prefix, struct_ast.name);
        let mut desc = StructDescriptor::new(struct_ast.name.clone(), file);
        desc.enclosing = enclosing;
        desc.source_line = struct_ast.location.line;
        if let Some((min, max)) = struct_ast.extension_range {
            if min > max || max > u32::MAX as u64 {
                self.reporter.error_at(
                    &struct_ast.location,
                    format!("Invalid extension range: {} .. {}", min, max),
                );
            } else {
                desc.extension_range = Some((min as u32, max as u32));
            }
        }
        let sid = self.pool.add_struct(desc);
        self.define_type_name(&full_name, Sym::Struct(sid), &struct_ast.location);

        let nested_prefix = format!("{}.", full_name);
        for extend_ast in &struct_ast.extensions {
            let exts = self.define_extension(extend_ast, file, Some(sid), pending);
            self.pool.struct_mut(sid).extensions.extend(exts);
        }
        for nested in &struct_ast.structs {
            let nested_id = self.define_struct(&nested_prefix, nested, file, Some(sid), pending);
            self.pool.struct_mut(sid).structs.push(nested_id);
        }
        for nested in &struct_ast.enums {
            let nested_id = self.define_enum(&nested_prefix, nested, file, Some(sid));
            self.pool.struct_mut(sid).enums.push(nested_id);
        }
        pending.structs.push((struct_ast, sid));
        sid
    }

    fn define_enum(
        &mut self,
        prefix: &str,
        enum_ast: &ast::EnumDef,
        file: FileId,
        enclosing: Option<StructId>,
    ) -> EnumId {
        let full_name = format!("{}{}", prefix, enum_ast.name);
        let mut desc = EnumDescriptor::new(enum_ast.name.clone(), file);
        desc.enclosing = enclosing;
        desc.source_line = enum_ast.location.line;
        let eid = self.pool.add_enum(desc);
        self.define_type_name(&full_name, Sym::Enum(eid), &enum_ast.location);

        let mut next_value: i64 = 0;
        for value_ast in &enum_ast.values {
            if let Some(explicit) = value_ast.value {
                next_value = explicit as i64;
            }
            if next_value > i32::MAX as i64 {
                self.reporter.error_at(
                    &value_ast.location,
                    format!("Enumeration value {} out of range", next_value),
                );
                continue;
            }
            if self.pool.enum_(eid).value_by_name(&value_ast.name).is_some() {
                self.reporter.error_at(
                    &value_ast.location,
                    format!("Value with name {} already defined", value_ast.name),
                );
                continue;
            }
            self.pool.enum_mut(eid).values.push(EnumValue {
                name: value_ast.name.clone(),
                value: next_value as i32,
            });
            next_value += 1;
        }
        eid
    }

    fn define_extension<'a>(
        &mut self,
        extend_ast: &'a ast::ExtendDef,
        file: FileId,
        enclosing: Option<StructId>,
        pending: &mut Pending<'a>,
    ) -> Vec<ExtId> {
        let scope = match enclosing {
            Some(sid) => DeclScope::Struct(sid),
            None => DeclScope::File(file),
        };
        let placeholder = self.pool.intern_type(Type::Bool);
        let mut result = Vec::new();
        for field_ast in &extend_ast.fields {
            let Some(id) = self.field_id(field_ast) else {
                continue;
            };
            let ext = self.pool.add_extension(ExtensionField {
                name: field_ast.name.clone(),
                id,
                ty: placeholder,
                extends: None,
                file,
                enclosing,
                source_line: extend_ast.location.line,
                options: FieldOptions::default(),
            });
            pending
                .extensions
                .push((field_ast, ext, &extend_ast.extends, scope));
            result.push(ext);
        }
        result
    }

    fn define_type_name(&mut self, name: &str, sym: Sym, location: &Location) {
        if self.typenames.contains_key(name) {
            self.reporter
                .error_at(location, format!("Typename '{}' already defined", name));
            return;
        }
        self.typenames.insert(name.to_owned(), sym);
    }

    // ===== Phase B =====

    fn record_imports(&mut self, file_ast: &ast::File, fid: FileId) {
        for import in &file_ast.imports {
            let directory = &self.pool.file(fid).directory;
            let import_path = if directory.is_empty() {
                import.path.clone()
            } else {
                format!("{}/{}", directory, import.path)
            };
            if !self.files_by_path.contains_key(&import_path) {
                self.reporter.error_at(
                    &import.location,
                    format!("Imported file '{}' was not found", import_path),
                );
                continue;
            }
            self.pool.file_mut(fid).imports.push(Import {
                path: import_path,
                package: Default::default(),
            });
        }
    }

    fn compute_visible(&mut self, fid: FileId) {
        let path = self.pool.file_path(fid);
        if self.visible.contains_key(&path) {
            return;
        }
        self.visible.insert(path.clone(), HashSet::new());
        let import_paths: Vec<String> = self
            .pool
            .file(fid)
            .imports
            .iter()
            .map(|imp| imp.path.clone())
            .collect();
        for import_path in import_paths {
            if let Some(&import_fid) = self.files_by_path.get(&import_path) {
                self.compute_visible(import_fid);
            }
            let transitive = self.visible.get(&import_path).cloned().unwrap_or_default();
            let entry = self.visible.get_mut(&path).expect("inserted above");
            entry.insert(import_path);
            entry.extend(transitive);
        }
    }

    fn resolve_type_id(&mut self, struct_ast: &ast::StructDef, sid: StructId) {
        let Some(expr) = &struct_ast.type_id else {
            return;
        };
        match expr {
            ast::TypeIdExpr::Number(value, location) => {
                if *value > u32::MAX as u64 {
                    self.reporter
                        .error_at(location, format!("Type id {} out of range", value));
                } else {
                    self.pool.struct_mut(sid).type_id = Some(*value as u32);
                }
            }
            ast::TypeIdExpr::Name(name, location) => {
                let Some((enum_name, value_name)) = name.rsplit_once('.') else {
                    self.reporter
                        .error_at(location, format!("Malformed type id '{}'", name));
                    return;
                };
                let Some(sym) =
                    self.lookup_type_name(enum_name, Some(DeclScope::Struct(sid)), location)
                else {
                    return;
                };
                let Sym::Enum(eid) = sym else {
                    self.reporter
                        .error_at(location, format!("Type id is not a number '{}'", name));
                    return;
                };
                match self.pool.enum_(eid).value_by_name(value_name) {
                    Some(value) if value >= 0 => {
                        self.pool.struct_mut(sid).type_id = Some(value as u32);
                    }
                    Some(value) => {
                        self.reporter.error_at(
                            location,
                            format!("Type id {} may not be negative", value),
                        );
                    }
                    None => {
                        self.reporter.error_at(
                            location,
                            format!("Unknown enumeration value '{}'", name),
                        );
                    }
                }
            }
        }
    }

    fn analyze_struct<'a>(
        &mut self,
        struct_ast: &'a ast::StructDef,
        sid: StructId,
        fields: &mut Vec<(&'a ast::FieldDecl, StructId)>,
        methods: &mut Vec<(&'a ast::MethodDecl, StructId)>,
    ) {
        if let Some(base_ast) = &struct_ast.base_type {
            self.analyze_base_type(struct_ast, base_ast, sid);
        }

        for field_ast in struct_ast.fields.iter().sorted_by_key(|f| f.index) {
            self.define_field(field_ast, sid, fields);
        }
        for method_ast in &struct_ast.methods {
            self.define_method(method_ast, sid, methods);
        }
    }

    fn analyze_base_type(
        &mut self,
        struct_ast: &ast::StructDef,
        base_ast: &ast::TypeAst,
        sid: StructId,
    ) {
        if self.pool.struct_(sid).type_id.is_none() {
            self.reporter.error_at(
                &struct_ast.location,
                format!(
                    "Struct '{}' declares a base type but no type id",
                    struct_ast.name
                ),
            );
            return;
        }
        let Some(base_tr) = self.get_type(base_ast, DeclScope::Struct(sid)) else {
            return;
        };
        let Type::Struct(base) = *self.pool.type_(base_tr) else {
            self.reporter.error_at(
                base_ast.location(),
                format!("Base type '{}' is not a struct", base_ast.display()),
            );
            return;
        };
        if self.pool.struct_(base).type_id.is_none() {
            self.reporter.error_at(
                base_ast.location(),
                format!(
                    "Base type '{}' must declare a type id to be inheritable",
                    base_ast.display()
                ),
            );
            return;
        }
        self.pool.struct_mut(sid).base_type = Some(base);

        let type_id = self.pool.struct_(sid).type_id.expect("checked above");
        let root = self.pool.root_struct(base);
        if let Some(existing) = self.registry.get_subtype(root, type_id) {
            self.reporter.error_at(
                &struct_ast.location,
                format!(
                    "Attempt to register type {} with ID {} but it is already used by {}",
                    struct_ast.name,
                    type_id,
                    self.pool.struct_(existing).name
                ),
            );
            // Unlink so later passes do not treat the duplicate as
            // registered.
            self.pool.struct_mut(sid).base_type = None;
            return;
        }
        self.registry.add_subtype(&self.pool, sid);

        if self.pool.struct_(sid).extension_range.is_some() {
            if let Some(extensible) = self.pool.extensible_base(base) {
                self.reporter.error_at(
                    &struct_ast.location,
                    format!(
                        "Struct {} cannot override the extension range of base class {}",
                        struct_ast.name,
                        self.pool.struct_(extensible).name
                    ),
                );
            }
        }
    }

    fn field_id(&mut self, field_ast: &ast::FieldDecl) -> Option<u32> {
        if field_ast.index == 0 || field_ast.index > u32::MAX as u64 {
            self.reporter.error_at(
                &field_ast.location,
                format!("Field id {} out of range", field_ast.index),
            );
            return None;
        }
        Some(field_ast.index as u32)
    }

    fn define_field<'a>(
        &mut self,
        field_ast: &'a ast::FieldDecl,
        sid: StructId,
        fields: &mut Vec<(&'a ast::FieldDecl, StructId)>,
    ) {
        let Some(id) = self.field_id(field_ast) else {
            return;
        };
        let desc = self.pool.struct_(sid);
        if desc.field_by_id(id).is_some() {
            self.reporter.error_at(
                &field_ast.location,
                format!("Field with index {} already defined.", id),
            );
            return;
        }
        if desc.field_by_name(&field_ast.name).is_some() {
            self.reporter.error_at(
                &field_ast.location,
                format!("Field with name {} already defined.", field_ast.name),
            );
            return;
        }
        if let Some((min, max)) = desc.extension_range {
            if id >= min && id <= max {
                self.reporter.error_at(
                    &field_ast.location,
                    format!("Field index {} falls within the extension range.", id),
                );
            }
        }
        let Some(ty) = self.get_type(&field_ast.field_type, DeclScope::Struct(sid)) else {
            return;
        };
        self.pool.struct_mut(sid).insert_field(FieldDescriptor {
            name: field_ast.name.clone(),
            id,
            ty,
            options: FieldOptions::default(),
        });
        fields.push((field_ast, sid));
    }

    fn define_method<'a>(
        &mut self,
        method_ast: &'a ast::MethodDecl,
        sid: StructId,
        methods: &mut Vec<(&'a ast::MethodDecl, StructId)>,
    ) {
        let id = match method_ast.index {
            0 => {
                self.reporter.error_at(
                    &method_ast.location,
                    format!("Field id {} out of range", method_ast.index),
                );
                return;
            }
            n if n > u32::MAX as u64 => {
                self.reporter.error_at(
                    &method_ast.location,
                    format!("Field id {} out of range", n),
                );
                return;
            }
            n => n as u32,
        };
        let desc = self.pool.struct_(sid);
        if desc.field_by_id(id).is_some() || desc.method_by_id(id).is_some() {
            self.reporter.error_at(
                &method_ast.location,
                format!("Field with index {} already defined", id),
            );
            return;
        }
        if desc.field_by_name(&method_ast.name).is_some()
            || desc.method_by_name(&method_ast.name).is_some()
        {
            self.reporter.error_at(
                &method_ast.location,
                format!("Field with name {} already defined", method_ast.name),
            );
            return;
        }
        let mut params = Vec::new();
        for param_ast in &method_ast.params {
            let Some(ty) = self.get_type(&param_ast.param_type, DeclScope::Struct(sid)) else {
                return;
            };
            params.push(Param {
                name: param_ast.name.clone(),
                ty,
            });
        }
        let Some(return_type) = self.get_type(&method_ast.return_type, DeclScope::Struct(sid))
        else {
            return;
        };
        self.pool.struct_mut(sid).methods.push(MethodDescriptor {
            name: method_ast.name.clone(),
            id,
            params,
            return_type,
            options: Default::default(),
        });
        methods.push((method_ast, sid));
    }

    fn analyze_extension_field(
        &mut self,
        field_ast: &ast::FieldDecl,
        ext: ExtId,
        extends_ast: &ast::TypeAst,
        scope: DeclScope,
    ) {
        let Some(target_tr) = self.get_type(extends_ast, scope) else {
            return;
        };
        let Type::Struct(target) = *self.pool.type_(target_tr) else {
            self.reporter.error_at(
                extends_ast.location(),
                format!("Extended type '{}' is not a struct", extends_ast.display()),
            );
            return;
        };
        // Extensions register against the nearest ancestor declaring a
        // range.
        let Some(extensible) = self.pool.extensible_base(target) else {
            self.reporter.error_at(
                &field_ast.location,
                format!(
                    "No extension range defined for struct {}.",
                    self.pool.struct_(target).name
                ),
            );
            return;
        };
        let Some(ty) = self.get_type(&field_ast.field_type, scope) else {
            return;
        };
        {
            let ext_mut = self.pool.extension_mut(ext);
            ext_mut.extends = Some(extensible);
            ext_mut.ty = ty;
        }

        let (min, max) = self
            .pool
            .struct_(extensible)
            .extension_range
            .expect("extensible base declares a range");
        let id = self.pool.extension(ext).id;
        if id < min || id > max {
            self.reporter.error_at(
                &field_ast.location,
                format!(
                    "Extension ID {} does not fall within the allowed extension range for struct {}: {}..{}.",
                    id,
                    self.pool.struct_(extensible).name,
                    min,
                    max
                ),
            );
        } else if self.registry.get_extension(extensible, id).is_some() {
            self.reporter.error_at(
                &field_ast.location,
                format!(
                    "Extension ID {} for type {} is already in use.",
                    id,
                    self.pool.struct_(extensible).name
                ),
            );
        } else {
            self.registry.add_extension(&self.pool, ext);
        }
    }

    // ===== Type resolution =====

    fn get_type(&mut self, type_ast: &ast::TypeAst, scope: DeclScope) -> Option<TypeRef> {
        match type_ast {
            ast::TypeAst::Name { name, location } => {
                match self.lookup_type_name(name, Some(scope), location)? {
                    Sym::Builtin(tr) => Some(tr),
                    Sym::Struct(sid) => Some(self.pool.intern_type(Type::Struct(sid))),
                    Sym::Enum(eid) => Some(self.pool.intern_type(Type::Enum(eid))),
                    Sym::Generic(_) => {
                        self.reporter.error_at(
                            location,
                            format!("Missing type parameters for type '{}'", name),
                        );
                        None
                    }
                }
            }
            ast::TypeAst::Modified {
                base,
                constant,
                shared,
                location,
            } => {
                let element = self.get_type(base, scope)?;
                if !matches!(self.pool.type_(element), Type::Struct(_)) {
                    self.reporter.error_at(
                        location,
                        "Type modifiers can only be applied to struct types",
                    );
                    return None;
                }
                Some(self.pool.intern_type(Type::Modified {
                    element,
                    constant: *constant,
                    shared: *shared,
                }))
            }
            ast::TypeAst::Specialized {
                base,
                args,
                location,
            } => {
                let mut arg_refs = Vec::new();
                for arg in args {
                    arg_refs.push(self.get_type(arg, scope)?);
                }
                let ast::TypeAst::Name { name, location: base_location } = base.as_ref() else {
                    self.reporter.error_at(
                        location,
                        format!("Type '{}' does not have type parameters", base.display()),
                    );
                    return None;
                };
                let Sym::Generic(kind) = self.lookup_type_name(name, Some(scope), base_location)?
                else {
                    self.reporter.error_at(
                        location,
                        format!("Type '{}' does not have type parameters", name),
                    );
                    return None;
                };
                if arg_refs.len() != kind.arity() {
                    self.reporter.error_at(
                        location,
                        format!(
                            "Incorrect number of type parameters for '{}': found {}, expected {}",
                            name,
                            arg_refs.len(),
                            kind.arity()
                        ),
                    );
                    return None;
                }
                match kind {
                    GenericKind::List => {
                        let element = arg_refs[0];
                        if !self.element_kind(element).allowed_as_list_element() {
                            self.reporter.error_at(
                                location,
                                format!(
                                    "Lists of type '{}' are not permitted",
                                    self.pool.type_name(element)
                                ),
                            );
                        }
                        Some(self.pool.intern_type(Type::List { element }))
                    }
                    GenericKind::Set => {
                        let element = arg_refs[0];
                        if !self.element_kind(element).allowed_as_set_element() {
                            self.reporter.error_at(
                                location,
                                format!(
                                    "Sets of type '{}' are not permitted",
                                    self.pool.type_name(element)
                                ),
                            );
                        }
                        Some(self.pool.intern_type(Type::Set { element }))
                    }
                    GenericKind::Map => {
                        let key = arg_refs[0];
                        let value = arg_refs[1];
                        if !self.element_kind(key).allowed_as_set_element() {
                            self.reporter.error_at(
                                location,
                                format!(
                                    "Map keys of type '{}' are not permitted",
                                    self.pool.type_name(key)
                                ),
                            );
                        } else if !self.element_kind(value).allowed_as_list_element() {
                            self.reporter.error_at(
                                location,
                                format!(
                                    "Map values of type '{}' are not permitted",
                                    self.pool.type_name(value)
                                ),
                            );
                        }
                        Some(self.pool.intern_type(Type::Map { key, value }))
                    }
                }
            }
        }
    }

    fn element_kind(&self, tr: TypeRef) -> coda::types::TypeKind {
        self.pool.type_(self.pool.unmodified(tr)).kind()
    }

    fn lookup_type_name(
        &mut self,
        name: &str,
        scope: Option<DeclScope>,
        location: &Location,
    ) -> Option<Sym> {
        let mut sym = self.typenames.get(name).copied();
        if sym.is_none() {
            if let Some(scope) = scope {
                let mut prefix = self.scope_full_name(scope);
                while !prefix.is_empty() {
                    if let Some(&found) = self.typenames.get(&format!("{}.{}", prefix, name)) {
                        sym = Some(found);
                        break;
                    }
                    prefix = match prefix.rfind('.') {
                        Some(dot) => prefix[..dot].to_owned(),
                        None => String::new(),
                    };
                }
            }
        }

        let Some(sym) = sym else {
            let suffix = format!(".{}", name);
            let mut best: Option<(&str, usize)> = None;
            for typename in self.typenames.keys() {
                if typename.ends_with(&suffix) {
                    best = Some((typename, 0));
                    break;
                }
                let dist = if typename.ends_with(name) {
                    1
                } else {
                    levenshtein(typename, name)
                };
                if dist < best.map(|(_, d)| d).unwrap_or(5) {
                    best = Some((typename, dist));
                }
            }
            match best {
                Some((suggestion, _)) => {
                    let suggestion = suggestion.to_owned();
                    self.reporter.error_at(
                        location,
                        format!("Unknown type '{}', did you mean '{}'?", name, suggestion),
                    );
                }
                None => {
                    self.reporter
                        .error_at(location, format!("Unknown type '{}'", name));
                }
            }
            return None;
        };

        // Visibility: a declared type must come from the same file or the
        // transitive import closure.
        if let (Some(scope), Sym::Struct(_) | Sym::Enum(_)) = (scope, sym) {
            let src_path = self.scope_file_path(scope);
            let dst_path = match sym {
                Sym::Struct(sid) => {
                    let file = self.pool.struct_(self.top_level_struct(sid)).file;
                    self.pool.file_path(file)
                }
                Sym::Enum(eid) => {
                    let desc = self.pool.enum_(eid);
                    let file = match desc.enclosing {
                        Some(outer) => self.pool.struct_(self.top_level_struct(outer)).file,
                        None => desc.file,
                    };
                    self.pool.file_path(file)
                }
                _ => unreachable!("matched declared symbols only"),
            };
            if dst_path != src_path
                && !self
                    .visible
                    .get(&src_path)
                    .map(|set| set.contains(&dst_path))
                    .unwrap_or(false)
            {
                self.reporter.error_at(
                    location,
                    format!(
                        "Type '{}' is defined in file '{}', which was not included by '{}'.",
                        name, dst_path, src_path
                    ),
                );
            }
        }
        Some(sym)
    }

    fn top_level_struct(&self, mut sid: StructId) -> StructId {
        while let Some(outer) = self.pool.struct_(sid).enclosing {
            sid = outer;
        }
        sid
    }

    fn scope_full_name(&self, scope: DeclScope) -> String {
        match scope {
            DeclScope::Struct(sid) => self.pool.struct_full_name(sid),
            DeclScope::File(fid) => self.pool.file(fid).package.clone(),
        }
    }

    fn scope_file_path(&self, scope: DeclScope) -> String {
        match scope {
            DeclScope::Struct(sid) => {
                let file = self.pool.struct_(self.top_level_struct(sid)).file;
                self.pool.file_path(file)
            }
            DeclScope::File(fid) => self.pool.file_path(fid),
        }
    }

    // ===== Phase C =====

    fn set_file_options(&mut self, file_ast: &ast::File, fid: FileId) {
        for opt in &file_ast.options {
            if let Some(value) = self.check_option(OptionKind::File, opt) {
                let result =
                    self.pool
                        .file_mut(fid)
                        .options
                        .apply(&opt.name, opt.scope.as_deref(), &value);
                self.report_option_result(result, opt);
            }
        }
    }

    fn set_import_packages(&mut self, fid: FileId) {
        let packages: Vec<_> = self
            .pool
            .file(fid)
            .imports
            .iter()
            .map(|imp| {
                self.files_by_path
                    .get(&imp.path)
                    .map(|&imported| self.pool.file(imported).options.package.clone())
            })
            .collect();
        for (index, package) in packages.into_iter().enumerate() {
            if let Some(package) = package {
                self.pool.file_mut(fid).imports[index].package = package;
            }
        }
    }

    fn set_struct_options(&mut self, struct_ast: &ast::StructDef, sid: StructId) {
        for opt in &struct_ast.options {
            if let Some(value) = self.check_option(OptionKind::Struct, opt) {
                let result =
                    self.pool
                        .struct_mut(sid)
                        .options
                        .apply(&opt.name, opt.scope.as_deref(), &value);
                self.report_option_result(result, opt);
            }
        }
    }

    /// Rule: a `shared` (or `reference`) struct may not descend from a
    /// non-`shared` (non-`reference`) struct. Checked once every struct's
    /// options are in place.
    fn check_shared_inheritance(&mut self, struct_ast: &ast::StructDef, sid: StructId) {
        let desc = self.pool.struct_(sid);
        let Some(base) = desc.base_type else {
            return;
        };
        let base_options = &self.pool.struct_(base).options;
        if desc.options.shared && !base_options.shared {
            self.reporter.error_at(
                &struct_ast.location,
                format!(
                    "Type {} cannot be a shared type, because it is a subtype of a non-shared type.",
                    struct_ast.name
                ),
            );
        }
        if desc.options.reference && !base_options.reference {
            self.reporter.error_at(
                &struct_ast.location,
                format!(
                    "Type {} cannot be a reference type, because it is a subtype of a non-reference type.",
                    struct_ast.name
                ),
            );
        }
    }

    fn set_field_options(&mut self, field_ast: &ast::FieldDecl, sid: StructId) {
        let id = field_ast.index as u32;
        for opt in &field_ast.options {
            if let Some(value) = self.check_option(OptionKind::Field, opt) {
                let desc = self.pool.struct_mut(sid);
                let field_ix = desc
                    .fields
                    .iter()
                    .position(|f| f.id == id)
                    .expect("field was defined");
                let result = desc.fields[field_ix].options.apply(
                    &opt.name,
                    opt.scope.as_deref(),
                    &value,
                );
                self.report_option_result(result, opt);
            }
        }
    }

    fn set_method_options(&mut self, method_ast: &ast::MethodDecl, sid: StructId) {
        let id = method_ast.index as u32;
        for opt in &method_ast.options {
            if let Some(value) = self.check_option(OptionKind::Method, opt) {
                let desc = self.pool.struct_mut(sid);
                let method_ix = desc
                    .methods
                    .iter()
                    .position(|m| m.id == id)
                    .expect("method was defined");
                let result = desc.methods[method_ix].options.apply(
                    &opt.name,
                    opt.scope.as_deref(),
                    &value,
                );
                self.report_option_result(result, opt);
            }
        }
    }

    /// Resolves an option name against the record's field table and coerces
    /// the literal to the field's type. Reports and returns `None` on
    /// failure.
    fn check_option(&mut self, kind: OptionKind, opt: &ast::OptionDecl) -> Option<OptionValue> {
        let fields = option_fields(kind);
        let Some(def) = fields.iter().find(|f| f.name == opt.name) else {
            let mut best: Option<(&str, usize)> = None;
            for field in fields {
                let dist = levenshtein(field.name, &opt.name);
                if dist < best.map(|(_, d)| d).unwrap_or(5) {
                    best = Some((field.name, dist));
                }
            }
            match best {
                Some((suggestion, _)) => self.reporter.error_at(
                    &opt.location,
                    format!(
                        "Unknown option '{}', did you mean '{}'?",
                        opt.name, suggestion
                    ),
                ),
                None => self
                    .reporter
                    .error_at(&opt.location, format!("Unknown option '{}'", opt.name)),
            }
            return None;
        };

        let value = match (def.ty, &opt.value) {
            (OptionType::Bool | OptionType::MapBool, ast::LiteralValue::Bool(b, _)) => {
                OptionValue::Bool(*b)
            }
            (OptionType::Integer, ast::LiteralValue::Integer(n, _)) => {
                OptionValue::Integer(*n as i64)
            }
            (OptionType::Str | OptionType::MapStr, ast::LiteralValue::Str(s, _)) => {
                OptionValue::Str(s.clone())
            }
            (expected, actual) => {
                let expected = match expected {
                    OptionType::Bool | OptionType::MapBool => "boolean",
                    OptionType::Integer => "integer",
                    OptionType::Str | OptionType::MapStr => "string",
                };
                self.reporter.error_at(
                    actual.location(),
                    format!("Cannot convert value of option '{}' to {}", opt.name, expected),
                );
                return None;
            }
        };
        Some(value)
    }

    fn report_option_result(&mut self, result: Result<(), OptionError>, opt: &ast::OptionDecl) {
        match result {
            Ok(()) => {}
            Err(OptionError::Unknown) => self
                .reporter
                .error_at(&opt.location, format!("Unknown option '{}'", opt.name)),
            Err(OptionError::NotScoped) => self
                .reporter
                .error_at(&opt.location, format!("Option '{}' is not scoped", opt.name)),
            Err(OptionError::AlreadySet) => self.reporter.error_at(
                &opt.location,
                format!(
                    "Option '{}:{}' has already been set",
                    opt.name,
                    opt.scope.as_deref().unwrap_or("")
                ),
            ),
            Err(OptionError::WrongType) => self.reporter.error_at(
                &opt.location,
                format!("Cannot convert value of option '{}'", opt.name),
            ),
        }
    }
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    for (i, &ca) in a.iter().enumerate() {
        let mut current = vec![i + 1];
        for (j, &cb) in b.iter().enumerate() {
            let insertions = previous[j + 1] + 1;
            let deletions = current[j] + 1;
            let substitutions = previous[j] + usize::from(ca != cb);
            current.push(insertions.min(deletions).min(substitutions));
        }
        previous = current;
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levenshtein_distances() {
        assert_eq!(levenshtein("packag", "package"), 1);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }
}
