//! The Rust backend.
//!
//! Emits one `.rs` module per input file. The module contains a `Schema`
//! struct holding the file's descriptor handles with a `register` function
//! that rebuilds the descriptors into a pool at load time, a Rust enum per
//! CODA enum, and a typed wrapper per struct exposing the runtime contract:
//! `get_*` / `is_*` / `set_*` / `clear_*` / `has_*` accessors, mutable-view
//! `update_*` accessors for collection and struct fields, `merge`, and
//! freeze/hash plumbing delegated to the object runtime.

use std::collections::BTreeSet;
use std::path::PathBuf;

use coda::descriptor::{
    scoped_option, DescriptorPool, EnumId, FieldDescriptor, FileId, MethodDescriptor, StructId,
};
use coda::types::{Type, TypeRef};
use heck::{ToSnakeCase, ToUpperCamelCase};
use log::debug;

use super::{is_mutable_type, writeable_fields, Backend, BackendOptions, CodeBuffer, CodegenRequest, GeneratedFile};

pub struct RustBackend {
    options: BackendOptions,
}

impl RustBackend {
    pub fn new(options: BackendOptions) -> RustBackend {
        RustBackend { options }
    }
}

impl Backend for RustBackend {
    fn name(&self) -> &'static str {
        "rust"
    }

    fn generate(&mut self, request: &CodegenRequest<'_>) -> Result<Vec<GeneratedFile>, String> {
        let generated: Vec<GeneratedFile> = request
            .files
            .iter()
            .map(|&fid| generate_file(request.pool, fid))
            .collect::<Result<_, _>>()?;
        // `--opt rust:single=path.rs` concatenates all modules into one file.
        if let Some(single) = self.options.get("single") {
            let content = generated
                .iter()
                .map(|file| file.content.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            return Ok(vec![GeneratedFile {
                path: PathBuf::from(single),
                content,
            }]);
        }
        Ok(generated)
    }
}

/// Local (same-file) declarations, flattened with nesting-path names.
struct Decls {
    structs: Vec<(StructId, String)>,
    enums: Vec<(EnumId, String)>,
}

fn collect_decls(pool: &DescriptorPool, fid: FileId) -> Decls {
    fn walk(pool: &DescriptorPool, sid: StructId, path: &str, decls: &mut Decls) {
        let desc = pool.struct_(sid);
        let name = if path.is_empty() {
            desc.name.clone()
        } else {
            format!("{}_{}", path, desc.name)
        };
        for &nested in &desc.structs {
            walk(pool, nested, &name, decls);
        }
        for &nested in &desc.enums {
            let nested_name = format!("{}_{}", name, pool.enum_(nested).name);
            decls.enums.push((nested, nested_name));
        }
        decls.structs.push((sid, name));
    }

    let mut decls = Decls {
        structs: Vec::new(),
        enums: Vec::new(),
    };
    for &eid in &pool.file(fid).enums {
        let name = pool.enum_(eid).name.clone();
        decls.enums.push((eid, name));
    }
    for &sid in &pool.file(fid).structs {
        walk(pool, sid, "", &mut decls);
    }
    decls
}

fn generate_file(pool: &DescriptorPool, fid: FileId) -> Result<GeneratedFile, String> {
    let file = pool.file(fid);
    debug!("generating rust module for {}", pool.file_path(fid));
    let decls = collect_decls(pool, fid);

    let mut buf = CodeBuffer::new();
    buf.line("// Generated by codagen. Do not edit.");
    buf.blank();
    buf.line("#![allow(dead_code)]");
    buf.blank();
    buf.line("use coda::descriptor::{");
    buf.line("    DescriptorPool, EnumDescriptor, EnumValue, ExtensionField, FieldDescriptor,");
    buf.line("    FieldKey, FieldOptions, FileDescriptor, FileId, EnumId, MethodDescriptor,");
    buf.line("    Param, StructDescriptor, StructId,");
    buf.line("};");
    buf.line("use coda::object::{ObjectRef, Value};");
    buf.line("use coda::registry::TypeRegistry;");
    buf.line("use coda::types::Type;");
    buf.blank();

    emit_schema(pool, fid, &decls, &mut buf);
    for (eid, name) in &decls.enums {
        emit_enum(pool, *eid, name, &mut buf);
    }
    for (sid, name) in &decls.structs {
        emit_struct(pool, *sid, name, &decls, &mut buf);
    }

    let path = match scoped_option(&file.options.filepath, "rust") {
        Some(path) => PathBuf::from(path),
        None => {
            let stem = file.name.strip_suffix(".coda").unwrap_or(&file.name);
            PathBuf::from(format!("{}.rs", stem.to_snake_case()))
        }
    };
    Ok(GeneratedFile {
        path,
        content: buf.finish(),
    })
}

fn schema_field(name: &str) -> String {
    name.to_snake_case()
}

/// Emits the `Schema` handle struct and its `register` function.
fn emit_schema(pool: &DescriptorPool, fid: FileId, decls: &Decls, buf: &mut CodeBuffer) {
    let file = pool.file(fid);

    buf.line("/// Descriptor handles for this file.");
    buf.line("pub struct Schema {");
    buf.indent();
    buf.line("pub file: FileId,");
    for (_, name) in &decls.enums {
        buf.line(&format!("pub {}: EnumId,", schema_field(name)));
    }
    for (_, name) in &decls.structs {
        buf.line(&format!("pub {}: StructId,", schema_field(name)));
    }
    buf.unindent();
    buf.line("}");
    buf.blank();

    buf.line("impl Schema {");
    buf.indent();
    buf.line("/// Builds this file's descriptors into the pool and registers its");
    buf.line("/// subtypes and extensions. Imported files must be registered first.");
    buf.line("pub fn register(pool: &mut DescriptorPool, registry: &mut TypeRegistry) -> Schema {");
    buf.indent();
    buf.line(&format!(
        "let file = pool.add_file(FileDescriptor {{ name: {:?}.to_owned(), directory: {:?}.to_owned(), package: {:?}.to_owned(), ..Default::default() }});",
        file.name, file.directory, file.package
    ));

    // Enum declarations.
    for (eid, name) in &decls.enums {
        let desc = pool.enum_(*eid);
        let var = schema_field(name);
        buf.line(&format!(
            "let {} = pool.add_enum(EnumDescriptor::new({:?}, file));",
            var, desc.name
        ));
        for value in &desc.values {
            buf.line(&format!(
                "pool.enum_mut({}).values.push(EnumValue {{ name: {:?}.to_owned(), value: {} }});",
                var, value.name, value.value
            ));
        }
    }

    // Struct shells, then attributes that may refer to other shells.
    for (sid, name) in &decls.structs {
        let desc = pool.struct_(*sid);
        buf.line(&format!(
            "let {} = pool.add_struct(StructDescriptor::new({:?}, file));",
            schema_field(name),
            desc.name
        ));
    }
    for (sid, name) in &decls.structs {
        let desc = pool.struct_(*sid);
        let var = schema_field(name);
        if let Some(type_id) = desc.type_id {
            buf.line(&format!(
                "pool.struct_mut({}).type_id = Some({});",
                var, type_id
            ));
        }
        if let Some(base) = desc.base_type {
            buf.line(&format!(
                "pool.struct_mut({}).base_type = Some({});",
                var,
                struct_expr(pool, base, decls)
            ));
        }
        if let Some((min, max)) = desc.extension_range {
            buf.line(&format!(
                "pool.struct_mut({}).extension_range = Some(({}, {}));",
                var, min, max
            ));
        }
        if let Some(enclosing) = desc.enclosing {
            buf.line(&format!(
                "pool.struct_mut({}).enclosing = Some({});",
                var,
                struct_expr(pool, enclosing, decls)
            ));
            buf.line(&format!(
                "pool.struct_mut({}).structs.push({});",
                struct_expr(pool, enclosing, decls),
                var
            ));
        }
        if desc.options.shared {
            buf.line(&format!("pool.struct_mut({}).options.shared = true;", var));
        }
        if desc.options.reference {
            buf.line(&format!(
                "pool.struct_mut({}).options.reference = true;",
                var
            ));
        }
    }
    for (eid, name) in &decls.enums {
        let desc = pool.enum_(*eid);
        let var = schema_field(name);
        if let Some(enclosing) = desc.enclosing {
            buf.line(&format!(
                "pool.enum_mut({}).enclosing = Some({});",
                var,
                struct_expr(pool, enclosing, decls)
            ));
            buf.line(&format!(
                "pool.struct_mut({}).enums.push({});",
                struct_expr(pool, enclosing, decls),
                var
            ));
        } else {
            buf.line(&format!("pool.file_mut(file).enums.push({});", var));
        }
    }
    for (sid, name) in &decls.structs {
        if pool.struct_(*sid).enclosing.is_none() {
            buf.line(&format!(
                "pool.file_mut(file).structs.push({});",
                schema_field(name)
            ));
        }
    }

    // The interned type table, in dependency order.
    let types = type_closure(pool, fid, decls);
    for &tr in &types {
        buf.line(&format!(
            "let ty_{} = pool.intern_type({});",
            tr.index(),
            type_expr(pool, tr, decls)
        ));
    }

    // Fields and methods.
    for (sid, name) in &decls.structs {
        let desc = pool.struct_(*sid);
        let var = schema_field(name);
        for field in &desc.fields {
            buf.line(&format!(
                "pool.struct_mut({}).insert_field(FieldDescriptor {{ name: {:?}.to_owned(), id: {}, ty: ty_{}, options: {} }});",
                var,
                field.name,
                field.id,
                field.ty.index(),
                field_options_expr(field)
            ));
        }
        for method in &desc.methods {
            buf.line(&format!(
                "pool.struct_mut({}).methods.push({});",
                var,
                method_expr(method)
            ));
        }
    }

    // Extension fields, at file level and inside struct declarations.
    let mut ext_decls: Vec<(coda::descriptor::ExtId, Option<&str>)> = pool
        .file(fid)
        .extensions
        .iter()
        .map(|&ext| (ext, None))
        .collect();
    for (sid, name) in &decls.structs {
        for &ext in &pool.struct_(*sid).extensions {
            ext_decls.push((ext, Some(name)));
        }
    }
    for (index, (ext, owner)) in ext_decls.iter().enumerate() {
        let field = pool.extension(*ext);
        let Some(extends) = field.extends else {
            continue;
        };
        let enclosing = match owner {
            Some(name) => format!("Some({})", schema_field(name)),
            None => "None".to_owned(),
        };
        buf.line(&format!(
            "let ext_{} = pool.add_extension(ExtensionField {{ name: {:?}.to_owned(), id: {}, ty: ty_{}, extends: Some({}), file, enclosing: {}, source_line: {}, options: FieldOptions::default() }});",
            index,
            field.name,
            field.id,
            field.ty.index(),
            struct_expr(pool, extends, decls),
            enclosing,
            field.source_line
        ));
        match owner {
            Some(name) => buf.line(&format!(
                "pool.struct_mut({}).extensions.push(ext_{});",
                schema_field(name),
                index
            )),
            None => buf.line(&format!(
                "pool.file_mut(file).extensions.push(ext_{});",
                index
            )),
        }
    }

    buf.line("registry.add_file(pool, file);");
    let mut ctor = String::from("Schema { file");
    for (_, name) in &decls.enums {
        ctor.push_str(&format!(", {}", schema_field(name)));
    }
    for (_, name) in &decls.structs {
        ctor.push_str(&format!(", {}", schema_field(name)));
    }
    ctor.push_str(" }");
    buf.line(&ctor);
    buf.unindent();
    buf.line("}");
    buf.unindent();
    buf.line("}");
    buf.blank();
}

/// All type handles referenced by this file's fields and methods, with their
/// transitive element types, in interning (dependency) order.
fn type_closure(pool: &DescriptorPool, fid: FileId, decls: &Decls) -> Vec<TypeRef> {
    fn add(pool: &DescriptorPool, tr: TypeRef, seen: &mut BTreeSet<TypeRef>) {
        if !seen.insert(tr) {
            return;
        }
        match pool.type_(tr) {
            Type::List { element } | Type::Set { element } => add(pool, *element, seen),
            Type::Map { key, value } => {
                add(pool, *key, seen);
                add(pool, *value, seen);
            }
            Type::Modified { element, .. } => add(pool, *element, seen),
            _ => {}
        }
    }

    let mut seen = BTreeSet::new();
    for (sid, _) in &decls.structs {
        let desc = pool.struct_(*sid);
        for field in &desc.fields {
            add(pool, field.ty, &mut seen);
        }
        for method in &desc.methods {
            add(pool, method.return_type, &mut seen);
            for param in &method.params {
                add(pool, param.ty, &mut seen);
            }
        }
        for &ext in &desc.extensions {
            add(pool, pool.extension(ext).ty, &mut seen);
        }
    }
    for &ext in &pool.file(fid).extensions {
        add(pool, pool.extension(ext).ty, &mut seen);
    }
    seen.into_iter().collect()
}

/// A Rust expression for a struct handle: a schema variable for local
/// declarations, a name lookup for imported ones.
fn struct_expr(pool: &DescriptorPool, sid: StructId, decls: &Decls) -> String {
    match decls.structs.iter().find(|(id, _)| *id == sid) {
        Some((_, name)) => schema_field(name),
        None => format!(
            "pool.find_struct({:?}).expect(\"imported schema is registered\")",
            pool.struct_full_name(sid)
        ),
    }
}

fn enum_expr(pool: &DescriptorPool, eid: EnumId, decls: &Decls) -> String {
    match decls.enums.iter().find(|(id, _)| *id == eid) {
        Some((_, name)) => schema_field(name),
        None => format!(
            "pool.find_enum({:?}).expect(\"imported schema is registered\")",
            pool.enum_full_name(eid)
        ),
    }
}

fn type_expr(pool: &DescriptorPool, tr: TypeRef, decls: &Decls) -> String {
    match pool.type_(tr) {
        Type::Bool => "Type::Bool".to_owned(),
        Type::Integer { bits } => format!("Type::Integer {{ bits: {} }}", bits),
        Type::Float => "Type::Float".to_owned(),
        Type::Double => "Type::Double".to_owned(),
        Type::String => "Type::String".to_owned(),
        Type::Bytes => "Type::Bytes".to_owned(),
        Type::List { element } => format!("Type::List {{ element: ty_{} }}", element.index()),
        Type::Set { element } => format!("Type::Set {{ element: ty_{} }}", element.index()),
        Type::Map { key, value } => format!(
            "Type::Map {{ key: ty_{}, value: ty_{} }}",
            key.index(),
            value.index()
        ),
        Type::Modified {
            element,
            constant,
            shared,
        } => format!(
            "Type::Modified {{ element: ty_{}, constant: {}, shared: {} }}",
            element.index(),
            constant,
            shared
        ),
        Type::Struct(sid) => format!("Type::Struct({})", struct_expr(pool, *sid, decls)),
        Type::Enum(eid) => format!("Type::Enum({})", enum_expr(pool, *eid, decls)),
    }
}

fn field_options_expr(field: &FieldDescriptor) -> String {
    let options = &field.options;
    let mut parts = Vec::new();
    if options.nullable {
        parts.push("nullable: true".to_owned());
    }
    if options.transient {
        parts.push("transient: true".to_owned());
    }
    if options.deprecated {
        parts.push("deprecated: true".to_owned());
    }
    if options.novisit {
        parts.push("novisit: true".to_owned());
    }
    if options.fixed {
        parts.push("fixed: true".to_owned());
    }
    if parts.is_empty() {
        "FieldOptions::default()".to_owned()
    } else {
        format!(
            "FieldOptions {{ {}, ..Default::default() }}",
            parts.join(", ")
        )
    }
}

fn method_expr(method: &MethodDescriptor) -> String {
    let params: Vec<String> = method
        .params
        .iter()
        .map(|p| {
            format!(
                "Param {{ name: {:?}.to_owned(), ty: ty_{} }}",
                p.name,
                p.ty.index()
            )
        })
        .collect();
    format!(
        "MethodDescriptor {{ name: {:?}.to_owned(), id: {}, params: vec![{}], return_type: ty_{}, options: Default::default() }}",
        method.name,
        method.id,
        params.join(", "),
        method.return_type.index()
    )
}

fn emit_enum(pool: &DescriptorPool, eid: EnumId, flat_name: &str, buf: &mut CodeBuffer) {
    let desc = pool.enum_(eid);
    let rust_name = flat_name.to_upper_camel_case();
    buf.line("#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]");
    buf.line("#[repr(i32)]");
    buf.line(&format!("pub enum {} {{", rust_name));
    buf.indent();
    for value in &desc.values {
        buf.line(&format!(
            "{} = {},",
            value.name.to_upper_camel_case(),
            value.value
        ));
    }
    buf.unindent();
    buf.line("}");
    buf.blank();
    buf.line(&format!("impl {} {{", rust_name));
    buf.indent();
    buf.line("pub fn from_value(value: i32) -> Option<Self> {");
    buf.indent();
    buf.line("match value {");
    buf.indent();
    for value in &desc.values {
        buf.line(&format!(
            "{} => Some(Self::{}),",
            value.value,
            value.name.to_upper_camel_case()
        ));
    }
    buf.line("_ => None,");
    buf.unindent();
    buf.line("}");
    buf.unindent();
    buf.line("}");
    buf.blank();
    buf.line("pub fn value(self) -> i32 {");
    buf.indent();
    buf.line("self as i32");
    buf.unindent();
    buf.line("}");
    buf.unindent();
    buf.line("}");
    buf.blank();
}

/// Rust surface type for a field, used in accessor signatures.
fn rust_type(pool: &DescriptorPool, tr: TypeRef, decls: &Decls) -> String {
    match pool.type_(pool.unmodified(tr)) {
        Type::Bool => "bool".to_owned(),
        Type::Integer { bits: 16 } => "i16".to_owned(),
        Type::Integer { bits: 32 } => "i32".to_owned(),
        Type::Integer { .. } => "i64".to_owned(),
        Type::Float => "f32".to_owned(),
        Type::Double => "f64".to_owned(),
        Type::String => "String".to_owned(),
        Type::Bytes => "Vec<u8>".to_owned(),
        Type::Enum(eid) => match decls.enums.iter().find(|(id, _)| *id == *eid) {
            Some((_, name)) => name.to_upper_camel_case(),
            None => "i32".to_owned(),
        },
        Type::Struct(_) => "ObjectRef".to_owned(),
        Type::List { .. } | Type::Set { .. } | Type::Map { .. } => "Value".to_owned(),
        Type::Modified { .. } => unreachable!("modifiers stripped above"),
    }
}

fn emit_struct(
    pool: &DescriptorPool,
    sid: StructId,
    flat_name: &str,
    decls: &Decls,
    buf: &mut CodeBuffer,
) {
    let desc = pool.struct_(sid);
    let rust_name = flat_name.to_upper_camel_case();
    let schema_var = schema_field(flat_name);

    buf.line(&format!("/// Typed view over a `{}` instance.", desc.name));
    buf.line("#[derive(Clone, Debug, PartialEq)]");
    buf.line(&format!("pub struct {} {{", rust_name));
    buf.indent();
    buf.line("obj: ObjectRef,");
    buf.unindent();
    buf.line("}");
    buf.blank();
    buf.line(&format!("impl {} {{", rust_name));
    buf.indent();
    buf.line("pub fn new(schema: &Schema) -> Self {");
    buf.indent();
    buf.line(&format!(
        "Self {{ obj: ObjectRef::new(schema.{}) }}",
        schema_var
    ));
    buf.unindent();
    buf.line("}");
    buf.blank();
    buf.line("pub fn wrap(obj: ObjectRef) -> Self {");
    buf.indent();
    buf.line("Self { obj }");
    buf.unindent();
    buf.line("}");
    buf.blank();
    buf.line("pub fn object(&self) -> &ObjectRef {");
    buf.indent();
    buf.line("&self.obj");
    buf.unindent();
    buf.line("}");
    buf.blank();
    buf.line("/// Folds the present fields of `src` into this instance.");
    buf.line("pub fn merge(&self, src: &Self) {");
    buf.indent();
    buf.line("self.obj.merge(&src.obj);");
    buf.unindent();
    buf.line("}");
    buf.blank();
    buf.line("pub fn freeze(&self, deep: bool) {");
    buf.indent();
    buf.line("self.obj.freeze(deep);");
    buf.unindent();
    buf.line("}");
    buf.blank();
    buf.line("/// Structural hash; the instance must be frozen.");
    buf.line("pub fn hash_value(&self) -> u64 {");
    buf.indent();
    buf.line("self.obj.hash_value()");
    buf.unindent();
    buf.line("}");

    for field in writeable_fields(pool, sid, "rust") {
        emit_field_accessors(pool, &schema_var, field, decls, buf);
    }
    buf.unindent();
    buf.line("}");
    buf.blank();

    if !desc.methods.is_empty() {
        buf.line(&format!(
            "/// Declared methods of `{}`; implemented by the application.",
            desc.name
        ));
        buf.line(&format!("pub trait {}Methods {{", rust_name));
        buf.indent();
        for method in &desc.methods {
            let params: Vec<String> = method
                .params
                .iter()
                .map(|p| {
                    format!(
                        "{}: {}",
                        p.name.to_snake_case(),
                        rust_type(pool, p.ty, decls)
                    )
                })
                .collect();
            let params = if params.is_empty() {
                String::new()
            } else {
                format!(", {}", params.join(", "))
            };
            buf.line(&format!(
                "fn {}(&self{}) -> {};",
                method.name.to_snake_case(),
                params,
                rust_type(pool, method.return_type, decls)
            ));
        }
        buf.unindent();
        buf.line("}");
        buf.blank();
    }
}

fn emit_field_accessors(
    pool: &DescriptorPool,
    schema_var: &str,
    field: &FieldDescriptor,
    decls: &Decls,
    buf: &mut CodeBuffer,
) {
    let snake = field.name.to_snake_case();
    let key = format!(
        "FieldKey {{ holder: schema.{}, id: {} }}",
        schema_var, field.id
    );
    let unmod = pool.type_(pool.unmodified(field.ty)).clone();
    let surface = rust_type(pool, field.ty, decls);

    buf.blank();
    match &unmod {
        Type::Bool => {
            buf.line(&format!(
                "pub fn is_{}(&self, schema: &Schema) -> bool {{",
                snake
            ));
            buf.indent();
            buf.line(&format!(
                "matches!(self.obj.get({}), Some(Value::Bool(true)))",
                key
            ));
            buf.unindent();
            buf.line("}");
            buf.blank();
            buf.line(&format!(
                "pub fn set_{}(&self, schema: &Schema, value: bool) {{",
                snake
            ));
            buf.indent();
            buf.line(&format!("self.obj.set({}, Value::Bool(value));", key));
            buf.unindent();
            buf.line("}");
        }
        Type::Integer { .. } => {
            buf.line(&format!(
                "pub fn get_{}(&self, schema: &Schema) -> {} {{",
                snake, surface
            ));
            buf.indent();
            buf.line(&format!("match self.obj.get({}) {{", key));
            buf.indent();
            buf.line(&format!("Some(Value::Integer(n)) => n as {},", surface));
            buf.line("_ => 0,");
            buf.unindent();
            buf.line("}");
            buf.unindent();
            buf.line("}");
            buf.blank();
            buf.line(&format!(
                "pub fn set_{}(&self, schema: &Schema, value: {}) {{",
                snake, surface
            ));
            buf.indent();
            buf.line(&format!(
                "self.obj.set({}, Value::Integer(i64::from(value)));",
                key
            ));
            buf.unindent();
            buf.line("}");
        }
        Type::Float | Type::Double => {
            let (variant, zero) = if matches!(unmod, Type::Float) {
                ("Float", "0.0f32")
            } else {
                ("Double", "0.0f64")
            };
            buf.line(&format!(
                "pub fn get_{}(&self, schema: &Schema) -> {} {{",
                snake, surface
            ));
            buf.indent();
            buf.line(&format!("match self.obj.get({}) {{", key));
            buf.indent();
            buf.line(&format!("Some(Value::{}(n)) => n,", variant));
            buf.line(&format!("_ => {},", zero));
            buf.unindent();
            buf.line("}");
            buf.unindent();
            buf.line("}");
            buf.blank();
            buf.line(&format!(
                "pub fn set_{}(&self, schema: &Schema, value: {}) {{",
                snake, surface
            ));
            buf.indent();
            buf.line(&format!("self.obj.set({}, Value::{}(value));", key, variant));
            buf.unindent();
            buf.line("}");
        }
        Type::String | Type::Bytes => {
            let (variant, empty) = if matches!(unmod, Type::String) {
                ("String", "String::new()")
            } else {
                ("Bytes", "Vec::new()")
            };
            buf.line(&format!(
                "pub fn get_{}(&self, schema: &Schema) -> {} {{",
                snake, surface
            ));
            buf.indent();
            buf.line(&format!("match self.obj.get({}) {{", key));
            buf.indent();
            buf.line(&format!("Some(Value::{}(v)) => v,", variant));
            buf.line(&format!("_ => {},", empty));
            buf.unindent();
            buf.line("}");
            buf.unindent();
            buf.line("}");
            buf.blank();
            buf.line(&format!(
                "pub fn set_{}(&self, schema: &Schema, value: {}) {{",
                snake, surface
            ));
            buf.indent();
            buf.line(&format!("self.obj.set({}, Value::{}(value));", key, variant));
            buf.unindent();
            buf.line("}");
        }
        Type::Enum(_) => {
            buf.line(&format!(
                "pub fn get_{}(&self, schema: &Schema) -> Option<{}> {{",
                snake, surface
            ));
            buf.indent();
            buf.line(&format!("match self.obj.get({}) {{", key));
            buf.indent();
            if surface == "i32" {
                buf.line("Some(Value::Enum(n)) => Some(n),");
            } else {
                buf.line(&format!(
                    "Some(Value::Enum(n)) => {}::from_value(n),",
                    surface
                ));
            }
            buf.line("_ => None,");
            buf.unindent();
            buf.line("}");
            buf.unindent();
            buf.line("}");
            buf.blank();
            buf.line(&format!(
                "pub fn set_{}(&self, schema: &Schema, value: {}) {{",
                snake, surface
            ));
            buf.indent();
            if surface == "i32" {
                buf.line(&format!("self.obj.set({}, Value::Enum(value));", key));
            } else {
                buf.line(&format!(
                    "self.obj.set({}, Value::Enum(value.value()));",
                    key
                ));
            }
            buf.unindent();
            buf.line("}");
        }
        Type::Struct(_) => {
            buf.line(&format!(
                "pub fn get_{}(&self, schema: &Schema) -> Option<ObjectRef> {{",
                snake
            ));
            buf.indent();
            buf.line(&format!("match self.obj.get({}) {{", key));
            buf.indent();
            buf.line("Some(Value::Struct(child)) => Some(child),");
            buf.line("_ => None,");
            buf.unindent();
            buf.line("}");
            buf.unindent();
            buf.line("}");
            buf.blank();
            buf.line(&format!(
                "pub fn set_{}(&self, schema: &Schema, value: ObjectRef) {{",
                snake
            ));
            buf.indent();
            buf.line(&format!("self.obj.set({}, Value::Struct(value));", key));
            buf.unindent();
            buf.line("}");
        }
        Type::List { .. } | Type::Set { .. } | Type::Map { .. } => {
            buf.line(&format!(
                "pub fn get_{}(&self, schema: &Schema) -> Option<Value> {{",
                snake
            ));
            buf.indent();
            buf.line(&format!("self.obj.get({})", key));
            buf.unindent();
            buf.line("}");
            buf.blank();
            buf.line(&format!(
                "pub fn set_{}(&self, schema: &Schema, value: Value) {{",
                snake
            ));
            buf.indent();
            buf.line(&format!("self.obj.set({}, value);", key));
            buf.unindent();
            buf.line("}");
        }
        Type::Modified { .. } => unreachable!("modifiers stripped above"),
    }

    buf.blank();
    buf.line(&format!(
        "pub fn has_{}(&self, schema: &Schema) -> bool {{",
        snake
    ));
    buf.indent();
    buf.line(&format!("self.obj.has({})", key));
    buf.unindent();
    buf.line("}");
    buf.blank();
    buf.line(&format!(
        "pub fn clear_{}(&self, schema: &Schema) {{",
        snake
    ));
    buf.indent();
    buf.line(&format!("self.obj.clear({});", key));
    buf.unindent();
    buf.line("}");

    if is_mutable_type(pool, field) {
        buf.blank();
        buf.line("/// Mutable view: applies `f` to the field value in place,");
        buf.line("/// inserting the type default first when absent.");
        buf.line(&format!(
            "pub fn update_{}(&self, pool: &DescriptorPool, schema: &Schema, f: impl FnOnce(&mut Value)) {{",
            snake
        ));
        buf.indent();
        buf.line(&format!("self.obj.update(pool, {}, f);", key));
        buf.unindent();
        buf.line("}");
    }
}
