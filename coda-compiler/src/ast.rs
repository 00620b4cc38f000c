//! Abstract syntax tree for CODA IDL files.

use crate::errors::Location;

#[derive(Debug)]
pub struct File {
    pub path: String,
    pub package: Option<String>,
    pub imports: Vec<ImportDecl>,
    pub options: Vec<OptionDecl>,
    pub structs: Vec<StructDef>,
    pub enums: Vec<EnumDef>,
    pub extensions: Vec<ExtendDef>,
}

#[derive(Debug)]
pub struct ImportDecl {
    pub public: bool,
    pub path: String,
    pub location: Location,
}

#[derive(Debug)]
pub struct StructDef {
    pub name: String,
    pub base_type: Option<TypeAst>,
    pub type_id: Option<TypeIdExpr>,
    /// `(min, max)`; absent when no `extensions` clause was declared.
    pub extension_range: Option<(u64, u64)>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<MethodDecl>,
    pub structs: Vec<StructDef>,
    pub enums: Vec<EnumDef>,
    pub extensions: Vec<ExtendDef>,
    pub options: Vec<OptionDecl>,
    pub location: Location,
}

/// The subtype id in a struct header: a literal integer, or a dotted
/// reference to an enumeration value.
#[derive(Debug)]
pub enum TypeIdExpr {
    Number(u64, Location),
    Name(String, Location),
}

impl TypeIdExpr {
    pub fn location(&self) -> &Location {
        match self {
            TypeIdExpr::Number(_, loc) | TypeIdExpr::Name(_, loc) => loc,
        }
    }
}

#[derive(Debug)]
pub struct FieldDecl {
    pub name: String,
    pub field_type: TypeAst,
    pub index: u64,
    pub options: Vec<OptionDecl>,
    pub location: Location,
}

#[derive(Debug)]
pub struct MethodDecl {
    pub name: String,
    pub params: Vec<ParamDecl>,
    pub return_type: TypeAst,
    pub index: u64,
    pub options: Vec<OptionDecl>,
    pub location: Location,
}

#[derive(Debug)]
pub struct ParamDecl {
    pub name: String,
    pub param_type: TypeAst,
}

#[derive(Debug)]
pub struct EnumDef {
    pub name: String,
    pub values: Vec<EnumValueDecl>,
    pub options: Vec<OptionDecl>,
    pub location: Location,
}

#[derive(Debug)]
pub struct EnumValueDecl {
    pub name: String,
    /// Explicit `= N`; values without one continue from the previous value.
    pub value: Option<u64>,
    pub location: Location,
}

/// An `extend Name { ... }` block declaring extension fields.
#[derive(Debug)]
pub struct ExtendDef {
    pub extends: TypeAst,
    pub fields: Vec<FieldDecl>,
    pub location: Location,
}

#[derive(Debug)]
pub enum TypeAst {
    /// A possibly-dotted type name.
    Name { name: String, location: Location },
    /// A generic instantiation `name[args]`.
    Specialized {
        base: Box<TypeAst>,
        args: Vec<TypeAst>,
        location: Location,
    },
    /// `const` / `shared` modifiers applied to a base type.
    Modified {
        base: Box<TypeAst>,
        constant: bool,
        shared: bool,
        location: Location,
    },
}

impl TypeAst {
    pub fn location(&self) -> &Location {
        match self {
            TypeAst::Name { location, .. }
            | TypeAst::Specialized { location, .. }
            | TypeAst::Modified { location, .. } => location,
        }
    }

    /// The source rendering of the type, for diagnostics.
    pub fn display(&self) -> String {
        match self {
            TypeAst::Name { name, .. } => name.clone(),
            TypeAst::Specialized { base, args, .. } => {
                let args: Vec<String> = args.iter().map(TypeAst::display).collect();
                format!("{}[{}]", base.display(), args.join(", "))
            }
            TypeAst::Modified {
                base,
                constant,
                shared,
                ..
            } => {
                let mut out = String::new();
                if *constant {
                    out.push_str("const ");
                }
                if *shared {
                    out.push_str("shared ");
                }
                out.push_str(&base.display());
                out
            }
        }
    }
}

/// `name = value` or `name:scope = value`.
#[derive(Debug)]
pub struct OptionDecl {
    pub name: String,
    pub scope: Option<String>,
    pub value: LiteralValue,
    pub location: Location,
}

#[derive(Debug)]
pub enum LiteralValue {
    Bool(bool, Location),
    Integer(u64, Location),
    Str(String, Location),
    List(Vec<LiteralValue>, Location),
}

impl LiteralValue {
    pub fn location(&self) -> &Location {
        match self {
            LiteralValue::Bool(_, loc)
            | LiteralValue::Integer(_, loc)
            | LiteralValue::Str(_, loc)
            | LiteralValue::List(_, loc) => loc,
        }
    }
}
