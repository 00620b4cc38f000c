//! Recursive-descent parser for CODA IDL files.

use crate::ast::{
    EnumDef, EnumValueDecl, ExtendDef, FieldDecl, File, ImportDecl, LiteralValue, MethodDecl,
    OptionDecl, ParamDecl, StructDef, TypeAst, TypeIdExpr,
};
use crate::errors::{ErrorReporter, Location};
use crate::lexer::{Lexer, Token, TokenKind};

/// `extensions N to max;` reserves ids up to the id-space limit.
pub const MAX_EXTENSION: u64 = u32::MAX as u64;

pub struct Parser<'r> {
    reporter: &'r mut ErrorReporter,
    tokens: Vec<Token>,
    pos: usize,
    last_line: u32,
}

impl<'r> Parser<'r> {
    pub fn new(reporter: &'r mut ErrorReporter) -> Parser<'r> {
        Parser {
            reporter,
            tokens: Vec::new(),
            pos: 0,
            last_line: 1,
        }
    }

    /// Parses one IDL file. Errors accumulate in the reporter; `None` is
    /// returned only when the error limit aborted the parse.
    pub fn parse(&mut self, source: &str, path: &str) -> Option<File> {
        self.tokens = Lexer::new(source, path, self.reporter).run();
        self.pos = 0;
        self.last_line = self.tokens.last().map(|t| t.location.line).unwrap_or(1);

        let mut file = File {
            path: path.to_owned(),
            package: None,
            imports: Vec::new(),
            options: Vec::new(),
            structs: Vec::new(),
            enums: Vec::new(),
            extensions: Vec::new(),
        };

        while let Some(token) = self.peek().cloned() {
            if self.reporter.should_abort() {
                return None;
            }
            match token.kind {
                TokenKind::Package => {
                    self.next();
                    if let Some(name) = self.parse_dotted_name() {
                        if file.package.is_some() {
                            self.reporter
                                .error_at(&token.location, "Package already declared");
                        } else {
                            file.package = Some(name);
                        }
                        self.expect(&TokenKind::Semi)?;
                    }
                }
                TokenKind::Import => {
                    self.next();
                    let public = self.eat(&TokenKind::Public);
                    match self.next() {
                        Some(Token {
                            kind: TokenKind::Str(import_path),
                            location,
                        }) => {
                            file.imports.push(ImportDecl {
                                public,
                                path: import_path,
                                location,
                            });
                            self.expect(&TokenKind::Semi)?;
                        }
                        Some(other) => {
                            self.unexpected(&other);
                            self.recover();
                        }
                        None => return self.end_of_input(),
                    }
                }
                TokenKind::Options => {
                    self.next();
                    let options = self.parse_options_block()?;
                    file.options.extend(options);
                }
                TokenKind::Struct => {
                    let def = self.parse_struct()?;
                    file.structs.push(def);
                }
                TokenKind::Enum => {
                    let def = self.parse_enum()?;
                    file.enums.push(def);
                }
                TokenKind::Extend => {
                    let def = self.parse_extend()?;
                    file.extensions.push(def);
                }
                _ => {
                    self.next();
                    self.unexpected(&token);
                    self.recover();
                }
            }
        }
        Some(file)
    }

    fn parse_struct(&mut self) -> Option<StructDef> {
        let keyword = self.next().expect("struct keyword");
        let name = self.expect_ident()?;
        let mut def = StructDef {
            name,
            base_type: None,
            type_id: None,
            extension_range: None,
            fields: Vec::new(),
            methods: Vec::new(),
            structs: Vec::new(),
            enums: Vec::new(),
            extensions: Vec::new(),
            options: Vec::new(),
            location: keyword.location,
        };

        // Header: `(base) = id`, `= id`, or nothing.
        if self.eat(&TokenKind::LParen) {
            def.base_type = Some(self.parse_type()?);
            self.expect(&TokenKind::RParen)?;
            self.expect(&TokenKind::Eq)?;
            def.type_id = Some(self.parse_type_id()?);
        } else if self.eat(&TokenKind::Eq) {
            def.type_id = Some(self.parse_type_id()?);
        }

        self.expect(&TokenKind::LBrace)?;
        loop {
            if self.reporter.should_abort() {
                return None;
            }
            let Some(token) = self.peek().cloned() else {
                return self.end_of_input();
            };
            match token.kind {
                TokenKind::RBrace => {
                    self.next();
                    break;
                }
                TokenKind::Options => {
                    self.next();
                    let options = self.parse_options_block()?;
                    def.options.extend(options);
                }
                TokenKind::Extensions => {
                    self.next();
                    let range = self.parse_extension_range()?;
                    if def.extension_range.is_some() {
                        self.reporter
                            .error_at(&token.location, "Extension range already defined");
                    } else {
                        def.extension_range = Some(range);
                    }
                }
                TokenKind::Struct => {
                    let nested = self.parse_struct()?;
                    def.structs.push(nested);
                }
                TokenKind::Enum => {
                    let nested = self.parse_enum()?;
                    def.enums.push(nested);
                }
                TokenKind::Extend => {
                    let nested = self.parse_extend()?;
                    def.extensions.push(nested);
                }
                TokenKind::Ident(_) => {
                    self.parse_member(&mut def)?;
                }
                _ => {
                    self.next();
                    self.unexpected(&token);
                    self.recover();
                }
            }
        }
        Some(def)
    }

    /// A field (`name : type = N [opts];`) or a method
    /// (`name(params) -> type = N [opts];`).
    fn parse_member(&mut self, def: &mut StructDef) -> Option<()> {
        let name_token = self.next().expect("member name");
        let TokenKind::Ident(name) = name_token.kind.clone() else {
            unreachable!("caller matched an identifier");
        };
        if self.eat(&TokenKind::Colon) {
            let field_type = self.parse_type()?;
            self.expect(&TokenKind::Eq)?;
            let index = self.expect_number()?;
            let options = self.parse_bracket_options()?;
            self.expect(&TokenKind::Semi)?;
            def.fields.push(FieldDecl {
                name,
                field_type,
                index,
                options,
                location: name_token.location,
            });
        } else if self.eat(&TokenKind::LParen) {
            let mut params = Vec::new();
            if !self.eat(&TokenKind::RParen) {
                loop {
                    let param_name = self.expect_ident()?;
                    self.expect(&TokenKind::Colon)?;
                    let param_type = self.parse_type()?;
                    params.push(ParamDecl {
                        name: param_name,
                        param_type,
                    });
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RParen)?;
            }
            self.expect(&TokenKind::Arrow)?;
            let return_type = self.parse_type()?;
            self.expect(&TokenKind::Eq)?;
            let index = self.expect_number()?;
            let options = self.parse_bracket_options()?;
            self.expect(&TokenKind::Semi)?;
            def.methods.push(MethodDecl {
                name,
                params,
                return_type,
                index,
                options,
                location: name_token.location,
            });
        } else {
            match self.peek().cloned() {
                Some(other) => {
                    self.unexpected(&other);
                    self.recover();
                }
                None => return self.end_of_input(),
            }
        }
        Some(())
    }

    fn parse_enum(&mut self) -> Option<EnumDef> {
        let keyword = self.next().expect("enum keyword");
        let name = self.expect_ident()?;
        let mut def = EnumDef {
            name,
            values: Vec::new(),
            options: Vec::new(),
            location: keyword.location,
        };
        self.expect(&TokenKind::LBrace)?;
        loop {
            let Some(token) = self.peek().cloned() else {
                return self.end_of_input();
            };
            match token.kind {
                TokenKind::RBrace => {
                    self.next();
                    break;
                }
                TokenKind::Ident(value_name) => {
                    self.next();
                    let value = if self.eat(&TokenKind::Eq) {
                        Some(self.expect_number()?)
                    } else {
                        None
                    };
                    def.values.push(EnumValueDecl {
                        name: value_name,
                        value,
                        location: token.location,
                    });
                    if !self.eat(&TokenKind::Comma) {
                        self.expect(&TokenKind::RBrace)?;
                        break;
                    }
                }
                _ => {
                    self.next();
                    self.unexpected(&token);
                    self.recover();
                }
            }
        }
        Some(def)
    }

    fn parse_extend(&mut self) -> Option<ExtendDef> {
        let keyword = self.next().expect("extend keyword");
        let extends = self.parse_type()?;
        let mut def = ExtendDef {
            extends,
            fields: Vec::new(),
            location: keyword.location,
        };
        self.expect(&TokenKind::LBrace)?;
        loop {
            let Some(token) = self.peek().cloned() else {
                return self.end_of_input();
            };
            match token.kind {
                TokenKind::RBrace => {
                    self.next();
                    break;
                }
                TokenKind::Ident(name) => {
                    self.next();
                    self.expect(&TokenKind::Colon)?;
                    let field_type = self.parse_type()?;
                    self.expect(&TokenKind::Eq)?;
                    let index = self.expect_number()?;
                    let options = self.parse_bracket_options()?;
                    self.expect(&TokenKind::Semi)?;
                    def.fields.push(FieldDecl {
                        name,
                        field_type,
                        index,
                        options,
                        location: token.location,
                    });
                }
                _ => {
                    self.next();
                    self.unexpected(&token);
                    self.recover();
                }
            }
        }
        Some(def)
    }

    fn parse_extension_range(&mut self) -> Option<(u64, u64)> {
        let min = self.expect_number()?;
        self.expect(&TokenKind::To)?;
        let max = match self.peek().cloned() {
            Some(Token {
                kind: TokenKind::Max,
                ..
            }) => {
                self.next();
                MAX_EXTENSION
            }
            _ => self.expect_number()?,
        };
        self.expect(&TokenKind::Semi)?;
        Some((min, max))
    }

    fn parse_type_id(&mut self) -> Option<TypeIdExpr> {
        match self.next() {
            Some(Token {
                kind: TokenKind::Number(value),
                location,
            }) => Some(TypeIdExpr::Number(value, location)),
            Some(Token {
                kind: TokenKind::Ident(first),
                location,
            }) => {
                let mut name = first;
                while self.eat(&TokenKind::Dot) {
                    let segment = self.expect_ident()?;
                    name.push('.');
                    name.push_str(&segment);
                }
                Some(TypeIdExpr::Name(name, location))
            }
            Some(other) => {
                self.unexpected(&other);
                None
            }
            None => self.end_of_input(),
        }
    }

    fn parse_type(&mut self) -> Option<TypeAst> {
        let mut constant = false;
        let mut shared = false;
        let start = self.peek().cloned();
        loop {
            if self.eat(&TokenKind::Const) {
                constant = true;
            } else if self.eat(&TokenKind::Shared) {
                shared = true;
            } else {
                break;
            }
        }

        let Some(Token { location, .. }) = self.peek().cloned() else {
            return self.end_of_input();
        };
        let name = self.parse_dotted_name()?;
        let mut ty = TypeAst::Name {
            name,
            location: location.clone(),
        };
        if self.eat(&TokenKind::LBracket) {
            let mut args = Vec::new();
            loop {
                args.push(self.parse_type()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RBracket)?;
            ty = TypeAst::Specialized {
                base: Box::new(ty),
                args,
                location: location.clone(),
            };
        }
        if constant || shared {
            let location = start.map(|t| t.location).unwrap_or(location);
            ty = TypeAst::Modified {
                base: Box::new(ty),
                constant,
                shared,
                location,
            };
        }
        Some(ty)
    }

    fn parse_dotted_name(&mut self) -> Option<String> {
        let mut name = self.expect_ident()?;
        while self.eat(&TokenKind::Dot) {
            let segment = self.expect_ident()?;
            name.push('.');
            name.push_str(&segment);
        }
        Some(name)
    }

    /// `options { name[:scope] = value; ... }`
    fn parse_options_block(&mut self) -> Option<Vec<OptionDecl>> {
        self.expect(&TokenKind::LBrace)?;
        let mut options = Vec::new();
        loop {
            let Some(token) = self.peek().cloned() else {
                return self.end_of_input();
            };
            match token.kind {
                TokenKind::RBrace => {
                    self.next();
                    break;
                }
                ref kind if matches!(kind, TokenKind::Ident(_)) || kind.keyword_text().is_some() => {
                    let option = self.parse_option()?;
                    options.push(option);
                    self.expect(&TokenKind::Semi)?;
                }
                _ => {
                    self.next();
                    self.unexpected(&token);
                    self.recover();
                }
            }
        }
        Some(options)
    }

    /// `[ name[:scope] = value, ... ]` after a field or method declaration.
    fn parse_bracket_options(&mut self) -> Option<Vec<OptionDecl>> {
        let mut options = Vec::new();
        if self.eat(&TokenKind::LBracket) {
            loop {
                let option = self.parse_option()?;
                options.push(option);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RBracket)?;
        }
        Some(options)
    }

    fn parse_option(&mut self) -> Option<OptionDecl> {
        let Some(Token { location, .. }) = self.peek().cloned() else {
            return self.end_of_input();
        };
        // Option names share the identifier namespace with keywords
        // (`package`, `shared`, `const`).
        let name = match self.peek() {
            Some(token) => match token.kind.keyword_text() {
                Some(text) => {
                    self.next();
                    text.to_owned()
                }
                None => self.expect_ident()?,
            },
            None => return self.end_of_input(),
        };
        let scope = if self.eat(&TokenKind::Colon) {
            Some(self.parse_dotted_name()?)
        } else {
            None
        };
        self.expect(&TokenKind::Eq)?;
        let value = self.parse_literal()?;
        Some(OptionDecl {
            name,
            scope,
            value,
            location,
        })
    }

    fn parse_literal(&mut self) -> Option<LiteralValue> {
        match self.next() {
            Some(Token {
                kind: TokenKind::True,
                location,
            }) => Some(LiteralValue::Bool(true, location)),
            Some(Token {
                kind: TokenKind::False,
                location,
            }) => Some(LiteralValue::Bool(false, location)),
            Some(Token {
                kind: TokenKind::Number(value),
                location,
            }) => Some(LiteralValue::Integer(value, location)),
            Some(Token {
                kind: TokenKind::Str(value),
                location,
            }) => Some(LiteralValue::Str(value, location)),
            Some(Token {
                kind: TokenKind::LBracket,
                location,
            }) => {
                let mut items = Vec::new();
                if !self.eat(&TokenKind::RBracket) {
                    loop {
                        items.push(self.parse_literal()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RBracket)?;
                }
                Some(LiteralValue::List(items, location))
            }
            Some(other) => {
                self.unexpected(&other);
                None
            }
            None => self.end_of_input(),
        }
    }

    // ===== Token plumbing =====

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if let Some(token) = self.peek() {
            if token.kind == *kind {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    fn expect(&mut self, kind: &TokenKind) -> Option<Token> {
        match self.next() {
            Some(token) if token.kind == *kind => Some(token),
            Some(other) => {
                self.unexpected(&other);
                None
            }
            None => self.end_of_input(),
        }
    }

    fn expect_ident(&mut self) -> Option<String> {
        match self.next() {
            Some(Token {
                kind: TokenKind::Ident(name),
                ..
            }) => Some(name),
            Some(other) => {
                self.unexpected(&other);
                None
            }
            None => self.end_of_input(),
        }
    }

    fn expect_number(&mut self) -> Option<u64> {
        match self.next() {
            Some(Token {
                kind: TokenKind::Number(value),
                ..
            }) => Some(value),
            Some(other) => {
                self.unexpected(&other);
                None
            }
            None => self.end_of_input(),
        }
    }

    fn unexpected(&mut self, token: &Token) {
        self.reporter.error_at(
            &token.location,
            format!("Unexpected token: {}", token.kind.name()),
        );
    }

    fn end_of_input<T>(&mut self) -> Option<T> {
        self.reporter
            .error(format!("Unexpected end of input at line {}", self.last_line));
        None
    }

    /// Panic-mode recovery: skip to just past the next `;`, or stop before
    /// the next `}` or end of input.
    fn recover(&mut self) {
        while let Some(token) = self.peek() {
            match token.kind {
                TokenKind::Semi => {
                    self.next();
                    return;
                }
                TokenKind::RBrace => return,
                _ => {
                    self.next();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> (Option<File>, ErrorReporter) {
        let mut reporter = ErrorReporter::new();
        let file = Parser::new(&mut reporter).parse(source, "dummy.coda");
        (file, reporter)
    }

    fn parse_ok(source: &str) -> File {
        let (file, reporter) = parse(source);
        assert_eq!(
            reporter.error_count(),
            0,
            "unexpected errors: {:?}",
            reporter.diagnostics()
        );
        file.expect("parse produced a file")
    }

    #[test]
    fn error_location() {
        let (_, reporter) = parse("\n      23\n");
        let diag = &reporter.diagnostics()[0];
        let loc = diag.location.as_ref().unwrap();
        assert_eq!((loc.line, loc.column), (2, 7));
        assert_eq!(diag.message, "Unexpected token: NUMBER");
    }

    #[test]
    fn error_location_column_one() {
        let (_, reporter) = parse("\n\n23\n");
        let loc = reporter.diagnostics()[0].location.clone().unwrap();
        assert_eq!((loc.line, loc.column), (3, 1));
    }

    #[test]
    fn comment_only() {
        parse_ok("\n# comment");
    }

    #[test]
    fn unexpected_end_of_input() {
        let (_, reporter) = parse("\n# comment\noptions {");
        assert_eq!(
            reporter.diagnostics()[0].message,
            "Unexpected end of input at line 3"
        );
    }

    #[test]
    fn package_declaration() {
        assert_eq!(parse_ok("package foo.bar;").package.as_deref(), Some("foo.bar"));
        assert_eq!(
            parse_ok("package foo . bar ;").package.as_deref(),
            Some("foo.bar")
        );
    }

    #[test]
    fn missing_package_is_fine() {
        let file = parse_ok("\noptions {}");
        assert!(file.package.is_none());
        assert!(file.options.is_empty());
    }

    #[test]
    fn imports() {
        let file = parse_ok("import \"a\";\nimport \"b\";\npackage foo;");
        assert_eq!(file.imports.len(), 2);
        assert_eq!(file.imports[0].path, "a");
    }

    #[test]
    fn global_options() {
        let file = parse_ok(
            "package foo;\n\noptions {\n  mutable = true;\n  package:java = 'strval';\n  package:cpp.stl = true;\n}\n",
        );
        assert_eq!(file.options.len(), 3);

        assert!(file.options[0].scope.is_none());
        assert_eq!(file.options[0].name, "mutable");
        assert!(matches!(file.options[0].value, LiteralValue::Bool(true, _)));

        assert_eq!(file.options[1].scope.as_deref(), Some("java"));
        assert_eq!(file.options[1].name, "package");
        assert!(matches!(&file.options[1].value, LiteralValue::Str(s, _) if s == "strval"));

        assert_eq!(file.options[2].scope.as_deref(), Some("cpp.stl"));
        assert_eq!(file.options[2].name, "package");
    }

    #[test]
    fn struct_with_field() {
        let file = parse_ok("package foo;\n\nstruct Test {\n  data : i32 = 1;\n}\n");
        assert_eq!(file.structs.len(), 1);
        let def = &file.structs[0];
        assert_eq!(def.name, "Test");
        assert_eq!(def.fields.len(), 1);
        assert_eq!(def.fields[0].name, "data");
        assert_eq!(def.fields[0].index, 1);
        assert!(matches!(&def.fields[0].field_type, TypeAst::Name { name, .. } if name == "i32"));
    }

    #[test]
    fn struct_header_forms() {
        let file = parse_ok(
            "struct A = 1 {}\nstruct B (A) = 2 {}\nstruct C (A) = E.VALUE {}\nstruct D {}\n",
        );
        assert!(matches!(file.structs[0].type_id, Some(TypeIdExpr::Number(1, _))));
        assert!(file.structs[1].base_type.is_some());
        assert!(matches!(
            &file.structs[2].type_id,
            Some(TypeIdExpr::Name(name, _)) if name == "E.VALUE"
        ));
        assert!(file.structs[3].type_id.is_none());
    }

    #[test]
    fn extension_range() {
        let file = parse_ok(
            "package foo;\n\nstruct Test {\n  extensions 100 to 1000;\n}\n\nstruct Test2 {\n  extensions 100 to max;\n}\n",
        );
        assert_eq!(file.structs[0].extension_range, Some((100, 1000)));
        assert_eq!(file.structs[1].extension_range, Some((100, MAX_EXTENSION)));
    }

    #[test]
    fn duplicate_extension_range() {
        let (_, reporter) = parse(
            "package foo;\n\nstruct Test {\n  extensions 100 to 1000;\n  extensions 100 to 1001;\n}\n",
        );
        let diag = &reporter.diagnostics()[0];
        assert_eq!(diag.message, "Extension range already defined");
        let loc = diag.location.as_ref().unwrap();
        assert_eq!((loc.line, loc.column), (5, 3));
    }

    #[test]
    fn enum_members() {
        let file = parse_ok("package foo;\n\nenum Test {\n  ONE = 1,\n  TWO\n}\n");
        let def = &file.enums[0];
        assert_eq!(def.values.len(), 2);
        assert_eq!(def.values[0].name, "ONE");
        assert_eq!(def.values[0].value, Some(1));
        assert_eq!(def.values[1].name, "TWO");
        assert_eq!(def.values[1].value, None);
    }

    #[test]
    fn extend_block() {
        let file = parse_ok("package foo;\n\nextend Test {\n  data : i32 = 1;\n}\n");
        assert!(file.structs.is_empty());
        assert_eq!(file.extensions.len(), 1);
        let ext = &file.extensions[0];
        assert!(matches!(&ext.extends, TypeAst::Name { name, .. } if name == "Test"));
        assert_eq!(ext.fields.len(), 1);
        assert_eq!(ext.fields[0].name, "data");
    }

    #[test]
    fn generic_and_modified_types() {
        let file = parse_ok(
            "struct T {\n  a : list[i32] = 1;\n  b : map[string, set[i64]] = 2;\n  c : shared Node = 3;\n  d : const shared Node = 4;\n}\n",
        );
        let fields = &file.structs[0].fields;
        assert_eq!(fields[0].field_type.display(), "list[i32]");
        assert_eq!(fields[1].field_type.display(), "map[string, set[i64]]");
        assert_eq!(fields[2].field_type.display(), "shared Node");
        assert_eq!(fields[3].field_type.display(), "const shared Node");
    }

    #[test]
    fn methods() {
        let file = parse_ok(
            "struct T {\n  size() -> i32 = 3;\n  find(key: string, offset: i32) -> bool = 4 [const = true];\n}\n",
        );
        let methods = &file.structs[0].methods;
        assert_eq!(methods.len(), 2);
        assert_eq!(methods[0].name, "size");
        assert!(methods[0].params.is_empty());
        assert_eq!(methods[1].params.len(), 2);
        assert_eq!(methods[1].options.len(), 1);
    }

    #[test]
    fn field_bracket_options() {
        let file = parse_ok("struct T {\n  a : i16 = 1 [fixed = true, nullable = false];\n}\n");
        assert_eq!(file.structs[0].fields[0].options.len(), 2);
    }
}
