//! The human-readable text codec.
//!
//! Fields render as `name: value`, structs and maps as `{ ... }`, lists and
//! sets as `[ ... ]`. A subtype level is introduced by `$N (TypeName): { ... }`
//! nested inside the enclosing struct. `#N` after an opening brace tags a
//! shared-object definition and `%N` cites one; since `#` also begins a
//! comment, the decoder ignores the tags and re-derives shared ids from
//! arrival order, which matches the encoder's allocation order. `<[ ... ]>`
//! holds a hex-encoded byte string and `null` marks an explicitly absent
//! struct value.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;

use crate::descriptor::{DescriptorPool, FieldKey, StructId};
use crate::object::{ObjectRef, Value};
use crate::registry::TypeRegistry;
use crate::types::{Type, TypeRef};
use crate::{DecodeError, EncodeError};

/// Maximum nesting depth for either direction of the codec.
pub const MAX_DEPTH: usize = 255;

/// Encodes a single struct value as text.
pub fn encode_to_string(pool: &DescriptorPool, obj: &ObjectRef) -> Result<String, EncodeError> {
    let mut out = Vec::new();
    TextEncoder::new(pool, &mut out).encode(obj)?;
    String::from_utf8(out).map_err(|_| EncodeError::new("encoder produced invalid UTF-8"))
}

/// Decodes a single struct value from text.
pub fn decode_str(
    pool: &DescriptorPool,
    registry: &TypeRegistry,
    text: &str,
    expected: StructId,
) -> Result<ObjectRef, DecodeError> {
    TextDecoder::new(pool, registry, text)?.decode(expected)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Clear,
    Struct,
    Container,
    MapKey,
    MapValue,
    Subtype,
}

pub struct TextEncoder<'a, W> {
    pool: &'a DescriptorPool,
    stream: W,
    indent: usize,
    first: bool,
    state: State,
    field_header: bool,
    states: Vec<State>,
    in_progress: HashSet<usize>,
    shared: HashMap<usize, u32>,
    next_shared_id: u32,
    /// A subtype header not yet written; flushed before the level's first
    /// field, or at block close so the dynamic type always survives.
    pending_subtype: Option<(String, u32)>,
}

impl<'a, W: Write> TextEncoder<'a, W> {
    pub fn new(pool: &'a DescriptorPool, stream: W) -> TextEncoder<'a, W> {
        TextEncoder {
            pool,
            stream,
            indent: 0,
            first: true,
            state: State::Clear,
            field_header: false,
            states: Vec::new(),
            in_progress: HashSet::new(),
            shared: HashMap::new(),
            next_shared_id: 1,
            pending_subtype: None,
        }
    }

    /// Encodes a top-level struct value: its fields without an enclosing
    /// brace pair.
    pub fn encode(&mut self, obj: &ObjectRef) -> Result<(), EncodeError> {
        self.in_progress.insert(obj.addr());
        self.write_fields(obj)?;
        self.in_progress.remove(&obj.addr());
        if self.pending_subtype.is_some() {
            self.begin_subtype()?;
        }
        if self.state == State::Subtype {
            self.out("}")?;
            self.indent -= 2;
        }
        self.state = State::Clear;
        Ok(())
    }

    fn write_fields(&mut self, obj: &ObjectRef) -> Result<(), EncodeError> {
        for (index, &level) in self
            .pool
            .inheritance_chain(obj.descriptor())
            .iter()
            .enumerate()
        {
            if index > 0 {
                let desc = self.pool.struct_(level);
                let type_id = desc.type_id.ok_or_else(|| {
                    EncodeError::new(format!(
                        "struct {} has a base type but no type id",
                        self.pool.struct_full_name(level)
                    ))
                })?;
                self.write_subtype_header(desc.name.clone(), type_id)?;
            }
            let keys: Vec<FieldKey> = obj
                .present_fields()
                .into_iter()
                .filter(|key| key.holder == level)
                .collect();
            for key in keys {
                let Some(field) = self.pool.field(key) else {
                    continue;
                };
                if field.options().transient || field.options().deprecated {
                    continue;
                }
                if !obj.is_present(self.pool, key) {
                    continue;
                }
                let value = obj.get(key).expect("present field has a value");
                let name = field.name().to_owned();
                let ty = field.ty();
                self.write_field_header(&name)?;
                self.write_value(ty, &value)?;
            }
        }
        Ok(())
    }

    fn write_subtype_header(&mut self, name: String, type_id: u32) -> Result<(), EncodeError> {
        self.pending_subtype = Some((name, type_id));
        // The outermost header is written immediately; enclosed headers stay
        // pending so that fieldless levels do not open empty blocks
        // mid-chain.
        if matches!(self.state, State::Struct | State::Clear) {
            self.begin_subtype()?;
        }
        self.state = State::Subtype;
        Ok(())
    }

    fn write_field_header(&mut self, name: &str) -> Result<(), EncodeError> {
        debug_assert!(!self.field_header);
        if self.pending_subtype.is_some() {
            self.begin_subtype()?;
        }
        if !self.first || self.state != State::Clear {
            self.newline_indent()?;
        }
        self.out(name)?;
        self.out(": ")?;
        self.field_header = true;
        if self.state == State::Clear {
            self.state = State::Struct;
        }
        Ok(())
    }

    fn write_value(&mut self, declared: TypeRef, value: &Value) -> Result<(), EncodeError> {
        let (unmod, shared) = resolve(self.pool, declared);
        match (*self.pool.type_(unmod), value) {
            (Type::Bool, Value::Bool(b)) => {
                self.begin_value()?;
                self.out(if *b { "true" } else { "false" })
            }
            (Type::Integer { .. }, Value::Integer(n)) => {
                self.begin_value()?;
                self.out(&n.to_string())
            }
            (Type::Enum(_), Value::Enum(n)) => {
                self.begin_value()?;
                self.out(&n.to_string())
            }
            (Type::Float, Value::Float(n)) => {
                self.begin_value()?;
                self.out(&format!("{:?}", n))
            }
            (Type::Double, Value::Double(n)) => {
                self.begin_value()?;
                self.out(&format!("{:?}", n))
            }
            (Type::String, Value::String(s)) => {
                self.begin_value()?;
                self.out(&quote_string(s))
            }
            (Type::Bytes, Value::Bytes(b)) => {
                self.begin_value()?;
                self.out("<[")?;
                for byte in b {
                    self.out(&format!("{:02x}", byte))?;
                }
                self.out("]>")
            }
            (Type::List { element }, Value::List(items)) => {
                self.write_sequence(element, items.iter())
            }
            (Type::Set { element }, Value::Set(items)) => {
                self.write_sequence(element, items.iter())
            }
            (Type::Map { key, value: val }, Value::Map(entries)) => {
                self.write_map(key, val, entries)
            }
            (Type::Struct(_), Value::Struct(child)) => self.write_struct(child, shared),
            (ty, value) => Err(EncodeError::new(format!(
                "value {:?} does not match declared type {:?}",
                value, ty
            ))),
        }
    }

    fn write_sequence<'v>(
        &mut self,
        element: TypeRef,
        items: impl Iterator<Item = &'v Value>,
    ) -> Result<(), EncodeError> {
        self.push_state()?;
        self.begin_value()?;
        self.out("[")?;
        self.indent += 2;
        self.state = State::Container;
        self.first = true;
        for item in items {
            self.write_value(element, item)?;
        }
        self.indent -= 2;
        if !self.first {
            self.newline_indent()?;
        }
        self.out("]")?;
        self.state = self.states.pop().expect("state stack is balanced");
        self.first = false;
        Ok(())
    }

    fn write_map(
        &mut self,
        key_ty: TypeRef,
        val_ty: TypeRef,
        entries: &BTreeMap<Value, Value>,
    ) -> Result<(), EncodeError> {
        self.push_state()?;
        self.begin_value()?;
        self.out("{")?;
        self.indent += 2;
        self.state = State::MapKey;
        self.first = true;
        for (key, value) in entries {
            self.write_value(key_ty, key)?;
            self.write_value(val_ty, value)?;
        }
        self.indent -= 2;
        if !self.first {
            self.newline_indent()?;
        }
        self.out("}")?;
        self.state = self.states.pop().expect("state stack is balanced");
        self.first = false;
        Ok(())
    }

    fn write_struct(&mut self, value: &ObjectRef, shared: bool) -> Result<(), EncodeError> {
        if shared {
            if let Some(&index) = self.shared.get(&value.addr()) {
                self.begin_value()?;
                return self.out(&format!("%{}", index));
            }
        }
        if !self.in_progress.insert(value.addr()) {
            return Err(EncodeError::new(format!(
                "cycle through non-shared reference while serializing {}",
                self.pool.struct_full_name(value.descriptor())
            )));
        }
        let index = if shared {
            let index = self.next_shared_id;
            self.next_shared_id += 1;
            self.shared.insert(value.addr(), index);
            Some(index)
        } else {
            None
        };

        self.begin_value()?;
        self.push_state()?;
        self.out("{")?;
        self.indent += 2;
        self.state = State::Struct;
        self.first = true;
        if let Some(index) = index {
            // The tag reads as a comment to the decoder, so the closing brace
            // (or the first field) must start a fresh line.
            self.out(&format!(" #{}", index))?;
            self.first = false;
        }
        self.write_fields(value)?;
        self.end_struct()?;
        self.in_progress.remove(&value.addr());
        Ok(())
    }

    fn end_struct(&mut self) -> Result<(), EncodeError> {
        if self.pending_subtype.is_some() {
            self.begin_subtype()?;
        }
        debug_assert!(matches!(self.state, State::Struct | State::Subtype));
        self.indent -= 2;
        if !self.first {
            self.newline_indent()?;
        }
        if self.state == State::Subtype {
            self.out("}")?;
            self.indent -= 2;
        }
        self.out("}")?;
        self.state = self.states.pop().expect("state stack is balanced");
        self.first = false;
        Ok(())
    }

    fn begin_subtype(&mut self) -> Result<(), EncodeError> {
        let (name, type_id) = self
            .pending_subtype
            .take()
            .expect("a subtype header is pending");
        if self.state == State::Subtype {
            self.out("}")?;
            self.indent -= 2;
        }
        self.begin_value()?;
        self.out(&format!("${} ({}): {{", type_id, name))?;
        self.indent += 2;
        self.first = true;
        self.state = State::Subtype;
        Ok(())
    }

    fn begin_value(&mut self) -> Result<(), EncodeError> {
        if self.field_header {
            self.field_header = false;
        } else if self.state != State::Clear {
            if self.first {
                self.newline_indent()?;
            } else if self.state == State::MapKey {
                self.out(": ")?;
                self.state = State::MapValue;
            } else if self.state == State::MapValue {
                self.newline_indent()?;
                self.state = State::MapKey;
            } else {
                self.newline_indent()?;
            }
        }
        self.first = false;
        Ok(())
    }

    fn push_state(&mut self) -> Result<(), EncodeError> {
        if self.states.len() > MAX_DEPTH {
            return Err(EncodeError::new("maximum recursion depth exceeded"));
        }
        self.states.push(self.state);
        Ok(())
    }

    fn newline_indent(&mut self) -> Result<(), EncodeError> {
        self.out("\n")?;
        let spaces = " ".repeat(self.indent);
        self.out(&spaces)
    }

    fn out(&mut self, s: &str) -> Result<(), EncodeError> {
        self.stream
            .write_all(s.as_bytes())
            .map_err(|e| EncodeError::new(format!("write error: {}", e)))
    }
}

fn resolve(pool: &DescriptorPool, declared: TypeRef) -> (TypeRef, bool) {
    let mut shared = false;
    let mut tr = declared;
    while let Type::Modified {
        element,
        shared: s,
        ..
    } = pool.type_(tr)
    {
        shared |= *s;
        tr = *element;
    }
    (tr, shared)
}

fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\'' => out.push_str("\\'"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

// ===== Decoding =====

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Colon,
    Comma,
    Dot,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Id(String),
    True,
    False,
    Null,
    /// `%N` — citation of a shared object.
    ObjRef(u32),
    /// `$N` — subtype block introducer.
    TypeRef(u32),
}

struct Lexer<'s> {
    chars: std::iter::Peekable<std::str::Chars<'s>>,
    line: u32,
}

impl<'s> Lexer<'s> {
    fn new(text: &'s str) -> Lexer<'s> {
        Lexer {
            chars: text.chars().peekable(),
            line: 1,
        }
    }

    fn run(mut self) -> Result<Vec<(Tok, u32)>, DecodeError> {
        let mut tokens = Vec::new();
        while let Some(&c) = self.chars.peek() {
            match c {
                '\n' => {
                    self.line += 1;
                    self.chars.next();
                }
                ' ' | '\t' | '\r' => {
                    self.chars.next();
                }
                '#' => {
                    // Comment (and shared-definition tag) to end of line.
                    while let Some(&c) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                ':' => self.punct(Tok::Colon, &mut tokens),
                ',' => self.punct(Tok::Comma, &mut tokens),
                '.' => self.punct(Tok::Dot, &mut tokens),
                '[' => self.punct(Tok::LBracket, &mut tokens),
                ']' => self.punct(Tok::RBracket, &mut tokens),
                '{' => self.punct(Tok::LBrace, &mut tokens),
                '}' => self.punct(Tok::RBrace, &mut tokens),
                '(' => self.punct(Tok::LParen, &mut tokens),
                ')' => self.punct(Tok::RParen, &mut tokens),
                '%' | '$' => {
                    self.chars.next();
                    let n = self.number_u32(c)?;
                    let tok = if c == '%' { Tok::ObjRef(n) } else { Tok::TypeRef(n) };
                    tokens.push((tok, self.line));
                }
                '\'' | '"' => {
                    let s = self.string(c)?;
                    tokens.push((Tok::Str(s), self.line));
                }
                '<' => {
                    let b = self.binary()?;
                    tokens.push((Tok::Bytes(b), self.line));
                }
                c if c.is_ascii_digit() || c == '-' => {
                    let tok = self.number()?;
                    tokens.push((tok, self.line));
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let mut id = String::new();
                    while let Some(&c) = self.chars.peek() {
                        if c.is_ascii_alphanumeric() || c == '_' {
                            id.push(c);
                            self.chars.next();
                        } else {
                            break;
                        }
                    }
                    let tok = match id.as_str() {
                        "true" => Tok::True,
                        "false" => Tok::False,
                        "null" => Tok::Null,
                        _ => Tok::Id(id),
                    };
                    tokens.push((tok, self.line));
                }
                c => {
                    return Err(DecodeError::new(format!("illegal character {:?}", c))
                        .at_line(self.line))
                }
            }
        }
        Ok(tokens)
    }

    fn punct(&mut self, tok: Tok, tokens: &mut Vec<(Tok, u32)>) {
        self.chars.next();
        tokens.push((tok, self.line));
    }

    fn number_u32(&mut self, introducer: char) -> Result<u32, DecodeError> {
        let mut digits = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() {
                digits.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        digits
            .parse()
            .map_err(|_| {
                DecodeError::new(format!("malformed reference after '{}'", introducer))
                    .at_line(self.line)
            })
    }

    fn number(&mut self) -> Result<Tok, DecodeError> {
        let mut text = String::new();
        if self.chars.peek() == Some(&'-') {
            text.push('-');
            self.chars.next();
        }
        let mut is_float = false;
        while let Some(&c) = self.chars.peek() {
            match c {
                c if c.is_ascii_digit() => {
                    text.push(c);
                    self.chars.next();
                }
                '.' | 'e' | 'E' => {
                    is_float = true;
                    text.push(c);
                    self.chars.next();
                    if (c == 'e' || c == 'E') && matches!(self.chars.peek(), Some('+') | Some('-'))
                    {
                        text.push(self.chars.next().expect("peeked"));
                    }
                }
                _ => break,
            }
        }
        if is_float {
            text.parse()
                .map(Tok::Float)
                .map_err(|_| DecodeError::new(format!("malformed number '{}'", text)).at_line(self.line))
        } else {
            text.parse()
                .map(Tok::Int)
                .map_err(|_| DecodeError::new(format!("malformed number '{}'", text)).at_line(self.line))
        }
    }

    fn string(&mut self, quote: char) -> Result<String, DecodeError> {
        self.chars.next();
        let mut out = String::new();
        loop {
            match self.chars.next() {
                None => {
                    return Err(DecodeError::new("unterminated string").at_line(self.line));
                }
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.chars.next() {
                    Some('\\') => out.push('\\'),
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some('t') => out.push('\t'),
                    Some('\'') => out.push('\''),
                    Some('"') => out.push('"'),
                    other => {
                        return Err(DecodeError::new(format!(
                            "invalid escape sequence {:?}",
                            other
                        ))
                        .at_line(self.line))
                    }
                },
                Some('\n') => {
                    self.line += 1;
                    out.push('\n');
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn binary(&mut self) -> Result<Vec<u8>, DecodeError> {
        self.chars.next();
        if self.chars.next() != Some('[') {
            return Err(DecodeError::new("expected '<['").at_line(self.line));
        }
        let mut digits = String::new();
        loop {
            match self.chars.next() {
                None => return Err(DecodeError::new("unterminated byte string").at_line(self.line)),
                Some(']') => {
                    if self.chars.next() != Some('>') {
                        return Err(DecodeError::new("expected ']>'").at_line(self.line));
                    }
                    break;
                }
                Some(c) if c.is_ascii_hexdigit() => digits.push(c),
                Some(c) if c.is_whitespace() => {
                    if c == '\n' {
                        self.line += 1;
                    }
                }
                Some(c) => {
                    return Err(DecodeError::new(format!(
                        "invalid character {:?} in byte string",
                        c
                    ))
                    .at_line(self.line))
                }
            }
        }
        if digits.len() % 2 != 0 {
            return Err(DecodeError::new("odd number of hex digits in byte string")
                .at_line(self.line));
        }
        Ok((0..digits.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).expect("hex digits"))
            .collect())
    }
}

pub struct TextDecoder<'a> {
    pool: &'a DescriptorPool,
    registry: &'a TypeRegistry,
    tokens: Vec<(Tok, u32)>,
    pos: usize,
    shared: Vec<ObjectRef>,
    depth: usize,
}

impl<'a> TextDecoder<'a> {
    pub fn new(
        pool: &'a DescriptorPool,
        registry: &'a TypeRegistry,
        text: &str,
    ) -> Result<TextDecoder<'a>, DecodeError> {
        Ok(TextDecoder {
            pool,
            registry,
            tokens: Lexer::new(text).run()?,
            pos: 0,
            shared: Vec::new(),
            depth: 0,
        })
    }

    /// Decodes one top-level struct value. `expected` may be any level of an
    /// inheritance chain; the decoded dynamic type must be assignable to it.
    pub fn decode(&mut self, expected: StructId) -> Result<ObjectRef, DecodeError> {
        let root = self.pool.root_struct(expected);
        let obj = ObjectRef::new(root);
        self.read_level_fields(&obj, root, root)?;
        if let Some((tok, line)) = self.peek() {
            return Err(DecodeError::new(format!("unexpected token {:?}", tok)).at_line(line));
        }
        if !self.pool.is_subtype(obj.descriptor(), expected) {
            return Err(self.fatal(format!(
                "decoded value of type {} where {} was expected",
                self.pool.struct_full_name(obj.descriptor()),
                self.pool.struct_full_name(expected)
            )));
        }
        Ok(obj)
    }

    /// Reads `name: value` fields of one inheritance level, recursing into
    /// `$N (Type): { ... }` blocks for deeper levels. Stops before a closing
    /// brace or at end of input.
    fn read_level_fields(
        &mut self,
        obj: &ObjectRef,
        root: StructId,
        level: StructId,
    ) -> Result<(), DecodeError> {
        self.enter()?;
        loop {
            match self.peek() {
                None | Some((Tok::RBrace, _)) => break,
                Some((Tok::Id(_), _)) => {
                    let (name, line) = match self.next() {
                        Some((Tok::Id(name), line)) => (name, line),
                        _ => unreachable!("peeked an identifier"),
                    };
                    if !self.eat(&Tok::Colon) {
                        return Err(self.fatal("missing colon after field name"));
                    }
                    let field = self.lookup_field(level, &name).ok_or_else(|| {
                        DecodeError::new(format!(
                            "unknown field '{}' of type {}",
                            name,
                            self.pool.struct_full_name(level)
                        ))
                        .at_line(line)
                    })?;
                    let (key, ty, nullable) = field;
                    match self.read_value(ty)? {
                        Some(value) => obj.set(key, value),
                        None => {
                            if !nullable {
                                return Err(DecodeError::new(format!(
                                    "null value not allowed for field '{}'",
                                    name
                                ))
                                .at_line(line));
                            }
                        }
                    }
                }
                Some((Tok::TypeRef(type_id), line)) => {
                    self.next();
                    if !self.eat(&Tok::LParen) {
                        return Err(self.fatal("'(' expected"));
                    }
                    // The type name inside the parens is informational; the
                    // id is authoritative.
                    self.read_dotted_name()?;
                    if !self.eat(&Tok::RParen) {
                        return Err(self.fatal("')' expected"));
                    }
                    if !self.eat(&Tok::Colon) {
                        return Err(self.fatal("missing colon after subtype name"));
                    }
                    if !self.eat(&Tok::LBrace) {
                        return Err(self.fatal("'{' expected"));
                    }
                    let subtype = self.registry.get_subtype(root, type_id).ok_or_else(|| {
                        DecodeError::new(format!(
                            "no subtype id {} found for base type {}",
                            type_id,
                            self.pool.struct_full_name(root)
                        ))
                        .at_line(line)
                    })?;
                    if !self.pool.is_subtype(subtype, level) {
                        return Err(DecodeError::new(format!(
                            "subtype {} does not extend {}",
                            self.pool.struct_full_name(subtype),
                            self.pool.struct_full_name(level)
                        ))
                        .at_line(line));
                    }
                    obj.set_descriptor(subtype);
                    self.read_level_fields(obj, root, subtype)?;
                    if !self.eat(&Tok::RBrace) {
                        return Err(self.fatal("'}' expected after subtype"));
                    }
                }
                Some((tok, line)) => {
                    return Err(
                        DecodeError::new(format!("unexpected token {:?}", tok)).at_line(line)
                    );
                }
            }
        }
        self.leave();
        Ok(())
    }

    /// Reads a value of the declared type. `None` is an explicit `null`.
    fn read_value(&mut self, declared: TypeRef) -> Result<Option<Value>, DecodeError> {
        let (unmod, shared) = resolve(self.pool, declared);
        let kind = *self.pool.type_(unmod);
        let (tok, line) = self
            .peek()
            .ok_or_else(|| self.fatal("premature end of stream"))?;
        let value = match (kind, tok) {
            (Type::Struct(sid), Tok::LBrace) => {
                self.next();
                Value::Struct(self.read_struct_fields(sid, shared)?)
            }
            (Type::Struct(_), Tok::ObjRef(index)) => {
                self.next();
                let obj = (index as usize)
                    .checked_sub(1)
                    .and_then(|ix| self.shared.get(ix))
                    .cloned();
                match obj {
                    Some(obj) => Value::Struct(obj),
                    None => {
                        return Err(DecodeError::new(format!(
                            "invalid shared object id {}",
                            index
                        ))
                        .at_line(line))
                    }
                }
            }
            (Type::Struct(_), Tok::Null) => {
                self.next();
                return Ok(None);
            }
            (Type::Map { key, value }, Tok::LBrace) => {
                self.next();
                self.read_map_entries(key, value)?
            }
            (Type::List { element }, Tok::LBracket) => {
                self.next();
                Value::List(self.read_list_elements(element)?)
            }
            (Type::Set { element }, Tok::LBracket) => {
                self.next();
                Value::Set(self.read_list_elements(element)?.into_iter().collect())
            }
            (Type::Bool, Tok::True) => {
                self.next();
                Value::Bool(true)
            }
            (Type::Bool, Tok::False) => {
                self.next();
                Value::Bool(false)
            }
            (Type::Integer { .. }, Tok::Int(n)) => {
                self.next();
                Value::Integer(n)
            }
            (Type::Enum(_), Tok::Int(n)) => {
                self.next();
                Value::Enum(i32::try_from(n).map_err(|_| {
                    DecodeError::new(format!("enum value {} out of range", n)).at_line(line)
                })?)
            }
            (Type::Float, Tok::Int(n)) => {
                self.next();
                Value::Float(n as f32)
            }
            (Type::Float, Tok::Float(x)) => {
                self.next();
                Value::Float(x as f32)
            }
            (Type::Double, Tok::Int(n)) => {
                self.next();
                Value::Double(n as f64)
            }
            (Type::Double, Tok::Float(x)) => {
                self.next();
                Value::Double(x)
            }
            (Type::String, Tok::Str(s)) => {
                self.next();
                Value::String(s)
            }
            (Type::Bytes, Tok::Bytes(b)) => {
                self.next();
                Value::Bytes(b)
            }
            (_, tok) => {
                return Err(DecodeError::new(format!(
                    "type error: expecting a value of type {}, got {:?}",
                    self.pool.type_name(unmod),
                    tok
                ))
                .at_line(line))
            }
        };
        Ok(Some(value))
    }

    /// Reads `field: value ...` entries up to the closing brace of a struct
    /// value whose opening brace has been consumed.
    fn read_struct_fields(
        &mut self,
        declared: StructId,
        shared: bool,
    ) -> Result<ObjectRef, DecodeError> {
        let root = self.pool.root_struct(declared);
        let obj = ObjectRef::new(root);
        if shared {
            // Registered before the body parses so interior citations of
            // this instance resolve.
            self.shared.push(obj.clone());
        }
        self.read_level_fields(&obj, root, root)?;
        if !self.eat(&Tok::RBrace) {
            return Err(self.fatal("'}' expected after struct"));
        }
        if !self.pool.is_subtype(obj.descriptor(), declared) {
            return Err(self.fatal(format!(
                "decoded value of type {} where {} was expected",
                self.pool.struct_full_name(obj.descriptor()),
                self.pool.struct_full_name(declared)
            )));
        }
        Ok(obj)
    }

    fn read_map_entries(&mut self, key_ty: TypeRef, val_ty: TypeRef) -> Result<Value, DecodeError> {
        self.enter()?;
        let mut entries = BTreeMap::new();
        loop {
            match self.peek() {
                None => return Err(self.fatal("premature end of stream while reading map")),
                Some((Tok::RBrace, _)) => {
                    self.next();
                    break;
                }
                _ => {}
            }
            let key = self
                .read_value(key_ty)?
                .ok_or_else(|| self.fatal("null is not a legal map key"))?;
            if !self.eat(&Tok::Colon) {
                return Err(self.fatal("colon expected after map key"));
            }
            let value = self
                .read_value(val_ty)?
                .ok_or_else(|| self.fatal("null is not a legal map value"))?;
            entries.insert(key, value);
        }
        self.leave();
        Ok(Value::Map(entries))
    }

    fn read_list_elements(&mut self, element: TypeRef) -> Result<Vec<Value>, DecodeError> {
        self.enter()?;
        let mut items = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.fatal("premature end of stream while reading list")),
                Some((Tok::RBracket, _)) => {
                    self.next();
                    break;
                }
                _ => {}
            }
            let item = self
                .read_value(element)?
                .ok_or_else(|| self.fatal("null is not a legal list element"))?;
            items.push(item);
        }
        self.leave();
        Ok(items)
    }

    /// Field lookup by name at one level: declared fields, then extension
    /// fields registered against the level.
    fn lookup_field(&self, level: StructId, name: &str) -> Option<(FieldKey, TypeRef, bool)> {
        if let Some(field) = self.pool.struct_(level).field_by_name(name) {
            return Some((
                FieldKey {
                    holder: level,
                    id: field.id,
                },
                field.ty,
                field.options.nullable,
            ));
        }
        // Extension fields registered against this level.
        let mut found = None;
        for (_, ext_id) in self
            .registry
            .extensions_of(level)
        {
            let ext = self.pool.extension(ext_id);
            if ext.name == name {
                found = Some((
                    FieldKey {
                        holder: level,
                        id: ext.id,
                    },
                    ext.ty,
                    ext.options.nullable,
                ));
                break;
            }
        }
        found
    }

    fn read_dotted_name(&mut self) -> Result<String, DecodeError> {
        let mut name = match self.next() {
            Some((Tok::Id(id), _)) => id,
            _ => return Err(self.fatal("type name expected")),
        };
        while self.eat(&Tok::Dot) {
            match self.next() {
                Some((Tok::Id(id), _)) => {
                    name.push('.');
                    name.push_str(&id);
                }
                _ => return Err(self.fatal("type name expected after '.'")),
            }
        }
        Ok(name)
    }

    fn peek(&self) -> Option<(Tok, u32)> {
        self.tokens.get(self.pos).cloned()
    }

    fn next(&mut self) -> Option<(Tok, u32)> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Tok) -> bool {
        if let Some((tok, _)) = self.peek() {
            if tok == *expected {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map(|&(_, line)| line)
            .unwrap_or(0)
    }

    fn fatal(&self, msg: impl Into<std::borrow::Cow<'static, str>>) -> DecodeError {
        DecodeError::new(msg).at_line(self.line())
    }

    fn enter(&mut self) -> Result<(), DecodeError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.fatal("maximum recursion depth exceeded"));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_escapes() {
        assert_eq!(quote_string("alpha\n\t"), "'alpha\\n\\t'");
        assert_eq!(quote_string("it's"), "'it\\'s'");
    }

    #[test]
    fn lexer_tokens() {
        let toks = Lexer::new("x: [1 -2 3.5] # trailing\n%4 $5 <[0aff]> 'a\\nb'")
            .run()
            .unwrap();
        let kinds: Vec<Tok> = toks.into_iter().map(|(t, _)| t).collect();
        assert_eq!(
            kinds,
            vec![
                Tok::Id("x".to_owned()),
                Tok::Colon,
                Tok::LBracket,
                Tok::Int(1),
                Tok::Int(-2),
                Tok::Float(3.5),
                Tok::RBracket,
                Tok::ObjRef(4),
                Tok::TypeRef(5),
                Tok::Bytes(vec![0x0a, 0xff]),
                Tok::Str("a\nb".to_owned()),
            ]
        );
    }

    #[test]
    fn lexer_tracks_lines() {
        let err = Lexer::new("ok\n\n  ^").run().unwrap_err();
        assert_eq!(err.position(), Some(crate::DecodePos::Line(3)));
    }
}
