//! The compact binary codec.
//!
//! The stream is a sequence of field headers in strictly ascending field-id
//! order. A header whose id is within 15 of the previous one packs the delta
//! into its high nibble; otherwise the header byte carries the data type
//! alone and the full id follows as a varint. Subtype levels are framed with
//! SUBTYPE markers that reset the id counter, and a struct value closes with
//! a single END byte. Values of `shared` struct types are interned per
//! encoder/decoder: ids are allocated in emission order on both sides and
//! never appear on the wire for full definitions; back-references are a
//! VARINT datum in field position or a SHARED_REF lead byte in collection
//! position.

use std::collections::{BTreeMap, HashMap, HashSet};

use bytes::{Buf, BufMut};
use log::trace;

use crate::descriptor::{DescriptorPool, FieldKey, FieldRef, StructId};
use crate::encoding::{
    decode_varint, decode_zigzag, encode_varint, encode_zigzag, DataType, MAX_DELTA, SHARED_REF,
};
use crate::object::{ObjectRef, Value};
use crate::registry::TypeRegistry;
use crate::types::{Type, TypeRef};
use crate::{DecodeError, EncodeError};

/// Maximum nesting depth for either direction of the codec.
pub const MAX_DEPTH: u32 = 255;

/// Encodes a single struct value to a new buffer.
pub fn encode_to_vec(pool: &DescriptorPool, obj: &ObjectRef) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    BinaryEncoder::new(pool, &mut buf).encode(obj)?;
    Ok(buf)
}

/// Decodes a single struct value from a buffer.
pub fn decode_from_slice(
    pool: &DescriptorPool,
    registry: &TypeRegistry,
    buf: &[u8],
    expected: StructId,
) -> Result<ObjectRef, DecodeError> {
    BinaryDecoder::new(pool, registry, buf).decode(expected)
}

pub struct BinaryEncoder<'a, B> {
    pool: &'a DescriptorPool,
    buf: &'a mut B,
    /// instance address → shared id, for values of `shared` struct types.
    shared: HashMap<usize, u32>,
    next_shared_id: u32,
    /// Addresses of instances currently being serialized, for cycle
    /// detection through non-shared references.
    in_progress: HashSet<usize>,
    depth: u32,
}

impl<'a, B: BufMut> BinaryEncoder<'a, B> {
    pub fn new(pool: &'a DescriptorPool, buf: &'a mut B) -> BinaryEncoder<'a, B> {
        BinaryEncoder {
            pool,
            buf,
            shared: HashMap::new(),
            next_shared_id: 1,
            in_progress: HashSet::new(),
            depth: 0,
        }
    }

    /// Encodes a top-level struct value. The stream begins directly with the
    /// first field header (or a SUBTYPE marker); there is no framing
    /// envelope.
    pub fn encode(&mut self, obj: &ObjectRef) -> Result<(), EncodeError> {
        self.write_struct_body(obj)
    }

    fn write_struct_body(&mut self, obj: &ObjectRef) -> Result<(), EncodeError> {
        if !self.in_progress.insert(obj.addr()) {
            return Err(EncodeError::new(format!(
                "cycle through non-shared reference while serializing {}",
                self.pool.struct_full_name(obj.descriptor())
            )));
        }
        self.enter()?;

        for (index, &level) in self
            .pool
            .inheritance_chain(obj.descriptor())
            .iter()
            .enumerate()
        {
            if index > 0 {
                let type_id = self.pool.struct_(level).type_id.ok_or_else(|| {
                    EncodeError::new(format!(
                        "struct {} has a base type but no type id",
                        self.pool.struct_full_name(level)
                    ))
                })?;
                self.write_subtype_marker(type_id);
            }
            self.write_level_fields(obj, level)?;
        }
        self.buf.put_u8(DataType::End as u8);

        self.leave();
        self.in_progress.remove(&obj.addr());
        Ok(())
    }

    /// Writes the present fields declared by one inheritance level, declared
    /// and extension fields merged in ascending id order.
    fn write_level_fields(&mut self, obj: &ObjectRef, level: StructId) -> Result<(), EncodeError> {
        let mut last_id = 0u32;
        let keys: Vec<FieldKey> = obj
            .present_fields()
            .into_iter()
            .filter(|key| key.holder == level)
            .collect();
        for key in keys {
            let Some(field) = self.pool.field(key) else {
                return Err(EncodeError::new(format!(
                    "instance of {} holds a value for unknown field id {}",
                    self.pool.struct_full_name(level),
                    key.id
                )));
            };
            let options = field.options();
            if options.transient || options.deprecated {
                continue;
            }
            if !obj.is_present(self.pool, key) {
                continue;
            }
            let value = obj.get(key).expect("present field has a value");
            let fixed = options.fixed;
            let name = field.name().to_owned();
            let ty = field.ty();
            self.write_field(key.id, &name, ty, fixed, &value, &mut last_id)?;
        }
        Ok(())
    }

    fn write_field(
        &mut self,
        id: u32,
        name: &str,
        declared: TypeRef,
        fixed: bool,
        value: &Value,
        last_id: &mut u32,
    ) -> Result<(), EncodeError> {
        let (unmod, shared) = self.resolve(declared);
        let dt = self.field_data_type(unmod, shared, fixed, value)?;
        self.write_field_header(id, dt, *last_id);
        *last_id = id;
        trace!("field {} id={} type={:?}", name, id, dt);
        match dt {
            DataType::Zero | DataType::One => Ok(()),
            DataType::Varint => match value {
                Value::Integer(n) => {
                    encode_varint(encode_zigzag(*n), self.buf);
                    Ok(())
                }
                Value::Enum(n) => {
                    encode_varint(encode_zigzag(i64::from(*n)), self.buf);
                    Ok(())
                }
                // A back-reference to an interned shared struct.
                Value::Struct(child) => {
                    let index = self.shared[&child.addr()];
                    encode_varint(u64::from(index), self.buf);
                    Ok(())
                }
                _ => Err(self.type_mismatch(name, declared, value)),
            },
            _ => self.write_value(dt, unmod, value, name),
        }
    }

    /// Picks the wire data type for a field from its declared type, value and
    /// `fixed` option.
    fn field_data_type(
        &mut self,
        unmod: TypeRef,
        shared: bool,
        fixed: bool,
        value: &Value,
    ) -> Result<DataType, EncodeError> {
        Ok(match (*self.pool.type_(unmod), value) {
            (Type::Bool, Value::Bool(false)) => DataType::Zero,
            (Type::Bool, Value::Bool(true)) => DataType::One,
            (Type::Integer { bits }, Value::Integer(_)) if fixed => match bits {
                16 => DataType::Fixed16,
                32 => DataType::Fixed32,
                _ => DataType::Fixed64,
            },
            (Type::Integer { .. }, Value::Integer(_)) => DataType::Varint,
            (Type::Float, Value::Float(_)) => DataType::Float,
            (Type::Double, Value::Double(_)) => DataType::Double,
            (Type::String, Value::String(_)) | (Type::Bytes, Value::Bytes(_)) => DataType::Bytes,
            (Type::Enum(_), Value::Enum(_)) => DataType::Varint,
            (Type::List { element }, Value::List(_)) | (Type::Set { element }, Value::Set(_)) => {
                if fixed && self.packed_element_type(element).is_some() {
                    DataType::PList
                } else {
                    DataType::List
                }
            }
            (Type::Map { .. }, Value::Map(_)) => DataType::Map,
            (Type::Struct(_), Value::Struct(child)) => {
                if shared && self.shared.contains_key(&child.addr()) {
                    DataType::Varint
                } else {
                    if shared {
                        self.intern_shared(child);
                    }
                    DataType::Struct
                }
            }
            (ty, value) => {
                return Err(EncodeError::new(format!(
                    "value {:?} does not match declared type {:?}",
                    value, ty
                )))
            }
        })
    }

    fn write_field_header(&mut self, id: u32, dt: DataType, last_id: u32) {
        let delta = id.wrapping_sub(last_id);
        if id > last_id && delta <= MAX_DELTA {
            self.buf.put_u8(((delta as u8) << 4) | dt as u8);
        } else {
            self.buf.put_u8(dt as u8);
            encode_varint(u64::from(id), self.buf);
        }
    }

    fn write_subtype_marker(&mut self, type_id: u32) {
        if (1..=MAX_DELTA).contains(&type_id) {
            self.buf.put_u8(((type_id as u8) << 4) | DataType::Subtype as u8);
        } else {
            self.buf.put_u8(DataType::Subtype as u8);
            encode_varint(u64::from(type_id), self.buf);
        }
    }

    /// Writes a field payload whose header has already been emitted.
    fn write_value(
        &mut self,
        dt: DataType,
        unmod: TypeRef,
        value: &Value,
        name: &str,
    ) -> Result<(), EncodeError> {
        match (dt, value) {
            (DataType::Fixed16, Value::Integer(n)) => {
                let n = i16::try_from(*n).map_err(|_| {
                    EncodeError::new(format!("value {} of field {} overflows i16", n, name))
                })?;
                self.buf.put_i16_le(n);
            }
            (DataType::Fixed32, Value::Integer(n)) => {
                let n = i32::try_from(*n).map_err(|_| {
                    EncodeError::new(format!("value {} of field {} overflows i32", n, name))
                })?;
                self.buf.put_i32_le(n);
            }
            (DataType::Fixed64, Value::Integer(n)) => self.buf.put_i64_le(*n),
            (DataType::Float, Value::Float(n)) => self.buf.put_f32_le(*n),
            (DataType::Double, Value::Double(n)) => self.buf.put_f64_le(*n),
            (DataType::Bytes, Value::String(s)) => {
                encode_varint(s.len() as u64, self.buf);
                self.buf.put_slice(s.as_bytes());
            }
            (DataType::Bytes, Value::Bytes(b)) => {
                encode_varint(b.len() as u64, self.buf);
                self.buf.put_slice(b);
            }
            (DataType::List, Value::List(items)) => {
                let element = self.sequence_element(unmod);
                self.write_sequence(element, items.iter())?;
            }
            (DataType::List, Value::Set(items)) => {
                let element = self.sequence_element(unmod);
                self.write_sequence(element, items.iter())?;
            }
            (DataType::PList, Value::List(items)) => {
                let element = self.sequence_element(unmod);
                self.write_packed(element, items.iter())?;
            }
            (DataType::PList, Value::Set(items)) => {
                let element = self.sequence_element(unmod);
                self.write_packed(element, items.iter())?;
            }
            (DataType::Map, Value::Map(entries)) => {
                let Type::Map { key, value } = *self.pool.type_(unmod) else {
                    unreachable!("map data type implies map declared type");
                };
                self.write_map(key, value, entries)?;
            }
            (DataType::Struct, Value::Struct(child)) => self.write_struct_body(child)?,
            _ => return Err(self.type_mismatch(name, unmod, value)),
        }
        Ok(())
    }

    fn write_sequence<'v>(
        &mut self,
        element: TypeRef,
        items: impl ExactSizeIterator<Item = &'v Value>,
    ) -> Result<(), EncodeError> {
        self.enter()?;
        let code = self.element_code(element);
        self.buf.put_u8(code as u8);
        encode_varint(items.len() as u64, self.buf);
        for item in items {
            self.write_element(element, item)?;
        }
        self.leave();
        Ok(())
    }

    fn write_packed<'v>(
        &mut self,
        element: TypeRef,
        items: impl ExactSizeIterator<Item = &'v Value>,
    ) -> Result<(), EncodeError> {
        self.enter()?;
        let code = self
            .packed_element_type(element)
            .expect("packed sequence has a fixed-width element type");
        self.buf.put_u8(code as u8);
        encode_varint(items.len() as u64, self.buf);
        for item in items {
            let Value::Integer(n) = item else {
                return Err(EncodeError::new(format!(
                    "packed sequence element {:?} is not an integer",
                    item
                )));
            };
            match code {
                DataType::Fixed16 => {
                    let n = i16::try_from(*n).map_err(|_| {
                        EncodeError::new(format!("packed element {} overflows i16", n))
                    })?;
                    self.buf.put_i16_le(n);
                }
                DataType::Fixed32 => {
                    let n = i32::try_from(*n).map_err(|_| {
                        EncodeError::new(format!("packed element {} overflows i32", n))
                    })?;
                    self.buf.put_i32_le(n);
                }
                _ => self.buf.put_i64_le(*n),
            }
        }
        self.leave();
        Ok(())
    }

    fn write_map(
        &mut self,
        key_ty: TypeRef,
        val_ty: TypeRef,
        entries: &BTreeMap<Value, Value>,
    ) -> Result<(), EncodeError> {
        self.enter()?;
        let key_code = self.element_code(key_ty);
        let val_code = self.element_code(val_ty);
        self.buf.put_u8(((key_code as u8) << 4) | val_code as u8);
        encode_varint(entries.len() as u64, self.buf);
        for (key, value) in entries {
            self.write_element(key_ty, key)?;
            self.write_element(val_ty, value)?;
        }
        self.leave();
        Ok(())
    }

    /// Writes a single collection element or map key/value: raw payload with
    /// no field header.
    fn write_element(&mut self, declared: TypeRef, value: &Value) -> Result<(), EncodeError> {
        let (unmod, shared) = self.resolve(declared);
        match (*self.pool.type_(unmod), value) {
            (Type::Bool, Value::Bool(b)) => {
                let code = if *b { DataType::One } else { DataType::Zero };
                self.buf.put_u8(code as u8);
            }
            (Type::Integer { .. }, Value::Integer(n)) => {
                encode_varint(encode_zigzag(*n), self.buf);
            }
            (Type::Enum(_), Value::Enum(n)) => {
                encode_varint(encode_zigzag(i64::from(*n)), self.buf);
            }
            (Type::Float, Value::Float(n)) => self.buf.put_f32_le(*n),
            (Type::Double, Value::Double(n)) => self.buf.put_f64_le(*n),
            (Type::String, Value::String(s)) => {
                encode_varint(s.len() as u64, self.buf);
                self.buf.put_slice(s.as_bytes());
            }
            (Type::Bytes, Value::Bytes(b)) => {
                encode_varint(b.len() as u64, self.buf);
                self.buf.put_slice(b);
            }
            (Type::List { element }, Value::List(items)) => {
                self.write_sequence(element, items.iter())?;
            }
            (Type::Set { element }, Value::Set(items)) => {
                self.write_sequence(element, items.iter())?;
            }
            (Type::Map { key, value: val }, Value::Map(entries)) => {
                self.write_map(key, val, entries)?;
            }
            (Type::Struct(_), Value::Struct(child)) => {
                if shared {
                    if let Some(&index) = self.shared.get(&child.addr()) {
                        self.buf.put_u8(SHARED_REF);
                        encode_varint(u64::from(index), self.buf);
                        return Ok(());
                    }
                    self.intern_shared(child);
                }
                self.write_struct_body(child)?;
            }
            (ty, value) => {
                return Err(EncodeError::new(format!(
                    "element {:?} does not match declared type {:?}",
                    value, ty
                )))
            }
        }
        Ok(())
    }

    /// Data-type code declared in a collection header for a given element
    /// type.
    fn element_code(&self, element: TypeRef) -> DataType {
        let unmod = self.pool.unmodified(element);
        match self.pool.type_(unmod) {
            Type::Bool => DataType::Zero,
            Type::Integer { .. } | Type::Enum(_) => DataType::Varint,
            Type::Float => DataType::Float,
            Type::Double => DataType::Double,
            Type::String | Type::Bytes => DataType::Bytes,
            Type::List { .. } | Type::Set { .. } => DataType::List,
            Type::Map { .. } => DataType::Map,
            Type::Struct(_) => DataType::Struct,
            Type::Modified { .. } => unreachable!("modifiers stripped above"),
        }
    }

    /// The element type of a declared list or set type.
    fn sequence_element(&self, unmod: TypeRef) -> TypeRef {
        match self.pool.type_(unmod) {
            Type::List { element } | Type::Set { element } => *element,
            _ => unreachable!("sequence data type implies a sequence declared type"),
        }
    }

    /// The fixed-width code for a packable element type.
    fn packed_element_type(&self, element: TypeRef) -> Option<DataType> {
        match self.pool.type_(self.pool.unmodified(element)) {
            Type::Integer { bits: 16 } => Some(DataType::Fixed16),
            Type::Integer { bits: 32 } => Some(DataType::Fixed32),
            Type::Integer { .. } => Some(DataType::Fixed64),
            _ => None,
        }
    }

    fn resolve(&self, declared: TypeRef) -> (TypeRef, bool) {
        let mut shared = false;
        let mut tr = declared;
        while let Type::Modified {
            element,
            shared: s,
            ..
        } = self.pool.type_(tr)
        {
            shared |= *s;
            tr = *element;
        }
        (tr, shared)
    }

    fn intern_shared(&mut self, obj: &ObjectRef) {
        let index = self.next_shared_id;
        self.next_shared_id += 1;
        self.shared.insert(obj.addr(), index);
    }

    fn type_mismatch(&self, name: &str, declared: TypeRef, value: &Value) -> EncodeError {
        EncodeError::new(format!(
            "value of field {} should be {}, not {:?}",
            name,
            self.pool.type_name(declared),
            value
        ))
    }

    fn enter(&mut self) -> Result<(), EncodeError> {
        if self.depth >= MAX_DEPTH {
            return Err(EncodeError::new("maximum recursion depth exceeded"));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }
}

pub struct BinaryDecoder<'a, B> {
    pool: &'a DescriptorPool,
    registry: &'a TypeRegistry,
    buf: B,
    pos: u64,
    /// Shared instances in arrival order; index `id - 1`.
    shared: Vec<ObjectRef>,
    depth: u32,
}

impl<'a, B: Buf> BinaryDecoder<'a, B> {
    pub fn new(pool: &'a DescriptorPool, registry: &'a TypeRegistry, buf: B) -> BinaryDecoder<'a, B> {
        BinaryDecoder {
            pool,
            registry,
            buf,
            pos: 0,
            shared: Vec::new(),
            depth: 0,
        }
    }

    /// Decodes one top-level struct value. `expected` may be any level of an
    /// inheritance chain; the decoded dynamic type must be assignable to it.
    pub fn decode(&mut self, expected: StructId) -> Result<ObjectRef, DecodeError> {
        let root = self.pool.root_struct(expected);
        let obj = self.read_struct_body(root, false)?;
        if !self.pool.is_subtype(obj.descriptor(), expected) {
            return Err(self.err(format!(
                "decoded value of type {} where {} was expected",
                self.pool.struct_full_name(obj.descriptor()),
                self.pool.struct_full_name(expected)
            )));
        }
        Ok(obj)
    }

    /// Number of bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.pos
    }

    fn read_struct_body(
        &mut self,
        declared: StructId,
        shared: bool,
    ) -> Result<ObjectRef, DecodeError> {
        self.enter()?;
        let root = self.pool.root_struct(declared);
        let obj = ObjectRef::new(root);
        if shared {
            // Registered before the body parses so that interior
            // back-references to this very instance resolve.
            self.shared.push(obj.clone());
        }

        let mut level = root;
        let mut last_id = 0u32;
        loop {
            let header = self.get_u8()?;
            if header == DataType::End as u8 {
                trace!("{:06x}: end", self.pos - 1);
                break;
            }
            if header == SHARED_REF {
                return Err(self.err("shared reference marker outside a collection"));
            }
            let nibble = header & 0x0F;
            let delta = u32::from(header >> 4);
            let dt = DataType::try_from(nibble).map_err(|e| e.at_offset(self.pos - 1))?;

            if dt == DataType::Subtype {
                let type_id = if delta > 0 { delta } else { self.read_varint_u32()? };
                let subtype = self.registry.get_subtype(root, type_id).ok_or_else(|| {
                    self.err(format!(
                        "unknown subtype id {} for base type {}",
                        type_id,
                        self.pool.struct_full_name(root)
                    ))
                })?;
                if !self.pool.is_subtype(subtype, level) {
                    return Err(self.err(format!(
                        "subtype {} does not extend {}",
                        self.pool.struct_full_name(subtype),
                        self.pool.struct_full_name(level)
                    )));
                }
                trace!("{:06x}: subtype {}", self.pos - 1, type_id);
                obj.set_descriptor(subtype);
                level = subtype;
                last_id = 0;
                continue;
            }
            if dt == DataType::End {
                return Err(self.err("field header with END data type"));
            }

            let id = if delta > 0 {
                last_id
                    .checked_add(delta)
                    .ok_or_else(|| self.err("field id overflows the 32-bit id space"))?
            } else {
                let id = self.read_varint_u32()?;
                if id <= last_id {
                    return Err(self.err(format!(
                        "field id {} not greater than previous id {}",
                        id, last_id
                    )));
                }
                if id - last_id <= MAX_DELTA {
                    return Err(self.err(format!(
                        "explicit field id {} within delta range of previous id {}",
                        id, last_id
                    )));
                }
                id
            };
            last_id = id;
            trace!("{:06x}: field id={} type={:?}", self.pos - 1, id, dt);

            let field = match self.pool.struct_(level).field_by_id(id) {
                Some(field) => Some(FieldRef::Declared(field)),
                None => self
                    .registry
                    .get_extension(level, id)
                    .map(|ext| FieldRef::Extension(self.pool.extension(ext))),
            };
            match field {
                Some(field) => {
                    let value = self.read_field_value(dt, field.ty())?;
                    obj.set(FieldKey { holder: level, id }, value);
                }
                None => {
                    // An unregistered extension-range field; skip its value
                    // for forward compatibility.
                    trace!("{:06x}: skipping unknown field {}", self.pos, id);
                    self.skip_field_value(dt)?;
                }
            }
        }
        self.leave();
        Ok(obj)
    }

    /// Reads a field payload, interpreting the wire data type against the
    /// field's declared type.
    fn read_field_value(&mut self, dt: DataType, declared: TypeRef) -> Result<Value, DecodeError> {
        let (unmod, shared) = self.resolve(declared);
        match (*self.pool.type_(unmod), dt) {
            (Type::Bool, DataType::Zero) => Ok(Value::Bool(false)),
            (Type::Bool, DataType::One) => Ok(Value::Bool(true)),
            (Type::Integer { .. }, DataType::Varint) => {
                Ok(Value::Integer(decode_zigzag(self.read_varint()?)))
            }
            (Type::Integer { .. }, DataType::Fixed16) => {
                Ok(Value::Integer(i64::from(self.get_i16_le()?)))
            }
            (Type::Integer { .. }, DataType::Fixed32) => {
                Ok(Value::Integer(i64::from(self.get_i32_le()?)))
            }
            (Type::Integer { .. }, DataType::Fixed64) => Ok(Value::Integer(self.get_i64_le()?)),
            (Type::Float, DataType::Float) => Ok(Value::Float(self.get_f32_le()?)),
            (Type::Double, DataType::Double) => Ok(Value::Double(self.get_f64_le()?)),
            (Type::String, DataType::Bytes) => {
                let bytes = self.read_len_delimited()?;
                String::from_utf8(bytes)
                    .map(Value::String)
                    .map_err(|_| self.err("invalid string value: data is not UTF-8 encoded"))
            }
            (Type::Bytes, DataType::Bytes) => Ok(Value::Bytes(self.read_len_delimited()?)),
            (Type::Enum(_), DataType::Varint) => {
                let n = decode_zigzag(self.read_varint()?);
                i32::try_from(n)
                    .map(Value::Enum)
                    .map_err(|_| self.err(format!("enum value {} out of range", n)))
            }
            (Type::List { element }, DataType::List) => {
                Ok(Value::List(self.read_sequence(element)?))
            }
            (Type::List { element }, DataType::PList) => {
                Ok(Value::List(self.read_packed(element)?))
            }
            (Type::Set { element }, DataType::List) => {
                Ok(Value::Set(self.read_sequence(element)?.into_iter().collect()))
            }
            (Type::Set { element }, DataType::PList) => {
                Ok(Value::Set(self.read_packed(element)?.into_iter().collect()))
            }
            (Type::Map { key, value }, DataType::Map) => self.read_map(key, value),
            (Type::Struct(sid), DataType::Struct) => {
                let child = self.read_struct_body(sid, shared)?;
                self.check_assignable(&child, sid)?;
                Ok(Value::Struct(child))
            }
            // A struct-typed field carrying an integer datum is a
            // back-reference into the shared table.
            (Type::Struct(_), DataType::Varint) => {
                let index = self.read_varint()?;
                self.lookup_shared(index).map(Value::Struct)
            }
            (ty, dt) => Err(self.err(format!(
                "wire type {:?} does not match declared type {:?}",
                dt, ty
            ))),
        }
    }

    fn read_sequence(&mut self, element: TypeRef) -> Result<Vec<Value>, DecodeError> {
        self.enter()?;
        let code = DataType::try_from(self.get_u8()?).map_err(|e| e.at_offset(self.pos - 1))?;
        let count = self.read_varint()?;
        let mut items = Vec::new();
        for _ in 0..count {
            items.push(self.read_element(code, element)?);
        }
        self.leave();
        Ok(items)
    }

    fn read_packed(&mut self, element: TypeRef) -> Result<Vec<Value>, DecodeError> {
        self.enter()?;
        let code = DataType::try_from(self.get_u8()?).map_err(|e| e.at_offset(self.pos - 1))?;
        let width = code
            .fixed_width()
            .ok_or_else(|| self.err(format!("packed sequence with element type {:?}", code)))?;
        let count = self.read_varint()?;
        if count.saturating_mul(width as u64) > self.buf.remaining() as u64 {
            return Err(self.err("buffer underflow"));
        }
        let element_kind = *self.pool.type_(self.pool.unmodified(element));
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let value = match code {
                DataType::Fixed16 => Value::Integer(i64::from(self.get_i16_le()?)),
                DataType::Fixed32 => Value::Integer(i64::from(self.get_i32_le()?)),
                DataType::Fixed64 => Value::Integer(self.get_i64_le()?),
                DataType::Float => Value::Float(self.get_f32_le()?),
                _ => Value::Double(self.get_f64_le()?),
            };
            match (&element_kind, &value) {
                (Type::Integer { .. }, Value::Integer(_))
                | (Type::Float, Value::Float(_))
                | (Type::Double, Value::Double(_)) => {}
                _ => {
                    return Err(self.err(format!(
                        "packed element type {:?} does not match declared type {:?}",
                        code, element_kind
                    )))
                }
            }
            items.push(value);
        }
        self.leave();
        Ok(items)
    }

    fn read_map(&mut self, key_ty: TypeRef, val_ty: TypeRef) -> Result<Value, DecodeError> {
        self.enter()?;
        let codes = self.get_u8()?;
        let key_code = DataType::try_from(codes >> 4).map_err(|e| e.at_offset(self.pos - 1))?;
        let val_code = DataType::try_from(codes & 0x0F).map_err(|e| e.at_offset(self.pos - 1))?;
        let count = self.read_varint()?;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let key = self.read_element(key_code, key_ty)?;
            let value = self.read_element(val_code, val_ty)?;
            entries.insert(key, value);
        }
        self.leave();
        Ok(Value::Map(entries))
    }

    /// Reads one collection element or map key/value.
    fn read_element(&mut self, code: DataType, declared: TypeRef) -> Result<Value, DecodeError> {
        let (unmod, shared) = self.resolve(declared);
        match (*self.pool.type_(unmod), code) {
            (Type::Bool, DataType::Zero | DataType::One) => {
                let byte = self.get_u8()?;
                match byte {
                    b if b == DataType::Zero as u8 => Ok(Value::Bool(false)),
                    b if b == DataType::One as u8 => Ok(Value::Bool(true)),
                    b => Err(self.err(format!("invalid boolean element {:#x}", b))),
                }
            }
            (Type::Integer { .. }, DataType::Varint) => {
                Ok(Value::Integer(decode_zigzag(self.read_varint()?)))
            }
            (Type::Integer { .. }, DataType::Fixed16) => {
                Ok(Value::Integer(i64::from(self.get_i16_le()?)))
            }
            (Type::Integer { .. }, DataType::Fixed32) => {
                Ok(Value::Integer(i64::from(self.get_i32_le()?)))
            }
            (Type::Integer { .. }, DataType::Fixed64) => Ok(Value::Integer(self.get_i64_le()?)),
            (Type::Enum(_), DataType::Varint) => {
                let n = decode_zigzag(self.read_varint()?);
                i32::try_from(n)
                    .map(Value::Enum)
                    .map_err(|_| self.err(format!("enum value {} out of range", n)))
            }
            (Type::Float, DataType::Float) => Ok(Value::Float(self.get_f32_le()?)),
            (Type::Double, DataType::Double) => Ok(Value::Double(self.get_f64_le()?)),
            (Type::String, DataType::Bytes) => {
                let bytes = self.read_len_delimited()?;
                String::from_utf8(bytes)
                    .map(Value::String)
                    .map_err(|_| self.err("invalid string value: data is not UTF-8 encoded"))
            }
            (Type::Bytes, DataType::Bytes) => Ok(Value::Bytes(self.read_len_delimited()?)),
            (Type::List { element }, DataType::List) => {
                Ok(Value::List(self.read_sequence(element)?))
            }
            (Type::Set { element }, DataType::List) => {
                Ok(Value::Set(self.read_sequence(element)?.into_iter().collect()))
            }
            (Type::Map { key, value }, DataType::Map) => self.read_map(key, value),
            (Type::Struct(sid), DataType::Struct) => {
                if self.peek_u8()? == SHARED_REF {
                    self.get_u8()?;
                    let index = self.read_varint()?;
                    return self.lookup_shared(index).map(Value::Struct);
                }
                let child = self.read_struct_body(sid, shared)?;
                self.check_assignable(&child, sid)?;
                Ok(Value::Struct(child))
            }
            (ty, code) => Err(self.err(format!(
                "element type {:?} does not match declared type {:?}",
                code, ty
            ))),
        }
    }

    fn check_assignable(&self, obj: &ObjectRef, declared: StructId) -> Result<(), DecodeError> {
        if !self.pool.is_subtype(obj.descriptor(), declared) {
            return Err(self.err(format!(
                "decoded value of type {} where {} was expected",
                self.pool.struct_full_name(obj.descriptor()),
                self.pool.struct_full_name(declared)
            )));
        }
        Ok(())
    }

    fn lookup_shared(&self, index: u64) -> Result<ObjectRef, DecodeError> {
        usize::try_from(index)
            .ok()
            .and_then(|ix| ix.checked_sub(1))
            .and_then(|ix| self.shared.get(ix))
            .cloned()
            .ok_or_else(|| self.err(format!("invalid shared object id {}", index)))
    }

    // ===== Skipping unknown extension-range fields =====

    fn skip_field_value(&mut self, dt: DataType) -> Result<(), DecodeError> {
        self.enter()?;
        match dt {
            DataType::Zero | DataType::One => {}
            DataType::Varint => {
                self.read_varint()?;
            }
            DataType::Fixed16 => self.advance(2)?,
            DataType::Fixed32 | DataType::Float => self.advance(4)?,
            DataType::Fixed64 | DataType::Double => self.advance(8)?,
            DataType::Bytes => {
                let len = self.read_varint()?;
                self.advance_checked(len)?;
            }
            DataType::List => self.skip_sequence()?,
            DataType::PList => self.skip_packed()?,
            DataType::Map => self.skip_map()?,
            DataType::Struct => self.skip_struct_body()?,
            DataType::End | DataType::Subtype => {
                return Err(self.err(format!("cannot skip value of wire type {:?}", dt)))
            }
        }
        self.leave();
        Ok(())
    }

    fn skip_sequence(&mut self) -> Result<(), DecodeError> {
        let code = DataType::try_from(self.get_u8()?).map_err(|e| e.at_offset(self.pos - 1))?;
        let count = self.read_varint()?;
        for _ in 0..count {
            self.skip_element(code)?;
        }
        Ok(())
    }

    fn skip_packed(&mut self) -> Result<(), DecodeError> {
        let code = DataType::try_from(self.get_u8()?).map_err(|e| e.at_offset(self.pos - 1))?;
        let width = code
            .fixed_width()
            .ok_or_else(|| self.err(format!("packed sequence with element type {:?}", code)))?;
        let count = self.read_varint()?;
        self.advance_checked(count.saturating_mul(width as u64))
    }

    fn skip_map(&mut self) -> Result<(), DecodeError> {
        let codes = self.get_u8()?;
        let key_code = DataType::try_from(codes >> 4).map_err(|e| e.at_offset(self.pos - 1))?;
        let val_code = DataType::try_from(codes & 0x0F).map_err(|e| e.at_offset(self.pos - 1))?;
        let count = self.read_varint()?;
        for _ in 0..count {
            self.skip_element(key_code)?;
            self.skip_element(val_code)?;
        }
        Ok(())
    }

    fn skip_element(&mut self, code: DataType) -> Result<(), DecodeError> {
        self.enter()?;
        match code {
            // Boolean elements occupy one byte.
            DataType::Zero | DataType::One => self.advance(1)?,
            DataType::Varint => {
                self.read_varint()?;
            }
            DataType::Fixed16 => self.advance(2)?,
            DataType::Fixed32 | DataType::Float => self.advance(4)?,
            DataType::Fixed64 | DataType::Double => self.advance(8)?,
            DataType::Bytes => {
                let len = self.read_varint()?;
                self.advance_checked(len)?;
            }
            DataType::List => self.skip_sequence()?,
            DataType::Map => self.skip_map()?,
            DataType::Struct => {
                if self.peek_u8()? == SHARED_REF {
                    self.get_u8()?;
                    self.read_varint()?;
                } else {
                    self.skip_struct_body()?;
                }
            }
            _ => return Err(self.err(format!("cannot skip element of wire type {:?}", code))),
        }
        self.leave();
        Ok(())
    }

    /// Skips an entire struct body without descriptor knowledge: headers
    /// carry enough typing to walk past every value.
    fn skip_struct_body(&mut self) -> Result<(), DecodeError> {
        self.enter()?;
        loop {
            let header = self.get_u8()?;
            if header == DataType::End as u8 {
                break;
            }
            let nibble = header & 0x0F;
            let delta = header >> 4;
            let dt = DataType::try_from(nibble).map_err(|e| e.at_offset(self.pos - 1))?;
            if dt == DataType::Subtype {
                if delta == 0 {
                    self.read_varint()?;
                }
                continue;
            }
            if delta == 0 {
                self.read_varint()?;
            }
            self.skip_field_value(dt)?;
        }
        self.leave();
        Ok(())
    }

    // ===== Raw input =====

    fn resolve(&self, declared: TypeRef) -> (TypeRef, bool) {
        let mut shared = false;
        let mut tr = declared;
        while let Type::Modified {
            element,
            shared: s,
            ..
        } = self.pool.type_(tr)
        {
            shared |= *s;
            tr = *element;
        }
        (tr, shared)
    }

    fn err(&self, msg: impl Into<std::borrow::Cow<'static, str>>) -> DecodeError {
        DecodeError::new(msg).at_offset(self.pos)
    }

    fn get_u8(&mut self) -> Result<u8, DecodeError> {
        if !self.buf.has_remaining() {
            return Err(self.err("unexpected end of input"));
        }
        self.pos += 1;
        Ok(self.buf.get_u8())
    }

    fn peek_u8(&mut self) -> Result<u8, DecodeError> {
        if !self.buf.has_remaining() {
            return Err(self.err("unexpected end of input"));
        }
        Ok(self.buf.chunk()[0])
    }

    fn require(&self, n: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < n {
            return Err(self.err("buffer underflow"));
        }
        Ok(())
    }

    fn advance(&mut self, n: usize) -> Result<(), DecodeError> {
        self.require(n)?;
        self.buf.advance(n);
        self.pos += n as u64;
        Ok(())
    }

    fn advance_checked(&mut self, n: u64) -> Result<(), DecodeError> {
        if n > self.buf.remaining() as u64 {
            return Err(self.err("buffer underflow"));
        }
        self.buf.advance(n as usize);
        self.pos += n;
        Ok(())
    }

    fn read_varint(&mut self) -> Result<u64, DecodeError> {
        let before = self.buf.remaining();
        let value = decode_varint(&mut self.buf).map_err(|e| e.at_offset(self.pos))?;
        self.pos += (before - self.buf.remaining()) as u64;
        Ok(value)
    }

    fn read_varint_u32(&mut self) -> Result<u32, DecodeError> {
        let value = self.read_varint()?;
        u32::try_from(value)
            .map_err(|_| self.err(format!("value {} overflows a 32-bit id", value)))
    }

    fn read_len_delimited(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_varint()?;
        if len > self.buf.remaining() as u64 {
            return Err(self.err("buffer underflow"));
        }
        let mut bytes = vec![0u8; len as usize];
        self.buf.copy_to_slice(&mut bytes);
        self.pos += len;
        Ok(bytes)
    }

    fn get_i16_le(&mut self) -> Result<i16, DecodeError> {
        self.require(2)?;
        self.pos += 2;
        Ok(self.buf.get_i16_le())
    }

    fn get_i32_le(&mut self) -> Result<i32, DecodeError> {
        self.require(4)?;
        self.pos += 4;
        Ok(self.buf.get_i32_le())
    }

    fn get_i64_le(&mut self) -> Result<i64, DecodeError> {
        self.require(8)?;
        self.pos += 8;
        Ok(self.buf.get_i64_le())
    }

    fn get_f32_le(&mut self) -> Result<f32, DecodeError> {
        self.require(4)?;
        self.pos += 4;
        Ok(self.buf.get_f32_le())
    }

    fn get_f64_le(&mut self) -> Result<f64, DecodeError> {
        self.require(8)?;
        self.pos += 8;
        Ok(self.buf.get_f64_le())
    }

    fn enter(&mut self) -> Result<(), DecodeError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.err("maximum recursion depth exceeded"));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }
}
