//! Structural model of a class binary, its parser and its writer.
//!
//! Parsing keeps every structure the rewriter does not look at as opaque bytes
//! (unknown attributes, the whole constant pool) so `parse_class(b)?.to_bytes()`
//! reproduces `b` exactly. Method bodies are decoded into [`Code`]; the
//! `InnerClasses` table is decoded into [`InnerClassRef`] rows.

use nom::{
    IResult, Parser,
    bytes::complete::{tag, take},
    error::ErrorKind,
    multi::count,
    number::complete::{be_u16, be_u32},
};

use crate::constpool::{ConstantPool, parse_constant_pool};
use crate::error::MalformedClassError;

pub const MAGIC: [u8; 4] = [0xca, 0xfe, 0xba, 0xbe];

pub const ATTR_CODE: &[u8] = b"Code";
pub const ATTR_LINE_NUMBER_TABLE: &[u8] = b"LineNumberTable";
pub const ATTR_INNER_CLASSES: &[u8] = b"InnerClasses";
pub const ATTR_SYNTHETIC: &[u8] = b"Synthetic";
pub const ATTR_SIGNATURE: &[u8] = b"Signature";
pub const ATTR_EXCEPTIONS: &[u8] = b"Exceptions";

pub const CLINIT: &[u8] = b"<clinit>";

bitflags::bitflags! {
    /// Access and property flags shared by classes, fields and methods.
    /// Unknown bits are retained.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const NATIVE = 0x0100;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const MANDATED = 0x8000;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name_index: u16,
    pub info: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub name_index: u16,
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}

impl Code {
    /// LineNumberTable rows as `(start_pc, line)`, concatenated in attribute order.
    pub fn line_numbers(&self, pool: &ConstantPool) -> Vec<(u16, u16)> {
        let mut rows = Vec::new();
        for attr in &self.attributes {
            if pool.utf8(attr.name_index) != Some(ATTR_LINE_NUMBER_TABLE) {
                continue;
            }
            let info = &attr.info;
            if info.len() < 2 {
                continue;
            }
            let n = u16::from_be_bytes([info[0], info[1]]) as usize;
            for row in info[2..].chunks_exact(4).take(n) {
                rows.push((
                    u16::from_be_bytes([row[0], row[1]]),
                    u16::from_be_bytes([row[2], row[3]]),
                ));
            }
        }
        rows
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        let mut body = Vec::with_capacity(self.code.len() + 32);
        body.extend_from_slice(&self.max_stack.to_be_bytes());
        body.extend_from_slice(&self.max_locals.to_be_bytes());
        body.extend_from_slice(&(self.code.len() as u32).to_be_bytes());
        body.extend_from_slice(&self.code);
        body.extend_from_slice(&(self.exception_table.len() as u16).to_be_bytes());
        for h in &self.exception_table {
            for v in [h.start_pc, h.end_pc, h.handler_pc, h.catch_type] {
                body.extend_from_slice(&v.to_be_bytes());
            }
        }
        write_attributes(&self.attributes, &mut body);

        out.extend_from_slice(&self.name_index.to_be_bytes());
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
    }
}

pub fn line_number_table(rows: &[(u16, u16)]) -> Vec<u8> {
    let mut info = Vec::with_capacity(2 + rows.len() * 4);
    info.extend_from_slice(&(rows.len() as u16).to_be_bytes());
    for (start_pc, line) in rows {
        info.extend_from_slice(&start_pc.to_be_bytes());
        info.extend_from_slice(&line.to_be_bytes());
    }
    info
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodBody {
    /// Abstract, native, or dropped by the rewriter.
    Absent,
    /// The original instruction stream.
    Full(Code),
    /// Compacted stream holding only reference-bearing instructions.
    ReferenceOnly(Code),
}

impl MethodBody {
    pub fn code(&self) -> Option<&Code> {
        match self {
            MethodBody::Absent => None,
            MethodBody::Full(code) | MethodBody::ReferenceOnly(code) => Some(code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub access: AccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDecl {
    pub access: AccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    /// Attributes other than `Code`.
    pub attributes: Vec<Attribute>,
    pub body: MethodBody,
    /// Position of the `Code` attribute among `attributes` when written.
    body_slot: usize,
}

pub trait Member {
    fn access(&self) -> AccessFlags;
    fn name_index(&self) -> u16;
    fn descriptor_index(&self) -> u16;
    fn attributes(&self) -> &[Attribute];

    fn name<'p>(&self, pool: &'p ConstantPool) -> &'p [u8] {
        pool.utf8(self.name_index()).unwrap_or_default()
    }

    fn descriptor<'p>(&self, pool: &'p ConstantPool) -> &'p [u8] {
        pool.utf8(self.descriptor_index()).unwrap_or_default()
    }

    fn has_attribute(&self, pool: &ConstantPool, name: &[u8]) -> bool {
        self.attributes()
            .iter()
            .any(|a| pool.utf8(a.name_index) == Some(name))
    }

    fn signature<'p>(&self, pool: &'p ConstantPool) -> Option<&'p [u8]> {
        let attr = self
            .attributes()
            .iter()
            .find(|a| pool.utf8(a.name_index) == Some(ATTR_SIGNATURE))?;
        let index = u16::from_be_bytes([*attr.info.first()?, *attr.info.get(1)?]);
        pool.utf8(index)
    }
}

impl Member for FieldDecl {
    fn access(&self) -> AccessFlags {
        self.access
    }
    fn name_index(&self) -> u16 {
        self.name_index
    }
    fn descriptor_index(&self) -> u16 {
        self.descriptor_index
    }
    fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }
}

impl Member for MethodDecl {
    fn access(&self) -> AccessFlags {
        self.access
    }
    fn name_index(&self) -> u16 {
        self.name_index
    }
    fn descriptor_index(&self) -> u16 {
        self.descriptor_index
    }
    fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }
}

impl MethodDecl {
    pub fn exceptions<'p>(&self, pool: &'p ConstantPool) -> Vec<&'p [u8]> {
        let Some(attr) = self
            .attributes
            .iter()
            .find(|a| pool.utf8(a.name_index) == Some(ATTR_EXCEPTIONS))
        else {
            return Vec::new();
        };
        attr.info
            .get(2..)
            .unwrap_or_default()
            .chunks_exact(2)
            .filter_map(|c| pool.class_name(u16::from_be_bytes([c[0], c[1]])))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InnerClassRef {
    pub inner_class_info_index: u16,
    /// Zero when the compiler omitted the outer class (local/anonymous types).
    pub outer_class_info_index: u16,
    /// Zero for anonymous types.
    pub inner_name_index: u16,
    pub access: AccessFlags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassAttribute {
    InnerClasses {
        name_index: u16,
        classes: Vec<InnerClassRef>,
    },
    Other(Attribute),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassUnit {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access: AccessFlags,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<MethodDecl>,
    pub attributes: Vec<ClassAttribute>,
}

fn pool_full() -> MalformedClassError {
    MalformedClassError::BadConstantPool("constant pool is full".to_string())
}

impl ClassUnit {
    /// A fresh class with an empty body, targeting Java 8 (major 52).
    pub fn new(
        name: &str,
        super_name: Option<&str>,
        access: AccessFlags,
    ) -> Result<Self, MalformedClassError> {
        let mut constant_pool = ConstantPool::new();
        let this_class = constant_pool
            .find_or_add_class(name.as_bytes())
            .ok_or_else(pool_full)?;
        let super_class = match super_name {
            Some(s) => constant_pool
                .find_or_add_class(s.as_bytes())
                .ok_or_else(pool_full)?,
            None => 0,
        };
        Ok(Self {
            minor_version: 0,
            major_version: 52,
            constant_pool,
            access,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        })
    }

    pub fn name(&self) -> &[u8] {
        self.constant_pool
            .class_name(self.this_class)
            .unwrap_or_default()
    }

    pub fn super_name(&self) -> Option<&[u8]> {
        self.constant_pool.class_name(self.super_class)
    }

    pub fn interface_names(&self) -> Vec<&[u8]> {
        self.interfaces
            .iter()
            .filter_map(|i| self.constant_pool.class_name(*i))
            .collect()
    }

    pub fn inner_classes(&self) -> &[InnerClassRef] {
        self.attributes
            .iter()
            .find_map(|a| match a {
                ClassAttribute::InnerClasses { classes, .. } => Some(classes.as_slice()),
                ClassAttribute::Other(_) => None,
            })
            .unwrap_or_default()
    }

    /// Attributes that are kept as opaque payloads.
    pub fn custom_attributes(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.attributes.iter().filter_map(|a| match a {
            ClassAttribute::Other(attr) => Some((
                self.constant_pool.utf8(attr.name_index).unwrap_or_default(),
                attr.info.as_slice(),
            )),
            ClassAttribute::InnerClasses { .. } => None,
        })
    }

    pub fn has_attribute(&self, name: &[u8]) -> bool {
        self.custom_attributes().any(|(n, _)| n == name)
    }

    pub fn add_attribute(&mut self, name: &[u8], info: Vec<u8>) -> Result<(), MalformedClassError> {
        let name_index = self
            .constant_pool
            .find_or_add_utf8(name)
            .ok_or_else(pool_full)?;
        self.attributes
            .push(ClassAttribute::Other(Attribute { name_index, info }));
        Ok(())
    }

    pub fn add_interface(&mut self, name: &str) -> Result<(), MalformedClassError> {
        let index = self
            .constant_pool
            .find_or_add_class(name.as_bytes())
            .ok_or_else(pool_full)?;
        self.interfaces.push(index);
        Ok(())
    }

    pub fn add_field(
        &mut self,
        access: AccessFlags,
        name: &str,
        descriptor: &str,
    ) -> Result<&mut FieldDecl, MalformedClassError> {
        let name_index = self.utf8(name.as_bytes())?;
        let descriptor_index = self.utf8(descriptor.as_bytes())?;
        self.fields.push(FieldDecl {
            access,
            name_index,
            descriptor_index,
            attributes: Vec::new(),
        });
        let last = self.fields.len() - 1;
        Ok(&mut self.fields[last])
    }

    /// Adds a method. `code` is `(max_stack, max_locals, bytecode, line rows)`;
    /// `None` declares a body-less method.
    pub fn add_method(
        &mut self,
        access: AccessFlags,
        name: &str,
        descriptor: &str,
        code: Option<(u16, u16, Vec<u8>, &[(u16, u16)])>,
    ) -> Result<&mut MethodDecl, MalformedClassError> {
        let name_index = self.utf8(name.as_bytes())?;
        let descriptor_index = self.utf8(descriptor.as_bytes())?;
        let body = match code {
            Some((max_stack, max_locals, code, lines)) => {
                let mut attributes = Vec::new();
                if !lines.is_empty() {
                    attributes.push(Attribute {
                        name_index: self.utf8(ATTR_LINE_NUMBER_TABLE)?,
                        info: line_number_table(lines),
                    });
                }
                MethodBody::Full(Code {
                    name_index: self.utf8(ATTR_CODE)?,
                    max_stack,
                    max_locals,
                    code,
                    exception_table: Vec::new(),
                    attributes,
                })
            }
            None => MethodBody::Absent,
        };
        self.methods.push(MethodDecl {
            access,
            name_index,
            descriptor_index,
            attributes: Vec::new(),
            body,
            body_slot: 0,
        });
        let last = self.methods.len() - 1;
        Ok(&mut self.methods[last])
    }

    pub fn add_inner_class(
        &mut self,
        inner: &str,
        outer: Option<&str>,
        inner_name: Option<&str>,
        access: AccessFlags,
    ) -> Result<(), MalformedClassError> {
        let row = InnerClassRef {
            inner_class_info_index: self
                .constant_pool
                .find_or_add_class(inner.as_bytes())
                .ok_or_else(pool_full)?,
            outer_class_info_index: match outer {
                Some(o) => self
                    .constant_pool
                    .find_or_add_class(o.as_bytes())
                    .ok_or_else(pool_full)?,
                None => 0,
            },
            inner_name_index: match inner_name {
                Some(n) => self.utf8(n.as_bytes())?,
                None => 0,
            },
            access,
        };
        for attr in self.attributes.iter_mut() {
            if let ClassAttribute::InnerClasses { classes, .. } = attr {
                classes.push(row);
                return Ok(());
            }
        }
        let name_index = self.utf8(ATTR_INNER_CLASSES)?;
        self.attributes.push(ClassAttribute::InnerClasses {
            name_index,
            classes: vec![row],
        });
        Ok(())
    }

    fn utf8(&mut self, bytes: &[u8]) -> Result<u16, MalformedClassError> {
        self.constant_pool
            .find_or_add_utf8(bytes)
            .ok_or_else(pool_full)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1024);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&self.minor_version.to_be_bytes());
        out.extend_from_slice(&self.major_version.to_be_bytes());
        self.constant_pool.write_to(&mut out);
        out.extend_from_slice(&self.access.bits().to_be_bytes());
        out.extend_from_slice(&self.this_class.to_be_bytes());
        out.extend_from_slice(&self.super_class.to_be_bytes());
        out.extend_from_slice(&(self.interfaces.len() as u16).to_be_bytes());
        for i in &self.interfaces {
            out.extend_from_slice(&i.to_be_bytes());
        }

        out.extend_from_slice(&(self.fields.len() as u16).to_be_bytes());
        for f in &self.fields {
            out.extend_from_slice(&f.access.bits().to_be_bytes());
            out.extend_from_slice(&f.name_index.to_be_bytes());
            out.extend_from_slice(&f.descriptor_index.to_be_bytes());
            write_attributes(&f.attributes, &mut out);
        }

        out.extend_from_slice(&(self.methods.len() as u16).to_be_bytes());
        for m in &self.methods {
            write_method(m, &mut out);
        }

        out.extend_from_slice(&(self.attributes.len() as u16).to_be_bytes());
        for a in &self.attributes {
            match a {
                ClassAttribute::Other(attr) => write_attribute(attr, &mut out),
                ClassAttribute::InnerClasses {
                    name_index,
                    classes,
                } => {
                    out.extend_from_slice(&name_index.to_be_bytes());
                    out.extend_from_slice(&((2 + classes.len() * 8) as u32).to_be_bytes());
                    out.extend_from_slice(&(classes.len() as u16).to_be_bytes());
                    for c in classes {
                        for v in [
                            c.inner_class_info_index,
                            c.outer_class_info_index,
                            c.inner_name_index,
                            c.access.bits(),
                        ] {
                            out.extend_from_slice(&v.to_be_bytes());
                        }
                    }
                }
            }
        }
        out
    }
}

fn write_method(m: &MethodDecl, out: &mut Vec<u8>) {
    out.extend_from_slice(&m.access.bits().to_be_bytes());
    out.extend_from_slice(&m.name_index.to_be_bytes());
    out.extend_from_slice(&m.descriptor_index.to_be_bytes());

    let code = m.body.code();
    let total = m.attributes.len() + usize::from(code.is_some());
    out.extend_from_slice(&(total as u16).to_be_bytes());
    let slot = m.body_slot.min(m.attributes.len());
    for (i, attr) in m.attributes.iter().enumerate() {
        if i == slot
            && let Some(code) = code
        {
            code.write_to(out);
        }
        write_attribute(attr, out);
    }
    if slot == m.attributes.len()
        && let Some(code) = code
    {
        code.write_to(out);
    }
}

fn write_attribute(attr: &Attribute, out: &mut Vec<u8>) {
    out.extend_from_slice(&attr.name_index.to_be_bytes());
    out.extend_from_slice(&(attr.info.len() as u32).to_be_bytes());
    out.extend_from_slice(&attr.info);
}

fn write_attributes(attrs: &[Attribute], out: &mut Vec<u8>) {
    out.extend_from_slice(&(attrs.len() as u16).to_be_bytes());
    for a in attrs {
        write_attribute(a, out);
    }
}

/// Parses a class binary. Never panics on malformed input.
pub fn parse_class(bytes: &[u8]) -> Result<ClassUnit, MalformedClassError> {
    let (rest, raw) = class_file(bytes).map_err(|e| malformed(bytes.len(), e))?;
    if !rest.is_empty() {
        return Err(MalformedClassError::TrailingBytes(rest.len()));
    }
    lift(raw)
}

fn malformed(total: usize, err: nom::Err<nom::error::Error<&[u8]>>) -> MalformedClassError {
    match err {
        nom::Err::Incomplete(_) => MalformedClassError::Truncated(total),
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let offset = total - e.input.len();
            match e.code {
                ErrorKind::Tag if offset == 0 => MalformedClassError::BadMagic,
                ErrorKind::Eof => MalformedClassError::Truncated(offset),
                ErrorKind::Switch => MalformedClassError::BadConstantPool(format!(
                    "unknown constant tag at offset {offset}"
                )),
                ErrorKind::Verify => MalformedClassError::BadConstantPool(format!(
                    "invalid constant count near offset {offset}"
                )),
                _ => MalformedClassError::Invalid(offset),
            }
        }
    }
}

struct RawClass {
    minor_version: u16,
    major_version: u16,
    constant_pool: ConstantPool,
    access: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<RawMember>,
    methods: Vec<RawMember>,
    attributes: Vec<Attribute>,
}

struct RawMember {
    access: u16,
    name_index: u16,
    descriptor_index: u16,
    attributes: Vec<Attribute>,
}

fn class_file(input: &[u8]) -> IResult<&[u8], RawClass> {
    let (input, _) = tag(&MAGIC[..])(input)?;
    let (input, minor_version) = be_u16(input)?;
    let (input, major_version) = be_u16(input)?;
    let (input, constant_pool) = parse_constant_pool(input)?;
    let (input, access) = be_u16(input)?;
    let (input, this_class) = be_u16(input)?;
    let (input, super_class) = be_u16(input)?;
    let (input, interface_count) = be_u16(input)?;
    let (input, interfaces) = count(be_u16, interface_count as usize).parse(input)?;
    let (input, field_count) = be_u16(input)?;
    let (input, fields) = count(parse_member, field_count as usize).parse(input)?;
    let (input, method_count) = be_u16(input)?;
    let (input, methods) = count(parse_member, method_count as usize).parse(input)?;
    let (input, attributes) = parse_attributes(input)?;

    Ok((
        input,
        RawClass {
            minor_version,
            major_version,
            constant_pool,
            access,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        },
    ))
}

fn parse_member(input: &[u8]) -> IResult<&[u8], RawMember> {
    let (input, access) = be_u16(input)?;
    let (input, name_index) = be_u16(input)?;
    let (input, descriptor_index) = be_u16(input)?;
    let (input, attributes) = parse_attributes(input)?;
    Ok((
        input,
        RawMember {
            access,
            name_index,
            descriptor_index,
            attributes,
        },
    ))
}

fn parse_attributes(input: &[u8]) -> IResult<&[u8], Vec<Attribute>> {
    let (input, attributes_count) = be_u16(input)?;
    count(parse_attribute, attributes_count as usize).parse(input)
}

fn parse_attribute(input: &[u8]) -> IResult<&[u8], Attribute> {
    let (input, name_index) = be_u16(input)?;
    let (input, length) = be_u32(input)?;
    let (input, info) = take(length)(input)?;
    Ok((
        input,
        Attribute {
            name_index,
            info: info.to_vec(),
        },
    ))
}

// Offsets into the code array are u16 everywhere else in the format.
const MAX_CODE_LENGTH: usize = u16::MAX as usize;

fn parse_code(name_index: u16, input: &[u8]) -> IResult<&[u8], Code> {
    let (input, max_stack) = be_u16(input)?;
    let (input, max_locals) = be_u16(input)?;
    let (input, code_length) = be_u32(input)?;
    let (input, code) = take(code_length)(input)?;
    let (input, handler_count) = be_u16(input)?;
    let (input, exception_table) =
        count(parse_exception_handler, handler_count as usize).parse(input)?;
    let (input, attributes) = parse_attributes(input)?;
    Ok((
        input,
        Code {
            name_index,
            max_stack,
            max_locals,
            code: code.to_vec(),
            exception_table,
            attributes,
        },
    ))
}

fn parse_exception_handler(input: &[u8]) -> IResult<&[u8], ExceptionHandler> {
    let (input, start_pc) = be_u16(input)?;
    let (input, end_pc) = be_u16(input)?;
    let (input, handler_pc) = be_u16(input)?;
    let (input, catch_type) = be_u16(input)?;
    Ok((
        input,
        ExceptionHandler {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        },
    ))
}

fn parse_inner_classes(input: &[u8]) -> IResult<&[u8], Vec<InnerClassRef>> {
    let (input, n) = be_u16(input)?;
    count(parse_inner_class, n as usize).parse(input)
}

fn parse_inner_class(input: &[u8]) -> IResult<&[u8], InnerClassRef> {
    let (input, inner_class_info_index) = be_u16(input)?;
    let (input, outer_class_info_index) = be_u16(input)?;
    let (input, inner_name_index) = be_u16(input)?;
    let (input, access) = be_u16(input)?;
    Ok((
        input,
        InnerClassRef {
            inner_class_info_index,
            outer_class_info_index,
            inner_name_index,
            access: AccessFlags::from_bits_retain(access),
        },
    ))
}

fn lift(raw: RawClass) -> Result<ClassUnit, MalformedClassError> {
    let pool = raw.constant_pool;
    if pool.class_name(raw.this_class).is_none() {
        return Err(MalformedClassError::BadConstantPool(format!(
            "this_class #{} is not a class constant",
            raw.this_class
        )));
    }

    let fields = raw
        .fields
        .into_iter()
        .map(|f| FieldDecl {
            access: AccessFlags::from_bits_retain(f.access),
            name_index: f.name_index,
            descriptor_index: f.descriptor_index,
            attributes: f.attributes,
        })
        .collect();

    let mut methods = Vec::with_capacity(raw.methods.len());
    for m in raw.methods {
        let mut attributes = Vec::with_capacity(m.attributes.len());
        let mut body = MethodBody::Absent;
        let mut body_slot = 0;
        for attr in m.attributes {
            if matches!(body, MethodBody::Absent) && pool.utf8(attr.name_index) == Some(ATTR_CODE) {
                let (rest, code) = parse_code(attr.name_index, &attr.info).map_err(|_| {
                    MalformedClassError::BadCode("truncated Code attribute".to_string())
                })?;
                if !rest.is_empty() {
                    return Err(MalformedClassError::BadCode(format!(
                        "{} trailing bytes in Code attribute",
                        rest.len()
                    )));
                }
                if code.code.len() > MAX_CODE_LENGTH {
                    return Err(MalformedClassError::BadCode(format!(
                        "code length {} exceeds {MAX_CODE_LENGTH}",
                        code.code.len()
                    )));
                }
                body_slot = attributes.len();
                body = MethodBody::Full(code);
            } else {
                attributes.push(attr);
            }
        }
        methods.push(MethodDecl {
            access: AccessFlags::from_bits_retain(m.access),
            name_index: m.name_index,
            descriptor_index: m.descriptor_index,
            attributes,
            body,
            body_slot,
        });
    }

    let mut attributes = Vec::with_capacity(raw.attributes.len());
    for attr in raw.attributes {
        if pool.utf8(attr.name_index) == Some(ATTR_INNER_CLASSES) {
            if let Ok((rest, classes)) = parse_inner_classes(&attr.info)
                && rest.is_empty()
            {
                attributes.push(ClassAttribute::InnerClasses {
                    name_index: attr.name_index,
                    classes,
                });
                continue;
            }
            return Err(MalformedClassError::Invalid(0));
        }
        attributes.push(ClassAttribute::Other(attr));
    }

    Ok(ClassUnit {
        minor_version: raw.minor_version,
        major_version: raw.major_version,
        constant_pool: pool,
        access: AccessFlags::from_bits_retain(raw.access),
        this_class: raw.this_class,
        super_class: raw.super_class,
        interfaces: raw.interfaces,
        fields,
        methods,
        attributes,
    })
}
