//! Constant pool of a class binary.
//!
//! Entries are kept in their original order with their original encoding so a
//! pool that is only read serializes back to the same bytes. Numeric constants
//! are stored as raw bits (no float canonicalisation) and UTF-8 entries as the
//! raw modified-UTF-8 bytes. New entries are only ever appended.

use nom::{
    IResult,
    bytes::complete::take,
    error::{Error, ErrorKind},
    number::complete::{be_u16, be_u32, be_u64, u8},
};
use std::borrow::Cow;

pub const TAG_UTF8: u8 = 1;
pub const TAG_INTEGER: u8 = 3;
pub const TAG_FLOAT: u8 = 4;
pub const TAG_LONG: u8 = 5;
pub const TAG_DOUBLE: u8 = 6;
pub const TAG_CLASS: u8 = 7;
pub const TAG_STRING: u8 = 8;
pub const TAG_FIELDREF: u8 = 9;
pub const TAG_METHODREF: u8 = 10;
pub const TAG_INTERFACE_METHODREF: u8 = 11;
pub const TAG_NAME_AND_TYPE: u8 = 12;
pub const TAG_METHOD_HANDLE: u8 = 15;
pub const TAG_METHOD_TYPE: u8 = 16;
pub const TAG_DYNAMIC: u8 = 17;
pub const TAG_INVOKE_DYNAMIC: u8 = 18;
pub const TAG_MODULE: u8 = 19;
pub const TAG_PACKAGE: u8 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    Utf8(Vec<u8>),
    Integer(u32),
    Float(u32),
    Long(u64),
    Double(u64),
    Class {
        name_index: u16,
    },
    String {
        string_index: u16,
    },
    Fieldref {
        class_index: u16,
        name_and_type_index: u16,
    },
    Methodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    MethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    MethodType {
        descriptor_index: u16,
    },
    Dynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    Module {
        name_index: u16,
    },
    Package {
        name_index: u16,
    },
    /// Second slot taken by a preceding `Long` or `Double`.
    Unusable,
}

impl Constant {
    fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }
}

/// A symbolic member reference resolved from a `Fieldref`/`Methodref`/`InterfaceMethodref`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub owner: &'a [u8],
    pub name: &'a [u8],
    pub descriptor: &'a [u8],
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.entries.len() + 1
    }

    pub fn get(&self, index: u16) -> Option<&Constant> {
        if index == 0 {
            return None;
        }
        self.entries.get(index as usize - 1)
    }

    pub fn utf8(&self, index: u16) -> Option<&[u8]> {
        match self.get(index)? {
            Constant::Utf8(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn class_name(&self, index: u16) -> Option<&[u8]> {
        match self.get(index)? {
            Constant::Class { name_index } => self.utf8(*name_index),
            _ => None,
        }
    }

    pub fn string_value(&self, index: u16) -> Option<&[u8]> {
        match self.get(index)? {
            Constant::String { string_index } => self.utf8(*string_index),
            _ => None,
        }
    }

    pub fn name_and_type(&self, index: u16) -> Option<(&[u8], &[u8])> {
        match self.get(index)? {
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => Some((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => None,
        }
    }

    pub fn member_ref(&self, index: u16) -> Option<MemberRef<'_>> {
        let (class_index, name_and_type_index) = match self.get(index)? {
            Constant::Fieldref {
                class_index,
                name_and_type_index,
            }
            | Constant::Methodref {
                class_index,
                name_and_type_index,
            }
            | Constant::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index),
            _ => return None,
        };
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        Some(MemberRef {
            owner: self.class_name(class_index)?,
            name,
            descriptor,
        })
    }

    /// Returns the index of an existing UTF-8 entry with these bytes, appending one if needed.
    /// `None` means the pool is full.
    pub fn find_or_add_utf8(&mut self, bytes: &[u8]) -> Option<u16> {
        if let Some(index) = self.position(|c| matches!(c, Constant::Utf8(b) if b == bytes)) {
            return Some(index);
        }
        self.push(Constant::Utf8(bytes.to_vec()))
    }

    pub fn find_or_add_class(&mut self, internal_name: &[u8]) -> Option<u16> {
        let name_index = self.find_or_add_utf8(internal_name)?;
        if let Some(index) =
            self.position(|c| matches!(c, Constant::Class { name_index: n } if *n == name_index))
        {
            return Some(index);
        }
        self.push(Constant::Class { name_index })
    }

    pub fn find_or_add_string(&mut self, value: &[u8]) -> Option<u16> {
        let string_index = self.find_or_add_utf8(value)?;
        if let Some(index) = self
            .position(|c| matches!(c, Constant::String { string_index: n } if *n == string_index))
        {
            return Some(index);
        }
        self.push(Constant::String { string_index })
    }

    pub fn find_or_add_name_and_type(&mut self, name: &[u8], descriptor: &[u8]) -> Option<u16> {
        let name_index = self.find_or_add_utf8(name)?;
        let descriptor_index = self.find_or_add_utf8(descriptor)?;
        let wanted = Constant::NameAndType {
            name_index,
            descriptor_index,
        };
        if let Some(index) = self.position(|c| *c == wanted) {
            return Some(index);
        }
        self.push(wanted)
    }

    pub fn find_or_add_methodref(
        &mut self,
        owner: &[u8],
        name: &[u8],
        descriptor: &[u8],
    ) -> Option<u16> {
        let class_index = self.find_or_add_class(owner)?;
        let name_and_type_index = self.find_or_add_name_and_type(name, descriptor)?;
        let wanted = Constant::Methodref {
            class_index,
            name_and_type_index,
        };
        if let Some(index) = self.position(|c| *c == wanted) {
            return Some(index);
        }
        self.push(wanted)
    }

    pub fn find_or_add_fieldref(
        &mut self,
        owner: &[u8],
        name: &[u8],
        descriptor: &[u8],
    ) -> Option<u16> {
        let class_index = self.find_or_add_class(owner)?;
        let name_and_type_index = self.find_or_add_name_and_type(name, descriptor)?;
        let wanted = Constant::Fieldref {
            class_index,
            name_and_type_index,
        };
        if let Some(index) = self.position(|c| *c == wanted) {
            return Some(index);
        }
        self.push(wanted)
    }

    fn position(&self, pred: impl Fn(&Constant) -> bool) -> Option<u16> {
        self.entries
            .iter()
            .position(pred)
            .map(|i| (i + 1) as u16)
    }

    fn push(&mut self, constant: Constant) -> Option<u16> {
        let slots = if constant.is_wide() { 2 } else { 1 };
        if self.count() + slots > u16::MAX as usize {
            return None;
        }
        let index = self.count() as u16;
        let wide = constant.is_wide();
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unusable);
        }
        Some(index)
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.count() as u16).to_be_bytes());
        for constant in &self.entries {
            write_constant(constant, out);
        }
    }
}

fn write_constant(constant: &Constant, out: &mut Vec<u8>) {
    let u16s = |out: &mut Vec<u8>, tag: u8, a: u16, b: u16| {
        out.push(tag);
        out.extend_from_slice(&a.to_be_bytes());
        out.extend_from_slice(&b.to_be_bytes());
    };
    let u16_1 = |out: &mut Vec<u8>, tag: u8, a: u16| {
        out.push(tag);
        out.extend_from_slice(&a.to_be_bytes());
    };

    match constant {
        Constant::Utf8(bytes) => {
            out.push(TAG_UTF8);
            out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
            out.extend_from_slice(bytes);
        }
        Constant::Integer(bits) => {
            out.push(TAG_INTEGER);
            out.extend_from_slice(&bits.to_be_bytes());
        }
        Constant::Float(bits) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&bits.to_be_bytes());
        }
        Constant::Long(bits) => {
            out.push(TAG_LONG);
            out.extend_from_slice(&bits.to_be_bytes());
        }
        Constant::Double(bits) => {
            out.push(TAG_DOUBLE);
            out.extend_from_slice(&bits.to_be_bytes());
        }
        Constant::Class { name_index } => u16_1(out, TAG_CLASS, *name_index),
        Constant::String { string_index } => u16_1(out, TAG_STRING, *string_index),
        Constant::Fieldref {
            class_index,
            name_and_type_index,
        } => u16s(out, TAG_FIELDREF, *class_index, *name_and_type_index),
        Constant::Methodref {
            class_index,
            name_and_type_index,
        } => u16s(out, TAG_METHODREF, *class_index, *name_and_type_index),
        Constant::InterfaceMethodref {
            class_index,
            name_and_type_index,
        } => u16s(
            out,
            TAG_INTERFACE_METHODREF,
            *class_index,
            *name_and_type_index,
        ),
        Constant::NameAndType {
            name_index,
            descriptor_index,
        } => u16s(out, TAG_NAME_AND_TYPE, *name_index, *descriptor_index),
        Constant::MethodHandle {
            reference_kind,
            reference_index,
        } => {
            out.push(TAG_METHOD_HANDLE);
            out.push(*reference_kind);
            out.extend_from_slice(&reference_index.to_be_bytes());
        }
        Constant::MethodType { descriptor_index } => {
            u16_1(out, TAG_METHOD_TYPE, *descriptor_index)
        }
        Constant::Dynamic {
            bootstrap_method_attr_index,
            name_and_type_index,
        } => u16s(
            out,
            TAG_DYNAMIC,
            *bootstrap_method_attr_index,
            *name_and_type_index,
        ),
        Constant::InvokeDynamic {
            bootstrap_method_attr_index,
            name_and_type_index,
        } => u16s(
            out,
            TAG_INVOKE_DYNAMIC,
            *bootstrap_method_attr_index,
            *name_and_type_index,
        ),
        Constant::Module { name_index } => u16_1(out, TAG_MODULE, *name_index),
        Constant::Package { name_index } => u16_1(out, TAG_PACKAGE, *name_index),
        Constant::Unusable => {}
    }
}

pub(crate) fn parse_constant_pool(input: &[u8]) -> IResult<&[u8], ConstantPool> {
    let (mut input, constant_pool_count) = be_u16(input)?;
    if constant_pool_count == 0 {
        return Err(nom::Err::Failure(Error::new(input, ErrorKind::Verify)));
    }

    let wanted = constant_pool_count as usize - 1;
    let mut entries = Vec::with_capacity(wanted);
    while entries.len() < wanted {
        let constant;
        (input, constant) = parse_constant(input)?;
        let wide = matches!(constant, Constant::Long(_) | Constant::Double(_));
        entries.push(constant);
        if wide {
            entries.push(Constant::Unusable);
        }
    }
    // A wide constant in the last slot overflows the declared count.
    if entries.len() > wanted {
        return Err(nom::Err::Failure(Error::new(input, ErrorKind::Verify)));
    }

    Ok((input, ConstantPool { entries }))
}

fn parse_constant(input: &[u8]) -> IResult<&[u8], Constant> {
    let start = input;
    let (input, tag) = u8(input)?;

    match tag {
        TAG_UTF8 => {
            let (input, length) = be_u16(input)?;
            let (input, bytes) = take(length)(input)?;
            Ok((input, Constant::Utf8(bytes.to_vec())))
        }
        TAG_INTEGER => {
            let (input, bits) = be_u32(input)?;
            Ok((input, Constant::Integer(bits)))
        }
        TAG_FLOAT => {
            let (input, bits) = be_u32(input)?;
            Ok((input, Constant::Float(bits)))
        }
        TAG_LONG => {
            let (input, bits) = be_u64(input)?;
            Ok((input, Constant::Long(bits)))
        }
        TAG_DOUBLE => {
            let (input, bits) = be_u64(input)?;
            Ok((input, Constant::Double(bits)))
        }
        TAG_CLASS => {
            let (input, name_index) = be_u16(input)?;
            Ok((input, Constant::Class { name_index }))
        }
        TAG_STRING => {
            let (input, string_index) = be_u16(input)?;
            Ok((input, Constant::String { string_index }))
        }
        TAG_FIELDREF => {
            let (input, (class_index, name_and_type_index)) = pair(input)?;
            Ok((
                input,
                Constant::Fieldref {
                    class_index,
                    name_and_type_index,
                },
            ))
        }
        TAG_METHODREF => {
            let (input, (class_index, name_and_type_index)) = pair(input)?;
            Ok((
                input,
                Constant::Methodref {
                    class_index,
                    name_and_type_index,
                },
            ))
        }
        TAG_INTERFACE_METHODREF => {
            let (input, (class_index, name_and_type_index)) = pair(input)?;
            Ok((
                input,
                Constant::InterfaceMethodref {
                    class_index,
                    name_and_type_index,
                },
            ))
        }
        TAG_NAME_AND_TYPE => {
            let (input, (name_index, descriptor_index)) = pair(input)?;
            Ok((
                input,
                Constant::NameAndType {
                    name_index,
                    descriptor_index,
                },
            ))
        }
        TAG_METHOD_HANDLE => {
            let (input, reference_kind) = u8(input)?;
            let (input, reference_index) = be_u16(input)?;
            Ok((
                input,
                Constant::MethodHandle {
                    reference_kind,
                    reference_index,
                },
            ))
        }
        TAG_METHOD_TYPE => {
            let (input, descriptor_index) = be_u16(input)?;
            Ok((input, Constant::MethodType { descriptor_index }))
        }
        TAG_DYNAMIC => {
            let (input, (bootstrap_method_attr_index, name_and_type_index)) = pair(input)?;
            Ok((
                input,
                Constant::Dynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                },
            ))
        }
        TAG_INVOKE_DYNAMIC => {
            let (input, (bootstrap_method_attr_index, name_and_type_index)) = pair(input)?;
            Ok((
                input,
                Constant::InvokeDynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                },
            ))
        }
        TAG_MODULE => {
            let (input, name_index) = be_u16(input)?;
            Ok((input, Constant::Module { name_index }))
        }
        TAG_PACKAGE => {
            let (input, name_index) = be_u16(input)?;
            Ok((input, Constant::Package { name_index }))
        }
        _ => Err(nom::Err::Failure(Error::new(start, ErrorKind::Switch))),
    }
}

fn pair(input: &[u8]) -> IResult<&[u8], (u16, u16)> {
    let (input, a) = be_u16(input)?;
    let (input, b) = be_u16(input)?;
    Ok((input, (a, b)))
}

pub fn lossy(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}
