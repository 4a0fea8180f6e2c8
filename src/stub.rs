//! Rewrites a class binary into its stub form.
//!
//! A stub keeps the declared shape of a type (header, field and method
//! signatures, inner-class table) and discards executable bodies. In
//! reference-preserving mode each body is reduced to the instructions that
//! name another type, field or method, so tools that analyse references still
//! see them. Every produced stub carries a `StubMarker` attribute; inputs that
//! already carry it are returned untouched.

use tracing::debug;

use crate::bytecode::{self, INVOKESTATIC, Instruction, LDC, LDC_W};
use crate::classfile::{
    ATTR_LINE_NUMBER_TABLE, ATTR_SYNTHETIC, AccessFlags, Attribute, ClassAttribute, ClassUnit,
    Code, ExceptionHandler, Member, MethodBody, line_number_table, parse_class,
};
use crate::constpool::{Constant, ConstantPool, lossy};
use crate::error::MalformedClassError;
use crate::filter::MemberFilter;

pub const STUB_MARKER_NAME: &[u8] = b"StubMarker";

const JAVA_LANG_CLASS: &[u8] = b"java/lang/Class";
const FOR_NAME: &[u8] = b"forName";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    LocalOrAnonymous,
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Stub(Vec<u8>),
    /// The input already was a stub; its original bytes.
    Unchanged(Vec<u8>),
    /// The unit must not be written to the output at all.
    Ignore(IgnoreReason),
}

impl Outcome {
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Outcome::Stub(b) | Outcome::Unchanged(b) => Some(b),
            Outcome::Ignore(_) => None,
        }
    }
}

pub fn has_stub_marker(unit: &ClassUnit) -> bool {
    unit.has_attribute(STUB_MARKER_NAME)
}

pub fn process(bytes: Vec<u8>, filter: &MemberFilter) -> Result<Outcome, MalformedClassError> {
    let mut unit = parse_class(&bytes)?;
    if has_stub_marker(&unit) {
        return Ok(Outcome::Unchanged(bytes));
    }
    if let Some(reason) = rewrite(&mut unit, filter)? {
        return Ok(Outcome::Ignore(reason));
    }
    Ok(Outcome::Stub(unit.to_bytes()))
}

/// A class whose own `InnerClasses` row lacks an outer class or a simple name.
pub fn is_local_or_anonymous(unit: &ClassUnit) -> bool {
    unit.inner_classes().iter().any(|row| {
        unit.constant_pool.class_name(row.inner_class_info_index) == Some(unit.name())
            && (row.outer_class_info_index == 0 || row.inner_name_index == 0)
    })
}

/// Turns `unit` into a stub in place. `Some(reason)` means the whole unit is to be dropped
/// and `unit` is left in an unspecified state.
pub fn rewrite(
    unit: &mut ClassUnit,
    filter: &MemberFilter,
) -> Result<Option<IgnoreReason>, MalformedClassError> {
    for (name, _) in unit.custom_attributes() {
        debug!(class = %lossy(unit.name()), attribute = %lossy(name), "class attribute");
    }
    if unit.has_attribute(ATTR_SYNTHETIC) {
        return Ok(Some(IgnoreReason::Synthetic));
    }

    if !filter.preserve_references {
        if is_local_or_anonymous(unit) {
            return Ok(Some(IgnoreReason::LocalOrAnonymous));
        }
        drop_unnamed_inner_classes(unit);
    }

    let pool = &unit.constant_pool;
    unit.fields.retain(|f| filter.keep_field(effective_flags(f, pool)));
    unit.methods.retain(|m| filter.keep_method(m.name(pool), effective_flags(m, pool)));

    for method in &unit.methods {
        debug!(
            class = %lossy(unit.name()),
            method = %lossy(method.name(pool)),
            descriptor = %lossy(method.descriptor(pool)),
            signature = ?method.signature(pool).map(lossy),
            throws = method.exceptions(pool).len(),
            "keep method"
        );
    }

    let pool = &mut unit.constant_pool;
    for method in unit.methods.iter_mut() {
        if method.access.contains(AccessFlags::ABSTRACT) {
            continue;
        }
        let MethodBody::Full(code) = &method.body else {
            continue;
        };
        let reduced = if filter.preserve_references {
            reduce_to_references(pool, code)?
        } else {
            None
        };
        match reduced {
            Some(code) => method.body = MethodBody::ReferenceOnly(code),
            None => {
                method.access |= AccessFlags::NATIVE;
                method.body = MethodBody::Absent;
            }
        }
    }

    unit.add_attribute(STUB_MARKER_NAME, Vec::new())?;
    Ok(None)
}

/// Access flags with the legacy `Synthetic` attribute folded into the synthetic bit.
fn effective_flags<M: Member>(member: &M, pool: &ConstantPool) -> AccessFlags {
    let mut flags = member.access();
    if member.has_attribute(pool, ATTR_SYNTHETIC) {
        flags |= AccessFlags::SYNTHETIC;
    }
    flags
}

fn drop_unnamed_inner_classes(unit: &mut ClassUnit) {
    unit.attributes.retain_mut(|attr| match attr {
        ClassAttribute::InnerClasses { classes, .. } => {
            classes.retain(|row| row.outer_class_info_index != 0 && row.inner_name_index != 0);
            !classes.is_empty()
        }
        ClassAttribute::Other(_) => true,
    });
}

#[derive(Debug, Default)]
struct ReduceState {
    /// String constant loaded by the most recent constant load, if it was a string.
    last_loaded_string: Option<u16>,
    current_line: Option<u16>,
    last_emitted_line: Option<u16>,
}

struct Emitter {
    code: Vec<u8>,
    lines: Vec<(u16, u16)>,
}

impl Emitter {
    fn mark_line(&mut self, state: &mut ReduceState) {
        if let Some(line) = state.current_line
            && state.last_emitted_line != Some(line)
        {
            self.lines.push((self.code.len() as u16, line));
            state.last_emitted_line = Some(line);
        }
    }

    fn emit(&mut self, state: &mut ReduceState, bytes: &[u8]) {
        self.mark_line(state);
        self.code.extend_from_slice(bytes);
    }
}

/// Keeps only reference-bearing instructions of `code`. `None` when nothing is left.
pub fn reduce_to_references(
    pool: &mut ConstantPool,
    code: &Code,
) -> Result<Option<Code>, MalformedClassError> {
    let lines = code.line_numbers(pool);
    let decoded = bytecode::decode(&code.code, &lines)?;

    let mut state = ReduceState::default();
    let mut out = Emitter {
        code: Vec::with_capacity(code.code.len()),
        lines: Vec::new(),
    };
    // (original offset, new offset) for every original instruction start.
    let mut offsets: Vec<(u32, u32)> = Vec::with_capacity(decoded.len());
    let mut has_refs = false;

    for loc in &decoded {
        if let Instruction::LineMarker { line } = loc.instruction {
            state.current_line = Some(line);
            continue;
        }
        offsets.push((loc.offset, out.code.len() as u32));

        match loc.instruction {
            Instruction::FieldRef { .. }
            | Instruction::TypeRef { .. }
            | Instruction::NewMultiArray { .. }
            | Instruction::ObjectStore { .. } => {
                out.emit(&mut state, loc.bytes);
                has_refs = true;
            }
            Instruction::ConstantLoad { index, .. } => match pool.get(index) {
                Some(Constant::Class { .. }) | Some(Constant::MethodType { .. }) => {
                    state.last_loaded_string = None;
                    out.emit(&mut state, loc.bytes);
                    has_refs = true;
                }
                Some(Constant::String { .. }) => state.last_loaded_string = Some(index),
                _ => state.last_loaded_string = None,
            },
            Instruction::MethodRef { opcode, index } => {
                if opcode == INVOKESTATIC
                    && let Some(string_index) = state.last_loaded_string
                    && is_class_for_name(pool, index)
                {
                    emit_class_literal(pool, &mut out, &mut state, string_index)?;
                }
                state.last_loaded_string = None;
                out.emit(&mut state, loc.bytes);
                has_refs = true;
            }
            Instruction::LineMarker { .. } | Instruction::Other { .. } => {}
        }
    }

    if !has_refs {
        return Ok(None);
    }

    let new_len = out.code.len() as u32;
    let remap = |old: u16| -> u32 {
        offsets
            .iter()
            .find(|(o, _)| *o >= old as u32)
            .map(|(_, n)| *n)
            .unwrap_or(new_len)
    };
    let exception_table = code
        .exception_table
        .iter()
        .filter(|h| h.catch_type != 0)
        .map(|h| (h, remap(h.start_pc), remap(h.end_pc), remap(h.handler_pc)))
        .filter(|(_, start, end, handler)| start < end && *handler < new_len)
        .map(|(h, start, end, handler)| ExceptionHandler {
            start_pc: start as u16,
            end_pc: end as u16,
            handler_pc: handler as u16,
            catch_type: h.catch_type,
        })
        .collect();

    let rows = compact_line_rows(&out.lines);
    let mut attributes = Vec::new();
    if !rows.is_empty() {
        let name_index = pool
            .find_or_add_utf8(ATTR_LINE_NUMBER_TABLE)
            .ok_or_else(|| MalformedClassError::BadConstantPool("constant pool is full".into()))?;
        attributes.push(Attribute {
            name_index,
            info: line_number_table(&rows),
        });
    }

    Ok(Some(Code {
        name_index: code.name_index,
        max_stack: code.max_stack,
        max_locals: code.max_locals,
        code: out.code,
        exception_table,
        attributes,
    }))
}

fn is_class_for_name(pool: &ConstantPool, index: u16) -> bool {
    pool.member_ref(index)
        .is_some_and(|m| m.owner == JAVA_LANG_CLASS && m.name == FOR_NAME)
}

fn emit_class_literal(
    pool: &mut ConstantPool,
    out: &mut Emitter,
    state: &mut ReduceState,
    string_index: u16,
) -> Result<(), MalformedClassError> {
    let Some(value) = pool.string_value(string_index) else {
        return Ok(());
    };
    let internal: Vec<u8> = value
        .iter()
        .map(|b| if *b == b'.' { b'/' } else { *b })
        .collect();
    let class_index = pool
        .find_or_add_class(&internal)
        .ok_or_else(|| MalformedClassError::BadConstantPool("constant pool is full".into()))?;
    let [hi, lo] = class_index.to_be_bytes();
    if hi == 0 {
        out.emit(state, &[LDC, lo]);
    } else {
        out.emit(state, &[LDC_W, hi, lo]);
    }
    Ok(())
}

/// Drops a row whose offset repeats the previous row's offset.
fn compact_line_rows(rows: &[(u16, u16)]) -> Vec<(u16, u16)> {
    let mut out: Vec<(u16, u16)> = Vec::with_capacity(rows.len());
    for row in rows {
        if out.last().is_some_and(|last| last.0 == row.0) {
            continue;
        }
        out.push(*row);
    }
    out
}
