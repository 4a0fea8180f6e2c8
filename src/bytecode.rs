//! Instruction decoding for method bodies.
//!
//! Only the distinction the stub rewriter needs is modelled: which
//! instructions name another type, field, method or constant. Everything else
//! decodes to [`Instruction::Other`] and is only measured so the stream can be
//! walked.

use crate::error::MalformedClassError;

pub const LDC: u8 = 0x12;
pub const LDC_W: u8 = 0x13;
pub const LDC2_W: u8 = 0x14;
pub const ASTORE: u8 = 0x3a;
pub const ASTORE_0: u8 = 0x4b;
pub const ASTORE_3: u8 = 0x4e;
pub const IINC: u8 = 0x84;
pub const TABLESWITCH: u8 = 0xaa;
pub const LOOKUPSWITCH: u8 = 0xab;
pub const GETSTATIC: u8 = 0xb2;
pub const PUTSTATIC: u8 = 0xb3;
pub const GETFIELD: u8 = 0xb4;
pub const PUTFIELD: u8 = 0xb5;
pub const INVOKEVIRTUAL: u8 = 0xb6;
pub const INVOKESPECIAL: u8 = 0xb7;
pub const INVOKESTATIC: u8 = 0xb8;
pub const INVOKEINTERFACE: u8 = 0xb9;
pub const INVOKEDYNAMIC: u8 = 0xba;
pub const NEW: u8 = 0xbb;
pub const ANEWARRAY: u8 = 0xbd;
pub const CHECKCAST: u8 = 0xc0;
pub const INSTANCEOF: u8 = 0xc1;
pub const WIDE: u8 = 0xc4;
pub const MULTIANEWARRAY: u8 = 0xc5;
pub const GOTO: u8 = 0xa7;
pub const RETURN: u8 = 0xb1;
pub const ALOAD_0: u8 = 0x2a;
pub const ICONST_0: u8 = 0x03;
pub const IADD: u8 = 0x60;
pub const IFEQ: u8 = 0x99;
pub const POP: u8 = 0x57;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// `getstatic`, `putstatic`, `getfield`, `putfield`.
    FieldRef { opcode: u8, index: u16 },
    /// `invoke*`, including `invokedynamic`.
    MethodRef { opcode: u8, index: u16 },
    /// `new`, `anewarray`, `checkcast`, `instanceof`.
    TypeRef { opcode: u8, index: u16 },
    NewMultiArray { index: u16, dimensions: u8 },
    /// `ldc`, `ldc_w`, `ldc2_w`; what was loaded depends on the pool entry.
    ConstantLoad { opcode: u8, index: u16 },
    /// `astore` in any of its encodings.
    ObjectStore { local: u16 },
    /// Position marker from the LineNumberTable; zero length.
    LineMarker { line: u16 },
    Other { opcode: u8 },
}

/// An instruction at its offset in the original code array. `bytes` is the
/// exact original encoding (empty for line markers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located<'a> {
    pub offset: u32,
    pub bytes: &'a [u8],
    pub instruction: Instruction,
}

/// Decodes a code array, interleaving a `LineMarker` before the instruction
/// each LineNumberTable row (`(start_pc, line)`) points at, in table order.
pub fn decode<'a>(
    code: &'a [u8],
    lines: &[(u16, u16)],
) -> Result<Vec<Located<'a>>, MalformedClassError> {
    let mut out = Vec::new();
    let mut pc = 0usize;
    while pc < code.len() {
        for (_, line) in lines.iter().filter(|(start, _)| *start as usize == pc) {
            out.push(Located {
                offset: pc as u32,
                bytes: &[],
                instruction: Instruction::LineMarker { line: *line },
            });
        }

        let len = instruction_length(code, pc)?;
        let end = pc + len;
        if end > code.len() {
            return Err(MalformedClassError::BadCode(format!(
                "instruction at {pc} runs past the end of the code"
            )));
        }
        let bytes = &code[pc..end];
        out.push(Located {
            offset: pc as u32,
            bytes,
            instruction: classify(bytes),
        });
        pc = end;
    }
    Ok(out)
}

fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

fn classify(bytes: &[u8]) -> Instruction {
    let opcode = bytes[0];
    match opcode {
        GETSTATIC..=PUTFIELD => Instruction::FieldRef {
            opcode,
            index: u16_at(bytes, 1),
        },
        INVOKEVIRTUAL..=INVOKEDYNAMIC => Instruction::MethodRef {
            opcode,
            index: u16_at(bytes, 1),
        },
        NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => Instruction::TypeRef {
            opcode,
            index: u16_at(bytes, 1),
        },
        MULTIANEWARRAY => Instruction::NewMultiArray {
            index: u16_at(bytes, 1),
            dimensions: bytes[3],
        },
        LDC => Instruction::ConstantLoad {
            opcode,
            index: bytes[1] as u16,
        },
        LDC_W | LDC2_W => Instruction::ConstantLoad {
            opcode,
            index: u16_at(bytes, 1),
        },
        ASTORE => Instruction::ObjectStore {
            local: bytes[1] as u16,
        },
        ASTORE_0..=ASTORE_3 => Instruction::ObjectStore {
            local: (opcode - ASTORE_0) as u16,
        },
        WIDE if bytes[1] == ASTORE => Instruction::ObjectStore {
            local: u16_at(bytes, 2),
        },
        _ => Instruction::Other { opcode },
    }
}

fn read_i32(code: &[u8], at: usize) -> Result<i32, MalformedClassError> {
    code.get(at..at + 4)
        .map(|b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| MalformedClassError::BadCode(format!("truncated switch at {at}")))
}

fn instruction_length(code: &[u8], pc: usize) -> Result<usize, MalformedClassError> {
    let opcode = code[pc];
    let len = match opcode {
        0x00..=0x0f => 1,
        0x10 => 2,
        0x11 => 3,
        LDC => 2,
        LDC_W | LDC2_W => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        IINC => 3,
        0x85..=0x98 => 1,
        0x99..=0xa8 => 3,
        0xa9 => 2,
        TABLESWITCH => {
            let base = pc + 1 + padding(pc);
            let low = read_i32(code, base + 4)?;
            let high = read_i32(code, base + 8)?;
            if high < low {
                return Err(MalformedClassError::BadCode(format!(
                    "tableswitch at {pc} has high < low"
                )));
            }
            let targets = (high as i64 - low as i64 + 1) as usize;
            1 + padding(pc) + 12 + targets * 4
        }
        LOOKUPSWITCH => {
            let base = pc + 1 + padding(pc);
            let pairs = read_i32(code, base + 4)?;
            if pairs < 0 {
                return Err(MalformedClassError::BadCode(format!(
                    "lookupswitch at {pc} has a negative pair count"
                )));
            }
            1 + padding(pc) + 8 + pairs as usize * 8
        }
        0xac..=0xb1 => 1,
        GETSTATIC..=INVOKESTATIC => 3,
        INVOKEINTERFACE | INVOKEDYNAMIC => 5,
        NEW => 3,
        0xbc => 2,
        ANEWARRAY => 3,
        0xbe | 0xbf => 1,
        CHECKCAST | INSTANCEOF => 3,
        0xc2 | 0xc3 => 1,
        WIDE => match code.get(pc + 1) {
            Some(&IINC) => 6,
            Some(0x15..=0x19) | Some(0x36..=0x3a) | Some(0xa9) => 4,
            _ => {
                return Err(MalformedClassError::BadCode(format!(
                    "invalid wide instruction at {pc}"
                )));
            }
        },
        MULTIANEWARRAY => 4,
        0xc6 | 0xc7 => 3,
        0xc8 | 0xc9 => 5,
        0xca | 0xfe | 0xff => 1,
        _ => {
            return Err(MalformedClassError::BadCode(format!(
                "unknown opcode 0x{opcode:02x} at {pc}"
            )));
        }
    };
    Ok(len)
}

fn padding(pc: usize) -> usize {
    (4 - (pc + 1) % 4) % 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_reference_bearing_instructions() {
        let code = [
            ALOAD_0,
            GETFIELD, 0x00, 0x05,
            INVOKEVIRTUAL, 0x00, 0x07,
            ASTORE, 0x02,
            NEW, 0x00, 0x09,
            MULTIANEWARRAY, 0x00, 0x0b, 0x02,
            RETURN,
        ];
        let decoded = decode(&code, &[]).unwrap();
        let kinds: Vec<_> = decoded.iter().map(|l| l.instruction).collect();
        assert_eq!(
            kinds,
            vec![
                Instruction::Other { opcode: ALOAD_0 },
                Instruction::FieldRef { opcode: GETFIELD, index: 5 },
                Instruction::MethodRef { opcode: INVOKEVIRTUAL, index: 7 },
                Instruction::ObjectStore { local: 2 },
                Instruction::TypeRef { opcode: NEW, index: 9 },
                Instruction::NewMultiArray { index: 11, dimensions: 2 },
                Instruction::Other { opcode: RETURN },
            ]
        );
        assert_eq!(decoded[5].bytes, &[MULTIANEWARRAY, 0x00, 0x0b, 0x02]);
    }

    #[test]
    fn line_markers_precede_their_instruction() {
        let code = [ICONST_0, POP, RETURN];
        let decoded = decode(&code, &[(0, 10), (2, 11)]).unwrap();
        assert_eq!(decoded[0].instruction, Instruction::LineMarker { line: 10 });
        assert_eq!(decoded[3].instruction, Instruction::LineMarker { line: 11 });
        assert_eq!(decoded[3].offset, 2);
    }

    #[test]
    fn switch_padding_is_measured_from_instruction_start() {
        // tableswitch at pc 1: two padding bytes, low=0, high=1, two targets.
        let mut code = vec![ICONST_0, TABLESWITCH, 0, 0];
        code.extend_from_slice(&20i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&1i32.to_be_bytes());
        code.extend_from_slice(&20i32.to_be_bytes());
        code.extend_from_slice(&20i32.to_be_bytes());
        code.push(RETURN);

        let decoded = decode(&code, &[]).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[1].bytes.len(), 1 + 2 + 12 + 8);
        assert_eq!(decoded[2].instruction, Instruction::Other { opcode: RETURN });
    }

    #[test]
    fn wide_astore_carries_a_two_byte_local() {
        let code = [WIDE, ASTORE, 0x01, 0x00, WIDE, IINC, 0x00, 0x01, 0x00, 0x02];
        let decoded = decode(&code, &[]).unwrap();
        assert_eq!(decoded[0].instruction, Instruction::ObjectStore { local: 256 });
        assert_eq!(decoded[1].bytes.len(), 6);
    }

    #[test]
    fn truncated_instruction_is_an_error() {
        assert!(decode(&[INVOKESTATIC, 0x00], &[]).is_err());
        assert!(decode(&[0xd0], &[]).is_err());
    }
}
