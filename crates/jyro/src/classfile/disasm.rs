//! Instruction decoder and listing.

use std::fmt;

use super::{
    opcode::{Form, Opcode},
    pool::PoolEntry,
    reader::ParsedClass,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    None,
    Local(u16),
    Int(i32),
    Pool(u16),
    /// Absolute branch target.
    Target(u32),
    Iinc { slot: u16, amount: i16 },
    Interface { index: u16, count: u8 },
    Switch { default: u32, low: i32, targets: Vec<u32> },
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub pc: u32,
    /// Encoded length in bytes, including any `wide` prefix.
    pub len: u32,
    pub op: Opcode,
    pub operand: Operand,
}

impl Instruction {
    /// Offset of the following instruction.
    #[must_use]
    pub fn next_pc(&self) -> u32 {
        self.pc + self.len
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown opcode {opcode:#04x} at offset {pc}")]
    UnknownOpcode { opcode: u8, pc: u32 },
    #[error("instruction at offset {0} runs past the end of the code")]
    Truncated(u32),
    #[error("{op} cannot follow wide at offset {pc}")]
    BadWide { op: Opcode, pc: u32 },
}

/// Decodes a complete method body.
pub fn decode(code: &[u8]) -> Result<Vec<Instruction>, DecodeError> {
    let mut out = Vec::new();
    let mut pc = 0usize;
    while pc < code.len() {
        let instruction = decode_one(code, pc)?;
        pc = instruction.next_pc() as usize;
        out.push(instruction);
    }
    Ok(out)
}

fn decode_one(code: &[u8], pc: usize) -> Result<Instruction, DecodeError> {
    let at = pc as u32;
    let byte = |i: usize| code.get(i).copied().ok_or(DecodeError::Truncated(at));
    let u16_at = |i: usize| Ok::<_, DecodeError>(u16::from_be_bytes([byte(i)?, byte(i + 1)?]));
    let i32_at = |i: usize| Ok::<_, DecodeError>(i32::from_be_bytes([byte(i)?, byte(i + 1)?, byte(i + 2)?, byte(i + 3)?]));
    let opcode_at = |i: usize| {
        let raw = byte(i)?;
        Opcode::from_repr(raw).ok_or(DecodeError::UnknownOpcode { opcode: raw, pc: i as u32 })
    };
    let target = |offset: i32| (i64::from(at) + i64::from(offset)) as u32;

    let op = opcode_at(pc)?;
    let (op, operand, len) = match op.form() {
        Form::Simple => (op, Operand::None, 1),
        Form::Local => (op, Operand::Local(u16::from(byte(pc + 1)?)), 2),
        Form::Byte => (op, Operand::Int(i32::from(byte(pc + 1)? as i8)), 2),
        Form::Short => (op, Operand::Int(i32::from(u16_at(pc + 1)? as i16)), 3),
        Form::Pool8 => (op, Operand::Pool(u16::from(byte(pc + 1)?)), 2),
        Form::Pool16 => (op, Operand::Pool(u16_at(pc + 1)?), 3),
        Form::Branch => (op, Operand::Target(target(i32::from(u16_at(pc + 1)? as i16))), 3),
        Form::Iinc => (
            op,
            Operand::Iinc {
                slot: u16::from(byte(pc + 1)?),
                amount: i16::from(byte(pc + 2)? as i8),
            },
            3,
        ),
        Form::Interface => (
            op,
            Operand::Interface {
                index: u16_at(pc + 1)?,
                count: byte(pc + 3)?,
            },
            5,
        ),
        Form::TableSwitch => {
            let mut cursor = (pc + 4) & !3;
            let default = target(i32_at(cursor)?);
            let low = i32_at(cursor + 4)?;
            let high = i32_at(cursor + 8)?;
            cursor += 12;
            let count = usize::try_from(i64::from(high) - i64::from(low) + 1).map_err(|_| DecodeError::Truncated(at))?;
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push(target(i32_at(cursor)?));
                cursor += 4;
            }
            (op, Operand::Switch { default, low, targets }, cursor - pc)
        }
        Form::Wide => {
            let inner = opcode_at(pc + 1)?;
            match inner.form() {
                Form::Local => (inner, Operand::Local(u16_at(pc + 2)?), 4),
                Form::Iinc => (
                    inner,
                    Operand::Iinc {
                        slot: u16_at(pc + 2)?,
                        amount: u16_at(pc + 4)? as i16,
                    },
                    6,
                ),
                _ => return Err(DecodeError::BadWide { op: inner, pc: at }),
            }
        }
    };
    Ok(Instruction {
        pc: at,
        len: len as u32,
        op,
        operand,
    })
}

/// Human-readable listing of a parsed class.
pub struct Disassembly<'a>(pub &'a ParsedClass);

impl Disassembly<'_> {
    fn describe(&self, index: u16) -> String {
        let class = self.0;
        match class.entry(index) {
            Some(PoolEntry::Utf8(text)) => format!("{text:?}"),
            Some(PoolEntry::Integer(value)) => format!("int {value}"),
            Some(PoolEntry::Float(bits)) => format!("float {}", f32::from_bits(*bits)),
            Some(PoolEntry::Long(value)) => format!("long {value}"),
            Some(PoolEntry::Double(bits)) => format!("double {}", f64::from_bits(*bits)),
            Some(PoolEntry::Class(_)) => class.class_name(index).map_or_else(|e| e.to_string(), |n| format!("class {n}")),
            Some(PoolEntry::String(utf8)) => class
                .utf8(*utf8)
                .map_or_else(|e| e.to_string(), |text| format!("string {text:?}")),
            Some(PoolEntry::NameAndType { .. }) => class
                .name_and_type(index)
                .map_or_else(|e| e.to_string(), |(name, desc)| format!("{name}:{desc}")),
            Some(PoolEntry::Fieldref { .. } | PoolEntry::Methodref { .. } | PoolEntry::InterfaceMethodref { .. }) => {
                class
                    .member_ref(index)
                    .map_or_else(|e| e.to_string(), |(owner, name, desc)| format!("{owner}.{name}:{desc}"))
            }
            None => format!("<bad #{index}>"),
        }
    }
}

impl fmt::Display for Disassembly<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let class = self.0;
        writeln!(f, "class {} extends {}", class.name, class.super_name.as_deref().unwrap_or("-"))?;
        writeln!(f, "  version {}, access {:#06x}", class.version, class.access)?;
        for interface in &class.interfaces {
            writeln!(f, "  implements {interface}")?;
        }
        if let Some(source) = &class.source_file {
            writeln!(f, "  source {source}")?;
        }
        writeln!(f, "constant pool:")?;
        for index in 1..class.pool.len() as u16 {
            if class.entry(index).is_some() {
                writeln!(f, "  #{index:<5} {}", self.describe(index))?;
            }
        }
        for field in &class.fields {
            writeln!(f, "field {:#06x} {} {}", field.access, field.name, field.descriptor)?;
        }
        for method in &class.methods {
            writeln!(f, "method {:#06x} {}{}", method.access, method.name, method.descriptor)?;
            let Some(code) = &method.code else { continue };
            writeln!(f, "  max_stack {} max_locals {}", code.max_stack, code.max_locals)?;
            match decode(&code.code) {
                Ok(instructions) => {
                    for ins in instructions {
                        write!(f, "  {:>5}: {}", ins.pc, ins.op)?;
                        match &ins.operand {
                            Operand::None => {}
                            Operand::Local(slot) => write!(f, " {slot}")?,
                            Operand::Int(value) => write!(f, " {value}")?,
                            Operand::Pool(index) => write!(f, " #{index} // {}", self.describe(*index))?,
                            Operand::Target(target) => write!(f, " {target}")?,
                            Operand::Iinc { slot, amount } => write!(f, " {slot} {amount:+}")?,
                            Operand::Interface { index, count } => {
                                write!(f, " #{index} {count} // {}", self.describe(*index))?;
                            }
                            Operand::Switch { default, low, targets } => {
                                write!(f, " low {low} default {default} [")?;
                                for (i, target) in targets.iter().enumerate() {
                                    if i > 0 {
                                        f.write_str(", ")?;
                                    }
                                    write!(f, "{target}")?;
                                }
                                f.write_str("]")?;
                            }
                        }
                        writeln!(f)?;
                    }
                }
                Err(err) => writeln!(f, "  <{err}>")?,
            }
            for entry in &code.exception_table {
                let catch = if entry.catch_type == 0 {
                    "any".to_owned()
                } else {
                    self.describe(entry.catch_type)
                };
                writeln!(
                    f,
                    "  try [{}, {}) -> {} {catch}",
                    entry.start_pc, entry.end_pc, entry.handler_pc
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::classfile::{Code, ConstantPool};

    #[test]
    fn decodes_wide_and_branches() {
        let mut pool = ConstantPool::new();
        let mut code = Code::new(1, false);
        let top = code.new_label();
        code.bind_label(top);
        code.iconst(0, &mut pool);
        code.istore(400);
        code.iinc(400, 1000);
        code.goto_(top);
        let attribute = code.finish().unwrap();
        let decoded = decode(&attribute.code).unwrap();
        let ops: Vec<(Opcode, Operand)> = decoded.into_iter().map(|i| (i.op, i.operand)).collect();
        assert_eq!(
            ops,
            vec![
                (Opcode::Iconst0, Operand::None),
                (Opcode::Istore, Operand::Local(400)),
                (Opcode::Iinc, Operand::Iinc { slot: 400, amount: 1000 }),
                (Opcode::Goto, Operand::Target(0)),
            ]
        );
    }

    #[test]
    fn unknown_opcode_is_reported() {
        assert_eq!(
            decode(&[0xFE]).unwrap_err(),
            DecodeError::UnknownOpcode { opcode: 0xFE, pc: 0 }
        );
    }
}
