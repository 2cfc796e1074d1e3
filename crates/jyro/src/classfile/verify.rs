//! Operand-stack depth verifier.
//!
//! Replays every path through a method body, including exception handlers and
//! `jsr` subroutines, and checks that the stack height never goes negative,
//! never exceeds `max_stack`, and agrees wherever paths merge. It does not
//! check types.

use ahash::AHashMap;

use super::{
    descriptor::{JavaType, MethodDescriptor},
    disasm::{DecodeError, Instruction, Operand, decode},
    opcode::Opcode,
    pool::PoolEntry,
    reader::{ParsedClass, ParsedMember, ReadError},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyErrorKind {
    #[error("stack underflow")]
    Underflow,
    #[error("stack height {height} exceeds max_stack {max}")]
    Overflow { height: i32, max: u16 },
    #[error("stack height mismatch at merge: {expected} vs {found}")]
    Mismatch { expected: i32, found: i32 },
    #[error("branch to {0}, which is not an instruction boundary")]
    BadTarget(u32),
    #[error("control falls off the end of the code")]
    FallsOffEnd,
    #[error("unresolvable operand: {0}")]
    Operand(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{method} at pc {pc}: {kind}")]
pub struct VerifyError {
    pub method: String,
    pub pc: u32,
    pub kind: VerifyErrorKind,
}

/// Verifies every method with a body; returns the first failure.
pub fn check_class(class: &ParsedClass) -> Result<(), VerifyError> {
    for method in &class.methods {
        check_method(class, method)?;
    }
    Ok(())
}

/// Verifies one method and returns the highest stack height reached.
pub fn check_method(class: &ParsedClass, method: &ParsedMember) -> Result<i32, VerifyError> {
    let fail = |pc: u32, kind: VerifyErrorKind| VerifyError {
        method: format!("{}{}", method.name, method.descriptor),
        pc,
        kind,
    };
    let Some(code) = &method.code else {
        return Ok(0);
    };
    let instructions = decode(&code.code).map_err(|err| fail(0, err.into()))?;
    let by_pc: AHashMap<u32, usize> = instructions.iter().enumerate().map(|(i, ins)| (ins.pc, i)).collect();

    let mut heights: Vec<Option<i32>> = vec![None; instructions.len()];
    let mut work = Vec::new();
    let mut highest = 0;

    let reach = |pc: u32, height: i32, heights: &mut Vec<Option<i32>>, work: &mut Vec<usize>, from: u32| {
        let index = *by_pc.get(&pc).ok_or_else(|| fail(from, VerifyErrorKind::BadTarget(pc)))?;
        match heights[index] {
            Some(expected) if expected != height => Err(fail(
                pc,
                VerifyErrorKind::Mismatch {
                    expected,
                    found: height,
                },
            )),
            Some(_) => Ok(()),
            None => {
                heights[index] = Some(height);
                work.push(index);
                Ok(())
            }
        }
    };

    if !instructions.is_empty() {
        reach(0, 0, &mut heights, &mut work, 0)?;
    }
    while let Some(index) = work.pop() {
        let ins = &instructions[index];
        let height = heights[index].unwrap_or_default();
        let delta = stack_delta(class, ins).map_err(|kind| fail(ins.pc, kind))?;
        let after = height + delta;
        if after < 0 {
            return Err(fail(ins.pc, VerifyErrorKind::Underflow));
        }
        let peak = after.max(height);
        if peak > i32::from(code.max_stack) {
            return Err(fail(
                ins.pc,
                VerifyErrorKind::Overflow {
                    height: peak,
                    max: code.max_stack,
                },
            ));
        }
        highest = highest.max(peak);

        for entry in &code.exception_table {
            if u32::from(entry.start_pc) <= ins.pc && ins.pc < u32::from(entry.end_pc) {
                reach(u32::from(entry.handler_pc), 1, &mut heights, &mut work, ins.pc)?;
            }
        }

        match &ins.operand {
            Operand::Target(target) if ins.op == Opcode::Jsr => {
                let entry = after + 1;
                if entry > i32::from(code.max_stack) {
                    return Err(fail(
                        ins.pc,
                        VerifyErrorKind::Overflow {
                            height: entry,
                            max: code.max_stack,
                        },
                    ));
                }
                reach(*target, entry, &mut heights, &mut work, ins.pc)?;
            }
            Operand::Target(target) => reach(*target, after, &mut heights, &mut work, ins.pc)?,
            Operand::Switch { default, targets, .. } => {
                reach(*default, after, &mut heights, &mut work, ins.pc)?;
                for target in targets {
                    reach(*target, after, &mut heights, &mut work, ins.pc)?;
                }
            }
            _ => {}
        }
        if !ins.op.ends_flow() {
            if index + 1 == instructions.len() {
                return Err(fail(ins.pc, VerifyErrorKind::FallsOffEnd));
            }
            reach(ins.next_pc(), after, &mut heights, &mut work, ins.pc)?;
        }
    }
    Ok(highest)
}

fn stack_delta(class: &ParsedClass, ins: &Instruction) -> Result<i32, VerifyErrorKind> {
    if let Some(delta) = ins.op.stack_delta() {
        return Ok(delta);
    }
    let index = match ins.operand {
        Operand::Pool(index) | Operand::Interface { index, .. } => index,
        _ => return Err(VerifyErrorKind::Operand(format!("{} without pool operand", ins.op))),
    };
    let bad = |err: ReadError| VerifyErrorKind::Operand(err.to_string());
    Ok(match ins.op {
        Opcode::Ldc | Opcode::LdcW | Opcode::Ldc2W => match class.entry(index) {
            Some(PoolEntry::Long(_) | PoolEntry::Double(_)) => 2,
            Some(_) => 1,
            None => return Err(VerifyErrorKind::Operand(format!("ldc of #{index}"))),
        },
        Opcode::Getstatic | Opcode::Putstatic | Opcode::Getfield | Opcode::Putfield => {
            let (_, _, descriptor) = class.member_ref(index).map_err(bad)?;
            let slots = i32::from(
                JavaType::parse(descriptor)
                    .map_err(|err| VerifyErrorKind::Operand(err.to_string()))?
                    .slots(),
            );
            match ins.op {
                Opcode::Getstatic => slots,
                Opcode::Putstatic => -slots,
                Opcode::Getfield => slots - 1,
                _ => -slots - 1,
            }
        }
        _ => {
            let (_, _, descriptor) = class.member_ref(index).map_err(bad)?;
            let method = MethodDescriptor::parse(descriptor).map_err(|err| VerifyErrorKind::Operand(err.to_string()))?;
            let receiver = i32::from(ins.op != Opcode::Invokestatic);
            method.stack_delta() - receiver
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::{ClassFile, ClassVersion, access, reader::parse_class};

    fn class_with(build: impl FnOnce(&mut crate::classfile::Code, &mut crate::classfile::ConstantPool)) -> ParsedClass {
        let mut class = ClassFile::new("T", "java/lang/Object", access::PUBLIC, ClassVersion::default());
        class
            .add_method_with("m", "(Ljava/lang/Object;)Ljava/lang/Object;", access::PUBLIC, false, build)
            .unwrap();
        parse_class(&class.to_bytes().unwrap()).unwrap()
    }

    #[test]
    fn accepts_branches_and_handlers() {
        let parsed = class_with(|code, pool| {
            let done = code.new_label();
            let handler = code.new_label();
            let start = code.new_label();
            let end = code.new_label();
            code.bind_label(start);
            code.aload(1);
            code.invokevirtual(pool.methodref("java/lang/Object", "hashCode", "()I"));
            code.branch(Opcode::Ifeq, done);
            code.bind_label(end);
            code.aload(1);
            code.emit(Opcode::Areturn);
            code.bind_label(done);
            code.emit(Opcode::AconstNull);
            code.emit(Opcode::Areturn);
            code.add_exception_handler(start, end, handler, 0);
            code.bind_label_at(handler, 1);
            code.emit(Opcode::Areturn);
        });
        let method = parsed.method("m", "(Ljava/lang/Object;)Ljava/lang/Object;").unwrap();
        assert_eq!(check_method(&parsed, method).unwrap(), 1);
    }

    #[test]
    fn detects_fall_off_end() {
        let parsed = class_with(|code, _| {
            code.aload(1);
            code.emit(Opcode::Pop);
        });
        let method = parsed.method("m", "(Ljava/lang/Object;)Ljava/lang/Object;").unwrap();
        assert_eq!(check_method(&parsed, method).unwrap_err().kind, VerifyErrorKind::FallsOffEnd);
    }
}
