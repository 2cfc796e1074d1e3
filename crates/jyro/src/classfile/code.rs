//! Assembler for one method body.
//!
//! `Code` encodes instructions into raw bytes while tracking the operand-stack
//! height, the local-variable high-water mark, branch fixups, the exception
//! table and line numbers. Forward branches go through [`Label`]s that are
//! patched by [`Code::finish`].
//!
//! # Usage
//!
//! ```ignore
//! let mut code = Code::new(2, true);
//! let done = code.new_label();
//! code.aload(1);
//! code.branch(Opcode::Ifnull, done);
//! code.aload(1);
//! code.emit(Opcode::Areturn);
//! code.bind_label(done);
//! code.emit(Opcode::AconstNull);
//! code.emit(Opcode::Areturn);
//! let attribute = code.finish()?;
//! ```

use smallvec::SmallVec;

use super::{
    opcode::{Form, Opcode},
    pool::{ConstantPool, PoolRef},
};

/// Largest method body the class-file format allows.
pub const MAX_CODE_LENGTH: usize = 65535;

/// Minimum `max_stack` written for any method.
const MIN_MAX_STACK: u16 = 2;

/// A jump target inside one [`Code`]; valid only for the body that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

#[derive(Debug, Clone, Default)]
struct LabelState {
    position: Option<u32>,
    /// Stack height on entry, fixed by the first branch or binding.
    stack: Option<i32>,
}

#[derive(Debug, Clone)]
struct Fixup {
    label: Label,
    /// Offset of the branching instruction; offsets are relative to it.
    instruction: u32,
    operand: u32,
    wide: bool,
}

#[derive(Debug, Clone)]
struct PendingHandler {
    start: Label,
    end: Label,
    handler: Label,
    catch_type: u16,
}

/// One resolved exception table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// Class index of the caught type, 0 for any.
    pub catch_type: u16,
}

/// A finished `Code` attribute, ready to be attached to a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionEntry>,
    /// `(start_pc, line)` pairs when line numbers are enabled.
    pub line_numbers: Option<Vec<(u16, u16)>>,
}

impl CodeAttribute {
    /// Encodes the attribute body (everything after `attribute_length`);
    /// attribute names are interned in `pool`.
    #[must_use]
    pub fn to_attribute_bytes(&self, pool: &mut ConstantPool) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.code.len() + 32);
        out.extend_from_slice(&self.max_stack.to_be_bytes());
        out.extend_from_slice(&self.max_locals.to_be_bytes());
        out.extend_from_slice(&(self.code.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.code);
        out.extend_from_slice(&(self.exception_table.len() as u16).to_be_bytes());
        for entry in &self.exception_table {
            for value in [entry.start_pc, entry.end_pc, entry.handler_pc, entry.catch_type] {
                out.extend_from_slice(&value.to_be_bytes());
            }
        }
        match &self.line_numbers {
            Some(lines) if !lines.is_empty() => {
                out.extend_from_slice(&1u16.to_be_bytes());
                out.extend_from_slice(&pool.utf8("LineNumberTable").to_be_bytes());
                out.extend_from_slice(&((2 + 4 * lines.len()) as u32).to_be_bytes());
                out.extend_from_slice(&(lines.len() as u16).to_be_bytes());
                for (pc, line) in lines {
                    out.extend_from_slice(&pc.to_be_bytes());
                    out.extend_from_slice(&line.to_be_bytes());
                }
            }
            _ => out.extend_from_slice(&0u16.to_be_bytes()),
        }
        out
    }
}

/// A method body that no longer fits the class-file limits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeError {
    #[error("code too large: {0} bytes")]
    TooLong(usize),
    #[error("branch at offset {0} out of range")]
    BranchOutOfRange(u32),
}

/// One method body under construction.
#[derive(Debug, Clone)]
pub struct Code {
    bytes: Vec<u8>,
    stack: i32,
    max_stack: i32,
    /// Occupied local slots.
    locals: Vec<bool>,
    max_locals: u16,
    labels: Vec<LabelState>,
    fixups: Vec<Fixup>,
    handlers: Vec<PendingHandler>,
    line_numbers: Option<Vec<(u32, u16)>>,
    reachable: bool,
}

impl Code {
    /// Starts a body whose first `reserved_locals` slots hold `this` and the
    /// arguments.
    #[must_use]
    pub fn new(reserved_locals: u16, line_numbers: bool) -> Self {
        Self {
            bytes: Vec::new(),
            stack: 0,
            max_stack: 0,
            locals: vec![true; usize::from(reserved_locals)],
            max_locals: reserved_locals,
            labels: Vec::new(),
            fixups: Vec::new(),
            handlers: Vec::new(),
            line_numbers: line_numbers.then(Vec::new),
            reachable: true,
        }
    }

    /// Current operand-stack height.
    #[must_use]
    pub fn stack(&self) -> i32 {
        self.stack
    }

    /// Offset of the next instruction.
    #[must_use]
    pub fn position(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Whether the next instruction can be reached by falling through.
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn adjust_stack(&mut self, delta: i32) {
        let height = self.stack + delta;
        assert!(
            height >= 0,
            "operand stack underflow at offset {}: {} {delta:+}",
            self.bytes.len(),
            self.stack
        );
        self.stack = height;
        self.max_stack = self.max_stack.max(height);
    }

    fn put_op(&mut self, op: Opcode) {
        self.bytes.push(op as u8);
    }

    fn put_u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    fn after(&mut self, op: Opcode) {
        if op.ends_flow() {
            self.reachable = false;
        }
    }

    /// Emits an instruction without operands.
    pub fn emit(&mut self, op: Opcode) {
        assert_eq!(op.form(), Form::Simple, "{op} takes operands");
        let delta = op.stack_delta().unwrap_or_else(|| panic!("{op} needs a pool entry"));
        self.put_op(op);
        self.adjust_stack(delta);
        self.after(op);
    }

    // === Locals ===

    fn local_op(&mut self, slot: u16, short: Opcode, long: Opcode, delta: i32) {
        self.touch_local(slot, delta.unsigned_abs() as u16);
        if slot < 4 {
            let op = short as u8 + slot as u8;
            self.bytes.push(op);
        } else if let Ok(slot) = u8::try_from(slot) {
            self.put_op(long);
            self.bytes.push(slot);
        } else {
            self.put_op(Opcode::Wide);
            self.put_op(long);
            self.put_u16(slot);
        }
        self.adjust_stack(delta);
    }

    fn touch_local(&mut self, slot: u16, width: u16) {
        self.max_locals = self.max_locals.max(slot + width.max(1));
    }

    pub fn aload(&mut self, slot: u16) {
        self.local_op(slot, Opcode::Aload0, Opcode::Aload, 1);
    }

    pub fn astore(&mut self, slot: u16) {
        self.local_op(slot, Opcode::Astore0, Opcode::Astore, -1);
    }

    pub fn iload(&mut self, slot: u16) {
        self.local_op(slot, Opcode::Iload0, Opcode::Iload, 1);
    }

    pub fn istore(&mut self, slot: u16) {
        self.local_op(slot, Opcode::Istore0, Opcode::Istore, -1);
    }

    pub fn lload(&mut self, slot: u16) {
        self.local_op(slot, Opcode::Lload0, Opcode::Lload, 2);
    }

    pub fn fload(&mut self, slot: u16) {
        self.local_op(slot, Opcode::Fload0, Opcode::Fload, 1);
    }

    pub fn dload(&mut self, slot: u16) {
        self.local_op(slot, Opcode::Dload0, Opcode::Dload, 2);
    }

    /// Adds `amount` to an int local in place.
    pub fn iinc(&mut self, slot: u16, amount: i16) {
        self.touch_local(slot, 1);
        match (u8::try_from(slot), i8::try_from(amount)) {
            (Ok(slot), Ok(amount)) => {
                self.put_op(Opcode::Iinc);
                self.bytes.push(slot);
                self.bytes.push(amount.to_be_bytes()[0]);
            }
            _ => {
                self.put_op(Opcode::Wide);
                self.put_op(Opcode::Iinc);
                self.put_u16(slot);
                self.bytes.extend_from_slice(&amount.to_be_bytes());
            }
        }
    }

    /// Allocates the lowest free local slot.
    pub fn get_local(&mut self) -> u16 {
        let slot = match self.locals.iter().position(|used| !used) {
            Some(free) => {
                self.locals[free] = true;
                free
            }
            None => {
                self.locals.push(true);
                self.locals.len() - 1
            }
        };
        let slot = u16::try_from(slot).unwrap_or_else(|_| panic!("more than 65535 locals"));
        self.touch_local(slot, 1);
        slot
    }

    /// Allocates two adjacent slots for a long or double; returns the first.
    pub fn get_wide_local(&mut self) -> u16 {
        let free_pair = self.locals.windows(2).position(|pair| !pair[0] && !pair[1]);
        let slot = match free_pair {
            Some(first) => first,
            None => {
                // reuse a trailing free slot if there is one
                let first = if self.locals.last() == Some(&false) {
                    self.locals.len() - 1
                } else {
                    self.locals.len()
                };
                self.locals.resize(first + 2, false);
                first
            }
        };
        self.locals[slot] = true;
        self.locals[slot + 1] = true;
        let slot = u16::try_from(slot).unwrap_or_else(|_| panic!("more than 65535 locals"));
        self.touch_local(slot, 2);
        slot
    }

    /// Releases a slot from [`Self::get_local`].
    pub fn free_local(&mut self, slot: u16) {
        let used = self
            .locals
            .get_mut(usize::from(slot))
            .unwrap_or_else(|| panic!("freeing unknown local {slot}"));
        assert!(*used, "local {slot} freed twice");
        *used = false;
    }

    /// Releases both halves of a slot from [`Self::get_wide_local`].
    pub fn free_wide_local(&mut self, slot: u16) {
        self.free_local(slot);
        self.free_local(slot + 1);
    }

    // === Constants ===

    /// Pushes an int constant using the shortest encoding.
    pub fn iconst(&mut self, value: i32, pool: &mut ConstantPool) {
        match value {
            -1..=5 => {
                let op = Opcode::Iconst0 as i32 + value;
                self.bytes.push(op as u8);
                self.adjust_stack(1);
            }
            _ => {
                if let Ok(byte) = i8::try_from(value) {
                    self.put_op(Opcode::Bipush);
                    self.bytes.push(byte.to_be_bytes()[0]);
                    self.adjust_stack(1);
                } else if let Ok(short) = i16::try_from(value) {
                    self.put_op(Opcode::Sipush);
                    self.bytes.extend_from_slice(&short.to_be_bytes());
                    self.adjust_stack(1);
                } else {
                    let entry = pool.integer(value);
                    self.ldc(entry);
                }
            }
        }
    }

    /// Loads a pool constant, picking `ldc`, `ldc_w` or `ldc2_w`.
    pub fn ldc(&mut self, entry: PoolRef) {
        if entry.size == 2 {
            self.put_op(Opcode::Ldc2W);
            self.put_u16(entry.index);
        } else if let Ok(index) = u8::try_from(entry.index) {
            self.put_op(Opcode::Ldc);
            self.bytes.push(index);
        } else {
            self.put_op(Opcode::LdcW);
            self.put_u16(entry.index);
        }
        self.adjust_stack(entry.size);
    }

    // === Fields, calls and objects ===

    fn pool_op(&mut self, op: Opcode, index: u16, delta: i32) {
        self.put_op(op);
        self.put_u16(index);
        self.adjust_stack(delta);
    }

    pub fn getstatic(&mut self, field: PoolRef) {
        self.pool_op(Opcode::Getstatic, field.index, field.size);
    }

    pub fn putstatic(&mut self, field: PoolRef) {
        self.pool_op(Opcode::Putstatic, field.index, -field.size);
    }

    pub fn getfield(&mut self, field: PoolRef) {
        self.pool_op(Opcode::Getfield, field.index, field.size - 1);
    }

    pub fn putfield(&mut self, field: PoolRef) {
        self.pool_op(Opcode::Putfield, field.index, -field.size - 1);
    }

    pub fn invokevirtual(&mut self, method: PoolRef) {
        self.pool_op(Opcode::Invokevirtual, method.index, method.size - 1);
    }

    pub fn invokespecial(&mut self, method: PoolRef) {
        self.pool_op(Opcode::Invokespecial, method.index, method.size - 1);
    }

    pub fn invokestatic(&mut self, method: PoolRef) {
        self.pool_op(Opcode::Invokestatic, method.index, method.size);
    }

    /// `arg_slots` counts argument slots, receiver excluded.
    pub fn invokeinterface(&mut self, method: PoolRef, arg_slots: u8) {
        self.put_op(Opcode::Invokeinterface);
        self.put_u16(method.index);
        self.bytes.push(arg_slots + 1);
        self.bytes.push(0);
        self.adjust_stack(method.size - 1);
    }

    pub fn new_(&mut self, class: u16) {
        self.pool_op(Opcode::New, class, 1);
    }

    pub fn anewarray(&mut self, class: u16) {
        self.pool_op(Opcode::Anewarray, class, 0);
    }

    pub fn checkcast(&mut self, class: u16) {
        self.pool_op(Opcode::Checkcast, class, 0);
    }

    // === Control flow ===

    #[must_use]
    pub fn new_label(&mut self) -> Label {
        self.labels.push(LabelState::default());
        Label(self.labels.len() as u32 - 1)
    }

    fn label_state(&mut self, label: Label) -> &mut LabelState {
        self.labels
            .get_mut(label.0 as usize)
            .unwrap_or_else(|| panic!("label {label:?} belongs to another method"))
    }

    /// Records that control reaches `label` with `height` on the stack.
    fn expect_height(&mut self, label: Label, height: i32) {
        let state = self.label_state(label);
        match state.stack {
            Some(expected) => assert_eq!(
                expected, height,
                "stack height mismatch at {label:?}: expected {expected}, got {height}"
            ),
            None => state.stack = Some(height),
        }
    }

    fn add_fixup(&mut self, label: Label, instruction: u32, wide: bool) {
        let operand = self.position();
        self.fixups.push(Fixup {
            label,
            instruction,
            operand,
            wide,
        });
        let width = if wide { 4 } else { 2 };
        self.bytes.extend(std::iter::repeat_n(0, width));
    }

    /// Emits a conditional or unconditional two-byte branch to `label`.
    ///
    /// For `jsr` the target is entered with the return address pushed and
    /// execution continues after the instruction once the subroutine returns.
    pub fn branch(&mut self, op: Opcode, label: Label) {
        assert_eq!(op.form(), Form::Branch, "{op} is not a branch");
        let instruction = self.position();
        self.put_op(op);
        self.add_fixup(label, instruction, false);
        let delta = op.stack_delta().unwrap_or(0);
        self.adjust_stack(delta);
        let entry_height = if op == Opcode::Jsr { self.stack + 1 } else { self.stack };
        if op == Opcode::Jsr {
            self.max_stack = self.max_stack.max(entry_height);
        }
        self.expect_height(label, entry_height);
        self.after(op);
    }

    pub fn goto_(&mut self, label: Label) {
        self.branch(Opcode::Goto, label);
    }

    pub fn jsr(&mut self, label: Label) {
        self.branch(Opcode::Jsr, label);
    }

    /// Returns from a subroutine through the address held in `slot`.
    pub fn ret(&mut self, slot: u16) {
        self.touch_local(slot, 1);
        if let Ok(slot) = u8::try_from(slot) {
            self.put_op(Opcode::Ret);
            self.bytes.push(slot);
        } else {
            self.put_op(Opcode::Wide);
            self.put_op(Opcode::Ret);
            self.put_u16(slot);
        }
        self.after(Opcode::Ret);
    }

    /// Pops an int and jumps to `labels[value - low]`, or `default` when out of range.
    pub fn tableswitch(&mut self, default: Label, low: i32, labels: &[Label]) {
        let instruction = self.position();
        self.put_op(Opcode::Tableswitch);
        while self.bytes.len() % 4 != 0 {
            self.bytes.push(0);
        }
        self.adjust_stack(-1);
        let height = self.stack;
        self.add_fixup(default, instruction, true);
        self.expect_height(default, height);
        let high = low + labels.len() as i32 - 1;
        self.bytes.extend_from_slice(&low.to_be_bytes());
        self.bytes.extend_from_slice(&high.to_be_bytes());
        for &label in labels {
            self.add_fixup(label, instruction, true);
            self.expect_height(label, height);
        }
        self.after(Opcode::Tableswitch);
    }

    /// Fixes `label` at the current position.
    ///
    /// If a branch already targets the label its height wins; falling into the
    /// label from reachable code must then arrive with the same height.
    pub fn bind_label(&mut self, label: Label) {
        let position = self.position();
        let (reachable, current) = (self.reachable, self.stack);
        let state = self.label_state(label);
        assert!(state.position.is_none(), "label {label:?} bound twice");
        state.position = Some(position);
        let expected = *state.stack.get_or_insert(current);
        assert!(
            !reachable || expected == current,
            "stack height mismatch falling into {label:?}: expected {expected}, got {current}"
        );
        self.stack = expected;
        self.max_stack = self.max_stack.max(self.stack);
        self.reachable = true;
    }

    /// Binds `label` with an explicit entry height, as for exception handlers.
    pub fn bind_label_at(&mut self, label: Label, height: i32) {
        self.expect_height(label, height);
        self.reachable = false;
        self.bind_label(label);
    }

    /// Whether `label` has been bound.
    #[must_use]
    pub fn is_bound(&self, label: Label) -> bool {
        self.labels
            .get(label.0 as usize)
            .is_some_and(|state| state.position.is_some())
    }

    /// Whether any branch, switch or handler entry targets `label` so far.
    #[must_use]
    pub fn is_targeted(&self, label: Label) -> bool {
        self.labels
            .get(label.0 as usize)
            .is_some_and(|state| state.stack.is_some())
    }

    // === Metadata ===

    /// Protects `[start, end)` with `handler`; `catch_type` 0 catches anything.
    ///
    /// Entries keep the order they were added in, which is the order the JVM
    /// searches them.
    pub fn add_exception_handler(&mut self, start: Label, end: Label, handler: Label, catch_type: u16) {
        self.handlers.push(PendingHandler {
            start,
            end,
            handler,
            catch_type,
        });
    }

    /// Records that instructions from here on come from source `line`.
    pub fn set_line(&mut self, line: u32) {
        let pc = self.position();
        let Some(lines) = &mut self.line_numbers else {
            return;
        };
        let line = u16::try_from(line).unwrap_or(u16::MAX);
        match lines.last_mut() {
            Some((_, last)) if *last == line => {}
            Some((last_pc, last)) if *last_pc == pc => *last = line,
            _ => lines.push((pc, line)),
        }
    }

    fn resolve(&self, label: Label) -> u32 {
        self.labels[label.0 as usize]
            .position
            .unwrap_or_else(|| panic!("label {label:?} used but never bound"))
    }

    /// Patches branches and produces the finished attribute.
    pub fn finish(mut self) -> Result<CodeAttribute, CodeError> {
        if self.bytes.len() > MAX_CODE_LENGTH {
            return Err(CodeError::TooLong(self.bytes.len()));
        }
        let fixups = std::mem::take(&mut self.fixups);
        for fixup in &fixups {
            let target = i64::from(self.resolve(fixup.label));
            let offset = target - i64::from(fixup.instruction);
            let at = fixup.operand as usize;
            if fixup.wide {
                let offset = i32::try_from(offset).map_err(|_| CodeError::BranchOutOfRange(fixup.instruction))?;
                self.bytes[at..at + 4].copy_from_slice(&offset.to_be_bytes());
            } else {
                let offset = i16::try_from(offset).map_err(|_| CodeError::BranchOutOfRange(fixup.instruction))?;
                self.bytes[at..at + 2].copy_from_slice(&offset.to_be_bytes());
            }
        }

        let mut exception_table = Vec::with_capacity(self.handlers.len());
        for pending in &self.handlers {
            let start = self.resolve(pending.start);
            let end = self.resolve(pending.end);
            if start >= end {
                continue;
            }
            exception_table.push(ExceptionEntry {
                start_pc: start as u16,
                end_pc: end as u16,
                handler_pc: self.resolve(pending.handler) as u16,
                catch_type: pending.catch_type,
            });
        }

        let code_len = self.bytes.len() as u32;
        let line_numbers = self.line_numbers.map(|lines| {
            lines
                .into_iter()
                .filter(|(pc, _)| *pc < code_len)
                .map(|(pc, line)| (pc as u16, line))
                .collect::<Vec<_>>()
        });

        Ok(CodeAttribute {
            max_stack: (self.max_stack as u16).max(MIN_MAX_STACK),
            max_locals: self.max_locals,
            code: self.bytes,
            exception_table,
            line_numbers,
        })
    }
}

/// Labels for a protected region that may be split around excluded stretches.
#[derive(Debug, Clone, Default)]
pub struct ProtectedRanges {
    ranges: SmallVec<[(Label, Label); 2]>,
    open: Option<Label>,
}

impl ProtectedRanges {
    /// Opens a region at the current position.
    #[must_use]
    pub fn start(code: &mut Code) -> Self {
        let mut ranges = Self::default();
        ranges.resume(code);
        ranges
    }

    /// Ends the current stretch; code emitted until [`Self::resume`] is unprotected.
    pub fn suspend(&mut self, code: &mut Code) {
        if let Some(start) = self.open.take() {
            let end = code.new_label();
            code.bind_here(end);
            self.ranges.push((start, end));
        }
    }

    pub fn resume(&mut self, code: &mut Code) {
        if self.open.is_none() {
            let start = code.new_label();
            code.bind_here(start);
            self.open = Some(start);
        }
    }

    /// Closes the region and registers `handler` for every stretch.
    pub fn register(mut self, code: &mut Code, handler: Label, catch_type: u16) {
        self.suspend(code);
        for (start, end) in self.ranges {
            code.add_exception_handler(start, end, handler, catch_type);
        }
    }
}

impl Code {
    /// Binds a label used only as a range marker, leaving reachability and
    /// stack tracking untouched.
    fn bind_here(&mut self, label: Label) {
        let position = self.position();
        let state = self.label_state(label);
        state.position = Some(position);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    fn op(op: Opcode) -> u8 {
        op as u8
    }

    #[test]
    fn test_local_forms() {
        let mut pool = ConstantPool::new();
        let mut code = Code::new(1, false);
        code.aload(0);
        code.aload(4);
        code.astore(300);
        code.iconst(7, &mut pool);
        code.istore(2);
        let attribute = code.finish().unwrap();
        assert_eq!(
            attribute.code,
            vec![
                op(Opcode::Aload0),
                op(Opcode::Aload),
                4,
                op(Opcode::Wide),
                op(Opcode::Astore),
                1,
                44,
                op(Opcode::Bipush),
                7,
                op(Opcode::Istore2),
            ]
        );
        assert_eq!(attribute.max_locals, 301);
        assert_eq!(attribute.max_stack, 2);
    }

    #[test]
    fn test_iconst_selection() {
        let mut pool = ConstantPool::new();
        let mut code = Code::new(0, false);
        for value in [-1, 5, -128, 1000, 100_000] {
            code.iconst(value, &mut pool);
        }
        assert_eq!(code.stack(), 5);
        let attribute = code.finish().unwrap();
        assert_eq!(
            attribute.code,
            vec![
                op(Opcode::IconstM1),
                op(Opcode::Iconst5),
                op(Opcode::Bipush),
                0x80,
                op(Opcode::Sipush),
                0x03,
                0xE8,
                op(Opcode::Ldc),
                1,
            ]
        );
        assert_eq!(attribute.max_stack, 5);
    }

    #[test]
    fn test_forward_branch() {
        let mut code = Code::new(2, false);
        let done = code.new_label();
        code.aload(1);
        code.branch(Opcode::Ifnull, done);
        code.aload(1);
        code.emit(Opcode::Areturn);
        assert!(!code.is_reachable());
        code.bind_label(done);
        assert!(code.is_reachable());
        code.emit(Opcode::AconstNull);
        code.emit(Opcode::Areturn);
        let attribute = code.finish().unwrap();
        // ifnull at 1 jumps to 6
        assert_eq!(
            attribute.code,
            vec![
                op(Opcode::Aload1),
                op(Opcode::Ifnull),
                0,
                5,
                op(Opcode::Aload1),
                op(Opcode::Areturn),
                op(Opcode::AconstNull),
                op(Opcode::Areturn),
            ]
        );
    }

    #[test]
    fn test_backward_branch() {
        let mut code = Code::new(1, false);
        let top = code.new_label();
        code.bind_label(top);
        code.emit(Opcode::Nop);
        code.goto_(top);
        let attribute = code.finish().unwrap();
        let back = (-1i16).to_be_bytes();
        assert_eq!(attribute.code, vec![op(Opcode::Nop), op(Opcode::Goto), back[0], back[1]]);
    }

    #[test]
    fn test_label_adopts_branch_height() {
        let mut code = Code::new(1, false);
        let join = code.new_label();
        code.emit(Opcode::AconstNull);
        code.emit(Opcode::Dup);
        code.branch(Opcode::Ifnonnull, join);
        code.emit(Opcode::Pop);
        code.emit(Opcode::AconstNull);
        code.bind_label(join);
        assert_eq!(code.stack(), 1);
    }

    #[test]
    #[should_panic(expected = "bound twice")]
    fn test_double_bind_panics() {
        let mut code = Code::new(0, false);
        let label = code.new_label();
        code.bind_label(label);
        code.bind_label(label);
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn test_negative_stack_panics() {
        let mut code = Code::new(0, false);
        code.emit(Opcode::Pop);
    }

    #[test]
    fn test_locals_reuse_lowest_slot() {
        let mut code = Code::new(2, false);
        let a = code.get_local();
        let b = code.get_local();
        assert_eq!((a, b), (2, 3));
        code.free_local(a);
        assert_eq!(code.get_local(), 2);
        let wide = code.get_wide_local();
        assert_eq!(wide, 4);
        code.free_local(b);
        assert_eq!(code.get_local(), 3);
        let attribute = code.finish().unwrap();
        assert_eq!(attribute.max_locals, 6);
    }

    #[test]
    fn test_tableswitch_alignment_and_offsets() {
        let mut code = Code::new(2, false);
        let default = code.new_label();
        let cases = [code.new_label(), code.new_label()];
        code.iload(1);
        code.tableswitch(default, 0, &cases);
        for label in cases {
            code.bind_label(label);
            code.emit(Opcode::AconstNull);
            code.emit(Opcode::Areturn);
        }
        code.bind_label(default);
        code.emit(Opcode::AconstNull);
        code.emit(Opcode::Areturn);
        let attribute = code.finish().unwrap();
        // iload_1 at 0, tableswitch at 1, padding to 4, then 5 ints
        assert_eq!(attribute.code[1], op(Opcode::Tableswitch));
        assert_eq!(&attribute.code[2..4], &[0, 0]);
        let int_at = |at: usize| i32::from_be_bytes(attribute.code[at..at + 4].try_into().unwrap());
        assert_eq!(int_at(4), 27);
        assert_eq!((int_at(8), int_at(12)), (0, 1));
        assert_eq!(int_at(16), 23);
        assert_eq!(int_at(20), 25);
    }

    #[test]
    fn test_exception_ranges_drop_empty() {
        let mut pool = ConstantPool::new();
        let throwable = pool.class("java/lang/Throwable");
        let mut code = Code::new(1, false);
        let empty = ProtectedRanges::start(&mut code);
        let handler_a = code.new_label();
        empty.register(&mut code, handler_a, throwable);

        let mut ranges = ProtectedRanges::start(&mut code);
        code.emit(Opcode::Nop);
        ranges.suspend(&mut code);
        code.emit(Opcode::Nop);
        ranges.resume(&mut code);
        code.emit(Opcode::Nop);
        code.emit(Opcode::Return);
        let handler_b = code.new_label();
        ranges.register(&mut code, handler_b, 0);

        code.bind_label_at(handler_a, 1);
        code.emit(Opcode::Athrow);
        code.bind_label_at(handler_b, 1);
        code.emit(Opcode::Athrow);

        let attribute = code.finish().unwrap();
        assert_eq!(
            attribute.exception_table,
            vec![
                ExceptionEntry {
                    start_pc: 0,
                    end_pc: 1,
                    handler_pc: 5,
                    catch_type: 0
                },
                ExceptionEntry {
                    start_pc: 2,
                    end_pc: 4,
                    handler_pc: 5,
                    catch_type: 0
                },
            ]
        );
    }

    #[test]
    fn test_line_numbers_collapse() {
        let mut code = Code::new(0, true);
        code.set_line(1);
        code.set_line(2);
        code.emit(Opcode::Nop);
        code.set_line(2);
        code.emit(Opcode::Nop);
        code.set_line(3);
        code.emit(Opcode::Return);
        let attribute = code.finish().unwrap();
        assert_eq!(attribute.line_numbers, Some(vec![(0, 2), (2, 3)]));
    }

    #[test]
    fn test_jsr_keeps_fallthrough_reachable() {
        let mut code = Code::new(1, false);
        let sub = code.new_label();
        code.jsr(sub);
        assert!(code.is_reachable());
        assert_eq!(code.stack(), 0);
        code.emit(Opcode::Return);
        code.bind_label(sub);
        assert_eq!(code.stack(), 1);
        let slot = code.get_local();
        code.astore(slot);
        code.ret(slot);
        let attribute = code.finish().unwrap();
        assert_eq!(attribute.code[0], op(Opcode::Jsr));
    }

    #[derive(Debug, Clone, Copy)]
    enum StackStep {
        Push,
        Dup,
        Pop,
    }

    fn step() -> impl Strategy<Value = StackStep> {
        prop_oneof![Just(StackStep::Push), Just(StackStep::Dup), Just(StackStep::Pop)]
    }

    proptest! {
        #[test]
        fn max_stack_bounds_every_height(steps in prop::collection::vec(step(), 0..64)) {
            let mut code = Code::new(0, false);
            let mut highest = 0;
            for step in steps {
                match step {
                    StackStep::Push => code.emit(Opcode::AconstNull),
                    StackStep::Dup if code.stack() > 0 => code.emit(Opcode::Dup),
                    StackStep::Pop if code.stack() > 0 => code.emit(Opcode::Pop),
                    StackStep::Dup | StackStep::Pop => continue,
                }
                highest = highest.max(code.stack());
            }
            code.emit(Opcode::Return);
            let attribute = code.finish().unwrap();
            prop_assert_eq!(i32::from(attribute.max_stack), highest.max(i32::from(MIN_MAX_STACK)));
        }
    }
}
