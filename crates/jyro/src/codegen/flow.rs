//! Conditionals, loops, early exits and exception handling.
//!
//! Early exits (`break`, `continue`, `return`) walk the block stack from the
//! innermost block outwards to their target. Every `finally` clause passed on
//! the way runs first: through `jsr` under subroutine lowering, or as a fresh
//! copy under inline lowering. Inline copies are cut out of the protected
//! ranges they sit in, so an exception raised by the copy is not handled by
//! the `try` it is leaving.

use super::{Block, CodeCompiler, FinallyExit};
use crate::{
    ast::{ExceptHandler, Expr, Stmt},
    classfile::{Label, Opcode, ProtectedRanges},
    error::{CompileError, CompileResult, ErrorKind},
    options::{FinallyLowering, Iteration},
    runtime::{Helper, THROWABLE},
    tracer::CompileTracer,
};

/// Temporaries and labels of one running `for` loop or comprehension.
#[derive(Debug, Clone, Copy)]
pub(super) struct ActiveIteration {
    iterable: u16,
    /// Counter for the indexed protocol.
    index: Option<u16>,
    /// The current element; null once exhausted.
    pub(super) item: u16,
    start: Label,
    /// Fetches the next element; the continue target.
    pub(super) next: Label,
}

impl<'t, T: CompileTracer> CodeCompiler<'_, 't, T> {
    /// Binds `label` unless nothing can reach it.
    fn bind_exit(&mut self, label: Label) {
        if self.code.is_reachable() || self.code.is_targeted(label) {
            self.code.bind_label(label);
        }
    }

    pub(super) fn if_(&mut self, test: &'t Expr, body: &'t [Stmt], orelse: &'t [Stmt]) -> CompileResult<()> {
        let otherwise = self.code.new_label();
        self.condition(test)?;
        self.code.branch(Opcode::Ifeq, otherwise);
        self.suite(body)?;
        if orelse.is_empty() {
            self.bind_exit(otherwise);
            return Ok(());
        }
        let end = self.code.new_label();
        if self.code.is_reachable() {
            self.code.goto_(end);
        }
        self.code.bind_label(otherwise);
        self.suite(orelse)?;
        self.bind_exit(end);
        Ok(())
    }

    pub(super) fn while_(&mut self, test: &'t Expr, body: &'t [Stmt], orelse: &'t [Stmt]) -> CompileResult<()> {
        let start = self.code.new_label();
        let next = self.code.new_label();
        let end = self.code.new_label();
        self.code.goto_(next);
        self.code.bind_label(start);
        self.blocks.push(Block::Loop {
            continue_to: next,
            break_to: end,
        });
        self.suite(body)?;
        self.blocks.pop();
        self.code.bind_label(next);
        self.condition(test)?;
        self.code.branch(Opcode::Ifne, start);
        self.suite(orelse)?;
        self.bind_exit(end);
        Ok(())
    }

    pub(super) fn for_(
        &mut self,
        target: &'t Expr,
        iter: &'t Expr,
        body: &'t [Stmt],
        orelse: &'t [Stmt],
    ) -> CompileResult<()> {
        let end = self.code.new_label();
        let iteration = self.begin_iteration(iter)?;
        self.set(target, iteration.item)?;
        self.blocks.push(Block::Loop {
            continue_to: iteration.next,
            break_to: end,
        });
        self.suite(body)?;
        self.blocks.pop();
        self.end_iteration(iteration);
        self.suite(orelse)?;
        self.bind_exit(end);
        Ok(())
    }

    /// Evaluates the iterable and opens the loop; code emitted next runs once
    /// per element, which is held in `item`.
    pub(super) fn begin_iteration(&mut self, iter: &'t Expr) -> CompileResult<ActiveIteration> {
        self.expr(iter)?;
        if self.iteration == Iteration::Iterator {
            self.helper(Helper::Iter);
        }
        let iterable = self.code.get_local();
        self.code.astore(iterable);
        let index = match self.iteration {
            Iteration::Indexed => {
                let index = self.code.get_local();
                self.iconst(0);
                self.code.istore(index);
                Some(index)
            }
            Iteration::Iterator => None,
        };
        let item = self.code.get_local();
        let start = self.code.new_label();
        let next = self.code.new_label();
        self.code.goto_(next);
        self.code.bind_label(start);
        Ok(ActiveIteration {
            iterable,
            index,
            item,
            start,
            next,
        })
    }

    /// Fetches the next element and loops back while there is one.
    pub(super) fn end_iteration(&mut self, iteration: ActiveIteration) {
        self.code.bind_label(iteration.next);
        self.code.aload(iteration.iterable);
        match iteration.index {
            Some(index) => {
                self.code.iload(index);
                self.helper(Helper::FindItem);
                self.code.iinc(index, 1);
            }
            None => self.helper(Helper::IterNext),
        }
        self.code.astore(iteration.item);
        self.code.aload(iteration.item);
        self.code.branch(Opcode::Ifnonnull, iteration.start);
        self.code.free_local(iteration.item);
        if let Some(index) = iteration.index {
            self.code.free_local(index);
        }
        self.code.free_local(iteration.iterable);
    }

    // === Early exits ===

    pub(super) fn break_(&mut self, line: u32) -> CompileResult<()> {
        let found = self.blocks.iter().enumerate().rev().find_map(|(index, block)| match block {
            Block::Loop { break_to, .. } => Some((index, *break_to)),
            _ => None,
        });
        let Some((index, target)) = found else {
            return Err(CompileError::new(ErrorKind::OutsideLoop, "'break' outside loop", line));
        };
        self.jump_out(index + 1, target)
    }

    pub(super) fn continue_(&mut self, line: u32) -> CompileResult<()> {
        let mut found = None;
        for (index, block) in self.blocks.iter().enumerate().rev() {
            match block {
                Block::FinallyClause => {
                    return Err(CompileError::syntax(
                        "'continue' not supported inside 'finally' clause",
                        line,
                    ));
                }
                Block::Loop { continue_to, .. } => {
                    found = Some((index, *continue_to));
                    break;
                }
                _ => {}
            }
        }
        let Some((index, target)) = found else {
            return Err(CompileError::new(
                ErrorKind::OutsideLoop,
                "'continue' not properly in loop",
                line,
            ));
        };
        self.jump_out(index + 1, target)
    }

    fn jump_out(&mut self, stop: usize, target: Label) -> CompileResult<()> {
        let suspended = self.exit_through(stop)?;
        self.code.goto_(target);
        self.resume(&suspended);
        Ok(())
    }

    pub(super) fn return_(&mut self, value: Option<&'t Expr>, line: u32) -> CompileResult<()> {
        if !self.scope.fast_locals() {
            return Err(CompileError::new(
                ErrorKind::OutsideFunction,
                "'return' outside function",
                line,
            ));
        }
        match value {
            Some(value) => self.expr(value)?,
            None => self.helper(Helper::None),
        }
        let Some(outermost) = self
            .blocks
            .iter()
            .position(|block| matches!(block, Block::Finally { .. }))
        else {
            self.code.emit(Opcode::Areturn);
            return Ok(());
        };

        // A subroutine may reuse any slot freed before it is emitted, so the
        // value lives in a slot owned by the outermost try/finally.
        let slot = match (self.finally, &mut self.blocks[outermost]) {
            (FinallyLowering::Subroutine, Block::Finally { return_slot, .. }) => {
                *return_slot.get_or_insert_with(|| self.code.get_local())
            }
            _ => self.code.get_local(),
        };
        self.code.astore(slot);
        let suspended = self.exit_through(0)?;
        self.code.aload(slot);
        self.code.emit(Opcode::Areturn);
        if self.finally != FinallyLowering::Subroutine {
            self.code.free_local(slot);
        }
        self.resume(&suspended);
        Ok(())
    }

    /// Runs the `finally` clauses of `blocks[stop..]`, innermost first.
    ///
    /// Returns the blocks whose protected ranges were suspended; resume them
    /// once the exit jump is emitted.
    fn exit_through(&mut self, stop: usize) -> CompileResult<Vec<usize>> {
        let inline = self.finally == FinallyLowering::Inline;
        let mut suspended = Vec::new();
        for index in (stop..self.blocks.len()).rev() {
            let body = match &mut self.blocks[index] {
                Block::Loop { .. } | Block::FinallyClause => continue,
                Block::Guarded(ranges) => {
                    if inline {
                        ranges.suspend(&mut self.code);
                        suspended.push(index);
                    }
                    continue;
                }
                Block::Finally {
                    exit: FinallyExit::Subroutine(subroutine),
                    ..
                } => {
                    self.code.jsr(*subroutine);
                    continue;
                }
                Block::Finally {
                    ranges,
                    exit: FinallyExit::Inline,
                    body,
                    ..
                } => {
                    ranges.suspend(&mut self.code);
                    suspended.push(index);
                    *body
                }
            };
            let outer = self.blocks.split_off(index);
            self.blocks.push(Block::FinallyClause);
            let result = self.suite(body);
            self.blocks.pop();
            self.blocks.extend(outer);
            result?;
        }
        Ok(suspended)
    }

    fn resume(&mut self, suspended: &[usize]) {
        for &index in suspended {
            match &mut self.blocks[index] {
                Block::Guarded(ranges) | Block::Finally { ranges, .. } => ranges.resume(&mut self.code),
                other => unreachable!("suspended {other:?}"),
            }
        }
    }

    // === Exceptions ===

    pub(super) fn try_except(
        &mut self,
        body: &'t [Stmt],
        handlers: &'t [ExceptHandler],
        orelse: &'t [Stmt],
    ) -> CompileResult<()> {
        let handler = self.code.new_label();
        let end = self.code.new_label();

        let ranges = ProtectedRanges::start(&mut self.code);
        self.blocks.push(Block::Guarded(ranges));
        self.suite(body)?;
        let Some(Block::Guarded(ranges)) = self.blocks.pop() else {
            unreachable!("block stack out of sync");
        };
        let throwable = self.module.pool().class(THROWABLE);
        ranges.register(&mut self.code, handler, throwable);
        if self.code.is_reachable() {
            self.suite(orelse)?;
        }
        if self.code.is_reachable() {
            self.code.goto_(end);
        }

        self.code.bind_label_at(handler, 1);
        self.frame();
        self.helper(Helper::SetException);
        let exception = self.code.get_local();
        self.code.astore(exception);
        let mut catches_all = false;
        for (position, clause) in handlers.iter().enumerate() {
            self.set_line(clause.line);
            let next = match &clause.type_ {
                None if position + 1 < handlers.len() => {
                    return Err(CompileError::new(
                        ErrorKind::BareExceptNotLast,
                        "default 'except:' must be last",
                        clause.line,
                    ));
                }
                None => {
                    catches_all = true;
                    None
                }
                Some(type_) => {
                    let next = self.code.new_label();
                    self.code.aload(exception);
                    self.expr(type_)?;
                    self.helper(Helper::MatchException);
                    self.code.branch(Opcode::Ifeq, next);
                    Some(next)
                }
            };
            if let Some(name) = &clause.name {
                self.code.aload(exception);
                self.helper(Helper::ExceptionValue);
                self.set_top(name)?;
            }
            self.suite(&clause.body)?;
            if self.code.is_reachable() {
                self.code.goto_(end);
            }
            if let Some(next) = next {
                self.code.bind_label(next);
            }
        }
        if !catches_all {
            self.code.aload(exception);
            self.code.emit(Opcode::Athrow);
        }
        self.code.free_local(exception);
        self.bind_exit(end);
        Ok(())
    }

    pub(super) fn try_finally(&mut self, body: &'t [Stmt], finalbody: &'t [Stmt]) -> CompileResult<()> {
        match self.finally {
            FinallyLowering::Inline => self.try_finally_inline(body, finalbody),
            _ => self.try_finally_subroutine(body, finalbody),
        }
    }

    fn finally_clause(&mut self, finalbody: &'t [Stmt]) -> CompileResult<()> {
        self.blocks.push(Block::FinallyClause);
        self.suite(finalbody)?;
        self.blocks.pop();
        Ok(())
    }

    /// Guards `body` and returns its protected ranges and return slot.
    fn guarded_finally_body(
        &mut self,
        body: &'t [Stmt],
        finalbody: &'t [Stmt],
        exit: FinallyExit,
    ) -> CompileResult<(ProtectedRanges, Option<u16>)> {
        let ranges = ProtectedRanges::start(&mut self.code);
        self.blocks.push(Block::Finally {
            ranges,
            exit,
            body: finalbody,
            return_slot: None,
        });
        self.suite(body)?;
        let Some(Block::Finally {
            ranges, return_slot, ..
        }) = self.blocks.pop()
        else {
            unreachable!("block stack out of sync");
        };
        Ok((ranges, return_slot))
    }

    /// Stores the caught throwable and records the traceback; returns its slot.
    fn enter_finally_handler(&mut self, handler: Label) -> u16 {
        self.code.bind_label_at(handler, 1);
        let exception = self.code.get_local();
        self.code.astore(exception);
        self.code.aload(exception);
        self.frame();
        self.helper(Helper::AddTraceback);
        exception
    }

    fn try_finally_subroutine(&mut self, body: &'t [Stmt], finalbody: &'t [Stmt]) -> CompileResult<()> {
        let handler = self.code.new_label();
        let subroutine = self.code.new_label();
        let end = self.code.new_label();

        let (ranges, return_slot) =
            self.guarded_finally_body(body, finalbody, FinallyExit::Subroutine(subroutine))?;
        ranges.register(&mut self.code, handler, 0);
        if self.code.is_reachable() {
            self.code.jsr(subroutine);
            self.code.goto_(end);
        }

        let exception = self.enter_finally_handler(handler);
        self.code.jsr(subroutine);
        self.code.aload(exception);
        self.code.emit(Opcode::Athrow);

        self.code.bind_label(subroutine);
        let return_address = self.code.get_local();
        self.code.astore(return_address);
        self.finally_clause(finalbody)?;
        if self.code.is_reachable() {
            self.code.ret(return_address);
        }
        self.code.free_local(return_address);
        self.code.free_local(exception);
        if let Some(slot) = return_slot {
            self.code.free_local(slot);
        }
        self.bind_exit(end);
        Ok(())
    }

    fn try_finally_inline(&mut self, body: &'t [Stmt], finalbody: &'t [Stmt]) -> CompileResult<()> {
        let handler = self.code.new_label();
        let end = self.code.new_label();

        let (ranges, _) = self.guarded_finally_body(body, finalbody, FinallyExit::Inline)?;
        ranges.register(&mut self.code, handler, 0);
        if self.code.is_reachable() {
            self.finally_clause(finalbody)?;
            if self.code.is_reachable() {
                self.code.goto_(end);
            }
        }

        let exception = self.enter_finally_handler(handler);
        self.finally_clause(finalbody)?;
        if self.code.is_reachable() {
            self.code.aload(exception);
            self.code.emit(Opcode::Athrow);
        }
        self.code.free_local(exception);
        self.bind_exit(end);
        Ok(())
    }
}
