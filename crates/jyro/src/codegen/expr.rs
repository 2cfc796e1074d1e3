//! Expressions and the GET/SET/DEL forms of assignable targets.

use super::CodeCompiler;
use crate::{
    ast::{BoolOp, CmpOp, Comprehension, Constant, Expr, ExprKind, Keyword, Number, Operator},
    classfile::Opcode,
    error::{CompileError, CompileResult, ErrorKind},
    module::PyConstant,
    runtime::{CallShape, Helper, InvokeShape, PY_DICTIONARY, PY_LIST, PY_SLICE, PY_TUPLE},
    tracer::CompileTracer,
};

/// Most positional arguments passed to `__call__` without an array.
const MAX_DIRECT_CALL_ARGS: usize = 4;
/// Most positional arguments passed to `invoke` without an array.
const MAX_DIRECT_INVOKE_ARGS: usize = 2;

impl<'t, T: CompileTracer> CodeCompiler<'_, 't, T> {
    /// Pushes the value of `expr`.
    pub(super) fn expr(&mut self, expr: &'t Expr) -> CompileResult<()> {
        match &expr.kind {
            ExprKind::Num(number) => {
                self.constant(match number {
                    Number::Int(value) => PyConstant::Int(*value),
                    Number::Long(digits) => PyConstant::Long(digits.clone()),
                    Number::Float(value) => PyConstant::float(*value),
                    Number::Imaginary(value) => PyConstant::imaginary(*value),
                });
            }
            ExprKind::Str(text) => self.string_constant(text, expr.line)?,
            ExprKind::Constant(constant) => self.helper(match constant {
                Constant::None => Helper::None,
                Constant::True => Helper::True,
                Constant::False => Helper::False,
                Constant::Ellipsis => Helper::Ellipsis,
            }),
            ExprKind::Name(id) => self.load_name(id),
            ExprKind::Attribute { value, attr } => {
                self.expr(value)?;
                let attr = self.mangle(attr).into_owned();
                self.ldc_str(&attr);
                self.helper(Helper::GetAttr);
            }
            ExprKind::Subscript { value, slice } => {
                self.expr(value)?;
                if let ExprKind::Slice { lower, upper, step } = &slice.kind {
                    self.slice_parts([lower, upper, step])?;
                    self.helper(Helper::GetSlice);
                } else {
                    self.expr(slice)?;
                    self.helper(Helper::GetItem);
                }
            }
            ExprKind::Slice { lower, upper, step } => {
                self.new_object(PY_SLICE);
                for part in [lower, upper, step] {
                    match part {
                        Some(part) => self.expr(part)?,
                        None => self.helper(Helper::None),
                    }
                }
                self.helper(Helper::NewSlice);
            }
            ExprKind::BinOp { left, op, right } => {
                self.expr(left)?;
                self.expr(right)?;
                self.helper(Helper::Binary(*op));
            }
            ExprKind::UnaryOp { op, operand } => {
                self.expr(operand)?;
                self.helper(Helper::Unary(*op));
            }
            ExprKind::BoolOp { op, values } => self.bool_op(*op, values)?,
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => self.compare(left, ops, comparators)?,
            ExprKind::IfExp { test, body, orelse } => {
                let otherwise = self.code.new_label();
                let end = self.code.new_label();
                self.condition(test)?;
                self.code.branch(Opcode::Ifeq, otherwise);
                self.expr(body)?;
                self.code.goto_(end);
                self.code.bind_label(otherwise);
                self.expr(orelse)?;
                self.code.bind_label(end);
            }
            ExprKind::Tuple(elts) => self.sequence(PY_TUPLE, Helper::NewTuple, elts)?,
            ExprKind::List(elts) => self.sequence(PY_LIST, Helper::NewList, elts)?,
            ExprKind::Dict { keys, values } => {
                let items: Vec<&Expr> = keys.iter().zip(values).flat_map(|(key, value)| [key, value]).collect();
                self.new_object(PY_DICTIONARY);
                self.make_array(&items)?;
                self.helper(Helper::NewDictionary);
            }
            ExprKind::ListComp { elt, generators } => self.list_comp(elt, generators)?,
            ExprKind::Call {
                func,
                args,
                keywords,
                starargs,
                kwargs,
            } => self.call(func, args, keywords, starargs.as_deref(), kwargs.as_deref())?,
            ExprKind::Lambda(lambda) => self.lambda(lambda, expr.line)?,
        }
        Ok(())
    }

    /// Pushes the truth value of `test` as an int.
    pub(super) fn condition(&mut self, test: &'t Expr) -> CompileResult<()> {
        self.expr(test)?;
        self.helper(Helper::Nonzero);
        Ok(())
    }

    pub(super) fn new_object(&mut self, class: &str) {
        let class = self.module.pool().class(class);
        self.code.new_(class);
        self.code.emit(Opcode::Dup);
    }

    fn sequence(&mut self, class: &str, init: Helper, elts: &'t [Expr]) -> CompileResult<()> {
        let items: Vec<&Expr> = elts.iter().collect();
        self.new_object(class);
        self.make_array(&items)?;
        self.helper(init);
        Ok(())
    }

    /// Pushes the three `__getslice__` operands, null for missing parts.
    fn slice_parts(&mut self, parts: [&'t Option<Box<Expr>>; 3]) -> CompileResult<()> {
        for part in parts {
            match part {
                Some(part) => self.expr(part)?,
                None => self.code.emit(Opcode::AconstNull),
            }
        }
        Ok(())
    }

    fn bool_op(&mut self, op: BoolOp, values: &'t [Expr]) -> CompileResult<()> {
        let Some((last, rest)) = values.split_last() else {
            return Err(CompileError::syntax("empty boolean operation", 0));
        };
        let end = self.code.new_label();
        let exit = match op {
            BoolOp::And => Opcode::Ifeq,
            BoolOp::Or => Opcode::Ifne,
        };
        for value in rest {
            self.expr(value)?;
            self.code.emit(Opcode::Dup);
            self.helper(Helper::Nonzero);
            self.code.branch(exit, end);
            self.code.emit(Opcode::Pop);
        }
        self.expr(last)?;
        self.code.bind_label(end);
        Ok(())
    }

    /// `a < b < c`: each middle operand is kept in a temporary so it is
    /// evaluated once; the chain stops at the first false result.
    fn compare(&mut self, left: &'t Expr, ops: &[CmpOp], comparators: &'t [Expr]) -> CompileResult<()> {
        self.expr(left)?;
        let pairs: Vec<(CmpOp, &'t Expr)> = ops.iter().copied().zip(comparators).collect();
        let Some((&(last_op, last), rest)) = pairs.split_last() else {
            return Err(CompileError::syntax("comparison without operators", left.line));
        };
        if rest.is_empty() {
            self.expr(last)?;
            self.helper(Helper::Compare(last_op));
            return Ok(());
        }
        let end = self.code.new_label();
        let middle = self.code.get_local();
        for &(op, comparator) in rest {
            self.expr(comparator)?;
            self.code.emit(Opcode::Dup);
            self.code.astore(middle);
            self.helper(Helper::Compare(op));
            self.code.emit(Opcode::Dup);
            self.helper(Helper::Nonzero);
            self.code.branch(Opcode::Ifeq, end);
            self.code.emit(Opcode::Pop);
            self.code.aload(middle);
        }
        self.expr(last)?;
        self.helper(Helper::Compare(last_op));
        self.code.bind_label(end);
        self.code.emit(Opcode::AconstNull);
        self.code.astore(middle);
        self.code.free_local(middle);
        Ok(())
    }

    fn call(
        &mut self,
        func: &'t Expr,
        args: &'t [Expr],
        keywords: &'t [Keyword],
        starargs: Option<&'t Expr>,
        kwargs: Option<&'t Expr>,
    ) -> CompileResult<()> {
        let plain = keywords.is_empty() && starargs.is_none() && kwargs.is_none();
        if plain && let ExprKind::Attribute { value, attr } = &func.kind {
            self.expr(value)?;
            let attr = self.mangle(attr).into_owned();
            self.ldc_str(&attr);
            if args.len() <= MAX_DIRECT_INVOKE_ARGS {
                for arg in args {
                    self.expr(arg)?;
                }
                self.helper(Helper::Invoke(InvokeShape::Positional(args.len() as u8)));
            } else {
                self.make_array(&args.iter().collect::<Vec<_>>())?;
                self.helper(Helper::Invoke(InvokeShape::Array));
            }
            return Ok(());
        }

        self.expr(func)?;
        if plain {
            if args.len() <= MAX_DIRECT_CALL_ARGS {
                for arg in args {
                    self.expr(arg)?;
                }
                self.helper(Helper::Call(CallShape::Positional(args.len() as u8)));
            } else {
                self.make_array(&args.iter().collect::<Vec<_>>())?;
                self.helper(Helper::Call(CallShape::Array));
            }
            return Ok(());
        }

        let values: Vec<&Expr> = args.iter().chain(keywords.iter().map(|keyword| &keyword.value)).collect();
        let names: Vec<&str> = keywords.iter().map(|keyword| keyword.arg.as_str()).collect();
        self.make_array(&values)?;
        self.make_strings(&names);
        if starargs.is_none() && kwargs.is_none() {
            self.helper(Helper::Call(CallShape::Keywords));
        } else {
            for extra in [starargs, kwargs] {
                match extra {
                    Some(extra) => self.expr(extra)?,
                    None => self.code.emit(Opcode::AconstNull),
                }
            }
            self.helper(Helper::Call(CallShape::Extra));
        }
        Ok(())
    }

    /// `[elt for target in iter if cond ...]`: the list's bound `append` is
    /// kept in a temporary while the generators run.
    fn list_comp(&mut self, elt: &'t Expr, generators: &'t [Comprehension]) -> CompileResult<()> {
        self.new_object(PY_LIST);
        self.helper(Helper::NewEmptyList);
        self.code.emit(Opcode::Dup);
        self.ldc_str("append");
        self.helper(Helper::GetAttr);
        let append = self.code.get_local();
        self.code.astore(append);
        self.comprehension(elt, generators, append)?;
        self.code.emit(Opcode::AconstNull);
        self.code.astore(append);
        self.code.free_local(append);
        Ok(())
    }

    fn comprehension(&mut self, elt: &'t Expr, generators: &'t [Comprehension], append: u16) -> CompileResult<()> {
        let Some((generator, inner)) = generators.split_first() else {
            self.code.aload(append);
            self.expr(elt)?;
            self.helper(Helper::Call(CallShape::Positional(1)));
            self.code.emit(Opcode::Pop);
            return Ok(());
        };
        let iteration = self.begin_iteration(&generator.iter)?;
        self.set(&generator.target, iteration.item)?;
        for test in &generator.ifs {
            self.condition(test)?;
            self.code.branch(Opcode::Ifeq, iteration.next);
        }
        self.comprehension(elt, inner, append)?;
        self.end_iteration(iteration);
        Ok(())
    }

    // === Targets ===

    /// Stores the value held in local `value` to `target`.
    pub(super) fn set(&mut self, target: &'t Expr, value: u16) -> CompileResult<()> {
        match &target.kind {
            ExprKind::Name(id) => self.store_name(id, value),
            ExprKind::Attribute { value: object, attr } => {
                self.expr(object)?;
                let attr = self.mangle(attr).into_owned();
                self.ldc_str(&attr);
                self.code.aload(value);
                self.helper(Helper::SetAttr);
            }
            ExprKind::Subscript { value: object, slice } => {
                self.expr(object)?;
                if let ExprKind::Slice { lower, upper, step } = &slice.kind {
                    self.slice_parts([lower, upper, step])?;
                    self.code.aload(value);
                    self.helper(Helper::SetSlice);
                } else {
                    self.expr(slice)?;
                    self.code.aload(value);
                    self.helper(Helper::SetItem);
                }
            }
            ExprKind::Tuple(elts) | ExprKind::List(elts) => {
                self.code.aload(value);
                self.iconst(elts.len() as i32);
                self.helper(Helper::UnpackSequence);
                let items = self.code.get_local();
                self.code.astore(items);
                let item = self.code.get_local();
                for (index, elt) in elts.iter().enumerate() {
                    self.code.aload(items);
                    self.iconst(index as i32);
                    self.code.emit(Opcode::Aaload);
                    self.code.astore(item);
                    self.set(elt, item)?;
                }
                self.code.free_local(item);
                self.code.free_local(items);
            }
            other => return Err(illegal_target(other.name(), "assign to", target.line)),
        }
        Ok(())
    }

    /// Pops the top of the stack into `target`.
    pub(super) fn set_top(&mut self, target: &'t Expr) -> CompileResult<()> {
        let temp = self.code.get_local();
        self.code.astore(temp);
        let result = self.set(target, temp);
        self.code.free_local(temp);
        result
    }

    pub(super) fn delete(&mut self, target: &'t Expr) -> CompileResult<()> {
        match &target.kind {
            ExprKind::Name(id) => self.delete_name(id, target.line)?,
            ExprKind::Attribute { value, attr } => {
                self.expr(value)?;
                let attr = self.mangle(attr).into_owned();
                self.ldc_str(&attr);
                self.helper(Helper::DelAttr);
            }
            ExprKind::Subscript { value, slice } => {
                self.expr(value)?;
                if let ExprKind::Slice { lower, upper, step } = &slice.kind {
                    self.slice_parts([lower, upper, step])?;
                    self.helper(Helper::DelSlice);
                } else {
                    self.expr(slice)?;
                    self.helper(Helper::DelItem);
                }
            }
            ExprKind::Tuple(elts) | ExprKind::List(elts) => {
                for elt in elts {
                    self.delete(elt)?;
                }
            }
            other => return Err(illegal_target(other.name(), "delete", target.line)),
        }
        Ok(())
    }

    /// `target op= value`: the parts of the target are evaluated once.
    pub(super) fn aug_assign(&mut self, target: &'t Expr, op: Operator, value: &'t Expr) -> CompileResult<()> {
        let result = self.code.get_local();
        match &target.kind {
            ExprKind::Name(id) => {
                self.load_name(id);
                self.in_place(op, value, result)?;
                self.store_name(id, result);
            }
            ExprKind::Attribute { value: object, attr } => {
                let attr = self.mangle(attr).into_owned();
                let name = self.module.pool().string(&attr);
                let holder = self.hold(object)?;
                self.code.aload(holder);
                self.code.ldc(name);
                self.helper(Helper::GetAttr);
                self.in_place(op, value, result)?;
                self.code.aload(holder);
                self.code.ldc(name);
                self.code.aload(result);
                self.helper(Helper::SetAttr);
                self.code.free_local(holder);
            }
            ExprKind::Subscript { value: object, slice } => {
                let holder = self.hold(object)?;
                if let ExprKind::Slice { lower, upper, step } = &slice.kind {
                    let mut parts = Vec::with_capacity(3);
                    for part in [lower, upper, step] {
                        parts.push(self.hold_optional(part.as_deref())?);
                    }
                    self.code.aload(holder);
                    self.load_all(&parts);
                    self.helper(Helper::GetSlice);
                    self.in_place(op, value, result)?;
                    self.code.aload(holder);
                    self.load_all(&parts);
                    self.code.aload(result);
                    self.helper(Helper::SetSlice);
                    for part in parts {
                        self.code.free_local(part);
                    }
                } else {
                    let index = self.hold(slice)?;
                    self.code.aload(holder);
                    self.code.aload(index);
                    self.helper(Helper::GetItem);
                    self.in_place(op, value, result)?;
                    self.code.aload(holder);
                    self.code.aload(index);
                    self.code.aload(result);
                    self.helper(Helper::SetItem);
                    self.code.free_local(index);
                }
                self.code.free_local(holder);
            }
            other => return Err(illegal_target(other.name(), "augment", target.line)),
        }
        self.code.free_local(result);
        Ok(())
    }

    /// With the current value on the stack, applies `op= value` and stores the
    /// result in `result`.
    fn in_place(&mut self, op: Operator, value: &'t Expr, result: u16) -> CompileResult<()> {
        self.expr(value)?;
        self.helper(Helper::InPlace(op));
        self.code.astore(result);
        Ok(())
    }

    /// Evaluates `expr` into a fresh temporary.
    fn hold(&mut self, expr: &'t Expr) -> CompileResult<u16> {
        self.expr(expr)?;
        let slot = self.code.get_local();
        self.code.astore(slot);
        Ok(slot)
    }

    fn hold_optional(&mut self, expr: Option<&'t Expr>) -> CompileResult<u16> {
        match expr {
            Some(expr) => self.hold(expr),
            None => {
                self.code.emit(Opcode::AconstNull);
                let slot = self.code.get_local();
                self.code.astore(slot);
                Ok(slot)
            }
        }
    }

    fn load_all(&mut self, slots: &[u16]) {
        for &slot in slots {
            self.code.aload(slot);
        }
    }
}

fn illegal_target(kind: &str, what: &str, line: u32) -> CompileError {
    CompileError::new(ErrorKind::IllegalTarget, format!("can't {what} {kind}"), line)
}
