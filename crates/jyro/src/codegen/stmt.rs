//! Simple statements.

use super::CodeCompiler;
use crate::{
    ast::{Alias, Expr, ImportNames, Stmt, StmtKind},
    classfile::Opcode,
    error::CompileResult,
    runtime::Helper,
    tracer::CompileTracer,
};

impl<'t, T: CompileTracer> CodeCompiler<'_, 't, T> {
    pub(super) fn stmt(&mut self, stmt: &'t Stmt) -> CompileResult<()> {
        self.set_line(stmt.line);
        match &stmt.kind {
            StmtKind::Expr(value) => {
                self.expr(value)?;
                if self.print_results {
                    self.helper(Helper::PrintResult);
                } else {
                    self.code.emit(Opcode::Pop);
                }
            }
            StmtKind::Assign { targets, value } => {
                self.expr(value)?;
                let temp = self.code.get_local();
                self.code.astore(temp);
                for target in targets {
                    self.set(target, temp)?;
                }
                self.code.emit(Opcode::AconstNull);
                self.code.astore(temp);
                self.code.free_local(temp);
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
            StmtKind::Pass | StmtKind::Global(_) => {}
            StmtKind::Return(value) => self.return_(value.as_ref(), stmt.line)?,
            StmtKind::Break => self.break_(stmt.line)?,
            StmtKind::Continue => self.continue_(stmt.line)?,
            StmtKind::If { test, body, orelse } => self.if_(test, body, orelse)?,
            StmtKind::While { test, body, orelse } => self.while_(test, body, orelse)?,
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => self.for_(target, iter, body, orelse)?,
            StmtKind::TryExcept { body, handlers, orelse } => self.try_except(body, handlers, orelse)?,
            StmtKind::TryFinally { body, finalbody } => self.try_finally(body, finalbody)?,
            StmtKind::Raise { type_, inst, tback } => {
                let operands: Vec<&Expr> = [type_, inst, tback]
                    .into_iter()
                    .map_while(Option::as_ref)
                    .collect();
                for &operand in &operands {
                    self.expr(operand)?;
                }
                self.helper(Helper::MakeException(operands.len() as u8));
                self.code.emit(Opcode::Athrow);
            }
            StmtKind::Assert { test, msg } => self.assert(test, msg.as_ref())?,
            StmtKind::Import(aliases) => self.import(aliases),
            StmtKind::ImportFrom { module, names } => self.import_from(module, names),
            StmtKind::Exec { body, globals, locals } => {
                self.expr(body)?;
                for namespace in [globals, locals] {
                    match namespace {
                        Some(namespace) => self.expr(namespace)?,
                        None => self.code.emit(Opcode::AconstNull),
                    }
                }
                self.helper(Helper::Exec);
            }
            StmtKind::FunctionDef(def) => self.function_def(def, stmt.line)?,
            StmtKind::ClassDef(class) => self.class_def(class, stmt.line)?,
        }
        Ok(())
    }

    fn assert(&mut self, test: &'t Expr, msg: Option<&'t Expr>) -> CompileResult<()> {
        let end = self.code.new_label();
        self.frame();
        self.ldc_str("__debug__");
        self.helper(Helper::GetGlobal);
        self.helper(Helper::Nonzero);
        self.code.branch(Opcode::Ifeq, end);
        self.condition(test)?;
        self.code.branch(Opcode::Ifne, end);
        self.helper(Helper::AssertionError);
        match msg {
            Some(msg) => {
                self.expr(msg)?;
                self.helper(Helper::MakeException(2));
            }
            None => self.helper(Helper::MakeException(1)),
        }
        self.code.emit(Opcode::Athrow);
        self.code.bind_label(end);
        Ok(())
    }

    fn import(&mut self, aliases: &[Alias]) {
        for alias in aliases {
            self.ldc_str(&alias.name);
            self.frame();
            let bound = match &alias.asname {
                Some(asname) => {
                    self.helper(Helper::ImportOneAs);
                    asname.as_str()
                }
                None => {
                    self.helper(Helper::ImportOne);
                    alias.name.split('.').next().unwrap_or(&alias.name)
                }
            };
            self.store_top_name(bound);
        }
    }

    fn import_from(&mut self, module: &str, names: &ImportNames) {
        self.ldc_str(module);
        match names {
            ImportNames::Star => {
                self.frame();
                self.helper(Helper::ImportAll);
            }
            ImportNames::Names(aliases) => {
                let imported: Vec<&str> = aliases.iter().map(|alias| alias.name.as_str()).collect();
                self.make_strings(&imported);
                self.frame();
                self.helper(Helper::ImportFrom);
                let values = self.code.get_local();
                self.code.astore(values);
                let value = self.code.get_local();
                for (index, alias) in aliases.iter().enumerate() {
                    self.code.aload(values);
                    self.iconst(index as i32);
                    self.code.emit(Opcode::Aaload);
                    self.code.astore(value);
                    self.store_name(alias.asname.as_deref().unwrap_or(&alias.name), value);
                }
                self.code.free_local(value);
                self.code.free_local(values);
            }
        }
    }
}
