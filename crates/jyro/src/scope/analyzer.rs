//! The walk that builds a [`ScopeTable`].

use std::marker::PhantomData;

use ahash::AHashMap;

use super::{FUTURE_FEATURES, FUTURE_MODULE, Futures, ScopeInfo, ScopeKey, ScopeKind, ScopeTable, SymbolFlags};
use crate::{
    ast::{
        Arguments, ClassDef, Expr, ExprKind, FunctionDef, ImportNames, Lambda, Module, Param, Stmt, StmtKind, docstring,
    },
    error::{CompileError, CompileResult, ErrorKind},
    tracer::CompileTracer,
};

/// How an expression is being used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Load,
    /// Target of `=`.
    Assign,
    /// Target of `for`, `except` or a comprehension.
    Store,
    /// Target of an augmented assignment.
    AugStore,
    Delete,
}

impl Access {
    fn is_target(self) -> bool {
        self != Self::Load
    }
}

/// Analyzes every scope in `module`.
///
/// Scopes are cooked as they close and linked top-down once the walk is
/// done, so each [`ScopeInfo`] in the result is final.
pub fn analyze<'t>(module: &'t Module, tracer: &mut impl CompileTracer) -> CompileResult<ScopeTable<'t>> {
    let mut analyzer = ScopeAnalyzer {
        scopes: Vec::new(),
        parents: Vec::new(),
        by_node: AHashMap::new(),
        stack: Vec::new(),
        level: 0,
        func_level: 0,
        future_prefix: future_prefix(&module.body),
        futures: Futures::default(),
        tracer,
    };
    analyzer.begin_scope("?", ScopeKind::Top, 0, ScopeKey::of(module));
    analyzer.body(&module.body)?;
    analyzer.stack.pop();
    analyzer.link_closures();
    tracing::trace!(scopes = analyzer.scopes.len(), "scope analysis done");
    Ok(ScopeTable {
        scopes: analyzer.scopes,
        parents: analyzer.parents,
        by_node: analyzer.by_node,
        futures: analyzer.futures,
        _tree: PhantomData,
    })
}

/// The `from __future__` imports that open `body`, after its docstring.
fn future_prefix(body: &[Stmt]) -> &[Stmt] {
    let rest = &body[usize::from(docstring(body).is_some())..];
    let count = rest
        .iter()
        .take_while(|stmt| matches!(&stmt.kind, StmtKind::ImportFrom { module, .. } if module == FUTURE_MODULE))
        .count();
    &rest[..count]
}

struct ScopeAnalyzer<'a, T> {
    scopes: Vec<ScopeInfo>,
    parents: Vec<Option<usize>>,
    by_node: AHashMap<ScopeKey, usize>,
    /// Indices of the open scopes, innermost last.
    stack: Vec<usize>,
    level: u32,
    func_level: u32,
    /// Where future statements may appear.
    future_prefix: &'a [Stmt],
    futures: Futures,
    tracer: &'a mut T,
}

impl<T: CompileTracer> ScopeAnalyzer<'_, T> {
    fn current(&mut self) -> &mut ScopeInfo {
        let index = *self.stack.last().expect("no open scope");
        &mut self.scopes[index]
    }

    fn begin_scope(&mut self, name: &str, kind: ScopeKind, line: u32, key: ScopeKey) {
        if kind == ScopeKind::Function {
            self.func_level += 1;
        }
        let index = self.scopes.len();
        self.scopes
            .push(ScopeInfo::new(name, kind, self.level, self.func_level, line));
        self.parents.push(self.stack.last().copied());
        self.by_node.insert(key, index);
        self.stack.push(index);
        self.level += 1;
    }

    fn end_scope(&mut self) -> CompileResult<()> {
        let index = self.stack.pop().expect("unbalanced scope stack");
        let up = *self.stack.last().expect("nested scope outside the module");
        self.level -= 1;

        let (outer, inner) = self.scopes.split_at_mut(index);
        let scope = &mut inner[0];
        if scope.kind == ScopeKind::Function {
            self.func_level -= 1;
        }
        scope.cook(&mut outer[up]);
        check_dynamic_scope(scope)?;
        self.tracer
            .on_scope_cooked(&scope.name, &scope.names, &scope.cellvars, &scope.free_names());
        Ok(())
    }

    fn future_import(&mut self, stmt: &Stmt, names: &ImportNames) -> CompileResult<()> {
        if !self.future_prefix.iter().any(|leading| std::ptr::eq(leading, stmt)) {
            return Err(CompileError::syntax(
                "from __future__ imports must occur at the beginning of the file",
                stmt.line,
            ));
        }
        let ImportNames::Names(aliases) = names else {
            return Err(CompileError::syntax("future feature * is not defined", stmt.line));
        };
        for alias in aliases {
            match alias.name.as_str() {
                "division" => self.futures.division = true,
                feature if FUTURE_FEATURES.contains(&feature) => {}
                feature => {
                    return Err(CompileError::syntax(
                        format!("future feature {feature} is not defined"),
                        stmt.line,
                    ));
                }
            }
        }
        Ok(())
    }

    /// Resolves free names against their enclosing scope, parents first.
    fn link_closures(&mut self) {
        for index in 1..self.scopes.len() {
            let Some(up) = self.parents[index] else { continue };
            let (outer, inner) = self.scopes.split_at_mut(index);
            inner[0].link_closure(&outer[up]);
        }
    }

    // === Statements ===

    fn body(&mut self, body: &[Stmt]) -> CompileResult<()> {
        body.iter().try_for_each(|stmt| self.stmt(stmt))
    }

    fn stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match &stmt.kind {
            StmtKind::FunctionDef(def) => self.function_def(def, stmt.line),
            StmtKind::ClassDef(class) => self.class_def(class, stmt.line),
            StmtKind::Return(value) => self.opt_expr(value.as_ref()),
            StmtKind::Delete(targets) => targets
                .iter()
                .try_for_each(|target| self.expr(target, Access::Delete)),
            StmtKind::Assign { targets, value } => {
                self.expr(value, Access::Load)?;
                targets
                    .iter()
                    .try_for_each(|target| self.expr(target, Access::Assign))
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.expr(value, Access::Load)?;
                self.expr(target, Access::AugStore)
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                self.expr(target, Access::Store)?;
                self.expr(iter, Access::Load)?;
                self.body(body)?;
                self.body(orelse)
            }
            StmtKind::While { test, body, orelse } | StmtKind::If { test, body, orelse } => {
                self.expr(test, Access::Load)?;
                self.body(body)?;
                self.body(orelse)
            }
            StmtKind::Raise { type_, inst, tback } => {
                self.opt_expr(type_.as_ref())?;
                self.opt_expr(inst.as_ref())?;
                self.opt_expr(tback.as_ref())
            }
            StmtKind::TryExcept { body, handlers, orelse } => {
                self.body(body)?;
                for handler in handlers {
                    if let Some(name) = &handler.name {
                        self.expr(name, Access::Store)?;
                    }
                    self.opt_expr(handler.type_.as_ref())?;
                    self.body(&handler.body)?;
                }
                self.body(orelse)
            }
            StmtKind::TryFinally { body, finalbody } => {
                self.body(body)?;
                self.body(finalbody)
            }
            StmtKind::Assert { test, msg } => {
                self.expr(test, Access::Load)?;
                self.opt_expr(msg.as_ref())
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let bound = match &alias.asname {
                        Some(asname) => asname.as_str(),
                        None => alias.name.split('.').next().unwrap_or(&alias.name),
                    };
                    self.current().add_bound(bound, SymbolFlags::EMPTY);
                }
                Ok(())
            }
            StmtKind::ImportFrom { module, names } => {
                if module == FUTURE_MODULE {
                    self.future_import(stmt, names)?;
                }
                match names {
                    ImportNames::Star => self.current().from_import_star = true,
                    ImportNames::Names(aliases) => {
                        for alias in aliases {
                            let bound = alias.asname.as_deref().unwrap_or(&alias.name);
                            self.current().add_bound(bound, SymbolFlags::EMPTY);
                        }
                    }
                }
                Ok(())
            }
            StmtKind::Exec { body, globals, locals } => {
                let scope = self.current();
                scope.exec = true;
                if globals.is_none() {
                    scope.unqual_exec = true;
                }
                self.expr(body, Access::Load)?;
                self.opt_expr(globals.as_ref())?;
                self.opt_expr(locals.as_ref())
            }
            StmtKind::Global(names) => self.global(names, stmt.line),
            StmtKind::Expr(value) => self.expr(value, Access::Load),
            StmtKind::Pass | StmtKind::Break | StmtKind::Continue => Ok(()),
        }
    }

    fn global(&mut self, names: &[String], line: u32) -> CompileResult<()> {
        let scope = self.current();
        if scope.kind == ScopeKind::Top {
            return Ok(());
        }
        for name in names {
            let Some(previous) = scope.add_global(name) else {
                continue;
            };
            if previous.intersects(SymbolFlags::GLOBAL) {
                continue;
            }
            let (kind, what) = if previous.intersects(SymbolFlags::FROM_PARAM | SymbolFlags::FROM_ASSIGN) {
                (ErrorKind::LocalAndGlobal, "is local and global")
            } else if previous.contains(SymbolFlags::BOUND) {
                (ErrorKind::GlobalAfterAssignment, "declared global after assignment")
            } else {
                (ErrorKind::GlobalAfterUse, "declared global after use")
            };
            return Err(CompileError::new(kind, format!("name '{name}' {what}"), line));
        }
        Ok(())
    }

    fn function_def(&mut self, def: &FunctionDef, line: u32) -> CompileResult<()> {
        self.current().add_bound(&def.name, SymbolFlags::EMPTY);
        for decorator in &def.decorators {
            self.expr(decorator, Access::Load)?;
        }
        self.function_scope(&def.name, &def.args, line, ScopeKey::of(def), |this| this.body(&def.body))
    }

    fn lambda(&mut self, lambda: &Lambda, line: u32) -> CompileResult<()> {
        self.function_scope("<lambda>", &lambda.args, line, ScopeKey::of(lambda), |this| {
            this.expr(&lambda.body, Access::Load)
        })
    }

    /// Opens a function scope after visiting the defaults, registers the
    /// parameters, then walks the body.
    fn function_scope(
        &mut self,
        name: &str,
        args: &Arguments,
        line: u32,
        key: ScopeKey,
        body: impl FnOnce(&mut Self) -> CompileResult<()>,
    ) -> CompileResult<()> {
        for default in &args.defaults {
            self.expr(default, Access::Load)?;
        }
        self.begin_scope(name, ScopeKind::Function, line, key);

        let mut prologue = Vec::new();
        for (position, param) in args.args.iter().enumerate() {
            match param {
                Param::Name(name) => self.current().add_param(name),
                Param::Tuple(items) => {
                    let synthetic = format!("({position})");
                    self.current().add_param(&synthetic);
                    prologue.push(Stmt::assign(
                        tuple_target(items, line),
                        Expr::name(line, &synthetic),
                    ));
                }
            }
        }
        if let Some(vararg) = &args.vararg {
            let scope = self.current();
            scope.add_param(vararg);
            scope.varargs = true;
        }
        if let Some(kwarg) = &args.kwarg {
            let scope = self.current();
            scope.add_param(kwarg);
            scope.varkwargs = true;
        }
        for stmt in &prologue {
            self.stmt(stmt)?;
        }
        let scope = self.current();
        scope.prologue = prologue;
        scope.mark_from_param();

        body(self)?;
        self.end_scope()
    }

    fn class_def(&mut self, class: &ClassDef, line: u32) -> CompileResult<()> {
        self.current().add_bound(&class.name, SymbolFlags::EMPTY);
        for base in &class.bases {
            self.expr(base, Access::Load)?;
        }
        self.begin_scope(&class.name, ScopeKind::Class, line, ScopeKey::of(class));
        self.body(&class.body)?;
        self.end_scope()
    }

    // === Expressions ===

    fn opt_expr(&mut self, expr: Option<&Expr>) -> CompileResult<()> {
        expr.map_or(Ok(()), |expr| self.expr(expr, Access::Load))
    }

    fn exprs(&mut self, exprs: &[Expr]) -> CompileResult<()> {
        exprs.iter().try_for_each(|expr| self.expr(expr, Access::Load))
    }

    fn expr(&mut self, expr: &Expr, access: Access) -> CompileResult<()> {
        if access.is_target()
            && let Some(message) = illegal_target(&expr.kind, access)
        {
            return Err(CompileError::new(ErrorKind::IllegalTarget, message, expr.line));
        }
        match &expr.kind {
            ExprKind::Name(name) => {
                if access.is_target() && access != Access::Delete && name == "__debug__" {
                    return Err(CompileError::new(
                        ErrorKind::IllegalTarget,
                        "can not assign to __debug__",
                        expr.line,
                    ));
                }
                let scope = self.current();
                match access {
                    Access::Load => scope.add_used(name),
                    Access::Assign | Access::AugStore => scope.add_bound(name, SymbolFlags::FROM_ASSIGN),
                    Access::Store | Access::Delete => scope.add_bound(name, SymbolFlags::EMPTY),
                }
                Ok(())
            }
            ExprKind::Tuple(elts) | ExprKind::List(elts) => {
                elts.iter().try_for_each(|elt| self.expr(elt, access))
            }
            ExprKind::Attribute { value, .. } => self.expr(value, Access::Load),
            ExprKind::Subscript { value, slice } => {
                self.expr(value, Access::Load)?;
                self.expr(slice, Access::Load)
            }
            ExprKind::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.expr(part, Access::Load)?;
                }
                Ok(())
            }
            ExprKind::BoolOp { values, .. } => self.exprs(values),
            ExprKind::BinOp { left, right, .. } => {
                self.expr(left, Access::Load)?;
                self.expr(right, Access::Load)
            }
            ExprKind::UnaryOp { operand, .. } => self.expr(operand, Access::Load),
            ExprKind::Lambda(lambda) => self.lambda(lambda, expr.line),
            ExprKind::IfExp { test, body, orelse } => {
                self.expr(test, Access::Load)?;
                self.expr(body, Access::Load)?;
                self.expr(orelse, Access::Load)
            }
            ExprKind::Dict { keys, values } => {
                self.exprs(keys)?;
                self.exprs(values)
            }
            ExprKind::ListComp { elt, generators } => {
                for generator in generators {
                    self.expr(&generator.iter, Access::Load)?;
                    self.expr(&generator.target, Access::Store)?;
                    self.exprs(&generator.ifs)?;
                }
                self.expr(elt, Access::Load)
            }
            ExprKind::Compare { left, comparators, .. } => {
                self.expr(left, Access::Load)?;
                self.exprs(comparators)
            }
            ExprKind::Call {
                func,
                args,
                keywords,
                starargs,
                kwargs,
            } => {
                self.expr(func, Access::Load)?;
                self.exprs(args)?;
                for keyword in keywords {
                    self.expr(&keyword.value, Access::Load)?;
                }
                self.opt_expr(starargs.as_deref())?;
                self.opt_expr(kwargs.as_deref())
            }
            ExprKind::Num(_) | ExprKind::Str(_) | ExprKind::Constant(_) => Ok(()),
        }
    }
}

/// The message for a target that cannot be stored to, if `kind` is one.
fn illegal_target(kind: &ExprKind, access: Access) -> Option<&'static str> {
    Some(match kind {
        ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => return None,
        ExprKind::Tuple(_) if access == Access::AugStore => "augmented assign to tuple not possible",
        ExprKind::List(_) if access == Access::AugStore => "augmented assign to list not possible",
        ExprKind::Tuple(_) | ExprKind::List(_) => return None,
        ExprKind::Call { .. } => "can't assign to function call",
        ExprKind::Num(_) | ExprKind::Str(_) | ExprKind::Constant(_) | ExprKind::Dict { .. } => {
            "can't assign to literal"
        }
        ExprKind::Lambda(_) => "can't assign to lambda",
        ExprKind::ListComp { .. } => "can't assign to list comprehension",
        ExprKind::IfExp { .. } => "can't assign to conditional expression",
        ExprKind::Compare { .. } => "can't assign to comparison",
        ExprKind::BoolOp { .. } | ExprKind::BinOp { .. } | ExprKind::UnaryOp { .. } | ExprKind::Slice { .. } => {
            "can't assign to operator"
        }
    })
}

/// Target that unpacks a tuple parameter into its names.
fn tuple_target(items: &[Param], line: u32) -> Expr {
    let elts = items
        .iter()
        .map(|item| match item {
            Param::Name(name) => Expr::name(line, name),
            Param::Tuple(nested) => tuple_target(nested, line),
        })
        .collect();
    Expr::tuple(line, elts)
}

/// Rejects `exec` and `import *` in scopes whose names must resolve statically.
fn check_dynamic_scope(scope: &ScopeInfo) -> CompileResult<()> {
    if !(scope.unqual_exec || scope.from_import_star) {
        return Ok(());
    }
    let why = if !scope.inner_free.is_empty() {
        "because it contains a function with free variables"
    } else if scope.func_level > 1 && scope.some_free {
        "because it contains free variables"
    } else {
        return Ok(());
    };
    let name = &scope.name;
    let illegal = match (scope.unqual_exec, scope.from_import_star) {
        (true, true) => format!("function '{name}' uses import * and bare exec, which are illegal"),
        (true, false) => format!("unqualified exec is not allowed in function '{name}'"),
        _ => format!("import * is not allowed in function '{name}'"),
    };
    Err(CompileError::new(ErrorKind::DynamicScope, format!("{illegal} {why}"), scope.line))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{options::Mode, parse::parse, tracer::NoopTracer};

    fn parse_module(source: &str) -> Module {
        parse(source, "<test>", Mode::Exec).unwrap()
    }

    fn analyze_err(source: &str) -> CompileError {
        let module = parse_module(source);
        analyze(&module, &mut NoopTracer).unwrap_err()
    }

    fn first_def(module: &Module) -> &FunctionDef {
        module
            .body
            .iter()
            .find_map(|stmt| match &stmt.kind {
                StmtKind::FunctionDef(def) => Some(def),
                _ => None,
            })
            .unwrap()
    }

    fn nested_def(def: &FunctionDef) -> &FunctionDef {
        def.body
            .iter()
            .find_map(|stmt| match &stmt.kind {
                StmtKind::FunctionDef(def) => Some(def),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn params_then_locals() {
        let module = parse_module("def f(a, b=1, *rest, **kw):\n    x = a\n    return x + y\n");
        let table = analyze(&module, &mut NoopTracer).unwrap();
        let scope = table.function(first_def(&module)).unwrap();
        assert_eq!(scope.names, vec!["a", "b", "rest", "kw", "x"]);
        assert_eq!(scope.argcount, 4);
        assert!(scope.varargs && scope.varkwargs);
        assert_eq!(scope.symbol("x").unwrap().locals_index, Some(4));
        // y is neither bound here nor anywhere enclosing
        assert!(!scope.flags("y").intersects(SymbolFlags::FREE | SymbolFlags::BOUND));
        assert!(scope.optimize_globals());
    }

    #[test]
    fn closure_cells_and_free_vars() {
        let module = parse_module("def f(a):\n    b = 1\n    def g():\n        return a + b\n    return g\n");
        let table = analyze(&module, &mut NoopTracer).unwrap();
        let outer_def = first_def(&module);
        let outer = table.function(outer_def).unwrap();
        let inner = table.function(nested_def(outer_def)).unwrap();

        assert_eq!(outer.cellvars, vec!["a", "b"]);
        assert_eq!(outer.paramcells, vec!["a"]);
        assert_eq!(outer.npurecell, 1);
        assert_eq!(outer.names, vec!["a", "g", "b"]);
        assert!(outer.flags("b").contains(SymbolFlags::CELL));

        assert_eq!(inner.freevars, vec!["a", "b"]);
        assert_eq!(inner.symbol("a").unwrap().env_index, Some(0));
        assert_eq!(inner.symbol("b").unwrap().env_index, Some(1));
        assert!(table.parent_of(inner).is_some_and(|parent| parent.name == "f"));
    }

    #[test]
    fn free_through_intermediate_scope() {
        let source = "def f():\n    x = 1\n    def g():\n        def h():\n            return x\n        return h\n    return g\n";
        let module = parse_module(source);
        let table = analyze(&module, &mut NoopTracer).unwrap();
        let f = first_def(&module);
        let g = nested_def(f);
        let h = nested_def(g);
        assert_eq!(table.function(f).unwrap().cellvars, vec!["x"]);
        assert_eq!(table.function(g).unwrap().freevars, vec!["x"]);
        assert_eq!(table.function(h).unwrap().freevars, vec!["x"]);
    }

    #[test]
    fn module_level_names_fall_back_to_globals() {
        let module = parse_module("x = 1\ndef f():\n    return x\n");
        let table = analyze(&module, &mut NoopTracer).unwrap();
        let scope = table.function(first_def(&module)).unwrap();
        assert!(scope.freevars.is_empty());
        assert_eq!(scope.flags("x"), SymbolFlags::EMPTY);
    }

    #[test]
    fn global_errors() {
        let err = analyze_err("def f():\n    x = 1\n    global x\n");
        assert_eq!(err.kind, ErrorKind::LocalAndGlobal);
        assert_eq!(err.message, "name 'x' is local and global");
        assert_eq!(err.line, 3);

        let err = analyze_err("def f(x):\n    global x\n");
        assert_eq!(err.kind, ErrorKind::LocalAndGlobal);

        let err = analyze_err("def f():\n    print(x)\n    global x\n");
        assert_eq!(err.kind, ErrorKind::GlobalAfterUse);
        assert_eq!(err.message, "name 'x' declared global after use");

        let err = analyze_err("def f():\n    for x in y: pass\n    global x\n");
        assert_eq!(err.kind, ErrorKind::GlobalAfterAssignment);
    }

    #[test]
    fn global_declarations() {
        let module = parse_module("global x\ndef f():\n    global x\n    global x\n    x = 1\n");
        let table = analyze(&module, &mut NoopTracer).unwrap();
        let scope = table.function(first_def(&module)).unwrap();
        assert!(scope.flags("x").contains(SymbolFlags::NGLOBAL));
        assert!(scope.names.is_empty());
        assert!(table.module().symbol("x").is_none_or(|entry| !entry.flags.intersects(SymbolFlags::GLOBAL)));
    }

    fn assign_to(target: Expr) -> Module {
        Module::new(vec![Stmt::assign(target, Expr::name(1, "x"))])
    }

    #[test]
    fn illegal_targets() {
        let call = Expr::call(Expr::name(1, "f"), vec![]);
        let sum = Expr::binop(Expr::name(1, "a"), crate::ast::Operator::Add, Expr::name(1, "b"));
        let compare = Expr::new(
            1,
            ExprKind::Compare {
                left: Box::new(Expr::name(1, "a")),
                ops: vec![crate::ast::CmpOp::Lt],
                comparators: vec![Expr::name(1, "b")],
            },
        );
        for (target, message) in [
            (call, "can't assign to function call"),
            (sum, "can't assign to operator"),
            (Expr::int(1, 1), "can't assign to literal"),
            (compare, "can't assign to comparison"),
            (Expr::name(1, "__debug__"), "can not assign to __debug__"),
        ] {
            let module = assign_to(target);
            let err = analyze(&module, &mut NoopTracer).unwrap_err();
            assert_eq!((err.kind, err.message.as_str()), (ErrorKind::IllegalTarget, message));
        }
        // nested inside a tuple target
        let module = assign_to(Expr::tuple(1, vec![Expr::name(1, "a"), Expr::int(1, 2)]));
        let err = analyze(&module, &mut NoopTracer).unwrap_err();
        assert_eq!(err.message, "can't assign to literal");
    }

    #[test]
    fn augmented_tuple_target() {
        let module = Module::new(vec![Stmt::new(
            1,
            StmtKind::AugAssign {
                target: Expr::tuple(1, vec![Expr::name(1, "a"), Expr::name(1, "b")]),
                op: crate::ast::Operator::Add,
                value: Expr::int(1, 1),
            },
        )]);
        let err = analyze(&module, &mut NoopTracer).unwrap_err();
        assert_eq!(err.message, "augmented assign to tuple not possible");
    }

    #[test]
    fn tuple_parameters_unpack_in_prologue() {
        let module = Module::new(vec![Stmt::def(
            1,
            "f",
            Arguments {
                args: vec![
                    Param::Name("a".to_owned()),
                    Param::Tuple(vec![Param::Name("b".to_owned()), Param::Name("c".to_owned())]),
                ],
                ..Arguments::default()
            },
            vec![Stmt::ret(2, Some(Expr::name(2, "c")))],
        )]);
        let table = analyze(&module, &mut NoopTracer).unwrap();
        let scope = table.function(first_def(&module)).unwrap();
        assert_eq!(scope.names, vec!["a", "(1)", "b", "c"]);
        assert_eq!(scope.argcount, 2);
        assert_eq!(scope.prologue.len(), 1);
        assert!(scope.flags("b").contains(SymbolFlags::FROM_PARAM | SymbolFlags::BOUND));
    }

    #[test]
    fn dynamic_scope_errors() {
        let err = analyze_err("def f():\n    x = 1\n    exec('y')\n    def g():\n        return x\n");
        assert_eq!(err.kind, ErrorKind::DynamicScope);
        assert_eq!(
            err.message,
            "unqualified exec is not allowed in function 'f' because it contains a function with free variables"
        );

        let module = Module::new(vec![Stmt::def(
            1,
            "f",
            Arguments::default(),
            vec![
                Stmt::assign(Expr::name(2, "x"), Expr::int(2, 1)),
                Stmt::def(
                    3,
                    "g",
                    Arguments::default(),
                    vec![
                        Stmt::new(
                            4,
                            StmtKind::ImportFrom {
                                module: "os".to_owned(),
                                names: ImportNames::Star,
                            },
                        ),
                        Stmt::ret(5, Some(Expr::name(5, "x"))),
                    ],
                ),
            ],
        )]);
        let err = analyze(&module, &mut NoopTracer).unwrap_err();
        assert_eq!(
            err.message,
            "import * is not allowed in function 'g' because it contains free variables"
        );
        assert_eq!(err.line, 3);

        // qualified exec is fine
        let module = parse_module("def f():\n    x = 1\n    exec('y', {})\n    def g():\n        return x\n");
        assert!(analyze(&module, &mut NoopTracer).is_ok());
    }

    #[test]
    fn class_scope() {
        let module = parse_module("def f():\n    v = 1\n    class C:\n        w = v\n        global z\n");
        let table = analyze(&module, &mut NoopTracer).unwrap();
        let class_scope = table.iter().find(|scope| scope.kind == ScopeKind::Class).unwrap();
        assert!(!class_scope.fast_locals());
        assert!(class_scope.flags("z").contains(SymbolFlags::CLASS_GLOBAL));
        assert_eq!(class_scope.freevars, vec!["v"]);
        assert_eq!(table.function(first_def(&module)).unwrap().cellvars, vec!["v"]);
    }

    #[test]
    fn tracer_sees_cooked_scopes() {
        let module = parse_module("def f(a):\n    def g():\n        return a\n    return g\n");
        let mut tracer = crate::tracer::RecordingTracer::new();
        analyze(&module, &mut tracer).unwrap();
        let names: Vec<_> = tracer
            .events()
            .iter()
            .filter_map(|event| match event {
                crate::tracer::CompileEvent::ScopeCooked { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["g", "f"]);
    }

    #[test]
    fn future_division() {
        let module = parse_module("\"\"\"Doc.\"\"\"\nfrom __future__ import nested_scopes\nfrom __future__ import division\nx = 1 / 2\n");
        let table = analyze(&module, &mut NoopTracer).unwrap();
        assert_eq!(table.futures(), Futures { division: true });

        let module = parse_module("from __future__ import generators\n");
        assert_eq!(analyze(&module, &mut NoopTracer).unwrap().futures(), Futures::default());
    }

    #[test]
    fn future_errors() {
        let err = analyze_err("x = 1\nfrom __future__ import division\n");
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.message, "from __future__ imports must occur at the beginning of the file");
        assert_eq!(err.line, 2);

        let err = analyze_err("def f():\n    from __future__ import division\n");
        assert_eq!(err.line, 2);

        let err = analyze_err("from __future__ import braces\n");
        assert_eq!(err.message, "future feature braces is not defined");
    }
}
