//! Bytecode generation for code units.
//!
//! One [`CodeCompiler`] emits the method body of one code unit: the module,
//! a function, a lambda or a class body. Nested units are compiled
//! recursively as their definitions are reached, each into its own method of
//! the same module class.
//!
//! Every statement starts and ends at stack height 0. The frame is always in
//! local slot 1 and temporaries are allocated from [`Code`] above it.

mod defs;
mod expr;
mod flow;
mod stmt;

use std::borrow::Cow;

use ahash::AHashMap;

use crate::{
    ast::{Expr, Module, Stmt, StmtKind},
    classfile::{Code, Label, Opcode, ProtectedRanges},
    error::{CompileError, CompileResult, ErrorKind},
    module::{ModuleBuilder, PyConstant},
    options::{FinallyLowering, Iteration, Mode},
    runtime::Helper,
    scope::{ScopeInfo, ScopeKey, ScopeTable, SymbolEntry, SymbolFlags},
    tracer::CompileTracer,
};

/// Longest string literal accepted, in encoded bytes.
pub const MAX_STRING_CONSTANT: usize = 32767;

/// Compiles `tree` into `module`; the module body becomes unit 0.
pub fn compile_module<'t, T: CompileTracer>(
    module: &mut ModuleBuilder<T>,
    tree: &'t Module,
    scopes: &'t ScopeTable<'t>,
) -> CompileResult<()> {
    let scope = scopes.module();
    let (id, code) = module.add_unit("?", 0, scope);
    let mut compiler = CodeCompiler::new(module, scopes, scope, code, None);
    compiler.print_results = tree.mode == Mode::Single;
    compiler.unit_body(UnitBody::Module(tree))?;
    let CodeCompiler { code, .. } = compiler;
    module.finish_unit(id, code)
}

/// What a code unit's method evaluates.
#[derive(Debug, Clone, Copy)]
enum UnitBody<'t> {
    Module(&'t Module),
    Function(&'t [Stmt]),
    Lambda(&'t Expr),
    Class(&'t [Stmt]),
}

/// How a `finally` clause is reached from exits inside its `try` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinallyExit {
    /// `jsr` to the single copy at this label.
    Subroutine(Label),
    /// Compile a fresh copy at the exit.
    Inline,
}

/// An enclosing construct that early exits must respect.
#[derive(Debug)]
enum Block<'t> {
    Loop {
        continue_to: Label,
        break_to: Label,
    },
    /// The body of a `try`/`except`.
    Guarded(ProtectedRanges),
    /// The body of a `try`/`finally`.
    Finally {
        ranges: ProtectedRanges,
        exit: FinallyExit,
        body: &'t [Stmt],
        /// Holds a return value across `jsr`, allocated on first use.
        return_slot: Option<u16>,
    },
    /// Inside a `finally` clause.
    FinallyClause,
}

pub(crate) struct CodeCompiler<'a, 't, T> {
    module: &'a mut ModuleBuilder<T>,
    scopes: &'t ScopeTable<'t>,
    scope: &'t ScopeInfo,
    code: Code,
    /// Enclosing class, for private-name mangling.
    class_name: Option<&'t str>,
    print_results: bool,
    iteration: Iteration,
    finally: FinallyLowering,
    blocks: Vec<Block<'t>>,
    /// Nested units already compiled, reused when a `finally` body is inlined again.
    units: AHashMap<ScopeKey, u32>,
}

impl<'a, 't, T: CompileTracer> CodeCompiler<'a, 't, T> {
    fn new(
        module: &'a mut ModuleBuilder<T>,
        scopes: &'t ScopeTable<'t>,
        scope: &'t ScopeInfo,
        code: Code,
        class_name: Option<&'t str>,
    ) -> Self {
        let iteration = module.options().iteration;
        let finally = module.options().effective_finally();
        Self {
            module,
            scopes,
            scope,
            code,
            class_name,
            print_results: false,
            iteration,
            finally,
            blocks: Vec::new(),
            units: AHashMap::new(),
        }
    }

    /// Compiles a nested unit into its own method and returns its id.
    fn compile_unit(
        &mut self,
        name: &str,
        line: u32,
        scope: &'t ScopeInfo,
        class_name: Option<&'t str>,
        body: UnitBody<'t>,
    ) -> CompileResult<u32> {
        let key = ScopeKey::of(scope);
        if let Some(&id) = self.units.get(&key) {
            return Ok(id);
        }
        let (id, code) = self.module.add_unit(name, line, scope);
        let mut inner = CodeCompiler::new(&mut *self.module, self.scopes, scope, code, class_name);
        inner.unit_body(body)?;
        let CodeCompiler { code, .. } = inner;
        self.module.finish_unit(id, code)?;
        self.units.insert(key, id);
        Ok(id)
    }

    fn unit_body(&mut self, body: UnitBody<'t>) -> CompileResult<()> {
        let scope = self.scope;
        for name in &scope.paramcells {
            let entry = self.entry(name);
            self.frame();
            self.iconst(i32::from(local_slot(name, entry)));
            self.iconst(i32::from(env_slot(name, entry)));
            self.helper(Helper::ToCell);
        }
        self.suite(&scope.prologue)?;

        match body {
            UnitBody::Module(tree) if tree.mode == Mode::Eval => {
                let [
                    Stmt {
                        kind: StmtKind::Expr(value),
                        line,
                    },
                ] = tree.body.as_slice()
                else {
                    return Err(CompileError::syntax("eval input must be a single expression", 0));
                };
                self.set_line(*line);
                self.expr(value)?;
                self.code.emit(Opcode::Areturn);
            }
            UnitBody::Module(tree) => {
                if let Some(doc) = tree.docstring() {
                    self.store_constant("__doc__", doc, 0)?;
                }
                if tree.mode == Mode::Exec
                    && self.module.options().set_file
                    && let Some(filename) = self.module.filename().map(str::to_owned)
                {
                    self.store_constant("__file__", &filename, 0)?;
                }
                self.suite(&tree.body)?;
                self.return_none();
            }
            UnitBody::Function(body) => {
                self.suite(body)?;
                self.return_none();
            }
            UnitBody::Lambda(value) => {
                self.set_line(value.line);
                self.expr(value)?;
                self.code.emit(Opcode::Areturn);
            }
            UnitBody::Class(body) => {
                if let Some(doc) = crate::ast::docstring(body) {
                    self.store_constant("__doc__", doc, scope.line)?;
                }
                self.suite(body)?;
                if self.code.is_reachable() {
                    self.frame();
                    self.helper(Helper::GetLocals);
                    self.code.emit(Opcode::Areturn);
                }
            }
        }
        debug_assert!(self.blocks.is_empty(), "unbalanced block stack");
        Ok(())
    }

    fn return_none(&mut self) {
        if self.code.is_reachable() {
            self.helper(Helper::None);
            self.code.emit(Opcode::Areturn);
        }
    }

    /// Compiles statements in order, stopping after one that cannot fall through.
    fn suite(&mut self, body: &'t [Stmt]) -> CompileResult<()> {
        for stmt in body {
            self.stmt(stmt)?;
            if !self.code.is_reachable() {
                break;
            }
        }
        Ok(())
    }

    // === Emission shorthands ===

    fn frame(&mut self) {
        self.code.aload(1);
    }

    fn helper(&mut self, helper: Helper) {
        self.module.emit(helper, &mut self.code);
    }

    fn iconst(&mut self, value: i32) {
        self.code.iconst(value, self.module.pool());
    }

    /// Pushes a Java string.
    fn ldc_str(&mut self, text: &str) {
        let entry = self.module.pool().string(text);
        self.code.ldc(entry);
    }

    fn constant(&mut self, value: PyConstant) {
        let field = self.module.constant(value);
        self.code.getstatic(field);
    }

    /// Pushes a string literal as a module constant.
    fn string_constant(&mut self, text: &str, line: u32) -> CompileResult<()> {
        if crate::classfile::pool::modified_utf8_len(text) > MAX_STRING_CONSTANT {
            return Err(CompileError::new(
                ErrorKind::StringTooLarge,
                format!("string constant too large (more than {MAX_STRING_CONSTANT} bytes)"),
                line,
            ));
        }
        self.constant(PyConstant::Str(text.to_owned()));
        Ok(())
    }

    /// Binds `name` to a string constant.
    fn store_constant(&mut self, name: &str, text: &str, line: u32) -> CompileResult<()> {
        self.string_constant(text, line)?;
        self.store_top_name(name);
        Ok(())
    }

    fn set_line(&mut self, line: u32) {
        if line == 0 || !self.module.options().line_numbers {
            return;
        }
        self.code.set_line(line);
        self.frame();
        self.iconst(line as i32);
        self.helper(Helper::FrameSetLine);
    }

    /// Pushes a `PyObject[]` of the values of `items`.
    fn make_array(&mut self, items: &[&'t Expr]) -> CompileResult<()> {
        if items.is_empty() {
            self.helper(Helper::EmptyObjects);
            return Ok(());
        }
        self.iconst(items.len() as i32);
        let class = self.module.pool().class(crate::runtime::PY_OBJECT);
        self.code.anewarray(class);
        for (index, &item) in items.iter().enumerate() {
            self.code.emit(Opcode::Dup);
            self.iconst(index as i32);
            self.expr(item)?;
            self.code.emit(Opcode::Aastore);
        }
        Ok(())
    }

    fn make_strings(&mut self, values: &[impl AsRef<str>]) {
        crate::module::push_strings(&mut self.code, self.module.pool(), values);
    }

    // === Names ===

    /// Applies private-name mangling inside a class.
    fn mangle<'n>(&self, name: &'n str) -> Cow<'n, str> {
        match self.class_name {
            Some(class) if name.starts_with("__") && !name.ends_with("__") => Cow::Owned(format!("_{class}{name}")),
            _ => Cow::Borrowed(name),
        }
    }

    /// The name as looked up in this scope: unmangled for fast locals.
    fn scoped_name<'n>(&self, name: &'n str) -> Cow<'n, str> {
        if self.scope.fast_locals() {
            Cow::Borrowed(name)
        } else {
            self.mangle(name)
        }
    }

    fn entry(&self, name: &str) -> SymbolEntry {
        self.scope
            .symbol(name)
            .copied()
            .unwrap_or_else(|| panic!("no symbol '{name}' in scope '{}'", self.scope.name))
    }

    fn load_name(&mut self, id: &str) {
        let name = self.scoped_name(id);
        let fast = self.scope.fast_locals();
        self.frame();
        if let Some(entry) = self.scope.symbol(&name).copied() {
            let flags = entry.flags;
            if flags.intersects(SymbolFlags::GLOBAL)
                || (self.scope.optimize_globals()
                    && !flags.intersects(SymbolFlags::BOUND | SymbolFlags::CELL | SymbolFlags::FREE))
            {
                self.ldc_str(&name);
                self.helper(Helper::GetGlobal);
                return;
            }
            if fast && flags.contains(SymbolFlags::CELL) {
                self.iconst(i32::from(env_slot(&name, entry)));
                self.helper(Helper::GetDeref);
                return;
            }
            if fast && flags.contains(SymbolFlags::BOUND) {
                self.iconst(i32::from(local_slot(&name, entry)));
                self.helper(Helper::GetLocal);
                return;
            }
            if flags.contains(SymbolFlags::FREE) && !flags.contains(SymbolFlags::BOUND) {
                self.iconst(i32::from(env_slot(&name, entry)));
                self.helper(Helper::GetDeref);
                return;
            }
        }
        self.ldc_str(&name);
        self.helper(Helper::GetName);
    }

    /// Stores the value held in local `value` to `id`.
    fn store_name(&mut self, id: &str, value: u16) {
        let name = self.scoped_name(id);
        let flags = self.scope.flags(&name);
        self.frame();
        if flags.intersects(SymbolFlags::GLOBAL) {
            self.ldc_str(&name);
            self.code.aload(value);
            self.helper(Helper::SetGlobal);
        } else if !self.scope.fast_locals() {
            self.ldc_str(&name);
            self.code.aload(value);
            self.helper(Helper::SetName);
        } else {
            let entry = self.entry(&name);
            if flags.contains(SymbolFlags::CELL) {
                self.iconst(i32::from(env_slot(&name, entry)));
                self.code.aload(value);
                self.helper(Helper::SetDeref);
            } else {
                self.iconst(i32::from(local_slot(&name, entry)));
                self.code.aload(value);
                self.helper(Helper::SetLocal);
            }
        }
    }

    /// Pops the top of the stack into `id`.
    fn store_top_name(&mut self, id: &str) {
        let temp = self.code.get_local();
        self.code.astore(temp);
        self.store_name(id, temp);
        self.code.free_local(temp);
    }

    fn delete_name(&mut self, id: &str, line: u32) -> CompileResult<()> {
        let name = self.scoped_name(id);
        let flags = self.scope.flags(&name);
        if flags.intersects(SymbolFlags::GLOBAL) {
            self.frame();
            self.ldc_str(&name);
            self.helper(Helper::DelGlobal);
        } else if !self.scope.fast_locals() {
            self.frame();
            self.ldc_str(&name);
            self.helper(Helper::DelName);
        } else {
            if flags.contains(SymbolFlags::CELL) {
                return Err(CompileError::new(
                    ErrorKind::DeleteCell,
                    format!("can not delete variable '{name}' referenced in nested scope"),
                    line,
                ));
            }
            let entry = self.entry(&name);
            self.frame();
            self.iconst(i32::from(local_slot(&name, entry)));
            self.helper(Helper::DelLocal);
        }
        Ok(())
    }

    /// Pushes a `PyObject[]` of this scope's cells for the free names of `inner`.
    fn make_closure(&mut self, inner: &ScopeInfo) {
        self.iconst(inner.freevars.len() as i32);
        let class = self.module.pool().class(crate::runtime::PY_OBJECT);
        self.code.anewarray(class);
        for (index, name) in inner.freevars.iter().enumerate() {
            let entry = self.entry(name);
            self.code.emit(Opcode::Dup);
            self.iconst(index as i32);
            self.frame();
            self.iconst(i32::from(env_slot(name, entry)));
            self.helper(Helper::GetClosure);
            self.code.emit(Opcode::Aastore);
        }
    }
}

fn local_slot(name: &str, entry: SymbolEntry) -> u16 {
    entry
        .locals_index
        .unwrap_or_else(|| panic!("'{name}' has no local slot"))
}

fn env_slot(name: &str, entry: SymbolEntry) -> u16 {
    entry
        .env_index
        .unwrap_or_else(|| panic!("'{name}' has no cell or free slot"))
}
