//! Function, lambda and class definitions.

use super::{CodeCompiler, UnitBody};
use crate::{
    ast::{self, ClassDef, Expr, FunctionDef, Lambda},
    error::CompileResult,
    runtime::{CallShape, Helper, PY_FUNCTION},
    scope::ScopeInfo,
    tracer::CompileTracer,
};

impl<'t, T: CompileTracer> CodeCompiler<'_, 't, T> {
    pub(super) fn function_def(&mut self, def: &'t FunctionDef, line: u32) -> CompileResult<()> {
        for decorator in &def.decorators {
            self.expr(decorator)?;
        }
        let scope = self
            .scopes
            .function(def)
            .expect("every function has an analyzed scope");

        self.new_object(PY_FUNCTION);
        self.frame();
        self.helper(Helper::FrameGlobals);
        self.defaults(&def.args.defaults)?;
        let id = self.compile_unit(&def.name, line, scope, self.class_name, UnitBody::Function(&def.body))?;
        self.code_object(id);
        match ast::docstring(&def.body) {
            Some(doc) => self.string_constant(doc, line)?,
            None => self.helper(Helper::None),
        }
        if scope.has_closure() {
            self.make_closure(scope);
            self.helper(Helper::NewFunctionClosure);
        } else {
            self.helper(Helper::NewFunction);
        }

        // Applied innermost first: the last decorator is nearest the function.
        for _ in &def.decorators {
            self.helper(Helper::Call(CallShape::Positional(1)));
        }
        self.store_top_name(&def.name);
        Ok(())
    }

    pub(super) fn lambda(&mut self, lambda: &'t Lambda, line: u32) -> CompileResult<()> {
        let scope = self
            .scopes
            .lambda(lambda)
            .expect("every lambda has an analyzed scope");
        self.new_object(PY_FUNCTION);
        self.frame();
        self.helper(Helper::FrameGlobals);
        self.defaults(&lambda.args.defaults)?;
        let id = self.compile_unit("<lambda>", line, scope, self.class_name, UnitBody::Lambda(&lambda.body))?;
        self.code_object(id);
        if scope.has_closure() {
            self.make_closure(scope);
            self.helper(Helper::NewLambdaClosure);
        } else {
            self.helper(Helper::NewLambda);
        }
        Ok(())
    }

    pub(super) fn class_def(&mut self, class: &'t ClassDef, line: u32) -> CompileResult<()> {
        let scope: &'t ScopeInfo = self
            .scopes
            .class(class)
            .expect("every class has an analyzed scope");
        self.ldc_str(&class.name);
        let bases: Vec<&'t Expr> = class.bases.iter().collect();
        self.make_array(&bases)?;
        let id = self.compile_unit(&class.name, line, scope, Some(class.name.as_str()), UnitBody::Class(&class.body))?;
        self.code_object(id);
        match ast::docstring(&class.body) {
            Some(doc) => self.string_constant(doc, line)?,
            None => self.helper(Helper::None),
        }
        if scope.has_closure() {
            self.make_closure(scope);
            self.helper(Helper::MakeClassClosure);
        } else {
            self.helper(Helper::MakeClass);
        }
        self.store_top_name(&class.name);
        Ok(())
    }

    fn defaults(&mut self, defaults: &'t [Expr]) -> CompileResult<()> {
        let defaults: Vec<&'t Expr> = defaults.iter().collect();
        self.make_array(&defaults)
    }

    /// Pushes the `PyCode` of unit `id`.
    fn code_object(&mut self, id: u32) {
        let field = self.module.code_field(id);
        self.code.getstatic(field);
    }
}
