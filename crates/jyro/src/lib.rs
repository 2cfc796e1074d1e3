#![doc = include_str!("../../../README.md")]

pub mod ast;
pub mod classfile;
mod codegen;
mod error;
pub mod module;
pub mod options;
pub mod parse;
pub mod proxy;
pub mod runtime;
pub mod scope;
pub mod tracer;

pub use crate::{
    codegen::MAX_STRING_CONSTANT,
    error::{CompileError, CompileResult, ErrorKind},
    module::{CodeUnit, CompiledModule, ModuleBuilder, PyConstant},
    options::{CompileOptions, FinallyLowering, Iteration, Mode, ProxyOptions},
    proxy::{NativeClass, ProxyClass, ProxyMaker, make_proxy},
    tracer::{CompileEvent, CompileTracer, LogTracer, NoopTracer, RecordingTracer},
};

/// Compiles a syntax tree into the module class `class_name`.
///
/// `filename` names the source for `__file__` and the `SourceFile` attribute.
/// `from __future__ import division` turns on true division for this module
/// regardless of [`CompileOptions::true_division`].
pub fn compile(
    tree: &ast::Module,
    class_name: &str,
    filename: Option<&str>,
    options: &CompileOptions,
) -> CompileResult<CompiledModule> {
    compile_with_tracer(tree, class_name, filename, options, NoopTracer)
}

/// Like [`compile`], reporting progress to `tracer`.
pub fn compile_with_tracer<T: CompileTracer>(
    tree: &ast::Module,
    class_name: &str,
    filename: Option<&str>,
    options: &CompileOptions,
    mut tracer: T,
) -> CompileResult<CompiledModule> {
    let scopes = scope::analyze(tree, &mut tracer)?;
    let options = options
        .clone()
        .true_division(options.true_division || scopes.futures().division);
    let mut module = ModuleBuilder::new(class_name, filename, &options, &mut tracer);
    codegen::compile_module(&mut module, tree, &scopes)?;
    module.finish()
}

/// Parses `source` in `options.mode` and compiles it.
pub fn compile_source(
    source: &str,
    class_name: &str,
    filename: &str,
    options: &CompileOptions,
    tracer: impl CompileTracer,
) -> CompileResult<CompiledModule> {
    let tree = parse::parse(source, filename, options.mode)?;
    compile_with_tracer(&tree, class_name, Some(filename), options, tracer)
}
