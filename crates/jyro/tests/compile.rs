//! End-to-end compilation: source in, verified class file out.
//!
//! Every fixture is read back with the class-file reader and replayed by the
//! stack verifier before any assertion about its contents.

use jyro::{
    CompileEvent, CompileOptions, CompiledModule, ErrorKind, FinallyLowering, Iteration, NoopTracer, RecordingTracer,
    ast::{ExceptHandler, Expr, Module, Stmt, StmtKind},
    classfile::{
        ClassVersion, Opcode, PoolEntry,
        disasm::{Disassembly, Operand, decode},
        reader::{ParsedClass, parse_class},
        verify::check_class,
    },
    compile, compile_source, compile_with_tracer,
    module::PyConstant,
    options::Mode,
};
use pretty_assertions::assert_eq;

fn compile_ok(source: &str, options: &CompileOptions) -> (CompiledModule, ParsedClass) {
    let module = compile_source(source, "test_module", "test_module.py", options, NoopTracer)
        .unwrap_or_else(|err| panic!("compile failed: {err}"));
    let class = parse_class(&module.to_bytes().unwrap()).unwrap();
    if let Err(err) = check_class(&class) {
        panic!("{err}\n{}", Disassembly(&class));
    }
    (module, class)
}

fn plain() -> CompileOptions {
    CompileOptions::default().line_numbers(false)
}

fn instructions(class: &ParsedClass, method: &str) -> Vec<jyro::classfile::disasm::Instruction> {
    let member = class
        .methods_named(method)
        .next()
        .unwrap_or_else(|| panic!("no method {method}"));
    decode(&member.code.as_ref().unwrap().code).unwrap()
}

fn opcodes(class: &ParsedClass, method: &str) -> Vec<Opcode> {
    instructions(class, method).into_iter().map(|ins| ins.op).collect()
}

/// Names of the fields and methods a method refers to, in order.
fn members(class: &ParsedClass, method: &str) -> Vec<String> {
    instructions(class, method)
        .into_iter()
        .filter_map(|ins| match ins.operand {
            Operand::Pool(index) | Operand::Interface { index, .. } => class.member_ref(index).ok(),
            _ => None,
        })
        .map(|(_, name, _)| name.to_owned())
        .collect()
}

fn has_utf8(class: &ParsedClass, text: &str) -> bool {
    class
        .pool
        .iter()
        .any(|entry| matches!(entry, Some(PoolEntry::Utf8(value)) if value == text))
}

/// How many times `method` pushes the string `text`.
fn string_loads(class: &ParsedClass, method: &str, text: &str) -> usize {
    instructions(class, method)
        .into_iter()
        .filter_map(|ins| match (ins.op, ins.operand) {
            (Opcode::Ldc | Opcode::LdcW, Operand::Pool(index)) => match class.entry(index) {
                Some(PoolEntry::String(utf8)) => class.utf8(*utf8).ok(),
                _ => None,
            },
            _ => None,
        })
        .filter(|loaded| *loaded == text)
        .count()
}

fn count(ops: &[Opcode], op: Opcode) -> usize {
    ops.iter().filter(|&&candidate| candidate == op).count()
}

fn unit_names(module: &CompiledModule) -> Vec<&str> {
    module.units.iter().map(|unit| unit.name.as_str()).collect()
}

// === Units and frames ===

#[test]
fn function_with_default() {
    let (module, class) = compile_ok("def f(a, b=1):\n    return a + b\n", &plain());
    assert_eq!(unit_names(&module), vec!["?", "f"]);
    assert_eq!(module.units[1].method, "f$1");
    assert_eq!(module.units[1].argcount, 2);
    assert_eq!(module.units[1].names, vec!["a".to_owned(), "b".to_owned()]);
    assert!(module.constants.iter().any(|(_, value)| *value == PyConstant::Int(1)));

    assert_eq!(members(&class, "f$1"), vec!["getlocal", "getlocal", "_add"]);
    assert_eq!(opcodes(&class, "f$1").last(), Some(&Opcode::Areturn));
    assert!(class.references("org/python/core/PyFunction", "<init>"));
}

#[test]
fn closures_share_cells() {
    let source = "def outer():\n    x = 1\n    def inner():\n        return x\n    return inner\n";
    let (module, class) = compile_ok(source, &plain());
    assert_eq!(unit_names(&module), vec!["?", "outer", "inner"]);
    assert_eq!(module.units[1].cellvars, vec!["x".to_owned()]);
    assert_eq!(module.units[2].freevars, vec!["x".to_owned()]);

    let outer = members(&class, "outer$1");
    assert!(outer.contains(&"setderef".to_owned()));
    assert!(outer.contains(&"getclosure".to_owned()));
    assert_eq!(members(&class, "inner$2"), vec!["getderef"]);
}

#[test]
fn class_bodies_mangle_private_names() {
    let source = "class C(object):\n    \"\"\"Doc.\"\"\"\n    def m(self):\n        self.__x = 1\n        return self.__y__\n";
    let (module, class) = compile_ok(source, &plain());
    assert_eq!(unit_names(&module), vec!["?", "C", "m"]);
    assert!(module.units[1].names.is_empty());
    assert!(has_utf8(&class, "_C__x"));
    assert!(has_utf8(&class, "__y__"));
    assert!(!has_utf8(&class, "_C__y__"));
    assert!(members(&class, "C$1").contains(&"getf_locals".to_owned()));
    assert!(class.references("org/python/core/Py", "makeClass"));
}

#[test]
fn decorators_and_lambdas() {
    let source = "@trace\ndef f(a, b=[]):\n    return lambda y=a: y\n";
    let (module, class) = compile_ok(source, &plain());
    assert_eq!(unit_names(&module), vec!["?", "f", "<lambda>"]);
    assert_eq!(module.units[2].method, "f$2");
    assert!(members(&class, "f$0").contains(&"__call__".to_owned()));
}

#[test]
fn comprehensions_and_calls() {
    let source = "squares = [x * x for x in range(10) if x % 2]\n\
                  pairs = [(a, b) for a in 'ab' for b in (1, 2)]\n\
                  obj.method(1, key=2, *rest, **extra)\n\
                  d = {'k': squares[1:2], 'j': pairs[::2]}\n";
    let (_, class) = compile_ok(source, &plain());
    assert!(has_utf8(&class, "append"));
    assert!(class.references("org/python/core/PyObject", "__finditem__"));
    assert!(class.references("org/python/core/PyDictionary", "<init>"));
}

#[test]
fn source_file_and_line_numbers() {
    let (module, class) = compile_ok("x = 1\ny = x\n", &CompileOptions::default());
    assert_eq!(class.source_file.as_deref(), Some("test_module.py"));
    assert!(members(&class, "f$0").contains(&"setline".to_owned()));
    let file = module
        .constants
        .iter()
        .any(|(_, value)| *value == PyConstant::Str("test_module.py".into()));
    assert!(file);
    let method = class.methods_named("f$0").next().unwrap();
    assert!(method.code.as_ref().unwrap().line_numbers.is_some());
}

#[test]
fn entry_point_when_requested() {
    let (_, class) = compile_ok("pass\n", &plain().emit_main(true));
    assert!(class.method("main", "([Ljava/lang/String;)V").is_some());
    let (_, class) = compile_ok("pass\n", &plain());
    assert!(class.method("main", "([Ljava/lang/String;)V").is_none());
}

#[test]
fn eval_and_single_modes() {
    let (_, class) = compile_ok("a + 1", &plain().mode(Mode::Eval));
    assert_eq!(members(&class, "f$0"), vec!["getname", "_0", "_add"]);
    assert_eq!(opcodes(&class, "f$0").last(), Some(&Opcode::Areturn));

    let (_, class) = compile_ok("1 + 2\n", &plain().mode(Mode::Single));
    assert!(members(&class, "f$0").contains(&"printResult".to_owned()));
}

#[test]
fn compilation_is_deterministic() {
    let source = "import os.path\nfrom sys import argv as args\n\
                  def f(n):\n    total = 0\n    for i in range(n):\n        total += i\n    return total\n";
    let (first, _) = compile_ok(source, &CompileOptions::default());
    let (second, _) = compile_ok(source, &CompileOptions::default());
    assert_eq!(first.to_bytes().unwrap(), second.to_bytes().unwrap());
}

#[test]
fn tracer_sees_every_unit() {
    let tree = jyro::parse::parse("def f():\n    pass\nclass C:\n    pass\n", "t.py", Mode::Exec).unwrap();
    let mut tracer = RecordingTracer::new();
    let module = compile_with_tracer(&tree, "t", Some("t.py"), &CompileOptions::default(), &mut tracer).unwrap();
    let emitted = tracer
        .events()
        .iter()
        .filter(|event| matches!(event, CompileEvent::UnitEmitted { .. }))
        .count();
    assert_eq!(emitted, module.units.len());
}

// === Exceptions and early exits ===

#[test]
fn try_except_dispatch() {
    let source = "try:\n    raise E('m')\nexcept E as e:\n    handle(e)\n";
    let (_, class) = compile_ok(source, &plain());
    let called = members(&class, "f$0");
    for expected in ["makeException", "setException", "matchException", "value"] {
        assert!(called.contains(&expected.to_owned()), "{expected} missing from {called:?}");
    }
    let method = class.methods_named("f$0").next().unwrap();
    assert_eq!(method.code.as_ref().unwrap().exception_table.len(), 1);
    assert_eq!(count(&opcodes(&class, "f$0"), Opcode::Athrow), 2);

    let source = "try:\n    raise E('m')\nexcept E as e:\n    handle(e)\nexcept:\n    pass\n";
    let (_, class) = compile_ok(source, &plain());
    assert_eq!(count(&opcodes(&class, "f$0"), Opcode::Athrow), 1);
}

const EXITS: &str = "\
def f(items):
    for item in items:
        try:
            if item:
                break
            if not item:
                continue
            try:
                return item
            except ValueError:
                pass
        finally:
            log(item)
    return None
";

#[test]
fn finally_as_subroutine() {
    let (_, class) = compile_ok(EXITS, &plain().finally(FinallyLowering::Subroutine));
    let ops = opcodes(&class, "f$1");
    // Normal exit, handler, break, continue and return.
    assert_eq!(count(&ops, Opcode::Jsr), 5);
    assert_eq!(count(&ops, Opcode::Ret), 1);
    assert_eq!(string_loads(&class, "f$1", "log"), 1);
    let traceback = members(&class, "f$1").iter().filter(|name| *name == "addTraceback").count();
    assert_eq!(traceback, 1);
}

#[test]
fn finally_inlined() {
    let (_, class) = compile_ok(EXITS, &plain().finally(FinallyLowering::Inline));
    let ops = opcodes(&class, "f$1");
    assert_eq!(count(&ops, Opcode::Jsr), 0);
    assert_eq!(count(&ops, Opcode::Ret), 0);
    // Normal exit, handler, break, continue and return each get a copy.
    assert_eq!(string_loads(&class, "f$1", "log"), 5);
    let method = class.methods_named("f$1").next().unwrap();
    assert!(method.code.as_ref().unwrap().exception_table.len() > 2);
}

#[test]
fn finally_follows_class_version() {
    let modern = plain().class_version(ClassVersion::new(51, 0));
    let (_, class) = compile_ok(EXITS, &modern);
    assert_eq!(count(&opcodes(&class, "f$1"), Opcode::Jsr), 0);
    let (_, class) = compile_ok(EXITS, &plain());
    assert!(count(&opcodes(&class, "f$1"), Opcode::Jsr) > 0);
}

#[test]
fn inlined_finally_reuses_nested_units() {
    let source = "\
def f(s):
    for x in s:
        try:
            if x:
                break
            if not x:
                continue
            return x
        finally:
            def h():
                pass
";
    for lowering in [FinallyLowering::Subroutine, FinallyLowering::Inline] {
        let mut tracer = RecordingTracer::new();
        let module = compile_source(source, "m", "m.py", &plain().finally(lowering), &mut tracer).unwrap();
        assert_eq!(unit_names(&module), vec!["?", "f", "h"], "{lowering}");
        let emitted = tracer
            .events()
            .iter()
            .filter(|event| matches!(event, CompileEvent::UnitEmitted { .. }))
            .count();
        assert_eq!(emitted, 3, "{lowering}");
        let class = parse_class(&module.to_bytes().unwrap()).unwrap();
        check_class(&class).unwrap();
    }
}

#[test]
fn iteration_protocols() {
    let source = "for x in xs:\n    print(x)\nelse:\n    done()\n";
    let (_, class) = compile_ok(source, &plain().iteration(Iteration::Indexed));
    let called = members(&class, "f$0");
    assert!(called.contains(&"__finditem__".to_owned()));
    assert!(!called.contains(&"__iter__".to_owned()));

    let (_, class) = compile_ok(source, &plain().iteration(Iteration::Iterator));
    let called = members(&class, "f$0");
    assert!(called.contains(&"__iter__".to_owned()));
    assert!(called.contains(&"__iternext__".to_owned()));
    assert!(!called.contains(&"__finditem__".to_owned()));
}

#[test]
fn while_else_and_nested_loops() {
    let source = "\
i = 0
while i < 10:
    j = 0
    while True:
        j += 1
        if j > i:
            break
    if i == 5:
        continue
    i += 1
else:
    i = -1
";
    compile_ok(source, &plain());
}

#[test]
fn future_division() {
    let (_, class) = compile_ok("x = a / b\n", &plain());
    assert!(members(&class, "f$0").contains(&"_div".to_owned()));

    let source = "\"\"\"Doc.\"\"\"\nfrom __future__ import division\nx = a / b\nx /= 2\n";
    let (_, class) = compile_ok(source, &plain());
    let called = members(&class, "f$0");
    assert!(called.contains(&"_truediv".to_owned()));
    assert!(called.contains(&"__itruediv__".to_owned()));
    assert!(!called.contains(&"_div".to_owned()));
    assert!(called.contains(&"importFrom".to_owned()));
}

// === Errors ===

#[test]
fn misplaced_future_import() {
    let source = "import os\nfrom __future__ import division\n";
    let err = compile_source(source, "m", "m.py", &CompileOptions::default(), NoopTracer).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Syntax);
    assert_eq!(err.message, "from __future__ imports must occur at the beginning of the file");
    assert_eq!(err.line, 2);
}

#[test]
fn oversized_method_is_rejected() {
    let source = "x = y\n".repeat(10_000);
    let err = compile_source(&source, "m", "m.py", &plain(), NoopTracer).unwrap_err();
    assert_eq!(err.kind, ErrorKind::CodeTooLarge);
}

#[test]
fn constant_pool_overflow_is_rejected() {
    // Each distinct global name costs a Utf8 and a String entry.
    let mut source = String::new();
    for function in 0..32 {
        source.push_str(&format!("def f{function}():\n"));
        for name in 0..1100 {
            source.push_str(&format!("    g{function}_{name}\n"));
        }
    }
    let err = compile_source(&source, "m", "m.py", &plain(), NoopTracer).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TooManyConstants);
}

fn compile_tree(body: Vec<Stmt>) -> jyro::CompileError {
    compile(&Module::new(body), "m", None, &CompileOptions::default()).unwrap_err()
}

#[test]
fn early_exits_outside_their_construct() {
    let err = compile_tree(vec![Stmt::new(3, StmtKind::Break)]);
    assert_eq!((err.kind, err.message.as_str(), err.line), (ErrorKind::OutsideLoop, "'break' outside loop", 3));

    let err = compile_tree(vec![Stmt::new(1, StmtKind::Continue)]);
    assert_eq!(err.message, "'continue' not properly in loop");

    let err = compile_tree(vec![Stmt::new(2, StmtKind::Return(Some(Expr::int(2, 1))))]);
    assert_eq!((err.kind, err.message.as_str()), (ErrorKind::OutsideFunction, "'return' outside function"));
}

#[test]
fn continue_in_finally_clause() {
    let source = "for x in y:\n    try:\n        pass\n    finally:\n        continue\n";
    let err = compile_source(source, "m", "m.py", &CompileOptions::default(), NoopTracer).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Syntax);
    assert_eq!(err.message, "'continue' not supported inside 'finally' clause");
    assert_eq!(err.line, 5);
}

#[test]
fn bare_except_must_be_last() {
    let handler = |line, type_: Option<Expr>| ExceptHandler {
        line,
        type_,
        name: None,
        body: vec![Stmt::new(line + 1, StmtKind::Pass)],
    };
    let err = compile_tree(vec![Stmt::new(
        1,
        StmtKind::TryExcept {
            body: vec![Stmt::new(2, StmtKind::Pass)],
            handlers: vec![handler(3, None), handler(5, Some(Expr::name(5, "E")))],
            orelse: Vec::new(),
        },
    )]);
    assert_eq!(err.kind, ErrorKind::BareExceptNotLast);
    assert_eq!(err.message, "default 'except:' must be last");
    assert_eq!(err.line, 3);
}

#[test]
fn scope_errors_abort() {
    let options = CompileOptions::default();
    let err = compile_source("def f():\n    x = 1\n    global x\n", "m", "m.py", &options, NoopTracer).unwrap_err();
    assert_eq!(err.kind, ErrorKind::LocalAndGlobal);

    let source = "def f():\n    x = 1\n    def g():\n        return x\n    del x\n";
    let err = compile_source(source, "m", "m.py", &options, NoopTracer).unwrap_err();
    assert_eq!(err.kind, ErrorKind::DeleteCell);
    assert_eq!(err.line, 5);
}

#[test]
fn oversized_strings_are_rejected() {
    let text = "a".repeat(jyro::MAX_STRING_CONSTANT + 1);
    let err = compile_tree(vec![Stmt::assign(Expr::name(1, "s"), Expr::str(1, &text))]);
    assert_eq!(err.kind, ErrorKind::StringTooLarge);
}
