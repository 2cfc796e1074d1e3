//! Assembly of the module class.
//!
//! A compiled module is one class extending `PyFunctionTable`. Every code
//! unit (the module body, each `def`, `lambda` and class body) becomes a
//! method `PyObject name$id(PyFrame)`, reached at runtime through the
//! `call_function` switch. Literals and the `PyCode` objects describing the
//! units live in static fields initialized by `<clinit>`.

use std::{fmt, io};

use indexmap::IndexMap;

use crate::{
    classfile::{ClassFile, Code, ConstantPool, Opcode, PoolRef, access, descriptor::internal_name},
    error::{CompileError, CompileResult, ErrorKind},
    options::CompileOptions,
    runtime::{
        CALL_FUNCTION_DESCRIPTOR, GET_MAIN_DESCRIPTOR, Helper, JAVA_STRING, MAIN_DESCRIPTOR, PY_CODE_DESCRIPTOR,
        PY_FUNCTION_TABLE, PY_RUNNABLE, RuntimeTable, UNIT_DESCRIPTOR,
    },
    scope::{ScopeInfo, ScopeKind},
    tracer::CompileTracer,
};

/// `co_flags` bit telling the runtime the unit uses fast locals only.
pub const CO_OPTIMIZED: i32 = 0x0001;

/// A literal that gets its own static field.
///
/// Floats are kept as their bit patterns so constants can be deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PyConstant {
    Int(i32),
    Float(u64),
    Imaginary(u64),
    Str(String),
    /// Decimal digits of an arbitrary-precision integer.
    Long(String),
}

impl PyConstant {
    #[must_use]
    pub fn float(value: f64) -> Self {
        Self::Float(value.to_bits())
    }

    #[must_use]
    pub fn imaginary(value: f64) -> Self {
        Self::Imaginary(value.to_bits())
    }

    /// Descriptor of the field holding the constant.
    #[must_use]
    pub fn field_descriptor(&self) -> &'static str {
        match self {
            Self::Int(_) => "Lorg/python/core/PyInteger;",
            Self::Float(_) => "Lorg/python/core/PyFloat;",
            Self::Imaginary(_) => "Lorg/python/core/PyComplex;",
            Self::Str(_) => "Lorg/python/core/PyString;",
            Self::Long(_) => "Lorg/python/core/PyLong;",
        }
    }

    /// Pushes the runtime object for this constant.
    fn materialize(&self, code: &mut Code, pool: &mut ConstantPool, runtime: RuntimeTable) {
        match self {
            Self::Int(value) => {
                code.iconst(*value, pool);
                runtime.emit(Helper::NewInteger, code, pool);
            }
            Self::Float(bits) => {
                code.ldc(pool.double(f64::from_bits(*bits)));
                runtime.emit(Helper::NewFloat, code, pool);
            }
            Self::Imaginary(bits) => {
                code.ldc(pool.double(f64::from_bits(*bits)));
                runtime.emit(Helper::NewImaginary, code, pool);
            }
            Self::Str(text) => {
                code.ldc(pool.string(text));
                runtime.emit(Helper::NewString, code, pool);
            }
            Self::Long(digits) => {
                code.ldc(pool.string(digits));
                runtime.emit(Helper::NewLong, code, pool);
            }
        }
    }
}

impl fmt::Display for PyConstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(bits) => write!(f, "{:?}", f64::from_bits(*bits)),
            Self::Imaginary(bits) => write!(f, "{:?}j", f64::from_bits(*bits)),
            Self::Str(text) => write!(f, "{text:?}"),
            Self::Long(digits) => write!(f, "{digits}L"),
        }
    }
}

/// Metadata of one compiled code unit, passed to `Py.newCode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeUnit {
    /// `co_name`: the function or class name, `?` for the module.
    pub name: String,
    pub id: u32,
    /// Name of the method and of the static `PyCode` field.
    pub method: String,
    pub first_line: u32,
    pub argcount: u16,
    pub varargs: bool,
    pub varkwargs: bool,
    /// Fast-local names; empty for class bodies and the module.
    pub names: Vec<String>,
    pub cellvars: Vec<String>,
    pub freevars: Vec<String>,
    pub npurecell: u16,
    pub flags: i32,
    emitted: bool,
}

/// Builds the class for one module.
#[derive(Debug)]
pub struct ModuleBuilder<T> {
    class: ClassFile,
    options: CompileOptions,
    filename: Option<String>,
    constants: IndexMap<PyConstant, String>,
    units: Vec<CodeUnit>,
    runtime: RuntimeTable,
    tracer: T,
}

impl<T: CompileTracer> ModuleBuilder<T> {
    /// `class_name` may be dotted or internal.
    pub fn new(class_name: &str, filename: Option<&str>, options: &CompileOptions, tracer: T) -> Self {
        let name = internal_name(class_name);
        let mut class = ClassFile::new(
            &name,
            PY_FUNCTION_TABLE,
            access::PUBLIC | access::SUPER,
            options.class_version,
        );
        class.add_interface(PY_RUNNABLE);
        class.add_field("self", &format!("L{name};"), access::STATIC | access::FINAL);
        Self {
            class,
            options: options.clone(),
            filename: filename.map(str::to_owned),
            constants: IndexMap::new(),
            units: Vec::new(),
            runtime: RuntimeTable::new(options.true_division),
            tracer,
        }
    }

    #[must_use]
    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    #[must_use]
    pub fn runtime(&self) -> RuntimeTable {
        self.runtime
    }

    pub fn pool(&mut self) -> &mut ConstantPool {
        &mut self.class.pool
    }

    pub fn tracer(&mut self) -> &mut T {
        &mut self.tracer
    }

    /// Emits `helper` into `code` using this module's pool.
    pub fn emit(&mut self, helper: Helper, code: &mut Code) {
        self.runtime.emit(helper, code, &mut self.class.pool);
    }

    /// The static field holding `value`, allocated on first use.
    pub fn constant(&mut self, value: PyConstant) -> PoolRef {
        let descriptor = value.field_descriptor();
        let field = match self.constants.get(&value) {
            Some(field) => field.clone(),
            None => {
                let field = format!("_{}", self.constants.len());
                self.class.add_field(&field, descriptor, access::STATIC | access::FINAL);
                self.tracer.on_constant(&field, &value.to_string());
                self.constants.insert(value, field.clone());
                field
            }
        };
        let class = self.class.name().to_owned();
        self.class.pool.fieldref(&class, &field, descriptor)
    }

    /// Registers a code unit for `scope` and declares its method.
    ///
    /// Returns the unit id and an empty body with `this` and the frame
    /// reserved.
    pub fn add_unit(&mut self, name: &str, first_line: u32, scope: &ScopeInfo) -> (u32, Code) {
        let id = self.units.len() as u32;
        let method = if is_java_identifier(name) {
            format!("{name}${id}")
        } else {
            format!("f${id}")
        };
        let names = if scope.kind == ScopeKind::Class {
            Vec::new()
        } else {
            scope.names.clone()
        };
        self.class.add_field(&method, PY_CODE_DESCRIPTOR, access::STATIC | access::FINAL);
        let code = self
            .class
            .add_method(&method, UNIT_DESCRIPTOR, access::PUBLIC, self.options.line_numbers);
        self.units.push(CodeUnit {
            name: name.to_owned(),
            id,
            method,
            first_line,
            argcount: scope.argcount,
            varargs: scope.varargs,
            varkwargs: scope.varkwargs,
            names,
            cellvars: scope.cellvars.clone(),
            freevars: scope.freevars.clone(),
            npurecell: scope.npurecell,
            flags: if scope.optimize_globals() { CO_OPTIMIZED } else { 0 },
            emitted: false,
        });
        (id, code)
    }

    /// Attaches the finished body of unit `id`.
    pub fn finish_unit(&mut self, id: u32, code: Code) -> CompileResult<()> {
        let unit = &mut self.units[id as usize];
        let body = code.finish().map_err(|err| {
            CompileError::new(
                ErrorKind::CodeTooLarge,
                format!("{err} in '{}'", unit.name),
                unit.first_line,
            )
        })?;
        unit.emitted = true;
        self.tracer.on_unit_emitted(
            &unit.name,
            &unit.method,
            body.max_stack,
            body.max_locals,
            body.code.len(),
        );
        let method = unit.method.clone();
        self.class.add_method_body(&method, UNIT_DESCRIPTOR, &body);
        Ok(())
    }

    /// The static `PyCode` field of unit `id`.
    pub fn code_field(&mut self, id: u32) -> PoolRef {
        let class = self.class.name().to_owned();
        let method = &self.units[id as usize].method;
        self.class.pool.fieldref(&class, method, PY_CODE_DESCRIPTOR)
    }

    #[must_use]
    pub fn units(&self) -> &[CodeUnit] {
        &self.units
    }

    /// Adds the support methods and class attributes and returns the class.
    pub fn finish(mut self) -> CompileResult<CompiledModule> {
        if let Some(unit) = self.units.iter().find(|unit| !unit.emitted) {
            panic!("code unit {} was never emitted", unit.method);
        }
        self.add_init()?;
        self.add_get_main()?;
        self.add_call_function()?;
        self.add_clinit()?;
        if self.options.emit_main {
            self.add_main()?;
        }
        if let Some(filename) = &self.filename {
            let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
            self.class.set_source_file(base);
        }
        self.class
            .add_attribute("org.python.APIVersion", self.options.api_version.to_be_bytes().to_vec());
        if self.class.pool.is_overflowed() {
            return Err(CompileError::new(ErrorKind::TooManyConstants, "too many constants", 0));
        }
        Ok(CompiledModule {
            class: self.class,
            units: self.units,
            constants: self.constants.into_iter().map(|(value, field)| (field, value)).collect(),
        })
    }

    fn support_method(
        &mut self,
        name: &str,
        descriptor: &str,
        method_access: u16,
        build: impl FnOnce(&mut Code, &mut ConstantPool),
    ) -> CompileResult<()> {
        self.class
            .add_method_with(name, descriptor, method_access, false, build)
            .map_err(|err| CompileError::new(ErrorKind::CodeTooLarge, format!("{err} in {name}"), 0))
    }

    fn add_init(&mut self) -> CompileResult<()> {
        let runtime = self.runtime;
        self.support_method("<init>", "()V", access::PUBLIC, |code, pool| {
            code.aload(0);
            runtime.emit(Helper::FunctionTableInit, code, pool);
            code.emit(Opcode::Return);
        })
    }

    fn add_get_main(&mut self) -> CompileResult<()> {
        let main = self.code_field(0);
        self.support_method("getMain", GET_MAIN_DESCRIPTOR, access::PUBLIC, |code, _| {
            code.getstatic(main);
            code.emit(Opcode::Areturn);
        })
    }

    fn add_call_function(&mut self) -> CompileResult<()> {
        let methods: Vec<PoolRef> = {
            let class = self.class.name().to_owned();
            let names: Vec<String> = self.units.iter().map(|unit| unit.method.clone()).collect();
            names
                .iter()
                .map(|method| self.class.pool.methodref(&class, method, UNIT_DESCRIPTOR))
                .collect()
        };
        self.support_method("call_function", CALL_FUNCTION_DESCRIPTOR, access::PUBLIC, |code, _| {
            let default = code.new_label();
            let cases: Vec<_> = methods.iter().map(|_| code.new_label()).collect();
            code.iload(1);
            code.tableswitch(default, 0, &cases);
            for (&case, &method) in cases.iter().zip(&methods) {
                code.bind_label(case);
                code.aload(0);
                code.aload(2);
                code.invokevirtual(method);
                code.emit(Opcode::Areturn);
            }
            code.bind_label(default);
            code.emit(Opcode::AconstNull);
            code.emit(Opcode::Areturn);
        })
    }

    fn add_clinit(&mut self) -> CompileResult<()> {
        let class_name = self.class.name().to_owned();
        let runtime = self.runtime;
        let filename = self.filename.clone();
        let constants: Vec<(PoolRef, PyConstant)> = self
            .constants
            .clone()
            .into_iter()
            .map(|(value, field)| {
                let descriptor = value.field_descriptor();
                (self.class.pool.fieldref(&class_name, &field, descriptor), value)
            })
            .collect();
        let codes: Vec<(PoolRef, CodeUnit)> = self
            .units
            .clone()
            .into_iter()
            .map(|unit| {
                (
                    self.class.pool.fieldref(&class_name, &unit.method, PY_CODE_DESCRIPTOR),
                    unit,
                )
            })
            .collect();
        let this_field = self.class.pool.fieldref(&class_name, "self", &format!("L{class_name};"));

        self.support_method("<clinit>", "()V", access::STATIC, |code, pool| {
            let this_class = pool.class(&class_name);
            code.new_(this_class);
            code.emit(Opcode::Dup);
            code.invokespecial(pool.methodref(&class_name, "<init>", "()V"));
            code.putstatic(this_field);

            for (field, value) in &constants {
                value.materialize(code, pool, runtime);
                code.putstatic(*field);
            }

            for (field, unit) in &codes {
                code.iconst(i32::from(unit.argcount), pool);
                push_strings(code, pool, &unit.names);
                match &filename {
                    Some(filename) => code.ldc(pool.string(filename)),
                    None => code.emit(Opcode::AconstNull),
                }
                code.ldc(pool.string(&unit.name));
                code.iconst(unit.first_line as i32, pool);
                code.iconst(i32::from(unit.varargs), pool);
                code.iconst(i32::from(unit.varkwargs), pool);
                code.getstatic(this_field);
                code.iconst(unit.id as i32, pool);
                push_optional_strings(code, pool, &unit.cellvars);
                push_optional_strings(code, pool, &unit.freevars);
                code.iconst(i32::from(unit.npurecell), pool);
                code.iconst(unit.flags, pool);
                runtime.emit(Helper::NewCode, code, pool);
                code.putstatic(*field);
            }
            code.emit(Opcode::Return);
        })
    }

    fn add_main(&mut self) -> CompileResult<()> {
        let class_name = self.class.name().to_owned();
        let runtime = self.runtime;
        let this_field = self.class.pool.fieldref(&class_name, "self", &format!("L{class_name};"));
        self.support_method("main", MAIN_DESCRIPTOR, access::PUBLIC | access::STATIC, |code, pool| {
            code.getstatic(this_field);
            code.aload(0);
            runtime.emit(Helper::RunMain, code, pool);
            code.emit(Opcode::Return);
        })
    }
}

/// Pushes a `String[]` holding `values`.
pub(crate) fn push_strings(code: &mut Code, pool: &mut ConstantPool, values: &[impl AsRef<str>]) {
    code.iconst(values.len() as i32, pool);
    code.anewarray(pool.class(JAVA_STRING));
    for (index, value) in values.iter().enumerate() {
        code.emit(Opcode::Dup);
        code.iconst(index as i32, pool);
        code.ldc(pool.string(value.as_ref()));
        code.emit(Opcode::Aastore);
    }
}

/// Like [`push_strings`], but pushes null for an empty list.
fn push_optional_strings(code: &mut Code, pool: &mut ConstantPool, values: &[String]) {
    if values.is_empty() {
        code.emit(Opcode::AconstNull);
    } else {
        push_strings(code, pool, values);
    }
}

fn is_java_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// A finished module class.
#[derive(Debug, Clone)]
pub struct CompiledModule {
    pub class: ClassFile,
    pub units: Vec<CodeUnit>,
    /// Constant fields in allocation order.
    pub constants: Vec<(String, PyConstant)>,
}

impl CompiledModule {
    /// Internal name of the generated class.
    #[must_use]
    pub fn class_name(&self) -> &str {
        self.class.name()
    }

    pub fn write(&self, out: &mut impl io::Write) -> io::Result<()> {
        self.class.write(out)
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        self.class.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        classfile::{reader::parse_class, verify::check_class},
        tracer::{CompileEvent, NoopTracer, RecordingTracer},
    };

    fn module_scope() -> ScopeInfo {
        ScopeInfo::new("?", ScopeKind::Top, 0, 0, 0)
    }

    fn return_none(module: &mut ModuleBuilder<impl CompileTracer>, code: &mut Code) {
        module.emit(Helper::None, code);
        code.emit(Opcode::Areturn);
    }

    #[test]
    fn constants_are_deduplicated_in_order() {
        let mut tracer = RecordingTracer::new();
        let mut module = ModuleBuilder::new("m", None, &CompileOptions::default(), &mut tracer);
        let one = module.constant(PyConstant::Int(1));
        let text = module.constant(PyConstant::Str("a".into()));
        assert_eq!(module.constant(PyConstant::Int(1)), one);
        assert_ne!(one, text);
        module.constant(PyConstant::float(1.5));
        let events: Vec<_> = tracer
            .events()
            .iter()
            .map(|event| match event {
                CompileEvent::Constant { field, value } => format!("{field}={value}"),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(events, vec!["_0=1", "_1=\"a\"", "_2=1.5"]);
    }

    #[test]
    fn unit_method_names() {
        let mut module = ModuleBuilder::new("m", None, &CompileOptions::default(), NoopTracer);
        let scope = module_scope();
        assert_eq!(module.add_unit("?", 0, &scope).0, 0);
        assert_eq!(module.add_unit("f", 3, &scope).0, 1);
        assert_eq!(module.add_unit("<lambda>", 4, &scope).0, 2);
        let methods: Vec<_> = module.units().iter().map(|unit| unit.method.as_str()).collect();
        assert_eq!(methods, vec!["f$0", "f$1", "f$2"]);
        module.add_unit("helper", 5, &scope);
        assert_eq!(module.units()[3].method, "helper$3");
    }

    #[test]
    fn finished_module_layout() {
        let options = CompileOptions::default().emit_main(true);
        let mut module = ModuleBuilder::new("pkg.mod", Some("src/mod.py"), &options, NoopTracer);
        let scope = module_scope();
        let (id, mut code) = module.add_unit("?", 0, &scope);
        module.constant(PyConstant::Long("123456789012".into()));
        module.constant(PyConstant::imaginary(2.0));
        return_none(&mut module, &mut code);
        module.finish_unit(id, code).unwrap();
        let compiled = module.finish().unwrap();
        assert_eq!(compiled.class_name(), "pkg/mod");

        let parsed = parse_class(&compiled.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.super_name.as_deref(), Some(PY_FUNCTION_TABLE));
        assert_eq!(parsed.interfaces, vec![PY_RUNNABLE.to_owned()]);
        assert_eq!(parsed.source_file.as_deref(), Some("mod.py"));
        assert_eq!(parsed.attribute("org.python.APIVersion"), Some(&[0, 0, 0, 12][..]));
        for (name, descriptor) in [
            ("f$0", UNIT_DESCRIPTOR),
            ("<init>", "()V"),
            ("getMain", GET_MAIN_DESCRIPTOR),
            ("call_function", CALL_FUNCTION_DESCRIPTOR),
            ("<clinit>", "()V"),
            ("main", MAIN_DESCRIPTOR),
        ] {
            assert!(parsed.method(name, descriptor).is_some(), "missing {name}");
        }
        let fields: Vec<_> = parsed.fields.iter().map(|field| field.name.as_str()).collect();
        assert_eq!(fields, vec!["self", "f$0", "_0", "_1"]);
        assert!(parsed.references("org/python/core/Py", "newCode"));
        assert!(parsed.references("org/python/core/Py", "newLong"));
        assert!(parsed.references("org/python/core/Py", "runMain"));
        check_class(&parsed).unwrap();
    }

    #[test]
    fn unit_events_reach_tracer() {
        let mut tracer = RecordingTracer::new();
        let mut module = ModuleBuilder::new("m", None, &CompileOptions::default(), &mut tracer);
        let (id, mut code) = module.add_unit("?", 0, &module_scope());
        return_none(&mut module, &mut code);
        module.finish_unit(id, code).unwrap();
        module.finish().unwrap();
        assert!(matches!(
            tracer.events(),
            [CompileEvent::UnitEmitted { method, max_stack: 2, .. }] if method == "f$0"
        ));
    }

    #[test]
    fn identifiers() {
        assert!(is_java_identifier("spam_1"));
        assert!(is_java_identifier("$x"));
        assert!(!is_java_identifier("?"));
        assert!(!is_java_identifier("<lambda>"));
        assert!(!is_java_identifier("1a"));
    }
}
