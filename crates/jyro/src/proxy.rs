//! Proxy and adapter classes for native types.
//!
//! A proxy subclasses a native class (or implements a native interface) so a
//! dynamic object can stand in for it. Each overridable method looks up an
//! override on the dynamic side at call time and falls back to the native
//! implementation when there is none. Native types are described as data
//! ([`NativeClass`]), typically loaded from JSON.

use std::{io, path::PathBuf};

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::{
    classfile::{
        ClassFile, ClassVersion, Code, ConstantPool, JavaType, Opcode, access,
        descriptor::{internal_name, method_descriptor},
    },
    error::{CompileError, CompileResult, ErrorKind},
    options::ProxyOptions,
    runtime::{JAVA_OBJECT, PY},
    tracer::CompileTracer,
};

const PY_PROXY: &str = "org/python/core/PyProxy";
const PY_INSTANCE: &str = "Lorg/python/core/PyInstance;";
const PY_SYSTEM_STATE: &str = "Lorg/python/core/PySystemState;";
const LOOKUP: &str = "(Lorg/python/core/PyProxy;Ljava/lang/String;)Lorg/python/core/PyObject;";
const JCALL: &str = "([Ljava/lang/Object;)Lorg/python/core/PyObject;";
const TOJAVA: &str = "(Lorg/python/core/PyObject;Ljava/lang/String;)Ljava/lang/Object;";

/// A Java modifier keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Modifier {
    Public,
    Protected,
    Private,
    Static,
    Final,
    Synchronized,
    Native,
    Abstract,
}

impl Modifier {
    fn flag(self) -> u16 {
        match self {
            Self::Public => access::PUBLIC,
            Self::Protected => access::PROTECTED,
            Self::Private => access::PRIVATE,
            Self::Static => access::STATIC,
            Self::Final => access::FINAL,
            Self::Synchronized => access::SYNCHRONIZED,
            Self::Native => access::NATIVE,
            Self::Abstract => access::ABSTRACT,
        }
    }
}

fn flags(modifiers: &[Modifier]) -> u16 {
    modifiers.iter().fold(0, |flags, modifier| flags | modifier.flag())
}

/// Description of a native class or interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeClass {
    /// Dotted name, e.g. `java.lang.Runnable`.
    pub name: String,
    #[serde(default)]
    pub interface: bool,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
    #[serde(default)]
    pub superclass: Option<Box<NativeClass>>,
    #[serde(default)]
    pub interfaces: Vec<NativeClass>,
    #[serde(default)]
    pub methods: Vec<NativeMethod>,
    /// Declared constructors; none means the implicit public no-argument one.
    #[serde(default)]
    pub constructors: Vec<NativeConstructor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeMethod {
    pub name: String,
    #[serde(default)]
    pub params: Vec<JavaType>,
    #[serde(default = "void")]
    pub ret: JavaType,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeConstructor {
    #[serde(default)]
    pub params: Vec<JavaType>,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
}

fn void() -> JavaType {
    JavaType::Void
}

impl NativeClass {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interface: false,
            modifiers: vec![Modifier::Public],
            superclass: None,
            interfaces: Vec::new(),
            methods: Vec::new(),
            constructors: Vec::new(),
        }
    }

    #[must_use]
    pub fn interface(name: impl Into<String>) -> Self {
        Self {
            interface: true,
            modifiers: vec![Modifier::Public, Modifier::Abstract],
            ..Self::new(name)
        }
    }

    /// `java.lang.Object` with its public constructor.
    #[must_use]
    pub fn object() -> Self {
        Self::new("java.lang.Object")
    }

    #[must_use]
    pub fn extends(mut self, superclass: NativeClass) -> Self {
        self.superclass = Some(Box::new(superclass));
        self
    }

    #[must_use]
    pub fn implements(mut self, interface: NativeClass) -> Self {
        self.interfaces.push(interface);
        self
    }

    #[must_use]
    pub fn method(mut self, method: NativeMethod) -> Self {
        self.methods.push(method);
        self
    }

    #[must_use]
    pub fn constructor(mut self, constructor: NativeConstructor) -> Self {
        self.constructors.push(constructor);
        self
    }

    /// Whether a value of this class is assignable to the type named `name`.
    #[must_use]
    pub fn is_subtype_of(&self, name: &str) -> bool {
        self.name == name
            || self.superclass.as_ref().is_some_and(|sup| sup.is_subtype_of(name))
            || self.interfaces.iter().any(|interface| interface.is_subtype_of(name))
    }

    fn is_final(&self) -> bool {
        self.modifiers.contains(&Modifier::Final)
    }
}

impl NativeMethod {
    #[must_use]
    pub fn new(name: impl Into<String>, params: Vec<JavaType>, ret: JavaType, modifiers: &[Modifier]) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
            modifiers: modifiers.to_vec(),
        }
    }

    fn descriptor(&self) -> String {
        method_descriptor(&self.params, &self.ret)
    }

    /// Deduplication key: name and parameter types.
    fn key(&self) -> String {
        let mut key = format!("{}:", self.name);
        for param in &self.params {
            key.push_str(&param.to_string());
            key.push(',');
        }
        key
    }
}

impl NativeConstructor {
    #[must_use]
    pub fn new(params: Vec<JavaType>, modifiers: &[Modifier]) -> Self {
        Self {
            params,
            modifiers: modifiers.to_vec(),
        }
    }
}

/// A generated proxy class.
#[derive(Debug, Clone)]
pub struct ProxyClass {
    pub class: ClassFile,
    /// Dotted name of the generated class.
    pub name: String,
}

impl ProxyClass {
    /// Path of the class file relative to an output root.
    #[must_use]
    pub fn relative_path(&self) -> PathBuf {
        class_file_path(&self.name)
    }

    pub fn write(&self, out: &mut impl io::Write) -> io::Result<()> {
        self.class.write(out)
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        self.class.to_bytes()
    }
}

/// `a.b.C` becomes `a/b/C.class`.
#[must_use]
pub fn class_file_path(dotted: &str) -> PathBuf {
    let mut path: PathBuf = dotted.split('.').collect();
    path.set_extension("class");
    path
}

/// Builds the proxy for a native base type.
pub fn make_proxy<T: CompileTracer>(
    base: &NativeClass,
    options: &ProxyOptions,
    tracer: T,
) -> CompileResult<ProxyClass> {
    ProxyMaker::new(&base.name, options, tracer).build(base)
}

/// Assembles one proxy class.
#[derive(Debug)]
pub struct ProxyMaker<T> {
    name: String,
    adapter: bool,
    class_version: ClassVersion,
    tracer: T,
}

impl<T: CompileTracer> ProxyMaker<T> {
    /// The proxy is named `name` inside the configured package.
    pub fn new(name: &str, options: &ProxyOptions, tracer: T) -> Self {
        let name = if options.package.is_empty() {
            name.to_owned()
        } else {
            format!("{}.{name}", options.package)
        };
        Self {
            name,
            adapter: options.adapter,
            class_version: options.class_version,
            tracer,
        }
    }

    /// Proxies `base`: a class is extended, an interface is implemented on top
    /// of `java.lang.Object`.
    pub fn build(self, base: &NativeClass) -> CompileResult<ProxyClass> {
        if base.interface {
            self.build_with(&NativeClass::object(), std::slice::from_ref(base))
        } else {
            self.build_with(base, &[])
        }
    }

    /// Extends `superclass` and implements `interfaces`.
    pub fn build_with(mut self, superclass: &NativeClass, interfaces: &[NativeClass]) -> CompileResult<ProxyClass> {
        if superclass.is_final() {
            return Err(CompileError::new(
                ErrorKind::FinalSuperclass,
                format!("can't subclass final class {}", superclass.name),
                0,
            ));
        }
        let class = ClassFile::new(
            &internal_name(&self.name),
            &internal_name(&superclass.name),
            access::PUBLIC | access::SUPER,
            self.class_version,
        );
        let mut builder = ProxyBuilder {
            class,
            adapter: self.adapter,
            seen: AHashSet::new(),
        };
        builder.add_proxy_fields()?;
        builder.add_constructors(superclass)?;
        builder.class.add_interface(PY_PROXY);

        builder.add_methods(superclass, &mut self.tracer)?;
        for interface in interfaces {
            if superclass.is_subtype_of(&interface.name) {
                self.tracer
                    .on_warning(&format!("discarding redundant interface: {}", interface.name));
                continue;
            }
            builder.class.add_interface(&internal_name(&interface.name));
            builder.add_methods(interface, &mut self.tracer)?;
        }
        builder.method("<clinit>", "()V", access::STATIC, |code, _| code.emit(Opcode::Return))?;

        if builder.class.pool.is_overflowed() {
            return Err(CompileError::new(ErrorKind::TooManyConstants, "too many constants", 0));
        }
        tracing::debug!(proxy = %self.name, methods = builder.class.method_count(), "proxy built");
        Ok(ProxyClass {
            class: builder.class,
            name: self.name,
        })
    }
}

struct ProxyBuilder {
    class: ClassFile,
    adapter: bool,
    /// `name:params` keys already visited.
    seen: AHashSet<String>,
}

impl ProxyBuilder {
    fn method(
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

    /// The `PyProxy` fields with their accessors.
    fn add_proxy_fields(&mut self) -> CompileResult<()> {
        let this = self.class.name().to_owned();
        for (field, descriptor, setter, getter) in [
            ("__proxy", PY_INSTANCE, "_setPyInstance", "_getPyInstance"),
            ("__systemState", PY_SYSTEM_STATE, "_setPySystemState", "_getPySystemState"),
        ] {
            self.class.add_field(field, descriptor, access::PROTECTED);
            let field = self.class.pool.fieldref(&this, field, descriptor);
            self.method(setter, &format!("({descriptor})V"), access::PUBLIC, |code, _| {
                code.aload(0);
                code.aload(1);
                code.putfield(field);
                code.emit(Opcode::Return);
            })?;
            self.method(getter, &format!("(){descriptor}"), access::PUBLIC, |code, _| {
                code.aload(0);
                code.getfield(field);
                code.emit(Opcode::Areturn);
            })?;
        }
        Ok(())
    }

    fn add_constructors(&mut self, superclass: &NativeClass) -> CompileResult<()> {
        let owner = internal_name(&superclass.name);
        let implicit = [NativeConstructor::new(Vec::new(), &[Modifier::Public])];
        let constructors = if superclass.constructors.is_empty() {
            &implicit[..]
        } else {
            &superclass.constructors[..]
        };
        for constructor in constructors {
            let mut flags = flags(&constructor.modifiers);
            if flags & access::PRIVATE != 0 {
                continue;
            }
            flags &= !access::NATIVE;
            if flags & access::PROTECTED != 0 {
                flags = (flags & !access::PROTECTED) | access::PUBLIC;
            }
            let descriptor = method_descriptor(&constructor.params, &JavaType::Void);
            self.method("<init>", &descriptor, flags, |code, pool| {
                call_super(code, pool, &owner, "<init>", &constructor.params, &JavaType::Void);
            })?;
        }
        Ok(())
    }

    /// Walks `class`, then its superclass, then its interfaces.
    fn add_methods(&mut self, class: &NativeClass, tracer: &mut impl CompileTracer) -> CompileResult<()> {
        let owner = internal_name(&class.name);
        for method in &class.methods {
            if !self.seen.insert(method.key()) {
                continue;
            }
            let mut flags = flags(&method.modifiers);
            if flags & (access::STATIC | access::PRIVATE) != 0 {
                continue;
            }
            flags &= !access::NATIVE;
            if flags & access::PROTECTED != 0 {
                flags = (flags & !access::PROTECTED) | access::PUBLIC;
                if flags & access::FINAL != 0 {
                    self.add_super_method(&format!("super__{}", method.name), &owner, method, flags & !access::FINAL)?;
                    continue;
                }
            } else if flags & access::FINAL != 0 {
                continue;
            }
            self.add_method(&owner, method, flags, tracer)?;
        }
        if let Some(superclass) = &class.superclass {
            self.add_methods(superclass, tracer)?;
        }
        for interface in &class.interfaces {
            self.add_methods(interface, tracer)?;
        }
        Ok(())
    }

    fn add_method(
        &mut self,
        owner: &str,
        method: &NativeMethod,
        flags: u16,
        tracer: &mut impl CompileTracer,
    ) -> CompileResult<()> {
        let is_abstract = flags & access::ABSTRACT != 0;
        let flags = flags & !access::ABSTRACT;
        let descriptor = method.descriptor();
        tracer.on_proxy_method(&method.name, &descriptor, is_abstract);
        let adapter = self.adapter;

        self.method(&method.name, &descriptor, flags, |code, pool| {
            code.aload(0);
            let name = pool.string(&method.name);
            code.ldc(name);
            if !is_abstract {
                code.invokestatic(pool.methodref(PY, "jfindattr", LOOKUP));
                let target = code.get_local();
                code.astore(target);
                code.aload(target);
                let call_python = code.new_label();
                code.branch(Opcode::Ifnonnull, call_python);
                call_super(code, pool, owner, &method.name, &method.params, &method.ret);
                code.bind_label(call_python);
                code.aload(target);
                call_method(code, pool, &method.params, &method.ret);
            } else if adapter {
                code.invokestatic(pool.methodref(PY, "jfindattr", LOOKUP));
                code.emit(Opcode::Dup);
                let missing = code.new_label();
                code.branch(Opcode::Ifnull, missing);
                call_method(code, pool, &method.params, &method.ret);
                code.bind_label(missing);
                code.emit(Opcode::Pop);
                zero_return(code, &method.ret);
            } else {
                code.invokestatic(pool.methodref(PY, "jgetattr", LOOKUP));
                call_method(code, pool, &method.params, &method.ret);
            }
        })?;
        if !is_abstract {
            self.add_super_method(&format!("super__{}", method.name), owner, method, flags)?;
        }
        Ok(())
    }

    /// A method that calls `owner`'s implementation directly.
    fn add_super_method(&mut self, name: &str, owner: &str, method: &NativeMethod, flags: u16) -> CompileResult<()> {
        self.method(name, &method.descriptor(), flags, |code, pool| {
            call_super(code, pool, owner, &method.name, &method.params, &method.ret);
        })
    }
}

/// Loads `this` and the arguments, invokes `owner.name` non-virtually and returns.
fn call_super(code: &mut Code, pool: &mut ConstantPool, owner: &str, name: &str, params: &[JavaType], ret: &JavaType) {
    code.aload(0);
    let mut slot = 1;
    for param in params {
        load(code, param, slot);
        slot += param.slots();
    }
    code.invokespecial(pool.methodref(owner, name, &method_descriptor(params, ret)));
    typed_return(code, ret);
}

fn load(code: &mut Code, ty: &JavaType, slot: u16) {
    match ty {
        JavaType::Boolean | JavaType::Byte | JavaType::Short | JavaType::Int | JavaType::Char => code.iload(slot),
        JavaType::Long => code.lload(slot),
        JavaType::Float => code.fload(slot),
        JavaType::Double => code.dload(slot),
        JavaType::Void => unreachable!("void parameter"),
        JavaType::Object(_) | JavaType::Array(_) => code.aload(slot),
    }
}

fn typed_return(code: &mut Code, ty: &JavaType) {
    code.emit(match ty {
        JavaType::Boolean | JavaType::Byte | JavaType::Short | JavaType::Int | JavaType::Char => Opcode::Ireturn,
        JavaType::Long => Opcode::Lreturn,
        JavaType::Float => Opcode::Freturn,
        JavaType::Double => Opcode::Dreturn,
        JavaType::Void => Opcode::Return,
        JavaType::Object(_) | JavaType::Array(_) => Opcode::Areturn,
    });
}

fn zero_return(code: &mut Code, ty: &JavaType) {
    let zero = match ty {
        JavaType::Boolean | JavaType::Byte | JavaType::Short | JavaType::Int | JavaType::Char => Some(Opcode::Iconst0),
        JavaType::Long => Some(Opcode::Lconst0),
        JavaType::Float => Some(Opcode::Fconst0),
        JavaType::Double => Some(Opcode::Dconst0),
        JavaType::Void => None,
        JavaType::Object(_) | JavaType::Array(_) => Some(Opcode::AconstNull),
    };
    if let Some(zero) = zero {
        code.emit(zero);
    }
    typed_return(code, ty);
}

/// With the dynamic callable on the stack: marshals the arguments, calls it
/// and converts the result back.
fn call_method(code: &mut Code, pool: &mut ConstantPool, params: &[JavaType], ret: &JavaType) {
    push_args(code, pool, params);
    code.invokevirtual(pool.methodref(crate::runtime::PY_OBJECT, "_jcall", JCALL));
    let conversion = match ret {
        JavaType::Boolean => Some(("py2boolean", "Z")),
        JavaType::Char => Some(("py2char", "C")),
        JavaType::Byte | JavaType::Short | JavaType::Int => Some(("py2int", "I")),
        JavaType::Long => Some(("py2long", "J")),
        JavaType::Float => Some(("py2float", "F")),
        JavaType::Double => Some(("py2double", "D")),
        JavaType::Void => Some(("py2void", "V")),
        JavaType::Object(_) | JavaType::Array(_) => None,
    };
    match conversion {
        Some((name, result)) => {
            let descriptor = format!("(Lorg/python/core/PyObject;){result}");
            code.invokestatic(pool.methodref(PY, name, &descriptor));
        }
        None => {
            code.ldc(pool.string(&ret.runtime_name()));
            code.invokestatic(pool.methodref(PY, "tojava", TOJAVA));
            let class = match ret {
                JavaType::Object(name) => pool.class(name),
                other => pool.class(&other.descriptor()),
            };
            code.checkcast(class);
        }
    }
    typed_return(code, ret);
}

/// Pushes the arguments as a boxed `Object[]`.
fn push_args(code: &mut Code, pool: &mut ConstantPool, params: &[JavaType]) {
    if params.is_empty() {
        code.getstatic(pool.fieldref(PY, "EmptyObjects", "[Lorg/python/core/PyObject;"));
        return;
    }
    code.iconst(params.len() as i32, pool);
    code.anewarray(pool.class(JAVA_OBJECT));
    let array = code.get_local();
    code.astore(array);
    let mut slot = 1;
    for (index, param) in params.iter().enumerate() {
        code.aload(array);
        code.iconst(index as i32, pool);
        load(code, param, slot);
        slot += param.slots();
        let boxing = match param {
            JavaType::Boolean | JavaType::Byte | JavaType::Short | JavaType::Int => {
                Some(("newInteger", "(I)Lorg/python/core/PyInteger;"))
            }
            JavaType::Long => Some(("newInteger", "(J)Lorg/python/core/PyInteger;")),
            JavaType::Float => Some(("newFloat", "(F)Lorg/python/core/PyFloat;")),
            JavaType::Double => Some(("newFloat", "(D)Lorg/python/core/PyFloat;")),
            JavaType::Char => Some(("newString", "(C)Lorg/python/core/PyString;")),
            JavaType::Void | JavaType::Object(_) | JavaType::Array(_) => None,
        };
        if let Some((name, descriptor)) = boxing {
            code.invokestatic(pool.methodref(PY, name, descriptor));
        }
        code.emit(Opcode::Aastore);
    }
    code.aload(array);
    code.free_local(array);
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        classfile::{reader::parse_class, verify::check_class},
        tracer::{CompileEvent, NoopTracer, RecordingTracer},
    };

    fn runnable() -> NativeClass {
        NativeClass::interface("java.lang.Runnable").method(NativeMethod::new(
            "run",
            Vec::new(),
            JavaType::Void,
            &[Modifier::Public, Modifier::Abstract],
        ))
    }

    fn widget() -> NativeClass {
        let string = JavaType::object("java/lang/String");
        NativeClass::new("demo.Widget")
            .extends(NativeClass::object())
            .constructor(NativeConstructor::new(Vec::new(), &[Modifier::Public]))
            .constructor(NativeConstructor::new(vec![JavaType::Int], &[Modifier::Protected]))
            .constructor(NativeConstructor::new(vec![string.clone()], &[Modifier::Private]))
            .method(NativeMethod::new(
                "resize",
                vec![JavaType::Long, JavaType::Double, JavaType::Char],
                JavaType::Boolean,
                &[Modifier::Public],
            ))
            .method(NativeMethod::new("label", Vec::new(), string, &[Modifier::Protected]))
            .method(NativeMethod::new("id", Vec::new(), JavaType::Int, &[Modifier::Public, Modifier::Final]))
            .method(NativeMethod::new(
                "checksum",
                Vec::new(),
                JavaType::Long,
                &[Modifier::Protected, Modifier::Final],
            ))
            .method(NativeMethod::new("create", Vec::new(), JavaType::Void, &[Modifier::Public, Modifier::Static]))
            .method(NativeMethod::new(
                "paint",
                vec![JavaType::Float],
                JavaType::object("java/lang/Object").array_of(),
                &[Modifier::Public, Modifier::Abstract],
            ))
    }

    fn parsed(proxy: &ProxyClass) -> crate::classfile::reader::ParsedClass {
        let class = parse_class(&proxy.to_bytes().unwrap()).unwrap();
        check_class(&class).unwrap();
        class
    }

    #[test]
    fn interface_proxy_extends_object() {
        let proxy = make_proxy(&runnable(), &ProxyOptions::default(), NoopTracer).unwrap();
        assert_eq!(proxy.name, "org.python.proxies.java.lang.Runnable");
        assert_eq!(proxy.relative_path(), PathBuf::from("org/python/proxies/java/lang/Runnable.class"));
        let class = parsed(&proxy);
        assert_eq!(class.super_name.as_deref(), Some("java/lang/Object"));
        assert_eq!(class.interfaces, vec![PY_PROXY.to_owned(), "java/lang/Runnable".to_owned()]);
        assert!(class.method("<init>", "()V").is_some());
        assert!(class.method("<clinit>", "()V").is_some());
        assert!(class.method("run", "()V").is_some());
        assert!(class.method("super__run", "()V").is_none());
        assert!(class.method("_getPyInstance", "()Lorg/python/core/PyInstance;").is_some());
        assert!(class.method("_setPySystemState", "(Lorg/python/core/PySystemState;)V").is_some());
        assert!(class.field("__proxy").is_some());
        assert!(class.field("__systemState").is_some());
        assert!(class.references(PY, "jgetattr"));
        assert!(class.references(PY, "py2void"));
        assert!(class.references(PY, "EmptyObjects"));
    }

    #[test]
    fn adapter_tolerates_missing_overrides() {
        let options = ProxyOptions::default().adapter(true);
        let proxy = make_proxy(&runnable(), &options, NoopTracer).unwrap();
        let class = parsed(&proxy);
        assert!(class.references(PY, "jfindattr"));
        assert!(!class.references(PY, "jgetattr"));
    }

    #[test]
    fn class_proxy_members() {
        let mut tracer = RecordingTracer::new();
        let proxy = ProxyMaker::new("Widget$1", &ProxyOptions::default().package("demo.proxies"), &mut tracer)
            .build(&widget())
            .unwrap();
        assert_eq!(proxy.name, "demo.proxies.Widget$1");
        let class = parsed(&proxy);
        assert_eq!(class.super_name.as_deref(), Some("demo/Widget"));

        let init = class.method("<init>", "(I)V").unwrap();
        assert_eq!(init.access, access::PUBLIC);
        assert!(class.method("<init>", "()V").is_some());
        assert!(class.method("<init>", "(Ljava/lang/String;)V").is_none());

        assert!(class.method("resize", "(JDC)Z").is_some());
        assert!(class.method("super__resize", "(JDC)Z").is_some());
        assert_eq!(class.method("label", "()Ljava/lang/String;").unwrap().access, access::PUBLIC);
        assert!(class.method("id", "()I").is_none());
        assert!(class.method("checksum", "()J").is_none());
        assert_eq!(class.method("super__checksum", "()J").unwrap().access, access::PUBLIC);
        assert!(class.method("create", "()V").is_none());
        assert!(class.method("paint", "(F)[Ljava/lang/Object;").is_some());

        assert!(class.references(PY, "tojava"));
        assert!(class.references(PY, "py2boolean"));
        assert!(class.references(PY, "newString"));
        assert!(class.references(PY, "newFloat"));

        let proxied: Vec<_> = tracer
            .events()
            .iter()
            .filter_map(|event| match event {
                CompileEvent::ProxyMethod { name, abstract_, .. } => Some((name.as_str(), *abstract_)),
                _ => None,
            })
            .collect();
        assert_eq!(proxied, vec![("resize", false), ("label", false), ("paint", true)]);
    }

    #[test]
    fn superclass_methods_are_deduplicated() {
        let to_string = || NativeMethod::new("toString", Vec::new(), JavaType::object("java/lang/String"), &[Modifier::Public]);
        let base = NativeClass::new("demo.Named")
            .extends(NativeClass::object().method(to_string()))
            .method(to_string());
        let proxy = make_proxy(&base, &ProxyOptions::default(), NoopTracer).unwrap();
        let class = parsed(&proxy);
        assert_eq!(class.methods_named("toString").count(), 1);
        assert!(class.references("demo/Named", "toString"));
    }

    #[test]
    fn final_superclass_is_rejected() {
        let mut base = NativeClass::new("java.lang.String");
        base.modifiers.push(Modifier::Final);
        let err = make_proxy(&base, &ProxyOptions::default(), NoopTracer).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FinalSuperclass);
        assert!(err.message.starts_with("can't subclass final class"));
    }

    #[test]
    fn redundant_interfaces_are_discarded() {
        let base = NativeClass::new("demo.Task").implements(runnable());
        let mut tracer = RecordingTracer::new();
        let proxy = ProxyMaker::new("Task", &ProxyOptions::default(), &mut tracer)
            .build_with(&base, &[runnable()])
            .unwrap();
        let class = parsed(&proxy);
        assert_eq!(class.interfaces, vec![PY_PROXY.to_owned()]);
        assert_eq!(
            tracer.warnings().collect::<Vec<_>>(),
            vec!["discarding redundant interface: java.lang.Runnable"]
        );
    }

    #[test]
    fn native_class_from_json() {
        let json = r#"{
            "name": "java.util.Comparator",
            "interface": true,
            "methods": [
                {"name": "compare", "params": ["java.lang.Object", "java.lang.Object"], "ret": "int",
                 "modifiers": ["public", "abstract"]}
            ]
        }"#;
        let class: NativeClass = serde_json::from_str(json).unwrap();
        assert!(class.interface);
        assert_eq!(class.methods[0].descriptor(), "(Ljava/lang/Object;Ljava/lang/Object;)I");
        let proxy = make_proxy(&class, &ProxyOptions::default(), NoopTracer).unwrap();
        let class = parsed(&proxy);
        assert!(class.references(PY, "py2int"));
    }
}
