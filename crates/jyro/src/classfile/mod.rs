//! JVM class-file model and writer.
//!
//! [`ClassFile`] collects fields, methods and attributes, interning every name
//! in its [`ConstantPool`] as it goes, and serializes the standard layout.
//! Method bodies are assembled separately with [`Code`] and attached once
//! finished.

pub mod code;
pub mod descriptor;
pub mod disasm;
pub mod opcode;
pub mod pool;
pub mod reader;
pub mod verify;

use std::io::{self, Write};

use serde::{Deserialize, Serialize};

pub use self::{
    code::{Code, CodeAttribute, CodeError, ExceptionEntry, Label, ProtectedRanges},
    descriptor::{JavaType, MethodDescriptor},
    opcode::Opcode,
    pool::{ConstantPool, PoolEntry, PoolRef},
};

pub const MAGIC: u32 = 0xCAFE_BABE;

/// Access flags for classes, fields and methods.
pub mod access {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const PROTECTED: u16 = 0x0004;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    /// Class flag; shares its bit with `SYNCHRONIZED` on methods.
    pub const SUPER: u16 = 0x0020;
    pub const SYNCHRONIZED: u16 = 0x0020;
    pub const NATIVE: u16 = 0x0100;
    pub const INTERFACE: u16 = 0x0200;
    pub const ABSTRACT: u16 = 0x0400;
}

/// Class-file format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassVersion {
    pub major: u16,
    pub minor: u16,
}

impl ClassVersion {
    /// Java 5, the newest format that verifies without `StackMapTable`.
    pub const JAVA_5: Self = Self { major: 49, minor: 0 };

    #[must_use]
    pub fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Whether `jsr`/`ret` are still legal in this format.
    #[must_use]
    pub fn supports_subroutines(self) -> bool {
        self.major < 51
    }
}

impl Default for ClassVersion {
    fn default() -> Self {
        Self::JAVA_5
    }
}

impl std::fmt::Display for ClassVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl std::str::FromStr for ClassVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s.split_once('.').unwrap_or((s, "0"));
        let major = major.parse().map_err(|_| format!("bad class version {s:?}"))?;
        let minor = minor.parse().map_err(|_| format!("bad class version {s:?}"))?;
        Ok(Self { major, minor })
    }
}

#[derive(Debug, Clone)]
struct Attribute {
    name: u16,
    data: Vec<u8>,
}

impl Attribute {
    fn write(&self, out: &mut impl Write) -> io::Result<()> {
        out.write_all(&self.name.to_be_bytes())?;
        let len = u32::try_from(self.data.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "attribute too large"))?;
        out.write_all(&len.to_be_bytes())?;
        out.write_all(&self.data)
    }
}

#[derive(Debug, Clone)]
struct Member {
    access: u16,
    name: u16,
    descriptor: u16,
    attributes: Vec<Attribute>,
}

impl Member {
    fn write(&self, out: &mut impl Write) -> io::Result<()> {
        out.write_all(&self.access.to_be_bytes())?;
        out.write_all(&self.name.to_be_bytes())?;
        out.write_all(&self.descriptor.to_be_bytes())?;
        out.write_all(&(self.attributes.len() as u16).to_be_bytes())?;
        for attribute in &self.attributes {
            attribute.write(out)?;
        }
        Ok(())
    }
}

/// A class under construction.
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub pool: ConstantPool,
    name: String,
    version: ClassVersion,
    access: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<Member>,
    methods: Vec<Member>,
    attributes: Vec<Attribute>,
}

impl ClassFile {
    /// `name` and `super_name` are internal names (`org/python/core/PyObject`).
    #[must_use]
    pub fn new(name: &str, super_name: &str, access: u16, version: ClassVersion) -> Self {
        let mut pool = ConstantPool::new();
        let this_class = pool.class(name);
        let super_class = pool.class(super_name);
        Self {
            pool,
            name: name.to_owned(),
            version,
            access,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Internal name of the class.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_interface(&mut self, internal_name: &str) {
        let index = self.pool.class(internal_name);
        if !self.interfaces.contains(&index) {
            self.interfaces.push(index);
        }
    }

    pub fn add_field(&mut self, name: &str, descriptor: &str, access: u16) {
        let name = self.pool.utf8(name);
        let descriptor = self.pool.utf8(descriptor);
        self.fields.push(Member {
            access,
            name,
            descriptor,
            attributes: Vec::new(),
        });
    }

    /// Declares a method and returns an empty body for it.
    ///
    /// The body reserves `this` (unless static) and the argument slots. Attach
    /// it with [`Self::add_method_body`] once assembled.
    pub fn add_method(&mut self, name: &str, descriptor: &str, access: u16, line_numbers: bool) -> Code {
        let arg_slots = MethodDescriptor::parse(descriptor)
            .unwrap_or_else(|err| panic!("method {name}: {err}"))
            .arg_slots();
        let receiver = u16::from(access & access::STATIC == 0);
        let name = self.pool.utf8(name);
        let descriptor = self.pool.utf8(descriptor);
        self.methods.push(Member {
            access,
            name,
            descriptor,
            attributes: Vec::new(),
        });
        Code::new(receiver + arg_slots, line_numbers)
    }

    /// Stores the finished body of the method declared as `name` `descriptor`.
    pub fn add_method_body(&mut self, name: &str, descriptor: &str, body: &CodeAttribute) {
        let name = self.pool.utf8(name);
        let descriptor = self.pool.utf8(descriptor);
        let code_name = self.pool.utf8("Code");
        let data = body.to_attribute_bytes(&mut self.pool);
        let method = self
            .methods
            .iter_mut()
            .rev()
            .find(|method| method.name == name && method.descriptor == descriptor)
            .unwrap_or_else(|| panic!("body for undeclared method #{name}"));
        method.attributes.retain(|attribute| attribute.name != code_name);
        method.attributes.push(Attribute { name: code_name, data });
    }

    /// Convenience for declaring a method and attaching its finished body in one go.
    pub fn add_method_with(
        &mut self,
        name: &str,
        descriptor: &str,
        access: u16,
        line_numbers: bool,
        build: impl FnOnce(&mut Code, &mut ConstantPool),
    ) -> Result<(), CodeError> {
        let mut code = self.add_method(name, descriptor, access, line_numbers);
        build(&mut code, &mut self.pool);
        let body = code.finish()?;
        self.add_method_body(name, descriptor, &body);
        Ok(())
    }

    pub fn set_source_file(&mut self, file_name: &str) {
        let value = self.pool.utf8(file_name);
        self.add_attribute("SourceFile", value.to_be_bytes().to_vec());
    }

    /// Adds a class-level attribute with raw contents.
    pub fn add_attribute(&mut self, name: &str, data: Vec<u8>) {
        let name = self.pool.utf8(name);
        self.attributes.push(Attribute { name, data });
    }

    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Serializes the class.
    ///
    /// Fails with `InvalidData` when the constant pool overflowed.
    pub fn write(&self, out: &mut impl Write) -> io::Result<()> {
        if self.pool.is_overflowed() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "constant pool overflow"));
        }
        out.write_all(&MAGIC.to_be_bytes())?;
        out.write_all(&self.version.minor.to_be_bytes())?;
        out.write_all(&self.version.major.to_be_bytes())?;
        self.pool.write(out)?;
        out.write_all(&self.access.to_be_bytes())?;
        out.write_all(&self.this_class.to_be_bytes())?;
        out.write_all(&self.super_class.to_be_bytes())?;
        out.write_all(&(self.interfaces.len() as u16).to_be_bytes())?;
        for interface in &self.interfaces {
            out.write_all(&interface.to_be_bytes())?;
        }
        for members in [&self.fields, &self.methods] {
            out.write_all(&(members.len() as u16).to_be_bytes())?;
            for member in members {
                member.write(out)?;
            }
        }
        out.write_all(&(self.attributes.len() as u16).to_be_bytes())?;
        for attribute in &self.attributes {
            attribute.write(out)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write(&mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn header_layout() {
        let class = ClassFile::new("Hello", "java/lang/Object", access::PUBLIC | access::SUPER, ClassVersion::default());
        let bytes = class.to_bytes().unwrap();
        assert_eq!(&bytes[..8], &[0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 49]);
        // Utf8 Hello, Class, Utf8 java/lang/Object, Class
        assert_eq!(&bytes[8..10], &[0, 5]);
    }

    #[test]
    fn method_reserves_receiver_and_args() {
        let mut class = ClassFile::new("A", "java/lang/Object", access::PUBLIC, ClassVersion::default());
        let code = class.add_method("m", "(JI)V", access::PUBLIC, false);
        let body = code.finish().unwrap();
        assert_eq!(body.max_locals, 4);
        let code = class.add_method("s", "(I)V", access::PUBLIC | access::STATIC, false);
        assert_eq!(code.finish().unwrap().max_locals, 1);
    }

    #[test]
    fn written_class_reads_back() {
        let mut class = ClassFile::new("A", "java/lang/Object", access::PUBLIC | access::SUPER, ClassVersion::default());
        class.add_field("x", "Ljava/lang/Object;", access::PUBLIC);
        class
            .add_method_with("<init>", "()V", access::PUBLIC, true, |code, pool| {
                code.set_line(1);
                code.aload(0);
                code.invokespecial(pool.methodref("java/lang/Object", "<init>", "()V"));
                code.emit(Opcode::Return);
            })
            .unwrap();
        class.set_source_file("a.py");
        let parsed = reader::parse_class(&class.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.name, "A");
        assert_eq!(parsed.super_name.as_deref(), Some("java/lang/Object"));
        assert_eq!(parsed.fields.len(), 1);
        let init = parsed.method("<init>", "()V").unwrap();
        let body = init.code.as_ref().unwrap();
        assert_eq!(body.code.len(), 5);
        assert_eq!(body.line_numbers, Some(vec![(0, 1)]));
        assert_eq!(parsed.source_file.as_deref(), Some("a.py"));
    }

    #[test]
    fn version_parsing() {
        assert_eq!("50.0".parse::<ClassVersion>().unwrap(), ClassVersion::new(50, 0));
        assert_eq!("52".parse::<ClassVersion>().unwrap(), ClassVersion::new(52, 0));
        assert!(ClassVersion::new(50, 0).supports_subroutines());
        assert!(!ClassVersion::new(51, 0).supports_subroutines());
    }
}
