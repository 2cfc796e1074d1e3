//! JVM type descriptors.
//!
//! The assembler needs the operand-stack width of every field and method it
//! references, and the proxy generator needs to spell native signatures. Both
//! go through [`JavaType`] and [`MethodDescriptor`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// A JVM field type (or `void` for method returns).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum JavaType {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Char,
    Void,
    /// A class or interface, by internal (slash separated) name.
    Object(String),
    Array(Box<JavaType>),
}

impl JavaType {
    /// Object type from an internal name such as `org/python/core/PyObject`.
    #[must_use]
    pub fn object(internal_name: impl Into<String>) -> Self {
        Self::Object(internal_name.into())
    }

    /// Array of `self`.
    #[must_use]
    pub fn array_of(self) -> Self {
        Self::Array(Box::new(self))
    }

    /// Parses a source-level type name: `int`, `java.lang.String`, `byte[]`.
    ///
    /// Returns `None` for an empty name or a malformed array suffix.
    #[must_use]
    pub fn from_source_name(name: &str) -> Option<Self> {
        let name = name.trim();
        if let Some(element) = name.strip_suffix("[]") {
            return Self::from_source_name(element).map(Self::array_of);
        }
        if name.is_empty() || name.contains(['[', ']']) {
            return None;
        }
        Some(match name {
            "boolean" => Self::Boolean,
            "byte" => Self::Byte,
            "short" => Self::Short,
            "int" => Self::Int,
            "long" => Self::Long,
            "float" => Self::Float,
            "double" => Self::Double,
            "char" => Self::Char,
            "void" => Self::Void,
            other => Self::Object(internal_name(other)),
        })
    }

    /// Number of operand-stack (and local-variable) slots a value occupies.
    #[must_use]
    pub fn slots(&self) -> u16 {
        match self {
            Self::Void => 0,
            Self::Long | Self::Double => 2,
            _ => 1,
        }
    }

    /// Whether values of this type are references.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Array(_))
    }

    /// Appends the descriptor form (`I`, `Ljava/lang/String;`, `[B`) to `out`.
    pub fn write_descriptor(&self, out: &mut String) {
        match self {
            Self::Boolean => out.push('Z'),
            Self::Byte => out.push('B'),
            Self::Short => out.push('S'),
            Self::Int => out.push('I'),
            Self::Long => out.push('J'),
            Self::Float => out.push('F'),
            Self::Double => out.push('D'),
            Self::Char => out.push('C'),
            Self::Void => out.push('V'),
            Self::Object(name) => {
                out.push('L');
                out.push_str(name);
                out.push(';');
            }
            Self::Array(element) => {
                out.push('[');
                element.write_descriptor(out);
            }
        }
    }

    /// The descriptor string of this type.
    #[must_use]
    pub fn descriptor(&self) -> String {
        let mut out = String::new();
        self.write_descriptor(&mut out);
        out
    }

    /// The name `Class.getName()` would report, as used by `Py.tojava`.
    ///
    /// Arrays use descriptor syntax with dots (`[Ljava.lang.String;`).
    #[must_use]
    pub fn runtime_name(&self) -> String {
        match self {
            Self::Object(name) => name.replace('/', "."),
            Self::Array(_) => self.descriptor().replace('/', "."),
            primitive => primitive.to_string(),
        }
    }

    /// Parses one field descriptor from the front of `desc`, returning the rest.
    fn parse_prefix(desc: &str) -> Result<(Self, &str), DescriptorError> {
        let mut chars = desc.chars();
        let head = chars.next().ok_or_else(|| DescriptorError::new(desc))?;
        let rest = chars.as_str();
        let ty = match head {
            'Z' => Self::Boolean,
            'B' => Self::Byte,
            'S' => Self::Short,
            'I' => Self::Int,
            'J' => Self::Long,
            'F' => Self::Float,
            'D' => Self::Double,
            'C' => Self::Char,
            'V' => Self::Void,
            'L' => {
                let end = rest.find(';').ok_or_else(|| DescriptorError::new(desc))?;
                if end == 0 {
                    return Err(DescriptorError::new(desc));
                }
                return Ok((Self::Object(rest[..end].to_owned()), &rest[end + 1..]));
            }
            '[' => {
                let (element, rest) = Self::parse_prefix(rest)?;
                if element == Self::Void {
                    return Err(DescriptorError::new(desc));
                }
                return Ok((element.array_of(), rest));
            }
            _ => return Err(DescriptorError::new(desc)),
        };
        Ok((ty, rest))
    }

    /// Parses a complete field descriptor.
    pub fn parse(desc: &str) -> Result<Self, DescriptorError> {
        match Self::parse_prefix(desc)? {
            (ty, "") => Ok(ty),
            _ => Err(DescriptorError::new(desc)),
        }
    }
}

impl fmt::Display for JavaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => f.write_str("boolean"),
            Self::Byte => f.write_str("byte"),
            Self::Short => f.write_str("short"),
            Self::Int => f.write_str("int"),
            Self::Long => f.write_str("long"),
            Self::Float => f.write_str("float"),
            Self::Double => f.write_str("double"),
            Self::Char => f.write_str("char"),
            Self::Void => f.write_str("void"),
            Self::Object(name) => f.write_str(&name.replace('/', ".")),
            Self::Array(element) => write!(f, "{element}[]"),
        }
    }
}

impl TryFrom<String> for JavaType {
    type Error = DescriptorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_source_name(&value).ok_or_else(|| DescriptorError::new(&value))
    }
}

impl From<JavaType> for String {
    fn from(value: JavaType) -> Self {
        value.to_string()
    }
}

/// A parsed method descriptor `(params)ret`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub params: Vec<JavaType>,
    pub ret: JavaType,
}

impl MethodDescriptor {
    #[must_use]
    pub fn new(params: Vec<JavaType>, ret: JavaType) -> Self {
        Self { params, ret }
    }

    pub fn parse(desc: &str) -> Result<Self, DescriptorError> {
        let mut rest = desc.strip_prefix('(').ok_or_else(|| DescriptorError::new(desc))?;
        let mut params = Vec::new();
        while !rest.starts_with(')') {
            let (param, tail) = JavaType::parse_prefix(rest).map_err(|_| DescriptorError::new(desc))?;
            if param == JavaType::Void {
                return Err(DescriptorError::new(desc));
            }
            params.push(param);
            rest = tail;
        }
        let ret = JavaType::parse(&rest[1..]).map_err(|_| DescriptorError::new(desc))?;
        Ok(Self { params, ret })
    }

    /// Slots consumed by the arguments, excluding any receiver.
    #[must_use]
    pub fn arg_slots(&self) -> u16 {
        self.params.iter().map(JavaType::slots).sum()
    }

    /// Net operand-stack effect of a static call: return slots minus argument slots.
    #[must_use]
    pub fn stack_delta(&self) -> i32 {
        i32::from(self.ret.slots()) - i32::from(self.arg_slots())
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::from("(");
        for param in &self.params {
            param.write_descriptor(&mut out);
        }
        out.push(')');
        self.ret.write_descriptor(&mut out);
        f.write_str(&out)
    }
}

/// Converts a dotted class name to its internal form.
#[must_use]
pub fn internal_name(dotted: &str) -> String {
    dotted.replace('.', "/")
}

/// Builds a method descriptor string from parts.
#[must_use]
pub fn method_descriptor(params: &[JavaType], ret: &JavaType) -> String {
    let mut out = String::from("(");
    for param in params {
        param.write_descriptor(&mut out);
    }
    out.push(')');
    ret.write_descriptor(&mut out);
    out
}

/// A malformed descriptor or type name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed descriptor {text:?}")]
pub struct DescriptorError {
    text: String,
}

impl DescriptorError {
    fn new(text: &str) -> Self {
        Self { text: text.to_owned() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_descriptor_slots() {
        let desc = MethodDescriptor::parse("(IJLjava/lang/String;[D)D").unwrap();
        assert_eq!(desc.params.len(), 4);
        assert_eq!(desc.arg_slots(), 5);
        assert_eq!(desc.stack_delta(), -3);
        assert_eq!(desc.to_string(), "(IJLjava/lang/String;[D)D");
    }

    #[test]
    fn source_names_map_to_descriptors() {
        let ty = JavaType::from_source_name("java.lang.String[]").unwrap();
        assert_eq!(ty.descriptor(), "[Ljava/lang/String;");
        assert_eq!(ty.runtime_name(), "[Ljava.lang.String;");
        assert_eq!(JavaType::from_source_name("int").unwrap().slots(), 1);
        assert_eq!(JavaType::from_source_name("double").unwrap().slots(), 2);
        assert!(JavaType::from_source_name("int[").is_none());
    }

    #[test]
    fn rejects_malformed() {
        assert!(MethodDescriptor::parse("(I").is_err());
        assert!(MethodDescriptor::parse("(V)V").is_err());
        assert!(JavaType::parse("Ljava/lang/String").is_err());
        assert!(JavaType::parse("II").is_err());
    }
}
