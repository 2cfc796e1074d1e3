//! Class-file reader.
//!
//! Parses the subset of the format the compiler writes: the constant pool,
//! members, `Code` attributes with their exception and line tables, and class
//! attributes. Used by the disassembler, the stack verifier and the tests.

use super::{
    code::{CodeAttribute, ExceptionEntry},
    pool::{PoolEntry, decode_modified_utf8, tag},
    ClassVersion, MAGIC,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    #[error("unexpected end of class file at offset {0}")]
    Truncated(usize),
    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),
    #[error("unknown constant pool tag {tag} at index {index}")]
    UnknownTag { tag: u8, index: u16 },
    #[error("constant pool index {0} is not a {1}")]
    BadIndex(u16, &'static str),
    #[error("malformed modified UTF-8 at index {0}")]
    BadUtf8(u16),
    #[error("{0} trailing bytes after class")]
    Trailing(usize),
}

/// A field or method read from a class file.
#[derive(Debug, Clone)]
pub struct ParsedMember {
    pub access: u16,
    pub name: String,
    pub descriptor: String,
    pub code: Option<CodeAttribute>,
    /// Attributes other than `Code`, by name.
    pub attributes: Vec<(String, Vec<u8>)>,
}

/// A class file read back into memory.
#[derive(Debug, Clone)]
pub struct ParsedClass {
    pub version: ClassVersion,
    pub access: u16,
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    /// Indexed by pool index; slot 0 and the upper half of wide entries are `None`.
    pub pool: Vec<Option<PoolEntry>>,
    pub fields: Vec<ParsedMember>,
    pub methods: Vec<ParsedMember>,
    pub source_file: Option<String>,
    /// Class attributes other than `SourceFile`.
    pub attributes: Vec<(String, Vec<u8>)>,
}

impl ParsedClass {
    #[must_use]
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&ParsedMember> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.descriptor == descriptor)
    }

    #[must_use]
    pub fn methods_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ParsedMember> + 'a {
        self.methods.iter().filter(move |method| method.name == name)
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&ParsedMember> {
        self.fields.iter().find(|field| field.name == name)
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&[u8]> {
        self.attributes
            .iter()
            .find(|(attr, _)| attr == name)
            .map(|(_, data)| data.as_slice())
    }

    #[must_use]
    pub fn entry(&self, index: u16) -> Option<&PoolEntry> {
        self.pool.get(usize::from(index))?.as_ref()
    }

    pub fn utf8(&self, index: u16) -> Result<&str, ReadError> {
        match self.entry(index) {
            Some(PoolEntry::Utf8(text)) => Ok(text),
            _ => Err(ReadError::BadIndex(index, "Utf8")),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&str, ReadError> {
        match self.entry(index) {
            Some(PoolEntry::Class(name)) => self.utf8(*name),
            _ => Err(ReadError::BadIndex(index, "Class")),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str), ReadError> {
        match self.entry(index) {
            Some(PoolEntry::NameAndType { name, descriptor }) => Ok((self.utf8(*name)?, self.utf8(*descriptor)?)),
            _ => Err(ReadError::BadIndex(index, "NameAndType")),
        }
    }

    /// Resolves a field or method ref to `(class, name, descriptor)`.
    pub fn member_ref(&self, index: u16) -> Result<(&str, &str, &str), ReadError> {
        match self.entry(index) {
            Some(
                PoolEntry::Fieldref { class, name_and_type }
                | PoolEntry::Methodref { class, name_and_type }
                | PoolEntry::InterfaceMethodref { class, name_and_type },
            ) => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok((self.class_name(*class)?, name, descriptor))
            }
            _ => Err(ReadError::BadIndex(index, "member ref")),
        }
    }

    /// Whether the pool holds a ref to member `name` of `owner`.
    #[must_use]
    pub fn references(&self, owner: &str, name: &str) -> bool {
        (0..self.pool.len() as u16).any(|index| {
            self.member_ref(index)
                .is_ok_and(|(class, member, _)| class == owner && member == name)
        })
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ReadError> {
        let end = self.at.checked_add(n).filter(|end| *end <= self.bytes.len());
        let end = end.ok_or(ReadError::Truncated(self.at))?;
        let slice = &self.bytes[self.at..end];
        self.at = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ReadError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ReadError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ReadError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, ReadError> {
        Ok((u64::from(self.u32()?) << 32) | u64::from(self.u32()?))
    }
}

/// Parses a complete class file.
pub fn parse_class(bytes: &[u8]) -> Result<ParsedClass, ReadError> {
    let mut cur = Cursor { bytes, at: 0 };
    let magic = cur.u32()?;
    if magic != MAGIC {
        return Err(ReadError::BadMagic(magic));
    }
    let minor = cur.u16()?;
    let major = cur.u16()?;
    let pool = read_pool(&mut cur)?;

    let mut class = ParsedClass {
        version: ClassVersion { major, minor },
        access: 0,
        name: String::new(),
        super_name: None,
        interfaces: Vec::new(),
        pool,
        fields: Vec::new(),
        methods: Vec::new(),
        source_file: None,
        attributes: Vec::new(),
    };

    class.access = cur.u16()?;
    let this_class = cur.u16()?;
    class.name = class.class_name(this_class)?.to_owned();
    let super_class = cur.u16()?;
    if super_class != 0 {
        class.super_name = Some(class.class_name(super_class)?.to_owned());
    }
    for _ in 0..cur.u16()? {
        let index = cur.u16()?;
        let name = class.class_name(index)?.to_owned();
        class.interfaces.push(name);
    }
    for _ in 0..cur.u16()? {
        let field = read_member(&mut cur, &class)?;
        class.fields.push(field);
    }
    for _ in 0..cur.u16()? {
        let method = read_member(&mut cur, &class)?;
        class.methods.push(method);
    }
    for (name, data) in read_attributes(&mut cur, &class)? {
        if name == "SourceFile" && data.len() == 2 {
            let index = u16::from_be_bytes([data[0], data[1]]);
            class.source_file = Some(class.utf8(index)?.to_owned());
        } else {
            class.attributes.push((name, data));
        }
    }
    if cur.at != bytes.len() {
        return Err(ReadError::Trailing(bytes.len() - cur.at));
    }
    Ok(class)
}

fn read_pool(cur: &mut Cursor<'_>) -> Result<Vec<Option<PoolEntry>>, ReadError> {
    let count = cur.u16()?;
    let mut pool = vec![None];
    while pool.len() < usize::from(count) {
        let index = pool.len() as u16;
        let entry_tag = cur.u8()?;
        let entry = match entry_tag {
            tag::UTF8 => {
                let len = cur.u16()?;
                let text = decode_modified_utf8(cur.take(usize::from(len))?).ok_or(ReadError::BadUtf8(index))?;
                PoolEntry::Utf8(text)
            }
            tag::INTEGER => PoolEntry::Integer(cur.u32()? as i32),
            tag::FLOAT => PoolEntry::Float(cur.u32()?),
            tag::LONG => PoolEntry::Long(cur.u64()? as i64),
            tag::DOUBLE => PoolEntry::Double(cur.u64()?),
            tag::CLASS => PoolEntry::Class(cur.u16()?),
            tag::STRING => PoolEntry::String(cur.u16()?),
            tag::FIELDREF => PoolEntry::Fieldref {
                class: cur.u16()?,
                name_and_type: cur.u16()?,
            },
            tag::METHODREF => PoolEntry::Methodref {
                class: cur.u16()?,
                name_and_type: cur.u16()?,
            },
            tag::INTERFACE_METHODREF => PoolEntry::InterfaceMethodref {
                class: cur.u16()?,
                name_and_type: cur.u16()?,
            },
            tag::NAME_AND_TYPE => PoolEntry::NameAndType {
                name: cur.u16()?,
                descriptor: cur.u16()?,
            },
            other => return Err(ReadError::UnknownTag { tag: other, index }),
        };
        let wide = entry.width() == 2;
        pool.push(Some(entry));
        if wide {
            pool.push(None);
        }
    }
    Ok(pool)
}

fn read_attributes(cur: &mut Cursor<'_>, class: &ParsedClass) -> Result<Vec<(String, Vec<u8>)>, ReadError> {
    let count = cur.u16()?;
    let mut attributes = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let name = class.utf8(cur.u16()?)?.to_owned();
        let len = cur.u32()? as usize;
        attributes.push((name, cur.take(len)?.to_vec()));
    }
    Ok(attributes)
}

fn read_member(cur: &mut Cursor<'_>, class: &ParsedClass) -> Result<ParsedMember, ReadError> {
    let access = cur.u16()?;
    let name = class.utf8(cur.u16()?)?.to_owned();
    let descriptor = class.utf8(cur.u16()?)?.to_owned();
    let mut member = ParsedMember {
        access,
        name,
        descriptor,
        code: None,
        attributes: Vec::new(),
    };
    for (name, data) in read_attributes(cur, class)? {
        if name == "Code" {
            member.code = Some(read_code(&data, class)?);
        } else {
            member.attributes.push((name, data));
        }
    }
    Ok(member)
}

fn read_code(data: &[u8], class: &ParsedClass) -> Result<CodeAttribute, ReadError> {
    let mut cur = Cursor { bytes: data, at: 0 };
    let max_stack = cur.u16()?;
    let max_locals = cur.u16()?;
    let len = cur.u32()? as usize;
    let code = cur.take(len)?.to_vec();
    let mut exception_table = Vec::new();
    for _ in 0..cur.u16()? {
        exception_table.push(ExceptionEntry {
            start_pc: cur.u16()?,
            end_pc: cur.u16()?,
            handler_pc: cur.u16()?,
            catch_type: cur.u16()?,
        });
    }
    let mut line_numbers = None;
    for (name, data) in read_attributes(&mut cur, class)? {
        if name == "LineNumberTable" {
            let mut lines_cur = Cursor { bytes: &data, at: 0 };
            let mut lines = Vec::new();
            for _ in 0..lines_cur.u16()? {
                lines.push((lines_cur.u16()?, lines_cur.u16()?));
            }
            line_numbers = Some(lines);
        }
    }
    Ok(CodeAttribute {
        max_stack,
        max_locals,
        code,
        exception_table,
        line_numbers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_magic() {
        assert_eq!(
            parse_class(&[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 49]).unwrap_err(),
            ReadError::BadMagic(0xDEAD_BEEF)
        );
    }

    #[test]
    fn rejects_truncated_pool() {
        let bytes = [0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 49, 0, 3, tag::UTF8, 0, 5, b'a'];
        assert!(matches!(parse_class(&bytes), Err(ReadError::Truncated(_))));
    }
}
