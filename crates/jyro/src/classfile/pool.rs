//! Constant pool with structural deduplication.
//!
//! Every entry is interned: asking for an entry that already exists returns its
//! index instead of appending a copy. Composite entries (class, string, member
//! refs, name-and-type) intern their components first, so a member ref adds at
//! most five slots the first time it is seen and none afterwards.
//!
//! Each entry also knows its operand-stack size, which the assembler uses to
//! track stack depth through field accesses and calls without re-parsing
//! descriptors.

use std::io::{self, Write};

use indexmap::IndexMap;

use super::descriptor::{JavaType, MethodDescriptor};

/// Highest usable `constant_pool_count`; indices run `1..POOL_LIMIT`.
const POOL_LIMIT: u32 = u16::MAX as u32;

/// Index handed out once the pool has overflowed. The class is never written.
const OVERFLOW_PLACEHOLDER: u16 = u16::MAX;

pub mod tag {
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELDREF: u8 = 9;
    pub const METHODREF: u8 = 10;
    pub const INTERFACE_METHODREF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
}

/// One constant pool entry.
///
/// Floating point values are stored as raw bits so entries can be hashed and
/// compared structurally (`0.0` and `-0.0` are distinct constants).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PoolEntry {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    Fieldref { class: u16, name_and_type: u16 },
    Methodref { class: u16, name_and_type: u16 },
    InterfaceMethodref { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
}

impl PoolEntry {
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            Self::Utf8(_) => tag::UTF8,
            Self::Integer(_) => tag::INTEGER,
            Self::Float(_) => tag::FLOAT,
            Self::Long(_) => tag::LONG,
            Self::Double(_) => tag::DOUBLE,
            Self::Class(_) => tag::CLASS,
            Self::String(_) => tag::STRING,
            Self::Fieldref { .. } => tag::FIELDREF,
            Self::Methodref { .. } => tag::METHODREF,
            Self::InterfaceMethodref { .. } => tag::INTERFACE_METHODREF,
            Self::NameAndType { .. } => tag::NAME_AND_TYPE,
        }
    }

    /// Number of pool indices the entry occupies.
    #[must_use]
    pub fn width(&self) -> u16 {
        match self {
            Self::Long(_) | Self::Double(_) => 2,
            _ => 1,
        }
    }

    fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        out.write_all(&[self.tag()])?;
        match self {
            Self::Utf8(text) => {
                let bytes = modified_utf8(text);
                let len = u16::try_from(bytes.len())
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "UTF8 constant longer than 65535 bytes"))?;
                out.write_all(&len.to_be_bytes())?;
                out.write_all(&bytes)
            }
            Self::Integer(value) => out.write_all(&value.to_be_bytes()),
            Self::Float(bits) => out.write_all(&bits.to_be_bytes()),
            Self::Long(value) => out.write_all(&value.to_be_bytes()),
            Self::Double(bits) => out.write_all(&bits.to_be_bytes()),
            Self::Class(index) | Self::String(index) => out.write_all(&index.to_be_bytes()),
            Self::Fieldref { class, name_and_type }
            | Self::Methodref { class, name_and_type }
            | Self::InterfaceMethodref { class, name_and_type } => {
                out.write_all(&class.to_be_bytes())?;
                out.write_all(&name_and_type.to_be_bytes())
            }
            Self::NameAndType { name, descriptor } => {
                out.write_all(&name.to_be_bytes())?;
                out.write_all(&descriptor.to_be_bytes())
            }
        }
    }
}

/// An interned entry together with its operand-stack size.
///
/// `size` follows the assembler's convention: for loadable constants it is the
/// number of slots pushed, for a field ref it is the field width, and for a
/// method ref it is the return width minus the argument widths (receiver
/// excluded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolRef {
    pub index: u16,
    pub size: i32,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    index: u16,
    size: i32,
}

/// The constant pool of one class file under construction.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: IndexMap<PoolEntry, Slot, ahash::RandomState>,
    /// Pool index to position in `entries`; `None` for index 0 and the second
    /// half of wide entries.
    by_index: Vec<Option<usize>>,
    overflowed: bool,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: IndexMap::default(),
            by_index: vec![None],
            overflowed: false,
        }
    }

    /// Interns `entry`, returning its index.
    ///
    /// Once the pool is full this stops appending, returns a placeholder and
    /// marks the pool as overflowed; see [`Self::is_overflowed`].
    pub fn intern(&mut self, entry: PoolEntry, size: i32) -> u16 {
        if let Some(slot) = self.entries.get(&entry) {
            return slot.index;
        }
        let width = entry.width();
        let next = self.by_index.len() as u32;
        if self.overflowed || next + u32::from(width) > POOL_LIMIT {
            self.overflowed = true;
            return OVERFLOW_PLACEHOLDER;
        }
        let index = next as u16;
        let (position, _) = self.entries.insert_full(entry, Slot { index, size });
        self.by_index.push(Some(position));
        if width == 2 {
            self.by_index.push(None);
        }
        index
    }

    fn intern_ref(&mut self, entry: PoolEntry, size: i32) -> PoolRef {
        let index = self.intern(entry, size);
        PoolRef { index, size }
    }

    pub fn utf8(&mut self, text: &str) -> u16 {
        self.intern(PoolEntry::Utf8(text.to_owned()), 0)
    }

    pub fn integer(&mut self, value: i32) -> PoolRef {
        self.intern_ref(PoolEntry::Integer(value), 1)
    }

    pub fn float(&mut self, value: f32) -> PoolRef {
        self.intern_ref(PoolEntry::Float(value.to_bits()), 1)
    }

    pub fn long(&mut self, value: i64) -> PoolRef {
        self.intern_ref(PoolEntry::Long(value), 2)
    }

    pub fn double(&mut self, value: f64) -> PoolRef {
        self.intern_ref(PoolEntry::Double(value.to_bits()), 2)
    }

    pub fn string(&mut self, text: &str) -> PoolRef {
        let utf8 = self.utf8(text);
        self.intern_ref(PoolEntry::String(utf8), 1)
    }

    /// Class entry for an internal name (`java/lang/Object`) or array descriptor.
    pub fn class(&mut self, internal_name: &str) -> u16 {
        let name = self.utf8(internal_name);
        self.intern(PoolEntry::Class(name), 1)
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.intern(PoolEntry::NameAndType { name, descriptor }, 0)
    }

    pub fn fieldref(&mut self, class: &str, name: &str, descriptor: &str) -> PoolRef {
        let size = JavaType::parse(descriptor)
            .unwrap_or_else(|err| panic!("field {class}.{name}: {err}"))
            .slots();
        let class = self.class(class);
        let name_and_type = self.name_and_type(name, descriptor);
        self.intern_ref(PoolEntry::Fieldref { class, name_and_type }, i32::from(size))
    }

    pub fn methodref(&mut self, class: &str, name: &str, descriptor: &str) -> PoolRef {
        let size = method_size(class, name, descriptor);
        let class = self.class(class);
        let name_and_type = self.name_and_type(name, descriptor);
        self.intern_ref(PoolEntry::Methodref { class, name_and_type }, size)
    }

    pub fn interface_methodref(&mut self, class: &str, name: &str, descriptor: &str) -> PoolRef {
        let size = method_size(class, name, descriptor);
        let class = self.class(class);
        let name_and_type = self.name_and_type(name, descriptor);
        self.intern_ref(PoolEntry::InterfaceMethodref { class, name_and_type }, size)
    }

    /// Entry at `index`, or `None` for index 0, the upper half of a wide entry
    /// and indices past the end.
    #[must_use]
    pub fn get(&self, index: u16) -> Option<&PoolEntry> {
        let position = (*self.by_index.get(usize::from(index))?)?;
        self.entries.get_index(position).map(|(entry, _)| entry)
    }

    /// Operand-stack size recorded for the entry at `index`.
    #[must_use]
    pub fn size_of(&self, index: u16) -> Option<i32> {
        let position = (*self.by_index.get(usize::from(index))?)?;
        self.entries.get_index(position).map(|(_, slot)| slot.size)
    }

    /// Entries with their indices, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &PoolEntry)> {
        self.entries.iter().map(|(entry, slot)| (slot.index, entry))
    }

    /// The `constant_pool_count` value: one past the highest index.
    #[must_use]
    pub fn count(&self) -> u16 {
        self.by_index.len() as u16
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether an `intern` was refused because the index space ran out.
    #[must_use]
    pub fn is_overflowed(&self) -> bool {
        self.overflowed
    }

    /// Writes `constant_pool_count` followed by every entry.
    pub fn write(&self, out: &mut impl Write) -> io::Result<()> {
        out.write_all(&self.count().to_be_bytes())?;
        for entry in self.entries.keys() {
            entry.write_to(out)?;
        }
        Ok(())
    }
}

fn method_size(class: &str, name: &str, descriptor: &str) -> i32 {
    MethodDescriptor::parse(descriptor)
        .unwrap_or_else(|err| panic!("method {class}.{name}: {err}"))
        .stack_delta()
}

/// Encodes `text` in the class-file flavour of UTF-8.
///
/// NUL is written as two bytes and supplementary characters as a surrogate
/// pair of three-byte sequences.
#[must_use]
pub fn modified_utf8(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for unit in text.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// Length in bytes of the modified UTF-8 form of `text`.
#[must_use]
pub fn modified_utf8_len(text: &str) -> usize {
    text.encode_utf16()
        .map(|unit| match unit {
            0x0001..=0x007F => 1,
            0x0000 | 0x0080..=0x07FF => 2,
            _ => 3,
        })
        .sum()
}

/// Decodes modified UTF-8, as found in class files read back from disk.
pub fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let unit = if b & 0x80 == 0 {
            i += 1;
            u16::from(b)
        } else if b & 0xE0 == 0xC0 {
            let b2 = *bytes.get(i + 1)?;
            i += 2;
            (u16::from(b & 0x1F) << 6) | u16::from(b2 & 0x3F)
        } else if b & 0xF0 == 0xE0 {
            let b2 = *bytes.get(i + 1)?;
            let b3 = *bytes.get(i + 2)?;
            i += 3;
            (u16::from(b & 0x0F) << 12) | (u16::from(b2 & 0x3F) << 6) | u16::from(b3 & 0x3F)
        } else {
            return None;
        };
        units.push(unit);
    }
    String::from_utf16(&units).ok()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn first_index_is_one() {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.utf8("Code"), 1);
        assert!(pool.get(0).is_none());
        assert_eq!(pool.count(), 2);
    }

    #[test]
    fn wide_entries_take_two_slots() {
        let mut pool = ConstantPool::new();
        let long = pool.long(1 << 40);
        let next = pool.integer(7);
        assert_eq!(long.index, 1);
        assert_eq!(long.size, 2);
        assert_eq!(next.index, 3);
        assert!(pool.get(2).is_none());
        assert_eq!(pool.count(), 4);
    }

    #[test]
    fn member_refs_share_components() {
        let mut pool = ConstantPool::new();
        let getlocal = pool.methodref("org/python/core/PyFrame", "getlocal", "(I)Lorg/python/core/PyObject;");
        // utf8 class name, class, utf8 name, utf8 descriptor, name-and-type, methodref
        assert_eq!(pool.len(), 6);
        assert_eq!(getlocal.size, 0);
        let setlocal = pool.methodref(
            "org/python/core/PyFrame",
            "setlocal",
            "(ILorg/python/core/PyObject;)V",
        );
        assert_eq!(pool.len(), 10);
        assert_eq!(setlocal.size, -2);

        let field = pool.fieldref("org/python/core/Py", "None", "Lorg/python/core/PyObject;");
        assert_eq!(field.size, 1);
        assert_eq!(pool.size_of(field.index), Some(1));
    }

    #[test]
    fn floats_compare_by_bits() {
        let mut pool = ConstantPool::new();
        let pos = pool.double(0.0);
        let neg = pool.double(-0.0);
        assert_ne!(pos.index, neg.index);
        assert_eq!(pool.double(0.0).index, pos.index);
    }

    #[test]
    fn overflow_is_sticky() {
        let mut pool = ConstantPool::new();
        for i in 0..(POOL_LIMIT as i32 - 1) {
            pool.integer(i);
        }
        assert!(!pool.is_overflowed());
        assert_eq!(pool.count(), u16::MAX);
        assert_eq!(pool.integer(-1).index, OVERFLOW_PLACEHOLDER);
        assert!(pool.is_overflowed());
        // existing entries still resolve
        assert_eq!(pool.integer(0).index, 1);
    }

    #[test]
    fn modified_utf8_encodes_nul_and_supplementary() {
        assert_eq!(modified_utf8("a\0b"), vec![b'a', 0xC0, 0x80, b'b']);
        let emoji = "\u{1F600}";
        let encoded = modified_utf8(emoji);
        assert_eq!(encoded.len(), 6);
        assert_eq!(modified_utf8_len(emoji), 6);
        assert_eq!(decode_modified_utf8(&encoded).as_deref(), Some(emoji));
    }

    #[test]
    fn write_layout() {
        let mut pool = ConstantPool::new();
        pool.string("hi");
        let mut bytes = Vec::new();
        pool.write(&mut bytes).unwrap();
        assert_eq!(bytes, vec![0, 3, tag::UTF8, 0, 2, b'h', b'i', tag::STRING, 0, 1]);
    }

    #[derive(Debug, Clone)]
    enum Item {
        Int(i32),
        Long(i64),
        Text(String),
        Double(f64),
    }

    fn item() -> impl Strategy<Value = Item> {
        prop_oneof![
            (-4i32..4).prop_map(Item::Int),
            (-4i64..4).prop_map(Item::Long),
            "[a-c]{0,2}".prop_map(Item::Text),
            prop::sample::select(vec![0.0, -0.0, 1.5]).prop_map(Item::Double),
        ]
    }

    fn add(pool: &mut ConstantPool, item: &Item) -> u16 {
        match item {
            Item::Int(v) => pool.integer(*v).index,
            Item::Long(v) => pool.long(*v).index,
            Item::Text(s) => pool.string(s).index,
            Item::Double(v) => pool.double(*v).index,
        }
    }

    proptest! {
        #[test]
        fn interning_is_idempotent(items in prop::collection::vec(item(), 1..40)) {
            let mut pool = ConstantPool::new();
            let first: Vec<u16> = items.iter().map(|item| add(&mut pool, item)).collect();
            let count = pool.count();
            let again: Vec<u16> = items.iter().map(|item| add(&mut pool, item)).collect();
            prop_assert_eq!(first, again);
            prop_assert_eq!(pool.count(), count);
            prop_assert!(pool.iter().all(|(index, _)| index != 0));
        }
    }
}
