use std::sync::Arc;

use parking_lot::RwLock;

use crate::{
    class::{BytecodeReader, Symbol},
    consts::*,
    runtime::{Class, Exception, Field, Method, ObjectRef, VmResult},
};

/// One tagged constant-pool slot.
///
/// The `Resolved*` variants replace their symbolic counterparts in place the
/// first time the entry is resolved.
#[derive(Debug, Clone)]
pub enum ConstantPoolEntry {
    Invalid,
    /// Second slot of a `Long`/`Double`.
    Placeholder,
    Utf8(Symbol),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class {
        name_index: u16,
    },
    String {
        string_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    Fieldref {
        class_index: u16,
        name_and_type_index: u16,
    },
    Methodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    MethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    MethodType {
        descriptor_index: u16,
    },
    Dynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    ResolvedClass(Arc<Class>),
    ResolvedMethod(Arc<Method>),
    ResolvedField(Arc<Field>),
    ResolvedString(ObjectRef),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConstantTag {
    Invalid,
    Placeholder,
    Utf8,
    Integer,
    Float,
    Long,
    Double,
    Class,
    String,
    NameAndType,
    Fieldref,
    Methodref,
    InterfaceMethodref,
    MethodHandle,
    MethodType,
    Dynamic,
    InvokeDynamic,
    ResolvedClass,
    ResolvedMethod,
    ResolvedField,
    ResolvedString,
}

impl ConstantPoolEntry {
    pub fn tag(&self) -> ConstantTag {
        match self {
            ConstantPoolEntry::Invalid => ConstantTag::Invalid,
            ConstantPoolEntry::Placeholder => ConstantTag::Placeholder,
            ConstantPoolEntry::Utf8(_) => ConstantTag::Utf8,
            ConstantPoolEntry::Integer(_) => ConstantTag::Integer,
            ConstantPoolEntry::Float(_) => ConstantTag::Float,
            ConstantPoolEntry::Long(_) => ConstantTag::Long,
            ConstantPoolEntry::Double(_) => ConstantTag::Double,
            ConstantPoolEntry::Class { .. } => ConstantTag::Class,
            ConstantPoolEntry::String { .. } => ConstantTag::String,
            ConstantPoolEntry::NameAndType { .. } => ConstantTag::NameAndType,
            ConstantPoolEntry::Fieldref { .. } => ConstantTag::Fieldref,
            ConstantPoolEntry::Methodref { .. } => ConstantTag::Methodref,
            ConstantPoolEntry::InterfaceMethodref { .. } => ConstantTag::InterfaceMethodref,
            ConstantPoolEntry::MethodHandle { .. } => ConstantTag::MethodHandle,
            ConstantPoolEntry::MethodType { .. } => ConstantTag::MethodType,
            ConstantPoolEntry::Dynamic { .. } => ConstantTag::Dynamic,
            ConstantPoolEntry::InvokeDynamic { .. } => ConstantTag::InvokeDynamic,
            ConstantPoolEntry::ResolvedClass(_) => ConstantTag::ResolvedClass,
            ConstantPoolEntry::ResolvedMethod(_) => ConstantTag::ResolvedMethod,
            ConstantPoolEntry::ResolvedField(_) => ConstantTag::ResolvedField,
            ConstantPoolEntry::ResolvedString(_) => ConstantTag::ResolvedString,
        }
    }
}

/// Symbolic view of a field or method reference.
#[derive(Debug, Clone)]
pub struct MemberRef {
    pub class_index: u16,
    pub name: Symbol,
    pub descriptor: Symbol,
}

/// Per-class constant pool. Index 0 is reserved.
///
/// Each slot sits behind its own lock only so that a resolved value is
/// published safely; resolution itself runs unlocked and the last writer wins.
#[derive(Debug)]
pub struct ConstantPool {
    entries: Box<[RwLock<ConstantPoolEntry>]>,
}

impl ConstantPool {
    /// Reads the pool count and entries; `reader` must sit at the count field.
    pub fn parse(reader: &mut BytecodeReader<'_>) -> VmResult<ConstantPool> {
        let count = reader.read_u2()? as usize;
        let mut entries = Vec::with_capacity(count.max(1));
        entries.push(ConstantPoolEntry::Invalid);

        while entries.len() < count {
            let tag = reader.read_u1()?;
            let entry = match tag {
                CONSTANT_UTF8 => {
                    let length = reader.read_u2()?;
                    let bytes = reader.read_bytes(length as usize)?;
                    ConstantPoolEntry::Utf8(Symbol::intern(bytes)?)
                }
                CONSTANT_INTEGER => ConstantPoolEntry::Integer(reader.read_u4()? as i32),
                CONSTANT_FLOAT => ConstantPoolEntry::Float(f32::from_bits(reader.read_u4()?)),
                CONSTANT_LONG => ConstantPoolEntry::Long(reader.read_u8()? as i64),
                CONSTANT_DOUBLE => ConstantPoolEntry::Double(f64::from_bits(reader.read_u8()?)),
                CONSTANT_CLASS => ConstantPoolEntry::Class {
                    name_index: reader.read_u2()?,
                },
                CONSTANT_STRING => ConstantPoolEntry::String {
                    string_index: reader.read_u2()?,
                },
                CONSTANT_METHOD_TYPE => ConstantPoolEntry::MethodType {
                    descriptor_index: reader.read_u2()?,
                },
                CONSTANT_NAME_AND_TYPE => ConstantPoolEntry::NameAndType {
                    name_index: reader.read_u2()?,
                    descriptor_index: reader.read_u2()?,
                },
                CONSTANT_FIELDREF => ConstantPoolEntry::Fieldref {
                    class_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                CONSTANT_METHODREF => ConstantPoolEntry::Methodref {
                    class_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                CONSTANT_INTERFACE_METHODREF => ConstantPoolEntry::InterfaceMethodref {
                    class_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                CONSTANT_DYNAMIC => ConstantPoolEntry::Dynamic {
                    bootstrap_method_attr_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                CONSTANT_INVOKE_DYNAMIC => ConstantPoolEntry::InvokeDynamic {
                    bootstrap_method_attr_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                CONSTANT_METHOD_HANDLE => ConstantPoolEntry::MethodHandle {
                    reference_kind: reader.read_u1()?,
                    reference_index: reader.read_u2()?,
                },
                _ => {
                    return Err(Exception::ClassFormat(format!("bad constant tag: {tag}")));
                }
            };
            let two_slots = matches!(
                entry,
                ConstantPoolEntry::Long(_) | ConstantPoolEntry::Double(_)
            );
            entries.push(entry);
            if two_slots {
                if entries.len() >= count {
                    return Err(Exception::ClassFormat(
                        "64-bit constant in last constant pool slot".to_string(),
                    ));
                }
                entries.push(ConstantPoolEntry::Placeholder);
            }
        }

        Ok(ConstantPool {
            entries: entries.into_iter().map(RwLock::new).collect(),
        })
    }

    /// Pool of a class with no class file behind it, e.g. an array class.
    pub fn empty() -> ConstantPool {
        ConstantPool {
            entries: Box::new([RwLock::new(ConstantPoolEntry::Invalid)]),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn tag(&self, index: u16) -> VmResult<ConstantTag> {
        Ok(self.slot(index)?.read().tag())
    }

    pub fn get(&self, index: u16) -> VmResult<ConstantPoolEntry> {
        Ok(self.slot(index)?.read().clone())
    }

    /// Stores a resolved value. Concurrent resolvers compute identical values,
    /// so overwriting is harmless.
    pub(crate) fn cache(&self, index: u16, entry: ConstantPoolEntry) {
        if let Some(slot) = self.entries.get(index as usize) {
            *slot.write() = entry;
        }
    }

    fn slot(&self, index: u16) -> VmResult<&RwLock<ConstantPoolEntry>> {
        if index == 0 {
            return Err(bad_index(index, "reserved"));
        }
        self.entries
            .get(index as usize)
            .ok_or_else(|| bad_index(index, "out of range"))
    }

    pub fn utf8(&self, index: u16) -> VmResult<Symbol> {
        match self.get(index)? {
            ConstantPoolEntry::Utf8(symbol) => Ok(symbol),
            other => Err(unexpected(index, "Utf8", &other)),
        }
    }

    /// Name of a `Class` entry, resolved or not.
    pub fn class_name(&self, index: u16) -> VmResult<Symbol> {
        match self.get(index)? {
            ConstantPoolEntry::Class { name_index } => self.utf8(name_index),
            ConstantPoolEntry::ResolvedClass(class) => Ok(class.name().clone()),
            other => Err(unexpected(index, "Class", &other)),
        }
    }

    pub fn name_and_type(&self, index: u16) -> VmResult<(Symbol, Symbol)> {
        match self.get(index)? {
            ConstantPoolEntry::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(name_index)?, self.utf8(descriptor_index)?)),
            other => Err(unexpected(index, "NameAndType", &other)),
        }
    }

    /// Literal of a `String` entry that has not been resolved yet.
    pub fn string_literal(&self, index: u16) -> VmResult<Symbol> {
        match self.get(index)? {
            ConstantPoolEntry::String { string_index } => self.utf8(string_index),
            other => Err(unexpected(index, "String", &other)),
        }
    }

    /// Symbolic parts of a `Fieldref`, `Methodref` or `InterfaceMethodref`.
    pub fn member_ref(&self, index: u16) -> VmResult<MemberRef> {
        let (class_index, name_and_type_index) = match self.get(index)? {
            ConstantPoolEntry::Fieldref {
                class_index,
                name_and_type_index,
            }
            | ConstantPoolEntry::Methodref {
                class_index,
                name_and_type_index,
            }
            | ConstantPoolEntry::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => (class_index, name_and_type_index),
            other => return Err(unexpected(index, "member reference", &other)),
        };
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        Ok(MemberRef {
            class_index,
            name,
            descriptor,
        })
    }
}

fn bad_index(index: u16, reason: &str) -> Exception {
    Exception::ClassFormat(format!("invalid constant pool index {index}: {reason}"))
}

fn unexpected(index: u16, expected: &str, found: &ConstantPoolEntry) -> Exception {
    Exception::ClassFormat(format!(
        "constant pool entry {index} is {:?}, expected {expected}",
        found.tag()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::builder::PoolBuilder;

    #[test]
    fn test_long_takes_two_slots() {
        let mut pool = PoolBuilder::new();
        let long = pool.long(0x1122_3344_5566_7788);
        let name = pool.utf8("after");
        assert_eq!(name, long + 2);
        let bytes = pool.to_bytes();

        let cp = ConstantPool::parse(&mut BytecodeReader::new(&bytes)).unwrap();
        assert_eq!(cp.len(), 4);
        assert_eq!(cp.tag(0).err().is_some(), true);
        assert!(matches!(
            cp.get(long).unwrap(),
            ConstantPoolEntry::Long(0x1122_3344_5566_7788)
        ));
        assert_eq!(cp.tag(long + 1).unwrap(), ConstantTag::Placeholder);
        assert_eq!(cp.utf8(name).unwrap(), "after");
    }

    #[test]
    fn test_double_and_float() {
        let mut pool = PoolBuilder::new();
        let double = pool.double(2.5);
        let float = pool.float(-1.25);
        let bytes = pool.to_bytes();

        let cp = ConstantPool::parse(&mut BytecodeReader::new(&bytes)).unwrap();
        assert!(matches!(cp.get(double).unwrap(), ConstantPoolEntry::Double(v) if v == 2.5));
        assert_eq!(cp.tag(double + 1).unwrap(), ConstantTag::Placeholder);
        assert!(matches!(cp.get(float).unwrap(), ConstantPoolEntry::Float(v) if v == -1.25));
    }

    #[test]
    fn test_member_ref() {
        let mut pool = PoolBuilder::new();
        let method = pool.method_ref("pkg/Base", "get", "()I");
        let bytes = pool.to_bytes();

        let cp = ConstantPool::parse(&mut BytecodeReader::new(&bytes)).unwrap();
        let member = cp.member_ref(method).unwrap();
        assert_eq!(cp.class_name(member.class_index).unwrap(), "pkg/Base");
        assert_eq!(member.name, "get");
        assert_eq!(member.descriptor, "()I");
        assert!(matches!(cp.utf8(method), Err(Exception::ClassFormat(_))));
    }

    #[test]
    fn test_bad_tag() {
        // count = 2, one entry with tag 2 (unused in the class-file format)
        let bytes = [0x00, 0x02, 0x02, 0x00, 0x00];
        let err = ConstantPool::parse(&mut BytecodeReader::new(&bytes)).unwrap_err();
        assert!(matches!(err, Exception::ClassFormat(msg) if msg.contains("bad constant tag")));
    }

    #[test]
    fn test_truncated_pool() {
        let bytes = [0x00, 0x03, CONSTANT_INTEGER, 0x00];
        let err = ConstantPool::parse(&mut BytecodeReader::new(&bytes)).unwrap_err();
        assert!(matches!(err, Exception::TruncatedInput { .. }));
    }
}
