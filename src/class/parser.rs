use crate::{
    class::{
        BytecodeReader, ClassAttributes, MemberAttributes, Symbol, parse_class_attributes,
        parse_member_attributes,
    },
    consts::{CLASS_FILE_MAGIC, ClassAccessFlag, SUPPORTED_MAJOR_VERSION},
    runtime::{ConstantPool, Exception, VmResult},
};

/// A parsed but unlinked class file.
#[derive(Debug)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: ClassAccessFlag,
    pub this_class: u16,
    /// 0 only for `java/lang/Object`.
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub attributes: ClassAttributes,
}

#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub access_flags: u16,
    pub name: Symbol,
    pub descriptor: Symbol,
    pub attributes: MemberAttributes,
}

pub fn parse_class_file(input: &[u8]) -> VmResult<ClassFile> {
    let mut reader = BytecodeReader::new(input);

    let magic = reader.read_u4()?;
    if magic != CLASS_FILE_MAGIC {
        return Err(Exception::ClassFormat(format!("bad magic: {magic:#010x}")));
    }
    let minor_version = reader.read_u2()?;
    let major_version = reader.read_u2()?;
    if major_version != SUPPORTED_MAJOR_VERSION {
        return Err(Exception::ClassFormat(format!(
            "bad class version: {major_version}.{minor_version}"
        )));
    }

    let constant_pool = ConstantPool::parse(&mut reader)?;

    let access_flags = ClassAccessFlag::from_bits_retain(reader.read_u2()?);
    let this_class = reader.read_u2()?;
    let super_class = reader.read_u2()?;

    let interface_count = reader.read_u2()?;
    let interfaces = (0..interface_count)
        .map(|_| reader.read_u2())
        .collect::<VmResult<_>>()?;

    let fields = parse_members(&mut reader, &constant_pool)?;
    let methods = parse_members(&mut reader, &constant_pool)?;
    let attributes = parse_class_attributes(&mut reader, &constant_pool)?;

    if !reader.is_empty() {
        return Err(Exception::ClassFormat(format!(
            "{} trailing bytes after class file",
            reader.remaining()
        )));
    }

    Ok(ClassFile {
        minor_version,
        major_version,
        constant_pool,
        access_flags,
        this_class,
        super_class,
        interfaces,
        fields,
        methods,
        attributes,
    })
}

fn parse_members(
    reader: &mut BytecodeReader<'_>,
    constant_pool: &ConstantPool,
) -> VmResult<Vec<MemberInfo>> {
    let count = reader.read_u2()?;
    let mut members = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let access_flags = reader.read_u2()?;
        let name = constant_pool.utf8(reader.read_u2()?)?;
        let descriptor = constant_pool.utf8(reader.read_u2()?)?;
        let attributes = parse_member_attributes(reader, constant_pool)?;
        members.push(MemberInfo {
            access_flags,
            name,
            descriptor,
            attributes,
        });
    }
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::builder::ClassBuilder;

    #[test]
    fn test_parse_simple_class() {
        let bytes = ClassBuilder::new("pkg/Base")
            .field(0x0001, "x", "I")
            .method(0x0001, "get", "()I", 1, 1, &[0x1a, 0xac])
            .source_file("Base.java")
            .build();

        let class_file = parse_class_file(&bytes).unwrap();
        assert_eq!(class_file.major_version, 52);
        assert_eq!(
            class_file.constant_pool.class_name(class_file.this_class).unwrap(),
            "pkg/Base"
        );
        assert_eq!(
            class_file.constant_pool.class_name(class_file.super_class).unwrap(),
            "java/lang/Object"
        );
        assert_eq!(class_file.fields.len(), 1);
        assert_eq!(class_file.fields[0].name, "x");
        let get = &class_file.methods[0];
        assert_eq!(get.descriptor, "()I");
        assert_eq!(get.attributes.code.as_ref().unwrap().code.len(), 2);
        assert_eq!(class_file.attributes.source_file.unwrap(), "Base.java");
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = ClassBuilder::new("pkg/Base").build();
        bytes[..4].copy_from_slice(&0xDEAD_BEEFu32.to_be_bytes());
        let err = parse_class_file(&bytes).unwrap_err();
        assert!(matches!(err, Exception::ClassFormat(msg) if msg.contains("0xdeadbeef")));
    }

    #[test]
    fn test_bad_version() {
        let mut bytes = ClassBuilder::new("pkg/Base").build();
        bytes[6..8].copy_from_slice(&61u16.to_be_bytes());
        let err = parse_class_file(&bytes).unwrap_err();
        assert!(matches!(err, Exception::ClassFormat(msg) if msg.contains("bad class version")));
    }

    #[test]
    fn test_truncated_and_trailing() {
        let bytes = ClassBuilder::new("pkg/Base").build();
        let err = parse_class_file(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, Exception::TruncatedInput { .. }));

        let mut padded = bytes.clone();
        padded.push(0);
        assert!(matches!(
            parse_class_file(&padded),
            Err(Exception::ClassFormat(_))
        ));
    }
}
