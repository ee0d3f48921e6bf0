//! A small class-file assembler.
//!
//! Emits well-formed version 52 class files from a handful of declarations,
//! for synthesizing classes at runtime and for driving the real parser in
//! tests.

use std::collections::HashMap;

use crate::{
    class::Const,
    consts::{
        CLASS_FILE_MAGIC, CONSTANT_CLASS, CONSTANT_DOUBLE, CONSTANT_FIELDREF, CONSTANT_FLOAT,
        CONSTANT_INTEGER, CONSTANT_INTERFACE_METHODREF, CONSTANT_LONG, CONSTANT_METHODREF,
        CONSTANT_NAME_AND_TYPE, CONSTANT_STRING, CONSTANT_UTF8, CLASS_CLASS, CLONEABLE_CLASS,
        OBJECT_CLASS, SERIALIZABLE_CLASS, STRING_CLASS, SUPPORTED_MAJOR_VERSION, THROWABLE_CLASS,
    },
};

/// Builds a constant pool, deduplicating `Utf8`, `Class` and `NameAndType`
/// entries.
#[derive(Debug, Clone)]
pub struct PoolBuilder {
    bytes: Vec<u8>,
    next_index: u16,
    utf8s: HashMap<String, u16>,
    classes: HashMap<String, u16>,
    name_and_types: HashMap<(String, String), u16>,
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolBuilder {
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            next_index: 1,
            utf8s: HashMap::new(),
            classes: HashMap::new(),
            name_and_types: HashMap::new(),
        }
    }

    fn push(&mut self, tag: u8, payload: &[u8], width: u16) -> u16 {
        let index = self.next_index;
        self.bytes.push(tag);
        self.bytes.extend_from_slice(payload);
        self.next_index += width;
        index
    }

    /// Plain UTF-8 is valid modified UTF-8 as long as it has no NUL and no
    /// supplementary characters, which holds for every name used here.
    pub fn utf8(&mut self, value: &str) -> u16 {
        if let Some(&index) = self.utf8s.get(value) {
            return index;
        }
        let mut payload = (value.len() as u16).to_be_bytes().to_vec();
        payload.extend_from_slice(value.as_bytes());
        let index = self.push(CONSTANT_UTF8, &payload, 1);
        self.utf8s.insert(value.to_string(), index);
        index
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        self.push(CONSTANT_INTEGER, &value.to_be_bytes(), 1)
    }

    pub fn float(&mut self, value: f32) -> u16 {
        self.push(CONSTANT_FLOAT, &value.to_bits().to_be_bytes(), 1)
    }

    pub fn long(&mut self, value: i64) -> u16 {
        self.push(CONSTANT_LONG, &value.to_be_bytes(), 2)
    }

    pub fn double(&mut self, value: f64) -> u16 {
        self.push(CONSTANT_DOUBLE, &value.to_bits().to_be_bytes(), 2)
    }

    pub fn class(&mut self, name: &str) -> u16 {
        if let Some(&index) = self.classes.get(name) {
            return index;
        }
        let name_index = self.utf8(name);
        let index = self.push(CONSTANT_CLASS, &name_index.to_be_bytes(), 1);
        self.classes.insert(name.to_string(), index);
        index
    }

    pub fn string(&mut self, value: &str) -> u16 {
        let string_index = self.utf8(value);
        self.push(CONSTANT_STRING, &string_index.to_be_bytes(), 1)
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let key = (name.to_string(), descriptor.to_string());
        if let Some(&index) = self.name_and_types.get(&key) {
            return index;
        }
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let mut payload = name_index.to_be_bytes().to_vec();
        payload.extend_from_slice(&descriptor_index.to_be_bytes());
        let index = self.push(CONSTANT_NAME_AND_TYPE, &payload, 1);
        self.name_and_types.insert(key, index);
        index
    }

    fn member_ref(&mut self, tag: u8, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class);
        let name_and_type_index = self.name_and_type(name, descriptor);
        let mut payload = class_index.to_be_bytes().to_vec();
        payload.extend_from_slice(&name_and_type_index.to_be_bytes());
        self.push(tag, &payload, 1)
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(CONSTANT_FIELDREF, class, name, descriptor)
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(CONSTANT_METHODREF, class, name, descriptor)
    }

    pub fn interface_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(CONSTANT_INTERFACE_METHODREF, class, name, descriptor)
    }

    fn constant(&mut self, value: &Const) -> u16 {
        match value {
            Const::Byte(v)
            | Const::Char(v)
            | Const::Int(v)
            | Const::Short(v)
            | Const::Boolean(v) => self.integer(*v),
            Const::Float(v) => self.float(*v),
            Const::Long(v) => self.long(*v),
            Const::Double(v) => self.double(*v),
            Const::String(v) => self.string(v.as_str()),
        }
    }

    /// `constant_pool_count` followed by the entries.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.next_index.to_be_bytes().to_vec();
        out.extend_from_slice(&self.bytes);
        out
    }
}

#[derive(Debug, Clone)]
struct MemberDecl {
    access_flags: u16,
    name: u16,
    descriptor: u16,
    constant_value: Option<u16>,
    code: Option<CodeDecl>,
}

#[derive(Debug, Clone)]
struct CodeDecl {
    max_stack: u16,
    max_locals: u16,
    code: Vec<u8>,
    line_numbers: Vec<(u16, u16)>,
}

/// Assembles one class file.
///
/// ```
/// use jvm_core::class::{builder::ClassBuilder, parse_class_file};
///
/// let bytes = ClassBuilder::new("pkg/Point")
///     .field(0x0001, "x", "I")
///     .build();
/// assert!(parse_class_file(&bytes).is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ClassBuilder {
    pool: PoolBuilder,
    access_flags: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<MemberDecl>,
    methods: Vec<MemberDecl>,
    source_file: Option<u16>,
}

impl ClassBuilder {
    /// A public class extending `java/lang/Object`.
    pub fn new(name: &str) -> Self {
        let mut pool = PoolBuilder::new();
        let this_class = pool.class(name);
        let super_class = pool.class(OBJECT_CLASS);
        Self {
            pool,
            access_flags: 0x0021,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            source_file: None,
        }
    }

    /// A public interface.
    pub fn interface(name: &str) -> Self {
        Self::new(name).access(0x0601)
    }

    pub fn access(mut self, access_flags: u16) -> Self {
        self.access_flags = access_flags;
        self
    }

    pub fn super_class(mut self, name: &str) -> Self {
        self.super_class = self.pool.class(name);
        self
    }

    /// Only `java/lang/Object` may omit its superclass.
    pub fn no_super_class(mut self) -> Self {
        self.super_class = 0;
        self
    }

    pub fn implements(mut self, name: &str) -> Self {
        let index = self.pool.class(name);
        self.interfaces.push(index);
        self
    }

    pub fn field(mut self, access_flags: u16, name: &str, descriptor: &str) -> Self {
        let decl = self.member(access_flags, name, descriptor);
        self.fields.push(decl);
        self
    }

    /// A field with a `ConstantValue` attribute.
    pub fn constant_field(
        mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        value: Const,
    ) -> Self {
        let mut decl = self.member(access_flags, name, descriptor);
        decl.constant_value = Some(self.pool.constant(&value));
        self.fields.push(decl);
        self
    }

    pub fn method(
        mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        max_stack: u16,
        max_locals: u16,
        code: &[u8],
    ) -> Self {
        let mut decl = self.member(access_flags, name, descriptor);
        decl.code = Some(CodeDecl {
            max_stack,
            max_locals,
            code: code.to_vec(),
            line_numbers: Vec::new(),
        });
        self.methods.push(decl);
        self
    }

    /// A method without a `Code` attribute (abstract or native).
    pub fn bodiless_method(mut self, access_flags: u16, name: &str, descriptor: &str) -> Self {
        let decl = self.member(access_flags, name, descriptor);
        self.methods.push(decl);
        self
    }

    /// Attaches `(start_pc, line)` pairs to the most recently added method.
    pub fn line_numbers(mut self, lines: &[(u16, u16)]) -> Self {
        if let Some(code) = self.methods.last_mut().and_then(|m| m.code.as_mut()) {
            code.line_numbers.extend_from_slice(lines);
        }
        self
    }

    pub fn source_file(mut self, name: &str) -> Self {
        self.source_file = Some(self.pool.utf8(name));
        self
    }

    /// Direct access to the pool, e.g. to add references used as bytecode
    /// operands.
    pub fn pool(&mut self) -> &mut PoolBuilder {
        &mut self.pool
    }

    fn member(&mut self, access_flags: u16, name: &str, descriptor: &str) -> MemberDecl {
        MemberDecl {
            access_flags,
            name: self.pool.utf8(name),
            descriptor: self.pool.utf8(descriptor),
            constant_value: None,
            code: None,
        }
    }

    pub fn build(mut self) -> Vec<u8> {
        // attribute names must be in the pool before it is written
        let constant_value_name = self.pool.utf8("ConstantValue");
        let code_name = self.pool.utf8("Code");
        let lines_name = self.pool.utf8("LineNumberTable");
        let source_file_name = self.pool.utf8("SourceFile");

        let mut out = CLASS_FILE_MAGIC.to_be_bytes().to_vec();
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&SUPPORTED_MAJOR_VERSION.to_be_bytes());
        out.extend_from_slice(&self.pool.to_bytes());
        out.extend_from_slice(&self.access_flags.to_be_bytes());
        out.extend_from_slice(&self.this_class.to_be_bytes());
        out.extend_from_slice(&self.super_class.to_be_bytes());
        put_u2_list(&mut out, &self.interfaces);

        out.extend_from_slice(&(self.fields.len() as u16).to_be_bytes());
        for field in &self.fields {
            put_member_header(&mut out, field);
            match field.constant_value {
                Some(index) => {
                    out.extend_from_slice(&1u16.to_be_bytes());
                    put_attribute(&mut out, constant_value_name, &index.to_be_bytes());
                }
                None => out.extend_from_slice(&0u16.to_be_bytes()),
            }
        }

        out.extend_from_slice(&(self.methods.len() as u16).to_be_bytes());
        for method in &self.methods {
            put_member_header(&mut out, method);
            match &method.code {
                Some(code) => {
                    out.extend_from_slice(&1u16.to_be_bytes());
                    put_attribute(&mut out, code_name, &encode_code(code, lines_name));
                }
                None => out.extend_from_slice(&0u16.to_be_bytes()),
            }
        }

        match self.source_file {
            Some(index) => {
                out.extend_from_slice(&1u16.to_be_bytes());
                put_attribute(&mut out, source_file_name, &index.to_be_bytes());
            }
            None => out.extend_from_slice(&0u16.to_be_bytes()),
        }
        out
    }
}

fn encode_code(code: &CodeDecl, lines_name: u16) -> Vec<u8> {
    let mut body = code.max_stack.to_be_bytes().to_vec();
    body.extend_from_slice(&code.max_locals.to_be_bytes());
    body.extend_from_slice(&(code.code.len() as u32).to_be_bytes());
    body.extend_from_slice(&code.code);
    // empty exception table
    body.extend_from_slice(&0u16.to_be_bytes());
    if code.line_numbers.is_empty() {
        body.extend_from_slice(&0u16.to_be_bytes());
    } else {
        body.extend_from_slice(&1u16.to_be_bytes());
        let mut table = (code.line_numbers.len() as u16).to_be_bytes().to_vec();
        for (start_pc, line) in &code.line_numbers {
            table.extend_from_slice(&start_pc.to_be_bytes());
            table.extend_from_slice(&line.to_be_bytes());
        }
        put_attribute(&mut body, lines_name, &table);
    }
    body
}

fn put_member_header(out: &mut Vec<u8>, member: &MemberDecl) {
    out.extend_from_slice(&member.access_flags.to_be_bytes());
    out.extend_from_slice(&member.name.to_be_bytes());
    out.extend_from_slice(&member.descriptor.to_be_bytes());
}

fn put_attribute(out: &mut Vec<u8>, name: u16, body: &[u8]) {
    out.extend_from_slice(&name.to_be_bytes());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
}

fn put_u2_list(out: &mut Vec<u8>, values: &[u16]) {
    out.extend_from_slice(&(values.len() as u16).to_be_bytes());
    for value in values {
        out.extend_from_slice(&value.to_be_bytes());
    }
}

/// Skeletons of the bootstrap types the core refers to by name. Method bodies
/// are placeholders; anything real is native or left to the executor.
pub fn minimal_runtime_classes() -> Vec<(&'static str, Vec<u8>)> {
    const RETURN: &[u8] = &[0xb1];

    let object = ClassBuilder::new(OBJECT_CLASS)
        .no_super_class()
        .method(0x0001, "<init>", "()V", 0, 1, RETURN)
        // aload_0 aload_1 if_acmpne +5 iconst_1 ireturn iconst_0 ireturn
        .method(
            0x0001,
            "equals",
            "(Ljava/lang/Object;)Z",
            2,
            2,
            &[0x2a, 0x2b, 0xa6, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac],
        )
        .bodiless_method(0x0101, "hashCode", "()I")
        .bodiless_method(0x0101, "toString", "()Ljava/lang/String;")
        .bodiless_method(0x0104, "clone", "()Ljava/lang/Object;")
        .bodiless_method(0x0111, "getClass", "()Ljava/lang/Class;")
        .source_file("Object.java")
        .build();

    let serializable = ClassBuilder::interface(SERIALIZABLE_CLASS).build();
    let cloneable = ClassBuilder::interface(CLONEABLE_CLASS).build();

    let string = ClassBuilder::new(STRING_CLASS)
        .access(0x0031)
        .implements(SERIALIZABLE_CLASS)
        .field(0x0012, "value", "[C")
        .field(0x0002, "hash", "I")
        .method(0x0001, "<init>", "()V", 0, 1, RETURN)
        .bodiless_method(0x0101, "hashCode", "()I")
        .bodiless_method(0x0101, "length", "()I")
        .bodiless_method(0x0101, "intern", "()Ljava/lang/String;")
        .source_file("String.java")
        .build();

    let class = ClassBuilder::new(CLASS_CLASS)
        .access(0x0031)
        .implements(SERIALIZABLE_CLASS)
        .method(0x0002, "<init>", "()V", 0, 1, RETURN)
        .bodiless_method(0x0101, "getName", "()Ljava/lang/String;")
        .source_file("Class.java")
        .build();

    let throwable = ClassBuilder::new(THROWABLE_CLASS)
        .implements(SERIALIZABLE_CLASS)
        .field(0x0082, "backtrace", "Ljava/lang/Object;")
        .field(0x0002, "detailMessage", "Ljava/lang/String;")
        .method(0x0001, "<init>", "()V", 0, 1, RETURN)
        .bodiless_method(0x0121, "fillInStackTrace", "()Ljava/lang/Throwable;")
        .source_file("Throwable.java")
        .build();

    vec![
        (OBJECT_CLASS, object),
        (SERIALIZABLE_CLASS, serializable),
        (CLONEABLE_CLASS, cloneable),
        (STRING_CLASS, string),
        (CLASS_CLASS, class),
        (THROWABLE_CLASS, throwable),
    ]
}
