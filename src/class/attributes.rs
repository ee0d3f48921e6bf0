use std::sync::Arc;

use log::warn;

use crate::{
    class::{BytecodeReader, Symbol},
    runtime::{ConstantPool, ConstantPoolEntry, Exception, VmResult},
};

/// Attributes recognized on a `ClassFile`. Everything else is skipped.
#[derive(Debug, Default, Clone)]
pub struct ClassAttributes {
    pub signature: Option<Symbol>,
    pub synthetic: bool,
    pub deprecated: bool,
    pub source_file: Option<Symbol>,
    pub enclosing_method: Option<EnclosingMethod>,
    pub bootstrap_methods: Vec<BootstrapMethod>,
    pub annotations: Vec<Annotation>,
}

/// Attributes recognized on a field or a method.
///
/// Fields only ever carry `constant_value`; methods carry `code` and
/// `exceptions`.
#[derive(Debug, Default, Clone)]
pub struct MemberAttributes {
    pub code: Option<CodeAttribute>,
    pub constant_value: Option<u16>,
    pub exceptions: Vec<Symbol>,
    pub signature: Option<Symbol>,
    pub synthetic: bool,
    pub deprecated: bool,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone)]
pub struct EnclosingMethod {
    pub class_name: Symbol,
    /// `(name, descriptor)`, absent when the class is not enclosed by a method.
    pub method: Option<(Symbol, Symbol)>,
}

#[derive(Debug, Clone)]
pub struct BootstrapMethod {
    pub method_ref: u16,
    pub arguments: Vec<u16>,
}

#[derive(Debug, Clone)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Arc<[u8]>,
    pub exception_table: Vec<ExceptionTableItem>,
    pub line_numbers: Vec<LineNumberTableItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumberTableItem {
    pub start_pc: u16,
    pub line_number: u16,
}

#[derive(Debug, Clone)]
pub struct ExceptionTableItem {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// `None` catches everything (`finally`).
    pub catch_type: Option<Symbol>,
}

#[derive(Debug, Clone)]
pub struct Annotation {
    pub type_descriptor: Symbol,
    pub element_value_pairs: Vec<ElementValuePair>,
}

#[derive(Debug, Clone)]
pub struct ElementValuePair {
    pub element_name: Symbol,
    pub value: ElementValue,
}

#[derive(Debug, Clone)]
pub enum ElementValue {
    Const(Const),
    Enum {
        type_name: Symbol,
        const_name: Symbol,
    },
    Class(Symbol),
    Annotation(Annotation),
    Array(Vec<ElementValue>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    Byte(i32),
    Char(i32),
    Double(f64),
    Float(f32),
    Int(i32),
    Long(i64),
    Short(i32),
    Boolean(i32),
    String(Symbol),
}

impl CodeAttribute {
    /// Source line of the instruction starting at `pc`, if the method has a
    /// line number table.
    pub fn line_number(&self, pc: usize) -> Option<u16> {
        self.line_numbers
            .iter()
            .filter(|item| item.start_pc as usize <= pc)
            .max_by_key(|item| item.start_pc)
            .map(|item| item.line_number)
    }
}

pub fn parse_class_attributes(
    reader: &mut BytecodeReader<'_>,
    constant_pool: &ConstantPool,
) -> VmResult<ClassAttributes> {
    let mut attributes = ClassAttributes::default();
    let count = reader.read_u2()?;
    for _ in 0..count {
        let (name, mut body) = attribute_header(reader, constant_pool)?;
        match name.as_str() {
            "Signature" => attributes.signature = Some(constant_pool.utf8(body.read_u2()?)?),
            "Synthetic" => attributes.synthetic = true,
            "Deprecated" => attributes.deprecated = true,
            "SourceFile" => attributes.source_file = Some(constant_pool.utf8(body.read_u2()?)?),
            "EnclosingMethod" => {
                attributes.enclosing_method = Some(parse_enclosing_method(&mut body, constant_pool)?)
            }
            "BootstrapMethods" => {
                attributes.bootstrap_methods = parse_bootstrap_methods(&mut body)?
            }
            "RuntimeVisibleAnnotations" => {
                attributes.annotations = parse_optional_annotations(&mut body, constant_pool)
            }
            _ => {}
        }
    }
    Ok(attributes)
}

pub fn parse_member_attributes(
    reader: &mut BytecodeReader<'_>,
    constant_pool: &ConstantPool,
) -> VmResult<MemberAttributes> {
    let mut attributes = MemberAttributes::default();
    let count = reader.read_u2()?;
    for _ in 0..count {
        let (name, mut body) = attribute_header(reader, constant_pool)?;
        match name.as_str() {
            "Code" => attributes.code = Some(parse_code(&mut body, constant_pool)?),
            "ConstantValue" => attributes.constant_value = Some(body.read_u2()?),
            "Exceptions" => {
                let count = body.read_u2()?;
                attributes.exceptions = (0..count)
                    .map(|_| constant_pool.class_name(body.read_u2()?))
                    .collect::<VmResult<_>>()?;
            }
            "Signature" => attributes.signature = Some(constant_pool.utf8(body.read_u2()?)?),
            "Synthetic" => attributes.synthetic = true,
            "Deprecated" => attributes.deprecated = true,
            "RuntimeVisibleAnnotations" => {
                attributes.annotations = parse_optional_annotations(&mut body, constant_pool)
            }
            _ => {}
        }
    }
    Ok(attributes)
}

/// Reads `attribute_name_index` and `attribute_length` and returns a reader
/// confined to the attribute body. The outer reader is always left at the
/// next attribute.
fn attribute_header<'a>(
    reader: &mut BytecodeReader<'a>,
    constant_pool: &ConstantPool,
) -> VmResult<(Symbol, BytecodeReader<'a>)> {
    let name = constant_pool.utf8(reader.read_u2()?)?;
    let length = reader.read_u4()?;
    let body = reader.sub_reader(length as usize)?;
    Ok((name, body))
}

fn parse_enclosing_method(
    reader: &mut BytecodeReader<'_>,
    constant_pool: &ConstantPool,
) -> VmResult<EnclosingMethod> {
    let class_name = constant_pool.class_name(reader.read_u2()?)?;
    let method_index = reader.read_u2()?;
    let method = if method_index == 0 {
        None
    } else {
        Some(constant_pool.name_and_type(method_index)?)
    };
    Ok(EnclosingMethod { class_name, method })
}

fn parse_bootstrap_methods(reader: &mut BytecodeReader<'_>) -> VmResult<Vec<BootstrapMethod>> {
    let count = reader.read_u2()?;
    let mut methods = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let method_ref = reader.read_u2()?;
        let argument_count = reader.read_u2()?;
        let arguments = (0..argument_count)
            .map(|_| reader.read_u2())
            .collect::<VmResult<_>>()?;
        methods.push(BootstrapMethod {
            method_ref,
            arguments,
        });
    }
    Ok(methods)
}

fn parse_code(
    reader: &mut BytecodeReader<'_>,
    constant_pool: &ConstantPool,
) -> VmResult<CodeAttribute> {
    let max_stack = reader.read_u2()?;
    let max_locals = reader.read_u2()?;
    let code_length = reader.read_u4()?;
    let code: Arc<[u8]> = reader.read_bytes(code_length as usize)?.into();

    let exception_table_length = reader.read_u2()?;
    let mut exception_table = Vec::with_capacity(exception_table_length as usize);
    for _ in 0..exception_table_length {
        let start_pc = reader.read_u2()?;
        let end_pc = reader.read_u2()?;
        let handler_pc = reader.read_u2()?;
        let catch_type = match reader.read_u2()? {
            0 => None,
            index => Some(constant_pool.class_name(index)?),
        };
        exception_table.push(ExceptionTableItem {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        });
    }

    let mut line_numbers = Vec::new();
    let count = reader.read_u2()?;
    for _ in 0..count {
        let (name, mut body) = attribute_header(reader, constant_pool)?;
        if name.as_str() == "LineNumberTable" {
            let length = body.read_u2()?;
            for _ in 0..length {
                line_numbers.push(LineNumberTableItem {
                    start_pc: body.read_u2()?,
                    line_number: body.read_u2()?,
                });
            }
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

/// Element values nest through arrays and annotations; anything deeper than
/// this is rejected before it can exhaust the native stack.
const MAX_ANNOTATION_DEPTH: usize = 256;

/// Annotations are informational only; a malformed table is dropped rather
/// than failing the whole class.
fn parse_optional_annotations(
    reader: &mut BytecodeReader<'_>,
    constant_pool: &ConstantPool,
) -> Vec<Annotation> {
    match parse_annotations(reader, constant_pool) {
        Ok(annotations) => annotations,
        Err(err) => {
            warn!("ignoring malformed RuntimeVisibleAnnotations: {err}");
            Vec::new()
        }
    }
}

fn parse_annotations(
    reader: &mut BytecodeReader<'_>,
    constant_pool: &ConstantPool,
) -> VmResult<Vec<Annotation>> {
    let count = reader.read_u2()?;
    (0..count)
        .map(|_| parse_annotation(reader, constant_pool, 0))
        .collect()
}

fn parse_annotation(
    reader: &mut BytecodeReader<'_>,
    constant_pool: &ConstantPool,
    depth: usize,
) -> VmResult<Annotation> {
    let type_descriptor = constant_pool.utf8(reader.read_u2()?)?;
    let pair_count = reader.read_u2()?;
    let mut element_value_pairs = Vec::with_capacity(pair_count as usize);
    for _ in 0..pair_count {
        let element_name = constant_pool.utf8(reader.read_u2()?)?;
        let value = parse_element_value(reader, constant_pool, depth)?;
        element_value_pairs.push(ElementValuePair {
            element_name,
            value,
        });
    }
    Ok(Annotation {
        type_descriptor,
        element_value_pairs,
    })
}

fn parse_element_value(
    reader: &mut BytecodeReader<'_>,
    constant_pool: &ConstantPool,
    depth: usize,
) -> VmResult<ElementValue> {
    if depth >= MAX_ANNOTATION_DEPTH {
        return Err(Exception::ClassFormat("annotation nesting too deep".to_string()));
    }
    let tag = reader.read_u1()?;
    let value = match tag {
        b'B' | b'C' | b'I' | b'S' | b'Z' => {
            let Const::Int(v) = constant_value(constant_pool, reader.read_u2()?)? else {
                return Err(bad_element(tag));
            };
            ElementValue::Const(match tag {
                b'B' => Const::Byte(v),
                b'C' => Const::Char(v),
                b'S' => Const::Short(v),
                b'Z' => Const::Boolean(v),
                _ => Const::Int(v),
            })
        }
        b'D' | b'F' | b'J' | b's' => {
            let value = constant_value(constant_pool, reader.read_u2()?)?;
            let matches_tag = matches!(
                (tag, &value),
                (b'D', Const::Double(_))
                    | (b'F', Const::Float(_))
                    | (b'J', Const::Long(_))
                    | (b's', Const::String(_))
            );
            if !matches_tag {
                return Err(bad_element(tag));
            }
            ElementValue::Const(value)
        }
        b'e' => ElementValue::Enum {
            type_name: constant_pool.utf8(reader.read_u2()?)?,
            const_name: constant_pool.utf8(reader.read_u2()?)?,
        },
        b'c' => ElementValue::Class(constant_pool.utf8(reader.read_u2()?)?),
        b'@' => ElementValue::Annotation(parse_annotation(reader, constant_pool, depth + 1)?),
        b'[' => {
            let count = reader.read_u2()?;
            ElementValue::Array(
                (0..count)
                    .map(|_| parse_element_value(reader, constant_pool, depth + 1))
                    .collect::<VmResult<_>>()?,
            )
        }
        _ => return Err(bad_element(tag)),
    };
    Ok(value)
}

fn constant_value(constant_pool: &ConstantPool, index: u16) -> VmResult<Const> {
    match constant_pool.get(index)? {
        ConstantPoolEntry::Integer(v) => Ok(Const::Int(v)),
        ConstantPoolEntry::Float(v) => Ok(Const::Float(v)),
        ConstantPoolEntry::Long(v) => Ok(Const::Long(v)),
        ConstantPoolEntry::Double(v) => Ok(Const::Double(v)),
        ConstantPoolEntry::Utf8(v) => Ok(Const::String(v)),
        other => Err(Exception::ClassFormat(format!(
            "constant pool entry {index} is not an annotation constant: {:?}",
            other.tag()
        ))),
    }
}

fn bad_element(tag: u8) -> Exception {
    Exception::ClassFormat(format!("bad element_value tag: {:?}", tag as char))
}
