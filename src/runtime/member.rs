use std::{
    fmt::{self, Display},
    sync::{Arc, Weak},
};

use crate::{
    class::{Annotation, CodeAttribute, MemberInfo, Symbol},
    consts::{CLASS_INIT, FieldAccessFlag, MethodAccessFlag, OBJECT_INIT},
    descriptor::{FieldDescriptor, FieldType, MethodDescriptor, parse_field_descriptor,
        parse_method_descriptor},
    runtime::{Class, Exception, VmResult, exception::member_signature},
};

/// A field declared by a loaded class.
#[derive(Debug)]
pub struct Field {
    pub(crate) class: Weak<Class>,
    pub(crate) class_name: Symbol,
    pub(crate) name: Symbol,
    pub(crate) descriptor: Symbol,
    pub(crate) field_type: FieldType,
    pub(crate) access_flags: FieldAccessFlag,
    /// First slot of the field: in the instance for instance fields, in the
    /// owning class's static storage for static ones.
    pub(crate) id: usize,
    pub(crate) constant_value: Option<u16>,
    pub(crate) signature: Option<Symbol>,
    pub(crate) annotations: Vec<Annotation>,
}

impl Field {
    /// The owning class. Fails once the class has been unloaded, or while it
    /// is still being built.
    pub fn class(&self) -> VmResult<Arc<Class>> {
        upgrade_owner(&self.class, &self.class_name)
    }

    pub fn class_name(&self) -> &Symbol {
        &self.class_name
    }

    pub fn name(&self) -> &Symbol {
        &self.name
    }

    pub fn descriptor(&self) -> &Symbol {
        &self.descriptor
    }

    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    pub fn access_flags(&self) -> FieldAccessFlag {
        self.access_flags
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(FieldAccessFlag::STATIC)
    }

    pub fn is_public(&self) -> bool {
        self.access_flags.contains(FieldAccessFlag::PUBLIC)
    }

    /// `long` and `double` fields take two consecutive ids.
    pub fn is_category_two(&self) -> bool {
        self.field_type.is_category_two()
    }

    pub fn constant_value(&self) -> Option<u16> {
        self.constant_value
    }

    pub fn signature(&self) -> Option<&Symbol> {
        self.signature.as_ref()
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub(crate) fn matches(&self, name: &str, descriptor: &str) -> bool {
        self.name.as_str() == name && self.descriptor.as_str() == descriptor
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&member_signature(&self.class_name, &self.name, &self.descriptor))
    }
}

/// A method declared by a loaded class.
#[derive(Debug)]
pub struct Method {
    pub(crate) class: Weak<Class>,
    pub(crate) class_name: Symbol,
    pub(crate) name: Symbol,
    pub(crate) descriptor: Symbol,
    pub(crate) parsed_descriptor: MethodDescriptor,
    pub(crate) access_flags: MethodAccessFlag,
    pub(crate) code: Option<CodeAttribute>,
    pub(crate) vtable_index: Option<usize>,
    /// Local index within the declaring interface's itable segment.
    pub(crate) itable_index: Option<usize>,
    pub(crate) exceptions: Vec<Symbol>,
    pub(crate) signature: Option<Symbol>,
    pub(crate) annotations: Vec<Annotation>,
}

impl Method {
    pub fn class(&self) -> VmResult<Arc<Class>> {
        upgrade_owner(&self.class, &self.class_name)
    }

    pub fn class_name(&self) -> &Symbol {
        &self.class_name
    }

    pub fn name(&self) -> &Symbol {
        &self.name
    }

    pub fn descriptor(&self) -> &Symbol {
        &self.descriptor
    }

    pub fn parsed_descriptor(&self) -> &MethodDescriptor {
        &self.parsed_descriptor
    }

    pub fn access_flags(&self) -> MethodAccessFlag {
        self.access_flags
    }

    pub fn code(&self) -> Option<&CodeAttribute> {
        self.code.as_ref()
    }

    pub fn vtable_index(&self) -> Option<usize> {
        self.vtable_index
    }

    pub fn itable_index(&self) -> Option<usize> {
        self.itable_index
    }

    pub fn exceptions(&self) -> &[Symbol] {
        &self.exceptions
    }

    pub fn signature(&self) -> Option<&Symbol> {
        self.signature.as_ref()
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlag::STATIC)
    }

    pub fn is_public(&self) -> bool {
        self.access_flags.contains(MethodAccessFlag::PUBLIC)
    }

    pub fn is_private(&self) -> bool {
        self.access_flags.contains(MethodAccessFlag::PRIVATE)
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(MethodAccessFlag::ABSTRACT)
    }

    pub fn is_native(&self) -> bool {
        self.access_flags.contains(MethodAccessFlag::NATIVE)
    }

    pub fn is_constructor(&self) -> bool {
        self.name.as_str() == OBJECT_INIT
    }

    pub fn is_class_initializer(&self) -> bool {
        self.name.as_str() == CLASS_INIT
    }

    /// Argument slots including `this` for instance methods.
    pub fn argument_slots(&self) -> usize {
        self.parsed_descriptor.argument_slots() + usize::from(!self.is_static())
    }

    pub fn max_locals(&self) -> usize {
        match &self.code {
            Some(code) => code.max_locals as usize,
            None => self.argument_slots(),
        }
    }

    /// Native methods get no operand stack of their own; two slots hold a
    /// category-two return value.
    pub fn max_stack(&self) -> usize {
        match &self.code {
            Some(code) => code.max_stack as usize,
            None => 2,
        }
    }

    /// Source line of the instruction starting at `pc`.
    pub fn line_number(&self, pc: usize) -> Option<u16> {
        self.code.as_ref()?.line_number(pc)
    }

    pub(crate) fn matches(&self, name: &str, descriptor: &str) -> bool {
        self.name.as_str() == name && self.descriptor.as_str() == descriptor
    }

    pub(crate) fn same_signature(&self, other: &Method) -> bool {
        self.name == other.name && self.descriptor == other.descriptor
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&member_signature(&self.class_name, &self.name, &self.descriptor))
    }
}

fn upgrade_owner(class: &Weak<Class>, class_name: &Symbol) -> VmResult<Arc<Class>> {
    class
        .upgrade()
        .ok_or_else(|| Exception::Internal(format!("class {class_name} is no longer loaded")))
}

/// A virtual method is any instance method that can be overridden: not
/// static, not private and not an initializer.
pub(crate) fn is_virtual(access_flags: MethodAccessFlag, name: &str) -> bool {
    !access_flags.intersects(MethodAccessFlag::STATIC | MethodAccessFlag::PRIVATE)
        && name != OBJECT_INIT
        && name != CLASS_INIT
}

/// A field with its descriptor checked, before ids are assigned.
#[derive(Debug)]
pub(crate) struct FieldPrototype {
    pub(crate) info: MemberInfo,
    pub(crate) field_type: FieldType,
    pub(crate) access_flags: FieldAccessFlag,
}

#[derive(Debug)]
pub(crate) struct MethodPrototype {
    pub(crate) info: MemberInfo,
    pub(crate) descriptor: MethodDescriptor,
    pub(crate) access_flags: MethodAccessFlag,
}

impl FieldPrototype {
    pub(crate) fn new(class_name: &str, info: MemberInfo) -> VmResult<Self> {
        let (_, FieldDescriptor(field_type)) = parse_field_descriptor(&info.descriptor)
            .map_err(|_| bad_descriptor(class_name, &info))?;
        Ok(Self {
            access_flags: FieldAccessFlag::from_bits_retain(info.access_flags),
            field_type,
            info,
        })
    }

    pub(crate) fn is_static(&self) -> bool {
        self.access_flags.contains(FieldAccessFlag::STATIC)
    }

    pub(crate) fn build(self, class: &Weak<Class>, class_name: &Symbol, id: usize) -> Field {
        Field {
            class: Weak::clone(class),
            class_name: class_name.clone(),
            name: self.info.name,
            descriptor: self.info.descriptor,
            field_type: self.field_type,
            access_flags: self.access_flags,
            id,
            constant_value: self.info.attributes.constant_value,
            signature: self.info.attributes.signature,
            annotations: self.info.attributes.annotations,
        }
    }
}

impl MethodPrototype {
    pub(crate) fn new(class_name: &str, info: MemberInfo) -> VmResult<Self> {
        let (_, descriptor) = parse_method_descriptor(&info.descriptor)
            .map_err(|_| bad_descriptor(class_name, &info))?;
        let access_flags = MethodAccessFlag::from_bits_retain(info.access_flags);
        let bodiless = access_flags.intersects(MethodAccessFlag::ABSTRACT | MethodAccessFlag::NATIVE);
        if bodiless == info.attributes.code.is_some() {
            return Err(Exception::ClassFormat(format!(
                "{}: Code attribute {}",
                member_signature(class_name, &info.name, &info.descriptor),
                if bodiless { "not allowed" } else { "missing" }
            )));
        }
        Ok(Self {
            descriptor,
            access_flags,
            info,
        })
    }

    pub(crate) fn is_virtual(&self) -> bool {
        is_virtual(self.access_flags, &self.info.name)
    }

    pub(crate) fn build(
        self,
        class: &Weak<Class>,
        class_name: &Symbol,
        vtable_index: Option<usize>,
        itable_index: Option<usize>,
    ) -> Method {
        Method {
            class: Weak::clone(class),
            class_name: class_name.clone(),
            name: self.info.name,
            descriptor: self.info.descriptor,
            parsed_descriptor: self.descriptor,
            access_flags: self.access_flags,
            code: self.info.attributes.code,
            vtable_index,
            itable_index,
            exceptions: self.info.attributes.exceptions,
            signature: self.info.attributes.signature,
            annotations: self.info.attributes.annotations,
        }
    }
}

fn bad_descriptor(class_name: &str, info: &MemberInfo) -> Exception {
    Exception::ClassFormat(format!(
        "illegal descriptor: {}",
        member_signature(class_name, &info.name, &info.descriptor)
    ))
}
