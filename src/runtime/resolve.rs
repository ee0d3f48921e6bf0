use std::{fmt::Debug, sync::Arc};

use log::trace;

use crate::{
    consts::{ClassAccessFlag, FieldAccessFlag, MethodAccessFlag},
    runtime::{
        Class, ConstantPoolEntry, ConstantTag, Exception, Field, Method, ObjectRef, Value, Vm,
        VmResult,
    },
};

/// What an accessibility check is about.
#[derive(Debug, Copy, Clone)]
pub enum AccessTarget<'a> {
    Class(&'a Class),
    Field(&'a Field),
    Method(&'a Method),
}

/// Decides whether `requester` may refer to `target`. Consulted once per
/// constant-pool entry; cached resolutions are never rechecked.
pub trait AccessPolicy: Debug + Send + Sync {
    fn is_accessible(&self, target: AccessTarget<'_>, requester: &Class) -> bool;
}

/// Standard rules: public anywhere, protected from subclasses and the same
/// package, private from the declaring class only, otherwise the same
/// package.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAccessPolicy;

impl AccessPolicy for DefaultAccessPolicy {
    fn is_accessible(&self, target: AccessTarget<'_>, requester: &Class) -> bool {
        match target {
            AccessTarget::Class(class) => {
                let flags = class.access_flags();
                member_accessible(
                    flags.contains(ClassAccessFlag::PUBLIC),
                    flags.contains(ClassAccessFlag::PROTECTED),
                    flags.contains(ClassAccessFlag::PRIVATE),
                    class,
                    requester,
                )
            }
            AccessTarget::Field(field) => {
                let flags = field.access_flags();
                field.class().is_ok_and(|owner| {
                    member_accessible(
                        flags.contains(FieldAccessFlag::PUBLIC),
                        flags.contains(FieldAccessFlag::PROTECTED),
                        flags.contains(FieldAccessFlag::PRIVATE),
                        &owner,
                        requester,
                    )
                })
            }
            AccessTarget::Method(method) => {
                let flags = method.access_flags();
                method.class().is_ok_and(|owner| {
                    member_accessible(
                        flags.contains(MethodAccessFlag::PUBLIC),
                        flags.contains(MethodAccessFlag::PROTECTED),
                        flags.contains(MethodAccessFlag::PRIVATE),
                        &owner,
                        requester,
                    )
                })
            }
        }
    }
}

fn member_accessible(
    public: bool,
    protected: bool,
    private: bool,
    owner: &Class,
    requester: &Class,
) -> bool {
    if public {
        true
    } else if private {
        owner.name() == requester.name()
    } else if protected {
        requester.is_subclass_of(owner) || requester.is_same_package(owner)
    } else {
        requester.is_same_package(owner)
    }
}

/// Lazy constant-pool resolution.
///
/// Each entry point returns the cached value when the slot already holds a
/// resolved variant. Otherwise it computes the value without holding the
/// slot's lock and publishes it; racing resolvers produce identical values.
impl Vm {
    pub fn resolve_class(&self, requester: &Class, index: u16) -> VmResult<Arc<Class>> {
        let pool = requester.constant_pool();
        if let ConstantPoolEntry::ResolvedClass(class) = pool.get(index)? {
            trace!("cache hit: {}#{index} -> {}", requester.name(), class.name());
            return Ok(class);
        }
        let name = pool.class_name(index)?;
        let class = requester.defining_loader()?.load_class(&name)?;
        self.check_access(AccessTarget::Class(&class), requester, || {
            format!("{} cannot access class {}", requester.name(), class.name())
        })?;
        pool.cache(index, ConstantPoolEntry::ResolvedClass(Arc::clone(&class)));
        Ok(class)
    }

    /// Resolves a `Methodref` or `InterfaceMethodref`.
    pub fn resolve_method(&self, requester: &Class, index: u16) -> VmResult<Arc<Method>> {
        let pool = requester.constant_pool();
        let entry = pool.get(index)?;
        let interface_ref = match &entry {
            ConstantPoolEntry::ResolvedMethod(method) => {
                trace!("cache hit: {}#{index} -> {method}", requester.name());
                return Ok(Arc::clone(method));
            }
            ConstantPoolEntry::Methodref { .. } => false,
            ConstantPoolEntry::InterfaceMethodref { .. } => true,
            other => return Err(unexpected(index, "method reference", other.tag())),
        };
        let member = pool.member_ref(index)?;
        let class = self.resolve_class(requester, member.class_index)?;
        let method = match (interface_ref, class.is_interface()) {
            (false, false) => class.lookup_method(&member.name, &member.descriptor)?,
            (true, true) => class.lookup_interface_method(&member.name, &member.descriptor)?,
            (false, true) => {
                return Err(Exception::IncompatibleClassChange(format!(
                    "found interface {}, but class was expected",
                    class.name()
                )));
            }
            (true, false) => {
                return Err(Exception::IncompatibleClassChange(format!(
                    "found class {}, but interface was expected",
                    class.name()
                )));
            }
        };
        self.check_access(AccessTarget::Method(&method), requester, || {
            format!("{} cannot access method {method}", requester.name())
        })?;
        pool.cache(index, ConstantPoolEntry::ResolvedMethod(Arc::clone(&method)));
        Ok(method)
    }

    pub fn resolve_field(&self, requester: &Class, index: u16) -> VmResult<Arc<Field>> {
        let pool = requester.constant_pool();
        match pool.get(index)? {
            ConstantPoolEntry::ResolvedField(field) => {
                trace!("cache hit: {}#{index} -> {field}", requester.name());
                return Ok(field);
            }
            ConstantPoolEntry::Fieldref { .. } => {}
            other => return Err(unexpected(index, "Fieldref", other.tag())),
        }
        let member = pool.member_ref(index)?;
        let class = self.resolve_class(requester, member.class_index)?;
        let field = class.lookup_field(&member.name, &member.descriptor)?;
        self.check_access(AccessTarget::Field(&field), requester, || {
            format!("{} cannot access field {field}", requester.name())
        })?;
        pool.cache(index, ConstantPoolEntry::ResolvedField(Arc::clone(&field)));
        Ok(field)
    }

    /// Interns the literal of a `String` entry.
    pub fn resolve_string(&self, requester: &Class, index: u16) -> VmResult<ObjectRef> {
        let pool = requester.constant_pool();
        if let ConstantPoolEntry::ResolvedString(string) = pool.get(index)? {
            trace!("cache hit: {}#{index} -> @{string}", requester.name());
            return Ok(string);
        }
        let literal = pool.string_literal(index)?;
        let string = self.intern_string(literal.as_bytes())?;
        pool.cache(index, ConstantPoolEntry::ResolvedString(string));
        Ok(string)
    }

    /// The value an `ldc` of entry `index` pushes: numeric immediates,
    /// interned strings and class mirrors.
    pub fn resolve_constant(&self, requester: &Class, index: u16) -> VmResult<Value> {
        let pool = requester.constant_pool();
        match pool.get(index)? {
            ConstantPoolEntry::Integer(v) => Ok(Value::Int(v)),
            ConstantPoolEntry::Float(v) => Ok(Value::Float(v)),
            ConstantPoolEntry::Long(v) => Ok(Value::Long(v)),
            ConstantPoolEntry::Double(v) => Ok(Value::Double(v)),
            ConstantPoolEntry::String { .. } | ConstantPoolEntry::ResolvedString(_) => {
                self.resolve_string(requester, index).map(Value::Reference)
            }
            ConstantPoolEntry::Class { .. } | ConstantPoolEntry::ResolvedClass(_) => {
                let class = self.resolve_class(requester, index)?;
                self.class_object(&class).map(Value::Reference)
            }
            other => Err(Exception::Internal(format!(
                "unsupported loadable constant {:?} at {}#{index}",
                other.tag(),
                requester.name()
            ))),
        }
    }

    fn check_access(
        &self,
        target: AccessTarget<'_>,
        requester: &Class,
        message: impl FnOnce() -> String,
    ) -> VmResult<()> {
        if self.access_policy().is_accessible(target, requester) {
            Ok(())
        } else {
            Err(Exception::IllegalAccess(message()))
        }
    }
}

fn unexpected(index: u16, expected: &str, found: ConstantTag) -> Exception {
    Exception::ClassFormat(format!(
        "constant pool entry {index} is {found:?}, expected {expected}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        class::builder::ClassBuilder,
        runtime::{BootstrapClassLoader, ClassLoader, MemorySource},
    };

    fn load(classes: Vec<(&str, Vec<u8>)>) -> Arc<BootstrapClassLoader> {
        let source = MemorySource::with_minimal_runtime();
        for (name, bytes) in classes {
            source.insert(name, bytes);
        }
        BootstrapClassLoader::new(vec![Box::new(source)])
    }

    #[test]
    fn test_default_policy() {
        let loader = load(vec![
            (
                "a/Owner",
                ClassBuilder::new("a/Owner")
                    .field(0x0001, "pub", "I")
                    .field(0x0002, "priv", "I")
                    .field(0x0004, "prot", "I")
                    .field(0x0000, "pkg", "I")
                    .build(),
            ),
            ("a/Friend", ClassBuilder::new("a/Friend").build()),
            (
                "b/Child",
                ClassBuilder::new("b/Child").super_class("a/Owner").build(),
            ),
            ("b/Stranger", ClassBuilder::new("b/Stranger").build()),
        ]);
        let owner = loader.load_class("a/Owner").unwrap();
        let friend = loader.load_class("a/Friend").unwrap();
        let child = loader.load_class("b/Child").unwrap();
        let stranger = loader.load_class("b/Stranger").unwrap();
        let field = |name: &str| owner.get_declared_field(name, "I").unwrap();
        let policy = DefaultAccessPolicy;
        let check = |name: &str, requester: &Class| {
            policy.is_accessible(AccessTarget::Field(&field(name)), requester)
        };

        assert!(check("pub", &stranger));
        assert!(check("priv", &owner));
        assert!(!check("priv", &friend));
        assert!(check("prot", &child));
        assert!(check("prot", &friend));
        assert!(!check("prot", &stranger));
        assert!(check("pkg", &friend));
        assert!(!check("pkg", &child));
    }

    #[test]
    fn test_member_accessible_rules() {
        let loader = load(vec![("a/Owner", ClassBuilder::new("a/Owner").build())]);
        let owner = loader.load_class("a/Owner").unwrap();
        let object = loader.load_class("java/lang/Object").unwrap();
        assert!(member_accessible(true, false, false, &owner, &object));
        assert!(!member_accessible(false, false, true, &owner, &object));
        assert!(!member_accessible(false, false, false, &owner, &object));
        assert!(member_accessible(false, true, false, &object, &owner));
    }
}
