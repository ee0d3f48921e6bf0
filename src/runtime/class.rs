use std::{
    cell::Cell,
    fmt::{self, Debug, Display},
    sync::{
        Arc, Weak,
        atomic::{AtomicU32, Ordering},
    },
};

use once_cell::sync::OnceCell;
use parking_lot::ReentrantMutex;

use crate::{
    class::{Annotation, BootstrapMethod, ClassAttributes, ClassFile, EnclosingMethod, Symbol},
    consts::{ClassAccessFlag, FieldAccessFlag, MethodAccessFlag, OBJECT_INIT},
    descriptor::FieldType,
    runtime::{
        ClassLoader, ConstantPool, Exception, Field, Method, ObjectRef, Slot, VmResult,
        exception::member_signature,
        member::{FieldPrototype, MethodPrototype, is_virtual},
    },
};

/// Initialization progress of a class. Transitions only move forward.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InitState {
    NotInitialized,
    /// `<clinit>` is running; only observable by the initializing thread.
    Initializing,
    Initialized,
    /// `<clinit>` failed; the class can never be used.
    Erroneous,
}

/// Interface dispatch table.
///
/// `methods` is one flat sequence split into per-interface segments;
/// `interfaces` records where each segment starts.
#[derive(Debug, Default, Clone)]
pub struct ITable {
    pub(crate) interfaces: Vec<(Arc<Class>, usize)>,
    pub(crate) methods: Vec<Arc<Method>>,
}

impl ITable {
    pub fn interfaces(&self) -> &[(Arc<Class>, usize)] {
        &self.interfaces
    }

    pub fn methods(&self) -> &[Arc<Method>] {
        &self.methods
    }

    /// Start of `interface`'s segment.
    pub fn offset_of(&self, interface: &Class) -> Option<usize> {
        self.interfaces
            .iter()
            .find(|(class, _)| class.name == interface.name)
            .map(|(_, offset)| *offset)
    }
}

/// A loaded and linked class, interface or array type.
pub struct Class {
    pub(crate) name: Symbol,
    pub(crate) package: Box<str>,
    pub(crate) access_flags: ClassAccessFlag,
    pub(crate) loader: Weak<dyn ClassLoader>,
    pub(crate) constant_pool: ConstantPool,
    pub(crate) super_class: Option<Arc<Class>>,
    pub(crate) interfaces: Vec<Arc<Class>>,
    /// Public fields first, then the rest, each group in declaration order.
    pub(crate) fields: Vec<Arc<Field>>,
    pub(crate) public_fields_count: usize,
    pub(crate) methods: Vec<Arc<Method>>,
    pub(crate) public_methods_count: usize,
    /// Instance slots including every inherited field.
    pub(crate) inst_fields_count: usize,
    pub(crate) static_slots: Box<[AtomicU32]>,
    pub(crate) vtable: Vec<Arc<Method>>,
    pub(crate) itable: ITable,
    pub(crate) init: ReentrantMutex<Cell<InitState>>,
    pub(crate) attributes: ClassAttributes,
    pub(crate) enclosing_class: OnceCell<Option<Arc<Class>>>,
    pub(crate) mirror: OnceCell<ObjectRef>,
    pub(crate) component_type: Option<FieldType>,
}

impl Class {
    /// Builds the runtime class from a parsed class file whose superclass and
    /// interfaces are already loaded.
    pub(crate) fn link(
        name: Symbol,
        class_file: ClassFile,
        loader: Weak<dyn ClassLoader>,
        super_class: Option<Arc<Class>>,
        interfaces: Vec<Arc<Class>>,
    ) -> VmResult<Arc<Class>> {
        let ClassFile {
            constant_pool,
            access_flags,
            fields,
            methods,
            attributes,
            ..
        } = class_file;
        let is_interface = access_flags.contains(ClassAccessFlag::INTERFACE);

        let fields = fields
            .into_iter()
            .map(|info| FieldPrototype::new(&name, info))
            .collect::<VmResult<Vec<_>>>()?;
        let (fields, public_fields_count) =
            public_first(fields, |f| f.access_flags.contains(FieldAccessFlag::PUBLIC));

        let methods = methods
            .into_iter()
            .map(|info| MethodPrototype::new(&name, info))
            .collect::<VmResult<Vec<_>>>()?;
        let (methods, public_methods_count) =
            public_first(methods, |m| m.access_flags.contains(MethodAccessFlag::PUBLIC));

        let field_ids = assign_field_ids(
            &fields,
            super_class.as_ref().map_or(0, |s| s.inst_fields_count),
        );

        let inherited_vtable = super_class
            .as_ref()
            .map(|s| s.vtable.clone())
            .unwrap_or_default();
        let vtable_indices = if is_interface {
            // interfaces only ever carry Object's vtable
            vec![None; methods.len()]
        } else {
            assign_vtable_indices(&methods, &inherited_vtable)
        };
        let itable_indices = if is_interface {
            let base = super_class.as_ref().map_or(0, |s| s.itable.methods.len());
            assign_itable_indices(&methods, base)
        } else {
            vec![None; methods.len()]
        };

        let package = package_of(&name);
        Ok(Arc::new_cyclic(|this: &Weak<Class>| {
            let fields: Vec<Arc<Field>> = fields
                .into_iter()
                .zip(&field_ids.ids)
                .map(|(proto, &id)| Arc::new(proto.build(this, &name, id)))
                .collect();
            let methods: Vec<Arc<Method>> = methods
                .into_iter()
                .zip(vtable_indices.into_iter().zip(itable_indices))
                .map(|(proto, (vtable_index, itable_index))| {
                    Arc::new(proto.build(this, &name, vtable_index, itable_index))
                })
                .collect();

            let vtable = patch_vtable(inherited_vtable, &methods);
            let itable = if is_interface {
                interface_itable(super_class.as_deref(), &methods)
            } else {
                class_itable(super_class.as_deref(), &interfaces, &methods, &vtable)
            };

            Class {
                package,
                access_flags,
                loader,
                constant_pool,
                interfaces,
                public_fields_count,
                public_methods_count,
                inst_fields_count: field_ids.inst_fields_count,
                static_slots: zeroed_slots(field_ids.static_fields_count),
                fields,
                methods,
                vtable,
                itable,
                init: ReentrantMutex::new(Cell::new(InitState::NotInitialized)),
                attributes,
                enclosing_class: OnceCell::new(),
                mirror: OnceCell::new(),
                component_type: None,
                super_class,
                name,
            }
        }))
    }

    /// Synthesizes an array class. Arrays extend `object_class` and implement
    /// `Cloneable` and `Serializable`; they declare nothing themselves.
    pub(crate) fn array(
        name: Symbol,
        component_type: FieldType,
        loader: Weak<dyn ClassLoader>,
        object_class: Arc<Class>,
        interfaces: Vec<Arc<Class>>,
    ) -> Arc<Class> {
        let vtable = object_class.vtable.clone();
        let itable = class_itable(Some(&object_class), &interfaces, &[], &vtable);
        Arc::new(Class {
            package: package_of(&name),
            access_flags: ClassAccessFlag::PUBLIC | ClassAccessFlag::FINAL,
            loader,
            constant_pool: ConstantPool::empty(),
            interfaces,
            fields: Vec::new(),
            public_fields_count: 0,
            methods: Vec::new(),
            public_methods_count: 0,
            inst_fields_count: 0,
            static_slots: zeroed_slots(0),
            vtable,
            itable,
            // nothing to run
            init: ReentrantMutex::new(Cell::new(InitState::Initialized)),
            attributes: ClassAttributes::default(),
            enclosing_class: OnceCell::new(),
            mirror: OnceCell::new(),
            component_type: Some(component_type),
            super_class: Some(object_class),
            name,
        })
    }

    pub fn name(&self) -> &Symbol {
        &self.name
    }

    /// Binary package name, `""` for the unnamed package.
    pub fn package_name(&self) -> &str {
        &self.package
    }

    pub fn access_flags(&self) -> ClassAccessFlag {
        self.access_flags
    }

    pub fn loader(&self) -> Option<Arc<dyn ClassLoader>> {
        self.loader.upgrade()
    }

    pub fn constant_pool(&self) -> &ConstantPool {
        &self.constant_pool
    }

    pub fn super_class(&self) -> Option<&Arc<Class>> {
        self.super_class.as_ref()
    }

    pub fn interfaces(&self) -> &[Arc<Class>] {
        &self.interfaces
    }

    pub fn fields(&self) -> &[Arc<Field>] {
        &self.fields
    }

    pub fn public_fields(&self) -> &[Arc<Field>] {
        &self.fields[..self.public_fields_count]
    }

    pub fn methods(&self) -> &[Arc<Method>] {
        &self.methods
    }

    pub fn public_methods(&self) -> &[Arc<Method>] {
        &self.methods[..self.public_methods_count]
    }

    pub fn inst_fields_count(&self) -> usize {
        self.inst_fields_count
    }

    pub fn static_fields_count(&self) -> usize {
        self.static_slots.len()
    }

    pub fn vtable(&self) -> &[Arc<Method>] {
        &self.vtable
    }

    pub fn itable(&self) -> &ITable {
        &self.itable
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlag::INTERFACE)
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(ClassAccessFlag::ABSTRACT)
    }

    pub fn is_public(&self) -> bool {
        self.access_flags.contains(ClassAccessFlag::PUBLIC)
    }

    pub fn is_array(&self) -> bool {
        self.name.starts_with('[')
    }

    /// Element type of an array class.
    /// Binary name of the array class with this class as its component.
    pub fn array_class_name(&self) -> String {
        array_class_name(&self.name)
    }

    pub fn component_type(&self) -> Option<&FieldType> {
        self.component_type.as_ref()
    }

    pub fn signature(&self) -> Option<&Symbol> {
        self.attributes.signature.as_ref()
    }

    pub fn source_file(&self) -> Option<&Symbol> {
        self.attributes.source_file.as_ref()
    }

    pub fn is_deprecated(&self) -> bool {
        self.attributes.deprecated
    }

    pub fn is_synthetic(&self) -> bool {
        self.attributes.synthetic
            || self.access_flags.contains(ClassAccessFlag::SYNTHETIC)
    }

    pub fn enclosing_method(&self) -> Option<&EnclosingMethod> {
        self.attributes.enclosing_method.as_ref()
    }

    pub fn bootstrap_methods(&self) -> &[BootstrapMethod] {
        &self.attributes.bootstrap_methods
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.attributes.annotations
    }

    /// The class named by the `EnclosingMethod` attribute, loaded on first
    /// request.
    pub fn enclosing_class(&self) -> VmResult<Option<Arc<Class>>> {
        self.enclosing_class
            .get_or_try_init(|| {
                let Some(enclosing) = &self.attributes.enclosing_method else {
                    return Ok(None);
                };
                self.defining_loader()?
                    .load_class(&enclosing.class_name)
                    .map(Some)
            })
            .cloned()
    }

    pub(crate) fn defining_loader(&self) -> VmResult<Arc<dyn ClassLoader>> {
        self.loader.upgrade().ok_or_else(|| {
            Exception::Internal(format!("class loader of {} is gone", self.name))
        })
    }

    pub fn init_state(&self) -> InitState {
        self.init.lock().get()
    }

    pub fn is_initialized(&self) -> bool {
        self.init_state() == InitState::Initialized
    }

    pub fn get_declared_field(&self, name: &str, descriptor: &str) -> Option<Arc<Field>> {
        self.fields.iter().find(|f| f.matches(name, descriptor)).cloned()
    }

    pub fn get_declared_method(&self, name: &str, descriptor: &str) -> Option<Arc<Method>> {
        self.methods
            .iter()
            .find(|m| m.matches(name, descriptor))
            .cloned()
    }

    /// All declared overloads named `name`.
    pub fn get_declared_methods(&self, name: &str) -> Vec<Arc<Method>> {
        self.methods
            .iter()
            .filter(|m| m.name.as_str() == name)
            .cloned()
            .collect()
    }

    pub fn get_constructor(&self, descriptor: &str) -> Option<Arc<Method>> {
        self.get_declared_method(OBJECT_INIT, descriptor)
    }

    pub fn get_constructors(&self) -> Vec<Arc<Method>> {
        self.get_declared_methods(OBJECT_INIT)
    }

    /// `true` if `self` is `other`, extends it or implements it, directly or
    /// transitively.
    pub fn is_subclass_of(&self, other: &Class) -> bool {
        if self.name == other.name {
            return true;
        }
        if self
            .super_class
            .as_ref()
            .is_some_and(|s| s.is_subclass_of(other))
        {
            return true;
        }
        other.is_interface() && self.interfaces.iter().any(|i| i.is_subclass_of(other))
    }

    /// Number of superclasses above this class; 0 for the root.
    pub fn inherited_depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.super_class.as_ref();
        while let Some(class) = current {
            depth += 1;
            current = class.super_class.as_ref();
        }
        depth
    }

    pub fn is_same_package(&self, other: &Class) -> bool {
        self.package == other.package
    }

    pub fn lookup_field(&self, name: &str, descriptor: &str) -> VmResult<Arc<Field>> {
        self.find_field(name, descriptor)
            .ok_or_else(|| Exception::NoSuchField(member_signature(&self.name, name, descriptor)))
    }

    pub fn lookup_static_field(&self, name: &str, descriptor: &str) -> VmResult<Arc<Field>> {
        let field = self.lookup_field(name, descriptor)?;
        if !field.is_static() {
            return Err(Exception::IncompatibleClassChange(format!(
                "expected static field {field}"
            )));
        }
        Ok(field)
    }

    pub fn lookup_inst_field(&self, name: &str, descriptor: &str) -> VmResult<Arc<Field>> {
        let field = self.lookup_field(name, descriptor)?;
        if field.is_static() {
            return Err(Exception::IncompatibleClassChange(format!(
                "expected non-static field {field}"
            )));
        }
        Ok(field)
    }

    fn find_field(&self, name: &str, descriptor: &str) -> Option<Arc<Field>> {
        self.get_declared_field(name, descriptor)
            .or_else(|| {
                self.super_class
                    .as_ref()
                    .and_then(|s| s.find_field(name, descriptor))
            })
            .or_else(|| {
                self.interfaces
                    .iter()
                    .find_map(|i| i.find_field(name, descriptor))
            })
    }

    pub fn lookup_method(&self, name: &str, descriptor: &str) -> VmResult<Arc<Method>> {
        self.find_method(name, descriptor)
            .ok_or_else(|| Exception::NoSuchMethod(member_signature(&self.name, name, descriptor)))
    }

    pub fn lookup_static_method(&self, name: &str, descriptor: &str) -> VmResult<Arc<Method>> {
        let method = self.lookup_method(name, descriptor)?;
        if !method.is_static() {
            return Err(Exception::IncompatibleClassChange(format!(
                "expected static method {method}"
            )));
        }
        Ok(method)
    }

    pub fn lookup_inst_method(&self, name: &str, descriptor: &str) -> VmResult<Arc<Method>> {
        let method = self.lookup_method(name, descriptor)?;
        if method.is_static() {
            return Err(Exception::IncompatibleClassChange(format!(
                "expected non-static method {method}"
            )));
        }
        Ok(method)
    }

    /// Lookup for an `InterfaceMethodref`: the interface, its superinterfaces,
    /// then `java/lang/Object` (the interface's superclass).
    pub fn lookup_interface_method(&self, name: &str, descriptor: &str) -> VmResult<Arc<Method>> {
        self.find_interface_method(name, descriptor)
            .or_else(|| {
                self.super_class
                    .as_ref()
                    .and_then(|s| s.get_declared_method(name, descriptor))
            })
            .ok_or_else(|| Exception::NoSuchMethod(member_signature(&self.name, name, descriptor)))
    }

    fn find_method(&self, name: &str, descriptor: &str) -> Option<Arc<Method>> {
        self.get_declared_method(name, descriptor)
            .or_else(|| {
                self.super_class
                    .as_ref()
                    .and_then(|s| s.find_method(name, descriptor))
            })
            .or_else(|| self.find_interface_method_in_interfaces(name, descriptor))
    }

    fn find_interface_method(&self, name: &str, descriptor: &str) -> Option<Arc<Method>> {
        self.get_declared_method(name, descriptor)
            .or_else(|| self.find_interface_method_in_interfaces(name, descriptor))
    }

    fn find_interface_method_in_interfaces(
        &self,
        name: &str,
        descriptor: &str,
    ) -> Option<Arc<Method>> {
        self.interfaces
            .iter()
            .find_map(|i| i.find_interface_method(name, descriptor))
    }

    /// Picks the implementation of `method` for a receiver of this class.
    /// Methods without a vtable slot (private, static, initializers) are not
    /// dispatched.
    pub fn select_virtual(&self, method: &Arc<Method>) -> VmResult<Arc<Method>> {
        let selected = match method.vtable_index {
            Some(index) => self
                .vtable
                .get(index)
                .filter(|entry| entry.same_signature(method))
                .cloned()
                .ok_or_else(|| {
                    Exception::IncompatibleClassChange(format!(
                        "{} is not a subclass of {}",
                        self.name, method.class_name
                    ))
                })?,
            None if method.itable_index.is_some() => return self.select_interface_method(method),
            None => Arc::clone(method),
        };
        ensure_concrete(selected)
    }

    /// Two-step interface dispatch: the interface's segment offset plus the
    /// method's local index.
    pub fn select_interface_method(&self, method: &Arc<Method>) -> VmResult<Arc<Method>> {
        let Some(local_index) = method.itable_index else {
            // Object methods invoked through an interface type
            let selected = self
                .vtable
                .iter()
                .find(|entry| entry.same_signature(method))
                .cloned()
                .unwrap_or_else(|| Arc::clone(method));
            return ensure_concrete(selected);
        };
        let interface = method.class()?;
        let offset = self.itable.offset_of(&interface).ok_or_else(|| {
            Exception::IncompatibleClassChange(format!(
                "{} does not implement interface {}",
                self.name, interface.name
            ))
        })?;
        let selected = self
            .itable
            .methods
            .get(offset + local_index)
            .cloned()
            .ok_or_else(|| Exception::Internal(format!("itable of {} is short", self.name)))?;
        ensure_concrete(selected)
    }

    pub(crate) fn static_slot(&self, id: usize) -> VmResult<Slot> {
        self.static_slots
            .get(id)
            .map(|slot| slot.load(Ordering::Acquire))
            .ok_or_else(|| self.bad_static_id(id))
    }

    pub(crate) fn set_static_slot(&self, id: usize, value: Slot) -> VmResult<()> {
        self.static_slots
            .get(id)
            .map(|slot| slot.store(value, Ordering::Release))
            .ok_or_else(|| self.bad_static_id(id))
    }

    fn bad_static_id(&self, id: usize) -> Exception {
        Exception::Internal(format!("static slot {id} out of range in {}", self.name))
    }
}

impl Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("access_flags", &self.access_flags)
            .field(
                "super_class",
                &self.super_class.as_ref().map(|s| s.name.clone()),
            )
            .field("inst_fields_count", &self.inst_fields_count)
            .finish_non_exhaustive()
    }
}

impl Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class: {}", self.name)
    }
}

fn ensure_concrete(method: Arc<Method>) -> VmResult<Arc<Method>> {
    if method.is_abstract() {
        return Err(Exception::AbstractMethod(method.to_string()));
    }
    Ok(method)
}

pub(crate) fn array_class_name(component: &str) -> String {
    if component.starts_with('[') {
        return format!("[{component}");
    }
    let primitive = match component {
        "boolean" => Some('Z'),
        "byte" => Some('B'),
        "char" => Some('C'),
        "short" => Some('S'),
        "int" => Some('I'),
        "long" => Some('J'),
        "float" => Some('F'),
        "double" => Some('D'),
        _ => None,
    };
    match primitive {
        Some(descriptor) => format!("[{descriptor}"),
        None => format!("[L{component};"),
    }
}

pub(crate) fn package_of(name: &str) -> Box<str> {
    let name = name.trim_start_matches('[');
    let name = name.strip_prefix('L').unwrap_or(name);
    name.rsplit_once('/')
        .map_or("", |(package, _)| package)
        .into()
}

fn zeroed_slots(count: usize) -> Box<[AtomicU32]> {
    (0..count).map(|_| AtomicU32::new(0)).collect()
}

/// Stable partition: public members first.
fn public_first<T>(members: Vec<T>, is_public: impl Fn(&T) -> bool) -> (Vec<T>, usize) {
    let (mut public, other): (Vec<T>, Vec<T>) = members.into_iter().partition(|m| is_public(m));
    let public_count = public.len();
    public.extend(other);
    (public, public_count)
}

struct FieldIds {
    ids: Vec<usize>,
    inst_fields_count: usize,
    static_fields_count: usize,
}

/// Instance ids continue from the superclass's count so inherited ids never
/// move; static ids index the class's own static storage.
fn assign_field_ids(fields: &[FieldPrototype], inherited: usize) -> FieldIds {
    let mut next_instance = inherited;
    let mut next_static = 0;
    let ids = fields
        .iter()
        .map(|field| {
            let counter = if field.is_static() {
                &mut next_static
            } else {
                &mut next_instance
            };
            let id = *counter;
            *counter += field.field_type.slot_size();
            id
        })
        .collect();
    FieldIds {
        ids,
        inst_fields_count: next_instance,
        static_fields_count: next_static,
    }
}

/// An override takes over the inherited slot; anything new is appended.
fn assign_vtable_indices(
    methods: &[MethodPrototype],
    inherited: &[Arc<Method>],
) -> Vec<Option<usize>> {
    let mut next = inherited.len();
    methods
        .iter()
        .map(|method| {
            if !method.is_virtual() {
                return None;
            }
            let overridden = inherited.iter().position(|entry| {
                entry.name == method.info.name && entry.descriptor == method.info.descriptor
            });
            Some(overridden.unwrap_or_else(|| {
                next += 1;
                next - 1
            }))
        })
        .collect()
}

fn assign_itable_indices(methods: &[MethodPrototype], base: usize) -> Vec<Option<usize>> {
    let mut next = base;
    methods
        .iter()
        .map(|method| {
            method.is_virtual().then(|| {
                next += 1;
                next - 1
            })
        })
        .collect()
}

fn patch_vtable(mut vtable: Vec<Arc<Method>>, methods: &[Arc<Method>]) -> Vec<Arc<Method>> {
    for method in methods {
        let Some(index) = method.vtable_index else {
            continue;
        };
        if index < vtable.len() {
            vtable[index] = Arc::clone(method);
        } else {
            // appended indices are handed out in declaration order
            debug_assert_eq!(index, vtable.len());
            vtable.push(Arc::clone(method));
        }
    }
    vtable
}

fn interface_itable(super_class: Option<&Class>, methods: &[Arc<Method>]) -> ITable {
    let mut itable = ITable {
        interfaces: Vec::new(),
        methods: super_class
            .map(|s| s.itable.methods.clone())
            .unwrap_or_default(),
    };
    itable.methods.extend(
        methods
            .iter()
            .filter(|m| m.itable_index.is_some())
            .cloned(),
    );
    itable
}

fn class_itable(
    super_class: Option<&Class>,
    interfaces: &[Arc<Class>],
    own_methods: &[Arc<Method>],
    vtable: &[Arc<Method>],
) -> ITable {
    let mut itable = super_class.map(|s| s.itable.clone()).unwrap_or_default();

    for entry in &mut itable.methods {
        if let Some(own) = own_methods
            .iter()
            .find(|m| m.vtable_index.is_some() && m.same_signature(entry))
        {
            *entry = Arc::clone(own);
        }
    }

    let mut pending = Vec::new();
    for interface in interfaces {
        collect_interfaces(interface, &mut pending);
    }
    for interface in pending {
        if itable.offset_of(&interface).is_some() {
            continue;
        }
        let offset = itable.methods.len();
        for method in &interface.itable.methods {
            itable
                .methods
                .push(select_implementation(method, own_methods, vtable));
        }
        itable.interfaces.push((interface, offset));
    }
    itable
}

/// `interface` followed by its superinterfaces, depth first.
fn collect_interfaces(interface: &Arc<Class>, out: &mut Vec<Arc<Class>>) {
    if out.iter().any(|i| i.name == interface.name) {
        return;
    }
    out.push(Arc::clone(interface));
    for parent in &interface.interfaces {
        collect_interfaces(parent, out);
    }
}

fn select_implementation(
    interface_method: &Arc<Method>,
    own_methods: &[Arc<Method>],
    vtable: &[Arc<Method>],
) -> Arc<Method> {
    if let Some(own) = own_methods
        .iter()
        .find(|m| is_virtual(m.access_flags, &m.name) && m.same_signature(interface_method))
    {
        return Arc::clone(own);
    }
    vtable
        .iter()
        .find(|m| !m.is_abstract() && m.same_signature(interface_method))
        .cloned()
        .unwrap_or_else(|| Arc::clone(interface_method))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_of() {
        assert_eq!(&*package_of("pkg/sub/Base"), "pkg/sub");
        assert_eq!(&*package_of("Base"), "");
        assert_eq!(&*package_of("[Lpkg/Base;"), "pkg");
        assert_eq!(&*package_of("[I"), "");
    }

    #[test]
    fn test_array_class_name() {
        assert_eq!(array_class_name("pkg/Base"), "[Lpkg/Base;");
        assert_eq!(array_class_name("[I"), "[[I");
        assert_eq!(array_class_name("[Lpkg/Base;"), "[[Lpkg/Base;");
        assert_eq!(array_class_name("int"), "[I");
        assert_eq!(array_class_name("boolean"), "[Z");
    }

    #[test]
    fn test_public_first_is_stable() {
        let (ordered, public) =
            public_first(vec![(1, false), (2, true), (3, false), (4, true)], |m| m.1);
        assert_eq!(public, 2);
        let order: Vec<_> = ordered.iter().map(|m| m.0).collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
    }
}
