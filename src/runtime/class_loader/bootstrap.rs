use std::{
    cell::RefCell,
    sync::{Arc, Weak},
};

use dashmap::DashMap;
use log::{debug, trace};
use once_cell::sync::OnceCell;

use crate::{
    class::{ClassFile, Symbol, parse_class_file},
    consts::{CLONEABLE_CLASS, OBJECT_CLASS, SERIALIZABLE_CLASS},
    descriptor::{FieldDescriptor, FieldType, parse_field_descriptor},
    runtime::{
        Class, ClassLoader, ClassSource, ConstantPoolEntry, Exception, VmResult,
        class::package_of,
    },
};

thread_local! {
    /// Classes whose definition is in progress on this thread.
    static DEFINING: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Marks `name` as being defined on this thread for the guard's lifetime.
struct DefinitionGuard;

impl DefinitionGuard {
    fn enter(name: &str) -> VmResult<Self> {
        DEFINING.with_borrow_mut(|defining| {
            if defining.iter().any(|n| n == name) {
                return Err(Exception::ClassCircularity(name.to_string()));
            }
            defining.push(name.to_string());
            Ok(DefinitionGuard)
        })
    }
}

impl Drop for DefinitionGuard {
    fn drop(&mut self) {
        DEFINING.with_borrow_mut(|defining| {
            defining.pop();
        });
    }
}

/// The loader of every class in this runtime. Looks classes up in its
/// sources in order.
#[derive(Debug)]
pub struct BootstrapClassLoader {
    this: Weak<BootstrapClassLoader>,
    sources: Vec<Box<dyn ClassSource>>,
    class_registry: DashMap<String, Arc<OnceCell<Arc<Class>>>>,
}

impl BootstrapClassLoader {
    pub fn new(sources: Vec<Box<dyn ClassSource>>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: Weak::clone(this),
            sources,
            class_registry: DashMap::new(),
        })
    }

    /// Defines a class straight from class-file bytes, bypassing the sources.
    pub fn define_class(&self, bytes: &[u8]) -> VmResult<Arc<Class>> {
        let class_file = parse_class_file(bytes)?;
        let name = class_file.constant_pool.class_name(class_file.this_class)?;
        self.load_with(&name, || self.link(name.clone(), class_file))
    }

    pub fn loaded_class_count(&self) -> usize {
        self.class_registry
            .iter()
            .filter(|entry| entry.value().get().is_some())
            .count()
    }

    fn as_loader(&self) -> Weak<dyn ClassLoader> {
        let this: Weak<dyn ClassLoader> = self.this.clone();
        this
    }

    fn load_with(
        &self,
        name: &str,
        define: impl FnOnce() -> VmResult<Arc<Class>>,
    ) -> VmResult<Arc<Class>> {
        let class_cell = Arc::clone(
            self.class_registry
                .entry(name.to_string())
                .or_default()
                .value(),
        );
        if let Some(class) = class_cell.get() {
            return Ok(Arc::clone(class));
        }

        let _guard = DefinitionGuard::enter(name)?;
        let result = class_cell.get_or_try_init(define).cloned();
        if result.is_err() {
            self.class_registry
                .remove_if(name, |_, cell| cell.get().is_none());
        }
        result
    }

    fn find_class_bytes(&self, name: &str) -> VmResult<Vec<u8>> {
        for source in &self.sources {
            if let Some(bytes) = source.find_class(name)? {
                return Ok(bytes);
            }
        }
        Err(Exception::NoClassDefFound(name.to_string()))
    }

    fn define(&self, name: &str) -> VmResult<Arc<Class>> {
        let bytes = self.find_class_bytes(name)?;
        let class_file = parse_class_file(&bytes)?;
        let declared = class_file.constant_pool.class_name(class_file.this_class)?;
        if declared.as_str() != name {
            return Err(Exception::NoClassDefFound(format!(
                "{name} (wrong name: {declared})"
            )));
        }
        self.link(declared, class_file)
    }

    fn link(&self, name: Symbol, class_file: ClassFile) -> VmResult<Arc<Class>> {
        let super_class = self.load_super_class(&name, &class_file)?;
        let interfaces = self.load_interfaces(&name, &class_file)?;

        let class = Class::link(name, class_file, self.as_loader(), super_class, interfaces)?;
        debug!(
            "defined {} ({} instance slots, {} vtable entries)",
            class.name(),
            class.inst_fields_count(),
            class.vtable().len()
        );
        for (index, method) in class.vtable().iter().enumerate() {
            trace!("{} vtable[{index}] = {method}", class.name());
        }
        for (interface, offset) in class.itable().interfaces() {
            trace!("{} itable {} at {offset}", class.name(), interface.name());
        }
        Ok(class)
    }

    fn load_super_class(&self, name: &Symbol, class_file: &ClassFile) -> VmResult<Option<Arc<Class>>> {
        if class_file.super_class == 0 {
            if name.as_str() != OBJECT_CLASS {
                return Err(Exception::ClassFormat(format!("{name} has no superclass")));
            }
            return Ok(None);
        }
        let super_class = self.load_linked(name, class_file, class_file.super_class)?;
        if super_class.is_interface() {
            return Err(Exception::IncompatibleClassChange(format!(
                "class {name} has interface {} as super class",
                super_class.name()
            )));
        }
        Ok(Some(super_class))
    }

    fn load_interfaces(&self, name: &Symbol, class_file: &ClassFile) -> VmResult<Vec<Arc<Class>>> {
        class_file
            .interfaces
            .iter()
            .map(|&index| {
                let interface = self.load_linked(name, class_file, index)?;
                if !interface.is_interface() {
                    return Err(Exception::IncompatibleClassChange(format!(
                        "class {name} can not implement {}, because it is not an interface",
                        interface.name()
                    )));
                }
                Ok(interface)
            })
            .collect()
    }

    /// Loads a class named by the class file's pool, checks that `name` may
    /// see it and caches it in the pool slot.
    fn load_linked(&self, name: &str, class_file: &ClassFile, index: u16) -> VmResult<Arc<Class>> {
        let target_name = class_file.constant_pool.class_name(index)?;
        let target = self.load_class(&target_name)?;
        if !target.is_public() && target.package_name() != &*package_of(name) {
            return Err(Exception::IllegalAccess(format!(
                "class {name} cannot access its superclass or superinterface {target_name}"
            )));
        }
        class_file
            .constant_pool
            .cache(index, ConstantPoolEntry::ResolvedClass(Arc::clone(&target)));
        Ok(target)
    }

    fn load_array_class(&self, name: &str) -> VmResult<Arc<Class>> {
        let Ok((_, FieldDescriptor(FieldType::Array(component)))) = parse_field_descriptor(name)
        else {
            return Err(Exception::NoClassDefFound(name.to_string()));
        };
        // the component must exist before its array type does
        match component.as_ref() {
            FieldType::Object(component_name) => {
                self.load_class(component_name)?;
            }
            FieldType::Array(_) => {
                self.load_class(&component.to_descriptor())?;
            }
            _ => {}
        }
        self.load_with(name, || {
            let object_class = self.load_class(OBJECT_CLASS)?;
            let interfaces = vec![
                self.load_class(CLONEABLE_CLASS)?,
                self.load_class(SERIALIZABLE_CLASS)?,
            ];
            debug!("defined array class {name}");
            Ok(Class::array(
                Symbol::from_str(name),
                *component,
                self.as_loader(),
                object_class,
                interfaces,
            ))
        })
    }
}

impl ClassLoader for BootstrapClassLoader {
    fn load_class(&self, name: &str) -> VmResult<Arc<Class>> {
        if name.starts_with('[') {
            return self.load_array_class(name);
        }
        self.load_with(name, || self.define(name))
    }

    fn find_loaded_class(&self, name: &str) -> Option<Arc<Class>> {
        self.class_registry
            .get(name)
            .and_then(|cell| cell.get().cloned())
    }
}
