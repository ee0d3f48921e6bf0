use std::{
    fmt::{self, Debug},
    sync::Arc,
    thread::JoinHandle,
};

use log::{debug, warn};

use crate::{
    class::Symbol,
    consts::{
        CLASS_CLASS, CLASS_INIT, CLONEABLE_CLASS, OBJECT_INIT, STRING_CLASS, THROWABLE_CLASS,
        VOID_DESCRIPTOR,
    },
    runtime::{
        AccessPolicy, BootstrapClassLoader, Class, ClassLoader, ConstantPoolEntry,
        DefaultAccessPolicy, Exception, Field, Heap, HeapAllocator, InitState, Method, Object,
        ObjectAux, ObjectRef, Slot, StackTraceElement, StringTable, Thread, Value, VmResult,
        thread,
    },
};

/// Runtime knobs.
#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Capacity of each thread's frame stack, in slots.
    pub thread_stack_slots: usize,
    /// Live objects the default heap holds before failing allocation.
    pub heap_capacity: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            thread_stack_slots: 64 * 1024,
            heap_capacity: 1 << 20,
        }
    }
}

/// Runs method bodies: the interpreter and the native method registry.
///
/// When `execute` is called a frame for `method` is on top of `thread`'s
/// stack with the arguments in its leading locals. The frame is popped after
/// `execute` returns.
pub trait MethodExecutor: Send + Sync {
    fn execute(&self, vm: &Vm, thread: &Thread, method: &Arc<Method>) -> VmResult<Option<Value>>;
}

/// Shared state of one virtual machine: the class path, the heap, interned
/// strings and the collaborators that run code.
pub struct Vm {
    options: VmOptions,
    loader: Arc<BootstrapClassLoader>,
    heap: Box<dyn HeapAllocator>,
    strings: StringTable,
    access: Box<dyn AccessPolicy>,
    executor: Box<dyn MethodExecutor>,
}

impl Vm {
    pub fn new(
        options: VmOptions,
        loader: Arc<BootstrapClassLoader>,
        executor: impl MethodExecutor + 'static,
    ) -> Vm {
        Vm {
            heap: Box::new(Heap::new(options.heap_capacity)),
            options,
            loader,
            strings: StringTable::new(),
            access: Box::new(DefaultAccessPolicy),
            executor: Box::new(executor),
        }
    }

    pub fn with_heap(mut self, heap: impl HeapAllocator + 'static) -> Vm {
        self.heap = Box::new(heap);
        self
    }

    pub fn with_access_policy(mut self, access: impl AccessPolicy + 'static) -> Vm {
        self.access = Box::new(access);
        self
    }

    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    pub fn loader(&self) -> &Arc<BootstrapClassLoader> {
        &self.loader
    }

    pub fn heap(&self) -> &dyn HeapAllocator {
        self.heap.as_ref()
    }

    pub fn access_policy(&self) -> &dyn AccessPolicy {
        self.access.as_ref()
    }

    pub fn load_class(&self, name: &str) -> VmResult<Arc<Class>> {
        self.loader.load_class(name)
    }

    /// Runs static initialization of `class` at most once.
    ///
    /// Superclasses go first. The class is marked initializing before its
    /// `<clinit>` runs, so a re-entrant request from the initializing thread
    /// returns at once; other threads block until initialization is over.
    pub fn initialize_class(&self, class: &Arc<Class>) -> VmResult<()> {
        if class.is_initialized() {
            return Ok(());
        }
        if let Some(super_class) = class.super_class() {
            self.initialize_class(super_class)?;
        }

        let state = class.init.lock();
        match state.get() {
            InitState::Initialized | InitState::Initializing => return Ok(()),
            InitState::Erroneous => {
                return Err(Exception::NoClassDefFound(format!(
                    "Could not initialize class {}",
                    class.name()
                )));
            }
            InitState::NotInitialized => {}
        }
        state.set(InitState::Initializing);
        debug!("initializing {}", class.name());

        let result = self.seed_constant_values(class).and_then(|()| {
            match class.get_declared_method(CLASS_INIT, VOID_DESCRIPTOR) {
                Some(clinit) => self.invoke(&clinit, &[]).map(drop),
                None => Ok(()),
            }
        });
        match &result {
            Ok(()) => state.set(InitState::Initialized),
            Err(err) => {
                warn!("initialization of {} failed: {err}", class.name());
                state.set(InitState::Erroneous);
            }
        }
        result
    }

    fn seed_constant_values(&self, class: &Class) -> VmResult<()> {
        for field in class.fields().iter().filter(|f| f.is_static()) {
            let Some(index) = field.constant_value() else {
                continue;
            };
            let value = match class.constant_pool().get(index)? {
                ConstantPoolEntry::Integer(v) => Value::Int(v),
                ConstantPoolEntry::Float(v) => Value::Float(v),
                ConstantPoolEntry::Long(v) => Value::Long(v),
                ConstantPoolEntry::Double(v) => Value::Double(v),
                ConstantPoolEntry::String { .. } | ConstantPoolEntry::ResolvedString(_) => {
                    Value::Reference(self.resolve_string(class, index)?)
                }
                other => {
                    return Err(Exception::ClassFormat(format!(
                        "bad ConstantValue {:?} for {field}",
                        other.tag()
                    )));
                }
            };
            write_static(class, field, value)?;
        }
        Ok(())
    }

    /// Allocates a zeroed instance of `class`, initializing the class first.
    /// No constructor runs.
    pub fn new_instance(&self, class: &Arc<Class>) -> VmResult<ObjectRef> {
        if class.is_interface() || class.is_abstract() || class.is_array() {
            return Err(Exception::Instantiation(class.name().to_string()));
        }
        self.initialize_class(class)?;
        self.heap.allocate(Object::new(Arc::clone(class)))
    }

    /// `new` followed by the `<init>` matching `descriptor`.
    pub fn construct(
        &self,
        class: &Arc<Class>,
        descriptor: &str,
        args: &[Value],
    ) -> VmResult<ObjectRef> {
        let constructor = class.get_constructor(descriptor).ok_or_else(|| {
            Exception::NoSuchMethod(format!("{}~{OBJECT_INIT}~{descriptor}", class.name()))
        })?;
        let object = self.new_instance(class)?;
        let mut full_args = Vec::with_capacity(args.len() + 1);
        full_args.push(Value::Reference(object));
        full_args.extend_from_slice(args);
        self.invoke(&constructor, &full_args)?;
        Ok(object)
    }

    /// A zeroed array; `array_class` is the array's binary name, e.g. `[J`.
    pub fn new_array(&self, array_class: &str, length: usize) -> VmResult<ObjectRef> {
        let class = self.load_class(array_class)?;
        self.heap.allocate(Object::new_array(class, length)?)
    }

    /// The array class whose components are instances of `class`, e.g.
    /// `[Lpkg/Base;` for `pkg/Base` and `[[I` for `[I`.
    pub fn array_class_of(&self, class: &Class) -> VmResult<Arc<Class>> {
        self.load_class(&class.array_class_name())
    }

    /// `Object.clone`: a shallow copy of `id` under a fresh reference. Only
    /// arrays and `java/lang/Cloneable` implementations can be cloned.
    pub fn clone_object(&self, id: ObjectRef) -> VmResult<ObjectRef> {
        let object = self.object(id)?;
        let cloneable = self.load_class(CLONEABLE_CLASS)?;
        if !object.is_instance_of(&cloneable) {
            return Err(Exception::CloneNotSupported(object.class().name().to_string()));
        }
        self.heap.allocate(Object::clone(&object))
    }

    /// Dereferences a handle; `0` is a `NullPointerException`.
    pub fn object(&self, id: ObjectRef) -> VmResult<Arc<Object>> {
        if id == 0 {
            return Err(Exception::NullPointer);
        }
        self.heap
            .get(id)
            .ok_or_else(|| Exception::Internal(format!("dangling reference @{id}")))
    }

    /// The canonical `java/lang/String` for modified UTF-8 `bytes`. Its
    /// `value` char array is filled in when the class declares one.
    pub fn intern_string(&self, bytes: &[u8]) -> VmResult<ObjectRef> {
        if let Some(id) = self.strings.get(bytes) {
            return Ok(id);
        }
        let string_class = self.load_class(STRING_CLASS)?;
        let text = Symbol::intern(bytes)?;
        let chars: Vec<u16> = text.encode_utf16().collect();
        let value_field = string_class.get_declared_field("value", "[C");
        let char_array = match value_field {
            Some(_) => {
                let array = self.new_array("[C", chars.len())?;
                let array_object = self.object(array)?;
                for (index, ch) in chars.iter().enumerate() {
                    array_object.set_element(index, Value::Int(i32::from(*ch)))?;
                }
                Some(array)
            }
            None => None,
        };
        self.strings.intern(bytes, |bytes| {
            let string = Object::with_aux(Arc::clone(&string_class), ObjectAux::InternedString(bytes));
            if let (Some(field), Some(array)) = (&value_field, char_array) {
                string.set_field(field, Value::Reference(array))?;
            }
            self.heap.allocate(string)
        })
    }

    pub fn intern_str(&self, text: &str) -> VmResult<ObjectRef> {
        self.intern_string(Symbol::from_str(text).as_bytes())
    }

    /// Text of an interned string object.
    pub fn string_value(&self, id: ObjectRef) -> VmResult<String> {
        let object = self.object(id)?;
        match object.aux() {
            ObjectAux::InternedString(bytes) => Ok(Symbol::intern(bytes)?.as_str().to_string()),
            _ => Err(Exception::Internal(format!(
                "@{id} is a {}, not an interned string",
                object.class().name()
            ))),
        }
    }

    /// The `java/lang/Class` instance standing for `class`, created on first
    /// request.
    pub fn class_object(&self, class: &Arc<Class>) -> VmResult<ObjectRef> {
        class
            .mirror
            .get_or_try_init(|| {
                let class_class = self.load_class(CLASS_CLASS)?;
                self.heap.allocate(Object::with_aux(
                    class_class,
                    ObjectAux::ClassMirror(Arc::clone(class)),
                ))
            })
            .copied()
    }

    /// Runs `method` on the current thread with `args`, receiver first for
    /// instance methods. Static methods initialize their class first.
    pub fn invoke(&self, method: &Arc<Method>, args: &[Value]) -> VmResult<Option<Value>> {
        if method.is_abstract() {
            return Err(Exception::AbstractMethod(method.to_string()));
        }
        if method.is_static() {
            self.initialize_class(&method.class()?)?;
        }
        let mut slots: Vec<Slot> = Vec::with_capacity(method.argument_slots());
        for arg in args {
            arg.push_slots(&mut slots);
        }
        if slots.len() != method.argument_slots() {
            return Err(Exception::Internal(format!(
                "{method} takes {} argument slots, got {}",
                method.argument_slots(),
                slots.len()
            )));
        }

        let thread = self.current_thread();
        {
            let mut stack = thread.stack();
            stack.push(Arc::clone(method))?;
            let filled = slots
                .iter()
                .enumerate()
                .try_for_each(|(index, slot)| stack.set_local(index, *slot));
            if let Err(err) = filled {
                stack.pop();
                return Err(err);
            }
        }
        let result = self.executor.execute(self, &thread, method);
        thread.stack().pop();
        result
    }

    /// Dispatches on the receiver's class: vtable for class methods, itable
    /// for interface methods.
    pub fn invoke_virtual(
        &self,
        method: &Arc<Method>,
        receiver: ObjectRef,
        args: &[Value],
    ) -> VmResult<Option<Value>> {
        let class = Arc::clone(self.object(receiver)?.class());
        let selected = if method.class()?.is_interface() {
            class.select_interface_method(method)?
        } else {
            class.select_virtual(method)?
        };
        let mut full_args = Vec::with_capacity(args.len() + 1);
        full_args.push(Value::Reference(receiver));
        full_args.extend_from_slice(args);
        self.invoke(&selected, &full_args)
    }

    pub fn get_field(&self, object: ObjectRef, field: &Field) -> VmResult<Value> {
        self.object(object)?.get_field(field)
    }

    pub fn set_field(&self, object: ObjectRef, field: &Field, value: Value) -> VmResult<()> {
        self.object(object)?.set_field(field, value)
    }

    /// Reads a static field, initializing its class first.
    pub fn get_static(&self, field: &Field) -> VmResult<Value> {
        let class = static_owner(field)?;
        self.initialize_class(&class)?;
        let id = field.id();
        if field.is_category_two() {
            let slots = [class.static_slot(id)?, class.static_slot(id + 1)?];
            Value::from_slots(field.field_type(), &slots)
        } else {
            Value::from_slots(field.field_type(), &[class.static_slot(id)?])
        }
    }

    pub fn set_static(&self, field: &Field, value: Value) -> VmResult<()> {
        let class = static_owner(field)?;
        self.initialize_class(&class)?;
        write_static(&class, field, value)
    }

    /// Records the current call stack in `throwable`, leaving out the frames
    /// that are busy creating the exception itself.
    pub fn fill_in_stack_trace(&self, throwable: ObjectRef) -> VmResult<()> {
        let object = self.object(throwable)?;
        let throwable_class = self.load_class(THROWABLE_CLASS)?;
        let frames = self.current_thread().frames();

        let trace: Vec<StackTraceElement> = frames
            .iter()
            .skip_while(|(method, _)| method.name().as_str() == "fillInStackTrace")
            .skip_while(|(method, _)| {
                method.is_constructor()
                    && method.class().is_ok_and(|owner| {
                        owner.is_subclass_of(&throwable_class)
                            && object.class().is_subclass_of(&owner)
                    })
            })
            .map(|(method, pc)| StackTraceElement::new(method, *pc))
            .collect();
        object.set_extra(Arc::new(trace));
        Ok(())
    }

    /// The trace recorded by [`Vm::fill_in_stack_trace`], empty if none was.
    pub fn stack_trace(&self, throwable: ObjectRef) -> VmResult<Vec<StackTraceElement>> {
        let object = self.object(throwable)?;
        Ok(object
            .extra()
            .and_then(|extra| extra.downcast::<Vec<StackTraceElement>>().ok())
            .map(|trace| trace.as_ref().clone())
            .unwrap_or_default())
    }

    /// The runtime thread of the calling native thread; native threads
    /// entering the VM for the first time are attached.
    pub fn current_thread(&self) -> Arc<Thread> {
        thread::current().unwrap_or_else(|| {
            let name = std::thread::current()
                .name()
                .unwrap_or("main")
                .to_string();
            Thread::attach_current(name, self.options.thread_stack_slots)
        })
    }

    /// Starts a guest thread running `f`.
    pub fn spawn_thread<F, T>(
        self: &Arc<Self>,
        name: impl Into<String>,
        f: F,
    ) -> VmResult<(Arc<Thread>, JoinHandle<T>)>
    where
        F: FnOnce(&Vm, Arc<Thread>) -> T + Send + 'static,
        T: Send + 'static,
    {
        let vm = Arc::clone(self);
        Thread::spawn(name, self.options.thread_stack_slots, move |thread| {
            f(&vm, thread)
        })
    }
}

impl Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("options", &self.options)
            .field("loaded_classes", &self.loader.loaded_class_count())
            .field("live_objects", &self.heap.live_objects())
            .field("interned_strings", &self.strings.len())
            .finish_non_exhaustive()
    }
}

fn static_owner(field: &Field) -> VmResult<Arc<Class>> {
    if !field.is_static() {
        return Err(Exception::IncompatibleClassChange(format!(
            "expected static field {field}"
        )));
    }
    field.class()
}

fn write_static(class: &Class, field: &Field, value: Value) -> VmResult<()> {
    if !value.fits(field.field_type()) {
        return Err(Exception::Internal(format!(
            "{value:?} does not fit field {field}"
        )));
    }
    let mut slots = Vec::with_capacity(2);
    value.push_slots(&mut slots);
    for (offset, slot) in slots.into_iter().enumerate() {
        class.set_static_slot(field.id() + offset, slot)?;
    }
    Ok(())
}
