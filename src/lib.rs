//! Class loading, linking and the runtime object/type model of a JVM.
//!
//! The [`class`] layer turns class-file bytes into symbolic structures; the
//! [`runtime`] layer builds linked classes from them, resolves constant-pool
//! references lazily, lays out objects and manages per-thread frame stacks.

pub mod class;
pub mod consts;
pub mod descriptor;
pub mod runtime;

pub use class::Symbol;
pub use runtime::{
    AccessPolicy, BootstrapClassLoader, Class, ClassLoader, ClassSource, DefaultAccessPolicy,
    DirectorySource, Exception, Field, Heap, HeapAllocator, JarSource, MemorySource, Method,
    MethodExecutor, Object, ObjectRef, Slot, Thread, Value, Vm, VmOptions, VmResult,
};
