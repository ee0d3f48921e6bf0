mod class;
mod class_loader;
mod constant_pool;
mod exception;
mod frame;
mod heap;
mod member;
mod object;
mod resolve;
mod thread;
mod vm;

pub use class::{Class, ITable, InitState};
pub use class_loader::{
    BootstrapClassLoader, ClassLoader, ClassSource, DirectorySource, JarSource, MemorySource,
};
pub use constant_pool::{ConstantPool, ConstantPoolEntry, ConstantTag, MemberRef};
pub use exception::{Exception, VmResult};
pub use frame::{Frame, FrameStack};
pub use heap::{Heap, HeapAllocator, string_table::StringTable};
pub use member::{Field, Method};
pub use object::{Object, ObjectAux, Value};
pub use resolve::{AccessPolicy, AccessTarget, DefaultAccessPolicy};
pub use thread::{StackTraceElement, Thread, current as current_thread};
pub use vm::{MethodExecutor, Vm, VmOptions};

/// One 32-bit word of a frame, an object or static storage. `long` and
/// `double` take two, high word first.
pub type Slot = u32;

/// Heap handle of a guest object; `0` is `null`.
pub type ObjectRef = u32;

pub const NULL: ObjectRef = 0;
