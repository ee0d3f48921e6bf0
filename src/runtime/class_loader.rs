use std::{fmt::Debug, sync::Arc};

use crate::runtime::{Class, VmResult};

mod bootstrap;
mod source;

pub use bootstrap::BootstrapClassLoader;
pub use source::{ClassSource, DirectorySource, JarSource, MemorySource};

/// Maps binary class names to linked classes.
///
/// A loader returns the same `Arc<Class>` for every request of one name, and
/// a failed load leaves nothing registered.
pub trait ClassLoader: Debug + Send + Sync {
    fn load_class(&self, name: &str) -> VmResult<Arc<Class>>;

    /// A class this loader has already defined, without loading anything.
    fn find_loaded_class(&self, name: &str) -> Option<Arc<Class>>;
}
