#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc};

use jvm_core::{
    BootstrapClassLoader, Exception, MemorySource, Method, MethodExecutor, Thread, Value, Vm,
    VmOptions, VmResult,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

type Handler = Arc<dyn Fn(&Vm, &Thread, &Arc<Method>) -> VmResult<Option<Value>> + Send + Sync>;

/// Runs methods by looking up a closure keyed by `class~name~descriptor`.
/// Constructors and class initializers without a handler do nothing.
#[derive(Default, Clone)]
pub struct ScriptedExecutor {
    handlers: HashMap<String, Handler>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        mut self,
        signature: &str,
        handler: impl Fn(&Vm, &Thread, &Arc<Method>) -> VmResult<Option<Value>> + Send + Sync + 'static,
    ) -> Self {
        self.handlers.insert(signature.to_string(), Arc::new(handler));
        self
    }
}

impl MethodExecutor for ScriptedExecutor {
    fn execute(&self, vm: &Vm, thread: &Thread, method: &Arc<Method>) -> VmResult<Option<Value>> {
        let key = format!(
            "{}~{}~{}",
            method.class_name(),
            method.name(),
            method.descriptor()
        );
        match self.handlers.get(&key) {
            Some(handler) => handler(vm, thread, method),
            None if method.is_constructor() || method.is_class_initializer() => Ok(None),
            None => Err(Exception::Internal(format!("no handler for {key}"))),
        }
    }
}

pub fn loader(classes: Vec<(&str, Vec<u8>)>) -> Arc<BootstrapClassLoader> {
    let source = MemorySource::with_minimal_runtime();
    for (name, bytes) in classes {
        source.insert(name, bytes);
    }
    BootstrapClassLoader::new(vec![Box::new(source)])
}

pub fn vm(classes: Vec<(&str, Vec<u8>)>, executor: ScriptedExecutor) -> Vm {
    init_logging();
    Vm::new(VmOptions::default(), loader(classes), executor)
}

pub fn vm_with_options(
    options: VmOptions,
    classes: Vec<(&str, Vec<u8>)>,
    executor: ScriptedExecutor,
) -> Vm {
    init_logging();
    Vm::new(options, loader(classes), executor)
}
