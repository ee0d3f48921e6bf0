use std::{
    cell::RefCell,
    fmt::{self, Display},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self as native, JoinHandle, ThreadId},
};

use log::debug;
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::{
    class::Symbol,
    runtime::{Exception, FrameStack, Method, VmResult},
};

thread_local! {
    static CURRENT: RefCell<Option<Arc<Thread>>> = const { RefCell::new(None) };
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// At most one thread is mid-creation, so `PENDING` has a single producer.
static CREATION: Mutex<()> = Mutex::new(());
static PENDING: Mutex<Option<Arc<Thread>>> = Mutex::new(None);
static PUBLISHED: Condvar = Condvar::new();

/// The runtime thread bound to the calling native thread, if any.
pub fn current() -> Option<Arc<Thread>> {
    CURRENT.with_borrow(Clone::clone)
}

/// A guest thread: one native thread plus its frame stack.
#[derive(Debug)]
pub struct Thread {
    id: u64,
    name: String,
    native_id: OnceCell<ThreadId>,
    stack: Mutex<FrameStack>,
}

impl Thread {
    fn new(name: String, stack_slots: usize) -> Arc<Thread> {
        Arc::new(Thread {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            name,
            native_id: OnceCell::new(),
            stack: Mutex::new(FrameStack::new(stack_slots)),
        })
    }

    /// Binds a new runtime thread to the calling native thread, replacing any
    /// previous binding.
    pub fn attach_current(name: impl Into<String>, stack_slots: usize) -> Arc<Thread> {
        let thread = Thread::new(name.into(), stack_slots);
        let _ = thread.native_id.set(native::current().id());
        CURRENT.set(Some(Arc::clone(&thread)));
        debug!("attached thread {} ({})", thread.id, thread.name);
        thread
    }

    /// Starts a native thread running `f` with its runtime thread already
    /// bound.
    ///
    /// The new thread builds and publishes its `Thread`; the creator waits
    /// for it, then records the native id.
    pub fn spawn<F, T>(
        name: impl Into<String>,
        stack_slots: usize,
        f: F,
    ) -> VmResult<(Arc<Thread>, JoinHandle<T>)>
    where
        F: FnOnce(Arc<Thread>) -> T + Send + 'static,
        T: Send + 'static,
    {
        let name = name.into();
        let _creation = CREATION.lock();

        let thread_name = name.clone();
        let handle = native::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let thread = Thread::new(thread_name, stack_slots);
                CURRENT.set(Some(Arc::clone(&thread)));
                {
                    let mut pending = PENDING.lock();
                    *pending = Some(Arc::clone(&thread));
                    PUBLISHED.notify_one();
                }
                f(thread)
            })
            .map_err(|err| Exception::Internal(format!("cannot start thread {name}: {err}")))?;

        let thread = {
            let mut pending = PENDING.lock();
            loop {
                if let Some(thread) = pending.take() {
                    break thread;
                }
                PUBLISHED.wait(&mut pending);
            }
        };
        let _ = thread.native_id.set(handle.thread().id());
        debug!("spawned thread {} ({name})", thread.id);
        Ok((thread, handle))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `None` only briefly, while a spawn handshake is finishing.
    pub fn native_id(&self) -> Option<ThreadId> {
        self.native_id.get().copied()
    }

    /// The frame stack. Do not hold the guard across a call back into the
    /// VM; invocation locks it too.
    pub fn stack(&self) -> MutexGuard<'_, FrameStack> {
        self.stack.lock()
    }

    /// Methods and pcs of the live frames, innermost first.
    pub fn frames(&self) -> Vec<(Arc<Method>, usize)> {
        self.stack
            .lock()
            .frames()
            .map(|(frame, pc)| (Arc::clone(frame.method()), pc))
            .collect()
    }

    pub fn capture_stack_trace(&self) -> Vec<StackTraceElement> {
        self.frames()
            .iter()
            .map(|(method, pc)| StackTraceElement::new(method, *pc))
            .collect()
    }
}

/// One line of a guest stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackTraceElement {
    pub class_name: Symbol,
    pub method_name: Symbol,
    pub source_file: Option<Symbol>,
    pub line: Option<u16>,
}

impl StackTraceElement {
    pub(crate) fn new(method: &Method, pc: usize) -> Self {
        Self {
            class_name: method.class_name().clone(),
            method_name: method.name().clone(),
            source_file: method
                .class()
                .ok()
                .and_then(|class| class.source_file().cloned()),
            line: method.line_number(pc),
        }
    }
}

impl Display for StackTraceElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}",
            self.class_name.replace('/', "."),
            self.method_name
        )?;
        match (&self.source_file, self.line) {
            (Some(file), Some(line)) => write!(f, "({file}:{line})"),
            (Some(file), None) => write!(f, "({file})"),
            _ => f.write_str("(Unknown Source)"),
        }
    }
}
