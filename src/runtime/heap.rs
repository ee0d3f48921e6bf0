use std::{fmt::Debug, sync::Arc};

use parking_lot::RwLock;

use crate::runtime::{Exception, Object, ObjectRef, VmResult};

pub mod string_table;

/// Storage for guest objects.
///
/// Handles are never `0` (that is `null`). Reclamation policy is entirely up
/// to the implementation; the core only ever allocates and dereferences.
pub trait HeapAllocator: Debug + Send + Sync {
    fn allocate(&self, object: Object) -> VmResult<ObjectRef>;

    fn get(&self, id: ObjectRef) -> Option<Arc<Object>>;

    /// Drops the heap's reference to `id`; the handle may be reused.
    fn release(&self, id: ObjectRef);

    fn live_objects(&self) -> usize;
}

/// A handle table with a free list and a fixed capacity.
#[derive(Debug)]
pub struct Heap {
    capacity: usize,
    inner: RwLock<HeapInner>,
}

#[derive(Debug, Default)]
struct HeapInner {
    objects: Vec<Option<Arc<Object>>>,
    free: Vec<ObjectRef>,
    live: usize,
}

impl Heap {
    pub fn new(capacity: usize) -> Heap {
        Heap {
            capacity,
            inner: RwLock::new(HeapInner::default()),
        }
    }
}

impl HeapAllocator for Heap {
    fn allocate(&self, object: Object) -> VmResult<ObjectRef> {
        let mut inner = self.inner.write();
        if inner.live >= self.capacity {
            return Err(Exception::OutOfMemory(format!(
                "heap is full ({} objects)",
                self.capacity
            )));
        }
        let object = Some(Arc::new(object));
        let id = match inner.free.pop() {
            Some(id) => {
                inner.objects[(id - 1) as usize] = object;
                id
            }
            None => {
                inner.objects.push(object);
                inner.objects.len() as ObjectRef
            }
        };
        inner.live += 1;
        Ok(id)
    }

    fn get(&self, id: ObjectRef) -> Option<Arc<Object>> {
        let index = (id as usize).checked_sub(1)?;
        self.inner.read().objects.get(index)?.clone()
    }

    fn release(&self, id: ObjectRef) {
        let Some(index) = (id as usize).checked_sub(1) else {
            return;
        };
        let mut inner = self.inner.write();
        if inner.objects.get_mut(index).and_then(Option::take).is_some() {
            inner.live -= 1;
            inner.free.push(id);
        }
    }

    fn live_objects(&self) -> usize {
        self.inner.read().live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{BootstrapClassLoader, ClassLoader, MemorySource};

    fn object() -> Object {
        let loader = BootstrapClassLoader::new(vec![Box::new(MemorySource::with_minimal_runtime())]);
        Object::new(loader.load_class("java/lang/Object").unwrap())
    }

    #[test]
    fn test_ids_start_at_one_and_are_reused() {
        let heap = Heap::new(2);
        let a = heap.allocate(object()).unwrap();
        let b = heap.allocate(object()).unwrap();
        assert_eq!((a, b), (1, 2));
        assert!(heap.get(0).is_none());
        assert!(heap.get(a).is_some());

        heap.release(a);
        assert!(heap.get(a).is_none());
        assert_eq!(heap.live_objects(), 1);
        assert_eq!(heap.allocate(object()).unwrap(), a);
    }

    #[test]
    fn test_capacity() {
        let heap = Heap::new(1);
        heap.allocate(object()).unwrap();
        assert!(matches!(
            heap.allocate(object()),
            Err(Exception::OutOfMemory(_))
        ));
        heap.release(1);
        heap.release(1);
        assert_eq!(heap.live_objects(), 0);
    }
}
