use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};

use crate::runtime::{ObjectRef, VmResult};

/// Canonical string objects by modified UTF-8 content.
#[derive(Debug, Default)]
pub struct StringTable {
    map: DashMap<Arc<[u8]>, ObjectRef>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bytes: &[u8]) -> Option<ObjectRef> {
        self.map.get(bytes).map(|entry| *entry)
    }

    /// The interned object for `bytes`, creating it with `create` on first
    /// use. Racing creators agree on a single winner.
    ///
    /// `create` runs under the table's shard lock and must not intern.
    pub fn intern(
        &self,
        bytes: &[u8],
        create: impl FnOnce(Arc<[u8]>) -> VmResult<ObjectRef>,
    ) -> VmResult<ObjectRef> {
        if let Some(id) = self.get(bytes) {
            return Ok(id);
        }
        let bytes: Arc<[u8]> = Arc::from(bytes);
        match self.map.entry(Arc::clone(&bytes)) {
            Entry::Occupied(entry) => Ok(*entry.get()),
            Entry::Vacant(entry) => {
                let id = create(bytes)?;
                entry.insert(id);
                Ok(id)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Exception;

    #[test]
    fn test_intern_once() {
        let table = StringTable::new();
        let mut created = 0;
        let a = table
            .intern(b"hello", |_| {
                created += 1;
                Ok(7)
            })
            .unwrap();
        let b = table.intern(b"hello", |_| Ok(8)).unwrap();
        assert_eq!((a, b), (7, 7));
        assert_eq!(created, 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_failed_create_leaves_nothing() {
        let table = StringTable::new();
        let result = table.intern(b"x", |_| Err(Exception::OutOfMemory("full".into())));
        assert!(result.is_err());
        assert!(table.get(b"x").is_none());
    }
}
