use std::{
    borrow::Cow,
    fmt::{Debug, Display},
    hash::{Hash, Hasher},
    ops::Deref,
    sync::{Arc, LazyLock},
};

use cesu8_str::java as cesu8_java;
use dashmap::DashMap;

use crate::runtime::{Exception, VmResult};

static SYMBOLS: LazyLock<DashMap<Box<[u8]>, Symbol>> = LazyLock::new(DashMap::new);

/// An interned modified-UTF-8 string.
///
/// Every distinct byte sequence maps to exactly one allocation, so two symbols
/// compare equal iff they point at the same storage.
#[derive(Clone)]
pub struct Symbol(Arc<SymbolData>);

struct SymbolData {
    bytes: Box<[u8]>,
    text: Box<str>,
}

impl Symbol {
    /// Interns raw bytes from a class file. Rejects invalid modified UTF-8.
    pub fn intern(bytes: &[u8]) -> VmResult<Symbol> {
        if let Some(symbol) = SYMBOLS.get(bytes) {
            return Ok(symbol.clone());
        }
        let java_str = cesu8_java::JavaStr::from_java_cesu8(bytes)
            .map_err(|_| Exception::ClassFormat("illegal modified UTF-8 constant".to_string()))?;
        let text = cesu8_java::from_java_cesu8(java_str).into_owned();
        Ok(Self::insert(bytes, text))
    }

    pub fn from_str(s: &str) -> Symbol {
        let bytes: Cow<'_, [u8]> = match cesu8_java::from_utf8(s) {
            Cow::Borrowed(b) => Cow::Borrowed(b.as_bytes()),
            Cow::Owned(o) => Cow::Owned(o.into_bytes()),
        };
        if let Some(symbol) = SYMBOLS.get(bytes.as_ref()) {
            return symbol.clone();
        }
        Self::insert(&bytes, s.to_string())
    }

    fn insert(bytes: &[u8], text: String) -> Symbol {
        SYMBOLS
            .entry(bytes.into())
            .or_insert_with(|| {
                Symbol(Arc::new(SymbolData {
                    bytes: bytes.into(),
                    text: text.into_boxed_str(),
                }))
            })
            .clone()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0.bytes
    }

    pub fn as_str(&self) -> &str {
        &self.0.text
    }

    pub fn ptr_eq(&self, other: &Symbol) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

impl PartialEq<str> for Symbol {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for Symbol {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl Deref for Symbol {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self.as_str(), f)
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_is_canonical() {
        let a = Symbol::intern(b"pkg/Base").unwrap();
        let b = Symbol::from_str("pkg/Base");
        let c = Symbol::intern(b"pkg/Derived").unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, "pkg/Base");
    }

    #[test]
    fn test_modified_utf8_null() {
        // U+0000 is encoded as two bytes in modified UTF-8
        let symbol = Symbol::intern(&[b'a', 0xc0, 0x80, b'b']).unwrap();
        assert_eq!(symbol.as_str(), "a\0b");
        assert!(Symbol::from_str("a\0b").ptr_eq(&symbol));
    }

    #[test]
    fn test_invalid_bytes() {
        assert!(matches!(
            Symbol::intern(&[0xff, 0xfe]),
            Err(Exception::ClassFormat(_))
        ));
    }
}
