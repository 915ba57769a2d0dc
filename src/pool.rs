//! File-name string pool.
//!
//! Every `ExecNode` carries a handle to the file it was parsed from.
//! There are many nodes and few distinct files, so names are interned
//! once and shared by reference count instead of copied per node.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

#[derive(Default)]
struct PoolInner {
    entries: HashMap<Rc<str>, ()>,
}

/// Owns the interned set of file names for one VM.
#[derive(Default)]
pub struct StringPool {
    inner: RefCell<PoolInner>,
}

/// A handle into the pool. Cloning bumps the shared string's refcount;
/// dropping the last clone releases it back to the pool.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct PoolRef(Rc<str>);

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle to `s`, interning it if this is the first time
    /// it has been seen.
    pub fn get_or_add(&self, s: &str) -> PoolRef {
        let mut inner = self.inner.borrow_mut();
        if let Some((key, _)) = inner.entries.get_key_value(s) {
            return PoolRef(key.clone());
        }
        let rc: Rc<str> = Rc::from(s);
        inner.entries.insert(rc.clone(), ());
        PoolRef(rc)
    }

    /// Number of distinct names currently interned. Entries with no
    /// outstanding handle are dropped opportunistically here.
    pub fn len(&self) -> usize {
        let mut inner = self.inner.borrow_mut();
        inner.entries.retain(|k, _| Rc::strong_count(k) > 1);
        inner.entries.len()
    }
}

impl PoolRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PoolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interns_and_shares() {
        let pool = StringPool::new();
        let a = pool.get_or_add("main.derp");
        let b = pool.get_or_add("main.derp");
        assert_eq!(a.as_str(), "main.derp");
        assert!(Rc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn drops_when_unreferenced() {
        let pool = StringPool::new();
        {
            let _a = pool.get_or_add("scratch.derp");
            assert_eq!(pool.len(), 1);
        }
        assert_eq!(pool.len(), 0);
    }
}
