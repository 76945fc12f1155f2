//! interned content addresses
//!
//! digests are stored once per build in an [`AddressTable`] and referred to by
//! [`Address`] handles. handles compare by identity, so "unchanged" checks never
//! touch the digest strings.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::hash::{is_valid_digest, ALL_ZERO_HASH};

/// opaque handle to an interned digest
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(u32);

impl Address {
    /// handle of the all-zero digest, pre-interned in every table
    pub const ZERO: Address = Address(0);

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn index(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

#[derive(Default)]
struct Inner {
    digests: Vec<Arc<str>>,
    index: HashMap<Arc<str>, Address>,
}

/// build-scoped digest intern table
///
/// insertions happen under a single write lock so two workers that see the same
/// new digest at once still end up with one handle.
pub struct AddressTable {
    inner: RwLock<Inner>,
}

impl AddressTable {
    pub fn new() -> Self {
        let zero: Arc<str> = Arc::from(ALL_ZERO_HASH);
        let mut inner = Inner::default();
        inner.digests.push(zero.clone());
        inner.index.insert(zero, Address::ZERO);
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// intern a digest string, validating it first
    pub fn intern(&self, digest: &str) -> Result<Address> {
        if !is_valid_digest(digest) {
            return Err(Error::InvalidHashHex(digest.to_string()));
        }
        Ok(self.intern_unchecked(digest))
    }

    /// intern a digest produced by the hasher
    pub(crate) fn intern_unchecked(&self, digest: &str) -> Address {
        {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            if let Some(addr) = inner.index.get(digest) {
                return *addr;
            }
        }

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        // another worker may have inserted it between the two locks
        if let Some(addr) = inner.index.get(digest) {
            return *addr;
        }
        let addr = Address(inner.digests.len() as u32);
        let digest: Arc<str> = Arc::from(digest);
        inner.digests.push(digest.clone());
        inner.index.insert(digest, addr);
        addr
    }

    /// look up a digest without interning it
    pub fn lookup(&self, digest: &str) -> Option<Address> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.index.get(digest).copied()
    }

    /// the digest string behind a handle
    pub fn resolve(&self, addr: Address) -> Result<Arc<str>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .digests
            .get(addr.0 as usize)
            .cloned()
            .ok_or(Error::UnknownAddress(addr.0))
    }

    /// number of distinct digests, the zero digest included
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AddressTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AddressTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressTable")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const DIGEST_A: &str = "6c27df6efcd6fc401ff1bc67c970b83eef115f6473db4fb9d57e5de317eba96e";
    const DIGEST_B: &str = "d93a5e9129361e28b9e244fe422234e3a1794b001a082aeb78e16fd881673a2b";

    #[test]
    fn test_zero_preinterned() {
        let table = AddressTable::new();
        assert_eq!(table.len(), 1);
        assert_eq!(table.intern(ALL_ZERO_HASH).unwrap(), Address::ZERO);
        assert_eq!(&*table.resolve(Address::ZERO).unwrap(), ALL_ZERO_HASH);
        assert!(Address::ZERO.is_zero());
    }

    #[test]
    fn test_intern_idempotent() {
        let table = AddressTable::new();
        let a1 = table.intern(DIGEST_A).unwrap();
        let a2 = table.intern(DIGEST_A).unwrap();
        assert_eq!(a1, a2);
        assert_eq!(table.len(), 2);

        let b = table.intern(DIGEST_B).unwrap();
        assert_ne!(a1, b);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_resolve_roundtrip() {
        let table = AddressTable::new();
        let a = table.intern(DIGEST_A).unwrap();
        assert_eq!(&*table.resolve(a).unwrap(), DIGEST_A);
        assert_eq!(table.lookup(DIGEST_A), Some(a));
        assert_eq!(table.lookup(DIGEST_B), None);
    }

    #[test]
    fn test_resolve_unknown() {
        let table = AddressTable::new();
        let other = AddressTable::new();
        other.intern(DIGEST_A).unwrap();
        let foreign = other.intern(DIGEST_B).unwrap();
        assert!(matches!(table.resolve(foreign), Err(Error::UnknownAddress(2))));
    }

    #[test]
    fn test_intern_rejects_bad_hex() {
        let table = AddressTable::new();
        assert!(table.intern("abcd").is_err());
        assert!(table.intern(&DIGEST_A.to_uppercase()).is_err());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_concurrent_first_sighting() {
        let table = AddressTable::new();
        let handles: Vec<Address> = thread::scope(|s| {
            let workers: Vec<_> = (0..8)
                .map(|_| s.spawn(|| table.intern(DIGEST_A).unwrap()))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert!(handles.iter().all(|h| *h == handles[0]));
        assert_eq!(table.len(), 2);
    }
}
