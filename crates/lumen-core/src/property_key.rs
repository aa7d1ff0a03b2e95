#![forbid(unsafe_code)]

//! Property keys and object identity.
//!
//! A [`PropertyKey`] is either a plain string name or a [`Symbol`]. Symbols
//! compare by a process-unique id, so two symbols with the same description
//! are still different keys.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

// ─── Symbol ID generation ────────────────────────────────────────────────────

static NEXT_SYMBOL_ID: AtomicU64 = AtomicU64::new(1);

fn next_symbol_id() -> u64 {
    NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Symbol ──────────────────────────────────────────────────────────────────

/// A unique key with a diagnostic description.
///
/// Equality and hashing use only the id; the description is never consulted.
#[derive(Clone)]
pub struct Symbol {
    id: u64,
    description: Arc<str>,
}

impl Symbol {
    /// Mint a new symbol, distinct from every other symbol in the process.
    #[must_use]
    pub fn new(description: &str) -> Self {
        Self {
            id: next_symbol_id(),
            description: Arc::from(description),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})#{}", self.description, self.id)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.description)
    }
}

// ─── PropertyKey ─────────────────────────────────────────────────────────────

/// Key of a tracked field or a hidden field.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// Ordinary string property name.
    Name(Arc<str>),
    /// Unique symbol key.
    Symbol(Symbol),
}

impl PropertyKey {
    #[must_use]
    pub fn name(name: &str) -> Self {
        Self::Name(Arc::from(name))
    }

    /// The string name, if this is not a symbol key.
    #[must_use]
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Symbol(_) => None,
        }
    }

    #[must_use]
    pub fn is_symbol(&self) -> bool {
        matches!(self, Self::Symbol(_))
    }
}

impl From<&str> for PropertyKey {
    fn from(name: &str) -> Self {
        Self::name(name)
    }
}

impl From<String> for PropertyKey {
    fn from(name: String) -> Self {
        Self::Name(Arc::from(name))
    }
}

impl From<Symbol> for PropertyKey {
    fn from(symbol: Symbol) -> Self {
        Self::Symbol(symbol)
    }
}

impl From<&PropertyKey> for PropertyKey {
    fn from(key: &PropertyKey) -> Self {
        key.clone()
    }
}

impl fmt::Debug for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{name:?}"),
            Self::Symbol(symbol) => write!(f, "{symbol:?}"),
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Symbol(symbol) => write!(f, "{symbol}"),
        }
    }
}

// ─── ObjectId ────────────────────────────────────────────────────────────────

/// Identity of a reference-counted object, taken from its allocation address.
///
/// Two live `Rc`s have the same `ObjectId` iff they point to the same
/// allocation. An id may be reused once every strong and weak handle to the
/// allocation is gone.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(usize);

impl ObjectId {
    #[must_use]
    pub fn of<T: ?Sized>(object: &Rc<T>) -> Self {
        Self(Rc::as_ptr(object).cast::<()>() as usize)
    }

    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({:#x})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[object {:#x}]", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn symbols_with_same_description_differ() {
        let a = Symbol::new("ViewModel");
        let b = Symbol::new("ViewModel");
        assert_ne!(a, b);
        assert_eq!(a.description(), b.description());
        assert_eq!(a, a.clone());
    }

    #[test]
    fn symbol_hash_follows_id() {
        let a = Symbol::new("x");
        let mut set = HashSet::new();
        set.insert(PropertyKey::from(a.clone()));
        assert!(set.contains(&PropertyKey::Symbol(a)));
        assert!(!set.contains(&PropertyKey::Symbol(Symbol::new("x"))));
    }

    #[test]
    fn names_compare_by_content() {
        assert_eq!(PropertyKey::from("count"), PropertyKey::from(String::from("count")));
        assert_ne!(PropertyKey::from("count"), PropertyKey::from("total"));
        assert_eq!(PropertyKey::from("count").as_name(), Some("count"));
    }

    #[test]
    fn name_never_equals_symbol() {
        let symbol = Symbol::new("count");
        assert_ne!(PropertyKey::from("count"), PropertyKey::from(symbol));
    }

    #[test]
    fn display_formats() {
        assert_eq!(PropertyKey::from("count").to_string(), "count");
        assert_eq!(
            PropertyKey::from(Symbol::new("ViewModel")).to_string(),
            "Symbol(ViewModel)"
        );
    }

    #[test]
    fn object_id_tracks_allocation() {
        let a = Rc::new(1u8);
        let b = Rc::new(1u8);
        assert_eq!(ObjectId::of(&a), ObjectId::of(&Rc::clone(&a)));
        assert_ne!(ObjectId::of(&a), ObjectId::of(&b));
    }
}
