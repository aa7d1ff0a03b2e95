#![forbid(unsafe_code)]

//! Hidden per-object fields and field-name allocation.
//!
//! Runtime subsystems use this module to attach private state to objects they
//! do not own, such as the link from a component instance to its view-model.
//!
//! # Field names
//!
//! [`create_field_name`] mints the key of an association channel. By default
//! each call yields a fresh [`Symbol`], so keys never collide with each other
//! or with any string property. With the `mangled-field-names` feature the key
//! is the string `$$lumen-engine-<name>$$`; two channels minted from the same
//! label then share a key.
//!
//! # Hidden fields
//!
//! The association table maps an owner's identity to a record of
//! `PropertyKey -> value`. The table holds only a `Weak` handle to the owner:
//! it never keeps the owner alive, and records whose owner is gone become
//! unreachable and are swept on later writes.
//!
//! There is deliberately no way to enumerate or delete entries.
//!
//! # Invariants
//!
//! 1. Writes under one owner never affect reads under another owner.
//! 2. Writes under one key never affect reads under another key of the same
//!    owner.
//! 3. `Rc::strong_count(owner)` is unchanged by any table operation.
//! 4. A read returns `Some` iff a value of the requested type was written
//!    under that `(owner, key)` pair.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use ahash::AHashMap;

use crate::property_key::{ObjectId, PropertyKey, Symbol};

// ─── Field names ─────────────────────────────────────────────────────────────

/// Namespace used by mangled field names.
pub const FIELD_NAMESPACE: &str = "lumen-engine";

/// Whether field names are minted as unique symbols.
pub const HAS_NATIVE_SYMBOLS: bool = !cfg!(feature = "mangled-field-names");

/// How [`create_field_name`] builds keys in this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldNameMode {
    /// Every key is a fresh symbol.
    Symbol,
    /// Keys are `$$lumen-engine-<name>$$` strings.
    Mangled,
}

#[must_use]
pub const fn field_name_mode() -> FieldNameMode {
    if HAS_NATIVE_SYMBOLS {
        FieldNameMode::Symbol
    } else {
        FieldNameMode::Mangled
    }
}

/// Mint the key for an association channel.
///
/// `name` is a diagnostic label only; see the module docs for the uniqueness
/// guarantee in each mode.
#[must_use]
pub fn create_field_name(name: &str) -> PropertyKey {
    match field_name_mode() {
        FieldNameMode::Symbol => PropertyKey::Symbol(Symbol::new(name)),
        FieldNameMode::Mangled => PropertyKey::from(mangle_field_name(name)),
    }
}

/// The string key used for `name` when symbols are unavailable.
#[must_use]
pub fn mangle_field_name(name: &str) -> String {
    format!("$${FIELD_NAMESPACE}-{name}$$")
}

// ─── Hidden field table ──────────────────────────────────────────────────────

const MIN_SWEEP_THRESHOLD: usize = 64;

struct OwnerRecord {
    owner: Weak<dyn Any>,
    values: AHashMap<PropertyKey, Box<dyn Any>>,
}

impl OwnerRecord {
    fn new<O: Any>(owner: &Rc<O>) -> Self {
        let owner: Weak<O> = Rc::downgrade(owner);
        let owner: Weak<dyn Any> = owner;
        Self {
            owner,
            values: AHashMap::new(),
        }
    }

    fn is_live(&self) -> bool {
        self.owner.strong_count() > 0
    }
}

/// Values displaced by a write. Dropped by the caller once the table is no
/// longer borrowed, since a value's destructor may use the table again.
#[must_use]
pub(crate) struct Released {
    _previous: Option<Box<dyn Any>>,
    _swept: Vec<OwnerRecord>,
}

/// Weakly-keyed table of hidden fields.
///
/// Most code uses the thread's shared table through [`set_hidden_field`] and
/// [`get_hidden_field`]; a standalone table is useful for subsystems that
/// want their own namespace.
pub struct HiddenFields {
    records: AHashMap<ObjectId, OwnerRecord>,
    sweep_threshold: usize,
}

impl HiddenFields {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: AHashMap::new(),
            sweep_threshold: MIN_SWEEP_THRESHOLD,
        }
    }

    /// Associate `value` with `key` under `owner`, replacing any prior value.
    pub fn set<O: Any, V: Any>(&mut self, owner: &Rc<O>, key: &PropertyKey, value: V) {
        drop(self.insert(owner, key, value));
    }

    /// Read the value stored under `(owner, key)`.
    ///
    /// Returns `None` if nothing was stored, or if the stored value is not a `V`.
    #[must_use]
    pub fn get<O: Any, V: Any + Clone>(&self, owner: &Rc<O>, key: &PropertyKey) -> Option<V> {
        self.records
            .get(&ObjectId::of(owner))?
            .values
            .get(key)?
            .downcast_ref::<V>()
            .cloned()
    }

    /// Whether any value is stored under `(owner, key)`.
    #[must_use]
    pub fn contains<O: Any>(&self, owner: &Rc<O>, key: &PropertyKey) -> bool {
        self.records
            .get(&ObjectId::of(owner))
            .is_some_and(|record| record.values.contains_key(key))
    }

    pub(crate) fn insert<O: Any, V: Any>(
        &mut self,
        owner: &Rc<O>,
        key: &PropertyKey,
        value: V,
    ) -> Released {
        // A record's `Weak` pins the allocation, so a live owner can only
        // match a record created for that same owner.
        let record = self
            .records
            .entry(ObjectId::of(owner))
            .or_insert_with(|| OwnerRecord::new(owner));
        let previous = record.values.insert(key.clone(), Box::new(value));

        let swept = if self.records.len() >= self.sweep_threshold {
            self.sweep()
        } else {
            Vec::new()
        };

        Released {
            _previous: previous,
            _swept: swept,
        }
    }

    fn sweep(&mut self) -> Vec<OwnerRecord> {
        let dead: Vec<ObjectId> = self
            .records
            .iter()
            .filter(|(_, record)| !record.is_live())
            .map(|(id, _)| *id)
            .collect();
        let swept: Vec<OwnerRecord> = dead
            .into_iter()
            .filter_map(|id| self.records.remove(&id))
            .collect();

        let live = self.records.len();
        self.sweep_threshold = (live * 2).max(MIN_SWEEP_THRESHOLD);
        tracing::trace!(swept = swept.len(), live, "hidden field table swept");
        swept
    }

    #[cfg(test)]
    pub(crate) fn record_count(&self) -> usize {
        self.records.len()
    }
}

impl Default for HiddenFields {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HiddenFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Contents stay private; only the shape is shown.
        f.debug_struct("HiddenFields")
            .field("records", &self.records.len())
            .field("sweep_threshold", &self.sweep_threshold)
            .finish()
    }
}

// ─── Thread-shared table ─────────────────────────────────────────────────────

thread_local! {
    static HIDDEN_FIELDS: RefCell<HiddenFields> = RefCell::new(HiddenFields::new());
}

/// Associate `value` with `key` under `owner` in the thread's shared table.
pub fn set_hidden_field<O: Any, V: Any>(owner: &Rc<O>, key: &PropertyKey, value: V) {
    let released = HIDDEN_FIELDS.with(|table| table.borrow_mut().insert(owner, key, value));
    drop(released);
}

/// Read a hidden field from the thread's shared table. `None` means absent.
#[must_use]
pub fn get_hidden_field<O: Any, V: Any + Clone>(owner: &Rc<O>, key: &PropertyKey) -> Option<V> {
    HIDDEN_FIELDS.with(|table| table.borrow().get(owner, key))
}

/// Whether the thread's shared table holds a value under `(owner, key)`.
#[must_use]
pub fn has_hidden_field<O: Any>(owner: &Rc<O>, key: &PropertyKey) -> bool {
    HIDDEN_FIELDS.with(|table| table.borrow().contains(owner, key))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
