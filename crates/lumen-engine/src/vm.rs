#![forbid(unsafe_code)]

//! View-model records for component instances.
//!
//! A [`Vm`] owns everything the runtime keeps about one component instance
//! that the component itself must not see: the tracked-field storage, the
//! dirty flag (queued for re-render), the rendering flag, and the observer
//! that records what its render pass read. The observer lives and dies with
//! the record.
//!
//! Components reach their VM through a hidden field minted once per thread
//! as `"ViewModel"`; see [`link_component_vm`] and [`get_component_vm`].

use std::any::Any;
use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use lumen_core::fields::{create_field_name, get_hidden_field, set_hidden_field};
use lumen_core::PropertyKey;

use crate::mutation_tracker::ReactiveObserver;

static NEXT_VM_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static VIEW_MODEL: PropertyKey = create_field_name("ViewModel");
}

/// Per-instance record backing a component's tracked fields.
pub struct Vm<V> {
    id: u64,
    tag: Arc<str>,
    tracked: RefCell<AHashMap<PropertyKey, V>>,
    dirty: Cell<bool>,
    rendering: Cell<bool>,
    render_observer: OnceCell<ReactiveObserver>,
}

impl<V> Vm<V> {
    /// Create a clean, non-rendering record with empty tracked storage.
    #[must_use]
    pub fn new(tag: &str) -> Self {
        Self {
            id: NEXT_VM_ID.fetch_add(1, Ordering::Relaxed),
            tag: Arc::from(tag),
            tracked: RefCell::new(AHashMap::new()),
            dirty: Cell::new(false),
            rendering: Cell::new(false),
            render_observer: OnceCell::new(),
        }
    }

    /// Seed a declared initial value. Builder form of [`Vm::init_tracked`].
    #[must_use]
    pub fn with_tracked(self, key: impl Into<PropertyKey>, value: V) -> Self {
        self.init_tracked(key, value);
        self
    }

    /// Seed a tracked value without going through an observed field.
    pub fn init_tracked(&self, key: impl Into<PropertyKey>, value: V) {
        let previous = self.tracked.borrow_mut().insert(key.into(), value);
        drop(previous);
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Component tag used in diagnostics.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Whether the instance is already queued for re-render.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.set(dirty);
    }

    /// Whether a render pass for this instance is in progress.
    #[must_use]
    pub fn is_rendering(&self) -> bool {
        self.rendering.get()
    }

    pub(crate) fn set_rendering(&self, rendering: bool) {
        self.rendering.set(rendering);
    }

    /// The observer of this record's render pass, once one has run.
    #[must_use]
    pub fn render_observer(&self) -> Option<&ReactiveObserver> {
        self.render_observer.get()
    }

    pub(crate) fn render_observer_or_init(
        &self,
        init: impl FnOnce() -> ReactiveObserver,
    ) -> &ReactiveObserver {
        self.render_observer.get_or_init(init)
    }

    #[must_use]
    pub fn has_tracked(&self, key: &PropertyKey) -> bool {
        self.tracked.borrow().contains_key(key)
    }

    /// Store `value` under `key`, returning the value it replaced.
    ///
    /// The returned value is dropped by the caller, after the storage borrow
    /// has ended.
    pub fn set_tracked_value(&self, key: &PropertyKey, value: V) -> Option<V> {
        self.tracked.borrow_mut().insert(key.clone(), value)
    }

    #[must_use]
    pub fn tracked_len(&self) -> usize {
        self.tracked.borrow().len()
    }
}

impl<V: Clone> Vm<V> {
    /// The stored value of a tracked field, if any.
    #[must_use]
    pub fn tracked_value(&self, key: &PropertyKey) -> Option<V> {
        self.tracked.borrow().get(key).cloned()
    }
}

impl<V: PartialEq> Vm<V> {
    /// Whether `value` equals the stored value under `key`.
    ///
    /// An absent value never equals anything.
    #[must_use]
    pub fn tracked_eq(&self, key: &PropertyKey, value: &V) -> bool {
        self.tracked.borrow().get(key) == Some(value)
    }
}

impl<V> fmt::Display for Vm<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[vm {}#{}]", self.tag, self.id)
    }
}

impl<V> fmt::Debug for Vm<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("tracked", &self.tracked.borrow().len())
            .field("dirty", &self.dirty.get())
            .field("rendering", &self.rendering.get())
            .field("render_observer", &self.render_observer.get().map(ReactiveObserver::id))
            .finish()
    }
}

// ─── Component link ──────────────────────────────────────────────────────────

/// Attach `vm` to `component` through the hidden `"ViewModel"` field.
pub fn link_component_vm<C: Any, V: 'static>(component: &Rc<C>, vm: &Rc<Vm<V>>) {
    VIEW_MODEL.with(|key| set_hidden_field(component, key, Rc::clone(vm)));
    tracing::debug!(vm = %vm, "component linked to vm");
}

/// The VM previously linked to `component`, if any.
#[must_use]
pub fn get_component_vm<C: Any, V: 'static>(component: &Rc<C>) -> Option<Rc<Vm<V>>> {
    VIEW_MODEL.with(|key| get_hidden_field(component, key))
}
