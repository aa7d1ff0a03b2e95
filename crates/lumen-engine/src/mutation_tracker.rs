#![forbid(unsafe_code)]

//! Dependency tracking between reactive consumers and observed fields.
//!
//! A [`ReactiveObserver`] wraps a callback. While an observer is active (see
//! [`DependencyTracker::observe`]), every [`MutationTracker::value_observed`]
//! report records the `(owner, key)` pair as one of its dependencies. A later
//! [`MutationTracker::value_mutated`] for that pair invokes the callback.
//!
//! # Invariants
//!
//! 1. `value_observed` with no active observer records nothing.
//! 2. An observer is registered at most once per `(owner, key)`.
//! 3. Callbacks run after every internal borrow is released, so a callback
//!    may read or write observed fields.
//! 4. The tracker holds observers weakly; dropping every handle to an
//!    observer unsubscribes it.
//! 5. Registrations whose observers are all gone are removed, on the next
//!    mutation of that field or by a sweep once the table has doubled.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use lumen_core::{ObjectId, PropertyKey};

/// Receiver of field reads and writes.
pub trait MutationTracker {
    /// `key` on `owner` was read by the active consumer, if any.
    fn value_observed(&self, owner: ObjectId, key: &PropertyKey);

    /// `key` on `owner` changed.
    fn value_mutated(&self, owner: ObjectId, key: &PropertyKey);
}

type Dependency = (ObjectId, PropertyKey);

pub(crate) const MIN_SWEEP_THRESHOLD: usize = 64;

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

struct ObserverInner {
    id: u64,
    callback: Box<dyn Fn()>,
    dependencies: RefCell<Vec<Dependency>>,
}

/// A reactive consumer.
///
/// Cloning creates a new handle to the same observer.
#[derive(Clone)]
pub struct ReactiveObserver {
    inner: Rc<ObserverInner>,
}

impl ReactiveObserver {
    /// Create an observer that runs `callback` when a dependency mutates.
    #[must_use]
    pub fn new(callback: impl Fn() + 'static) -> Self {
        Self {
            inner: Rc::new(ObserverInner {
                id: NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed),
                callback: Box::new(callback),
                dependencies: RefCell::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Number of `(owner, key)` pairs this observer depends on.
    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.borrow().len()
    }

    /// Whether this observer depends on `key` of `owner`.
    #[must_use]
    pub fn depends_on(&self, owner: ObjectId, key: &PropertyKey) -> bool {
        self.inner
            .dependencies
            .borrow()
            .iter()
            .any(|(o, k)| *o == owner && k == key)
    }
}

impl std::fmt::Debug for ReactiveObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveObserver")
            .field("id", &self.inner.id)
            .field("dependencies", &self.inner.dependencies.borrow().len())
            .finish()
    }
}

/// Records which observers read which fields, and notifies them on change.
#[derive(Default)]
pub struct DependencyTracker {
    active: RefCell<Vec<Rc<ObserverInner>>>,
    reactions: RefCell<AHashMap<Dependency, Vec<Weak<ObserverInner>>>>,
    /// Registration count that triggers the next sweep.
    sweep_at: Cell<usize>,
}

impl DependencyTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with `observer` as the active consumer.
    pub fn observe<R>(&self, observer: &ReactiveObserver, f: impl FnOnce() -> R) -> R {
        self.active.borrow_mut().push(Rc::clone(&observer.inner));
        let _guard = ActiveGuard {
            active: &self.active,
        };
        f()
    }

    /// Whether a consumer is active.
    #[must_use]
    pub fn is_observing(&self) -> bool {
        !self.active.borrow().is_empty()
    }

    /// Drop every dependency of `observer`.
    pub fn reset(&self, observer: &ReactiveObserver) {
        let dependencies = std::mem::take(&mut *observer.inner.dependencies.borrow_mut());
        let target = Rc::downgrade(&observer.inner);
        let mut reactions = self.reactions.borrow_mut();
        for dependency in dependencies {
            if let Some(list) = reactions.get_mut(&dependency) {
                list.retain(|weak| !weak.ptr_eq(&target) && weak.strong_count() > 0);
                if list.is_empty() {
                    reactions.remove(&dependency);
                }
            }
        }
    }

    /// Number of observers registered on `key` of `owner`.
    #[must_use]
    pub fn observer_count(&self, owner: ObjectId, key: &PropertyKey) -> usize {
        self.reactions
            .borrow()
            .get(&(owner, key.clone()))
            .map_or(0, |list| list.iter().filter(|w| w.strong_count() > 0).count())
    }

    /// Number of `(owner, key)` pairs with registrations, live or not yet swept.
    #[must_use]
    pub fn reaction_count(&self) -> usize {
        self.reactions.borrow().len()
    }

    fn sweep(&self, reactions: &mut AHashMap<Dependency, Vec<Weak<ObserverInner>>>) {
        let before = reactions.len();
        reactions.retain(|_, list| {
            list.retain(|w| w.strong_count() > 0);
            !list.is_empty()
        });
        let live = reactions.len();
        self.sweep_at.set(live * 2);
        tracing::trace!(swept = before - live, live, "dependency tracker sweep");
    }
}

impl MutationTracker for DependencyTracker {
    fn value_observed(&self, owner: ObjectId, key: &PropertyKey) {
        let Some(current) = self.active.borrow().last().cloned() else {
            return;
        };
        let dependency = (owner, key.clone());
        let weak = Rc::downgrade(&current);

        let mut reactions = self.reactions.borrow_mut();
        if !reactions.contains_key(&dependency)
            && reactions.len() >= self.sweep_at.get().max(MIN_SWEEP_THRESHOLD)
        {
            self.sweep(&mut reactions);
        }
        let list = reactions.entry(dependency.clone()).or_default();
        if list.iter().any(|w| w.ptr_eq(&weak)) {
            return;
        }
        list.push(weak);
        current.dependencies.borrow_mut().push(dependency);
    }

    fn value_mutated(&self, owner: ObjectId, key: &PropertyKey) {
        let observers: Vec<Rc<ObserverInner>> = {
            let dependency = (owner, key.clone());
            let mut reactions = self.reactions.borrow_mut();
            let Some(list) = reactions.get_mut(&dependency) else {
                return;
            };
            list.retain(|w| w.strong_count() > 0);
            let observers = list.iter().filter_map(Weak::upgrade).collect();
            if list.is_empty() {
                reactions.remove(&dependency);
            }
            observers
        };
        for observer in observers {
            (observer.callback)();
        }
    }
}

impl std::fmt::Debug for DependencyTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyTracker")
            .field("active", &self.active.borrow().len())
            .field("reactions", &self.reactions.borrow().len())
            .finish()
    }
}

struct ActiveGuard<'a> {
    active: &'a RefCell<Vec<Rc<ObserverInner>>>,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.borrow_mut().pop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
