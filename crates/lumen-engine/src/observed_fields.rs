#![forbid(unsafe_code)]

//! Observed fields: tracked accessors for component instances.
//!
//! [`create_observed_fields_descriptor_map`] turns a component definition's
//! declared field keys into [`ObservedFieldDescriptor`]s. A descriptor holds no
//! instance; each [`read`](ObservedFieldDescriptor::read) and
//! [`write`](ObservedFieldDescriptor::write) resolves the instance's [`Vm`]
//! through an [`OwnerResolver`] and reports to a [`MutationTracker`].
//!
//! # Invariants
//!
//! 1. Every read reports exactly one `value_observed`, whether or not a
//!    consumer is active.
//! 2. Writing a value equal to the stored one is a no-op: no store, no
//!    notification.
//! 3. Writing a different value stores it unchanged, then reports exactly one
//!    `value_mutated` unless the VM was already dirty.
//! 4. A write during the VM's own render pass is reported as a diagnostic
//!    when [`diagnostics_enabled`] and otherwise proceeds normally.
//!
//! # Failure Modes
//!
//! - **No VM for the instance**: the descriptor was used on an object the
//!   runtime does not manage. [`read`](ObservedFieldDescriptor::read) and
//!   [`write`](ObservedFieldDescriptor::write) panic;
//!   the `try_` forms return [`ReactiveError::InvalidVm`].

use std::any::Any;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use lumen_core::{ObjectId, PropertyKey};

use crate::error::{ReactiveError, Result};
use crate::invoker::vm_being_rendered;
use crate::mutation_tracker::MutationTracker;
use crate::vm::Vm;

/// Resolves the VM that owns a component instance.
pub trait OwnerResolver<V> {
    fn resolve_owner<C: Any>(&self, instance: &Rc<C>) -> Option<Rc<Vm<V>>>;
}

// ─── Diagnostics ─────────────────────────────────────────────────────────────

/// Total number of tracked-field writes made from inside a render pass.
static RENDER_SIDE_EFFECTS_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Read the render side-effect count (for diagnostics/telemetry).
#[must_use]
pub fn render_side_effects_total() -> u64 {
    RENDER_SIDE_EFFECTS_TOTAL.load(Ordering::Relaxed)
}

/// Whether reactivity diagnostics are compiled in.
#[must_use]
pub const fn diagnostics_enabled() -> bool {
    cfg!(any(debug_assertions, feature = "diagnostics"))
}

fn report_render_side_effect<V>(vm: &Vm<V>, key: &PropertyKey) {
    RENDER_SIDE_EFFECTS_TOTAL.fetch_add(1, Ordering::Relaxed);
    let rendering = vm_being_rendered().map_or_else(|| vm.to_string(), |target| target.to_string());
    tracing::warn!(
        vm = %rendering,
        field = %key,
        "{rendering}.render() method has side effects on the state of \"{key}\" field"
    );
}

// ─── Descriptor ──────────────────────────────────────────────────────────────

/// Accessor pair for one observed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedFieldDescriptor {
    key: PropertyKey,
    enumerable: bool,
    configurable: bool,
}

impl ObservedFieldDescriptor {
    /// An enumerable, configurable descriptor for `key`.
    #[must_use]
    pub fn new(key: impl Into<PropertyKey>) -> Self {
        Self {
            key: key.into(),
            enumerable: true,
            configurable: true,
        }
    }

    #[must_use]
    pub fn enumerable(mut self, enumerable: bool) -> Self {
        self.enumerable = enumerable;
        self
    }

    #[must_use]
    pub fn configurable(mut self, configurable: bool) -> Self {
        self.configurable = configurable;
        self
    }

    #[must_use]
    pub fn key(&self) -> &PropertyKey {
        &self.key
    }

    #[must_use]
    pub fn is_enumerable(&self) -> bool {
        self.enumerable
    }

    #[must_use]
    pub fn is_configurable(&self) -> bool {
        self.configurable
    }

    /// Read the field on `instance`, reporting the read to `host`.
    ///
    /// # Panics
    ///
    /// Panics if `host` cannot resolve a VM for `instance`.
    pub fn read<V, C, H>(&self, host: &H, instance: &Rc<C>) -> Option<V>
    where
        V: Clone,
        C: Any,
        H: OwnerResolver<V> + MutationTracker,
    {
        self.try_read(host, instance).unwrap_or_else(|err| panic!("{err}"))
    }

    /// Write the field on `instance`, reporting a change to `host`.
    ///
    /// # Panics
    ///
    /// Panics if `host` cannot resolve a VM for `instance`.
    pub fn write<V, C, H>(&self, host: &H, instance: &Rc<C>, value: V)
    where
        V: PartialEq,
        C: Any,
        H: OwnerResolver<V> + MutationTracker,
    {
        self.try_write(host, instance, value).unwrap_or_else(|err| panic!("{err}"));
    }

    /// Fallible form of [`read`](Self::read).
    pub fn try_read<V, C, H>(&self, host: &H, instance: &Rc<C>) -> Result<Option<V>>
    where
        V: Clone,
        C: Any,
        H: OwnerResolver<V> + MutationTracker,
    {
        let vm = self.resolve(host, instance)?;
        host.value_observed(ObjectId::of(instance), &self.key);
        Ok(vm.tracked_value(&self.key))
    }

    /// Fallible form of [`write`](Self::write).
    pub fn try_write<V, C, H>(&self, host: &H, instance: &Rc<C>, value: V) -> Result<()>
    where
        V: PartialEq,
        C: Any,
        H: OwnerResolver<V> + MutationTracker,
    {
        let vm = self.resolve(host, instance)?;
        if diagnostics_enabled() && vm.is_rendering() {
            report_render_side_effect(&vm, &self.key);
        }

        if vm.tracked_eq(&self.key, &value) {
            return Ok(());
        }
        let previous = vm.set_tracked_value(&self.key, value);
        if !vm.is_dirty() {
            host.value_mutated(ObjectId::of(instance), &self.key);
        }
        drop(previous);
        Ok(())
    }

    fn resolve<V, C, H>(&self, host: &H, instance: &Rc<C>) -> Result<Rc<Vm<V>>>
    where
        C: Any,
        H: OwnerResolver<V>,
    {
        host.resolve_owner(instance)
            .ok_or_else(|| ReactiveError::invalid_vm(ObjectId::of(instance), &self.key))
    }
}

// ─── Descriptor map ──────────────────────────────────────────────────────────

/// The observed-field descriptors of one component definition.
///
/// Built once per definition and shared by all of its instances. Keeps
/// declaration order.
#[derive(Debug, Clone, Default)]
pub struct ObservedFields {
    descriptors: Vec<ObservedFieldDescriptor>,
    index: AHashMap<PropertyKey, usize>,
}

impl ObservedFields {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &PropertyKey) -> Option<&ObservedFieldDescriptor> {
        self.index.get(key).map(|&i| &self.descriptors[i])
    }

    /// Look up a string-named field.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&ObservedFieldDescriptor> {
        self.get(&PropertyKey::from(name))
    }

    #[must_use]
    pub fn contains(&self, key: &PropertyKey) -> bool {
        self.index.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Keys of enumerable fields, in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &PropertyKey> {
        self.descriptors
            .iter()
            .filter(|d| d.enumerable)
            .map(|d| &d.key)
    }

    /// All descriptors, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &ObservedFieldDescriptor> {
        self.descriptors.iter()
    }

    /// Add `descriptor`, or replace the one with the same key.
    ///
    /// Replacing fails with [`ReactiveError::NotConfigurable`] if the existing
    /// descriptor is not configurable. A replaced field keeps its position.
    pub fn define(&mut self, descriptor: ObservedFieldDescriptor) -> Result<()> {
        match self.index.get(&descriptor.key) {
            Some(&i) => {
                let existing = &mut self.descriptors[i];
                if !existing.configurable {
                    return Err(ReactiveError::not_configurable(&existing.key));
                }
                *existing = descriptor;
            }
            None => {
                self.index.insert(descriptor.key.clone(), self.descriptors.len());
                self.descriptors.push(descriptor);
            }
        }
        Ok(())
    }
}

impl<K: Into<PropertyKey>> FromIterator<K> for ObservedFields {
    fn from_iter<I: IntoIterator<Item = K>>(fields: I) -> Self {
        let mut map = Self::new();
        for key in fields {
            let key = key.into();
            if !map.contains(&key) {
                map.index.insert(key.clone(), map.descriptors.len());
                map.descriptors.push(ObservedFieldDescriptor::new(key));
            }
        }
        map
    }
}

/// Build the observed-field descriptors for a component definition.
///
/// A key declared twice yields one descriptor, at its first position.
#[must_use]
pub fn create_observed_fields_descriptor_map<I, K>(fields: I) -> ObservedFields
where
    I: IntoIterator<Item = K>,
    K: Into<PropertyKey>,
{
    fields.into_iter().collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
