#![forbid(unsafe_code)]

//! The engine: hidden-field owner resolution plus dependency tracking.
//!
//! [`Engine`] is the host that observed-field descriptors normally run
//! against. It resolves a component's VM through the hidden `"ViewModel"`
//! field and forwards reads and writes to its [`DependencyTracker`].
//!
//! [`Engine::render`] ties the pieces together: the render body runs inside
//! the VM's render pass and inside an observer whose callback marks the VM
//! dirty. Once dirty, further writes to the VM's fields are stored without
//! notifying, until the next render clears the flag. Scheduling the re-render
//! itself is left to the embedder.

use std::any::Any;
use std::rc::Rc;

use lumen_core::{ObjectId, PropertyKey};

use crate::error::{ReactiveError, Result};
use crate::invoker::invoke_component_render;
use crate::mutation_tracker::{DependencyTracker, MutationTracker, ReactiveObserver};
use crate::observed_fields::{ObservedFields, OwnerResolver};
use crate::vm::{Vm, get_component_vm, link_component_vm};

#[derive(Debug, Default)]
pub struct Engine {
    tracker: DependencyTracker,
}

impl Engine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn tracker(&self) -> &DependencyTracker {
        &self.tracker
    }

    /// Link `component` to a fresh record and return it.
    pub fn mount<C: Any, V: 'static>(&self, component: &Rc<C>, vm: Vm<V>) -> Rc<Vm<V>> {
        let vm = Rc::new(vm);
        link_component_vm(component, &vm);
        vm
    }

    /// Drop every dependency recorded by the render pass of `vm`.
    pub fn unmount<V>(&self, vm: &Vm<V>) {
        if let Some(observer) = vm.render_observer() {
            self.tracker.reset(observer);
        }
    }

    /// Read a string-named observed field of `instance`.
    pub fn get<V, C>(
        &self,
        fields: &ObservedFields,
        instance: &Rc<C>,
        name: &str,
    ) -> Result<Option<V>>
    where
        V: Clone + 'static,
        C: Any,
    {
        fields
            .by_name(name)
            .ok_or_else(|| ReactiveError::unknown_field(name))?
            .try_read(self, instance)
    }

    /// Write a string-named observed field of `instance`.
    pub fn set<V, C>(
        &self,
        fields: &ObservedFields,
        instance: &Rc<C>,
        name: &str,
        value: V,
    ) -> Result<()>
    where
        V: PartialEq + 'static,
        C: Any,
    {
        fields
            .by_name(name)
            .ok_or_else(|| ReactiveError::unknown_field(name))?
            .try_write(self, instance, value)
    }

    /// Run `render` as the render pass of `vm`.
    ///
    /// Dependencies from the previous pass are dropped first; fields read by
    /// `render` become the new dependencies. The dirty flag is cleared when
    /// the pass completes.
    pub fn render<V: 'static, R>(&self, vm: &Rc<Vm<V>>, render: impl FnOnce() -> R) -> R {
        let observer = Self::observer_for(vm);
        self.tracker.reset(observer);
        let output = invoke_component_render(vm, || self.tracker.observe(observer, render));
        vm.set_dirty(false);
        tracing::trace!(
            vm = %vm,
            dependencies = observer.dependency_count(),
            "render pass complete"
        );
        output
    }

    fn observer_for<V: 'static>(vm: &Rc<Vm<V>>) -> &ReactiveObserver {
        vm.render_observer_or_init(|| {
            let weak = Rc::downgrade(vm);
            ReactiveObserver::new(move || {
                if let Some(vm) = weak.upgrade() {
                    vm.mark_dirty();
                }
            })
        })
    }
}

impl<V: 'static> OwnerResolver<V> for Engine {
    fn resolve_owner<C: Any>(&self, instance: &Rc<C>) -> Option<Rc<Vm<V>>> {
        get_component_vm(instance)
    }
}

impl MutationTracker for Engine {
    fn value_observed(&self, owner: ObjectId, key: &PropertyKey) {
        self.tracker.value_observed(owner, key);
    }

    fn value_mutated(&self, owner: ObjectId, key: &PropertyKey) {
        self.tracker.value_mutated(owner, key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observed_fields::create_observed_fields_descriptor_map;

    struct Counter;

    fn mounted() -> (Engine, ObservedFields, Rc<Counter>, Rc<Vm<i32>>) {
        let engine = Engine::new();
        let fields = create_observed_fields_descriptor_map(["count", "step"]);
        let instance = Rc::new(Counter);
        let vm = engine.mount(
            &instance,
            Vm::new("x-counter").with_tracked("count", 0).with_tracked("step", 1),
        );
        (engine, fields, instance, vm)
    }

    #[test]
    fn get_and_set_by_name() {
        let (engine, fields, instance, _vm) = mounted();
        assert_eq!(engine.get::<i32, _>(&fields, &instance, "count"), Ok(Some(0)));
        engine.set(&fields, &instance, "count", 3).expect("set");
        assert_eq!(engine.get::<i32, _>(&fields, &instance, "count"), Ok(Some(3)));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let (engine, fields, instance, _vm) = mounted();
        assert_eq!(
            engine.get::<i32, _>(&fields, &instance, "missing"),
            Err(ReactiveError::UnknownField {
                field: "missing".into()
            })
        );
    }

    #[test]
    fn unmounted_instance_is_invalid() {
        let engine = Engine::new();
        let fields = create_observed_fields_descriptor_map(["count"]);
        let stranger = Rc::new(Counter);
        let err = engine.set(&fields, &stranger, "count", 1).unwrap_err();
        assert!(matches!(err, ReactiveError::InvalidVm { .. }));
    }

    #[test]
    fn mutation_after_render_marks_dirty() {
        let (engine, fields, instance, vm) = mounted();
        let rendered = engine.render(&vm, || engine.get::<i32, _>(&fields, &instance, "count"));
        assert_eq!(rendered, Ok(Some(0)));
        assert!(!vm.is_dirty());

        engine.set(&fields, &instance, "count", 1).expect("set");
        assert!(vm.is_dirty());
    }

    #[test]
    fn unread_field_does_not_mark_dirty() {
        let (engine, fields, instance, vm) = mounted();
        let _ = engine.render(&vm, || engine.get::<i32, _>(&fields, &instance, "count"));

        engine.set(&fields, &instance, "step", 2).expect("set");
        assert!(!vm.is_dirty());
    }

    #[test]
    fn rerender_replaces_dependencies() {
        let (engine, fields, instance, vm) = mounted();
        let _ = engine.render(&vm, || engine.get::<i32, _>(&fields, &instance, "count"));
        let _ = engine.render(&vm, || engine.get::<i32, _>(&fields, &instance, "step"));

        engine.set(&fields, &instance, "count", 9).expect("set");
        assert!(!vm.is_dirty());
        engine.set(&fields, &instance, "step", 9).expect("set");
        assert!(vm.is_dirty());
    }

    #[test]
    fn dropped_components_release_their_dependencies() {
        let engine = Engine::new();
        let fields = create_observed_fields_descriptor_map(["count"]);
        let count = PropertyKey::from("count");

        for _ in 0..1_000 {
            let instance = Rc::new(Counter);
            let vm = engine.mount(&instance, Vm::new("x-counter").with_tracked("count", 0));
            let _ = engine.render(&vm, || engine.get::<i32, _>(&fields, &instance, "count"));
            let id = ObjectId::of(&instance);
            assert_eq!(engine.tracker().observer_count(id, &count), 1);

            let weak_vm = Rc::downgrade(&vm);
            drop(vm);
            assert!(weak_vm.upgrade().is_none());
            assert_eq!(engine.tracker().observer_count(id, &count), 0);
            drop(instance);
        }

        assert!(
            engine.tracker().reaction_count() <= 2 * crate::mutation_tracker::MIN_SWEEP_THRESHOLD,
            "{:?}",
            engine.tracker()
        );
    }

    #[test]
    fn unmount_drops_dependencies() {
        let (engine, fields, instance, vm) = mounted();
        let _ = engine.render(&vm, || engine.get::<i32, _>(&fields, &instance, "count"));
        engine.unmount(&vm);

        engine.set(&fields, &instance, "count", 4).expect("set");
        assert!(!vm.is_dirty());
        assert_eq!(
            engine
                .tracker()
                .observer_count(ObjectId::of(&instance), &PropertyKey::from("count")),
            0
        );
    }
}
