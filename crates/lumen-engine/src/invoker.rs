#![forbid(unsafe_code)]

//! Render-pass bookkeeping.
//!
//! [`invoke_component_render`] marks a VM as rendering for the duration of
//! its render body and records it as the VM being rendered on this thread.
//! Both are restored when the body returns or unwinds, so nested renders see
//! their own VM and the outer VM is current again afterwards.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use crate::vm::Vm;

/// Identity of the VM whose render body is executing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTarget {
    pub id: u64,
    pub tag: Arc<str>,
}

impl RenderTarget {
    fn of<V>(vm: &Vm<V>) -> Self {
        Self {
            id: vm.id(),
            tag: Arc::from(vm.tag()),
        }
    }
}

impl fmt::Display for RenderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[vm {}#{}]", self.tag, self.id)
    }
}

thread_local! {
    static VM_BEING_RENDERED: RefCell<Option<RenderTarget>> = const { RefCell::new(None) };
}

/// The VM currently rendering on this thread, if any.
#[must_use]
pub fn vm_being_rendered() -> Option<RenderTarget> {
    VM_BEING_RENDERED.with(|current| current.borrow().clone())
}

/// Run `render` as the render body of `vm`.
pub fn invoke_component_render<V, R>(vm: &Vm<V>, render: impl FnOnce() -> R) -> R {
    let _guard = RenderGuard::enter(vm);
    render()
}

struct RenderGuard<'a, V> {
    vm: &'a Vm<V>,
    was_rendering: bool,
    previous: Option<RenderTarget>,
}

impl<'a, V> RenderGuard<'a, V> {
    fn enter(vm: &'a Vm<V>) -> Self {
        let was_rendering = vm.is_rendering();
        vm.set_rendering(true);
        let previous = VM_BEING_RENDERED
            .with(|current| current.borrow_mut().replace(RenderTarget::of(vm)));
        Self {
            vm,
            was_rendering,
            previous,
        }
    }
}

impl<V> Drop for RenderGuard<'_, V> {
    fn drop(&mut self) {
        self.vm.set_rendering(self.was_rendering);
        let previous = self.previous.take();
        VM_BEING_RENDERED.with(|current| *current.borrow_mut() = previous);
    }
}
