#![forbid(unsafe_code)]

//! Engine: observed fields, view-model records, render passes, and
//! dependency tracking.

pub mod engine;
pub mod error;
pub mod invoker;
pub mod mutation_tracker;
pub mod observed_fields;
pub mod vm;

pub use engine::Engine;
pub use error::{ReactiveError, Result};
pub use invoker::{invoke_component_render, vm_being_rendered};
pub use mutation_tracker::{DependencyTracker, MutationTracker, ReactiveObserver};
pub use observed_fields::{
    ObservedFieldDescriptor, ObservedFields, OwnerResolver, create_observed_fields_descriptor_map,
    diagnostics_enabled, render_side_effects_total,
};
pub use vm::{Vm, get_component_vm, link_component_vm};

pub use lumen_core::{ObjectId, PropertyKey, Symbol};
