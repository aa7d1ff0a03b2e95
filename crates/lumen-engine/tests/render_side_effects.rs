//! End-to-end tests for render passes: dependency tracking, dirty-flag
//! coalescing, and the diagnostic emitted for writes made while rendering.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use lumen_engine::{
    Engine, ObservedFields, ReactiveObserver, Vm, create_observed_fields_descriptor_map,
    diagnostics_enabled, render_side_effects_total, vm_being_rendered,
};
use tracing::Subscriber;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

struct TodoItem;

fn mounted() -> (Engine, ObservedFields, Rc<TodoItem>, Rc<Vm<String>>) {
    let engine = Engine::new();
    let fields = create_observed_fields_descriptor_map(["title", "status"]);
    let item = Rc::new(TodoItem);
    let vm = engine.mount(
        &item,
        Vm::new("x-todo")
            .with_tracked("title", "write docs".to_string())
            .with_tracked("status", "open".to_string()),
    );
    (engine, fields, item, vm)
}

// ---------------------------------------------------------------------------
// Warning capture
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Captured {
    warnings: Vec<String>,
    fields: Vec<String>,
}

struct WarnCapture {
    state: Arc<Mutex<Captured>>,
}

impl<S: Subscriber> Layer<S> for WarnCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != tracing::Level::WARN {
            return;
        }
        struct Visitor {
            message: Option<String>,
            field: Option<String>,
        }
        impl tracing::field::Visit for Visitor {
            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                match field.name() {
                    "message" => self.message = Some(format!("{value:?}")),
                    "field" => self.field = Some(format!("{value:?}")),
                    _ => {}
                }
            }
        }
        let mut visitor = Visitor {
            message: None,
            field: None,
        };
        event.record(&mut visitor);

        let mut state = self.state.lock().expect("capture lock");
        if let Some(message) = visitor.message {
            state.warnings.push(message);
        }
        if let Some(field) = visitor.field {
            state.fields.push(field);
        }
    }
}

fn capture() -> (Arc<Mutex<Captured>>, tracing::subscriber::DefaultGuard) {
    let state = Arc::new(Mutex::new(Captured::default()));
    let subscriber = tracing_subscriber::registry().with(WarnCapture {
        state: Arc::clone(&state),
    });
    let guard = tracing::subscriber::set_default(subscriber);
    (state, guard)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn write_inside_render_is_reported_and_applied() {
    let (state, _guard) = capture();
    let (engine, fields, item, vm) = mounted();
    let before = render_side_effects_total();

    engine.render(&vm, || {
        assert_eq!(vm_being_rendered().map(|target| target.id), Some(vm.id()));
        engine
            .set(&fields, &item, "status", "done".to_string())
            .expect("set");
    });

    assert_eq!(
        engine.get::<String, _>(&fields, &item, "status"),
        Ok(Some("done".to_string()))
    );

    let captured = state.lock().expect("capture lock");
    if diagnostics_enabled() {
        assert!(render_side_effects_total() > before);
        assert_eq!(captured.warnings.len(), 1, "warnings: {:?}", captured.warnings);
        let message = &captured.warnings[0];
        assert!(message.contains("render() method has side effects"), "{message}");
        assert!(message.contains("x-todo"), "{message}");
        assert_eq!(captured.fields, ["status"]);
    } else {
        assert!(captured.warnings.is_empty());
    }
}

#[test]
fn write_outside_render_is_silent() {
    let (state, _guard) = capture();
    let (engine, fields, item, _vm) = mounted();

    engine
        .set(&fields, &item, "title", "ship it".to_string())
        .expect("set");

    assert!(state.lock().expect("capture lock").warnings.is_empty());
}

#[test]
fn dirty_instance_coalesces_writes() {
    let (engine, fields, item, vm) = mounted();
    let title = engine
        .render(&vm, || engine.get::<String, _>(&fields, &item, "title"))
        .expect("get");
    assert_eq!(title.as_deref(), Some("write docs"));

    // A second consumer of "title" counts the notifications that go out.
    let hits = Rc::new(Cell::new(0u32));
    let hits_clone = Rc::clone(&hits);
    let watcher = ReactiveObserver::new(move || hits_clone.set(hits_clone.get() + 1));
    let _ = engine
        .tracker()
        .observe(&watcher, || engine.get::<String, _>(&fields, &item, "title"));

    engine
        .set(&fields, &item, "title", "first".to_string())
        .expect("set");
    assert!(vm.is_dirty());
    assert_eq!(hits.get(), 1);

    engine
        .set(&fields, &item, "title", "second".to_string())
        .expect("set");
    assert_eq!(hits.get(), 1);
    assert_eq!(
        engine.get::<String, _>(&fields, &item, "title"),
        Ok(Some("second".to_string()))
    );

    // The next render clears the flag, so the following change notifies again.
    let _ = engine.render(&vm, || engine.get::<String, _>(&fields, &item, "title"));
    assert!(!vm.is_dirty());
    engine
        .set(&fields, &item, "title", "third".to_string())
        .expect("set");
    assert_eq!(hits.get(), 2);
    assert!(vm.is_dirty());
}

#[test]
fn instances_do_not_share_state() {
    let engine = Engine::new();
    let fields = create_observed_fields_descriptor_map(["title"]);
    let first = Rc::new(TodoItem);
    let second = Rc::new(TodoItem);
    let first_vm = engine.mount(&first, Vm::new("x-todo").with_tracked("title", "a".to_string()));
    let second_vm = engine.mount(&second, Vm::new("x-todo").with_tracked("title", "b".to_string()));

    let _ = engine.render(&first_vm, || engine.get::<String, _>(&fields, &first, "title"));
    let _ = engine.render(&second_vm, || engine.get::<String, _>(&fields, &second, "title"));

    engine
        .set(&fields, &first, "title", "changed".to_string())
        .expect("set");
    assert!(first_vm.is_dirty());
    assert!(!second_vm.is_dirty());
    assert_eq!(
        engine.get::<String, _>(&fields, &second, "title"),
        Ok(Some("b".to_string()))
    );
}

#[test]
fn warning_names_the_vm_being_rendered() {
    let (state, _guard) = capture();
    let (engine, fields, item, vm) = mounted();
    let child = Rc::new(TodoItem);
    let child_vm = engine.mount(&child, Vm::<String>::new("x-child"));

    engine.render(&vm, || {
        engine.render(&child_vm, || {
            engine
                .set(&fields, &item, "status", "blocked".to_string())
                .expect("set");
        });
    });

    let captured = state.lock().expect("capture lock");
    if diagnostics_enabled() {
        assert_eq!(captured.warnings.len(), 1, "warnings: {:?}", captured.warnings);
        let message = &captured.warnings[0];
        assert!(message.contains(&child_vm.to_string()), "{message}");
        assert!(!message.contains(&vm.to_string()), "{message}");
    } else {
        assert!(captured.warnings.is_empty());
    }
}
