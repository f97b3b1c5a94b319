//! Integration Tests for the Dataflow Runtime
//!
//! These tests drive whole flows through the public API: loading, binding,
//! scheduling, nesting and persistence working together.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value as Json};

use blockflow_core::error::FunctionError;
use blockflow_core::function::{math, Behavior, FunctionDesc, FunctionRegistry, NestedJob};
use blockflow_core::graph::{Block, BlockMode, ChangeSet, LoopState, ManualFlush, Root, Snapshot, TokioFlush};
use blockflow_core::{RuntimeConfig, Value};

fn object(json: Json) -> Snapshot {
    match json {
        Json::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn math_registry() -> FunctionRegistry {
    let registry = FunctionRegistry::new();
    math::register(&registry);
    registry
}

/// Records the order blocks run in.
struct Probe {
    log: Arc<Mutex<Vec<String>>>,
}

impl Behavior for Probe {
    fn run(&mut self, block: &Block) -> Result<(), FunctionError> {
        self.log.lock().push(block.name().to_string());
        block.output(block.get_value("in"));
        Ok(())
    }
}

fn probe_registry(log: &Arc<Mutex<Vec<String>>>) -> FunctionRegistry {
    let registry = math_registry();
    for priority in 0..4u8 {
        let log = log.clone();
        registry.register(
            &format!("probe{priority}"),
            FunctionDesc::new()
                .with_inputs(["in"])
                .with_outputs(["output"])
                .with_priority(priority)
                .with_mode(BlockMode::OnChange),
            move || Box::new(Probe { log: log.clone() }),
        );
    }
    registry
}

/// Assigned values are visible immediately, without running anything.
#[test]
fn assigned_values_read_back_immediately() {
    let root = Root::new(Arc::new(math_registry()));
    let flow = root.add_job("flow");
    let block = flow.create_block("b");
    block.set_value("x", 42);
    assert_eq!(block.get_value("x"), Some(Value::from(42)));
    assert_eq!(flow.queue_len(), 0);
}

/// add(1, 2) = 3, add(5, 2) = 7, subtract(5, 2) = 3.
#[test]
fn arithmetic_scenario() {
    let root = Root::new(Arc::new(math_registry()));
    let flow = root.add_job("flow");
    flow.load(&object(json!({"add": {"#is": "add", "0": 1, "1": 2}})));
    root.run();
    assert_eq!(flow.query_value("add.output"), Some(Value::from(3)));

    let add = flow.query_value("add").and_then(|v| v.as_block().cloned()).unwrap();
    add.set_value("0", 5);
    root.run();
    assert_eq!(add.get_value("output"), Some(Value::from(7)));

    add.set_value("#is", "subtract");
    root.run();
    assert_eq!(add.get_value("output"), Some(Value::from(3)));
}

/// The same flow converges to the same values whichever side loads first.
#[test]
fn binding_resolution_is_order_independent() {
    let forward = object(json!({
        "a": {"#is": "add", "0": 1, "1": 2},
        "b": {"#is": "add", "~0": "##.a.output", "1": 10}
    }));
    // "z" sorts after "b", so the consumer loads before its source
    let backward = object(json!({
        "z": {"#is": "add", "0": 1, "1": 2},
        "b": {"#is": "add", "~0": "##.z.output", "1": 10}
    }));

    let root = Root::new(Arc::new(math_registry()));
    let first = root.add_job("first");
    let second = root.add_job("second");
    first.load(&forward);
    second.load(&backward);
    root.run();

    assert_eq!(first.query_value("b.output"), Some(Value::from(13)));
    assert_eq!(second.query_value("b.output"), Some(Value::from(13)));
}

/// Saving and loading the save again yields an identical graph.
#[test]
fn load_of_save_is_idempotent() {
    let root = Root::new(Arc::new(math_registry()));
    let flow = root.add_job("flow");
    flow.load(&object(json!({
        "a": {"#is": "add", "0": 1, "1": 2, "@b-xyw": [0, 0, 100]},
        "b": {"#is": "multiply", "~0": "##.a.output", "1": 3, "#len": 2},
        "note": "hello",
        "~mirror": "b.output",
        "h": {"#is": "", "~v": {"#is": "add", "0": 4, "1": 4}}
    })));
    root.run();
    let saved = flow.save();
    let mirror = flow.get_value("mirror");
    assert_eq!(mirror, Some(Value::from(9)));

    flow.load(&saved);
    root.run();
    assert_eq!(flow.save(), saved);
    assert_eq!(flow.get_value("mirror"), mirror);
    assert_eq!(flow.query_value("h.v"), Some(Value::from(8)));

    let other = root.add_job("copy");
    other.load(&saved);
    root.run();
    assert_eq!(other.save(), saved);
    assert_eq!(other.get_value("mirror"), mirror);
}

/// Lower priority numbers run first within one flush; FIFO among equals.
#[test]
fn priority_orders_runs_within_a_flush() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let root = Root::new(Arc::new(probe_registry(&log)));
    let flow = root.add_job("flow");
    flow.load(&object(json!({
        "late": {"#is": "probe3", "~in": "##.src"},
        "mid_a": {"#is": "probe1", "~in": "##.src"},
        "early": {"#is": "probe0", "~in": "##.src"},
        "mid_b": {"#is": "probe1", "~in": "##.src"}
    })));
    root.run();
    log.lock().clear();

    flow.set_value("src", 1);
    root.run();
    let order = log.lock().clone();
    assert_eq!(order.len(), 4);
    assert_eq!(order[0], "early");
    assert_eq!(order[3], "late");
    // equal priorities keep dirty-marking order
    let a = order.iter().position(|n| n == "mid_a");
    let b = order.iter().position(|n| n == "mid_b");
    assert!(matches!((a, b), (Some(a), Some(b)) if a < b));
}

/// Deleting a block unresolves bindings to it; re-creating it heals them.
#[test]
fn delete_and_recreate_heals_bindings() {
    let root = Root::new(Arc::new(math_registry()));
    let flow = root.add_job("flow");
    flow.load(&object(json!({
        "src": {"#is": "add", "0": 1, "1": 1},
        "dst": {"#is": "add", "~0": "##.src.output", "1": 0}
    })));
    root.run();
    assert_eq!(flow.query_value("dst.output"), Some(Value::from(2)));

    let src = flow.query_value("src").and_then(|v| v.as_block().cloned()).unwrap();
    flow.delete_value("src");
    root.run();
    assert!(src.is_destroyed());
    assert_eq!(src.get_value("0"), None);
    assert_eq!(flow.query_value("dst.0"), None);
    assert_eq!(flow.query_value("dst.output"), None);

    flow.live_update(&object(json!({"src": {"#is": "add", "0": 20, "1": 1}})));
    root.run();
    assert_eq!(flow.query_value("dst.output"), Some(Value::from(21)));
}

/// A nested flow converges inside its host and keeps its job across runs.
#[test]
fn nested_job_scenario() {
    let registry = math_registry();
    NestedJob::register(
        &registry,
        "inc",
        object(json!({
            "inner": {"#is": "add", "~0": "##.#input", "1": 1, "@b-p": ["output"]},
            "~#output": "inner.output"
        })),
        BlockMode::Always,
        1,
    );
    let root = Root::new(Arc::new(registry));
    let flow = root.add_job("flow");
    flow.load(&object(json!({"n": {"#is": "inc", "#input": 4}})));
    root.run();

    let n = flow.query_value("n").and_then(|v| v.as_block().cloned()).unwrap();
    assert_eq!(n.get_value("#output"), Some(Value::from(5)));
    let first = n.get_value("#impl");

    n.set_value("#input", 10);
    root.run();
    assert_eq!(n.get_value("#output"), Some(Value::from(11)));
    assert!(Value::same_option(first.as_ref(), n.get_value("#impl").as_ref()));

    // the child job is not part of the saved host
    assert_eq!(Json::Object(n.save()), json!({"#is": "inc", "#input": 10}));
}

/// Unknown types are structural only; setting a known type recovers.
#[test]
fn unknown_type_recovers() {
    let root = Root::new(Arc::new(math_registry()));
    let flow = root.add_job("flow");
    flow.load(&object(json!({"x": {"#is": "missing", "0": 1, "1": 1}})));
    root.run();
    assert_eq!(flow.query_value("x.output"), None);
    assert_eq!(root.take_events().len(), 1);

    flow.query_property("x.#is", false).unwrap().set_value(Some(Value::from("add")));
    root.run();
    assert_eq!(flow.query_value("x.output"), Some(Value::from(2)));
}

/// Watches see one batch per flush with the settled values.
#[test]
fn watch_batches_follow_flushes() {
    let flush = Rc::new(ManualFlush::new());
    let root = Root::init(RuntimeConfig::default(), Arc::new(math_registry()), flush.clone());
    let flow = root.add_job("flow");
    flow.load(&object(json!({"add": {"#is": "add", "0": 1, "1": 2}})));
    flush.run_pending();

    let batches: Rc<RefCell<Vec<ChangeSet>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = batches.clone();
    let _watch = flow
        .watch_path("add", move |changes| sink.borrow_mut().push(changes.clone()))
        .unwrap();
    flush.run_pending();
    batches.borrow_mut().clear();

    let add = flow.query_value("add").and_then(|v| v.as_block().cloned()).unwrap();
    add.set_value("0", 10);
    add.set_value("1", 20);
    assert!(batches.borrow().is_empty());
    flush.run_pending();

    let batches = batches.borrow();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].get("output"), Some(&Some(Value::from(30))));
}

/// With tokio, flushes run on the next tick of the local set.
#[tokio::test]
async fn tokio_flush_runs_on_next_tick() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let root = Root::init(
                RuntimeConfig::default(),
                Arc::new(math_registry()),
                Rc::new(TokioFlush),
            );
            let flow = root.add_job("flow");
            flow.load(&object(json!({"add": {"#is": "add", "0": 2, "1": 3}})));
            assert_eq!(root.state(), LoopState::Queued);
            assert_eq!(flow.query_value("add.output"), None);

            for _ in 0..10 {
                if root.state() == LoopState::Idle {
                    break;
                }
                tokio::task::yield_now().await;
            }
            assert_eq!(root.state(), LoopState::Idle);
            assert_eq!(flow.query_value("add.output"), Some(Value::from(5)));
        })
        .await;
}
