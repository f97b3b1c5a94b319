//! Blockflow Core
//!
//! This crate provides the runtime for the Blockflow dataflow engine.
//! It implements:
//!
//! - Reactive properties with path-based bindings
//! - A tree of blocks whose functions rerun when their inputs change
//! - A priority-ordered job scheduler that drains dirty blocks to a fixed point
//! - Nested jobs: functions implemented as sub-flows with their own scheduler
//! - Snapshot save/load and batched change watches
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `value`: the dynamic value type held by properties
//! - `reactive`: properties, listeners and bindings
//! - `graph`: blocks, jobs, the run loop, snapshots and watches
//! - `function`: the behavior contract, the registry, nested jobs and the
//!   arithmetic library
//! - `config`, `error`: runtime settings and error/event types
//!
//! The graph is single-threaded (`Rc`/`RefCell`). Only the
//! [`FunctionRegistry`](function::FunctionRegistry) is `Send + Sync`, so one
//! registry can be shared by roots living on different threads.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use blockflow_core::function::{math, FunctionRegistry};
//! use blockflow_core::graph::Root;
//! use blockflow_core::value::Value;
//!
//! let registry = FunctionRegistry::new();
//! math::register(&registry);
//! let root = Root::new(Arc::new(registry));
//!
//! let flow = root.add_job("flow");
//! flow.load_str(r##"{"add": {"#is": "add", "0": 1, "1": 2}}"##).unwrap();
//! root.run();
//! assert_eq!(flow.query_value("add.output"), Some(Value::from(3)));
//!
//! flow.query_property("add.0", false).unwrap().set_value(Some(Value::from(5)));
//! root.run();
//! assert_eq!(flow.query_value("add.output"), Some(Value::from(7)));
//! ```

pub mod config;
pub mod error;
pub mod function;
pub mod graph;
pub mod reactive;
pub mod value;

pub use config::RuntimeConfig;
pub use error::{FlowError, FlowEvent, FunctionError};
pub use function::{Behavior, FunctionDesc, FunctionRegistry, NestedJob};
pub use graph::{Block, BlockMode, Job, Root};
pub use value::Value;
