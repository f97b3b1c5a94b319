//! Block Functions
//!
//! A function is the behavior attached to a block through its `#is`
//! property. Functions are registered by type name in a
//! [`FunctionRegistry`]; each block gets its own [`Behavior`] instance from
//! the registered factory.
//!
//! # Contract
//!
//! - `input_changed` is consulted when one of the block's inputs changes and
//!   decides whether the block should be enqueued.
//! - `run` reads inputs from the block and writes outputs back to it. It is
//!   only ever called by the block's job while draining, or inline for
//!   `#sync` blocks.
//! - `destroy` releases whatever the behavior created. It is called when the
//!   block is retyped or destroyed.

pub mod math;
mod nested;
mod registry;

pub use nested::NestedJob;
pub use registry::{BehaviorFactory, FunctionRegistry};

use crate::error::FunctionError;
use crate::graph::{Block, BlockMode};
use crate::reactive::PropertyKind;
use crate::value::Value;

/// Indexed input count for dynamic-arity functions when `#len` is unset.
pub const DEFAULT_ARITY: usize = 2;

/// Per-block instance of a function.
pub trait Behavior {
    /// Called when input `name` changed. Return `false` to skip the run.
    fn input_changed(&mut self, _name: &str, _value: Option<&Value>) -> bool {
        true
    }

    /// Compute outputs from inputs.
    fn run(&mut self, block: &Block) -> Result<(), FunctionError>;

    /// `#cancel` was set.
    fn on_cancel(&mut self, _block: &Block) {}

    /// `#wait` was toggled.
    fn on_wait(&mut self, _block: &Block, _waiting: bool) {}

    /// The behavior is being detached from `block`.
    fn destroy(&mut self, _block: &Block) {}
}

/// Static description of a function type.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDesc {
    /// Named inputs. Empty means "every data property that is not an output".
    pub inputs: Vec<String>,

    pub outputs: Vec<String>,

    /// Scheduling priority, 0 (first) to 3.
    pub priority: u8,

    /// Mode used when the block's `#mode` is `auto`.
    pub mode: BlockMode,

    /// Inputs are `0..#len` in addition to the named ones.
    pub dynamic_arity: bool,
}

impl Default for FunctionDesc {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            priority: 1,
            mode: BlockMode::Always,
            dynamic_arity: false,
        }
    }
}

impl FunctionDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_mode(mut self, mode: BlockMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_dynamic_arity(mut self) -> Self {
        self.dynamic_arity = true;
        self
    }

    pub fn is_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o == name)
    }

    /// Whether a change to `name` counts as an input change, given the
    /// block's current arity.
    pub fn is_input(&self, name: &str, arity: usize) -> bool {
        if self.is_output(name) {
            return false;
        }
        if self.inputs.iter().any(|i| i == name) || self.is_indexed(name, arity) {
            return true;
        }
        self.inputs.is_empty() && !self.dynamic_arity && PropertyKind::classify(name) == PropertyKind::Io
    }

    /// Whether `name` is one of the function's declared ports.
    pub fn declares(&self, name: &str, arity: usize) -> bool {
        self.is_output(name) || self.inputs.iter().any(|i| i == name) || self.is_indexed(name, arity)
    }

    fn is_indexed(&self, name: &str, arity: usize) -> bool {
        if !self.dynamic_arity {
            return false;
        }
        match name.parse::<usize>() {
            // "01" is not input 1
            Ok(index) => index < arity && index.to_string() == name,
            Err(_) => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
