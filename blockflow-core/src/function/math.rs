//! Arithmetic Functions
//!
//! `add` and `multiply` fold the indexed inputs `0..#len` (two by default);
//! `subtract` and `divide` take `0` and `1`. All run at priority 0 and write
//! `output`. An absent or null input makes the output absent.

use crate::error::FunctionError;
use crate::graph::Block;
use crate::value::Value;

use super::{Behavior, FunctionDesc, FunctionRegistry, DEFAULT_ARITY};

/// Register `add`, `subtract`, `multiply` and `divide`.
pub fn register(registry: &FunctionRegistry) {
    let folding = || {
        FunctionDesc::new()
            .with_outputs(["output"])
            .with_priority(0)
            .with_dynamic_arity()
    };
    let binary = || {
        FunctionDesc::new()
            .with_inputs(["0", "1"])
            .with_outputs(["output"])
            .with_priority(0)
    };

    registry.register("add", folding(), || {
        Box::new(Fold { initial: 0.0, op: |a, b| a + b })
    });
    registry.register("multiply", folding(), || {
        Box::new(Fold { initial: 1.0, op: |a, b| a * b })
    });
    registry.register("subtract", binary(), || Box::new(Binary { op: |a, b| a - b }));
    registry.register("divide", binary(), || Box::new(Binary { op: |a, b| a / b }));
}

/// Numeric input, `None` when absent or null.
fn number_input(block: &Block, name: &str) -> Result<Option<f64>, FunctionError> {
    match block.get_value(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_number()
            .map(Some)
            .ok_or_else(|| FunctionError::NotANumber {
                name: name.to_string(),
            }),
    }
}

struct Fold {
    initial: f64,
    op: fn(f64, f64) -> f64,
}

impl Behavior for Fold {
    fn run(&mut self, block: &Block) -> Result<(), FunctionError> {
        let len = block.length().unwrap_or(DEFAULT_ARITY);
        if len == 0 {
            block.output(None);
            return Ok(());
        }
        let mut acc = self.initial;
        for index in 0..len {
            match number_input(block, &index.to_string())? {
                Some(n) => acc = (self.op)(acc, n),
                None => {
                    block.output(None);
                    return Ok(());
                }
            }
        }
        block.output(Some(Value::Number(acc)));
        Ok(())
    }
}

struct Binary {
    op: fn(f64, f64) -> f64,
}

impl Behavior for Binary {
    fn run(&mut self, block: &Block) -> Result<(), FunctionError> {
        let result = match (number_input(block, "0")?, number_input(block, "1")?) {
            (Some(a), Some(b)) => Some(Value::Number((self.op)(a, b))),
            _ => None,
        };
        block.output(result);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
