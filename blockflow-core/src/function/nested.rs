//! Nested Jobs
//!
//! A nested job is a function whose implementation is itself a flow. The
//! host block gets a child job in its read-only `#impl` property, loaded from
//! a saved definition. The host's `#input` is mirrored into the child's
//! `#input`, and the child's `#output` is copied back to the host.
//!
//! The child is drained synchronously inside the host's run, so from the
//! host job's point of view a nested flow is one atomic step. The child job
//! is created on the first run and reused afterwards.
//!
//! The child job's parent is the host, so blocks of the definition reach the
//! host's other properties through `##.##.name`.

use std::sync::Arc;

use crate::error::FunctionError;
use crate::graph::{Block, BlockMode, Job, Snapshot};
use crate::value::Value;

use super::{Behavior, FunctionDesc, FunctionRegistry};

/// Function backed by a sub-flow definition.
pub struct NestedJob {
    definition: Arc<Snapshot>,
    job: Option<Job>,
}

impl NestedJob {
    pub fn new(definition: Arc<Snapshot>) -> Self {
        Self {
            definition,
            job: None,
        }
    }

    /// Register `definition` as function `type_name`.
    pub fn register(
        registry: &FunctionRegistry,
        type_name: &str,
        definition: Snapshot,
        mode: BlockMode,
        priority: u8,
    ) {
        let desc = FunctionDesc::new()
            .with_inputs(["#input"])
            .with_outputs(["#output"])
            .with_mode(mode)
            .with_priority(priority);
        let definition = Arc::new(definition);
        registry.register(type_name, desc, move || {
            Box::new(NestedJob::new(definition.clone()))
        });
    }

    /// The child job, once the function has run.
    pub fn job(&self) -> Option<&Job> {
        self.job.as_ref()
    }

    fn child(&mut self, host: &Block) -> Job {
        if let Some(job) = self.job.as_ref().filter(|job| !job.is_destroyed()) {
            return job.clone();
        }
        let job = Job::nested(host);
        // the first drain happens in run(), not through the host
        job.mark_queued();
        host.get_property("#impl")
            .set_computed(Some(Value::Block(job.block().clone())));
        job.load(&self.definition);
        self.job = Some(job.clone());
        job
    }
}

impl Behavior for NestedJob {
    fn run(&mut self, host: &Block) -> Result<(), FunctionError> {
        let job = self.child(host);
        job.mark_queued();
        job.update_value("#input", host.get_value("#input"));
        job.run();
        host.update_value("#output", job.get_value("#output"));
        Ok(())
    }

    fn destroy(&mut self, host: &Block) {
        let Some(job) = self.job.take() else {
            return;
        };
        if !host.is_destroyed() {
            if let Some(prop) = host.find_property("#impl") {
                prop.set_computed(None);
            }
        }
        job.destroy();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
