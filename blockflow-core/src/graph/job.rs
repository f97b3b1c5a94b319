//! Jobs and the Root
//!
//! A [`Job`] is a block that owns a run loop. Blocks below a job (down to the
//! next job) queue their function runs in it, and the job drains them.
//!
//! [`Root`] is the top of a graph. It owns the shared [`JobContext`] (function
//! registry, configuration, collected events and watches) and is the only job
//! whose flushes go through the host's [`FlushScheduler`]. There is no global
//! root; create as many independent roots as needed.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::ops::Deref;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, error, trace};

use crate::config::RuntimeConfig;
use crate::error::FlowEvent;
use crate::function::FunctionRegistry;
use crate::value::Value;

use super::block::{Block, WeakBlock};
use super::scheduler::{FlushScheduler, FlushTrigger, Loop, LoopState, ManualFlush};
use super::watch::WatchHub;

/// State shared by every block under one root.
pub(crate) struct JobContext {
    registry: Arc<FunctionRegistry>,
    config: RuntimeConfig,
    root: RefCell<WeakBlock>,
    events: RefCell<VecDeque<FlowEvent>>,
    watches: WatchHub,

    /// Nesting depth of running drains.
    depth: Cell<usize>,
}

impl JobContext {
    fn new(registry: Arc<FunctionRegistry>, config: RuntimeConfig) -> Self {
        Self {
            registry,
            config,
            root: RefCell::new(WeakBlock::default()),
            events: RefCell::new(VecDeque::new()),
            watches: WatchHub::default(),
            depth: Cell::new(0),
        }
    }

    pub(crate) fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub(crate) fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub(crate) fn watches(&self) -> &WatchHub {
        &self.watches
    }

    pub(crate) fn record_event(&self, event: FlowEvent) {
        let capacity = self.config.event_capacity;
        let mut events = self.events.borrow_mut();
        while events.len() >= capacity {
            if events.pop_front().is_none() {
                break;
            }
            debug!(capacity, "event buffer full, dropped oldest");
        }
        if capacity > 0 {
            events.push_back(event);
        }
    }

    fn take_events(&self) -> Vec<FlowEvent> {
        self.events.borrow_mut().drain(..).collect()
    }

    /// A watched property changed. Outside a drain, make sure a flush comes
    /// so the change gets delivered.
    pub(crate) fn watch_dirty(&self) {
        if self.depth.get() > 0 {
            return;
        }
        let root = self.root.borrow().upgrade();
        if let Some(root) = root {
            Job::from_block(root).request_flush();
        }
    }

    fn enter_drain(&self) {
        self.depth.set(self.depth.get() + 1);
    }

    fn exit_drain(&self) {
        let depth = self.depth.get().saturating_sub(1);
        self.depth.set(depth);
        if depth == 0 {
            self.watches.deliver();
        }
    }
}

/// A block with its own run loop.
#[derive(Clone)]
pub struct Job(Block);

impl Job {
    fn create(name: &str, parent: Option<&Block>, context: Rc<JobContext>, trigger: FlushTrigger) -> Job {
        Job(Block::build(name, parent, None, context, Some(Loop::new(trigger))))
    }

    /// The job a nested-job function runs its definition in. It lives in
    /// the host's `#impl` and wakes the host when it has work.
    pub(crate) fn nested(host: &Block) -> Job {
        Job::create(
            "#impl",
            Some(host),
            host.context(),
            FlushTrigger::HostBlock(host.downgrade()),
        )
    }

    /// Wrap a block known to be a job.
    pub(crate) fn from_block(block: Block) -> Job {
        Job(block)
    }

    pub fn block(&self) -> &Block {
        &self.0
    }

    pub fn state(&self) -> LoopState {
        self.0
            .scheduler()
            .map(Loop::state)
            .unwrap_or(LoopState::Idle)
    }

    /// Number of blocks waiting to run.
    pub fn queue_len(&self) -> usize {
        self.0.scheduler().map(Loop::len).unwrap_or(0)
    }

    /// Create a child job stored in property `name`. Its flushes are run by
    /// this job.
    pub fn add_job(&self, name: &str) -> Job {
        let job = Job::create(
            name,
            Some(&self.0),
            self.0.context(),
            FlushTrigger::Parent(self.0.downgrade()),
        );
        if self.0.is_destroyed() {
            job.destroy();
            return job;
        }
        self.0
            .get_property(name)
            .set_value(Some(Value::Block(job.0.clone())));
        job
    }

    /// Drain the queue now, until it is empty.
    ///
    /// A call while this job is already draining returns at once; the
    /// running drain picks up the new work.
    pub fn run(&self) {
        let Some(queue) = self.0.scheduler() else {
            return;
        };
        if queue.state() == LoopState::Running || self.0.is_destroyed() {
            return;
        }
        queue.set_state(LoopState::Running);

        let context = self.0.context();
        context.enter_drain();
        trace!(job = %self.0.path(), queued = queue.len(), "drain start");

        let limit = context.config().iteration_limit;
        let mut iterations = 0usize;
        while let Some(block) = queue.pop() {
            block.execute();
            iterations += 1;
            if let Some(limit) = limit {
                if iterations >= limit && !queue.is_empty() {
                    let path = self.0.path();
                    error!(job = %path, iterations, "drain exceeded iteration limit, discarding queue");
                    queue.clear();
                    context.record_event(FlowEvent::IterationLimit { path, iterations });
                    break;
                }
            }
        }

        queue.set_state(LoopState::Idle);
        trace!(job = %self.0.path(), iterations, "drain done");
        context.exit_drain();
    }

    /// Put `block` in this job's queue.
    pub(crate) fn queue_block(&self, block: &Block) {
        let Some(queue) = self.0.scheduler() else {
            return;
        };
        if block.is_queued() || self.0.is_destroyed() {
            return;
        }
        block.set_queued(true);
        queue.push(block.clone(), block.priority());
        if queue.state() == LoopState::Idle {
            queue.set_state(LoopState::Queued);
            self.trigger_flush(queue);
        }
    }

    /// Ask for a flush even with an empty queue.
    pub(crate) fn request_flush(&self) {
        let Some(queue) = self.0.scheduler() else {
            return;
        };
        if queue.state() == LoopState::Idle {
            queue.set_state(LoopState::Queued);
            self.trigger_flush(queue);
        }
    }

    /// Claim the loop as already flushing, so queueing work does not ask
    /// for another flush. The caller must drain with `run` right after.
    pub(crate) fn mark_queued(&self) {
        if let Some(queue) = self.0.scheduler() {
            if queue.state() == LoopState::Idle {
                queue.set_state(LoopState::Queued);
            }
        }
    }

    fn trigger_flush(&self, queue: &Loop) {
        match queue.trigger() {
            FlushTrigger::Host(scheduler) => {
                let job = self.0.downgrade();
                scheduler.schedule(Box::new(move || {
                    if let Some(block) = job.upgrade() {
                        Job(block).run();
                    }
                }));
            }
            FlushTrigger::Parent(parent) => {
                if let Some(parent) = parent.upgrade() {
                    Job(parent).queue_block(&self.0);
                }
            }
            FlushTrigger::HostBlock(host) => {
                if let Some(host) = host.upgrade() {
                    host.queue_function();
                }
            }
        }
    }
}

impl Deref for Job {
    type Target = Block;

    fn deref(&self) -> &Block {
        &self.0
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("path", &self.0.path())
            .field("state", &self.state())
            .finish()
    }
}

/// Top-level job of a graph.
///
/// Dropping the root destroys the whole graph under it.
pub struct Root {
    job: Job,
}

impl Root {
    /// Create a root whose flushes are run by `scheduler`.
    pub fn init(
        config: RuntimeConfig,
        registry: Arc<FunctionRegistry>,
        scheduler: Rc<dyn FlushScheduler>,
    ) -> Root {
        let context = Rc::new(JobContext::new(registry, config));
        let job = Job::create("", None, context.clone(), FlushTrigger::Host(scheduler));
        *context.root.borrow_mut() = job.downgrade();
        debug!(functions = context.registry().len(), "root initialized");
        Root { job }
    }

    /// A root with default configuration and a private [`ManualFlush`].
    ///
    /// Deferred flushes never run on their own; call [`Root::run`].
    pub fn new(registry: Arc<FunctionRegistry>) -> Root {
        Root::init(RuntimeConfig::default(), registry, Rc::new(ManualFlush::new()))
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Drain synchronously, including jobs waiting in the root queue.
    pub fn run(&self) {
        self.job.run();
    }

    pub fn add_job(&self, name: &str) -> Job {
        self.job.add_job(name)
    }

    pub fn registry(&self) -> Arc<FunctionRegistry> {
        self.job.context().registry.clone()
    }

    pub fn config(&self) -> RuntimeConfig {
        self.job.context().config.clone()
    }

    /// Events recorded since the last call.
    pub fn take_events(&self) -> Vec<FlowEvent> {
        self.job.context().take_events()
    }

    /// Destroy the graph. Same as dropping the root.
    pub fn shutdown(self) {}
}

impl Deref for Root {
    type Target = Job;

    fn deref(&self) -> &Job {
        &self.job
    }
}

impl Drop for Root {
    fn drop(&mut self) {
        debug!("root shutdown");
        self.job.destroy();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
