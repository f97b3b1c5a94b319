//! Blocks
//!
//! A Block is a node in the dataflow tree: an ordered map of named
//! [`Property`] cells, plus an optional function instance selected by `#is`.
//!
//! # Structure
//!
//! ```text
//!   Root job ("")
//!    └── job "flow"
//!         ├── block "add"      #is = "add", 0 = 1, 1 = 2, output = 3
//!         └── block "sub"      ~0 = "##.add.output"
//! ```
//!
//! A child block lives in a property of its parent that has the same name.
//! Overwriting that property (or deleting it) destroys the child.
//!
//! # Lifecycle
//!
//! Destroying a block destroys its function, its properties and, through
//! them, its owned children. A destroyed block reads as absent everywhere and
//! ignores writes.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::config::PRIORITY_LEVELS;
use crate::error::{FlowEvent, FunctionError};
use crate::function::{Behavior, FunctionDesc, DEFAULT_ARITY};
use crate::reactive::{Property, PropertyKind};
use crate::value::Value;

use super::job::{Job, JobContext};
use super::scheduler::Loop;
use super::watch::WatchState;

/// Unique identifier for a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(u64);

impl BlockId {
    /// Generate a new unique block ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for BlockId {
    fn default() -> Self {
        Self::new()
    }
}

/// When a block's function runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockMode {
    /// Use the function's default.
    #[default]
    Auto,
    /// On type resolution and on every input change.
    Always,
    /// Only when the type is resolved.
    OnLoad,
    /// Only when an input changes.
    OnChange,
    /// Only through `#call`.
    OnCall,
    /// Never.
    Disabled,
}

impl BlockMode {
    pub fn runs_on_load(self) -> bool {
        matches!(self, BlockMode::Always | BlockMode::OnLoad)
    }

    pub fn runs_on_change(self) -> bool {
        matches!(self, BlockMode::Always | BlockMode::OnChange)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BlockMode::Auto => "auto",
            BlockMode::Always => "always",
            BlockMode::OnLoad => "onLoad",
            BlockMode::OnChange => "onChange",
            BlockMode::OnCall => "onCall",
            BlockMode::Disabled => "disabled",
        }
    }
}

impl FromStr for BlockMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(BlockMode::Auto),
            "always" => Ok(BlockMode::Always),
            "onLoad" => Ok(BlockMode::OnLoad),
            "onChange" => Ok(BlockMode::OnChange),
            "onCall" => Ok(BlockMode::OnCall),
            "disabled" => Ok(BlockMode::Disabled),
            other => Err(format!("unknown block mode `{other}`")),
        }
    }
}

/// Resolution state of a block's `#is`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeState {
    /// No type assigned.
    Untyped,
    /// The type resolved and a behavior is attached.
    Resolved,
    /// The type name is not registered. Outputs read as absent.
    Invalid,
}

struct FunctionSlot {
    type_name: String,
    state: TypeState,
    desc: Option<Arc<FunctionDesc>>,

    /// `None` while the behavior is out for a call.
    behavior: Option<Box<dyn Behavior>>,

    /// Bumped on every retype, so a behavior returning from a run can tell
    /// it was replaced meanwhile.
    generation: u64,
}

pub(crate) struct BlockData {
    id: BlockId,
    name: String,
    parent: Option<WeakBlock>,

    /// Job whose queue this block runs in. A job points at itself.
    job: WeakBlock,

    context: Rc<JobContext>,

    /// Present only for jobs.
    scheduler: Option<Loop>,

    props: RefCell<IndexMap<String, Property>>,
    function: RefCell<FunctionSlot>,
    mode: Cell<BlockMode>,
    priority_override: Cell<Option<u8>>,
    sync: Cell<bool>,
    waiting: Cell<bool>,
    queued: Cell<bool>,
    running: Cell<bool>,
    destroyed: Cell<bool>,
    watchers: RefCell<Vec<Weak<WatchState>>>,
}

/// A node in the dataflow tree.
///
/// `Block` is a reference-counted handle; clones refer to the same node.
#[derive(Clone)]
pub struct Block(Rc<BlockData>);

/// Non-owning handle to a [`Block`].
#[derive(Clone, Default)]
pub struct WeakBlock(Weak<BlockData>);

impl WeakBlock {
    pub fn upgrade(&self) -> Option<Block> {
        self.0.upgrade().map(Block)
    }

    pub fn ptr_eq(&self, other: &WeakBlock) -> bool {
        Weak::ptr_eq(&self.0, &other.0)
    }

    pub fn ptr_eq_block(&self, block: &Block) -> bool {
        std::ptr::eq(self.0.as_ptr(), Rc::as_ptr(&block.0))
    }
}

impl Block {
    pub(crate) fn build(
        name: &str,
        parent: Option<&Block>,
        job: Option<WeakBlock>,
        context: Rc<JobContext>,
        scheduler: Option<Loop>,
    ) -> Block {
        Block(Rc::new_cyclic(|me: &Weak<BlockData>| BlockData {
            id: BlockId::new(),
            name: name.to_string(),
            parent: parent.map(Block::downgrade),
            job: job.unwrap_or_else(|| WeakBlock(me.clone())),
            context,
            scheduler,
            props: RefCell::new(IndexMap::new()),
            function: RefCell::new(FunctionSlot {
                type_name: String::new(),
                state: TypeState::Untyped,
                desc: None,
                behavior: None,
                generation: 0,
            }),
            mode: Cell::new(BlockMode::Auto),
            priority_override: Cell::new(None),
            sync: Cell::new(false),
            waiting: Cell::new(false),
            queued: Cell::new(false),
            running: Cell::new(false),
            destroyed: Cell::new(false),
            watchers: RefCell::new(Vec::new()),
        }))
    }

    fn new_child(parent: &Block, name: &str) -> Block {
        Block::build(
            name,
            Some(parent),
            Some(parent.0.job.clone()),
            parent.0.context.clone(),
            None,
        )
    }

    // ---- identity ----

    pub fn id(&self) -> BlockId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Dot-separated path from the root. The root itself is `""`.
    pub fn path(&self) -> String {
        let mut names = vec![self.0.name.clone()];
        let mut current = self.parent();
        while let Some(block) = current {
            names.push(block.0.name.clone());
            current = block.parent();
        }
        names.retain(|n| !n.is_empty());
        names.reverse();
        names.join(".")
    }

    pub fn parent(&self) -> Option<Block> {
        self.0.parent.as_ref().and_then(WeakBlock::upgrade)
    }

    /// The parent, or the block itself at the top of the tree.
    pub fn parent_or_self(&self) -> Block {
        self.parent().unwrap_or_else(|| self.clone())
    }

    /// The job this block runs in.
    pub fn job(&self) -> Option<Job> {
        self.0.job.upgrade().map(Job::from_block)
    }

    /// The block of the owning job. A job owns itself.
    pub(crate) fn job_block(&self) -> Option<Block> {
        self.0.job.upgrade()
    }

    pub fn is_job(&self) -> bool {
        self.0.scheduler.is_some()
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.get()
    }

    pub fn ptr_eq(&self, other: &Block) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakBlock {
        WeakBlock(Rc::downgrade(&self.0))
    }

    /// Whether this block is the child stored in `owner`'s property `name`.
    pub(crate) fn is_owned_by(&self, owner: &WeakBlock, name: &str) -> bool {
        self.0.name == name && self.0.parent.as_ref().is_some_and(|p| p.ptr_eq(owner))
    }

    pub(crate) fn context(&self) -> Rc<JobContext> {
        self.0.context.clone()
    }

    pub(crate) fn scheduler(&self) -> Option<&Loop> {
        self.0.scheduler.as_ref()
    }

    pub(crate) fn watchers(&self) -> &RefCell<Vec<Weak<WatchState>>> {
        &self.0.watchers
    }

    // ---- function state ----

    /// The type name from `#is`, empty when untyped.
    pub fn type_name(&self) -> String {
        self.0.function.borrow().type_name.clone()
    }

    pub fn type_state(&self) -> TypeState {
        self.0.function.borrow().state
    }

    pub fn descriptor(&self) -> Option<Arc<FunctionDesc>> {
        self.0.function.borrow().desc.clone()
    }

    /// `#mode` as set on the block, `Auto` by default.
    pub fn mode(&self) -> BlockMode {
        self.0.mode.get()
    }

    /// The mode in force, with `Auto` resolved through the function.
    pub fn effective_mode(&self) -> BlockMode {
        match self.0.mode.get() {
            BlockMode::Auto => match self.descriptor() {
                Some(desc) if desc.mode != BlockMode::Auto => desc.mode,
                _ => BlockMode::Always,
            },
            mode => mode,
        }
    }

    /// Queue level, 0 drains first.
    pub fn priority(&self) -> u8 {
        let priority = match self.0.priority_override.get() {
            Some(priority) => priority,
            None => self
                .descriptor()
                .map(|desc| desc.priority)
                .unwrap_or(self.0.context.config().default_priority),
        };
        priority.min((PRIORITY_LEVELS - 1) as u8)
    }

    pub fn is_sync(&self) -> bool {
        self.0.sync.get()
    }

    pub fn is_waiting(&self) -> bool {
        self.0.waiting.get()
    }

    pub fn is_queued(&self) -> bool {
        self.0.queued.get()
    }

    pub(crate) fn set_queued(&self, queued: bool) {
        self.0.queued.set(queued);
    }

    /// Number of indexed inputs from `#len`.
    pub fn length(&self) -> Option<usize> {
        self.get_value("#len")?
            .as_number()
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map(|n| n as usize)
    }

    fn arity(&self) -> usize {
        self.length().unwrap_or(DEFAULT_ARITY)
    }

    // ---- properties ----

    /// The property `name`, created if needed.
    ///
    /// On a destroyed block this returns a detached property that reads as
    /// absent and ignores writes.
    pub fn get_property(&self, name: &str) -> Property {
        if self.is_destroyed() {
            return Property::detached(name);
        }
        if let Some(prop) = self.0.props.borrow().get(name) {
            return prop.clone();
        }
        let prop = Property::new(self, name);
        self.0
            .props
            .borrow_mut()
            .insert(name.to_string(), prop.clone());
        prop
    }

    /// The property `name` if it exists.
    pub fn find_property(&self, name: &str) -> Option<Property> {
        self.0.props.borrow().get(name).cloned()
    }

    /// Names of all properties, in creation order.
    pub fn property_names(&self) -> Vec<String> {
        self.0.props.borrow().keys().cloned().collect()
    }

    pub(crate) fn properties(&self) -> Vec<Property> {
        self.0.props.borrow().values().cloned().collect()
    }

    pub fn get_value(&self, name: &str) -> Option<Value> {
        self.find_property(name)?.get()
    }

    pub fn set_value(&self, name: &str, value: impl Into<Value>) {
        self.get_property(name).set_value(Some(value.into()));
    }

    /// Remove the value (and any binding) of `name`.
    pub fn delete_value(&self, name: &str) {
        if let Some(prop) = self.find_property(name) {
            prop.set_value(None);
        }
    }

    /// Computed write, see [`Property::update_value`].
    pub fn update_value(&self, name: &str, value: Option<Value>) {
        if value.is_none() {
            if let Some(prop) = self.find_property(name) {
                prop.update_value(None);
            }
            return;
        }
        self.get_property(name).update_value(value);
    }

    pub fn set_binding(&self, name: &str, path: Option<&str>) {
        if path.is_none() {
            if let Some(prop) = self.find_property(name) {
                prop.set_binding(None);
            }
            return;
        }
        self.get_property(name).set_binding(path);
    }

    /// Write the conventional `output` property.
    pub fn output(&self, value: Option<Value>) {
        self.update_value("output", value);
    }

    /// Create (or replace) the child block stored in `name`.
    pub fn create_block(&self, name: &str) -> Block {
        let child = Block::new_child(self, name);
        if self.is_destroyed() {
            child.destroy();
            return child;
        }
        self.get_property(name)
            .set_value(Some(Value::Block(child.clone())));
        child
    }

    /// Create the helper block `~name` and bind `name` to its output.
    ///
    /// An existing helper is reused.
    pub fn create_helper_block(&self, name: &str) -> Block {
        let helper_name = format!("~{name}");
        let helper = match self.get_value(&helper_name) {
            Some(Value::Block(block)) if block.is_owned_by(&self.downgrade(), &helper_name) => block,
            _ => self.create_block(&helper_name),
        };
        self.set_binding(name, Some(&format!("{helper_name}.output")));
        helper
    }

    /// Whether `name` is bound to its helper block's output.
    pub(crate) fn uses_helper(&self, name: &str, binding: &str) -> bool {
        let helper_name = format!("~{name}");
        binding == format!("{helper_name}.output")
            && matches!(
                self.get_value(&helper_name),
                Some(Value::Block(block)) if block.is_owned_by(&self.downgrade(), &helper_name)
            )
    }

    /// Resolve a dot-separated path to a property. With `create`, the last
    /// segment is created on demand.
    pub fn query_property(&self, path: &str, create: bool) -> Option<Property> {
        let (block, last) = self.walk(path)?;
        if block.is_destroyed() {
            return None;
        }
        if create {
            Some(block.get_property(last))
        } else {
            block.find_property(last)
        }
    }

    /// Resolve a dot-separated path to a value.
    pub fn query_value(&self, path: &str) -> Option<Value> {
        let (block, last) = self.walk(path)?;
        block.get_field(last)
    }

    fn walk<'a>(&self, path: &'a str) -> Option<(Block, &'a str)> {
        let (head, last) = match path.rsplit_once('.') {
            Some((head, last)) => (Some(head), last),
            None => (None, path),
        };
        if last.is_empty() {
            return None;
        }
        let block = match head {
            Some(head) => head
                .split('.')
                .try_fold(self.clone(), |block, segment| block.navigate(segment))?,
            None => self.clone(),
        };
        Some((block, last))
    }

    fn navigate(&self, segment: &str) -> Option<Block> {
        match segment {
            "##" => Some(self.parent_or_self()),
            "###" => self.job_block(),
            _ => self
                .get_value(segment)?
                .as_block()
                .filter(|b| !b.is_destroyed())
                .cloned(),
        }
    }

    // ---- typed accessor ----

    /// Read a field. `##` resolves to the parent, `###` to the owning job.
    pub fn get_field(&self, name: &str) -> Option<Value> {
        if self.is_destroyed() {
            return None;
        }
        match name {
            "##" => Some(Value::Block(self.parent_or_self())),
            "###" => self.job_block().map(Value::Block),
            _ => self.get_value(name),
        }
    }

    pub fn set_field(&self, name: &str, value: Option<Value>) {
        if self.is_destroyed() {
            return;
        }
        self.update_value(name, value);
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.get_field(name).is_some()
    }

    /// Data properties that currently hold a value.
    pub fn enumerate_fields(&self) -> Vec<String> {
        if self.is_destroyed() {
            return Vec::new();
        }
        self.0
            .props
            .borrow()
            .iter()
            .filter(|(_, prop)| prop.kind() == PropertyKind::Io && prop.get().is_some())
            .map(|(name, _)| name.clone())
            .collect()
    }

    // ---- reactions ----

    /// Called by a property after its value changed.
    pub(crate) fn property_changed(&self, prop: &Property, value: Option<&Value>) {
        if self.is_destroyed() {
            return;
        }
        match prop.kind() {
            PropertyKind::Type => self.type_changed(value),
            PropertyKind::Mode => self.mode_changed(value),
            PropertyKind::Call => self.call_requested(),
            PropertyKind::Sync => self.0.sync.set(value.is_some_and(Value::is_truthy)),
            PropertyKind::Length => self.length_changed(),
            PropertyKind::Priority => self.priority_changed(value),
            PropertyKind::Wait => self.wait_changed(value),
            PropertyKind::Cancel => self.cancel_changed(value),
            PropertyKind::Io | PropertyKind::Input => self.input_changed(prop.name(), value),
            _ => {}
        }
        self.record_change(prop.name(), value);
    }

    fn type_changed(&self, value: Option<&Value>) {
        let type_name = value.and_then(Value::as_str).unwrap_or("").to_string();
        let (old_behavior, old_desc) = {
            let mut slot = self.0.function.borrow_mut();
            if slot.type_name == type_name && slot.state != TypeState::Invalid {
                return;
            }
            slot.generation += 1;
            slot.type_name = type_name.clone();
            slot.state = TypeState::Untyped;
            (slot.behavior.take(), slot.desc.take())
        };
        if let Some(mut behavior) = old_behavior {
            behavior.destroy(self);
        }
        if let Some(desc) = &old_desc {
            self.clear_outputs(desc);
        }
        if type_name.is_empty() {
            return;
        }

        match self.0.context.registry().instantiate(&type_name) {
            Some((desc, behavior)) => {
                debug!(path = %self.path(), type_name = %type_name, "resolved function");
                {
                    let mut slot = self.0.function.borrow_mut();
                    slot.state = TypeState::Resolved;
                    slot.desc = Some(desc);
                    slot.behavior = Some(behavior);
                }
                if self.effective_mode().runs_on_load() {
                    self.queue_function();
                }
            }
            None => {
                let path = self.path();
                warn!(path = %path, type_name = %type_name, "unknown function type");
                self.0.function.borrow_mut().state = TypeState::Invalid;
                self.0
                    .context
                    .record_event(FlowEvent::UnknownType { path, type_name });
            }
        }
    }

    fn mode_changed(&self, value: Option<&Value>) {
        let mode = value
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        self.0.mode.set(mode);
        if self.effective_mode() == BlockMode::Always {
            self.queue_function();
        }
    }

    fn call_requested(&self) {
        if self.effective_mode() != BlockMode::Disabled {
            self.queue_function();
        }
    }

    fn length_changed(&self) {
        let dynamic = self.descriptor().is_some_and(|desc| desc.dynamic_arity);
        if dynamic && self.effective_mode().runs_on_change() {
            self.queue_function();
        }
    }

    fn priority_changed(&self, value: Option<&Value>) {
        let priority = value
            .and_then(Value::as_number)
            .filter(|n| n.is_finite())
            .map(|n| n.clamp(0.0, (PRIORITY_LEVELS - 1) as f64) as u8);
        self.0.priority_override.set(priority);
    }

    fn wait_changed(&self, value: Option<&Value>) {
        let waiting = value.is_some_and(Value::is_truthy);
        if self.0.waiting.replace(waiting) == waiting {
            return;
        }
        self.with_behavior(|behavior| behavior.on_wait(self, waiting));
    }

    fn cancel_changed(&self, value: Option<&Value>) {
        if value.is_some_and(Value::is_truthy) {
            self.with_behavior(|behavior| behavior.on_cancel(self));
        }
    }

    fn input_changed(&self, name: &str, value: Option<&Value>) {
        let Some(desc) = self.descriptor() else {
            return;
        };
        if !desc.is_input(name, self.arity()) || !self.effective_mode().runs_on_change() {
            return;
        }
        // a running behavior is out of its slot; its next run sees the change
        let wants_run = self
            .with_behavior(|behavior| behavior.input_changed(name, value))
            .unwrap_or(true);
        if wants_run {
            self.queue_function();
        }
    }

    /// Lend the behavior out of its slot for one call.
    fn with_behavior<R>(&self, f: impl FnOnce(&mut dyn Behavior) -> R) -> Option<R> {
        let (mut behavior, generation) = {
            let mut slot = self.0.function.try_borrow_mut().ok()?;
            let behavior = slot.behavior.take()?;
            (behavior, slot.generation)
        };
        let result = f(behavior.as_mut());
        self.restore_behavior(behavior, generation);
        Some(result)
    }

    fn restore_behavior(&self, behavior: Box<dyn Behavior>, generation: u64) {
        let rejected = {
            let mut slot = self.0.function.borrow_mut();
            if !self.is_destroyed() && slot.generation == generation && slot.behavior.is_none() {
                slot.behavior = Some(behavior);
                None
            } else {
                Some(behavior)
            }
        };
        if let Some(mut stale) = rejected {
            stale.destroy(self);
        }
    }

    fn clear_outputs(&self, desc: &FunctionDesc) {
        for name in &desc.outputs {
            if let Some(prop) = self.find_property(name) {
                if prop.saved().is_none() && prop.binding_path().is_none() {
                    prop.update_value(None);
                }
            }
        }
    }

    // ---- execution ----

    /// Ask for the function to run: inline for `#sync` blocks, otherwise
    /// through the job's queue.
    pub(crate) fn queue_function(&self) {
        if self.is_destroyed() || self.type_state() != TypeState::Resolved {
            return;
        }
        if self.0.sync.get() && !self.0.running.get() {
            self.execute();
            return;
        }
        if let Some(job) = self.job() {
            job.queue_block(self);
        }
    }

    /// Run once. Only the scheduler (and `#sync`) call this.
    pub(crate) fn execute(&self) {
        if self.is_destroyed() {
            return;
        }
        if self.is_job() {
            Job::from_block(self.clone()).run();
            return;
        }

        let taken = {
            let mut slot = self.0.function.borrow_mut();
            let generation = slot.generation;
            let type_name = slot.type_name.clone();
            slot.behavior.take().map(|b| (b, generation, type_name))
        };
        let Some((mut behavior, generation, type_name)) = taken else {
            return;
        };

        trace!(path = %self.path(), type_name = %type_name, "run");
        self.0.running.set(true);
        let result = behavior.run(self);
        self.0.running.set(false);
        self.restore_behavior(behavior, generation);

        if let Err(err) = result {
            self.report_failure(&type_name, err);
        }
    }

    fn report_failure(&self, type_name: &str, err: FunctionError) {
        let path = self.path();
        warn!(path = %path, type_name, error = %err, "function failed");
        if let Some(desc) = self.descriptor() {
            self.clear_outputs(&desc);
        }
        self.0.context.record_event(FlowEvent::ExecutionFailed {
            path,
            type_name: type_name.to_string(),
            message: err.to_string(),
        });
    }

    // ---- bookkeeping ----

    /// Drop an idle property from the map.
    pub(crate) fn release_property(&self, prop: &Property) {
        if self.is_destroyed() {
            return;
        }
        let declared = self
            .descriptor()
            .is_some_and(|desc| desc.declares(prop.name(), self.arity()));
        if declared {
            return;
        }
        let removed = {
            let mut props = self.0.props.borrow_mut();
            let is_current = props.get(prop.name()).is_some_and(|p| p.ptr_eq(prop));
            if is_current {
                props.shift_remove(prop.name())
            } else {
                None
            }
        };
        if let Some(removed) = removed {
            removed.retire();
        }
    }

    /// Tell this block's watches that `name` changed.
    pub(crate) fn record_change(&self, name: &str, value: Option<&Value>) {
        let watchers: Vec<Rc<WatchState>> = {
            let mut watchers = self.0.watchers.borrow_mut();
            watchers.retain(|w| w.strong_count() > 0);
            watchers.iter().filter_map(Weak::upgrade).collect()
        };
        if watchers.is_empty() {
            return;
        }
        for watcher in &watchers {
            watcher.record(name, value);
        }
        self.0.context.watch_dirty();
    }

    /// Tear down the block and everything it owns. Idempotent.
    pub fn destroy(&self) {
        if self.0.destroyed.replace(true) {
            return;
        }
        debug!(path = %self.path(), "destroy block");

        let behavior = {
            let mut slot = self.0.function.borrow_mut();
            slot.generation += 1;
            slot.state = TypeState::Untyped;
            slot.desc = None;
            slot.behavior.take()
        };
        if let Some(mut behavior) = behavior {
            behavior.destroy(self);
        }

        let props: Vec<Property> = self
            .0
            .props
            .borrow_mut()
            .drain(..)
            .map(|(_, prop)| prop)
            .collect();
        for prop in props {
            prop.destroy();
        }

        if let Some(scheduler) = &self.0.scheduler {
            scheduler.clear();
        }

        if let Some(parent) = self.parent() {
            if let Some(prop) = parent.find_property(&self.0.name) {
                let holds_me = matches!(prop.get(), Some(Value::Block(ref b)) if b.ptr_eq(self));
                if holds_me {
                    prop.clear();
                }
            }
        }
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.0.id)
            .field("path", &self.path())
            .field("type", &self.0.function.borrow().type_name)
            .field("destroyed", &self.0.destroyed.get())
            .finish()
    }
}

impl fmt::Debug for WeakBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(block) => write!(f, "WeakBlock({:?})", block.path()),
            None => write!(f, "WeakBlock(<dropped>)"),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{math, FunctionRegistry};
    use crate::graph::Root;

    fn root() -> Root {
        let registry = FunctionRegistry::new();
        math::register(&registry);
        Root::new(Arc::new(registry))
    }

    #[test]
    fn block_ids_are_unique() {
        let id1 = BlockId::new();
        let id2 = BlockId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn mode_names_parse() {
        assert_eq!("onLoad".parse::<BlockMode>(), Ok(BlockMode::OnLoad));
        assert_eq!(BlockMode::OnCall.as_str(), "onCall");
        assert!("sometimes".parse::<BlockMode>().is_err());
        assert!(BlockMode::Always.runs_on_load());
        assert!(!BlockMode::OnChange.runs_on_load());
    }

    #[test]
    fn paths_follow_the_tree() {
        let root = root();
        let job = root.add_job("flow");
        let a = job.create_block("a");
        let b = a.create_block("b");
        assert_eq!(root.path(), "");
        assert_eq!(job.path(), "flow");
        assert_eq!(b.path(), "flow.a.b");
        assert!(b.parent().is_some_and(|p| p.ptr_eq(&a)));
        assert!(b.job().is_some_and(|j| j.ptr_eq(&job)));
        assert!(root.parent_or_self().ptr_eq(&root));
    }

    #[test]
    fn unknown_type_is_invalid() {
        let root = root();
        let job = root.add_job("t1");
        let block = job.create_block("x");
        block.set_value("#is", "nope");
        assert_eq!(block.type_state(), TypeState::Invalid);
        assert_eq!(
            root.take_events(),
            vec![FlowEvent::UnknownType {
                path: "t1.x".into(),
                type_name: "nope".into()
            }]
        );

        block.set_value("#is", "add");
        assert_eq!(block.type_state(), TypeState::Resolved);
    }

    #[test]
    fn priority_comes_from_function_and_override() {
        let root = root();
        let job = root.add_job("t2");
        let block = job.create_block("x");
        assert_eq!(block.priority(), 1);
        block.set_value("#is", "add");
        assert_eq!(block.priority(), 0);
        block.set_value("#priority", 7);
        assert_eq!(block.priority(), 3);
        block.delete_value("#priority");
        assert_eq!(block.priority(), 0);
    }

    #[test]
    fn overwriting_child_destroys_it() {
        let root = root();
        let job = root.add_job("t3");
        let child = job.create_block("c");
        child.set_value("v", 1);
        job.set_value("c", 5);
        assert!(child.is_destroyed());
        assert_eq!(child.get_value("v"), None);
        assert_eq!(job.get_value("c"), Some(Value::from(5)));
    }

    #[test]
    fn destroy_detaches_from_parent() {
        let root = root();
        let job = root.add_job("t4");
        let child = job.create_block("c");
        let grandchild = child.create_block("g");
        child.destroy();
        assert!(grandchild.is_destroyed());
        assert_eq!(job.get_value("c"), None);
        // writes after destroy are ignored
        child.set_value("v", 1);
        assert_eq!(child.get_value("v"), None);
        assert!(child.find_property("v").is_none());
    }

    #[test]
    fn query_through_children() {
        let root = root();
        let job = root.add_job("t5");
        let a = job.create_block("a");
        a.set_value("v", 2);
        assert_eq!(job.query_value("a.v"), Some(Value::from(2)));
        assert!(job.query_property("a.v", false).is_some());
        assert!(job.query_property("a.w", false).is_none());
        assert!(job.query_property("a.w", true).is_some());
        assert_eq!(job.query_value("b.v"), None);
        assert!(job.query_value("a.##").is_some_and(|v| v.as_block().is_some_and(|b| b.ptr_eq(&job))));
    }

    #[test]
    fn triple_hash_reaches_owning_job() {
        let root = root();
        let job = root.add_job("t5b");
        job.set_value("v1", 1);
        let b = job.create_block("b");
        let c = b.create_block("c");
        assert_eq!(b.query_value("###.v1"), Some(Value::from(1)));
        assert_eq!(c.query_value("###.v1"), Some(Value::from(1)));
        assert!(c.get_field("###").is_some_and(|v| v.same(&Value::Block(job.block().clone()))));
        assert!(job.get_field("###").is_some_and(|v| v.same(&Value::Block(job.block().clone()))));

        job.delete_value("b");
        assert_eq!(b.get_field("###"), None);
    }

    #[test]
    fn field_view_hides_reserved_names() {
        let root = root();
        let job = root.add_job("t6");
        let b = job.create_block("b");
        b.set_field("v1", Some(Value::from(1)));
        b.set_value("@b-xyw", Value::from(vec![Value::from(1)]));
        b.set_value("#is", "");
        b.create_helper_block("v4");
        b.set_field("v3", Some(Value::from(3)));
        b.set_field("v3", None);

        assert!(b.has_field("v1"));
        assert!(!b.has_field("v3"));
        assert!(b.get_field("###").is_some_and(|v| v.same(&Value::Block(job.block().clone()))));
        assert_eq!(b.enumerate_fields(), vec!["v1".to_string()]);

        b.destroy();
        assert_eq!(b.get_field("v1"), None);
        assert!(b.enumerate_fields().is_empty());
    }

    #[test]
    fn helper_block_feeds_output() {
        let root = root();
        let job = root.add_job("t7");
        let helper = job.create_helper_block("v");
        assert_eq!(job.get_property("v").binding_path().as_deref(), Some("~v.output"));
        helper.set_value("#is", "add");
        helper.set_value("0", 1);
        helper.set_value("1", 1);
        root.run();
        assert_eq!(job.get_value("v"), Some(Value::from(2)));

        // reused, not replaced
        let again = job.create_helper_block("v");
        assert!(again.ptr_eq(&helper));
    }

    #[test]
    fn rewriting_unknown_type_picks_up_late_registration() {
        let registry = Arc::new(FunctionRegistry::new());
        let root = Root::new(registry.clone());
        let job = root.add_job("t8");
        let x = job.create_block("x");
        x.set_value("0", 1);
        x.set_value("1", 1);
        x.set_value("#is", "add");
        assert_eq!(x.type_state(), TypeState::Invalid);

        math::register(&registry);
        x.set_value("#is", "add");
        assert_eq!(x.type_state(), TypeState::Resolved);
        root.run();
        assert_eq!(x.get_value("output"), Some(Value::from(2)));
        assert_eq!(root.take_events().len(), 1);
    }

    // ---- modes and trigger properties ----

    type Log = Arc<parking_lot::Mutex<Vec<String>>>;

    struct Recorder {
        log: Log,
    }

    impl Behavior for Recorder {
        fn run(&mut self, block: &Block) -> Result<(), FunctionError> {
            self.log.lock().push(format!("run {}", block.name()));
            Ok(())
        }

        fn on_wait(&mut self, _block: &Block, waiting: bool) {
            self.log.lock().push(format!("wait {waiting}"));
        }

        fn on_cancel(&mut self, _block: &Block) {
            self.log.lock().push("cancel".to_string());
        }
    }

    fn recording_root(log: &Log) -> Root {
        let registry = FunctionRegistry::new();
        let log = log.clone();
        registry.register(
            "rec",
            FunctionDesc::new().with_inputs(["in"]).with_outputs(["output"]),
            move || Box::new(Recorder { log: log.clone() }),
        );
        Root::new(Arc::new(registry))
    }

    #[test]
    fn on_call_runs_once_per_call() {
        let log = Log::default();
        let root = recording_root(&log);
        let job = root.add_job("m1");
        let b = job.create_block("b");
        b.set_value("#mode", "onCall");
        b.set_value("#is", "rec");
        root.run();
        b.set_value("in", 1);
        root.run();
        assert!(log.lock().is_empty());

        // the same value twice is still two calls
        b.set_value("#call", 1);
        root.run();
        b.set_value("#call", 1);
        root.run();
        assert_eq!(*log.lock(), vec!["run b", "run b"]);
    }

    #[test]
    fn disabled_ignores_calls_and_inputs() {
        let log = Log::default();
        let root = recording_root(&log);
        let job = root.add_job("m2");
        let b = job.create_block("b");
        b.set_value("#is", "rec");
        root.run();
        assert_eq!(*log.lock(), vec!["run b"]);
        log.lock().clear();

        b.set_value("#mode", "disabled");
        assert_eq!(b.effective_mode(), BlockMode::Disabled);
        b.set_value("#call", 1);
        b.set_value("in", 2);
        root.run();
        assert!(log.lock().is_empty());
    }

    #[test]
    fn on_load_and_on_change_modes() {
        let log = Log::default();
        let root = recording_root(&log);
        let job = root.add_job("m3");

        let loaded = job.create_block("loaded");
        loaded.set_value("#mode", "onLoad");
        loaded.set_value("#is", "rec");
        root.run();
        loaded.set_value("in", 1);
        root.run();
        assert_eq!(*log.lock(), vec!["run loaded"]);
        log.lock().clear();

        let changed = job.create_block("changed");
        changed.set_value("#mode", "onChange");
        changed.set_value("#is", "rec");
        root.run();
        assert!(log.lock().is_empty());
        changed.set_value("in", 1);
        root.run();
        assert_eq!(*log.lock(), vec!["run changed"]);
    }

    #[test]
    fn switching_to_always_runs() {
        let log = Log::default();
        let root = recording_root(&log);
        let job = root.add_job("m4");
        let b = job.create_block("b");
        b.set_value("#mode", "onCall");
        b.set_value("#is", "rec");
        root.run();
        assert!(log.lock().is_empty());

        b.set_value("#mode", "always");
        root.run();
        assert_eq!(*log.lock(), vec!["run b"]);
    }

    #[test]
    fn sync_runs_inline() {
        let log = Log::default();
        let root = recording_root(&log);
        let job = root.add_job("m5");
        let b = job.create_block("b");
        b.set_value("#sync", true);
        assert!(b.is_sync());
        b.set_value("#is", "rec");
        assert_eq!(*log.lock(), vec!["run b"]);

        b.set_value("in", 1);
        assert_eq!(log.lock().len(), 2);
        assert_eq!(job.queue_len(), 0);
    }

    #[test]
    fn wait_and_cancel_reach_the_behavior() {
        let log = Log::default();
        let root = recording_root(&log);
        let job = root.add_job("m6");
        let b = job.create_block("b");
        b.set_value("#is", "rec");
        root.run();
        log.lock().clear();

        b.set_value("#wait", true);
        assert!(b.is_waiting());
        b.set_value("#wait", true);
        b.set_value("#wait", false);
        b.set_value("#cancel", true);
        assert!(!b.is_waiting());
        assert_eq!(*log.lock(), vec!["wait true", "wait false", "cancel"]);
    }
}
