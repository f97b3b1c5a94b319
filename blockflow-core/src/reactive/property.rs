//! Property Implementation
//!
//! A Property is the reactive cell every block is made of. It holds a value
//! and tracks which listeners depend on it.
//!
//! # How Properties Work
//!
//! 1. A property gets its value either directly (`set_value`, `update_value`)
//!    or through a binding to another property (`set_binding`). The two are
//!    mutually exclusive: installing one clears the other.
//!
//! 2. When the value changes, every listener is notified synchronously and the
//!    owning block gets a chance to react (retype, enqueue its function, ...).
//!
//! 3. Function reruns are never executed here. The block only marks itself
//!    dirty in its job's queue, so a burst of writes coalesces into one drain.
//!
//! # Specialization
//!
//! The property's [`PropertyKind`] is derived from its name once, at creation.
//! Engine-reserved `#` names drive block configuration, `@` names are inert
//! metadata and `~` names hold helper blocks.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::graph::{Block, TypeState, WeakBlock};
use crate::value::Value;

use super::binding::Binding;
use super::listener::{CallbackListener, Listener, ListenerId, Subscription};

/// What a property does when its value changes, selected by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// Ordinary data property; may feed the block's function.
    Io,
    /// `@` metadata, never part of execution.
    Attribute,
    /// `~` property holding a helper block.
    Helper,
    /// `#is`: selects the function type.
    Type,
    /// `#mode`: when the function runs.
    Mode,
    /// `#call`: every write requests a run.
    Call,
    /// `#sync`: run inline instead of enqueueing.
    Sync,
    /// `#len`: number of indexed inputs.
    Length,
    /// `#priority`: scheduling priority override.
    Priority,
    /// `#input`: data handed into a block or nested job.
    Input,
    /// `#output`: data handed out of a block or nested job.
    Output,
    /// `#wait`: the block is waiting on external work.
    Wait,
    /// `#cancel`: asks the function to stop.
    Cancel,
    /// Engine-computed, rejects external writes (`#impl`).
    ReadOnly,
    /// Any other `#` name.
    Config,
}

impl PropertyKind {
    /// The fixed name lookup table.
    pub fn classify(name: &str) -> Self {
        match name {
            "#is" => PropertyKind::Type,
            "#mode" => PropertyKind::Mode,
            "#call" => PropertyKind::Call,
            "#sync" => PropertyKind::Sync,
            "#len" => PropertyKind::Length,
            "#priority" => PropertyKind::Priority,
            "#input" => PropertyKind::Input,
            "#output" => PropertyKind::Output,
            "#wait" => PropertyKind::Wait,
            "#cancel" => PropertyKind::Cancel,
            "#impl" => PropertyKind::ReadOnly,
            _ if name.starts_with('#') => PropertyKind::Config,
            _ if name.starts_with('@') => PropertyKind::Attribute,
            _ if name.starts_with('~') => PropertyKind::Helper,
            _ => PropertyKind::Io,
        }
    }

    /// One-shot requests (`#call`, `#cancel`). They act when written and are
    /// never saved.
    pub fn is_trigger(self) -> bool {
        matches!(self, PropertyKind::Call | PropertyKind::Cancel)
    }

    /// Whether a change of this kind is offered to the block's function.
    pub fn feeds_function(self) -> bool {
        matches!(self, PropertyKind::Io | PropertyKind::Input)
    }

    /// Whether an idle property of this kind may be dropped from its block.
    pub(crate) fn is_releasable(self) -> bool {
        matches!(
            self,
            PropertyKind::Io | PropertyKind::Attribute | PropertyKind::Helper | PropertyKind::Config
        )
    }
}

struct BoundPath {
    path: String,
    binding: Binding,
}

#[derive(Default)]
struct PropertyState {
    /// Current resolved value.
    value: Option<Value>,

    /// Literal assigned value, kept for persistence.
    saved: Option<Value>,

    /// Active binding, if the value comes from elsewhere.
    binding: Option<BoundPath>,

    listeners: IndexMap<ListenerId, Rc<dyn Listener>>,

    destroyed: bool,
}

pub(crate) struct PropertyCell {
    id: ListenerId,
    name: String,
    kind: PropertyKind,
    block: WeakBlock,
    me: Weak<PropertyCell>,
    state: RefCell<PropertyState>,
}

/// A named reactive cell on a block.
///
/// `Property` is a cheap handle; clones share the same cell.
#[derive(Clone)]
pub struct Property(Rc<PropertyCell>);

impl Property {
    pub(crate) fn new(block: &Block, name: &str) -> Self {
        Self::build(block.downgrade(), name, false)
    }

    /// A property that belongs to nothing. Reads are absent, writes no-ops.
    pub(crate) fn detached(name: &str) -> Self {
        Self::build(WeakBlock::default(), name, true)
    }

    fn build(block: WeakBlock, name: &str, destroyed: bool) -> Self {
        Self(Rc::new_cyclic(|me| PropertyCell {
            id: ListenerId::new(),
            name: name.to_string(),
            kind: PropertyKind::classify(name),
            block,
            me: me.clone(),
            state: RefCell::new(PropertyState {
                destroyed,
                ..PropertyState::default()
            }),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn kind(&self) -> PropertyKind {
        self.0.kind
    }

    /// The owning block, unless it has been dropped.
    pub fn block(&self) -> Option<Block> {
        self.0.block.upgrade()
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.state.borrow().destroyed
    }

    pub fn ptr_eq(&self, other: &Property) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Current value, or `None` when absent.
    pub fn get(&self) -> Option<Value> {
        self.0.state.borrow().value.clone()
    }

    /// The literal value assigned with `set_value`, if any.
    pub fn saved(&self) -> Option<Value> {
        self.0.state.borrow().saved.clone()
    }

    pub fn binding_path(&self) -> Option<String> {
        self.0
            .state
            .borrow()
            .binding
            .as_ref()
            .map(|bound| bound.path.clone())
    }

    pub fn listener_count(&self) -> usize {
        self.0.state.borrow().listeners.len()
    }

    /// Assign a value. Clears any binding and remembers the value for saving.
    pub fn set_value(&self, value: Option<Value>) {
        if self.rejects_write("set_value") {
            return;
        }
        let old_binding = {
            let mut state = self.0.state.borrow_mut();
            if state.destroyed {
                return;
            }
            state.saved = value.clone();
            state.binding.take()
        };
        if let Some(bound) = old_binding {
            bound.binding.close();
        }
        self.change(value);
        self.release_if_idle();
    }

    /// Write a computed value. Clears any binding; the value is not saved.
    pub fn update_value(&self, value: Option<Value>) {
        if self.rejects_write("update_value") {
            return;
        }
        let old_binding = {
            let mut state = self.0.state.borrow_mut();
            if state.destroyed {
                return;
            }
            state.saved = None;
            state.binding.take()
        };
        if let Some(bound) = old_binding {
            bound.binding.close();
        }
        self.change(value);
        self.release_if_idle();
    }

    /// Bind this property to a path resolved from its block.
    ///
    /// `None` (or an empty path) removes the binding and clears the value.
    /// The source does not have to exist yet; the value stays absent until it
    /// does.
    pub fn set_binding(&self, path: Option<&str>) {
        if self.rejects_write("set_binding") {
            return;
        }
        let path = path.filter(|p| !p.is_empty());
        let old_binding = {
            let mut state = self.0.state.borrow_mut();
            if state.destroyed {
                return;
            }
            if let (Some(bound), Some(path)) = (&state.binding, path) {
                if bound.path == path {
                    return;
                }
            }
            state.saved = None;
            state.binding.take()
        };
        if let Some(bound) = old_binding {
            bound.binding.close();
        }

        let Some(path) = path else {
            self.change(None);
            self.release_if_idle();
            return;
        };
        let Some(block) = self.block() else {
            return;
        };

        // opening pushes the initial (possibly absent) value into this cell
        let target: Weak<dyn Listener> = self.0.me.clone();
        let binding = Binding::open(&block, path, target);

        let mut state = self.0.state.borrow_mut();
        if state.destroyed || state.binding.is_some() {
            drop(state);
            binding.close();
            return;
        }
        state.binding = Some(BoundPath {
            path: path.to_string(),
            binding,
        });
    }

    /// Engine-side write that bypasses the read-only guard.
    pub(crate) fn set_computed(&self, value: Option<Value>) {
        self.change(value);
    }

    /// Drop value, saved value and binding regardless of kind.
    pub(crate) fn clear(&self) {
        let old_binding = {
            let mut state = self.0.state.borrow_mut();
            state.saved = None;
            state.binding.take()
        };
        if let Some(bound) = old_binding {
            bound.binding.close();
        }
        self.change(None);
        self.release_if_idle();
    }

    /// Attach a listener. It is called right away with the current value.
    pub fn listen(&self, listener: Rc<dyn Listener>) {
        let value = {
            let mut state = self.0.state.borrow_mut();
            if !state.destroyed {
                state
                    .listeners
                    .insert(listener.listener_id(), listener.clone());
            }
            state.value.clone()
        };
        listener.on_change(value.as_ref());
    }

    pub fn unlisten(&self, id: ListenerId) {
        let removed = self
            .0
            .state
            .borrow_mut()
            .listeners
            .shift_remove(&id)
            .is_some();
        if removed {
            self.release_if_idle();
        }
    }

    /// Watch this property with a closure until the returned handle drops.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Option<&Value>) + 'static,
    {
        let listener = Rc::new(CallbackListener::new(callback));
        self.listen(listener.clone());
        Subscription::new(self.clone(), listener)
    }

    /// Detach from the block: listeners hear `None`, bindings close and an
    /// owned child block is destroyed.
    pub fn destroy(&self) {
        let (listeners, old_binding, old_value) = {
            let mut state = self.0.state.borrow_mut();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.saved = None;
            (
                std::mem::take(&mut state.listeners),
                state.binding.take(),
                state.value.take(),
            )
        };
        if let Some(bound) = old_binding {
            bound.binding.close();
        }
        for listener in listeners.values() {
            listener.on_change(None);
        }
        if let Some(block) = self.block() {
            block.record_change(&self.0.name, None);
        }
        if let Some(Value::Block(child)) = old_value {
            if child.is_owned_by(&self.0.block, &self.0.name) {
                child.destroy();
            }
        }
    }

    /// Mark a property that was dropped from its block's map.
    pub(crate) fn retire(&self) {
        self.0.state.borrow_mut().destroyed = true;
    }

    /// Value pushed by this property's binding.
    fn apply_bound(&self, value: Option<&Value>) {
        self.change(value.cloned());
    }

    /// Store a new value and propagate it. Returns whether anything changed.
    fn change(&self, value: Option<Value>) -> bool {
        // an unresolved `#is` retries on every write, so late registrations are picked up
        let force = match self.0.kind {
            PropertyKind::Call => true,
            PropertyKind::Type => self.block().is_some_and(|b| b.type_state() == TypeState::Invalid),
            _ => false,
        };
        let old = {
            let mut state = self.0.state.borrow_mut();
            if state.destroyed {
                return false;
            }
            if !force && Value::same_option(state.value.as_ref(), value.as_ref()) {
                return false;
            }
            std::mem::replace(&mut state.value, value.clone())
        };

        self.notify();
        if let Some(block) = self.block() {
            block.property_changed(self, value.as_ref());
        }

        if let Some(Value::Block(child)) = old {
            let replaced = value.as_ref().is_some_and(|v| v.same(&Value::Block(child.clone())));
            if !replaced && child.is_owned_by(&self.0.block, &self.0.name) {
                child.destroy();
            }
        }
        true
    }

    fn notify(&self) {
        let listeners: Vec<(ListenerId, Rc<dyn Listener>)> = self
            .0
            .state
            .borrow()
            .listeners
            .iter()
            .map(|(id, listener)| (*id, listener.clone()))
            .collect();

        for (id, listener) in listeners {
            // an earlier listener may have detached this one, or changed the value
            let current = {
                let state = self.0.state.borrow();
                if !state.listeners.contains_key(&id) {
                    continue;
                }
                state.value.clone()
            };
            listener.on_change(current.as_ref());
        }
    }

    fn is_idle(&self) -> bool {
        let state = self.0.state.borrow();
        !state.destroyed
            && state.listeners.is_empty()
            && state.value.is_none()
            && state.saved.is_none()
            && state.binding.is_none()
            && self.0.kind.is_releasable()
    }

    fn release_if_idle(&self) {
        if !self.is_idle() {
            return;
        }
        if let Some(block) = self.block() {
            block.release_property(self);
        }
    }

    fn rejects_write(&self, op: &'static str) -> bool {
        if self.0.kind == PropertyKind::ReadOnly {
            tracing::debug!(property = %self.0.name, op, "ignored write to read-only property");
            return true;
        }
        false
    }
}

impl Listener for PropertyCell {
    fn listener_id(&self) -> ListenerId {
        self.id
    }

    fn on_change(&self, value: Option<&Value>) {
        if let Some(cell) = self.me.upgrade() {
            Property(cell).apply_bound(value);
        }
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.borrow();
        f.debug_struct("Property")
            .field("name", &self.0.name)
            .field("kind", &self.0.kind)
            .field("value", &state.value)
            .field("binding", &state.binding.as_ref().map(|b| &b.path))
            .field("listener_count", &state.listeners.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
