//! Listener types for the reactive system.
//!
//! A Listener is anything that must hear about a property's value: a binding
//! segment, a bound property, or an external callback.

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::value::Value;

use super::Property;

/// Unique identifier for a listener.
///
/// Properties key their listener sets by this ID, so the same listener can
/// be removed without comparing trait objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique listener ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Receives value notifications from a property.
///
/// `on_change` is called once immediately when the listener is attached and
/// again after every change. `None` means the value is absent, including
/// when the property is destroyed.
pub trait Listener {
    fn listener_id(&self) -> ListenerId;

    fn on_change(&self, value: Option<&Value>);
}

/// A listener backed by a closure.
pub struct CallbackListener {
    id: ListenerId,
    callback: Box<dyn Fn(Option<&Value>)>,
}

impl CallbackListener {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(Option<&Value>) + 'static,
    {
        Self {
            id: ListenerId::new(),
            callback: Box::new(callback),
        }
    }
}

impl Listener for CallbackListener {
    fn listener_id(&self) -> ListenerId {
        self.id
    }

    fn on_change(&self, value: Option<&Value>) {
        (self.callback)(value);
    }
}

/// Handle returned by [`Property::subscribe`].
///
/// Dropping the handle unsubscribes the callback.
pub struct Subscription {
    property: Property,
    listener: Rc<CallbackListener>,
}

impl Subscription {
    pub(crate) fn new(property: Property, listener: Rc<CallbackListener>) -> Self {
        Self { property, listener }
    }

    pub fn property(&self) -> &Property {
        &self.property
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.property.unlisten(self.listener.listener_id());
    }
}
