//! Reactive Primitives
//!
//! This module implements the reactive layer the dataflow graph is built on:
//! properties, listeners and path bindings.
//!
//! # Concepts
//!
//! ## Properties
//!
//! A Property is a named cell on a block. It holds an optional value, remembers
//! the literal value it was assigned (for saving), and notifies its listeners
//! synchronously whenever the value changes.
//!
//! ## Listeners
//!
//! A Listener is anything that wants to hear about a property's value. Bound
//! properties, binding segments and external subscriptions are all listeners.
//! A listener is called once when attached, then after every change.
//!
//! ## Bindings
//!
//! A Binding makes one property mirror another, addressed by a path relative
//! to the bound property's block. Bindings resolve lazily: a path that names
//! nothing yet resolves to absent and starts delivering as soon as the source
//! appears.
//!
//! # Implementation Notes
//!
//! Everything here is single-threaded (`Rc`/`RefCell`). No borrow is held
//! while a listener runs, so listeners are free to write to other properties,
//! or to the one that notified them.

mod binding;
mod listener;
mod property;

pub use listener::{CallbackListener, Listener, ListenerId, Subscription};
pub use property::{Property, PropertyKind};
