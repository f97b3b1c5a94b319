//! Change Watches
//!
//! A watch collects the property changes of one block and hands them to a
//! callback in batches. Batches are delivered when the outermost drain of the
//! graph completes, so a watcher never sees a half-propagated graph.
//!
//! Each batch maps a property name to its latest value; `None` means the
//! property was deleted or its block destroyed. A change made outside any
//! drain requests a root flush so it is delivered with the next one.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::value::Value;

use super::block::{Block, WeakBlock};

/// Property name to latest value, in first-change order.
pub type ChangeSet = IndexMap<String, Option<Value>>;

pub(crate) struct WatchState {
    block: WeakBlock,
    pending: RefCell<ChangeSet>,
    callback: Box<dyn Fn(&ChangeSet)>,
}

impl WatchState {
    pub(crate) fn record(&self, name: &str, value: Option<&Value>) {
        self.pending
            .borrow_mut()
            .insert(name.to_string(), value.cloned());
    }

    fn deliver(&self) {
        let changes = std::mem::take(&mut *self.pending.borrow_mut());
        if !changes.is_empty() {
            (self.callback)(&changes);
        }
    }
}

/// Every live watch under one root.
#[derive(Default)]
pub(crate) struct WatchHub {
    watches: RefCell<Vec<Weak<WatchState>>>,
}

impl WatchHub {
    fn register(&self, state: &Rc<WatchState>) {
        let mut watches = self.watches.borrow_mut();
        watches.retain(|w| w.strong_count() > 0);
        watches.push(Rc::downgrade(state));
    }

    /// Hand pending batches to their callbacks.
    pub(crate) fn deliver(&self) {
        let live: Vec<Rc<WatchState>> = {
            let mut watches = self.watches.borrow_mut();
            watches.retain(|w| w.strong_count() > 0);
            watches.iter().filter_map(Weak::upgrade).collect()
        };
        for state in live {
            state.deliver();
        }
    }
}

/// Handle for a block watch. Dropping it stops the watch.
pub struct Watch {
    state: Rc<WatchState>,
}

impl Watch {
    /// The watched block, while it is alive.
    pub fn block(&self) -> Option<Block> {
        self.state.block.upgrade()
    }
}

impl Block {
    /// Watch this block's properties.
    ///
    /// The first batch carries every property that currently has a value.
    pub fn watch<F>(&self, callback: F) -> Watch
    where
        F: Fn(&ChangeSet) + 'static,
    {
        let initial: ChangeSet = self
            .properties()
            .into_iter()
            .filter_map(|prop| {
                let value = prop.get()?;
                Some((prop.name().to_string(), Some(value)))
            })
            .collect();
        let has_initial = !initial.is_empty();

        let state = Rc::new(WatchState {
            block: self.downgrade(),
            pending: RefCell::new(initial),
            callback: Box::new(callback),
        });
        self.watchers().borrow_mut().push(Rc::downgrade(&state));
        let context = self.context();
        context.watches().register(&state);
        if has_initial {
            context.watch_dirty();
        }
        Watch { state }
    }

    /// Watch the block at `path` below this one.
    pub fn watch_path<F>(&self, path: &str, callback: F) -> Option<Watch>
    where
        F: Fn(&ChangeSet) + 'static,
    {
        let block = match self.query_value(path)? {
            Value::Block(block) if !block.is_destroyed() => block,
            _ => return None,
        };
        Some(block.watch(callback))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
