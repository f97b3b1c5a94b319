//! Path Bindings
//!
//! A binding keeps a property in sync with a dot-separated path resolved from
//! the property's block, e.g. `add.output` or `##.#input`.
//!
//! # Segment Chain
//!
//! The path is split into segments and each segment gets one node. A node is
//! anchored on whatever the previous segment resolved to:
//!
//! ```text
//!   block ──▶ [add] ──▶ [output] ──▶ target property
//!              │           │
//!              ▼           ▼
//!          block.add    add.output
//! ```
//!
//! When the anchor is a live block, the node listens on the named property of
//! that block (created as a placeholder if needed) and forwards its value. When
//! the anchor is anything else, the node forwards `None`. Because every node
//! re-anchors as soon as its upstream changes, a binding heals on its own when
//! an intermediate block is deleted and re-created, and binding to a path that
//! does not exist yet is fine.
//!
//! `##` resolves to the anchor's parent and `###` to the job that owns it.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::graph::{Block, WeakBlock};
use crate::value::Value;

use super::listener::{Listener, ListenerId};
use super::Property;

/// An open binding. Holds its segment chain alive until closed or dropped.
pub(crate) struct Binding {
    nodes: Vec<Rc<SegmentNode>>,
}

impl Binding {
    /// Resolve `path` from `base` and start pushing values into `target`.
    ///
    /// The target always receives an initial value, possibly `None`.
    pub(crate) fn open(base: &Block, path: &str, target: Weak<dyn Listener>) -> Binding {
        let segments: SmallVec<[&str; 4]> = path.split('.').filter(|s| !s.is_empty()).collect();

        if segments.is_empty() {
            if let Some(target) = target.upgrade() {
                target.on_change(None);
            }
            return Binding { nodes: Vec::new() };
        }

        let nodes: Vec<Rc<SegmentNode>> = segments
            .iter()
            .map(|field| SegmentNode::new(field, target.clone()))
            .collect();
        for pair in nodes.windows(2) {
            *pair[0].next.borrow_mut() = Some(Rc::downgrade(&pair[1]));
        }

        tracing::trace!(base = %base.path(), path, "open binding");
        nodes[0].on_anchor(Some(&Value::Block(base.clone())));

        Binding { nodes }
    }

    /// Stop listening everywhere. Safe to call twice.
    pub(crate) fn close(&self) {
        for node in &self.nodes {
            node.close();
        }
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.close();
    }
}

struct SegmentNode {
    id: ListenerId,
    me: Weak<SegmentNode>,
    field: String,

    /// Block the field is currently resolved against.
    anchor: RefCell<Option<WeakBlock>>,

    /// Property currently listened to.
    source: RefCell<Option<Property>>,

    next: RefCell<Option<Weak<SegmentNode>>>,
    target: Weak<dyn Listener>,
    started: Cell<bool>,
    closed: Cell<bool>,
}

impl SegmentNode {
    fn new(field: &str, target: Weak<dyn Listener>) -> Rc<Self> {
        Rc::new_cyclic(|me| SegmentNode {
            id: ListenerId::new(),
            me: me.clone(),
            field: field.to_string(),
            anchor: RefCell::new(None),
            source: RefCell::new(None),
            next: RefCell::new(None),
            target,
            started: Cell::new(false),
            closed: Cell::new(false),
        })
    }

    /// The previous segment resolved to `value`.
    fn on_anchor(&self, value: Option<&Value>) {
        if self.closed.get() {
            return;
        }
        let block = match value {
            Some(Value::Block(block)) if !block.is_destroyed() => Some(block.clone()),
            _ => None,
        };

        let unchanged = match (&*self.anchor.borrow(), &block) {
            (Some(anchor), Some(block)) => anchor.ptr_eq_block(block),
            (None, None) => true,
            _ => false,
        };
        if unchanged && self.started.get() {
            return;
        }
        self.started.set(true);
        *self.anchor.borrow_mut() = block.as_ref().map(Block::downgrade);
        self.detach();

        let Some(block) = block else {
            self.emit(None);
            return;
        };

        match self.field.as_str() {
            "##" => self.emit(Some(&Value::Block(block.parent_or_self()))),
            "###" => match block.job_block() {
                Some(job) => self.emit(Some(&Value::Block(job))),
                None => self.emit(None),
            },
            field => {
                let property = block.get_property(field);
                *self.source.borrow_mut() = Some(property.clone());
                if let Some(me) = self.me.upgrade() {
                    // listen() delivers the current value through on_change
                    property.listen(me);
                }
            }
        }
    }

    fn emit(&self, value: Option<&Value>) {
        if self.closed.get() {
            return;
        }
        let next = self.next.borrow().as_ref().and_then(Weak::upgrade);
        match next {
            Some(next) => next.on_anchor(value),
            None => {
                if let Some(target) = self.target.upgrade() {
                    target.on_change(value);
                }
            }
        }
    }

    fn detach(&self) {
        let source = self.source.borrow_mut().take();
        if let Some(property) = source {
            property.unlisten(self.id);
        }
    }

    fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        self.detach();
    }
}

impl Listener for SegmentNode {
    fn listener_id(&self) -> ListenerId {
        self.id
    }

    fn on_change(&self, value: Option<&Value>) {
        self.emit(value);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::function::FunctionRegistry;
    use crate::graph::Root;
    use crate::value::Value;
    use std::sync::Arc;

    fn root() -> Root {
        Root::new(Arc::new(FunctionRegistry::new()))
    }

    #[test]
    fn binding_before_source_exists() {
        let root = root();
        let job = root.add_job("b1");
        job.set_binding("dst", Some("a.v"));
        assert_eq!(job.get_value("dst"), None);

        let a = job.create_block("a");
        a.set_value("v", 3);
        assert_eq!(job.get_value("dst"), Some(Value::from(3)));
    }

    #[test]
    fn binding_heals_after_recreate() {
        let root = root();
        let job = root.add_job("b2");
        let a = job.create_block("a");
        a.set_value("v", 1);
        job.set_binding("dst", Some("a.v"));
        assert_eq!(job.get_value("dst"), Some(Value::from(1)));

        job.delete_value("a");
        assert!(a.is_destroyed());
        assert_eq!(job.get_value("dst"), None);

        let a2 = job.create_block("a");
        a2.set_value("v", 2);
        assert_eq!(job.get_value("dst"), Some(Value::from(2)));
    }

    #[test]
    fn parent_and_job_segments() {
        let root = root();
        let job = root.add_job("b3");
        job.set_value("top", "t");
        job.set_value("v1", 1);
        let child = job.create_block("child");
        let grandchild = child.create_block("g");
        child.set_value("own", "o");

        grandchild.set_binding("up", Some("##.own"));
        grandchild.set_binding("from_job", Some("###.v1"));
        child.set_binding("top", Some("##.top"));
        assert_eq!(grandchild.get_value("up"), Some(Value::from("o")));
        assert_eq!(grandchild.get_value("from_job"), Some(Value::from(1)));
        assert_eq!(child.get_value("top"), Some(Value::from("t")));

        job.set_value("v1", 2);
        assert_eq!(grandchild.get_value("from_job"), Some(Value::from(2)));
    }

    #[test]
    fn closed_binding_releases_placeholders() {
        let root = root();
        let job = root.add_job("b4");
        job.set_binding("dst", Some("ghost"));
        assert!(job.find_property("ghost").is_some());

        job.set_binding("dst", None);
        assert!(job.find_property("ghost").is_none());
    }

    #[test]
    fn non_block_intermediate_resolves_absent() {
        let root = root();
        let job = root.add_job("b5");
        job.set_value("a", 5);
        job.set_binding("dst", Some("a.v"));
        assert_eq!(job.get_value("dst"), None);
    }
}
