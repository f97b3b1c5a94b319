//! Function Registry
//!
//! Maps type names to a descriptor and a factory. The registry is the one
//! piece of the runtime that may be shared across threads (for example a
//! registry populated once at startup and handed to several roots), so it
//! sits behind an `RwLock` while the graph itself stays single-threaded.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::debug;

use super::{Behavior, FunctionDesc};

/// Creates a fresh behavior for one block.
pub type BehaviorFactory = Arc<dyn Fn() -> Box<dyn Behavior> + Send + Sync>;

struct Entry {
    desc: Arc<FunctionDesc>,
    factory: BehaviorFactory,
}

/// Type name to function lookup.
#[derive(Default)]
pub struct FunctionRegistry {
    entries: RwLock<IndexMap<String, Entry>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type. Replaces an existing entry with the same name.
    ///
    /// Blocks that already resolved the old entry keep their instance; blocks
    /// resolve again only when their `#is` changes.
    pub fn register<F>(&self, type_name: &str, desc: FunctionDesc, factory: F)
    where
        F: Fn() -> Box<dyn Behavior> + Send + Sync + 'static,
    {
        debug!(type_name, "register function");
        let entry = Entry {
            desc: Arc::new(desc),
            factory: Arc::new(factory),
        };
        self.entries.write().insert(type_name.to_string(), entry);
    }

    pub fn unregister(&self, type_name: &str) -> bool {
        self.entries.write().shift_remove(type_name).is_some()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.read().contains_key(type_name)
    }

    pub fn descriptor(&self, type_name: &str) -> Option<Arc<FunctionDesc>> {
        self.entries
            .read()
            .get(type_name)
            .map(|entry| entry.desc.clone())
    }

    /// Registered names, in registration order.
    pub fn type_names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Build a behavior for `type_name`.
    pub(crate) fn instantiate(&self, type_name: &str) -> Option<(Arc<FunctionDesc>, Box<dyn Behavior>)> {
        // the factory may itself touch the registry, so call it unlocked
        let (desc, factory) = {
            let entries = self.entries.read();
            let entry = entries.get(type_name)?;
            (entry.desc.clone(), entry.factory.clone())
        };
        Some((desc, factory()))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FunctionError;
    use crate::graph::Block;

    struct Noop;

    impl Behavior for Noop {
        fn run(&mut self, _block: &Block) -> Result<(), FunctionError> {
            Ok(())
        }
    }

    #[test]
    fn register_and_lookup() {
        let registry = FunctionRegistry::new();
        assert!(registry.is_empty());

        registry.register("noop", FunctionDesc::new().with_priority(2), || Box::new(Noop));
        assert!(registry.contains("noop"));
        assert_eq!(registry.descriptor("noop").map(|d| d.priority), Some(2));
        assert!(registry.instantiate("noop").is_some());
        assert!(registry.instantiate("missing").is_none());
    }

    #[test]
    fn register_replaces() {
        let registry = FunctionRegistry::new();
        registry.register("f", FunctionDesc::new().with_priority(0), || Box::new(Noop));
        registry.register("f", FunctionDesc::new().with_priority(3), || Box::new(Noop));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.descriptor("f").map(|d| d.priority), Some(3));
    }

    #[test]
    fn unregister_removes() {
        let registry = FunctionRegistry::new();
        registry.register("a", FunctionDesc::new(), || Box::new(Noop));
        registry.register("b", FunctionDesc::new(), || Box::new(Noop));
        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert_eq!(registry.type_names(), vec!["b".to_string()]);
    }
}
