//! Save and Load
//!
//! A snapshot is a JSON object describing a block:
//!
//! ```text
//! {
//!     "#is": "add",              type
//!     "0": 1,                    assigned value
//!     "~1": "##.other.output",   binding
//!     "child": {"#is": "", ...}, owned child block
//!     "~v": {"#is": "add", ...}  helper block, `v` is bound to `~v.output`
//!     "flow": {...},             attached job (no `#is`)
//! }
//! ```
//!
//! Computed values (written by functions), read-only properties and the
//! one-shot `#call`/`#cancel` requests are not saved. Loading reconciles the block in place: existing children keep their
//! identity, properties missing from the snapshot are cleared, and `#is` is
//! applied last so the function starts with its inputs in place.

use std::collections::HashSet;

use serde_json::{Map, Value as Json};
use tracing::debug;

use crate::error::FlowError;
use crate::reactive::{Property, PropertyKind};
use crate::value::Value;

use super::block::Block;

/// Saved form of a block.
pub type Snapshot = Map<String, Json>;

impl Block {
    /// Describe this block as a snapshot.
    pub fn save(&self) -> Snapshot {
        let mut out = Snapshot::new();
        if self.is_destroyed() {
            return out;
        }
        let me = self.downgrade();

        for prop in self.properties() {
            let name = prop.name().to_string();
            if prop.kind() == PropertyKind::ReadOnly || prop.kind().is_trigger() {
                continue;
            }
            if let Some(path) = prop.binding_path() {
                if !self.uses_helper(&name, &path) {
                    out.insert(format!("~{name}"), Json::String(path));
                }
                continue;
            }
            match prop.saved() {
                Some(Value::Block(child)) => {
                    if child.is_owned_by(&me, &name) {
                        out.insert(name, Json::Object(child.save()));
                    }
                }
                Some(value) => {
                    out.insert(name, value.to_json());
                }
                None => {}
            }
        }

        if !self.is_job() && !out.contains_key("#is") && !out.contains_key("~#is") {
            out.insert("#is".to_string(), Json::String(String::new()));
        }
        out
    }

    /// Make this block match `snapshot` exactly.
    pub fn load(&self, snapshot: &Snapshot) {
        self.reconcile(snapshot, false);
    }

    /// Apply `snapshot` on top of the current state. Nothing that the
    /// snapshot does not mention is removed.
    pub fn live_update(&self, snapshot: &Snapshot) {
        self.reconcile(snapshot, true);
    }

    /// [`Block::load`] from a JSON value, which must be an object.
    pub fn load_json(&self, json: &Json) -> Result<(), FlowError> {
        if self.is_destroyed() {
            return Err(FlowError::Destroyed(self.path()));
        }
        match json {
            Json::Object(map) => {
                self.load(map);
                Ok(())
            }
            other => Err(FlowError::InvalidSnapshot(json_kind(other).to_string())),
        }
    }

    /// [`Block::load`] from JSON text.
    pub fn load_str(&self, text: &str) -> Result<(), FlowError> {
        let json: Json = serde_json::from_str(text)?;
        self.load_json(&json)
    }

    fn reconcile(&self, snapshot: &Snapshot, live: bool) {
        if self.is_destroyed() {
            return;
        }
        debug!(path = %self.path(), entries = snapshot.len(), live, "reconcile");

        let mut mentioned: HashSet<&str> = HashSet::new();
        let mut type_entry = None;

        for (key, json) in snapshot {
            match key.as_str() {
                "##" | "###" => continue,
                "#is" => {
                    mentioned.insert(key);
                    type_entry = Some(json);
                    continue;
                }
                _ => {}
            }

            if let Some(name) = key.strip_prefix('~') {
                match json {
                    Json::String(path) => {
                        mentioned.insert(name);
                        self.set_binding(name, Some(path));
                    }
                    Json::Object(inner) => {
                        mentioned.insert(key);
                        mentioned.insert(name);
                        let helper = self.create_helper_block(name);
                        helper.reconcile(inner, live);
                    }
                    other => {
                        debug!(path = %self.path(), key = %key, kind = json_kind(other), "ignored binding entry");
                    }
                }
                continue;
            }

            mentioned.insert(key);
            self.load_entry(key, json, live);
        }

        if !live {
            let stale: Vec<Property> = self
                .properties()
                .into_iter()
                .filter(|prop| {
                    !mentioned.contains(prop.name())
                        && prop.kind() != PropertyKind::ReadOnly
                        && !prop.kind().is_trigger()
                        && (prop.saved().is_some() || prop.binding_path().is_some())
                })
                .collect();
            for prop in stale {
                prop.set_value(None);
            }
        }

        if let Some(json) = type_entry {
            self.get_property("#is")
                .set_value(Some(Value::from_json(json)));
        }
    }

    fn load_entry(&self, key: &str, json: &Json, live: bool) {
        let Json::Object(inner) = json else {
            self.get_property(key).set_value(Some(Value::from_json(json)));
            return;
        };
        let me = self.downgrade();
        let typed = inner.contains_key("#is");
        // jobs save without `#is`; blocks always carry it
        let existing = match self.get_value(key) {
            Some(Value::Block(child)) if child.is_owned_by(&me, key) && child.is_job() != typed => Some(child),
            _ => None,
        };
        match existing {
            Some(child) => child.reconcile(inner, live),
            None if typed => self.create_block(key).reconcile(inner, live),
            None => {
                self.get_property(key)
                    .set_value(Some(Value::from_json(json)));
            }
        }
    }
}

fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
