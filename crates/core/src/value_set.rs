//! Value sets: ordered, read-only collections of coded concepts looked up by oid.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A single coded concept.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Concept {
    pub code: String,
    pub system: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Concept {
    pub fn new(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            system: system.into(),
            version: None,
        }
    }
}

/// An ordered list of concepts identified by a stable oid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueSet {
    oid: String,
    name: Option<String>,
    concepts: Vec<Concept>,
}

impl ValueSet {
    pub fn new(oid: impl Into<String>, name: Option<String>, concepts: Vec<Concept>) -> Self {
        Self {
            oid: oid.into(),
            name,
            concepts,
        }
    }

    pub fn oid(&self) -> &str {
        &self.oid
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn concepts(&self) -> &[Concept] {
        &self.concepts
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    /// Consecutive batches of at most `size` concepts, preserving order.
    pub fn batches(&self, size: usize) -> std::slice::Chunks<'_, Concept> {
        self.concepts.chunks(size.max(1))
    }
}

/// Looks up value sets by oid.
pub trait ValueSetLookup: Send + Sync {
    fn value_set(&self, oid: &str) -> Option<Arc<ValueSet>>;
}

/// In-memory value-set store, filled once at startup.
#[derive(Clone, Debug, Default)]
pub struct ValueSetRegistry {
    sets: HashMap<String, Arc<ValueSet>>,
}

impl ValueSetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value set, returning the one it replaced (if any).
    pub fn insert(&mut self, value_set: ValueSet) -> Option<Arc<ValueSet>> {
        self.sets
            .insert(value_set.oid().to_string(), Arc::new(value_set))
    }

    pub fn contains(&self, oid: &str) -> bool {
        self.sets.contains_key(oid)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn oids(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(String::as_str)
    }
}

impl ValueSetLookup for ValueSetRegistry {
    fn value_set(&self, oid: &str) -> Option<Arc<ValueSet>> {
        self.sets.get(oid).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concepts(n: usize) -> Vec<Concept> {
        (0..n)
            .map(|i| Concept::new("http://loinc.org", format!("code-{i}")))
            .collect()
    }

    #[test]
    fn batches_preserve_order_and_bound_size() {
        let vs = ValueSet::new("1.2.3", None, concepts(65));
        let sizes: Vec<usize> = vs.batches(32).map(<[Concept]>::len).collect();
        assert_eq!(sizes, vec![32, 32, 1]);
        let last = vs.batches(32).last().expect("has batches");
        assert_eq!(last[0].code, "code-64");
    }

    #[test]
    fn empty_value_set_has_no_batches() {
        let vs = ValueSet::new("1.2.3", None, vec![]);
        assert_eq!(vs.batches(32).count(), 0);
    }

    #[test]
    fn registry_looks_up_by_oid() {
        let mut registry = ValueSetRegistry::new();
        assert!(registry
            .insert(ValueSet::new("1.2.3", Some("BP".into()), concepts(2)))
            .is_none());
        let vs = registry.value_set("1.2.3").expect("present");
        assert_eq!(vs.name(), Some("BP"));
        assert!(registry.value_set("9.9.9").is_none());
    }
}
