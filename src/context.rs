//! The shared key-value store threaded through a single task/workflow execution.

use indexmap::IndexMap;
use serde_json::Value;

/// An insertion-ordered string-keyed map of arbitrary JSON values.
///
/// A `Context` is owned exclusively by the run that created it. Sequential
/// pipelines thread the same `Context` through every task; parallel groups
/// clone it once per branch so sibling mutations never leak into each other
/// or back into the parent (see [`crate::workflow::Strategy::Parallel`]).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    data: IndexMap<String, Value>,
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: IndexMap::new(),
        }
    }

    /// Build a `Context` from a JSON object, preserving key order. A
    /// non-object value is stored under no keys (an empty context).
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        let mut data = IndexMap::new();
        if let Value::Object(map) = value {
            for (k, v) in map {
                data.insert(k, v);
            }
        }
        Self { data }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    pub fn delete(&mut self, key: &str) -> Option<Value> {
        self.data.shift_remove(key)
    }

    #[must_use]
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    #[must_use]
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.data.values()
    }

    #[must_use]
    pub fn entries(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.data.iter()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Merge `other`'s entries into `self`, overwriting existing keys.
    /// `Value::Null` is a legal stored value and is not treated specially;
    /// a key simply absent from `other` is left untouched in `self`.
    pub fn merge(&mut self, other: &Context) {
        for (k, v) in &other.data {
            self.data.insert(k.clone(), v.clone());
        }
    }

    /// A shallow copy: independent top-level map, values cloned by `serde_json`'s
    /// ordinary value semantics (there is no shared mutable interior state to
    /// alias, unlike the proxy-backed contexts this type is modeled on).
    #[must_use]
    pub fn shallow_clone(&self) -> Self {
        self.clone()
    }

    /// A deep copy. Because [`Value`] owns all of its data outright, this is
    /// equivalent to [`Context::shallow_clone`]; both are provided so callers
    /// written against the abstract contract compile unchanged.
    #[must_use]
    pub fn deep_clone(&self) -> Self {
        self.clone()
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

impl From<Value> for Context {
    fn from(value: Value) -> Self {
        Context::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_set_has_delete_roundtrip() {
        let mut ctx = Context::new();
        assert!(!ctx.has("a"));
        ctx.set("a", json!(1));
        assert!(ctx.has("a"));
        assert_eq!(ctx.get("a"), Some(&json!(1)));
        assert_eq!(ctx.delete("a"), Some(json!(1)));
        assert!(!ctx.has("a"));
    }

    #[test]
    fn from_value_preserves_insertion_order() {
        let ctx = Context::from_value(json!({"z": 1, "a": 2, "m": 3}));
        let keys: Vec<&str> = ctx.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn merge_overwrites_and_adds() {
        let mut base = Context::from_value(json!({"a": 1, "b": 2}));
        let patch = Context::from_value(json!({"b": 20, "c": 3}));
        base.merge(&patch);
        assert_eq!(base.get("a"), Some(&json!(1)));
        assert_eq!(base.get("b"), Some(&json!(20)));
        assert_eq!(base.get("c"), Some(&json!(3)));
    }

    #[test]
    fn clones_are_isolated_from_the_original() {
        let original = Context::from_value(json!({"a": 1}));
        let mut cloned = original.deep_clone();
        cloned.set("a", json!(999));
        assert_eq!(original.get("a"), Some(&json!(1)));
        assert_eq!(cloned.get("a"), Some(&json!(999)));
    }

    #[test]
    fn to_value_roundtrips_through_from_value() {
        let ctx = Context::from_value(json!({"x": "y", "n": 1}));
        let value = ctx.to_value();
        let back = Context::from_value(value);
        assert_eq!(ctx, back);
    }
}
