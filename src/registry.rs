//! Process-wide registries: coercions, custom validators, global
//! middleware and global lifecycle callbacks, assembled once via
//! [`crate::config::configure`] and shared by every task that runs
//! through a given [`crate::task::TaskEngine`].

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::callback::{CallbackSet, CallbackType};
use crate::middleware::Middleware;

pub type Coercion = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;
pub type Validator = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Named type-coercion functions, tried in the order a task's attribute
/// declares them.
#[derive(Clone)]
pub struct CoercionRegistry {
    entries: IndexMap<String, Coercion>,
}

impl CoercionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// `string`, `integer`, `float` and `boolean`, the coercions every
    /// task schema can rely on without registering its own.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("string", Arc::new(|v: &Value| match v {
            Value::String(_) => Some(v.clone()),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        }));
        registry.register("integer", Arc::new(|v: &Value| match v {
            Value::Number(n) => n.as_i64().map(|i| Value::from(i)),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        }));
        registry.register("float", Arc::new(|v: &Value| match v {
            Value::Number(n) => n.as_f64().map(Value::from),
            Value::String(s) => s.trim().parse::<f64>().ok().map(Value::from),
            _ => None,
        }));
        registry.register("boolean", Arc::new(|v: &Value| match v {
            Value::Bool(_) => Some(v.clone()),
            Value::String(s) => match s.to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(Value::Bool(true)),
                "false" | "0" | "no" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        }));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, coercion: Coercion) {
        self.entries.insert(name.into(), coercion);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Coercion> {
        self.entries.get(name)
    }
}

impl Default for CoercionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Named predicates usable from an attribute's validation block beyond
/// the built-in presence/format/length/inclusion checks.
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    entries: IndexMap<String, Validator>,
}

impl ValidatorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, validator: Validator) {
        self.entries.insert(name.into(), validator);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Validator> {
        self.entries.get(name)
    }
}

/// Global middlewares, applied outermost before any task-declared
/// middleware.
#[derive(Default)]
pub struct MiddlewareRegistry {
    entries: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, middleware: Arc<dyn Middleware>) {
        self.entries.push(middleware);
    }

    #[must_use]
    pub fn all(&self) -> Vec<Arc<dyn Middleware>> {
        self.entries.clone()
    }
}

/// Global lifecycle callbacks, run before any task-declared callback of
/// the same [`CallbackType`] (see `§4.4` step 9 of the design notes).
#[derive(Default)]
pub struct CallbackRegistry {
    by_type: IndexMap<u8, CallbackSet>,
}

fn type_key(t: CallbackType) -> u8 {
    t as u8
}

impl CallbackRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, callback_type: CallbackType, callback: Arc<dyn crate::callback::Callback>) {
        self.by_type
            .entry(type_key(callback_type))
            .or_insert_with(CallbackSet::new)
            .push(callback);
    }

    #[must_use]
    pub fn for_type(&self, callback_type: CallbackType) -> Option<&CallbackSet> {
        self.by_type.get(&type_key(callback_type))
    }
}

/// Bundles every process-wide registry a [`crate::task::TaskEngine`]
/// consults. Built once at process start (see [`crate::config::configure`])
/// and shared via `Arc` with every engine instance.
#[derive(Default)]
pub struct GlobalRegistries {
    pub coercions: CoercionRegistry,
    pub validators: ValidatorRegistry,
    pub middleware: MiddlewareRegistry,
    pub callbacks: CallbackRegistry,
}

impl GlobalRegistries {
    #[must_use]
    pub fn new() -> Self {
        Self {
            coercions: CoercionRegistry::with_builtins(),
            validators: ValidatorRegistry::new(),
            middleware: MiddlewareRegistry::new(),
            callbacks: CallbackRegistry::new(),
        }
    }
}
