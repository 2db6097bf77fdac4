//! Declarative attribute definitions: binding, coercion and validation.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use snafu::prelude::*;

use crate::context::Context;
use crate::registry::{CoercionRegistry, ValidatorRegistry};

pub type Guard = Arc<dyn Fn(&Context) -> bool + Send + Sync>;
pub type SourceFn = Arc<dyn Fn(&Context) -> Option<Value> + Send + Sync>;
pub type DefaultFn = Arc<dyn Fn(&Context) -> Value + Send + Sync>;

/// Either a literal default value or a factory evaluated against the
/// context at binding time.
#[derive(Clone)]
pub enum DefaultValue {
    Value(Value),
    Factory(DefaultFn),
}

impl DefaultValue {
    fn resolve(&self, ctx: &Context) -> Value {
        match self {
            DefaultValue::Value(v) => v.clone(),
            DefaultValue::Factory(f) => f(ctx),
        }
    }
}

/// Inclusion/exclusion/length/format validators applied after coercion.
#[derive(Clone, Default)]
pub struct Validation {
    pub presence: bool,
    pub absence: bool,
    pub format: Option<Arc<regex::Regex>>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub numeric: bool,
    pub inclusion: Option<Vec<Value>>,
    pub exclusion: Option<Vec<Value>>,
    /// Names of [`ValidatorRegistry`] entries this attribute's value must
    /// satisfy, beyond the built-in checks above.
    pub validators: Vec<String>,
}

/// One attribute's complete contract: how to find a value, how to coerce
/// it, whether it's required, and how to validate the result.
#[derive(Clone)]
pub struct AttributeDefinition {
    pub name: String,
    pub required: bool,
    /// Coercion names tried in order; the first successful one wins.
    pub types: Vec<String>,
    pub default: Option<DefaultValue>,
    pub source: Option<SourceFn>,
    pub validation: Validation,
    pub if_guard: Option<Guard>,
    pub unless_guard: Option<Guard>,
    pub nested: Option<AttributeSchema>,
}

impl AttributeDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            types: Vec::new(),
            default: None,
            source: None,
            validation: Validation::default(),
            if_guard: None,
            unless_guard: None,
            nested: None,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_type(mut self, coercion: impl Into<String>) -> Self {
        self.types.push(coercion.into());
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(DefaultValue::Value(value));
        self
    }

    #[must_use]
    pub fn with_default_factory(mut self, factory: DefaultFn) -> Self {
        self.default = Some(DefaultValue::Factory(factory));
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: SourceFn) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn with_if(mut self, guard: Guard) -> Self {
        self.if_guard = Some(guard);
        self
    }

    #[must_use]
    pub fn with_unless(mut self, guard: Guard) -> Self {
        self.unless_guard = Some(guard);
        self
    }

    #[must_use]
    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validation = validation;
        self
    }

    /// A nested attribute bag, resolved recursively against this
    /// attribute's own value before the parent's coercion/validation runs.
    #[must_use]
    pub fn with_nested(mut self, schema: AttributeSchema) -> Self {
        self.nested = Some(schema);
        self
    }

    fn gated_on(&self, ctx: &Context) -> bool {
        let if_ok = self.if_guard.as_ref().is_none_or(|g| g(ctx));
        let unless_ok = self.unless_guard.as_ref().is_none_or(|g| !g(ctx));
        if_ok && unless_ok
    }
}

/// An ordered collection of attribute definitions, as declared by a task.
pub type AttributeSchema = IndexMap<String, AttributeDefinition>;

/// Attribute name to accumulated validation messages, mirroring the
/// `errors` bag a task exposes during `work`.
pub type ErrorCollection = IndexMap<String, Vec<String>>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("no coercion named '{name}' succeeded for attribute '{attribute}'"))]
    Coercion { attribute: String, name: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Resolve, coerce and validate every attribute in `schema` against `args`
/// (highest precedence) and `ctx` (already-bound values from an earlier
/// stage), writing bound values back into `ctx` and returning any
/// validation failures.
pub fn bind(
    schema: &AttributeSchema,
    args: &Context,
    ctx: &mut Context,
    coercions: &CoercionRegistry,
    validators: &ValidatorRegistry,
) -> Result<ErrorCollection> {
    let mut errors = ErrorCollection::new();

    for (name, def) in schema {
        if !def.gated_on(ctx) {
            continue;
        }

        let mut value = args
            .get(name)
            .or_else(|| ctx.get(name))
            .cloned()
            .or_else(|| def.source.as_ref().and_then(|f| f(ctx)));

        if value.is_none() || matches!(value, Some(Value::Null)) {
            if let Some(default) = &def.default {
                value = Some(default.resolve(ctx));
            }
        }

        let Some(mut value) = value else {
            if def.required {
                errors
                    .entry(name.clone())
                    .or_default()
                    .push(format!("{name} is required"));
            }
            continue;
        };

        if let Some(nested_schema) = &def.nested {
            let mut nested_ctx = Context::from_value(value);
            let nested_errors = bind(nested_schema, &Context::new(), &mut nested_ctx, coercions, validators)?;
            for (nested_name, messages) in nested_errors {
                errors.entry(format!("{name}.{nested_name}")).or_default().extend(messages);
            }
            value = nested_ctx.to_value();
        }

        if !def.types.is_empty() {
            value = coerce(name, &value, &def.types, coercions)?;
        }

        validate(name, &value, &def.validation, validators, &mut errors);

        ctx.set(name.clone(), value);
    }

    Ok(errors)
}

fn coerce(
    attribute: &str,
    value: &Value,
    types: &[String],
    coercions: &CoercionRegistry,
) -> Result<Value> {
    for type_name in types {
        if let Some(coercion) = coercions.get(type_name) {
            if let Some(coerced) = coercion(value) {
                return Ok(coerced);
            }
        }
    }
    Err(Error::Coercion {
        attribute: attribute.to_string(),
        name: types.join(","),
    })
}

fn validate(name: &str, value: &Value, validation: &Validation, validators: &ValidatorRegistry, errors: &mut ErrorCollection) {
    let push = |errors: &mut ErrorCollection, msg: String| {
        errors.entry(name.to_string()).or_default().push(msg);
    };

    if validation.presence && value.is_null() {
        push(errors, format!("{name} must be present"));
    }
    if validation.absence && !value.is_null() {
        push(errors, format!("{name} must be absent"));
    }
    if let Some(re) = &validation.format {
        if let Some(s) = value.as_str() {
            if !re.is_match(s) {
                push(errors, format!("{name} does not match the required format"));
            }
        }
    }
    if validation.numeric && !value.is_number() {
        push(errors, format!("{name} must be numeric"));
    }
    if let Some(s) = value.as_str() {
        if let Some(min) = validation.min_length {
            if s.len() < min {
                push(errors, format!("{name} is shorter than the minimum length {min}"));
            }
        }
        if let Some(max) = validation.max_length {
            if s.len() > max {
                push(errors, format!("{name} is longer than the maximum length {max}"));
            }
        }
    }
    if let Some(allowed) = &validation.inclusion {
        if !allowed.contains(value) {
            push(errors, format!("{name} is not one of the allowed values"));
        }
    }
    if let Some(excluded) = &validation.exclusion {
        if excluded.contains(value) {
            push(errors, format!("{name} is one of the excluded values"));
        }
    }
    for validator_name in &validation.validators {
        match validators.get(validator_name) {
            Some(validator) if !validator(value) => {
                push(errors, format!("{name} failed validation '{validator_name}'"));
            }
            Some(_) => {}
            None => push(errors, format!("{name}: no validator named '{validator_name}' is registered")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CoercionRegistry, ValidatorRegistry};
    use serde_json::json;

    #[test]
    fn required_attribute_missing_is_an_error() {
        let mut schema = AttributeSchema::new();
        schema.insert("name".into(), AttributeDefinition::new("name").required());
        let coercions = CoercionRegistry::with_builtins();
        let validators = ValidatorRegistry::new();
        let mut ctx = Context::new();
        let errors = bind(&schema, &Context::new(), &mut ctx, &coercions, &validators).unwrap();
        assert!(errors.contains_key("name"));
    }

    #[test]
    fn default_applies_when_absent() {
        let mut schema = AttributeSchema::new();
        schema.insert(
            "count".into(),
            AttributeDefinition::new("count").with_default(json!(0)),
        );
        let coercions = CoercionRegistry::with_builtins();
        let validators = ValidatorRegistry::new();
        let mut ctx = Context::new();
        bind(&schema, &Context::new(), &mut ctx, &coercions, &validators).unwrap();
        assert_eq!(ctx.get("count"), Some(&json!(0)));
    }

    #[test]
    fn conditional_required_is_skipped_when_gated_off() {
        let mut schema = AttributeSchema::new();
        schema.insert(
            "approver".into(),
            AttributeDefinition::new("approver")
                .required()
                .with_if(Arc::new(|ctx: &Context| ctx.get("needsApproval").and_then(Value::as_bool).unwrap_or(false))),
        );
        let coercions = CoercionRegistry::with_builtins();
        let validators = ValidatorRegistry::new();
        let mut ctx = Context::new();
        let errors = bind(&schema, &Context::new(), &mut ctx, &coercions, &validators).unwrap();
        assert!(errors.is_empty());
    }

    #[test]
    fn coercion_converts_string_to_integer() {
        let mut schema = AttributeSchema::new();
        schema.insert(
            "age".into(),
            AttributeDefinition::new("age").with_type("integer"),
        );
        let coercions = CoercionRegistry::with_builtins();
        let validators = ValidatorRegistry::new();
        let args = Context::from_value(json!({"age": "42"}));
        let mut ctx = Context::new();
        bind(&schema, &args, &mut ctx, &coercions, &validators).unwrap();
        assert_eq!(ctx.get("age"), Some(&json!(42)));
    }

    #[test]
    fn inclusion_validation_rejects_unknown_values() {
        let mut schema = AttributeSchema::new();
        schema.insert(
            "color".into(),
            AttributeDefinition::new("color").with_validation(Validation {
                inclusion: Some(vec![json!("red"), json!("blue")]),
                ..Default::default()
            }),
        );
        let coercions = CoercionRegistry::with_builtins();
        let validators = ValidatorRegistry::new();
        let args = Context::from_value(json!({"color": "green"}));
        let mut ctx = Context::new();
        let errors = bind(&schema, &args, &mut ctx, &coercions, &validators).unwrap();
        assert!(errors.contains_key("color"));
    }

    #[test]
    fn named_validator_failure_is_reported_against_the_attribute() {
        let mut schema = AttributeSchema::new();
        schema.insert(
            "age".into(),
            AttributeDefinition::new("age").with_validation(Validation {
                validators: vec!["even".into()],
                ..Default::default()
            }),
        );
        let coercions = CoercionRegistry::with_builtins();
        let mut validators = ValidatorRegistry::new();
        validators.register("even", Arc::new(|v: &Value| v.as_i64().is_some_and(|n| n % 2 == 0)));
        let args = Context::from_value(json!({"age": 7}));
        let mut ctx = Context::new();
        let errors = bind(&schema, &args, &mut ctx, &coercions, &validators).unwrap();
        assert!(errors.contains_key("age"));
    }

    #[test]
    fn nested_schema_is_resolved_before_the_parent_attribute() {
        let mut nested = AttributeSchema::new();
        nested.insert("city".into(), AttributeDefinition::new("city").required());

        let mut schema = AttributeSchema::new();
        schema.insert("address".into(), AttributeDefinition::new("address").with_nested(nested));

        let coercions = CoercionRegistry::with_builtins();
        let validators = ValidatorRegistry::new();
        let args = Context::from_value(json!({"address": {}}));
        let mut ctx = Context::new();
        let errors = bind(&schema, &args, &mut ctx, &coercions, &validators).unwrap();
        assert!(errors.contains_key("address.city"));
    }
}
