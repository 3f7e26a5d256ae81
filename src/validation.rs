//! Schema validation and default resolution.
//!
//! [`validate`] checks a configuration document against a [`Schema`]: presence
//! of required attributes, value types, declarative [`Validator`]s and nested
//! block cardinality. [`resolve_desired`] fills in omitted attributes so the
//! diff engine always compares fully-specified documents.
//!
//! # Example
//!
//! ```
//! use linode_provider::schema::{Attribute, Schema, Validator};
//! use linode_provider::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("label", Attribute::required_string()
//!         .with_validator(Validator::length_between(3, 32)));
//!
//! assert!(validate(&schema, &json!({"label": "web-firewall"})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"label": "fw"}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("label".to_string()));
//! ```

use crate::schema::{
    Attribute, AttributeType, Block, BlockNestingMode, Diagnostic, DiagnosticSeverity, NestedBlock,
    Schema, Validator,
};
use crate::types::parse_timestamp;
use base64::Engine as _;
use serde_json::{Map, Value};

/// Validate a JSON value against a schema.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// # Validation Rules
///
/// - Required attributes must be present and non-null
/// - Computed-only attributes are skipped (the provider sets these)
/// - Attribute types must match the schema
/// - Validators run on every present value
/// - Nested blocks are validated recursively with min/max item constraints
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, value, "", &mut diagnostics);
    diagnostics
}

/// Validate a JSON value against a schema, returning Ok if valid or Err with diagnostics.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Check if a JSON value is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

/// Resolve the desired document: explicit value, then default, then zero.
///
/// Computed attributes the user left unset stay absent so the diff engine
/// keeps the server's value. Unknown keys are carried through untouched.
pub fn resolve_desired(schema: &Schema, value: &Value) -> Value {
    resolve_block(&schema.block, value)
}

fn resolve_block(block: &Block, value: &Value) -> Value {
    let mut resolved = match value {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    for (name, attr) in &block.attributes {
        if attr.flags.is_computed_only() {
            resolved.remove(name);
            continue;
        }
        let present = resolved.get(name).is_some_and(|v| !v.is_null());
        if present {
            continue;
        }
        if let Some(default) = &attr.default {
            resolved.insert(name.clone(), default.clone());
        } else if attr.flags.computed {
            resolved.remove(name);
        } else {
            resolved.insert(name.clone(), attr.attr_type.zero_value());
        }
    }

    for (name, nested) in &block.blocks {
        if nested.computed {
            resolved.remove(name);
            continue;
        }
        let current = resolved.remove(name).unwrap_or(Value::Null);
        let value = match (nested.nesting_mode, current) {
            (BlockNestingMode::Single, Value::Null) => Value::Null,
            (BlockNestingMode::Single, Value::Array(items)) => items
                .first()
                .map(|item| resolve_block(&nested.block, item))
                .unwrap_or(Value::Null),
            (BlockNestingMode::Single, item) => resolve_block(&nested.block, &item),
            (_, Value::Array(items)) => Value::Array(
                items
                    .iter()
                    .map(|item| resolve_block(&nested.block, item))
                    .collect(),
            ),
            (_, _) => Value::Array(Vec::new()),
        };
        resolved.insert(name.clone(), value);
    }

    Value::Object(resolved)
}

fn validate_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => return,
        _ => {
            diagnostics.push(
                Diagnostic::error("Expected object")
                    .with_detail(format!("Got {}", value_type_name(value)))
                    .with_attribute_if_not_empty(path),
            );
            return;
        },
    };

    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        validate_attribute(attr, obj.get(name), &attr_path, diagnostics);
    }

    for (name, nested) in &block.blocks {
        if nested.computed {
            continue;
        }
        let block_path = join_path(path, name);
        validate_nested_block(nested, obj.get(name), &block_path, diagnostics);
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.flags.is_computed_only() {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required && attr.default.is_none() {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => {
            let before = diagnostics.len();
            validate_attribute_type(&attr.attr_type, v, path, diagnostics);
            if diagnostics.len() == before {
                for validator in &attr.validators {
                    if let Some(diag) = check_validator(validator, v, path) {
                        diagnostics.push(diag);
                    }
                }
            }
        },
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        AttributeType::Timestamp => match value.as_str() {
            Some("") => {},
            Some(s) if parse_timestamp(s).is_none() => {
                diagnostics.push(
                    Diagnostic::error(format!("Invalid timestamp for attribute '{}'", path))
                        .with_detail(format!("{:?} is not an RFC 3339 timestamp", s))
                        .with_attribute(path),
                );
            },
            Some(_) => {},
            None => diagnostics.push(type_error(path, "timestamp", value)),
        },
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        },
        AttributeType::Float64 => {
            if !value.is_number() {
                diagnostics.push(type_error(path, "float64", value));
            }
        },
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        },
        AttributeType::List(element_type) | AttributeType::Set(element_type) => {
            if let Some(arr) = value.as_array() {
                for (i, elem) in arr.iter().enumerate() {
                    let elem_path = format!("{}.{}", path, i);
                    validate_attribute_type(element_type, elem, &elem_path, diagnostics);
                }
            } else {
                let expected = if matches!(attr_type, AttributeType::Set(_)) {
                    "set"
                } else {
                    "list"
                };
                diagnostics.push(type_error(path, expected, value));
            }
        },
        AttributeType::Map(value_type) => {
            if let Some(obj) = value.as_object() {
                for (key, val) in obj {
                    let key_path = format!("{}.{}", path, key);
                    validate_attribute_type(value_type, val, &key_path, diagnostics);
                }
            } else {
                diagnostics.push(type_error(path, "map", value));
            }
        },
    }
}

/// Apply one validator to an already type-checked value.
pub fn check_validator(validator: &Validator, value: &Value, path: &str) -> Option<Diagnostic> {
    let fail = |summary: String| Some(Diagnostic::error(summary).with_attribute(path));

    match validator {
        Validator::OneOf { values } => {
            let s = value.as_str()?;
            if values.iter().any(|v| v == s) {
                None
            } else {
                fail(format!(
                    "expected {} to be one of {}, got {:?}",
                    path,
                    values.join(", "),
                    s
                ))
            }
        },
        Validator::LengthBetween { min, max } => {
            let len = value.as_str()?.chars().count();
            if (*min..=*max).contains(&len) {
                None
            } else {
                fail(format!(
                    "expected length of {} to be in the range ({} - {}), got {}",
                    path, min, max, len
                ))
            }
        },
        Validator::IntBetween { min, max } => {
            let n = as_i64(value)?;
            if (*min..=*max).contains(&n) {
                None
            } else {
                fail(format!(
                    "expected {} to be in the range ({} - {}), got {}",
                    path, min, max, n
                ))
            }
        },
        Validator::IntAtLeast { min } => {
            let n = as_i64(value)?;
            if n >= *min {
                None
            } else {
                fail(format!("expected {} to be at least ({}), got {}", path, min, n))
            }
        },
        Validator::Matches { pattern, message } => {
            let s = value.as_str()?;
            match regex::Regex::new(pattern) {
                Ok(re) if re.is_match(s) => None,
                Ok(_) => fail(format!("invalid value for {} ({})", path, message)),
                Err(err) => fail(format!("invalid pattern for {}: {}", path, err)),
            }
        },
        Validator::IpAddress => {
            let s = value.as_str()?;
            if s.parse::<std::net::IpAddr>().is_ok() {
                None
            } else {
                fail(format!("expected {} to contain a valid IP, got: {}", path, s))
            }
        },
        Validator::Base64 => {
            let s = value.as_str()?;
            if base64::engine::general_purpose::STANDARD.decode(s).is_ok() {
                None
            } else {
                fail(format!("expected {} to be base64 encoded", path))
            }
        },
    }
}

fn validate_nested_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match nested.nesting_mode {
        BlockNestingMode::Single => validate_single_block(nested, value, path, diagnostics),
        BlockNestingMode::List | BlockNestingMode::Set => {
            validate_list_block(nested, value, path, diagnostics)
        },
    }
}

fn validate_single_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match value {
        None | Some(Value::Null) => {
            if nested.min_items > 0 {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required block '{}'", path))
                        .with_detail("At least one block is required")
                        .with_attribute(path),
                );
            }
        },
        // A single block may arrive wrapped in a one-element list.
        Some(Value::Array(items)) if items.len() <= 1 => {
            if let Some(item) = items.first() {
                validate_block(&nested.block, item, path, diagnostics);
            }
        },
        Some(v) => validate_block(&nested.block, v, path, diagnostics),
    }
}

fn validate_list_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match value {
        None | Some(Value::Null) => {
            if nested.min_items > 0 {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' requires at least {} item(s)",
                        path, nested.min_items
                    ))
                    .with_attribute(path),
                );
            }
        },
        Some(Value::Array(arr)) => {
            let len = arr.len() as u32;

            if len < nested.min_items {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' requires at least {} item(s), got {}",
                        path, nested.min_items, len
                    ))
                    .with_attribute(path),
                );
            }

            if nested.max_items > 0 && len > nested.max_items {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' allows at most {} item(s), got {}",
                        path, nested.max_items, len
                    ))
                    .with_attribute(path),
                );
            }

            for (i, item) in arr.iter().enumerate() {
                let item_path = format!("{}.{}", path, i);
                validate_block(&nested.block, item, &item_path, diagnostics);
            }
        },
        Some(v) => {
            diagnostics.push(
                Diagnostic::error(format!("Expected list for block '{}'", path))
                    .with_detail(format!("Got {}", value_type_name(v)))
                    .with_attribute(path),
            );
        },
    }
}

// Helper functions

pub(crate) fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    as_i64(value).is_some()
}

pub(crate) fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64().and_then(|f| {
                (f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64)
                    .then_some(f as i64)
            })
        }),
        _ => None,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic {
        severity: DiagnosticSeverity::Error,
        summary: format!("Invalid type for attribute '{}'", path),
        detail: Some(format!(
            "Expected {}, got {}",
            expected,
            value_type_name(got)
        )),
        attribute: Some(path.to_string()),
    }
}

trait DiagnosticExt {
    fn with_attribute_if_not_empty(self, path: &str) -> Self;
}

impl DiagnosticExt for Diagnostic {
    fn with_attribute_if_not_empty(self, path: &str) -> Self {
        if path.is_empty() {
            self
        } else {
            self.with_attribute(path)
        }
    }
}
