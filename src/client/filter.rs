//! The `X-Filter` JSON dialect.
//!
//! ```
//! use linode_provider::client::filter::{ApiFilter, Order};
//! use serde_json::json;
//!
//! let filter = ApiFilter::new()
//!     .any_of("region", ["us-east", "us-west"])
//!     .contains("label", "tf-test")
//!     .order_by("created", Order::Desc);
//!
//! assert_eq!(
//!     filter.to_value(),
//!     Some(json!({
//!         "+and": [
//!             {"+or": [{"region": "us-east"}, {"region": "us-west"}]},
//!             {"label": {"+contains": "tf-test"}}
//!         ],
//!         "+order_by": "created",
//!         "+order": "desc"
//!     }))
//! );
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl Order {
    /// The dialect keyword.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Builder for server-side list filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiFilter {
    clauses: Vec<Value>,
    order_by: Option<(String, Order)>,
}

impl ApiFilter {
    /// An empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// `field == value`.
    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.clauses.push(single(field, value.into()));
        self
    }

    /// `field` equals any of `values`.
    pub fn any_of<I, V>(mut self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let alternatives: Vec<Value> = values
            .into_iter()
            .map(|v| single(field, v.into()))
            .collect();
        if !alternatives.is_empty() {
            self.clauses.push(json!({ "+or": alternatives }));
        }
        self
    }

    /// `field` contains `needle`.
    pub fn contains(mut self, field: &str, needle: &str) -> Self {
        self.clauses.push(single(field, json!({ "+contains": needle })));
        self
    }

    /// Sort the results server-side.
    pub fn order_by(mut self, field: &str, order: Order) -> Self {
        self.order_by = Some((field.to_string(), order));
        self
    }

    /// Whether no clause or ordering was added.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty() && self.order_by.is_none()
    }

    /// The header value, or `None` when there is nothing to filter.
    pub fn to_value(&self) -> Option<Value> {
        if self.is_empty() {
            return None;
        }
        let mut root = Map::new();
        if !self.clauses.is_empty() {
            root.insert("+and".to_string(), Value::Array(self.clauses.clone()));
        }
        if let Some((field, order)) = &self.order_by {
            root.insert("+order_by".to_string(), Value::String(field.clone()));
            root.insert("+order".to_string(), Value::String(order.as_str().to_string()));
        }
        Some(Value::Object(root))
    }
}

fn single(field: &str, value: Value) -> Value {
    let mut clause = Map::new();
    clause.insert(field.to_string(), value);
    Value::Object(clause)
}

/// Evaluate a filter against an item, as the API would.
///
/// Used by in-memory API fakes; supports `+and`, `+or`, `+contains` and
/// equality, and ignores ordering keys.
pub fn matches(filter: &Value, item: &Value) -> bool {
    let Some(obj) = filter.as_object() else {
        return true;
    };
    obj.iter().all(|(key, expected)| match key.as_str() {
        "+and" => expected
            .as_array()
            .is_some_and(|clauses| clauses.iter().all(|c| matches(c, item))),
        "+or" => expected
            .as_array()
            .is_some_and(|clauses| clauses.iter().any(|c| matches(c, item))),
        "+order_by" | "+order" => true,
        field => field_matches(item.get(field), expected),
    })
}

fn field_matches(actual: Option<&Value>, expected: &Value) -> bool {
    let Some(actual) = actual else {
        return false;
    };
    if let Some(needle) = expected.get("+contains").and_then(Value::as_str) {
        return match actual {
            Value::String(s) => s.contains(needle),
            Value::Array(items) => items
                .iter()
                .any(|i| i.as_str().is_some_and(|s| s.contains(needle))),
            _ => false,
        };
    }
    match actual {
        Value::Array(items) => items.contains(expected),
        other => other == expected,
    }
}
