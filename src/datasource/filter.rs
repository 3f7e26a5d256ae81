//! Filter blocks for list data sources.
//!
//! A data source declares which item fields can be filtered on and which of
//! those the API indexes. Exact predicates on indexed fields are sent as an
//! `X-Filter` expression; every predicate is then applied again locally, so
//! the result never depends on how much the server filtered.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{ApiFilter, Order};
use crate::error::ProviderError;
use crate::schema::{Attribute, Block, Diagnostic, NestedBlock, Schema, Validator};
use crate::types::parse_timestamp;

/// How filter values are compared with item values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MatchBy {
    /// Equal to one of the values.
    #[default]
    #[serde(rename = "exact")]
    Exact,
    /// Contains one of the values.
    #[serde(rename = "substring", alias = "sub")]
    Substring,
    /// Matches one of the values as a regular expression.
    #[serde(rename = "regex", alias = "re")]
    Regex,
}

/// One `filter` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Item field to test.
    pub name: String,
    /// Accepted values; any match passes.
    pub values: Vec<String>,
    /// Comparison mode.
    #[serde(default)]
    pub match_by: MatchBy,
}

/// Type used to interpret filter values for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Compared as text.
    String,
    /// Parsed as an integer.
    Int,
    /// Parsed as `true`/`false`.
    Bool,
}

impl FieldType {
    fn parse(&self, field: &str, raw: &str) -> Result<Value, ProviderError> {
        let bad = |expected: &str| {
            ProviderError::invalid(
                Diagnostic::error(format!("{:?} is not a valid {} for {:?}", raw, expected, field))
                    .with_attribute("filter"),
            )
        };
        match self {
            Self::String => Ok(Value::String(raw.to_string())),
            Self::Int => raw.trim().parse::<i64>().map(Value::from).map_err(|_| bad("integer")),
            Self::Bool => raw.trim().parse::<bool>().map(Value::from).map_err(|_| bad("boolean")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    api_filterable: bool,
    field_type: FieldType,
}

/// Fields a data source can filter and order on.
#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    fields: BTreeMap<&'static str, FieldSpec>,
}

/// A parsed filter query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    /// Predicates, all of which must hold.
    pub filters: Vec<Filter>,
    /// Field to sort by.
    pub order_by: Option<String>,
    /// Sort direction.
    pub order: Order,
    /// Keep only the most recently created item.
    pub latest: bool,
}

impl FilterConfig {
    /// An empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// A field the API can filter on server-side.
    pub fn api(mut self, name: &'static str, field_type: FieldType) -> Self {
        self.fields.insert(
            name,
            FieldSpec {
                api_filterable: true,
                field_type,
            },
        );
        self
    }

    /// A field only filtered locally.
    pub fn local(mut self, name: &'static str, field_type: FieldType) -> Self {
        self.fields.insert(
            name,
            FieldSpec {
                api_filterable: false,
                field_type,
            },
        );
        self
    }

    fn names(&self) -> Vec<String> {
        self.fields.keys().map(|k| k.to_string()).collect()
    }

    /// Add the `filter`, `order_by`, `order` and optionally `latest`
    /// arguments plus the computed result list `items_name` to `schema`.
    pub fn extend_schema(
        &self,
        schema: Schema,
        items_name: &str,
        item: Block,
        latest: bool,
    ) -> Schema {
        let filter = Block::new()
            .with_attribute(
                "name",
                Attribute::required_string().with_validator(Validator::one_of(self.names())),
            )
            .with_attribute(
                "values",
                Attribute::string_list().required(),
            )
            .with_attribute(
                "match_by",
                Attribute::optional_string()
                    .with_default(Value::from("exact"))
                    .with_validator(Validator::one_of([
                        "exact",
                        "substring",
                        "sub",
                        "re",
                        "regex",
                    ])),
            );
        let mut schema = schema
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "order_by",
                Attribute::optional_string().with_validator(Validator::one_of(self.names())),
            )
            .with_attribute(
                "order",
                Attribute::optional_string()
                    .with_default(Value::from("asc"))
                    .with_validator(Validator::one_of(["asc", "desc"])),
            )
            .with_block("filter", NestedBlock::list(filter))
            .with_block(items_name, NestedBlock::list(item).computed());
        if latest {
            schema = schema.with_attribute(
                "latest",
                Attribute::optional_bool().with_default(Value::Bool(false)),
            );
        }
        schema
    }

    /// Parse the filter arguments of a data source config.
    pub fn parse(&self, config: &Value) -> Result<Query, ProviderError> {
        let filters: Vec<Filter> = match config.get("filter") {
            None | Some(Value::Null) => Vec::new(),
            Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
                let message = format!("invalid filter: {}", e);
                ProviderError::invalid(Diagnostic::error(message).with_attribute("filter"))
            })?,
        };
        for filter in &filters {
            if !self.fields.contains_key(filter.name.as_str()) {
                return Err(ProviderError::invalid(
                    Diagnostic::error(format!("{:?} is not a valid attribute", filter.name))
                        .with_attribute("filter.name"),
                ));
            }
        }

        let order_by = config
            .get("order_by")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        if let Some(field) = &order_by {
            if !self.fields.contains_key(field.as_str()) {
                return Err(ProviderError::invalid(
                    Diagnostic::error(format!("{:?} is not a valid attribute", field))
                        .with_attribute("order_by"),
                ));
            }
        }
        let order = match config.get("order").and_then(Value::as_str) {
            Some("desc") => Order::Desc,
            _ => Order::Asc,
        };

        Ok(Query {
            filters,
            order_by,
            order,
            latest: config.get("latest").and_then(Value::as_bool).unwrap_or(false),
        })
    }

    /// The server-side part of a query.
    pub fn api_filter(&self, query: &Query) -> Result<ApiFilter, ProviderError> {
        let mut filter = ApiFilter::new();
        for f in &query.filters {
            if f.match_by != MatchBy::Exact {
                continue;
            }
            let Some(spec) = self.fields.get(f.name.as_str()).filter(|s| s.api_filterable) else {
                continue;
            };
            let values = f
                .values
                .iter()
                .map(|v| spec.field_type.parse(&f.name, v))
                .collect::<Result<Vec<_>, _>>()?;
            filter = filter.any_of(&f.name, values);
        }
        if filter.is_empty() {
            return Ok(filter);
        }
        if let Some(field) = &query.order_by {
            if self.fields.get(field.as_str()).is_some_and(|s| s.api_filterable) {
                filter = filter.order_by(field, query.order);
            }
        }
        Ok(filter)
    }

    /// Apply every predicate, the ordering and `latest` locally.
    pub fn apply(&self, query: &Query, items: Vec<Value>) -> Result<Vec<Value>, ProviderError> {
        let mut kept = Vec::with_capacity(items.len());
        for item in items {
            if self.item_matches(query, &item)? {
                kept.push(item);
            }
        }

        if let Some(field) = &query.order_by {
            kept.sort_by(|a, b| compare(a.get(field), b.get(field)));
            if query.order == Order::Desc {
                kept.reverse();
            }
        }

        if query.latest {
            return Ok(latest_created(kept).into_iter().collect());
        }
        Ok(kept)
    }

    fn item_matches(&self, query: &Query, item: &Value) -> Result<bool, ProviderError> {
        for filter in &query.filters {
            let Some(actual) = item.get(&filter.name) else {
                return Err(ProviderError::invalid(
                    Diagnostic::error(format!("{:?} is not a valid attribute", filter.name))
                        .with_attribute("filter.name"),
                ));
            };
            let spec = self.fields.get(filter.name.as_str()).copied().unwrap_or(FieldSpec {
                api_filterable: false,
                field_type: FieldType::String,
            });
            if !value_matches(&spec, filter, actual)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn value_matches(spec: &FieldSpec, filter: &Filter, actual: &Value) -> Result<bool, ProviderError> {
    if let Value::Array(elements) = actual {
        for element in elements {
            if value_matches(spec, filter, element)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }

    match filter.match_by {
        MatchBy::Exact => {
            for raw in &filter.values {
                if &spec.field_type.parse(&filter.name, raw)? == actual {
                    return Ok(true);
                }
            }
            Ok(false)
        },
        MatchBy::Substring => {
            let Some(text) = actual.as_str() else {
                let message = format!("{:?} does not support substring matching", filter.name);
                return Err(ProviderError::invalid(
                    Diagnostic::error(message).with_attribute("filter.match_by"),
                ));
            };
            Ok(filter.values.iter().any(|v| text.contains(v.as_str())))
        },
        MatchBy::Regex => {
            let text = match actual {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            for raw in &filter.values {
                let re = Regex::new(raw).map_err(|e| {
                    ProviderError::invalid(
                        Diagnostic::error(format!("invalid regular expression {:?}: {}", raw, e))
                            .with_attribute("filter.values"),
                    )
                })?;
                if re.is_match(&text) {
                    return Ok(true);
                }
            }
            Ok(false)
        },
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

/// The item with the newest `created` timestamp.
pub fn latest_created(items: Vec<Value>) -> Option<Value> {
    items
        .into_iter()
        .filter_map(|item| {
            let created = item.get("created").and_then(Value::as_str).and_then(parse_timestamp)?;
            Some((created, item))
        })
        .max_by_key(|(created, _)| *created)
        .map(|(_, item)| item)
}

/// Identifier of a filtered lookup: the canonical JSON of its arguments.
pub fn filter_id(query: &Query) -> Result<String, ProviderError> {
    let id = serde_json::json!({
        "filter": query.filters,
        "order": query.order.as_str(),
        "order_by": query.order_by,
    });
    Ok(serde_json::to_string(&id)?)
}

/// Convenience for singular lookups.
pub fn exactly_one(kind: &str, mut items: Vec<Value>) -> Result<Value, ProviderError> {
    match items.len() {
        1 => Ok(items.remove(0)),
        0 => Err(ProviderError::NotFound(format!("no {} matched the given arguments", kind))),
        n => Err(ProviderError::invalid(Diagnostic::error(format!(
            "{} {} objects matched; narrow the arguments to a single match",
            n, kind
        )))),
    }
}
