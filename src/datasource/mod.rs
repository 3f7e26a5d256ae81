//! Read-only data sources.
//!
//! A data source is a degenerate resource: it only reads. Singular sources
//! look one object up by identifier or by a unique field; list sources run a
//! [`filter::Query`] against a collection.

pub mod filter;
pub mod sources;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::client::ApiFilter;
use crate::error::ProviderError;
use crate::registry::OpContext;
use crate::schema::{Attribute, AttributeFlags, Block, Diagnostic, NestedBlock, Schema};

pub use filter::{FieldType, Filter, FilterConfig, MatchBy, Query};

/// A read-only lookup.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Kind name, e.g. `linode_image`.
    fn name(&self) -> &'static str;

    /// Argument and result schema.
    fn schema(&self) -> Schema;

    /// Look the object(s) up. `config` is validated and resolved.
    async fn read(&self, ctx: &OpContext, config: &Value) -> Result<Value, ProviderError>;
}

/// Maps an API object onto the state shape.
pub type Flatten = fn(Value) -> Value;

/// One way to find a single object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// GET `<collection>/<key>`.
    Get {
        /// Argument holding the identifier.
        key: &'static str,
    },
    /// List the collection with `field == <key>` and require one match.
    Unique {
        /// Argument holding the value.
        key: &'static str,
        /// Item field compared server-side.
        field: &'static str,
    },
}

impl Lookup {
    fn key(&self) -> &'static str {
        match self {
            Self::Get { key } | Self::Unique { key, .. } => key,
        }
    }
}

/// Single-object data source built from lookups.
pub struct SingularDataSource {
    name: &'static str,
    collection: &'static str,
    lookups: Vec<Lookup>,
    schema: Schema,
    flatten: Flatten,
}

impl SingularDataSource {
    /// A source over `collection`; `{arg}` segments are filled from the config.
    pub fn new(
        name: &'static str,
        collection: &'static str,
        schema: Schema,
        flatten: Flatten,
    ) -> Self {
        Self {
            name,
            collection,
            lookups: Vec::new(),
            schema,
            flatten,
        }
    }

    /// Add a lookup, tried in registration order.
    pub fn with_lookup(mut self, lookup: Lookup) -> Self {
        self.lookups.push(lookup);
        self
    }
}

#[async_trait]
impl DataSource for SingularDataSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn schema(&self) -> Schema {
        self.schema.clone()
    }

    async fn read(&self, ctx: &OpContext, config: &Value) -> Result<Value, ProviderError> {
        let collection = expand_path(self.collection, config)?;
        let (lookup, key) = self
            .lookups
            .iter()
            .find_map(|l| argument(config, l.key()).map(|k| (*l, k)))
            .ok_or_else(|| {
                let keys: Vec<_> = self.lookups.iter().map(|l| l.key()).collect();
                ProviderError::invalid(Diagnostic::error(format!(
                    "one of {} must be set",
                    keys.join(", ")
                )))
            })?;

        debug!(data_source = %self.name, lookup = ?lookup, "Looking up");
        let found: Value = match lookup {
            Lookup::Get { .. } => {
                ctx.client
                    .get(&format!("{}/{}", collection, key), &ctx.cancel)
                    .await?
            },
            Lookup::Unique { field, .. } => {
                let items: Vec<Value> = ctx
                    .client
                    .list(&collection, Some(&ApiFilter::new().eq(field, key.clone())), &ctx.cancel)
                    .await?;
                let items = items
                    .into_iter()
                    .filter(|item| item.get(field).map(text).as_deref() == Some(key.as_str()))
                    .collect();
                filter::exactly_one(self.name, items)?
            },
        };

        let mut state = overlay(config, (self.flatten)(found));
        if let Some(map) = state.as_object_mut() {
            if !map.get("id").is_some_and(|v| !v.is_null()) {
                map.insert("id".to_string(), Value::String(key));
            }
        }
        Ok(state)
    }
}

/// Filtered list data source.
pub struct ListDataSource {
    name: &'static str,
    collection: &'static str,
    items_name: &'static str,
    filters: FilterConfig,
    schema: Schema,
    flatten: Flatten,
}

impl ListDataSource {
    /// A list source returning matches under `items_name`.
    pub fn new(
        name: &'static str,
        collection: &'static str,
        items_name: &'static str,
        item: Block,
        filters: FilterConfig,
        latest: bool,
        flatten: Flatten,
    ) -> Self {
        let schema = filters.extend_schema(Schema::v0(), items_name, item, latest);
        Self {
            name,
            collection,
            items_name,
            filters,
            schema,
            flatten,
        }
    }
}

#[async_trait]
impl DataSource for ListDataSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn schema(&self) -> Schema {
        self.schema.clone()
    }

    async fn read(&self, ctx: &OpContext, config: &Value) -> Result<Value, ProviderError> {
        let query = self.filters.parse(config)?;
        let api_filter = self.filters.api_filter(&query)?;
        let raw: Vec<Value> = ctx
            .client
            .list(self.collection, Some(&api_filter), &ctx.cancel)
            .await?;
        let items = raw.into_iter().map(self.flatten).collect();
        let items = self.filters.apply(&query, items)?;
        debug!(data_source = %self.name, matches = items.len(), "Filtered");

        let mut state = config.as_object().cloned().unwrap_or_default();
        state.insert("id".to_string(), Value::String(filter::filter_id(&query)?));
        state.insert(self.items_name.to_string(), Value::Array(items));
        Ok(Value::Object(state))
    }
}

/// The non-empty, non-zero string form of argument `key`.
fn argument(config: &Value, key: &str) -> Option<String> {
    let value = config.get(key)?;
    let text = text(value);
    (!text.is_empty() && text != "0").then_some(text)
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Substitute `{arg}` segments of `template` with config values.
pub fn expand_path(template: &str, config: &Value) -> Result<String, ProviderError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let Some(len) = rest[start..].find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let name = &rest[start + 1..start + len];
        let value = argument(config, name).ok_or_else(|| {
            let message = format!("{} is required", name);
            ProviderError::invalid(Diagnostic::error(message).with_attribute(name))
        })?;
        out.push_str(&value);
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn overlay(config: &Value, found: Value) -> Value {
    let mut state = config.as_object().cloned().unwrap_or_default();
    if let Value::Object(found) = found {
        for (k, v) in found {
            state.insert(k, v);
        }
    }
    Value::Object(state)
}

/// A read-only copy of a resource block: every attribute computed, no
/// defaults, validators or sensitive values.
pub fn computed_block(block: &Block) -> Block {
    let mut out = Block::new();
    for (name, attr) in &block.attributes {
        if attr.flags.sensitive {
            continue;
        }
        let mut copy = Attribute::new(attr.attr_type.clone(), AttributeFlags::computed());
        copy.description = attr.description.clone();
        out = out.with_attribute(name.clone(), copy);
    }
    for (name, nested) in &block.blocks {
        let mut copy = NestedBlock::list(computed_block(&nested.block)).computed();
        copy.nesting_mode = nested.nesting_mode;
        copy.max_items = nested.max_items;
        out = out.with_block(name.clone(), copy);
    }
    out
}

/// A singular schema: `args` as inputs, the rest of `block` computed.
pub fn lookup_schema(block: &Block, args: Vec<(&'static str, Attribute)>) -> Schema {
    let mut schema = Schema::v0();
    schema.block = computed_block(block);
    for (name, attr) in args {
        schema = schema.with_attribute(name, attr);
    }
    schema
}

/// Drop the keys of `state` that are not attributes or blocks of `block`.
pub fn project(block: &Block, state: Value) -> Value {
    let Value::Object(map) = state else {
        return state;
    };
    let kept: Map<String, Value> = map
        .into_iter()
        .filter(|(k, _)| {
            k == "id" || block.attributes.contains_key(k) || block.blocks.contains_key(k)
        })
        .collect();
    Value::Object(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiResponse, Client, Method};
    use crate::config::ProviderConfig;
    use crate::testing::MockTransport;
    use serde_json::json;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn ctx(mock: &MockTransport) -> OpContext {
        OpContext::new(
            Client::new(Arc::new(mock.clone())),
            Arc::new(ProviderConfig::with_token("t")),
            CancellationToken::new(),
        )
    }

    fn identity(v: Value) -> Value {
        v
    }

    #[test]
    fn test_expand_path() {
        let config = json!({"domain_id": 12});
        assert_eq!(
            expand_path("/domains/{domain_id}/records", &config).unwrap(),
            "/domains/12/records"
        );
        assert!(expand_path("/domains/{domain_id}/records", &json!({})).is_err());
        assert!(expand_path("/domains/{domain_id}/records", &json!({"domain_id": 0})).is_err());
    }

    #[test]
    fn test_computed_block_strips_inputs() {
        let block = Block::new()
            .with_attribute("label", Attribute::required_string().with_force_new())
            .with_attribute("root_pass", Attribute::optional_string().sensitive());
        let out = computed_block(&block);
        assert!(out.attributes["label"].flags.is_computed_only());
        assert!(!out.attributes["label"].force_new);
        assert!(!out.attributes.contains_key("root_pass"));
    }

    #[tokio::test]
    async fn test_singular_get_then_unique() {
        let mock = MockTransport::new();
        mock.respond(Method::Get, "/profile/sshkeys/7", ApiResponse::json(200, json!({"id": 7, "label": "k"})));
        mock.respond(
            Method::Get,
            "/profile/sshkeys",
            ApiResponse::json(200, json!({"data": [{"id": 8, "label": "laptop"}], "page": 1, "pages": 1})),
        );
        let source = SingularDataSource::new("linode_sshkey", "/profile/sshkeys", Schema::v0(), identity)
            .with_lookup(Lookup::Get { key: "id" })
            .with_lookup(Lookup::Unique { key: "label", field: "label" });

        let by_id = source.read(&ctx(&mock), &json!({"id": 7})).await.unwrap();
        assert_eq!(by_id["label"], "k");

        let by_label = source.read(&ctx(&mock), &json!({"label": "laptop"})).await.unwrap();
        assert_eq!(by_label["id"], 8);
        assert_eq!(
            mock.requests()[1].filter,
            Some(json!({"+and": [{"label": "laptop"}]}))
        );

        let err = source.read(&ctx(&mock), &json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unique_lookup_requires_one_match() {
        let mock = MockTransport::new();
        mock.respond(
            Method::Get,
            "/domains",
            ApiResponse::json(200, json!({"data": [], "page": 1, "pages": 1})),
        );
        let source = SingularDataSource::new("linode_domain", "/domains", Schema::v0(), identity)
            .with_lookup(Lookup::Unique { key: "domain", field: "domain" });
        let err = source
            .read(&ctx(&mock), &json!({"domain": "example.com"}))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_source_filters_and_sets_id() {
        let mock = MockTransport::new();
        mock.respond(
            Method::Get,
            "/images",
            ApiResponse::json(
                200,
                json!({"data": [
                    {"id": "linode/debian12", "label": "Debian 12", "is_public": true},
                    {"id": "private/1", "label": "golden", "is_public": false}
                ], "page": 1, "pages": 1}),
            ),
        );
        let source = ListDataSource::new(
            "linode_images",
            "/images",
            "images",
            Block::new().with_attribute("label", Attribute::computed_string()),
            FilterConfig::new()
                .api("label", FieldType::String)
                .api("is_public", FieldType::Bool),
            true,
            identity,
        );

        let state = source
            .read(
                &ctx(&mock),
                &json!({"filter": [{"name": "label", "values": ["Deb"], "match_by": "substring"}]}),
            )
            .await
            .unwrap();
        assert_eq!(state["images"].as_array().unwrap().len(), 1);
        assert!(state["id"].as_str().unwrap().contains("Deb"));
        assert_eq!(mock.requests()[0].filter, None);
    }
}
