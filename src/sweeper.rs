//! Cleanup of leaked test fixtures.
//!
//! Every sweeper lists its collection, keeps the objects whose lowercased
//! label starts with the prefix (or with `renamed-<prefix>`) and deletes them
//! one by one. A failed deletion is recorded and the sweep goes on.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::client::{ApiFilter, Client};
use crate::error::ProviderError;

/// Shortest prefix a sweep accepts.
pub const MIN_PREFIX_LEN: usize = 3;

/// Refuse prefixes that could match unrelated objects.
pub fn check_prefix(prefix: &str) -> Result<(), ProviderError> {
    if prefix.trim().chars().count() < MIN_PREFIX_LEN {
        return Err(ProviderError::Configuration(format!(
            "sweep prefix {:?} is shorter than {} characters",
            prefix, MIN_PREFIX_LEN
        )));
    }
    Ok(())
}

/// Whether a label belongs to a fixture created with `prefix`.
pub fn should_sweep(prefix: &str, label: &str) -> bool {
    let label = label.to_lowercase();
    let prefix = prefix.to_lowercase();
    label.starts_with(&prefix) || label.starts_with(&format!("renamed-{}", prefix))
}

/// An object selected for deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepTarget {
    /// Identifier used in logs and reports.
    pub id: String,
    /// The label that matched.
    pub label: String,
    /// Item path the deletion is sent to.
    pub path: String,
}

/// Lists and deletes leaked objects of one kind.
#[async_trait]
pub trait Sweeper: Send + Sync {
    /// Kind name.
    fn name(&self) -> &'static str;

    /// Objects whose label matches `prefix`.
    async fn list(
        &self,
        client: &Client,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SweepTarget>, ProviderError>;

    /// Delete one object.
    async fn delete(
        &self,
        client: &Client,
        target: &SweepTarget,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError>;
}

/// Sweeper over a plain collection endpoint.
#[derive(Debug, Clone)]
pub struct CollectionSweeper {
    kind: &'static str,
    collection: &'static str,
    label_field: &'static str,
    id_of: fn(&Value) -> Option<String>,
    item_path: Option<fn(&str, &Value) -> String>,
    reset: Option<Value>,
    server_filter: bool,
}

fn plain_id(item: &Value) -> Option<String> {
    match item.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl CollectionSweeper {
    /// Sweep `collection` by its `label` field and numeric `id`.
    pub fn new(kind: &'static str, collection: &'static str) -> Self {
        Self {
            kind,
            collection,
            label_field: "label",
            id_of: plain_id,
            item_path: None,
            reset: None,
            server_filter: true,
        }
    }

    /// Match on a different field.
    pub fn with_label_field(mut self, field: &'static str) -> Self {
        self.label_field = field;
        self
    }

    /// Derive the identifier differently.
    pub fn with_id(mut self, id_of: fn(&Value) -> Option<String>) -> Self {
        self.id_of = id_of;
        self
    }

    /// Derive the item path from the identifier and the listed item.
    pub fn with_item_path(mut self, item_path: fn(&str, &Value) -> String) -> Self {
        self.item_path = Some(item_path);
        self
    }

    /// Delete by PUT-ing `body` to the item instead of DELETE.
    pub fn resetting(mut self, body: Value) -> Self {
        self.reset = Some(body);
        self
    }

    /// Do not ask the API to pre-filter by label.
    pub fn without_server_filter(mut self) -> Self {
        self.server_filter = false;
        self
    }
}

#[async_trait]
impl Sweeper for CollectionSweeper {
    fn name(&self) -> &'static str {
        self.kind
    }

    async fn list(
        &self,
        client: &Client,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SweepTarget>, ProviderError> {
        let filter = self
            .server_filter
            .then(|| ApiFilter::new().contains(self.label_field, prefix));
        let items: Vec<Value> = client.list(self.collection, filter.as_ref(), cancel).await?;

        Ok(items
            .iter()
            .filter_map(|item| {
                let label = item.get(self.label_field)?.as_str()?;
                if !should_sweep(prefix, label) {
                    return None;
                }
                let id = (self.id_of)(item)?;
                let path = match self.item_path {
                    Some(item_path) => item_path(&id, item),
                    None => format!("{}/{}", self.collection, id),
                };
                Some(SweepTarget {
                    id,
                    label: label.to_string(),
                    path,
                })
            })
            .collect())
    }

    async fn delete(
        &self,
        client: &Client,
        target: &SweepTarget,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        match &self.reset {
            Some(body) => {
                client.put::<Value, _>(&target.path, body, cancel).await?;
            },
            None => client.delete(&target.path, cancel).await?,
        }
        Ok(())
    }
}

/// Outcome of sweeping one kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KindReport {
    /// Kind name.
    pub kind: String,
    /// Identifiers deleted.
    pub deleted: Vec<String>,
    /// Identifiers already gone at deletion time.
    pub missing: Vec<String>,
    /// Identifiers that could not be deleted, with the reason.
    pub failed: Vec<(String, String)>,
    /// Why listing failed, if it did.
    pub list_error: Option<String>,
}

impl KindReport {
    /// Whether nothing went wrong.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.list_error.is_none()
    }
}

/// Outcome of a sweep across kinds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    /// One entry per sweeper run.
    pub kinds: Vec<KindReport>,
}

impl SweepReport {
    /// True iff every deletion succeeded or found the object gone.
    pub fn is_success(&self) -> bool {
        self.kinds.iter().all(KindReport::is_clean)
    }

    /// Total deleted objects.
    pub fn deleted(&self) -> usize {
        self.kinds.iter().map(|k| k.deleted.len()).sum()
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for kind in &self.kinds {
            write!(
                f,
                "{}: {} deleted, {} already gone, {} failed",
                kind.kind,
                kind.deleted.len(),
                kind.missing.len(),
                kind.failed.len()
            )?;
            if let Some(err) = &kind.list_error {
                write!(f, " (list failed: {})", err)?;
            }
            writeln!(f)?;
            for (id, reason) in &kind.failed {
                writeln!(f, "  {}: {}", id, reason)?;
            }
        }
        Ok(())
    }
}

/// Run sweepers one after another.
pub async fn run(
    client: &Client,
    sweepers: &[Arc<dyn Sweeper>],
    prefix: &str,
    cancel: &CancellationToken,
) -> Result<SweepReport, ProviderError> {
    check_prefix(prefix)?;
    let prefix = prefix.trim();
    let mut report = SweepReport::default();

    for sweeper in sweepers {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled("sweep".to_string()));
        }
        let mut kind = KindReport {
            kind: sweeper.name().to_string(),
            ..Default::default()
        };

        let targets = match sweeper.list(client, prefix, cancel).await {
            Ok(targets) => targets,
            Err(e) => {
                error!(kind = %sweeper.name(), error = %e, "Listing sweep candidates failed");
                kind.list_error = Some(e.to_string());
                report.kinds.push(kind);
                continue;
            },
        };

        for target in targets {
            match sweeper.delete(client, &target, cancel).await {
                Ok(()) => {
                    info!(kind = %sweeper.name(), id = %target.id, label = %target.label, "Swept");
                    kind.deleted.push(target.id);
                },
                Err(e) if e.is_not_found() => {
                    warn!(kind = %sweeper.name(), id = %target.id, "Already gone");
                    kind.missing.push(target.id);
                },
                Err(e) => {
                    error!(kind = %sweeper.name(), id = %target.id, error = %e, "Sweep failed");
                    kind.failed.push((target.id, e.to_string()));
                },
            }
        }
        report.kinds.push(kind);
    }

    Ok(report)
}
