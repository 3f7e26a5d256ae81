//! Plan computation.
//!
//! [`plan`] compares prior state with a desired configuration under each
//! attribute's declared equality and produces a [`Plan`]: an ordered list of
//! `(path, old, new, action)` entries plus the state the host should expect
//! after apply. Whether a change forces replacement is decided here and only
//! here.
//!
//! Equality rules:
//!
//! - a missing or null value equals the type's zero value
//! - `diff_suppress` overrides apply before structural comparison
//! - sets (scalar or block) compare as multisets
//! - a redacted prior value of a sensitive attribute equals anything
//! - optional+computed attributes the user left unset are not compared

use std::fmt::{self, Write as _};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ProviderError;
use crate::schema::{
    Attribute, AttributeType, Block, BlockNestingMode, DiffSuppress, NestedBlock, Schema,
};
use crate::types::{parse_timestamp, REDACTED};
use crate::validation::{as_i64, join_path, resolve_desired, validate};

/// Seconds values the Domains API accepts for TTL, refresh, retry and expire.
pub const DOMAIN_SECONDS_ACCEPTED: [i64; 12] = [
    300, 3600, 7200, 14400, 28800, 57600, 86400, 172800, 345600, 604800, 1209600, 2419200,
];

/// What applying an entry will do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanAction {
    /// Unchanged.
    Noop,
    /// Changed in place.
    Update,
    /// Changed and requires destroy-then-create.
    ForceNew,
    /// Filled in by the server; unknown until apply.
    Computed,
    /// Removed along with the resource.
    Destroy,
}

/// A value as shown in a plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum PlanValue {
    /// No value.
    Absent,
    /// A known value. Sensitive parts of nested blocks are already redacted.
    Known(Value),
    /// Known only after apply.
    Unknown,
    /// A sensitive value that must not be shown.
    Sensitive,
}

impl PlanValue {
    fn of(value: Option<&Value>, sensitive: bool) -> Self {
        match value {
            None | Some(Value::Null) => Self::Absent,
            Some(_) if sensitive => Self::Sensitive,
            Some(v) => Self::Known(v.clone()),
        }
    }

    fn of_block(block: &Block, value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Self::Absent,
            Some(v) => Self::Known(redact_block(block, v)),
        }
    }
}

impl fmt::Display for PlanValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("null"),
            Self::Known(v) => write!(f, "{}", v),
            Self::Unknown => f.write_str("(known after apply)"),
            Self::Sensitive => f.write_str("(sensitive value)"),
        }
    }
}

/// One row of a plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanEntry {
    /// Dotted attribute path, e.g. `inbound.0.ports`.
    pub path: String,
    /// The prior value.
    pub old: PlanValue,
    /// The planned value.
    pub new: PlanValue,
    /// What applying this entry does.
    pub action: PlanAction,
}

/// The result of comparing prior state with desired configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    /// Plan rows in schema order.
    pub entries: Vec<PlanEntry>,
    /// Whether the resource must be destroyed and recreated.
    pub requires_replace: bool,
    /// The state expected after apply; unknown computed values are absent.
    pub planned_state: Value,
}

impl Plan {
    /// Whether applying this plan changes nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.action == PlanAction::Noop)
    }

    /// Entries that change something.
    pub fn changes(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|e| e.action != PlanAction::Noop)
    }

    /// Whether the attribute or anything below it changes.
    pub fn has_change(&self, name: &str) -> bool {
        self.changes().any(|e| {
            e.path == name
                || e
                    .path
                    .strip_prefix(name)
                    .is_some_and(|rest| rest.starts_with('.'))
        })
    }

    /// Human-readable diff. Sensitive values are never printed.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in self.changes() {
            let marker = match entry.action {
                PlanAction::Update => "~",
                PlanAction::ForceNew => "-/+",
                PlanAction::Computed => "+",
                PlanAction::Destroy => "-",
                PlanAction::Noop => " ",
            };
            let _ = write!(out, "{} {}: {} => {}", marker, entry.path, entry.old, entry.new);
            if entry.action == PlanAction::ForceNew {
                out.push_str(" # forces replacement");
            }
            out.push('\n');
        }
        if out.is_empty() {
            out.push_str("No changes.\n");
        }
        out
    }

    /// A plan that destroys the resource.
    pub fn destroy(schema: &Schema, prior: &Value) -> Self {
        let mut entries = Vec::new();
        for (name, attr) in &schema.block.attributes {
            if let Some(v) = prior.get(name).filter(|v| !v.is_null()) {
                entries.push(PlanEntry {
                    path: name.clone(),
                    old: PlanValue::of(Some(v), attr.flags.sensitive),
                    new: PlanValue::Absent,
                    action: PlanAction::Destroy,
                });
            }
        }
        Self {
            entries,
            requires_replace: false,
            planned_state: Value::Null,
        }
    }
}

/// Compute the plan for moving `prior` (None when creating) to `desired`.
///
/// Fails with [`ProviderError::Validation`] before comparing anything when
/// the desired document does not satisfy the schema.
pub fn plan(
    schema: &Schema,
    prior: Option<&Value>,
    desired: &Value,
) -> Result<Plan, ProviderError> {
    let errors: Vec<_> = validate(schema, desired)
        .into_iter()
        .filter(|d| d.is_error())
        .collect();
    if !errors.is_empty() {
        return Err(ProviderError::Validation(errors));
    }

    let mut resolved = resolve_desired(schema, desired);
    canonicalize_block(&schema.block, &mut resolved);

    Ok(match prior.filter(|p| !p.is_null()) {
        None => plan_create(schema, resolved),
        Some(prior) => plan_update(schema, prior, resolved),
    })
}

fn plan_create(schema: &Schema, resolved: Value) -> Plan {
    let mut entries = Vec::new();
    let block = &schema.block;

    for (name, attr) in &block.attributes {
        match resolved.get(name).filter(|v| !v.is_null()) {
            Some(v) => entries.push(PlanEntry {
                path: name.clone(),
                old: PlanValue::Absent,
                new: PlanValue::of(Some(v), attr.flags.sensitive),
                action: PlanAction::Update,
            }),
            None if attr.flags.computed => entries.push(computed_entry(name)),
            None => {},
        }
    }

    for (name, nested) in &block.blocks {
        if nested.computed {
            entries.push(computed_entry(name));
            continue;
        }
        let value = resolved.get(name);
        if !elements(value).is_empty() {
            entries.push(PlanEntry {
                path: name.clone(),
                old: PlanValue::Absent,
                new: PlanValue::of_block(&nested.block, value),
                action: PlanAction::Update,
            });
        }
    }

    Plan {
        entries,
        requires_replace: false,
        planned_state: resolved,
    }
}

fn plan_update(schema: &Schema, prior: &Value, resolved: Value) -> Plan {
    let mut diff = Diff::default();
    diff_block(&schema.block, prior, &resolved, "", false, &mut diff);

    if let Some(index) = diff.forcing {
        let mut entry = diff.entries.swap_remove(index);
        entry.action = PlanAction::ForceNew;
        return Plan {
            entries: vec![entry],
            requires_replace: true,
            planned_state: resolved,
        };
    }

    Plan {
        entries: diff.entries,
        requires_replace: false,
        planned_state: merge_block(&schema.block, prior, &resolved),
    }
}

fn computed_entry(name: &str) -> PlanEntry {
    PlanEntry {
        path: name.to_string(),
        old: PlanValue::Absent,
        new: PlanValue::Unknown,
        action: PlanAction::Computed,
    }
}

#[derive(Default)]
struct Diff {
    entries: Vec<PlanEntry>,
    forcing: Option<usize>,
}

impl Diff {
    fn push(&mut self, entry: PlanEntry, forces_new: bool) {
        if forces_new && entry.action != PlanAction::Noop && self.forcing.is_none() {
            self.forcing = Some(self.entries.len());
        }
        self.entries.push(entry);
    }
}

fn diff_block(
    block: &Block,
    prior: &Value,
    desired: &Value,
    base: &str,
    forced: bool,
    diff: &mut Diff,
) {
    let top_level = base.is_empty();

    for (name, attr) in &block.attributes {
        if attr.flags.is_computed_only() {
            continue;
        }
        let new = desired.get(name).filter(|v| !v.is_null());
        if new.is_none() && attr.flags.computed {
            continue;
        }
        let old = prior.get(name);
        let equal = attribute_equal(attr, old, new);
        if equal && !top_level {
            continue;
        }
        diff.push(
            PlanEntry {
                path: join_path(base, name),
                old: PlanValue::of(old, attr.flags.sensitive),
                new: PlanValue::of(new, attr.flags.sensitive),
                action: if equal {
                    PlanAction::Noop
                } else {
                    PlanAction::Update
                },
            },
            forced || attr.force_new,
        );
    }

    for (name, nested) in &block.blocks {
        if nested.computed {
            continue;
        }
        let path = join_path(base, name);
        let before = diff.entries.len();
        diff_nested(
            nested,
            prior.get(name),
            desired.get(name),
            &path,
            forced || nested.force_new,
            diff,
        );
        if top_level && diff.entries.len() == before {
            diff.push(
                PlanEntry {
                    path,
                    old: PlanValue::of_block(&nested.block, prior.get(name)),
                    new: PlanValue::of_block(&nested.block, desired.get(name)),
                    action: PlanAction::Noop,
                },
                false,
            );
        }
    }
}

fn diff_nested(
    nested: &NestedBlock,
    prior: Option<&Value>,
    desired: Option<&Value>,
    path: &str,
    forced: bool,
    diff: &mut Diff,
) {
    let old = elements(prior);
    let new = elements(desired);

    let element_change = |diff: &mut Diff, path: String, o: Option<&Value>, n: Option<&Value>| {
        diff.push(
            PlanEntry {
                path,
                old: PlanValue::of_block(&nested.block, o),
                new: PlanValue::of_block(&nested.block, n),
                action: PlanAction::Update,
            },
            forced,
        );
    };

    match nested.nesting_mode {
        BlockNestingMode::Single => match (old.first(), new.first()) {
            (Some(o), Some(n)) => diff_block(&nested.block, o, n, path, forced, diff),
            (None, None) => {},
            (o, n) => element_change(diff, path.to_string(), o.copied(), n.copied()),
        },
        BlockNestingMode::List => {
            for i in 0..old.len().max(new.len()) {
                let item_path = format!("{}.{}", path, i);
                match (old.get(i), new.get(i)) {
                    (Some(o), Some(n)) => diff_block(&nested.block, o, n, &item_path, forced, diff),
                    (o, n) => element_change(diff, item_path, o.copied(), n.copied()),
                }
            }
        },
        BlockNestingMode::Set => {
            for pair in match_set_elements(nested, &old, &new) {
                match pair {
                    (Some(i), Some(j)) => {
                        let item_path = format!("{}.{}", path, j);
                        diff_block(&nested.block, old[i], new[j], &item_path, forced, diff);
                    },
                    (None, Some(j)) => {
                        element_change(diff, format!("{}.{}", path, j), None, Some(new[j]))
                    },
                    (Some(i), None) => {
                        element_change(diff, format!("{}.{}", path, i), Some(old[i]), None)
                    },
                    (None, None) => {},
                }
            }
        },
    }
}

/// Pair prior and desired set elements.
///
/// Identical elements pair first; then, when the block declares a primary
/// key, elements with equal keys pair at minimum attribute-difference cost;
/// otherwise the remainder pairs positionally in canonical order.
fn match_set_elements(
    nested: &NestedBlock,
    prior: &[&Value],
    desired: &[&Value],
) -> Vec<(Option<usize>, Option<usize>)> {
    let mut prior_used = vec![false; prior.len()];
    let mut pairs: Vec<(Option<usize>, Option<usize>)> = Vec::new();
    let mut pending = Vec::new();

    for (j, d) in desired.iter().enumerate() {
        let exact = (0..prior.len())
            .find(|&i| !prior_used[i] && block_cost(&nested.block, prior[i], d) == 0);
        match exact {
            Some(i) => {
                prior_used[i] = true;
                pairs.push((Some(i), Some(j)));
            },
            None => pending.push(j),
        }
    }

    let mut unmatched = Vec::new();
    if nested.primary_key.is_empty() {
        let free: Vec<usize> = (0..prior.len()).filter(|&i| !prior_used[i]).collect();
        let mut free = free.into_iter();
        for j in pending {
            match free.next() {
                Some(i) => {
                    prior_used[i] = true;
                    pairs.push((Some(i), Some(j)));
                },
                None => unmatched.push(j),
            }
        }
    } else {
        for j in pending {
            let best = (0..prior.len())
                .filter(|&i| !prior_used[i] && same_key(nested, prior[i], desired[j]))
                .min_by_key(|&i| block_cost(&nested.block, prior[i], desired[j]));
            match best {
                Some(i) => {
                    prior_used[i] = true;
                    pairs.push((Some(i), Some(j)));
                },
                None => unmatched.push(j),
            }
        }
    }

    pairs.extend(unmatched.into_iter().map(|j| (None, Some(j))));
    pairs.sort_by_key(|(_, j)| *j);
    pairs.extend(
        prior_used
            .iter()
            .enumerate()
            .filter(|(_, used)| !**used)
            .map(|(i, _)| (Some(i), None)),
    );
    pairs
}

fn same_key(nested: &NestedBlock, a: &Value, b: &Value) -> bool {
    nested.primary_key.iter().all(|key| match nested.block.attributes.get(key) {
        Some(attr) => attribute_equal(attr, a.get(key), b.get(key)),
        None => a.get(key) == b.get(key),
    })
}

/// Number of attributes and nested blocks that differ between two elements.
fn block_cost(block: &Block, prior: &Value, desired: &Value) -> usize {
    let attrs = block
        .attributes
        .iter()
        .filter(|(_, attr)| !attr.flags.is_computed_only())
        .filter(|(name, attr)| {
            let new = desired.get(name.as_str()).filter(|v| !v.is_null());
            !(new.is_none() && attr.flags.computed)
                && !attribute_equal(attr, prior.get(name.as_str()), new)
        })
        .count();
    let blocks = block
        .blocks
        .iter()
        .filter(|(_, nested)| !nested.computed)
        .filter(|(name, nested)| {
            !nested_equal(nested, prior.get(name.as_str()), desired.get(name.as_str()))
        })
        .count();
    attrs + blocks
}

fn nested_equal(nested: &NestedBlock, prior: Option<&Value>, desired: Option<&Value>) -> bool {
    let old = elements(prior);
    let new = elements(desired);
    if old.len() != new.len() {
        return false;
    }
    match nested.nesting_mode {
        BlockNestingMode::Set => {
            let mut used = vec![false; old.len()];
            new.iter().all(|n| {
                let exact = (0..old.len())
                    .find(|&i| !used[i] && block_cost(&nested.block, old[i], n) == 0);
                match exact {
                    Some(i) => {
                        used[i] = true;
                        true
                    },
                    None => false,
                }
            })
        },
        _ => old
            .iter()
            .zip(&new)
            .all(|(o, n)| block_cost(&nested.block, o, n) == 0),
    }
}

fn elements(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().filter(|v| !v.is_null()).collect(),
        Some(other) => vec![other],
    }
}

/// Compare two values of an attribute under its declared equality.
pub fn attribute_equal(attr: &Attribute, old: Option<&Value>, new: Option<&Value>) -> bool {
    let zero = attr.attr_type.zero_value();
    let old = old.filter(|v| !v.is_null()).unwrap_or(&zero);
    let new = new.filter(|v| !v.is_null()).unwrap_or(&zero);

    if attr.flags.sensitive && old.as_str() == Some(REDACTED) {
        return true;
    }
    if let Some(kind) = attr.diff_suppress {
        if suppressed(kind, old, new) {
            return true;
        }
    }
    typed_equal(&attr.attr_type, old, new)
}

fn typed_equal(ty: &AttributeType, a: &Value, b: &Value) -> bool {
    match ty {
        AttributeType::Int64 => match (as_i64(a), as_i64(b)) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        AttributeType::Float64 => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        AttributeType::Timestamp => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) if x == y => true,
            (Some(x), Some(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
                (Some(p), Some(q)) => p == q,
                _ => false,
            },
            _ => a == b,
        },
        AttributeType::List(elem) => match (a.as_array(), b.as_array()) {
            (Some(x), Some(y)) => {
                x.len() == y.len() && x.iter().zip(y).all(|(p, q)| typed_equal(elem, p, q))
            },
            _ => a == b,
        },
        AttributeType::Set(elem) => match (a.as_array(), b.as_array()) {
            (Some(x), Some(y)) => multiset_equal(elem, x, y),
            _ => a == b,
        },
        AttributeType::Map(elem) => match (a.as_object(), b.as_object()) {
            (Some(x), Some(y)) => {
                x.len() == y.len()
                    && x
                        .iter()
                        .all(|(k, v)| y.get(k).is_some_and(|w| typed_equal(elem, v, w)))
            },
            _ => a == b,
        },
        AttributeType::String | AttributeType::Bool => a == b,
    }
}

fn multiset_equal(elem: &AttributeType, x: &[Value], y: &[Value]) -> bool {
    if x.len() != y.len() {
        return false;
    }
    let mut used = vec![false; y.len()];
    for p in x {
        match (0..y.len()).find(|&i| !used[i] && typed_equal(elem, p, &y[i])) {
            Some(i) => used[i] = true,
            None => return false,
        }
    }
    true
}

fn suppressed(kind: DiffSuppress, old: &Value, new: &Value) -> bool {
    if kind == DiffSuppress::DomainSeconds {
        return match (as_i64(old), as_i64(new)) {
            (Some(a), Some(b)) => round_domain_seconds(a) == round_domain_seconds(b),
            _ => false,
        };
    }
    let (Some(a), Some(b)) = (old.as_str(), new.as_str()) else {
        return false;
    };
    match kind {
        DiffSuppress::CaseInsensitive => a.to_lowercase() == b.to_lowercase(),
        DiffSuppress::CanonicalJson => {
            match (serde_json::from_str::<Value>(a), serde_json::from_str::<Value>(b)) {
                (Ok(x), Ok(y)) => x == y,
                _ => false,
            }
        },
        DiffSuppress::CommaSeparatedSet => comma_set(a) == comma_set(b),
        DiffSuppress::TrailingDot => a.trim_end_matches('.') == b.trim_end_matches('.'),
        DiffSuppress::DomainSeconds => false,
    }
}

fn comma_set(s: &str) -> Vec<&str> {
    let mut items: Vec<_> = s.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
    items.sort_unstable();
    items.dedup();
    items
}

/// Round a seconds value up to the nearest value the Domains API accepts.
///
/// Zero (unset) stays zero; anything above the largest accepted value caps.
pub fn round_domain_seconds(seconds: i64) -> i64 {
    if seconds <= 0 {
        return 0;
    }
    DOMAIN_SECONDS_ACCEPTED
        .iter()
        .copied()
        .find(|&accepted| seconds <= accepted)
        .unwrap_or(DOMAIN_SECONDS_ACCEPTED[DOMAIN_SECONDS_ACCEPTED.len() - 1])
}

/// Sort set-typed values so plans do not depend on input order.
fn canonicalize_block(block: &Block, value: &mut Value) {
    let Some(map) = value.as_object_mut() else {
        return;
    };
    for (name, attr) in &block.attributes {
        if let (AttributeType::Set(_), Some(Value::Array(items))) =
            (&attr.attr_type, map.get_mut(name))
        {
            items.sort_by_cached_key(canonical_key);
        }
    }
    for (name, nested) in &block.blocks {
        match map.get_mut(name) {
            Some(Value::Array(items)) => {
                for item in items.iter_mut() {
                    canonicalize_block(&nested.block, item);
                }
                if nested.nesting_mode == BlockNestingMode::Set {
                    items.sort_by_cached_key(canonical_key);
                }
            },
            Some(item @ Value::Object(_)) => canonicalize_block(&nested.block, item),
            _ => {},
        }
    }
}

fn canonical_key(value: &Value) -> String {
    value.to_string()
}

/// Planned state for an in-place update: prior state overlaid with the desired
/// configuration, keeping computed values the configuration does not set.
fn merge_block(block: &Block, prior: &Value, desired: &Value) -> Value {
    let mut out = prior.as_object().cloned().unwrap_or_default();
    let Some(desired) = desired.as_object() else {
        return Value::Object(out);
    };

    for (key, value) in desired {
        if let Some(attr) = block.attributes.get(key) {
            if attr.flags.is_computed_only() || (value.is_null() && attr.flags.computed) {
                continue;
            }
        }
        if let Some(nested) = block.blocks.get(key) {
            if nested.computed {
                continue;
            }
            let merged = merge_nested(nested, prior.get(key), value);
            out.insert(key.clone(), merged);
            continue;
        }
        out.insert(key.clone(), value.clone());
    }
    Value::Object(out)
}

fn merge_nested(nested: &NestedBlock, prior: Option<&Value>, desired: &Value) -> Value {
    let old = elements(prior);
    let new = elements(Some(desired));
    match nested.nesting_mode {
        BlockNestingMode::Single => match (old.first(), new.first()) {
            (_, None) => Value::Null,
            (Some(o), Some(n)) => merge_block(&nested.block, o, n),
            (None, Some(n)) => (*n).clone(),
        },
        BlockNestingMode::List => Value::Array(
            new.iter()
                .enumerate()
                .map(|(i, n)| match old.get(i) {
                    Some(o) => merge_block(&nested.block, o, n),
                    None => (*n).clone(),
                })
                .collect(),
        ),
        BlockNestingMode::Set => {
            let mut merged: Vec<Value> = new.iter().map(|n| (*n).clone()).collect();
            for pair in match_set_elements(nested, &old, &new) {
                if let (Some(i), Some(j)) = pair {
                    merged[j] = merge_block(&nested.block, old[i], new[j]);
                }
            }
            Value::Array(merged)
        },
    }
}

/// Replace every sensitive value in a state document with [`REDACTED`].
pub fn redact_state(schema: &Schema, state: &Value) -> Value {
    redact_block(&schema.block, state)
}

fn redact_block(block: &Block, value: &Value) -> Value {
    let Some(map) = value.as_object() else {
        return value.clone();
    };
    let mut out = Map::with_capacity(map.len());
    for (key, v) in map {
        let redacted = if let Some(attr) = block.attributes.get(key) {
            if attr.flags.sensitive && !v.is_null() {
                Value::String(REDACTED.to_string())
            } else {
                v.clone()
            }
        } else if let Some(nested) = block.blocks.get(key) {
            match v {
                Value::Array(items) => Value::Array(
                    items.iter().map(|item| redact_block(&nested.block, item)).collect(),
                ),
                other => redact_block(&nested.block, other),
            }
        } else {
            v.clone()
        };
        out.insert(key.clone(), redacted);
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Validator};
    use serde_json::json;

    fn volume_schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("label", Attribute::required_string())
            .with_attribute("region", Attribute::required_string().with_force_new())
            .with_attribute(
                "size",
                Attribute::optional_int64()
                    .computed_when_unset()
                    .with_validator(Validator::int_at_least(10)),
            )
            .with_attribute("status", Attribute::computed_string())
            .with_attribute("tags", Attribute::string_set())
    }

    fn firewall_schema() -> Schema {
        let rule = Block::new()
            .with_attribute("label", Attribute::required_string())
            .with_attribute("protocol", Attribute::required_string())
            .with_attribute(
                "ports",
                Attribute::optional_string().with_diff_suppress(DiffSuppress::CommaSeparatedSet),
            )
            .with_attribute("ipv4", Attribute::string_list());
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("label", Attribute::required_string())
            .with_attribute("root_pass", Attribute::optional_string().sensitive())
            .with_block("inbound", NestedBlock::list(rule))
            .with_block(
                "devices",
                NestedBlock::list(Block::new().with_attribute("id", Attribute::computed_int64()))
                    .computed(),
            )
    }

    fn key_schema() -> Schema {
        Schema::v0()
            .with_attribute("label", Attribute::required_string())
            .with_block(
                "bucket_access",
                NestedBlock::set(
                    Block::new()
                        .with_attribute("bucket_name", Attribute::required_string())
                        .with_attribute("cluster", Attribute::required_string())
                        .with_attribute("permissions", Attribute::required_string()),
                )
                .with_force_new()
                .with_primary_key(["bucket_name", "cluster"]),
            )
    }

    #[test]
    fn test_plan_create_marks_computed_unknown() {
        let plan = plan(
            &volume_schema(),
            None,
            &json!({"label": "data", "region": "us-east"}),
        )
        .unwrap();

        assert!(!plan.requires_replace);
        let computed: Vec<_> = plan
            .entries
            .iter()
            .filter(|e| e.action == PlanAction::Computed)
            .map(|e| e.path.as_str())
            .collect();
        assert_eq!(computed, vec!["id", "size", "status"]);
        assert_eq!(plan.planned_state["tags"], json!([]));
        assert!(plan.planned_state.get("size").is_none());
    }

    #[test]
    fn test_plan_empty_when_equal() {
        let prior = json!({
            "id": "7", "label": "data", "region": "us-east", "size": 20,
            "status": "active", "tags": ["a", "b"]
        });
        let plan = plan(
            &volume_schema(),
            Some(&prior),
            &json!({"label": "data", "region": "us-east", "tags": ["b", "a"]}),
        )
        .unwrap();
        assert!(plan.is_empty(), "{}", plan.render());
        assert_eq!(plan.render(), "No changes.\n");
        assert_eq!(plan.planned_state["size"], 20);
        assert_eq!(plan.planned_state["status"], "active");
    }

    #[test]
    fn test_plan_update_in_place() {
        let prior = json!({"id": "7", "label": "data", "region": "us-east", "size": 20, "tags": []});
        let plan = plan(
            &volume_schema(),
            Some(&prior),
            &json!({"label": "logs", "region": "us-east", "size": 30}),
        )
        .unwrap();

        assert!(!plan.requires_replace);
        assert!(plan.has_change("label"));
        assert!(plan.has_change("size"));
        assert!(!plan.has_change("region"));
        assert_eq!(plan.planned_state["id"], "7");
        assert_eq!(plan.planned_state["label"], "logs");
    }

    #[test]
    fn test_force_new_short_circuits() {
        let prior = json!({"id": "7", "label": "data", "region": "us-east", "size": 20, "tags": []});
        let plan = plan(
            &volume_schema(),
            Some(&prior),
            &json!({"label": "logs", "region": "eu-west"}),
        )
        .unwrap();

        assert!(plan.requires_replace);
        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].path, "region");
        assert_eq!(plan.entries[0].action, PlanAction::ForceNew);
        assert!(plan.render().contains("forces replacement"));
    }

    #[test]
    fn test_unset_optional_computed_keeps_server_value() {
        let prior = json!({"id": "7", "label": "data", "region": "us-east", "size": 40, "tags": []});
        let plan = plan(
            &volume_schema(),
            Some(&prior),
            &json!({"label": "data", "region": "us-east"}),
        )
        .unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.planned_state["size"], 40);
    }

    #[test]
    fn test_validation_fails_fast() {
        let err = plan(
            &volume_schema(),
            None,
            &json!({"label": "data", "region": "us-east", "size": 5}),
        )
        .unwrap_err();
        match err {
            ProviderError::Validation(diags) => {
                assert_eq!(diags[0].attribute.as_deref(), Some("size"))
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_list_block_diff_paths() {
        let prior = json!({
            "id": "1", "label": "fw", "root_pass": "[REDACTED]",
            "inbound": [{"label": "http", "protocol": "TCP", "ports": "80", "ipv4": ["0.0.0.0/0"]}],
            "devices": [{"id": 5}]
        });
        let desired = json!({
            "label": "fw",
            "root_pass": "hunter2",
            "inbound": [
                {"label": "http", "protocol": "TCP", "ports": "80", "ipv4": ["0.0.0.0/0"]},
                {"label": "https", "protocol": "TCP", "ports": "443", "ipv4": ["0.0.0.0/0"]}
            ]
        });
        let plan = plan(&firewall_schema(), Some(&prior), &desired).unwrap();
        let changed: Vec<_> = plan.changes().map(|e| e.path.as_str()).collect();
        assert_eq!(changed, vec!["inbound.1"]);
        assert_eq!(plan.planned_state["devices"], json!([{"id": 5}]));
    }

    #[test]
    fn test_comma_separated_ports_suppressed() {
        let prior = json!({
            "id": "1", "label": "fw",
            "inbound": [{"label": "web", "protocol": "TCP", "ports": "80,443", "ipv4": []}]
        });
        let desired = json!({
            "label": "fw",
            "inbound": [{"label": "web", "protocol": "TCP", "ports": "443, 80"}]
        });
        assert!(plan(&firewall_schema(), Some(&prior), &desired).unwrap().is_empty());
    }

    #[test]
    fn test_sensitive_values_never_rendered() {
        let prior = json!({"id": "1", "label": "fw", "root_pass": "old-secret", "inbound": []});
        let desired = json!({"label": "fw", "root_pass": "new-secret"});
        let plan = plan(&firewall_schema(), Some(&prior), &desired).unwrap();
        let rendered = plan.render();
        assert!(plan.has_change("root_pass"));
        assert!(!rendered.contains("old-secret"));
        assert!(!rendered.contains("new-secret"));
        assert!(rendered.contains("(sensitive value)"));

        let created = super::plan(&firewall_schema(), None, &desired).unwrap();
        assert!(!created.render().contains("new-secret"));
    }

    #[test]
    fn test_set_block_primary_key_matching() {
        let prior = json!({
            "label": "k",
            "bucket_access": [
                {"bucket_name": "a", "cluster": "us-east-1", "permissions": "read_only"},
                {"bucket_name": "b", "cluster": "us-east-1", "permissions": "read_write"}
            ]
        });
        let reordered = json!({
            "label": "k",
            "bucket_access": [
                {"bucket_name": "b", "cluster": "us-east-1", "permissions": "read_write"},
                {"bucket_name": "a", "cluster": "us-east-1", "permissions": "read_only"}
            ]
        });
        assert!(plan(&key_schema(), Some(&prior), &reordered).unwrap().is_empty());

        let changed = json!({
            "label": "k",
            "bucket_access": [
                {"bucket_name": "b", "cluster": "us-east-1", "permissions": "read_write"},
                {"bucket_name": "a", "cluster": "us-east-1", "permissions": "read_write"}
            ]
        });
        let plan = plan(&key_schema(), Some(&prior), &changed).unwrap();
        assert!(plan.requires_replace);
        assert_eq!(plan.entries[0].path, "bucket_access.0.permissions");
    }

    #[test]
    fn test_set_block_without_key_pairs_leftovers() {
        let schema = Schema::v0().with_block(
            "allow",
            NestedBlock::set(Block::new().with_attribute("cidr", Attribute::required_string())),
        );
        let prior = json!({"allow": [{"cidr": "10.0.0.0/8"}, {"cidr": "192.0.2.0/24"}]});
        let desired = json!({"allow": [{"cidr": "198.51.100.0/24"}, {"cidr": "10.0.0.0/8"}]});

        let plan = plan(&schema, Some(&prior), &desired).unwrap();
        let changes: Vec<_> = plan.changes().collect();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].path.starts_with("allow.") && changes[0].path.ends_with(".cidr"));
        assert_eq!(changes[0].old, PlanValue::of(Some(&json!("192.0.2.0/24")), false));
        assert_eq!(changes[0].new, PlanValue::of(Some(&json!("198.51.100.0/24")), false));

        let grown = json!({
            "allow": [{"cidr": "10.0.0.0/8"}, {"cidr": "192.0.2.0/24"}, {"cidr": "203.0.113.0/24"}]
        });
        let plan = super::plan(&schema, Some(&prior), &grown).unwrap();
        assert_eq!(plan.changes().count(), 1);
        assert_eq!(plan.changes().next().unwrap().old, PlanValue::Absent);
    }

    #[test]
    fn test_set_plan_stable_under_permutation() {
        let prior = json!({"id": "7", "label": "data", "region": "us-east", "tags": ["x"]});
        let a = plan(
            &volume_schema(),
            Some(&prior),
            &json!({"label": "data", "region": "us-east", "tags": ["b", "a", "c"]}),
        )
        .unwrap();
        let b = plan(
            &volume_schema(),
            Some(&prior),
            &json!({"label": "data", "region": "us-east", "tags": ["c", "b", "a"]}),
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_domain_seconds_rounding() {
        assert_eq!(round_domain_seconds(0), 0);
        assert_eq!(round_domain_seconds(1), 300);
        assert_eq!(round_domain_seconds(300), 300);
        assert_eq!(round_domain_seconds(301), 3600);
        assert_eq!(round_domain_seconds(90000), 172800);
        assert_eq!(round_domain_seconds(9_999_999), 2419200);

        let attr = Attribute::optional_int64().with_diff_suppress(DiffSuppress::DomainSeconds);
        assert!(attribute_equal(&attr, Some(&json!(3600)), Some(&json!(3000))));
        assert!(!attribute_equal(&attr, Some(&json!(3600)), Some(&json!(7000))));
        assert!(!attribute_equal(&attr, Some(&json!(300)), Some(&json!(3000))));
    }

    #[test]
    fn test_attribute_equality_rules() {
        let ts = Attribute::new(AttributeType::Timestamp, crate::schema::AttributeFlags::optional());
        assert!(attribute_equal(
            &ts,
            Some(&json!("2030-01-01T00:00:00")),
            Some(&json!("2030-01-01T01:00:00+01:00"))
        ));

        let ci = Attribute::optional_string().with_diff_suppress(DiffSuppress::CaseInsensitive);
        assert!(attribute_equal(&ci, Some(&json!("Example.COM")), Some(&json!("example.com"))));

        let js = Attribute::optional_string().with_diff_suppress(DiffSuppress::CanonicalJson);
        assert!(attribute_equal(&js, Some(&json!("{\"a\":1,\"b\":2}")), Some(&json!("{ \"b\": 2, \"a\": 1 }"))));

        let dot = Attribute::optional_string().with_diff_suppress(DiffSuppress::TrailingDot);
        assert!(attribute_equal(&dot, Some(&json!("mail.example.com.")), Some(&json!("mail.example.com"))));

        let group = Attribute::optional_string();
        assert!(attribute_equal(&group, None, Some(&json!(""))));
        assert!(!attribute_equal(&group, None, Some(&json!("web"))));

        let ints = Attribute::new(
            AttributeType::set(AttributeType::Int64),
            crate::schema::AttributeFlags::optional(),
        );
        assert!(attribute_equal(&ints, Some(&json!([1, 2, 2])), Some(&json!([2, 1, 2.0]))));
        assert!(!attribute_equal(&ints, Some(&json!([1, 2, 2])), Some(&json!([1, 1, 2]))));
    }

    #[test]
    fn test_redact_state() {
        let state = json!({"id": "1", "label": "fw", "root_pass": "secret", "inbound": []});
        let redacted = redact_state(&firewall_schema(), &state);
        assert_eq!(redacted["root_pass"], REDACTED);
        assert_eq!(redacted["label"], "fw");
    }

    #[test]
    fn test_destroy_plan() {
        let prior = json!({"id": "1", "label": "fw", "root_pass": "secret"});
        let plan = Plan::destroy(&firewall_schema(), &prior);
        assert!(plan.planned_state.is_null());
        assert!(!plan.render().contains("secret"));
        assert!(plan.has_change("label"));
        assert!(plan.changes().all(|e| e.action == PlanAction::Destroy));
        assert!(plan.render().lines().all(|l| l.starts_with("- ")));
    }
}
