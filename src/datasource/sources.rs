//! The lookup and list data sources built from resource schemas.

use serde_json::{json, Value};

use super::{
    computed_block, lookup_schema, FieldType, FilterConfig, ListDataSource, Lookup,
    SingularDataSource,
};
use crate::registry::Registry;
use crate::resources::{domain, domain_record, image, instance, sshkey, stackscript, user, volume};
use crate::schema::{Attribute, AttributeFlags, AttributeType, Block, Schema};

fn optional_id() -> Attribute {
    Attribute::new(AttributeType::Int64, AttributeFlags::optional_computed())
}

fn optional_text() -> Attribute {
    Attribute::new(AttributeType::String, AttributeFlags::optional_computed())
}

fn domain_source() -> SingularDataSource {
    let schema = lookup_schema(
        &domain::schema().block,
        vec![("id", optional_id()), ("domain", optional_text())],
    );
    SingularDataSource::new("linode_domain", "/domains", schema, domain::flatten)
        .with_lookup(Lookup::Get { key: "id" })
        .with_lookup(Lookup::Unique { key: "domain", field: "domain" })
}

fn domain_record_source() -> SingularDataSource {
    let schema = lookup_schema(
        &domain_record::schema().block,
        vec![
            ("domain_id", Attribute::required_int64()),
            ("id", optional_id()),
            ("name", optional_text()),
        ],
    );
    SingularDataSource::new(
        "linode_domain_record",
        "/domains/{domain_id}/records",
        schema,
        domain_record::flatten,
    )
    .with_lookup(Lookup::Get { key: "id" })
    .with_lookup(Lookup::Unique { key: "name", field: "name" })
}

fn image_source() -> SingularDataSource {
    let schema = lookup_schema(&image::schema().block, vec![("id", Attribute::required_string())]);
    SingularDataSource::new("linode_image", "/images", schema, image::flatten)
        .with_lookup(Lookup::Get { key: "id" })
}

fn images_source() -> ListDataSource {
    ListDataSource::new(
        "linode_images",
        "/images",
        "images",
        computed_block(&image::schema().block),
        FilterConfig::new()
            .api("label", FieldType::String)
            .api("is_public", FieldType::Bool)
            .api("deprecated", FieldType::Bool)
            .api("size", FieldType::Int)
            .api("vendor", FieldType::String)
            .local("created_by", FieldType::String)
            .local("description", FieldType::String)
            .local("type", FieldType::String)
            .local("id", FieldType::String),
        true,
        image::flatten,
    )
}

fn instances_source() -> ListDataSource {
    ListDataSource::new(
        "linode_instances",
        "/linode/instances",
        "instances",
        computed_block(&instance::schema().block),
        FilterConfig::new()
            .api("label", FieldType::String)
            .api("group", FieldType::String)
            .api("region", FieldType::String)
            .api("tags", FieldType::String)
            .api("type", FieldType::String)
            .api("image", FieldType::String)
            .local("id", FieldType::Int)
            .local("status", FieldType::String)
            .local("watchdog_enabled", FieldType::Bool),
        false,
        instance::flatten,
    )
}

fn networking_ip_schema() -> Schema {
    Schema::v0()
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("address", Attribute::required_string())
        .with_attribute("gateway", Attribute::computed_string())
        .with_attribute("subnet_mask", Attribute::computed_string())
        .with_attribute("prefix", Attribute::computed_int64())
        .with_attribute("type", Attribute::computed_string())
        .with_attribute("public", Attribute::computed_bool())
        .with_attribute("rdns", Attribute::computed_string())
        .with_attribute("linode_id", Attribute::computed_int64())
        .with_attribute("region", Attribute::computed_string())
}

fn networking_ip_flatten(raw: Value) -> Value {
    let mut state = super::project(&networking_ip_schema().block, raw);
    state["id"] = state["address"].clone();
    state
}

fn networking_ip_source() -> SingularDataSource {
    SingularDataSource::new(
        "linode_networking_ip",
        "/networking/ips",
        networking_ip_schema(),
        networking_ip_flatten,
    )
    .with_lookup(Lookup::Get { key: "address" })
}

fn sshkey_source() -> SingularDataSource {
    let schema = lookup_schema(
        &sshkey::schema().block,
        vec![("label", Attribute::required_string())],
    );
    SingularDataSource::new("linode_sshkey", "/profile/sshkeys", schema, sshkey::flatten)
        .with_lookup(Lookup::Unique { key: "label", field: "label" })
}

fn stackscript_source() -> SingularDataSource {
    let schema = lookup_schema(
        &stackscript::schema().block,
        vec![("id", Attribute::required_int64())],
    );
    SingularDataSource::new(
        "linode_stackscript",
        "/linode/stackscripts",
        schema,
        stackscript::flatten,
    )
    .with_lookup(Lookup::Get { key: "id" })
}

fn stackscripts_source() -> ListDataSource {
    let item = computed_block(&stackscript::schema().block)
        .with_attribute("mine", Attribute::computed_bool());
    ListDataSource::new(
        "linode_stackscripts",
        "/linode/stackscripts",
        "stackscripts",
        item,
        FilterConfig::new()
            .api("deployments_total", FieldType::Int)
            .api("description", FieldType::String)
            .api("is_public", FieldType::Bool)
            .api("label", FieldType::String)
            .local("rev_note", FieldType::String)
            .local("mine", FieldType::Bool)
            .local("deployments_active", FieldType::Int)
            .local("images", FieldType::String)
            .local("username", FieldType::String),
        true,
        stackscript_item,
    )
}

/// Like the resource flatten, keeping `mine`.
fn stackscript_item(raw: Value) -> Value {
    let mine = raw.get("mine").cloned().unwrap_or(Value::Bool(false));
    let mut state = stackscript::flatten(raw);
    state["mine"] = mine;
    state
}

fn user_source() -> SingularDataSource {
    let schema = lookup_schema(
        &user::schema().block,
        vec![("username", Attribute::required_string())],
    );
    SingularDataSource::new("linode_user", "/account/users", schema, user::flatten)
        .with_lookup(Lookup::Get { key: "username" })
}

fn volume_source() -> SingularDataSource {
    let schema = lookup_schema(&volume::schema().block, vec![("id", Attribute::required_int64())]);
    SingularDataSource::new("linode_volume", "/volumes", schema, volume::flatten)
        .with_lookup(Lookup::Get { key: "id" })
}

fn vlan_item() -> Block {
    Block::new()
        .with_attribute("label", Attribute::computed_string())
        .with_attribute("region", Attribute::computed_string())
        .with_attribute(
            "linodes",
            Attribute::new(AttributeType::list(AttributeType::Int64), AttributeFlags::computed()),
        )
        .with_attribute("created", Attribute::computed_timestamp())
}

fn vlan_flatten(raw: Value) -> Value {
    json!({
        "label": raw["label"],
        "region": raw["region"],
        "linodes": raw.get("linodes").cloned().unwrap_or_else(|| json!([])),
        "created": raw["created"],
    })
}

fn vlans_source() -> ListDataSource {
    ListDataSource::new(
        "linode_vlans",
        "/networking/vlans",
        "vlans",
        vlan_item(),
        FilterConfig::new()
            .api("label", FieldType::String)
            .api("region", FieldType::String)
            .local("linodes", FieldType::Int),
        false,
        vlan_flatten,
    )
}

/// Add every schema-derived data source to `registry`.
pub(crate) fn register(registry: Registry) -> Registry {
    registry
        .with_data_source(domain_source())
        .with_data_source(domain_record_source())
        .with_data_source(image_source())
        .with_data_source(images_source())
        .with_data_source(instances_source())
        .with_data_source(networking_ip_source())
        .with_data_source(sshkey_source())
        .with_data_source(stackscript_source())
        .with_data_source(stackscripts_source())
        .with_data_source(user_source())
        .with_data_source(volume_source())
        .with_data_source(vlans_source())
}
