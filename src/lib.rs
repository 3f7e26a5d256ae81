//! Linode provider
//!
//! This crate implements a Linode infrastructure provider for a declarative
//! infrastructure host: resource schemas, a diff engine that turns desired
//! documents into plans, and per-kind reconcilers that drive the Linode REST
//! API until the remote object matches the plan.
//!
//! # Overview
//!
//! - **Schema types**: attributes, nested blocks and validators per kind
//! - **Diff engine**: plans with force-new, computed and sensitive handling
//! - **Cloud client**: paginated, filtered, retrying REST access
//! - **Resources and data sources**: sixteen resource kinds plus lookups
//! - **ProviderService trait**: the operation set a host adapter drives
//! - **Sweepers**: prefix-based cleanup of test objects
//! - **Logging**: Integration with `tracing` for structured logging
//!
//! # Quick Start
//!
//! ```ignore
//! use linode_provider::{LinodeProvider, ProviderService};
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = LinodeProvider::new();
//!     provider.configure(json!({"token": "..."})).await?;
//!
//!     let desired = json!({"label": "laptop", "ssh_key": "ssh-ed25519 AAAA..."});
//!     let plan = provider.plan("linode_sshkey", None, desired.clone()).await?;
//!     println!("{}", plan.render());
//!
//!     let state = provider
//!         .create("linode_sshkey", desired, &CancellationToken::new())
//!         .await?;
//!     println!("created {}", state["id"]);
//!     Ok(())
//! }
//! ```
//!
//! # Operations
//!
//! [`ProviderService`] mirrors the host protocol calls:
//!
//! - **GetSchema / GetMetadata**: provider config, resource and data source schemas
//! - **ValidateProviderConfig / Configure**: one-time client construction
//! - **Stop**: cancels every in-flight operation
//! - **ValidateResourceConfig / Plan / Apply / Read / Import**: resource lifecycle
//! - **ValidateDataSourceConfig / ReadDataSource**: lookups and filtered lists

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod datasource;
pub mod diff;
pub mod engine;
pub mod error;
pub mod logging;
pub mod provider;
pub mod registry;
pub mod resources;
pub mod retry;
pub mod schema;
pub mod service;
pub mod sweeper;
pub mod testing;
pub mod types;
pub mod validation;
pub mod waiter;

// Re-export main types at crate root
pub use client::{
    ApiFilter, ApiRequest, ApiResponse, Client, ClientError, HttpTransport, Method, Transport,
};
pub use config::ProviderConfig;
pub use diff::Plan;
pub use engine::Engine;
pub use error::{ApplyError, ProviderError};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::LinodeProvider;
pub use registry::{OpContext, Registry, Resource};
pub use schema::ProviderSchema;
pub use service::ProviderService;
pub use types::{ImportedResource, ProviderMetadata};
pub use validation::{is_valid, validate, validate_result};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
