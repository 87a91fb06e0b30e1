//! Remote resource client for the hardware-management appliance.
//!
//! The appliance exposes a resource-oriented HTTP/JSON API behind a
//! session login. This crate provides:
//!
//! - [`ResourceClient`]: authenticated read/create/update/delete against a
//!   named collection, plus the startup-progress probe
//! - [`Connector`]: produces a client bound to one appliance address
//! - [`HttpConnector`]: the reqwest implementation
//! - [`MemoryAppliance`]: an in-process simulator for tests and dry runs

pub mod error;
pub mod http;
pub mod memory;
pub mod paths;
pub mod record;
mod task;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use error::ClientError;
pub use http::{HttpClient, HttpConnector, HttpSettings};
pub use memory::{Call, CallKind, MemoryAppliance, MemoryClient};
pub use record::RemoteRecord;

/// Login credentials for the appliance.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "userName")]
    pub user_name: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user_name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Server-side selection applied to a collection read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Every member of the collection.
    All,

    /// Members whose top-level `field` equals `value` exactly.
    Eq { field: String, value: String },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn name(value: impl Into<String>) -> Self {
        Self::eq("name", value)
    }

    /// Returns true if the record satisfies this filter.
    pub fn matches(&self, record: &RemoteRecord) -> bool {
        match self {
            Self::All => true,
            Self::Eq { field, value } => record.str_field(field) == Some(value.as_str()),
        }
    }

    /// The `filter` query parameter value, if any.
    pub fn query(&self) -> Option<String> {
        match self {
            Self::All => None,
            Self::Eq { field, value } => {
                Some(format!("\"{}='{}'\"", field, value.replace('\'', "''")))
            }
        }
    }
}

/// Startup progress as reported by the appliance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub complete: u32,
    pub total: u32,
}

impl Progress {
    pub fn new(complete: u32, total: u32) -> Self {
        Self { complete, total }
    }

    /// Returns true once every startup step has finished.
    pub fn is_complete(&self) -> bool {
        self.complete >= self.total
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.complete, self.total)
    }
}

/// Authenticated access to the appliance API at one address.
///
/// The session obtained by [`ResourceClient::login`] is owned by the client
/// and replaced by every successful login.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// The appliance address this client talks to.
    fn address(&self) -> &str;

    /// Open a session. Rejected credentials yield [`ClientError::Auth`].
    async fn login(&mut self, credentials: &Credentials) -> Result<(), ClientError>;

    /// Read the members of a collection.
    async fn get(&self, collection: &str, filter: &Filter) -> Result<Vec<RemoteRecord>, ClientError>;

    /// Read an arbitrary document by path.
    async fn fetch(&self, path: &str) -> Result<Value, ClientError>;

    /// Create a member of a collection (or invoke a POST action).
    async fn create(&self, collection: &str, body: &Value) -> Result<RemoteRecord, ClientError>;

    /// Replace the resource `id` (a uri, or a key relative to `collection`).
    async fn update(&self, collection: &str, id: &str, body: &Value) -> Result<RemoteRecord, ClientError>;

    /// Remove the resource `id`; `force` asks the appliance to skip safety checks.
    async fn delete(&self, collection: &str, id: &str, force: bool) -> Result<(), ClientError>;

    /// Read a startup-progress probe.
    async fn get_progress(&self, probe: &str) -> Result<Progress, ClientError>;
}

/// Produces clients bound to an appliance address.
#[async_trait]
pub trait Connector: Send + Sync {
    type Client: ResourceClient;

    async fn connect(&self, address: &str) -> Result<Self::Client, ClientError>;
}

/// Resolve a resource id against its collection.
///
/// Ids that are already absolute uris are used verbatim.
pub fn resource_path(collection: &str, id: &str) -> String {
    if id.starts_with('/') {
        id.to_string()
    } else {
        format!("{}/{}", collection.trim_end_matches('/'), id)
    }
}
