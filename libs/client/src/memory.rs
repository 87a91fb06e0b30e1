//! In-process appliance simulator.
//!
//! `MemoryAppliance` keeps collections, users, EULA and startup state in
//! memory and hands out [`MemoryClient`]s that behave like the HTTP client
//! for every endpoint the reconciliation and bootstrap workflows use.
//! Every call is recorded so tests can assert on exactly which mutations
//! were issued.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::ClientError;
use crate::record::RemoteRecord;
use crate::{paths, resource_path, Connector, Credentials, Filter, Progress, ResourceClient};

/// Kind of a recorded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Connect,
    Login,
    Get,
    Fetch,
    Create,
    Update,
    Delete,
    Progress,
}

impl CallKind {
    /// Returns true for calls that change appliance state.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }
}

/// A call made against the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub kind: CallKind,
    pub address: String,
    pub path: String,
}

#[derive(Debug, Default)]
struct State {
    collections: BTreeMap<String, Vec<Map<String, Value>>>,
    documents: BTreeMap<String, Value>,
    users: BTreeMap<String, String>,
    eula_required: bool,
    progress: VecDeque<Progress>,
    failing_connects: BTreeMap<String, u32>,
    offline: BTreeSet<String>,
    rejections: BTreeMap<String, String>,
    next_id: u64,
    calls: Vec<Call>,
}

impl State {
    fn record(&mut self, kind: CallKind, address: &str, path: &str) {
        self.calls.push(Call {
            kind,
            address: address.to_string(),
            path: path.to_string(),
        });
    }

    fn find(&self, uri: &str) -> Option<&Map<String, Value>> {
        self.collections
            .values()
            .flatten()
            .find(|r| r.get("uri").and_then(Value::as_str) == Some(uri))
    }

    fn find_mut(&mut self, uri: &str) -> Option<&mut Map<String, Value>> {
        self.collections
            .values_mut()
            .flatten()
            .find(|r| r.get("uri").and_then(Value::as_str) == Some(uri))
    }

    fn check_rejection(&self, path: &str) -> Result<(), ClientError> {
        match self.rejections.get(path) {
            Some(message) => Err(ClientError::Request {
                status: 400,
                code: Some("SIMULATED_REJECTION".to_string()),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Shared handle to a simulated appliance.
#[derive(Debug, Clone, Default)]
pub struct MemoryAppliance {
    state: Arc<Mutex<State>>,
}

impl MemoryAppliance {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_user(&self, user: &str, password: &str) {
        self.state()
            .users
            .insert(user.to_string(), password.to_string());
    }

    pub fn password(&self, user: &str) -> Option<String> {
        self.state().users.get(user).cloned()
    }

    pub fn set_eula_required(&self, required: bool) {
        self.state().eula_required = required;
    }

    pub fn eula_required(&self) -> bool {
        self.state().eula_required
    }

    /// Queue a startup-progress reading. The last queued reading repeats.
    pub fn push_progress(&self, progress: Progress) {
        self.state().progress.push_back(progress);
    }

    /// Make the next `times` connections to `address` fail as unreachable.
    pub fn fail_connects(&self, address: &str, times: u32) {
        self.state()
            .failing_connects
            .insert(address.to_string(), times);
    }

    /// Make `address` permanently unreachable, or reachable again.
    pub fn set_offline(&self, address: &str, offline: bool) {
        let mut state = self.state();
        if offline {
            state.offline.insert(address.to_string());
        } else {
            state.offline.remove(address);
        }
    }

    /// Make create/update calls against `path` fail with `message`.
    pub fn reject(&self, path: &str, message: &str) {
        self.state()
            .rejections
            .insert(path.to_string(), message.to_string());
    }

    /// Seed a record; a `uri` is assigned if the value has none.
    pub fn insert(&self, collection: &str, value: Value) -> RemoteRecord {
        let mut state = self.state();
        let fields = store(&mut state, collection, value);
        RemoteRecord::new(fields)
    }

    pub fn put_document(&self, path: &str, value: Value) {
        self.state().documents.insert(path.to_string(), value);
    }

    pub fn document(&self, path: &str) -> Option<Value> {
        self.state().documents.get(path).cloned()
    }

    pub fn records(&self, collection: &str) -> Vec<RemoteRecord> {
        self.state()
            .collections
            .get(collection)
            .map(|records| records.iter().cloned().map(RemoteRecord::new).collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Recorded create/update/delete calls, in order.
    pub fn mutations(&self) -> Vec<Call> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.kind.is_mutation())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// A client for `address` that skips the reachability checks of
    /// [`Connector::connect`].
    pub fn client(&self, address: &str) -> MemoryClient {
        MemoryClient {
            appliance: self.clone(),
            address: address.to_string(),
            session: None,
        }
    }
}

fn store(state: &mut State, collection: &str, value: Value) -> Map<String, Value> {
    let mut fields = match value {
        Value::Object(fields) => fields,
        _ => Map::new(),
    };
    if !fields.contains_key("uri") {
        state.next_id += 1;
        fields.insert(
            "uri".to_string(),
            Value::String(format!("{}/{}", collection, state.next_id)),
        );
    }
    state
        .collections
        .entry(collection.to_string())
        .or_default()
        .push(fields.clone());
    fields
}

/// The record the appliance keeps for an imported server: the management
/// address becomes the name and host name, the login is not retained.
fn imported_hardware(body: &Value) -> Value {
    let mut fields = match body {
        Value::Object(fields) => fields.clone(),
        _ => Map::new(),
    };
    fields.remove("password");
    fields.remove("username");
    if let Some(host) = fields.remove("hostname") {
        fields.insert("name".to_string(), host.clone());
        fields.insert("mpHostInfo".to_string(), json!({ "mpHostName": host, "mpIpAddresses": [] }));
    }
    fields.insert("type".to_string(), json!("server-hardware-9"));
    fields.insert("powerState".to_string(), json!("Off"));
    Value::Object(fields)
}

#[async_trait]
impl Connector for MemoryAppliance {
    type Client = MemoryClient;

    async fn connect(&self, address: &str) -> Result<MemoryClient, ClientError> {
        {
            let mut state = self.state();
            state.record(CallKind::Connect, address, "");

            if state.offline.contains(address) {
                return Err(ClientError::Unavailable(format!("{address}: connection refused")));
            }
            if let Some(remaining) = state.failing_connects.get_mut(address) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ClientError::Unavailable(format!("{address}: connection refused")));
                }
            }
        }
        Ok(self.client(address))
    }
}

/// Client handed out by [`MemoryAppliance`].
#[derive(Debug, Clone)]
pub struct MemoryClient {
    appliance: MemoryAppliance,
    address: String,
    session: Option<String>,
}

impl MemoryClient {
    /// The user the current session belongs to.
    pub fn session_user(&self) -> Option<&str> {
        self.session.as_deref()
    }

    fn require_session(&self) -> Result<(), ClientError> {
        match self.session {
            Some(_) => Ok(()),
            None => Err(ClientError::Auth("no session".to_string())),
        }
    }

    fn begin(&self, kind: CallKind, path: &str) -> Result<MutexGuard<'_, State>, ClientError> {
        let mut state = self.appliance.state();
        state.record(kind, &self.address, path);
        if state.offline.contains(&self.address) {
            return Err(ClientError::Unavailable(format!(
                "{}: connection refused",
                self.address
            )));
        }
        Ok(state)
    }
}

#[async_trait]
impl ResourceClient for MemoryClient {
    fn address(&self) -> &str {
        &self.address
    }

    async fn login(&mut self, credentials: &Credentials) -> Result<(), ClientError> {
        let accepted = {
            let state = self.begin(CallKind::Login, paths::LOGIN_SESSIONS)?;
            state.users.get(&credentials.user_name) == Some(&credentials.password)
        };

        if accepted {
            self.session = Some(credentials.user_name.clone());
            Ok(())
        } else {
            Err(ClientError::Auth(format!(
                "invalid credentials for {}",
                credentials.user_name
            )))
        }
    }

    async fn get(&self, collection: &str, filter: &Filter) -> Result<Vec<RemoteRecord>, ClientError> {
        let state = self.begin(CallKind::Get, collection)?;
        self.require_session()?;

        Ok(state
            .collections
            .get(collection)
            .map(|records| {
                records
                    .iter()
                    .cloned()
                    .map(RemoteRecord::new)
                    .filter(|r| filter.matches(r))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch(&self, path: &str) -> Result<Value, ClientError> {
        let state = self.begin(CallKind::Fetch, path)?;

        if path == paths::EULA_STATUS {
            return Ok(Value::Bool(state.eula_required));
        }
        self.require_session()?;

        if let Some(template_uri) = path.strip_suffix(paths::NEW_PROFILE_SUFFIX) {
            let template = state
                .find(template_uri)
                .ok_or_else(|| ClientError::NotFound(path.to_string()))?;
            return Ok(json!({
                "type": "ServerProfileV5",
                "serverProfileTemplateUri": template_uri,
                "serverHardwareTypeUri": template.get("serverHardwareTypeUri").cloned().unwrap_or(Value::Null),
                "templateCompliance": "Compliant",
            }));
        }

        if let Some(document) = state.documents.get(path) {
            return Ok(document.clone());
        }

        state
            .find(path)
            .map(|fields| Value::Object(fields.clone()))
            .ok_or_else(|| ClientError::NotFound(path.to_string()))
    }

    async fn create(&self, collection: &str, body: &Value) -> Result<RemoteRecord, ClientError> {
        let mut state = self.begin(CallKind::Create, collection)?;
        state.check_rejection(collection)?;

        match collection {
            paths::EULA_SAVE => {
                state.eula_required = false;
                Ok(RemoteRecord::default())
            }
            paths::CHANGE_PASSWORD => {
                let field = |name: &str| body.get(name).and_then(Value::as_str).unwrap_or_default().to_string();
                let (user, old, new) = (field("userName"), field("oldPassword"), field("newPassword"));

                if state.users.get(&user) != Some(&old) {
                    return Err(ClientError::Request {
                        status: 400,
                        code: Some("PASSWORD_CHANGE_ERROR".to_string()),
                        message: format!("old password for {user} does not match"),
                    });
                }
                state.users.insert(user, new);
                Ok(RemoteRecord::default())
            }
            paths::NETWORK_INTERFACES => {
                self.require_session()?;
                state.documents.insert(collection.to_string(), body.clone());
                Ok(RemoteRecord::default())
            }
            paths::SERVER_HARDWARE => {
                self.require_session()?;
                let fields = store(&mut state, collection, imported_hardware(body));
                debug!(collection, uri = ?fields.get("uri"), "Simulated hardware import");
                Ok(RemoteRecord::new(fields))
            }
            _ => {
                self.require_session()?;
                let fields = store(&mut state, collection, body.clone());
                debug!(collection, uri = ?fields.get("uri"), "Simulated create");
                Ok(RemoteRecord::new(fields))
            }
        }
    }

    async fn update(&self, collection: &str, id: &str, body: &Value) -> Result<RemoteRecord, ClientError> {
        let path = resource_path(collection, id);
        let mut state = self.begin(CallKind::Update, &path)?;
        self.require_session()?;
        state.check_rejection(&path)?;

        if let Some(target) = path.strip_suffix(paths::POWER_STATE_SUFFIX) {
            let power = body
                .get("powerState")
                .cloned()
                .unwrap_or_else(|| Value::String("On".to_string()));
            let record = state
                .find_mut(target)
                .ok_or_else(|| ClientError::NotFound(path.clone()))?;
            record.insert("powerState".to_string(), power);
            return Ok(RemoteRecord::new(record.clone()));
        }

        let record = state
            .find_mut(&path)
            .ok_or_else(|| ClientError::NotFound(path.clone()))?;
        let mut replacement = match body {
            Value::Object(fields) => fields.clone(),
            _ => Map::new(),
        };
        replacement.insert("uri".to_string(), Value::String(path.clone()));
        *record = replacement;
        Ok(RemoteRecord::new(record.clone()))
    }

    async fn delete(&self, collection: &str, id: &str, _force: bool) -> Result<(), ClientError> {
        let path = resource_path(collection, id);
        let mut state = self.begin(CallKind::Delete, &path)?;
        self.require_session()?;

        for records in state.collections.values_mut() {
            if let Some(index) = records
                .iter()
                .position(|r| r.get("uri").and_then(Value::as_str) == Some(path.as_str()))
            {
                records.remove(index);
                return Ok(());
            }
        }
        Err(ClientError::NotFound(path))
    }

    async fn get_progress(&self, probe: &str) -> Result<Progress, ClientError> {
        let mut state = self.begin(CallKind::Progress, probe)?;
        let progress = if state.progress.len() > 1 {
            state.progress.pop_front()
        } else {
            state.progress.front().copied()
        };
        Ok(progress.unwrap_or_default())
    }
}
