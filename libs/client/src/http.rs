//! HTTP implementation of the resource client.

use std::time::Duration;

use async_trait::async_trait;
use hwm_reconcile::RetryPolicy;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, LOCATION};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::error::ClientError;
use crate::record::RemoteRecord;
use crate::{paths, resource_path, task, Connector, Credentials, Filter, Progress, ResourceClient};

/// Header carrying the requested API version.
pub const API_VERSION_HEADER: &str = "X-API-Version";

/// Header carrying the session token.
pub const AUTH_HEADER: &str = "Auth";

/// Transport settings shared by every client a connector produces.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Value sent in `X-API-Version`.
    pub api_version: u32,

    /// Per-request timeout.
    pub timeout: Duration,

    /// Appliances ship with self-signed certificates.
    pub accept_invalid_certs: bool,

    /// Polling budget for asynchronous tasks (`202 Accepted`).
    pub task_policy: RetryPolicy,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            api_version: 300,
            timeout: Duration::from_secs(60),
            accept_invalid_certs: true,
            task_policy: RetryPolicy::new(360, Duration::from_secs(5)),
        }
    }
}

/// Builds [`HttpClient`]s for appliance addresses.
#[derive(Debug, Clone, Default)]
pub struct HttpConnector {
    settings: HttpSettings,
}

impl HttpConnector {
    pub fn new(settings: HttpSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &HttpSettings {
        &self.settings
    }
}

#[async_trait]
impl Connector for HttpConnector {
    type Client = HttpClient;

    async fn connect(&self, address: &str) -> Result<HttpClient, ClientError> {
        HttpClient::new(address, self.settings.clone())
    }
}

/// Resource client for one appliance address.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    address: String,
    base_url: String,
    settings: HttpSettings,
    session: Option<String>,
}

impl HttpClient {
    /// Create a client for `address` (a host name, an IP, or a full base URL).
    pub fn new(address: &str, settings: HttpSettings) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(API_VERSION_HEADER, HeaderValue::from(settings.api_version));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .danger_accept_invalid_certs(settings.accept_invalid_certs)
            .build()?;

        let base_url = if address.contains("://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", address.trim_end_matches('/'))
        };

        Ok(Self {
            client,
            address: address.to_string(),
            base_url,
            settings,
            session: None,
        })
    }

    pub fn settings(&self) -> &HttpSettings {
        &self.settings
    }

    /// The current session token, if logged in.
    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self.client.request(method, self.url(path));
        match &self.session {
            Some(session) => request.header(AUTH_HEADER, session),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        let response = request.send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Finish a mutating call, waiting on the task the appliance may have
    /// started. With `follow_resource`, the task's associated resource is
    /// fetched and returned.
    async fn complete(&self, response: Response, follow_resource: bool) -> Result<Value, ClientError> {
        if response.status() == StatusCode::ACCEPTED {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            if let Some(location) = location {
                let finished = task::wait_for_task(self, &location).await?;
                if follow_resource {
                    if let Some(uri) = task::resource_uri(&finished) {
                        return self.fetch(&uri).await;
                    }
                }
                return Ok(Value::Null);
            }
        }

        read_json(response).await
    }
}

#[async_trait]
impl ResourceClient for HttpClient {
    fn address(&self) -> &str {
        &self.address
    }

    async fn login(&mut self, credentials: &Credentials) -> Result<(), ClientError> {
        debug!(address = %self.address, user = %credentials.user_name, "Opening session");

        let request = self
            .client
            .post(self.url(paths::LOGIN_SESSIONS))
            .json(credentials);

        let response = match self.send(request).await {
            Ok(response) => response,
            Err(ClientError::Request {
                status: 400,
                message,
                ..
            }) => return Err(ClientError::Auth(message)),
            Err(e) => return Err(e),
        };

        let body: LoginResponse = response.json().await?;
        self.session = Some(body.session_id);
        Ok(())
    }

    async fn get(&self, collection: &str, filter: &Filter) -> Result<Vec<RemoteRecord>, ClientError> {
        let mut request = self.request(Method::GET, collection);
        if let Some(query) = filter.query() {
            request = request.query(&[("filter", query)]);
        }

        let mut page: CollectionPage = serde_json::from_value(read_json(self.send(request).await?).await?)?;
        let mut seen_pages = vec![collection.to_string()];
        let mut records = Vec::new();

        loop {
            for member in page.members {
                let record = RemoteRecord::from_value(member)?;
                if filter.matches(&record) {
                    records.push(record);
                }
            }

            let next = match page.next_page_uri.filter(|uri| !uri.is_empty()) {
                Some(next) if !seen_pages.contains(&next) => next,
                _ => break,
            };

            debug!(collection, next = %next, "Following collection page");
            page = serde_json::from_value(self.fetch(&next).await?)?;
            seen_pages.push(next);
        }

        debug!(collection, count = records.len(), "Read collection");
        Ok(records)
    }

    async fn fetch(&self, path: &str) -> Result<Value, ClientError> {
        let response = self.send(self.request(Method::GET, path)).await?;
        read_json(response).await
    }

    async fn create(&self, collection: &str, body: &Value) -> Result<RemoteRecord, ClientError> {
        debug!(collection, "POST");
        let response = self
            .send(self.request(Method::POST, collection).json(body))
            .await?;
        RemoteRecord::from_value(self.complete(response, true).await?)
    }

    async fn update(&self, collection: &str, id: &str, body: &Value) -> Result<RemoteRecord, ClientError> {
        let path = resource_path(collection, id);
        debug!(path = %path, "PUT");
        let response = self.send(self.request(Method::PUT, &path).json(body)).await?;
        RemoteRecord::from_value(self.complete(response, true).await?)
    }

    async fn delete(&self, collection: &str, id: &str, force: bool) -> Result<(), ClientError> {
        let path = resource_path(collection, id);
        debug!(path = %path, force, "DELETE");
        let mut request = self.request(Method::DELETE, &path);
        if force {
            request = request.query(&[("force", "true")]);
        }
        let response = self.send(request).await?;
        self.complete(response, false).await?;
        Ok(())
    }

    async fn get_progress(&self, probe: &str) -> Result<Progress, ClientError> {
        let value = self.fetch(probe).await?;
        Ok(serde_json::from_value(value)?)
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(rename = "sessionID")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectionPage {
    #[serde(default)]
    members: Vec<Value>,
    #[serde(default)]
    next_page_uri: Option<String>,
}

/// Error body returned by the appliance.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

async fn read_json(response: Response) -> Result<Value, ClientError> {
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}

async fn error_from_response(response: Response) -> ClientError {
    let status = response.status();
    let path = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    let parsed: Option<ApiErrorBody> = serde_json::from_str(&body).ok();

    let message = parsed
        .as_ref()
        .and_then(|b| b.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            if body.is_empty() {
                status.to_string()
            } else {
                body.clone()
            }
        });

    match status {
        StatusCode::UNAUTHORIZED => ClientError::Auth(message),
        StatusCode::NOT_FOUND => ClientError::NotFound(path),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            ClientError::Unavailable(message)
        }
        _ => {
            error!(status = %status, path = %path, message = %message, "Request rejected");
            ClientError::Request {
                status: status.as_u16(),
                code: parsed.and_then(|b| b.error_code),
                message,
            }
        }
    }
}
