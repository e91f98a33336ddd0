use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::remote::{Filter, Query, RemoteStore, Row};

const REST_PREFIX: &str = "rest/v1/";
const DEFAULT_SCHEMA: &str = "public";
/// Upper bound for any request that does not carry its own timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid resource name: {0}")]
    InvalidResource(String),
    #[error("api returned {status}: {message}")]
    Api {
        status: StatusCode,
        message: String,
        code: Option<String>,
        details: Option<String>,
        hint: Option<String>,
    },
    #[error("no row with id {id} in {resource}")]
    NotFound { resource: String, id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    hint: Option<String>,
}

/// HTTP client for a PostgREST-style backend.
///
/// Every resource is exposed under `/rest/v1/{table}`; the schema is selected
/// per request with `Accept-Profile` (reads) or `Content-Profile` (writes).
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base_url: Url,
    api_key: String,
    default_schema: String,
}

impl RestClient {
    /// `base_url` may carry a path prefix (a proxy mount); resources are
    /// resolved below it.
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, RemoteError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http: Client::builder().timeout(DEFAULT_REQUEST_TIMEOUT).build()?,
            base_url,
            api_key: api_key.into(),
            default_schema: DEFAULT_SCHEMA.to_string(),
        })
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = schema.into();
        self
    }

    pub fn default_schema(&self) -> &str {
        &self.default_schema
    }

    fn target(&self, resource: &str) -> Result<(Url, String), RemoteError> {
        let (schema, table) = match resource.split_once('.') {
            Some((schema, table)) => (schema, table),
            None => (self.default_schema.as_str(), resource),
        };
        if !is_identifier(schema) || !is_identifier(table) {
            return Err(RemoteError::InvalidResource(resource.to_string()));
        }
        let url = self.base_url.join(&format!("{REST_PREFIX}{table}"))?;
        Ok((url, schema.to_string()))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn handle_rows(response: reqwest::Response) -> Result<Vec<Row>, RemoteError> {
        if response.status().is_success() {
            Ok(response.json::<Vec<Row>>().await?)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn handle_empty(response: reqwest::Response) -> Result<(), RemoteError> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn api_error(response: reqwest::Response) -> RemoteError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body: ApiErrorBody = serde_json::from_str(&text).unwrap_or_default();
        RemoteError::Api {
            status,
            message: body.message.unwrap_or(text),
            code: body.code,
            details: body.details,
            hint: body.hint,
        }
    }
}

#[async_trait]
impl RemoteStore for RestClient {
    async fn select(&self, resource: &str, query: &Query) -> Result<Vec<Row>, RemoteError> {
        let (mut url, schema) = self.target(resource)?;
        if query.is_vacuous() {
            return Ok(Vec::new());
        }
        {
            let mut pairs = url.query_pairs_mut();
            let columns = query
                .columns
                .as_ref()
                .filter(|c| !c.is_empty())
                .map(|c| c.join(","))
                .unwrap_or_else(|| "*".to_string());
            pairs.append_pair("select", &columns);
            for filter in &query.filters {
                match filter {
                    Filter::Eq { column, value } => {
                        pairs.append_pair(column, &format!("eq.{value}"));
                    }
                    Filter::In { column, values } => {
                        let list = values
                            .iter()
                            .map(|v| quote_list_value(v))
                            .collect::<Vec<_>>()
                            .join(",");
                        pairs.append_pair(column, &format!("in.({list})"));
                    }
                }
            }
        }
        tracing::debug!(resource, url = %url, "remote select");
        let mut request = self
            .authorized(self.http.get(url))
            .header("Accept-Profile", schema);
        if let Some(timeout) = query.timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;
        Self::handle_rows(response).await
    }

    async fn insert(&self, resource: &str, row: &Row) -> Result<(), RemoteError> {
        let (url, schema) = self.target(resource)?;
        let response = self
            .authorized(self.http.post(url))
            .header("Content-Profile", schema)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(row)
            .send()
            .await?;
        Self::handle_empty(response).await
    }

    async fn update(&self, resource: &str, id: &str, columns: &Row) -> Result<(), RemoteError> {
        let (mut url, schema) = self.target(resource)?;
        url.query_pairs_mut().append_pair("id", &format!("eq.{id}"));
        let response = self
            .authorized(self.http.patch(url))
            .header("Content-Profile", schema)
            .header("Prefer", "return=representation")
            .json(columns)
            .send()
            .await?;
        let updated = Self::handle_rows(response).await?;
        if updated.is_empty() {
            return Err(RemoteError::NotFound {
                resource: resource.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete(&self, resource: &str, id: &str) -> Result<(), RemoteError> {
        let (mut url, schema) = self.target(resource)?;
        url.query_pairs_mut().append_pair("id", &format!("eq.{id}"));
        let response = self
            .authorized(self.http.delete(url))
            .header("Content-Profile", schema)
            .send()
            .await?;
        Self::handle_empty(response).await
    }
}

impl RemoteError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            RemoteError::Api { status, .. } => Some(classify_api_status(*status)),
            RemoteError::Request(err) if err.is_timeout() || err.is_connect() => {
                Some(ApiErrorClass::Transient)
            }
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RemoteError::Request(err) if err.is_timeout())
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// PostgREST list syntax reserves commas, parentheses and quotes.
fn quote_list_value(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| matches!(c, ',' | '(' | ')' | '"' | '\\' | ':') || c.is_whitespace());
    if !needs_quotes {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}
