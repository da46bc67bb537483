//! # HTTP Schema Registry
//!
//! Client for a Confluent-compatible registry REST API.
//!
//! | Operation | Request | Not found |
//! |-----------|---------|-----------|
//! | `check_registered` | `POST /subjects/{subject}` | `Ok(None)` |
//! | `latest` | `GET /subjects/{subject}/versions/latest` | `SubjectNotFound` |
//! | `create` | `POST /subjects/{subject}/versions` | `Rejected` |
//!
//! Schema text is compacted before it is sent so whitespace differences do
//! not register new versions.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{compact_schema, BrokerError, RegistryError, SchemaHandle, TlsSettings};
use crate::ports::outbound::SchemaRegistry;

const CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct SchemaRequest<'a> {
    schema: &'a str,
}

#[derive(Deserialize)]
struct SchemaResponse {
    id: u32,
    #[serde(default)]
    version: Option<i32>,
    #[serde(default)]
    schema: Option<String>,
}

#[derive(Deserialize, Default)]
struct ErrorResponse {
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

/// Registry client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSchemaRegistry {
    client: Client,
    endpoint: Url,
    credentials: Option<(String, String)>,
}

impl HttpSchemaRegistry {
    pub fn builder() -> HttpSchemaRegistryBuilder {
        HttpSchemaRegistryBuilder::default()
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url(&self, segments: &[&str]) -> Result<Url, RegistryError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| RegistryError::Connection(format!("invalid endpoint {}", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RegistryError> {
        self.authorize(request)
            .header(reqwest::header::ACCEPT, CONTENT_TYPE)
            .send()
            .await
            .map_err(|e| RegistryError::Connection(e.to_string()))
    }

    async fn post_schema(&self, url: Url, schema: &str) -> Result<Response, RegistryError> {
        let body = compact_schema(schema).unwrap_or_else(|_| schema.to_string());
        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .json(&SchemaRequest { schema: &body });
        self.send(request).await
    }
}

async fn parse_handle(response: Response, fallback_schema: &str) -> Result<SchemaHandle, RegistryError> {
    let body: SchemaResponse = response
        .json()
        .await
        .map_err(|e| RegistryError::Parse(e.to_string()))?;
    let definition = body.schema.unwrap_or_else(|| fallback_schema.to_string());
    let handle = SchemaHandle::new(body.id, definition);
    Ok(match body.version {
        Some(version) => handle.with_version(version),
        None => handle,
    })
}

async fn rejection(response: Response) -> RegistryError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let parsed: ErrorResponse = serde_json::from_str(&text).unwrap_or_default();
    let message = match (parsed.error_code, parsed.message) {
        (Some(code), Some(message)) => format!("{message} (error code {code})"),
        (None, Some(message)) => message,
        _ => text,
    };
    RegistryError::Rejected {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl SchemaRegistry for HttpSchemaRegistry {
    async fn check_registered(
        &self,
        subject: &str,
        schema: &str,
    ) -> Result<Option<SchemaHandle>, RegistryError> {
        let response = self
            .post_schema(self.url(&["subjects", subject])?, schema)
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(subject, "schema not registered under subject");
                Ok(None)
            }
            s if s.is_success() => parse_handle(response, schema).await.map(Some),
            _ => Err(rejection(response).await),
        }
    }

    async fn latest(&self, subject: &str) -> Result<SchemaHandle, RegistryError> {
        let url = self.url(&["subjects", subject, "versions", "latest"])?;
        let response = self.send(self.client.get(url)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(RegistryError::SubjectNotFound(subject.to_string())),
            s if s.is_success() => parse_handle(response, "").await,
            _ => Err(rejection(response).await),
        }
    }

    async fn create(&self, subject: &str, schema: &str) -> Result<SchemaHandle, RegistryError> {
        let response = self
            .post_schema(self.url(&["subjects", subject, "versions"])?, schema)
            .await?;
        if !response.status().is_success() {
            return Err(rejection(response).await);
        }
        let compacted = compact_schema(schema).unwrap_or_else(|_| schema.to_string());
        parse_handle(response, &compacted).await
    }
}

// =============================================================================
// BUILDER
// =============================================================================

#[derive(Debug, Default)]
pub struct HttpSchemaRegistryBuilder {
    endpoint: Option<String>,
    credentials: Option<(String, String)>,
    tls: Option<TlsSettings>,
    timeout: Option<Duration>,
}

impl HttpSchemaRegistryBuilder {
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }

    /// Client TLS material. Also sets the request timeout from the settings.
    pub fn tls(mut self, tls: Option<TlsSettings>) -> Self {
        self.tls = tls;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<HttpSchemaRegistry, BrokerError> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| BrokerError::InvalidConfig("schema registry endpoint missing".into()))?;
        let endpoint = Url::parse(&endpoint).map_err(|e| {
            BrokerError::InvalidConfig(format!("schema registry endpoint '{endpoint}': {e}"))
        })?;

        let timeout = self
            .timeout
            .or_else(|| self.tls.as_ref().map(TlsSettings::timeout))
            .unwrap_or(DEFAULT_TIMEOUT);
        let mut client = Client::builder().timeout(timeout);
        if let Some(tls) = &self.tls {
            client = apply_tls(client, tls)?;
        }
        let client = client
            .build()
            .map_err(|e| BrokerError::InvalidConfig(format!("registry http client: {e}")))?;

        Ok(HttpSchemaRegistry {
            client,
            endpoint,
            credentials: self.credentials,
        })
    }
}

fn read_pem(path: &std::path::Path) -> Result<Vec<u8>, BrokerError> {
    std::fs::read(path)
        .map_err(|e| BrokerError::InvalidConfig(format!("tls file {}: {e}", path.display())))
}

fn apply_tls(
    mut client: reqwest::ClientBuilder,
    tls: &TlsSettings,
) -> Result<reqwest::ClientBuilder, BrokerError> {
    if !tls.ca_cert_pem.as_os_str().is_empty() {
        let ca = Certificate::from_pem(&read_pem(&tls.ca_cert_pem)?)
            .map_err(|e| BrokerError::InvalidConfig(format!("tls ca certificate: {e}")))?;
        client = client.add_root_certificate(ca);
    }
    if !tls.cert_pem.as_os_str().is_empty() && !tls.key_pem.as_os_str().is_empty() {
        let identity = Identity::from_pkcs8_pem(&read_pem(&tls.cert_pem)?, &read_pem(&tls.key_pem)?)
            .map_err(|e| BrokerError::InvalidConfig(format!("tls client identity: {e}")))?;
        client = client.identity(identity);
    }
    if tls.skip_verify {
        client = client.danger_accept_invalid_certs(true);
    }
    Ok(client)
}
