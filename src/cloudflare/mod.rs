//! Cloudflare v4 API client.
//!
//! Covers the four calls the updater needs: zone lookup by name, record lookup
//! by name and type, record creation and full record replacement.


use crate::error::{DdnsError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com/client/v4";

/// Timeout applied to every API request.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(20);

static USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Cloudflare API client.
pub struct CloudflareClient {
    client: reqwest::Client,
    api_token: String,
    base_url: String,
}

/// Envelope shared by every Cloudflare response.
#[derive(Debug, Deserialize)]
struct CloudflareResponse<T> {
    success: bool,
    result: Option<T>,
    #[serde(default, deserialize_with = "null_as_empty")]
    errors: Vec<serde_json::Value>,
}

/// Cloudflare sends `"errors": null` on some successful responses.
fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
}

/// A DNS record as stored by Cloudflare.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub proxied: bool,
    pub ttl: i64,
}

/// Record body sent on create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesiredRecord {
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub content: String,
    pub ttl: i64,
    pub proxied: bool,
}

impl fmt::Debug for CloudflareClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudflareClient")
            .field("api_token", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl CloudflareClient {
    /// Create a client for the public Cloudflare API.
    pub fn new(api_token: String) -> Result<Self> {
        Self::with_base_url(api_token, DEFAULT_BASE_URL.to_string())
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(api_token: String, base_url: String) -> Result<Self> {
        Ok(Self {
            client: build_http_client(DEFAULT_HTTP_TIMEOUT)?,
            api_token,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Replace the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = build_http_client(timeout)?;
        Ok(self)
    }

    /// Resolve a zone name to its zone ID.
    pub async fn zone_id(&self, zone_name: &str) -> Result<String> {
        const OPERATION: &str = "zone lookup";

        tracing::info!("Fetching zone ID for {}", zone_name);
        let url = format!("{}/zones", self.base_url);
        let (_, body) = self
            .send(self.client.get(&url).query(&[("name", zone_name)]))
            .await?;

        let response: CloudflareResponse<Vec<Zone>> = decode(OPERATION, &body)?;
        let zone = match response.result.as_deref() {
            Some([zone, ..]) if response.success => zone,
            _ => {
                return Err(DdnsError::provider(
                    OPERATION,
                    format!(
                        "could not find zone ID for '{}' (success: {}). Errors:\n{}\n\
                         Full response:\n{}",
                        zone_name,
                        response.success,
                        describe_errors(&response.errors),
                        body
                    ),
                ))
            }
        };

        tracing::info!("Fetched zone ID {}", zone.id);
        Ok(zone.id.clone())
    }

    /// List records of `record_type` named `fqdn`, in response order.
    pub async fn list_records(
        &self,
        zone_id: &str,
        fqdn: &str,
        record_type: &str,
    ) -> Result<Vec<RemoteRecord>> {
        const OPERATION: &str = "record lookup";

        let url = format!("{}/zones/{}/dns_records", self.base_url, zone_id);
        let (_, body) = self
            .send(
                self.client
                    .get(&url)
                    .query(&[("type", record_type), ("name", fqdn)]),
            )
            .await?;

        let response: CloudflareResponse<Vec<RemoteRecord>> = decode(OPERATION, &body)?;
        if !response.success {
            return Err(DdnsError::provider(
                OPERATION,
                format!(
                    "API error finding {} ({}): {}\nResponse: {}",
                    fqdn,
                    record_type,
                    describe_errors(&response.errors),
                    body
                ),
            ));
        }

        Ok(response.result.unwrap_or_default())
    }

    /// Create a new record.
    pub async fn create_record(
        &self,
        zone_id: &str,
        record: &DesiredRecord,
    ) -> Result<Option<RemoteRecord>> {
        let url = format!("{}/zones/{}/dns_records", self.base_url, zone_id);
        self.mutate("record create", self.client.post(&url).json(record))
            .await
    }

    /// Replace an existing record.
    pub async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        record: &DesiredRecord,
    ) -> Result<Option<RemoteRecord>> {
        let url = format!(
            "{}/zones/{}/dns_records/{}",
            self.base_url, zone_id, record_id
        );
        self.mutate("record update", self.client.put(&url).json(record))
            .await
    }

    /// Send a create/update request.
    ///
    /// Succeeds only on a 2xx status with `success: true` in the body. The
    /// returned record is informational; a `result` that does not decode as a
    /// full record yields `None` rather than an error.
    async fn mutate(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Option<RemoteRecord>> {
        let (status, body) = self.send(request).await?;

        let response = match serde_json::from_str::<CloudflareResponse<serde_json::Value>>(&body) {
            Ok(response) => Some(response),
            Err(e) => {
                tracing::warn!("Failed to parse {} response: {}", operation, e);
                None
            }
        };

        match response {
            Some(response) if status.is_success() && response.success => Ok(response
                .result
                .and_then(|result| serde_json::from_value(result).ok())),
            Some(response) => {
                let detail = if !response.success && !response.errors.is_empty() {
                    format!("API errors:\n{}", describe_errors(&response.errors))
                } else if !response.success {
                    "API success=false, no specific errors returned".to_string()
                } else {
                    "API success=true, but status code indicates error".to_string()
                };
                Err(DdnsError::provider(
                    operation,
                    format!("API status: {}\n{}\nFull response:\n{}", status, detail, body),
                ))
            }
            None => Err(DdnsError::provider(
                operation,
                format!("API status: {}, unparseable response:\n{}", status, body),
            )),
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<(reqwest::StatusCode, String)> {
        let response = request
            .bearer_auth(&self.api_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        tracing::debug!("{} {}", status, response.url());
        let body = response.text().await?;
        Ok((status, body))
    }
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()?)
}

fn decode<T: serde::de::DeserializeOwned>(operation: &str, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| {
        DdnsError::provider(
            operation,
            format!("failed to parse response: {}\nResponse: {}", e, body),
        )
    })
}

/// Pretty-printed `errors` payload.
fn describe_errors(errors: &[serde_json::Value]) -> String {
    if errors.is_empty() {
        return "Unknown error".to_string();
    }
    serde_json::to_string_pretty(errors).unwrap_or_else(|_| format!("{:?}", errors))
}
