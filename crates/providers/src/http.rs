//! Shared REST plumbing for the HTTP provider adapters.

use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ProviderError;

/// Per-request timeout for provider API calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for one provider API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
}

/// Bearer-authenticated JSON client for a single provider API.
pub struct ApiClient {
    client: reqwest::Client,
    config: ApiConfig,
    extra_headers: Vec<(HeaderName, HeaderValue)>,
}

impl ApiClient {
    pub fn new(client: reqwest::Client, config: ApiConfig) -> Self {
        Self {
            client,
            config: ApiConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                api_key: config.api_key,
            },
            extra_headers: Vec::new(),
        }
    }

    /// Send `name: value` on every API request.
    pub fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.extra_headers
            .push((HeaderName::from_static(name), HeaderValue::from_static(value)));
        self
    }

    /// `POST {base}{path}` with a JSON body.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ProviderError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.client.post(self.url(path)).json(body);
        let response = self.authorized(request).send().await?;
        parse_response(response).await
    }

    /// `GET {base}{path}`.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let request = self.client.get(self.url(path));
        let response = self.authorized(request).send().await?;
        parse_response(response).await
    }

    /// Download an artifact. Artifact URLs are pre-authorized, so no
    /// credentials are attached.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(300))
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- private helpers ----

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn authorized(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request = request
            .bearer_auth(&self.config.api_key)
            .timeout(REQUEST_TIMEOUT);
        for (name, value) in &self.extra_headers {
            request = request.header(name.clone(), value.clone());
        }
        request
    }
}

/// Ensure the response has a success status code.
///
/// 429 and 5xx are [`ProviderError::Transient`]; any other non-2xx is
/// [`ProviderError::Rejected`].
pub async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    if status.as_u16() == 429 || status.is_server_error() {
        return Err(ProviderError::Transient(format!("{status}: {body}")));
    }
    Err(ProviderError::Rejected {
        status: status.as_u16(),
        body,
    })
}

async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ProviderError> {
    let response = ensure_success(response).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

/// API keys shipped in sample env files. Treated as absent.
pub fn is_placeholder_key(key: &str) -> bool {
    let key = key.trim();
    key.is_empty() || key.starts_with("your-") || key.eq_ignore_ascii_case("changeme")
}

/// Extract the remote job id from a submit response.
pub(crate) fn remote_id(value: &serde_json::Value) -> Result<String, ProviderError> {
    match value.get("id") {
        Some(serde_json::Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        _ => Err(ProviderError::InvalidResponse(format!(
            "submit response has no job id: {value}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn placeholder_keys_are_detected() {
        assert!(is_placeholder_key(""));
        assert!(is_placeholder_key("your-runway-key"));
        assert!(is_placeholder_key("your-pika-key"));
        assert!(!is_placeholder_key("rw_live_4f9a"));
    }

    #[test]
    fn remote_id_accepts_strings_and_numbers() {
        assert_eq!(remote_id(&serde_json::json!({"id": "task_1"})).unwrap(), "task_1");
        assert_eq!(remote_id(&serde_json::json!({"id": 42})).unwrap(), "42");
        assert_matches!(
            remote_id(&serde_json::json!({"status": "queued"})),
            Err(ProviderError::InvalidResponse(_))
        );
    }
}
