use super::{Provider, QueryRequest};
use crate::config::Config;
use crate::error::{ConfigError, FetchError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Network seam between the pagination driver and a provider endpoint.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    async fn execute(&self, request: &QueryRequest) -> Result<Value, FetchError>;
}

/// POSTs query bodies to one provider endpoint with a bearer credential.
///
/// No retries are attempted here; a failed request fails the address and
/// the scheduler's own retry picks it up from the stored watermark.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    provider: Provider,
    url: String,
    token: String,
}

impl HttpTransport {
    pub fn new(
        provider: Provider,
        url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| FetchError::Network { provider, source })?;

        Ok(Self {
            client,
            provider,
            url: url.into(),
            token: token.into(),
        })
    }

    /// Transport for `provider` using the endpoint and credential from `config`.
    pub fn for_provider(config: &Config, provider: Provider) -> anyhow::Result<Self> {
        let (url, token, var) = match provider {
            Provider::Bitquery => (
                &config.bitquery_url,
                config.bitquery_api_key.as_ref(),
                "BITQUERY_API_KEY",
            ),
            Provider::Cdp => (&config.cdp_sql_url, config.cdp_api_token.as_ref(), "CDP_API_TOKEN"),
        };
        let token = token.ok_or(ConfigError::MissingCredential(var))?;
        Ok(Self::new(provider, url.clone(), token.clone(), config.provider_timeout)?)
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }
}

#[async_trait]
impl ProviderTransport for HttpTransport {
    async fn execute(&self, request: &QueryRequest) -> Result<Value, FetchError> {
        let provider = self.provider;
        debug!(%provider, url = %self.url, "sending provider query");

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&request.to_body())
            .send()
            .await
            .map_err(|source| FetchError::Network { provider, source })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                provider,
                status: status.as_u16(),
                body: truncate(&body, 512),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| FetchError::Network { provider, source })?;

        serde_json::from_str(&body)
            .map_err(|e| FetchError::decode(provider, format!("invalid JSON body: {e}")))
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("aé", 2), "a...");
    }

    #[test]
    fn missing_credential_is_reported() {
        let config = Config {
            database_url: ":memory:".to_string(),
            sync_config_path: "config/sync.toml".to_string(),
            bitquery_url: "http://localhost:1".to_string(),
            bitquery_api_key: None,
            cdp_sql_url: "http://localhost:2".to_string(),
            cdp_api_token: Some("token".to_string()),
            provider_timeout: Duration::from_secs(5),
        };

        let err = HttpTransport::for_provider(&config, Provider::Bitquery)
            .err()
            .expect("bitquery key is missing");
        assert!(err.to_string().contains("BITQUERY_API_KEY"));

        let cdp = HttpTransport::for_provider(&config, Provider::Cdp).unwrap();
        assert_eq!(cdp.provider(), Provider::Cdp);
    }
}
