//! Provider lookup, built once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use pulse_core::message::ProviderKind;
use pulse_core::retry::RetryPolicy;

use crate::error::ProviderError;
use crate::http::{is_placeholder_key, ApiConfig};
use crate::mock::MockProvider;
use crate::pika::{self, PikaProvider};
use crate::provider::{PollPolicy, ProviderPolicy, VideoProvider};
use crate::runway::{self, RunwayProvider};

/// Provider settings, as loaded from the environment.
#[derive(Debug, Clone)]
pub struct ProvidersConfig {
    pub runway_api_key: Option<String>,
    pub runway_base_url: String,
    pub pika_api_key: Option<String>,
    pub pika_base_url: String,
    /// Seed for the mock provider's latency model.
    pub mock_seed: u64,
    pub poll: PollPolicy,
    pub retry: RetryPolicy,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            runway_api_key: None,
            runway_base_url: runway::DEFAULT_BASE_URL.to_string(),
            pika_api_key: None,
            pika_base_url: pika::DEFAULT_BASE_URL.to_string(),
            mock_seed: 0,
            poll: PollPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Maps provider names to adapters.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn VideoProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every provider from configuration. A provider without a usable
    /// API key is served by the mock adapter.
    pub fn from_config(config: &ProvidersConfig, client: reqwest::Client) -> Self {
        let policy = ProviderPolicy {
            poll: config.poll.clone(),
            retry: config.retry.clone(),
        };
        let mock: Arc<dyn VideoProvider> = Arc::new(MockProvider::new(config.mock_seed, policy.clone()));

        let mut registry = Self::new();
        registry.register(ProviderKind::Mock, Arc::clone(&mock));

        match usable_key(config.runway_api_key.as_deref()) {
            Some(api_key) => registry.register(
                ProviderKind::Runway,
                Arc::new(RunwayProvider::new(
                    client.clone(),
                    ApiConfig {
                        base_url: config.runway_base_url.clone(),
                        api_key,
                    },
                    policy.clone(),
                )),
            ),
            None => {
                tracing::warn!(provider = "runway", "No API key configured, using mock provider");
                registry.register(ProviderKind::Runway, Arc::clone(&mock));
            }
        }

        match usable_key(config.pika_api_key.as_deref()) {
            Some(api_key) => registry.register(
                ProviderKind::Pika,
                Arc::new(PikaProvider::new(
                    client,
                    ApiConfig {
                        base_url: config.pika_base_url.clone(),
                        api_key,
                    },
                    policy,
                )),
            ),
            None => {
                tracing::warn!(provider = "pika", "No API key configured, using mock provider");
                registry.register(ProviderKind::Pika, mock);
            }
        }

        registry
    }

    pub fn register(&mut self, kind: ProviderKind, provider: Arc<dyn VideoProvider>) {
        self.providers.insert(kind, provider);
    }

    /// Look up the adapter for a message's `provider` field.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn VideoProvider>, ProviderError> {
        name.parse::<ProviderKind>()
            .ok()
            .and_then(|kind| self.providers.get(&kind))
            .cloned()
            .ok_or_else(|| ProviderError::Unsupported(name.to_string()))
    }
}

fn usable_key(key: Option<&str>) -> Option<String> {
    key.filter(|k| !is_placeholder_key(k)).map(|k| k.trim().to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn missing_or_placeholder_keys_fall_back_to_mock() {
        let config = ProvidersConfig {
            runway_api_key: Some("your-runway-key".into()),
            pika_api_key: None,
            ..Default::default()
        };
        let registry = ProviderRegistry::from_config(&config, reqwest::Client::new());

        assert_eq!(registry.resolve("runway").unwrap().name(), "mock");
        assert_eq!(registry.resolve("pika").unwrap().name(), "mock");
        assert_eq!(registry.resolve("mock").unwrap().name(), "mock");
    }

    #[test]
    fn real_keys_build_http_adapters() {
        let config = ProvidersConfig {
            runway_api_key: Some("rw_live_123".into()),
            pika_api_key: Some("pk_live_456".into()),
            ..Default::default()
        };
        let registry = ProviderRegistry::from_config(&config, reqwest::Client::new());

        assert_eq!(registry.resolve("runway").unwrap().name(), "runway");
        assert_eq!(registry.resolve("PIKA").unwrap().name(), "pika");
    }

    #[test]
    fn unknown_provider_is_unsupported() {
        let registry = ProviderRegistry::from_config(&ProvidersConfig::default(), reqwest::Client::new());
        assert_matches!(registry.resolve("sora").err(), Some(ProviderError::Unsupported(name)) if name == "sora");
    }

    #[test]
    fn empty_registry_resolves_nothing() {
        assert!(ProviderRegistry::new().resolve("mock").is_err());
    }
}
