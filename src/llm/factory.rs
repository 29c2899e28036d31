//! Builds provider clients from configuration.

use super::{AnalysisProvider, AnthropicClient, LlmHttpConfig, OllamaClient, OpenAiClient};
use crate::config::{ProviderKind, ProviderSpec};
use std::sync::Arc;

/// Picks the API key a client may send.
///
/// | `api_key_env` | `base_url` | Key |
/// |---------------|------------|-----|
/// | set | any | that variable only |
/// | unset | unset | the vendor default variable |
/// | unset | set | none |
///
/// A vendor key never travels to an endpoint the vendor does not run.
pub(crate) fn resolve_api_key(
    api_key_env: Option<&str>,
    base_url: Option<&str>,
    default_env: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    match (api_key_env, base_url) {
        (Some(var), _) => lookup(var),
        (None, None) => lookup(default_env),
        (None, Some(_)) => None,
    }
}

pub(crate) fn env_lookup(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

/// Builds one provider from its spec.
///
/// A configured `api_key_env` that is unset leaves the client without a key;
/// its calls then fail permanently and the router moves on to the next
/// provider.
#[must_use]
pub fn build_provider(spec: &ProviderSpec, http: LlmHttpConfig) -> Arc<dyn AnalysisProvider> {
    let name = spec.display_name().to_string();

    match spec.kind {
        ProviderKind::Anthropic => {
            let api_key = resolve_api_key(
                spec.api_key_env.as_deref(),
                spec.base_url.as_deref(),
                AnthropicClient::DEFAULT_KEY_ENV,
                env_lookup,
            );
            let mut client = AnthropicClient::new()
                .without_api_key()
                .with_name(name)
                .with_http_config(http);
            if let Some(key) = api_key {
                client = client.with_api_key(key);
            }
            if let Some(model) = &spec.model {
                client = client.with_model(model);
            }
            if let Some(url) = &spec.base_url {
                client = client.with_endpoint(url);
            }
            Arc::new(client)
        },
        ProviderKind::OpenAi | ProviderKind::LmStudio => {
            let (base, api_key) = if spec.kind == ProviderKind::LmStudio {
                let api_key = spec.api_key_env.as_deref().and_then(env_lookup);
                (OpenAiClient::lmstudio(), api_key)
            } else {
                let api_key = resolve_api_key(
                    spec.api_key_env.as_deref(),
                    spec.base_url.as_deref(),
                    OpenAiClient::DEFAULT_KEY_ENV,
                    env_lookup,
                );
                (OpenAiClient::new().without_api_key(), api_key)
            };
            let mut client = base.with_name(name).with_http_config(http);
            if let Some(key) = api_key {
                client = client.with_api_key(key);
            }
            if let Some(model) = &spec.model {
                client = client.with_model(model);
            }
            if let Some(url) = &spec.base_url {
                client = client.with_endpoint(url);
            }
            Arc::new(client)
        },
        ProviderKind::Ollama => {
            let mut client = OllamaClient::new().with_name(name).with_http_config(http);
            if let Some(model) = &spec.model {
                client = client.with_model(model);
            }
            if let Some(url) = &spec.base_url {
                client = client.with_endpoint(url);
            }
            Arc::new(client)
        },
    }
}

/// Builds an ordered fallback list.
#[must_use]
pub fn build_providers(specs: &[ProviderSpec], http: LlmHttpConfig) -> Vec<Arc<dyn AnalysisProvider>> {
    specs.iter().map(|spec| build_provider(spec, http)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_in_order_with_names() {
        let specs = vec![
            ProviderSpec {
                name: Some("primary".to_string()),
                ..ProviderSpec::new(ProviderKind::Anthropic)
            },
            ProviderSpec::new(ProviderKind::OpenAi),
            ProviderSpec::new(ProviderKind::LmStudio),
            ProviderSpec::new(ProviderKind::Ollama),
        ];
        let providers = build_providers(&specs, LlmHttpConfig::default());
        let names: Vec<_> = providers.iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["primary", "openai", "lmstudio", "ollama"]);
    }

    fn vendor_env(var: &str) -> Option<String> {
        (var == OpenAiClient::DEFAULT_KEY_ENV).then(|| "sk-vendor".to_string())
    }

    fn resolve(spec: &ProviderSpec) -> Option<String> {
        resolve_api_key(
            spec.api_key_env.as_deref(),
            spec.base_url.as_deref(),
            OpenAiClient::DEFAULT_KEY_ENV,
            vendor_env,
        )
    }

    #[test]
    fn test_vendor_key_used_only_for_vendor_endpoint() {
        let spec = ProviderSpec::new(ProviderKind::OpenAi);
        assert_eq!(
            resolve(&spec).as_deref(),
            Some("sk-vendor")
        );

        let custom = ProviderSpec {
            base_url: Some("http://127.0.0.1:9/v1".to_string()),
            ..ProviderSpec::new(ProviderKind::OpenAi)
        };
        assert_eq!(resolve(&custom), None);
    }

    #[test]
    fn test_unset_named_key_does_not_fall_back_to_vendor_key() {
        let spec = ProviderSpec {
            base_url: Some("http://127.0.0.1:9/v1".to_string()),
            api_key_env: Some("THIRD_PARTY_KEY".to_string()),
            ..ProviderSpec::new(ProviderKind::OpenAi)
        };
        assert_eq!(resolve(&spec), None);

        let named = ProviderSpec {
            api_key_env: Some(OpenAiClient::DEFAULT_KEY_ENV.to_string()),
            ..spec
        };
        assert_eq!(
            resolve(&named).as_deref(),
            Some("sk-vendor")
        );
    }

    #[test]
    fn test_without_api_key_clears_environment_key() {
        let openai = OpenAiClient::new().with_api_key("sk-vendor").without_api_key();
        assert!(!openai.has_api_key());
        let anthropic = AnthropicClient::new().with_api_key("sk-ant").without_api_key();
        assert!(!anthropic.has_api_key());
    }
}
