//! Provider router: selects the model backend named in config.
//!
//! Every configured provider speaks the OpenAI chat-completions dialect;
//! the router only decides which endpoint, key, and model to use.

use codecrab_config::AppConfig;
use codecrab_core::error::ProviderError;
use codecrab_core::provider::Provider;
use std::collections::HashMap;
use std::sync::Arc;

use crate::openai_compat::OpenAiCompatProvider;

struct Route {
    provider: Arc<dyn Provider>,
    default_model: Option<String>,
}

/// Routes LLM requests to the correct provider.
pub struct ProviderRouter {
    routes: HashMap<String, Route>,
    default_provider: String,
    default_model: String,
}

impl ProviderRouter {
    /// Create an empty router.
    pub fn new(default_provider: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            routes: HashMap::new(),
            default_provider: default_provider.into(),
            default_model: default_model.into(),
        }
    }

    /// Register a provider, optionally with its own default model.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        provider: Arc<dyn Provider>,
        default_model: Option<String>,
    ) {
        self.routes.insert(
            name.into(),
            Route {
                provider,
                default_model,
            },
        );
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.routes.get(name).map(|r| r.provider.clone())
    }

    /// Pick a provider and model.
    ///
    /// `provider` falls back to the configured default. `model` falls back
    /// to the provider's own default model, then the global one.
    pub fn select(
        &self,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<(Arc<dyn Provider>, String), ProviderError> {
        let name = provider.unwrap_or(&self.default_provider);
        let route = self.routes.get(name).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "provider '{name}' is not configured (known: {})",
                self.list().join(", ")
            ))
        })?;
        let model = model
            .map(str::to_string)
            .or_else(|| route.default_model.clone())
            .unwrap_or_else(|| self.default_model.clone());
        Ok((route.provider.clone(), model))
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    /// Registered provider names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.routes.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Build providers from configuration.
pub fn build_from_config(config: &AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider, &config.default_model);

    for (name, provider_config) in &config.providers {
        let api_key = provider_config
            .api_key
            .clone()
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();

        let base_url = provider_config
            .api_url
            .clone()
            .unwrap_or_else(|| default_base_url(name));

        router.register(
            name.clone(),
            Arc::new(OpenAiCompatProvider::new(name, &base_url, &api_key)),
            provider_config.default_model.clone(),
        );
    }

    // The default provider always exists, even if not explicitly configured
    if router.get(&config.default_provider).is_none() {
        let api_key = config.api_key.clone().unwrap_or_default();
        let base_url = default_base_url(&config.default_provider);
        router.register(
            config.default_provider.clone(),
            Arc::new(OpenAiCompatProvider::new(
                &config.default_provider,
                &base_url,
                &api_key,
            )),
            None,
        );
    }

    router
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "fireworks" => "https://api.fireworks.ai/inference/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codecrab_config::ProviderConfig;

    #[test]
    fn router_register_and_lookup() {
        let mut router = ProviderRouter::new("openrouter", "m");
        router.register(
            "openrouter",
            Arc::new(OpenAiCompatProvider::openrouter("sk-test")),
            None,
        );

        assert!(router.get("openrouter").is_some());
        assert!(router.get("nonexistent").is_none());
        let (provider, model) = router.select(None, None).unwrap();
        assert_eq!(provider.name(), "openrouter");
        assert_eq!(model, "m");
    }

    #[test]
    fn unknown_provider_is_not_configured() {
        let router = ProviderRouter::new("openrouter", "m");
        assert!(matches!(
            router.select(Some("nope"), None),
            Err(ProviderError::NotConfigured(_))
        ));
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openrouter").contains("openrouter.ai"));
        assert!(default_base_url("openai").contains("api.openai.com"));
        assert!(default_base_url("ollama").contains("localhost:11434"));
    }

    #[test]
    fn build_from_default_config() {
        let config = AppConfig::default();
        let router = build_from_config(&config);
        let (provider, model) = router.select(None, None).unwrap();
        assert_eq!(provider.name(), config.default_provider);
        assert_eq!(model, config.default_model);
    }

    #[test]
    fn provider_default_model_wins_over_global() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "ollama".into(),
            ProviderConfig {
                api_key: None,
                api_url: None,
                default_model: Some("qwen2.5-coder".into()),
            },
        );
        let router = build_from_config(&config);
        let (_, model) = router.select(Some("ollama"), None).unwrap();
        assert_eq!(model, "qwen2.5-coder");
        let (_, explicit) = router.select(Some("ollama"), Some("llama3")).unwrap();
        assert_eq!(explicit, "llama3");
        assert_eq!(router.list(), vec!["ollama", config.default_provider.as_str()]);
    }
}
