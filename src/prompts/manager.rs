//! The layered system-prompt composer.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, RwLock},
    time::{Duration, Instant, SystemTime},
};

use serde_json::Value;

use crate::config::PromptsConfig;

use super::{
    PromptContext,
    generators::{
        ConditionalGenerator, EnvironmentGenerator, MemoryContextGenerator, PromptGenerator,
        SessionContextGenerator, TimestampGenerator,
    },
};

// ─── Provider model ───────────────────────────────────────────────────────────

/// Where a provider's content comes from.
#[derive(Debug, Clone)]
pub enum PromptSource {
    /// Fixed content with `{{ variable }}` substitution.
    Static {
        content: String,
        variables: HashMap<String, String>,
    },
    /// Content produced by a registered generator.
    Dynamic {
        generator: String,
        generator_config: Value,
        /// Optional template wrapping the generator output as `{{ output }}`.
        template: Option<String>,
    },
    /// Content read from a file, optionally re-read when the file changes.
    File {
        path: PathBuf,
        watch_for_changes: bool,
        variables: HashMap<String, String>,
    },
}

/// One layer of the composed system prompt.
#[derive(Debug, Clone)]
pub struct PromptProvider {
    pub id: String,
    pub source: PromptSource,
    /// Higher priority providers come first in the output.
    pub priority: i32,
    pub enabled: bool,
}

/// Outcome of one provider during a `generate()` call.
#[derive(Debug, Clone)]
pub struct ProviderResult {
    pub id: String,
    pub success: bool,
    pub error: Option<String>,
}

/// The composed prompt plus per-provider diagnostics.
#[derive(Debug, Clone)]
pub struct GeneratedPrompt {
    pub content: String,
    pub provider_results: Vec<ProviderResult>,
    pub generation_time_ms: u64,
}

// ─── PromptManager ────────────────────────────────────────────────────────────

/// Composes the system prompt from prioritized providers.
///
/// Provider state is read-mostly: `generate()` works on a snapshot taken
/// under a read lock, so updates (add/enable/disable) never block an
/// in-flight generation.
pub struct PromptManager {
    providers: RwLock<Vec<PromptProvider>>,
    generators: HashMap<String, Arc<dyn PromptGenerator>>,
    file_cache: RwLock<HashMap<PathBuf, (SystemTime, String)>>,
    config: PromptsConfig,
}

impl PromptManager {
    /// Manager with the built-in generators registered.
    pub fn new(config: PromptsConfig) -> Self {
        let mut generators: HashMap<String, Arc<dyn PromptGenerator>> = HashMap::new();
        for generator in [
            Arc::new(TimestampGenerator) as Arc<dyn PromptGenerator>,
            Arc::new(SessionContextGenerator),
            Arc::new(MemoryContextGenerator),
            Arc::new(EnvironmentGenerator),
            Arc::new(ConditionalGenerator),
        ] {
            generators.insert(generator.name().to_owned(), generator);
        }
        Self {
            providers: RwLock::new(Vec::new()),
            generators,
            file_cache: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Register an additional generator (replaces any with the same name).
    pub fn register_generator(&mut self, generator: Arc<dyn PromptGenerator>) {
        self.generators.insert(generator.name().to_owned(), generator);
    }

    pub fn add_provider(&self, provider: PromptProvider) {
        if let Ok(mut providers) = self.providers.write() {
            providers.push(provider);
        }
    }

    /// Enable or disable a provider by id.  Returns `false` when absent.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let Ok(mut providers) = self.providers.write() else {
            return false;
        };
        match providers.iter_mut().find(|p| p.id == id) {
            Some(p) => {
                p.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn provider_count(&self) -> usize {
        self.providers.read().map(|p| p.len()).unwrap_or(0)
    }

    /// Compose the prompt for this turn.
    ///
    /// Enabled providers are resolved in descending priority within the
    /// total `max_generation_time_ms` deadline.  A provider failure is
    /// recorded and skipped unless `fail_on_provider_error` is set.
    pub async fn generate(&self, ctx: &PromptContext) -> Result<GeneratedPrompt, String> {
        let started = Instant::now();
        let deadline = Duration::from_millis(self.config.max_generation_time_ms);

        // Snapshot under the read lock, then release before any await.
        let mut snapshot: Vec<PromptProvider> = self
            .providers
            .read()
            .map_err(|e| format!("provider lock poisoned: {e}"))?
            .iter()
            .filter(|p| p.enabled)
            .cloned()
            .collect();
        snapshot.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut sections: Vec<String> = Vec::new();
        let mut results: Vec<ProviderResult> = Vec::new();

        for provider in snapshot {
            let remaining = deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                let err = "generation deadline exceeded".to_owned();
                if self.config.fail_on_provider_error {
                    return Err(err);
                }
                results.push(ProviderResult {
                    id: provider.id,
                    success: false,
                    error: Some(err),
                });
                continue;
            }

            let outcome =
                tokio::time::timeout(remaining, self.resolve_provider(&provider, ctx)).await;
            match outcome {
                Ok(Ok(content)) => {
                    if !content.is_empty() {
                        sections.push(content);
                    }
                    results.push(ProviderResult {
                        id: provider.id,
                        success: true,
                        error: None,
                    });
                }
                Ok(Err(e)) => {
                    if self.config.fail_on_provider_error {
                        return Err(format!("provider '{}' failed: {e}", provider.id));
                    }
                    tracing::debug!(provider = %provider.id, error = %e, "prompt provider failed");
                    results.push(ProviderResult {
                        id: provider.id,
                        success: false,
                        error: Some(e),
                    });
                }
                Err(_) => {
                    let err = "provider timed out".to_owned();
                    if self.config.fail_on_provider_error {
                        return Err(format!("provider '{}' timed out", provider.id));
                    }
                    results.push(ProviderResult {
                        id: provider.id,
                        success: false,
                        error: Some(err),
                    });
                }
            }
        }

        Ok(GeneratedPrompt {
            content: sections.join(&self.config.content_separator),
            provider_results: results,
            generation_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn resolve_provider(
        &self,
        provider: &PromptProvider,
        ctx: &PromptContext,
    ) -> Result<String, String> {
        match &provider.source {
            PromptSource::Static { content, variables } => render(content, variables, ctx),
            PromptSource::Dynamic {
                generator,
                generator_config,
                template,
            } => {
                let generator = self
                    .generators
                    .get(generator)
                    .ok_or_else(|| format!("unknown generator '{generator}'"))?;
                let output = generator.generate(ctx, generator_config).await?;
                match template {
                    Some(template) => {
                        let mut variables = HashMap::new();
                        variables.insert("output".to_owned(), output);
                        render(template, &variables, ctx)
                    }
                    None => Ok(output),
                }
            }
            PromptSource::File {
                path,
                watch_for_changes,
                variables,
            } => {
                let content = self.read_file(path, *watch_for_changes)?;
                render(&content, variables, ctx)
            }
        }
    }

    /// Read a file provider's content, serving from the cache unless the
    /// file's mtime moved and `watch` is set.
    fn read_file(&self, path: &PathBuf, watch: bool) -> Result<String, String> {
        let mtime = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|e| format!("cannot stat {}: {e}", path.display()))?;

        if let Ok(cache) = self.file_cache.read()
            && let Some((cached_mtime, content)) = cache.get(path)
            && (!watch || *cached_mtime == mtime)
        {
            return Ok(content.clone());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        if let Ok(mut cache) = self.file_cache.write() {
            cache.insert(path.clone(), (mtime, content.clone()));
        }
        Ok(content)
    }
}

/// Render a `{{ variable }}` template against provider variables plus the
/// context's ad-hoc vars (context wins on collision).
fn render(
    template: &str,
    variables: &HashMap<String, String>,
    ctx: &PromptContext,
) -> Result<String, String> {
    // Fast path: no placeholders, no templating cost.
    if !template.contains("{{") {
        return Ok(template.to_owned());
    }
    let mut tera_ctx = tera::Context::new();
    for (k, v) in variables {
        tera_ctx.insert(k, v);
    }
    for (k, v) in &ctx.vars {
        tera_ctx.insert(k, v);
    }
    tera::Tera::one_off(template, &tera_ctx, false)
        .map_err(|e| format!("template render error: {e}"))
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn manager() -> PromptManager {
        PromptManager::new(PromptsConfig::default())
    }

    fn static_provider(id: &str, content: &str, priority: i32) -> PromptProvider {
        PromptProvider {
            id: id.to_owned(),
            source: PromptSource::Static {
                content: content.to_owned(),
                variables: HashMap::new(),
            },
            priority,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn providers_joined_in_priority_order() {
        let m = manager();
        m.add_provider(static_provider("low", "LOW", 1));
        m.add_provider(static_provider("high", "HIGH", 10));
        let prompt = m.generate(&PromptContext::default()).await.unwrap();
        assert_eq!(prompt.content, "HIGH\n\nLOW");
        assert_eq!(prompt.provider_results.len(), 2);
        assert!(prompt.provider_results.iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn disabled_providers_are_skipped() {
        let m = manager();
        m.add_provider(static_provider("a", "A", 1));
        m.add_provider(PromptProvider {
            enabled: false,
            ..static_provider("b", "B", 2)
        });
        let prompt = m.generate(&PromptContext::default()).await.unwrap();
        assert_eq!(prompt.content, "A");
    }

    #[tokio::test]
    async fn static_variables_are_substituted() {
        let m = manager();
        let mut variables = HashMap::new();
        variables.insert("name".to_owned(), "Engram".to_owned());
        m.add_provider(PromptProvider {
            id: "persona".to_owned(),
            source: PromptSource::Static {
                content: "You are {{ name }}.".to_owned(),
                variables,
            },
            priority: 0,
            enabled: true,
        });
        let prompt = m.generate(&PromptContext::default()).await.unwrap();
        assert_eq!(prompt.content, "You are Engram.");
    }

    #[tokio::test]
    async fn dynamic_provider_uses_registered_generator() {
        let m = manager();
        m.add_provider(PromptProvider {
            id: "env".to_owned(),
            source: PromptSource::Dynamic {
                generator: "environment".to_owned(),
                generator_config: Value::Null,
                template: None,
            },
            priority: 0,
            enabled: true,
        });
        let prompt = m.generate(&PromptContext::default()).await.unwrap();
        assert!(prompt.content.starts_with("Host environment: "));
    }

    #[tokio::test]
    async fn unknown_generator_swallowed_by_default() {
        let m = manager();
        m.add_provider(PromptProvider {
            id: "bad".to_owned(),
            source: PromptSource::Dynamic {
                generator: "does-not-exist".to_owned(),
                generator_config: Value::Null,
                template: None,
            },
            priority: 5,
            enabled: true,
        });
        m.add_provider(static_provider("ok", "OK", 0));
        let prompt = m.generate(&PromptContext::default()).await.unwrap();
        assert_eq!(prompt.content, "OK");
        let bad = prompt
            .provider_results
            .iter()
            .find(|r| r.id == "bad")
            .unwrap();
        assert!(!bad.success);
        assert!(bad.error.is_some());
    }

    #[tokio::test]
    async fn fail_on_provider_error_aborts_generation() {
        let m = PromptManager::new(PromptsConfig {
            fail_on_provider_error: true,
            ..PromptsConfig::default()
        });
        m.add_provider(PromptProvider {
            id: "bad".to_owned(),
            source: PromptSource::Dynamic {
                generator: "does-not-exist".to_owned(),
                generator_config: Value::Null,
                template: None,
            },
            priority: 0,
            enabled: true,
        });
        assert!(m.generate(&PromptContext::default()).await.is_err());
    }

    #[tokio::test]
    async fn slow_provider_hits_deadline() {
        struct SlowGenerator;

        #[async_trait]
        impl PromptGenerator for SlowGenerator {
            fn name(&self) -> &str {
                "slow"
            }
            async fn generate(&self, _: &PromptContext, _: &Value) -> Result<String, String> {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok("late".to_owned())
            }
        }

        let mut m = PromptManager::new(PromptsConfig {
            max_generation_time_ms: 20,
            ..PromptsConfig::default()
        });
        m.register_generator(Arc::new(SlowGenerator));
        m.add_provider(PromptProvider {
            id: "slow".to_owned(),
            source: PromptSource::Dynamic {
                generator: "slow".to_owned(),
                generator_config: Value::Null,
                template: None,
            },
            priority: 0,
            enabled: true,
        });
        let prompt = m.generate(&PromptContext::default()).await.unwrap();
        assert!(prompt.content.is_empty());
        assert!(!prompt.provider_results[0].success);
    }

    #[tokio::test]
    async fn file_provider_reloads_on_change_when_watching() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.md");
        std::fs::write(&path, "version one").unwrap();

        let m = manager();
        m.add_provider(PromptProvider {
            id: "file".to_owned(),
            source: PromptSource::File {
                path: path.clone(),
                watch_for_changes: true,
                variables: HashMap::new(),
            },
            priority: 0,
            enabled: true,
        });

        let first = m.generate(&PromptContext::default()).await.unwrap();
        assert_eq!(first.content, "version one");

        // Rewrite, pushing the mtime well past filesystem granularity.
        std::fs::write(&path, "version two").unwrap();
        let later = std::time::SystemTime::now() + Duration::from_secs(2);
        let _ = std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .and_then(|f| f.set_modified(later));

        let second = m.generate(&PromptContext::default()).await.unwrap();
        assert_eq!(second.content, "version two");
    }

    #[tokio::test]
    async fn set_enabled_toggles_provider() {
        let m = manager();
        m.add_provider(static_provider("a", "A", 0));
        assert!(m.set_enabled("a", false));
        let prompt = m.generate(&PromptContext::default()).await.unwrap();
        assert!(prompt.content.is_empty());
        assert!(!m.set_enabled("ghost", false));
    }
}
