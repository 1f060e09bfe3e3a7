//! # VCP Pipeline
//!
//! The ordered message-preprocessor chain applied to every chat request
//! before it leaves for the LLM.
//!
//! Preprocessors are in-process modules selected by name from the manifest's
//! `entryPoint.script` and compiled into the [`builtin`] registry. The chain
//! is strictly sequential: the output of step *i* is the input of step
//! *i + 1*. The chain is also best-effort — a step that fails is logged and
//! its input passes through unchanged, so a preprocessor bug can never
//! poison a request.
//!
//! # Hot reload
//!
//! The active chain lives behind one `Arc` that reloads swap atomically.
//! A request entering the old chain completes on the old chain; no in-flight
//! work is interrupted.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};

use vcp_core::error::PreprocessResult;
use vcp_core::manifest::{PluginManifest, PluginType};
use vcp_core::message::ChatMessage;

pub mod builtin;
pub mod order;

// =============================================================================
// MessagePreprocessor trait
// =============================================================================

/// An in-process transformation over a chat message array.
///
/// Implementations must be stateless with respect to configuration: the
/// effective config is handed in on every call and must not be cached
/// between calls.
#[async_trait]
pub trait MessagePreprocessor: Send + Sync {
    /// Transforms `messages`, returning the array to hand to the next step.
    async fn process_messages(
        &self,
        messages: Vec<ChatMessage>,
        config: &Value,
    ) -> PreprocessResult<Vec<ChatMessage>>;
}

// =============================================================================
// Pipeline
// =============================================================================

/// One resolved step of the chain.
pub struct PipelineStage {
    manifest: Arc<PluginManifest>,
    module: Arc<dyn MessagePreprocessor>,
}

impl PipelineStage {
    /// Resolves a preprocessor manifest to a stage via the builtin registry.
    ///
    /// Returns `None` (with a warning) when the manifest is not a
    /// preprocessor or names an unknown module.
    pub fn from_manifest(manifest: Arc<PluginManifest>) -> Option<Self> {
        if manifest.plugin_type != PluginType::MessagePreprocessor {
            return None;
        }
        let script = manifest
            .entry_point
            .as_ref()
            .and_then(|ep| ep.script.as_deref())
            .unwrap_or(&manifest.name);
        match builtin::resolve(script) {
            Some(module) => Some(Self { manifest, module }),
            None => {
                warn!(
                    plugin = %manifest.name,
                    script,
                    "No built-in preprocessor module matches this manifest — skipping"
                );
                None
            }
        }
    }

    /// The owning plugin's name.
    pub fn name(&self) -> &str {
        &self.manifest.name
    }
}

#[derive(Default)]
struct PipelineInner {
    stages: Vec<PipelineStage>,
}

/// The hot-swappable preprocessor chain.
///
/// Cheap to share (`Arc` inside); [`run`](Self::run) may be called
/// concurrently from any number of requests.
#[derive(Default)]
pub struct PreprocessorPipeline {
    inner: RwLock<Arc<PipelineInner>>,
}

impl PreprocessorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically installs a new chain, assembled from `manifests` in the
    /// order given by `order`.
    ///
    /// Names in `order` with no matching preprocessor manifest are skipped.
    pub fn install(&self, order: &[String], manifests: &[Arc<PluginManifest>]) {
        let stages: Vec<PipelineStage> = order
            .iter()
            .filter_map(|name| {
                manifests
                    .iter()
                    .find(|m| &m.name == name)
                    .cloned()
                    .and_then(PipelineStage::from_manifest)
            })
            .collect();
        let names: Vec<&str> = stages.iter().map(PipelineStage::name).collect();
        info!(order = ?names, "Preprocessor pipeline installed");
        *self.inner.write() = Arc::new(PipelineInner { stages });
    }

    /// The names of the currently installed chain, in execution order.
    pub fn order(&self) -> Vec<String> {
        self.inner
            .read()
            .stages
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Passes `messages` through the chain.
    ///
    /// Each step receives its plugin's effective config, re-resolved on
    /// every call. A step that fails is logged and skipped: its input is
    /// passed to the next step unchanged.
    pub async fn run(&self, mut messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
        let chain = self.inner.read().clone();
        for stage in &chain.stages {
            let config = stage.manifest.effective_config_json();
            match stage
                .module
                .process_messages(messages.clone(), &config)
                .await
            {
                Ok(next) => {
                    debug!(plugin = %stage.name(), count = next.len(), "Preprocessor applied");
                    messages = next;
                }
                Err(e) => {
                    warn!(
                        plugin = %stage.name(),
                        error = %e,
                        "Preprocessor failed — passing its input through unchanged"
                    );
                }
            }
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use vcp_core::error::PreprocessError;
    use vcp_core::manifest::EntryPoint;

    struct Tagger(&'static str);

    #[async_trait]
    impl MessagePreprocessor for Tagger {
        async fn process_messages(
            &self,
            mut messages: Vec<ChatMessage>,
            _config: &Value,
        ) -> PreprocessResult<Vec<ChatMessage>> {
            messages.push(ChatMessage::text("system", self.0));
            Ok(messages)
        }
    }

    struct Failing;

    #[async_trait]
    impl MessagePreprocessor for Failing {
        async fn process_messages(
            &self,
            _messages: Vec<ChatMessage>,
            _config: &Value,
        ) -> PreprocessResult<Vec<ChatMessage>> {
            Err(PreprocessError("deliberate".into()))
        }
    }

    fn pipeline_of(stages: Vec<PipelineStage>) -> PreprocessorPipeline {
        let pipeline = PreprocessorPipeline::new();
        *pipeline.inner.write() = Arc::new(PipelineInner { stages });
        pipeline
    }

    fn stage(name: &str, module: Arc<dyn MessagePreprocessor>) -> PipelineStage {
        PipelineStage {
            manifest: Arc::new(PluginManifest {
                name: name.into(),
                display_name: None,
                plugin_type: PluginType::MessagePreprocessor,
                entry_point: Some(EntryPoint::default()),
                communication: None,
                refresh_interval_cron: None,
                capabilities: None,
                config_schema: HashMap::new(),
                base_path: None,
                plugin_specific_env_config: HashMap::new(),
                is_distributed: false,
                server_id: None,
            }),
            module,
        }
    }

    #[tokio::test]
    async fn steps_run_in_order() {
        let pipeline = pipeline_of(vec![
            stage("first", Arc::new(Tagger("one"))),
            stage("second", Arc::new(Tagger("two"))),
        ]);
        let out = pipeline.run(vec![ChatMessage::text("user", "hi")]).await;
        let texts: Vec<_> = out.iter().filter_map(ChatMessage::as_text).collect();
        assert_eq!(texts, vec!["hi", "one", "two"]);
    }

    #[tokio::test]
    async fn failure_passes_input_through() {
        let pipeline = pipeline_of(vec![
            stage("bad", Arc::new(Failing)),
            stage("good", Arc::new(Tagger("after"))),
        ]);
        let out = pipeline.run(vec![ChatMessage::text("user", "hi")]).await;
        let texts: Vec<_> = out.iter().filter_map(ChatMessage::as_text).collect();
        // The failing step contributed nothing; the chain continued.
        assert_eq!(texts, vec!["hi", "after"]);
    }

    #[tokio::test]
    async fn empty_pipeline_is_identity() {
        let pipeline = PreprocessorPipeline::new();
        let input = vec![ChatMessage::text("user", "unchanged")];
        let out = pipeline.run(input.clone()).await;
        assert_eq!(out, input);
    }

    #[test]
    fn install_resolves_builtins_in_order() {
        let manifests: Vec<Arc<PluginManifest>> = ["ContextTrimmer", "ImageRecognizer"]
            .into_iter()
            .map(|name| {
                let script = match name {
                    "ContextTrimmer" => "context-trimmer",
                    _ => "image-recognizer",
                };
                Arc::new(PluginManifest {
                    name: name.into(),
                    display_name: None,
                    plugin_type: PluginType::MessagePreprocessor,
                    entry_point: Some(EntryPoint {
                        command: None,
                        script: Some(script.into()),
                    }),
                    communication: None,
                    refresh_interval_cron: None,
                    capabilities: None,
                    config_schema: HashMap::new(),
                    base_path: None,
                    plugin_specific_env_config: HashMap::new(),
                    is_distributed: false,
                    server_id: None,
                })
            })
            .collect();

        let pipeline = PreprocessorPipeline::new();
        pipeline.install(
            &["ImageRecognizer".into(), "ContextTrimmer".into(), "Ghost".into()],
            &manifests,
        );
        assert_eq!(pipeline.order(), vec!["ImageRecognizer", "ContextTrimmer"]);
    }
}
