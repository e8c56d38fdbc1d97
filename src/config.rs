//! Provider configuration helpers and the explicit `AgentConfig` record
//! (§9's re-architecture note: replaces a global config singleton).
//!
//! `Provider`/`get_base_url`/`get_model` are carried over from the teacher's
//! documented `config` module (local OpenAI-compatible servers), generalized
//! to read the same environment-variable overrides. `AgentConfig` mirrors
//! the teacher's `AgentOptionsBuilder` validate-on-`build()` pattern.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::approval::CommandPattern;
use crate::error::{Error, Result};
use crate::tools::DEFAULT_LOOP_BREAKING_TOOLS;

/// Default approval timeout (§4.6: "a reasonable default... 5 minutes").
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Default per-command execution timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2 * 60);
/// Default context token budget passed to `Memory::prune`.
pub const DEFAULT_CONTEXT_TOKEN_BUDGET: usize = 8_000;

/// Supported local LLM server backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    LMStudio,
    Ollama,
    LlamaCpp,
    VLLM,
}

impl Provider {
    fn default_base_url(self) -> &'static str {
        match self {
            Provider::LMStudio => "http://localhost:1234/v1",
            Provider::Ollama => "http://localhost:11434/v1",
            Provider::LlamaCpp => "http://localhost:8080/v1",
            Provider::VLLM => "http://localhost:8000/v1",
        }
    }
}

/// Base URL for API requests. Priority: `AGENTCORE_RT_BASE_URL` env override
/// > provider default > `fallback`.
pub fn get_base_url(provider: Option<Provider>, fallback: &str) -> String {
    if let Ok(url) = env::var("AGENTCORE_RT_BASE_URL") {
        return url;
    }
    match provider {
        Some(p) => p.default_base_url().to_string(),
        None => fallback.to_string(),
    }
}

/// Model name for requests. Priority: `AGENTCORE_RT_MODEL` env override (if
/// `prefer_env`) > `fallback`.
pub fn get_model(fallback: &str, prefer_env: bool) -> String {
    if prefer_env {
        if let Ok(model) = env::var("AGENTCORE_RT_MODEL") {
            return model;
        }
    }
    fallback.to_string()
}

/// Explicit configuration record for one agent instance (§9).
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub base_url: String,
    pub model: String,
    pub workspace_root: std::path::PathBuf,
    pub approval_timeout: Duration,
    pub command_timeout: Duration,
    pub context_token_budget: usize,
    pub auto_approve: HashMap<String, bool>,
    pub command_whitelist: Vec<CommandPattern>,
    pub summarization_exclusions: Vec<String>,
    pub summarization_recent_buffer: usize,
    pub event_channel_capacity: usize,
}

/// Builder with validate-on-`build()`, mirroring the teacher's
/// `AgentOptionsBuilder`. Required: `base_url`, `model`, `workspace_root`.
#[derive(Debug, Default)]
pub struct AgentConfigBuilder {
    base_url: Option<String>,
    model: Option<String>,
    workspace_root: Option<std::path::PathBuf>,
    approval_timeout: Option<Duration>,
    command_timeout: Option<Duration>,
    context_token_budget: Option<usize>,
    auto_approve: HashMap<String, bool>,
    command_whitelist: Vec<CommandPattern>,
    summarization_exclusions: Option<Vec<String>>,
    summarization_recent_buffer: Option<usize>,
    event_channel_capacity: Option<usize>,
}

impl AgentConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn workspace_root(mut self, root: impl Into<std::path::PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    pub fn approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = Some(timeout);
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    pub fn context_token_budget(mut self, budget: usize) -> Self {
        self.context_token_budget = Some(budget);
        self
    }

    pub fn auto_approve(mut self, tool_name: impl Into<String>, granted: bool) -> Self {
        self.auto_approve.insert(tool_name.into(), granted);
        self
    }

    pub fn command_whitelist(mut self, patterns: Vec<CommandPattern>) -> Self {
        self.command_whitelist = patterns;
        self
    }

    pub fn summarization_exclusions(mut self, names: Vec<String>) -> Self {
        self.summarization_exclusions = Some(names);
        self
    }

    pub fn summarization_recent_buffer(mut self, count: usize) -> Self {
        self.summarization_recent_buffer = Some(count);
        self
    }

    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = Some(capacity);
        self
    }

    pub fn build(self) -> Result<AgentConfig> {
        let base_url = self
            .base_url
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::config("base_url is required"))?;
        let model = self
            .model
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::config("model is required"))?;
        let workspace_root = self
            .workspace_root
            .ok_or_else(|| Error::config("workspace_root is required"))?;
        let context_token_budget = self
            .context_token_budget
            .unwrap_or(DEFAULT_CONTEXT_TOKEN_BUDGET);
        if context_token_budget == 0 {
            return Err(Error::config("context_token_budget must be greater than 0"));
        }

        Ok(AgentConfig {
            base_url,
            model,
            workspace_root,
            approval_timeout: self.approval_timeout.unwrap_or(DEFAULT_APPROVAL_TIMEOUT),
            command_timeout: self.command_timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT),
            context_token_budget,
            auto_approve: self.auto_approve,
            command_whitelist: self.command_whitelist,
            summarization_exclusions: self.summarization_exclusions.unwrap_or_else(|| {
                DEFAULT_LOOP_BREAKING_TOOLS
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            }),
            summarization_recent_buffer: self.summarization_recent_buffer.unwrap_or(4),
            event_channel_capacity: self
                .event_channel_capacity
                .unwrap_or(crate::channels::DEFAULT_EVENT_CHANNEL_CAPACITY),
        })
    }
}

impl AgentConfig {
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_base_url_falls_back_to_provider_default() {
        env::remove_var("AGENTCORE_RT_BASE_URL");
        assert_eq!(
            get_base_url(Some(Provider::Ollama), "unused"),
            "http://localhost:11434/v1"
        );
    }

    #[test]
    fn get_base_url_falls_back_to_fallback_without_provider() {
        env::remove_var("AGENTCORE_RT_BASE_URL");
        assert_eq!(get_base_url(None, "http://example.test"), "http://example.test");
    }

    #[test]
    fn builder_requires_base_url_model_and_workspace_root() {
        let err = AgentConfig::builder().build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn builder_rejects_zero_token_budget() {
        let err = AgentConfig::builder()
            .base_url("http://localhost:1234/v1")
            .model("qwen2.5")
            .workspace_root(std::env::temp_dir())
            .context_token_budget(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn builder_applies_defaults_when_optional_fields_are_unset() {
        let config = AgentConfig::builder()
            .base_url("http://localhost:1234/v1")
            .model("qwen2.5")
            .workspace_root(std::env::temp_dir())
            .build()
            .unwrap();
        assert_eq!(config.approval_timeout, DEFAULT_APPROVAL_TIMEOUT);
        assert_eq!(config.command_timeout, DEFAULT_COMMAND_TIMEOUT);
        assert_eq!(config.context_token_budget, DEFAULT_CONTEXT_TOKEN_BUDGET);
        assert_eq!(
            config.summarization_exclusions,
            vec!["task_completion", "ask_question", "converse"]
        );
    }
}
