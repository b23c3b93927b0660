use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use digest_core::config::AiConfig;

use crate::prompt;

/// What a summarization call produced.
///
/// "Nothing to say" is a first-class outcome rather than an error or a
/// magic string: callers skip `NoMessages` silently and only treat
/// `Err(_)` as a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    /// A non-empty summary.
    Content(String),
    /// The input had nothing summarizable.
    NoMessages,
}

/// Why a summarization call failed.
#[derive(Debug, Error)]
pub enum SummarizerError {
    #[error("no API key configured: set [ai].api_key or the api_key_env variable")]
    MissingApiKey,
    #[error("summarization timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("summarization API error: {0}")]
    Api(String),
    #[error("summarization request failed: {0}")]
    Request(#[from] async_openai::error::OpenAIError),
}

impl SummarizerError {
    /// Whether a retry could plausibly succeed. Timeouts and network-level
    /// failures are transient; API rejections (auth, bad request) are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Request(async_openai::error::OpenAIError::Reqwest(_))
        )
    }
}

/// A summarization backend.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize one transcript. `label` names the slice being summarized
    /// ("Morning (06:00-12:00)", "last 24 hours") and may appear in the
    /// prompt.
    async fn summarize(
        &self,
        transcript: &str,
        label: &str,
    ) -> Result<SummaryOutcome, SummarizerError>;

    /// Readiness check. Backends that talk to an external service verify
    /// connectivity and credentials here.
    async fn probe(&self) -> Result<(), SummarizerError> {
        Ok(())
    }
}

/// Summarizer backed by an OpenAI-compatible chat completion endpoint.
///
/// Each call gets a hard timeout; timeouts and connection-level failures
/// are retried up to `max_retries` times before the error is returned.
pub struct OpenAiSummarizer {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
    max_retries: u32,
    has_key: bool,
}

impl OpenAiSummarizer {
    /// Build from config, resolving the API key from `api_key` or the
    /// `api_key_env` environment variable.
    pub fn from_config(config: &AiConfig) -> Self {
        let api_key = config.api_key.clone().or_else(|| {
            config
                .api_key_env
                .as_ref()
                .and_then(|env_var| std::env::var(env_var).ok())
        });
        let has_key = api_key.is_some();
        let openai_config = OpenAIConfig::new()
            .with_api_base(&config.api_base)
            .with_api_key(api_key.unwrap_or_else(|| "not-needed".to_string()));

        Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            has_key,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One chat completion round-trip under the configured timeout.
    async fn chat(&self, system: &str, user: &str) -> Result<String, SummarizerError> {
        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(system)
            .build()
            .map_err(|e| SummarizerError::Api(e.to_string()))?;
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(user)
            .build()
            .map_err(|e| SummarizerError::Api(e.to_string()))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .temperature(self.temperature)
            .max_completion_tokens(self.max_tokens)
            .build()
            .map_err(|e| SummarizerError::Api(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| SummarizerError::Timeout {
                secs: self.timeout.as_secs(),
            })??;

        let choice = response
            .choices
            .first()
            .ok_or_else(|| SummarizerError::Api("no choices in response".into()))?;
        Ok(choice.message.content.clone().unwrap_or_default())
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(
        &self,
        transcript: &str,
        label: &str,
    ) -> Result<SummaryOutcome, SummarizerError> {
        if transcript.trim().is_empty() {
            return Ok(SummaryOutcome::NoMessages);
        }
        if !self.has_key {
            return Err(SummarizerError::MissingApiKey);
        }

        let user = prompt::user_prompt(label, transcript);
        let mut last_transient = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!("retrying '{}' summary, attempt {}", label, attempt + 1);
            }
            match self.chat(prompt::SUMMARY_SYSTEM_PROMPT, &user).await {
                Ok(content) => {
                    let content = content.trim();
                    return if content.is_empty() {
                        Ok(SummaryOutcome::NoMessages)
                    } else {
                        Ok(SummaryOutcome::Content(content.to_string()))
                    };
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    warn!("'{}' summary attempt {} failed: {}", label, attempt + 1, e);
                    last_transient = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_transient.unwrap_or_else(|| SummarizerError::Api("retries exhausted".into())))
    }

    async fn probe(&self) -> Result<(), SummarizerError> {
        if !self.has_key {
            return Err(SummarizerError::MissingApiKey);
        }
        let content = self
            .chat(
                "You are a connectivity probe.",
                "Reply with the single word OK.",
            )
            .await?;
        if content.trim().is_empty() {
            return Err(SummarizerError::Api("probe returned an empty response".into()));
        }
        Ok(())
    }
}
