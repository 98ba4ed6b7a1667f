use std::sync::Arc;

use snafu::ensure;

use super::content::{Content, Part};
use super::events::StreamId;
use super::provider::{
    LlmProvider, MissingModelSnafu, ProviderResult, ProviderStreamHandle, StreamRequest,
};

/// Options fixed for the lifetime of one provider chat handle.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatOptions {
    pub model_id: String,
    pub system_instruction: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

/// Stateful chat handle pre-loaded with a conversation history.
///
/// The handle never mutates its history; owners rebuild it from their own log after each turn.
pub struct ProviderChat {
    provider: Arc<dyn LlmProvider>,
    options: ChatOptions,
    history: Vec<Content>,
}

impl ProviderChat {
    pub fn open(
        provider: Arc<dyn LlmProvider>,
        history: Vec<Content>,
        mut options: ChatOptions,
    ) -> ProviderResult<Self> {
        if options.model_id.trim().is_empty() {
            options.model_id = provider.default_model().to_string();
        }
        ensure!(
            !options.model_id.trim().is_empty(),
            MissingModelSnafu {
                stage: "open-provider-chat",
                provider_id: provider.id().to_string(),
            }
        );

        tracing::debug!(
            provider_id = %provider.id(),
            model_id = %options.model_id,
            history_len = history.len(),
            "opened provider chat"
        );

        Ok(Self {
            provider,
            options,
            history,
        })
    }

    pub fn history(&self) -> &[Content] {
        &self.history
    }

    pub fn model_id(&self) -> &str {
        &self.options.model_id
    }

    pub fn provider_id(&self) -> &str {
        self.provider.id()
    }

    /// Starts streaming the reply to `parts`, sent as a new user turn after the history.
    pub fn send_stream(
        &self,
        stream_id: StreamId,
        parts: Vec<Part>,
    ) -> ProviderResult<ProviderStreamHandle> {
        let mut contents = self.history.clone();
        contents.push(Content::user(parts));

        let mut request = StreamRequest::new(stream_id, self.options.model_id.clone(), contents);
        if let Some(instruction) = &self.options.system_instruction {
            request = request.with_preamble(instruction.clone());
        }
        if let Some(temperature) = self.options.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.options.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        self.provider.stream_chat(request)
    }
}
