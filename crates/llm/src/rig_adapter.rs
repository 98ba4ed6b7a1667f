use futures::StreamExt;
use rig::OneOrMany;
use rig::completion::{CompletionModel, CompletionRequestBuilder, Message as RigMessage};
use rig::message::{ImageMediaType, MimeType, UserContent};
use rig::prelude::CompletionClient;
use rig::providers::gemini;
use rig::streaming::StreamedAssistantContent;
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use super::content::{Content, ContentRole, Part};
use super::events::{StreamEvent, StreamId};
use super::model::{DEFAULT_GEMINI_MODEL, Model, default_gemini_models};
use super::provider::{
    CompletionsFailedSnafu, EmptyContentSetSnafu, HttpClientSnafu, LlmProvider,
    MissingApiKeySnafu, ProviderConfig, ProviderError, ProviderResult, ProviderStreamHandle,
    ProviderWorker, StreamRequest, make_event_stream,
};

pub const RIG_GEMINI_PROVIDER_ID: &str = "gemini";

type RigStreamingResponse =
    rig::streaming::StreamingCompletionResponse<gemini::streaming::StreamingCompletionResponse>;

pub struct RigGeminiAdapter {
    config: ProviderConfig,
    models: Vec<Model>,
}

impl RigGeminiAdapter {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-gemini-new",
                provider_id: config.provider_id.clone(),
            }
        );

        Ok(Self {
            config,
            models: default_gemini_models(),
        })
    }

    fn build_client(config: &ProviderConfig) -> ProviderResult<gemini::Client> {
        let mut builder = gemini::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    fn to_user_content(part: &Part) -> Option<UserContent> {
        match part {
            Part::Text { text } if text.trim().is_empty() => None,
            Part::Text { text } => Some(UserContent::text(text.clone())),
            Part::InlineData { inline_data } => Some(UserContent::image_base64(
                inline_data.data.clone(),
                ImageMediaType::from_mime_type(&inline_data.mime_type),
                None,
            )),
        }
    }

    fn to_rig_message(content: &Content) -> Option<RigMessage> {
        match content.role {
            ContentRole::User => {
                let parts = content
                    .parts
                    .iter()
                    .filter_map(Self::to_user_content)
                    .collect::<Vec<_>>();
                let content = OneOrMany::many(parts).ok()?;
                Some(RigMessage::User { content })
            }
            ContentRole::Model => {
                let text = content.text();
                // Failed turns leave an empty model entry behind; Gemini rejects empty parts.
                if text.trim().is_empty() {
                    None
                } else {
                    Some(RigMessage::assistant(text))
                }
            }
        }
    }

    /// Last sendable content becomes the prompt; everything before it is chat history.
    fn completion_builder(
        model: &gemini::CompletionModel,
        request: &StreamRequest,
    ) -> ProviderResult<CompletionRequestBuilder<gemini::CompletionModel>> {
        let mut messages = request
            .contents
            .iter()
            .filter_map(Self::to_rig_message)
            .collect::<Vec<_>>();

        let Some(prompt) = messages.pop() else {
            tracing::warn!(
                stream_id = ?request.stream_id,
                model_id = %request.model_id,
                content_count = request.contents.len(),
                "cannot open stream because no sendable contents remain after filtering"
            );
            return EmptyContentSetSnafu {
                stage: "open-stream-pop-prompt",
                stream_id: request.stream_id,
            }
            .fail();
        };

        let mut builder = model.completion_request(prompt).messages(messages);

        if let Some(preamble) = request
            .preamble
            .as_ref()
            .filter(|preamble| !preamble.trim().is_empty())
        {
            builder = builder.preamble(preamble.clone());
        }

        if let Some(temperature) = request.temperature {
            builder = builder.temperature(temperature);
        }

        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }

        Ok(builder)
    }

    async fn open_stream(
        config: &ProviderConfig,
        request: &StreamRequest,
    ) -> ProviderResult<RigStreamingResponse> {
        let client = Self::build_client(config)?;
        let model = client.completion_model(request.model_id.clone());
        let builder = Self::completion_builder(&model, request)?;

        builder.stream().await.context(CompletionsFailedSnafu {
            stage: "open-stream",
        })
    }

    fn emit_error_event(
        event_tx: &mpsc::UnboundedSender<StreamEvent>,
        stream_id: StreamId,
        error: ProviderError,
    ) {
        let _ = event_tx.send(StreamEvent::error(stream_id, error.to_string()));
    }

    fn map_stream_item<R>(
        stream_id: StreamId,
        item: StreamedAssistantContent<R>,
    ) -> Option<StreamEvent>
    where
        R: Clone + Unpin,
    {
        match item {
            StreamedAssistantContent::Text(text) if text.text.is_empty() => None,
            StreamedAssistantContent::Text(text) => Some(StreamEvent::delta(stream_id, text.text)),
            StreamedAssistantContent::Reasoning(_)
            | StreamedAssistantContent::ReasoningDelta { .. }
            | StreamedAssistantContent::ToolCall { .. }
            | StreamedAssistantContent::ToolCallDelta { .. }
            | StreamedAssistantContent::Final(_) => None,
        }
    }

    async fn run_stream_worker(
        config: ProviderConfig,
        request: StreamRequest,
        event_tx: mpsc::UnboundedSender<StreamEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let stream_id = request.stream_id;
        let mut stream = match Self::open_stream(&config, &request).await {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!(
                    stream_id = ?stream_id,
                    provider_id = %config.provider_id,
                    model_id = %request.model_id,
                    error = %error,
                    "failed to open provider stream"
                );
                Self::emit_error_event(&event_tx, stream_id, error);
                return;
            }
        };

        let mut cancelled = false;
        let mut stream_failed = false;

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    cancelled = true;
                    tracing::debug!(stream_id = ?stream_id, "provider stream cancelled");
                    stream.cancel();
                    break;
                }
                next_item = stream.next() => {
                    match next_item {
                        Some(Ok(item)) => {
                            if let Some(mapped) = Self::map_stream_item(stream_id, item)
                                && event_tx.send(mapped).is_err()
                            {
                                return;
                            }
                        }
                        Some(Err(source)) => {
                            stream_failed = true;
                            tracing::warn!(
                                stream_id = ?stream_id,
                                error = %source,
                                "provider stream emitted an error chunk"
                            );
                            let error = ProviderError::CompletionsFailed {
                                stage: "stream-chunk",
                                source,
                            };
                            Self::emit_error_event(&event_tx, stream_id, error);
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        if !cancelled && !stream_failed {
            let _ = event_tx.send(StreamEvent::done(stream_id));
        }
    }
}

impl LlmProvider for RigGeminiAdapter {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "Rig Gemini"
    }

    fn default_model(&self) -> &str {
        DEFAULT_GEMINI_MODEL
    }

    fn models(&self) -> &[Model] {
        &self.models
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        ensure!(
            request.contents.iter().any(|content| !content.is_blank()),
            EmptyContentSetSnafu {
                stage: "stream-chat",
                stream_id: request.stream_id,
            }
        );

        let (event_tx, stream, cancel_rx) = make_event_stream();
        let worker: ProviderWorker = Box::pin(Self::run_stream_worker(
            self.config.clone(),
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(ProviderStreamHandle { stream, worker })
    }
}
