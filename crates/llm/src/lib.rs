use std::sync::Arc;

mod chat;
mod content;
mod events;
mod model;
mod provider;
mod rig_adapter;
mod scripted;

pub use chat::{ChatOptions, ProviderChat};
pub use content::{Content, ContentRole, InlineData, Part};
pub use events::{StreamEvent, StreamEventPayload, StreamId};
pub use model::{DEFAULT_GEMINI_MODEL, ECHO_MODEL, Model, default_gemini_models};
pub use provider::{
    LlmProvider, ProviderConfig, ProviderError, ProviderEventStream, ProviderResult,
    ProviderStreamHandle, ProviderWorker, StreamRequest,
};
pub use rig_adapter::{RIG_GEMINI_PROVIDER_ID, RigGeminiAdapter};
pub use scripted::{ECHO_PROVIDER_ID, ScriptedProvider, ScriptedReply};

pub fn create_provider(mut config: ProviderConfig) -> ProviderResult<Arc<dyn LlmProvider>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = RIG_GEMINI_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        "gemini" | "google" | "rig-gemini" => {
            config.provider_id = RIG_GEMINI_PROVIDER_ID.to_string();
            Ok(Arc::new(RigGeminiAdapter::new(config)?))
        }
        ECHO_PROVIDER_ID => Ok(Arc::new(ScriptedProvider::echo())),
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-provider",
            provider_id: config.provider_id,
        }),
    }
}
