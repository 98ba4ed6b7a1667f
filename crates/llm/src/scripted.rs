use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use snafu::ensure;
use tokio::sync::mpsc;

use super::content::{ContentRole, Part};
use super::events::{StreamEvent, StreamId};
use super::model::{ECHO_MODEL, Model};
use super::provider::{
    EmptyContentSetSnafu, LlmProvider, ProviderError, ProviderResult, ProviderStreamHandle,
    ProviderWorker, StreamRequest, make_event_stream,
};

pub const ECHO_PROVIDER_ID: &str = "echo";

/// One canned reply consumed by the next `stream_chat` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Deliver the fragments in order, then `Done`.
    Fragments(Vec<String>),
    /// Deliver the fragments, then a terminal `Error`.
    FailAfter {
        fragments: Vec<String>,
        message: String,
    },
    /// Refuse to open the stream at all.
    RefuseOpen(String),
    /// Deliver the fragments and close the channel without a terminal event.
    Truncated(Vec<String>),
}

impl ScriptedReply {
    pub fn fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Fragments(fragments.into_iter().map(Into::into).collect())
    }
}

/// Deterministic provider for offline use and tests.
///
/// Replies come from a queue; once it is empty the provider echoes the last user turn.
pub struct ScriptedProvider {
    id: String,
    models: Vec<Model>,
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<StreamRequest>>,
    fragment_delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            id: ECHO_PROVIDER_ID.to_string(),
            models: vec![Model::from_id(ECHO_MODEL).with_description("Offline echo replies")],
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            fragment_delay: None,
        }
    }

    pub fn echo() -> Self {
        Self::new([]).with_fragment_delay(Duration::from_millis(30))
    }

    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = Some(delay);
        self
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn next_reply(&self, request: &StreamRequest) -> ScriptedReply {
        let queued = self
            .replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front());
        queued.unwrap_or_else(|| Self::echo_reply(request))
    }

    fn echo_reply(request: &StreamRequest) -> ScriptedReply {
        let Some(last_user) = request
            .contents
            .iter()
            .rev()
            .find(|content| content.role == ContentRole::User)
        else {
            return ScriptedReply::fragments(["(nothing to echo)"]);
        };

        let text = last_user.text();
        let image_count = last_user
            .parts
            .iter()
            .filter(|part| matches!(part, Part::InlineData { .. }))
            .count();

        let mut reply = if text.trim().is_empty() {
            "You sent no text.".to_string()
        } else {
            format!("You said: {}", text.trim())
        };
        if image_count > 0 {
            reply.push_str(&format!(" (with {image_count} image attachment(s))"));
        }

        // Split on word boundaries so the echo streams like a real reply.
        let fragments = reply
            .split_inclusive(' ')
            .map(str::to_string)
            .collect::<Vec<_>>();
        ScriptedReply::Fragments(fragments)
    }

    async fn run_worker(
        stream_id: StreamId,
        fragments: Vec<String>,
        terminal: Option<StreamEvent>,
        event_tx: mpsc::UnboundedSender<StreamEvent>,
        delay: Option<Duration>,
    ) {
        for fragment in fragments {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if event_tx.send(StreamEvent::delta(stream_id, fragment)).is_err() {
                tracing::debug!(stream_id = ?stream_id, "scripted stream receiver dropped");
                return;
            }
        }

        if let Some(terminal) = terminal {
            let _ = event_tx.send(terminal);
        }
    }
}

impl LlmProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Scripted"
    }

    fn default_model(&self) -> &str {
        ECHO_MODEL
    }

    fn models(&self) -> &[Model] {
        &self.models
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        ensure!(
            request.contents.iter().any(|content| !content.is_blank()),
            EmptyContentSetSnafu {
                stage: "scripted-stream-chat",
                stream_id: request.stream_id,
            }
        );

        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let stream_id = request.stream_id;
        let (fragments, terminal) = match self.next_reply(&request) {
            ScriptedReply::Fragments(fragments) => (fragments, Some(StreamEvent::done(stream_id))),
            ScriptedReply::FailAfter { fragments, message } => {
                (fragments, Some(StreamEvent::error(stream_id, message)))
            }
            ScriptedReply::Truncated(fragments) => (fragments, None),
            ScriptedReply::RefuseOpen(message) => {
                return Err(ProviderError::Scripted {
                    stage: "scripted-open-stream",
                    message,
                });
            }
        };

        let (event_tx, stream, _cancel_rx) = make_event_stream();
        let worker: ProviderWorker = Box::pin(Self::run_worker(
            stream_id,
            fragments,
            terminal,
            event_tx,
            self.fragment_delay,
        ));

        Ok(ProviderStreamHandle { stream, worker })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Content;

    async fn collect(handle: ProviderStreamHandle) -> Vec<StreamEvent> {
        let ProviderStreamHandle { mut stream, worker } = handle;
        tokio::spawn(worker);
        let mut events = Vec::new();
        while let Some(event) = stream.recv().await {
            events.push(event);
        }
        events
    }

    fn request(text: &str) -> StreamRequest {
        StreamRequest::new(
            StreamId::new(7),
            ECHO_MODEL,
            vec![Content::user(vec![Part::text(text)])],
        )
    }

    #[tokio::test]
    async fn queued_fragments_arrive_in_order_then_done() {
        let provider = ScriptedProvider::new([ScriptedReply::fragments(["He", "llo!"])]);
        let events = collect(provider.stream_chat(request("Hi")).unwrap()).await;

        assert_eq!(
            events,
            vec![
                StreamEvent::delta(StreamId::new(7), "He"),
                StreamEvent::delta(StreamId::new(7), "llo!"),
                StreamEvent::done(StreamId::new(7)),
            ]
        );
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn echo_is_used_when_queue_is_empty() {
        let provider = ScriptedProvider::new([]);
        let events = collect(provider.stream_chat(request("ping pong")).unwrap()).await;

        let text = events
            .iter()
            .filter_map(|event| match &event.payload {
                crate::events::StreamEventPayload::Delta(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<String>();
        assert_eq!(text, "You said: ping pong");
        assert_eq!(events.last(), Some(&StreamEvent::done(StreamId::new(7))));
    }

    #[test]
    fn refuse_open_surfaces_as_error() {
        let provider = ScriptedProvider::new([ScriptedReply::RefuseOpen("offline".into())]);
        assert!(matches!(
            provider.stream_chat(request("Hi")),
            Err(ProviderError::Scripted { .. })
        ));
    }
}
