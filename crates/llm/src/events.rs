/// Identifier for one streaming generation.
///
/// Changes on every send so events from a superseded stream can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl StreamId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

/// Provider-agnostic stream payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventPayload {
    Delta(String),
    Done,
    Error(String),
}

impl StreamEventPayload {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error(_))
    }
}

/// One event delivered by a provider worker, tagged with its stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub stream_id: StreamId,
    pub payload: StreamEventPayload,
}

impl StreamEvent {
    pub fn delta(stream_id: StreamId, text: impl Into<String>) -> Self {
        Self {
            stream_id,
            payload: StreamEventPayload::Delta(text.into()),
        }
    }

    pub fn done(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            payload: StreamEventPayload::Done,
        }
    }

    pub fn error(stream_id: StreamId, message: impl Into<String>) -> Self {
        Self {
            stream_id,
            payload: StreamEventPayload::Error(message.into()),
        }
    }
}
