use std::sync::Arc;

use snafu::ensure;
use tokio::sync::mpsc;

use super::{CapabilityError, UnsupportedSnafu};

pub const MICROPHONE_DENIED_ALERT: &str = "Microphone access was denied. Please allow microphone access in your settings to use voice input.";
pub const SPEECH_UNSUPPORTED_TEXT: &str = "Speech recognition is not supported here.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechErrorKind {
    NotAllowed,
    NoSpeech,
    Aborted,
    Network,
    Other(String),
}

impl SpeechErrorKind {
    /// Maps a recognizer error code such as `not-allowed` or `no-speech`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "not-allowed" | "service-not-allowed" => Self::NotAllowed,
            "no-speech" => Self::NoSpeech,
            "aborted" => Self::Aborted,
            "network" => Self::Network,
            other => Self::Other(other.to_string()),
        }
    }

    /// Only a denied microphone is worth interrupting the user for.
    pub fn user_alert(&self) -> Option<&'static str> {
        match self {
            Self::NotAllowed => Some(MICROPHONE_DENIED_ALERT),
            Self::NoSpeech | Self::Aborted | Self::Network | Self::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    Started,
    /// Every transcript recognized so far, in order.
    Results(Vec<String>),
    Error(SpeechErrorKind),
    Ended,
}

pub trait SpeechRecognizer: Send + Sync {
    fn is_supported(&self) -> bool;
    /// Starts continuous recognition; events arrive until `Ended`.
    fn start(
        &self,
        language: &str,
    ) -> Result<mpsc::UnboundedReceiver<SpeechEvent>, CapabilityError>;
    fn stop(&self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedSpeech;

impl SpeechRecognizer for UnsupportedSpeech {
    fn is_supported(&self) -> bool {
        false
    }

    fn start(
        &self,
        _language: &str,
    ) -> Result<mpsc::UnboundedReceiver<SpeechEvent>, CapabilityError> {
        UnsupportedSnafu {
            stage: "speech-start",
            capability: "speech recognition",
        }
        .fail()
    }

    fn stop(&self) {}
}

/// Dictation state folded from recognizer events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dictation {
    listening: bool,
    transcript: String,
    error: Option<SpeechErrorKind>,
}

impl Dictation {
    pub fn apply(&mut self, event: SpeechEvent) {
        match event {
            SpeechEvent::Started => self.listening = true,
            SpeechEvent::Results(transcripts) => self.transcript = transcripts.concat(),
            SpeechEvent::Error(kind) => {
                tracing::warn!(error = ?kind, "speech recognition error");
                self.listening = false;
                self.error = Some(kind);
            }
            SpeechEvent::Ended => self.listening = false,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn error(&self) -> Option<&SpeechErrorKind> {
        self.error.as_ref()
    }

    pub fn alert(&self) -> Option<&'static str> {
        self.error.as_ref().and_then(SpeechErrorKind::user_alert)
    }
}

/// One running dictation. Dropping it stops the recognizer.
pub struct DictationSession {
    recognizer: Arc<dyn SpeechRecognizer>,
    events: mpsc::UnboundedReceiver<SpeechEvent>,
    state: Dictation,
    finished: bool,
}

impl DictationSession {
    pub fn start(
        recognizer: Arc<dyn SpeechRecognizer>,
        language: &str,
    ) -> Result<Self, CapabilityError> {
        ensure!(
            recognizer.is_supported(),
            UnsupportedSnafu {
                stage: "dictation-start",
                capability: "speech recognition",
            }
        );
        let events = recognizer.start(language)?;

        Ok(Self {
            recognizer,
            events,
            state: Dictation {
                listening: true,
                ..Dictation::default()
            },
            finished: false,
        })
    }

    pub fn state(&self) -> &Dictation {
        &self.state
    }

    /// Applies the next event; `None` once the recognizer has ended.
    pub async fn next(&mut self) -> Option<&Dictation> {
        if self.finished {
            return None;
        }
        match self.events.recv().await {
            Some(event) => {
                let ended = matches!(event, SpeechEvent::Ended | SpeechEvent::Error(_));
                self.state.apply(event);
                self.finished = ended;
                Some(&self.state)
            }
            None => {
                self.finished = true;
                self.state.listening = false;
                None
            }
        }
    }

    /// Drains events until the recognizer stops.
    pub async fn finish(mut self) -> Dictation {
        while self.next().await.is_some() {}
        self.state.clone()
    }

    pub fn stop(&mut self) {
        if !self.finished {
            self.recognizer.stop();
        }
    }
}

impl Drop for DictationSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct ScriptedRecognizer {
        events: Mutex<Vec<SpeechEvent>>,
        stops: AtomicUsize,
    }

    impl ScriptedRecognizer {
        fn new(events: Vec<SpeechEvent>) -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(events),
                stops: AtomicUsize::new(0),
            })
        }
    }

    impl SpeechRecognizer for ScriptedRecognizer {
        fn is_supported(&self) -> bool {
            true
        }

        fn start(
            &self,
            _language: &str,
        ) -> Result<mpsc::UnboundedReceiver<SpeechEvent>, CapabilityError> {
            let (tx, rx) = mpsc::unbounded_channel();
            for event in self.events.lock().unwrap().drain(..) {
                tx.send(event).unwrap();
            }
            Ok(rx)
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn transcripts_are_joined_in_order() {
        let recognizer = ScriptedRecognizer::new(vec![
            SpeechEvent::Started,
            SpeechEvent::Results(vec!["hello ".into()]),
            SpeechEvent::Results(vec!["hello ".into(), "world".into()]),
            SpeechEvent::Ended,
        ]);

        let session = DictationSession::start(recognizer.clone(), "en-US").unwrap();
        let dictation = session.finish().await;

        assert_eq!(dictation.transcript(), "hello world");
        assert!(!dictation.is_listening());
        assert_eq!(dictation.alert(), None);
        assert_eq!(recognizer.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn denied_microphone_raises_alert() {
        let recognizer = ScriptedRecognizer::new(vec![
            SpeechEvent::Started,
            SpeechEvent::Error(SpeechErrorKind::from_code("not-allowed")),
        ]);

        let dictation = DictationSession::start(recognizer, "en-US")
            .unwrap()
            .finish()
            .await;
        assert_eq!(dictation.alert(), Some(MICROPHONE_DENIED_ALERT));
        assert!(!dictation.is_listening());

        assert_eq!(SpeechErrorKind::from_code("no-speech").user_alert(), None);
    }

    #[test]
    fn dropping_a_live_session_stops_the_recognizer() {
        let recognizer = ScriptedRecognizer::new(vec![SpeechEvent::Started]);
        let session = DictationSession::start(recognizer.clone(), "en-US").unwrap();
        assert!(session.state().is_listening());
        drop(session);
        assert_eq!(recognizer.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsupported_recognizer_is_refused() {
        assert!(
            DictationSession::start(Arc::new(UnsupportedSpeech), "en-US").is_err()
        );
    }
}
