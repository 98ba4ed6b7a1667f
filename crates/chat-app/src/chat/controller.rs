use std::sync::Arc;

use ktr_llm::{
    ChatOptions, LlmProvider, Part, ProviderChat, ProviderStreamHandle, StreamEventPayload,
    StreamId,
};
use snafu::{OptionExt, ResultExt, ensure};
use tokio::sync::mpsc;

use crate::auth::User;
use crate::capabilities::{
    Capabilities, NOTIFICATIONS_BLOCKED_TEXT, NOTIFICATIONS_UNSUPPORTED_TEXT, Notification,
    NotificationPermission,
};
use crate::error::{
    CapabilitySnafu, ChatResult, MessageOutOfRangeSnafu, NotSignedInSnafu, NothingToCopySnafu,
    UnknownChatSnafu,
};
use crate::session::{
    OPEN_CHAT_FAILURE_TEXT, SessionStore, new_session, now_millis, open_provider_chat,
};

use super::events::{ChatEvent, IgnoreReason, SendInput, SendOutcome};
use super::message::{ChatId, ChatMessage, ChatSession};
use super::preview::{NOTIFICATION_TITLE, notification_body};
use super::send_state::{SendPhase, SendTarget, SendTransition, SendTransitionRejection};
use super::streaming::{self, ReplyAccumulator, STREAM_FAILURE_TEXT};

/// What happened when the user asked for notification permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationRequestOutcome {
    Unsupported,
    AlreadyGranted,
    Granted,
    Denied,
    /// The prompt was closed without a choice.
    Dismissed,
    /// Denied earlier; only the user can undo that.
    Blocked,
}

impl NotificationRequestOutcome {
    pub fn user_message(self) -> Option<&'static str> {
        match self {
            Self::Unsupported => Some(NOTIFICATIONS_UNSUPPORTED_TEXT),
            Self::Blocked => Some(NOTIFICATIONS_BLOCKED_TEXT),
            Self::AlreadyGranted | Self::Granted | Self::Denied | Self::Dismissed => None,
        }
    }
}

/// Owns the signed-in user's sessions and runs sends against the provider.
///
/// All mutation goes through `&mut self`. Sessions are replaced copy-on-write, so a snapshot
/// from [`ChatController::sessions`] never changes underneath its holder.
pub struct ChatController {
    store: SessionStore,
    provider: Option<Arc<dyn LlmProvider>>,
    chat_options: ChatOptions,
    capabilities: Capabilities,
    user: Option<User>,
    sessions: Arc<Vec<ChatSession>>,
    active_chat_id: Option<ChatId>,
    provider_chat: Option<ProviderChat>,
    send_phase: SendPhase,
    next_stream_id: StreamId,
    notification_permission: NotificationPermission,
    observers: Vec<mpsc::UnboundedSender<ChatEvent>>,
}

impl ChatController {
    pub fn new(
        store: SessionStore,
        provider: Option<Arc<dyn LlmProvider>>,
        chat_options: ChatOptions,
        capabilities: Capabilities,
    ) -> Self {
        let notification_permission = capabilities.notifier.permission();
        Self {
            store,
            provider,
            chat_options,
            capabilities,
            user: None,
            sessions: Arc::new(Vec::new()),
            active_chat_id: None,
            provider_chat: None,
            send_phase: SendPhase::Idle,
            next_stream_id: StreamId::new(1),
            notification_permission,
            observers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ChatEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(tx);
        rx
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn sessions(&self) -> Arc<Vec<ChatSession>> {
        self.sessions.clone()
    }

    pub fn active_chat_id(&self) -> Option<&ChatId> {
        self.active_chat_id.as_ref()
    }

    pub fn active_session(&self) -> Option<&ChatSession> {
        let active = self.active_chat_id.as_ref()?;
        self.sessions.iter().find(|session| &session.id == active)
    }

    pub fn send_phase(&self) -> &SendPhase {
        &self.send_phase
    }

    pub fn is_loading(&self) -> bool {
        self.send_phase.is_loading()
    }

    /// A provider chat is open and nothing is in flight.
    pub fn can_send(&self) -> bool {
        self.provider_chat.is_some() && !self.is_loading()
    }

    pub fn provider_chat(&self) -> Option<&ProviderChat> {
        self.provider_chat.as_ref()
    }

    pub fn notification_permission(&self) -> NotificationPermission {
        self.notification_permission
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Swaps the provider or its options and reopens the active chat against it.
    pub fn set_provider(
        &mut self,
        provider: Option<Arc<dyn LlmProvider>>,
        chat_options: ChatOptions,
    ) {
        self.settle_abandoned_send();
        self.provider = provider;
        self.chat_options = chat_options;
        if self.user.is_some() {
            self.refresh_provider_chat();
        }
    }

    /// Loads the user's sessions, or starts one fresh session when there are none or they
    /// are unreadable.
    pub fn sign_in(&mut self, user: User) {
        self.settle_abandoned_send();

        let loaded = match self.store.load(&user.email) {
            Ok(sessions) => sessions,
            Err(error) => {
                tracing::warn!(
                    email = %user.email,
                    error = %error,
                    "discarding unreadable chat history"
                );
                Vec::new()
            }
        };
        let sessions = if loaded.is_empty() {
            vec![new_session(now_millis(), &[])]
        } else {
            loaded
        };

        tracing::info!(email = %user.email, sessions = sessions.len(), "loaded chat sessions");
        self.active_chat_id = sessions.first().map(|session| session.id.clone());
        self.sessions = Arc::new(sessions);
        self.user = Some(user);
        self.send_phase = SendPhase::Idle;
        self.persist();
        self.emit(ChatEvent::SessionsChanged);
        self.refresh_provider_chat();
    }

    /// Forgets the user and every in-memory session. Persisted sessions stay.
    pub fn sign_out(&mut self) {
        self.settle_abandoned_send();
        if let Some(user) = self.user.take() {
            tracing::info!(email = %user.email, "signed out");
        }
        self.sessions = Arc::new(Vec::new());
        self.active_chat_id = None;
        self.provider_chat = None;
        self.send_phase = SendPhase::Idle;
        self.emit(ChatEvent::SessionsChanged);
    }

    pub fn new_chat(&mut self) -> ChatResult<ChatId> {
        self.settle_abandoned_send();
        ensure!(self.user.is_some(), NotSignedInSnafu { stage: "new-chat" });

        let session = new_session(now_millis(), &self.sessions);
        let chat_id = session.id.clone();
        Arc::make_mut(&mut self.sessions).insert(0, session);
        self.active_chat_id = Some(chat_id.clone());

        tracing::debug!(chat_id = %chat_id, "created chat");
        self.persist();
        self.emit(ChatEvent::SessionsChanged);
        self.refresh_provider_chat();
        Ok(chat_id)
    }

    pub fn select_chat(&mut self, chat_id: &ChatId) -> ChatResult<()> {
        self.settle_abandoned_send();
        ensure!(
            self.user.is_some(),
            NotSignedInSnafu {
                stage: "select-chat",
            }
        );
        ensure!(
            self.sessions.iter().any(|session| &session.id == chat_id),
            UnknownChatSnafu {
                stage: "select-chat",
                chat_id: chat_id.to_string(),
            }
        );

        self.active_chat_id = Some(chat_id.clone());
        self.emit(ChatEvent::SessionsChanged);
        self.refresh_provider_chat();
        Ok(())
    }

    /// Deletes the user's persisted sessions and leaves exactly one fresh session.
    ///
    /// Callers confirm with the user first; this cannot be undone.
    pub fn clear_history(&mut self) -> ChatResult<ChatId> {
        self.settle_abandoned_send();
        let email = self
            .user
            .as_ref()
            .map(|user| user.email.clone())
            .context(NotSignedInSnafu {
                stage: "clear-history",
            })?;

        if let Err(error) = self.store.clear(&email) {
            tracing::warn!(
                email = %email,
                error = %error,
                "failed to clear persisted chat history"
            );
        }

        let session = new_session(now_millis(), &[]);
        let chat_id = session.id.clone();
        self.sessions = Arc::new(vec![session]);
        self.active_chat_id = Some(chat_id.clone());

        tracing::info!(email = %email, "cleared chat history");
        self.persist();
        self.emit(ChatEvent::SessionsChanged);
        self.refresh_provider_chat();
        Ok(chat_id)
    }

    /// Sends one user turn on the active chat and streams the reply into it.
    ///
    /// Returns once the send settles. Failures end up as an error entry in the chat, not as `Err`.
    pub async fn send_message(&mut self, input: SendInput) -> SendOutcome {
        self.settle_abandoned_send();

        if input.is_empty() {
            return SendOutcome::Ignored(IgnoreReason::EmptyInput);
        }
        if self.user.is_none() {
            return SendOutcome::Ignored(IgnoreReason::NotSignedIn);
        }
        let Some(chat_id) = self.active_chat_id.clone() else {
            return SendOutcome::Ignored(IgnoreReason::NoActiveChat);
        };
        if self.provider_chat.is_none() {
            tracing::debug!(chat_id = %chat_id, "send ignored, no provider chat");
            return SendOutcome::Ignored(IgnoreReason::ProviderChatUnavailable);
        }

        let target = SendTarget::new(chat_id.clone(), self.allocate_stream_id());
        if let Err(rejection) = self.apply_send_transition(SendTransition::Submit(target.clone())) {
            tracing::debug!(?rejection, "send ignored");
            return SendOutcome::Ignored(IgnoreReason::AlreadySending);
        }

        // Revoked when this future completes or is dropped.
        let preview = input
            .image
            .as_ref()
            .map(|image| self.capabilities.object_urls.create(image));

        let text = input.text.trim().to_string();
        let mut parts = Vec::new();
        if !text.is_empty() {
            parts.push(Part::text(text.clone()));
        }
        if let Some(image) = &input.image {
            parts.push(Part::inline_data(image.mime_type(), image.to_base64()));
        }

        let preview_url = preview.as_ref().map(|url| url.as_str().to_string());
        let user_message = ChatMessage::user(text, preview_url);
        let turn_parts = parts.clone();
        self.update_session(&chat_id, move |session| {
            streaming::begin_turn(session, user_message, turn_parts);
        });
        self.emit(ChatEvent::TurnStarted {
            chat_id,
            stream_id: target.stream_id,
        });

        let result = self.stream_reply(&target, parts).await;
        let outcome = self.settle(&target, result);
        drop(preview);
        outcome
    }

    pub async fn request_notification_permission(&mut self) -> NotificationRequestOutcome {
        let notifier = self.capabilities.notifier.clone();
        if !notifier.is_supported() {
            return NotificationRequestOutcome::Unsupported;
        }

        let outcome = match notifier.permission() {
            NotificationPermission::Granted => {
                self.notification_permission = NotificationPermission::Granted;
                NotificationRequestOutcome::AlreadyGranted
            }
            NotificationPermission::Denied => {
                self.notification_permission = NotificationPermission::Denied;
                NotificationRequestOutcome::Blocked
            }
            NotificationPermission::Default => {
                let permission = notifier.request_permission().await;
                self.notification_permission = permission;
                match permission {
                    NotificationPermission::Granted => NotificationRequestOutcome::Granted,
                    NotificationPermission::Denied => NotificationRequestOutcome::Denied,
                    NotificationPermission::Default => NotificationRequestOutcome::Dismissed,
                }
            }
        };

        tracing::debug!(?outcome, "notification permission requested");
        outcome
    }

    /// Copies message `index` of the active chat to the clipboard.
    pub fn copy_message(&self, index: usize) -> ChatResult<()> {
        let message = self
            .active_session()
            .and_then(|session| session.messages.get(index))
            .context(MessageOutOfRangeSnafu {
                stage: "copy-message",
                index,
            })?;
        ensure!(
            message.is_copyable(),
            NothingToCopySnafu {
                stage: "copy-message",
                index,
            }
        );

        self.capabilities
            .clipboard
            .write_text(&message.text)
            .context(CapabilitySnafu {
                stage: "copy-message",
            })
    }

    async fn stream_reply(
        &mut self,
        target: &SendTarget,
        parts: Vec<Part>,
    ) -> Result<String, String> {
        let opened = match &self.provider_chat {
            Some(chat) => chat.send_stream(target.stream_id, parts),
            None => return Err("provider chat is not open".to_string()),
        };
        let ProviderStreamHandle { mut stream, worker } =
            opened.map_err(|error| error.to_string())?;

        self.apply_send_transition(SendTransition::StreamOpened(target.clone()))
            .map_err(|rejection| format!("stream could not start: {rejection:?}"))?;
        tokio::spawn(worker);

        let mut accumulator = ReplyAccumulator::default();
        loop {
            let Some(event) = stream.recv().await else {
                return Err("provider stream closed before completing".to_string());
            };
            if event.stream_id != target.stream_id
                || !self.send_phase.accepts_stream_event(event.stream_id)
            {
                tracing::debug!(
                    stream_id = ?event.stream_id,
                    active = ?target.stream_id,
                    "dropping stale stream event"
                );
                continue;
            }

            match event.payload {
                StreamEventPayload::Delta(fragment) => {
                    let text = accumulator.push(&fragment).to_string();
                    self.update_session(&target.chat_id, |session| {
                        streaming::apply_accumulated(session, &text);
                    });
                    self.emit(ChatEvent::ReplyUpdated {
                        chat_id: target.chat_id.clone(),
                        stream_id: target.stream_id,
                        text,
                    });
                }
                StreamEventPayload::Done => return Ok(accumulator.into_text()),
                StreamEventPayload::Error(message) => return Err(message),
            }
        }
    }

    fn settle(&mut self, target: &SendTarget, result: Result<String, String>) -> SendOutcome {
        let outcome = match result {
            Ok(reply) => {
                if let Err(rejection) =
                    self.apply_send_transition(SendTransition::Complete(target.clone()))
                {
                    tracing::warn!(?rejection, "completed send was not active");
                }
                tracing::debug!(
                    chat_id = %target.chat_id,
                    stream_id = ?target.stream_id,
                    reply_len = reply.len(),
                    "send completed"
                );
                self.emit(ChatEvent::TurnSettled {
                    chat_id: target.chat_id.clone(),
                    stream_id: target.stream_id,
                    succeeded: true,
                });
                self.notify_reply(&reply);
                SendOutcome::Completed {
                    stream_id: target.stream_id,
                    reply,
                }
            }
            Err(message) => {
                self.fail_send(target, &message);
                SendOutcome::Failed {
                    stream_id: target.stream_id,
                    message,
                }
            }
        };

        self.refresh_provider_chat();
        outcome
    }

    fn fail_send(&mut self, target: &SendTarget, message: &str) {
        tracing::warn!(
            chat_id = %target.chat_id,
            stream_id = ?target.stream_id,
            error = %message,
            "send failed"
        );
        if let Err(rejection) = self.apply_send_transition(SendTransition::Fail {
            target: target.clone(),
            message: message.to_string(),
        }) {
            tracing::warn!(?rejection, "failed send was not active");
        }
        self.update_session(&target.chat_id, |session| {
            streaming::fail_turn(session, STREAM_FAILURE_TEXT);
        });
        self.emit(ChatEvent::TurnSettled {
            chat_id: target.chat_id.clone(),
            stream_id: target.stream_id,
            succeeded: false,
        });
    }

    /// A send whose future was dropped before settling still holds the loading flag.
    fn settle_abandoned_send(&mut self) {
        let Some(target) = self.send_phase.active_target().cloned() else {
            return;
        };
        self.fail_send(&target, "send was abandoned before it settled");
        self.refresh_provider_chat();
    }

    fn notify_reply(&mut self, reply: &str) {
        if self.notification_permission != NotificationPermission::Granted
            || !self.capabilities.visibility.is_hidden()
        {
            return;
        }

        let notification = Notification {
            title: NOTIFICATION_TITLE.to_string(),
            body: notification_body(reply),
        };
        if let Err(error) = self.capabilities.notifier.show(&notification) {
            tracing::warn!(error = %error, "failed to show reply notification");
            return;
        }
        self.emit(ChatEvent::NotificationShown {
            title: notification.title,
            body: notification.body,
        });
    }

    /// Rebuilds the provider chat from the active session's history.
    ///
    /// On failure the active session gets an error entry and sends stay disabled.
    fn refresh_provider_chat(&mut self) {
        self.provider_chat = None;
        let Some(session) = self.active_session() else {
            return;
        };
        let chat_id = session.id.clone();

        let opened = match &self.provider {
            Some(provider) => open_provider_chat(provider, &session.history, &self.chat_options)
                .map_err(|error| error.to_string()),
            None => Err("no provider configured".to_string()),
        };

        match opened {
            Ok(chat) => self.provider_chat = Some(chat),
            Err(reason) => {
                tracing::warn!(chat_id = %chat_id, error = %reason, "failed to open provider chat");
                self.update_session(&chat_id, |session| {
                    streaming::append_error(session, OPEN_CHAT_FAILURE_TEXT);
                });
                self.emit(ChatEvent::ErrorAppended {
                    chat_id,
                    text: OPEN_CHAT_FAILURE_TEXT.to_string(),
                });
            }
        }
    }

    fn apply_send_transition(
        &mut self,
        transition: SendTransition,
    ) -> Result<(), SendTransitionRejection> {
        self.send_phase = self.send_phase.apply(transition)?;
        Ok(())
    }

    fn allocate_stream_id(&mut self) -> StreamId {
        let stream_id = self.next_stream_id;
        self.next_stream_id = stream_id.next();
        stream_id
    }

    /// Applies `update` to one session against the latest snapshot, then persists.
    fn update_session(&mut self, chat_id: &ChatId, update: impl FnOnce(&mut ChatSession)) -> bool {
        let sessions = Arc::make_mut(&mut self.sessions);
        let Some(session) = sessions.iter_mut().find(|session| &session.id == chat_id) else {
            tracing::debug!(chat_id = %chat_id, "update for a session that no longer exists");
            return false;
        };
        update(session);
        self.persist();
        true
    }

    fn persist(&self) {
        let Some(user) = &self.user else {
            return;
        };
        if self.sessions.is_empty() {
            return;
        }
        if let Err(error) = self.store.save(&user.email, &self.sessions) {
            tracing::warn!(email = %user.email, error = %error, "failed to persist chat sessions");
        }
    }

    fn emit(&mut self, event: ChatEvent) {
        self.observers.retain(|observer| observer.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use futures::future::BoxFuture;
    use ktr_llm::{Content, ScriptedProvider, ScriptedReply};
    use ktr_storage::{LocalStorage, MemoryStorage};

    use super::*;
    use crate::attachment::ImageAttachment;
    use crate::capabilities::{CapabilityError, Clipboard, ManualVisibility, Notifier};
    use crate::chat::message::MessageRole;
    use crate::error::ChatError;
    use crate::session::GREETING;

    const EMAIL: &str = "user@example.com";

    struct Harness {
        controller: ChatController,
        provider: Arc<ScriptedProvider>,
        storage: Arc<MemoryStorage>,
    }

    fn harness_with(provider: ScriptedProvider, capabilities: Capabilities) -> Harness {
        let storage = Arc::new(MemoryStorage::default());
        let provider = Arc::new(provider);
        let controller = ChatController::new(
            SessionStore::new(storage.clone()),
            Some(provider.clone() as Arc<dyn LlmProvider>),
            ChatOptions::default(),
            capabilities,
        );
        Harness {
            controller,
            provider,
            storage,
        }
    }

    fn signed_in(replies: Vec<ScriptedReply>) -> Harness {
        let mut harness = harness_with(ScriptedProvider::new(replies), Capabilities::headless());
        harness.controller.sign_in(User::new(EMAIL));
        harness
    }

    fn assert_history_invariant(controller: &ChatController) {
        for session in controller.sessions().iter() {
            assert!(
                session.history.len() >= session.mirrored_turns(),
                "session {} mirrors {} turns in {} history entries",
                session.id,
                session.mirrored_turns(),
                session.history.len()
            );
        }
    }

    struct RecordingNotifier {
        permission: Mutex<NotificationPermission>,
        answer: NotificationPermission,
        shown: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        fn new(permission: NotificationPermission, answer: NotificationPermission) -> Arc<Self> {
            Arc::new(Self {
                permission: Mutex::new(permission),
                answer,
                shown: Mutex::new(Vec::new()),
            })
        }
    }

    impl Notifier for RecordingNotifier {
        fn is_supported(&self) -> bool {
            true
        }

        fn permission(&self) -> NotificationPermission {
            *self.permission.lock().unwrap()
        }

        fn request_permission(&self) -> BoxFuture<'_, NotificationPermission> {
            Box::pin(async move {
                *self.permission.lock().unwrap() = self.answer;
                self.answer
            })
        }

        fn show(&self, notification: &Notification) -> Result<(), CapabilityError> {
            self.shown.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingClipboard {
        written: Mutex<Vec<String>>,
    }

    impl Clipboard for RecordingClipboard {
        fn write_text(&self, text: &str) -> Result<(), CapabilityError> {
            self.written.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn sign_in_seeds_one_greeting_session() {
        let harness = signed_in(Vec::new());
        let controller = &harness.controller;

        assert_eq!(controller.sessions().len(), 1);
        let session = controller.active_session().unwrap();
        assert_eq!(session.messages, vec![ChatMessage::model(GREETING)]);
        assert_eq!(session.history, vec![Content::model_text(GREETING)]);
        assert!(controller.can_send());
        assert!(
            harness
                .storage
                .get_item(&SessionStore::storage_key(EMAIL))
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn streamed_reply_fills_placeholder_in_order() {
        let mut harness = signed_in(vec![ScriptedReply::fragments(["He", "llo!"])]);

        let outcome = harness.controller.send_message(SendInput::text("Hi")).await;
        assert!(matches!(outcome, SendOutcome::Completed { ref reply, .. } if reply == "Hello!"));

        let session = harness.controller.active_session().unwrap();
        assert_eq!(
            session.messages,
            vec![
                ChatMessage::model(GREETING),
                ChatMessage::user("Hi", None),
                ChatMessage::model("Hello!"),
            ]
        );
        assert_eq!(
            session.history,
            vec![
                Content::model_text(GREETING),
                Content::user(vec![Part::text("Hi")]),
                Content::model_text("Hello!"),
            ]
        );
        assert!(!harness.controller.is_loading());

        let persisted = SessionStore::new(harness.storage.clone()).load(EMAIL).unwrap();
        assert_eq!(&persisted[0], session);
        assert_eq!(
            harness.controller.provider_chat().unwrap().history(),
            session.history.as_slice()
        );
    }

    #[tokio::test]
    async fn observers_see_each_fragment() {
        let mut harness = signed_in(vec![ScriptedReply::fragments(["He", "llo!"])]);
        let mut events = harness.controller.subscribe();

        harness.controller.send_message(SendInput::text("Hi")).await;

        let chat_id = harness.controller.active_chat_id().unwrap().clone();
        let stream_id = StreamId::new(1);
        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            received.push(event);
        }
        assert_eq!(
            received,
            vec![
                ChatEvent::TurnStarted {
                    chat_id: chat_id.clone(),
                    stream_id,
                },
                ChatEvent::ReplyUpdated {
                    chat_id: chat_id.clone(),
                    stream_id,
                    text: "He".into(),
                },
                ChatEvent::ReplyUpdated {
                    chat_id: chat_id.clone(),
                    stream_id,
                    text: "Hello!".into(),
                },
                ChatEvent::TurnSettled {
                    chat_id,
                    stream_id,
                    succeeded: true,
                },
            ]
        );
    }

    #[tokio::test]
    async fn empty_send_changes_nothing() {
        let mut harness = signed_in(Vec::new());
        let before = harness.controller.sessions();

        let outcome = harness.controller.send_message(SendInput::text("   ")).await;

        assert_eq!(outcome, SendOutcome::Ignored(IgnoreReason::EmptyInput));
        assert!(Arc::ptr_eq(&before, &harness.controller.sessions()));
        assert!(!harness.controller.is_loading());
        assert!(harness.provider.requests().is_empty());
    }

    #[tokio::test]
    async fn mid_stream_failure_replaces_placeholder_with_error() {
        let mut harness = signed_in(vec![ScriptedReply::FailAfter {
            fragments: vec!["Par".into()],
            message: "network down".into(),
        }]);

        let outcome = harness.controller.send_message(SendInput::text("Hi")).await;
        assert!(matches!(
            outcome,
            SendOutcome::Failed { ref message, .. } if message == "network down"
        ));

        let session = harness.controller.active_session().unwrap();
        assert_eq!(
            session.messages,
            vec![
                ChatMessage::model(GREETING),
                ChatMessage::user("Hi", None),
                ChatMessage::error(STREAM_FAILURE_TEXT),
            ]
        );
        assert_eq!(session.history.len(), 3);
        assert_eq!(session.history[1], Content::user(vec![Part::text("Hi")]));
        assert!(!harness.controller.is_loading());
        assert!(harness.controller.can_send());
    }

    #[tokio::test]
    async fn stream_closing_without_terminal_event_is_a_failure() {
        let mut harness = signed_in(vec![ScriptedReply::Truncated(vec!["a".into()])]);

        let outcome = harness.controller.send_message(SendInput::text("Hi")).await;

        assert!(matches!(outcome, SendOutcome::Failed { .. }));
        let last = harness
            .controller
            .active_session()
            .unwrap()
            .last_message()
            .unwrap();
        assert_eq!(last.role, MessageRole::Error);
    }

    #[tokio::test]
    async fn refused_stream_keeps_user_turn_in_history() {
        let mut harness = signed_in(vec![ScriptedReply::RefuseOpen("offline".into())]);

        let outcome = harness.controller.send_message(SendInput::text("Hi")).await;

        assert!(matches!(outcome, SendOutcome::Failed { .. }));
        let session = harness.controller.active_session().unwrap();
        assert_eq!(
            session.last_message(),
            Some(&ChatMessage::error(STREAM_FAILURE_TEXT))
        );
        assert_eq!(session.history[1], Content::user(vec![Part::text("Hi")]));
        assert!(!harness.controller.is_loading());
    }

    #[tokio::test]
    async fn history_invariant_holds_across_mixed_outcomes() {
        let mut harness = signed_in(vec![
            ScriptedReply::fragments(["one"]),
            ScriptedReply::FailAfter {
                fragments: vec!["half".into()],
                message: "boom".into(),
            },
            ScriptedReply::RefuseOpen("nope".into()),
            ScriptedReply::Truncated(Vec::new()),
            ScriptedReply::fragments(["two", " three"]),
        ]);

        for turn in 0..5 {
            harness
                .controller
                .send_message(SendInput::text(format!("q{turn}")))
                .await;
            assert_history_invariant(&harness.controller);
        }
        harness.controller.new_chat().unwrap();
        harness.controller.send_message(SendInput::text("echo me")).await;
        assert_history_invariant(&harness.controller);
    }

    #[tokio::test]
    async fn missing_provider_appends_error_on_each_open() {
        let storage = Arc::new(MemoryStorage::default());
        let mut controller = ChatController::new(
            SessionStore::new(storage),
            None,
            ChatOptions::default(),
            Capabilities::headless(),
        );
        controller.sign_in(User::new(EMAIL));

        let first = controller.active_session().unwrap().clone();
        assert_eq!(
            first.messages,
            vec![
                ChatMessage::model(GREETING),
                ChatMessage::error(OPEN_CHAT_FAILURE_TEXT),
            ]
        );
        assert_eq!(first.history, vec![Content::model_text(GREETING)]);
        assert_eq!(
            controller.send_message(SendInput::text("Hi")).await,
            SendOutcome::Ignored(IgnoreReason::ProviderChatUnavailable)
        );
        assert!(!controller.is_loading());

        controller.new_chat().unwrap();
        controller.select_chat(&first.id).unwrap();

        let reselected = controller.active_session().unwrap();
        assert_eq!(reselected.messages.len(), first.messages.len() + 1);
        assert_eq!(
            reselected.last_message(),
            Some(&ChatMessage::error(OPEN_CHAT_FAILURE_TEXT))
        );
        assert_eq!(reselected.history, first.history);
        assert!(!controller.is_loading());
    }

    #[tokio::test]
    async fn clear_history_leaves_one_greeting_session() {
        let mut harness = signed_in(vec![ScriptedReply::fragments(["ok"])]);
        harness.controller.send_message(SendInput::text("Hi")).await;
        harness.controller.new_chat().unwrap();
        harness.controller.new_chat().unwrap();

        let chat_id = harness.controller.clear_history().unwrap();

        let sessions = harness.controller.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, chat_id);
        assert_eq!(sessions[0].messages, vec![ChatMessage::model(GREETING)]);
        assert_eq!(harness.controller.active_chat_id(), Some(&chat_id));

        let persisted = SessionStore::new(harness.storage.clone()).load(EMAIL).unwrap();
        assert_eq!(persisted.as_slice(), sessions.as_slice());
    }

    #[tokio::test]
    async fn unreadable_history_falls_back_to_fresh_session() {
        let mut harness = harness_with(ScriptedProvider::new([]), Capabilities::headless());
        harness
            .storage
            .set_item(&SessionStore::storage_key(EMAIL), "[{\"id\":")
            .unwrap();

        harness.controller.sign_in(User::new(EMAIL));

        let sessions = harness.controller.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].messages, vec![ChatMessage::model(GREETING)]);
    }

    #[tokio::test]
    async fn selecting_a_chat_rebuilds_the_provider_chat() {
        let mut harness = signed_in(vec![ScriptedReply::fragments(["ok"])]);
        let first = harness.controller.active_chat_id().unwrap().clone();
        harness.controller.send_message(SendInput::text("Hi")).await;

        let second = harness.controller.new_chat().unwrap();
        assert_ne!(first, second);
        assert_eq!(harness.controller.sessions()[0].id, second);
        assert_eq!(
            harness.controller.provider_chat().unwrap().history().len(),
            1
        );

        harness.controller.select_chat(&first).unwrap();
        assert_eq!(
            harness.controller.provider_chat().unwrap().history().len(),
            3
        );

        let missing = ChatId::from_millis(1);
        assert!(matches!(
            harness.controller.select_chat(&missing),
            Err(ChatError::UnknownChat { .. })
        ));
        assert_eq!(harness.controller.active_chat_id(), Some(&first));
    }

    #[tokio::test]
    async fn image_turn_sends_inline_data_and_revokes_preview() {
        let mut harness = signed_in(Vec::new());
        let image = ImageAttachment::new("image/png", b"hello".to_vec()).unwrap();

        let outcome = harness
            .controller
            .send_message(SendInput::text("").with_image(image))
            .await;
        assert!(matches!(outcome, SendOutcome::Completed { .. }));

        let session = harness.controller.active_session().unwrap();
        let user_message = &session.messages[1];
        assert_eq!(user_message.text, "");
        assert!(
            user_message
                .image_url
                .as_deref()
                .is_some_and(|url| url.starts_with(crate::attachment::OBJECT_URL_PREFIX))
        );
        let inline = Content::user(vec![Part::inline_data("image/png", "aGVsbG8=")]);
        assert_eq!(session.history[1], inline);
        assert_eq!(
            harness.provider.requests()[0].contents.last(),
            Some(&inline)
        );
        assert_eq!(
            harness.controller.capabilities().object_urls.live_count(),
            0
        );
    }

    #[tokio::test]
    async fn failed_image_turns_still_revoke_preview() {
        let mut harness = signed_in(vec![
            ScriptedReply::RefuseOpen("quota exceeded".into()),
            ScriptedReply::FailAfter {
                fragments: vec!["partial".into()],
                message: "connection reset".into(),
            },
        ]);

        for caption in ["refused", "cut off"] {
            let image = ImageAttachment::jpeg(vec![0xFFu8, 0xD8, 0xFF]).unwrap();
            let outcome = harness
                .controller
                .send_message(SendInput::text(caption).with_image(image))
                .await;

            assert!(
                matches!(outcome, SendOutcome::Failed { .. }),
                "{caption}: {outcome:?}"
            );
            assert_eq!(
                harness.controller.capabilities().object_urls.live_count(),
                0
            );
            assert!(!harness.controller.is_loading());

            let last = harness
                .controller
                .active_session()
                .unwrap()
                .last_message()
                .unwrap();
            assert_eq!(last.role, MessageRole::Error);
            assert_eq!(last.text, STREAM_FAILURE_TEXT);
        }
        assert_history_invariant(&harness.controller);
    }

    #[tokio::test]
    async fn hidden_window_gets_truncated_notification() {
        let notifier = RecordingNotifier::new(
            NotificationPermission::Default,
            NotificationPermission::Granted,
        );
        let visibility = Arc::new(ManualVisibility::default());
        visibility.set_hidden(true);
        let capabilities = Capabilities::headless()
            .with_notifier(notifier.clone())
            .with_visibility(visibility.clone());

        let long_reply = "a".repeat(200);
        let mut harness = harness_with(
            ScriptedProvider::new([
                ScriptedReply::fragments([long_reply.clone()]),
                ScriptedReply::fragments(["seen"]),
            ]),
            capabilities,
        );
        harness.controller.sign_in(User::new(EMAIL));

        assert_eq!(
            harness.controller.request_notification_permission().await,
            NotificationRequestOutcome::Granted
        );
        harness.controller.send_message(SendInput::text("Hi")).await;

        visibility.set_hidden(false);
        harness.controller.send_message(SendInput::text("again")).await;

        let shown = notifier.shown.lock().unwrap().clone();
        assert_eq!(
            shown,
            vec![Notification {
                title: NOTIFICATION_TITLE.to_string(),
                body: format!("{}...", "a".repeat(150)),
            }]
        );
    }

    #[tokio::test]
    async fn notification_requests_report_platform_state() {
        let mut headless = signed_in(Vec::new());
        let outcome = headless.controller.request_notification_permission().await;
        assert_eq!(outcome, NotificationRequestOutcome::Unsupported);
        assert_eq!(outcome.user_message(), Some(NOTIFICATIONS_UNSUPPORTED_TEXT));

        let denied = RecordingNotifier::new(
            NotificationPermission::Denied,
            NotificationPermission::Denied,
        );
        let mut harness = harness_with(
            ScriptedProvider::new([]),
            Capabilities::headless().with_notifier(denied),
        );
        let outcome = harness.controller.request_notification_permission().await;
        assert_eq!(outcome, NotificationRequestOutcome::Blocked);
        assert_eq!(outcome.user_message(), Some(NOTIFICATIONS_BLOCKED_TEXT));
    }

    #[tokio::test]
    async fn abandoned_send_is_settled_by_the_next_call() {
        let provider = ScriptedProvider::new([ScriptedReply::fragments(["slow", " reply"])])
            .with_fragment_delay(Duration::from_millis(500));
        let mut harness = harness_with(provider, Capabilities::headless());
        harness.controller.sign_in(User::new(EMAIL));

        let timed_out = tokio::time::timeout(
            Duration::from_millis(20),
            harness.controller.send_message(SendInput::text("Hi")),
        )
        .await;
        assert!(timed_out.is_err());
        assert!(harness.controller.is_loading());

        let outcome = harness.controller.send_message(SendInput::text("")).await;
        assert_eq!(outcome, SendOutcome::Ignored(IgnoreReason::EmptyInput));
        assert!(!harness.controller.is_loading());
        assert_eq!(
            harness.controller.active_session().unwrap().last_message(),
            Some(&ChatMessage::error(STREAM_FAILURE_TEXT))
        );
        assert_history_invariant(&harness.controller);
    }

    #[tokio::test]
    async fn copy_skips_errors_and_reports_range() {
        let clipboard = Arc::new(RecordingClipboard::default());
        let mut harness = harness_with(
            ScriptedProvider::new([ScriptedReply::RefuseOpen("x".into())]),
            Capabilities::headless().with_clipboard(clipboard.clone()),
        );
        harness.controller.sign_in(User::new(EMAIL));
        harness.controller.send_message(SendInput::text("Hi")).await;

        harness.controller.copy_message(0).unwrap();
        harness.controller.copy_message(1).unwrap();
        assert!(matches!(
            harness.controller.copy_message(2),
            Err(ChatError::NothingToCopy { .. })
        ));
        assert!(matches!(
            harness.controller.copy_message(9),
            Err(ChatError::MessageOutOfRange { .. })
        ));
        assert_eq!(
            *clipboard.written.lock().unwrap(),
            vec![GREETING.to_string(), "Hi".to_string()]
        );
    }

    #[tokio::test]
    async fn sign_out_drops_state_and_sign_in_restores_it() {
        let mut harness = signed_in(vec![ScriptedReply::fragments(["ok"])]);
        harness.controller.send_message(SendInput::text("Hi")).await;
        let before = harness.controller.sessions();

        harness.controller.sign_out();
        assert!(harness.controller.user().is_none());
        assert!(harness.controller.sessions().is_empty());
        assert!(harness.controller.active_chat_id().is_none());
        assert!(!harness.controller.can_send());
        assert_eq!(
            harness.controller.send_message(SendInput::text("Hi")).await,
            SendOutcome::Ignored(IgnoreReason::NotSignedIn)
        );
        assert!(matches!(
            harness.controller.new_chat(),
            Err(ChatError::NotSignedIn { .. })
        ));

        harness.controller.sign_in(User::new(EMAIL));
        assert_eq!(harness.controller.sessions().as_slice(), before.as_slice());
    }
}
