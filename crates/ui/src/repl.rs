//! Interactive chat loop.

use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use ktr_chat::capabilities::{
    DictationSession, ManualVisibility, SPEECH_UNSUPPORTED_TEXT, capture_photo,
};
use ktr_chat::chat::{ChatEvent, IgnoreReason, SendInput, SendOutcome};
use ktr_chat::{AppSettings, Authenticator, ChatController, ImageAttachment, SettingsStore};
use ktr_llm::LlmProvider;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use snafu::{ResultExt, Snafu};
use tokio::sync::mpsc;

use crate::command::{Command, HELP};
use crate::render::{StreamPrinter, render_session, render_session_list};

pub const CLEAR_CONFIRMATION: &str =
    "Are you sure you want to clear all chat history? This action cannot be undone.";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReplError {
    #[snafu(display("failed to open {backend} storage at {location}: {source}"))]
    OpenStorage {
        stage: &'static str,
        backend: &'static str,
        location: String,
        source: ktr_storage::StorageError,
    },
    #[snafu(display("terminal input failed on `{stage}`: {source}"))]
    Readline {
        stage: &'static str,
        source: ReadlineError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

pub struct ChatRepl {
    controller: ChatController,
    events: mpsc::UnboundedReceiver<ChatEvent>,
    authenticator: Arc<dyn Authenticator>,
    visibility: Arc<ManualVisibility>,
    provider: Option<Arc<dyn LlmProvider>>,
    settings: AppSettings,
    settings_store: Arc<SettingsStore>,
    pending_image: Option<ImageAttachment>,
    prefill: String,
}

impl ChatRepl {
    pub fn new(
        mut controller: ChatController,
        authenticator: Arc<dyn Authenticator>,
        visibility: Arc<ManualVisibility>,
        provider: Option<Arc<dyn LlmProvider>>,
        settings: AppSettings,
        settings_store: Arc<SettingsStore>,
    ) -> Self {
        let events = controller.subscribe();
        Self {
            controller,
            events,
            authenticator,
            visibility,
            provider,
            settings,
            settings_store,
            pending_image: None,
            prefill: String::new(),
        }
    }

    pub async fn run(mut self) -> Result<(), ReplError> {
        let mut editor = DefaultEditor::new().context(ReadlineSnafu {
            stage: "create-editor",
        })?;

        let history_path = dirs::data_dir().map(|path| path.join("ktr").join("repl_history.txt"));
        if let Some(path) = &history_path {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let _ = editor.load_history(path);
        }

        self.print_welcome();

        loop {
            let prompt = self.prompt();
            let readline = if self.prefill.is_empty() {
                editor.readline(&prompt)
            } else {
                let prefill = std::mem::take(&mut self.prefill);
                editor.readline_with_initial(&prompt, (&prefill, ""))
            };

            match readline {
                Ok(line) => {
                    let line = line.trim();
                    if self.skips_line(line) {
                        continue;
                    }
                    if !line.is_empty() {
                        let _ = editor.add_history_entry(line);
                    }

                    if line.starts_with('/') {
                        if self.handle_command(line, &mut editor).await? == Flow::Quit {
                            break;
                        }
                        continue;
                    }

                    self.send(line.to_string()).await;
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!("Bye!");
                    break;
                }
                Err(source) => {
                    return Err(source).context(ReadlineSnafu { stage: "readline" });
                }
            }
        }

        if let Some(path) = &history_path {
            let _ = editor.save_history(path);
        }
        Ok(())
    }

    /// Blank lines are skipped unless they carry a pending image on their own.
    fn skips_line(&self, line: &str) -> bool {
        line.is_empty() && self.pending_image.is_none()
    }

    fn prompt(&self) -> String {
        let attachment = if self.pending_image.is_some() { "[img] " } else { "" };
        match self.controller.user() {
            Some(user) => format!("{attachment}{}> ", user.email),
            None => "ktr> ".to_string(),
        }
    }

    fn print_welcome(&self) {
        println!();
        println!("{}", "KTR ChatBot".green().bold());
        match self.controller.provider_chat() {
            Some(chat) => println!("provider: {} ({})", chat.provider_id(), chat.model_id()),
            None => match &self.provider {
                Some(provider) => println!("provider: {} ({})", provider.id(), self.settings.model),
                None => println!("{}", "No provider configured; set an API key.".yellow()),
            },
        }
        println!("Type /login to sign in, /help for commands.");
        println!();
    }

    fn print_help(&self) {
        println!();
        println!("Commands:");
        for (usage, description) in HELP {
            println!("  {usage:<16} - {description}");
        }
        println!();
    }

    async fn handle_command(
        &mut self,
        line: &str,
        editor: &mut DefaultEditor,
    ) -> Result<Flow, ReplError> {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(error) => {
                println!("{error}");
                return Ok(Flow::Continue);
            }
        };
        if self.controller.user().is_none() && !command.allowed_signed_out() {
            println!("Please sign in first with /login.");
            return Ok(Flow::Continue);
        }

        match command {
            Command::Help => self.print_help(),
            Command::Quit => {
                println!("Bye!");
                return Ok(Flow::Quit);
            }
            Command::Login => self.login(editor)?,
            Command::Logout => {
                self.controller.sign_out();
                self.pending_image = None;
                println!("Signed out.");
            }
            Command::New => match self.controller.new_chat() {
                Ok(_) => self.print_active_session(),
                Err(error) => println!("{}", error.to_string().red()),
            },
            Command::Chats => {
                let sessions = self.controller.sessions();
                println!(
                    "{}",
                    render_session_list(&sessions, self.controller.active_chat_id())
                );
            }
            Command::Select(position) => self.select(position),
            Command::Clear => self.clear(editor)?,
            Command::Image(path) => self.attach_file(path).await,
            Command::Camera => self.attach_camera().await,
            Command::Dictate => self.dictate().await,
            Command::Copy(position) => match self.controller.copy_message(position - 1) {
                Ok(()) => println!("Copied message {position}."),
                Err(error) => println!("{}", error.to_string().red()),
            },
            Command::Notify => {
                let outcome = self.controller.request_notification_permission().await;
                match outcome.user_message() {
                    Some(message) => println!("{}", message.yellow()),
                    None => println!("Notification permission: {outcome:?}."),
                }
            }
            Command::Away => {
                let hidden = self.visibility.toggle();
                if hidden {
                    println!("Marked as away; finished replies will notify.");
                } else {
                    println!("Welcome back.");
                }
            }
            Command::Model(model) => self.model(model),
        }

        self.flush_events();
        Ok(Flow::Continue)
    }

    fn login(&mut self, editor: &mut DefaultEditor) -> Result<(), ReplError> {
        if let Some(user) = self.controller.user() {
            println!("Already signed in as {}.", user.email);
            return Ok(());
        }

        let email = match read_secondary(editor, "email: ")? {
            Some(email) => email,
            None => return Ok(()),
        };
        let password = match read_secondary(editor, "password: ")? {
            Some(password) => password,
            None => return Ok(()),
        };

        match self.authenticator.authenticate(&email, &password) {
            Ok(user) => {
                self.controller.sign_in(user);
                self.flush_events();
                self.print_active_session();
            }
            Err(error) => println!("{}", error.to_string().red()),
        }
        Ok(())
    }

    fn select(&mut self, position: usize) {
        let sessions = self.controller.sessions();
        let Some(session) = sessions.get(position - 1) else {
            println!("There is no chat {position}. Use /chats to list them.");
            return;
        };
        match self.controller.select_chat(&session.id) {
            Ok(()) => {
                self.flush_events();
                self.print_active_session();
            }
            Err(error) => println!("{}", error.to_string().red()),
        }
    }

    fn clear(&mut self, editor: &mut DefaultEditor) -> Result<(), ReplError> {
        let answer = read_secondary(editor, &format!("{CLEAR_CONFIRMATION} [y/N] "))?;
        let confirmed = answer.is_some_and(|answer| {
            matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes")
        });
        if !confirmed {
            println!("Kept chat history.");
            return Ok(());
        }

        match self.controller.clear_history() {
            Ok(_) => {
                self.flush_events();
                self.print_active_session();
            }
            Err(error) => println!("{}", error.to_string().red()),
        }
        Ok(())
    }

    async fn attach_file(&mut self, path: PathBuf) {
        match ImageAttachment::from_path(&path).await {
            Ok(image) => self.attach(image),
            Err(error) => println!("{}", error.to_string().red()),
        }
    }

    async fn attach_camera(&mut self) {
        let camera = self.controller.capabilities().camera.clone();
        match capture_photo(camera.as_ref()).await {
            Ok(image) => self.attach(image),
            Err(error) => println!("{}", error.to_string().red()),
        }
    }

    fn attach(&mut self, image: ImageAttachment) {
        println!(
            "Attached {} ({} bytes); it goes out with your next message.",
            image.mime_type(),
            image.len()
        );
        self.pending_image = Some(image);
    }

    async fn dictate(&mut self) {
        let recognizer = self.controller.capabilities().speech.clone();
        let session = match DictationSession::start(recognizer, &self.settings.speech_language) {
            Ok(session) => session,
            Err(error) => {
                tracing::debug!(error = %error, "dictation unavailable");
                println!("{}", SPEECH_UNSUPPORTED_TEXT.yellow());
                return;
            }
        };

        println!("{}", "Listening...".dimmed());
        let dictation = session.finish().await;
        if let Some(alert) = dictation.alert() {
            println!("{}", alert.red());
        }
        self.prefill = dictation.transcript().to_string();
    }

    fn model(&mut self, model: Option<String>) {
        let Some(model) = model else {
            let current = self
                .controller
                .provider_chat()
                .map(|chat| chat.model_id().to_string())
                .unwrap_or_else(|| self.settings.model.clone());
            println!("Current model: {current}");
            if let Some(provider) = &self.provider {
                for available in provider.models() {
                    println!("  - {} ({})", available.id, available.name);
                }
            }
            return;
        };

        self.settings.model = model;
        self.controller
            .set_provider(self.provider.clone(), self.settings.chat_options());
        match self.settings_store.save_model(&self.settings.model) {
            Ok(_) => println!(
                "Model set to {} and saved as the default.",
                self.settings.model
            ),
            Err(error) => {
                tracing::warn!(error = %error, "failed to save model choice");
                println!(
                    "Model set to {} for this session; saving failed: {error}",
                    self.settings.model
                );
            }
        }
    }

    async fn send(&mut self, text: String) {
        let image = self.pending_image.take();
        let mut input = SendInput::text(text);
        if let Some(image) = image.clone() {
            input = input.with_image(image);
        }

        let mut printer = StreamPrinter::default();
        let outcome = {
            let send = self.controller.send_message(input);
            tokio::pin!(send);
            loop {
                tokio::select! {
                    outcome = &mut send => break outcome,
                    Some(event) = self.events.recv() => print_chunk(printer.handle(&event)),
                }
            }
        };
        while let Ok(event) = self.events.try_recv() {
            print_chunk(printer.handle(&event));
        }

        if let SendOutcome::Ignored(reason) = outcome {
            // Nothing was sent, so the attachment stays for the next try.
            self.pending_image = image;
            match reason {
                IgnoreReason::ProviderChatUnavailable => println!(
                    "{}",
                    "Sending is disabled until a chat opens successfully. Try /new.".yellow()
                ),
                IgnoreReason::NotSignedIn => println!("Please sign in first with /login."),
                IgnoreReason::EmptyInput
                | IgnoreReason::AlreadySending
                | IgnoreReason::NoActiveChat => {
                    tracing::debug!(?reason, "send ignored");
                }
            }
        }
    }

    fn flush_events(&mut self) {
        let mut printer = StreamPrinter::default();
        while let Ok(event) = self.events.try_recv() {
            print_chunk(printer.handle(&event));
        }
    }

    fn print_active_session(&self) {
        if let Some(session) = self.controller.active_session() {
            println!("{}", render_session(session));
        }
    }
}

fn print_chunk(chunk: Option<String>) {
    use std::io::Write;

    if let Some(chunk) = chunk {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(chunk.as_bytes());
        let _ = stdout.flush();
    }
}

/// Reads a follow-up answer; `None` when the user backs out with Ctrl-C or Ctrl-D.
fn read_secondary(editor: &mut DefaultEditor, prompt: &str) -> Result<Option<String>, ReplError> {
    match editor.readline(prompt) {
        Ok(line) => Ok(Some(line.trim().to_string())),
        Err(ReadlineError::Interrupted | ReadlineError::Eof) => Ok(None),
        Err(source) => Err(source).context(ReadlineSnafu {
            stage: "read-secondary",
        }),
    }
}
