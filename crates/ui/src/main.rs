use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use ktr_chat::capabilities::ManualVisibility;
use ktr_chat::{
    Authenticator, Capabilities, ChatController, MockAuthenticator, SessionStore, SettingsStore,
};
use ktr_llm::create_provider;
use ktr_storage::open_storage;
use ktr_ui::repl::OpenStorageSnafu;
use ktr_ui::terminal::{Osc52Clipboard, TerminalNotifier};
use ktr_ui::{ChatRepl, ReplError};
use snafu::ResultExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ktr", version, about = "KTR ChatBot in the terminal")]
struct Cli {
    /// Settings file; defaults to the platform config dir.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Provider id, e.g. `gemini` or `echo`.
    #[arg(short, long)]
    provider: Option<String>,

    #[arg(short, long)]
    model: Option<String>,

    /// Storage backend: file, sqlite or memory.
    #[arg(long)]
    storage: Option<String>,

    #[arg(long)]
    storage_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("KTR_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "ktr exited with an error");
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), ReplError> {
    let store = Arc::new(match cli.config {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::load(),
    });

    // Command-line overrides apply to this run only; `/model` saves through the store.
    let mut settings = store.settings().as_ref().clone();
    if let Some(provider) = cli.provider {
        settings.provider_id = provider;
    }
    if let Some(model) = cli.model {
        settings.model = model;
    }
    if let Some(backend) = cli.storage {
        settings.storage.backend = backend;
    }
    if let Some(path) = cli.storage_path {
        settings.storage.path = Some(path);
    }
    let settings = settings.normalized();

    let backend = settings.storage.backend();
    let location = settings.storage.location();
    let storage = open_storage(backend, &location)
        .await
        .context(OpenStorageSnafu {
            stage: "main-open-storage",
            backend: backend.name(),
            location: location.display().to_string(),
        })?;

    let provider = match create_provider(settings.to_provider_config()) {
        Ok(provider) => Some(provider),
        Err(error) => {
            tracing::warn!(
                provider = %settings.provider_id,
                error = %error,
                "provider unavailable, sending is disabled"
            );
            None
        }
    };

    let visibility = Arc::new(ManualVisibility::default());
    let capabilities = Capabilities::headless()
        .with_notifier(Arc::new(TerminalNotifier::new()))
        .with_visibility(visibility.clone())
        .with_clipboard(Arc::new(Osc52Clipboard));

    let controller = ChatController::new(
        SessionStore::new(storage),
        provider.clone(),
        settings.chat_options(),
        capabilities,
    );
    let authenticator: Arc<dyn Authenticator> = Arc::new(MockAuthenticator::default());

    ChatRepl::new(
        controller,
        authenticator,
        visibility,
        provider,
        settings,
        store,
    )
    .run()
    .await
}
