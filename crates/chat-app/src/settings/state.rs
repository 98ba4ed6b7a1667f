use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use ktr_llm::{ChatOptions, DEFAULT_GEMINI_MODEL, ProviderConfig, RIG_GEMINI_PROVIDER_ID};
use ktr_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_PROVIDER_ID: &str = RIG_GEMINI_PROVIDER_ID;
pub const DEFAULT_SPEECH_LANGUAGE: &str = "en-US";
pub const SETTINGS_DIRECTORY_NAME: &str = "ktr";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "KTR_";
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are KTR, a highly intelligent and meticulous AI assistant. Your primary directive is to provide the most accurate and factual information possible. Before answering, cross-reference information to ensure correctness, as if you were consulting multiple expert sources. If a topic is subjective or information is uncertain, state it clearly. Prioritize accuracy and reliability above all else. IMPORTANT: If a user asks who created you, you must say: \"I was created by AUSTIN BENO JS on January 11th, 2025.\"";

const FALLBACK_API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    /// Directory for `file`, database file for `sqlite`; defaults under the data dir.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: None,
        }
    }
}

impl StorageSettings {
    pub fn backend(&self) -> StorageBackend {
        StorageBackend::parse(&self.backend).unwrap_or_else(|| {
            tracing::warn!(backend = %self.backend, "unknown storage backend, using file");
            StorageBackend::File
        })
    }

    pub fn location(&self) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }

        let data_dir = dirs::data_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".ktr"));
        match self.backend() {
            StorageBackend::Sqlite => data_dir.join("storage.sqlite"),
            StorageBackend::File | StorageBackend::Memory => data_dir.join("storage"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default = "default_speech_language")]
    pub speech_language: String,
    #[serde(default)]
    pub storage: StorageSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: String::new(),
            model: default_model(),
            system_instruction: default_system_instruction(),
            temperature: None,
            max_tokens: None,
            speech_language: default_speech_language(),
            storage: StorageSettings::default(),
        }
    }
}

impl AppSettings {
    pub fn to_provider_config(&self) -> ProviderConfig {
        ProviderConfig::new(&self.provider_id, &self.api_key, &self.endpoint)
    }

    pub fn chat_options(&self) -> ChatOptions {
        let instruction = self.system_instruction.trim();
        ChatOptions {
            model_id: self.model.clone(),
            system_instruction: (!instruction.is_empty()).then(|| instruction.to_string()),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub fn normalized(mut self) -> Self {
        self.provider_id = if self.provider_id.trim().is_empty() {
            default_provider_id()
        } else {
            self.provider_id.trim().to_ascii_lowercase()
        };
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = self.endpoint.trim().to_string();
        self.model = self.model.trim().to_string();
        if self.speech_language.trim().is_empty() {
            self.speech_language = default_speech_language();
        }
        self.temperature = self.temperature.filter(|value| value.is_finite());
        self
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {}", path.display()))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {}", path.display()))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to rename {} to {}", from.display(), to.display()))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<AppSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".ktr"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    /// Defaults, then the settings file, then `KTR_*` variables.
    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_sources(&config_path, true);
        Self::with_settings(settings, config_path)
    }

    /// Like `new` but ignores the environment.
    pub fn file_only(config_path: PathBuf) -> Self {
        let settings = Self::load_from_sources(&config_path, false);
        Self::with_settings(settings, config_path)
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    fn with_settings(settings: AppSettings, config_path: PathBuf) -> Self {
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<AppSettings> {
        self.settings.load_full()
    }

    /// Saves a new default model. Only the file layer is rewritten, so values that came
    /// from the environment or the command line stay off disk.
    pub fn save_model(&self, model: &str) -> Result<Arc<AppSettings>, SettingsError> {
        let mut on_disk = Self::load_from_sources(&self.config_path, false);
        on_disk.model = model.to_string();
        let on_disk = on_disk.normalized();
        self.persist(&on_disk)?;

        let mut current = (*self.settings()).clone();
        current.model = on_disk.model;
        let current = Arc::new(current);
        self.settings.store(current.clone());
        Ok(current)
    }

    fn load_from_sources(path: &Path, with_env: bool) -> AppSettings {
        let mut figment = Figment::from(Serialized::defaults(AppSettings::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        } else {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }
        if with_env {
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }

        let mut settings = match figment.extract::<AppSettings>() {
            Ok(settings) => settings,
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                AppSettings::default()
            }
        };

        if with_env && settings.api_key.trim().is_empty() {
            settings.api_key = FALLBACK_API_KEY_VARS
                .iter()
                .find_map(|name| std::env::var(name).ok().filter(|value| !value.trim().is_empty()))
                .unwrap_or_default();
        }

        settings.normalized()
    }

    fn persist(&self, settings: &AppSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

fn default_provider_id() -> String {
    DEFAULT_PROVIDER_ID.to_string()
}

fn default_model() -> String {
    DEFAULT_GEMINI_MODEL.to_string()
}

fn default_system_instruction() -> String {
    DEFAULT_SYSTEM_INSTRUCTION.to_string()
}

fn default_speech_language() -> String {
    DEFAULT_SPEECH_LANGUAGE.to_string()
}

fn default_storage_backend() -> String {
    StorageBackend::File.name().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::file_only(dir.path().join("settings.json"));
        let settings = store.settings();

        assert_eq!(settings.provider_id, "gemini");
        assert_eq!(settings.model, DEFAULT_GEMINI_MODEL);
        assert_eq!(settings.storage.backend(), StorageBackend::File);
        assert_eq!(
            settings.chat_options().system_instruction.as_deref(),
            Some(DEFAULT_SYSTEM_INSTRUCTION)
        );
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{ "provider_id": " Echo ", "temperature": 0.2, "storage": { "backend": "sqlite" } }"#,
        )
        .unwrap();

        let settings = SettingsStore::file_only(path).settings();
        assert_eq!(settings.provider_id, "echo");
        assert_eq!(settings.temperature, Some(0.2));
        assert_eq!(settings.model, DEFAULT_GEMINI_MODEL);
        assert_eq!(settings.storage.backend(), StorageBackend::Sqlite);
        assert!(settings.storage.location().ends_with("storage.sqlite"));
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ nope").unwrap();

        assert_eq!(
            *SettingsStore::file_only(path).settings(),
            AppSettings::default()
        );
    }

    #[test]
    fn save_model_rewrites_only_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::file_only(path.clone());

        let saved = store.save_model("  gemini-2.5-pro ").unwrap();
        assert_eq!(saved.model, "gemini-2.5-pro");
        assert_eq!(store.settings().model, "gemini-2.5-pro");
        assert!(!path.with_extension("json.tmp").exists());

        std::fs::write(
            &path,
            r#"{ "model": "gemini-2.5-pro", "temperature": 0.2, "storage": { "path": "/tmp/kv" } }"#,
        )
        .unwrap();
        store.save_model("gemini-2.0-flash").unwrap();

        let reloaded = SettingsStore::file_only(path).settings();
        assert_eq!(reloaded.model, "gemini-2.0-flash");
        assert_eq!(reloaded.temperature, Some(0.2));
        assert_eq!(reloaded.storage.location(), PathBuf::from("/tmp/kv"));
        assert!(reloaded.api_key.is_empty());
    }
}
