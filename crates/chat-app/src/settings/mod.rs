mod state;

pub use state::{
    AppSettings, DEFAULT_PROVIDER_ID, DEFAULT_SPEECH_LANGUAGE, DEFAULT_SYSTEM_INSTRUCTION,
    SETTINGS_DIRECTORY_NAME, SETTINGS_FILE_NAME, SettingsError, SettingsStore, StorageSettings,
};
