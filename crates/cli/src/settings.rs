use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use pagechat_stream::{ClientConfig, DEFAULT_ENDPOINT, DEFAULT_TIMEOUT};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::error::{AppResult, SaveSettingsSnafu, SerializeSnafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "pagechat";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "PAGECHAT_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Document ids sent with every question unless overridden.
    #[serde(default)]
    pub documents: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
            documents: Vec::new(),
        }
    }
}

impl Settings {
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig::new(&self.endpoint)
            .with_api_key(&self.api_key)
            .with_timeout(Duration::from_secs(self.timeout_secs))
    }

    /// Copy safe to print: the API key is reduced to its last four characters.
    pub fn masked(&self) -> Self {
        let mut masked = self.clone();
        if !masked.api_key.is_empty() {
            let visible = masked
                .api_key
                .chars()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<String>();
            masked.api_key = format!("****{visible}");
        }
        masked
    }

    fn normalized(mut self) -> Self {
        self.endpoint = self.endpoint.trim().trim_end_matches('/').to_string();
        if self.endpoint.is_empty() {
            self.endpoint = default_endpoint();
        }
        self.api_key = self.api_key.trim().to_string();
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
        self.documents = self
            .documents
            .into_iter()
            .map(|document| document.trim().to_string())
            .filter(|document| !document.is_empty())
            .collect();
        self
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

/// Settings layered as defaults, then the JSON file, then `PAGECHAT_*` variables.
pub struct SettingsStore {
    settings: Settings,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(SETTINGS_DIRECTORY_NAME)
            .join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from(&config_path);
        Self {
            settings,
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn update(&mut self, settings: Settings) -> AppResult<()> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings = normalized_settings;
        Ok(())
    }

    fn load_from(path: &Path) -> Settings {
        if !path.exists() {
            tracing::info!(path = ?path, "no settings file, using defaults");
        }

        let figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX));

        match figment.extract::<Settings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(path = ?path, error = %error, "invalid settings, using defaults");
                Settings::default()
            }
        }
    }

    fn persist(&self, settings: &Settings) -> AppResult<()> {
        let content = serde_json::to_vec_pretty(settings).context(SerializeSnafu {
            stage: "encode-settings",
        })?;
        write_replacing(&self.config_path, &content)?;

        tracing::info!(path = ?self.config_path, "saved settings");
        Ok(())
    }
}

/// Writes `content` to a staging file beside `path`, then renames it into place.
fn write_replacing(path: &Path, content: &[u8]) -> AppResult<()> {
    let save_error = |stage: &'static str, path: &Path| SaveSettingsSnafu {
        stage,
        path: path.to_path_buf(),
    };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context(save_error("create-settings-directory", parent))?;
    }

    let staging = path.with_extension("json.tmp");
    std::fs::write(&staging, content).context(save_error("write-staging-file", &staging))?;
    std::fs::rename(&staging, path).context(save_error("replace-settings-file", path))?;
    Ok(())
}
