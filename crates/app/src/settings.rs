use std::num::ParseIntError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use runsync_client::{ClientConfig, DEFAULT_REQUEST_TIMEOUT};
use runsync_engine::{
    DEFAULT_ACTIVE_RUNS_KEY, DEFAULT_EVENT_CAPACITY, DEFAULT_LOCAL_RUN_PREFIX,
    DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT, SyncConfig,
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8080";
pub const SETTINGS_DIRECTORY_NAME: &str = "runsync";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATABASE_FILE_NAME: &str = "state.db";
pub const ENV_PREFIX: &str = "RUNSYNC_";
pub const SETTING_KEYS: [&str; 9] = [
    "endpoint",
    "api_token",
    "database_path",
    "poll_interval_ms",
    "poll_timeout_ms",
    "request_timeout_ms",
    "active_runs_key",
    "local_run_prefix",
    "event_capacity",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_active_runs_key")]
    pub active_runs_key: String,
    #[serde(default = "default_local_run_prefix")]
    pub local_run_prefix: String,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_token: String::new(),
            database_path: default_database_path(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            active_runs_key: default_active_runs_key(),
            local_run_prefix: default_local_run_prefix(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Settings {
    pub fn normalized(mut self) -> Self {
        self.endpoint = non_blank_or(self.endpoint, default_endpoint);
        self.api_token = self.api_token.trim().to_string();
        self.database_path = non_blank_or(self.database_path, default_database_path);
        self.active_runs_key = non_blank_or(self.active_runs_key, default_active_runs_key);
        self.local_run_prefix = self.local_run_prefix.trim().to_string();

        if self.poll_interval_ms == 0 {
            self.poll_interval_ms = default_poll_interval_ms();
        }
        if self.poll_timeout_ms == 0 {
            self.poll_timeout_ms = default_poll_timeout_ms();
        }
        if self.request_timeout_ms == 0 {
            self.request_timeout_ms = default_request_timeout_ms();
        }
        if self.event_capacity == 0 {
            self.event_capacity = default_event_capacity();
        }

        self
    }

    /// Assigns one field by its serialized name.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        match key {
            "endpoint" => self.endpoint = value.to_string(),
            "api_token" => self.api_token = value.to_string(),
            "database_path" => self.database_path = value.to_string(),
            "poll_interval_ms" => self.poll_interval_ms = parse_number(key, value)?,
            "poll_timeout_ms" => self.poll_timeout_ms = parse_number(key, value)?,
            "request_timeout_ms" => self.request_timeout_ms = parse_number(key, value)?,
            "active_runs_key" => self.active_runs_key = value.to_string(),
            "local_run_prefix" => self.local_run_prefix = value.to_string(),
            "event_capacity" => self.event_capacity = parse_number(key, value)?,
            _ => {
                return UnknownKeySnafu {
                    stage: "settings-set",
                    key,
                }
                .fail();
            }
        }
        Ok(())
    }

    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig::new(&self.endpoint, Some(self.api_token.clone()))
            .with_request_timeout(Duration::from_millis(self.request_timeout_ms))
    }

    pub fn to_sync_config(&self) -> SyncConfig {
        SyncConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            active_runs_key: self.active_runs_key.clone(),
            local_run_prefix: self.local_run_prefix.clone(),
            event_capacity: self.event_capacity,
        }
    }
}

/// Settings read once at startup: defaults, then the JSON file, then
/// `RUNSYNC_*` environment variables.
pub struct SettingsStore {
    settings: Settings,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".runsync"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_sources(&config_path);
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

    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    pub fn update(&mut self, settings: Settings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings = normalized_settings;
        Ok(())
    }

    /// Changes one setting and saves the result. Takes effect on next start.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        let mut next = self.settings.clone();
        next.set(key, value)?;
        self.update(next)
    }

    fn load_from_sources(path: &PathBuf) -> Settings {
        if !path.exists() {
            tracing::info!(path = %path.display(), "settings file not found, using defaults");
        }

        let figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX));

        match figment.extract::<Settings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "failed to parse settings, using defaults"
                );
                Settings::default()
            }
        }
    }

    fn persist(&self, settings: &Settings) -> Result<(), SettingsError> {
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

        tracing::info!(path = %self.config_path.display(), "saved settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("unknown setting '{key}', expected one of: {}", SETTING_KEYS.join(", ")))]
    UnknownKey { stage: &'static str, key: String },
    #[snafu(display("setting '{key}' expects a whole number, got '{value}': {source}"))]
    InvalidNumber {
        stage: &'static str,
        key: String,
        value: String,
        source: ParseIntError,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn parse_number<T>(key: &str, value: &str) -> Result<T, SettingsError>
where
    T: FromStr<Err = ParseIntError>,
{
    value.trim().parse().context(InvalidNumberSnafu {
        stage: "settings-parse-number",
        key,
        value,
    })
}

fn non_blank_or(value: String, fallback: fn() -> String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback()
    } else {
        trimmed.to_string()
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
        .unwrap_or_else(|| PathBuf::from(".runsync"))
        .join(DATABASE_FILE_NAME)
        .display()
        .to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_poll_timeout_ms() -> u64 {
    DEFAULT_POLL_TIMEOUT.as_millis() as u64
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_millis() as u64
}

fn default_active_runs_key() -> String {
    DEFAULT_ACTIVE_RUNS_KEY.to_string()
}

fn default_local_run_prefix() -> String {
    DEFAULT_LOCAL_RUN_PREFIX.to_string()
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_jail| {
            let store = SettingsStore::new(PathBuf::from("absent.json"));
            assert_eq!(store.settings(), &Settings::default());

            let config = store.settings().to_sync_config();
            assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
            assert_eq!(config.active_runs_key, DEFAULT_ACTIVE_RUNS_KEY);
            Ok(())
        });
    }

    #[test]
    fn file_values_are_merged_and_normalized() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "settings.json",
                r#"{
                    "endpoint": "  https://runs.example.test  ",
                    "api_token": " secret ",
                    "poll_interval_ms": 0,
                    "poll_timeout_ms": 750
                }"#,
            )?;

            let store = SettingsStore::new(PathBuf::from("settings.json"));
            let settings = store.settings();
            assert_eq!(settings.endpoint, "https://runs.example.test");
            assert_eq!(settings.api_token, "secret");
            assert_eq!(settings.poll_interval_ms, default_poll_interval_ms());
            assert_eq!(
                settings.to_sync_config().poll_timeout,
                Duration::from_millis(750)
            );
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("settings.json", r#"{ "endpoint": "https://file.test" }"#)?;
            jail.set_env("RUNSYNC_ENDPOINT", "https://env.test");
            jail.set_env("RUNSYNC_EVENT_CAPACITY", "8");

            let store = SettingsStore::new(PathBuf::from("settings.json"));
            assert_eq!(store.settings().endpoint, "https://env.test");
            assert_eq!(store.settings().event_capacity, 8);
            Ok(())
        });
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("settings.json", r#"{ "poll_interval_ms": "often" }"#)?;

            let store = SettingsStore::new(PathBuf::from("settings.json"));
            assert_eq!(store.settings(), &Settings::default());
            Ok(())
        });
    }

    #[test]
    fn set_assigns_known_keys_and_rejects_the_rest() {
        let mut settings = Settings::default();
        settings.set("endpoint", "https://set.test").unwrap();
        settings.set("poll_interval_ms", " 500 ").unwrap();
        settings.set("event_capacity", "32").unwrap();

        assert_eq!(settings.endpoint, "https://set.test");
        assert_eq!(settings.poll_interval_ms, 500);
        assert_eq!(settings.event_capacity, 32);

        assert!(matches!(
            settings.set("poll_timeout_ms", "soon"),
            Err(SettingsError::InvalidNumber { ref key, .. }) if key == "poll_timeout_ms"
        ));
        assert!(matches!(
            settings.set("theme", "dark"),
            Err(SettingsError::UnknownKey { ref key, .. }) if key == "theme"
        ));
        assert_eq!(settings.poll_timeout_ms, default_poll_timeout_ms());

        for key in SETTING_KEYS {
            let value = if key.ends_with("_ms") || key == "event_capacity" {
                "1"
            } else {
                "x"
            };
            assert!(settings.set(key, value).is_ok(), "{key} should be settable");
        }
    }

    #[test]
    fn update_persists_atomically() {
        Jail::expect_with(|_jail| {
            let path = PathBuf::from("nested").join(SETTINGS_FILE_NAME);
            let mut store = SettingsStore::new(path.clone());

            let mut next = store.settings().clone();
            next.endpoint = " https://updated.test ".to_string();
            next.local_run_prefix = "draft-".to_string();
            store.update(next).expect("settings update");

            assert_eq!(store.settings().endpoint, "https://updated.test");
            assert!(!path.with_extension("json.tmp").exists());

            let reloaded = SettingsStore::new(path);
            assert_eq!(reloaded.settings(), store.settings());
            assert_eq!(reloaded.settings().local_run_prefix, "draft-");
            Ok(())
        });
    }

    #[test]
    fn store_set_saves_one_value() {
        Jail::expect_with(|_jail| {
            let path = PathBuf::from(SETTINGS_FILE_NAME);
            let mut store = SettingsStore::new(path.clone());

            store.set("endpoint", " https://console.test ").unwrap();
            assert_eq!(store.settings().endpoint, "https://console.test");
            assert_eq!(
                SettingsStore::new(path.clone()).settings().endpoint,
                "https://console.test"
            );

            assert!(store.set("poll_interval_ms", "often").is_err());
            assert!(store.set("nonsense", "1").is_err());
            assert_eq!(
                SettingsStore::new(path).settings().poll_interval_ms,
                default_poll_interval_ms()
            );
            Ok(())
        });
    }
}
