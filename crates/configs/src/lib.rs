//! # configs
//!
//! Runtime settings for rusty-consent, layered as:
//! built-in defaults → `rusty-consent.toml` (optional) → `RUSTY_CONSENT__*`
//! environment variables. A `.env` file in the working directory is loaded
//! first, so its values behave like real environment variables.
//!
//! Nested keys use `__` in the environment, e.g.
//! `RUSTY_CONSENT__DATABASE__URL=sqlite://consent.db` or
//! `RUSTY_CONSENT__CONFORMANCE__GRANT_ALL=true`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;
use tracing::debug;

pub const ENV_PREFIX: &str = "RUSTY_CONSENT";
/// Overrides the settings file location.
pub const CONFIG_PATH_VAR: &str = "RUSTY_CONSENT_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "rusty-consent.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid setting `{key}`: {message}")]
    Invalid { key: &'static str, message: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub registry: RegistrySettings,
    pub audit: AuditSettings,
    pub timeouts: TimeoutSettings,
    pub cmp: CmpSettings,
    pub policy: PolicySettings,
    pub conformance: ConformanceSettings,
    pub log: LogSettings,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// `sqlite://…` for the SQLite store, `memory://` for the in-process store.
    pub url: SecretString,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// JSON-lines audit file. When unset, audit events only go to the log.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub store_ms: u64,
    pub registry_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CmpSettings {
    pub id: u16,
    pub version: u16,
    pub consent_screen: u16,
    pub consent_language: String,
    pub policy_version: u16,
    pub publisher_country_code: Option<String>,
    pub service_specific: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    /// Purposes that may never be pursued on legitimate interest, on top of
    /// whatever the registry marks.
    pub consent_only_purposes: Vec<u32>,
    pub enforce_vendor_legitimate_interest: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConformanceSettings {
    /// Encode an all-granted wire string regardless of user decisions.
    /// Only for certification harnesses.
    pub grant_all: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub format: LogFormat,
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            registry: RegistrySettings::default(),
            audit: AuditSettings::default(),
            timeouts: TimeoutSettings::default(),
            cmp: CmpSettings::default(),
            policy: PolicySettings::default(),
            conformance: ConformanceSettings::default(),
            log: LogSettings::default(),
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: SecretString::from("sqlite://rusty-consent.db".to_string()),
            max_connections: 5,
        }
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("vendor-list.json"),
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            store_ms: 5_000,
            registry_ms: 2_000,
        }
    }
}

impl Default for CmpSettings {
    fn default() -> Self {
        Self {
            id: 1,
            version: 1,
            consent_screen: 1,
            consent_language: "EN".to_string(),
            policy_version: 5,
            publisher_country_code: None,
            service_specific: true,
        }
    }
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            consent_only_purposes: Vec::new(),
            enforce_vendor_legitimate_interest: true,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: "info".to_string(),
        }
    }
}

impl Settings {
    /// Loads `.env`, then the settings file named by `RUSTY_CONSENT_CONFIG`
    /// (or `rusty-consent.toml`), then the process environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let path = std::env::var_os(CONFIG_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::build(Some(&path), None)
    }

    /// Like [`Settings::load`] but with an explicit file and no `.env`.
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::build(Some(path), None)
    }

    /// `env` replaces the process environment when given; used by tests.
    pub fn build(file: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            debug!(path = %path.display(), "reading settings file");
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("policy.consent_only_purposes")
                .try_parsing(true)
                .source(env),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cmp.id == 0 {
            return Err(invalid("cmp.id", "must be non-zero"));
        }
        if !is_two_letter_code(&self.cmp.consent_language) {
            return Err(invalid(
                "cmp.consent_language",
                format!("expected a two-letter code, got {:?}", self.cmp.consent_language),
            ));
        }
        if let Some(country) = &self.cmp.publisher_country_code {
            if !is_two_letter_code(country) {
                return Err(invalid(
                    "cmp.publisher_country_code",
                    format!("expected a two-letter code, got {country:?}"),
                ));
            }
        }
        if self.timeouts.store_ms == 0 {
            return Err(invalid("timeouts.store_ms", "must be non-zero"));
        }
        if self.timeouts.registry_ms == 0 {
            return Err(invalid("timeouts.registry_ms", "must be non-zero"));
        }
        if self.database.max_connections == 0 {
            return Err(invalid("database.max_connections", "must be non-zero"));
        }
        if self.policy.consent_only_purposes.contains(&0) {
            return Err(invalid("policy.consent_only_purposes", "identifiers start at 1"));
        }
        Ok(())
    }
}

fn invalid(key: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        message: message.into(),
    }
}

fn is_two_letter_code(code: &str) -> bool {
    code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    fn toml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::build(None, env(&[])).unwrap();
        assert_eq!(settings.database.url.expose_secret(), "sqlite://rusty-consent.db");
        assert_eq!(settings.timeouts.store_ms, 5_000);
        assert_eq!(settings.log.format, LogFormat::Pretty);
        assert!(!settings.conformance.grant_all);
        assert!(settings.policy.enforce_vendor_legitimate_interest);
    }

    #[test]
    fn file_then_environment_override() {
        let file = toml_file(
            r#"
            [database]
            url = "sqlite://from-file.db"

            [cmp]
            id = 42
            consent_language = "FR"

            [log]
            format = "json"
            "#,
        );

        let settings = Settings::build(
            Some(file.path()),
            env(&[
                ("RUSTY_CONSENT__DATABASE__URL", "memory://"),
                ("RUSTY_CONSENT__CONFORMANCE__GRANT_ALL", "true"),
                ("RUSTY_CONSENT__POLICY__CONSENT_ONLY_PURPOSES", "3,4"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.database.url.expose_secret(), "memory://");
        assert_eq!(settings.cmp.id, 42);
        assert_eq!(settings.cmp.consent_language, "FR");
        assert_eq!(settings.log.format, LogFormat::Json);
        assert!(settings.conformance.grant_all);
        assert_eq!(settings.policy.consent_only_purposes, vec![3, 4]);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let settings = Settings::build(Some(Path::new("/no/such/rusty-consent.toml")), env(&[])).unwrap();
        assert_eq!(settings.cmp.id, 1);
    }

    #[test]
    fn rejects_invalid_values() {
        let zero_cmp = Settings::build(None, env(&[("RUSTY_CONSENT__CMP__ID", "0")]));
        assert!(matches!(zero_cmp, Err(ConfigError::Invalid { key: "cmp.id", .. })));

        let bad_language = Settings::build(None, env(&[("RUSTY_CONSENT__CMP__CONSENT_LANGUAGE", "english")]));
        assert!(matches!(
            bad_language,
            Err(ConfigError::Invalid { key: "cmp.consent_language", .. })
        ));

        let zero_timeout = Settings::build(None, env(&[("RUSTY_CONSENT__TIMEOUTS__STORE_MS", "0")]));
        assert!(matches!(
            zero_timeout,
            Err(ConfigError::Invalid { key: "timeouts.store_ms", .. })
        ));
    }
}
