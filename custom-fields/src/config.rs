//! Configuration for custom fields, loaded with figment.
//!
//! Sources in precedence order (later overrides earlier):
//! 1. Built-in defaults
//! 2. An optional TOML, YAML, or JSON file
//! 3. Environment variables prefixed `CUSTOM_FIELDS_`, nested with `__`
//!    (e.g. `CUSTOM_FIELDS_TABLES__FIELDS=survey_fields`)

use std::path::Path;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Prefix of environment variables read by [`CustomFieldsConfig::load`].
pub const ENV_PREFIX: &str = "CUSTOM_FIELDS_";

/// Default table holding field definitions.
pub const DEFAULT_FIELDS_TABLE: &str = "custom_fields";

/// Default table holding responses.
pub const DEFAULT_RESPONSES_TABLE: &str = "custom_field_responses";

/// Default request key a batch submission is read from.
pub const DEFAULT_FORM_NAME: &str = "custom_fields";

/// Result type for configuration loading
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be parsed or extracted
    #[error("failed to parse configuration: {source}")]
    Parse {
        #[source]
        source: Box<figment::Error>,
    },

    /// A value is present but unusable
    #[error("invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// File extension not recognized
    #[error("unsupported configuration file format: {format}")]
    UnsupportedFormat { format: String },
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        ConfigError::Parse {
            source: Box::new(error),
        }
    }
}

/// Storage table names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableNames {
    pub fields: String,
    pub responses: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            fields: DEFAULT_FIELDS_TABLE.to_string(),
            responses: DEFAULT_RESPONSES_TABLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomFieldsConfig {
    pub tables: TableNames,
    /// Key of the submission map inside a request
    pub form_name: String,
}

impl Default for CustomFieldsConfig {
    fn default() -> Self {
        Self {
            tables: TableNames::default(),
            form_name: DEFAULT_FORM_NAME.to_string(),
        }
    }
}

impl CustomFieldsConfig {
    /// Defaults overridden by environment variables.
    pub fn load() -> ConfigResult<Self> {
        Self::from_figment(Self::base_figment().merge(Self::env()))
    }

    /// Defaults, then `path`, then environment variables.
    pub fn load_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let file = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Figment::from(Toml::file(path)),
            Some("yaml" | "yml") => Figment::from(Yaml::file(path)),
            Some("json") => Figment::from(Json::file(path)),
            other => {
                return Err(ConfigError::UnsupportedFormat {
                    format: other.unwrap_or("").to_string(),
                })
            }
        };
        debug!(path = %path.display(), "loading custom fields config file");
        Self::from_figment(Self::base_figment().merge(file).merge(Self::env()))
    }

    /// Extract and validate from a caller-built figment.
    pub fn from_figment(figment: Figment) -> ConfigResult<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        debug!(
            fields_table = %config.tables.fields,
            responses_table = %config.tables.responses,
            form_name = %config.form_name,
            "custom fields config loaded"
        );
        Ok(config)
    }

    /// Figment seeded with the built-in defaults.
    pub fn base_figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
    }

    fn env() -> Env {
        Env::prefixed(ENV_PREFIX).split("__")
    }

    pub fn validate(&self) -> ConfigResult<()> {
        check_identifier("tables.fields", &self.tables.fields)?;
        check_identifier("tables.responses", &self.tables.responses)?;
        if self.tables.fields == self.tables.responses {
            return Err(ConfigError::InvalidValue {
                key: "tables.responses".into(),
                message: "must differ from tables.fields".into(),
            });
        }
        if self.form_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "form_name".into(),
                message: "cannot be empty".into(),
            });
        }
        Ok(())
    }

    pub fn with_fields_table(mut self, table: impl Into<String>) -> Self {
        self.tables.fields = table.into();
        self
    }

    pub fn with_responses_table(mut self, table: impl Into<String>) -> Self {
        self.tables.responses = table.into();
        self
    }

    pub fn with_form_name(mut self, form_name: impl Into<String>) -> Self {
        self.form_name = form_name.into();
        self
    }
}

/// Table names are spliced into SQL, so only plain identifiers pass.
fn check_identifier(key: &str, value: &str) -> ConfigResult<()> {
    let mut chars = value.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{value}' is not a plain SQL identifier"),
        })
    }
}
