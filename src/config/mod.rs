//! Runtime settings for a [`RequestHandler`](crate::handler::RequestHandler).
//!
//! Settings deserialize from JSON with every field optional, or come from the
//! environment:
//!
//! | Variable                   | Field              |
//! |----------------------------|--------------------|
//! | `SWITCHYARD_ENV`           | `environment`      |
//! | `SWITCHYARD_PLACEHOLDER`   | `placeholder_body` |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable selecting the [`Environment`].
pub const ENV_VAR: &str = "SWITCHYARD_ENV";
/// Environment variable overriding [`Settings::placeholder_body`].
pub const PLACEHOLDER_VAR: &str = "SWITCHYARD_PLACEHOLDER";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown environment `{0}` (expected development, testing or production)")]
    UnknownEnvironment(String),

    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where the application runs. Decides how routing failures surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Routing failures are returned to the caller unmodified.
    Development,
    Testing,
    #[default]
    Production,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Testing => "testing",
            Self::Production => "production",
        }
    }

    pub fn is_development(self) -> bool {
        self == Self::Development
    }

    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Self::Development),
            "testing" | "test" => Ok(Self::Testing),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(ConfigError::UnknownEnvironment(s.to_owned())),
        }
    }
}

/// Handler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub environment: Environment,
    /// Body served while no route is registered, outside production.
    pub placeholder_body: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            placeholder_body: "switchyard is running; no routes are registered yet.".to_owned(),
        }
    }
}

impl Settings {
    /// Defaults with the given environment.
    pub fn for_environment(environment: Environment) -> Self {
        Self {
            environment,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read [`ENV_VAR`] and [`PLACEHOLDER_VAR`]; unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        if let Some(env) = lookup(ENV_VAR) {
            settings.environment = env.parse()?;
        }
        if let Some(body) = lookup(PLACEHOLDER_VAR) {
            settings.placeholder_body = body;
        }
        Ok(settings)
    }
}
