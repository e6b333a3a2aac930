//! Environment selection and local configuration.
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;

/// Authority environment a token or document belongs to.
///
/// The authority signs folio authorizations with a per-environment key,
/// identified by the `idk` value embedded in each token.
/// - Certification: the authority's test environment.
/// - Production: the live environment.
///
/// # Examples
/// ```rust
/// use std::str::FromStr;
/// use dte_core::config::Environment;
///
/// let env = Environment::from_str("certification")?;
/// assert_eq!(env.idk(), 100);
/// # Ok::<(), dte_core::config::EnvironmentParseError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Certification,
    Production,
}

/// Error returned when parsing an [`Environment`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvironmentParseError {
    #[error("invalid environment: {input}")]
    Invalid { input: String },
}

impl FromStr for Environment {
    type Err = EnvironmentParseError;
    fn from_str(env: &str) -> Result<Environment, EnvironmentParseError> {
        match env.to_ascii_lowercase().as_str() {
            "certification" => Ok(Environment::Certification),
            "production" => Ok(Environment::Production),
            _ => Err(EnvironmentParseError::Invalid {
                input: env.to_string(),
            }),
        }
    }
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Certification => "certification",
            Environment::Production => "production",
        }
    }

    /// Key identifier the authority uses for this environment.
    pub fn idk(&self) -> u32 {
        match self {
            Environment::Certification => 100,
            Environment::Production => 300,
        }
    }

    /// Map a token's key identifier back to its environment. Unknown
    /// identifiers (including the synthetic test sentinel) map to none.
    pub fn from_idk(idk: u32) -> Option<Environment> {
        match idk {
            100 => Some(Environment::Certification),
            300 => Some(Environment::Production),
            _ => None,
        }
    }
}

/// Local configuration for token validation.
///
/// # Examples
/// ```rust
/// use dte_core::config::Config;
///
/// let config = Config::new("certs/authority");
/// # let _ = config;
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    authority_store_dir: PathBuf,
}

impl Config {
    pub fn new(authority_store_dir: impl Into<PathBuf>) -> Self {
        Self {
            authority_store_dir: authority_store_dir.into(),
        }
    }

    /// Directory of authority certificates named `<idk>.cer`.
    pub fn authority_store_dir(&self) -> &Path {
        &self.authority_store_dir
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            authority_store_dir: PathBuf::from("./assets/certs"),
        }
    }
}
