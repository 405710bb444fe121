//! Configuration loading.
//!
//! The server reads a single JSON file (default `./config.json`, path
//! overridable by the first CLI argument). Missing file, unparseable JSON
//! or an unreadable packages directory are fatal at startup; every field
//! has a default so a minimal `{}` file is valid.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::Deserialize;

use crate::error::{AppError, AppResult};

/// Log verbosity, ordered from silent to chatty.
///
/// Accepts either the level name (case-insensitive) or its numeric value
/// 0–6 in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    None = 0,
    Exception = 1,
    Error = 2,
    Warning = 3,
    Log = 4,
    Info = 5,
    Debug = 6,
}

impl Verbosity {
    pub const ALL: [Verbosity; 7] = [
        Verbosity::None,
        Verbosity::Exception,
        Verbosity::Error,
        Verbosity::Warning,
        Verbosity::Log,
        Verbosity::Info,
        Verbosity::Debug,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Verbosity::None => "None",
            Verbosity::Exception => "Exception",
            Verbosity::Error => "Error",
            Verbosity::Warning => "Warning",
            Verbosity::Log => "Log",
            Verbosity::Info => "Info",
            Verbosity::Debug => "Debug",
        }
    }

    /// Directive for the tracing filter.
    pub fn filter_directive(self) -> &'static str {
        match self {
            Verbosity::None => "off",
            Verbosity::Exception | Verbosity::Error => "error",
            Verbosity::Warning => "warn",
            Verbosity::Log | Verbosity::Info => "info",
            Verbosity::Debug => "debug",
        }
    }

    fn from_index(index: u64) -> Option<Self> {
        Verbosity::ALL.get(index as usize).copied()
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), *self as u8)
    }
}

impl FromStr for Verbosity {
    type Err = String;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        if let Ok(index) = token.parse::<u64>() {
            return Verbosity::from_index(index)
                .ok_or_else(|| format!("verbosity index {index} out of range 0-6"));
        }
        Verbosity::ALL
            .iter()
            .find(|level| level.name().eq_ignore_ascii_case(token))
            .copied()
            .ok_or_else(|| format!("unknown verbosity {token:?}"))
    }
}

impl<'de> Deserialize<'de> for Verbosity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl de::Visitor<'_> for Visitor {
            type Value = Verbosity;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a verbosity name or an integer 0-6")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Verbosity, E> {
                Verbosity::from_index(value)
                    .ok_or_else(|| E::custom(format!("verbosity index {value} out of range 0-6")))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Verbosity, E> {
                u64::try_from(value)
                    .ok()
                    .and_then(Verbosity::from_index)
                    .ok_or_else(|| E::custom(format!("verbosity index {value} out of range 0-6")))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Verbosity, E> {
                value.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// URL prefixes to listen on; each is auto-suffixed with `/`.
    pub endpoints: Vec<String>,
    /// Packages directory, relative to the working directory.
    pub path: PathBuf,
    /// Tarball file extensions, matched case-insensitively.
    pub extensions: Vec<String>,
    /// Initial log verbosity.
    pub verbosity: Verbosity,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            endpoints: vec!["http://localhost/".to_string()],
            path: PathBuf::from("./"),
            extensions: vec![".tgz".into(), ".tar.gz".into(), ".taz".into()],
            verbosity: Verbosity::Log,
        }
    }
}

impl Config {
    /// Load the configuration file. Any failure here is fatal to startup.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| {
            AppError::Internal(format!(
                "cannot read configuration {}: {err}",
                path.display()
            ))
        })?;
        let mut config: Config = serde_json::from_str(&text).map_err(|err| {
            AppError::Internal(format!(
                "invalid configuration {}: {err}",
                path.display()
            ))
        })?;
        config.normalize();
        Ok(config)
    }

    /// Apply the documented field normalizations.
    fn normalize(&mut self) {
        for endpoint in &mut self.endpoints {
            if !endpoint.ends_with('/') {
                endpoint.push('/');
            }
        }
        for ext in &mut self.extensions {
            if !ext.starts_with('.') {
                ext.insert(0, '.');
            }
        }
    }
}
