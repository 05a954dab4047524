// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Ledger configuration.
//!
//! Sources, lowest precedence first:
//! - built-in defaults
//! - `$XDG_CONFIG_HOME/loom/ledger.toml` (or an explicit file)
//! - `LOOM_LEDGER_*` / `LOOM_LOG_*` environment variables

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("TOML parse error in {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("Invalid value for {field}: {message}")]
	InvalidValue { field: String, message: String },
}

impl ConfigError {
	pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
		Self::InvalidValue {
			field: field.into(),
			message: message.into(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
	Error,
	Warn,
	#[default]
	Info,
	Debug,
	Trace,
}

impl std::str::FromStr for LogLevel {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_lowercase().as_str() {
			"error" => Ok(LogLevel::Error),
			"warn" | "warning" => Ok(LogLevel::Warn),
			"info" => Ok(LogLevel::Info),
			"debug" => Ok(LogLevel::Debug),
			"trace" => Ok(LogLevel::Trace),
			_ => Err(ConfigError::invalid_value("logging.level", s)),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
	#[default]
	Pretty,
	Json,
	Compact,
}

impl std::str::FromStr for LogFormat {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_lowercase().as_str() {
			"pretty" => Ok(LogFormat::Pretty),
			"json" => Ok(LogFormat::Json),
			"compact" => Ok(LogFormat::Compact),
			_ => Err(ConfigError::invalid_value("logging.format", s)),
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
	pub level: LogLevel,
	pub format: LogFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
	/// Root of the task store (`tasks/` and `state/` live below it).
	pub data_dir: PathBuf,
	pub pretty_json: bool,
	/// Measure the task directory for the summary's `size`. When off the
	/// size is always `0`.
	pub measure_task_dir: bool,
	pub logging: LoggingConfig,
}

impl Default for LedgerConfig {
	fn default() -> Self {
		Self {
			data_dir: default_data_dir().unwrap_or_else(|| PathBuf::from(".loom/ledger")),
			pretty_json: true,
			measure_task_dir: true,
			logging: LoggingConfig::default(),
		}
	}
}

fn default_data_dir() -> Option<PathBuf> {
	dirs::data_dir().map(|p| p.join("loom").join("ledger"))
}

/// `$XDG_CONFIG_HOME/loom/ledger.toml`
pub fn default_config_path() -> Option<PathBuf> {
	dirs::config_dir().map(|p| p.join("loom").join("ledger.toml"))
}

impl LedgerConfig {
	/// Load defaults, then the user config file if present, then the
	/// environment.
	pub fn load() -> Result<Self, ConfigError> {
		Self::load_from(default_config_path().as_deref())
	}

	pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
		let mut config = match path {
			Some(path) if path.exists() => Self::from_file(path)?,
			_ => Self::default(),
		};
		config.apply_env(std::env::vars())?;
		Ok(config)
	}

	pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
		let contents = std::fs::read_to_string(path)?;
		let config = Self::from_toml_str(&contents).map_err(|source| ConfigError::TomlParse {
			path: path.to_path_buf(),
			source,
		})?;
		debug!(path = %path.display(), "loaded ledger config file");
		Ok(config)
	}

	pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
		toml::from_str(contents)
	}

	/// Apply `LOOM_LEDGER_*` and `LOOM_LOG_*` overrides. Unknown `LOOM_`
	/// variables are ignored.
	pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
	where
		I: IntoIterator<Item = (String, String)>,
	{
		for (key, value) in vars {
			match key.as_str() {
				"LOOM_LEDGER_DATA_DIR" => {
					if value.is_empty() {
						return Err(ConfigError::invalid_value("data_dir", "must not be empty"));
					}
					self.data_dir = PathBuf::from(value);
				}
				"LOOM_LEDGER_PRETTY_JSON" => {
					self.pretty_json = parse_bool("pretty_json", &value)?;
				}
				"LOOM_LEDGER_MEASURE_TASK_DIR" => {
					self.measure_task_dir = parse_bool("measure_task_dir", &value)?;
				}
				"LOOM_LOG_LEVEL" => {
					self.logging.level = value.parse()?;
				}
				"LOOM_LOG_FORMAT" => {
					self.logging.format = value.parse()?;
				}
				_ => {}
			}
		}
		Ok(())
	}
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
	match value.to_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Ok(true),
		"0" | "false" | "no" | "off" => Ok(false),
		_ => Err(ConfigError::invalid_value(field, value)),
	}
}
