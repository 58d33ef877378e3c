// SPDX-License-Identifier: Apache-2.0

//! Defines the configuration file format.

use crate::context::Context as _;
use crate::error::Result;
use crate::ks_error;
use crate::types::Severity;
use crate::util::fs as file;
use pathbuf::pathbuf;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// The name of the configuration file inside the configuration directory.
pub const CONFIG_FILE: &str = "Kubescan.toml";

/// The longest a single image's scan may be allowed to take.
const MAX_DEADLINE_SECS: u64 = 24 * 60 * 60;

impl Config {
	/// Load configuration from the given directory.
	///
	/// A directory without a configuration file yields the defaults.
	pub fn load_from(config_dir: &Path) -> Result<Config> {
		if config_dir.is_file() {
			return Err(ks_error!(
				"Kubescan config path must be a directory, not a file."
			));
		}

		let config_file = pathbuf![config_dir, CONFIG_FILE];
		if !config_file.exists() {
			log::debug!(
				"no config file found, using defaults [path={}]",
				config_file.display()
			);
			return Ok(Config::default());
		}

		let config: Config = file::read_toml(&config_file).context("can't parse config file")?;
		config
			.validate()
			.with_context(|| format!("invalid config file '{}'", config_file.display()))?;

		log::debug!("loaded config [path={}]", config_file.display());
		Ok(config)
	}

	/// Check values serde can't check for us.
	pub fn validate(&self) -> std::result::Result<(), ConfigError> {
		let backoff = &self.scan.backoff;

		if self.scan.deadline_secs == 0 {
			return Err(ConfigError::invalid("scan.deadline-secs", "must be non-zero"));
		}
		if self.scan.deadline_secs > MAX_DEADLINE_SECS {
			return Err(ConfigError::invalid(
				"scan.deadline-secs",
				"must be at most 86400 (one day)",
			));
		}
		if backoff.initial_interval_ms == 0 {
			return Err(ConfigError::invalid(
				"scan.backoff.initial-interval-ms",
				"must be non-zero",
			));
		}
		if backoff.max_interval_ms < backoff.initial_interval_ms {
			return Err(ConfigError::invalid(
				"scan.backoff.max-interval-ms",
				"must be at least initial-interval-ms",
			));
		}
		if !(backoff.multiplier >= 1.0 && backoff.multiplier.is_finite()) {
			return Err(ConfigError::invalid(
				"scan.backoff.multiplier",
				"must be a finite number >= 1",
			));
		}
		if !(0.0..=1.0).contains(&backoff.randomization_factor) {
			return Err(ConfigError::invalid(
				"scan.backoff.randomization-factor",
				"must be between 0 and 1",
			));
		}
		if self.cluster.page_size == 0 {
			return Err(ConfigError::invalid("cluster.page-size", "must be non-zero"));
		}

		Ok(())
	}
}

/// A configuration value which parsed but makes no sense.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
	#[error("invalid value for '{field}': {reason}")]
	InvalidValue {
		field: &'static str,
		reason: &'static str,
	},
}

impl ConfigError {
	fn invalid(field: &'static str, reason: &'static str) -> ConfigError {
		ConfigError::InvalidValue { field, reason }
	}
}

/// Represents the configuration of Kubescan.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
	/// How to reach the cluster API.
	pub cluster: ClusterConfig,

	/// How to reach the vulnerability scanner.
	pub scanner: ScannerConfig,

	/// How each image scan is paced and bounded.
	pub scan: ScanConfig,
}

/// Connection settings for the Kubernetes API server.
///
/// Anything left unset falls back to the in-cluster service account.
#[derive(Debug, Clone, Deserialize, Serialize, SmartDefault, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ClusterConfig {
	/// Base URL of the API server, e.g. `https://10.0.0.1:443`.
	pub api_server: Option<Url>,

	/// File containing a bearer token.
	pub token_file: Option<PathBuf>,

	/// Environment variable containing a bearer token. Wins over `token-file`.
	pub token_var: Option<String>,

	/// PEM bundle of the cluster's certificate authority.
	pub ca_file: Option<PathBuf>,

	/// How many pods to request per page.
	#[default = 500]
	pub page_size: u32,
}

/// Connection settings for the Anchore Engine API.
#[derive(Debug, Clone, Deserialize, Serialize, SmartDefault, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ScannerConfig {
	/// Base URL of the Anchore Engine API. Falls back to `ANCHORE_CLI_URL`.
	pub url: Option<Url>,

	/// Environment variable holding the API user name.
	#[default = "ANCHORE_CLI_USER"]
	pub user_var: String,

	/// Environment variable holding the API password.
	#[default = "ANCHORE_CLI_PASS"]
	pub password_var: String,

	/// Findings below this severity aren't counted as bad.
	#[default(Severity::High)]
	#[serde(deserialize_with = "de::severity")]
	pub min_severity: Severity,
}

/// What to do with the remaining images once one can't be scanned.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnScanError {
	/// Record the problem and move on to the next image.
	#[default]
	Continue,
	/// Stop and return the report built so far.
	Halt,
}

/// Bounds for scanning a single image.
#[derive(Debug, Clone, Deserialize, Serialize, SmartDefault, PartialEq)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ScanConfig {
	/// Wall-clock budget for one image, covering trigger, polling, and fetch.
	#[default = 180]
	pub deadline_secs: u64,

	pub on_error: OnScanError,

	pub backoff: BackoffConfig,
}

impl ScanConfig {
	pub fn deadline(&self) -> Duration {
		Duration::from_secs(self.deadline_secs)
	}
}

/// Pacing for polling the scanner while an analysis is in progress.
#[derive(Debug, Clone, Deserialize, Serialize, SmartDefault, PartialEq)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct BackoffConfig {
	#[default = 500]
	pub initial_interval_ms: u64,

	#[default = 1.5]
	pub multiplier: f64,

	/// Each wait is scaled by a random factor in `[1 - r, 1 + r]`.
	#[default = 0.5]
	pub randomization_factor: f64,

	#[default = 60_000]
	pub max_interval_ms: u64,
}

impl BackoffConfig {
	pub fn initial_interval(&self) -> Duration {
		Duration::from_millis(self.initial_interval_ms)
	}

	pub fn max_interval(&self) -> Duration {
		Duration::from_millis(self.max_interval_ms)
	}
}

mod de {
	use crate::types::Severity;
	use serde::de::{self, Deserializer, Visitor};
	use std::fmt;
	use std::str::FromStr;

	/// Parse a severity name, ignoring case.
	pub fn severity<'de, D>(deserializer: D) -> Result<Severity, D::Error>
	where
		D: Deserializer<'de>,
	{
		struct SeverityVisitor;

		impl Visitor<'_> for SeverityVisitor {
			type Value = Severity;

			fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "one of: negligible, low, medium, high, critical")
			}

			fn visit_str<E: de::Error>(self, value: &str) -> Result<Severity, E> {
				Severity::from_str(value).map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
			}
		}

		deserializer.deserialize_str(SeverityVisitor)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	const TEMPDIR_PREFIX: &str = "kubescan";

	#[test]
	fn missing_file_yields_defaults() {
		let dir = TempDir::with_prefix(TEMPDIR_PREFIX).unwrap();
		let config = Config::load_from(dir.path()).unwrap();

		assert_eq!(config, Config::default());
		assert_eq!(config.scan.deadline(), Duration::from_secs(180));
		assert_eq!(config.scanner.min_severity, Severity::High);
		assert_eq!(config.scanner.password_var, "ANCHORE_CLI_PASS");
		assert_eq!(config.scan.on_error, OnScanError::Continue);
	}

	#[test]
	fn file_path_is_rejected() {
		let dir = TempDir::with_prefix(TEMPDIR_PREFIX).unwrap();
		let path = pathbuf![dir.path(), CONFIG_FILE];
		fs::write(&path, "").unwrap();

		assert!(Config::load_from(&path).is_err());
	}

	#[test]
	fn partial_file_keeps_other_defaults() {
		let dir = TempDir::with_prefix(TEMPDIR_PREFIX).unwrap();
		fs::write(
			pathbuf![dir.path(), CONFIG_FILE],
			r#"
[cluster]
api-server = "http://127.0.0.1:8001"

[scanner]
url = "http://anchore.anchore.svc:8228"
min-severity = "medium"

[scan]
deadline-secs = 60
on-error = "halt"

[scan.backoff]
multiplier = 2.0
"#,
		)
		.unwrap();

		let config = Config::load_from(dir.path()).unwrap();

		assert_eq!(
			config.cluster.api_server.unwrap().as_str(),
			"http://127.0.0.1:8001/"
		);
		assert_eq!(config.cluster.page_size, 500);
		assert_eq!(config.scanner.min_severity, Severity::Medium);
		assert_eq!(config.scanner.user_var, "ANCHORE_CLI_USER");
		assert_eq!(config.scan.deadline_secs, 60);
		assert_eq!(config.scan.on_error, OnScanError::Halt);
		assert_eq!(config.scan.backoff.multiplier, 2.0);
		assert_eq!(config.scan.backoff.initial_interval_ms, 500);
	}

	#[test]
	fn unknown_keys_are_rejected() {
		let dir = TempDir::with_prefix(TEMPDIR_PREFIX).unwrap();
		fs::write(
			pathbuf![dir.path(), CONFIG_FILE],
			"[scan]\ntimeout = 3\n",
		)
		.unwrap();

		assert!(Config::load_from(dir.path()).is_err());
	}

	#[test]
	fn validation_catches_bad_backoff() {
		let mut config = Config::default();
		config.scan.backoff.randomization_factor = 1.5;
		assert_eq!(
			config.validate(),
			Err(ConfigError::InvalidValue {
				field: "scan.backoff.randomization-factor",
				reason: "must be between 0 and 1",
			})
		);

		let mut config = Config::default();
		config.scan.backoff.multiplier = 0.5;
		assert!(config.validate().is_err());

		let mut config = Config::default();
		config.scan.deadline_secs = 0;
		assert!(config.validate().is_err());
	}

	#[test]
	fn validation_bounds_deadline() {
		let mut config = Config::default();

		config.scan.deadline_secs = MAX_DEADLINE_SECS;
		assert_eq!(config.validate(), Ok(()));

		for secs in [MAX_DEADLINE_SECS + 1, u64::MAX] {
			config.scan.deadline_secs = secs;
			assert_eq!(
				config.validate(),
				Err(ConfigError::InvalidValue {
					field: "scan.deadline-secs",
					reason: "must be at most 86400 (one day)",
				})
			);
		}
	}
}
