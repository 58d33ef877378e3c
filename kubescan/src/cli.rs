// SPDX-License-Identifier: Apache-2.0

//! Data structures for Kubescan's CLI.

use crate::report::Format;
use clap::builder::NonEmptyStringValueParser;
use clap::{Parser as _, ValueEnum};
use pathbuf::pathbuf;
use std::path::{Path, PathBuf};

/// Scan the container images running in a Kubernetes namespace for known vulnerabilities.
#[derive(Debug, Default, clap::Parser)]
#[command(name = "kubescan", about, version, long_about = None)]
pub struct CliConfig {
	#[command(subcommand)]
	command: Option<Commands>,

	/// Arguments configuring the CLI output.
	#[clap(flatten)]
	output_args: OutputArgs,

	/// Arguments setting paths which Kubescan will use.
	#[clap(flatten)]
	path_args: PathArgs,

	/// Print the config file path for Kubescan.
	#[arg(long = "print-config", global = true)]
	print_config: bool,
}

/// Arguments configuring Kubescan's output.
#[derive(Debug, Default, clap::Args)]
struct OutputArgs {
	/// What format to write reports in.
	#[arg(
		short = 'f',
		long = "format",
		global = true,
		help_heading = "Output Flags",
		long_help = "What format to write reports in. Can also be set with the `KS_FORMAT` environment variable"
	)]
	format: Option<Format>,
}

/// Arguments configuring paths for Kubescan to use.
#[derive(Debug, Default, clap::Args)]
struct PathArgs {
	/// Path to the configuration folder.
	#[arg(
		short = 'c',
		long = "config",
		global = true,
		help_heading = "Path Flags",
		long_help = "Path to the configuration folder. Can also be set with the `KS_CONFIG` environment variable"
	)]
	config: Option<PathBuf>,
}

impl CliConfig {
	/// Load CLI configuration.
	///
	/// This loads values in increasing order of precedence:
	///
	/// - Backups under the home directory
	/// - Platform-specific defaults
	/// - Environment variables, if set
	/// - CLI flags, if set.
	pub fn load() -> CliConfig {
		let mut config = CliConfig::empty();
		config.update(&CliConfig::backups());
		config.update(&CliConfig::from_platform());
		config.update(&CliConfig::from_env());
		config.update(&CliConfig::from_cli());
		config
	}

	/// Get the selected subcommand, if any.
	pub fn subcommand(&self) -> Option<FullCommands> {
		if self.print_config {
			return Some(FullCommands::PrintConfig);
		}

		self.command.as_ref().map(FullCommands::from)
	}

	/// Get the configured format.
	pub fn format(&self) -> Format {
		self.output_args.format.unwrap_or_default()
	}

	/// Get the path to the configuration directory.
	pub fn config(&self) -> Option<&Path> {
		self.path_args.config.as_deref()
	}

	/// Get an empty configuration object with nothing set.
	///
	/// This is just an alias for `default()`.
	fn empty() -> CliConfig {
		CliConfig::default()
	}

	/// Load configuration from CLI flags and positional arguments.
	///
	/// This is just an alias for `parse()`.
	fn from_cli() -> CliConfig {
		CliConfig::parse()
	}

	/// Load config from environment variables.
	///
	/// Note that this only loads _some_ config items from the environment.
	fn from_env() -> CliConfig {
		CliConfig {
			output_args: OutputArgs {
				format: ks_env_var_value_enum("format"),
			},
			path_args: PathArgs {
				config: ks_env_var("config"),
			},
			..Default::default()
		}
	}

	/// Load config from platform-specific information.
	fn from_platform() -> CliConfig {
		CliConfig {
			path_args: PathArgs {
				config: dirs::config_dir().map(|dir| pathbuf![&dir, "kubescan"]),
			},
			..Default::default()
		}
	}

	/// Set configuration backups for paths.
	fn backups() -> CliConfig {
		CliConfig {
			path_args: PathArgs {
				config: dirs::home_dir().map(|dir| pathbuf![&dir, "kubescan", "config"]),
			},
			..Default::default()
		}
	}
}

/// Get a Kubescan configuration environment variable.
///
/// Variables are also read from a `.env` file in the working directory.
fn ks_env_var<O: From<String>>(name: &'static str) -> Option<O> {
	let name = format!("KS_{}", name.to_uppercase());
	let val = dotenv::var(name).ok()?;
	Some(O::from(val))
}

/// Get a Kubescan configuration environment variable and parse it into a [`ValueEnum`] type.
fn ks_env_var_value_enum<E: ValueEnum>(name: &'static str) -> Option<E> {
	let s: String = ks_env_var(name)?;

	// Must match the flag spelling exactly, e.g. `json`.
	let ignore_case = false;
	E::from_str(&s, ignore_case).ok()
}

/// All commands, both subcommands and flag-like commands.
pub enum FullCommands {
	Scan(ScanArgs),
	Images(ImagesArgs),
	Show(ShowArgs),
	PrintConfig,
}

impl From<&Commands> for FullCommands {
	fn from(command: &Commands) -> Self {
		match command {
			Commands::Scan(args) => FullCommands::Scan(args.clone()),
			Commands::Images(args) => FullCommands::Images(args.clone()),
			Commands::Show(args) => FullCommands::Show(args.clone()),
		}
	}
}

#[derive(Debug, Clone, clap::Subcommand)]
pub enum Commands {
	/// Scan every image running in a namespace and write a report.
	Scan(ScanArgs),
	/// List the images running in a namespace without scanning them.
	Images(ImagesArgs),
	/// Summarize a previously written report.
	Show(ShowArgs),
}

#[derive(Debug, Clone, clap::Args)]
pub struct ScanArgs {
	/// The namespace to scan.
	#[arg(value_parser = NonEmptyStringValueParser::new())]
	pub namespace: String,

	/// Where to write the report [default: <NAMESPACE>-vulnerabilities.<FORMAT>]
	#[arg(short = 'o', long = "output")]
	pub output: Option<PathBuf>,

	/// Stop at the first image which can't be scanned.
	#[arg(long = "halt-on-error")]
	pub halt_on_error: bool,

	/// Exit with status 2 if any bad vulnerabilities are found.
	#[arg(long = "fail-on-findings")]
	pub fail_on_findings: bool,
}

impl ScanArgs {
	/// The report path, defaulting to one named after the namespace.
	pub fn output_path(&self, format: Format) -> PathBuf {
		self.output.clone().unwrap_or_else(|| {
			PathBuf::from(format!(
				"{}-vulnerabilities.{}",
				self.namespace,
				format.extension()
			))
		})
	}
}

#[derive(Debug, Clone, clap::Args)]
pub struct ImagesArgs {
	/// The namespace to list.
	#[arg(value_parser = NonEmptyStringValueParser::new())]
	pub namespace: String,
}

#[derive(Debug, Clone, clap::Args)]
pub struct ShowArgs {
	/// The report file to read.
	pub file: PathBuf,
}

/// A type that can copy non-`None` values from other instances of itself.
pub trait Update {
	/// Update self with the value from other, if present.
	fn update(&mut self, other: &Self);
}

impl<T: Clone> Update for Option<T> {
	fn update(&mut self, other: &Option<T>) {
		if other.is_some() {
			self.clone_from(other);
		}
	}
}

/// A flag stays set once any source sets it.
impl Update for bool {
	fn update(&mut self, other: &bool) {
		*self |= *other;
	}
}

/// Implement `Update` for a struct by updating each listed field.
macro_rules! impl_update {
	( $ty:ident { $( $field:ident ),* $(,)? } ) => {
		impl Update for $ty {
			fn update(&mut self, other: &Self) {
				$( self.$field.update(&other.$field); )*
			}
		}
	};
}

impl_update!(CliConfig {
	command,
	output_args,
	path_args,
	print_config
});
impl_update!(OutputArgs { format });
impl_update!(PathArgs { config });

/// Test CLI commands
#[cfg(test)]
mod tests {
	use super::*;
	use crate::util::test::with_env_vars;
	use clap::{CommandFactory, Parser};
	use tempfile::TempDir;

	const TEMPDIR_PREFIX: &str = "kubescan";

	fn layered() -> CliConfig {
		let mut temp = CliConfig::empty();
		temp.update(&CliConfig::from_platform());
		temp.update(&CliConfig::from_env());
		temp
	}

	#[test]
	fn verify_cli() {
		CliConfig::command().debug_assert()
	}

	#[cfg(target_os = "linux")]
	#[test]
	fn resolve_config_with_platform() {
		let tempdir = TempDir::with_prefix(TEMPDIR_PREFIX).unwrap();

		let vars = vec![
			("HOME", Some(tempdir.path().to_str().unwrap())),
			("XDG_CONFIG_HOME", None),
			("KS_CONFIG", None),
		];

		with_env_vars(vars, || {
			let config = layered();
			let expected = pathbuf![&tempdir.path(), ".config", "kubescan"];
			assert_eq!(config.config().unwrap(), expected);
		});
	}

	#[test]
	fn resolve_config_with_env_var() {
		let tempdir = TempDir::with_prefix(TEMPDIR_PREFIX).unwrap();

		let vars = vec![
			("HOME", None),
			("XDG_CONFIG_HOME", None),
			("KS_CONFIG", Some(tempdir.path().to_str().unwrap())),
		];

		with_env_vars(vars, || {
			assert_eq!(layered().config().unwrap(), tempdir.path());
		});
	}

	#[test]
	fn resolve_config_with_flag() {
		let tempdir = TempDir::with_prefix(TEMPDIR_PREFIX).unwrap();

		let vars = vec![
			("HOME", Some(tempdir.path().to_str().unwrap())),
			("XDG_CONFIG_HOME", None),
			("KS_CONFIG", None),
		];

		with_env_vars(vars, || {
			let expected = pathbuf![tempdir.path(), "kubescan"];

			let mut config = layered();
			config.update(&CliConfig::parse_from([
				"kubescan",
				"--config",
				expected.to_str().unwrap(),
				"images",
				"prod",
			]));

			assert_eq!(config.config().unwrap(), expected);
		});
	}

	#[test]
	fn resolve_format() {
		with_env_vars(vec![("KS_FORMAT", None)], || {
			assert_eq!(layered().format(), Format::Yaml);
		});

		with_env_vars(vec![("KS_FORMAT", Some("json"))], || {
			assert_eq!(layered().format(), Format::Json);

			// The flag wins over the environment.
			let mut config = layered();
			config.update(&CliConfig::parse_from(["kubescan", "-f", "yaml", "show", "r.json"]));
			assert_eq!(config.format(), Format::Yaml);
		});

		with_env_vars(vec![("KS_FORMAT", Some("xml"))], || {
			assert_eq!(layered().format(), Format::Yaml);
		});
	}

	#[test]
	fn scan_flags_and_default_output() {
		let config = CliConfig::parse_from(["kubescan", "scan", "prod", "--halt-on-error"]);

		let Some(FullCommands::Scan(args)) = config.subcommand() else {
			panic!("expected scan command");
		};
		assert_eq!(args.namespace, "prod");
		assert!(args.halt_on_error);
		assert!(!args.fail_on_findings);
		assert_eq!(
			args.output_path(Format::Json),
			PathBuf::from("prod-vulnerabilities.json")
		);

		let config = CliConfig::parse_from(["kubescan", "scan", "prod", "-o", "out/r.yaml"]);
		let Some(FullCommands::Scan(args)) = config.subcommand() else {
			panic!("expected scan command");
		};
		assert_eq!(args.output_path(Format::Json), PathBuf::from("out/r.yaml"));
	}

	#[test]
	fn empty_namespace_is_rejected() {
		assert!(CliConfig::try_parse_from(["kubescan", "scan", ""]).is_err());
		assert!(CliConfig::try_parse_from(["kubescan", "images", ""]).is_err());
	}

	#[test]
	fn print_config_wins_over_subcommand() {
		let config = CliConfig::parse_from(["kubescan", "--print-config", "images", "prod"]);
		assert!(matches!(config.subcommand(), Some(FullCommands::PrintConfig)));
	}
}
