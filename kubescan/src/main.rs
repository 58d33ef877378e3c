// SPDX-License-Identifier: Apache-2.0

mod cli;
mod cluster;
mod config;
mod context;
mod error;
mod report;
mod retry;
mod scanner;
mod types;
mod util;
mod workflow;

use crate::cli::{CliConfig, FullCommands, ImagesArgs, ScanArgs, ShowArgs};
use crate::cluster::{ClusterConnection, ImageLister as _, KubeImageLister};
use crate::config::{Config, OnScanError, CONFIG_FILE};
use crate::error::{Error, Result};
use crate::scanner::AnchoreClient;
use crate::workflow::ScanWorkflow;
use clap::CommandFactory as _;
use env_logger::{Builder, Env};
use pathbuf::pathbuf;
use std::process::exit;

/// Entry point for Kubescan.
///
/// Sets up logging and makes sure error codes are output correctly.
fn main() {
	init_log();
	exit(go().exit_code())
}

/// The environment variable for configuring logging output.
static LOG_NAME: &str = "KS_LOG";

/// The environment variable for configuring logging style.
static LOG_STYLE: &str = "KS_LOG_STYLE";

/// Initialize the logger.
fn init_log() {
	let env = Env::new().filter_or(LOG_NAME, "info").write_style(LOG_STYLE);
	Builder::from_env(env).init();
}

/// How a run of Kubescan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
	/// Everything worked.
	Ok,
	/// Something went wrong, or some image couldn't be scanned.
	Err,
	/// Bad vulnerabilities were found and the user asked to fail on them.
	Findings,
}

impl Outcome {
	fn exit_code(&self) -> i32 {
		match self {
			Outcome::Ok => 0,
			Outcome::Err => 1,
			Outcome::Findings => 2,
		}
	}
}

fn go() -> Outcome {
	let config = CliConfig::load();

	let result = match config.subcommand() {
		Some(FullCommands::Scan(args)) => cmd_scan(&config, &args),
		Some(FullCommands::Images(args)) => cmd_images(&config, &args),
		Some(FullCommands::Show(args)) => cmd_show(&args),
		Some(FullCommands::PrintConfig) => cmd_print_config(&config),
		None => {
			// Printing help only fails if stdout is gone.
			let _ = CliConfig::command().print_help();
			Ok(Outcome::Err)
		}
	};

	result.unwrap_or_else(|err| {
		print_error(&err);
		Outcome::Err
	})
}

/// Scan a namespace, write the report, and summarize it.
fn cmd_scan(config: &CliConfig, args: &ScanArgs) -> Result<Outcome> {
	let settings = load_config(config)?;

	let connection = ClusterConnection::from_config(&settings.cluster)?;
	let lister = KubeImageLister::new(connection);
	let scanner = AnchoreClient::from_config(&settings.scanner)?;
	let workflow = ScanWorkflow::new(&scanner, &settings.scan);

	let on_error = if args.halt_on_error {
		OnScanError::Halt
	} else {
		settings.scan.on_error
	};

	let report = report::scan_namespace(&lister, &workflow, &args.namespace, on_error)?;

	let format = config.format();
	let path = args.output_path(format);
	report::write_report(&path, &report, format)?;

	print!("{}", report::summary_table(&report));
	println!("report written to {}", path.display());

	if !report.is_clean_run() {
		log::warn!(
			"{} images unscanned, {} failed; see the report for reasons",
			report.unscanned.len(),
			report.failed.len()
		);
	}

	if !report.failed.is_empty() {
		return Ok(Outcome::Err);
	}

	if args.fail_on_findings && report.bad_vulns > 0 {
		return Ok(Outcome::Findings);
	}

	Ok(Outcome::Ok)
}

/// Print the images running in a namespace, one per line.
fn cmd_images(config: &CliConfig, args: &ImagesArgs) -> Result<Outcome> {
	let settings = load_config(config)?;
	let lister = KubeImageLister::new(ClusterConnection::from_config(&settings.cluster)?);

	for image in lister.list(&args.namespace)? {
		println!("{}", image);
	}

	Ok(Outcome::Ok)
}

/// Summarize a report written by an earlier scan.
fn cmd_show(args: &ShowArgs) -> Result<Outcome> {
	let report = report::read_report(&args.file)?;
	print!("{}", report::summary_table(&report));
	Ok(Outcome::Ok)
}

/// Print the path of the configuration file Kubescan would load.
fn cmd_print_config(config: &CliConfig) -> Result<Outcome> {
	let dir = config_dir(config)?;
	println!("{}", pathbuf![dir, CONFIG_FILE].display());
	Ok(Outcome::Ok)
}

fn config_dir(config: &CliConfig) -> Result<&std::path::Path> {
	config
		.config()
		.ok_or_else(|| ks_error!("can't find config directory; set it with --config or KS_CONFIG"))
}

fn load_config(config: &CliConfig) -> Result<Config> {
	Config::load_from(config_dir(config)?)
}

/// Print an error and the chain of errors which caused it.
fn print_error(err: &Error) {
	let mut chain = err.chain();

	if let Some(head) = chain.next() {
		eprintln!("error: {}", head);
	}

	for cause in chain {
		eprintln!("       {}", cause);
	}
}
