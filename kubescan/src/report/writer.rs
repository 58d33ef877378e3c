// SPDX-License-Identifier: Apache-2.0

//! Reading and writing reports on disk.

use super::VulnerabilityReport;
use crate::context::Context as _;
use crate::error::Result;
use crate::util::fs as file;
use clap::ValueEnum;
use std::fs::{self, Permissions};
use std::io::Write as _;
use std::path::Path;
use tempfile::NamedTempFile;

/// The file format of a written report.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
	/// YAML output.
	#[default]
	Yaml,
	/// Pretty-printed JSON output.
	Json,
}

impl Format {
	/// The conventional file extension for the format.
	pub fn extension(self) -> &'static str {
		match self {
			Format::Yaml => "yaml",
			Format::Json => "json",
		}
	}

	/// Guess the format of an existing file from its extension.
	///
	/// Anything other than `.json` is read as YAML.
	pub fn from_path(path: &Path) -> Format {
		match path.extension().and_then(|ext| ext.to_str()) {
			Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
			_ => Format::Yaml,
		}
	}

	fn render(self, report: &VulnerabilityReport) -> Result<String> {
		match self {
			Format::Yaml => serde_yaml::to_string(report).context("failed to serialize report as YAML"),
			Format::Json => {
				serde_json::to_string_pretty(report).context("failed to serialize report as JSON")
			}
		}
	}
}

/// Write `report` to `path`, replacing whatever is there.
///
/// The report is rendered before anything touches the disk, then written to
/// a temporary file next to `path` and renamed over it, so readers see
/// either the old file or the complete new one.
pub fn write_report(path: &Path, report: &VulnerabilityReport, format: Format) -> Result<()> {
	let contents = format.render(report)?;

	let dir = match path.parent() {
		Some(parent) if !parent.as_os_str().is_empty() => parent,
		_ => Path::new("."),
	};
	file::create_dir_all(dir)?;

	let mut temp = NamedTempFile::new_in(dir)
		.with_context(|| format!("failed to create temporary file in '{}'", dir.display()))?;
	temp.write_all(contents.as_bytes())
		.context("failed to write report")?;
	match_permissions(&temp, path)?;
	temp.as_file()
		.sync_all()
		.context("failed to flush report to disk")?;
	// Taking the io::Error out of the PersistError drops the temporary file.
	temp.persist(path)
		.map_err(|err| err.error)
		.with_context(|| format!("failed to move report into place at '{}'", path.display()))?;

	log::info!(
		"wrote report [path={}, format={:?}]",
		path.display(),
		format
	);
	Ok(())
}

/// Give the temporary file the mode the report should end up with.
///
/// Temporary files are created owner-only. A report being replaced keeps the
/// mode it had; a new one is readable by everyone.
fn match_permissions(temp: &NamedTempFile, path: &Path) -> Result<()> {
	let permissions = match fs::metadata(path) {
		Ok(existing) => existing.permissions(),
		Err(_) => new_report_permissions(temp)?,
	};

	temp.as_file()
		.set_permissions(permissions)
		.with_context(|| format!("failed to set permissions for '{}'", path.display()))
}

#[cfg(unix)]
fn new_report_permissions(_temp: &NamedTempFile) -> Result<Permissions> {
	use std::os::unix::fs::PermissionsExt as _;
	Ok(Permissions::from_mode(NEW_REPORT_MODE))
}

#[cfg(not(unix))]
fn new_report_permissions(temp: &NamedTempFile) -> Result<Permissions> {
	let metadata = temp
		.as_file()
		.metadata()
		.context("failed to read temporary file metadata")?;
	Ok(metadata.permissions())
}

/// `rw-r--r--`
#[cfg(unix)]
const NEW_REPORT_MODE: u32 = 0o644;

/// Read a report written by `write_report`.
pub fn read_report(path: &Path) -> Result<VulnerabilityReport> {
	match Format::from_path(path) {
		Format::Yaml => file::read_yaml(path),
		Format::Json => file::read_json(path),
	}
}
