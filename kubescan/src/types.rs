// SPDX-License-Identifier: Apache-2.0

//! Core data types shared by the enumerator, scanner, and report.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use strum_macros::{Display as StrumDisplay, EnumString};

/// A container image reference, as reported by the cluster.
///
/// This is opaque: registry, repository, tag, and digest forms are all
/// passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
	pub fn new<S: Into<String>>(image: S) -> ImageRef {
		ImageRef(image.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Display for ImageRef {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ImageRef {
	fn from(image: &str) -> ImageRef {
		ImageRef::new(image)
	}
}

/// How severe a vulnerability is, ordered from least to most severe.
#[derive(
	Debug,
	Default,
	Clone,
	Copy,
	PartialEq,
	Eq,
	PartialOrd,
	Ord,
	Hash,
	Serialize,
	Deserialize,
	StrumDisplay,
	EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum Severity {
	#[default]
	Unknown,
	Negligible,
	Low,
	Medium,
	High,
	Critical,
}

impl Severity {
	/// Parse a severity reported by a scanner, falling back to `Unknown`.
	pub fn parse_lossy(value: &str) -> Severity {
		Severity::from_str(value.trim()).unwrap_or_default()
	}
}

/// A single finding reported by the scanning backend for one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vulnerability {
	/// The vulnerability identifier, usually a CVE.
	pub id: String,
	pub severity: Severity,
	/// The full package identifier, including version.
	pub package: String,
	pub package_name: String,
	pub package_version: String,
	pub package_type: String,
	/// The version which fixes the vulnerability, if one is known.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub fix: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub feed_group: Option<String>,
}

/// The scan result for a single image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageVulnerabilityReport {
	pub image: ImageRef,

	/// How many findings met the severity threshold.
	pub bad_vulns: u64,

	/// The findings which met the severity threshold.
	///
	/// A backend may report a count without the list; callers treat that
	/// as an inconsistent result.
	pub vulns: Option<Vec<Vulnerability>>,
}

impl ImageVulnerabilityReport {
	/// Build a report from every finding for an image, keeping only those at
	/// or above `threshold`.
	pub fn from_findings(
		image: ImageRef,
		findings: impl IntoIterator<Item = Vulnerability>,
		threshold: Severity,
	) -> ImageVulnerabilityReport {
		let bad: Vec<Vulnerability> = findings
			.into_iter()
			.filter(|vuln| vuln.severity >= threshold)
			.collect();

		ImageVulnerabilityReport {
			image,
			bad_vulns: bad.len() as u64,
			vulns: Some(bad),
		}
	}
}
