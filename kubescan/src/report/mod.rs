// SPDX-License-Identifier: Apache-2.0

// A report collects the results of scanning one namespace:
//
// 1. The findings (which images have vulnerabilities at or above the threshold)
// 2. The gaps (which images the scanner refused, and which scans failed)
// 3. Whether every image was attempted at all
//
// The same type is written to disk, read back by `kubescan show`, and
// summarized on the terminal.

mod report_builder;
mod summary;
mod writer;

pub use report_builder::scan_namespace;
pub use summary::summary_table;
pub use writer::{read_report, write_report, Format};

use crate::types::{ImageRef, Vulnerability};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The vulnerabilities found in one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerabilityReport {
	/// The namespace which was scanned.
	pub namespace: String,

	/// The total number of bad vulnerabilities across all images.
	pub bad_vulns: u64,

	/// The bad vulnerabilities of each image which has any.
	///
	/// Images without bad vulnerabilities have no entry.
	pub vuln_by_image: BTreeMap<ImageRef, Vec<Vulnerability>>,

	/// When the scan started.
	pub scanned_at: DateTime<Utc>,

	/// How many images the scanner produced results for.
	pub images_scanned: u64,

	/// Images the scanner refused to scan.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub unscanned: Vec<SkippedImage>,

	/// Images whose scan started but produced no result.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub failed: Vec<SkippedImage>,

	/// False when scanning stopped before every image was attempted.
	pub complete: bool,
}

impl VulnerabilityReport {
	/// Did every image get scanned?
	pub fn is_clean_run(&self) -> bool {
		self.complete && self.unscanned.is_empty() && self.failed.is_empty()
	}
}

/// An image with no result, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedImage {
	pub image: ImageRef,
	pub reason: String,
}
