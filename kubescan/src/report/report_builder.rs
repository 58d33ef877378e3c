// SPDX-License-Identifier: Apache-2.0

use super::{SkippedImage, VulnerabilityReport};
use crate::cluster::ImageLister;
use crate::config::OnScanError;
use crate::context::Context as _;
use crate::error::Result;
use crate::scanner::ScanBackend;
use crate::types::{ImageRef, ImageVulnerabilityReport, Vulnerability};
use crate::workflow::{ImageOutcome, ScanWorkflow};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Scan every image running in `namespace` and aggregate the findings.
///
/// Listing failures and inconsistent scanner results end the run with an
/// error. Individual scans which don't produce a result are recorded in the
/// report; with `OnScanError::Halt` the first one also stops the run.
pub fn scan_namespace<L, B>(
	lister: &L,
	workflow: &ScanWorkflow<'_, B>,
	namespace: &str,
	on_error: OnScanError,
) -> Result<VulnerabilityReport>
where
	L: ImageLister + ?Sized,
	B: ScanBackend + ?Sized,
{
	let images = lister
		.list(namespace)
		.with_context(|| format!("failed to list images in namespace '{}'", namespace))?;

	let mut builder = ReportBuilder::for_namespace(namespace);

	for (index, image) in images.iter().enumerate() {
		log::info!("[{}/{}] {}", index + 1, images.len(), image);

		let outcome = workflow.scan(image);
		let scanned = matches!(outcome, ImageOutcome::Scanned(_));
		builder.add_outcome(image, outcome)?;

		if !scanned && on_error == OnScanError::Halt {
			let remaining = images.len() - index - 1;
			log::warn!(
				"halting after '{}' could not be scanned; {} images not attempted",
				image,
				remaining
			);
			builder.halt();
			break;
		}
	}

	let report = builder.build();

	log::info!(
		"scanned namespace '{}': {} bad vulnerabilities in {} images",
		report.namespace,
		report.bad_vulns,
		report.vuln_by_image.len()
	);

	Ok(report)
}

/// A scanner result which can't be merged into a report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportError {
	#[error("scanner reported {bad_vulns} bad vulnerabilities for '{image}' but returned none")]
	InconsistentResult { image: ImageRef, bad_vulns: u64 },
}

/// Builds a `VulnerabilityReport` one image at a time.
#[derive(Debug)]
pub struct ReportBuilder {
	namespace: String,
	started_at: DateTime<Utc>,
	bad_vulns: u64,
	vuln_by_image: BTreeMap<ImageRef, Vec<Vulnerability>>,
	images_scanned: u64,
	unscanned: Vec<SkippedImage>,
	failed: Vec<SkippedImage>,
	halted: bool,
}

impl ReportBuilder {
	/// Start a report for `namespace`, timestamped now.
	pub fn for_namespace(namespace: &str) -> ReportBuilder {
		ReportBuilder {
			namespace: namespace.to_owned(),
			started_at: Utc::now(),
			bad_vulns: Default::default(),
			vuln_by_image: Default::default(),
			images_scanned: Default::default(),
			unscanned: Default::default(),
			failed: Default::default(),
			halted: false,
		}
	}

	/// Record what happened to one image.
	///
	/// On error nothing about the image is recorded.
	pub fn add_outcome(
		&mut self,
		image: &ImageRef,
		outcome: ImageOutcome,
	) -> std::result::Result<&mut Self, ReportError> {
		match outcome {
			ImageOutcome::Scanned(report) => return self.add_scanned(report),
			ImageOutcome::Unscanned { reason } => self.unscanned.push(SkippedImage {
				image: image.clone(),
				reason,
			}),
			ImageOutcome::Failed(error) => self.failed.push(SkippedImage {
				image: image.clone(),
				reason: error.to_string(),
			}),
		}

		Ok(self)
	}

	/// Merge the findings for a scanned image.
	fn add_scanned(
		&mut self,
		report: ImageVulnerabilityReport,
	) -> std::result::Result<&mut Self, ReportError> {
		let ImageVulnerabilityReport {
			image,
			bad_vulns,
			vulns,
		} = report;

		let vulns = vulns.unwrap_or_default();
		if bad_vulns > 0 && vulns.is_empty() {
			return Err(ReportError::InconsistentResult { image, bad_vulns });
		}

		if bad_vulns > 0 {
			self.vuln_by_image.entry(image).or_default().extend(vulns);
		}

		self.bad_vulns += bad_vulns;
		self.images_scanned += 1;
		Ok(self)
	}

	/// Mark the report as stopped before every image was attempted.
	pub fn halt(&mut self) -> &mut Self {
		self.halted = true;
		self
	}

	/// Build the final report.
	pub fn build(self) -> VulnerabilityReport {
		VulnerabilityReport {
			namespace: self.namespace,
			bad_vulns: self.bad_vulns,
			vuln_by_image: self.vuln_by_image,
			scanned_at: self.started_at,
			images_scanned: self.images_scanned,
			unscanned: self.unscanned,
			failed: self.failed,
			complete: !self.halted,
		}
	}
}
