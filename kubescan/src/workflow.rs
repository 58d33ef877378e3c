// SPDX-License-Identifier: Apache-2.0

//! Scanning a single image: trigger, poll until analyzed, fetch findings.

use crate::config::{BackoffConfig, ScanConfig};
use crate::ks_error;
use crate::retry::{self, Attempt, Deadline, ExponentialBackoff, RetryError};
use crate::scanner::{ScanBackend, ScanStatus};
use crate::types::{ImageRef, ImageVulnerabilityReport};
use std::time::Duration;

/// Why an image which was submitted for scanning produced no findings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
	#[error("scan did not finish within {elapsed:?} ({attempts} polls, last status: {last})")]
	Timeout {
		attempts: u32,
		elapsed: Duration,
		last: String,
	},
	#[error("scanner could not analyze the image: {0}")]
	AnalysisFailed(String),
	#[error("failed to fetch findings: {0}")]
	Fetch(String),
}

/// What happened to one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
	/// The scan finished and produced a result.
	Scanned(ImageVulnerabilityReport),
	/// The scanner refused the image, so nothing is known about it.
	Unscanned { reason: String },
	/// The scan started but didn't produce a result.
	Failed(ScanError),
}

/// Runs the per-image scan against a backend.
pub struct ScanWorkflow<'b, B: ?Sized> {
	backend: &'b B,
	deadline: Duration,
	backoff: BackoffConfig,
}

impl<'b, B: ScanBackend + ?Sized> ScanWorkflow<'b, B> {
	pub fn new(backend: &'b B, config: &ScanConfig) -> ScanWorkflow<'b, B> {
		ScanWorkflow {
			backend,
			deadline: config.deadline(),
			backoff: config.backoff.clone(),
		}
	}

	/// Scan one image under a fresh deadline.
	pub fn scan(&self, image: &ImageRef) -> ImageOutcome {
		let deadline = Deadline::after(self.deadline);
		log::info!("scanning image '{}'", image);

		// A refused trigger isn't fatal: the image is reported as unscanned.
		if let Err(error) = self.backend.trigger_scan(image, &deadline) {
			log::warn!("image '{}' was not scanned: {}", image, error.one_line());
			return ImageOutcome::Unscanned {
				reason: error.one_line(),
			};
		}

		if let Err(error) = self.wait_for_analysis(image, &deadline) {
			log::error!("scan of '{}' failed: {}", image, error);
			return ImageOutcome::Failed(error);
		}

		match self.backend.fetch_findings(image, &deadline) {
			Ok(report) => {
				log::info!(
					"scanned '{}': {} bad vulnerabilities in {:?}",
					image,
					report.bad_vulns,
					deadline.elapsed()
				);
				ImageOutcome::Scanned(report)
			}
			Err(error) => {
				let error = ScanError::Fetch(error.one_line());
				log::error!("scan of '{}' failed: {}", image, error);
				ImageOutcome::Failed(error)
			}
		}
	}

	fn wait_for_analysis(&self, image: &ImageRef, deadline: &Deadline) -> Result<(), ScanError> {
		let mut backoff = ExponentialBackoff::new(self.backoff.clone());

		let result = retry::retry(deadline, &mut backoff, || {
			match self.backend.poll_status(image, deadline) {
				Ok(ScanStatus::Analyzed) => Ok(()),
				Ok(ScanStatus::Pending(status)) => Err(Attempt::Retry(status)),
				Ok(ScanStatus::Failed(status)) => Err(Attempt::Abort(ks_error!(
					"analysis status '{}'",
					status
				))),
				// The scanner may be briefly unreachable; keep polling.
				Err(error) => Err(Attempt::Retry(error.one_line())),
			}
		});

		result.map_err(|error| match error {
			RetryError::DeadlineExceeded {
				attempts,
				elapsed,
				last,
			} => ScanError::Timeout {
				attempts,
				elapsed,
				last,
			},
			RetryError::Aborted(error) => ScanError::AnalysisFailed(error.one_line()),
		})
	}
}
