// SPDX-License-Identifier: Apache-2.0

//! The vulnerability scanning backend.

mod anchore;

pub use anchore::AnchoreClient;

use crate::error::Result;
use crate::ks_error;
use crate::retry::Deadline;
use crate::types::{ImageRef, ImageVulnerabilityReport};
use std::time::Duration;

/// Where an image's analysis stands on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
	/// Not finished; carries the backend's own status string.
	Pending(String),
	/// Findings are ready to fetch.
	Analyzed,
	/// The backend gave up on the image.
	Failed(String),
}

/// A service which scans container images for known vulnerabilities.
///
/// Scanning is asynchronous on the backend: a scan is triggered, polled
/// until it's done, and then its findings are fetched. Every call is
/// bounded by the image's deadline.
pub trait ScanBackend {
	/// Ask the backend to start analyzing `image`.
	fn trigger_scan(&self, image: &ImageRef, deadline: &Deadline) -> Result<()>;

	/// Check whether the analysis of `image` has finished.
	fn poll_status(&self, image: &ImageRef, deadline: &Deadline) -> Result<ScanStatus>;

	/// Fetch the findings for an analyzed image.
	fn fetch_findings(&self, image: &ImageRef, deadline: &Deadline)
		-> Result<ImageVulnerabilityReport>;
}

/// The timeout to give a single request made before `deadline`.
pub(crate) fn request_timeout(deadline: &Deadline) -> Result<Duration> {
	deadline
		.remaining()
		.ok_or_else(|| ks_error!("scan deadline exceeded before request could be sent"))
}
