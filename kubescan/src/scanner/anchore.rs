// SPDX-License-Identifier: Apache-2.0

//! A blocking client for the Anchore Engine v1 API.

use super::{request_timeout, ScanBackend, ScanStatus};
use crate::config::ScannerConfig;
use crate::context::Context as _;
use crate::error::Result;
use crate::ks_error;
use crate::retry::Deadline;
use crate::types::{ImageRef, ImageVulnerabilityReport, Severity, Vulnerability};
use crate::util::http::{self, AuthenticatedAgent, Credentials};
use crate::util::redacted::Redacted;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::env;
use url::Url;

/// Environment variable consulted when no scanner URL is configured.
const URL_VAR: &str = "ANCHORE_CLI_URL";

/// Analysis status values reported by Anchore Engine.
const STATUS_ANALYZED: &str = "analyzed";
const STATUS_FAILED: &str = "analysis_failed";

#[derive(Debug)]
pub struct AnchoreClient {
	base: Url,
	agent: AuthenticatedAgent,
	min_severity: Severity,
}

impl AnchoreClient {
	pub fn new(base: Url, agent: AuthenticatedAgent, min_severity: Severity) -> AnchoreClient {
		AnchoreClient {
			base,
			agent,
			min_severity,
		}
	}

	/// Build a client from configuration and the credential environment variables.
	pub fn from_config(config: &ScannerConfig) -> Result<AnchoreClient> {
		let base = match &config.url {
			Some(url) => url.clone(),
			None => {
				let raw = env::var(URL_VAR).map_err(|_| {
					ks_error!(
						"no scanner URL configured; set [scanner] url or the {} environment variable",
						URL_VAR
					)
				})?;
				Url::parse(&raw).with_context(|| format!("invalid URL in {}", URL_VAR))?
			}
		};

		let user = env::var(&config.user_var).map_err(|_| {
			ks_error!(
				"environment variable '{}' must contain the scanner user name",
				config.user_var
			)
		})?;
		let password = env::var(&config.password_var).map_err(|_| {
			ks_error!(
				"environment variable '{}' must contain the scanner password",
				config.password_var
			)
		})?;

		let credentials = Credentials::Basic {
			user,
			password: Redacted::new(password),
		};
		let agent = AuthenticatedAgent::new(http::agent().clone(), credentials);

		Ok(AnchoreClient::new(base, agent, config.min_severity))
	}

	/// Build `{base}/v1/{segments...}`, tolerating a base with or without `/v1`.
	fn endpoint(&self, segments: &[&str]) -> Result<Url> {
		let versioned = self
			.base
			.path_segments()
			.and_then(|path| path.filter(|segment| !segment.is_empty()).last())
			== Some("v1");

		let mut url = self.base.clone();
		{
			let mut path = url
				.path_segments_mut()
				.map_err(|_| ks_error!("scanner URL can't have a path"))?;
			path.pop_if_empty();
			if !versioned {
				path.push("v1");
			}
			path.extend(segments);
		}
		Ok(url)
	}

	/// Look up the records Anchore holds for a tag.
	fn lookup(&self, image: &ImageRef, deadline: &Deadline) -> Result<Vec<AnchoreImage>> {
		let mut url = self.endpoint(&["images"])?;
		url.query_pairs_mut().append_pair("fulltag", image.as_str());

		let response = self
			.agent
			.get(url.as_str())
			.timeout(request_timeout(deadline)?)
			.call();

		http::read_json(response)
	}

	/// The digest of the most recently updated analyzed record for a tag.
	fn digest(&self, image: &ImageRef, deadline: &Deadline) -> Result<String> {
		latest_analyzed(self.lookup(image, deadline)?)
			.map(|record| record.image_digest)
			.ok_or_else(|| ks_error!("no analyzed record for '{}'", image))
	}
}

impl ScanBackend for AnchoreClient {
	fn trigger_scan(&self, image: &ImageRef, deadline: &Deadline) -> Result<()> {
		let url = self.endpoint(&["images"])?;
		log::debug!("adding image to scanner [image={}]", image);

		let response = self
			.agent
			.post(url.as_str())
			.timeout(request_timeout(deadline)?)
			.send_json(json!({ "tag": image.as_str() }));

		http::check(response).with_context(|| format!("failed to add '{}' to scanner", image))?;
		Ok(())
	}

	fn poll_status(&self, image: &ImageRef, deadline: &Deadline) -> Result<ScanStatus> {
		let records = self
			.lookup(image, deadline)
			.with_context(|| format!("failed to get analysis status of '{}'", image))?;
		Ok(status_of(&records))
	}

	fn fetch_findings(
		&self,
		image: &ImageRef,
		deadline: &Deadline,
	) -> Result<ImageVulnerabilityReport> {
		let digest = self.digest(image, deadline)?;
		let url = self.endpoint(&["images", digest.as_str(), "vuln", "all"])?;
		log::debug!("fetching findings [image={}, digest={}]", image, digest);

		let response = self
			.agent
			.get(url.as_str())
			.timeout(request_timeout(deadline)?)
			.call();

		let body: VulnerabilityResponse = http::read_json(response)
			.with_context(|| format!("failed to fetch vulnerabilities of '{}'", image))?;

		Ok(ImageVulnerabilityReport::from_findings(
			image.clone(),
			body.vulnerabilities.into_iter().map(Vulnerability::from),
			self.min_severity,
		))
	}
}

/// Reduce every record for a tag to a single status.
///
/// A tag can map to several digests over time; any analyzed one is good
/// enough, and the scan only counts as failed when nothing is left in flight.
fn status_of(records: &[AnchoreImage]) -> ScanStatus {
	if records.iter().any(|r| r.analysis_status == STATUS_ANALYZED) {
		return ScanStatus::Analyzed;
	}

	match records.iter().find(|r| r.analysis_status != STATUS_FAILED) {
		Some(record) => ScanStatus::Pending(record.analysis_status.clone()),
		None if records.is_empty() => ScanStatus::Pending("not_found".to_owned()),
		None => ScanStatus::Failed(STATUS_FAILED.to_owned()),
	}
}

/// Pick the analyzed record updated last. Records without a timestamp lose.
fn latest_analyzed(records: Vec<AnchoreImage>) -> Option<AnchoreImage> {
	records
		.into_iter()
		.filter(|record| record.analysis_status == STATUS_ANALYZED)
		.max_by_key(|record| record.last_updated)
}

/// An image record from `GET /v1/images`.
#[derive(Debug, Deserialize)]
struct AnchoreImage {
	#[serde(rename = "imageDigest")]
	image_digest: String,
	#[serde(default)]
	analysis_status: String,
	#[serde(default)]
	last_updated: Option<DateTime<Utc>>,
}

/// The body of `GET /v1/images/{digest}/vuln/all`.
#[derive(Debug, Deserialize)]
struct VulnerabilityResponse {
	#[serde(default)]
	vulnerabilities: Vec<AnchoreVulnerability>,
}

/// A single finding, as Anchore spells it.
#[derive(Debug, Deserialize)]
struct AnchoreVulnerability {
	vuln: String,
	#[serde(default)]
	severity: String,
	#[serde(default)]
	package: String,
	#[serde(default)]
	package_name: String,
	#[serde(default)]
	package_version: String,
	#[serde(default)]
	package_type: String,
	fix: Option<String>,
	url: Option<String>,
	feed_group: Option<String>,
}

impl From<AnchoreVulnerability> for Vulnerability {
	fn from(raw: AnchoreVulnerability) -> Vulnerability {
		Vulnerability {
			id: raw.vuln,
			severity: Severity::parse_lossy(&raw.severity),
			package: raw.package,
			package_name: raw.package_name,
			package_version: raw.package_version,
			package_type: raw.package_type,
			// Anchore writes the string "None" when no fix exists.
			fix: raw.fix.filter(|fix| !fix.is_empty() && fix != "None"),
			url: raw.url.filter(|url| !url.is_empty()),
			feed_group: raw.feed_group,
		}
	}
}
