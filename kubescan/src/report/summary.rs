// SPDX-License-Identifier: Apache-2.0

use super::VulnerabilityReport;
use crate::types::Severity;
use tabled::{Table, Tabled};

/// How many vulnerability IDs to list per image before eliding the rest.
const SHOWN_IDS: usize = 3;

#[derive(Debug, Tabled)]
struct ImageRow {
	image: String,
	status: &'static str,
	#[tabled(rename = "bad vulns")]
	bad_vulns: usize,
	worst: String,
	detail: String,
}

/// Render a report as a short header line followed by a table of images.
///
/// Only images with findings, or without a result, get a row.
pub fn summary_table(report: &VulnerabilityReport) -> String {
	let mut rows = Vec::new();

	for (image, vulns) in &report.vuln_by_image {
		let worst = vulns
			.iter()
			.map(|vuln| vuln.severity)
			.max()
			.unwrap_or(Severity::Unknown);

		let mut detail = vulns
			.iter()
			.take(SHOWN_IDS)
			.map(|vuln| vuln.id.as_str())
			.collect::<Vec<_>>()
			.join(", ");
		if vulns.len() > SHOWN_IDS {
			detail.push_str(&format!(" (+{} more)", vulns.len() - SHOWN_IDS));
		}

		rows.push(ImageRow {
			image: image.to_string(),
			status: "vulnerable",
			bad_vulns: vulns.len(),
			worst: worst.to_string(),
			detail,
		});
	}

	let skipped = report
		.unscanned
		.iter()
		.map(|skipped| ("unscanned", skipped))
		.chain(report.failed.iter().map(|skipped| ("failed", skipped)));

	for (status, skipped) in skipped {
		rows.push(ImageRow {
			image: skipped.image.to_string(),
			status,
			bad_vulns: 0,
			worst: "-".to_owned(),
			detail: skipped.reason.clone(),
		});
	}

	let mut out = format!(
		"namespace '{}': {} bad vulnerabilities across {} of {} scanned images (scanned at {})\n",
		report.namespace,
		report.bad_vulns,
		report.vuln_by_image.len(),
		report.images_scanned,
		report.scanned_at.to_rfc3339()
	);

	if !report.complete {
		out.push_str("scan stopped early; some images were not attempted\n");
	}

	if !rows.is_empty() {
		out.push_str(&Table::new(rows).to_string());
		out.push('\n');
	}

	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::report::SkippedImage;
	use crate::types::fixtures::vuln;
	use crate::types::ImageRef;
	use chrono::Utc;
	use std::collections::BTreeMap;

	fn report() -> VulnerabilityReport {
		let mut vuln_by_image = BTreeMap::new();
		vuln_by_image.insert(
			ImageRef::from("app:v1"),
			vec![
				vuln("CVE-2021-3711", Severity::High),
				vuln("CVE-2021-44228", Severity::Critical),
				vuln("CVE-2021-23840", Severity::High),
				vuln("CVE-2021-3449", Severity::High),
			],
		);

		VulnerabilityReport {
			namespace: "prod".to_owned(),
			bad_vulns: 4,
			vuln_by_image,
			scanned_at: Utc::now(),
			images_scanned: 2,
			unscanned: Vec::new(),
			failed: vec![SkippedImage {
				image: ImageRef::from("app:v2"),
				reason: "scan did not finish".to_owned(),
			}],
			complete: false,
		}
	}

	#[test]
	fn summary_lists_findings_and_gaps() {
		let summary = summary_table(&report());

		assert!(summary.starts_with("namespace 'prod': 4 bad vulnerabilities across 1 of 2"));
		assert!(summary.contains("scan stopped early"));
		assert!(summary.contains("Critical"));
		assert!(summary.contains("CVE-2021-3711, CVE-2021-44228, CVE-2021-23840 (+1 more)"));
		assert!(summary.contains("failed"));
		assert!(summary.contains("scan did not finish"));
	}

	#[test]
	fn clean_report_has_no_table() {
		let clean = VulnerabilityReport {
			bad_vulns: 0,
			vuln_by_image: BTreeMap::new(),
			failed: Vec::new(),
			complete: true,
			..report()
		};

		let summary = summary_table(&clean);
		assert_eq!(summary.lines().count(), 1);
	}
}
