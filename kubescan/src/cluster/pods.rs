// SPDX-License-Identifier: Apache-2.0

use super::{ClusterConnection, ImageLister};
use crate::context::Context as _;
use crate::error::Result;
use crate::ks_error;
use crate::types::ImageRef;
use crate::util::http;
use indexmap::IndexSet;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Timeout for a single page of pods.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Lists images by reading the pods of a namespace from the Kubernetes API.
#[derive(Debug)]
pub struct KubeImageLister {
	connection: ClusterConnection,
}

impl KubeImageLister {
	pub fn new(connection: ClusterConnection) -> KubeImageLister {
		KubeImageLister { connection }
	}

	fn pods_url(&self, namespace: &str, continue_token: Option<&str>) -> Result<Url> {
		let mut url = self.connection.api_server.clone();
		url.path_segments_mut()
			.map_err(|_| ks_error!("cluster API server URL can't have a path"))?
			.pop_if_empty()
			.extend(["api", "v1", "namespaces", namespace, "pods"]);

		{
			let mut query = url.query_pairs_mut();
			query.append_pair("limit", &self.connection.page_size.to_string());
			if let Some(token) = continue_token {
				query.append_pair("continue", token);
			}
		}

		Ok(url)
	}

	fn fetch_page(&self, namespace: &str, continue_token: Option<&str>) -> Result<PodList> {
		let url = self.pods_url(namespace, continue_token)?;
		log::debug!("listing pods [url={}]", url);

		let response = self
			.connection
			.agent
			.get(url.as_str())
			.timeout(REQUEST_TIMEOUT)
			.call();

		http::read_json(response).with_context(|| format!("failed to list pods in '{}'", namespace))
	}
}

impl ImageLister for KubeImageLister {
	fn list(&self, namespace: &str) -> Result<Vec<ImageRef>> {
		if namespace.is_empty() {
			return Err(ks_error!("namespace must not be empty"));
		}

		let mut images = IndexSet::new();
		let mut continue_token: Option<String> = None;

		loop {
			let page = self.fetch_page(namespace, continue_token.as_deref())?;
			page.collect_running_images(&mut images);

			match page.metadata.continue_token {
				Some(token) if !token.is_empty() => continue_token = Some(token),
				_ => break,
			}
		}

		log::info!("found {} images in namespace '{}'", images.len(), namespace);
		Ok(images.into_iter().collect())
	}
}

/// The subset of a `v1.PodList` we read.
#[derive(Debug, Deserialize)]
struct PodList {
	#[serde(default)]
	metadata: ListMeta,
	#[serde(default)]
	items: Vec<Pod>,
}

#[derive(Debug, Default, Deserialize)]
struct ListMeta {
	#[serde(rename = "continue")]
	continue_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Pod {
	#[serde(default)]
	spec: Option<PodSpec>,
	#[serde(default)]
	status: Option<PodStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodSpec {
	#[serde(default)]
	containers: Vec<Container>,
	#[serde(default)]
	init_containers: Vec<Container>,
}

#[derive(Debug, Deserialize)]
struct Container {
	image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PodStatus {
	phase: Option<String>,
}

impl Pod {
	fn is_running(&self) -> bool {
		self.status
			.as_ref()
			.and_then(|status| status.phase.as_deref())
			== Some("Running")
	}
}

impl PodList {
	fn collect_running_images(&self, images: &mut IndexSet<ImageRef>) {
		let specs = self
			.items
			.iter()
			.filter(|pod| pod.is_running())
			.filter_map(|pod| pod.spec.as_ref());

		for spec in specs {
			let containers = spec.init_containers.iter().chain(spec.containers.iter());
			for image in containers.filter_map(|c| c.image.as_deref()) {
				if !image.is_empty() {
					images.insert(ImageRef::new(image));
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::util::http::{AuthenticatedAgent, Credentials};
	use crate::util::test::serve;
	use ureq::AgentBuilder;

	const POD_LIST: &str = r#"{
		"kind": "PodList",
		"apiVersion": "v1",
		"metadata": { "resourceVersion": "1234", "continue": "eyJ2IjoibWV0YSJ9" },
		"items": [
			{
				"metadata": { "name": "web-1" },
				"spec": {
					"initContainers": [ { "name": "migrate", "image": "app/migrate:v3" } ],
					"containers": [
						{ "name": "web", "image": "app/web:v3" },
						{ "name": "proxy", "image": "envoyproxy/envoy:v1.28" }
					]
				},
				"status": { "phase": "Running" }
			},
			{
				"metadata": { "name": "web-2" },
				"spec": { "containers": [ { "name": "web", "image": "app/web:v3" } ] },
				"status": { "phase": "Running" }
			},
			{
				"metadata": { "name": "job-x" },
				"spec": { "containers": [ { "name": "job", "image": "app/job:v1" } ] },
				"status": { "phase": "Succeeded" }
			},
			{
				"metadata": { "name": "pending" },
				"spec": { "containers": [ { "name": "p", "image": "app/pending:v1" } ] }
			}
		]
	}"#;

	fn lister(server: &str) -> KubeImageLister {
		KubeImageLister::new(ClusterConnection {
			api_server: Url::parse(server).unwrap(),
			agent: AuthenticatedAgent::new(AgentBuilder::new().build(), Credentials::Anonymous),
			page_size: 100,
		})
	}

	#[test]
	fn collects_running_images_once_in_order() {
		let list: PodList = serde_json::from_str(POD_LIST).unwrap();
		let mut images = IndexSet::new();
		list.collect_running_images(&mut images);

		let images: Vec<&str> = images.iter().map(ImageRef::as_str).collect();
		assert_eq!(
			images,
			vec!["app/migrate:v3", "app/web:v3", "envoyproxy/envoy:v1.28"]
		);
		assert_eq!(list.metadata.continue_token.as_deref(), Some("eyJ2IjoibWV0YSJ9"));
	}

	#[test]
	fn empty_list_has_no_continue_token() {
		let list: PodList = serde_json::from_str(r#"{"kind":"PodList","metadata":{},"items":[]}"#).unwrap();
		assert!(list.metadata.continue_token.is_none());
		assert!(list.items.is_empty());
	}

	#[test]
	fn pods_url_keeps_server_path_and_encodes() {
		let lister = lister("https://rancher.example.com/k8s/clusters/c-abc12");
		let url = lister.pods_url("team-a", Some("tok/en=")).unwrap();
		assert_eq!(
			url.as_str(),
			"https://rancher.example.com/k8s/clusters/c-abc12/api/v1/namespaces/team-a/pods?limit=100&continue=tok%2Fen%3D"
		);
	}

	#[test]
	fn pods_url_on_bare_server() {
		let lister = lister("http://127.0.0.1:8001");
		let url = lister.pods_url("prod", None).unwrap();
		assert_eq!(
			url.as_str(),
			"http://127.0.0.1:8001/api/v1/namespaces/prod/pods?limit=100"
		);
	}

	#[test]
	fn follows_continue_token_across_pages() {
		let first = r#"{
			"kind": "PodList",
			"metadata": { "continue": "tok1" },
			"items": [
				{
					"spec": { "containers": [ { "name": "web", "image": "app/web:v3" } ] },
					"status": { "phase": "Running" }
				}
			]
		}"#;
		let second = r#"{
			"kind": "PodList",
			"metadata": { "continue": "" },
			"items": [
				{
					"spec": { "containers": [ { "name": "web", "image": "app/web:v3" } ] },
					"status": { "phase": "Running" }
				},
				{
					"spec": { "containers": [ { "name": "worker", "image": "app/worker:v1" } ] },
					"status": { "phase": "Running" }
				}
			]
		}"#;
		let (base, server) = serve(vec![(200, first), (200, second)]);

		let images = lister(&base).list("prod").unwrap();

		let images: Vec<&str> = images.iter().map(ImageRef::as_str).collect();
		assert_eq!(images, vec!["app/web:v3", "app/worker:v1"]);

		let requests: Vec<String> = server.join().unwrap().into_iter().map(|r| r.line).collect();
		assert_eq!(
			requests,
			vec![
				"GET /api/v1/namespaces/prod/pods?limit=100",
				"GET /api/v1/namespaces/prod/pods?limit=100&continue=tok1",
			]
		);
	}

	#[test]
	fn forbidden_listing_carries_server_message() {
		let body = r#"{"kind":"Status","status":"Failure","message":"pods is forbidden: cannot list resource \"pods\"","reason":"Forbidden","code":403}"#;
		let (base, server) = serve(vec![(403, body)]);

		let err = lister(&base).list("prod").unwrap_err();
		server.join().unwrap();

		assert_eq!(err.to_string(), "failed to list pods in 'prod'");
		let message = err.one_line();
		assert!(message.contains("returned HTTP 403"));
		assert!(message.contains(r#"pods is forbidden: cannot list resource "pods""#));
	}

	#[test]
	fn empty_namespace_is_rejected_before_any_request() {
		// Nothing listens on this port; an attempted request would fail differently.
		let lister = lister("http://127.0.0.1:9");
		let err = lister.list("").unwrap_err();
		assert_eq!(err.to_string(), "namespace must not be empty");
	}
}
