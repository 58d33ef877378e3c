// SPDX-License-Identifier: Apache-2.0

//! Enumerating the container images running in a namespace.

mod pods;

pub use pods::KubeImageLister;

use crate::config::ClusterConfig;
use crate::context::Context as _;
use crate::error::Result;
use crate::ks_error;
use crate::types::ImageRef;
use crate::util::fs as file;
use crate::util::http::{self, AuthenticatedAgent, Credentials};
use crate::util::redacted::Redacted;
use pathbuf::pathbuf;
use std::env;
use std::path::{Path, PathBuf};
use url::Url;

/// Source of the images running in a namespace.
pub trait ImageLister {
	/// List the distinct images in `namespace`, in the order first seen.
	fn list(&self, namespace: &str) -> Result<Vec<ImageRef>>;
}

/// Where Kubernetes mounts the pod's service account credentials.
const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Everything needed to talk to an API server, resolved from configuration.
#[derive(Debug)]
pub struct ClusterConnection {
	pub api_server: Url,
	pub agent: AuthenticatedAgent,
	pub page_size: u32,
}

impl ClusterConnection {
	/// Resolve configuration, filling gaps from the in-cluster service account.
	pub fn from_config(config: &ClusterConfig) -> Result<ClusterConnection> {
		Self::resolve(config, Path::new(SERVICE_ACCOUNT_DIR))
	}

	fn resolve(config: &ClusterConfig, service_account: &Path) -> Result<ClusterConnection> {
		let api_server = match &config.api_server {
			Some(url) => url.clone(),
			None => in_cluster_api_server()?,
		};

		let credentials = match resolve_token(config, service_account)? {
			Some(token) => Credentials::Bearer(Redacted::new(token)),
			None => Credentials::Anonymous,
		};

		let ca_file = config.ca_file.clone().or_else(|| {
			let default = pathbuf![service_account, "ca.crt"];
			(api_server.scheme() == "https" && default.exists()).then_some(default)
		});

		let agent = match ca_file {
			Some(ca_file) => http::agent_with_ca(&ca_file)?,
			None => http::agent().clone(),
		};

		log::debug!(
			"resolved cluster connection [api_server={}, credentials={:?}]",
			api_server,
			credentials
		);

		Ok(ClusterConnection {
			api_server,
			agent: AuthenticatedAgent::new(agent, credentials),
			page_size: config.page_size,
		})
	}
}

/// Build the API server URL from the variables Kubernetes injects into every pod.
fn in_cluster_api_server() -> Result<Url> {
	let host = env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
		ks_error!("no cluster API server configured and not running inside a cluster (KUBERNETES_SERVICE_HOST is unset)")
	})?;
	let port = env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_owned());

	// IPv6 service addresses need brackets in a URL.
	let host = if host.contains(':') {
		format!("[{}]", host)
	} else {
		host
	};

	Url::parse(&format!("https://{}:{}", host, port))
		.context("invalid in-cluster API server address")
}

/// Find a bearer token: a named environment variable, then a token file,
/// then the service account's token, then none at all.
fn resolve_token(config: &ClusterConfig, service_account: &Path) -> Result<Option<String>> {
	if let Some(var) = &config.token_var {
		let token = env::var(var).map_err(|_| {
			ks_error!(
				"environment variable '{}' must contain a cluster bearer token",
				var
			)
		})?;
		return Ok(Some(token.trim().to_owned()));
	}

	let token_file: Option<PathBuf> = config.token_file.clone().or_else(|| {
		let default = pathbuf![service_account, "token"];
		default.exists().then_some(default)
	});

	match token_file {
		Some(path) => {
			let token = file::read_string(&path).context("failed to read cluster token")?;
			Ok(Some(token.trim().to_owned()))
		}
		None => Ok(None),
	}
}
