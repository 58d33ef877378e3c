// SPDX-License-Identifier: Apache-2.0

//! HTTP agents used to talk to the cluster API and the scanning backend.

use crate::context::Context as _;
use crate::error::{Error, Result};
use crate::ks_error;
use crate::util::redacted::Redacted;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rustls::{
	crypto::{ring::default_provider, CryptoProvider},
	pki_types::{pem::PemObject, CertificateDer},
	ClientConfig, RootCertStore,
};
use rustls_platform_verifier::ConfigVerifierExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::{self, Debug, Formatter};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use ureq::{Agent, AgentBuilder, Request, Response};

/// Global static holding the agent which trusts the platform's certificates.
static AGENT: OnceLock<Agent> = OnceLock::new();

/// Rustls makes us install a crypto provider for this process before we can
/// build a client config. Use the one backed by the `ring` crate.
fn install_crypto_provider() {
	if CryptoProvider::get_default().is_none() {
		// Losing a race with another thread installing the same provider is fine.
		let _ = CryptoProvider::install_default(default_provider());
	}
}

/// Get or initialize the global agent which verifies TLS with platform certificates.
pub fn agent() -> &'static Agent {
	AGENT.get_or_init(|| {
		install_crypto_provider();
		let tls_config = ClientConfig::with_platform_verifier();
		AgentBuilder::new().tls_config(Arc::new(tls_config)).build()
	})
}

/// Construct an agent which only trusts the certificates in the given PEM bundle.
///
/// Clusters usually sign their API server certificate with a private CA,
/// which the platform verifier knows nothing about.
pub fn agent_with_ca(ca_file: &Path) -> Result<Agent> {
	install_crypto_provider();

	let mut roots = RootCertStore::empty();
	let certs = CertificateDer::pem_file_iter(ca_file)
		.with_context(|| format!("failed to open CA bundle '{}'", ca_file.display()))?;
	for cert in certs {
		let cert = cert
			.with_context(|| format!("failed to parse CA bundle '{}'", ca_file.display()))?;
		roots.add(cert).context("invalid CA certificate")?;
	}

	let tls_config = ClientConfig::builder()
		.with_root_certificates(roots)
		.with_no_client_auth();

	Ok(AgentBuilder::new().tls_config(Arc::new(tls_config)).build())
}

/// The credentials attached to every request an [`AuthenticatedAgent`] makes.
#[derive(Clone)]
pub enum Credentials {
	/// No authorization header at all.
	Anonymous,
	/// HTTP basic auth.
	Basic {
		user: String,
		password: Redacted<String>,
	},
	/// Bearer token auth.
	Bearer(Redacted<String>),
}

impl Credentials {
	fn header(&self) -> Option<String> {
		match self {
			Credentials::Anonymous => None,
			Credentials::Basic { user, password } => {
				let raw = format!("{}:{}", user, password.as_ref());
				Some(format!("Basic {}", STANDARD.encode(raw)))
			}
			Credentials::Bearer(token) => Some(format!("Bearer {}", token.as_ref())),
		}
	}
}

impl Debug for Credentials {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Credentials::Anonymous => write!(f, "Anonymous"),
			Credentials::Basic { user, password } => f
				.debug_struct("Basic")
				.field("user", user)
				.field("password", password)
				.finish(),
			Credentials::Bearer(token) => f.debug_tuple("Bearer").field(token).finish(),
		}
	}
}

/// An [`Agent`] which authenticates every request.
///
/// `ureq` has no per-agent authorization, so this wraps the agent and sets
/// the header on each request it builds.
#[derive(Debug, Clone)]
pub struct AuthenticatedAgent {
	agent: Agent,
	credentials: Credentials,
}

impl AuthenticatedAgent {
	pub fn new(agent: Agent, credentials: Credentials) -> AuthenticatedAgent {
		AuthenticatedAgent { agent, credentials }
	}

	/// Make an authenticated GET request.
	pub fn get(&self, url: &str) -> Request {
		self.authorize(self.agent.get(url))
	}

	/// Make an authenticated POST request.
	pub fn post(&self, url: &str) -> Request {
		self.authorize(self.agent.post(url))
	}

	fn authorize(&self, request: Request) -> Request {
		match self.credentials.header() {
			Some(value) => request.set(AUTH_KEY, &value),
			None => request,
		}
	}
}

/// The key to use for the authorization HTTP header.
const AUTH_KEY: &str = "Authorization";

/// How much of an error response body to keep in an error message.
const MAX_BODY_CHARS: usize = 200;

/// Turn a failed status code into an error carrying the server's explanation.
pub fn check(result: std::result::Result<Response, ureq::Error>) -> Result<Response> {
	match result {
		Ok(response) => Ok(response),
		Err(ureq::Error::Status(code, response)) => {
			let url = response.get_url().to_owned();
			let body = response.into_string().unwrap_or_default();
			Err(ks_error!(
				"{} returned HTTP {}: {}",
				url,
				code,
				explain_body(&body)
			))
		}
		Err(err) => Err(Error::from(err)),
	}
}

/// Like [`check`], then decode the body as JSON.
pub fn read_json<T: DeserializeOwned>(
	result: std::result::Result<Response, ureq::Error>,
) -> Result<T> {
	let response = check(result)?;
	let url = response.get_url().to_owned();
	response
		.into_json()
		.with_context(|| format!("failed to decode JSON response from {}", url))
}

/// Both Kubernetes and Anchore put a human-readable `message` in error bodies.
fn explain_body(body: &str) -> String {
	if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
		if let Some(Value::String(message)) = map.get("message") {
			return message.clone();
		}
	}

	let trimmed = body.trim();
	if trimmed.is_empty() {
		return "<empty body>".to_owned();
	}
	trimmed.chars().take(MAX_BODY_CHARS).collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn platform_agent_is_built_once() {
		assert!(std::ptr::eq(agent(), agent()));
	}

	#[test]
	fn basic_auth_header_is_base64() {
		let creds = Credentials::Basic {
			user: "admin".to_owned(),
			password: Redacted::new("foobar".to_owned()),
		};
		assert_eq!(creds.header().unwrap(), "Basic YWRtaW46Zm9vYmFy");
	}

	#[test]
	fn bearer_header() {
		let creds = Credentials::Bearer(Redacted::new("abc.def".to_owned()));
		assert_eq!(creds.header().unwrap(), "Bearer abc.def");
	}

	#[test]
	fn anonymous_has_no_header() {
		assert!(Credentials::Anonymous.header().is_none());
	}

	#[test]
	fn explain_prefers_message_field() {
		let body = r#"{"kind":"Status","status":"Failure","message":"namespaces \"nope\" not found","code":404}"#;
		assert_eq!(explain_body(body), r#"namespaces "nope" not found"#);
	}

	#[test]
	fn explain_falls_back_to_truncated_body() {
		assert_eq!(explain_body("  bad gateway \n"), "bad gateway");
		assert_eq!(explain_body(""), "<empty body>");
		assert_eq!(explain_body(&"x".repeat(500)).len(), MAX_BODY_CHARS);
	}

	#[test]
	fn debug_never_prints_secrets() {
		let creds = Credentials::Basic {
			user: "admin".to_owned(),
			password: Redacted::new("foobar".to_owned()),
		};
		let debug = format!("{:?}", creds);
		assert!(debug.contains("admin"));
		assert!(!debug.contains("foobar"));
	}
}
