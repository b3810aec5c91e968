//! HTTP registry backend.
//!
//! Wraps a blocking `reqwest` client with a connect timeout, a per-request
//! timeout, a total deadline, and a bounded-exponential-backoff retry loop
//! (jittered) for transport errors and 5xx responses. Only idempotent GETs
//! are issued, so every request is safe to retry. 4xx responses are
//! surfaced immediately with the server's diagnostic body.

use std::time::{Duration, Instant};

use rand::Rng;
use serde::Deserialize;
use tracing::{debug, warn};

use keel_manifest::Manifest;

use crate::cancel::CancelToken;
use crate::client::{Registry, SearchHit};
use crate::error::{RegistryError, Result};
use crate::version::Version;

/// The default registry index.
pub const DEFAULT_URL: &str = "https://registry.keel.build";

/// Retry behavior for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay (before jitter).
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based), with up to 50%
    /// added jitter so synchronized clients fan out.
    fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        let capped = exp.min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 2);
        capped + Duration::from_millis(jitter)
    }
}

/// Caller-supplied configuration for [`HttpRegistry`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Total wall-clock budget across all attempts of one operation.
    pub deadline: Duration,
    pub retry: RetryPolicy,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            base_url: DEFAULT_URL.to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            deadline: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }
}

impl HttpConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        HttpConfig {
            base_url: base_url.into(),
            ..Default::default()
        }
    }
}

/// Registry client over HTTP.
pub struct HttpRegistry {
    client: reqwest::blocking::Client,
    config: HttpConfig,
    cancel: CancelToken,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct VersionsData {
    versions: Vec<String>,
}

impl HttpRegistry {
    pub fn new(config: HttpConfig, cancel: CancelToken) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("keel/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| RegistryError::Request {
                op: "init",
                endpoint: config.base_url.clone(),
                detail: err.to_string(),
            })?;
        Ok(HttpRegistry {
            client,
            config,
            cancel,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Issue a GET with retries. Transport errors and 5xx are retried until
    /// the attempt budget or the deadline runs out; anything else returns.
    fn get(
        &self,
        op: &'static str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::blocking::Response> {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            self.cancel.check()?;
            attempt += 1;
            debug!(op, url, attempt, "registry request");

            let outcome = self.client.get(url).query(query).send();
            let detail = match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if !status.is_server_error() {
                        let message = response.text().unwrap_or_default();
                        return Err(RegistryError::Status {
                            op,
                            endpoint: url.to_string(),
                            status: status.as_u16(),
                            message,
                        });
                    }
                    format!("server returned {}", status.as_u16())
                }
                Err(err) => err.to_string(),
            };

            if attempt >= self.config.retry.max_attempts {
                return Err(RegistryError::Request {
                    op,
                    endpoint: url.to_string(),
                    detail: format!("{detail} (after {attempt} attempts)"),
                });
            }
            let delay = self.config.retry.delay(attempt);
            if started.elapsed() + delay > self.config.deadline {
                return Err(RegistryError::Request {
                    op,
                    endpoint: url.to_string(),
                    detail: format!("{detail} (deadline exceeded)"),
                });
            }
            warn!(op, url, attempt, ?delay, detail, "retrying registry request");
            std::thread::sleep(delay);
        }
    }

    /// Map a 404 on a per-package endpoint to `PackageNotFound`.
    fn package_get(
        &self,
        op: &'static str,
        name: &str,
        url: &str,
    ) -> Result<reqwest::blocking::Response> {
        self.get(op, url, &[]).map_err(|err| match err {
            RegistryError::Status { status: 404, .. } => RegistryError::PackageNotFound {
                name: name.to_string(),
            },
            other => other,
        })
    }
}

impl Registry for HttpRegistry {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let url = self.endpoint("/search");
        let response = self.get(
            "search",
            &url,
            &[("q", query.to_string()), ("limit", limit.to_string())],
        )?;
        let body: Envelope<SearchData> =
            response.json().map_err(|err| RegistryError::Request {
                op: "search",
                endpoint: url.clone(),
                detail: format!("decoding response: {err}"),
            })?;
        let mut hits = body.data.results;
        hits.truncate(limit);
        Ok(hits)
    }

    fn versions(&self, name: &str) -> Result<Vec<Version>> {
        let url = self.endpoint(&format!("/packages/{name}/versions"));
        let response = self.package_get("versions", name, &url)?;
        let body: Envelope<VersionsData> =
            response.json().map_err(|err| RegistryError::Request {
                op: "versions",
                endpoint: url.clone(),
                detail: format!("decoding response: {err}"),
            })?;
        let mut versions = Vec::with_capacity(body.data.versions.len());
        for raw in body.data.versions {
            let version = Version::parse(&raw).map_err(|err| RegistryError::Request {
                op: "versions",
                endpoint: url.clone(),
                detail: format!("bad version '{raw}' in response: {err}"),
            })?;
            versions.push(version);
        }
        versions.sort();
        Ok(versions)
    }

    fn manifest(&self, name: &str, version: &Version) -> Result<Manifest> {
        let url = self.endpoint(&format!("/packages/{name}/{version}/manifest"));
        let response = self.package_get("manifest", name, &url)?;
        let text = response.text().map_err(|err| RegistryError::Request {
            op: "manifest",
            endpoint: url.clone(),
            detail: format!("reading response: {err}"),
        })?;
        Ok(Manifest::parse(&text)?)
    }

    fn fetch(&self, name: &str, version: &Version) -> Result<Vec<u8>> {
        let url = self.endpoint(&format!("/packages/{name}/{version}/download"));
        let response = self.package_get("fetch", name, &url)?;
        let bytes = response.bytes().map_err(|err| RegistryError::Request {
            op: "fetch",
            endpoint: url.clone(),
            detail: format!("reading response: {err}"),
        })?;
        Ok(bytes.to_vec())
    }
}
