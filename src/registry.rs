//! Release registry access.
//!
//! [`ReleaseRegistry`] is the seam the install pipeline and the self-updater
//! consume; [`GitHubRegistry`] implements it over the GitHub REST API.

use crate::error::{Error, Result};
use crate::platform;
use crate::types::{AssetDownload, Release};
use chrono::Utc;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

#[allow(async_fn_in_trait)]
pub trait ReleaseRegistry {
    /// Latest published release of `org/repo`.
    async fn latest_release(&self, org: &str, repo: &str) -> Result<Release>;

    /// Resolve a release asset id into a URL its bytes can be fetched from.
    async fn download_url(&self, org: &str, repo: &str, asset_id: u64) -> Result<String>;
}

/// Query parameters attached to the manager's own version check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionCheckParams {
    pub os: String,
    pub arch: String,
    pub rust_version: String,
    pub version: String,
    pub machine_id: String,
}

impl VersionCheckParams {
    pub fn current(app_id: &str, version: &str) -> Self {
        let info = platform::get_system_info();
        Self {
            os: info.os,
            arch: info.arch,
            rust_version: option_env!("CRTM_RUSTC_VERSION")
                .unwrap_or("unknown")
                .to_string(),
            version: version.to_string(),
            machine_id: platform::machine_id(app_id),
        }
    }

    fn query(&self) -> [(&str, &str); 5] {
        [
            ("os", self.os.as_str()),
            ("arch", self.arch.as_str()),
            ("rust_version", self.rust_version.as_str()),
            ("v", self.version.as_str()),
            ("machine_id", self.machine_id.as_str()),
        ]
    }
}

pub struct GitHubRegistry {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl GitHubRegistry {
    /// `timeout` bounds every metadata request made through this registry.
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("crtm/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Registry {
                resource: api_url.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn latest_release_url(&self, org: &str, repo: &str) -> String {
        format!("{}/repos/{}/{}/releases/latest", self.api_url, org, repo)
    }

    pub fn asset_url(&self, org: &str, repo: &str, asset_id: u64) -> String {
        format!(
            "{}/repos/{}/{}/releases/assets/{}",
            self.api_url, org, repo, asset_id
        )
    }

    /// Latest tag of `org/repo`, reporting the caller's environment.
    pub async fn check_latest_version(
        &self,
        org: &str,
        repo: &str,
        params: &VersionCheckParams,
    ) -> Result<String> {
        let release: Release = self
            .get_json(&self.latest_release_url(org, repo), &params.query())
            .await?;

        if release.tag.is_empty() {
            return Err(Error::Registry {
                resource: format!("{}/{}", org, repo),
                reason: "expected a version tag but got an empty string".to_string(),
            });
        }
        Ok(release.tag)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        tracing::debug!("Fetching {}", url);

        let mut request = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .query(query);

        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| Error::Registry {
            resource: url.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_failure(status, response.headers(), url));
        }

        response.json::<T>().await.map_err(|e| Error::Registry {
            resource: url.to_string(),
            reason: format!("invalid response body: {}", e),
        })
    }
}

impl ReleaseRegistry for GitHubRegistry {
    async fn latest_release(&self, org: &str, repo: &str) -> Result<Release> {
        self.get_json(&self.latest_release_url(org, repo), &[]).await
    }

    async fn download_url(&self, org: &str, repo: &str, asset_id: u64) -> Result<String> {
        let asset: AssetDownload = self
            .get_json(&self.asset_url(org, repo, asset_id), &[])
            .await?;
        Ok(asset.browser_download_url)
    }
}

fn classify_failure(status: StatusCode, headers: &HeaderMap, url: &str) -> Error {
    if let Some(retry_after) = rate_limit_delay(status, headers) {
        tracing::error!(
            "Rate limit exceeded for {}, retry after {}s",
            url,
            retry_after.as_secs()
        );
        return Error::RateLimited { retry_after };
    }

    let reason = if status == StatusCode::NOT_FOUND {
        "release or repository not found (Status: 404)".to_string()
    } else {
        format!("unexpected status {}", status)
    };
    Error::Registry {
        resource: url.to_string(),
        reason,
    }
}

/// `Some(delay)` when the response signals a rate limit.
fn rate_limit_delay(status: StatusCode, headers: &HeaderMap) -> Option<Duration> {
    let retry_after = header_number(headers, "retry-after").map(|s| Duration::from_secs(s as u64));
    let exhausted = header_number(headers, "x-ratelimit-remaining") == Some(0);

    let limited = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && (exhausted || retry_after.is_some()));
    if !limited {
        return None;
    }

    let until_reset = header_number(headers, "x-ratelimit-reset")
        .map(|reset| Duration::from_secs((reset - Utc::now().timestamp()).max(0) as u64));

    Some(retry_after.or(until_reset).unwrap_or(DEFAULT_RETRY_AFTER))
}

fn header_number(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|n| *n >= 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn registry(server: &MockServer) -> GitHubRegistry {
        GitHubRegistry::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_build_urls() {
        let gh = GitHubRegistry::new("https://api.github.com/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            gh.latest_release_url("chainreactors", "gogo"),
            "https://api.github.com/repos/chainreactors/gogo/releases/latest"
        );
        assert_eq!(
            gh.asset_url("chainreactors", "gogo", 42),
            "https://api.github.com/repos/chainreactors/gogo/releases/assets/42"
        );
    }

    #[tokio::test]
    async fn test_latest_release() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/chainreactors/gogo/releases/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tag_name": "v2.13.0",
                "body": "## Changes\n- faster",
                "assets": [
                    {"name": "gogo_linux_amd64", "id": 11, "browser_download_url": "x"},
                    {"name": "gogo_darwin_arm64", "id": 12, "browser_download_url": "y"}
                ]
            })))
            .mount(&server)
            .await;

        let release = registry(&server)
            .latest_release("chainreactors", "gogo")
            .await
            .unwrap();
        assert_eq!(release.tag, "v2.13.0");
        assert_eq!(release.assets.len(), 2);
        assert_eq!(release.assets[0].id, 11);
        assert_eq!(release.notes.as_deref(), Some("## Changes\n- faster"));
    }

    #[tokio::test]
    async fn test_download_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/chainreactors/spray/releases/assets/99"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 99,
                "name": "spray_linux_amd64",
                "browser_download_url": "https://example.com/spray_linux_amd64"
            })))
            .mount(&server)
            .await;

        let url = registry(&server)
            .download_url("chainreactors", "spray", 99)
            .await
            .unwrap();
        assert_eq!(url, "https://example.com/spray_linux_amd64");
    }

    #[tokio::test]
    async fn test_token_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tag_name": "v1.0.0",
                "assets": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let release = registry(&server)
            .with_token(Some("secret".to_string()))
            .latest_release("chainreactors", "zombie")
            .await
            .unwrap();
        assert!(release.assets.is_empty());
        assert!(release.notes.is_none());
    }

    #[tokio::test]
    async fn test_rate_limit_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("x-ratelimit-remaining", "0")
                    .insert_header("retry-after", "30"),
            )
            .mount(&server)
            .await;

        let err = registry(&server)
            .latest_release("chainreactors", "gogo")
            .await
            .unwrap_err();
        match err {
            Error::RateLimited { retry_after } => assert_eq!(retry_after, Duration::from_secs(30)),
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_from_reset_header() {
        let server = MockServer::start().await;
        let reset = Utc::now().timestamp() + 120;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(429).insert_header("x-ratelimit-reset", reset.to_string()),
            )
            .mount(&server)
            .await;

        let err = registry(&server)
            .latest_release("chainreactors", "gogo")
            .await
            .unwrap_err();
        match err {
            Error::RateLimited { retry_after } => {
                assert!(retry_after <= Duration::from_secs(120));
                assert!(retry_after >= Duration::from_secs(100));
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_plain_forbidden_is_not_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).insert_header("x-ratelimit-remaining", "12"))
            .mount(&server)
            .await;

        let err = registry(&server)
            .latest_release("chainreactors", "gogo")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Registry { .. }));
    }

    #[tokio::test]
    async fn test_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = registry(&server)
            .latest_release("chainreactors", "missing")
            .await
            .unwrap_err();
        match err {
            Error::Registry { reason, .. } => assert!(reason.contains("404")),
            other => panic!("expected registry error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_version_check_sends_params() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/chainreactors/crtm/releases/latest"))
            .and(query_param("v", "0.1.0"))
            .and(query_param("machine_id", "abc"))
            .and(query_param("os", "linux"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tag_name": "v0.2.0",
                "assets": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let params = VersionCheckParams {
            os: "linux".to_string(),
            arch: "amd64".to_string(),
            rust_version: "rustc 1.80.0".to_string(),
            version: "0.1.0".to_string(),
            machine_id: "abc".to_string(),
        };
        let tag = registry(&server)
            .check_latest_version("chainreactors", "crtm", &params)
            .await
            .unwrap();
        assert_eq!(tag, "v0.2.0");
    }

    #[tokio::test]
    async fn test_version_check_rejects_empty_tag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tag_name": "",
                "assets": []
            })))
            .mount(&server)
            .await;

        let params = VersionCheckParams::current("crtm", "0.1.0");
        let result = registry(&server)
            .check_latest_version("chainreactors", "crtm", &params)
            .await;
        assert!(result.is_err());
    }
}
