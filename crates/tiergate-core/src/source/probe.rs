//! Availability probes for dependency sources.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::TiergateError;

use super::{DependencySource, ProbeFailure, ProbeOutcome, SourceProbe, SourceType};

/// Checksum manifest every vendored cache must carry.
pub const VENDORED_CHECKSUM_FILE: &str = "checksums.json";

/// Credentials looked up by environment-variable name.
///
/// Captured once at startup and passed explicitly; values never appear in
/// `Debug` output.
#[derive(Clone, Default)]
pub struct Credentials {
    values: HashMap<String, String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the credential variables named by `sources` from the process environment.
    pub fn from_env<'a>(sources: impl IntoIterator<Item = &'a DependencySource>) -> Self {
        let mut creds = Self::new();
        for env in sources.into_iter().filter_map(|s| s.auth_env.as_deref()) {
            if let Ok(value) = std::env::var(env) {
                if !value.trim().is_empty() {
                    creds.values.insert(env.to_string(), value);
                }
            }
        }
        creds
    }

    pub fn with(mut self, env: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(env.into(), value.into());
        self
    }

    pub fn get(&self, env: &str) -> Option<&str> {
        self.values.get(env).map(String::as_str)
    }

    /// Credential for `source`, or the failure to report when it is missing.
    pub fn for_source(&self, source: &DependencySource) -> Result<Option<&str>, ProbeFailure> {
        if !source.requires_auth {
            return Ok(None);
        }
        let env = source
            .auth_env
            .clone()
            .unwrap_or_else(|| "<auth_env not configured>".to_string());
        match self.get(&env) {
            Some(token) => Ok(Some(token)),
            None => Err(ProbeFailure::CredentialsMissing { env }),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.values.keys().collect();
        names.sort();
        f.debug_struct("Credentials").field("names", &names).finish()
    }
}

const USER_AGENT: &str = concat!("tiergate/", env!("CARGO_PKG_VERSION"));

fn http_client(
    user_agent: &str,
    request_timeout: Duration,
) -> Result<reqwest::Client, TiergateError> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(request_timeout)
        .build()
        .map_err(|e| TiergateError::config(format!("cannot create the HTTP client for source probes: {e}")))
}

/// Production probe: HTTP reachability for registry/cdn, checksum
/// verification for vendored caches.
pub struct DefaultProbe {
    http: reqwest::Client,
    credentials: Credentials,
    root: PathBuf,
}

impl DefaultProbe {
    /// `root` anchors relative vendored locators. `request_timeout` caps a
    /// single HTTP request; the resolver applies its own overall bound.
    pub fn new(
        root: impl Into<PathBuf>,
        credentials: Credentials,
        request_timeout: Duration,
    ) -> Result<Self, TiergateError> {
        Ok(Self {
            http: http_client(USER_AGENT, request_timeout)?,
            credentials,
            root: root.into(),
        })
    }

    async fn probe_remote(&self, source: &DependencySource, token: Option<&str>) -> ProbeOutcome {
        let mut request = self.http.head(&source.locator);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => classify_status(response.status()),
            Err(e) if e.is_timeout() => ProbeOutcome::Unavailable(ProbeFailure::Unreachable {
                detail: "request timed out".to_string(),
            }),
            Err(e) => ProbeOutcome::Unavailable(ProbeFailure::Unreachable {
                detail: e.to_string(),
            }),
        }
    }

    async fn probe_vendored(&self, source: &DependencySource) -> ProbeOutcome {
        let dir = self.root.join(&source.locator);
        match verify_vendored_cache(&dir).await {
            Ok(verified) => {
                debug!(locator = %source.locator, files = verified, "vendored cache verified");
                ProbeOutcome::Available
            }
            Err(failure) => ProbeOutcome::Unavailable(failure),
        }
    }
}

#[async_trait]
impl SourceProbe for DefaultProbe {
    async fn probe(&self, source: &DependencySource) -> ProbeOutcome {
        let token = match self.credentials.for_source(source) {
            Ok(token) => token,
            Err(failure) => return ProbeOutcome::Unavailable(failure),
        };

        match source.source_type {
            SourceType::Registry | SourceType::Cdn => self.probe_remote(source, token).await,
            SourceType::Vendored => self.probe_vendored(source).await,
        }
    }
}

fn classify_status(status: StatusCode) -> ProbeOutcome {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        ProbeOutcome::Unavailable(ProbeFailure::CredentialsRejected {
            status: status.as_u16(),
        })
    } else if status.is_server_error() {
        ProbeOutcome::Unavailable(ProbeFailure::Unreachable {
            detail: format!("server returned HTTP {}", status.as_u16()),
        })
    } else {
        // Any other answer means the host is up and accepted us.
        ProbeOutcome::Available
    }
}

/// Check `<dir>/checksums.json` and every file it lists. Returns the number of
/// verified files.
pub async fn verify_vendored_cache(dir: &Path) -> Result<usize, ProbeFailure> {
    let manifest_path = dir.join(VENDORED_CHECKSUM_FILE);
    let raw = tokio::fs::read(&manifest_path)
        .await
        .map_err(|e| ProbeFailure::MissingManifest {
            detail: format!("{}: {e}", manifest_path.display()),
        })?;

    let entries: BTreeMap<String, String> =
        serde_json::from_slice(&raw).map_err(|e| ProbeFailure::MissingManifest {
            detail: format!("{} is not a checksum map: {e}", manifest_path.display()),
        })?;

    if entries.is_empty() {
        return Err(ProbeFailure::MissingManifest {
            detail: format!("{} lists no files", manifest_path.display()),
        });
    }

    for (file, expected) in &entries {
        let bytes = tokio::fs::read(dir.join(file))
            .await
            .map_err(|_| ProbeFailure::ChecksumMismatch { file: file.clone() })?;
        let actual = hex::encode(Sha256::digest(&bytes));
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            return Err(ProbeFailure::ChecksumMismatch { file: file.clone() });
        }
    }

    Ok(entries.len())
}

/// Probe with fixed answers keyed by locator, with an optional artificial delay.
///
/// Unknown locators are reported unreachable.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    answers: HashMap<String, ProbeOutcome>,
    delays: HashMap<String, Duration>,
}

impl StaticProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn available(mut self, locator: &str) -> Self {
        self.answers.insert(locator.to_string(), ProbeOutcome::Available);
        self
    }

    pub fn unavailable(mut self, locator: &str, failure: ProbeFailure) -> Self {
        self.answers
            .insert(locator.to_string(), ProbeOutcome::Unavailable(failure));
        self
    }

    /// Make the probe for `locator` take `delay` before answering.
    pub fn hanging(mut self, locator: &str, delay: Duration) -> Self {
        self.delays.insert(locator.to_string(), delay);
        self.answers
            .entry(locator.to_string())
            .or_insert(ProbeOutcome::Available);
        self
    }
}

#[async_trait]
impl SourceProbe for StaticProbe {
    async fn probe(&self, source: &DependencySource) -> ProbeOutcome {
        if let Some(delay) = self.delays.get(&source.locator) {
            tokio::time::sleep(*delay).await;
        }
        self.answers
            .get(&source.locator)
            .cloned()
            .unwrap_or_else(|| {
                ProbeOutcome::Unavailable(ProbeFailure::Unreachable {
                    detail: "no answer configured".to_string(),
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_cache(dir: &Path, files: &[(&str, &[u8])]) {
        let mut manifest = BTreeMap::new();
        for (name, content) in files {
            let path = dir.join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, content).unwrap();
            manifest.insert(name.to_string(), hex::encode(Sha256::digest(content)));
        }
        std::fs::write(
            dir.join(VENDORED_CHECKSUM_FILE),
            serde_json::to_vec(&manifest).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn vendored_cache_with_valid_checksums_is_available() {
        let dir = tempfile::tempdir().unwrap();
        write_cache(dir.path(), &[("left-pad-1.3.0.tgz", b"tarball bytes")]);

        let probe = DefaultProbe::new(dir.path(), Credentials::new(), Duration::from_secs(1)).unwrap();
        let source = DependencySource::new(SourceType::Vendored, 1, ".");
        assert_eq!(probe.probe(&source).await, ProbeOutcome::Available);
    }

    #[tokio::test]
    async fn vendored_cache_without_manifest_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let probe = DefaultProbe::new(dir.path(), Credentials::new(), Duration::from_secs(1)).unwrap();
        let source = DependencySource::new(SourceType::Vendored, 1, "vendor");
        assert!(matches!(
            probe.probe(&source).await,
            ProbeOutcome::Unavailable(ProbeFailure::MissingManifest { .. })
        ));
    }

    #[tokio::test]
    async fn tampered_vendored_file_is_checksum_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        write_cache(dir.path(), &[("pkg.tgz", b"original")]);
        std::fs::write(dir.path().join("pkg.tgz"), b"tampered").unwrap();

        let err = verify_vendored_cache(dir.path()).await.unwrap_err();
        assert_eq!(
            err,
            ProbeFailure::ChecksumMismatch {
                file: "pkg.tgz".to_string()
            }
        );
    }

    #[tokio::test]
    async fn empty_checksum_manifest_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(VENDORED_CHECKSUM_FILE), b"{}").unwrap();
        assert!(matches!(
            verify_vendored_cache(dir.path()).await,
            Err(ProbeFailure::MissingManifest { .. })
        ));
    }

    #[tokio::test]
    async fn missing_credentials_fail_without_network() {
        let probe = DefaultProbe::new(".", Credentials::new(), Duration::from_secs(1)).unwrap();
        let source = DependencySource::new(SourceType::Registry, 1, "https://registry.invalid")
            .with_auth("TIERGATE_TEST_TOKEN");
        assert_eq!(
            probe.probe(&source).await,
            ProbeOutcome::Unavailable(ProbeFailure::CredentialsMissing {
                env: "TIERGATE_TEST_TOKEN".to_string()
            })
        );
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = DefaultProbe::new(".", Credentials::new(), Duration::from_secs(2)).unwrap();
        let source = DependencySource::new(
            SourceType::Registry,
            1,
            format!("http://127.0.0.1:{port}/"),
        );
        assert!(matches!(
            probe.probe(&source).await,
            ProbeOutcome::Unavailable(ProbeFailure::Unreachable { .. })
        ));
    }

    #[test]
    fn unusable_http_client_is_a_configuration_error() {
        let err = http_client("tiergate\n", Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("HTTP client"));
        assert!(http_client(USER_AGENT, Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(StatusCode::OK), ProbeOutcome::Available);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), ProbeOutcome::Available);
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            ProbeOutcome::Unavailable(ProbeFailure::CredentialsRejected { status: 401 })
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY),
            ProbeOutcome::Unavailable(ProbeFailure::Unreachable { .. })
        ));
    }

    #[test]
    fn credentials_debug_hides_values() {
        let creds = Credentials::new().with("REGISTRY_TOKEN", "s3cr3t");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("REGISTRY_TOKEN"));
        assert!(!rendered.contains("s3cr3t"));
    }
}
