//! Cloud Environment Detection
//!
//! Probes the link-local instance metadata services to find out whether the
//! host runs on AWS or Azure. Each probe is single-shot with a one second
//! timeout so detection never stalls startup.

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{error, info};

use super::types::CloudEnvironment;
use crate::config::Settings;

/// Link-local address shared by the AWS and Azure metadata services
pub const METADATA_BASE_URL: &str = "http://169.254.169.254";

const PROBE_TIMEOUT: Duration = Duration::from_secs(1);
const AWS_TOKEN_TTL_SECONDS: &str = "21600";
const AZURE_METADATA_API_VERSION: &str = "2021-02-01";

/// Build the HTTP client used against metadata endpoints.
///
/// Metadata services are only reachable directly, never through a proxy.
pub(crate) fn metadata_client() -> Result<Client> {
    Client::builder()
        .timeout(PROBE_TIMEOUT)
        .no_proxy()
        .build()
        .context("Failed to create metadata HTTP client")
}

/// Fetch an IMDSv2 session token
pub(crate) async fn aws_metadata_token(client: &Client, base_url: &str) -> Result<String> {
    let response = client
        .put(format!("{}/latest/api/token", base_url))
        .header("X-aws-ec2-metadata-token-ttl-seconds", AWS_TOKEN_TTL_SECONDS)
        .send()
        .await
        .context("AWS metadata token request failed")?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if status != StatusCode::OK {
        anyhow::bail!("AWS metadata token endpoint returned {}: {}", status, body);
    }

    Ok(body)
}

/// Detects the cloud environment of the current host
pub struct EnvironmentDetector {
    http_client: Client,
    base_url: String,
}

impl EnvironmentDetector {
    /// Create a detector against the real metadata address
    pub fn new() -> Result<Self> {
        Self::with_base_url(METADATA_BASE_URL)
    }

    /// Create a detector against an arbitrary metadata base URL
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http_client: metadata_client()?,
            base_url: base_url.into(),
        })
    }

    /// Classify the host.
    ///
    /// A configured static list short-circuits to `Static` without touching
    /// the network. Probe failures are logged at info; only the final
    /// `Unknown` verdict is an error.
    pub async fn detect(&self, settings: &Settings) -> CloudEnvironment {
        if settings.static_hosts().is_some() {
            info!("Static target list configured, skipping cloud detection");
            return CloudEnvironment::Static;
        }

        if self.probe_aws().await {
            info!("Detected AWS environment");
            return CloudEnvironment::Aws;
        }

        if self.probe_azure().await {
            info!("Detected Azure environment");
            return CloudEnvironment::Azure;
        }

        error!("Unsupported cloud environment");
        CloudEnvironment::Unknown
    }

    async fn probe_aws(&self) -> bool {
        let token = match aws_metadata_token(&self.http_client, &self.base_url).await {
            Ok(token) => token,
            Err(e) => {
                info!(error = %format!("{:#}", e), "Failed to get AWS metadata token");
                return false;
            }
        };

        match self
            .http_client
            .get(format!("{}/latest/meta-data/", self.base_url))
            .header("X-aws-ec2-metadata-token", token)
            .send()
            .await
        {
            Ok(resp) if resp.status() == StatusCode::OK => true,
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                info!(status = %status, body = %body, "Failed to query AWS metadata service");
                false
            }
            Err(e) => {
                info!(error = %e, "Failed to query AWS metadata service");
                false
            }
        }
    }

    async fn probe_azure(&self) -> bool {
        match self
            .http_client
            .get(format!("{}/metadata/instance", self.base_url))
            .query(&[("api-version", AZURE_METADATA_API_VERSION)])
            .header("Metadata", "true")
            .send()
            .await
        {
            Ok(resp) if resp.status() == StatusCode::OK => true,
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                info!(status = %status, body = %body, "Failed to query Azure metadata service");
                false
            }
            Err(e) => {
                info!(error = %e, "Failed to query Azure metadata service");
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::tests::minimal_settings;
    use axum::{
        http::{HeaderMap, StatusCode as AxumStatus},
        routing::{get, put},
        Router,
    };

    /// Serve `app` on an ephemeral local port and return its base URL
    pub(crate) async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn issue_token(headers: HeaderMap) -> (AxumStatus, String) {
        match headers.get("x-aws-ec2-metadata-token-ttl-seconds") {
            Some(ttl) if ttl == "21600" => (AxumStatus::OK, "session-token".to_string()),
            _ => (AxumStatus::BAD_REQUEST, String::new()),
        }
    }

    async fn aws_meta_data(headers: HeaderMap) -> AxumStatus {
        match headers.get("x-aws-ec2-metadata-token") {
            Some(token) if token == "session-token" => AxumStatus::OK,
            _ => AxumStatus::UNAUTHORIZED,
        }
    }

    async fn azure_instance(headers: HeaderMap) -> AxumStatus {
        match headers.get("metadata") {
            Some(flag) if flag == "true" => AxumStatus::OK,
            _ => AxumStatus::BAD_REQUEST,
        }
    }

    #[tokio::test]
    async fn test_static_list_short_circuits() {
        let mut settings = minimal_settings();
        settings.cc_vms = Some(vec!["10.0.0.5".to_string()]);

        // Discard port: any network call would fail, none is expected.
        let detector = EnvironmentDetector::with_base_url("http://127.0.0.1:9").unwrap();
        assert_eq!(detector.detect(&settings).await, CloudEnvironment::Static);
    }

    #[tokio::test]
    async fn test_detects_aws() {
        let app = Router::new()
            .route("/latest/api/token", put(issue_token))
            .route("/latest/meta-data/", get(aws_meta_data));
        let detector = EnvironmentDetector::with_base_url(serve(app).await).unwrap();

        assert_eq!(
            detector.detect(&minimal_settings()).await,
            CloudEnvironment::Aws
        );
    }

    #[tokio::test]
    async fn test_falls_back_to_azure() {
        let app = Router::new().route("/metadata/instance", get(azure_instance));
        let detector = EnvironmentDetector::with_base_url(serve(app).await).unwrap();

        assert_eq!(
            detector.detect(&minimal_settings()).await,
            CloudEnvironment::Azure
        );
    }

    #[tokio::test]
    async fn test_aws_metadata_rejection_falls_through() {
        let app = Router::new()
            .route("/latest/api/token", put(issue_token))
            .route("/latest/meta-data/", get(|| async { AxumStatus::FORBIDDEN }))
            .route("/metadata/instance", get(azure_instance));
        let detector = EnvironmentDetector::with_base_url(serve(app).await).unwrap();

        assert_eq!(
            detector.detect(&minimal_settings()).await,
            CloudEnvironment::Azure
        );
    }

    #[tokio::test]
    async fn test_unknown_when_nothing_answers() {
        let detector = EnvironmentDetector::with_base_url(serve(Router::new()).await).unwrap();

        assert_eq!(
            detector.detect(&minimal_settings()).await,
            CloudEnvironment::Unknown
        );
    }

    #[tokio::test]
    async fn test_probe_times_out() {
        let app = Router::new().route(
            "/latest/api/token",
            put(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late-token"
            }),
        );
        let detector = EnvironmentDetector::with_base_url(serve(app).await).unwrap();

        let started = std::time::Instant::now();
        assert_eq!(
            detector.detect(&minimal_settings()).await,
            CloudEnvironment::Unknown
        );
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
