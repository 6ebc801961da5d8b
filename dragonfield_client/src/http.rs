//! HTTP collaborators: version check and profile sync.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use dragonfield_shared::net::{parse_version_body, ProfileUpdate};
use tracing::debug;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Request/response services the client calls besides the socket.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Version string the server expects clients to run.
    async fn fetch_version(&self) -> anyhow::Result<String>;

    /// Persists the cosmetic profile before joining.
    async fn sync_profile(&self, profile: &ProfileUpdate) -> anyhow::Result<()>;
}

pub struct HttpBackend {
    client: reqwest::Client,
    base: String,
}

impl HttpBackend {
    pub fn new(base: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_version(&self) -> anyhow::Result<String> {
        let url = format!("{}/api/version", self.base);
        let body = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .context("version endpoint")?
            .text()
            .await
            .context("read version body")?;
        let version = parse_version_body(&body);
        debug!(version = %version, "Fetched server version");
        Ok(version)
    }

    async fn sync_profile(&self, profile: &ProfileUpdate) -> anyhow::Result<()> {
        let url = format!("{}/api/profile", self.base);
        self.client
            .post(&url)
            .json(profile)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?
            .error_for_status()
            .context("profile endpoint")?;
        Ok(())
    }
}
