use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;

const SCAN_ENDPOINT: &str = "api/attendance/scan";

/// Treat the configured base as a directory so relative endpoints land
/// under its path (`https://host/checkin` joins like `https://host/checkin/`).
pub(crate) fn service_root(mut base: Url) -> Url {
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

/// Remote attendance service. `Ok` carries the confirmation message; any
/// `Err` (transport, timeout, non-success status) means "not delivered".
#[async_trait]
pub trait AttendanceService: Send + Sync {
    async fn submit_attendance(&self, payload: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct HttpAttendanceClient {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for HttpAttendanceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpAttendanceClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct ScanRequest<'a> {
    #[serde(rename = "qrData")]
    qr_data: &'a str,
}

#[derive(Deserialize, Default)]
struct ServiceReply {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpAttendanceClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.service.base_url).context("invalid service.base_url")?;
        Ok(Self::with_base_url(base_url, cfg.service.request_timeout()))
    }

    pub fn with_base_url(base_url: Url, timeout: Duration) -> Self {
        let http = Client::builder()
            .user_agent("anchor-checkin/0.1")
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: service_root(base_url),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn build_request(&self, payload: &str) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(SCAN_ENDPOINT)
            .context("invalid attendance base URL")?;
        self.http
            .post(endpoint)
            .json(&ScanRequest { qr_data: payload })
            .build()
            .context("failed to build attendance request")
    }
}

#[async_trait]
impl AttendanceService for HttpAttendanceClient {
    async fn submit_attendance(&self, payload: &str) -> Result<String> {
        let request = self.build_request(payload)?;
        debug!(url = %request.url(), "submitting attendance");

        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach attendance service")?;

        let status = res.status();
        let body = res
            .text()
            .await
            .context("failed to read attendance response")?;
        let reply: ServiceReply = serde_json::from_str(&body).unwrap_or_default();

        if !status.is_success() {
            let message = reply
                .error
                .or(reply.message)
                .unwrap_or_else(|| body.trim().to_string());
            warn!(%status, %message, "attendance service rejected scan");
            return Err(anyhow!("attendance service error {}: {}", status, message));
        }

        let message = reply
            .message
            .unwrap_or_else(|| "Attendance recorded".to_string());
        info!(%status, %message, "attendance accepted");
        Ok(message)
    }
}
