use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client as HttpClient;
use url::Url;

use crate::config::UploadConfig;
use crate::extract::UsagePercent;

/// How long the cloudBit holds each output level.
pub const OUTPUT_DURATION_MS: u32 = 10_000;

/// Destination for usage readings.
pub trait OutputSink {
    fn send(&self, percent: UsagePercent) -> Result<()>;
}

/// Posts readings to `<api_base>/devices/<device_id>/output`.
///
/// The response is never inspected beyond a debug log of its status; only a
/// transport failure is reported back to the caller.
pub struct CloudBitClient {
    http: HttpClient,
    endpoint: Url,
    access_token: String,
    device_id: String,
}

impl CloudBitClient {
    pub fn new(config: &UploadConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            endpoint: output_endpoint(&config.api_base, &config.device_id)?,
            access_token: config.access_token.clone(),
            device_id: config.device_id.clone(),
        })
    }
}

impl OutputSink for CloudBitClient {
    fn send(&self, percent: UsagePercent) -> Result<()> {
        tracing::info!(
            percent = percent.value(),
            device_id = %self.device_id,
            duration_ms = OUTPUT_DURATION_MS,
            "sending output command"
        );
        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.access_token)
            .form(&[
                ("percent", percent.to_string()),
                ("duration_ms", OUTPUT_DURATION_MS.to_string()),
            ])
            .send()
            .with_context(|| format!("output request to {} failed", self.endpoint))?;
        tracing::debug!(status = %response.status(), "output command answered");
        Ok(())
    }
}

/// Logs the command instead of sending it (`--dry-run`).
pub struct DryRunSink {
    endpoint: Url,
}

impl DryRunSink {
    pub fn new(config: &UploadConfig) -> Result<Self> {
        Ok(Self {
            endpoint: output_endpoint(&config.api_base, &config.device_id)?,
        })
    }
}

impl OutputSink for DryRunSink {
    fn send(&self, percent: UsagePercent) -> Result<()> {
        tracing::info!(
            endpoint = %self.endpoint,
            percent = %percent,
            duration_ms = OUTPUT_DURATION_MS,
            "dry run: output command not sent"
        );
        Ok(())
    }
}

pub fn output_endpoint(api_base: &Url, device_id: &str) -> Result<Url> {
    let mut url = api_base.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow!("api base {api_base} cannot carry a path"))?
        .pop_if_empty()
        .extend(["devices", device_id, "output"]);
    Ok(url)
}
