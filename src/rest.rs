use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::error::{Result, ScreenerError};
use crate::types::{ExportArtifact, ExportFormat, ScreeningJob, ScreeningRequest, ScreeningResponse};

/// Thin client for the screening REST API. Cheap to clone; the underlying
/// connection pool is shared.
#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
}

impl RestClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.api_url.trim_end_matches('/').to_string(),
        })
    }

    /// `POST /screening/run`: submit once, yield the job envelope.
    pub async fn submit(&self, request: &ScreeningRequest) -> Result<ScreeningResponse> {
        let url = format!("{}/screening/run", self.base_url);
        let resp = self.client.post(&url).json(request).send().await?;
        Self::decode(resp).await
    }

    /// `GET /screening/status/{job_id}`
    pub async fn status(&self, job_id: &str) -> Result<ScreeningJob> {
        let url = format!("{}/screening/status/{job_id}", self.base_url);
        Self::decode(self.client.get(&url).send().await?).await
    }

    /// `GET /screening/results/{job_id}`; defined only for completed jobs.
    pub async fn results(&self, job_id: &str) -> Result<ScreeningResponse> {
        let url = format!("{}/screening/results/{job_id}", self.base_url);
        Self::decode(self.client.get(&url).send().await?).await
    }

    /// `DELETE /screening/cancel/{job_id}`
    pub async fn cancel(&self, job_id: &str) -> Result<()> {
        let url = format!("{}/screening/cancel/{job_id}", self.base_url);
        let resp = self.client.delete(&url).send().await?;
        Self::check(resp).await?;
        Ok(())
    }

    /// `GET /screening/history?limit=&offset=`, most recent first.
    pub async fn history(&self, limit: u32, offset: u32) -> Result<Vec<ScreeningJob>> {
        let url = format!(
            "{}/screening/history?limit={limit}&offset={offset}",
            self.base_url
        );
        Self::decode(self.client.get(&url).send().await?).await
    }

    /// `GET /screening/export/{job_id}?format=`: raw bytes, delivered
    /// untouched. File name comes from Content-Disposition when the server
    /// provides one.
    pub async fn export(&self, job_id: &str, format: ExportFormat) -> Result<ExportArtifact> {
        let url = format!(
            "{}/screening/export/{job_id}?format={format}",
            self.base_url
        );
        let resp = Self::check(self.client.get(&url).send().await?).await?;

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(format.content_type())
            .to_string();
        let file_name = resp
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_attachment_name)
            .unwrap_or_else(|| format!("screening_results_{job_id}.{}", format.extension()));

        let bytes = resp.bytes().await?.to_vec();
        if bytes.is_empty() {
            return Err(ScreenerError::Server(
                "export returned an empty payload".to_string(),
            ));
        }
        Ok(ExportArtifact {
            file_name,
            content_type,
            bytes,
        })
    }

    /// Map non-success responses to the server's `detail` message.
    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(String::from))
            .unwrap_or(body);
        Err(ScreenerError::Server(format!("{status}: {detail}")))
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let resp = Self::check(resp).await?;
        Ok(resp.json::<T>().await?)
    }
}

/// Pull the file name out of `attachment; filename=...`.
fn parse_attachment_name(header: &str) -> Option<String> {
    header
        .split("filename=")
        .nth(1)
        .map(|s| s.trim_matches(|c| c == '"' || c == ' ' || c == ';').to_string())
        .filter(|s| !s.is_empty())
}
