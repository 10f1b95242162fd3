//! HTTP client for an asynchronous OCR job service
//!
//! Wire protocol:
//! - `POST {base}/v1/jobs` with `{documentLocation: {bucket, key}, clientRequestToken?}`
//!   answers `{jobId}`
//! - `GET {base}/v1/jobs/{jobId}?nextToken=..` answers
//!   `{jobStatus, statusMessage?, blocks: [...], nextToken?}`
//!
//! HTTP 429 and throttling error codes are reported as
//! [`ProviderError::RateLimited`] so the driver backs off.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::OcrConfig;
use crate::driver::{
    ExtractedBlock, JobSpec, JobStatusPage, OcrJobProvider, ProviderError, ProviderJobStatus,
};
use crate::error::{Error, Result};

const THROTTLING_CODES: &[&str] = &[
    "ThrottlingException",
    "ProvisionedThroughputExceededException",
    "LimitExceededException",
];

/// OCR job service reached over HTTP
pub struct HttpOcrProvider {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpOcrProvider {
    pub fn new(config: &OcrConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build OCR client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        })
    }

    fn jobs_url(&self) -> String {
        format!("{}/v1/jobs", self.base_url)
    }

    fn job_url(&self, job_id: &str) -> String {
        format!("{}/v1/jobs/{}", self.base_url, job_id)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> std::result::Result<T, ProviderError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Transport(format!("unreadable response: {}", e)))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartJobRequest<'a> {
    document_location: DocumentLocation<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_request_token: Option<&'a str>,
}

#[derive(Serialize)]
struct DocumentLocation<'a> {
    bucket: &'a str,
    key: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartJobResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetJobResponse {
    job_status: ProviderJobStatus,
    #[serde(default)]
    status_message: Option<String>,
    #[serde(default)]
    blocks: Vec<WireBlock>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBlock {
    #[serde(default)]
    block_type: Option<String>,
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

impl GetJobResponse {
    fn into_page(self) -> JobStatusPage {
        // Only line-level text; word blocks would duplicate it
        let blocks = self
            .blocks
            .into_iter()
            .filter(|b| b.block_type.as_deref().map_or(true, |t| t == "LINE"))
            .filter_map(|b| {
                b.text.map(|text| ExtractedBlock {
                    page: b.page.unwrap_or(1),
                    text,
                    confidence: b.confidence,
                })
            })
            .collect();

        JobStatusPage {
            status: self.job_status,
            status_message: self.status_message,
            blocks,
            next_token: self.next_token.filter(|t| !t.is_empty()),
        }
    }
}

/// Map a non-success response to a provider error
fn classify_failure(status: StatusCode, body: &str) -> ProviderError {
    let message = format!("{}: {}", status, body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS
        || THROTTLING_CODES.iter().any(|code| body.contains(code))
    {
        ProviderError::RateLimited(message)
    } else if status.is_server_error() {
        ProviderError::Transport(message)
    } else {
        ProviderError::Rejected(message)
    }
}

#[async_trait]
impl OcrJobProvider for HttpOcrProvider {
    async fn start_job(&self, spec: &JobSpec) -> std::result::Result<String, ProviderError> {
        let request = StartJobRequest {
            document_location: DocumentLocation {
                bucket: &spec.bucket,
                key: &spec.key,
            },
            client_request_token: spec.client_token.as_deref(),
        };

        let response: StartJobResponse = self
            .send(self.client.post(self.jobs_url()).json(&request))
            .await?;
        Ok(response.job_id)
    }

    async fn get_job(
        &self,
        job_id: &str,
        next_token: Option<&str>,
    ) -> std::result::Result<JobStatusPage, ProviderError> {
        let mut request = self.client.get(self.job_url(job_id));
        if let Some(token) = next_token {
            request = request.query(&[("nextToken", token)]);
        }

        let response: GetJobResponse = self.send(request).await?;
        Ok(response.into_page())
    }

    fn name(&self) -> &str {
        "http-ocr"
    }
}
