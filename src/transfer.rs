//! Wire contract with the detection service.
//!
//! `POST {base}/predict` with a multipart body holding one `file` field; a 2xx
//! answer carries `{"annotated_image": "<data URI or URL>"}`.

use crate::error::WorkflowError;
use crate::model::{SelectedFile, WorkflowConfig};
use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, info};

pub const PREDICT_PATH: &str = "/predict";
pub const FILE_FIELD: &str = "file";

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    annotated_image: Option<String>,
    // The service reports some failures (e.g. model not loaded) as a 200 with this field.
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DetectionClient {
    http: reqwest::Client,
    endpoint: String,
}

impl DetectionClient {
    pub fn new(cfg: &WorkflowConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            http,
            endpoint: format!("{}{}", cfg.base_url.trim_end_matches('/'), PREDICT_PATH),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Wrap the file as the single `file` field of a multipart form.
    pub fn encode(file: &SelectedFile) -> Result<Form, WorkflowError> {
        let part = Part::bytes(file.bytes.to_vec())
            .file_name(file.name.clone())
            .mime_str(file.mime_type())?;
        Ok(Form::new().part(FILE_FIELD, part))
    }

    /// One best-effort POST. No retry and no timeout beyond the transport default.
    pub async fn submit(&self, form: Form) -> Result<String, WorkflowError> {
        debug!(endpoint = %self.endpoint, "posting image");
        let resp = self.http.post(&self.endpoint).multipart(form).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(WorkflowError::Service {
                status: status.as_u16(),
            });
        }
        let body = resp.bytes().await?;
        info!(status = status.as_u16(), bytes = body.len(), "detection response received");
        parse_response(&body)
    }

    pub async fn analyze(&self, file: &SelectedFile) -> Result<String, WorkflowError> {
        let form = Self::encode(file)?;
        self.submit(form).await
    }

    /// Fetch a result image that the service returned as a URL.
    pub async fn fetch_result(&self, url: &str) -> Result<Bytes, WorkflowError> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(WorkflowError::Service {
                status: status.as_u16(),
            });
        }
        Ok(resp.bytes().await?)
    }
}

/// Extract the annotated image reference from a success body.
pub fn parse_response(body: &[u8]) -> Result<String, WorkflowError> {
    let parsed: PredictResponse = serde_json::from_slice(body)
        .map_err(|e| WorkflowError::MalformedResponse(format!("invalid JSON: {e}")))?;
    match parsed.annotated_image {
        Some(image) if !image.is_empty() => Ok(image),
        _ => Err(WorkflowError::MalformedResponse(match parsed.error {
            Some(msg) => format!("service reported: {msg}"),
            None => "missing annotated_image".to_string(),
        })),
    }
}
