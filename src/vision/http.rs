use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Response};
use serde::Deserialize;

use super::{CompareRequest, CompareResponse};
use crate::{db::Verdict, images::ImageRef, settings::VisionSettings, traits::VisionClient};

const CAPTURE_PATH: &str = "capture";
const CAPTURE_MASTER_PATH: &str = "capture_master_image";

/// Body of a successful `POST /capture`.
#[derive(Debug, Deserialize)]
struct CaptureBody {
    image: String,
    #[serde(default)]
    diff: Option<String>,
    #[serde(default)]
    res: Option<String>,
    #[serde(default)]
    od: bool,
}

#[derive(Debug, Deserialize)]
struct MasterBody {
    image: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

impl CaptureBody {
    fn into_response(self) -> Result<CompareResponse> {
        let captured_image =
            ImageRef::parse(&self.image).context("vision service returned an unusable image")?;
        let diff_image = self
            .diff
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .map(ImageRef::parse)
            .transpose()
            .context("vision service returned an unusable diff image")?;
        let verdict = self
            .res
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .map(str::parse::<Verdict>)
            .transpose()?;

        Ok(CompareResponse {
            captured_image,
            diff_image,
            verdict,
            operator_decision_required: self.od,
        })
    }
}

/// Client for the camera/vision HTTP service.
pub struct HttpVisionClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpVisionClient {
    pub fn new(settings: &VisionSettings) -> Result<Self> {
        let timeout = Duration::from_millis(settings.request_timeout_ms);
        let client = Client::builder()
            .user_agent(concat!("meter-inspect/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn describe_send_error(&self, url: &str, err: reqwest::Error) -> anyhow::Error {
        if err.is_timeout() {
            anyhow!("vision service did not answer {url} within {:?}", self.timeout)
        } else if err.is_connect() {
            anyhow!("vision service at {url} is unreachable: {err}")
        } else {
            anyhow!("request to {url} failed: {err}")
        }
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = match response.text().await {
        Ok(body) => body,
        Err(err) => bail!("vision service returned {status}; reading the error body failed: {err}"),
    };
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(ErrorBody { error }) => bail!("vision service returned {status}: {error}"),
        Err(_) => bail!(
            "vision service returned {status}: {}",
            status.canonical_reason().unwrap_or("Unknown")
        ),
    }
}

#[async_trait]
impl VisionClient for HttpVisionClient {
    async fn compare(&self, request: &CompareRequest) -> Result<CompareResponse> {
        let url = self.endpoint(CAPTURE_PATH);
        debug!(
            "Requesting capture for serial {} (model {}) from {}",
            request.serial_number, request.model_type, url
        );

        let master = request.master_image.to_wire();
        let form = [
            ("serial_no", request.serial_number.as_str()),
            ("model_type", request.model_type.as_str()),
            ("master", master.as_str()),
        ];

        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|err| self.describe_send_error(&url, err))?;
        let response = ensure_success(response).await?;

        let body: CaptureBody = response
            .json()
            .await
            .map_err(|err| self.describe_send_error(&url, err))
            .context("vision service returned a malformed capture response")?;
        body.into_response()
    }

    async fn capture_master(&self) -> Result<ImageRef> {
        let url = self.endpoint(CAPTURE_MASTER_PATH);
        debug!("Requesting master frame from {}", url);

        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|err| self.describe_send_error(&url, err))?;
        let response = ensure_success(response).await?;

        let body: MasterBody = response
            .json()
            .await
            .map_err(|err| self.describe_send_error(&url, err))
            .context("vision service returned a malformed master response")?;
        ImageRef::parse(&body.image).context("vision service returned an unusable master image")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::tests::sample_png;

    fn data_url() -> String {
        ImageRef::inline(sample_png(3, 3)).to_wire()
    }

    #[test]
    fn automatic_capture_body_maps_to_response() {
        let body: CaptureBody = serde_json::from_value(serde_json::json!({
            "image": data_url(),
            "diff": data_url(),
            "res": "pass",
            "od": false,
        }))
        .unwrap();

        let response = body.into_response().unwrap();
        assert_eq!(response.verdict, Some(Verdict::Pass));
        assert!(!response.operator_decision_required);
        assert!(response.diff_image.is_some());
    }

    #[test]
    fn null_diff_and_missing_verdict_are_tolerated() {
        let body: CaptureBody = serde_json::from_value(serde_json::json!({
            "image": data_url(),
            "diff": null,
            "od": true,
        }))
        .unwrap();

        let response = body.into_response().unwrap();
        assert_eq!(response.verdict, None);
        assert_eq!(response.diff_image, None);
        assert!(response.operator_decision_required);
    }

    #[test]
    fn unknown_verdict_is_an_error() {
        let body: CaptureBody = serde_json::from_value(serde_json::json!({
            "image": data_url(),
            "res": "maybe",
            "od": false,
        }))
        .unwrap();

        assert!(body.into_response().is_err());
    }

    #[test]
    fn endpoints_ignore_trailing_slash() {
        let client = HttpVisionClient::new(&VisionSettings {
            base_url: "http://127.0.0.1:3000/".into(),
            request_timeout_ms: 1_000,
        })
        .unwrap();
        assert_eq!(client.endpoint(CAPTURE_PATH), "http://127.0.0.1:3000/capture");
        assert_eq!(client.base_url(), "http://127.0.0.1:3000");
    }
}
