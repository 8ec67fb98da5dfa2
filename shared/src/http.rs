//! HTTP client utilities

use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("Timeout")]
    Timeout,
    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HttpError::Timeout
        } else if err.is_decode() {
            HttpError::Decode(err.to_string())
        } else {
            HttpError::RequestFailed(err.to_string())
        }
    }
}

/// JSON-over-HTTP client bound to one base URL.
///
/// Issues exactly one request per call; callers own any retry cadence.
#[derive(Clone, Debug)]
pub struct HttpClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tickbar/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// GET `path` and decode the body as JSON. Any non-2xx status is an error.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, HttpError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| HttpError::Decode(e.to_string()))
    }
}
