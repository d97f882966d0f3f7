//! Raw HTTP collaborator.
//!
//! The pipeline only ever needs two verbs: an authenticated `GET` returning a
//! body, and the token-exchange `POST`. Both return the response body whatever
//! the status code, because GitHub reports failures as JSON bodies with a
//! `message` field and the fetch adapter decides what those mean. Signed
//! download links are the exception: their status is checked here.

use crate::error::{MetricsError, MetricsResult};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use std::time::Duration;
use tracing::debug;

const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const GITHUB_API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("copilot-metrics/", env!("CARGO_PKG_VERSION"));

#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url`, attaching `bearer` as an `Authorization` header when given.
    async fn get(&self, url: &str, bearer: Option<&str>) -> MetricsResult<String>;

    /// POST an empty body to `url` with `bearer` as the `Authorization` header.
    async fn post(&self, url: &str, bearer: &str) -> MetricsResult<String>;

    /// GET a signed download link without credentials.
    async fn download(&self, url: &str) -> MetricsResult<String> {
        self.get(url, None).await
    }
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> MetricsResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_ACCEPT));
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static(GITHUB_API_VERSION),
        );

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| MetricsError::Transport(e.to_string()))?;

        Ok(Self { client })
    }
}

fn bearer_header(token: &str) -> MetricsResult<HeaderValue> {
    HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| MetricsError::Auth("token contains invalid header characters".into()))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, bearer: Option<&str>) -> MetricsResult<String> {
        let mut request = self.client.get(url);
        if let Some(token) = bearer {
            request = request.header(AUTHORIZATION, bearer_header(token)?);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MetricsError::Transport(e.to_string()))?;
        debug!(url, status = %response.status(), "GET completed");

        response
            .text()
            .await
            .map_err(|e| MetricsError::Transport(e.to_string()))
    }

    /// Non-success statuses are transport failures.
    async fn download(&self, url: &str) -> MetricsResult<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MetricsError::Transport(e.to_string()))?;
        let status = response.status();
        debug!(url, status = %status, "Download completed");

        if !status.is_success() {
            return Err(MetricsError::Transport(format!(
                "download returned HTTP {}",
                status
            )));
        }

        response
            .text()
            .await
            .map_err(|e| MetricsError::Transport(e.to_string()))
    }

    async fn post(&self, url: &str, bearer: &str) -> MetricsResult<String> {
        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, bearer_header(bearer)?)
            .send()
            .await
            .map_err(|e| MetricsError::Transport(e.to_string()))?;
        debug!(url, status = %response.status(), "POST completed");

        response
            .text()
            .await
            .map_err(|e| MetricsError::Transport(e.to_string()))
    }
}
