use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::retry::SubmissionError;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Raw answer from the order API, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// One HTTP exchange with the order API. Errors are only for exchanges that
/// never produced a status code.
#[async_trait]
pub trait OrderTransport: Send + Sync {
    fn endpoint(&self) -> &str;

    async fn send(
        &self,
        payload: &serde_json::Value,
        idempotency_key: &str,
    ) -> Result<TransportResponse, SubmissionError>;
}

#[derive(Debug, Clone)]
pub struct HttpOrderTransport {
    client: Client,
    endpoint: String,
    bearer_token: Option<String>,
}

impl HttpOrderTransport {
    pub fn new(
        endpoint: impl Into<String>,
        bearer_token: Option<String>,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            bearer_token: bearer_token.filter(|token| !token.trim().is_empty()),
        })
    }
}

#[async_trait]
impl OrderTransport for HttpOrderTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(
        &self,
        payload: &serde_json::Value,
        idempotency_key: &str,
    ) -> Result<TransportResponse, SubmissionError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(payload);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify_reqwest_error)?;

        Ok(TransportResponse { status, body })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> SubmissionError {
    if err.is_builder() {
        SubmissionError::Permanent(err.to_string())
    } else {
        // timeouts, refused connections and bodies cut off mid-read
        SubmissionError::Transient(err.to_string())
    }
}
