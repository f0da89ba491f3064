use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionOutcome {
    /// The provider answered with an order id.
    Succeeded,
    /// The provider answered 2xx without an order id.
    SoftFailure,
    /// A non-retryable failure, usually a 4xx answer.
    PermanentFailure,
    /// Every attempt failed transiently.
    RetriesExhausted,
}

impl SubmissionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionOutcome::Succeeded => "SUCCEEDED",
            SubmissionOutcome::SoftFailure => "SOFT_FAILURE",
            SubmissionOutcome::PermanentFailure => "PERMANENT_FAILURE",
            SubmissionOutcome::RetriesExhausted => "RETRIES_EXHAUSTED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmissionAttempt {
    pub number: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub http_status: Option<u16>,
    pub error: Option<String>,
}

/// Audit record of one `submit` call, stored on the link whatever the outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmissionRecord {
    pub idempotency_key: String,
    pub endpoint: String,
    pub request: serde_json::Value,
    pub response_status: Option<u16>,
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub outcome: SubmissionOutcome,
    pub order_id: Option<String>,
    pub attempts: Vec<SubmissionAttempt>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SubmissionRecord {
    pub fn succeeded(&self) -> bool {
        self.outcome == SubmissionOutcome::Succeeded
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }
}
