use std::sync::Arc;

use chrono::Utc;
use consent_core::{
    ConsentError, ConsentResult, LinkStatus, LinkStore, SubmissionAttempt, SubmissionOutcome,
    SubmissionRecord,
};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::payload::build_order_payload;
use crate::retry::{RetryPolicy, SubmissionError};
use crate::transport::{OrderTransport, TransportResponse};

const ORDER_ID_FIELDS: [&str; 4] = ["ORDER_ID", "order_id", "orderId", "CUST_ORDER_ID"];

/// Stable per link, so a resubmission is recognised as the same order.
pub fn idempotency_key(link_id: i64) -> String {
    format!("{:x}", Sha256::digest(format!("consent-order:{link_id}")))
}

/// Pulls the order id out of a provider response body, top level first and
/// then inside a `data` envelope.
pub fn extract_order_id(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    find_order_id(&value).or_else(|| value.get("data").and_then(find_order_id))
}

fn find_order_id(value: &serde_json::Value) -> Option<String> {
    ORDER_ID_FIELDS.iter().find_map(|field| match value.get(field)? {
        serde_json::Value::String(id) if !id.trim().is_empty() => Some(id.trim().to_string()),
        serde_json::Value::Number(id) => Some(id.to_string()),
        _ => None,
    })
}

/// 2xx answers are accepted (with or without an order id); everything else
/// becomes an error the retry policy can judge.
fn classify(response: &TransportResponse) -> Result<Option<String>, SubmissionError> {
    match response.status {
        200..=299 => Ok(extract_order_id(&response.body)),
        408 | 429 | 500..=599 => Err(SubmissionError::Transient(format!(
            "order API answered {}",
            response.status
        ))),
        status => Err(SubmissionError::Permanent(format!(
            "order API answered {status}"
        ))),
    }
}

#[derive(Clone)]
pub struct OrderSubmitter {
    store: Arc<dyn LinkStore>,
    transport: Arc<dyn OrderTransport>,
    policy: RetryPolicy,
}

impl OrderSubmitter {
    pub fn new(
        store: Arc<dyn LinkStore>,
        transport: Arc<dyn OrderTransport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            transport,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sends the order for an agreed link and appends exactly one audit record,
    /// whatever the outcome. Provider failures are reported in the record, not
    /// as an `Err`. A link whose order already succeeded is not sent again; its
    /// stored record is returned as is.
    pub async fn submit(&self, link_id: i64) -> ConsentResult<SubmissionRecord> {
        let context = self
            .store
            .fetch_order_context(link_id)
            .await?
            .ok_or(ConsentError::LinkNotFound(link_id))?;
        if context.link.status != LinkStatus::Agreed {
            return Err(ConsentError::NotAgreed {
                link_id,
                status: context.link.status,
            });
        }

        if let Some(record) = context
            .link
            .order_result
            .as_ref()
            .filter(|record| record.succeeded())
        {
            info!(
                link_id,
                order_id = record.order_id.as_deref().unwrap_or_default(),
                "order already submitted, nothing to resend"
            );
            return Ok(record.clone());
        }

        let started_at = Utc::now();
        let payload = build_order_payload(&context, started_at);
        let request = serde_json::to_value(&payload).map_err(ConsentError::storage)?;
        let key = idempotency_key(link_id);

        let mut attempts = Vec::new();
        let mut last_response: Option<TransportResponse> = None;
        let mut number = 0;

        let (outcome, order_id, failure) = loop {
            number += 1;
            let delay = self.policy.delay_before(number);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let attempt_started = Utc::now();
            let result = self.transport.send(&request, &key).await;
            let verdict = match &result {
                Ok(response) => classify(response),
                Err(err) => Err(err.clone()),
            };
            attempts.push(SubmissionAttempt {
                number,
                started_at: attempt_started,
                finished_at: Utc::now(),
                http_status: result.as_ref().ok().map(|response| response.status),
                error: verdict.as_ref().err().map(ToString::to_string),
            });
            if let Ok(response) = result {
                last_response = Some(response);
            }

            match verdict {
                Ok(Some(order_id)) => break (SubmissionOutcome::Succeeded, Some(order_id), None),
                Ok(None) => {
                    break (
                        SubmissionOutcome::SoftFailure,
                        None,
                        Some("order API accepted the request without an order id".to_string()),
                    );
                }
                Err(err) if self.policy.should_retry(number, &err) => {
                    warn!(link_id, attempt = number, error = %err, "order submission attempt failed, retrying");
                }
                Err(err) => {
                    let outcome = if (self.policy.retryable)(&err) {
                        SubmissionOutcome::RetriesExhausted
                    } else {
                        SubmissionOutcome::PermanentFailure
                    };
                    break (outcome, None, Some(err.to_string()));
                }
            }
        };

        let record = SubmissionRecord {
            idempotency_key: key,
            endpoint: self.transport.endpoint().to_string(),
            request,
            response_status: last_response.as_ref().map(|response| response.status),
            response_body: last_response.map(|response| response.body),
            error: failure,
            outcome,
            order_id,
            attempts,
            started_at,
            finished_at: Utc::now(),
        };
        self.store.record_submission(link_id, &record).await?;

        match record.outcome {
            SubmissionOutcome::Succeeded => info!(
                link_id,
                order_id = record.order_id.as_deref().unwrap_or_default(),
                attempts = record.attempt_count(),
                "order submitted"
            ),
            outcome => error!(
                link_id,
                outcome = outcome.as_str(),
                attempts = record.attempt_count(),
                error = record.error.as_deref().unwrap_or_default(),
                "order submission failed"
            ),
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_is_stable_lowercase_hex() {
        let key = idempotency_key(42);
        assert_eq!(key, idempotency_key(42));
        assert_ne!(key, idempotency_key(43));
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn order_id_is_found_under_known_names() {
        assert_eq!(extract_order_id(r#"{"ORDER_ID": 9001}"#).as_deref(), Some("9001"));
        assert_eq!(extract_order_id(r#"{"orderId": " A-7 "}"#).as_deref(), Some("A-7"));
        assert_eq!(
            extract_order_id(r#"{"data": {"CUST_ORDER_ID": "55"}}"#).as_deref(),
            Some("55")
        );
        assert_eq!(extract_order_id(r#"{"order_id": ""}"#), None);
        assert_eq!(extract_order_id(r#"{"status": "queued"}"#), None);
        assert_eq!(extract_order_id("<html>ok</html>"), None);
    }

    #[test]
    fn status_codes_are_classified() {
        assert!(matches!(
            classify(&TransportResponse::new(503, "")),
            Err(SubmissionError::Transient(_))
        ));
        assert!(matches!(
            classify(&TransportResponse::new(429, "")),
            Err(SubmissionError::Transient(_))
        ));
        assert!(matches!(
            classify(&TransportResponse::new(422, "")),
            Err(SubmissionError::Permanent(_))
        ));
        assert_eq!(classify(&TransportResponse::new(201, "{}")), Ok(None));
    }
}
