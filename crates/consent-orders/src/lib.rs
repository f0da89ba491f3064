pub mod payload;
pub mod retry;
pub mod submitter;
pub mod transport;

pub use payload::{OrderPayload, build_order_payload};
pub use retry::{RetryPolicy, SubmissionError, is_transient};
pub use submitter::{OrderSubmitter, extract_order_id, idempotency_key};
pub use transport::{HttpOrderTransport, OrderTransport, TransportResponse};
