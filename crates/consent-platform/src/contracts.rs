use chrono::{DateTime, Utc};
use consent_core::{
    AddressSnapshot, ConsentRecord, IssueLinkRequest, IssuedLink, Link, LinkStatus, OfferSnapshot,
    OrderLineItem, SubmissionOutcome, SubmissionRecord,
};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/agree` and `POST /api/reject`, form or JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionRequest {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecisionResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLinkRequest {
    pub user_id: i64,
    pub offer_id: i64,
    pub external_id: Option<String>,
    pub expires_in_days: Option<i64>,
    pub address: Option<AddressSnapshot>,
}

impl From<CreateLinkRequest> for IssueLinkRequest {
    fn from(request: CreateLinkRequest) -> Self {
        Self {
            user_id: request.user_id,
            offer_id: request.offer_id,
            external_id: request.external_id,
            expires_in_days: request.expires_in_days,
            address: request.address,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLinkResponse {
    pub link_id: i64,
    pub url: String,
    pub status: LinkStatus,
    pub expires_at: DateTime<Utc>,
}

impl From<IssuedLink> for CreateLinkResponse {
    fn from(issued: IssuedLink) -> Self {
        Self {
            link_id: issued.link.id,
            url: issued.url,
            status: issued.link.status,
            expires_at: issued.link.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkDetailResponse {
    pub link_id: i64,
    pub user_id: i64,
    pub offer_id: i64,
    pub external_id: String,
    pub status: LinkStatus,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    pub agreed_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub offer_snapshot: OfferSnapshot,
    pub address: Option<AddressSnapshot>,
    pub order_result: Option<SubmissionRecord>,
}

impl LinkDetailResponse {
    pub fn new(link: Link, url: Option<String>) -> Self {
        Self {
            link_id: link.id,
            user_id: link.user_id,
            offer_id: link.offer_id,
            external_id: link.external_ref(),
            status: link.status,
            url,
            created_at: link.created_at,
            expires_at: link.expires_at,
            opened_at: link.opened_at,
            agreed_at: link.agreed_at,
            rejected_at: link.rejected_at,
            offer_snapshot: link.offer_snapshot,
            address: link.address,
            order_result: link.order_result,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResubmitResponse {
    pub link_id: i64,
    pub outcome: SubmissionOutcome,
    pub order_id: Option<String>,
    pub attempts: usize,
    pub error: Option<String>,
}

impl ResubmitResponse {
    pub fn new(link_id: i64, record: &SubmissionRecord) -> Self {
        Self {
            link_id,
            outcome: record.outcome,
            order_id: record.order_id.clone(),
            attempts: record.attempt_count(),
            error: record.error.clone(),
        }
    }
}

/// Every order submission recorded for a link, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionHistoryResponse {
    pub link_id: i64,
    pub submissions: Vec<SubmissionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSnapshotsResponse {
    pub offer_id: i64,
    pub refreshed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItemsResponse {
    pub offer_id: i64,
    pub cust_order_items: Vec<OrderLineItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentListQuery {
    pub link_id: Option<i64>,
    #[serde(default = "default_consent_limit")]
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentListResponse {
    pub consents: Vec<ConsentRecord>,
}

fn default_consent_limit() -> i64 {
    100
}
