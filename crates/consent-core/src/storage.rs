use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ConsentResult;
use crate::models::{
    ConsentRecord, Customer, DecisionSource, Link, NewLink, Offer, OrderContext, OrderLineItem,
};
use crate::status::Choice;
use crate::submission::SubmissionRecord;

#[derive(Debug, Clone)]
pub struct OpenedLink {
    pub link: Link,
    pub first_open: bool,
}

#[derive(Debug, Clone)]
pub struct DecidedLink {
    pub link: Link,
    pub consent: ConsentRecord,
}

/// Persistence for links and their audit trail.
///
/// `open_link` and `decide_link` must load the row under an exclusive lock,
/// apply [`Link::open`] / [`Link::decide`], and write the lifecycle back
/// whenever it changed, including when the call itself fails with
/// `LinkExpired`. A decision and its consent row commit together.
#[async_trait]
pub trait LinkStore: Send + Sync {
    async fn fetch_customer(&self, customer_id: i64) -> ConsentResult<Option<Customer>>;

    async fn fetch_offer(&self, offer_id: i64) -> ConsentResult<Option<Offer>>;

    async fn set_offer_line_items(
        &self,
        offer_id: i64,
        items: &[OrderLineItem],
    ) -> ConsentResult<Offer>;

    async fn create_link(&self, link: NewLink) -> ConsentResult<Link>;

    async fn assign_token(&self, link_id: i64, token: &str) -> ConsentResult<()>;

    async fn fetch_link(&self, link_id: i64) -> ConsentResult<Option<Link>>;

    async fn open_link(&self, link_id: i64, now: DateTime<Utc>) -> ConsentResult<OpenedLink>;

    async fn decide_link(
        &self,
        link_id: i64,
        choice: Choice,
        source: &DecisionSource,
        now: DateTime<Utc>,
    ) -> ConsentResult<DecidedLink>;

    /// Rewrites the snapshot of NEW and OPENED links on the offer.
    async fn refresh_snapshots(&self, offer_id: i64) -> ConsentResult<u64>;

    async fn fetch_order_context(&self, link_id: i64) -> ConsentResult<Option<OrderContext>>;

    /// Appends `record` to the link's submission history and makes it the
    /// link's latest result. Earlier records are never overwritten.
    async fn record_submission(
        &self,
        link_id: i64,
        record: &SubmissionRecord,
    ) -> ConsentResult<()>;

    /// Every submission recorded for the link, oldest first.
    async fn list_submissions(&self, link_id: i64) -> ConsentResult<Vec<SubmissionRecord>>;

    /// AGREED links without a successful submission, oldest decision first.
    async fn pending_submissions(&self, limit: i64) -> ConsentResult<Vec<i64>>;

    async fn list_consents(
        &self,
        link_id: Option<i64>,
        limit: i64,
    ) -> ConsentResult<Vec<ConsentRecord>>;
}
