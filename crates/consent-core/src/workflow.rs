use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::error::{ConsentError, ConsentResult};
use crate::models::{AddressSnapshot, DecisionSource, Link, NewLink, OrderLineItem};
use crate::status::{Choice, LinkStatus};
use crate::storage::{DecidedLink, LinkStore, OpenedLink};
use crate::token::{TokenCodec, TokenError};

pub const DEFAULT_LINK_TTL_DAYS: i64 = 7;
const MAX_LINK_TTL_DAYS: i64 = 366;

#[derive(Debug, Clone)]
pub struct IssueLinkRequest {
    pub user_id: i64,
    pub offer_id: i64,
    pub external_id: Option<String>,
    pub expires_in_days: Option<i64>,
    pub address: Option<AddressSnapshot>,
}

#[derive(Debug, Clone)]
pub struct IssuedLink {
    pub link: Link,
    pub url: String,
}

/// Token-gated consent flow on top of a [`LinkStore`].
#[derive(Clone)]
pub struct ConsentWorkflow {
    store: Arc<dyn LinkStore>,
    codec: TokenCodec,
    token_max_age: Duration,
    base_url: String,
}

impl ConsentWorkflow {
    pub fn new(
        store: Arc<dyn LinkStore>,
        codec: TokenCodec,
        token_max_age: Duration,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            codec,
            token_max_age,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn store(&self) -> &Arc<dyn LinkStore> {
        &self.store
    }

    pub fn link_url(&self, token: &str) -> String {
        format!("{}/l/{token}", self.base_url)
    }

    /// Resolves a token to its link, checking signature, age and that the
    /// token is still the one stored on the row.
    pub async fn resolve(&self, token: &str, now: DateTime<Utc>) -> ConsentResult<Link> {
        let link_id = match self.codec.verify(token, self.token_max_age, now) {
            Ok(link_id) => link_id,
            Err(TokenError::Expired(link_id)) => {
                return Err(self.settle_stale_token(link_id, token, now).await);
            }
            Err(err) => return Err(err.into()),
        };
        let link = self
            .store
            .fetch_link(link_id)
            .await?
            .ok_or(ConsentError::LinkNotFound(link_id))?;
        link.authorize(token)?;

        Ok(link)
    }

    /// A token past its max age still names its link. When that link is
    /// itself past expiry and undecided it is moved to EXPIRED, so the row
    /// does not stay NEW or OPENED forever.
    async fn settle_stale_token(
        &self,
        link_id: i64,
        token: &str,
        now: DateTime<Utc>,
    ) -> ConsentError {
        let link = match self.store.fetch_link(link_id).await {
            Ok(Some(link)) => link,
            Ok(None) => return ConsentError::TokenExpired,
            Err(err) => return err,
        };
        if link.authorize(token).is_err() {
            return ConsentError::TokenExpired;
        }
        if link.status == LinkStatus::Expired {
            return ConsentError::LinkExpired(link_id);
        }
        if link.status.is_decided() || !link.is_past_expiry(now) {
            return ConsentError::TokenExpired;
        }

        // open_link applies expiry under the row lock and persists it.
        match self.store.open_link(link_id, now).await {
            Ok(_) => ConsentError::TokenExpired,
            Err(err) => err,
        }
    }

    pub async fn open(&self, token: &str, now: DateTime<Utc>) -> ConsentResult<OpenedLink> {
        let link = self.resolve(token, now).await?;
        self.store.open_link(link.id, now).await
    }

    pub async fn decide(
        &self,
        token: &str,
        choice: Choice,
        source: &DecisionSource,
        now: DateTime<Utc>,
    ) -> ConsentResult<DecidedLink> {
        let link = self.resolve(token, now).await?;
        let decided = self.store.decide_link(link.id, choice, source, now).await?;
        info!(
            link_id = decided.link.id,
            consent_id = decided.consent.id,
            "recorded {} decision",
            choice.as_str()
        );

        Ok(decided)
    }

    pub async fn issue_link(
        &self,
        request: IssueLinkRequest,
        now: DateTime<Utc>,
    ) -> ConsentResult<IssuedLink> {
        let ttl_days = request.expires_in_days.unwrap_or(DEFAULT_LINK_TTL_DAYS);
        if !(1..=MAX_LINK_TTL_DAYS).contains(&ttl_days) {
            return Err(ConsentError::Invalid(format!(
                "expires_in_days must be between 1 and {MAX_LINK_TTL_DAYS}"
            )));
        }
        if Duration::days(ttl_days) > self.token_max_age {
            return Err(ConsentError::Invalid(format!(
                "expires_in_days must not exceed the token max age of {} days",
                self.token_max_age.num_days()
            )));
        }

        self.store
            .fetch_customer(request.user_id)
            .await?
            .ok_or(ConsentError::CustomerNotFound(request.user_id))?;
        let offer = self
            .store
            .fetch_offer(request.offer_id)
            .await?
            .ok_or(ConsentError::OfferNotFound(request.offer_id))?;

        let external_id = request
            .external_id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let mut link = self
            .store
            .create_link(NewLink {
                user_id: request.user_id,
                offer_id: offer.id,
                external_id,
                created_at: now,
                expires_at: now + Duration::days(ttl_days),
                offer_snapshot: offer.snapshot(),
                address: request.address,
            })
            .await?;

        let token = self.codec.issue(link.id, now);
        self.store.assign_token(link.id, &token).await?;
        link.token = Some(token.clone());
        info!(link_id = link.id, offer_id = offer.id, "issued consent link");

        Ok(IssuedLink {
            url: self.link_url(&token),
            link,
        })
    }

    pub async fn set_offer_line_items(
        &self,
        offer_id: i64,
        items: &[OrderLineItem],
    ) -> ConsentResult<Vec<OrderLineItem>> {
        let offer = self.store.set_offer_line_items(offer_id, items).await?;
        Ok(offer.details.cust_order_items)
    }

    pub async fn refresh_snapshots(&self, offer_id: i64) -> ConsentResult<u64> {
        self.store
            .fetch_offer(offer_id)
            .await?
            .ok_or(ConsentError::OfferNotFound(offer_id))?;
        let refreshed = self.store.refresh_snapshots(offer_id).await?;
        info!(offer_id, refreshed, "refreshed link snapshots");

        Ok(refreshed)
    }
}
