use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use consent_core::{
    Choice, ConsentError, ConsentRecord, ConsentResult, Customer, DecidedLink, DecisionSource,
    Link, LinkStatus, LinkStore, NewConsent, NewLink, Offer, OpenedLink, OrderContext,
    OrderLineItem, SubmissionRecord,
};
use tokio::sync::RwLock;

#[derive(Default)]
struct MemoryState {
    customers: HashMap<i64, Customer>,
    offers: HashMap<i64, Offer>,
    links: BTreeMap<i64, Link>,
    consents: Vec<ConsentRecord>,
    submissions: Vec<(i64, SubmissionRecord)>,
    next_link_id: i64,
    next_consent_id: i64,
}

/// `LinkStore` kept in process memory. One write lock guards every
/// mutation, which gives the same per-link serialization as a row lock.
#[derive(Default)]
pub struct InMemoryLinkStore {
    state: RwLock<MemoryState>,
}

impl InMemoryLinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_customer(&self, customer: Customer) {
        let mut state = self.state.write().await;
        state.customers.insert(customer.id, customer);
    }

    /// Catalog edits go through here; issued snapshots are left alone.
    pub async fn upsert_offer(&self, offer: Offer) {
        let mut state = self.state.write().await;
        state.offers.insert(offer.id, offer);
    }

    /// Overwrites the stored lifecycle, the way an operator would with a
    /// direct database update.
    pub async fn overwrite_link(&self, link: Link) {
        let mut state = self.state.write().await;
        state.links.insert(link.id, link);
    }

    pub async fn consent_count(&self, link_id: i64) -> usize {
        let state = self.state.read().await;
        state
            .consents
            .iter()
            .filter(|consent| consent.link_id == link_id)
            .count()
    }
}

#[async_trait]
impl LinkStore for InMemoryLinkStore {
    async fn fetch_customer(&self, customer_id: i64) -> ConsentResult<Option<Customer>> {
        let state = self.state.read().await;
        Ok(state.customers.get(&customer_id).cloned())
    }

    async fn fetch_offer(&self, offer_id: i64) -> ConsentResult<Option<Offer>> {
        let state = self.state.read().await;
        Ok(state.offers.get(&offer_id).cloned())
    }

    async fn set_offer_line_items(
        &self,
        offer_id: i64,
        items: &[OrderLineItem],
    ) -> ConsentResult<Offer> {
        let mut state = self.state.write().await;
        let offer = state
            .offers
            .get_mut(&offer_id)
            .ok_or(ConsentError::OfferNotFound(offer_id))?;
        offer.details.cust_order_items = items.to_vec();
        Ok(offer.clone())
    }

    async fn create_link(&self, link: NewLink) -> ConsentResult<Link> {
        let mut state = self.state.write().await;
        if !state.customers.contains_key(&link.user_id) {
            return Err(ConsentError::CustomerNotFound(link.user_id));
        }
        if !state.offers.contains_key(&link.offer_id) {
            return Err(ConsentError::OfferNotFound(link.offer_id));
        }

        state.next_link_id += 1;
        let stored = Link {
            id: state.next_link_id,
            user_id: link.user_id,
            offer_id: link.offer_id,
            external_id: link.external_id,
            token: None,
            created_at: link.created_at,
            expires_at: link.expires_at,
            opened_at: None,
            agreed_at: None,
            rejected_at: None,
            status: LinkStatus::New,
            offer_snapshot: link.offer_snapshot,
            address: link.address,
            order_result: None,
        };
        state.links.insert(stored.id, stored.clone());

        Ok(stored)
    }

    async fn assign_token(&self, link_id: i64, token: &str) -> ConsentResult<()> {
        let mut state = self.state.write().await;
        if state
            .links
            .values()
            .any(|link| link.id != link_id && link.token.as_deref() == Some(token))
        {
            return Err(ConsentError::Invalid(format!(
                "token already assigned to another link than {link_id}"
            )));
        }
        let link = state
            .links
            .get_mut(&link_id)
            .ok_or(ConsentError::LinkNotFound(link_id))?;
        link.token = Some(token.to_string());
        Ok(())
    }

    async fn fetch_link(&self, link_id: i64) -> ConsentResult<Option<Link>> {
        let state = self.state.read().await;
        Ok(state.links.get(&link_id).cloned())
    }

    async fn open_link(&self, link_id: i64, now: DateTime<Utc>) -> ConsentResult<OpenedLink> {
        let mut state = self.state.write().await;
        let link = state
            .links
            .get_mut(&link_id)
            .ok_or(ConsentError::LinkNotFound(link_id))?;

        // The lifecycle change sticks even when open() reports expiry.
        let first_open = link.open(now)?;

        Ok(OpenedLink {
            link: link.clone(),
            first_open,
        })
    }

    async fn decide_link(
        &self,
        link_id: i64,
        choice: Choice,
        source: &DecisionSource,
        now: DateTime<Utc>,
    ) -> ConsentResult<DecidedLink> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let link = state
            .links
            .get_mut(&link_id)
            .ok_or(ConsentError::LinkNotFound(link_id))?;

        link.decide(choice, now)?;

        let consent = NewConsent::describe(link, choice, source, now);
        state.next_consent_id += 1;
        let record = ConsentRecord {
            id: state.next_consent_id,
            link_id: consent.link_id,
            consent_text: consent.consent_text,
            choice: consent.choice,
            created_at: consent.created_at,
            ip: consent.ip,
            user_agent: consent.user_agent,
        };
        state.consents.push(record.clone());

        Ok(DecidedLink {
            link: link.clone(),
            consent: record,
        })
    }

    async fn refresh_snapshots(&self, offer_id: i64) -> ConsentResult<u64> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let snapshot = state
            .offers
            .get(&offer_id)
            .ok_or(ConsentError::OfferNotFound(offer_id))?
            .snapshot();

        let mut refreshed = 0;
        for link in state.links.values_mut().filter(|link| {
            link.offer_id == offer_id && matches!(link.status, LinkStatus::New | LinkStatus::Opened)
        }) {
            link.offer_snapshot = snapshot.clone();
            refreshed += 1;
        }

        Ok(refreshed)
    }

    async fn fetch_order_context(&self, link_id: i64) -> ConsentResult<Option<OrderContext>> {
        let state = self.state.read().await;
        let Some(link) = state.links.get(&link_id) else {
            return Ok(None);
        };
        let customer = state
            .customers
            .get(&link.user_id)
            .cloned()
            .ok_or(ConsentError::CustomerNotFound(link.user_id))?;

        Ok(Some(OrderContext {
            link: link.clone(),
            customer,
        }))
    }

    async fn record_submission(
        &self,
        link_id: i64,
        record: &SubmissionRecord,
    ) -> ConsentResult<()> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let link = state
            .links
            .get_mut(&link_id)
            .ok_or(ConsentError::LinkNotFound(link_id))?;
        link.order_result = Some(record.clone());
        state.submissions.push((link_id, record.clone()));
        Ok(())
    }

    async fn list_submissions(&self, link_id: i64) -> ConsentResult<Vec<SubmissionRecord>> {
        let state = self.state.read().await;
        Ok(state
            .submissions
            .iter()
            .filter(|(id, _)| *id == link_id)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn pending_submissions(&self, limit: i64) -> ConsentResult<Vec<i64>> {
        let state = self.state.read().await;
        let mut pending: Vec<&Link> = state
            .links
            .values()
            .filter(|link| link.status == LinkStatus::Agreed)
            .filter(|link| !link.order_result.as_ref().is_some_and(SubmissionRecord::succeeded))
            .collect();
        pending.sort_by_key(|link| (link.agreed_at, link.id));

        Ok(pending
            .into_iter()
            .take(usize::try_from(limit).unwrap_or_default())
            .map(|link| link.id)
            .collect())
    }

    async fn list_consents(
        &self,
        link_id: Option<i64>,
        limit: i64,
    ) -> ConsentResult<Vec<ConsentRecord>> {
        let state = self.state.read().await;
        Ok(state
            .consents
            .iter()
            .rev()
            .filter(|consent| link_id.is_none_or(|id| consent.link_id == id))
            .take(usize::try_from(limit).unwrap_or_default())
            .cloned()
            .collect())
    }
}
