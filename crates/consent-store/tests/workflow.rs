use std::sync::Arc;

use chrono::{Duration, Utc};
use consent_core::{
    Choice, ConsentError, ConsentWorkflow, Customer, DecisionSource, IssueLinkRequest, LinkStatus,
    LinkStore, Offer, OfferDetails, OrderMapping, TokenCodec,
};
use consent_store::InMemoryLinkStore;
use rust_decimal::Decimal;

fn offer(title: &str) -> Offer {
    Offer {
        id: 3,
        title: title.to_string(),
        bundle: "bundle".to_string(),
        price: Some(Decimal::new(12900, 0)),
        currency: Some("KZT".to_string()),
        details: OfferDetails::default(),
        order_mapping: OrderMapping {
            product_offer_id: Some(5001),
            ..OrderMapping::default()
        },
    }
}

async fn setup() -> (Arc<InMemoryLinkStore>, ConsentWorkflow) {
    let store = Arc::new(InMemoryLinkStore::new());
    store
        .insert_customer(Customer {
            id: 1,
            name: Some("Aigerim".to_string()),
            phone: None,
            email: None,
            filial_id: Some(17),
            customer_account_id: Some(880001),
        })
        .await;
    store.upsert_offer(offer("Family Pack")).await;

    let workflow = ConsentWorkflow::new(
        store.clone(),
        TokenCodec::new(b"workflow-secret").unwrap(),
        Duration::days(7),
        "https://consent.example.com/",
    );
    (store, workflow)
}

fn issue_request(expires_in_days: Option<i64>) -> IssueLinkRequest {
    IssueLinkRequest {
        user_id: 1,
        offer_id: 3,
        external_id: Some("SMS-1".to_string()),
        expires_in_days,
        address: None,
    }
}

fn source() -> DecisionSource {
    DecisionSource {
        ip: Some("192.0.2.10".to_string()),
        user_agent: Some("test-agent".to_string()),
    }
}

#[tokio::test]
async fn issued_link_carries_token_url_and_snapshot() {
    let (store, workflow) = setup().await;
    let now = Utc::now();

    let issued = workflow.issue_link(issue_request(None), now).await.unwrap();
    let token = issued.link.token.clone().unwrap();

    assert_eq!(issued.url, format!("https://consent.example.com/l/{token}"));
    assert_eq!(issued.link.expires_at, now + Duration::days(7));
    assert_eq!(issued.link.status, LinkStatus::New);

    let stored = store.fetch_link(issued.link.id).await.unwrap().unwrap();
    assert_eq!(stored.token.as_deref(), Some(token.as_str()));
    assert_eq!(stored.offer_snapshot.title, "Family Pack");
}

#[tokio::test]
async fn issuing_for_unknown_rows_fails() {
    let (_store, workflow) = setup().await;
    let now = Utc::now();

    let mut request = issue_request(None);
    request.offer_id = 99;
    assert!(matches!(
        workflow.issue_link(request, now).await,
        Err(ConsentError::OfferNotFound(99))
    ));

    let mut request = issue_request(None);
    request.user_id = 42;
    assert!(matches!(
        workflow.issue_link(request, now).await,
        Err(ConsentError::CustomerNotFound(42))
    ));

    assert!(matches!(
        workflow.issue_link(issue_request(Some(0)), now).await,
        Err(ConsentError::Invalid(_))
    ));
}

#[tokio::test]
async fn visiting_twice_opens_once() {
    let (_store, workflow) = setup().await;
    let now = Utc::now();
    let issued = workflow.issue_link(issue_request(None), now).await.unwrap();
    let token = issued.link.token.unwrap();

    let first = workflow.open(&token, now).await.unwrap();
    assert!(first.first_open);
    assert_eq!(first.link.status, LinkStatus::Opened);

    let second = workflow
        .open(&token, now + Duration::minutes(3))
        .await
        .unwrap();
    assert!(!second.first_open);
    assert_eq!(second.link.opened_at, Some(now));
}

#[tokio::test]
async fn agreeing_twice_records_one_consent() {
    let (store, workflow) = setup().await;
    let now = Utc::now();
    let issued = workflow.issue_link(issue_request(None), now).await.unwrap();
    let token = issued.link.token.unwrap();

    let decided = workflow
        .decide(&token, Choice::Agreed, &source(), now)
        .await
        .unwrap();
    assert_eq!(decided.link.status, LinkStatus::Agreed);
    assert_eq!(decided.consent.ip.as_deref(), Some("192.0.2.10"));

    let again = workflow
        .decide(&token, Choice::Agreed, &source(), now + Duration::seconds(1))
        .await;
    assert!(matches!(
        again,
        Err(ConsentError::AlreadyFinal {
            status: LinkStatus::Agreed,
            ..
        })
    ));

    assert_eq!(store.consent_count(issued.link.id).await, 1);
    let stored = store.fetch_link(issued.link.id).await.unwrap().unwrap();
    assert_eq!(stored.agreed_at, Some(now));
    assert!(stored.rejected_at.is_none());
}

#[tokio::test]
async fn concurrent_decisions_leave_a_single_final_state() {
    let (store, workflow) = setup().await;
    let now = Utc::now();
    let issued = workflow.issue_link(issue_request(None), now).await.unwrap();
    let token = issued.link.token.unwrap();

    let agree = {
        let workflow = workflow.clone();
        let token = token.clone();
        tokio::spawn(async move {
            workflow
                .decide(&token, Choice::Agreed, &source(), now)
                .await
        })
    };
    let reject = {
        let workflow = workflow.clone();
        let token = token.clone();
        tokio::spawn(async move {
            workflow
                .decide(&token, Choice::Rejected, &source(), now)
                .await
        })
    };

    let outcomes = [agree.await.unwrap(), reject.await.unwrap()];
    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    assert_eq!(store.consent_count(issued.link.id).await, 1);

    let stored = store.fetch_link(issued.link.id).await.unwrap().unwrap();
    assert!(stored.agreed_at.is_none() || stored.rejected_at.is_none());
}

#[tokio::test]
async fn expired_link_rejects_open_and_decisions() {
    let (store, workflow) = setup().await;
    let issued_at = Utc::now() - Duration::days(2);
    let issued = workflow
        .issue_link(issue_request(Some(1)), issued_at)
        .await
        .unwrap();
    let token = issued.link.token.unwrap();
    let now = Utc::now();

    assert!(matches!(
        workflow.open(&token, now).await,
        Err(ConsentError::LinkExpired(_))
    ));
    let stored = store.fetch_link(issued.link.id).await.unwrap().unwrap();
    assert_eq!(stored.status, LinkStatus::Expired);

    assert!(matches!(
        workflow.decide(&token, Choice::Agreed, &source(), now).await,
        Err(ConsentError::LinkExpired(_))
    ));
    assert_eq!(store.consent_count(issued.link.id).await, 0);
}

#[tokio::test]
async fn default_lifetime_link_expires_on_first_late_access() {
    let (store, workflow) = setup().await;
    let issued_at = Utc::now() - Duration::days(7);
    let issued = workflow.issue_link(issue_request(None), issued_at).await.unwrap();
    let token = issued.link.token.unwrap();
    let late = issued.link.expires_at + Duration::minutes(1);

    assert!(matches!(
        workflow.open(&token, late).await,
        Err(ConsentError::LinkExpired(_))
    ));
    let stored = store.fetch_link(issued.link.id).await.unwrap().unwrap();
    assert_eq!(stored.status, LinkStatus::Expired);
    assert!(stored.opened_at.is_none());

    assert!(matches!(
        workflow.decide(&token, Choice::Agreed, &source(), late).await,
        Err(ConsentError::LinkExpired(_))
    ));
    assert_eq!(store.consent_count(issued.link.id).await, 0);
}

#[tokio::test]
async fn stale_token_on_a_decided_link_is_only_token_expired() {
    let (store, workflow) = setup().await;
    let issued_at = Utc::now() - Duration::days(10);
    let issued = workflow.issue_link(issue_request(None), issued_at).await.unwrap();
    let token = issued.link.token.unwrap();
    workflow
        .decide(&token, Choice::Agreed, &source(), issued_at + Duration::days(1))
        .await
        .unwrap();

    assert!(matches!(
        workflow.open(&token, Utc::now()).await,
        Err(ConsentError::TokenExpired)
    ));
    let stored = store.fetch_link(issued.link.id).await.unwrap().unwrap();
    assert_eq!(stored.status, LinkStatus::Agreed);
}

#[tokio::test]
async fn link_lifetime_cannot_outlast_its_token() {
    let (_store, workflow) = setup().await;

    assert!(matches!(
        workflow.issue_link(issue_request(Some(30)), Utc::now()).await,
        Err(ConsentError::Invalid(_))
    ));
    assert!(workflow.issue_link(issue_request(Some(7)), Utc::now()).await.is_ok());
}

#[tokio::test]
async fn revoked_or_unknown_tokens_are_rejected() {
    let (store, workflow) = setup().await;
    let now = Utc::now();
    let issued = workflow.issue_link(issue_request(None), now).await.unwrap();
    let token = issued.link.token.clone().unwrap();

    let mut revoked = issued.link.clone();
    revoked.token = None;
    store.overwrite_link(revoked).await;
    assert!(matches!(
        workflow.open(&token, now).await,
        Err(ConsentError::TokenInvalid)
    ));

    let foreign = TokenCodec::new(b"workflow-secret").unwrap().issue(999, now);
    assert!(matches!(
        workflow.open(&foreign, now).await,
        Err(ConsentError::LinkNotFound(999))
    ));
}

#[tokio::test]
async fn refresh_only_touches_open_links() {
    let (store, workflow) = setup().await;
    let now = Utc::now();
    let pending = workflow.issue_link(issue_request(None), now).await.unwrap();
    let decided = workflow.issue_link(issue_request(None), now).await.unwrap();
    workflow
        .decide(
            decided.link.token.as_deref().unwrap(),
            Choice::Agreed,
            &source(),
            now,
        )
        .await
        .unwrap();

    store.upsert_offer(offer("Family Pack 2.0")).await;
    assert_eq!(workflow.refresh_snapshots(3).await.unwrap(), 1);

    let pending = store.fetch_link(pending.link.id).await.unwrap().unwrap();
    let decided = store.fetch_link(decided.link.id).await.unwrap().unwrap();
    assert_eq!(pending.offer_snapshot.title, "Family Pack 2.0");
    assert_eq!(decided.offer_snapshot.title, "Family Pack");

    assert!(matches!(
        workflow.refresh_snapshots(77).await,
        Err(ConsentError::OfferNotFound(77))
    ));
}

#[tokio::test]
async fn pending_submissions_lists_agreed_links_only() {
    let (store, workflow) = setup().await;
    let now = Utc::now();
    let agreed = workflow.issue_link(issue_request(None), now).await.unwrap();
    let rejected = workflow.issue_link(issue_request(None), now).await.unwrap();
    for (issued, choice) in [(&agreed, Choice::Agreed), (&rejected, Choice::Rejected)] {
        workflow
            .decide(issued.link.token.as_deref().unwrap(), choice, &source(), now)
            .await
            .unwrap();
    }

    assert_eq!(store.pending_submissions(10).await.unwrap(), vec![agreed.link.id]);
    assert!(store.pending_submissions(0).await.unwrap().is_empty());

    let consents = store.list_consents(None, 10).await.unwrap();
    assert_eq!(consents.len(), 2);
    assert_eq!(consents[0].link_id, rejected.link.id);
    assert_eq!(consents[0].choice, Choice::Rejected);
}
