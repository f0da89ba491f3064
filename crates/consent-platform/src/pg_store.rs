use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use consent_core::{
    AddressSnapshot, Choice, ConsentError, ConsentRecord, ConsentResult, Customer, DecidedLink,
    DecisionSource, Link, LinkStatus, LinkStore, NewConsent, NewLink, Offer, OfferDetails,
    OfferSnapshot, OpenedLink, OrderContext, OrderLineItem, OrderMapping, SubmissionRecord,
};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow, types::Json};
use tracing::warn;

const LINK_COLUMNS: &str = "id, user_id, offer_id, external_id, token, status, created_at, \
    expires_at, opened_at, agreed_at, rejected_at, offer_snapshot_json, address_json, \
    order_response_json";

const OFFER_COLUMNS: &str = "id, title, bundle, price, currency, details_json, product_offer_id, \
    product_offer_struct_id, po_struct_element_id, product_num, resource_spec_id";

/// `LinkStore` backed by Postgres. Lifecycle changes run inside a transaction
/// holding `SELECT ... FOR UPDATE` on the link row.
#[derive(Clone)]
pub struct PgLinkStore {
    pool: PgPool,
}

impl PgLinkStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_link(&self, conn: &mut PgConnection, link_id: i64) -> ConsentResult<Link> {
        let sql = format!("SELECT {LINK_COLUMNS} FROM links WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(link_id)
            .fetch_optional(conn)
            .await
            .map_err(ConsentError::storage)?
            .ok_or(ConsentError::LinkNotFound(link_id))?;

        Ok(link_from_row(&row)?)
    }
}

#[async_trait]
impl LinkStore for PgLinkStore {
    async fn fetch_customer(&self, customer_id: i64) -> ConsentResult<Option<Customer>> {
        let row = sqlx::query(
            "SELECT id, name, phone, email, filial_id, customer_account_id FROM users WHERE id = $1",
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ConsentError::storage)?;

        Ok(row.as_ref().map(customer_from_row).transpose()?)
    }

    async fn fetch_offer(&self, offer_id: i64) -> ConsentResult<Option<Offer>> {
        let sql = format!("SELECT {OFFER_COLUMNS} FROM offers WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(offer_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ConsentError::storage)?;

        Ok(row.as_ref().map(offer_from_row).transpose()?)
    }

    async fn set_offer_line_items(
        &self,
        offer_id: i64,
        items: &[OrderLineItem],
    ) -> ConsentResult<Offer> {
        let sql = format!(
            "UPDATE offers \
             SET details_json = jsonb_set(details_json, '{{cust_order_items}}', $2), updated_at = NOW() \
             WHERE id = $1 RETURNING {OFFER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(offer_id)
            .bind(Json(items))
            .fetch_optional(&self.pool)
            .await
            .map_err(ConsentError::storage)?
            .ok_or(ConsentError::OfferNotFound(offer_id))?;

        Ok(offer_from_row(&row)?)
    }

    async fn create_link(&self, link: NewLink) -> ConsentResult<Link> {
        let sql = format!(
            "INSERT INTO links \
             (user_id, offer_id, external_id, status, created_at, expires_at, offer_snapshot_json, address_json) \
             VALUES ($1, $2, $3, 'NEW', $4, $5, $6, $7) RETURNING {LINK_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(link.user_id)
            .bind(link.offer_id)
            .bind(&link.external_id)
            .bind(link.created_at)
            .bind(link.expires_at)
            .bind(Json(&link.offer_snapshot))
            .bind(link.address.as_ref().map(Json))
            .fetch_one(&self.pool)
            .await
            .map_err(ConsentError::storage)?;

        Ok(link_from_row(&row)?)
    }

    async fn assign_token(&self, link_id: i64, token: &str) -> ConsentResult<()> {
        let result = sqlx::query("UPDATE links SET token = $2 WHERE id = $1")
            .bind(link_id)
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(ConsentError::storage)?;

        if result.rows_affected() == 0 {
            return Err(ConsentError::LinkNotFound(link_id));
        }
        Ok(())
    }

    async fn fetch_link(&self, link_id: i64) -> ConsentResult<Option<Link>> {
        let sql = format!("SELECT {LINK_COLUMNS} FROM links WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(link_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ConsentError::storage)?;

        Ok(row.as_ref().map(link_from_row).transpose()?)
    }

    #[tracing::instrument(skip(self))]
    async fn open_link(&self, link_id: i64, now: DateTime<Utc>) -> ConsentResult<OpenedLink> {
        let mut tx = self.pool.begin().await.map_err(ConsentError::storage)?;
        let mut link = self.lock_link(&mut tx, link_id).await?;

        let before = link.lifecycle();
        let opened = link.open(now);
        if link.lifecycle() != before {
            write_lifecycle(&mut tx, &link).await?;
        }
        tx.commit().await.map_err(ConsentError::storage)?;

        Ok(OpenedLink {
            first_open: opened?,
            link,
        })
    }

    #[tracing::instrument(skip(self, source))]
    async fn decide_link(
        &self,
        link_id: i64,
        choice: Choice,
        source: &DecisionSource,
        now: DateTime<Utc>,
    ) -> ConsentResult<DecidedLink> {
        let mut tx = self.pool.begin().await.map_err(ConsentError::storage)?;
        let mut link = self.lock_link(&mut tx, link_id).await?;

        let before = link.lifecycle();
        let decided = link.decide(choice, now);
        if link.lifecycle() != before {
            write_lifecycle(&mut tx, &link).await?;
        }
        if let Err(err) = decided {
            // keeps an EXPIRED transition made on the way
            tx.commit().await.map_err(ConsentError::storage)?;
            return Err(err);
        }

        let consent = NewConsent::describe(&link, choice, source, now);
        let row = sqlx::query(
            "INSERT INTO consents (link_id, consent_text, choice, created_at, ip, user_agent) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(consent.link_id)
        .bind(&consent.consent_text)
        .bind(consent.choice.as_str())
        .bind(consent.created_at)
        .bind(&consent.ip)
        .bind(&consent.user_agent)
        .fetch_one(&mut *tx)
        .await
        .map_err(ConsentError::storage)?;
        let consent_id: i64 = row.try_get("id").map_err(ConsentError::storage)?;

        tx.commit().await.map_err(ConsentError::storage)?;

        Ok(DecidedLink {
            link,
            consent: ConsentRecord {
                id: consent_id,
                link_id: consent.link_id,
                consent_text: consent.consent_text,
                choice: consent.choice,
                created_at: consent.created_at,
                ip: consent.ip,
                user_agent: consent.user_agent,
            },
        })
    }

    async fn refresh_snapshots(&self, offer_id: i64) -> ConsentResult<u64> {
        let offer = self
            .fetch_offer(offer_id)
            .await?
            .ok_or(ConsentError::OfferNotFound(offer_id))?;

        let result = sqlx::query(
            "UPDATE links SET offer_snapshot_json = $2 \
             WHERE offer_id = $1 AND status IN ('NEW', 'OPENED')",
        )
        .bind(offer_id)
        .bind(Json(offer.snapshot()))
        .execute(&self.pool)
        .await
        .map_err(ConsentError::storage)?;

        Ok(result.rows_affected())
    }

    async fn fetch_order_context(&self, link_id: i64) -> ConsentResult<Option<OrderContext>> {
        let Some(link) = self.fetch_link(link_id).await? else {
            return Ok(None);
        };
        let customer = self
            .fetch_customer(link.user_id)
            .await?
            .ok_or(ConsentError::CustomerNotFound(link.user_id))?;

        Ok(Some(OrderContext { link, customer }))
    }

    async fn record_submission(
        &self,
        link_id: i64,
        record: &SubmissionRecord,
    ) -> ConsentResult<()> {
        let mut tx = self.pool.begin().await.map_err(ConsentError::storage)?;
        let result = sqlx::query("UPDATE links SET order_response_json = $2 WHERE id = $1")
            .bind(link_id)
            .bind(Json(record))
            .execute(&mut *tx)
            .await
            .map_err(ConsentError::storage)?;

        if result.rows_affected() == 0 {
            warn!(link_id, "submission record for a missing link was dropped");
            return Err(ConsentError::LinkNotFound(link_id));
        }

        sqlx::query(
            "INSERT INTO order_submissions (link_id, outcome, order_id, record_json) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(link_id)
        .bind(record.outcome.as_str())
        .bind(record.order_id.as_deref())
        .bind(Json(record))
        .execute(&mut *tx)
        .await
        .map_err(ConsentError::storage)?;

        tx.commit().await.map_err(ConsentError::storage)?;
        Ok(())
    }

    async fn list_submissions(&self, link_id: i64) -> ConsentResult<Vec<SubmissionRecord>> {
        let rows = sqlx::query(
            "SELECT record_json FROM order_submissions WHERE link_id = $1 ORDER BY id",
        )
        .bind(link_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ConsentError::storage)?;

        rows.iter()
            .map(|row| {
                row.try_get::<Json<SubmissionRecord>, _>("record_json")
                    .map(|Json(record)| record)
                    .map_err(ConsentError::storage)
            })
            .collect()
    }

    async fn pending_submissions(&self, limit: i64) -> ConsentResult<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT id FROM links \
             WHERE status = 'AGREED' \
               AND (order_response_json IS NULL OR order_response_json->>'outcome' <> 'SUCCEEDED') \
             ORDER BY agreed_at, id LIMIT $1",
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(ConsentError::storage)?;

        rows.iter()
            .map(|row| row.try_get::<i64, _>("id").map_err(ConsentError::storage))
            .collect()
    }

    async fn list_consents(
        &self,
        link_id: Option<i64>,
        limit: i64,
    ) -> ConsentResult<Vec<ConsentRecord>> {
        let rows = sqlx::query(
            "SELECT id, link_id, consent_text, choice, created_at, ip, user_agent FROM consents \
             WHERE ($1::BIGINT IS NULL OR link_id = $1) \
             ORDER BY created_at DESC, id DESC LIMIT $2",
        )
        .bind(link_id)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(ConsentError::storage)?;

        Ok(rows.iter().map(consent_from_row).collect::<Result<Vec<_>>>()?)
    }
}

async fn write_lifecycle(conn: &mut PgConnection, link: &Link) -> ConsentResult<()> {
    sqlx::query(
        "UPDATE links SET status = $2, opened_at = $3, agreed_at = $4, rejected_at = $5 WHERE id = $1",
    )
    .bind(link.id)
    .bind(link.status.as_str())
    .bind(link.opened_at)
    .bind(link.agreed_at)
    .bind(link.rejected_at)
    .execute(conn)
    .await
    .map_err(ConsentError::storage)?;

    Ok(())
}

fn customer_from_row(row: &PgRow) -> Result<Customer> {
    Ok(Customer {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        filial_id: row.try_get("filial_id")?,
        customer_account_id: row.try_get("customer_account_id")?,
    })
}

fn offer_from_row(row: &PgRow) -> Result<Offer> {
    let details: Option<Json<OfferDetails>> = row.try_get("details_json")?;

    Ok(Offer {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        bundle: row.try_get("bundle")?,
        price: row.try_get::<Option<Decimal>, _>("price")?,
        currency: row.try_get("currency")?,
        details: details.map(|json| json.0).unwrap_or_default(),
        order_mapping: OrderMapping {
            product_offer_id: row.try_get("product_offer_id")?,
            product_offer_struct_id: row.try_get("product_offer_struct_id")?,
            po_struct_element_id: row.try_get("po_struct_element_id")?,
            product_num: row.try_get("product_num")?,
            resource_spec_id: row.try_get("resource_spec_id")?,
        },
    })
}

fn link_from_row(row: &PgRow) -> Result<Link> {
    let status: String = row.try_get("status")?;
    let snapshot: Json<OfferSnapshot> = row.try_get("offer_snapshot_json")?;
    let address: Option<Json<AddressSnapshot>> = row.try_get("address_json")?;
    let order_result: Option<Json<SubmissionRecord>> = row.try_get("order_response_json")?;

    Ok(Link {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        offer_id: row.try_get("offer_id")?,
        external_id: row.try_get("external_id")?,
        token: row.try_get("token")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        opened_at: row.try_get("opened_at")?,
        agreed_at: row.try_get("agreed_at")?,
        rejected_at: row.try_get("rejected_at")?,
        status: LinkStatus::parse(&status)?,
        offer_snapshot: snapshot.0,
        address: address.map(|json| json.0),
        order_result: order_result.map(|json| json.0),
    })
}

fn consent_from_row(row: &PgRow) -> Result<ConsentRecord> {
    let choice: String = row.try_get("choice")?;

    Ok(ConsentRecord {
        id: row.try_get("id")?,
        link_id: row.try_get("link_id")?,
        consent_text: row.try_get("consent_text")?,
        choice: Choice::parse(&choice)?,
        created_at: row.try_get("created_at")?,
        ip: row.try_get("ip")?,
        user_agent: row.try_get("user_agent")?,
    })
}
