use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::status::{Choice, LinkStatus};
use crate::submission::SubmissionRecord;

/// Customer master row (`users` table).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Customer {
    pub id: i64,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub filial_id: Option<i64>,
    pub customer_account_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrderMapping {
    pub product_offer_id: Option<i64>,
    pub product_offer_struct_id: Option<i64>,
    pub po_struct_element_id: Option<i64>,
    pub product_num: Option<String>,
    pub resource_spec_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderLineItem {
    pub product_offer_struct_id: Option<i64>,
    pub product_num: Option<String>,
    pub resource_spec_id: Option<i64>,
    pub po_struct_element_id: Option<i64>,
    #[serde(default = "default_service_count")]
    pub service_count: u32,
}

impl OrderLineItem {
    pub fn from_mapping(mapping: &OrderMapping) -> Self {
        Self {
            product_offer_struct_id: mapping.product_offer_struct_id,
            product_num: mapping.product_num.clone(),
            resource_spec_id: mapping.resource_spec_id,
            po_struct_element_id: mapping.po_struct_element_id,
            service_count: default_service_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OfferComponent {
    Internet {
        title: String,
        max_speed_mbps: Option<i64>,
    },
    Tv {
        title: String,
        channels: Option<i64>,
        #[serde(default)]
        ott: Vec<String>,
    },
    Mobile {
        title: String,
        sims: Option<i64>,
        data_gb: Option<i64>,
        after_cap_kbps: Option<i64>,
        onnet_minutes: Option<i64>,
        offnet_minutes: Option<i64>,
        sms: Option<i64>,
        #[serde(default)]
        tv_plus_included: bool,
    },
    HomePhone {
        title: String,
        onnet_minutes: Option<i64>,
        offnet_minutes: Option<i64>,
    },
    SimDevices {
        title: String,
        sims: Option<i64>,
        data_gb: Option<i64>,
        after_cap_kbps: Option<i64>,
    },
}

impl OfferComponent {
    pub fn title(&self) -> &str {
        match self {
            OfferComponent::Internet { title, .. }
            | OfferComponent::Tv { title, .. }
            | OfferComponent::Mobile { title, .. }
            | OfferComponent::HomePhone { title, .. }
            | OfferComponent::SimDevices { title, .. } => title,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OfferDetails {
    #[serde(default)]
    pub badges: Vec<String>,
    #[serde(default)]
    pub components: Vec<OfferComponent>,
    #[serde(default)]
    pub cust_order_items: Vec<OrderLineItem>,
}

/// Catalog entry. Edits never reach issued links until their snapshots are
/// refreshed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Offer {
    pub id: i64,
    pub title: String,
    pub bundle: String,
    pub price: Option<Decimal>,
    pub currency: Option<String>,
    pub details: OfferDetails,
    pub order_mapping: OrderMapping,
}

impl Offer {
    pub fn snapshot(&self) -> OfferSnapshot {
        OfferSnapshot {
            id: self.id,
            title: self.title.clone(),
            bundle: self.bundle.clone(),
            price: self.price,
            currency: self.currency.clone(),
            details: self.details.clone(),
            order_mapping: self.order_mapping.clone(),
        }
    }
}

/// Offer terms as shown to the customer when the link was issued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferSnapshot {
    pub id: i64,
    pub title: String,
    pub bundle: String,
    pub price: Option<Decimal>,
    pub currency: Option<String>,
    #[serde(default)]
    pub details: OfferDetails,
    #[serde(default)]
    pub order_mapping: OrderMapping,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AddressSnapshot {
    pub street_id: Option<i64>,
    pub house: Option<String>,
    pub flat: Option<String>,
    pub zip_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Link {
    pub id: i64,
    pub user_id: i64,
    pub offer_id: i64,
    pub external_id: Option<String>,
    pub token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    pub agreed_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub status: LinkStatus,
    pub offer_snapshot: OfferSnapshot,
    pub address: Option<AddressSnapshot>,
    pub order_result: Option<SubmissionRecord>,
}

impl Link {
    pub fn external_ref(&self) -> String {
        self.external_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("LNK-{}", self.id))
    }
}

#[derive(Debug, Clone)]
pub struct NewLink {
    pub user_id: i64,
    pub offer_id: i64,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub offer_snapshot: OfferSnapshot,
    pub address: Option<AddressSnapshot>,
}

/// Append-only audit row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsentRecord {
    pub id: i64,
    pub link_id: i64,
    pub consent_text: String,
    pub choice: Choice,
    pub created_at: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// What the requester sent along with a decision.
#[derive(Debug, Clone, Default)]
pub struct DecisionSource {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewConsent {
    pub link_id: i64,
    pub consent_text: String,
    pub choice: Choice,
    pub created_at: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl NewConsent {
    pub fn describe(link: &Link, choice: Choice, source: &DecisionSource, now: DateTime<Utc>) -> Self {
        let snapshot = &link.offer_snapshot;
        let at = now.to_rfc3339();
        let consent_text = match choice {
            Choice::Agreed => format!("Agreed to '{}' ({}) at {at}", snapshot.title, snapshot.bundle),
            Choice::Rejected => format!("Rejected '{}' ({}) at {at}", snapshot.title, snapshot.bundle),
        };

        Self {
            link_id: link.id,
            consent_text,
            choice,
            created_at: now,
            ip: source.ip.clone(),
            user_agent: source.user_agent.clone(),
        }
    }
}

/// Everything the order client needs for one link.
#[derive(Debug, Clone)]
pub struct OrderContext {
    pub link: Link,
    pub customer: Customer,
}

fn default_service_count() -> u32 {
    1
}
