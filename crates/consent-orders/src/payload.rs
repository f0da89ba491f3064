use chrono::{DateTime, Utc};
use consent_core::{AddressSnapshot, OrderContext, OrderLineItem};
use serde::Serialize;

pub const DEFAULT_FILIAL_ID: i64 = 17;
pub const SALES_CHANNEL_ID: i64 = 1;
const PO_COMPONENT_ID: i64 = -1;
const ACTION_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.000";

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct OrderPayload {
    pub filial_id: i64,
    pub customer_account_id: Option<i64>,
    pub sales_channel_id: i64,
    pub external_id: String,
    pub product_offer_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<OrderAddress>,
    pub cust_order_items: Vec<CustOrderItem>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct OrderAddress {
    pub street_id: Option<i64>,
    pub house: Option<String>,
    pub flat: Option<String>,
    pub zip_code: Option<String>,
}

impl From<&AddressSnapshot> for OrderAddress {
    fn from(address: &AddressSnapshot) -> Self {
        Self {
            street_id: address.street_id,
            house: address.house.clone(),
            flat: address.flat.clone(),
            zip_code: address.zip_code.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CustOrderItem {
    pub external_id: String,
    pub order_num: u32,
    pub po_component_id: i64,
    pub product_offer_struct_id: Option<i64>,
    pub product_num: Option<String>,
    pub resource_spec_id: Option<i64>,
    pub service_count: u32,
    pub po_struct_elements: Vec<PoStructElement>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PoStructElement {
    pub po_struct_element_id: Option<i64>,
    pub action_date: String,
    pub service_count: u32,
}

/// Maps an agreed link onto the order API's payload. Only the link's frozen
/// snapshot is read, never the live catalog.
pub fn build_order_payload(context: &OrderContext, action_date: DateTime<Utc>) -> OrderPayload {
    let link = &context.link;
    let snapshot = &link.offer_snapshot;
    let external_id = link.external_ref();
    let action_date = action_date.format(ACTION_DATE_FORMAT).to_string();

    let line_items = if snapshot.details.cust_order_items.is_empty() {
        vec![OrderLineItem::from_mapping(&snapshot.order_mapping)]
    } else {
        snapshot.details.cust_order_items.clone()
    };

    let cust_order_items = line_items
        .into_iter()
        .zip(1u32..)
        .map(|(item, order_num)| CustOrderItem {
            external_id: format!("{external_id}-{order_num}"),
            order_num,
            po_component_id: PO_COMPONENT_ID,
            product_offer_struct_id: item.product_offer_struct_id,
            product_num: item.product_num,
            resource_spec_id: item.resource_spec_id,
            service_count: item.service_count,
            po_struct_elements: vec![PoStructElement {
                po_struct_element_id: item.po_struct_element_id,
                action_date: action_date.clone(),
                service_count: item.service_count,
            }],
        })
        .collect();

    OrderPayload {
        filial_id: context.customer.filial_id.unwrap_or(DEFAULT_FILIAL_ID),
        customer_account_id: context.customer.customer_account_id,
        sales_channel_id: SALES_CHANNEL_ID,
        external_id,
        product_offer_id: snapshot.order_mapping.product_offer_id,
        address: link.address.as_ref().map(OrderAddress::from),
        cust_order_items,
    }
}
