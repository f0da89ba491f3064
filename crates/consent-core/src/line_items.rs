use std::collections::BTreeMap;

use thiserror::Error;

use crate::models::OrderLineItem;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LineItemError {
    #[error("malformed line item field name: {0}")]
    MalformedField(String),
    #[error("unknown line item field: {0}")]
    UnknownField(String),
    #[error("line item {index} sets {field} more than once")]
    DuplicateField { index: usize, field: String },
    #[error("line item {index} field {field} must be a whole number, got {value:?}")]
    NotANumber {
        index: usize,
        field: String,
        value: String,
    },
    #[error("line item indices must be contiguous from 0, missing {0}")]
    MissingIndex(usize),
}

/// Parses `items[<index>][<field>]` form pairs into line items ordered by
/// index. Pairs whose name does not start with `items[` are ignored.
pub fn parse_line_items<'a, I>(pairs: I) -> Result<Vec<OrderLineItem>, LineItemError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut rows: BTreeMap<usize, BTreeMap<String, String>> = BTreeMap::new();

    for (name, value) in pairs {
        let Some(rest) = name.strip_prefix("items[") else {
            continue;
        };
        let (index, field) = split_indexed_name(rest)
            .ok_or_else(|| LineItemError::MalformedField(name.to_string()))?;

        let row = rows.entry(index).or_default();
        if row.insert(field.to_string(), value.trim().to_string()).is_some() {
            return Err(LineItemError::DuplicateField {
                index,
                field: field.to_string(),
            });
        }
    }

    let mut items = Vec::with_capacity(rows.len());
    for (expected, (index, fields)) in rows.into_iter().enumerate() {
        if index != expected {
            return Err(LineItemError::MissingIndex(expected));
        }
        items.push(line_item_from_fields(index, fields)?);
    }

    Ok(items)
}

// "3][product_num]" -> (3, "product_num")
fn split_indexed_name(rest: &str) -> Option<(usize, &str)> {
    let (index, tail) = rest.split_once("][")?;
    if index.is_empty() || !index.chars().all(|character| character.is_ascii_digit()) {
        return None;
    }
    let field = tail.strip_suffix(']')?;
    if field.is_empty() || field.contains(['[', ']']) {
        return None;
    }
    Some((index.parse().ok()?, field))
}

fn line_item_from_fields(
    index: usize,
    fields: BTreeMap<String, String>,
) -> Result<OrderLineItem, LineItemError> {
    let mut item = OrderLineItem {
        product_offer_struct_id: None,
        product_num: None,
        resource_spec_id: None,
        po_struct_element_id: None,
        service_count: 1,
    };

    for (field, value) in fields {
        if value.is_empty() {
            continue;
        }
        match field.as_str() {
            "product_offer_struct_id" => {
                item.product_offer_struct_id = Some(parse_number(index, &field, &value)?)
            }
            "resource_spec_id" => item.resource_spec_id = Some(parse_number(index, &field, &value)?),
            "po_struct_element_id" => {
                item.po_struct_element_id = Some(parse_number(index, &field, &value)?)
            }
            "product_num" => item.product_num = Some(value),
            "service_count" => item.service_count = parse_number(index, &field, &value)?,
            _ => return Err(LineItemError::UnknownField(field)),
        }
    }

    Ok(item)
}

fn parse_number<T: std::str::FromStr>(
    index: usize,
    field: &str,
    value: &str,
) -> Result<T, LineItemError> {
    value.parse().map_err(|_| LineItemError::NotANumber {
        index,
        field: field.to_string(),
        value: value.to_string(),
    })
}
