//! Turning loosely shaped order documents into demand.
//!
//! Documents arrive with field names in more than one spelling and with
//! quantities as numbers, numeric strings or not at all. A missing,
//! unreadable or negative quantity counts as zero so allocation stays
//! total-preserving.

use serde_json::Value;
use ulid::Ulid;

use crate::model::*;

const CLIENT_KEYS: &[&str] = &["Client Name", "clientName", "Client", "client"];
const FABRIC_CODE_KEYS: &[&str] = &["Fabric Code", "fabricCode"];
const DESCRIPTION_KEYS: &[&str] = &["Fabric Description", "fabricDescription"];
const CONSUMPTION_KEYS: &[&str] = &["Fabric Consumption", "fabricConsumption"];
const QUANTITY_KEYS: &[&str] = &["Ordered Quantity", "orderedQuantity"];
const ORDER_DATE_KEYS: &[&str] = &["Order Date", "Reservation Date", "reservationDate", "orderDate"];
const ASSIGNED_ROLLS_KEYS: &[&str] = &["Assigned Rolls", "assignedRolls"];
const CONSUMED_KEYS: &[&str] = &["actualConsumedMeters", "actualConsumed"];
const CUT_KEYS: &[&str] = &["actualCutMeters"];
const STATUS_KEYS: &[&str] = &["Status", "status"];
const CUT_DATE_KEYS: &[&str] = &["cutDate", "Cut Date", "cuttingDate", "cut_date", "dateCut"];
const ROLL_NUMBER_KEYS: &[&str] = &["RollNumber", "Roll #"];

/// First key present with a usable value.
fn field<'a>(doc: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| doc.get(*k))
        .find(|v| !v.is_null() && v.as_str() != Some(""))
}

fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (n.is_finite() && n >= 0.0).then_some(n)
}

fn meters(doc: &Value, keys: &[&str]) -> Option<f64> {
    field(doc, keys).and_then(number)
}

fn text(doc: &Value, keys: &[&str]) -> String {
    match field(doc, keys) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn optional_text(doc: &Value, keys: &[&str]) -> Option<String> {
    Some(text(doc, keys)).filter(|t| !t.is_empty())
}

fn millis(value: &Value) -> Option<Ms> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as Ms)),
        Value::String(s) => s.trim().parse::<Ms>().ok(),
        _ => None,
    }
}

/// A roll document. Missing quantities read as zero.
pub fn parse_roll(id: Ulid, doc: &Value) -> FabricRoll {
    FabricRoll {
        id,
        article: text(doc, &["article"]),
        roll_number: text(doc, &["rollNumber"]),
        supplier: text(doc, &["supplier"]),
        color: text(doc, &["color"]),
        description: text(doc, &["description"]),
        total_meters: meters(doc, &["totalMeters"]).unwrap_or(0.0),
        reserved_meters: meters(doc, &["reservedMeters"]).unwrap_or(0.0),
        last_edited_at: field(doc, &["lastEditedAt"]).and_then(millis),
    }
}

pub fn parse_order(id: Ulid, doc: &Value) -> OrderDocument {
    let assigned_rolls = field(doc, ASSIGNED_ROLLS_KEYS)
        .and_then(Value::as_array)
        .map(|rolls| {
            rolls
                .iter()
                .map(|r| AssignedRoll {
                    roll_number: text(r, &["rollNumber"]),
                    reserved: meters(r, &["reserved"]).unwrap_or(0.0),
                })
                .collect()
        })
        .unwrap_or_default();

    OrderDocument {
        id,
        client: text(doc, CLIENT_KEYS),
        fabric_code: text(doc, FABRIC_CODE_KEYS),
        fabric_description: text(doc, DESCRIPTION_KEYS),
        fabric_consumption: meters(doc, CONSUMPTION_KEYS),
        ordered_quantity: meters(doc, QUANTITY_KEYS),
        order_date: optional_text(doc, ORDER_DATE_KEYS),
        assigned_rolls,
        actual_consumed_meters: meters(doc, CONSUMED_KEYS),
        actual_cut_meters: meters(doc, CUT_KEYS),
        status: optional_text(doc, STATUS_KEYS),
        cut_date: optional_text(doc, CUT_DATE_KEYS),
        roll_number: optional_text(doc, ROLL_NUMBER_KEYS),
    }
}

pub fn parse_recut(id: Ulid, doc: &Value) -> RecutRecord {
    RecutRecord {
        id,
        meters: meters(doc, &["meters"]).unwrap_or(0.0),
        reason: optional_text(doc, &["reason"]),
        timestamp: field(doc, &["timestamp", "date"]).and_then(millis),
    }
}

/// Demand implied by a set of orders, in order.
///
/// An order naming rolls yields one pre-assigned demand per roll, carrying
/// that roll's meters. Otherwise the order yields one demand of
/// `fabric_consumption × ordered_quantity`.
pub fn demands_from_orders(orders: &[OrderDocument]) -> Vec<DemandRecord> {
    let mut demands = Vec::with_capacity(orders.len());
    for order in orders {
        let base = DemandRecord {
            order_id: order.id,
            client: order.client.clone(),
            article: order.fabric_code.clone(),
            reserved: (order.fabric_consumption.unwrap_or(0.0) * order.ordered_quantity.unwrap_or(0.0))
                .max(0.0),
            assigned_roll: None,
            order_date: order.order_date.clone(),
        };
        if order.assigned_rolls.is_empty() {
            demands.push(base);
            continue;
        }
        for assigned in &order.assigned_rolls {
            demands.push(DemandRecord {
                reserved: assigned.reserved,
                assigned_roll: Some(assigned.roll_number.clone()),
                ..base.clone()
            });
        }
    }
    demands
}

/// How an order's cut breaks down into the first cut and later recuts.
#[derive(Debug, Clone, PartialEq)]
pub struct CutSummary {
    pub order_id: Ulid,
    pub client: String,
    pub fabric_code: String,
    /// First assigned roll, else the roll recorded on the order.
    pub roll_number: Option<String>,
    pub cut_date: Option<String>,
    /// Everything cut for the order, recuts included. `None` if never recorded.
    pub total_cut: Option<f64>,
    pub initial_cut: Option<f64>,
    pub recut_meters: f64,
    /// Oldest first; recuts without a timestamp lead.
    pub recuts: Vec<RecutRecord>,
}

pub fn cut_summary(order: &OrderDocument, mut recuts: Vec<RecutRecord>) -> CutSummary {
    recuts.sort_by_key(|r| r.timestamp.unwrap_or(0));
    let total_cut = order
        .actual_consumed_meters
        .filter(|m| *m > 0.0)
        .or(order.actual_cut_meters.filter(|m| *m > 0.0));
    let recut_meters: f64 = recuts.iter().map(|r| r.meters).sum();

    CutSummary {
        order_id: order.id,
        client: order.client.clone(),
        fabric_code: order.fabric_code.clone(),
        roll_number: order
            .assigned_rolls
            .first()
            .map(|r| r.roll_number.clone())
            .filter(|n| !n.is_empty())
            .or_else(|| order.roll_number.clone()),
        cut_date: order.cut_date.clone(),
        total_cut,
        initial_cut: total_cut.map(|t| t - recut_meters),
        recut_meters,
        recuts,
    }
}
