//! The read paths the surrounding application calls.

use futures::future::try_join_all;
use serde::Serialize;

use crate::allocator::{allocate, RollIndex};
use crate::demand::{cut_summary, demands_from_orders, CutSummary};
use crate::healer::{HealError, HealPolicy, HealReport, Healer};
use crate::model::*;
use crate::observability::OVERBOOKED_ROLLS;
use crate::store::{InventoryStore, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryRow {
    #[serde(flatten)]
    pub roll: FabricRoll,
    pub available_meters: f64,
    pub status: StockStatus,
}

impl InventoryRow {
    fn new(roll: FabricRoll, low_stock: f64) -> Self {
        Self {
            available_meters: roll.available_meters(),
            status: roll.stock_status(low_stock),
            roll,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InventoryView {
    /// Sorted by article, then roll number.
    pub rows: Vec<InventoryRow>,
    pub heal: HealReport,
}

impl InventoryView {
    pub fn overbooked(&self) -> impl Iterator<Item = &InventoryRow> {
        self.rows
            .iter()
            .filter(|r| r.status == StockStatus::Overbooked)
    }
}

/// Heal, then read the corrected rolls back for display.
pub async fn refresh_inventory<S: InventoryStore + ?Sized>(
    store: &S,
    policy: &HealPolicy,
    low_stock: f64,
) -> Result<InventoryView, HealError> {
    let heal = Healer::new(store, policy.clone()).heal().await?;

    let mut rolls = store.list_rolls().await?;
    rolls.sort_by(FabricRoll::fifo_cmp);
    let rows: Vec<InventoryRow> = rolls
        .into_iter()
        .map(|roll| InventoryRow::new(roll, low_stock))
        .collect();

    let view = InventoryView { rows, heal };
    metrics::gauge!(OVERBOOKED_ROLLS).set(view.overbooked().count() as f64);
    Ok(view)
}

/// Allocation of every order's demand over the current rolls, in order
/// sequence.
pub async fn reservation_lines<S: InventoryStore + ?Sized>(
    store: &S,
) -> Result<Vec<AllocationLineItem>, StoreError> {
    let orders = store.list_orders().await?;
    let rolls = store.list_rolls().await?;
    let index = RollIndex::from_rolls(&rolls);
    Ok(allocate(&demands_from_orders(&orders), &index))
}

/// First cut and recuts for every order already past cutting.
pub async fn cut_report<S: InventoryStore + ?Sized>(store: &S) -> Result<Vec<CutSummary>, StoreError> {
    let mut orders = store.list_orders().await?;
    orders.retain(OrderDocument::is_cut);
    let recuts = try_join_all(orders.iter().map(|o| store.list_recuts(o.id))).await?;
    Ok(orders
        .iter()
        .zip(recuts)
        .map(|(order, recuts)| cut_summary(order, recuts))
        .collect())
}
