use ulid::Ulid;

use crate::model::*;

use super::Store;

impl Store {
    /// Snapshot of every roll in FIFO order (article, then roll number).
    pub async fn rolls(&self) -> Vec<FabricRoll> {
        let shared: Vec<_> = self.rolls.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shared.len());
        for roll in shared {
            out.push(roll.read().await.clone());
        }
        out.sort_by(FabricRoll::fifo_cmp);
        out
    }

    pub async fn roll(&self, id: &Ulid) -> Option<FabricRoll> {
        let shared = self.shared_roll(id)?;
        let guard = shared.read().await;
        Some(guard.clone())
    }

    /// Rolls of one article in FIFO order.
    pub async fn rolls_for_article(&self, article: &str) -> Vec<FabricRoll> {
        let mut rolls = self.rolls().await;
        rolls.retain(|r| r.article == article);
        rolls
    }

    pub async fn overbooked_rolls(&self) -> Vec<FabricRoll> {
        let mut rolls = self.rolls().await;
        rolls.retain(FabricRoll::is_overbooked);
        rolls
    }

    /// Sum of reserved meters across every roll.
    pub async fn total_reserved_meters(&self) -> f64 {
        self.rolls().await.iter().map(|r| r.reserved_meters).sum()
    }

    pub fn roll_count(&self) -> usize {
        self.rolls.len()
    }

    /// Orders in id order; ULIDs make that creation order.
    pub fn orders(&self) -> Vec<OrderDocument> {
        let mut orders: Vec<OrderDocument> =
            self.orders.iter().map(|e| e.value().clone()).collect();
        orders.sort_by(|a, b| a.id.cmp(&b.id));
        orders
    }

    pub fn order(&self, id: &Ulid) -> Option<OrderDocument> {
        self.orders.get(id).map(|e| e.value().clone())
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// The order's recut subcollection in insertion order. Empty if none.
    pub fn recuts(&self, order_id: &Ulid) -> Vec<RecutRecord> {
        self.recuts
            .get(order_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }
}
