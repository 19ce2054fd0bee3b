use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{now_ms, Store, StoreError, Transaction, WalCommand};

fn validate_meters(value: f64, what: &'static str) -> Result<(), StoreError> {
    if !value.is_finite() || value < 0.0 {
        return Err(StoreError::InvalidQuantity(what));
    }
    if value > MAX_METERS {
        return Err(StoreError::LimitExceeded(what));
    }
    Ok(())
}

fn validate_text(value: &str, max: usize, what: &'static str) -> Result<(), StoreError> {
    if value.len() > max {
        return Err(StoreError::LimitExceeded(what));
    }
    Ok(())
}

impl Store {
    /// After taking a roll's lock: the roll may have been deleted while we waited.
    fn ensure_live(&self, id: &Ulid) -> Result<(), StoreError> {
        if self.rolls.contains_key(id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(*id))
        }
    }

    pub async fn add_roll(&self, id: Ulid, new: NewRoll) -> Result<FabricRoll, StoreError> {
        if self.rolls.len() >= MAX_ROLLS {
            return Err(StoreError::LimitExceeded("too many rolls"));
        }
        validate_text(&new.article, MAX_ARTICLE_LEN, "article too long")?;
        validate_text(&new.roll_number, MAX_ROLL_NUMBER_LEN, "roll number too long")?;
        validate_text(&new.supplier, MAX_TEXT_LEN, "supplier too long")?;
        validate_text(&new.color, MAX_TEXT_LEN, "color too long")?;
        validate_text(&new.description, MAX_TEXT_LEN, "description too long")?;
        validate_meters(new.total_meters, "total meters")?;
        if self.rolls.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }

        let roll = FabricRoll::new(id, new);
        let event = Event::RollAdded { roll: roll.clone() };
        let _gate = self.gate.read().await;
        self.wal_append(&event).await?;
        self.rolls.insert(id, Arc::new(RwLock::new(roll.clone())));
        self.notify.send(&roll.article, &event);
        Ok(roll)
    }

    /// Direct edit. Pushing `reserved_meters` past `total_meters` is allowed.
    pub async fn edit_roll(&self, id: Ulid, patch: RollPatch) -> Result<FabricRoll, StoreError> {
        if let Some(total) = patch.total_meters {
            validate_meters(total, "total meters")?;
        }
        if let Some(reserved) = patch.reserved_meters {
            validate_meters(reserved, "reserved meters")?;
        }
        if let Some(color) = &patch.color {
            validate_text(color, MAX_TEXT_LEN, "color too long")?;
        }
        if let Some(description) = &patch.description {
            validate_text(description, MAX_TEXT_LEN, "description too long")?;
        }
        let roll = self.shared_roll(&id).ok_or(StoreError::NotFound(id))?;
        let _gate = self.gate.read().await;
        let mut guard = roll.write().await;
        self.ensure_live(&id)?;

        let event = Event::RollUpdated {
            id,
            patch,
            edited_at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.clone())
    }

    pub async fn remove_roll(&self, id: Ulid) -> Result<(), StoreError> {
        let roll = self.shared_roll(&id).ok_or(StoreError::NotFound(id))?;
        let _gate = self.gate.read().await;
        let guard = roll.write().await;
        self.ensure_live(&id)?;

        let event = Event::RollDeleted { id };
        self.wal_append(&event).await?;
        self.rolls.remove(&id);
        self.notify.send(&guard.article, &event);
        self.notify.prune(&guard.article);
        Ok(())
    }

    /// An external reservation increment. Never checks capacity: a roll may
    /// end up overbooked and is repaired by the next heal pass.
    pub async fn reserve_meters(&self, roll_id: Ulid, meters: f64) -> Result<FabricRoll, StoreError> {
        validate_meters(meters, "reservation")?;
        let roll = self
            .shared_roll(&roll_id)
            .ok_or(StoreError::NotFound(roll_id))?;
        let _gate = self.gate.read().await;
        let mut guard = roll.write().await;
        self.ensure_live(&roll_id)?;
        if guard.reserved_meters + meters > MAX_METERS {
            return Err(StoreError::LimitExceeded("reservation"));
        }

        let event = Event::ReservationAdded { roll_id, meters };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.clone())
    }

    /// All-or-nothing reservation write across several rolls.
    ///
    /// Locks are taken in id order. Every precondition is checked before the
    /// single WAL record is appended, so a failure writes nothing.
    pub async fn commit_transaction(&self, txn: Transaction) -> Result<(), StoreError> {
        if txn.is_empty() {
            return Ok(());
        }
        if txn.writes.len() > MAX_TRANSACTION_WRITES {
            return Err(StoreError::LimitExceeded("transaction too large"));
        }
        let mut ids = BTreeSet::new();
        for w in &txn.writes {
            validate_meters(w.reserved_meters, "reserved meters")?;
            if !ids.insert(w.id) {
                return Err(StoreError::DuplicateWrite(w.id));
            }
        }

        let _gate = self.gate.read().await;
        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            let roll = self.shared_roll(id).ok_or(StoreError::NotFound(*id))?;
            guards.push(roll.write_owned().await);
            self.ensure_live(id)?;
        }

        for w in &txn.writes {
            let guard = guards
                .iter()
                .find(|g| g.id == w.id)
                .ok_or(StoreError::NotFound(w.id))?;
            if (guard.reserved_meters - w.expected_reserved).abs() > METERS_EPSILON {
                return Err(StoreError::Conflict(w.id));
            }
        }

        let event = Event::ReservationsCommitted { writes: txn.writes };
        self.wal_append(&event).await?;

        let mut articles = BTreeSet::new();
        for guard in guards.iter_mut() {
            super::apply_to_roll(guard, &event);
            articles.insert(guard.article.clone());
        }
        for article in &articles {
            self.notify.send(article, &event);
        }
        Ok(())
    }

    /// Insert or replace an order document.
    pub async fn put_order(&self, order: OrderDocument) -> Result<(), StoreError> {
        if !self.orders.contains_key(&order.id) && self.orders.len() >= MAX_ORDERS {
            return Err(StoreError::LimitExceeded("too many orders"));
        }
        validate_text(&order.client, MAX_TEXT_LEN, "client too long")?;
        validate_text(&order.fabric_code, MAX_ARTICLE_LEN, "fabric code too long")?;
        validate_text(&order.fabric_description, MAX_TEXT_LEN, "fabric description too long")?;
        for value in [
            order.fabric_consumption,
            order.ordered_quantity,
            order.actual_consumed_meters,
            order.actual_cut_meters,
        ]
        .into_iter()
        .flatten()
        {
            validate_meters(value, "order quantity")?;
        }
        for assigned in &order.assigned_rolls {
            validate_text(&assigned.roll_number, MAX_ROLL_NUMBER_LEN, "roll number too long")?;
            validate_meters(assigned.reserved, "assigned roll reservation")?;
        }

        let event = Event::OrderPut {
            order: order.clone(),
        };
        let _gate = self.gate.read().await;
        self.wal_append(&event).await?;
        self.orders.insert(order.id, order);
        Ok(())
    }

    /// Delete an order together with its recuts.
    pub async fn delete_order(&self, id: Ulid) -> Result<(), StoreError> {
        if !self.orders.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        let event = Event::OrderDeleted { id };
        let _gate = self.gate.read().await;
        self.wal_append(&event).await?;
        self.orders.remove(&id);
        self.recuts.remove(&id);
        Ok(())
    }

    pub async fn add_recut(&self, order_id: Ulid, recut: RecutRecord) -> Result<(), StoreError> {
        if !self.orders.contains_key(&order_id) {
            return Err(StoreError::NotFound(order_id));
        }
        validate_meters(recut.meters, "recut meters")?;
        if let Some(reason) = &recut.reason {
            validate_text(reason, MAX_TEXT_LEN, "recut reason too long")?;
        }
        let existing = self.recuts.get(&order_id).map_or(0, |r| r.len());
        if existing >= MAX_RECUTS_PER_ORDER {
            return Err(StoreError::LimitExceeded("too many recuts on order"));
        }

        let event = Event::RecutAdded {
            order_id,
            recut: recut.clone(),
        };
        let _gate = self.gate.read().await;
        self.wal_append(&event).await?;
        self.recuts.entry(order_id).or_default().push(recut);
        Ok(())
    }

    /// Rewrite the WAL with just the events that recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let _gate = self.gate.write().await;

        let mut rolls = Vec::with_capacity(self.rolls.len());
        let shared: Vec<_> = self.rolls.iter().map(|e| e.value().clone()).collect();
        for roll in shared {
            rolls.push(roll.read().await.clone());
        }
        rolls.sort_by(|a, b| a.id.cmp(&b.id));

        let mut orders: Vec<OrderDocument> = self.orders.iter().map(|e| e.value().clone()).collect();
        orders.sort_by(|a, b| a.id.cmp(&b.id));

        let mut events = Vec::with_capacity(rolls.len() + orders.len());
        events.extend(rolls.into_iter().map(|roll| Event::RollAdded { roll }));
        for order in orders {
            let order_id = order.id;
            events.push(Event::OrderPut { order });
            if let Some(recuts) = self.recuts.get(&order_id) {
                events.extend(recuts.iter().map(|recut| Event::RecutAdded {
                    order_id,
                    recut: recut.clone(),
                }));
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
