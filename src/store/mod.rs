mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use error::StoreError;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRoll = Arc<RwLock<FabricRoll>>;

/// An all-or-nothing write of several rolls' reservations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    pub writes: Vec<RollWrite>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `id`'s reservation to `reserved_meters`, provided it still reads
    /// `expected_reserved` at commit time.
    pub fn write(mut self, id: Ulid, expected_reserved: f64, reserved_meters: f64) -> Self {
        self.writes.push(RollWrite {
            id,
            expected_reserved,
            reserved_meters,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// What the inventory logic needs from a document store.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Every roll, in no particular order.
    async fn list_rolls(&self) -> Result<Vec<FabricRoll>, StoreError>;
    async fn get_roll(&self, id: Ulid) -> Result<Option<FabricRoll>, StoreError>;
    async fn list_orders(&self) -> Result<Vec<OrderDocument>, StoreError>;
    /// The recut subcollection of one order.
    async fn list_recuts(&self, order_id: Ulid) -> Result<Vec<RecutRecord>, StoreError>;
    async fn update_roll(&self, id: Ulid, patch: RollPatch) -> Result<(), StoreError>;
    async fn delete_roll(&self, id: Ulid) -> Result<(), StoreError>;
    /// Apply every write or none. Fails with `StoreError::Conflict` when a
    /// roll no longer holds its expected reservation.
    async fn commit(&self, txn: Transaction) -> Result<(), StoreError>;
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while one fsync runs share the next one.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_control(&mut wal, cmd);
            continue;
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so the partial batch does not leak
    // into the next one.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Apply a roll-scoped event to one roll (caller holds the lock).
fn apply_to_roll(roll: &mut FabricRoll, event: &Event) {
    match event {
        Event::RollUpdated {
            patch, edited_at, ..
        } => patch.apply(roll, *edited_at),
        Event::ReservationAdded { meters, .. } => roll.reserved_meters += meters,
        Event::ReservationsCommitted { writes } => {
            for w in writes.iter().filter(|w| w.id == roll.id) {
                roll.reserved_meters = w.reserved_meters;
            }
        }
        Event::RollAdded { .. }
        | Event::RollDeleted { .. }
        | Event::OrderPut { .. }
        | Event::OrderDeleted { .. }
        | Event::RecutAdded { .. } => {}
    }
}

/// WAL-backed document store for rolls, orders and recuts.
pub struct Store {
    pub(super) rolls: DashMap<Ulid, SharedRoll>,
    pub(super) orders: DashMap<Ulid, OrderDocument>,
    /// Order id → its recut subcollection.
    pub(super) recuts: DashMap<Ulid, Vec<RecutRecord>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Held shared by every mutation from WAL append to apply; compaction
    /// takes it exclusively so its snapshot matches the log.
    pub(super) gate: RwLock<()>,
    pub notify: Arc<NotifyHub>,
}

impl Store {
    /// Replay the WAL at `wal_path` and start its writer task.
    /// Must be called inside a tokio runtime.
    pub fn open(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut rolls: HashMap<Ulid, FabricRoll> = HashMap::new();
        let orders = DashMap::new();
        let recuts: DashMap<Ulid, Vec<RecutRecord>> = DashMap::new();

        for event in &replay.events {
            match event {
                Event::RollAdded { roll } => {
                    rolls.insert(roll.id, roll.clone());
                }
                Event::RollDeleted { id } => {
                    rolls.remove(id);
                }
                Event::RollUpdated { id, .. } | Event::ReservationAdded { roll_id: id, .. } => {
                    if let Some(roll) = rolls.get_mut(id) {
                        apply_to_roll(roll, event);
                    }
                }
                Event::ReservationsCommitted { writes } => {
                    for w in writes {
                        if let Some(roll) = rolls.get_mut(&w.id) {
                            roll.reserved_meters = w.reserved_meters;
                        }
                    }
                }
                Event::OrderPut { order } => {
                    orders.insert(order.id, order.clone());
                }
                Event::OrderDeleted { id } => {
                    orders.remove(id);
                    recuts.remove(id);
                }
                Event::RecutAdded { order_id, recut } => {
                    recuts.entry(*order_id).or_default().push(recut.clone());
                }
            }
        }

        tracing::info!(
            path = %wal_path.display(),
            events = replay.events.len(),
            rolls = rolls.len(),
            orders = orders.len(),
            "inventory store opened"
        );

        Ok(Self {
            rolls: rolls
                .into_iter()
                .map(|(id, roll)| (id, Arc::new(RwLock::new(roll))))
                .collect(),
            orders,
            recuts,
            wal_tx,
            gate: RwLock::new(()),
            notify,
        })
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    /// WAL-append, apply to the locked roll, then notify its article.
    pub(super) async fn persist_and_apply(
        &self,
        roll: &mut FabricRoll,
        event: &Event,
    ) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        apply_to_roll(roll, event);
        self.notify.send(&roll.article, event);
        Ok(())
    }

    pub(super) fn shared_roll(&self, id: &Ulid) -> Option<SharedRoll> {
        self.rolls.get(id).map(|e| e.value().clone())
    }
}

#[async_trait]
impl InventoryStore for Store {
    async fn list_rolls(&self) -> Result<Vec<FabricRoll>, StoreError> {
        Ok(self.rolls().await)
    }

    async fn get_roll(&self, id: Ulid) -> Result<Option<FabricRoll>, StoreError> {
        Ok(self.roll(&id).await)
    }

    async fn list_orders(&self) -> Result<Vec<OrderDocument>, StoreError> {
        Ok(self.orders())
    }

    async fn list_recuts(&self, order_id: Ulid) -> Result<Vec<RecutRecord>, StoreError> {
        Ok(self.recuts(&order_id))
    }

    async fn update_roll(&self, id: Ulid, patch: RollPatch) -> Result<(), StoreError> {
        self.edit_roll(id, patch).await.map(|_| ())
    }

    async fn delete_roll(&self, id: Ulid) -> Result<(), StoreError> {
        self.remove_roll(id).await
    }

    async fn commit(&self, txn: Transaction) -> Result<(), StoreError> {
        self.commit_transaction(txn).await
    }
}
