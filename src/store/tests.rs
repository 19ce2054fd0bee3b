use super::*;
use crate::limits::*;
use tokio_test::{assert_err, assert_ok};

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("swatch_test_store");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    let _ = std::fs::remove_file(path.with_extension("wal.compact"));
    path
}

fn open(path: &PathBuf) -> Store {
    Store::open(path.clone(), Arc::new(NotifyHub::new())).unwrap()
}

fn new_roll(article: &str, number: &str, total: f64) -> NewRoll {
    NewRoll {
        article: article.into(),
        roll_number: number.into(),
        supplier: "Tessiture Nord".into(),
        color: "ecru".into(),
        total_meters: total,
        ..Default::default()
    }
}

fn order(client: &str, code: &str, consumption: f64, quantity: f64) -> OrderDocument {
    OrderDocument {
        id: Ulid::new(),
        client: client.into(),
        fabric_code: code.into(),
        fabric_consumption: Some(consumption),
        ordered_quantity: Some(quantity),
        ..Default::default()
    }
}

fn recut(meters: f64, timestamp: Ms) -> RecutRecord {
    RecutRecord {
        id: Ulid::new(),
        meters,
        reason: Some("flaw".into()),
        timestamp: Some(timestamp),
    }
}

// ── Rolls ────────────────────────────────────────────────

#[tokio::test]
async fn add_roll_starts_unreserved() {
    let path = test_wal_path("add_roll.wal");
    let store = open(&path);

    let id = Ulid::new();
    let roll = store.add_roll(id, new_roll("LIN", "1", 40.0)).await.unwrap();
    assert_eq!(roll.reserved_meters, 0.0);
    assert_eq!(roll.available_meters(), 40.0);

    let fetched = store.roll(&id).await.unwrap();
    assert_eq!(fetched, roll);
    assert_eq!(store.roll_count(), 1);
}

#[tokio::test]
async fn add_roll_rejects_duplicates_and_bad_meters() {
    let path = test_wal_path("add_roll_invalid.wal");
    let store = open(&path);

    let id = Ulid::new();
    store.add_roll(id, new_roll("LIN", "1", 10.0)).await.unwrap();
    assert_eq!(
        store.add_roll(id, new_roll("LIN", "2", 10.0)).await,
        Err(StoreError::AlreadyExists(id))
    );
    assert_eq!(
        store.add_roll(Ulid::new(), new_roll("LIN", "3", -1.0)).await,
        Err(StoreError::InvalidQuantity("total meters"))
    );
    assert_eq!(
        store.add_roll(Ulid::new(), new_roll("LIN", "4", f64::NAN)).await,
        Err(StoreError::InvalidQuantity("total meters"))
    );
    assert_eq!(store.roll_count(), 1);
}

#[tokio::test]
async fn rolls_come_back_in_fifo_order() {
    let path = test_wal_path("fifo_order.wal");
    let store = open(&path);

    store.add_roll(Ulid::new(), new_roll("WOOL", "1", 5.0)).await.unwrap();
    store.add_roll(Ulid::new(), new_roll("LIN", "9", 5.0)).await.unwrap();
    store.add_roll(Ulid::new(), new_roll("LIN", "10", 5.0)).await.unwrap();

    let keys: Vec<(String, String)> = store
        .rolls()
        .await
        .into_iter()
        .map(|r| (r.article, r.roll_number))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("LIN".into(), "10".into()),
            ("LIN".into(), "9".into()),
            ("WOOL".into(), "1".into()),
        ]
    );
    assert_eq!(store.rolls_for_article("LIN").await.len(), 2);
}

#[tokio::test]
async fn edit_roll_may_overbook() {
    let path = test_wal_path("edit_overbook.wal");
    let store = open(&path);

    let id = Ulid::new();
    store.add_roll(id, new_roll("LIN", "1", 10.0)).await.unwrap();
    let edited = store
        .edit_roll(
            id,
            RollPatch {
                reserved_meters: Some(12.0),
                color: Some("navy".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(edited.reserved_meters, 12.0);
    assert_eq!(edited.color, "navy");
    assert!(edited.last_edited_at.is_some());
    assert!(edited.is_overbooked());
    assert_eq!(store.overbooked_rolls().await.len(), 1);
}

#[tokio::test]
async fn edit_missing_roll_is_not_found() {
    let path = test_wal_path("edit_missing.wal");
    let store = open(&path);

    let id = Ulid::new();
    assert_eq!(
        store.edit_roll(id, RollPatch::default()).await,
        Err(StoreError::NotFound(id))
    );
}

#[tokio::test]
async fn remove_roll_then_not_found() {
    let path = test_wal_path("remove_roll.wal");
    let store = open(&path);

    let id = Ulid::new();
    store.add_roll(id, new_roll("LIN", "1", 10.0)).await.unwrap();
    assert_ok!(store.remove_roll(id).await);
    assert!(store.roll(&id).await.is_none());
    assert_eq!(store.remove_roll(id).await, Err(StoreError::NotFound(id)));
}

#[tokio::test]
async fn reserve_meters_skips_capacity_check() {
    let path = test_wal_path("reserve_overbook.wal");
    let store = open(&path);

    let id = Ulid::new();
    store.add_roll(id, new_roll("LIN", "1", 10.0)).await.unwrap();
    store.reserve_meters(id, 6.0).await.unwrap();
    let roll = store.reserve_meters(id, 6.0).await.unwrap();

    assert_eq!(roll.reserved_meters, 12.0);
    assert_eq!(roll.available_meters(), -2.0);
    assert_eq!(store.total_reserved_meters().await, 12.0);
}

#[tokio::test]
async fn reserve_rejects_negative_meters() {
    let path = test_wal_path("reserve_negative.wal");
    let store = open(&path);

    let id = Ulid::new();
    store.add_roll(id, new_roll("LIN", "1", 10.0)).await.unwrap();
    assert_err!(store.reserve_meters(id, -1.0).await);
    assert_eq!(store.roll(&id).await.unwrap().reserved_meters, 0.0);
}

// ── Transactions ─────────────────────────────────────────

#[tokio::test]
async fn commit_applies_every_write() {
    let path = test_wal_path("commit_ok.wal");
    let store = open(&path);

    let (a, b) = (Ulid::new(), Ulid::new());
    store.add_roll(a, new_roll("LIN", "1", 10.0)).await.unwrap();
    store.add_roll(b, new_roll("LIN", "2", 10.0)).await.unwrap();
    store.reserve_meters(a, 12.0).await.unwrap();
    store.reserve_meters(b, 3.0).await.unwrap();

    let txn = Transaction::new().write(a, 12.0, 10.0).write(b, 3.0, 5.0);
    assert_ok!(store.commit_transaction(txn).await);

    assert_eq!(store.roll(&a).await.unwrap().reserved_meters, 10.0);
    assert_eq!(store.roll(&b).await.unwrap().reserved_meters, 5.0);
}

#[tokio::test]
async fn stale_expectation_conflicts_and_writes_nothing() {
    let path = test_wal_path("commit_conflict.wal");
    let store = open(&path);

    let (a, b) = (Ulid::new(), Ulid::new());
    store.add_roll(a, new_roll("LIN", "1", 10.0)).await.unwrap();
    store.add_roll(b, new_roll("LIN", "2", 10.0)).await.unwrap();
    store.reserve_meters(a, 12.0).await.unwrap();
    store.reserve_meters(b, 3.0).await.unwrap();
    let appends_before = store.wal_appends_since_compact().await;

    // b moved after the writer read it
    let txn = Transaction::new().write(a, 12.0, 10.0).write(b, 1.0, 3.0);
    let err = store.commit_transaction(txn).await.unwrap_err();
    assert_eq!(err, StoreError::Conflict(b));
    assert!(err.is_retryable());

    assert_eq!(store.roll(&a).await.unwrap().reserved_meters, 12.0);
    assert_eq!(store.roll(&b).await.unwrap().reserved_meters, 3.0);
    assert_eq!(store.wal_appends_since_compact().await, appends_before);
}

#[tokio::test]
async fn commit_with_missing_roll_writes_nothing() {
    let path = test_wal_path("commit_missing.wal");
    let store = open(&path);

    let a = Ulid::new();
    let ghost = Ulid::new();
    store.add_roll(a, new_roll("LIN", "1", 10.0)).await.unwrap();

    let txn = Transaction::new().write(a, 0.0, 4.0).write(ghost, 0.0, 1.0);
    let err = store.commit_transaction(txn).await.unwrap_err();
    assert_eq!(err, StoreError::NotFound(ghost));
    assert!(!err.is_retryable());
    assert_eq!(store.roll(&a).await.unwrap().reserved_meters, 0.0);
}

#[tokio::test]
async fn commit_rejects_duplicate_and_oversized_writes() {
    let path = test_wal_path("commit_shape.wal");
    let store = open(&path);

    let a = Ulid::new();
    store.add_roll(a, new_roll("LIN", "1", 10.0)).await.unwrap();

    let dup = Transaction::new().write(a, 0.0, 1.0).write(a, 0.0, 2.0);
    assert_eq!(store.commit_transaction(dup).await, Err(StoreError::DuplicateWrite(a)));

    let mut big = Transaction::new();
    for _ in 0..=MAX_TRANSACTION_WRITES {
        big = big.write(Ulid::new(), 0.0, 1.0);
    }
    assert_eq!(
        store.commit_transaction(big).await,
        Err(StoreError::LimitExceeded("transaction too large"))
    );

    assert_ok!(store.commit_transaction(Transaction::new()).await);
    assert_eq!(store.roll(&a).await.unwrap().reserved_meters, 0.0);
}

#[tokio::test]
async fn racing_commits_on_one_roll_admit_exactly_one() {
    let path = test_wal_path("commit_race.wal");
    let store = Arc::new(open(&path));

    let a = Ulid::new();
    store.add_roll(a, new_roll("LIN", "1", 10.0)).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let s = store.clone();
        handles.push(tokio::spawn(async move {
            s.commit_transaction(Transaction::new().write(a, 0.0, 1.0 + i as f64))
                .await
        }));
    }

    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(()) => ok += 1,
            Err(e) => assert_eq!(e, StoreError::Conflict(a)),
        }
    }
    assert_eq!(ok, 1);
}

#[tokio::test]
async fn store_commits_through_the_trait() {
    let path = test_wal_path("trait_commit.wal");
    let store = open(&path);
    let dyn_store: &dyn InventoryStore = &store;

    let a = Ulid::new();
    store.add_roll(a, new_roll("LIN", "1", 10.0)).await.unwrap();
    dyn_store
        .update_roll(
            a,
            RollPatch {
                reserved_meters: Some(4.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    dyn_store
        .commit(Transaction::new().write(a, 4.0, 2.0))
        .await
        .unwrap();

    let roll = dyn_store.get_roll(a).await.unwrap().unwrap();
    assert_eq!(roll.reserved_meters, 2.0);
    assert_eq!(dyn_store.list_rolls().await.unwrap().len(), 1);
    dyn_store.delete_roll(a).await.unwrap();
    assert!(dyn_store.get_roll(a).await.unwrap().is_none());
}

// ── Orders and recuts ────────────────────────────────────

#[tokio::test]
async fn orders_upsert_and_delete_with_recuts() {
    let path = test_wal_path("orders.wal");
    let store = open(&path);

    let mut o = order("Maison Blanc", "LIN", 1.5, 10.0);
    store.put_order(o.clone()).await.unwrap();
    o.ordered_quantity = Some(12.0);
    store.put_order(o.clone()).await.unwrap();
    assert_eq!(store.order_count(), 1);
    assert_eq!(store.order(&o.id).unwrap().ordered_quantity, Some(12.0));

    store.add_recut(o.id, recut(2.0, 200)).await.unwrap();
    store.add_recut(o.id, recut(1.0, 100)).await.unwrap();
    assert_eq!(store.recuts(&o.id).len(), 2);

    store.delete_order(o.id).await.unwrap();
    assert!(store.order(&o.id).is_none());
    assert!(store.recuts(&o.id).is_empty());
    assert_eq!(store.delete_order(o.id).await, Err(StoreError::NotFound(o.id)));
}

#[tokio::test]
async fn recut_needs_an_order() {
    let path = test_wal_path("recut_orphan.wal");
    let store = open(&path);

    let missing = Ulid::new();
    assert_eq!(
        store.add_recut(missing, recut(1.0, 0)).await,
        Err(StoreError::NotFound(missing))
    );
}

#[tokio::test]
async fn order_with_negative_quantity_is_rejected() {
    let path = test_wal_path("order_invalid.wal");
    let store = open(&path);

    let bad = order("X", "LIN", -0.5, 10.0);
    assert_eq!(
        store.put_order(bad).await,
        Err(StoreError::InvalidQuantity("order quantity"))
    );
    assert_eq!(store.order_count(), 0);
}

#[tokio::test]
async fn text_limits_are_enforced() {
    let path = test_wal_path("text_limits.wal");
    let store = open(&path);

    let long_article = "A".repeat(MAX_ARTICLE_LEN + 1);
    assert_eq!(
        store.add_roll(Ulid::new(), new_roll(&long_article, "1", 1.0)).await,
        Err(StoreError::LimitExceeded("article too long"))
    );
    assert_eq!(
        store.add_roll(Ulid::new(), new_roll("LIN", "1", MAX_METERS * 2.0)).await,
        Err(StoreError::LimitExceeded("total meters"))
    );
}

// ── WAL replay and compaction ────────────────────────────

#[tokio::test]
async fn state_survives_restart() {
    let path = test_wal_path("restart.wal");
    let (a, b, gone) = (Ulid::new(), Ulid::new(), Ulid::new());
    let o = order("Atelier Sud", "LIN", 2.0, 3.0);

    {
        let store = open(&path);
        store.add_roll(a, new_roll("LIN", "1", 10.0)).await.unwrap();
        store.add_roll(b, new_roll("LIN", "2", 10.0)).await.unwrap();
        store.add_roll(gone, new_roll("LIN", "3", 10.0)).await.unwrap();
        store.reserve_meters(a, 12.0).await.unwrap();
        store
            .commit_transaction(Transaction::new().write(a, 12.0, 10.0).write(b, 0.0, 2.0))
            .await
            .unwrap();
        store.remove_roll(gone).await.unwrap();
        store.put_order(o.clone()).await.unwrap();
        store.add_recut(o.id, recut(1.5, 10)).await.unwrap();
    }

    let store = open(&path);
    assert_eq!(store.roll_count(), 2);
    assert_eq!(store.roll(&a).await.unwrap().reserved_meters, 10.0);
    assert_eq!(store.roll(&b).await.unwrap().reserved_meters, 2.0);
    assert!(store.roll(&gone).await.is_none());
    assert_eq!(store.order(&o.id), Some(o.clone()));
    assert_eq!(store.recuts(&o.id).len(), 1);
}

#[tokio::test]
async fn group_commit_batches_appends() {
    let path = test_wal_path("group_commit.wal");
    let store = Arc::new(open(&path));

    let n = 20;
    let mut handles = Vec::new();
    for i in 0..n {
        let s = store.clone();
        handles.push(tokio::spawn(async move {
            s.add_roll(Ulid::new(), new_roll("LIN", &format!("{i}"), 10.0))
                .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(store.roll_count(), n);

    let replayed = open(&path);
    assert_eq!(replayed.roll_count(), n);
}

#[tokio::test]
async fn compact_preserves_state_across_restart() {
    let path = test_wal_path("compact_restart.wal");
    let keep = Ulid::new();
    let o = order("Atelier Sud", "LIN", 2.0, 3.0);

    {
        let store = open(&path);
        store.add_roll(keep, new_roll("LIN", "1", 10.0)).await.unwrap();
        for _ in 0..20 {
            let tmp = Ulid::new();
            store.add_roll(tmp, new_roll("LIN", "99", 1.0)).await.unwrap();
            store.remove_roll(tmp).await.unwrap();
        }
        store.reserve_meters(keep, 4.0).await.unwrap();
        store.put_order(o.clone()).await.unwrap();
        store.add_recut(o.id, recut(0.5, 1)).await.unwrap();

        let before = std::fs::metadata(&path).unwrap().len();
        store.compact_wal().await.unwrap();
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL ({after}) should be smaller than {before}");
        assert_eq!(store.wal_appends_since_compact().await, 0);

        store.reserve_meters(keep, 1.0).await.unwrap();
        assert_eq!(store.wal_appends_since_compact().await, 1);
    }

    let store = open(&path);
    assert_eq!(store.roll_count(), 1);
    assert_eq!(store.roll(&keep).await.unwrap().reserved_meters, 5.0);
    assert_eq!(store.order(&o.id), Some(o.clone()));
    assert_eq!(store.recuts(&o.id).len(), 1);
}

#[tokio::test]
async fn mutations_notify_article_subscribers() {
    let path = test_wal_path("notify.wal");
    let store = open(&path);
    let mut lin = store.notify.subscribe("LIN");
    let mut wool = store.notify.subscribe("WOOL");

    let id = Ulid::new();
    store.add_roll(id, new_roll("LIN", "1", 10.0)).await.unwrap();
    store.reserve_meters(id, 2.0).await.unwrap();

    assert!(matches!(lin.recv().await.unwrap(), Event::RollAdded { .. }));
    assert_eq!(
        lin.recv().await.unwrap(),
        Event::ReservationAdded {
            roll_id: id,
            meters: 2.0
        }
    );
    assert!(wool.try_recv().is_err());
}
