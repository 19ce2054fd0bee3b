use std::io;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::EngineConfig;
use crate::healer::{HealPolicy, Healer};
use crate::notify::NotifyHub;
use crate::observability::WAL_COMPACTIONS_TOTAL;
use crate::store::Store;

/// Background task that re-heals the inventory after concurrent writers.
pub async fn run_healer(store: Arc<Store>, policy: HealPolicy, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match Healer::new(store.as_ref(), policy.clone()).heal().await {
            Ok(report) if !report.conflicts.is_empty() => {
                tracing::warn!("{} transfers left for the next heal", report.conflicts.len());
            }
            Ok(_) => {}
            Err(e) => tracing::error!("background heal failed: {e}"),
        }
    }
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(store: Arc<Store>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let appends = store.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match store.compact_wal().await {
            Ok(()) => {
                info!("compacted WAL after {appends} appends");
                metrics::counter!(WAL_COMPACTIONS_TOTAL).increment(1);
            }
            Err(e) => tracing::error!("WAL compaction failed: {e}"),
        }
    }
}

/// Open the store under the configured data dir and start both loops.
/// Must be called inside a tokio runtime.
pub fn launch(config: &EngineConfig) -> io::Result<Arc<Store>> {
    std::fs::create_dir_all(&config.data_dir)?;
    crate::observability::init(config.metrics_port).map_err(|e| io::Error::other(e.to_string()))?;
    let store = Arc::new(Store::open(config.wal_path(), Arc::new(NotifyHub::new()))?);

    tokio::spawn(run_healer(store.clone(), config.heal.clone(), config.heal_interval));
    tokio::spawn(run_compactor(
        store.clone(),
        config.compact_threshold,
        config.heal_interval,
    ));

    info!("swatch store at {}", config.wal_path().display());
    info!("  heal every {:?}, policy {:?}", config.heal_interval, config.heal);
    info!("  compact after {} appends", config.compact_threshold);
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("swatch_test_maintenance").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn lin(number: &str, total: f64) -> NewRoll {
        NewRoll {
            article: "LIN".into(),
            roll_number: number.into(),
            total_meters: total,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn background_healer_repairs_new_overbooking() {
        let config = EngineConfig {
            data_dir: test_data_dir("healer"),
            heal_interval: Duration::from_millis(20),
            ..Default::default()
        };
        let store = launch(&config).unwrap();

        let (a, b) = (Ulid::new(), Ulid::new());
        store.add_roll(a, lin("1", 10.0)).await.unwrap();
        store.add_roll(b, lin("2", 10.0)).await.unwrap();
        store.reserve_meters(a, 12.0).await.unwrap();

        let mut healed = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if store.roll(&b).await.unwrap().reserved_meters == 2.0 {
                healed = true;
                break;
            }
        }
        assert!(healed, "background healer never moved the deficit");
        assert_eq!(store.roll(&a).await.unwrap().reserved_meters, 10.0);
    }

    #[tokio::test]
    async fn busy_metrics_port_is_an_error() {
        let busy = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let config = EngineConfig {
            data_dir: test_data_dir("busy_port"),
            metrics_port: Some(busy.local_addr().unwrap().port()),
            ..Default::default()
        };
        assert!(launch(&config).is_err());
    }

    #[tokio::test]
    async fn compactor_runs_past_threshold() {
        let data_dir = test_data_dir("compactor");
        std::fs::create_dir_all(&data_dir).unwrap();
        let store = Arc::new(
            Store::open(data_dir.join("inventory.wal"), Arc::new(NotifyHub::new())).unwrap(),
        );

        for i in 0..5 {
            store.add_roll(Ulid::new(), lin(&i.to_string(), 1.0)).await.unwrap();
        }
        assert_eq!(store.wal_appends_since_compact().await, 5);

        tokio::spawn(run_compactor(store.clone(), 3, Duration::from_millis(10)));
        let mut compacted = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if store.wal_appends_since_compact().await == 0 {
                compacted = true;
                break;
            }
        }
        assert!(compacted);
        assert_eq!(store.roll_count(), 5);
    }
}
