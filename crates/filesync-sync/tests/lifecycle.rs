//! Registry lifecycle against a contended source.

use std::fs;
use std::time::Duration;

use filesync_core::config::EngineConfig;
use filesync_core::domain::{ConfigId, SyncConfig, SyncState, SystemState};
use filesync_sync::SyncRegistry;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn engine() -> EngineConfig {
    EngineConfig {
        stability_samples: 2,
        stability_delay_ms: 10,
        lock_poll_interval_ms: 1000,
        max_transient_failures: 5,
    }
}

#[tokio::test]
async fn test_stop_while_blocked_on_coordinator() {
    let root = TempDir::new().unwrap();
    let source = root.path().join("src");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("a.txt"), b"a").unwrap();

    let registry = SyncRegistry::new(&engine());
    let holder = registry
        .coordinator()
        .acquire(&source, ConfigId::new(100), &CancellationToken::new())
        .await
        .unwrap();

    let mut events = registry.subscribe();
    let id = ConfigId::new(1);
    registry
        .start(SyncConfig::new(id, "blocked", &source, root.path().join("replica")))
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if event.status.state == SyncState::WaitingForSourceLock {
                break;
            }
        }
    })
    .await
    .unwrap();

    // One poll interval is the upper bound for observing the stop.
    tokio::time::timeout(Duration::from_millis(1000), registry.stop(id))
        .await
        .expect("stop returned within one poll interval");

    let (running, status) = registry.status(id).unwrap();
    assert!(!running);
    assert_eq!(status.state, SyncState::Stopped);

    // The holder is untouched and can still release normally.
    assert_eq!(registry.coordinator().holder(&source), Some(ConfigId::new(100)));
    assert_eq!(registry.coordinator().waiters(&source), 0);
    drop(holder);
    assert!(!registry.coordinator().is_tracked(&source));
    assert!(!root.path().join("replica").join("a.txt").exists());
}

#[tokio::test]
async fn test_blocked_config_proceeds_after_release() {
    let root = TempDir::new().unwrap();
    let source = root.path().join("src");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("report.csv"), b"1,2,3").unwrap();

    let registry = SyncRegistry::new(&engine());
    let holder = registry
        .coordinator()
        .acquire(&source, ConfigId::new(100), &CancellationToken::new())
        .await
        .unwrap();

    let id = ConfigId::new(7);
    registry
        .start(SyncConfig::new(id, "waiting", &source, root.path().join("replica")))
        .unwrap();
    assert_eq!(registry.system_status().state, SystemState::Online);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        registry.status(id).unwrap().1.state,
        SyncState::WaitingForSourceLock
    );

    let mut events = registry.subscribe();
    drop(holder);
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if event.status.last_sync_time.is_some() {
                break;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(
        fs::read(root.path().join("replica").join("report.csv")).unwrap(),
        b"1,2,3"
    );
    registry.stop_all().await;
    assert_eq!(registry.system_status().state, SystemState::Idle);
}
