//! Event pump tests against the in-memory remote.

use fbmount_core::testing::MemoryRemote;
use fbmount_core::{PumpError, RemoteError, RemoteEvent, RemoteStore, SyncCore, follow, pump_events};
use serde_json::json;
use std::sync::Arc;

async fn run(remote: &MemoryRemote, sync: Arc<SyncCore>) -> (PumpError, usize) {
    let mut applied = 0;
    let events = remote.subscribe().await.unwrap();
    let Err(err) = pump_events(sync, events, |_| applied += 1).await;
    (err, applied)
}

#[tokio::test]
async fn test_puts_and_patches_apply_in_order() {
    let remote = MemoryRemote::new();
    let sync = Arc::new(SyncCore::new());

    remote.push_put("/", json!({"a": {"x": 1}, "b": 2}));
    remote.push_event(RemoteEvent::KeepAlive);
    remote.push_event(RemoteEvent::Patch {
        path: "/a".to_string(),
        data: json!({"y": "new", "x": null}),
    });
    remote.push_put("/b", json!(null));
    remote.close();

    let (err, applied) = run(&remote, Arc::clone(&sync)).await;
    assert!(matches!(err, PumpError::SubscriptionEnded));
    assert_eq!(applied, 3);
    assert_eq!(sync.to_json(), json!({"a": {"y": "new"}}));
}

#[tokio::test]
async fn test_non_object_patch_is_ignored() {
    let remote = MemoryRemote::new();
    let sync = Arc::new(SyncCore::new());
    remote.push_put("/k", json!(1));
    remote.push_event(RemoteEvent::Patch {
        path: "/k".to_string(),
        data: json!(7),
    });
    remote.close();

    let (_, applied) = run(&remote, Arc::clone(&sync)).await;
    assert_eq!(applied, 1);
    assert_eq!(sync.to_json(), json!({"k": 1}));
}

#[tokio::test]
async fn test_error_and_unknown_events_do_not_stop_the_pump() {
    let remote = MemoryRemote::new();
    let sync = Arc::new(SyncCore::new());
    remote.push_event(RemoteEvent::Error("quota".to_string()));
    remote.push_event(RemoteEvent::Other("rules_debug".to_string()));
    remote.push_put("/still", json!(true));
    remote.close();

    let (err, _) = run(&remote, Arc::clone(&sync)).await;
    assert!(matches!(err, PumpError::SubscriptionEnded));
    assert_eq!(sync.to_json(), json!({"still": true}));
}

#[tokio::test]
async fn test_cancel_is_fatal() {
    let remote = MemoryRemote::new();
    let sync = Arc::new(SyncCore::new());
    remote.push_event(RemoteEvent::Cancel("permission denied".to_string()));
    remote.push_put("/never", json!(1));

    let (err, applied) = run(&remote, Arc::clone(&sync)).await;
    assert!(matches!(err, PumpError::Cancelled(reason) if reason == "permission denied"));
    assert_eq!(applied, 0);
    assert_eq!(sync.to_json(), json!({}));
}

#[tokio::test]
async fn test_auth_revoked_is_fatal() {
    let remote = MemoryRemote::new();
    remote.push_event(RemoteEvent::AuthRevoked);
    let (err, _) = run(&remote, Arc::new(SyncCore::new())).await;
    assert!(matches!(err, PumpError::AuthRevoked));
}

#[tokio::test]
async fn test_malformed_path_halts_pump() {
    let remote = MemoryRemote::new();
    let sync = Arc::new(SyncCore::new());
    remote.push_put("/ok", json!(1));
    remote.push_put("bad", json!(2));
    remote.push_put("/after", json!(3));

    let (err, applied) = run(&remote, Arc::clone(&sync)).await;
    assert!(matches!(err, PumpError::InvalidPath(_)));
    assert_eq!(applied, 1);
    assert_eq!(sync.to_json(), json!({"ok": 1}));
}

#[tokio::test]
async fn test_stream_error_is_fatal() {
    let remote = MemoryRemote::new();
    remote.push_error(RemoteError::Protocol("garbled".to_string()));
    let (err, _) = run(&remote, Arc::new(SyncCore::new())).await;
    assert!(matches!(err, PumpError::Remote(RemoteError::Protocol(_))));
}

#[tokio::test]
async fn test_follow_reports_subscribe_failure() {
    let remote = MemoryRemote::new();
    let _taken = remote.subscribe().await.unwrap();
    let Err(err) = follow(&remote, Arc::new(SyncCore::new()), |_| {}).await;
    assert!(matches!(err, PumpError::Remote(RemoteError::Closed)));
}

#[tokio::test]
async fn test_echoed_writes_confirm_local_state() {
    let remote = MemoryRemote::new().with_echo();
    let sync = Arc::new(SyncCore::new());
    let node = sync
        .create_local(fbmount_core::ROOT_ID, "x", std::time::SystemTime::now(), false)
        .unwrap();
    sync.record_local_write(node.id, fbmount_core::Scalar::Number(9.0), std::time::SystemTime::now())
        .unwrap();
    remote.set_at_path("/x", Some(json!(9))).await.unwrap();
    remote.close();

    let _ = run(&remote, Arc::clone(&sync)).await;
    let snap = sync.snapshot(node.id).unwrap();
    assert!(!snap.virtual_new);
    assert!(!snap.virtual_modified);
    assert_eq!(snap.content(), b"9");
}
