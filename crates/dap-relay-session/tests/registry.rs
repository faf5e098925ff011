//! End-to-end tests against the scripted stub adapter.

use std::time::Duration;

use dap_relay_core::ConnectionState;
use dap_relay_process::AdapterCommand;
use dap_relay_rpc::RpcError;
use dap_relay_session::{RegistryConfig, RegistryError, SessionRegistry, StartOptions};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

const STUB: &str = env!("CARGO_BIN_EXE_dap-stub-adapter");

fn stub_config() -> RegistryConfig {
    RegistryConfig::default().with_adapter("stub", AdapterCommand::new(STUB, Vec::<String>::new()))
}

fn stub_options(owner: &str) -> StartOptions {
    StartOptions::new(owner, "stub", env!("CARGO_MANIFEST_DIR"))
}

async fn wait_for_pending(registry: &SessionRegistry, id: &str, expected: usize) {
    for _ in 0..200 {
        if registry
            .get(id)
            .await
            .is_some_and(|info| info.pending_requests == expected)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session {id} never reached {expected} pending requests");
}

#[tokio::test]
async fn test_initialize_and_event_drain() {
    let registry = SessionRegistry::new(stub_config());
    let info = assert_ok!(registry.start_session(stub_options("alice")).await);
    assert!(info.id.starts_with("dap_"));
    assert_eq!(info.state, ConnectionState::Connected);
    assert!(info.pid.is_some());

    let body = assert_ok!(
        registry
            .request(&info.id, 1, "initialize", Some(json!({"adapterID": "stub"})))
            .await
    );
    assert_eq!(body, json!({"ok": true}));

    // The event precedes the response on the wire, so it is already buffered.
    let events = assert_ok!(registry.drain_events(&info.id).await);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, "initialized");
    assert!(assert_ok!(registry.drain_events(&info.id).await).is_empty());

    assert!(registry.stop(&info.id).await);
}

#[tokio::test]
async fn test_responses_bodies_and_failures() {
    let registry = SessionRegistry::new(stub_config());
    let id = assert_ok!(registry.start_session(stub_options("alice")).await).id;

    let echoed = assert_ok!(registry.request(&id, 1, "echo", Some(json!({"x": [1, 2]}))).await);
    assert_eq!(echoed, json!({"x": [1, 2]}));

    let empty = assert_ok!(registry.request(&id, 2, "echo", None).await);
    assert!(empty.is_null());

    let other = assert_ok!(registry.request(&id, 3, "threads", None).await);
    assert_eq!(other, json!({"command": "threads"}));

    let err = assert_err!(registry.request(&id, 4, "fail", None).await);
    assert_eq!(err.code(), "RESPONSE_FAILURE");
    assert_eq!(err.to_string(), "request `fail` failed: stub refused");

    let err = assert_err!(registry.request(&id, 5, "failSilently", None).await);
    assert_eq!(err.to_string(), "request failed: failSilently");

    registry.stop(&id).await;
}

#[tokio::test]
async fn test_adapter_crash_fails_pending_and_retires_session() {
    let registry = std::sync::Arc::new(SessionRegistry::new(stub_config()));
    let id = assert_ok!(registry.start_session(stub_options("alice")).await).id;

    let held = tokio::spawn({
        let registry = registry.clone();
        let id = id.clone();
        async move { registry.request(&id, 1, "hold", None).await }
    });
    wait_for_pending(&registry, &id, 1).await;

    let crash = assert_err!(registry.request(&id, 2, "crash", None).await);
    assert!(matches!(
        &crash,
        RegistryError::Rpc(RpcError::TransportClosed { command, .. }) if command == "crash"
    ));
    assert!(crash.to_string().contains("code=3"), "{crash}");

    let held = assert_err!(assert_ok!(held.await));
    assert_eq!(held.code(), "TRANSPORT_CLOSED");
    assert!(held.to_string().contains("`hold`"));

    assert!(registry.get(&id).await.is_none());
    let after = assert_err!(registry.request(&id, 3, "threads", None).await);
    assert!(matches!(after, RegistryError::SessionNotFound(_)));
    assert!(!registry.stop(&id).await);
}

#[tokio::test]
async fn test_stop_fails_pending_and_is_idempotent() {
    let registry = std::sync::Arc::new(SessionRegistry::new(stub_config()));
    let id = assert_ok!(registry.start_session(stub_options("alice")).await).id;

    let held = tokio::spawn({
        let registry = registry.clone();
        let id = id.clone();
        async move { registry.request(&id, 1, "hold", None).await }
    });
    wait_for_pending(&registry, &id, 1).await;

    assert!(registry.stop(&id).await);
    let err = assert_err!(assert_ok!(held.await));
    assert_eq!(err.code(), "TRANSPORT_CLOSED");

    assert!(!registry.stop(&id).await);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_unknown_adapter_type() {
    let registry = SessionRegistry::new(stub_config());
    let err = assert_err!(
        registry
            .start_session(StartOptions::new("alice", "cobol", "."))
            .await
    );
    assert_eq!(err.code(), "UNSUPPORTED_ADAPTER_TYPE");
    assert!(registry.list(None).await.is_empty());
}

#[tokio::test]
async fn test_missing_adapter_executable() {
    let config = RegistryConfig::default().with_adapter(
        "ghost",
        AdapterCommand::new("dap-relay-no-such-adapter-binary", Vec::<String>::new()),
    );
    let registry = SessionRegistry::new(config);
    let err = assert_err!(
        registry
            .start_session(StartOptions::new("alice", "ghost", ".").env("PATH", "/nonexistent"))
            .await
    );
    assert!(matches!(
        &err,
        RegistryError::AdapterNotFound { adapter_type, command }
            if adapter_type == "ghost" && command == "dap-relay-no-such-adapter-binary"
    ));
    assert_eq!(err.code(), "ADAPTER_NOT_FOUND");
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_explicit_adapter_command_line() {
    let registry = SessionRegistry::default();
    let info = assert_ok!(
        registry
            .start_session(StartOptions::new("alice", "custom", ".").explicit_adapter(STUB))
            .await
    );
    assert_eq!(info.adapter_type, "custom");
    assert!(info.program.ends_with(std::path::Path::new(STUB).file_name().unwrap()));

    let body = assert_ok!(registry.request(&info.id, 1, "initialize", None).await);
    assert_eq!(body, json!({"ok": true}));
    registry.stop(&info.id).await;
}

#[tokio::test]
async fn test_list_filters_by_owner() {
    let registry = SessionRegistry::new(stub_config());
    assert_ok!(registry.start_session(stub_options("alice")).await);
    assert_ok!(registry.start_session(stub_options("alice")).await);
    let bob = assert_ok!(registry.start_session(stub_options("bob")).await);

    assert_eq!(registry.list(None).await.len(), 3);
    let alice = registry.list(Some("alice")).await;
    assert_eq!(alice.len(), 2);
    assert!(alice.iter().all(|s| s.owner_id == "alice"));
    assert_eq!(registry.list(Some("bob")).await[0].id, bob.id);
    assert!(registry.list(Some("carol")).await.is_empty());

    assert_eq!(registry.stop_all().await, 3);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_event_log_capacity_drops_oldest() {
    let config = RegistryConfig {
        event_log_capacity: 5,
        ..stub_config()
    };
    let registry = SessionRegistry::new(config);
    let id = assert_ok!(registry.start_session(stub_options("alice")).await).id;

    let body = assert_ok!(registry.request(&id, 1, "emit", Some(json!({"count": 12}))).await);
    assert_eq!(body, json!({"count": 12}));

    let info = registry.get(&id).await.unwrap();
    assert_eq!(info.buffered_events, 5);
    assert_eq!(info.dropped_events, 7);

    let events = assert_ok!(registry.drain_events(&id).await);
    let ns: Vec<u64> = events
        .iter()
        .map(|e| e.body.as_ref().unwrap()["n"].as_u64().unwrap())
        .collect();
    assert_eq!(ns, vec![7, 8, 9, 10, 11]);

    registry.stop(&id).await;
}

#[tokio::test]
async fn test_reverse_request_and_garbage_recovery() {
    let registry = SessionRegistry::new(stub_config());
    let id = assert_ok!(registry.start_session(stub_options("alice")).await).id;

    let body = assert_ok!(registry.request(&id, 1, "garbage", None).await);
    assert_eq!(body, json!({"recovered": true}));

    assert_ok!(registry.request(&id, 2, "reverse", None).await);
    let events = assert_ok!(registry.drain_events(&id).await);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, "runInTerminal");

    let info = registry.get(&id).await.unwrap();
    assert_eq!(info.state, ConnectionState::Connected);
    registry.stop(&id).await;
}

#[tokio::test]
async fn test_usage_updates_last_used() {
    let registry = SessionRegistry::new(stub_config());
    let info = assert_ok!(registry.start_session(stub_options("alice")).await);
    assert_eq!(info.created_at, info.last_used_at);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_ok!(registry.request(&info.id, 1, "threads", None).await);

    let after = registry.get(&info.id).await.unwrap();
    assert!(after.last_used_at > info.last_used_at);
    assert_eq!(after.created_at, info.created_at);
    registry.stop(&info.id).await;
}

#[tokio::test]
async fn test_sequence_numbers() {
    let registry = SessionRegistry::new(stub_config());
    let id = assert_ok!(registry.start_session(stub_options("alice")).await).id;

    assert_ok!(registry.request(&id, 7, "threads", None).await);
    assert_eq!(assert_ok!(registry.next_seq(&id).await), 8);
    assert_eq!(assert_ok!(registry.next_seq(&id).await), 9);

    registry.stop(&id).await;
    assert!(matches!(
        registry.next_seq(&id).await,
        Err(RegistryError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_live_subscription() {
    let registry = SessionRegistry::new(stub_config());
    let id = assert_ok!(registry.start_session(stub_options("alice")).await).id;
    let mut live = assert_ok!(registry.subscribe_events(&id).await);

    assert_ok!(registry.request(&id, 1, "emit", Some(json!({"count": 2}))).await);
    let first = assert_ok!(live.recv().await);
    let second = assert_ok!(live.recv().await);
    assert_eq!(first.event, "output");
    assert_eq!(second.body, Some(json!({"n": 1})));

    // Draining the buffer does not affect subscribers.
    assert_eq!(assert_ok!(registry.drain_events(&id).await).len(), 2);
    registry.stop(&id).await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_stop_kills_adapter_that_stopped_reading() {
    let registry = std::sync::Arc::new(SessionRegistry::default());
    let info = assert_ok!(
        registry
            .start_session(StartOptions::new("alice", "custom", ".").explicit_adapter("sleep 30"))
            .await
    );

    // Large enough to fill the stdin pipe of a process that never reads it.
    let expression = "x".repeat(1024 * 1024);
    let stuck = tokio::spawn({
        let registry = registry.clone();
        let id = info.id.clone();
        async move {
            registry
                .request(&id, 1, "evaluate", Some(json!({"expression": expression})))
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stopped = tokio::time::timeout(Duration::from_secs(8), registry.stop(&info.id)).await;
    assert_eq!(stopped.ok(), Some(true));
    assert_err!(assert_ok!(stuck.await));
    assert!(registry.is_empty().await);
}

#[cfg(unix)]
#[tokio::test]
async fn test_relative_adapter_in_relative_working_directory() {
    let working_dir = format!("rel-wd-{}", std::process::id());
    std::fs::create_dir_all(format!("{working_dir}/bin")).unwrap();
    std::fs::copy(STUB, format!("{working_dir}/bin/adapter")).unwrap();

    let registry = SessionRegistry::default();
    let started = registry
        .start_session(StartOptions::new("alice", "custom", &working_dir).explicit_adapter("bin/adapter"))
        .await;
    let outcome = match &started {
        Ok(info) => {
            let body = registry.request(&info.id, 1, "initialize", None).await;
            registry.stop(&info.id).await;
            Some(body)
        }
        Err(_) => None,
    };
    std::fs::remove_dir_all(&working_dir).unwrap();

    let info = assert_ok!(started);
    assert!(info.program.is_absolute());
    assert_eq!(assert_ok!(outcome.unwrap()), json!({"ok": true}));
}
