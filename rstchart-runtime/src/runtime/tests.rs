use super::*;
use crate::session::SessionOutcome;
use parking_lot::Mutex as SyncMutex;
use rstchart_storage::MemoryCheckpointStore;
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::assert_ok;

fn chart(definition: Value) -> Chart {
    Chart::from_json(&definition).unwrap()
}

fn runtime() -> Runtime {
    Runtime::new(Config::default()).unwrap()
}

fn door() -> Chart {
    chart(json!({
        "name": "door",
        "data": [{"id": "opens", "expr": "0"}],
        "states": [
            {"id": "closed", "transitions": [
                {"event": "open", "target": "opened"},
                {"event": "finish", "target": "done"}
            ]},
            {"id": "opened",
             "on_entry": [{"action": "assign", "location": "opens", "expr": "opens + 1"}],
             "transitions": [{"event": "close", "target": "closed"}]},
            {"id": "done", "type": "final", "done_data": {"content": {"expr": "opens"}}}
        ]
    }))
}

fn idle(name: &str) -> Chart {
    chart(json!({
        "name": name,
        "states": [
            {"id": "idle", "transitions": [{"event": "stop", "target": "done"}]},
            {"id": "done", "type": "final"}
        ]
    }))
}

async fn wait_until_empty(runtime: &Runtime) {
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while !runtime.sessions().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(drained.is_ok(), "sessions still live: {:?}", runtime.sessions());
}

#[tokio::test]
async fn test_session_runs_to_completion() {
    let rt = runtime();
    rt.register_chart(door());

    let handle = rt.spawn("door").unwrap();
    for name in ["open", "close", "open", "close", "finish"] {
        handle.send(Event::new(name)).await.unwrap();
    }

    assert_eq!(handle.wait().await.unwrap(), SessionOutcome::Completed(json!(2)));
    wait_until_empty(&rt).await;
}

#[tokio::test]
async fn test_closing_queue_ends_session() {
    let rt = runtime();
    rt.register_chart(door());

    let handle = rt
        .spawn_with("door", SpawnOptions::default().with_session_id("door-1"))
        .unwrap();
    assert_eq!(handle.id(), "door-1");
    assert_eq!(rt.sessions(), vec!["door-1"]);
    handle.send(Event::new("open")).await.unwrap();

    assert_eq!(handle.close().await.unwrap(), SessionOutcome::QueueClosed);
    wait_until_empty(&rt).await;
}

#[tokio::test]
async fn test_cancel_session() {
    let rt = runtime();
    rt.register_chart(idle("idle"));

    let handle = rt.spawn("idle").unwrap();
    assert!(rt.cancel(handle.id()));
    let outcome = assert_ok!(handle.wait().await);
    assert_eq!(outcome, SessionOutcome::Cancelled);

    wait_until_empty(&rt).await;
    assert!(!rt.cancel("idle-gone"));
}

#[tokio::test]
async fn test_shutdown_stops_sessions() {
    let rt = runtime();
    rt.register_chart(idle("idle"));
    let handle = rt.spawn("idle").unwrap();

    rt.shutdown().await;
    assert_eq!(handle.wait().await.unwrap(), SessionOutcome::Cancelled);
    assert!(matches!(rt.spawn("idle"), Err(RuntimeError::ShuttingDown)));
}

#[tokio::test]
async fn test_unknown_chart_and_session() {
    let rt = runtime();
    assert!(matches!(rt.spawn("nope"), Err(RuntimeError::UnknownChart(_))));
    assert!(matches!(
        rt.send("nope", Event::new("x")),
        Err(RuntimeError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_duplicate_session_id_rejected() {
    let rt = runtime();
    rt.register_chart(idle("idle"));
    let options = SpawnOptions::default().with_session_id("same");

    let _first = rt.spawn_with("idle", options.clone()).unwrap();
    let second = rt.spawn_with("idle", options);
    assert!(matches!(second, Err(RuntimeError::SessionExists(_))));
}

#[tokio::test]
async fn test_send_through_runtime() {
    let rt = runtime();
    rt.register_chart(idle("idle"));
    let handle = rt.spawn("idle").unwrap();

    rt.send(handle.id(), Event::new("stop")).unwrap();
    assert!(handle.wait().await.unwrap().is_completed());
}

#[tokio::test(start_paused = true)]
async fn test_delayed_send_fires() {
    let rt = runtime();
    rt.register_chart(chart(json!({
        "name": "timeout",
        "states": [
            {"id": "waiting",
             "on_entry": [{"action": "send", "event": "timeout", "delay": "5s"}],
             "transitions": [{"event": "timeout", "target": "expired"}]},
            {"id": "expired", "type": "final", "done_data": {"content": {"expr": "1"}}}
        ]
    })));

    let handle = rt.spawn("timeout").unwrap();
    assert_eq!(handle.wait().await.unwrap(), SessionOutcome::Completed(json!(1)));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_delayed_send_never_fires() {
    let rt = runtime();
    rt.register_chart(chart(json!({
        "name": "cancellable",
        "states": [
            {"id": "waiting",
             "on_entry": [{"action": "send", "event": "timeout", "delay": "5s", "id": "t"}],
             "transitions": [
                {"event": "abort", "actions": [{"action": "cancel", "send_id": "t"}]},
                {"event": "timeout", "target": "expired"}
             ]},
            {"id": "expired", "type": "final"}
        ]
    })));

    let handle = rt.spawn("cancellable").unwrap();
    handle.send(Event::new("abort")).await.unwrap();

    let outcome = handle.close_after(Duration::from_secs(30)).await.unwrap();
    assert_eq!(outcome, SessionOutcome::QueueClosed);
}

#[tokio::test]
async fn test_sessions_address_each_other() {
    let rt = runtime();
    rt.register_chart(chart(json!({
        "name": "listener",
        "states": [
            {"id": "waiting", "transitions": [{"event": "hello", "target": "done"}]},
            {"id": "done", "type": "final", "done_data": {"content": {"expr": "_event.data"}}}
        ]
    })));
    rt.register_chart(chart(json!({
        "name": "greeter",
        "states": [
            {"id": "greet",
             "on_entry": [{"action": "send", "event": "hello", "target": "#_scxml_listener-1",
                           "content": {"expr": "5"}}]}
        ]
    })));

    let listener = rt
        .spawn_with("listener", SpawnOptions::default().with_session_id("listener-1"))
        .unwrap();
    let _greeter = rt.spawn("greeter").unwrap();

    assert_eq!(listener.wait().await.unwrap(), SessionOutcome::Completed(json!(5)));
}

fn parent_chart(invoke: Value) -> Chart {
    chart(json!({
        "name": "parent",
        "data": [{"id": "result", "expr": "0"}],
        "states": [
            {"id": "work",
             "invoke": [invoke],
             "transitions": [
                {"event": "done.invoke", "target": "finished",
                 "actions": [{"action": "assign", "location": "result", "expr": "_event.data"}]},
                {"event": "child.ready", "target": "finished",
                 "actions": [{"action": "assign", "location": "result", "expr": "_event.data"}]},
                {"event": "stop", "target": "finished"}
             ]},
            {"id": "finished", "type": "final", "done_data": {"content": {"expr": "result"}}}
        ]
    }))
}

#[tokio::test]
async fn test_invoked_chart_reports_done() {
    let rt = runtime();
    rt.register_chart(chart(json!({
        "name": "adder",
        "data": [{"id": "x", "expr": "1"}],
        "states": [
            {"id": "end", "type": "final", "done_data": {"content": {"expr": "x + 1"}}}
        ]
    })));
    rt.register_chart(parent_chart(json!({
        "type": "scxml",
        "src": "adder",
        "params": [{"name": "x", "expr": "41"}]
    })));

    let handle = rt.spawn("parent").unwrap();
    assert_eq!(handle.wait().await.unwrap(), SessionOutcome::Completed(json!(42)));
    wait_until_empty(&rt).await;
}

#[tokio::test]
async fn test_invoked_inline_chart_sends_to_parent() {
    let rt = runtime();
    rt.register_chart(parent_chart(json!({
        "type": "http://www.w3.org/TR/scxml/",
        "id": "helper",
        "content": {"body": {
            "name": "helper",
            "states": [
                {"id": "ready",
                 "on_entry": [{"action": "send", "event": "child.ready", "target": "#_parent",
                               "content": {"expr": "7"}}]}
            ]
        }}
    })));

    let handle = rt.spawn("parent").unwrap();
    assert_eq!(handle.wait().await.unwrap(), SessionOutcome::Completed(json!(7)));
    // leaving `work` cancelled the helper
    wait_until_empty(&rt).await;
}

#[tokio::test]
async fn test_parent_cancel_cascades_to_children() {
    let rt = runtime();
    rt.register_chart(idle("sleeper"));
    rt.register_chart(parent_chart(json!({"type": "scxml", "src": "sleeper"})));

    let handle = rt.spawn("parent").unwrap();
    let started = tokio::time::timeout(Duration::from_secs(5), async {
        while rt.sessions().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(started.is_ok());

    handle.cancel();
    assert_eq!(handle.wait().await.unwrap(), SessionOutcome::Cancelled);
    wait_until_empty(&rt).await;
}

#[tokio::test]
async fn test_unknown_invoke_source_raises_error() {
    let rt = runtime();
    rt.register_chart(chart(json!({
        "name": "orphan",
        "states": [
            {"id": "work",
             "invoke": [{"type": "scxml", "src": "missing"}],
             "transitions": [{"event": "error.platform", "target": "failed"}]},
            {"id": "failed", "type": "final", "done_data": {"content": {"expr": "_event.name"}}}
        ]
    })));

    let handle = rt.spawn("orphan").unwrap();
    assert_eq!(
        handle.wait().await.unwrap(),
        SessionOutcome::Completed(json!("error.platform"))
    );
}

fn counter() -> Chart {
    chart(json!({
        "name": "counter",
        "data": [{"id": "n", "expr": "0"}],
        "states": [
            {"id": "idle", "transitions": [{"event": "start", "target": "busy"}]},
            {"id": "busy", "transitions": [
                {"event": "inc", "actions": [{"action": "assign", "location": "n", "expr": "n + 1"}]},
                {"event": "stop", "cond": "n >= 2", "target": "done"}
            ]},
            {"id": "done", "type": "final", "done_data": {"content": {"expr": "n"}}}
        ]
    }))
}

#[tokio::test]
async fn test_resume_from_latest_checkpoint() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let rt = Runtime::builder(Config::default())
        .checkpoint_store(store.clone())
        .build()
        .unwrap();
    rt.register_chart(counter());

    let handle = rt
        .spawn_with("counter", SpawnOptions::default().with_session_id("c-1"))
        .unwrap();
    for name in ["start", "inc"] {
        handle.send(Event::new(name)).await.unwrap();
    }
    assert_eq!(handle.close().await.unwrap(), SessionOutcome::QueueClosed);

    let cursor = store.latest("c-1").unwrap().unwrap();
    assert_eq!(cursor.macrostep, 2);
    assert_eq!(cursor.configuration, vec!["busy"]);

    let resumed = rt.resume_latest("counter", "c-1").unwrap().unwrap();
    assert_eq!(resumed.id(), "c-1");
    for name in ["inc", "stop"] {
        resumed.send(Event::new(name)).await.unwrap();
    }
    assert_eq!(resumed.wait().await.unwrap(), SessionOutcome::Completed(json!(2)));

    // a completed session leaves no checkpoint behind
    assert!(store.latest("c-1").unwrap().is_none());
    assert!(rt.resume_latest("counter", "c-1").unwrap().is_none());
}

#[tokio::test]
async fn test_checkpoints_written_to_configured_dir() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.checkpoint.enabled = true;
    config.checkpoint.dir = dir.path().to_path_buf();
    config.checkpoint.policy = CheckpointPolicy::EveryN(2);

    let rt = Runtime::new(config).unwrap();
    rt.register_chart(counter());
    let handle = rt
        .spawn_with("counter", SpawnOptions::default().with_session_id("c-2"))
        .unwrap();
    for name in ["start", "inc", "inc"] {
        handle.send(Event::new(name)).await.unwrap();
    }
    handle.close().await.unwrap();

    let store = rt.checkpoint_store().unwrap();
    let metas = store.list();
    assert_eq!(metas.len(), 1);
    assert_eq!(metas[0].session_id, "c-2");
    assert_eq!(metas[0].macrostep, 2);
}

#[tokio::test]
async fn test_initial_data_overrides_declarations() {
    let rt = runtime();
    rt.register_chart(counter());

    let handle = rt
        .spawn_with("counter", SpawnOptions::default().with_data("n", json!(10)))
        .unwrap();
    for name in ["start", "stop"] {
        handle.send(Event::new(name)).await.unwrap();
    }
    assert_eq!(handle.wait().await.unwrap(), SessionOutcome::Completed(json!(10)));
}

#[derive(Default)]
struct CaptureLog(SyncMutex<Vec<String>>);

impl LogSink for CaptureLog {
    fn log(&self, session_id: &str, label: Option<&str>, value: &Value) {
        self.0
            .lock()
            .push(format!("{}:{}={}", session_id, label.unwrap_or(""), value));
    }
}

#[tokio::test]
async fn test_log_sink_receives_chart_logs() {
    let log = Arc::new(CaptureLog::default());
    let rt = Runtime::builder(Config::default())
        .log_sink(log.clone())
        .build()
        .unwrap();
    rt.register_chart(chart(json!({
        "name": "logger",
        "states": [
            {"id": "only", "type": "final",
             "on_entry": [{"action": "log", "label": "hello", "expr": "1 + 1"}]}
        ]
    })));

    let handle = rt
        .spawn_with("logger", SpawnOptions::default().with_session_id("l-1"))
        .unwrap();
    assert!(handle.wait().await.unwrap().is_completed());
    assert_eq!(*log.0.lock(), vec!["l-1:hello=2".to_string()]);
}

#[test]
fn test_outcome_json() {
    assert_eq!(
        serde_json::to_value(SessionOutcome::Completed(json!({"n": 1}))).unwrap(),
        json!({"outcome": "completed", "data": {"n": 1}})
    );
    assert_eq!(
        serde_json::to_value(SessionOutcome::Cancelled).unwrap(),
        json!({"outcome": "cancelled"})
    );
}
