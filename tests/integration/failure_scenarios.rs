//! Failure tests: every steady-state failure is absorbed into state and stats

use std::collections::BTreeMap;
use std::sync::Arc;

use guardia_active::config::Config;
use guardia_active::model::{Agent, AgentRuntime, HostState};
use serde_json::json;

use crate::helpers::*;

fn agent_for(config: &Config) -> Arc<Agent> {
    let (agent, _ticks) =
        Agent::new(config, Arc::new(KeyEchoExecutor), AgentRuntime::current()).unwrap();
    agent
}

fn host_state(agent: &Agent, port: u16, host: &str) -> HostState {
    agent
        .server(&format!("127.0.0.1:{port}"))
        .unwrap()
        .host(host)
        .unwrap()
        .state(chrono::Utc::now())
}

#[tokio::test]
async fn test_unknown_host_backs_off() {
    let server = FakeServer::start(monitoring_server(BTreeMap::new())).await;
    let agent = agent_for(&create_test_config(server.port, &["ghost"]));

    let summary = agent.refresh().await;
    assert_eq!(summary.unknown, 1);
    assert_eq!(host_state(&agent, server.port, "ghost"), HostState::NoHostDef);
    assert!(agent.armed_delays().is_empty());

    // not retried before its refresh period has passed
    let summary = agent.refresh().await;
    assert_eq!(summary.attempted, 0);
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn test_unreachable_server_marks_refresh_failed() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let agent = agent_for(&create_test_config(port, &["web01"]));

    let summary = agent.refresh().await;
    assert_eq!(summary.failed, 1);
    assert_eq!(host_state(&agent, port, "web01"), HostState::MoFailed);

    // failed hosts are retried on the next sweep
    assert_eq!(agent.refresh().await.attempted, 1);
}

#[tokio::test]
async fn test_silent_server_times_out() {
    let server = FakeServer::start(|_| Reply::Silent).await;
    let mut config = create_test_config(server.port, &["web01"]);
    config.agent.timeout = 1;
    let agent = agent_for(&config);

    let started = std::time::Instant::now();
    let summary = agent.refresh().await;

    assert_eq!(summary.failed, 1);
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    assert_eq!(host_state(&agent, server.port, "web01"), HostState::MoFailed);
}

#[tokio::test]
async fn test_malformed_reply_is_discarded() {
    let server = FakeServer::start(|_| Reply::Raw(b"HTTP/1.1 400 Bad Request\r\n\r\n".to_vec())).await;
    let agent = agent_for(&create_test_config(server.port, &["web01"]));

    assert_eq!(agent.refresh().await.failed, 1);
    assert_eq!(host_state(&agent, server.port, "web01"), HostState::MoFailed);
}

#[tokio::test]
async fn test_invalid_json_reply_is_discarded() {
    let server = FakeServer::start(|_| Reply::Json(json!({"unexpected": true}))).await;
    let agent = agent_for(&create_test_config(server.port, &["web01"]));

    assert_eq!(agent.refresh().await.failed, 1);
    assert_eq!(host_state(&agent, server.port, "web01"), HostState::MoFailed);
}

#[tokio::test]
async fn test_rejected_submission_is_counted() {
    let server = FakeServer::start(|request| match request["request"].as_str() {
        Some("active checks") => Reply::Json(json!({
            "response": "success",
            "data": [{"key": "agent.ping", "delay": 30}],
        })),
        _ => Reply::Json(json!({"response": "failed", "info": "database is down"})),
    })
    .await;
    let agent = agent_for(&create_test_config(server.port, &["web01"]));
    agent.refresh().await;

    let reports = agent.dispatch(30).await;
    assert!(reports.is_empty());

    let stats = &agent.stats().submissions[&format!("127.0.0.1:{}", server.port)];
    assert_eq!(stats.rounds, 1);
    assert_eq!(stats.failed_rounds, 1);
    assert!(stats.last_error.as_deref().unwrap().contains("database is down"));

    // the timer keeps running for the next round
    assert_eq!(agent.armed_delays(), vec![30]);
}

#[tokio::test]
async fn test_unparseable_ack_is_tolerated() {
    let server = FakeServer::start(|request| match request["request"].as_str() {
        Some("active checks") => Reply::Json(json!({
            "response": "success",
            "data": [{"key": "agent.ping", "delay": 30}],
        })),
        _ => Reply::Json(json!({"response": "success", "info": "thanks"})),
    })
    .await;
    let agent = agent_for(&create_test_config(server.port, &["web01"]));
    agent.refresh().await;

    let reports = agent.dispatch(30).await;
    assert_eq!(reports.len(), 1);
    assert!(reports[0].ack.is_none());

    let stats = &agent.stats().submissions[&format!("127.0.0.1:{}", server.port)];
    assert_eq!(stats.rounds, 1);
    assert_eq!(stats.failed_rounds, 0);
}

#[test]
fn test_bad_configuration_fails_fast() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let handle = runtime.handle().clone();
    let runtime_handles = AgentRuntime {
        scheduler: handle.clone(),
        workers: handle,
    };

    let mut config = create_test_config(10051, &["web01", "web01"]);
    assert!(Agent::new(&config, Arc::new(KeyEchoExecutor), runtime_handles.clone()).is_err());

    config.servers[0].hosts.pop();
    config.servers[0].refresh_period = 0;
    assert!(Agent::new(&config, Arc::new(KeyEchoExecutor), runtime_handles).is_err());
}
