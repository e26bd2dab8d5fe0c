//! End-to-end tests: marching orders → timers → execution → framed submission

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use guardia_active::actors::AgentHandle;
use guardia_active::config::{CollationMode, ThreadPolicy};
use guardia_active::model::{Agent, AgentRuntime, HostState};
use pretty_assertions::assert_eq;
use serde_json::Value;

use crate::helpers::*;

fn web01_checks() -> BTreeMap<&'static str, Vec<(&'static str, u64)>> {
    BTreeMap::from([(
        "web01",
        vec![("agent.ping", 30), ("bad.key", 30), ("vm.memory.size[total]", 60)],
    )])
}

fn record<'a>(submission: &'a Value, key: &str) -> &'a Value {
    submission["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["key"] == key)
        .unwrap_or_else(|| panic!("no record for {key}"))
}

#[tokio::test]
async fn test_refresh_arms_timers_and_dispatch_submits() {
    let server = FakeServer::start(monitoring_server(web01_checks())).await;
    let (agent, _ticks) = Agent::new(
        &create_test_config(server.port, &["web01"]),
        Arc::new(KeyEchoExecutor),
        AgentRuntime::current(),
    )
    .unwrap();

    let summary = agent.refresh().await;
    assert_eq!(summary.active, 1);
    assert_eq!(agent.armed_delays(), vec![30, 60]);

    let reports = agent.dispatch(30).await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].execution.executed, 2);
    assert_eq!(reports[0].execution.failed, 1);
    assert_eq!(reports[0].submitted, 2);
    assert_eq!(reports[0].ack.unwrap().processed, 2);

    let submissions = server.submissions();
    assert_eq!(submissions.len(), 1);
    let submission = &submissions[0];
    assert!(submission["clock"].as_i64().unwrap() > 0);
    assert_eq!(submission["data"].as_array().unwrap().len(), 2);

    let ok = record(submission, "agent.ping");
    assert_eq!(ok["host"], "web01");
    assert_eq!(ok["value"], "agent.ping");
    assert!(ok.get("state").is_none());

    let failed = record(submission, "bad.key");
    assert_eq!(failed["state"], 1);
    assert_eq!(failed["value"], "unsupported item key");

    let stats = agent.stats();
    let submissions = &stats.submissions[&format!("127.0.0.1:{}", server.port)];
    assert_eq!(submissions.rounds, 1);
    assert_eq!(submissions.processed, 2);
}

#[tokio::test]
async fn test_every_mode_and_policy_submits_identical_batches() {
    let modes = [
        CollationMode::Memory,
        CollationMode::DirectMemory,
        CollationMode::Disk,
        CollationMode::DirectDisk,
    ];
    let policies = [ThreadPolicy::Server, ThreadPolicy::Host, ThreadPolicy::Check];

    let server = FakeServer::start(monitoring_server(BTreeMap::from([
        ("web01", vec![("a", 30), ("b", 30)]),
        ("web02", vec![("c", 30), ("d", 60)]),
    ])))
    .await;
    let dir = tempfile::tempdir().unwrap();

    let mut config = create_test_config(server.port, &["web01", "web02"]);
    config.agent.collation_dir = Some(dir.path().to_path_buf());
    let (agent, _ticks) =
        Agent::new(&config, Arc::new(KeyEchoExecutor), AgentRuntime::current()).unwrap();
    agent.refresh().await;

    for mode in modes {
        for policy in policies {
            agent.set_collation(mode);
            agent.set_thread_policy(policy);

            let reports = agent.dispatch(30).await;
            assert_eq!(reports[0].submitted, 3, "{mode:?}/{policy:?}");
        }
    }

    let submissions = server.submissions();
    assert_eq!(submissions.len(), modes.len() * policies.len());
    for submission in &submissions {
        let mut keys: Vec<_> = submission["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["key"].as_str().unwrap().to_string())
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    // disk streams delete their temp files once submitted
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_changed_marching_orders_move_checks() {
    let orders = Arc::new(parking_lot::Mutex::new(vec![("a", 30u64), ("b", 60)]));
    let current = orders.clone();
    let server = FakeServer::start(move |request| {
        let mut checks = BTreeMap::new();
        checks.insert("web01", current.lock().clone());
        monitoring_server(checks)(request)
    })
    .await;

    let (agent, _ticks) = Agent::new(
        &create_test_config(server.port, &["web01"]),
        Arc::new(KeyEchoExecutor),
        AgentRuntime::current(),
    )
    .unwrap();
    agent.refresh().await;
    assert_eq!(agent.armed_delays(), vec![30, 60]);

    *orders.lock() = vec![("a", 120)];
    let host = agent
        .server(&format!("127.0.0.1:{}", server.port))
        .unwrap()
        .host("web01")
        .unwrap();
    let connector = *agent.connector();
    let state = agent
        .server(&format!("127.0.0.1:{}", server.port))
        .unwrap()
        .refresh_host(&host, &connector)
        .await;

    assert_eq!(state, Some(HostState::Active));
    assert_eq!(agent.armed_delays(), vec![120]);
    assert_eq!(host.check("a").unwrap().delay, 120);
    assert!(host.check("b").is_none());
    assert!(host.removed_since_last_refresh().contains("b"));
}

#[tokio::test]
async fn test_timers_drive_submissions_through_actor() {
    let server = FakeServer::start(monitoring_server(BTreeMap::from([(
        "web01",
        vec![("agent.ping", 1)],
    )])))
    .await;
    let (agent, ticks) = Agent::new(
        &create_test_config(server.port, &["web01"]),
        Arc::new(KeyEchoExecutor),
        AgentRuntime::current(),
    )
    .unwrap();

    // the first sweep runs immediately, the 1s timer does the rest
    let handle = AgentHandle::spawn(agent, ticks);
    let submissions = server.wait_for_submissions(2, Duration::from_secs(10)).await;

    for submission in &submissions {
        assert_eq!(submission["request"], "agent data");
        assert_eq!(submission["data"][0]["key"], "agent.ping");
    }

    let stats = handle.get_stats().await.unwrap();
    assert_eq!(stats.armed_delays, vec![1]);
    assert!(stats.submissions.values().all(|s| s.failed_rounds == 0));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_handle_dispatch_now() {
    let server = FakeServer::start(monitoring_server(web01_checks())).await;
    let (agent, ticks) = Agent::new(
        &create_test_config(server.port, &["web01"]),
        Arc::new(KeyEchoExecutor),
        AgentRuntime::current(),
    )
    .unwrap();
    let handle = AgentHandle::spawn(agent, ticks);

    // the startup sweep may already have refreshed web01
    let summary = handle.refresh_now().await.unwrap();
    assert_eq!(summary.active, summary.attempted);

    let reports = handle.dispatch_now(60).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].submitted, 1);

    handle.shutdown().await.unwrap();
}

fn slow_web01(pause: Duration) -> impl Fn(&Value) -> Reply {
    slow_monitoring_server(BTreeMap::from([("web01", vec![("agent.ping", 30)])]), pause)
}

#[tokio::test]
async fn test_host_removed_during_refresh_stays_unscheduled() {
    let server = FakeServer::start(slow_web01(Duration::from_millis(300))).await;
    let (agent, _ticks) = Agent::new(
        &create_test_config(server.port, &["web01"]),
        Arc::new(KeyEchoExecutor),
        AgentRuntime::current(),
    )
    .unwrap();
    let id = format!("127.0.0.1:{}", server.port);

    let sweep = tokio::spawn({
        let agent = agent.clone();
        async move { agent.refresh().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    let removed = agent.server(&id).unwrap().remove_host("web01").unwrap();

    let summary = sweep.await.unwrap();
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.withdrawn, 1);
    assert_eq!(summary.active, 0);
    assert_eq!(server.requests().len(), 1);

    assert!(removed.checks().is_empty());
    assert!(agent.server(&id).unwrap().bucket().is_empty());
    assert!(agent.root().is_empty());
    assert!(agent.armed_delays().is_empty());
}

#[tokio::test]
async fn test_server_removed_during_refresh_stays_unscheduled() {
    let server = FakeServer::start(slow_web01(Duration::from_millis(300))).await;
    let (agent, _ticks) = Agent::new(
        &create_test_config(server.port, &["web01"]),
        Arc::new(KeyEchoExecutor),
        AgentRuntime::current(),
    )
    .unwrap();
    let id = format!("127.0.0.1:{}", server.port);

    let sweep = tokio::spawn({
        let agent = agent.clone();
        async move { agent.refresh().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    let removed = agent.remove_server(&id).unwrap();

    let summary = sweep.await.unwrap();
    assert_eq!(summary.withdrawn, 1);
    assert!(agent.servers().is_empty());
    assert!(removed.bucket().is_empty());
    assert!(agent.root().is_empty());
    assert!(agent.armed_delays().is_empty());

    // nothing is left to dispatch for the removed server
    assert!(agent.dispatch(30).await.is_empty());
    assert!(server.submissions().is_empty());
}
