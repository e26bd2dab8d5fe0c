//! Concurrency tests: fine-grained plans writing into one shared stream

use std::collections::BTreeMap;
use std::sync::Arc;

use guardia_active::config::{CollationMode, ThreadPolicy};
use guardia_active::model::{Agent, AgentRuntime};

use crate::helpers::*;

const HOSTS: usize = 20;
const CHECKS: usize = 10;

fn host_names() -> Vec<&'static str> {
    (0..HOSTS)
        .map(|h| &*Box::leak(format!("host{h:02}").into_boxed_str()))
        .collect()
}

fn check_keys() -> Vec<(&'static str, u64)> {
    (0..CHECKS)
        .map(|c| (&*Box::leak(format!("item{c}").into_boxed_str()), 30))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_check_policy_keeps_records_intact() {
    let names = host_names();
    let orders: BTreeMap<_, _> = names.iter().map(|name| (*name, check_keys())).collect();
    let server = FakeServer::start(monitoring_server(orders)).await;

    for mode in [CollationMode::DirectMemory, CollationMode::DirectDisk] {
        let mut config = create_test_config(server.port, &names);
        config.agent.thread_policy = ThreadPolicy::Check;
        config.agent.collation = mode;
        let (agent, _ticks) =
            Agent::new(&config, Arc::new(KeyEchoExecutor), AgentRuntime::current()).unwrap();

        assert_eq!(agent.refresh().await.active, HOSTS);

        let reports = agent.dispatch(30).await;
        assert_eq!(reports[0].units, HOSTS * CHECKS, "{mode:?}");
        assert_eq!(reports[0].submitted as usize, HOSTS * CHECKS, "{mode:?}");
        assert_eq!(reports[0].ack.unwrap().processed as usize, HOSTS * CHECKS);
    }

    for submission in server.submissions() {
        let records = submission["data"].as_array().unwrap();
        assert_eq!(records.len(), HOSTS * CHECKS);
        assert!(records.iter().all(|r| r["key"] == r["value"]));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispatches_of_different_delays() {
    let server = FakeServer::start(monitoring_server(BTreeMap::from([(
        "web01",
        vec![("a", 10), ("b", 20), ("c", 30), ("d", 40)],
    )])))
    .await;
    let (agent, _ticks) = Agent::new(
        &create_test_config(server.port, &["web01"]),
        Arc::new(KeyEchoExecutor),
        AgentRuntime::current(),
    )
    .unwrap();
    agent.refresh().await;

    let rounds = futures::future::join_all(
        [10, 20, 30, 40]
            .into_iter()
            .map(|delay| {
                let agent = agent.clone();
                tokio::spawn(async move { agent.dispatch(delay).await })
            }),
    )
    .await;

    for round in rounds {
        let reports = round.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].submitted, 1);
    }
    assert_eq!(server.submissions().len(), 4);
}
