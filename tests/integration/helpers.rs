//! Helper functions for integration tests

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use guardia_active::config::{AgentConfig, CollationMode, Config, HostConfig, ServerConfig, ThreadPolicy};
use guardia_active::executor::CheckExecutor;
use guardia_active::model::Check;
use guardia_active::protocol::{read_frame, write_frame};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// What the fake server does with one request
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer with a framed JSON body
    Json(Value),

    /// Write raw bytes instead of a frame
    Raw(Vec<u8>),

    /// Answer with a framed JSON body after a pause
    Delayed(Duration, Value),

    /// Never answer
    Silent,
}

/// Local TCP listener speaking the framed protocol
pub struct FakeServer {
    pub port: u16,
    requests: Arc<Mutex<Vec<Value>>>,
    task: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start<F>(respond: F) -> Self
    where
        F: Fn(&Value) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let respond = Arc::new(respond);

        let recorded = requests.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let recorded = recorded.clone();
                let respond = respond.clone();

                tokio::spawn(async move {
                    let Ok(body) = read_frame(&mut socket).await else {
                        return;
                    };
                    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
                    let reply = (*respond)(&request);
                    recorded.lock().push(request);

                    match reply {
                        Reply::Json(value) => {
                            let _ = write_frame(&mut socket, &serde_json::to_vec(&value).unwrap()).await;
                        }
                        Reply::Delayed(pause, value) => {
                            tokio::time::sleep(pause).await;
                            let _ = write_frame(&mut socket, &serde_json::to_vec(&value).unwrap()).await;
                        }
                        Reply::Raw(bytes) => {
                            let _ = socket.write_all(&bytes).await;
                        }
                        Reply::Silent => {
                            tokio::time::sleep(Duration::from_secs(3600)).await;
                        }
                    }
                });
            }
        });

        Self {
            port,
            requests,
            task,
        }
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().clone()
    }

    /// Bodies of every `agent data` submission received so far
    pub fn submissions(&self) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|r| r["request"] == "agent data")
            .collect()
    }

    /// Wait until at least `count` submissions arrived
    pub async fn wait_for_submissions(&self, count: usize, within: Duration) -> Vec<Value> {
        tokio::time::timeout(within, async {
            loop {
                let submissions = self.submissions();
                if submissions.len() >= count {
                    return submissions;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("submissions did not arrive in time")
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Behaves like a monitoring server: known hosts get `checks`, unknown hosts
/// get a "not found" failure and submissions are acknowledged
pub fn monitoring_server(checks: BTreeMap<&'static str, Vec<(&'static str, u64)>>) -> impl Fn(&Value) -> Reply {
    move |request: &Value| match request["request"].as_str() {
        Some("active checks") => {
            let host = request["host"].as_str().unwrap_or_default();
            match checks.get(host) {
                Some(items) => Reply::Json(json!({
                    "response": "success",
                    "data": items
                        .iter()
                        .map(|(key, delay)| json!({"key": key, "delay": delay, "lastlogsize": 0, "mtime": 0}))
                        .collect::<Vec<_>>(),
                })),
                None => Reply::Json(json!({
                    "response": "failed",
                    "info": format!("host [{host}] not found"),
                })),
            }
        }
        Some("agent data") => {
            let n = request["data"].as_array().map(Vec::len).unwrap_or(0);
            Reply::Json(json!({
                "response": "success",
                "info": format!("processed: {n}; failed: 0; total: {n}; seconds spent: 0.000100"),
            }))
        }
        _ => Reply::Json(json!({"response": "failed", "info": "unsupported request"})),
    }
}

/// Like [`monitoring_server`], but marching orders arrive after `pause`
pub fn slow_monitoring_server(
    checks: BTreeMap<&'static str, Vec<(&'static str, u64)>>,
    pause: Duration,
) -> impl Fn(&Value) -> Reply {
    let respond = monitoring_server(checks);
    move |request: &Value| match respond(request) {
        Reply::Json(value) if request["request"] == "active checks" => Reply::Delayed(pause, value),
        reply => reply,
    }
}

pub fn create_test_config(port: u16, hosts: &[&str]) -> Config {
    Config {
        agent: AgentConfig {
            thread_policy: ThreadPolicy::Host,
            collation: CollationMode::Memory,
            collation_dir: None,
            refresh_sweep: 10,
            timeout: 2,
        },
        servers: vec![ServerConfig {
            address: "127.0.0.1".to_string(),
            port,
            refresh_period: 120,
            hosts: hosts
                .iter()
                .map(|name| HostConfig {
                    name: name.to_string(),
                    refresh_period: None,
                })
                .collect(),
        }],
    }
}

/// Answers with the key as value; keys starting with `bad.` fail
pub struct KeyEchoExecutor;

#[async_trait]
impl CheckExecutor for KeyEchoExecutor {
    async fn execute(&self, _host: &str, check: &Check) -> anyhow::Result<String> {
        if check.key.starts_with("bad.") {
            anyhow::bail!("unsupported item key");
        }
        Ok(check.key.clone())
    }
}
