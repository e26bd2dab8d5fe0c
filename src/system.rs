//! Built-in executor answering a small set of local system item keys

use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use sysinfo::System;
use tracing::trace;

use crate::executor::CheckExecutor;
use crate::model::Check;

/// Split `name[p1,p2]` into its name and parameters
pub fn parse_key(key: &str) -> Result<(&str, Vec<&str>)> {
    let Some(open) = key.find('[') else {
        return Ok((key, Vec::new()));
    };
    let Some(params) = key[open + 1..].strip_suffix(']') else {
        bail!("unterminated parameter list in item key '{key}'");
    };

    let params = if params.is_empty() {
        Vec::new()
    } else {
        params.split(',').map(str::trim).collect()
    };
    Ok((&key[..open], params))
}

/// Executor backed by `sysinfo`
///
/// Supports `agent.ping`, `agent.hostname`, `system.uname`, `system.uptime`,
/// `system.cpu.num`, `system.cpu.util` and `vm.memory.size[total|used|available]`.
#[derive(Clone)]
pub struct SystemCheckExecutor {
    sys: Arc<Mutex<System>>,
}

impl Default for SystemCheckExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCheckExecutor {
    pub fn new() -> Self {
        Self {
            sys: Arc::new(Mutex::new(System::new())),
        }
    }

    fn uname() -> String {
        [
            System::name(),
            System::host_name(),
            System::kernel_version(),
            System::os_version(),
            Some(System::cpu_arch()),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
    }

    fn memory(&self, mode: Option<&str>) -> Result<String> {
        let mut sys = self.sys.lock();
        sys.refresh_memory();

        let bytes = match mode.unwrap_or("total") {
            "total" => sys.total_memory(),
            "used" => sys.used_memory(),
            "available" => sys.available_memory(),
            other => bail!("unsupported memory mode '{other}'"),
        };
        Ok(bytes.to_string())
    }

    async fn cpu_util(&self) -> String {
        self.sys.lock().refresh_cpu_usage();
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;

        let mut sys = self.sys.lock();
        sys.refresh_cpu_usage();
        format!("{:.2}", sys.global_cpu_usage())
    }
}

#[async_trait]
impl CheckExecutor for SystemCheckExecutor {
    async fn execute(&self, host: &str, check: &Check) -> Result<String> {
        let (name, params) = parse_key(&check.key)?;
        trace!(host, key = %check.key, "executing system check");

        let value = match name {
            "agent.ping" => "1".to_string(),
            "agent.hostname" => System::host_name().unwrap_or_default(),
            "system.uname" => Self::uname(),
            "system.uptime" => System::uptime().to_string(),
            "system.cpu.num" => {
                let mut sys = self.sys.lock();
                sys.refresh_cpu_all();
                sys.cpus().len().to_string()
            }
            "system.cpu.util" => self.cpu_util().await,
            "vm.memory.size" => self.memory(params.first().copied())?,
            _ => bail!("unsupported item key '{}'", check.key),
        };
        Ok(value)
    }
}
