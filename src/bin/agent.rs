use std::sync::Arc;

use clap::Parser;
use guardia_active::{
    actors::AgentHandle,
    config::read_config_file,
    model::{Agent, AgentRuntime},
    system::SystemCheckExecutor,
    util::{get_config_path, get_trace_enabled, log_level},
};
use tracing::{info, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (defaults to $AGENT_CONFIG or ./agent.json)
    #[arg(short, default_value_t = get_config_path())]
    file: String,

    /// Log at TRACE instead of DEBUG (also enabled by AGENT_TRACE=1)
    #[arg(long)]
    trace: bool,
}

fn init(trace: bool) {
    let level = log_level(trace);
    let filter = filter::Targets::new().with_targets(vec![
        ("guardia_active", level),
        ("guardia_active_agent", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.trace || get_trace_enabled());
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let (agent, ticks) = Agent::new(
        &config,
        Arc::new(SystemCheckExecutor::new()),
        AgentRuntime::current(),
    )?;
    let handle = AgentHandle::spawn(agent, ticks);

    tokio::signal::ctrl_c().await?;
    info!("received ctrl-c, shutting down");
    handle.shutdown().await?;

    Ok(())
}
