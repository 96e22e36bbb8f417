//! Courier CLI binary entry point.
//!
//! - `courier run`: example task を設定された bus 上で ctrl-c まで動かす
//! - `courier dispatch`: 1 回だけ dispatch して返信を表示する。in-process broker
//!   のときは同じ task をこのプロセス内で起動してから投げる

mod tasks;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use courier_core::config::{BusConfig, Config};
use courier_core::{Connection, Courier, DispatchOptions, ErrorWait, MemoryBroker, RedisBus, RunnerGroup};

#[derive(Debug, Parser)]
#[command(name = "courier", about = "Pub/sub task dispatch with example tasks")]
struct Cli {
    /// Application name used to locate configuration files.
    #[arg(long, global = true, default_value = "courier")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the example tasks until ctrl-c.
    Run,
    /// Dispatch once and print the reply.
    Dispatch {
        #[arg(long)]
        pattern: String,
        /// Arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
        /// Publish without waiting for a reply.
        #[arg(long)]
        no_wait: bool,
        /// Also watch the error channel and fail on an error envelope.
        #[arg(long)]
        race_errors: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = Config::load(&cli.config).context("loading configuration")?;
    info!(bus = ?config.bus, "loaded configuration");
    let bus = Bus::open(&config.bus)?;

    let mut courier = Courier::from_config(bus.connection(), &config)
        .expect_patterns(&tasks::PATTERNS);
    tasks::register_all(&mut courier)?;

    match cli.command {
        Command::Run => {
            let group = courier.start()?;
            bus.connect().await?;
            info!(runners = group.len(), "serving; press ctrl-c to stop");
            group
                .run_until(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await?;
        }
        Command::Dispatch {
            pattern,
            args,
            no_wait,
            race_errors,
        } => {
            let args = parse_args(&args)?;
            let options = DispatchOptions {
                wait: !no_wait,
                errors: if race_errors {
                    ErrorWait::Race
                } else {
                    ErrorWait::Ignore
                },
            };
            let dispatcher = courier.dispatcher().clone();
            bus.connect().await?;

            // on Redis the tasks are served by `courier run` elsewhere; the
            // in-process broker only has listeners if they run here
            let group = match &bus {
                Bus::Memory(broker) => {
                    let group = courier.start()?;
                    broker.wait_for_subscribers(group.len()).await;
                    Some(group)
                }
                Bus::Redis(_) => None,
            };

            let reply = tokio::select! {
                reply = dispatcher.dispatch(&pattern, args, options) => reply,
                _ = tokio::signal::ctrl_c() => {
                    stop(group).await?;
                    bail!("interrupted while waiting for {pattern}");
                }
            };
            stop(group).await?;

            let reply = reply?.unwrap_or(Value::Null);
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
    }
    Ok(())
}

/// Transport selected by `bus.address`.
enum Bus {
    Memory(MemoryBroker),
    Redis(RedisBus),
}

impl Bus {
    fn open(config: &BusConfig) -> Result<Self> {
        match config.address.as_str() {
            "" | "memory://" => Ok(Bus::Memory(MemoryBroker::new())),
            addr if addr.starts_with("redis://") => Ok(Bus::Redis(RedisBus::open(config)?)),
            other => bail!("unsupported bus address {other:?}; use memory:// or redis://"),
        }
    }

    fn connection(&self) -> Connection {
        match self {
            Bus::Memory(broker) => broker.connection(),
            Bus::Redis(redis) => redis.connection(),
        }
    }

    async fn connect(&self) -> Result<()> {
        match self {
            Bus::Memory(broker) => broker.connect(),
            Bus::Redis(redis) => redis.connect().await.context("connecting to redis")?,
        }
        Ok(())
    }
}

async fn stop(group: Option<RunnerGroup>) -> Result<()> {
    if let Some(group) = group {
        group.shutdown_and_join().await?;
    }
    Ok(())
}

/// `RUST_LOG`, then `COURIER_LOG_LEVEL`, then `info`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .ok()
        .or_else(|| {
            let level = std::env::var("COURIER_LOG_LEVEL").ok()?;
            EnvFilter::try_new(level).ok()
        })
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_args(text: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(text).context("--args is not valid JSON")? {
        Value::Object(args) => Ok(args),
        other => bail!("--args must be a JSON object, got {other}"),
    }
}
