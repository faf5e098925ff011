//! Probe a debug adapter: start it, send `initialize`, print its events.
//!
//! Run with: cargo run -p dap-probe -- --adapter-type python
//!
//! Set `RUST_LOG=debug` to see adapter stderr and frame traffic.

use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use clap::Parser;
use dap_relay_session::{RegistryConfig, SessionRegistry, StartOptions};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "dap-probe", version, about)]
struct Args {
    /// Adapter type from the catalog (node, python, go, lldb, gdb, ...).
    #[arg(short = 't', long, default_value = "node")]
    adapter_type: String,

    /// Explicit adapter command line, overriding the catalog.
    #[arg(short, long)]
    adapter: Option<String>,

    /// Working directory for the adapter process.
    #[arg(short = 'C', long)]
    cwd: Option<PathBuf>,

    /// JSON registry configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Extra commands to send after `initialize`.
    #[arg(long = "send", value_name = "COMMAND")]
    commands: Vec<String>,

    /// How long to collect events before stopping.
    #[arg(long, default_value_t = 500)]
    wait_ms: u64,

    /// Print the adapter catalog and exit.
    #[arg(long)]
    list_adapters: bool,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<RegistryConfig> {
    let Some(path) = path else {
        return Ok(RegistryConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    RegistryConfig::from_json_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let registry = SessionRegistry::new(load_config(args.config.as_ref())?);

    if args.list_adapters {
        for adapter_type in registry.catalog().adapter_types() {
            if let Some(command) = registry.catalog().lookup(adapter_type) {
                println!("{adapter_type:10} {} {}", command.command, command.args.join(" "));
            }
        }
        return Ok(());
    }

    let cwd = match args.cwd {
        Some(cwd) => cwd,
        None => std::env::current_dir().context("resolving current directory")?,
    };
    let mut opts = StartOptions::new("dap-probe", &args.adapter_type, cwd);
    if let Some(adapter) = &args.adapter {
        opts = opts.explicit_adapter(adapter);
    }

    let info = registry
        .start_session(opts)
        .await
        .map_err(|e| anyhow::anyhow!("[{}] {e}", e.code()))?;
    println!("session {} pid={:?} program={}", info.id, info.pid, info.program.display());

    let initialize = json!({
        "clientID": "dap-probe",
        "adapterID": args.adapter_type,
        "linesStartAt1": true,
        "columnsStartAt1": true,
        "pathFormat": "path",
    });
    let mut outcomes = vec![(
        "initialize".to_string(),
        registry.request(&info.id, 1, "initialize", Some(initialize)).await,
    )];
    for command in &args.commands {
        let seq = registry.next_seq(&info.id).await?;
        outcomes.push((command.clone(), registry.request(&info.id, seq, command, None).await));
    }

    for (command, outcome) in outcomes {
        match outcome {
            Ok(body) => println!("{command}: {body}"),
            Err(e) => println!("{command}: error [{}] {e}", e.code()),
        }
    }

    tokio::time::sleep(Duration::from_millis(args.wait_ms)).await;

    match registry.drain_events(&info.id).await {
        Ok(events) => {
            for entry in events {
                let body = entry.body.unwrap_or_default();
                println!("event {} {body}", entry.event);
            }
        }
        Err(e) => println!("events unavailable: {e}"),
    }

    if let Some(after) = registry.get(&info.id).await {
        tracing::debug!(state = ?after.state, dropped = after.dropped_events, "Session before stop");
    }
    registry.stop(&info.id).await;
    Ok(())
}
