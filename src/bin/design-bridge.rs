use clap::{Parser, Subcommand};
use design_bridge::{
    config::BridgeConfig, notifications::NotificationFeed, transport, Bridge, BridgeError,
    LocalChannel, Payload, RequestKind, Strategy,
};
use serde_json::Value;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio_stream::StreamExt;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "bridge.json")]
    config: PathBuf,

    /// Design service address
    #[arg(short, long, default_value = "127.0.0.1:5000")]
    addr: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a design with the given strategy
    Create {
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = "strategy_random")]
        strategy: Strategy,
    },
    /// Simulate a design; payload is a JSON object file
    Simulate {
        #[arg(short, long)]
        payload: PathBuf,
    },
    /// Run a random simulation of a design; payload is a JSON object file
    Random {
        #[arg(short, long)]
        payload: PathBuf,
        #[arg(short, long)]
        iterations: Option<u64>,
    },
    /// Print service notifications until Ctrl+C
    Listen,
}

fn read_payload(path: &Path) -> Result<Payload, BridgeError> {
    let content = std::fs::read_to_string(path)?;
    match serde_json::from_str::<Value>(&content)? {
        Value::Object(payload) => Ok(payload),
        _ => Err(BridgeError::config(format!(
            "{} must contain a JSON object",
            path.display()
        ))),
    }
}

fn request_for(command: &Command) -> Result<Option<(RequestKind, Payload)>, BridgeError> {
    let request = match command {
        Command::Create { name, strategy } => {
            let mut payload = Payload::new();
            payload.insert("strategy".to_string(), Value::String(strategy.to_string()));
            payload.insert("name".to_string(), Value::String(name.clone()));
            Some((RequestKind::CreateDesign, payload))
        }
        Command::Simulate { payload } => Some((RequestKind::SimulateDesign, read_payload(payload)?)),
        Command::Random {
            payload,
            iterations,
        } => {
            let mut payload = read_payload(payload)?;
            if let Some(iterations) = iterations {
                payload.insert("iterations".to_string(), Value::from(*iterations));
            }
            Some((RequestKind::RandomSimulationDesign, payload))
        }
        Command::Listen => None,
    };
    Ok(request)
}

async fn run(cli: &Cli) -> Result<(), BridgeError> {
    let config = if cli.config.exists() {
        BridgeConfig::from_file(&cli.config)?
    } else {
        BridgeConfig::default()
    };
    info!("config loaded.");
    debug!("config: {:?}", config);

    let request = request_for(&cli.command)?;

    let channel = Arc::new(LocalChannel::new(config.event_buffer_size));
    let feed = NotificationFeed::attach(&channel, config.event_buffer_size);
    let mut notifications = Box::pin(feed.stream());

    let mut pump = transport::connect_tcp(&cli.addr, channel.clone(), config.session_params()).await?;
    tokio::time::timeout(CONNECT_TIMEOUT, channel.wait_connected())
        .await
        .map_err(|_| BridgeError::Disconnected)??;

    let Some((kind, payload)) = request else {
        loop {
            tokio::select! {
                Some(notification) = notifications.next() => {
                    println!("{} {:?}", notification.received_at.to_rfc3339(), notification.body);
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        pump.abort();
        return Ok(());
    };

    let bridge = Bridge::new(channel.clone(), kind, &config);
    let request = bridge.request(&payload);
    tokio::pin!(request);
    let response = transport::while_open(&mut pump, async {
        loop {
            tokio::select! {
                response = &mut request => break response,
                Some(notification) = notifications.next() => {
                    eprintln!("{:?}", notification.body);
                }
            }
        }
    })
    .await?;
    pump.abort();

    if response.is_failure() {
        return Err(BridgeError::ServiceFailure { kind });
    }
    println!("{}", serde_json::to_string_pretty(&response.payload)?);
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
