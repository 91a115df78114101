//! Connects to a realtime endpoint, subscribes to the given topics and logs
//! every connection event and dispatched message.

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pulse_sdk::{
    ClientConfig, DispatchOutcome, PipelineEvent, RealtimeClient, TransportConfig, TransportEvent,
};

#[derive(Parser, Debug)]
#[command(name = "pulse_monitor", about = "Watch a realtime dashboard feed")]
struct Args {
    /// WebSocket endpoint
    #[arg(long, env = "PULSE_URL", default_value = "ws://localhost:8080/ws")]
    url: String,

    /// Auth token, sent as the `token` query parameter
    #[arg(long, env = "PULSE_TOKEN")]
    token: Option<String>,

    /// Sample ids to track
    #[arg(long = "sample")]
    samples: Vec<String>,

    /// Order ids to track
    #[arg(long = "order")]
    orders: Vec<String>,

    /// Subscribe to the dashboard metrics channel
    #[arg(long)]
    dashboard: bool,

    #[arg(long, default_value_t = 10)]
    max_attempts: u32,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), pulse_sdk::PulseError> {
    let mut transport = TransportConfig::builder()
        .url(&args.url)
        .max_reconnect_attempts(args.max_attempts);
    if let Some(token) = &args.token {
        transport = transport.auth_token(token);
    }

    let mut client = RealtimeClient::init(ClientConfig::default().with_transport(transport.build()))?;
    let Some(mut pipeline) = client.pipeline() else {
        return Ok(());
    };

    for id in &args.samples {
        client.subscribe_to_sample(id)?;
    }
    for id in &args.orders {
        client.subscribe_to_order(id)?;
    }
    if args.dashboard {
        client.subscribe_to_dashboard()?;
    }

    client.connect()?;

    loop {
        tokio::select! {
            event = pipeline.next() => match event {
                Some(PipelineEvent::Connection(TransportEvent::MaxReconnectAttempts { attempts })) => {
                    error!("Gave up after {} reconnect attempts", attempts);
                    break;
                }
                Some(PipelineEvent::Connection(event)) => info!("{:?}", event),
                Some(PipelineEvent::Dispatched(DispatchOutcome::Delivered { kind, listeners })) => {
                    info!("{} -> {} listeners", kind, listeners)
                }
                Some(PipelineEvent::Dispatched(DispatchOutcome::Unhandled(kind))) => {
                    info!("{} (no listeners)", kind)
                }
                Some(PipelineEvent::Dispatched(DispatchOutcome::Malformed(reason))) => {
                    warn!("Malformed frame: {}", reason)
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    client.with_notifications(|sink| {
        for n in sink.by_priority().iter().take(10) {
            info!("[{:?}] {}: {}", n.level, n.title, n.message);
        }
    });
    client.teardown().await
}
