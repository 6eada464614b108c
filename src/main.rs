use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use qris_gateway::app::config::Config;
use qris_gateway::handlers;
use qris_gateway::services::{GatewayClient, InMemoryPaymentStore, PaymentService, PollPolicy};
use qris_gateway::utils::money::parse_amount;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// QRIS payment gateway client
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML config file. Environment variables (QRIS_*) are used when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the webhook and payment routes
    Serve,

    /// Create a dynamic QR
    Create {
        /// Amount in IDR, e.g. 15000 or 15,000.00
        #[arg(long, value_parser = parse_amount)]
        amount: Decimal,

        /// Unique merchant reference (random UUID if omitted)
        #[arg(long)]
        reference: Option<String>,

        #[arg(long)]
        callback_url: Option<String>,

        /// Poll until the payment leaves PENDING
        #[arg(long)]
        wait: bool,

        #[arg(long)]
        max_attempts: Option<u32>,

        /// Seconds between status checks
        #[arg(long)]
        interval: Option<u64>,

        /// Give up waiting after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,
    },

    /// Query the remote status of a QR once
    Status {
        #[arg(long)]
        qr_id: String,

        /// Partner reference, defaults to the QR id
        #[arg(long)]
        reference: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    let config = Arc::new(config);

    let store = Arc::new(InMemoryPaymentStore::new());
    let gateway = Arc::new(GatewayClient::from_config(config.clone(), store)?);
    let service = Arc::new(PaymentService::new(gateway.clone()));

    match cli.command {
        Commands::Serve => serve(config, service).await,
        Commands::Create {
            amount,
            reference,
            callback_url,
            wait,
            max_attempts,
            interval,
            deadline_secs,
        } => {
            let reference = reference.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let record = service
                .create_payment(amount, &reference, callback_url.as_deref())
                .await?;
            print_json(&record)?;

            if wait {
                let policy = PollPolicy::new(
                    max_attempts.unwrap_or(config.poll_max_attempts),
                    interval
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| config.poll_interval()),
                );
                let deadline = deadline_secs
                    .map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));

                let record = service.poll(&record.qr_id, policy, deadline).await?;
                print_json(&record)?;
            }
            Ok(())
        }
        Commands::Status { qr_id, reference } => {
            let reference = reference.unwrap_or_else(|| qr_id.clone());
            let snapshot = gateway.check_status(&qr_id, &reference).await?;
            println!("{} {} ({})", snapshot.qr_id, snapshot.status, snapshot.code);
            Ok(())
        }
    }
}

async fn serve(config: Arc<Config>, service: Arc<PaymentService>) -> Result<()> {
    info!(
        "Starting QRIS gateway on port {} against {}",
        config.server_port,
        config.base_url()
    );

    let app = handlers::router(service);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {}", addr))?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
