//! Site analytics service
//!
//! Records page views and button clicks posted by the marketing site and
//! serves aggregated stats to the admin dashboard.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use site_analytics::client::{AnalyticsClient, ClientConfig};
use site_analytics::config::Config;
use site_analytics::events::EventBus;
use site_analytics::{store, web};

#[derive(Parser)]
#[command(name = "site-analytics", about = "Page-view and button-click analytics service")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Send a single event to a running service
    Emit {
        /// URL of the POST /analytics endpoint
        #[arg(long, default_value = "http://127.0.0.1:3000/analytics")]
        endpoint: url::Url,
        /// Referring URL to classify
        #[arg(long)]
        referrer: Option<String>,
        /// Visitor identity file
        #[arg(long)]
        state_file: Option<std::path::PathBuf>,
        #[command(subcommand)]
        event: EmitEvent,
    },
}

#[derive(Subcommand)]
enum EmitEvent {
    PageView,
    ButtonClick {
        button_id: String,
        button_name: String,
    },
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", config.logging.level)));

    // LOG_FORMAT=gcp wins over the config file for Cloud Logging deployments
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| config.logging.format.clone());
    match format.as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::fmt().with_env_filter(filter).json().init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting site analytics...");

    let data = store::load(&config.storage.data_file).await?;
    let store = store::start_write_buffer(
        config.storage.data_file.clone(),
        data,
        config.analytics.limits(),
    );
    info!(path = %config.storage.data_file.display(), "Store initialized");

    let event_bus = EventBus::new(1000);

    web::start_background_tasks(store.clone(), &config.analytics);

    if config.admin.password().is_none() {
        tracing::warn!("admin.password is empty, dashboard endpoints are open");
    }

    let state = Arc::new(web::AppState::new(&config, store, event_bus));
    web::start_server(&config, state).await
}

async fn emit(
    endpoint: url::Url,
    referrer: Option<String>,
    state_file: Option<std::path::PathBuf>,
    event: EmitEvent,
) -> Result<()> {
    let mut client_config = ClientConfig::new(endpoint);
    client_config.state_file = state_file;
    let client = AnalyticsClient::new(client_config, referrer.as_deref()).await?;

    match event {
        EmitEvent::PageView => client.send_page_view().await?,
        EmitEvent::ButtonClick { button_id, button_name } => {
            client.send_button_click(&button_id, &button_name).await?
        }
    }
    info!(referrer = client.referrer(), "event sent");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before any other initialization)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_logging(&config);
    info!("Configuration loaded");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Emit {
            endpoint,
            referrer,
            state_file,
            event,
        } => emit(endpoint, referrer, state_file, event).await,
    }
}
