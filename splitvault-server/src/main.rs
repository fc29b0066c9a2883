mod config;
use clap::{Parser, Subcommand};
use config::Config;
use splitvault_core::MetadataStore;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod server;
use server::run_server;

#[derive(Parser)]
#[command(name = "splitvault")]
#[command(about = "Encrypted file vault that splits files across storage nodes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the panel
    Server {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
    /// Create the panel database
    Init {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
}

fn load_config(path: &str) -> Config {
    match Config::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "splitvault=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config } => {
            tracing::info!("Starting splitvault panel with config: {}", config);
            let cfg = load_config(&config);

            tracing::info!(
                "Shard size: {} bytes, force spreading: {}, API keys: {}",
                cfg.storage.shard_size,
                cfg.storage.force_spreading,
                cfg.api_keys.len()
            );

            if let Err(e) = run_server(cfg).await {
                tracing::error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Init { config } => {
            tracing::info!("Initializing splitvault panel with config: {}", config);
            let cfg = load_config(&config);

            match MetadataStore::new(&cfg.database_path) {
                Ok(store) => {
                    let nodes = store.list_nodes().map(|nodes| nodes.len()).unwrap_or(0);
                    tracing::info!(
                        "Panel database ready at {:?} ({} nodes paired)",
                        cfg.database_path,
                        nodes
                    );
                }
                Err(e) => {
                    tracing::error!("Failed to open database {:?}: {}", cfg.database_path, e);
                    std::process::exit(1);
                }
            }
        }
    }
}
