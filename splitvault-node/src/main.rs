use clap::{Parser, Subcommand};
use splitvault_node::{NodeConfig, run_node, server::print_pairing_instructions, tls};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "splitvault-node")]
#[command(about = "Storage node holding encrypted file parts for a splitvault panel")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node
    Start {
        /// Path to configuration file
        #[arg(short, long, default_value = "node.yaml")]
        config: String,
    },
    /// Generate certificates and print the CA for the panel
    Init {
        /// Path to configuration file
        #[arg(short, long, default_value = "node.yaml")]
        config: String,
    },
}

fn load_config(path: &str) -> NodeConfig {
    match NodeConfig::from_file(path) {
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
        Commands::Start { config } => {
            tracing::info!("Starting splitvault node with config: {}", config);
            let cfg = load_config(&config);

            if let Err(e) = run_node(cfg).await {
                tracing::error!("Node error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Init { config } => {
            let cfg = load_config(&config);

            match tls::load_or_generate(&cfg.keys_dir(), &cfg.common_name) {
                Ok(material) => print_pairing_instructions(&cfg, &material.ca_pem),
                Err(e) => {
                    tracing::error!("Failed to prepare certificates: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}
