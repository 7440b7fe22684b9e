use std::net::SocketAddr;

use clap::{Parser, Subcommand};
use solroute_commons::env::load_env;
use solroute_commons::error::format_with_code;
use solroute_commons::telemetry::init_telemetry_from_env;
use tracing::{error, info};

use solroute_service::api::http;
use solroute_service::config::ServiceConfig;
use solroute_service::context::build_context;

#[derive(Parser)]
#[command(name = "solroute")]
#[command(about = "DEX aggregation router: quote across upstream aggregators, rank routes, build swap transactions.")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    // Starts the RPC service (default).
    Serve {
        // Listen address override, e.g. 0.0.0.0:8080.
        #[arg(long)]
        listen: Option<SocketAddr>,
        // Sqlite database path override.
        #[arg(long)]
        db_path: Option<String>,
    },
    // Validates configuration and credentials, then exits.
    CheckConfig,
}

#[tokio::main]
async fn main() {
    load_env();
    let _telemetry = match init_telemetry_from_env() {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("telemetry init failed, continuing with stderr logging: {err}");
            None
        }
    };

    let cli = Cli::parse();
    let mut config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("configuration error: {}", format_with_code(&err));
            std::process::exit(1);
        }
    };

    match cli.command.unwrap_or(Commands::Serve {
        listen: None,
        db_path: None,
    }) {
        Commands::Serve { listen, db_path } => {
            if let Some(listen) = listen {
                config.listen_addr = listen;
            }
            if let Some(db_path) = db_path {
                config.db_path = db_path;
            }
            let listen_addr = config.listen_addr;

            let context = match build_context(config).await {
                Ok(context) => context,
                Err(err) => {
                    error!("startup failed: {}", err);
                    std::process::exit(1);
                }
            };
            let _sweepers = context.engine.spawn_sweepers(context.config.sweep_interval);

            info!("solroute serving on {}", listen_addr);
            if let Err(err) = http::serve(listen_addr, context.api.clone()).await {
                error!("rpc listener failed: {}", err);
                std::process::exit(1);
            }
        }
        Commands::CheckConfig => {
            match build_context(config).await {
                Ok(context) => {
                    info!(
                        "configuration ok, {} provider(s) configured",
                        context.engine.adapters().len()
                    );
                }
                Err(err) => {
                    error!("configuration check failed: {}", err);
                    std::process::exit(1);
                }
            }
        }
    }
}
