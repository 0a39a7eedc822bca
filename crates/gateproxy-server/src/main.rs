use clap::Parser;
use gateproxy_server::cli::{Cli, Commands, ServeArgs};
use gateproxy_server::config::loader::load_config;
use gateproxy_server::{ServerBuilder, metrics, observability};

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist - it's optional
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::CheckConfig(args) => {
            let cfg = match load_config(args.config.as_deref()) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("Configuration error: {e}");
                    std::process::exit(2);
                }
            };
            match toml::to_string_pretty(&cfg) {
                Ok(rendered) => println!("{rendered}"),
                Err(e) => {
                    eprintln!("Failed to render configuration: {e}");
                    std::process::exit(2);
                }
            }
        }
    }
}

async fn serve(args: ServeArgs) {
    let cfg = match load_config(args.config.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    let format = args.log_format.unwrap_or(cfg.logging.format);
    observability::init_tracing_with(format, &cfg.logging.level);
    metrics::init_metrics();

    tracing::info!(
        upstream = %cfg.upstream.url,
        key_authority = %cfg.keys.authority_url,
        cache_enabled = cfg.cache.enabled,
        "Configuration loaded"
    );

    let server = match ServerBuilder::new().with_config(cfg).build().await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Gateway initialization failed");
            eprintln!("Gateway initialization failed: {e:#}");
            std::process::exit(2);
        }
    };

    if let Err(err) = server.run().await {
        tracing::error!(error = %err, "Server error");
        eprintln!("Server error: {err}");
        std::process::exit(1);
    }
}
