use clap::{Args, Parser, Subcommand};

use crate::config::LogFormat;

#[derive(Parser)]
#[command(name = "gateproxy")]
#[command(about = "Identity-injecting, response-caching reverse proxy")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the gateway
    Serve(ServeArgs),
    /// Load and validate configuration, then print the effective settings
    CheckConfig(ConfigArgs),
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Path to the TOML configuration file (default: gateproxy.toml)
    #[arg(short, long, env = "GATEPROXY_CONFIG")]
    pub config: Option<String>,
}

#[derive(Args)]
pub struct ServeArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Log output format (overrides logging.format)
    #[arg(long, value_parser = parse_log_format)]
    pub log_format: Option<LogFormat>,
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    match value.to_ascii_lowercase().as_str() {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => Err(format!("unknown log format '{other}', expected text or json")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_args() {
        let cli = Cli::try_parse_from([
            "gateproxy",
            "serve",
            "--config",
            "/etc/gateproxy.toml",
            "--log-format",
            "json",
        ])
        .unwrap();

        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.config.config.as_deref(), Some("/etc/gateproxy.toml"));
        assert_eq!(args.log_format, Some(LogFormat::Json));
    }

    #[test]
    fn test_check_config_args() {
        let cli = Cli::try_parse_from(["gateproxy", "check-config", "-c", "local.toml"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::CheckConfig(ConfigArgs { config: Some(ref path) }) if path == "local.toml"
        ));
    }

    #[test]
    fn test_rejects_unknown_log_format() {
        assert!(Cli::try_parse_from(["gateproxy", "serve", "--log-format", "xml"]).is_err());
    }

    #[test]
    fn test_command_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
