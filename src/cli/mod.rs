use clap::{Parser, Subcommand};

pub mod config;
pub mod logging;
pub mod run;
pub mod status;
pub mod version;

#[derive(Parser)]
#[command(name = "courier")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Queued account-to-account message dispatcher", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the dispatcher service
    Run {
        /// Path to config file (default: ~/.local/share/courier/config.toml)
        #[arg(long)]
        config: Option<String>,

        /// Run a single polling cycle and exit
        #[arg(long)]
        once: bool,
    },

    /// Show pending, sent and failed job counts
    Status {
        /// Path to config file (default: ~/.local/share/courier/config.toml)
        #[arg(long)]
        config: Option<String>,
    },

    /// Display version information
    Version,
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run { config, once } => run::execute(config, once).await,
        Commands::Status { config } => status::execute(config).await,
        Commands::Version => {
            version::execute();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::parse_from(["courier", "run", "--config", "/etc/courier/config.toml"]);
        match cli.command {
            Commands::Run { config, once } => {
                assert_eq!(config, Some("/etc/courier/config.toml".to_string()));
                assert!(!once);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_run_once() {
        let cli = Cli::parse_from(["courier", "run", "--once"]);
        match cli.command {
            Commands::Run { config, once } => {
                assert_eq!(config, None);
                assert!(once);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_status() {
        let cli = Cli::parse_from(["courier", "status"]);
        assert!(matches!(cli.command, Commands::Status { config: None }));
    }

    #[test]
    fn test_cli_parse_version() {
        let cli = Cli::parse_from(["courier", "version"]);
        assert!(matches!(cli.command, Commands::Version));
    }

    #[test]
    fn test_cli_rejects_unknown_command() {
        assert!(Cli::try_parse_from(["courier", "register"]).is_err());
    }
}
