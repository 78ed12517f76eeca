//! Command-line interface for the match server.

use clap::{Parser, Subcommand};

/// Santorini match server - authoritative move submission over HTTP
#[derive(Parser, Debug)]
#[command(name = "santorini_server")]
#[command(about = "Authoritative Santorini match server", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP match server
    Serve {
        /// Path to a TOML config file
        #[arg(short, long)]
        config: Option<std::path::PathBuf>,

        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Keep matches in memory instead of SQLite
        #[arg(long)]
        in_memory: bool,
    },

    /// Apply database migrations and exit
    Migrate {
        /// Path to the database file (created if it doesn't exist)
        #[arg(long, default_value = "santorini.db")]
        db_path: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_overrides_parse() {
        let cli = Cli::parse_from(["santorini_server", "serve", "--port", "8081", "--in-memory"]);
        match cli.command {
            Command::Serve {
                port, in_memory, config, ..
            } => {
                assert_eq!(port, Some(8081));
                assert!(in_memory);
                assert!(config.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
