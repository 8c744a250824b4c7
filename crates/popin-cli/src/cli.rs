//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path (defaults to ./popin.toml when present)
    #[arg(short, long)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one node on the UDP loopback link
    Node {
        /// Node id; ids in the admin range run a booth
        #[arg(short, long)]
        id: u8,
        /// RSSI stamped on outgoing frames (overrides link.tx_rssi)
        #[arg(long, allow_hyphen_values = true)]
        tx_rssi: Option<i8>,
        /// Do not read commands from stdin
        #[arg(long)]
        no_console: bool,
    },
    /// Simulate booths and users in one process
    Simulate {
        /// Number of users
        #[arg(short, long, default_value_t = 10)]
        users: u8,
        /// Simulated time in seconds
        #[arg(short, long, default_value_t = 120)]
        seconds: u64,
        /// Seed for the signal strengths (random when omitted)
        #[arg(long)]
        seed: Option<u64>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        /// Use short protocol timers instead of the configured ones
        #[arg(long)]
        fast: bool,
    },
    /// Print an example configuration, or write it to a file
    Config {
        /// Write the configuration to this path
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_arguments() {
        let cli = Cli::try_parse_from(["popin", "-v", "node", "--id", "4", "--tx-rssi", "-40"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Node {
                id,
                tx_rssi,
                no_console,
            } => {
                assert_eq!(id, 4);
                assert_eq!(tx_rssi, Some(-40));
                assert!(!no_console);
            }
            _ => panic!("expected node command"),
        }
    }

    #[test]
    fn test_simulate_defaults() {
        let cli = Cli::try_parse_from(["popin", "simulate", "--seed", "9", "--json"]).unwrap();
        match cli.command {
            Commands::Simulate {
                users,
                seconds,
                seed,
                json,
                fast,
            } => {
                assert_eq!(users, 10);
                assert_eq!(seconds, 120);
                assert_eq!(seed, Some(9));
                assert!(json);
                assert!(!fast);
            }
            _ => panic!("expected simulate command"),
        }
    }

    #[test]
    fn test_node_requires_id() {
        assert!(Cli::try_parse_from(["popin", "node"]).is_err());
    }
}
