//! Pop-in CLI library
//!
//! Runs booth and user nodes over a UDP loopback link with a line console,
//! and simulates whole booth floors in one process.

pub mod cli;
pub mod commands;
pub mod config;
pub mod console;
pub mod error;
pub mod link;
pub mod sim;

pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use error::{CliError, Result};
pub use link::UdpLink;
pub use sim::{Simulation, SimulationConfig, SimulationReport};
