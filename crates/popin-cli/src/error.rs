//! Error handling for the Pop-in CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Pop-in core error: {0}")]
    PopinCore(#[from] popin_core::PopinError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Link initialization failed: {0}")]
    LinkInit(String),

    #[error("Malformed datagram: {0}")]
    Datagram(String),

    #[error("Invalid console input: {0}")]
    Console(String),

    #[error("Simulation error: {0}")]
    Simulation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("TOML encoding error: {0}")]
    TomlEncoding(#[from] toml::ser::Error),

    #[error("Configuration loading error: {0}")]
    Figment(#[from] figment::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
