use std::io;

/// Custom error type for githook operations
#[derive(Debug, thiserror::Error)]
pub enum GithookError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unknown deployment target: {0}")]
    UnknownTarget(String),

    #[error("A deploy key already exists at '{0}'")]
    KeyExists(String),

    #[error("Deploy key generation failed for '{path}': {message}")]
    KeyGeneration { path: String, message: String },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

/// Helper type for Results that use GithookError
pub type Result<T> = std::result::Result<T, GithookError>;
