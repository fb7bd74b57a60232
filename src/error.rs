use thiserror::Error;

/// Errors raised while validating the supervisor configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The `run` section is missing or is not a mapping of services.
    #[error("Commands must be passed as a HASH ref")]
    CommandsNotMap,

    /// The `run` section is present but declares no services.
    #[error("Missing command list")]
    MissingCommandList,

    /// A declared service carries no command.
    #[error("Missing command for '{0}'")]
    MissingCommand(String),

    /// A service umask is not a valid octal mask.
    #[error("Invalid umask '{mask}' for '{service}'")]
    InvalidUmask {
        /// The service whose umask failed to parse.
        service: String,
        /// The rejected umask string.
        mask: String,
    },

    /// Error reading the configuration file.
    #[error("Failed to read config file: {0}")]
    Read(#[source] std::io::Error),

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    Parse(#[from] serde_yaml::Error),
}
