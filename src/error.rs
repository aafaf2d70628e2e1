//! Error types for the tour bot.

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Tour error: {0}")]
    Tour(#[from] TourError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Chat-platform errors (Discord REST, DM delivery, role management).
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("Request to {endpoint} failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },

    #[error("Platform returned {status} for {endpoint}: {body}")]
    ApiError {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Could not deliver message to user {user_id}: {reason}")]
    DeliveryFailed { user_id: String, reason: String },

    #[error("Invalid response from platform: {0}")]
    InvalidResponse(String),
}

/// Tour orchestration errors surfaced to the command/UI layer.
///
/// Not-found variants are explicit so callers never fall back to a wrong
/// entity; invalid input is rejected before any mutation.
#[derive(Debug, thiserror::Error)]
pub enum TourError {
    #[error("Tour not found: {0}")]
    TourNotFound(String),

    #[error("Step {0} not found")]
    StepNotFound(i64),

    #[error("No tour progress for user {user_id} in guild {guild_id}")]
    ProgressNotFound { user_id: String, guild_id: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Guild context unavailable for this operation")]
    NoGuildContext,

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;
