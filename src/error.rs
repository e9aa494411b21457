use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Sensor error: {0}")]
    Sensor(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Database(err.to_string())
    }
}
