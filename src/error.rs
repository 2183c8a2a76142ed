use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReckonError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Statement error: {0}")]
    Statement(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Unknown record type: {0}")]
    UnknownRecordType(String),

    #[error("Unknown association rule: {0}")]
    UnknownRule(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Malformed record ID: {0}")]
    BadRecordId(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ReckonError>;
