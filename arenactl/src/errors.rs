use crate::db::errors::DbError;
use std::path::PathBuf;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid arguments or input data
    #[error("{message}")]
    BadRequest { message: String },

    /// Configuration is missing something the command needs
    #[error("Config validation: {message}")]
    Config { message: String },

    /// Requested row not found
    #[error("{resource} {id} not found")]
    NotFound { resource: String, id: String },

    /// The operator declined a destructive operation
    #[error("Aborted: {message}")]
    Aborted { message: String },

    /// PostgREST answered with a non-success status
    #[error("PostgREST returned HTTP {status} for {url}: {body}")]
    Rest { status: u16, url: String, body: String },

    /// Transport-level HTTP failure
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// A bulk operation finished with some items failing
    #[error("{operation}: {succeeded}/{attempted} succeeded")]
    Incomplete {
        operation: String,
        attempted: usize,
        succeeded: usize,
    },

    /// Failed to read an input file
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::BadRequest { .. } | Error::Config { .. } => 2,
            Error::NotFound { .. } => 3,
            Error::Aborted { .. } => 4,
            Error::Incomplete { .. } => 5,
            Error::Rest { .. } | Error::Http(_) => 6,
            Error::Database(_) => 7,
            Error::Io { .. } | Error::Other(_) => 1,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Database(err.into())
    }
}

macro_rules! bad_request_from {
    ($($source:ty),+ $(,)?) => {
        $(
            impl From<$source> for Error {
                fn from(err: $source) -> Self {
                    Error::BadRequest { message: err.to_string() }
                }
            }
        )+
    };
}

bad_request_from!(
    crate::ranking::handicap::HandicapError,
    crate::ranking::prizes::PrizeError,
    crate::ranking::ranks::BandError,
    crate::ranking::ranks::RankParseError,
);

/// Type alias for command results
pub type Result<T> = std::result::Result<T, Error>;
