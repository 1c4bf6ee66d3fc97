use std::sync::Arc;

/// Crate-wide error kinds. Sources, the catalog, and the indexing queues
/// all speak this vocabulary; `NotFound` and `NotAnImage` short-circuit
/// the source chain while `Transient` lets it advance to the next entry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found")]
    NotFound,

    #[error("not an image: {0}")]
    NotAnImage(String),

    #[error("{0} is not available")]
    Unavailable(&'static str),

    #[error("transient failure: {0}")]
    Transient(#[source] anyhow::Error),

    #[error("catalog corruption during {op}: {source}")]
    Corruption {
        op: &'static str,
        #[source]
        source: rusqlite::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        Error::Transient(err.into())
    }

    /// Classify a rusqlite error for the given operation. Row-not-found maps
    /// to `NotFound`, integrity failures are fatal `Corruption`, everything
    /// else (locked, busy, I/O) is retryable.
    pub fn from_sqlite(op: &'static str, err: rusqlite::Error) -> Self {
        use rusqlite::ffi::ErrorCode;
        match &err {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(
                    e.code,
                    ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase
                ) =>
            {
                Error::Corruption { op, source: err }
            }
            _ => Error::Transient(err.into()),
        }
    }

    /// Rebuild an error that came back from a coalescing cache as
    /// `Arc<Error>`. The short-circuiting kinds survive intact; the rest
    /// degrade to `Transient` carrying the original message.
    pub fn from_shared(err: Arc<Error>) -> Self {
        match &*err {
            Error::NotFound => Error::NotFound,
            Error::NotAnImage(p) => Error::NotAnImage(p.clone()),
            Error::Unavailable(what) => Error::Unavailable(what),
            other => Error::Transient(anyhow::anyhow!("{}", other)),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound
        } else {
            Error::Transient(err.into())
        }
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Transient(err.into())
    }
}
