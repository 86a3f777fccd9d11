//! Unified error type.

/// The error type returned by fulfill's fallible operations.
///
/// Application-level errors (400, 404, 500, etc.) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. This type surfaces
/// infrastructure failures: binding a port, reading a request body, decoding
/// a payload or loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("body: {0}")]
    Body(#[from] hyper::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self {
        Self::Config(Box::new(e))
    }
}
