use thiserror::Error;

/// Everything that can go wrong inside a DAG run.
///
/// The variants follow the three failure sources of a run: the CoinGecko
/// HTTP calls, the shape of the price payload, and the warehouse.
#[derive(Debug, Error)]
pub enum SpiderError {
    /// Transport failure or timeout while calling the API.
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The API answered, but the body was not JSON.
    #[error("failed to deserialize response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The price mapping handed to the persister has an unexpected shape.
    #[error("malformed price payload: {0}")]
    Payload(String),

    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),

    /// A connection profile could not be resolved.
    #[error("connection profile `{name}`: {reason}")]
    Profile { name: String, reason: String },

    /// No upstream result was pushed for the task the caller pulls from.
    #[error("no result from task `{0}` in the handoff")]
    MissingHandoff(String),

    /// A task failed on every attempt its retry policy allowed.
    #[error("task `{task}` failed after {attempts} attempt(s): {source}")]
    TaskFailed {
        task: String,
        attempts: u32,
        #[source]
        source: Box<SpiderError>,
    },
}

impl SpiderError {
    pub(crate) fn profile(name: &str, reason: impl Into<String>) -> Self {
        SpiderError::Profile {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
