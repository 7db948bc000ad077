pub mod config;
pub mod crypto;
pub mod dag;
pub mod error;

pub use error::SpiderError;

/// Shortcut for required API elements.
pub mod http {
    pub(crate) use dotenv::var;
    pub use reqwest::Client as HttpClient;
    pub use tokio_postgres::Client as PgClient;
    pub use tokio_postgres::Transaction as PgTransaction;
}

/// Format the time elapsed since `time`, for debug logs.
pub(crate) fn time_elapsed(time: std::time::Instant) -> String {
    format!(
        "\x1b[38;5;208melapsed time: {} ms\x1b[0m",
        time.elapsed().as_millis()
    )
}
