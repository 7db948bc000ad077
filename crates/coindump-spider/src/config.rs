use crate::http::var;
use crate::SpiderError;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Name of the warehouse connection profile.
pub const DWH_PROFILE: &str = "postgres_dwh";

/// CoinGecko public API root.
pub const COINGECKO_API: &str = "https://api.coingecko.com/api/v3";

/// The assets collected on every run.
pub const COINS: [&str; 2] = ["bitcoin", "ethereum"];

/// Client-side cap on each outbound HTTP call.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

////////////////////////////////////////////////////////////////////////////
// connection profiles
////////////////////////////////////////////////////////////////////////////

/// Parameters of a named database connection.
///
/// `schema` is the database name, mirroring how connection profiles store it.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub host: String,
    pub port: u16,
    pub schema: String,
    pub login: String,
    pub password: Option<String>,
}

impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("schema", &self.schema)
            .field("login", &self.login)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl ConnectionProfile {
    /// Translate the profile into a single-connection `tokio_postgres` config.
    pub fn pg_config(&self) -> Result<tokio_postgres::Config, SpiderError> {
        let mut pg_config = deadpool_postgres::Config::new();
        pg_config.host = Some(self.host.clone());
        pg_config.port = Some(self.port);
        pg_config.dbname = Some(self.schema.clone());
        pg_config.user = Some(self.login.clone());
        pg_config.password = self.password.clone();
        pg_config
            .get_pg_config()
            .map_err(|err| {
                let target = format!("{}:{}/{}", self.host, self.port, self.schema);
                SpiderError::profile(&target, err.to_string())
            })
    }
}

/// Resolves connection profiles by name.
pub trait ProfileProvider: Send + Sync {
    fn profile(&self, name: &str) -> Result<ConnectionProfile, SpiderError>;
}

/// Profiles read from environment variables (and `.env`).
///
/// A profile named `postgres_dwh` is read from `POSTGRES_DWH_HOST`,
/// `POSTGRES_DWH_PORT` (default 5432), `POSTGRES_DWH_SCHEMA`,
/// `POSTGRES_DWH_LOGIN` and `POSTGRES_DWH_PASSWORD` (optional).
pub struct EnvProfiles {
    lookup: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl Default for EnvProfiles {
    fn default() -> Self {
        Self::with_lookup(|key| var(key).ok())
    }
}

impl EnvProfiles {
    /// Read variables through `lookup` instead of the process environment.
    pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            lookup: Box::new(lookup),
        }
    }

    fn field(&self, name: &str, field: &str) -> Option<String> {
        let key = format!("{}_{field}", name.to_uppercase());
        (self.lookup)(&key).filter(|value| !value.is_empty())
    }

    fn required(&self, name: &str, field: &str) -> Result<String, SpiderError> {
        self.field(name, field).ok_or_else(|| {
            SpiderError::profile(name, format!("{}_{field} is not set", name.to_uppercase()))
        })
    }
}

impl ProfileProvider for EnvProfiles {
    fn profile(&self, name: &str) -> Result<ConnectionProfile, SpiderError> {
        let port = match self.field(name, "PORT") {
            Some(port) => port
                .parse::<u16>()
                .map_err(|err| SpiderError::profile(name, format!("invalid port `{port}`: {err}")))?,
            None => 5432,
        };

        Ok(ConnectionProfile {
            host: self.required(name, "HOST")?,
            port,
            schema: self.required(name, "SCHEMA")?,
            login: self.required(name, "LOGIN")?,
            password: self.field(name, "PASSWORD"),
        })
    }
}

/// A fixed set of profiles held in memory.
#[derive(Debug, Default, Clone)]
pub struct StaticProfiles(HashMap<String, ConnectionProfile>);

impl StaticProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, profile: ConnectionProfile) -> Self {
        self.0.insert(name.to_string(), profile);
        self
    }
}

impl ProfileProvider for StaticProfiles {
    fn profile(&self, name: &str) -> Result<ConnectionProfile, SpiderError> {
        self.0
            .get(name)
            .cloned()
            .ok_or_else(|| SpiderError::profile(name, "no such profile"))
    }
}

////////////////////////////////////////////////////////////////////////////
// settings
////////////////////////////////////////////////////////////////////////////

/// Retry behaviour applied to every task of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 1,
            delay: Duration::from_secs(60),
        }
    }
}

/// Runtime settings of the DAG.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_url: String,
    pub http_timeout: Duration,
    pub coins: Vec<String>,
    pub profile: String,
    pub retry: RetryPolicy,
    pub interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: COINGECKO_API.to_string(),
            http_timeout: HTTP_TIMEOUT,
            coins: COINS.iter().map(|coin| coin.to_string()).collect(),
            profile: DWH_PROFILE.to_string(),
            retry: RetryPolicy::default(),
            interval: Duration::from_secs(10 * 60),
        }
    }
}

impl Settings {
    /// Defaults, with the API root overridable through `COINGECKO_API_URL`.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(url) = var("COINGECKO_API_URL") {
            settings.api_url = url.trim_end_matches('/').to_string();
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> EnvProfiles {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvProfiles::with_lookup(move |key| vars.get(key).cloned())
    }

    #[test]
    fn env_profile_reads_upper_cased_fields() {
        let profiles = lookup(&[
            ("POSTGRES_DWH_HOST", "dwh.local"),
            ("POSTGRES_DWH_PORT", "6432"),
            ("POSTGRES_DWH_SCHEMA", "dwh"),
            ("POSTGRES_DWH_LOGIN", "etl"),
            ("POSTGRES_DWH_PASSWORD", "secret"),
        ]);

        let profile = profiles.profile(DWH_PROFILE).unwrap();
        assert_eq!(profile.host, "dwh.local");
        assert_eq!(profile.port, 6432);
        assert_eq!(profile.schema, "dwh");
        assert_eq!(profile.login, "etl");
        assert_eq!(profile.password.as_deref(), Some("secret"));
        assert!(!format!("{profile:?}").contains("secret"));
    }

    #[test]
    fn env_profile_defaults_port_and_password() {
        let profiles = lookup(&[
            ("POSTGRES_DWH_HOST", "localhost"),
            ("POSTGRES_DWH_SCHEMA", "dwh"),
            ("POSTGRES_DWH_LOGIN", "etl"),
        ]);

        let profile = profiles.profile(DWH_PROFILE).unwrap();
        assert_eq!(profile.port, 5432);
        assert_eq!(profile.password, None);
    }

    #[test]
    fn env_profile_rejects_missing_host_and_bad_port() {
        let missing = lookup(&[("POSTGRES_DWH_SCHEMA", "dwh"), ("POSTGRES_DWH_LOGIN", "etl")]);
        assert!(matches!(
            missing.profile(DWH_PROFILE),
            Err(SpiderError::Profile { .. })
        ));

        let bad_port = lookup(&[
            ("POSTGRES_DWH_HOST", "localhost"),
            ("POSTGRES_DWH_PORT", "not-a-port"),
            ("POSTGRES_DWH_SCHEMA", "dwh"),
            ("POSTGRES_DWH_LOGIN", "etl"),
        ]);
        assert!(matches!(
            bad_port.profile(DWH_PROFILE),
            Err(SpiderError::Profile { .. })
        ));
    }

    #[test]
    fn static_profiles_resolve_by_name() {
        let profile = ConnectionProfile {
            host: "localhost".into(),
            port: 5432,
            schema: "dwh".into(),
            login: "etl".into(),
            password: None,
        };
        let profiles = StaticProfiles::new().with(DWH_PROFILE, profile.clone());

        assert_eq!(profiles.profile(DWH_PROFILE).unwrap(), profile);
        assert!(profiles.profile("other").is_err());
    }

    #[test]
    fn profile_translates_to_pg_config() {
        let profile = ConnectionProfile {
            host: "localhost".into(),
            port: 6432,
            schema: "dwh".into(),
            login: "etl".into(),
            password: Some("pw".into()),
        };

        let pg_config = profile.pg_config().unwrap();
        assert_eq!(pg_config.get_ports(), &[6432]);
        assert_eq!(pg_config.get_dbname(), Some("dwh"));
        assert_eq!(pg_config.get_user(), Some("etl"));
        assert_eq!(pg_config.get_password(), Some(&b"pw"[..]));
    }

    #[test]
    fn default_settings_match_the_dag() {
        let settings = Settings::default();
        assert_eq!(settings.coins, vec!["bitcoin", "ethereum"]);
        assert_eq!(settings.http_timeout, Duration::from_secs(10));
        assert_eq!(settings.retry.retries, 1);
        assert_eq!(settings.retry.delay, Duration::from_secs(60));
        assert_eq!(settings.interval, Duration::from_secs(600));
        assert_eq!(settings.profile, "postgres_dwh");
    }
}
