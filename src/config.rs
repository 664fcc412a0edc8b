use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;
use url::Url;

/// OAuth2 token endpoint used when the key file does not carry its own
/// `token_uri`.
pub static GOOGLE_TOKEN_URI: LazyLock<Url> =
    LazyLock::new(|| Url::parse("https://oauth2.googleapis.com/token").expect("static URL"));

/// Scope requested for the storage read session.
pub const BIGQUERY_READ_SCOPE: &str = "https://www.googleapis.com/auth/bigquery.readonly";

/// Process configuration, merged from defaults and `BQSTREAM_*` env vars.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the service-account key JSON file. When unset, the standard
    /// `GOOGLE_APPLICATION_CREDENTIALS` variable is consulted instead.
    pub credentials_path: Option<PathBuf>,

    /// Fully qualified table id, `project.dataset.table`.
    pub table: String,

    /// Upper bound on the number of read streams the session may contain.
    /// The server may return fewer (including zero for an empty table).
    pub max_stream_count: i32,

    /// Comma separated column projection. Empty means all columns.
    pub selected_fields: Option<String>,

    /// SQL-ish filter pushed down into the read session.
    pub row_restriction: Option<String>,

    /// Base endpoint of the BigQuery Storage API; overridable for tests.
    pub storage_endpoint: Url,

    /// Optional outbound HTTP proxy.
    pub proxy: Option<Url>,

    pub connect_timeout_secs: u64,

    /// Timeout applied to unary calls (token exchange, createReadSession).
    /// The streaming `readRows` call is bounded by connect timeout only.
    pub request_timeout_secs: u64,

    /// Max attempts per stream before a transient readRows failure is fatal.
    pub read_attempts: usize,

    pub loglevel: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials_path: None,
            table: String::new(),
            max_stream_count: 1,
            selected_fields: None,
            row_restriction: None,
            storage_endpoint: Url::parse("https://bigquerystorage.googleapis.com")
                .expect("static URL"),
            proxy: None,
            connect_timeout_secs: 5,
            request_timeout_secs: 30,
            read_attempts: 3,
            loglevel: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Env::prefixed("BQSTREAM_"))
            .extract()
    }

    /// Column projection as the API wants it.
    pub fn selected_field_list(&self) -> Vec<String> {
        self.selected_fields
            .as_deref()
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub static CONFIG: LazyLock<Config> =
    LazyLock::new(|| Config::from_env().expect("FATAL: invalid BQSTREAM_* configuration"));
