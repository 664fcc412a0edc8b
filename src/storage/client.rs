use crate::auth::token::TokenProvider;
use crate::config::Config;
use crate::error::{ApiError, ApiErrorBody, BqStreamError, IsRetryable};
use crate::storage::types::{
    CreateReadSessionRequest, DataFormat, ReadSession, ReadSessionSpec, TableReadOptions,
    TableReference,
};
use backon::{ExponentialBuilder, Retryable};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

fn default_retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(3)
        .with_jitter()
}

/// Build the shared HTTP client the way the rest of the crate expects it:
/// rustls, adaptive HTTP/2 windows, bounded connect time, optional proxy.
pub fn build_http_client(cfg: &Config) -> Result<reqwest::Client, BqStreamError> {
    let mut builder = reqwest::Client::builder()
        .user_agent(concat!("bqstream/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
        .http2_adaptive_window(true);
    if let Some(proxy_url) = cfg.proxy.clone() {
        builder = builder.proxy(reqwest::Proxy::all(proxy_url.as_str())?);
    }
    Ok(builder.build()?)
}

/// Thin client over the BigQuery Storage Read API v1 REST surface.
pub struct StorageClient {
    http: reqwest::Client,
    base: Url,
    tokens: Arc<TokenProvider>,
    request_timeout: Duration,
}

impl StorageClient {
    pub fn new(cfg: &Config, http: reqwest::Client, tokens: Arc<TokenProvider>) -> Self {
        Self {
            http,
            base: cfg.storage_endpoint.clone(),
            tokens,
            request_timeout: Duration::from_secs(cfg.request_timeout_secs),
        }
    }

    /// Open a managed read session against `table`, Arrow format.
    pub async fn create_read_session(
        &self,
        table: &TableReference,
        read_options: Option<TableReadOptions>,
        max_stream_count: i32,
    ) -> Result<ReadSession, BqStreamError> {
        let url = session_url(&self.base, table)?;
        let request = CreateReadSessionRequest {
            parent: format!("projects/{}", table.project_id),
            read_session: ReadSessionSpec {
                table: table.resource_path(),
                data_format: DataFormat::Arrow,
                read_options,
            },
            max_stream_count,
        };

        let session = (|| async {
            let token = self.tokens.access_token().await?;
            let resp = self
                .http
                .post(url.clone())
                .timeout(self.request_timeout)
                .bearer_auth(&token)
                .json(&request)
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(decode_api_error(resp).await);
            }
            Ok(resp.json::<ReadSession>().await?)
        })
        .retry(default_retry_policy())
        .when(|e: &BqStreamError| e.is_retryable())
        .notify(|err, dur: Duration| {
            warn!("createReadSession retrying after error {}, sleeping {:?}", err, dur);
        })
        .await?;

        info!(
            session = %session.name,
            streams = session.streams.len(),
            estimated_rows = session.estimated_row_count.unwrap_or(-1),
            "read session created"
        );
        Ok(session)
    }

    /// Issue a streaming `readRows` call for one stream, starting at a row
    /// offset. Returns the raw response; the caller consumes the body.
    /// Mid-stream retry and offset resume live in the reader, which tracks
    /// how many rows it has already consumed.
    pub async fn read_rows(
        &self,
        stream_name: &str,
        offset: i64,
    ) -> Result<reqwest::Response, BqStreamError> {
        let url = stream_url(&self.base, stream_name, offset)?;
        debug!(stream = %stream_name, offset, "opening readRows stream");

        let token = self.tokens.access_token().await?;
        let resp = self.http.get(url).bearer_auth(&token).send().await?;
        if !resp.status().is_success() {
            return Err(decode_api_error(resp).await);
        }
        Ok(resp)
    }
}

/// `POST /v1/{readSession.table}`.
fn session_url(base: &Url, table: &TableReference) -> Result<Url, BqStreamError> {
    Ok(base.join(&format!("v1/{}", table.resource_path()))?)
}

/// `GET /v1/{readStream}?offset=N`, the REST rendering of the
/// server-streaming ReadRows RPC.
fn stream_url(base: &Url, stream_name: &str, offset: i64) -> Result<Url, BqStreamError> {
    let mut url = base.join(&format!("v1/{stream_name}"))?;
    url.query_pairs_mut()
        .append_pair("offset", &offset.to_string());
    Ok(url)
}

/// Decode a non-2xx response into [`BqStreamError::Api`], falling back to a
/// synthesized body when the error envelope itself does not parse.
pub(crate) async fn decode_api_error(resp: reqwest::Response) -> BqStreamError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiError>(&body) {
        Ok(api) => BqStreamError::Api(api),
        Err(_) => BqStreamError::Api(ApiError {
            error: ApiErrorBody {
                code: status.as_u16() as u32,
                message: body,
                status: status
                    .canonical_reason()
                    .unwrap_or_default()
                    .to_string(),
                extra: HashMap::new(),
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://bigquerystorage.googleapis.com").unwrap()
    }

    #[test]
    fn session_url_targets_the_table_resource() {
        let table: TableReference = "acme-warehouse.sales.orders".parse().unwrap();
        let url = session_url(&base(), &table).unwrap();
        assert_eq!(
            url.as_str(),
            "https://bigquerystorage.googleapis.com/v1/projects/acme-warehouse/datasets/sales/tables/orders"
        );
    }

    #[test]
    fn stream_url_carries_row_offset() {
        let url = stream_url(
            &base(),
            "projects/p/locations/us/sessions/S/streams/0",
            1500,
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://bigquerystorage.googleapis.com/v1/projects/p/locations/us/sessions/S/streams/0?offset=1500"
        );
    }

    #[test]
    fn urls_respect_endpoint_override() {
        let local = Url::parse("http://127.0.0.1:9050/").unwrap();
        let table: TableReference = "p.d.t".parse().unwrap();
        let url = session_url(&local, &table).unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9050/v1/projects/p/datasets/d/tables/t"
        );
    }
}
