//! End-to-end table read: authenticate, open a session, drain every stream,
//! print rows, report a summary.

use crate::auth::credentials::{ServiceAccountKey, locate_key_file};
use crate::auth::token::TokenProvider;
use crate::config::Config;
use crate::error::{ApiError, BqStreamError, IsRetryable};
use crate::rows::{RowDecoder, RowPrinter};
use crate::storage::client::{StorageClient, build_http_client};
use crate::storage::framing::JsonArrayFrames;
use crate::storage::types::{ReadFrame, TableReadOptions, TableReference};
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadSummary {
    pub session: String,
    pub streams: usize,
    pub rows: u64,
}

pub struct TableReader {
    client: StorageClient,
    read_attempts: usize,
}

impl TableReader {
    /// Load the service-account key and wire up the HTTP and token layers.
    pub fn from_config(cfg: &Config) -> Result<Self, BqStreamError> {
        let key_path = locate_key_file(cfg)?;
        let key = ServiceAccountKey::from_file(&key_path)?;
        let http = build_http_client(cfg)?;
        let tokens = Arc::new(TokenProvider::new(
            key,
            http.clone(),
            Duration::from_secs(cfg.request_timeout_secs),
        )?);
        Ok(Self {
            client: StorageClient::new(cfg, http, tokens),
            read_attempts: cfg.read_attempts.max(1),
        })
    }

    /// Run the whole fixed sequence against the configured table, writing
    /// one JSON object per row to `out`.
    pub async fn read_table<W: Write>(
        &self,
        cfg: &Config,
        out: W,
    ) -> Result<ReadSummary, BqStreamError> {
        let table: TableReference = cfg.table.parse()?;

        let selected_fields = cfg.selected_field_list();
        let read_options = if selected_fields.is_empty() && cfg.row_restriction.is_none() {
            None
        } else {
            Some(TableReadOptions {
                selected_fields,
                row_restriction: cfg.row_restriction.clone(),
            })
        };

        let session = self
            .client
            .create_read_session(&table, read_options, cfg.max_stream_count)
            .await?;

        if session.streams.is_empty() {
            info!(session = %session.name, table = %table, "session has no streams; table is empty");
            return Ok(ReadSummary {
                session: session.name,
                streams: 0,
                rows: 0,
            });
        }

        let schema = session
            .arrow_schema
            .as_ref()
            .ok_or_else(|| BqStreamError::MissingArrowSchema {
                session: session.name.clone(),
            })?;
        let decoder = RowDecoder::new(&schema.serialized_schema)?;

        let mut printer = RowPrinter::new(out);
        for stream in &session.streams {
            self.drain_stream(&stream.name, &decoder, &mut printer)
                .await?;
        }
        let rows = printer.finish()?;

        // The v1 API has no explicit close; dropping the handle releases it
        // and the server expires the session.
        info!(
            session = %session.name,
            streams = session.streams.len(),
            rows,
            "read session complete"
        );
        Ok(ReadSummary {
            session: session.name,
            streams: session.streams.len(),
            rows,
        })
    }

    /// Consume one stream to the end, resuming at the last printed row on
    /// transient failures.
    async fn drain_stream<W: Write>(
        &self,
        stream_name: &str,
        decoder: &RowDecoder,
        printer: &mut RowPrinter<W>,
    ) -> Result<(), BqStreamError> {
        let mut offset: i64 = 0;
        let mut attempt = 0usize;
        loop {
            match self
                .consume_once(stream_name, &mut offset, decoder, printer)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt + 1 < self.read_attempts => {
                    attempt += 1;
                    warn!(
                        stream = %stream_name,
                        offset,
                        attempt,
                        error = %e,
                        "readRows interrupted; resuming at current offset"
                    );
                    tokio::time::sleep(resume_delay(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn consume_once<W: Write>(
        &self,
        stream_name: &str,
        offset: &mut i64,
        decoder: &RowDecoder,
        printer: &mut RowPrinter<W>,
    ) -> Result<(), BqStreamError> {
        let resp = self.client.read_rows(stream_name, *offset).await?;

        let mut framer = JsonArrayFrames::new();
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for frame in framer.push(&chunk)? {
                match serde_json::from_slice::<ReadFrame>(&frame)? {
                    ReadFrame::Error { error } => {
                        return Err(ApiError { error }.into());
                    }
                    ReadFrame::Rows(msg) => {
                        if let Some(throttle) = msg.throttle_state
                            && throttle.throttle_percent > 0
                        {
                            debug!(
                                stream = %stream_name,
                                throttle_percent = throttle.throttle_percent,
                                "server is throttling this stream"
                            );
                        }

                        if let Some(payload) = msg.arrow_record_batch.as_ref() {
                            for batch in decoder.decode(&payload.serialized_record_batch)? {
                                let rows = batch.num_rows() as i64;
                                printer.write_batch(&batch)?;
                                // Offset advances only once rows are out the
                                // door, so a resume never skips or repeats.
                                *offset += rows;
                            }
                        }

                        if let Some(progress) = msg.stats.as_ref().and_then(|s| s.progress) {
                            debug!(
                                stream = %stream_name,
                                offset = *offset,
                                progress = progress.at_response_end,
                                "stream progress"
                            );
                        }
                    }
                }
            }
        }
        framer.finish()?;

        debug!(stream = %stream_name, rows = *offset, "stream drained");
        Ok(())
    }
}

fn resume_delay(attempt: usize) -> Duration {
    Duration::from_millis((500u64 << attempt.min(4)).min(5_000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_delay_backs_off_and_caps() {
        assert_eq!(resume_delay(1), Duration::from_millis(1_000));
        assert_eq!(resume_delay(2), Duration::from_millis(2_000));
        assert_eq!(resume_delay(10), Duration::from_millis(5_000));
    }
}
