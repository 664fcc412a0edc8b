use mimalloc::MiMalloc;
use std::io;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = &bqstream::config::CONFIG;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();

    info!(
        table = %cfg.table,
        storage_endpoint = %cfg.storage_endpoint,
        max_stream_count = cfg.max_stream_count,
        proxy = %cfg.proxy.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
        loglevel = %cfg.loglevel,
    );

    let reader = bqstream::TableReader::from_config(cfg)?;
    match reader.read_table(cfg, io::stdout().lock()).await {
        Ok(summary) => {
            info!(
                session = %summary.session,
                streams = summary.streams,
                rows = summary.rows,
                "done"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, table = %cfg.table, "table read failed");
            Err(e.into())
        }
    }
}
