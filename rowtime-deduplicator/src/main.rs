use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rowtime_deduplicator::config::Config;
use rowtime_deduplicator::metrics_const::INPUT_PARSE_ERRORS_COUNTER;
use rowtime_deduplicator::partition::PartitionRouter;
use rowtime_deduplicator::utils::async_helpers::unwrap_worker_task;
use rowtime_deduplicator::{ChangelogRecord, InMemoryStateBackend, KeySelector, Record};

fn init_tracing(json: bool) {
    // Logs go to stderr, stdout carries the changelog
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn start_metrics_exporter(config: &Config) -> Result<()> {
    let bind = config.bind_address();
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid metrics bind address {bind}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus metrics exporter")?;
    Ok(())
}

/// Reads NDJSON records from stdin and routes them. Returns the number of
/// lines read.
async fn route_input(router: &PartitionRouter<KeySelector>) -> Result<u64> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_number = 0u64;

    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read input line")?
    {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }

        let record: Record = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(line_number, error = ?e, "Skipping unparseable input line");
                metrics::counter!(INPUT_PARSE_ERRORS_COUNTER).increment(1);
                continue;
            }
        };

        if let Err(e) = router.route(record).await {
            if e.is_fatal() {
                return Err(e).with_context(|| format!("Failed to route input line {line_number}"));
            }
            warn!(line_number, error = ?e, "Skipping malformed record");
        }
    }

    Ok(line_number)
}

/// Writes every changelog record to stdout as one JSON object per line.
async fn write_changelog(mut output: mpsc::Receiver<ChangelogRecord>) -> Result<u64> {
    let mut stdout = BufWriter::new(tokio::io::stdout());
    let mut written = 0u64;

    while let Some(change) = output.recv().await {
        let mut line =
            serde_json::to_vec(&change).context("Failed to serialize changelog record")?;
        line.push(b'\n');
        stdout
            .write_all(&line)
            .await
            .context("Failed to write changelog record")?;
        written += 1;
    }

    stdout.flush().await.context("Failed to flush changelog")?;
    Ok(written)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::init_with_defaults()
        .context("Failed to load configuration from environment variables")?;

    init_tracing(config.log_json);
    info!("Starting row-time deduplicator");
    info!("Configuration loaded: {:?}", config);

    if config.metrics_enabled {
        start_metrics_exporter(&config)?;
        info!("Started metrics exporter on {}", config.bind_address());
    }

    let policy = config.to_policy().context("Invalid deduplication policy")?;
    let selector = config.key_selector().context("Invalid key selection")?;
    let backend = InMemoryStateBackend::new()
        .with_read_latency(config.state_read_latency())
        .with_write_latency(config.state_write_latency());

    let (changes, output) = mpsc::channel::<ChangelogRecord>(config.channel_buffer_size.max(1));
    let writer = tokio::spawn(write_changelog(output));

    let router = PartitionRouter::spawn(
        config.partition_count,
        policy,
        config.field_count,
        Arc::new(backend),
        selector,
        &config.to_worker_config(),
        |_| changes.clone(),
    )
    .context("Failed to start partition workers")?;
    // Only the workers hold senders now, so the writer ends once they do
    drop(changes);

    let routed = route_input(&router).await;
    let stats = router.shutdown().await;
    let written = unwrap_worker_task(writer, "Changelog writer panicked").await;

    let stats = stats.context("Deduplication failed")?;
    let lines = routed?;
    let written = written?;

    let summary = serde_json::to_string(&stats).context("Failed to serialize statistics")?;
    info!(
        lines,
        changes_written = written,
        %summary,
        "Row-time deduplicator finished"
    );
    Ok(())
}
